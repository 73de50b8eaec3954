use serde::{Deserialize, Serialize};

/// Address family of a wallet identifier. The API keeps separate
/// leaderboards for each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletKind {
    Evm,
    Native,
}

impl WalletKind {
    pub fn of(wallet: &str) -> Self {
        if wallet.starts_with("0x") {
            Self::Evm
        } else {
            Self::Native
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Native => "native",
        }
    }
}

/// Body of `POST /users/connect`. Exactly one address is populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectRequest {
    pub allora_address: Option<String>,
    pub evm_address: Option<String>,
}

impl ConnectRequest {
    pub fn for_wallet(wallet: &str) -> Self {
        match WalletKind::of(wallet) {
            WalletKind::Evm => Self {
                allora_address: None,
                evm_address: Some(wallet.to_string()),
            },
            WalletKind::Native => Self {
                allora_address: Some(wallet.to_string()),
                evm_address: None,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectResponse {
    #[serde(default)]
    pub status: bool,
    pub data: Option<ConnectData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectData {
    #[serde(default, deserialize_with = "de_opt_string_any")]
    pub id: Option<String>,
}

impl ConnectResponse {
    /// The record id, when the connect succeeded and returned a usable id.
    pub fn record_id(&self) -> Option<&str> {
        if !self.status {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|d| d.id.as_deref())
            .filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointsResponse {
    #[serde(default)]
    pub status: bool,
    pub data: Option<PointsData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointsData {
    pub evm_leaderboard_stats: Option<LeaderboardStats>,
    pub allora_leaderboard_stats: Option<LeaderboardStats>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LeaderboardStats {
    pub total_points: Option<f64>,
    pub rank: Option<u64>,
}

impl PointsResponse {
    /// The stats block matching the wallet's kind, if the API returned one.
    pub fn stats_for(&self, kind: WalletKind) -> Option<&LeaderboardStats> {
        let data = self.data.as_ref()?;
        match kind {
            WalletKind::Evm => data.evm_leaderboard_stats.as_ref(),
            WalletKind::Native => data.allora_leaderboard_stats.as_ref(),
        }
    }
}

/// Accepts the connect id as either a JSON string or a number.
fn de_opt_string_any<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct StringOrNumber;

    impl<'de> de::Visitor<'de> for StringOrNumber {
        type Value = Option<String>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            write!(f, "a string or number")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(StringOrNumber)
}
