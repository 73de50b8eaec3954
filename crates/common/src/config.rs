use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: General,
    pub api: Api,
    pub http: Http,
    pub paths: Paths,
    pub modes: Modes,
    pub report: Report,
    pub observability: Option<Observability>,
}

#[derive(Debug, Deserialize)]
pub struct General {
    pub mode: RunMode,
    pub log_level: String,
}

/// Pipeline preset. Bulk trades request volume for latency; stealth runs one
/// wallet at a time with jittered pauses between wallets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Bulk,
    Stealth,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bulk => "bulk",
            Self::Stealth => "stealth",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bulk" => Ok(Self::Bulk),
            "stealth" | "sequential" => Ok(Self::Stealth),
            other => Err(format!("unknown mode: {other} (expected bulk or stealth)")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Api {
    pub base_url: String,
    pub connect_path: String,
    /// Must contain an `{id}` placeholder for the record id.
    pub points_path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Api {
    pub fn connect_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.connect_path)
    }

    pub fn points_url(&self, record_id: &str) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.points_path.replace("{id}", record_id)
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct Http {
    pub request_timeout_secs: u64,
    pub retry_statuses: Vec<u16>,
    #[serde(default)]
    pub retry_decode_errors: bool,
    pub raw_dump_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct Paths {
    pub wallets_file: String,
    pub proxies_file: Option<String>,
    pub results_dir: String,
}

#[derive(Debug, Deserialize)]
pub struct Modes {
    pub bulk: ModeSettings,
    pub stealth: ModeSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModeSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub wallet_delay_min_ms: u64,
    pub wallet_delay_max_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Report {
    pub top_n: usize,
    /// Half-open `[lo, hi)` point ranges.
    pub point_bands: Vec<[f64; 2]>,
    pub rank_bands: Vec<RankBand>,
}

/// Inclusive rank range; `max = None` is the open-ended top band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RankBand {
    pub min: u64,
    pub max: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {path}"))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn mode(&self, mode: RunMode) -> &ModeSettings {
        match mode {
            RunMode::Bulk => &self.modes.bulk,
            RunMode::Stealth => &self.modes.stealth,
        }
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.api.base_url.is_empty(), "api.base_url must be set");
        anyhow::ensure!(
            self.api.points_path.contains("{id}"),
            "api.points_path must contain an {{id}} placeholder"
        );
        anyhow::ensure!(
            self.http.request_timeout_secs > 0,
            "http.request_timeout_secs must be > 0"
        );
        for (name, m) in [("bulk", &self.modes.bulk), ("stealth", &self.modes.stealth)] {
            anyhow::ensure!(m.concurrency > 0, "modes.{name}.concurrency must be > 0");
            anyhow::ensure!(m.max_retries > 0, "modes.{name}.max_retries must be > 0");
            anyhow::ensure!(
                m.wallet_delay_min_ms <= m.wallet_delay_max_ms,
                "modes.{name}.wallet_delay_min_ms must be <= wallet_delay_max_ms"
            );
        }
        for [lo, hi] in &self.report.point_bands {
            anyhow::ensure!(lo < hi, "report.point_bands entries must satisfy lo < hi");
        }
        for band in &self.report.rank_bands {
            anyhow::ensure!(band.min >= 1, "report.rank_bands min must be >= 1");
            if let Some(max) = band.max {
                anyhow::ensure!(max >= band.min, "report.rank_bands max must be >= min");
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}
