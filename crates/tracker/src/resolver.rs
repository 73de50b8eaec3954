use common::http::CallOutcome;
use common::types::{ConnectResponse, PointsResponse, WalletKind};
use tracing::{debug, info, warn};

use crate::api::PointsApi;
use crate::snapshot::WalletRecord;

/// Terminal result of resolving one wallet.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletOutcome {
    Resolved(WalletRecord),
    /// Stats call succeeded but carried no usable block for this wallet kind.
    NoData { wallet: String, record_id: String },
    ConnectFailed { wallet: String, reason: String },
    StatsFailed {
        wallet: String,
        record_id: String,
        reason: String,
    },
}

impl WalletOutcome {
    pub fn wallet(&self) -> &str {
        match self {
            Self::Resolved(r) => &r.wallet,
            Self::NoData { wallet, .. }
            | Self::ConnectFailed { wallet, .. }
            | Self::StatsFailed { wallet, .. } => wallet,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Resolved(_) => "resolved",
            Self::NoData { .. } => "no_data",
            Self::ConnectFailed { .. } => "connect_failed",
            Self::StatsFailed { .. } => "stats_failed",
        }
    }

    pub fn record(&self) -> Option<&WalletRecord> {
        match self {
            Self::Resolved(r) => Some(r),
            _ => None,
        }
    }
}

enum State {
    Connecting,
    Resolving { record_id: String },
    Done(WalletOutcome),
}

/// Run the connect → stats sequence for one wallet. Never retries across
/// steps; each call's retry budget lives in the HTTP client.
pub async fn resolve_wallet<A: PointsApi + Sync>(api: &A, wallet: &str) -> WalletOutcome {
    let kind = WalletKind::of(wallet);
    let mut state = State::Connecting;

    let outcome = loop {
        state = match state {
            State::Connecting => connect_step(api, wallet).await,
            State::Resolving { record_id } => stats_step(api, wallet, kind, record_id).await,
            State::Done(outcome) => break outcome,
        };
    };

    log_outcome(&outcome);
    metrics::counter!("tracker_wallet_outcomes_total", "outcome" => outcome.label()).increment(1);
    outcome
}

async fn connect_step<A: PointsApi + Sync>(api: &A, wallet: &str) -> State {
    let failed = |reason: String| {
        State::Done(WalletOutcome::ConnectFailed {
            wallet: wallet.to_string(),
            reason,
        })
    };

    let body = match api.connect(wallet).await {
        CallOutcome::Success(v) => v,
        other => return failed(failure_reason(&other)),
    };
    let resp: ConnectResponse = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => return failed(format!("unexpected connect body: {e}")),
    };
    match resp.record_id() {
        Some(id) => {
            debug!(wallet, record_id = id, kind = WalletKind::of(wallet).as_str(), "connected");
            State::Resolving {
                record_id: id.to_string(),
            }
        }
        None => failed("connect returned no record id".to_string()),
    }
}

async fn stats_step<A: PointsApi + Sync>(
    api: &A,
    wallet: &str,
    kind: WalletKind,
    record_id: String,
) -> State {
    let body = match api.fetch_points(&record_id).await {
        CallOutcome::Success(v) => v,
        other => {
            return State::Done(WalletOutcome::StatsFailed {
                wallet: wallet.to_string(),
                record_id,
                reason: failure_reason(&other),
            })
        }
    };

    let resp: PointsResponse = match serde_json::from_value(body) {
        Ok(r) => r,
        Err(e) => {
            return State::Done(WalletOutcome::StatsFailed {
                wallet: wallet.to_string(),
                record_id,
                reason: format!("unexpected points body: {e}"),
            })
        }
    };
    if !resp.status {
        return State::Done(WalletOutcome::StatsFailed {
            wallet: wallet.to_string(),
            record_id,
            reason: "points status=false".to_string(),
        });
    }

    let record = resp.stats_for(kind).and_then(|stats| {
        let points = stats.total_points.unwrap_or(0.0);
        let rank = stats.rank.filter(|r| *r > 0)?;
        (points.is_finite() && points >= 0.0).then(|| WalletRecord {
            wallet: wallet.to_string(),
            record_id: record_id.clone(),
            points,
            rank: Some(rank),
        })
    });

    State::Done(match record {
        Some(r) => WalletOutcome::Resolved(r),
        None => WalletOutcome::NoData {
            wallet: wallet.to_string(),
            record_id,
        },
    })
}

fn failure_reason(outcome: &CallOutcome) -> String {
    match outcome {
        CallOutcome::Success(_) => "success".to_string(),
        CallOutcome::RetryableFailure {
            attempts,
            last_error: Some(e),
        } => format!("gave up after {attempts} attempts: {e}"),
        CallOutcome::RetryableFailure { attempts, .. } => {
            format!("gave up after {attempts} attempts")
        }
        CallOutcome::PermanentFailure(e) => e.to_string(),
    }
}

fn log_outcome(outcome: &WalletOutcome) {
    match outcome {
        WalletOutcome::Resolved(r) => info!(
            wallet = %r.wallet,
            record_id = %r.record_id,
            points = r.points,
            rank = r.rank,
            "wallet resolved"
        ),
        WalletOutcome::NoData { wallet, record_id } => {
            info!(wallet = %wallet, record_id = %record_id, "no data")
        }
        WalletOutcome::ConnectFailed { wallet, reason } => {
            warn!(wallet = %wallet, reason = %reason, "connect failed")
        }
        WalletOutcome::StatsFailed {
            wallet,
            record_id,
            reason,
        } => warn!(wallet = %wallet, record_id = %record_id, reason = %reason, "stats fetch failed"),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use common::http::CallError;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted API: canned outcomes per wallet / record id, with a call log.
    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub connect: HashMap<String, CallOutcome>,
        pub points: HashMap<String, CallOutcome>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        pub fn with_wallet(mut self, wallet: &str, id: &str, stats: Value) -> Self {
            self.connect.insert(
                wallet.to_string(),
                CallOutcome::Success(json!({"status": true, "data": {"id": id}})),
            );
            self.points.insert(
                id.to_string(),
                CallOutcome::Success(json!({"status": true, "data": stats})),
            );
            self
        }
    }

    impl PointsApi for FakeApi {
        async fn connect(&self, wallet: &str) -> CallOutcome {
            self.calls.lock().unwrap().push(format!("connect {wallet}"));
            self.connect
                .get(wallet)
                .cloned()
                .unwrap_or(CallOutcome::PermanentFailure(CallError::Status(404)))
        }

        async fn fetch_points(&self, record_id: &str) -> CallOutcome {
            self.calls.lock().unwrap().push(format!("points {record_id}"));
            self.points
                .get(record_id)
                .cloned()
                .unwrap_or(CallOutcome::PermanentFailure(CallError::Status(404)))
        }
    }

    #[tokio::test]
    async fn test_evm_wallet_resolves_from_evm_block() {
        let api = FakeApi::default().with_wallet(
            "0xABC",
            "42",
            json!({"evm_leaderboard_stats": {"total_points": 12.5, "rank": 300}}),
        );
        let outcome = resolve_wallet(&api, "0xABC").await;
        let record = outcome.record().unwrap();
        assert_eq!(
            record.to_line(),
            "Wallet: 0xABC | ID: 42 | Points: 12.5 | Rank: 300"
        );
    }

    #[tokio::test]
    async fn test_native_wallet_reads_allora_block() {
        let api = FakeApi::default().with_wallet(
            "allo1xyz",
            "7",
            json!({
                "evm_leaderboard_stats": {"total_points": 999.0, "rank": 1},
                "allora_leaderboard_stats": {"total_points": 3.25, "rank": 4500}
            }),
        );
        let outcome = resolve_wallet(&api, "allo1xyz").await;
        let record = outcome.record().unwrap();
        assert_eq!(record.points, 3.25);
        assert_eq!(record.rank, Some(4500));
    }

    #[tokio::test]
    async fn test_connect_status_false_skips_stats_call() {
        let mut api = FakeApi::default();
        api.connect.insert(
            "cosmos1xyz".to_string(),
            CallOutcome::Success(json!({"status": false, "data": {"id": "9"}})),
        );
        api.points.insert(
            "9".to_string(),
            CallOutcome::Success(json!({"status": true, "data": {}})),
        );

        let outcome = resolve_wallet(&api, "cosmos1xyz").await;
        assert_eq!(outcome.label(), "connect_failed");
        assert!(outcome.record().is_none());
        assert_eq!(*api.calls.lock().unwrap(), vec!["connect cosmos1xyz"]);
    }

    #[tokio::test]
    async fn test_missing_block_is_no_data() {
        let api = FakeApi::default().with_wallet(
            "0xDEF",
            "5",
            json!({"allora_leaderboard_stats": {"total_points": 1.0, "rank": 10}}),
        );
        let outcome = resolve_wallet(&api, "0xDEF").await;
        assert_eq!(
            outcome,
            WalletOutcome::NoData {
                wallet: "0xDEF".to_string(),
                record_id: "5".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_missing_rank_is_no_data() {
        let api = FakeApi::default().with_wallet(
            "0x1",
            "1",
            json!({"evm_leaderboard_stats": {"total_points": 1.0, "rank": null}}),
        );
        assert_eq!(resolve_wallet(&api, "0x1").await.label(), "no_data");
    }

    #[tokio::test]
    async fn test_stats_call_failure_is_reported() {
        let mut api = FakeApi::default();
        api.connect.insert(
            "0x2".to_string(),
            CallOutcome::Success(json!({"status": true, "data": {"id": "2"}})),
        );
        api.points.insert(
            "2".to_string(),
            CallOutcome::RetryableFailure {
                attempts: 10,
                last_error: Some(CallError::Status(503)),
            },
        );
        match resolve_wallet(&api, "0x2").await {
            WalletOutcome::StatsFailed { reason, .. } => {
                assert!(reason.contains("10 attempts"));
                assert!(reason.contains("503"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
