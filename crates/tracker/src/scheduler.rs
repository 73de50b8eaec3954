use std::sync::Arc;
use std::time::Duration;

use common::config::ModeSettings;
use rand::Rng;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::PointsApi;
use crate::resolver::{resolve_wallet, WalletOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Wallets in flight at once. Never below 1.
    pub concurrency: usize,
    pub delay_min: Duration,
    pub delay_max: Duration,
}

impl SchedulerSettings {
    pub fn from_mode(mode: &ModeSettings, concurrency_override: Option<usize>) -> Self {
        Self {
            concurrency: concurrency_override.unwrap_or(mode.concurrency).max(1),
            delay_min: Duration::from_millis(mode.wallet_delay_min_ms),
            delay_max: Duration::from_millis(mode.wallet_delay_max_ms),
        }
    }

    /// Uniform in `[delay_min, delay_max]`.
    pub fn next_delay(&self) -> Duration {
        if self.delay_max <= self.delay_min {
            return self.delay_min;
        }
        let (min, max) = (millis(self.delay_min), millis(self.delay_max));
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub submitted: usize,
    pub resolved: usize,
    pub no_data: usize,
    pub connect_failed: usize,
    pub stats_failed: usize,
    pub panicked: usize,
    /// Never submitted because the run was cancelled.
    pub skipped: usize,
}

impl BatchSummary {
    fn record(&mut self, outcome: &WalletOutcome) {
        match outcome {
            WalletOutcome::Resolved(_) => self.resolved += 1,
            WalletOutcome::NoData { .. } => self.no_data += 1,
            WalletOutcome::ConnectFailed { .. } => self.connect_failed += 1,
            WalletOutcome::StatsFailed { .. } => self.stats_failed += 1,
        }
    }

    pub fn completed(&self) -> usize {
        self.resolved + self.no_data + self.connect_failed + self.stats_failed + self.panicked
    }
}

/// Resolve every wallet with at most `settings.concurrency` in flight.
///
/// `on_outcome` runs on the calling task in completion order, so it is the
/// single place results are consumed. Returns once every submitted wallet has
/// finished. After `cancel` fires no further wallets are submitted; in-flight
/// ones still run to completion.
pub async fn run_batch<A, F>(
    api: Arc<A>,
    wallets: Vec<String>,
    settings: &SchedulerSettings,
    cancel: &CancellationToken,
    mut on_outcome: F,
) -> BatchSummary
where
    A: PointsApi + Send + Sync + 'static,
    F: FnMut(&WalletOutcome),
{
    let width = settings.concurrency.max(1);
    let mut queue = wallets.into_iter();
    let mut in_flight = JoinSet::new();
    let mut summary = BatchSummary::default();

    tracing::info!(
        wallets = queue.len(),
        concurrency = width,
        delay_min_ms = millis(settings.delay_min),
        delay_max_ms = millis(settings.delay_max),
        "batch starting"
    );

    loop {
        while in_flight.len() < width && !cancel.is_cancelled() {
            let Some(wallet) = queue.next() else {
                break;
            };

            if summary.submitted > 0 {
                let delay = settings.next_delay();
                if !delay.is_zero() {
                    tracing::debug!(wallet = %wallet, delay_ms = millis(delay), "pacing");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            summary.skipped += 1;
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }

            let api = Arc::clone(&api);
            in_flight.spawn(async move { resolve_wallet(api.as_ref(), &wallet).await });
            summary.submitted += 1;
        }

        match in_flight.join_next().await {
            Some(Ok(outcome)) => {
                summary.record(&outcome);
                on_outcome(&outcome);
            }
            Some(Err(e)) => {
                summary.panicked += 1;
                tracing::error!(error = %e, "wallet task failed");
            }
            None => break,
        }
    }

    summary.skipped += queue.count();
    if summary.skipped > 0 {
        tracing::warn!(skipped = summary.skipped, "batch cancelled before all wallets were submitted");
    }
    summary
}
