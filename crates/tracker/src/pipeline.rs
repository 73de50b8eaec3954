use anyhow::Result;
use chrono::{DateTime, TimeZone};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::PointsApi;
use crate::diff::{compute_diff, DiffReport, DiffSettings};
use crate::report::write_report;
use crate::scheduler::{run_batch, BatchSummary, SchedulerSettings};
use crate::snapshot::{load_snapshot, locate_latest_two, snapshot_file_name, History, SnapshotWriter};

#[derive(Debug)]
pub struct RunOutput {
    pub snapshot_path: PathBuf,
    pub summary: BatchSummary,
}

/// Resolve all wallets and append each resolved record to a fresh snapshot
/// file named after `started_at`. The file exists even if nothing resolves.
///
/// A failed write stops further submissions and fails the run once in-flight
/// wallets finish.
pub async fn run_once<A, Tz>(
    api: Arc<A>,
    wallets: Vec<String>,
    settings: &SchedulerSettings,
    results_dir: &Path,
    started_at: &DateTime<Tz>,
    cancel: &CancellationToken,
) -> Result<RunOutput>
where
    A: PointsApi + Send + Sync + 'static,
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut writer = SnapshotWriter::create(results_dir, &snapshot_file_name(started_at))?;
    tracing::info!(path = %writer.path().display(), "writing snapshot");

    let stop = cancel.child_token();
    let mut write_error = None;
    let summary = run_batch(api, wallets, settings, &stop, |outcome| {
        let Some(record) = outcome.record() else {
            return;
        };
        if write_error.is_some() {
            return;
        }
        if let Err(e) = writer.append(record) {
            tracing::error!(error = %e, "snapshot write failed, stopping run");
            write_error = Some(e);
            stop.cancel();
        }
    })
    .await;

    if let Some(e) = write_error {
        return Err(e);
    }

    metrics::gauge!("tracker_last_run_resolved").set(writer.written() as f64);
    tracing::info!(
        submitted = summary.submitted,
        resolved = summary.resolved,
        no_data = summary.no_data,
        connect_failed = summary.connect_failed,
        stats_failed = summary.stats_failed,
        panicked = summary.panicked,
        skipped = summary.skipped,
        written = writer.written(),
        "run finished"
    );

    Ok(RunOutput {
        snapshot_path: writer.path().to_path_buf(),
        summary,
    })
}

#[derive(Debug)]
pub enum DiffStatus {
    InsufficientHistory { found: usize },
    Written { path: PathBuf, report: DiffReport },
}

/// Compare the two most recent snapshots in `results_dir` and write the
/// report next to them.
pub fn diff_latest<Tz>(results_dir: &Path, settings: &DiffSettings, now: &DateTime<Tz>) -> Result<DiffStatus>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let (previous, current) = match locate_latest_two(results_dir)? {
        History::Pair { previous, current } => (previous, current),
        History::Insufficient { found } => {
            tracing::info!(found, dir = %results_dir.display(), "not enough snapshots to compare");
            return Ok(DiffStatus::InsufficientHistory { found });
        }
    };

    tracing::info!(
        previous = %previous.display(),
        current = %current.display(),
        "comparing snapshots"
    );
    let report = compute_diff(&load_snapshot(&previous)?, &load_snapshot(&current)?, settings);
    let path = write_report(results_dir, &report, now)?;
    tracing::info!(
        path = %path.display(),
        compared = report.comparison.len(),
        total_points_delta = report.total_points_delta(),
        "report written"
    );
    Ok(DiffStatus::Written { path, report })
}
