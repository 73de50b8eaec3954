use common::config::{RankBand, Report};

use crate::snapshot::{Snapshot, WalletRecord};

#[derive(Debug, Clone)]
pub struct DiffSettings {
    /// Half-open `[lo, hi)`.
    pub point_bands: Vec<[f64; 2]>,
    pub rank_bands: Vec<RankBand>,
    pub top_n: usize,
}

impl DiffSettings {
    pub fn from_config(report: &Report) -> Self {
        Self {
            point_bands: report.point_bands.clone(),
            rank_bands: report.rank_bands.clone(),
            top_n: report.top_n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandCount {
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotSummary {
    pub wallets: usize,
    pub total_points: f64,
    pub wallets_with_points: usize,
    pub point_bands: Vec<BandCount>,
    pub rank_bands: Vec<BandCount>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonEntry {
    pub wallet: String,
    pub points_delta: f64,
    /// `None` when either side has no rank.
    pub rank_delta: Option<i64>,
    pub current_rank: Option<u64>,
    pub points_improved: bool,
    /// Lower rank is better, so this is `rank_delta < 0`.
    pub rank_improved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiffReport {
    pub previous: SnapshotSummary,
    pub current: SnapshotSummary,
    pub comparison: Vec<ComparisonEntry>,
    pub top: Vec<WalletRecord>,
}

impl DiffReport {
    pub fn total_points_delta(&self) -> f64 {
        self.current.total_points - self.previous.total_points
    }

    pub fn wallets_with_points_delta(&self) -> i64 {
        to_i64(self.current.wallets_with_points) - to_i64(self.previous.wallets_with_points)
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub fn point_band_label(band: &[f64; 2]) -> String {
    format!("{} - {}", band[0], band[1])
}

pub fn rank_band_label(band: &RankBand) -> String {
    match band.max {
        Some(max) => format!("{} - {max}", band.min),
        None => format!("{}+", band.min),
    }
}

fn in_rank_band(band: &RankBand, rank: u64) -> bool {
    rank >= band.min && band.max.map_or(true, |max| rank <= max)
}

/// Count wallets per band. A wallet lands in the first band that contains it
/// and in none if no band does.
fn histogram<T: Copy>(
    values: impl Iterator<Item = Option<T>>,
    labels: Vec<String>,
    contains: impl Fn(usize, T) -> bool,
) -> Vec<BandCount> {
    let mut counts = vec![0usize; labels.len()];
    for v in values.flatten() {
        if let Some(i) = (0..counts.len()).find(|&i| contains(i, v)) {
            counts[i] += 1;
        }
    }
    labels
        .into_iter()
        .zip(counts)
        .map(|(label, count)| BandCount { label, count })
        .collect()
}

pub fn summarize(snapshot: &Snapshot, settings: &DiffSettings) -> SnapshotSummary {
    let records = snapshot.records();

    let point_bands = histogram(
        records.iter().map(|r| Some(r.points)),
        settings.point_bands.iter().map(point_band_label).collect(),
        |i, p| {
            let [lo, hi] = settings.point_bands[i];
            p >= lo && p < hi
        },
    );
    let rank_bands = histogram(
        records.iter().map(|r| r.rank),
        settings.rank_bands.iter().map(rank_band_label).collect(),
        |i, rank| in_rank_band(&settings.rank_bands[i], rank),
    );

    SnapshotSummary {
        wallets: records.len(),
        total_points: records.iter().map(|r| r.points).sum(),
        wallets_with_points: records.iter().filter(|r| r.points > 0.0).count(),
        point_bands,
        rank_bands,
    }
}

fn rank_delta(current: Option<u64>, previous: Option<u64>) -> Option<i64> {
    let c = i64::try_from(current?).ok()?;
    let p = i64::try_from(previous?).ok()?;
    c.checked_sub(p)
}

/// Inner join on wallet, in the current snapshot's order.
pub fn compare(previous: &Snapshot, current: &Snapshot) -> Vec<ComparisonEntry> {
    current
        .records()
        .iter()
        .filter_map(|cur| {
            let prev = previous.get(&cur.wallet)?;
            let points_delta = cur.points - prev.points;
            let rank_delta = rank_delta(cur.rank, prev.rank);
            Some(ComparisonEntry {
                wallet: cur.wallet.clone(),
                points_delta,
                rank_delta,
                current_rank: cur.rank,
                points_improved: points_delta > 0.0,
                rank_improved: rank_delta.is_some_and(|d| d < 0),
            })
        })
        .collect()
}

/// Ranked wallets of `snapshot`, best rank first, at most `n`.
pub fn top_by_rank(snapshot: &Snapshot, n: usize) -> Vec<WalletRecord> {
    let mut ranked: Vec<&WalletRecord> = snapshot
        .records()
        .iter()
        .filter(|r| r.rank.is_some_and(|rank| rank > 0))
        .collect();
    ranked.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.wallet.cmp(&b.wallet)));
    ranked.into_iter().take(n).cloned().collect()
}

pub fn compute_diff(previous: &Snapshot, current: &Snapshot, settings: &DiffSettings) -> DiffReport {
    DiffReport {
        previous: summarize(previous, settings),
        current: summarize(current, settings),
        comparison: compare(previous, current),
        top: top_by_rank(current, settings.top_n),
    }
}
