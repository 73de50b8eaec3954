//! Result files: one append-only file per run, one line per resolved wallet.
//!
//! Line format: `Wallet: <w> | ID: <id> | Points: <p> | Rank: <r>`.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

const RESULT_PREFIX: &str = "result_";
const RESULT_SUFFIX: &str = ".log";
pub const NO_DATA: &str = "No data";

#[derive(Debug, Clone, PartialEq)]
pub struct WalletRecord {
    pub wallet: String,
    pub record_id: String,
    pub points: f64,
    pub rank: Option<u64>,
}

impl WalletRecord {
    pub fn to_line(&self) -> String {
        let rank = self
            .rank
            .map_or_else(|| NO_DATA.to_string(), |r| r.to_string());
        format!(
            "Wallet: {} | ID: {} | Points: {} | Rank: {}",
            self.wallet, self.record_id, self.points, rank
        )
    }

    pub fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let parts: Vec<&str> = line.split(" | ").collect();
        if parts.len() < 4 {
            return Err(format!("expected 4 fields, got {}", parts.len()));
        }
        let field = |idx: usize, key: &str| field_value(&parts, idx, key);

        let wallet = field(0, "Wallet")?;
        if wallet.is_empty() {
            return Err("empty wallet".to_string());
        }
        let record_id = field(1, "ID")?;

        let points_raw = field(2, "Points")?;
        let points = if points_raw.contains(NO_DATA) {
            0.0
        } else {
            points_raw
                .parse::<f64>()
                .map_err(|e| format!("bad points {points_raw:?}: {e}"))?
        };
        if !points.is_finite() || points < 0.0 {
            return Err(format!("points out of range: {points_raw}"));
        }

        let rank_raw = field(3, "Rank")?;
        let rank = if rank_raw.contains(NO_DATA) {
            None
        } else {
            let r = rank_raw
                .parse::<u64>()
                .map_err(|e| format!("bad rank {rank_raw:?}: {e}"))?;
            (r > 0).then_some(r)
        };

        Ok(Self {
            wallet: wallet.to_string(),
            record_id: record_id.to_string(),
            points,
            rank,
        })
    }
}

fn field_value<'a>(
    parts: &[&'a str],
    idx: usize,
    key: &str,
) -> std::result::Result<&'a str, String> {
    let (k, v) = parts[idx]
        .split_once(": ")
        .ok_or_else(|| format!("field {idx} has no ': ' separator"))?;
    if k.trim() != key {
        return Err(format!("expected field {key}, got {k}"));
    }
    Ok(v.trim())
}

/// Records of one run keyed by wallet; a repeated wallet overwrites the
/// earlier record in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    records: Vec<WalletRecord>,
    index: HashMap<String, usize>,
}

impl Snapshot {
    pub fn insert(&mut self, record: WalletRecord) {
        match self.index.get(&record.wallet) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(record.wallet.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, wallet: &str) -> Option<&WalletRecord> {
        self.index.get(wallet).map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[WalletRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<WalletRecord> for Snapshot {
    fn from_iter<I: IntoIterator<Item = WalletRecord>>(iter: I) -> Self {
        let mut s = Self::default();
        for r in iter {
            s.insert(r);
        }
        s
    }
}

/// Parse snapshot text. Malformed lines are logged and skipped.
pub fn parse_snapshot(content: &str, source: &str) -> Snapshot {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx, line.trim()))
        .filter(|(_, line)| !line.is_empty())
        .filter_map(|(idx, line)| match WalletRecord::parse_line(line) {
            Ok(r) => Some(r),
            Err(e) => {
                warn!(file = source, line = idx + 1, error = %e, "skipping malformed snapshot line");
                None
            }
        })
        .collect()
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    Ok(parse_snapshot(&content, &path.display().to_string()))
}

pub fn snapshot_file_name<Tz: TimeZone>(started_at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!(
        "{RESULT_PREFIX}{}{RESULT_SUFFIX}",
        started_at.format("%Y%m%d-%H%M%S")
    )
}

fn is_snapshot_file(name: &str) -> bool {
    name.starts_with(RESULT_PREFIX) && name.ends_with(RESULT_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum History {
    Insufficient { found: usize },
    Pair { previous: PathBuf, current: PathBuf },
}

/// The two most recently modified result files in `dir`, oldest first.
/// A missing directory counts as empty history.
pub fn locate_latest_two(dir: &Path) -> Result<History> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(History::Insufficient { found: 0 })
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to list {}", dir.display()));
        }
    };

    let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if !is_snapshot_file(&name.to_string_lossy()) {
            continue;
        }
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        files.push((meta.modified()?, entry.path()));
    }
    files.sort();

    let found = files.len();
    let mut newest = files.into_iter().rev();
    match (newest.next(), newest.next()) {
        (Some((_, current)), Some((_, previous))) => Ok(History::Pair { previous, current }),
        _ => Ok(History::Insufficient { found }),
    }
}

/// Single owner of the run's result file. Lines are flushed as they are
/// written so a crashed run still leaves a parseable prefix.
pub struct SnapshotWriter {
    path: PathBuf,
    file: File,
    written: usize,
}

impl SnapshotWriter {
    pub fn create(dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(file_name);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            path,
            file,
            written: 0,
        })
    }

    pub fn append(&mut self, record: &WalletRecord) -> Result<()> {
        writeln!(self.file, "{}", record.to_line())
            .and_then(|()| self.file.flush())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }
}
