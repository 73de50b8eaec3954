use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use std::fmt::{Display, Write as _};
use std::path::{Path, PathBuf};

use crate::diff::{BandCount, DiffReport};
use crate::snapshot::NO_DATA;

fn yes_no(b: bool) -> &'static str {
    if b {
        "Yes"
    } else {
        "No"
    }
}

fn or_no_data<T: Display>(v: Option<T>) -> String {
    v.map_or_else(|| NO_DATA.to_string(), |v| v.to_string())
}

/// Signed to three decimals, with an explicit `+` on gains.
fn signed_3(v: f64) -> String {
    if v > 0.0 {
        format!("+{v:.3}")
    } else {
        format!("{v:.3}")
    }
}

fn write_bands(out: &mut String, title: &str, bands: &[BandCount]) {
    let _ = writeln!(out, "\n--- {title} ---");
    for b in bands {
        let _ = writeln!(out, "{}: {}", b.label, b.count);
    }
}

/// Plain-text report: one line per joined wallet, then summary, top wallets
/// and band histograms for both snapshots.
pub fn render(report: &DiffReport) -> String {
    let mut out = String::new();

    for e in &report.comparison {
        let _ = writeln!(
            out,
            "Wallet: {}, Points Change: {}, Rank Change: {}, Current Rank: {}, \
             Increased Points: {}, Increased Rank: {}, Points Difference: {}",
            e.wallet,
            e.points_delta,
            or_no_data(e.rank_delta),
            or_no_data(e.current_rank),
            yes_no(e.points_improved),
            yes_no(e.rank_improved),
            signed_3(e.points_delta),
        );
    }

    let prev = &report.previous;
    let cur = &report.current;
    out.push_str("\n--- Summary ---\n");
    let _ = writeln!(
        out,
        "Previous Total Points: {:.3}, Wallets with Points: {}",
        prev.total_points, prev.wallets_with_points
    );
    let _ = writeln!(
        out,
        "Current Total Points: {:.3}, Wallets with Points: {}",
        cur.total_points, cur.wallets_with_points
    );
    let _ = writeln!(
        out,
        "Difference in Total Points: {:.3}",
        report.total_points_delta()
    );
    let _ = writeln!(
        out,
        "Difference in Wallets with Points: {}",
        report.wallets_with_points_delta()
    );

    let _ = writeln!(out, "\n--- Top {} Wallets by Rank ---", report.top.len());
    for r in &report.top {
        let _ = writeln!(
            out,
            "Wallet: {}, Rank: {}, Points: {:.3}",
            r.wallet,
            or_no_data(r.rank),
            r.points
        );
    }

    write_bands(&mut out, "Wallets by Points Categories (Previous)", &prev.point_bands);
    write_bands(&mut out, "Wallets by Points Categories (Current)", &cur.point_bands);
    write_bands(&mut out, "Wallets by Rank Categories (Previous)", &prev.rank_bands);
    write_bands(&mut out, "Wallets by Rank Categories (Current)", &cur.rank_bands);

    out
}

pub fn report_file_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    format!("compare_result_{}.txt", now.format("%Y%m%d-%H%M%S"))
}

pub fn write_report<Tz: TimeZone>(dir: &Path, report: &DiffReport, now: &DateTime<Tz>) -> Result<PathBuf>
where
    Tz::Offset: Display,
{
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating report dir {}", dir.display()))?;
    let path = dir.join(report_file_name(now));
    std::fs::write(&path, render(report))
        .with_context(|| format!("writing report {}", path.display()))?;
    Ok(path)
}
