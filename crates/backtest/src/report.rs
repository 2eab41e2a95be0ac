//! Backtest report files.
//!
//! A report is JSON `{ "stats": {...}, "trades": [...] }` with an optional
//! `meta` block describing the run. Reports from separate runs over adjacent
//! date ranges can be merged into one.

use anyhow::{Context, Result};
use btc_predictor_core::{SimulatedTrade, Venue};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::stats::{calculate_backtest_stats, BacktestStats};

/// Parameters of the run that produced a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMeta {
    pub strategy: String,
    pub timeframe_minutes: u32,
    pub train_days: u32,
    pub test_days: u32,
    pub step_days: u32,
    pub platform: Venue,
    pub payout_ratio: f64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ReportMeta>,
    pub stats: BacktestStats,
    pub trades: Vec<SimulatedTrade>,
}

impl BacktestReport {
    /// Computes stats for `trades` and wraps both.
    #[must_use]
    pub fn new(trades: Vec<SimulatedTrade>, test_days: u32, meta: Option<ReportMeta>) -> Self {
        let stats = calculate_backtest_stats(&trades, test_days);
        Self {
            meta,
            stats,
            trades,
        }
    }
}

/// `backtest_<strategy>_<tf>m_<YYYYmmdd_HHMMSS>.json`
#[must_use]
pub fn report_filename(strategy: &str, timeframe_minutes: u32, at: DateTime<Utc>) -> String {
    format!(
        "backtest_{strategy}_{timeframe_minutes}m_{}.json",
        at.format("%Y%m%d_%H%M%S")
    )
}

/// `backtest_<strategy>_<tf>m_merged_<YYYYmmdd_HHMMSS>.json`; skipped by
/// [`find_reports`].
#[must_use]
pub fn merged_report_filename(strategy: &str, timeframe_minutes: u32, at: DateTime<Utc>) -> String {
    format!(
        "backtest_{strategy}_{timeframe_minutes}m_merged_{}.json",
        at.format("%Y%m%d_%H%M%S")
    )
}

/// Writes `report` as pretty JSON to `path`, creating parent directories.
///
/// # Errors
/// Returns an error if the directory or file cannot be created or written.
pub fn write_report(path: &Path, report: &BacktestReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("failed to write report {}", path.display()))?;
    tracing::info!(path = %path.display(), trades = report.trades.len(), "report written");
    Ok(())
}

/// # Errors
/// Returns an error if the file cannot be opened or is not a valid report.
pub fn read_report(path: &Path) -> Result<BacktestReport> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse report {}", path.display()))
}

/// Report files in `dir` for `strategy` at `timeframe_minutes`, sorted by
/// name. Previously merged reports are skipped.
///
/// # Errors
/// Returns an error if `dir` cannot be read.
pub fn find_reports(dir: &Path, strategy: &str, timeframe_minutes: u32) -> Result<Vec<PathBuf>> {
    let prefix = format!("backtest_{strategy}_{timeframe_minutes}m_");
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with(&prefix)
            && name.ends_with(".json")
            && !name[prefix.len()..].starts_with("merged")
        {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Concatenates trades, sorts by `open_time`, keeps the first trade at each
/// `open_time` and recomputes stats.
#[must_use]
pub fn merge_reports(reports: Vec<BacktestReport>, test_days: u32) -> BacktestReport {
    let meta = reports.iter().find_map(|r| r.meta.clone());
    let mut trades: Vec<SimulatedTrade> = reports.into_iter().flat_map(|r| r.trades).collect();
    let before = trades.len();
    trades.sort_by_key(SimulatedTrade::open_time);
    trades.dedup_by_key(|t| t.open_time());
    tracing::info!(
        trades = trades.len(),
        duplicates = before - trades.len(),
        "merged reports"
    );
    BacktestReport::new(trades, test_days, meta)
}

/// Fixed-format summary table.
#[must_use]
pub fn format_summary(report: &BacktestReport) -> String {
    let stats = &report.stats;
    let mut output = String::new();

    output.push('\n');
    output.push_str("===============================================================\n");
    output.push_str("                   WALK-FORWARD BACKTEST RESULTS               \n");
    output.push_str("===============================================================\n");

    if let Some(meta) = &report.meta {
        output.push_str(&format!(
            "Strategy: {}  Timeframe: {}m  Platform: {}\n",
            meta.strategy, meta.timeframe_minutes, meta.platform
        ));
        output.push_str(&format!(
            "Windows: train {}d / test {}d / step {}d  Payout: {:.2}\n",
            meta.train_days, meta.test_days, meta.step_days, meta.payout_ratio
        ));
    }
    if let (Some(first), Some(last)) = (report.trades.first(), report.trades.last()) {
        output.push_str(&format!(
            "Period: {} to {}\n",
            first.open_time().format("%Y-%m-%d %H:%M"),
            last.open_time().format("%Y-%m-%d %H:%M")
        ));
    }
    output.push('\n');

    if stats.is_empty() {
        output.push_str("No trades.\n");
        output.push_str("===============================================================\n");
        return output;
    }

    output.push_str("ACCURACY\n");
    output.push_str("---------------------------------------------------------------\n");
    output.push_str(&format!("Total trades:       {:>10}\n", stats.total_trades));
    output.push_str(&format!("Total DA:           {:>9.2}%\n", stats.total_da * 100.0));
    output.push_str(&format!(
        "Higher DA:          {:>9.2}%  ({} trades)\n",
        stats.higher_da * 100.0,
        stats.higher_trades
    ));
    output.push_str(&format!(
        "Lower DA:           {:>9.2}%  ({} trades)\n",
        stats.lower_da * 100.0,
        stats.lower_trades
    ));
    output.push_str(&format!("Inverted DA:        {:>9.2}%\n", stats.inverted_da * 100.0));
    output.push('\n');

    output.push_str("PNL & RISK\n");
    output.push_str("---------------------------------------------------------------\n");
    output.push_str(&format!(
        "Total PnL:          {:>10.2}\n",
        stats.total_pnl.to_f64().unwrap_or(0.0)
    ));
    output.push_str(&format!(
        "Max drawdown:       {:>10.2}\n",
        stats.mdd.to_f64().unwrap_or(0.0)
    ));
    output.push_str(&format!("Sharpe (per trade): {:>9.3}\n", stats.sharpe));
    output.push_str(&format!(
        "Max consec. losses: {:>10}\n",
        stats.max_consecutive_losses
    ));
    output.push('\n');

    if !stats.calibration.is_empty() {
        output.push_str("CALIBRATION\n");
        output.push_str("---------------------------------------------------------------\n");
        for bucket in &stats.calibration {
            output.push_str(&format!(
                "{:<12} win rate {:>6.2}%  n={}\n",
                bucket.label,
                bucket.win_rate * 100.0,
                bucket.count
            ));
        }
        output.push('\n');
    }

    output.push_str("FOLDS\n");
    output.push_str("---------------------------------------------------------------\n");
    output.push_str(&format!("Folds with trades:  {:>10}\n", stats.per_fold.len()));
    output.push_str(&format!("Fold DA sigma:      {:>9.2}%\n", stats.fold_sigma * 100.0));
    output.push_str(&format!("Worst fold DA:      {:>9.2}%\n", stats.worst_fold_da * 100.0));
    output.push_str(&format!(
        "Trimmed mean DA:    {:>9.2}%\n",
        stats.trimmed_mean_da * 100.0
    ));
    output.push_str("===============================================================\n");

    output
}
