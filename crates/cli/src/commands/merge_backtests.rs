//! Merges backtest reports produced over adjacent date ranges.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Args;
use std::path::PathBuf;

use btc_predictor_backtest::{
    find_reports, format_summary, merge_reports, merged_report_filename, read_report,
    write_report,
};

/// Arguments for the merge-backtests command.
#[derive(Args, Debug, Clone)]
pub struct MergeBacktestsArgs {
    /// Strategy name in the report filenames
    #[arg(long)]
    pub strategy: String,

    /// Timeframe in minutes in the report filenames
    #[arg(long)]
    pub timeframe: u32,

    /// Directory containing the reports
    #[arg(long, default_value = "reports")]
    pub dir: PathBuf,

    /// Merged report path (defaults to a timestamped file in --dir)
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Test window used for per-fold stats (defaults to the first report's)
    #[arg(long)]
    pub test_days: Option<u32>,
}

/// Runs the merge-backtests command.
///
/// # Errors
/// Returns an error if no reports match or any report cannot be read or
/// written.
pub fn run_merge_backtests(args: MergeBacktestsArgs) -> Result<()> {
    let paths = find_reports(&args.dir, &args.strategy, args.timeframe)?;
    if paths.is_empty() {
        bail!(
            "No reports for {} {}m in {}",
            args.strategy,
            args.timeframe,
            args.dir.display()
        );
    }

    let mut reports = Vec::with_capacity(paths.len());
    for path in &paths {
        tracing::info!(path = %path.display(), "reading report");
        reports.push(read_report(path)?);
    }

    let test_days = args
        .test_days
        .or_else(|| reports.iter().find_map(|r| r.meta.as_ref().map(|m| m.test_days)))
        .unwrap_or(7);
    let merged = merge_reports(reports, test_days);

    let output = args.output.unwrap_or_else(|| {
        args.dir
            .join(merged_report_filename(&args.strategy, args.timeframe, Utc::now()))
    });
    write_report(&output, &merged)?;

    println!("{}", format_summary(&merged));
    println!("Merged {} reports into {}", paths.len(), output.display());
    Ok(())
}
