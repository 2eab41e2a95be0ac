pub mod calibration;
pub mod engine;
pub mod error;
pub mod report;
pub mod stats;
pub mod walk_forward;

pub use calibration::{analyze, AnalysisParams, CalibrationReport, CalibrationSample, DriftTrend};
pub use engine::{run_backtest, BacktestConfig, BacktestEngine, Concurrency};
pub use error::BacktestError;
pub use report::{
    find_reports, format_summary, merge_reports, merged_report_filename, read_report,
    report_filename, write_report, BacktestReport, ReportMeta,
};
pub use stats::{calculate_backtest_stats, BacktestStats, CalibrationBucket, FoldStats};
pub use walk_forward::{Fold, WalkForwardConfig};
