//! CLI commands for the BTC direction predictor.

pub mod analyze_calibration;
pub mod backtest;
pub mod list_strategies;
pub mod merge_backtests;
pub mod settle;

pub use analyze_calibration::{run_analyze_calibration, AnalyzeCalibrationArgs};
pub use backtest::{run_backtest_command, BacktestArgs};
pub use list_strategies::{run_list_strategies, ListStrategiesArgs};
pub use merge_backtests::{run_merge_backtests, MergeBacktestsArgs};
pub use settle::{run_settle, SettleArgs};
