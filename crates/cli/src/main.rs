use clap::{Parser, Subcommand};

mod commands;

use commands::{
    AnalyzeCalibrationArgs, BacktestArgs, ListStrategiesArgs, MergeBacktestsArgs, SettleArgs,
};

#[derive(Parser)]
#[command(name = "btc-predictor")]
#[command(about = "Walk-forward backtesting and simulation for BTC direction predictions", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a parallel walk-forward backtest for one strategy and timeframe
    Backtest(BacktestArgs),
    /// Merge backtest reports for one strategy and timeframe
    MergeBacktests(MergeBacktestsArgs),
    /// Analyse confidence calibration and drift of a backtest report
    AnalyzeCalibration(AnalyzeCalibrationArgs),
    /// Settle expired simulated trades and prediction signals
    Settle(SettleArgs),
    /// List registered strategies
    ListStrategies(ListStrategiesArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Backtest(args) => commands::run_backtest_command(args).await?,
        Commands::MergeBacktests(args) => commands::run_merge_backtests(args)?,
        Commands::AnalyzeCalibration(args) => commands::run_analyze_calibration(args).await?,
        Commands::Settle(args) => commands::run_settle(args).await?,
        Commands::ListStrategies(args) => commands::run_list_strategies(args)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backtest_with_negative_n_jobs() {
        let cli = Cli::try_parse_from([
            "btc-predictor",
            "backtest",
            "--strategy",
            "base_rate",
            "--timeframe",
            "10",
            "--n-jobs",
            "-1",
            "--data",
            "btc.csv",
        ])
        .unwrap();
        match cli.command {
            Commands::Backtest(args) => {
                assert_eq!(args.n_jobs, -1);
                assert_eq!(args.train_days, 60);
                assert_eq!(args.test_days, 7);
                assert_eq!(args.platform, "binance");
            }
            _ => panic!("expected backtest"),
        }
    }

    #[test]
    fn backtest_requires_strategy() {
        assert!(Cli::try_parse_from(["btc-predictor", "backtest", "--timeframe", "10"]).is_err());
    }

    #[test]
    fn parses_merge_and_list() {
        let cli = Cli::try_parse_from([
            "btc-predictor",
            "merge-backtests",
            "--strategy",
            "ma_crossover",
            "--timeframe",
            "30",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::MergeBacktests(ref a) if a.timeframe == 30));

        let cli = Cli::try_parse_from(["btc-predictor", "list-strategies"]).unwrap();
        assert!(matches!(cli.command, Commands::ListStrategies(_)));
    }

    #[test]
    fn parses_settle_defaults() {
        let cli = Cli::try_parse_from([
            "btc-predictor",
            "settle",
            "--db-url",
            "postgres://localhost/btc",
            "--platform",
            "polymarket",
        ])
        .unwrap();
        match cli.command {
            Commands::Settle(args) => {
                assert_eq!(args.platform, "polymarket");
                assert_eq!(args.signal_max_age_hours, 24);
            }
            _ => panic!("expected settle"),
        }
    }
}
