//! Confidence calibration and drift analysis.
//!
//! Samples come either from the trades of a backtest report or from settled
//! prediction signals in the database. Bet sizes and payout follow the
//! loaded configuration so the threshold search matches the live gate.

use anyhow::{anyhow, Result};
use clap::Args;
use std::path::PathBuf;

use btc_predictor_backtest::calibration::CalibrationReport;
use btc_predictor_backtest::{analyze, read_report, AnalysisParams, CalibrationSample};
use btc_predictor_core::{AppConfig, ConfigLoader, Venue};
use btc_predictor_data::{DataStore, PgStore};

use super::backtest::OutputFormat;

/// Arguments for the analyze-calibration command.
#[derive(Args, Debug, Clone)]
pub struct AnalyzeCalibrationArgs {
    /// Backtest report JSON (takes precedence over the database)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Database connection URL for settled signals (uses DATABASE_URL env var if not provided)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,

    /// Only signals from this strategy
    #[arg(long)]
    pub strategy: Option<String>,

    /// Contract timeframe in minutes (defaults to the report's)
    #[arg(long)]
    pub timeframe: Option<u32>,

    /// Settlement venue: binance, polymarket (defaults to the report's)
    #[arg(long)]
    pub platform: Option<String>,

    /// Config file path
    #[arg(long, default_value = "config/Config.toml")]
    pub config: PathBuf,

    /// Minimum trades at a threshold for it to be recommended
    #[arg(long, default_value = "10")]
    pub min_samples: usize,

    /// Output format: text, json (default: text)
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Formats the calibration analysis as a text report.
pub fn format_calibration_report(report: &CalibrationReport) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str("===============================================================\n");
    output.push_str("                   CONFIDENCE CALIBRATION                      \n");
    output.push_str("===============================================================\n");
    output.push_str(&format!("Samples:            {:>10}\n", report.total));
    output.push_str(&format!("Accuracy:           {:>9.2}%\n", report.accuracy * 100.0));
    output.push_str(&format!("ECE:                {:>10.4}\n", report.ece));
    output.push('\n');

    output.push_str("BINS\n");
    output.push_str("---------------------------------------------------------------\n");
    output.push_str("  range           n   accuracy  mean conf      gap\n");
    for bin in &report.bins {
        output.push_str(&format!(
            "  [{:.2}, {:.2})  {:>5}   {:>7.2}%   {:>7.2}%  {:>+7.2}%\n",
            bin.lower,
            bin.upper,
            bin.count,
            bin.accuracy * 100.0,
            bin.mean_confidence * 100.0,
            bin.gap() * 100.0
        ));
    }
    output.push('\n');

    output.push_str("THRESHOLDS\n");
    output.push_str("---------------------------------------------------------------\n");
    output.push_str("  thr      n   accuracy   avg bet  E[pnl]/trade  trades/day  E[pnl]/day\n");
    for row in report.thresholds.iter().filter(|r| r.count > 0) {
        output.push_str(&format!(
            "  {:.2} {:>6}   {:>7.2}%  {:>8.2}  {:>12.3}  {:>10.2}  {:>10.2}\n",
            row.threshold,
            row.count,
            row.accuracy * 100.0,
            row.avg_bet,
            row.expected_pnl_per_trade,
            row.trades_per_day,
            row.expected_pnl_per_day
        ));
    }
    match &report.best_threshold {
        Some(best) => output.push_str(&format!(
            "Best threshold:     {:>10.2}  (E[pnl]/day {:.2})\n",
            best.threshold, best.expected_pnl_per_day
        )),
        None => output.push_str("Best threshold:     none with enough samples\n"),
    }
    if let Some(current) = &report.current_threshold {
        output.push_str(&format!(
            "Current threshold:  {:>10.3}  (E[pnl]/day {:.2}, n={})\n",
            current.threshold, current.expected_pnl_per_day, current.count
        ));
    }
    output.push('\n');

    output.push_str("DRIFT\n");
    output.push_str("---------------------------------------------------------------\n");
    output.push_str(&format!("Windows:            {:>10}\n", report.drift.windows.len()));
    output.push_str(&format!("Slope per window:   {:>10.4}\n", report.drift.slope));
    output.push_str(&format!("Trend:              {:?}\n", report.drift.trend));
    output.push('\n');

    output.push_str("CONSISTENCY\n");
    output.push_str("---------------------------------------------------------------\n");
    output.push_str(&format!(
        "Baseline accuracy:  {:>9.2}%\n",
        report.consistency.baseline_accuracy * 100.0
    ));
    for streak in &report.consistency.by_streak {
        output.push_str(&format!(
            "  streak {}: {:>7.2}%  n={}\n",
            streak.n,
            streak.accuracy * 100.0,
            streak.count
        ));
    }
    output.push_str("===============================================================\n");

    output
}

/// Calibration inputs gathered from one source.
struct Samples {
    samples: Vec<CalibrationSample>,
    timeframe: Option<u32>,
    venue: Option<Venue>,
}

async fn load_samples(args: &AnalyzeCalibrationArgs, config: &AppConfig) -> Result<Samples> {
    if let Some(path) = &args.report {
        let report = read_report(path)?;
        let samples = report
            .trades
            .iter()
            .filter_map(CalibrationSample::from_trade)
            .collect();
        return Ok(Samples {
            samples,
            timeframe: report.meta.as_ref().map(|m| m.timeframe_minutes),
            venue: report.meta.as_ref().map(|m| m.platform),
        });
    }

    let db_url = args.db_url.as_deref().ok_or_else(|| {
        anyhow!("Provide --report <json> or a database via --db-url / DATABASE_URL")
    })?;
    let store = PgStore::connect(db_url, config.database.max_connections).await?;
    let settled = store
        .get_settled_signals(args.strategy.as_deref(), args.timeframe)
        .await?;
    tracing::info!(
        strategy = args.strategy.as_deref().unwrap_or("all"),
        signals = settled.len(),
        "loaded settled signals"
    );
    Ok(Samples {
        samples: settled
            .iter()
            .filter_map(CalibrationSample::from_stored_signal)
            .collect(),
        timeframe: None,
        venue: None,
    })
}

/// Analysis parameters for `timeframe` on `venue` as configured.
pub fn analysis_params(
    config: &AppConfig,
    venue: Venue,
    timeframe: u32,
    min_samples: usize,
) -> AnalysisParams {
    AnalysisParams {
        min_samples,
        ..AnalysisParams::from_config(config, venue, timeframe)
    }
}

/// Runs the analyze-calibration command.
///
/// # Errors
/// Returns an error if configuration or the samples cannot be loaded, or if
/// no timeframe is known for bet sizing.
pub async fn run_analyze_calibration(args: AnalyzeCalibrationArgs) -> Result<()> {
    let format = OutputFormat::parse(&args.format)?;
    let config = ConfigLoader::load_from(&args.config)?;
    let loaded = load_samples(&args, &config).await?;

    let timeframe = args.timeframe.or(loaded.timeframe).ok_or_else(|| {
        anyhow!("--timeframe is required to size bets when the source has no timeframe")
    })?;
    let venue = match &args.platform {
        Some(platform) => platform.parse()?,
        None => loaded.venue.unwrap_or(Venue::Binance),
    };
    let params = analysis_params(&config, venue, timeframe, args.min_samples);
    tracing::info!(
        samples = loaded.samples.len(),
        timeframe,
        %venue,
        min_bet = params.min_bet,
        max_bet = params.max_bet,
        payout = params.payout_ratio,
        "analysing calibration"
    );

    let analysis = analyze(&loaded.samples, &params);
    match format {
        OutputFormat::Text => println!("{}", format_calibration_report(&analysis)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&analysis)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use btc_predictor_core::Direction;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn calibration_text_has_sections() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let samples: Vec<CalibrationSample> = (0..60)
            .map(|i| CalibrationSample {
                timestamp: base + Duration::hours(i),
                direction: Direction::Higher,
                confidence: 0.6 + (i % 3) as f64 * 0.05,
                correct: i % 2 == 0,
            })
            .collect();
        let text = format_calibration_report(&analyze(&samples, &AnalysisParams::default()));
        for section in ["BINS", "THRESHOLDS", "DRIFT", "CONSISTENCY"] {
            assert!(text.contains(section), "missing {section}");
        }
    }

    #[test]
    fn empty_report_still_formats() {
        let text = format_calibration_report(&analyze(&[], &AnalysisParams::default()));
        assert!(text.contains("Samples:"));
        assert!(text.contains("none with enough samples"));
    }

    #[test]
    fn params_use_configured_bet_range() {
        let mut config = AppConfig::default();
        config.risk_control.bet_range = [10.0, 40.0];
        let params = analysis_params(&config, Venue::Polymarket, 30, 3);
        assert_eq!(params.min_bet, 10.0);
        assert_eq!(params.max_bet, 40.0);
        assert_eq!(params.payout_ratio, 2.0);
        assert_eq!(params.min_samples, 3);
        assert_eq!(params.current_threshold, Some(0.591));
    }

    #[test]
    fn current_threshold_line_is_printed() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let samples: Vec<CalibrationSample> = (0..20)
            .map(|i| CalibrationSample {
                timestamp: base + Duration::hours(i),
                direction: Direction::Lower,
                confidence: 0.62,
                correct: i % 4 != 0,
            })
            .collect();
        let params = analysis_params(&AppConfig::default(), Venue::Binance, 10, 10);
        let text = format_calibration_report(&analyze(&samples, &params));
        assert!(text.contains("Current threshold:       0.606"));
    }

    #[tokio::test]
    async fn database_source_requires_url() {
        let args = AnalyzeCalibrationArgs {
            report: None,
            db_url: None,
            strategy: None,
            timeframe: Some(10),
            platform: None,
            config: PathBuf::from("missing.toml"),
            min_samples: 10,
            format: "text".into(),
        };
        let err = load_samples(&args, &AppConfig::default()).await.err().unwrap();
        assert!(err.to_string().contains("--db-url"));
    }
}
