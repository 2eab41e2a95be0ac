//! Walk-forward backtest CLI command.
//!
//! Loads 1m candles from a CSV file or the database, runs the parallel
//! walk-forward engine for one strategy and timeframe, and writes a JSON
//! report.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Args;
use std::path::PathBuf;

use btc_predictor_backtest::{
    format_summary, report_filename, run_backtest, write_report, BacktestConfig, BacktestReport,
    Concurrency, ReportMeta,
};
use btc_predictor_core::{ConfigLoader, OhlcvSeries, Venue};
use btc_predictor_data::{read_ohlcv_csv, DataStore, PgStore};
use btc_predictor_strategy::StrategyRegistry;

/// Arguments for the backtest command.
#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    /// Registered strategy name (see list-strategies)
    #[arg(long)]
    pub strategy: String,

    /// Contract timeframe in minutes
    #[arg(long)]
    pub timeframe: u32,

    /// Training window in days
    #[arg(long, default_value = "60")]
    pub train_days: u32,

    /// Test window in days
    #[arg(long, default_value = "7")]
    pub test_days: u32,

    /// Fold step in days (defaults to the test window)
    #[arg(long)]
    pub step_days: Option<u32>,

    /// First candle to use (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub start_date: Option<String>,

    /// Last candle to use (YYYY-MM-DD is inclusive of the whole day)
    #[arg(long)]
    pub end_date: Option<String>,

    /// Worker threads: -1 all cores, -2 all but one, n fixed
    #[arg(long, default_value = "-2", allow_hyphen_values = true)]
    pub n_jobs: i64,

    /// Settlement venue: binance, polymarket
    #[arg(long, default_value = "binance")]
    pub platform: String,

    /// OHLCV CSV file (timestamp,open,high,low,close,volume)
    #[arg(long, conflicts_with = "db_url")]
    pub data: Option<PathBuf>,

    /// Database connection URL (uses DATABASE_URL env var if not provided)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,

    /// Symbol to load from the database
    #[arg(long, default_value = "BTCUSDT")]
    pub symbol: String,

    /// Candle interval to load from the database
    #[arg(long, default_value = "1m")]
    pub interval: String,

    /// Directory for the JSON report
    #[arg(long, default_value = "reports")]
    pub output: PathBuf,

    /// Config file path
    #[arg(long, default_value = "config/Config.toml")]
    pub config: PathBuf,

    /// Output format: text, json (default: text)
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Output format for reports printed to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// Parses an output format from string.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(anyhow!(
                "Unknown format: '{}'. Valid formats: text, json",
                s
            )),
        }
    }
}

/// Parses `YYYY-MM-DD` or RFC 3339. A bare date used as an end bound covers
/// the whole day.
pub fn parse_date_bound(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let time = if end_of_day {
            NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
        } else {
            NaiveTime::MIN
        };
        return Ok(date.and_time(time).and_utc());
    }
    s.parse::<DateTime<Utc>>().map_err(|_| {
        anyhow!("Invalid date '{s}'. Use YYYY-MM-DD or ISO 8601 (e.g., 2025-01-01T00:00:00Z)")
    })
}

async fn load_series(
    args: &BacktestArgs,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    max_connections: u32,
) -> Result<OhlcvSeries> {
    if let Some(path) = &args.data {
        let series = read_ohlcv_csv(path)?;
        let (Some(first), Some(last)) = (series.first_timestamp(), series.last_timestamp()) else {
            return Ok(series);
        };
        let window = series.range_inclusive(start.unwrap_or(first), end.unwrap_or(last));
        return OhlcvSeries::new(window.to_vec());
    }

    let db_url = args.db_url.as_deref().ok_or_else(|| {
        anyhow!("Provide --data <csv> or a database via --db-url / DATABASE_URL")
    })?;
    let store = PgStore::connect(db_url, max_connections).await?;
    let candles = store
        .get_ohlcv(&args.symbol, &args.interval, start, end, None)
        .await?;
    Ok(OhlcvSeries::from_unsorted(candles))
}

/// Runs the backtest command.
///
/// # Errors
/// Returns an error if configuration, data loading, the strategy or report
/// writing fails.
pub async fn run_backtest_command(args: BacktestArgs) -> Result<()> {
    let format = OutputFormat::parse(&args.format)?;
    let config = ConfigLoader::load_from(&args.config)?;
    let venue: Venue = args.platform.parse()?;
    let concurrency = Concurrency::from_n_jobs(args.n_jobs)?;
    let factory = StrategyRegistry::with_defaults().get(&args.strategy)?;

    let start = args
        .start_date
        .as_deref()
        .map(|s| parse_date_bound(s, false))
        .transpose()?;
    let end = args
        .end_date
        .as_deref()
        .map(|s| parse_date_bound(s, true))
        .transpose()?;
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            bail!("Start date must be before end date");
        }
    }

    let series = load_series(&args, start, end, config.database.max_connections).await?;
    if series.is_empty() {
        bail!("No OHLCV data in the selected range");
    }
    tracing::info!(
        candles = series.len(),
        first = ?series.first_timestamp(),
        last = ?series.last_timestamp(),
        "loaded OHLCV"
    );

    let step_days = args.step_days.unwrap_or(args.test_days);
    let backtest_config = BacktestConfig::new(args.timeframe, args.train_days, args.test_days)
        .with_step_days(step_days)
        .with_venue(venue, &config)
        .with_concurrency(concurrency)
        .with_risk(config.risk_config());
    let payout_ratio = backtest_config.payout_ratio;

    let trades = tokio::task::spawn_blocking(move || {
        run_backtest(&*factory, &series, backtest_config)
    })
    .await
    .context("Backtest task panicked")??;

    let now = Utc::now();
    let meta = ReportMeta {
        strategy: args.strategy.clone(),
        timeframe_minutes: args.timeframe,
        train_days: args.train_days,
        test_days: args.test_days,
        step_days,
        platform: venue,
        payout_ratio,
        generated_at: now,
    };
    let report = BacktestReport::new(trades, args.test_days, Some(meta));

    match format {
        OutputFormat::Text => println!("{}", format_summary(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.stats)?),
    }

    let path = args
        .output
        .join(report_filename(&args.strategy, args.timeframe, now));
    write_report(&path, &report)?;
    println!("Report written to {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ============================================
    // OutputFormat Tests
    // ============================================

    #[test]
    fn output_format_parse_text() {
        assert_eq!(OutputFormat::parse("text").unwrap(), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("TXT").unwrap(), OutputFormat::Text);
    }

    #[test]
    fn output_format_parse_json() {
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
    }

    #[test]
    fn output_format_parse_invalid() {
        assert!(OutputFormat::parse("csv").is_err());
        assert!(OutputFormat::parse("").is_err());
    }

    // ============================================
    // Date Parsing Tests
    // ============================================

    #[test]
    fn parse_bare_date_bounds() {
        assert_eq!(
            parse_date_bound("2025-03-01", false).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_date_bound("2025-03-01", true).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 23, 59, 59).unwrap()
        );
    }

    #[test]
    fn parse_rfc3339_bound() {
        assert_eq!(
            parse_date_bound("2025-03-01T12:30:00Z", true).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap()
        );
    }

    #[test]
    fn parse_invalid_date() {
        assert!(parse_date_bound("03/01/2025", false).is_err());
    }

    // ============================================
    // Data Loading Tests
    // ============================================

    #[tokio::test]
    async fn csv_series_is_clipped_to_dates() {
        use btc_predictor_core::Candle;
        use chrono::Duration;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("btc.csv");
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..3 * 1440)
            .map(|m| Candle::new(base + Duration::minutes(m), 1.0, 1.0, 1.0, 1.0, 1.0))
            .collect();
        btc_predictor_data::write_ohlcv_csv(&path, &candles).unwrap();

        let args = BacktestArgs {
            strategy: "ma_crossover".into(),
            timeframe: 10,
            train_days: 1,
            test_days: 1,
            step_days: None,
            start_date: None,
            end_date: None,
            n_jobs: 1,
            platform: "binance".into(),
            data: Some(path),
            db_url: None,
            symbol: "BTCUSDT".into(),
            interval: "1m".into(),
            output: dir.path().to_path_buf(),
            config: dir.path().join("missing.toml"),
            format: "text".into(),
        };
        let start = parse_date_bound("2025-03-02", false).unwrap();
        let end = parse_date_bound("2025-03-02", true).unwrap();
        let series = load_series(&args, Some(start), Some(end), 1).await.unwrap();
        assert_eq!(series.len(), 1440);
        assert_eq!(series.first_timestamp(), Some(start));
    }
}
