//! Settlement CLI command.
//!
//! Runs one settlement pass over pending simulated trades and unsettled
//! prediction signals stored in the database.

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use clap::Args;
use std::path::PathBuf;

use btc_predictor_core::{ConfigLoader, Venue};
use btc_predictor_data::PgStore;
use btc_predictor_simulation::{
    settle_pending_signals, settle_pending_trades, SettlementSummary,
    DEFAULT_SIGNAL_MAX_AGE_HOURS,
};

/// Arguments for the settle command.
#[derive(Args, Debug, Clone)]
pub struct SettleArgs {
    /// Database connection URL (uses DATABASE_URL env var if not provided)
    #[arg(long, env = "DATABASE_URL")]
    pub db_url: Option<String>,

    /// Settlement venue: binance, polymarket
    #[arg(long, default_value = "binance")]
    pub platform: String,

    /// Config file path
    #[arg(long, default_value = "config/Config.toml")]
    pub config: PathBuf,

    /// Ignore signals that expired more than this many hours ago
    #[arg(long, default_value_t = DEFAULT_SIGNAL_MAX_AGE_HOURS)]
    pub signal_max_age_hours: i64,
}

fn format_settlement(summary: &SettlementSummary, signals: usize) -> String {
    format!(
        "Trades settled:     {:>6}\n\
         Not yet expired:    {:>6}\n\
         Missing price:      {:>6}\n\
         Rejected:           {:>6}\n\
         Signals settled:    {:>6}",
        summary.settled,
        summary.skipped_not_expired,
        summary.missing_price,
        summary.rejected,
        signals
    )
}

/// Runs the settle command.
///
/// # Errors
/// Returns an error if configuration, the database connection or a
/// settlement query fails.
pub async fn run_settle(args: SettleArgs) -> Result<()> {
    let db_url = args
        .db_url
        .ok_or_else(|| anyhow!("DATABASE_URL must be set via --db-url or DATABASE_URL env var"))?;
    let config = ConfigLoader::load_from(&args.config)?;
    let venue: Venue = args.platform.parse()?;
    if args.signal_max_age_hours <= 0 {
        return Err(anyhow!("--signal-max-age-hours must be positive"));
    }

    let store = PgStore::connect(&db_url, config.database.max_connections).await?;
    store.init_schema().await?;

    let now = Utc::now();
    let summary = settle_pending_trades(&store, &config, venue, now).await?;
    let signals =
        settle_pending_signals(&store, now, Duration::hours(args.signal_max_age_hours)).await?;

    println!("{}", format_settlement(&summary, signals));
    Ok(())
}
