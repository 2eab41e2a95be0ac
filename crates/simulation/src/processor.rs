//! Turns live prediction signals into simulated trades.

use anyhow::Result;
use btc_predictor_core::{calculate_bet, AppConfig, PredictionSignal, SimulatedTrade};
use btc_predictor_data::DataStore;
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Applies the daily risk gate and bet sizing to `signal` and persists a
/// pending trade when both allow it.
///
/// Daily counters are read fresh from `store` for the signal's UTC date.
/// Returns `None` when the gate denies the trade, the bet rounds to zero, or
/// a trade for the same strategy, timeframe and open time already exists.
///
/// # Errors
/// Returns an error if the store cannot be read or written.
pub async fn process_signal(
    signal: &PredictionSignal,
    store: &dyn DataStore,
    config: &AppConfig,
) -> Result<Option<SimulatedTrade>> {
    let strategy = signal.strategy_name.as_str();
    let tf = signal.timeframe_minutes;

    if store
        .check_trade_exists(strategy, tf, signal.timestamp)
        .await?
    {
        debug!(strategy, timeframe = tf, open_time = %signal.timestamp, "trade already recorded");
        return Ok(None);
    }

    let stats = store
        .get_daily_stats(strategy, signal.timestamp.date_naive())
        .await?;
    if !stats.permits(&config.risk_control) {
        info!(
            strategy,
            daily_loss = %stats.daily_loss,
            daily_trades = stats.daily_trades,
            consecutive_losses = stats.consecutive_losses,
            "trade skipped by risk control"
        );
        return Ok(None);
    }

    let bet = calculate_bet(signal.confidence, tf, &config.risk_config());
    if bet <= Decimal::ZERO {
        debug!(strategy, confidence = signal.confidence, "below confidence threshold");
        return Ok(None);
    }

    let trade = SimulatedTrade::open(
        strategy,
        signal.direction,
        signal.confidence,
        tf,
        bet,
        signal.timestamp,
        signal.current_price,
    );
    store.save_simulated_trade(&trade).await?;

    info!(
        strategy,
        id = %trade.id(),
        direction = %trade.direction(),
        bet = %bet,
        expiry = %trade.expiry_time(),
        "opened simulated trade"
    );
    Ok(Some(trade))
}
