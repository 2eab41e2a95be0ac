//! Settlement passes for pending trades and prediction signals.
//!
//! Both settlers are safe to run repeatedly and concurrently: a row that
//! cannot be priced yet stays pending, and the store only accepts the first
//! settlement written for a row.

use anyhow::Result;
use btc_predictor_core::{AppConfig, SettlementError, Venue};
use btc_predictor_data::{ActualDirection, DataStore};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Symbol whose 1m closes settle every contract.
pub const PRICE_SYMBOL: &str = "BTCUSDT";
pub const PRICE_INTERVAL: &str = "1m";

/// Signals whose expiry is older than this are left unsettled.
pub const DEFAULT_SIGNAL_MAX_AGE_HOURS: i64 = 24;

/// Outcome counts of one [`settle_pending_trades`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SettlementSummary {
    pub settled: usize,
    pub skipped_not_expired: usize,
    /// Expired but no close at the expiry minute yet; retried next pass.
    pub missing_price: usize,
    /// Already settled elsewhere, or the close price was unusable.
    pub rejected: usize,
}

impl SettlementSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.settled + self.skipped_not_expired + self.missing_price + self.rejected
    }
}

/// Settles every pending trade whose expiry is at or before `now`.
///
/// The close is the 1m candle opening exactly at expiry. Outcome and payout
/// follow `venue`'s settlement condition and the configured payout for the
/// trade's timeframe.
///
/// # Errors
/// Returns an error if the store fails; trades settled before the failure
/// stay settled.
pub async fn settle_pending_trades(
    store: &dyn DataStore,
    config: &AppConfig,
    venue: Venue,
    now: DateTime<Utc>,
) -> Result<SettlementSummary> {
    let pending = store.get_pending_trades().await?;
    let condition = venue.settlement_condition();
    let mut summary = SettlementSummary::default();

    for mut trade in pending {
        if trade.expiry_time() > now {
            summary.skipped_not_expired += 1;
            continue;
        }

        let Some(close) = store
            .get_close_at(PRICE_SYMBOL, PRICE_INTERVAL, trade.expiry_time())
            .await?
        else {
            warn!(id = %trade.id(), expiry = %trade.expiry_time(), "no close price at expiry, will retry");
            summary.missing_price += 1;
            continue;
        };

        let payout = config.payout_ratio(venue, trade.timeframe_minutes());
        let result = match trade.settle(close, condition, payout) {
            Ok(result) => result,
            Err(e @ (SettlementError::NonFinitePrice(_) | SettlementError::InvalidPayout(_))) => {
                warn!(id = %trade.id(), error = %e, "cannot settle trade");
                summary.rejected += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let Some(pnl) = trade.pnl() else {
            summary.rejected += 1;
            continue;
        };

        if store
            .update_simulated_trade(trade.id(), close, result, pnl)
            .await?
        {
            info!(
                id = %trade.id(),
                strategy = trade.strategy_name(),
                result = result.as_str(),
                pnl = %pnl,
                "trade settled"
            );
            summary.settled += 1;
        } else {
            debug!(id = %trade.id(), "trade already settled");
            summary.rejected += 1;
        }
    }

    if summary.total() > 0 {
        info!(
            settled = summary.settled,
            not_expired = summary.skipped_not_expired,
            missing_price = summary.missing_price,
            rejected = summary.rejected,
            "trade settlement pass complete"
        );
    }
    Ok(summary)
}

/// Records the realised direction of every expired, unsettled signal.
///
/// Signals that expired more than `max_age` before `now` are skipped, as are
/// signals without a close at the expiry minute. Returns how many signals
/// were settled.
///
/// # Errors
/// Returns an error if the store fails.
pub async fn settle_pending_signals(
    store: &dyn DataStore,
    now: DateTime<Utc>,
    max_age: Duration,
) -> Result<usize> {
    let oldest = now - max_age;
    let mut settled = 0;

    for stored in store.get_unsettled_signals().await? {
        if stored.expiry_time > now || stored.expiry_time < oldest {
            continue;
        }
        let Some(close) = store
            .get_close_at(PRICE_SYMBOL, PRICE_INTERVAL, stored.expiry_time)
            .await?
        else {
            continue;
        };

        let actual = ActualDirection::from_prices(stored.signal.current_price, close);
        let is_correct = actual.matches(stored.signal.direction);
        if store
            .settle_signal(stored.signal.id, actual, close, is_correct)
            .await?
        {
            debug!(id = %stored.signal.id, %actual, is_correct, "signal settled");
            settled += 1;
        }
    }

    if settled > 0 {
        info!(settled, "settled prediction signals");
    }
    Ok(settled)
}
