//! Storage contract shared by the backtest runner, the live simulation and
//! the settlers.

use anyhow::Result;
use async_trait::async_trait;
use btc_predictor_core::{
    Candle, DailyStats, Direction, PredictionSignal, SimulatedTrade, TradeResult,
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Number of most recent trades inspected for the consecutive-loss streak.
pub const LOSS_STREAK_LOOKBACK: usize = 20;

/// Realised move of a settled signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActualDirection {
    Higher,
    Lower,
    Draw,
}

impl ActualDirection {
    #[must_use]
    pub fn from_prices(open: f64, close: f64) -> Self {
        if close > open {
            Self::Higher
        } else if close < open {
            Self::Lower
        } else {
            Self::Draw
        }
    }

    /// A draw is wrong for both directions.
    #[must_use]
    pub fn matches(self, predicted: Direction) -> bool {
        matches!(
            (self, predicted),
            (Self::Higher, Direction::Higher) | (Self::Lower, Direction::Lower)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Higher => "higher",
            Self::Lower => "lower",
            Self::Draw => "draw",
        }
    }
}

impl fmt::Display for ActualDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActualDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "higher" => Ok(Self::Higher),
            "lower" => Ok(Self::Lower),
            "draw" => Ok(Self::Draw),
            other => anyhow::bail!("unknown actual direction '{other}'"),
        }
    }
}

/// A persisted prediction signal and, once settled, its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSignal {
    pub signal: PredictionSignal,
    pub expiry_time: DateTime<Utc>,
    pub actual_direction: Option<ActualDirection>,
    pub close_price: Option<f64>,
    pub is_correct: Option<bool>,
}

impl StoredSignal {
    #[must_use]
    pub fn new(signal: PredictionSignal) -> Self {
        let expiry_time = signal.timestamp + Duration::minutes(i64::from(signal.timeframe_minutes));
        Self {
            signal,
            expiry_time,
            actual_direction: None,
            close_price: None,
            is_correct: None,
        }
    }

    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.actual_direction.is_some()
    }
}

/// Persistence for candles, simulated trades and prediction signals.
///
/// Implementations must be safe to share between tasks; every method takes
/// `&self`.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Candles for `symbol`/`interval` ordered by timestamp ascending.
    ///
    /// `start` and `end` are inclusive bounds; `limit` keeps the first rows of
    /// the ordered result.
    async fn get_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>>;

    /// Upserts candles keyed by `(symbol, interval, timestamp)` and returns the
    /// number of rows written.
    async fn save_ohlcv(&self, symbol: &str, interval: &str, candles: &[Candle]) -> Result<u64>;

    async fn save_simulated_trade(&self, trade: &SimulatedTrade) -> Result<()>;

    async fn check_trade_exists(
        &self,
        strategy_name: &str,
        timeframe_minutes: u32,
        open_time: DateTime<Utc>,
    ) -> Result<bool>;

    /// Writes a settlement onto a pending trade.
    ///
    /// Returns `false` without changing anything when the trade is missing or
    /// already settled.
    async fn update_simulated_trade(
        &self,
        id: Uuid,
        close_price: f64,
        result: TradeResult,
        pnl: Decimal,
    ) -> Result<bool>;

    /// Unsettled trades ordered by expiry ascending.
    async fn get_pending_trades(&self) -> Result<Vec<SimulatedTrade>>;

    async fn get_daily_stats(&self, strategy_name: &str, date: NaiveDate) -> Result<DailyStats>;

    async fn save_prediction_signal(&self, signal: &PredictionSignal) -> Result<Uuid>;

    /// Signals without an actual direction, ordered by expiry ascending.
    async fn get_unsettled_signals(&self) -> Result<Vec<StoredSignal>>;

    /// Settled signals ordered by signal timestamp ascending, optionally
    /// restricted to one strategy and/or timeframe.
    async fn get_settled_signals(
        &self,
        strategy_name: Option<&str>,
        timeframe_minutes: Option<u32>,
    ) -> Result<Vec<StoredSignal>>;

    /// Returns `false` when the signal is missing or already settled.
    async fn settle_signal(
        &self,
        id: Uuid,
        actual_direction: ActualDirection,
        close_price: f64,
        is_correct: bool,
    ) -> Result<bool>;

    /// Close of the `symbol`/`interval` candle opening exactly at `at`.
    async fn get_close_at(
        &self,
        symbol: &str,
        interval: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>> {
        let candles = self
            .get_ohlcv(symbol, interval, Some(at), Some(at), Some(1))
            .await?;
        Ok(candles.first().map(|c| c.close))
    }
}

/// Daily risk counters for one strategy computed from its trade history.
///
/// `daily_loss` and `daily_trades` cover trades opened on `date` (UTC).
/// The loss streak walks the [`LOSS_STREAK_LOOKBACK`] most recent trades
/// newest first, skipping pending ones and stopping at the first win.
#[must_use]
pub fn daily_stats_from_trades<'a>(
    trades: impl IntoIterator<Item = &'a SimulatedTrade>,
    date: NaiveDate,
) -> DailyStats {
    let mut trades: Vec<&SimulatedTrade> = trades.into_iter().collect();

    let mut stats = DailyStats::default();
    for trade in trades.iter().filter(|t| t.open_time().date_naive() == date) {
        stats.daily_trades += 1;
        if let Some(pnl) = trade.pnl().filter(|p| *p < Decimal::ZERO) {
            stats.daily_loss -= pnl;
        }
    }

    trades.sort_by_key(|t| std::cmp::Reverse(t.open_time()));
    stats.consecutive_losses = loss_streak(
        trades
            .iter()
            .take(LOSS_STREAK_LOOKBACK)
            .map(|t| t.result()),
    );
    stats
}

/// Losses from the front of `results` until the first win; `None` entries are
/// skipped.
#[must_use]
pub fn loss_streak(results: impl IntoIterator<Item = Option<TradeResult>>) -> u32 {
    let mut streak = 0;
    for result in results {
        match result {
            Some(TradeResult::Lose) => streak += 1,
            Some(TradeResult::Win) => break,
            None => {}
        }
    }
    streak
}
