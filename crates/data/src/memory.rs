//! In-process [`DataStore`] backed by `parking_lot` locks.

use anyhow::Result;
use async_trait::async_trait;
use btc_predictor_core::{Candle, DailyStats, PredictionSignal, SimulatedTrade, TradeResult};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::store::{daily_stats_from_trades, ActualDirection, DataStore, StoredSignal};

type SeriesKey = (String, String);

#[derive(Debug, Default)]
struct Tables {
    ohlcv: HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Candle>>,
    trades: Vec<SimulatedTrade>,
    signals: Vec<StoredSignal>,
}

/// Store kept entirely in memory; used by tests and embedded runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored trade in insertion order.
    #[must_use]
    pub fn trades(&self) -> Vec<SimulatedTrade> {
        self.tables.read().trades.clone()
    }

    #[must_use]
    pub fn signals(&self) -> Vec<StoredSignal> {
        self.tables.read().signals.clone()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn get_ohlcv(
        &self,
        symbol: &str,
        interval: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        let tables = self.tables.read();
        let Some(series) = tables
            .ohlcv
            .get(&(symbol.to_string(), interval.to_string()))
        else {
            return Ok(Vec::new());
        };
        let candles = series
            .values()
            .filter(|c| start.map_or(true, |s| c.timestamp >= s))
            .filter(|c| end.map_or(true, |e| c.timestamp <= e))
            .take(limit.unwrap_or(usize::MAX))
            .copied()
            .collect();
        Ok(candles)
    }

    async fn save_ohlcv(&self, symbol: &str, interval: &str, candles: &[Candle]) -> Result<u64> {
        let mut tables = self.tables.write();
        let series = tables
            .ohlcv
            .entry((symbol.to_string(), interval.to_string()))
            .or_default();
        for candle in candles {
            series.insert(candle.timestamp, *candle);
        }
        Ok(candles.len() as u64)
    }

    async fn save_simulated_trade(&self, trade: &SimulatedTrade) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.trades.iter().any(|t| t.id() == trade.id()) {
            anyhow::bail!("trade {} already exists", trade.id());
        }
        tables.trades.push(trade.clone());
        Ok(())
    }

    async fn check_trade_exists(
        &self,
        strategy_name: &str,
        timeframe_minutes: u32,
        open_time: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.tables.read().trades.iter().any(|t| {
            t.strategy_name() == strategy_name
                && t.timeframe_minutes() == timeframe_minutes
                && t.open_time() == open_time
        }))
    }

    async fn update_simulated_trade(
        &self,
        id: Uuid,
        close_price: f64,
        result: TradeResult,
        pnl: Decimal,
    ) -> Result<bool> {
        let mut tables = self.tables.write();
        let Some(trade) = tables.trades.iter_mut().find(|t| t.id() == id) else {
            return Ok(false);
        };
        Ok(trade.apply_settlement(close_price, result, pnl).is_ok())
    }

    async fn get_pending_trades(&self) -> Result<Vec<SimulatedTrade>> {
        let mut pending: Vec<SimulatedTrade> = self
            .tables
            .read()
            .trades
            .iter()
            .filter(|t| t.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(SimulatedTrade::expiry_time);
        Ok(pending)
    }

    async fn get_daily_stats(&self, strategy_name: &str, date: NaiveDate) -> Result<DailyStats> {
        let tables = self.tables.read();
        Ok(daily_stats_from_trades(
            tables
                .trades
                .iter()
                .filter(|t| t.strategy_name() == strategy_name),
            date,
        ))
    }

    async fn save_prediction_signal(&self, signal: &PredictionSignal) -> Result<Uuid> {
        let mut tables = self.tables.write();
        if tables.signals.iter().any(|s| s.signal.id == signal.id) {
            anyhow::bail!("signal {} already exists", signal.id);
        }
        tables.signals.push(StoredSignal::new(signal.clone()));
        Ok(signal.id)
    }

    async fn get_unsettled_signals(&self) -> Result<Vec<StoredSignal>> {
        let mut unsettled: Vec<StoredSignal> = self
            .tables
            .read()
            .signals
            .iter()
            .filter(|s| !s.is_settled())
            .cloned()
            .collect();
        unsettled.sort_by_key(|s| s.expiry_time);
        Ok(unsettled)
    }

    async fn get_settled_signals(
        &self,
        strategy_name: Option<&str>,
        timeframe_minutes: Option<u32>,
    ) -> Result<Vec<StoredSignal>> {
        let mut settled: Vec<StoredSignal> = self
            .tables
            .read()
            .signals
            .iter()
            .filter(|s| s.is_settled())
            .filter(|s| strategy_name.map_or(true, |name| s.signal.strategy_name == name))
            .filter(|s| timeframe_minutes.map_or(true, |tf| s.signal.timeframe_minutes == tf))
            .cloned()
            .collect();
        settled.sort_by_key(|s| s.signal.timestamp);
        Ok(settled)
    }

    async fn settle_signal(
        &self,
        id: Uuid,
        actual_direction: ActualDirection,
        close_price: f64,
        is_correct: bool,
    ) -> Result<bool> {
        let mut tables = self.tables.write();
        let Some(stored) = tables
            .signals
            .iter_mut()
            .find(|s| s.signal.id == id && !s.is_settled())
        else {
            return Ok(false);
        };
        stored.actual_direction = Some(actual_direction);
        stored.close_price = Some(close_price);
        stored.is_correct = Some(is_correct);
        Ok(true)
    }
}
