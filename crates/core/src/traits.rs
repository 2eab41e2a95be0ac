use crate::candle::Candle;
use crate::signal::PredictionSignal;
use anyhow::Result;
use std::sync::Arc;

/// A direction-prediction model.
///
/// `history` passed to both methods is sorted by timestamp and never contains
/// a row after the decision point. `predict` must fail, not return a
/// sentinel, when the timeframe has no fitted model.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn requires_fitting(&self) -> bool;

    fn available_timeframes(&self) -> &[u32];

    fn fit(&mut self, history: &[Candle], timeframe_minutes: u32) -> Result<()>;

    fn predict(&self, history: &[Candle], timeframe_minutes: u32) -> Result<PredictionSignal>;
}

/// Builds a fresh, unfitted strategy instance.
pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;
