use btc_predictor_core::{
    Candle, Direction, FeaturesUsed, PredictionSignal, Strategy, StrategyError,
    SUPPORTED_TIMEFRAMES,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NAME: &str = "ma_crossover";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaCrossoverParams {
    pub fast_period: usize,
    pub slow_period: usize,
    /// Confidence added per unit of relative MA gap.
    pub sensitivity: f64,
    /// Upper bound on confidence.
    pub max_confidence: f64,
}

impl Default for MaCrossoverParams {
    fn default() -> Self {
        Self {
            fast_period: 5,
            slow_period: 20,
            sensitivity: 50.0,
            max_confidence: 0.95,
        }
    }
}

/// Fast/slow simple moving average crossover on closes. Needs no fitting.
pub struct MaCrossoverStrategy {
    params: MaCrossoverParams,
}

impl MaCrossoverStrategy {
    #[must_use]
    pub fn new(params: MaCrossoverParams) -> Self {
        Self { params }
    }

    fn mean_close(candles: &[Candle]) -> f64 {
        candles.iter().map(|c| c.close).sum::<f64>() / candles.len() as f64
    }
}

impl Default for MaCrossoverStrategy {
    fn default() -> Self {
        Self::new(MaCrossoverParams::default())
    }
}

impl Strategy for MaCrossoverStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn requires_fitting(&self) -> bool {
        false
    }

    fn available_timeframes(&self) -> &[u32] {
        &SUPPORTED_TIMEFRAMES
    }

    fn fit(&mut self, _history: &[Candle], _timeframe_minutes: u32) -> Result<()> {
        Ok(())
    }

    fn predict(&self, history: &[Candle], timeframe_minutes: u32) -> Result<PredictionSignal> {
        if !self.available_timeframes().contains(&timeframe_minutes) {
            return Err(StrategyError::UnsupportedTimeframe {
                strategy: NAME.to_string(),
                timeframe: timeframe_minutes,
            }
            .into());
        }
        let slow = self.params.slow_period.max(1);
        let fast = self.params.fast_period.clamp(1, slow);
        if history.len() < slow {
            return Err(StrategyError::InsufficientData {
                required: slow,
                available: history.len(),
            }
            .into());
        }

        let last = &history[history.len() - 1];
        let fast_ma = Self::mean_close(&history[history.len() - fast..]);
        let slow_ma = Self::mean_close(&history[history.len() - slow..]);
        let gap = if slow_ma == 0.0 {
            0.0
        } else {
            (fast_ma - slow_ma) / slow_ma
        };

        let direction = if gap >= 0.0 {
            Direction::Higher
        } else {
            Direction::Lower
        };
        let confidence =
            (0.5 + gap.abs() * self.params.sensitivity).min(self.params.max_confidence.min(1.0));

        let features = BTreeMap::from([
            ("fast_ma".to_string(), fast_ma),
            ("slow_ma".to_string(), slow_ma),
            ("ma_gap".to_string(), gap),
        ]);

        Ok(PredictionSignal::new(
            NAME,
            last.timestamp,
            timeframe_minutes,
            direction,
            confidence,
            last.close,
        )?
        .with_features(FeaturesUsed::Values(features)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn closes(values: impl IntoIterator<Item = f64>) -> Vec<Candle> {
        values
            .into_iter()
            .enumerate()
            .map(|(i, c)| Candle::new(ts(i as i64), c, c, c, c, 1.0))
            .collect()
    }

    #[test]
    fn test_rising_prices_predict_higher() {
        let strategy = MaCrossoverStrategy::default();
        let history = closes((0..30).map(|i| 100.0 + f64::from(i)));
        let signal = strategy.predict(&history, 10).unwrap();

        assert_eq!(signal.direction, Direction::Higher);
        assert!(signal.confidence > 0.5);
        assert_eq!(signal.timestamp, ts(29));
        assert!((signal.current_price - 129.0).abs() < 1e-9);
        assert_eq!(signal.strategy_name, NAME);
    }

    #[test]
    fn test_falling_prices_predict_lower() {
        let strategy = MaCrossoverStrategy::default();
        let history = closes((0..30).map(|i| 200.0 - f64::from(i)));
        let signal = strategy.predict(&history, 30).unwrap();
        assert_eq!(signal.direction, Direction::Lower);
    }

    #[test]
    fn test_confidence_is_capped() {
        let strategy = MaCrossoverStrategy::default();
        let mut values: Vec<f64> = vec![100.0; 25];
        values.extend([1000.0; 5]);
        let signal = strategy.predict(&closes(values), 10).unwrap();
        assert!((signal.confidence - 0.95).abs() < 1e-12);
    }

    #[test]
    fn test_short_history_is_insufficient() {
        let strategy = MaCrossoverStrategy::default();
        let err = strategy.predict(&closes([1.0, 2.0]), 10).unwrap_err();
        assert_eq!(
            err.downcast_ref::<StrategyError>(),
            Some(&StrategyError::InsufficientData {
                required: 20,
                available: 2
            })
        );
    }

    #[test]
    fn test_unsupported_timeframe() {
        let strategy = MaCrossoverStrategy::default();
        let history = closes(vec![1.0; 30]);
        assert!(strategy.predict(&history, 7).is_err());
    }

    #[test]
    fn test_fit_is_noop() {
        let mut strategy = MaCrossoverStrategy::default();
        assert!(!strategy.requires_fitting());
        assert!(strategy.fit(&[], 10).is_ok());
    }
}
