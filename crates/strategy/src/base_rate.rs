//! Majority-direction baseline.
//!
//! Fitting measures how often price finished higher over the timeframe in the
//! training window. Prediction always bets the majority direction with that
//! frequency as confidence. Useful as a floor any real model must beat.

use btc_predictor_core::labeling::labelled_rows;
use btc_predictor_core::{
    Candle, Direction, FeaturesUsed, PredictionSignal, SettlementCondition, Strategy,
    StrategyError, SUPPORTED_TIMEFRAMES,
};
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::debug;

pub const NAME: &str = "base_rate";
pub const DEFAULT_MIN_SAMPLES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
struct FittedRate {
    up_rate: f64,
    samples: usize,
}

pub struct BaseRateStrategy {
    min_samples: usize,
    condition: SettlementCondition,
    fitted: BTreeMap<u32, FittedRate>,
}

impl BaseRateStrategy {
    #[must_use]
    pub fn new(min_samples: usize, condition: SettlementCondition) -> Self {
        Self {
            min_samples,
            condition,
            fitted: BTreeMap::new(),
        }
    }

    /// Fitted up-frequency for `timeframe`, if any.
    #[must_use]
    pub fn up_rate(&self, timeframe: u32) -> Option<f64> {
        self.fitted.get(&timeframe).map(|f| f.up_rate)
    }
}

impl Default for BaseRateStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SAMPLES, SettlementCondition::Strict)
    }
}

impl Strategy for BaseRateStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn requires_fitting(&self) -> bool {
        true
    }

    fn available_timeframes(&self) -> &[u32] {
        &SUPPORTED_TIMEFRAMES
    }

    fn fit(&mut self, history: &[Candle], timeframe_minutes: u32) -> Result<()> {
        if !SUPPORTED_TIMEFRAMES.contains(&timeframe_minutes) {
            return Err(StrategyError::UnsupportedTimeframe {
                strategy: NAME.to_string(),
                timeframe: timeframe_minutes,
            }
            .into());
        }
        let rows = labelled_rows(history, timeframe_minutes, self.condition);
        if rows.len() < self.min_samples {
            return Err(StrategyError::InsufficientData {
                required: self.min_samples,
                available: rows.len(),
            }
            .into());
        }

        let ups = rows.iter().filter(|(_, label)| *label == 1).count();
        let up_rate = ups as f64 / rows.len() as f64;
        debug!(
            timeframe = timeframe_minutes,
            samples = rows.len(),
            up_rate,
            "base rate fitted"
        );
        self.fitted.insert(
            timeframe_minutes,
            FittedRate {
                up_rate,
                samples: rows.len(),
            },
        );
        Ok(())
    }

    fn predict(&self, history: &[Candle], timeframe_minutes: u32) -> Result<PredictionSignal> {
        let fitted = self
            .fitted
            .get(&timeframe_minutes)
            .ok_or_else(|| StrategyError::NotFitted {
                strategy: NAME.to_string(),
                timeframe: timeframe_minutes,
            })?;
        let last = history.last().ok_or(StrategyError::InsufficientData {
            required: 1,
            available: 0,
        })?;

        let (direction, confidence) = if fitted.up_rate >= 0.5 {
            (Direction::Higher, fitted.up_rate)
        } else {
            (Direction::Lower, 1.0 - fitted.up_rate)
        };

        #[allow(clippy::cast_precision_loss)]
        let features = BTreeMap::from([
            ("up_rate".to_string(), fitted.up_rate),
            ("samples".to_string(), fitted.samples as f64),
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
