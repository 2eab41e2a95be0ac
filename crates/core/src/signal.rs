//! Prediction signals emitted by strategies.
//!
//! A signal is immutable once built. Venue fields are optional and only
//! populated when the prediction is compared against a prediction market.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Contract durations (minutes) a signal may target.
pub const SUPPORTED_TIMEFRAMES: [u32; 7] = [5, 10, 15, 30, 60, 240, 1440];

/// Predicted direction of price at expiry relative to price at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Higher,
    Lower,
}

impl Direction {
    /// Returns the opposite direction.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Higher => Self::Lower,
            Self::Lower => Self::Higher,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Higher => "higher",
            Self::Lower => "lower",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "higher" | "up" => Ok(Self::Higher),
            "lower" | "down" => Ok(Self::Lower),
            other => bail!("unknown direction '{other}'"),
        }
    }
}

/// Features a strategy reports as having used for a prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeaturesUsed {
    Names(Vec<String>),
    Values(BTreeMap<String, f64>),
}

impl Default for FeaturesUsed {
    fn default() -> Self {
        Self::Names(Vec::new())
    }
}

/// Prediction-market fields attached when a signal is compared to a market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketContext {
    pub market_id: String,
    /// Market-implied probability of the predicted outcome.
    pub market_probability: f64,
}

/// Output of `Strategy::predict`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionSignal {
    pub id: Uuid,
    pub strategy_name: String,
    pub timestamp: DateTime<Utc>,
    pub timeframe_minutes: u32,
    pub direction: Direction,
    /// Probability of `direction` in [0.0, 1.0].
    pub confidence: f64,
    pub current_price: f64,
    #[serde(default)]
    pub features_used: FeaturesUsed,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub market: Option<MarketContext>,
}

impl PredictionSignal {
    /// Creates a new signal with validation.
    ///
    /// # Errors
    /// Returns error if confidence is outside [0.0, 1.0], the price is not
    /// finite, or the timeframe is not one of [`SUPPORTED_TIMEFRAMES`].
    pub fn new(
        strategy_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        timeframe_minutes: u32,
        direction: Direction,
        confidence: f64,
        current_price: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            bail!("confidence must be in [0.0, 1.0], got {confidence}");
        }
        if !current_price.is_finite() {
            bail!("current price must be finite, got {current_price}");
        }
        if !SUPPORTED_TIMEFRAMES.contains(&timeframe_minutes) {
            bail!("unsupported timeframe {timeframe_minutes}m");
        }
        Ok(Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.into(),
            timestamp,
            timeframe_minutes,
            direction,
            confidence,
            current_price,
            features_used: FeaturesUsed::default(),
            market: None,
        })
    }

    #[must_use]
    pub fn with_features(mut self, features: FeaturesUsed) -> Self {
        self.features_used = features;
        self
    }

    #[must_use]
    pub fn with_market(mut self, market_id: impl Into<String>, market_probability: f64) -> Self {
        self.market = Some(MarketContext {
            market_id: market_id.into(),
            market_probability,
        });
        self
    }

    /// `confidence - market_probability`, when a market is attached.
    #[must_use]
    pub fn alpha(&self) -> Option<f64> {
        self.market
            .as_ref()
            .map(|m| self.confidence - m.market_probability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Higher.opposite(), Direction::Lower);
        assert_eq!(Direction::Lower.opposite(), Direction::Higher);
    }

    #[test]
    fn test_direction_serializes_lowercase() {
        let json = serde_json::to_string(&Direction::Higher).unwrap();
        assert_eq!(json, "\"higher\"");
        let back: Direction = serde_json::from_str("\"lower\"").unwrap();
        assert_eq!(back, Direction::Lower);
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!("HIGHER".parse::<Direction>().unwrap(), Direction::Higher);
        assert_eq!("down".parse::<Direction>().unwrap(), Direction::Lower);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_signal_validation() {
        assert!(PredictionSignal::new("s", ts(), 10, Direction::Higher, 0.7, 100.0).is_ok());
        assert!(PredictionSignal::new("s", ts(), 10, Direction::Higher, 1.2, 100.0).is_err());
        assert!(PredictionSignal::new("s", ts(), 10, Direction::Higher, -0.1, 100.0).is_err());
        assert!(PredictionSignal::new("s", ts(), 7, Direction::Higher, 0.7, 100.0).is_err());
        assert!(PredictionSignal::new("s", ts(), 10, Direction::Higher, 0.7, f64::NAN).is_err());
    }

    #[test]
    fn test_alpha_requires_market() {
        let signal = PredictionSignal::new("s", ts(), 60, Direction::Lower, 0.65, 100.0).unwrap();
        assert_eq!(signal.alpha(), None);

        let signal = signal.with_market("btc-up-1h", 0.55);
        let alpha = signal.alpha().unwrap();
        assert!((alpha - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_features_used_untagged() {
        let names: FeaturesUsed = serde_json::from_str(r#"["rsi","ma_gap"]"#).unwrap();
        assert_eq!(names, FeaturesUsed::Names(vec!["rsi".into(), "ma_gap".into()]));

        let values: FeaturesUsed = serde_json::from_str(r#"{"rsi":55.0}"#).unwrap();
        assert!(matches!(values, FeaturesUsed::Values(_)));
    }
}
