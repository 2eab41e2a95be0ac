use crate::trade::Venue;
use anyhow::{bail, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;
pub const DEFAULT_EVENT_CONTRACT_PAYOUT: f64 = 1.85;
pub const DEFAULT_POLYMARKET_PAYOUT: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub risk_control: RiskControlConfig,
    pub confidence_thresholds: TimeframeTable<f64>,
    pub event_contract: EventContractConfig,
    pub polymarket: PolymarketConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            risk_control: RiskControlConfig::default(),
            confidence_thresholds: TimeframeTable::from_pairs([
                (10, 0.606),
                (30, 0.591),
                (60, 0.591),
                (1440, 0.591),
            ]),
            event_contract: EventContractConfig::default(),
            polymarket: PolymarketConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/btc_predictor".to_string(),
            max_connections: 5,
        }
    }
}

/// Circuit-breaker limits and the bet range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskControlConfig {
    /// `[min_bet, max_bet]`.
    pub bet_range: [f64; 2],
    #[serde(with = "rust_decimal::serde::float")]
    pub daily_max_loss: Decimal,
    pub max_daily_trades: u32,
    pub max_consecutive_losses: u32,
}

impl RiskControlConfig {
    #[must_use]
    pub fn min_bet(&self) -> f64 {
        self.bet_range[0]
    }

    #[must_use]
    pub fn max_bet(&self) -> f64 {
        self.bet_range[1]
    }
}

impl Default for RiskControlConfig {
    fn default() -> Self {
        Self {
            bet_range: [5.0, 20.0],
            daily_max_loss: Decimal::from(50),
            max_daily_trades: 30,
            max_consecutive_losses: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventContractConfig {
    pub payout_ratio: TimeframeTable<f64>,
}

impl Default for EventContractConfig {
    fn default() -> Self {
        Self {
            payout_ratio: TimeframeTable::from_pairs([
                (10, 1.80),
                (30, 1.85),
                (60, 1.85),
                (1440, 1.85),
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolymarketConfig {
    pub payout_ratio: f64,
}

impl Default for PolymarketConfig {
    fn default() -> Self {
        Self {
            payout_ratio: DEFAULT_POLYMARKET_PAYOUT,
        }
    }
}

impl AppConfig {
    /// Confidence threshold for `timeframe`, falling back to
    /// [`DEFAULT_CONFIDENCE_THRESHOLD`].
    #[must_use]
    pub fn confidence_threshold(&self, timeframe: u32) -> f64 {
        self.confidence_thresholds
            .get_or_warn(timeframe, DEFAULT_CONFIDENCE_THRESHOLD, "confidence_thresholds")
    }

    /// Payout ratio for a winning bet on `venue` at `timeframe`.
    #[must_use]
    pub fn payout_ratio(&self, venue: Venue, timeframe: u32) -> f64 {
        match venue {
            Venue::Binance => self.event_contract.payout_ratio.get_or_warn(
                timeframe,
                DEFAULT_EVENT_CONTRACT_PAYOUT,
                "event_contract.payout_ratio",
            ),
            Venue::Polymarket => self.polymarket.payout_ratio,
        }
    }

    /// Checks ranges that would make bet sizing or settlement meaningless.
    ///
    /// # Errors
    /// Returns an error describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk_control;
        if !(risk.min_bet() > 0.0 && risk.min_bet() <= risk.max_bet()) {
            bail!(
                "risk_control.bet_range must satisfy 0 < min <= max, got {:?}",
                risk.bet_range
            );
        }
        if risk.daily_max_loss <= Decimal::ZERO {
            bail!("risk_control.daily_max_loss must be positive");
        }
        for (tf, threshold) in self.confidence_thresholds.iter() {
            if !(0.0..1.0).contains(threshold) {
                bail!("confidence_thresholds.{tf} must be in [0, 1), got {threshold}");
            }
        }
        for (tf, payout) in self.event_contract.payout_ratio.iter() {
            if *payout <= 1.0 {
                bail!("event_contract.payout_ratio.{tf} must exceed 1.0, got {payout}");
            }
        }
        if self.polymarket.payout_ratio <= 1.0 {
            bail!("polymarket.payout_ratio must exceed 1.0");
        }
        Ok(())
    }
}

/// Map keyed by timeframe in minutes.
///
/// Config files key these tables by string (`"10"` or `"10m"`); they are
/// parsed into integer minutes on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, T>",
    into = "BTreeMap<String, T>",
    bound(
        serialize = "T: Serialize + Clone",
        deserialize = "T: Deserialize<'de>"
    )
)]
pub struct TimeframeTable<T>(BTreeMap<u32, T>);

impl<T> TimeframeTable<T> {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, T)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    #[must_use]
    pub fn get(&self, timeframe: u32) -> Option<&T> {
        self.0.get(&timeframe)
    }

    pub fn insert(&mut self, timeframe: u32, value: T) -> Option<T> {
        self.0.insert(timeframe, value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &T)> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Copy + std::fmt::Debug> TimeframeTable<T> {
    /// Looks up `timeframe`, logging a warning when the fallback is used.
    pub fn get_or_warn(&self, timeframe: u32, fallback: T, table: &str) -> T {
        if let Some(value) = self.0.get(&timeframe) {
            *value
        } else {
            tracing::warn!(
                table,
                timeframe,
                fallback = ?fallback,
                "timeframe missing from config table, using fallback"
            );
            fallback
        }
    }
}

impl<T> Default for TimeframeTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_timeframe_key(key: &str) -> Result<u32> {
    let trimmed = key.trim().trim_end_matches('m');
    trimmed
        .parse::<u32>()
        .map_err(|_| anyhow::anyhow!("invalid timeframe key '{key}'"))
}

impl<T> TryFrom<BTreeMap<String, T>> for TimeframeTable<T> {
    type Error = String;

    fn try_from(raw: BTreeMap<String, T>) -> std::result::Result<Self, Self::Error> {
        let mut table = BTreeMap::new();
        for (key, value) in raw {
            let tf = parse_timeframe_key(&key).map_err(|e| e.to_string())?;
            table.insert(tf, value);
        }
        Ok(Self(table))
    }
}

impl<T> From<TimeframeTable<T>> for BTreeMap<String, T> {
    fn from(table: TimeframeTable<T>) -> Self {
        table.0.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.risk_control.bet_range, [5.0, 20.0]);
        assert_eq!(config.risk_control.max_daily_trades, 30);
        assert_eq!(config.risk_control.max_consecutive_losses, 8);
        assert!((config.payout_ratio(Venue::Binance, 10) - 1.80).abs() < 1e-12);
        assert!((config.payout_ratio(Venue::Polymarket, 10) - 2.0).abs() < 1e-12);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_timeframe_falls_back() {
        let config = AppConfig::default();
        assert!((config.confidence_threshold(15) - DEFAULT_CONFIDENCE_THRESHOLD).abs() < 1e-12);
        assert!((config.payout_ratio(Venue::Binance, 15) - DEFAULT_EVENT_CONTRACT_PAYOUT).abs() < 1e-12);
    }

    #[test]
    fn test_timeframe_table_parses_string_keys() {
        let json = r#"{"10": 0.606, "30m": 0.591}"#;
        let table: TimeframeTable<f64> = serde_json::from_str(json).unwrap();
        assert_eq!(table.get(10), Some(&0.606));
        assert_eq!(table.get(30), Some(&0.591));

        let bad: std::result::Result<TimeframeTable<f64>, _> = serde_json::from_str(r#"{"ten": 0.6}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_timeframe_table_serializes_string_keys() {
        let table = TimeframeTable::from_pairs([(60, 1.85)]);
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"{"60":1.85}"#);
    }

    #[test]
    fn test_validate_rejects_inverted_bet_range() {
        let mut config = AppConfig::default();
        config.risk_control.bet_range = [20.0, 5.0];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_threshold_of_one() {
        let mut config = AppConfig::default();
        config.confidence_thresholds.insert(10, 1.0);
        assert!(config.validate().is_err());
    }
}
