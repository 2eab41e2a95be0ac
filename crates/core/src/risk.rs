//! Trade gating and bet sizing.
//!
//! Both functions are pure and shared by the live simulator and the
//! backtest engine, so backtested bet sizes match what live trading would
//! have placed.

use crate::config::{AppConfig, RiskControlConfig, TimeframeTable, DEFAULT_CONFIDENCE_THRESHOLD};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Risk inputs needed by the gate and the sizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub limits: RiskControlConfig,
    pub confidence_thresholds: TimeframeTable<f64>,
    pub default_threshold: f64,
}

impl RiskConfig {
    #[must_use]
    pub fn threshold_for(&self, timeframe: u32) -> f64 {
        self.confidence_thresholds.get_or_warn(
            timeframe,
            self.default_threshold,
            "confidence_thresholds",
        )
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        AppConfig::default().risk_config()
    }
}

impl AppConfig {
    #[must_use]
    pub fn risk_config(&self) -> RiskConfig {
        RiskConfig {
            limits: self.risk_control.clone(),
            confidence_thresholds: self.confidence_thresholds.clone(),
            default_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Per-strategy, per-UTC-day counters derived from trade history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DailyStats {
    /// Sum of absolute losses on the day.
    #[serde(with = "rust_decimal::serde::float")]
    pub daily_loss: Decimal,
    pub daily_trades: u32,
    pub consecutive_losses: u32,
}

/// The circuit breaker that denied a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBreaker {
    DailyLoss,
    DailyTrades,
    ConsecutiveLosses,
}

impl fmt::Display for RiskBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DailyLoss => "daily loss limit",
            Self::DailyTrades => "daily trade limit",
            Self::ConsecutiveLosses => "consecutive loss limit",
        })
    }
}

/// First breaker that trips, checked in loss, trade-count, streak order.
#[must_use]
pub fn tripped_breaker(
    daily_loss: Decimal,
    consecutive_losses: u32,
    daily_trade_count: u32,
    limits: &RiskControlConfig,
) -> Option<RiskBreaker> {
    if daily_loss >= limits.daily_max_loss {
        return Some(RiskBreaker::DailyLoss);
    }
    if daily_trade_count >= limits.max_daily_trades {
        return Some(RiskBreaker::DailyTrades);
    }
    if consecutive_losses >= limits.max_consecutive_losses {
        return Some(RiskBreaker::ConsecutiveLosses);
    }
    None
}

/// Whether a new trade is permitted under the daily limits.
#[must_use]
pub fn should_trade(
    daily_loss: Decimal,
    consecutive_losses: u32,
    daily_trade_count: u32,
    limits: &RiskControlConfig,
) -> bool {
    match tripped_breaker(daily_loss, consecutive_losses, daily_trade_count, limits) {
        Some(breaker) => {
            debug!(
                %breaker,
                %daily_loss,
                daily_trade_count,
                consecutive_losses,
                "trade denied"
            );
            false
        }
        None => true,
    }
}

impl DailyStats {
    #[must_use]
    pub fn permits(&self, limits: &RiskControlConfig) -> bool {
        should_trade(
            self.daily_loss,
            self.consecutive_losses,
            self.daily_trades,
            limits,
        )
    }
}

/// Bet size for a signal, or zero when confidence is below the timeframe's
/// threshold.
#[must_use]
pub fn calculate_bet(confidence: f64, timeframe_minutes: u32, config: &RiskConfig) -> Decimal {
    bet_for_threshold(
        confidence,
        config.threshold_for(timeframe_minutes),
        config.limits.min_bet(),
        config.limits.max_bet(),
    )
}

/// Linear bet sizing between `min_bet` at `threshold` and `max_bet` at
/// confidence 1.0, rounded to cents.
#[must_use]
pub fn bet_for_threshold(confidence: f64, threshold: f64, min_bet: f64, max_bet: f64) -> Decimal {
    if !confidence.is_finite() || confidence < threshold {
        return Decimal::ZERO;
    }
    let raw = if confidence >= 1.0 {
        max_bet
    } else {
        let span = 1.0 - threshold;
        (min_bet + (max_bet - min_bet) * (confidence - threshold) / span).clamp(min_bet, max_bet)
    };
    Decimal::try_from(raw).map_or(Decimal::ZERO, |bet| bet.round_dp(2))
}

/// `bet_for_threshold` as `f64`, for analysis code working in floats.
#[must_use]
pub fn bet_for_threshold_f64(confidence: f64, threshold: f64, min_bet: f64, max_bet: f64) -> f64 {
    bet_for_threshold(confidence, threshold, min_bet, max_bet)
        .to_f64()
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limits() -> RiskControlConfig {
        RiskControlConfig::default()
    }

    // ============================================
    // should_trade
    // ============================================

    #[test]
    fn test_permits_below_all_limits() {
        assert!(should_trade(dec!(49.99), 7, 29, &limits()));
        assert!(should_trade(Decimal::ZERO, 0, 0, &limits()));
    }

    #[test]
    fn test_denies_at_each_limit() {
        assert!(!should_trade(dec!(50), 0, 0, &limits()));
        assert!(!should_trade(dec!(0), 0, 30, &limits()));
        assert!(!should_trade(dec!(0), 8, 0, &limits()));
    }

    #[test]
    fn test_denies_above_each_limit() {
        assert!(!should_trade(dec!(75), 0, 0, &limits()));
        assert!(!should_trade(dec!(0), 0, 31, &limits()));
        assert!(!should_trade(dec!(0), 12, 0, &limits()));
    }

    #[test]
    fn test_breaker_order() {
        assert_eq!(
            tripped_breaker(dec!(60), 9, 40, &limits()),
            Some(RiskBreaker::DailyLoss)
        );
        assert_eq!(
            tripped_breaker(dec!(0), 9, 40, &limits()),
            Some(RiskBreaker::DailyTrades)
        );
        assert_eq!(
            tripped_breaker(dec!(0), 9, 0, &limits()),
            Some(RiskBreaker::ConsecutiveLosses)
        );
    }

    #[test]
    fn test_daily_stats_permits() {
        let stats = DailyStats {
            daily_loss: dec!(10),
            daily_trades: 3,
            consecutive_losses: 8,
        };
        assert!(!stats.permits(&limits()));
        assert!(DailyStats::default().permits(&limits()));
    }

    // ============================================
    // calculate_bet
    // ============================================

    #[test]
    fn test_bet_at_threshold_is_min() {
        let config = RiskConfig::default();
        assert_eq!(calculate_bet(0.606, 10, &config), dec!(5));
        assert_eq!(calculate_bet(0.591, 30, &config), dec!(5));
    }

    #[test]
    fn test_bet_at_full_confidence_is_max() {
        let config = RiskConfig::default();
        assert_eq!(calculate_bet(1.0, 10, &config), dec!(20));
        assert_eq!(calculate_bet(1.0, 1440, &config), dec!(20));
    }

    #[test]
    fn test_bet_below_threshold_is_zero() {
        let config = RiskConfig::default();
        assert_eq!(calculate_bet(0.605, 10, &config), Decimal::ZERO);
        assert_eq!(calculate_bet(0.2, 60, &config), Decimal::ZERO);
        assert_eq!(calculate_bet(f64::NAN, 60, &config), Decimal::ZERO);
    }

    #[test]
    fn test_bet_interpolates_linearly() {
        let config = RiskConfig::default();
        // halfway between 0.606 and 1.0
        assert_eq!(calculate_bet(0.803, 10, &config), dec!(12.5));
    }

    #[test]
    fn test_bet_unknown_timeframe_uses_default_threshold() {
        let config = RiskConfig::default();
        assert_eq!(calculate_bet(0.6, 15, &config), dec!(5));
        assert_eq!(calculate_bet(0.59, 15, &config), Decimal::ZERO);
    }

    #[test]
    fn test_bet_rounds_to_cents() {
        let bet = bet_for_threshold(0.7, 0.6, 5.0, 20.0);
        assert_eq!(bet, dec!(8.75));
        let bet = bet_for_threshold(0.61234, 0.6, 5.0, 20.0);
        assert!(bet.scale() <= 2);
    }
}
