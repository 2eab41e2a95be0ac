//! Simulated binary-outcome trades and the settlement rules that close them.
//!
//! A trade is created pending and moves to settled exactly once. The
//! settled fields are private so the only way to populate them is
//! [`SimulatedTrade::settle`].

use crate::error::SettlementError;
use crate::signal::Direction;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Comparison used to decide the realized direction at expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SettlementCondition {
    /// `close > open` is higher. Exchange-referenced contracts.
    #[default]
    #[serde(rename = ">")]
    Strict,
    /// `close >= open` is higher; a tie resolves up. Prediction markets.
    #[serde(rename = ">=")]
    Inclusive,
}

impl SettlementCondition {
    /// Whether `close` counts as "higher" than `open` under this condition.
    #[must_use]
    pub fn is_higher(self, open: f64, close: f64) -> bool {
        match self {
            Self::Strict => close > open,
            Self::Inclusive => close >= open,
        }
    }

    /// Binary label: 1 when `close COND open`, else 0.
    #[must_use]
    pub fn label(self, open: f64, close: f64) -> u8 {
        u8::from(self.is_higher(open, close))
    }

    /// Outcome of a `direction` bet.
    ///
    /// Lower only wins on a strict decrease, so a flat market loses for both
    /// directions under `Strict` and for `Lower` under `Inclusive`.
    #[must_use]
    pub fn outcome(self, direction: Direction, open: f64, close: f64) -> TradeResult {
        let won = match direction {
            Direction::Higher => self.is_higher(open, close),
            Direction::Lower => close < open,
        };
        if won {
            TradeResult::Win
        } else {
            TradeResult::Lose
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Strict => ">",
            Self::Inclusive => ">=",
        }
    }
}

impl fmt::Display for SettlementCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for SettlementCondition {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim() {
            ">" | "strict" => Ok(Self::Strict),
            ">=" | "inclusive" => Ok(Self::Inclusive),
            other => anyhow::bail!("unknown settlement condition '{other}'"),
        }
    }
}

/// Settlement venue. Determines the settlement condition and which payout
/// table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    #[default]
    Binance,
    Polymarket,
}

impl Venue {
    #[must_use]
    pub const fn settlement_condition(self) -> SettlementCondition {
        match self {
            Self::Binance => SettlementCondition::Strict,
            Self::Polymarket => SettlementCondition::Inclusive,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Polymarket => "polymarket",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "binance" | "event_contract" => Ok(Self::Binance),
            "polymarket" => Ok(Self::Polymarket),
            other => anyhow::bail!("unknown platform '{other}' (expected binance or polymarket)"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeResult {
    Win,
    Lose,
}

impl TradeResult {
    #[must_use]
    pub const fn is_win(self) -> bool {
        matches!(self, Self::Win)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Win => "win",
            Self::Lose => "lose",
        }
    }
}

impl FromStr for TradeResult {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "win" => Ok(Self::Win),
            "lose" | "loss" => Ok(Self::Lose),
            other => anyhow::bail!("unknown trade result '{other}'"),
        }
    }
}

/// PnL of a settled bet: `bet * (payout - 1)` on a win, `-bet` on a loss.
///
/// # Errors
/// Returns [`SettlementError::InvalidPayout`] if `payout_ratio` is not finite.
pub fn settlement_pnl(
    bet: Decimal,
    payout_ratio: f64,
    result: TradeResult,
) -> Result<Decimal, SettlementError> {
    match result {
        TradeResult::Win => {
            let payout = Decimal::try_from(payout_ratio)
                .map_err(|_| SettlementError::InvalidPayout(payout_ratio))?;
            Ok(bet * (payout - Decimal::ONE))
        }
        TradeResult::Lose => Ok(-bet),
    }
}

/// Flat, fully public form of a trade used for serialization and storage
/// rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub strategy_name: String,
    pub direction: Direction,
    pub confidence: f64,
    pub timeframe_minutes: u32,
    #[serde(with = "rust_decimal::serde::float")]
    pub bet_amount: Decimal,
    pub open_time: DateTime<Utc>,
    pub open_price: f64,
    pub expiry_time: DateTime<Utc>,
    pub close_price: Option<f64>,
    pub result: Option<TradeResult>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub pnl: Option<Decimal>,
}

/// A simulated binary-outcome bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TradeRecord", into = "TradeRecord")]
pub struct SimulatedTrade {
    id: Uuid,
    strategy_name: String,
    direction: Direction,
    confidence: f64,
    timeframe_minutes: u32,
    bet_amount: Decimal,
    open_time: DateTime<Utc>,
    open_price: f64,
    expiry_time: DateTime<Utc>,
    settlement: Option<Settlement>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Settlement {
    close_price: f64,
    result: TradeResult,
    pnl: Decimal,
}

impl SimulatedTrade {
    /// Opens a pending trade. `expiry_time` is `open_time + timeframe_minutes`.
    #[must_use]
    pub fn open(
        strategy_name: impl Into<String>,
        direction: Direction,
        confidence: f64,
        timeframe_minutes: u32,
        bet_amount: Decimal,
        open_time: DateTime<Utc>,
        open_price: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_name: strategy_name.into(),
            direction,
            confidence,
            timeframe_minutes,
            bet_amount,
            open_time,
            open_price,
            expiry_time: open_time + Duration::minutes(i64::from(timeframe_minutes)),
            settlement: None,
        }
    }

    /// Settles the trade against `close_price`.
    ///
    /// # Errors
    /// Returns [`SettlementError::AlreadySettled`] if the trade was settled
    /// before; the existing settlement is left untouched.
    pub fn settle(
        &mut self,
        close_price: f64,
        condition: SettlementCondition,
        payout_ratio: f64,
    ) -> Result<TradeResult, SettlementError> {
        if self.settlement.is_some() {
            return Err(SettlementError::AlreadySettled(self.id));
        }
        if !close_price.is_finite() {
            return Err(SettlementError::NonFinitePrice(close_price));
        }
        let result = condition.outcome(self.direction, self.open_price, close_price);
        let pnl = settlement_pnl(self.bet_amount, payout_ratio, result)?;
        self.settlement = Some(Settlement {
            close_price,
            result,
            pnl,
        });
        Ok(result)
    }

    /// Applies an externally computed settlement (e.g. read back from storage).
    ///
    /// # Errors
    /// Returns [`SettlementError::AlreadySettled`] if the trade was settled
    /// before.
    pub fn apply_settlement(
        &mut self,
        close_price: f64,
        result: TradeResult,
        pnl: Decimal,
    ) -> Result<(), SettlementError> {
        if self.settlement.is_some() {
            return Err(SettlementError::AlreadySettled(self.id));
        }
        self.settlement = Some(Settlement {
            close_price,
            result,
            pnl,
        });
        Ok(())
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn strategy_name(&self) -> &str {
        &self.strategy_name
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    #[must_use]
    pub fn timeframe_minutes(&self) -> u32 {
        self.timeframe_minutes
    }

    #[must_use]
    pub fn bet_amount(&self) -> Decimal {
        self.bet_amount
    }

    #[must_use]
    pub fn open_time(&self) -> DateTime<Utc> {
        self.open_time
    }

    #[must_use]
    pub fn open_price(&self) -> f64 {
        self.open_price
    }

    #[must_use]
    pub fn expiry_time(&self) -> DateTime<Utc> {
        self.expiry_time
    }

    #[must_use]
    pub fn close_price(&self) -> Option<f64> {
        self.settlement.map(|s| s.close_price)
    }

    #[must_use]
    pub fn result(&self) -> Option<TradeResult> {
        self.settlement.map(|s| s.result)
    }

    #[must_use]
    pub fn pnl(&self) -> Option<Decimal> {
        self.settlement.map(|s| s.pnl)
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.settlement.is_none()
    }

    #[must_use]
    pub fn is_win(&self) -> bool {
        self.result().is_some_and(TradeResult::is_win)
    }

    #[must_use]
    pub fn to_record(&self) -> TradeRecord {
        self.clone().into()
    }
}

impl From<SimulatedTrade> for TradeRecord {
    fn from(trade: SimulatedTrade) -> Self {
        Self {
            id: trade.id,
            strategy_name: trade.strategy_name,
            direction: trade.direction,
            confidence: trade.confidence,
            timeframe_minutes: trade.timeframe_minutes,
            bet_amount: trade.bet_amount,
            open_time: trade.open_time,
            open_price: trade.open_price,
            expiry_time: trade.expiry_time,
            close_price: trade.settlement.map(|s| s.close_price),
            result: trade.settlement.map(|s| s.result),
            pnl: trade.settlement.map(|s| s.pnl),
        }
    }
}

impl TryFrom<TradeRecord> for SimulatedTrade {
    type Error = SettlementError;

    fn try_from(record: TradeRecord) -> Result<Self, Self::Error> {
        let settlement = match (record.close_price, record.result, record.pnl) {
            (Some(close_price), Some(result), Some(pnl)) => Some(Settlement {
                close_price,
                result,
                pnl,
            }),
            (None, None, None) => None,
            _ => {
                return Err(SettlementError::InconsistentRecord(format!(
                    "trade {} must have close_price, result and pnl all set or all empty",
                    record.id
                )))
            }
        };
        Ok(Self {
            id: record.id,
            strategy_name: record.strategy_name,
            direction: record.direction,
            confidence: record.confidence,
            timeframe_minutes: record.timeframe_minutes,
            bet_amount: record.bet_amount,
            open_time: record.open_time,
            open_price: record.open_price,
            expiry_time: record.expiry_time,
            settlement,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn open_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap()
    }

    fn pending(direction: Direction) -> SimulatedTrade {
        SimulatedTrade::open("test", direction, 0.7, 10, dec!(10), open_time(), 100.0)
    }

    // ============================================
    // Settlement Condition Tests
    // ============================================

    #[test]
    fn test_flat_market_strict_loses_both_directions() {
        let c = SettlementCondition::Strict;
        assert_eq!(c.outcome(Direction::Higher, 100.0, 100.0), TradeResult::Lose);
        assert_eq!(c.outcome(Direction::Lower, 100.0, 100.0), TradeResult::Lose);
    }

    #[test]
    fn test_flat_market_inclusive_resolves_up() {
        let c = SettlementCondition::Inclusive;
        assert_eq!(c.outcome(Direction::Higher, 100.0, 100.0), TradeResult::Win);
        assert_eq!(c.outcome(Direction::Lower, 100.0, 100.0), TradeResult::Lose);
    }

    #[test]
    fn test_moves_settle_the_same_under_both_conditions() {
        for c in [SettlementCondition::Strict, SettlementCondition::Inclusive] {
            assert_eq!(c.outcome(Direction::Higher, 100.0, 101.0), TradeResult::Win);
            assert_eq!(c.outcome(Direction::Lower, 100.0, 101.0), TradeResult::Lose);
            assert_eq!(c.outcome(Direction::Higher, 100.0, 99.0), TradeResult::Lose);
            assert_eq!(c.outcome(Direction::Lower, 100.0, 99.0), TradeResult::Win);
        }
    }

    #[test]
    fn test_condition_parse_and_serde() {
        assert_eq!(">".parse::<SettlementCondition>().unwrap(), SettlementCondition::Strict);
        assert_eq!(">=".parse::<SettlementCondition>().unwrap(), SettlementCondition::Inclusive);
        assert!("<".parse::<SettlementCondition>().is_err());
        assert_eq!(
            serde_json::to_string(&SettlementCondition::Inclusive).unwrap(),
            "\">=\""
        );
    }

    #[test]
    fn test_venue_condition() {
        assert_eq!(Venue::Binance.settlement_condition(), SettlementCondition::Strict);
        assert_eq!(Venue::Polymarket.settlement_condition(), SettlementCondition::Inclusive);
        assert_eq!("Polymarket".parse::<Venue>().unwrap(), Venue::Polymarket);
        assert!("kraken".parse::<Venue>().is_err());
    }

    // ============================================
    // Trade Lifecycle Tests
    // ============================================

    #[test]
    fn test_open_sets_expiry_and_pending() {
        let trade = pending(Direction::Higher);
        assert_eq!(trade.expiry_time(), open_time() + Duration::minutes(10));
        assert!(trade.is_pending());
        assert_eq!(trade.close_price(), None);
        assert_eq!(trade.result(), None);
        assert_eq!(trade.pnl(), None);
    }

    #[test]
    fn test_settle_win_pnl() {
        let mut trade = pending(Direction::Higher);
        let result = trade.settle(101.0, SettlementCondition::Strict, 1.85).unwrap();
        assert_eq!(result, TradeResult::Win);
        assert_eq!(trade.pnl(), Some(dec!(8.5)));
        assert_eq!(trade.close_price(), Some(101.0));
        assert!(trade.is_win());
    }

    #[test]
    fn test_settle_loss_pnl() {
        let mut trade = pending(Direction::Higher);
        trade.settle(99.0, SettlementCondition::Strict, 1.85).unwrap();
        assert_eq!(trade.pnl(), Some(dec!(-10)));
        assert!(!trade.is_win());
    }

    #[test]
    fn test_second_settle_is_rejected_and_first_kept() {
        let mut trade = pending(Direction::Higher);
        trade.settle(101.0, SettlementCondition::Strict, 1.85).unwrap();

        let err = trade.settle(50.0, SettlementCondition::Strict, 1.85).unwrap_err();
        assert_eq!(err, SettlementError::AlreadySettled(trade.id()));
        assert_eq!(trade.close_price(), Some(101.0));
        assert_eq!(trade.result(), Some(TradeResult::Win));
    }

    #[test]
    fn test_settle_rejects_non_finite_price() {
        let mut trade = pending(Direction::Lower);
        assert!(trade.settle(f64::NAN, SettlementCondition::Strict, 1.85).is_err());
        assert!(trade.is_pending());
    }

    #[test]
    fn test_record_round_trip_preserves_settlement() {
        let mut trade = pending(Direction::Lower);
        trade.settle(95.0, SettlementCondition::Strict, 2.0).unwrap();

        let json = serde_json::to_string(&trade).unwrap();
        assert!(json.contains("\"result\":\"win\""));
        let back: SimulatedTrade = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pnl(), Some(dec!(10)));
        assert_eq!(back.id(), trade.id());
    }

    #[test]
    fn test_partially_settled_record_is_rejected() {
        let mut record = pending(Direction::Higher).to_record();
        record.close_price = Some(100.0);
        assert!(SimulatedTrade::try_from(record).is_err());
    }
}
