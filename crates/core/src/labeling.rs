//! Direction labels for supervised training.
//!
//! The label for a candle at `t` compares the price at exactly
//! `t + timeframe` with the price at `t`. The future row is found by
//! timestamp, so a gap in the series yields an undefined label instead of a
//! label computed against the wrong row.

use crate::candle::{position_of, Candle, PriceColumn};
use crate::trade::SettlementCondition;
use chrono::{DateTime, Duration, Utc};

/// Labels every row of `candles` for `timeframe_minutes`.
///
/// Returns one entry per input row: `Some(1)` for higher, `Some(0)` for
/// lower, `None` when the expiry row is absent. Callers drop `None` rows
/// before training.
#[must_use]
pub fn add_direction_labels(
    candles: &[Candle],
    timeframe_minutes: u32,
    column: PriceColumn,
    condition: SettlementCondition,
) -> Vec<Option<u8>> {
    let horizon = Duration::minutes(i64::from(timeframe_minutes));
    candles
        .iter()
        .enumerate()
        .map(|(i, candle)| {
            let expiry = candle.timestamp + horizon;
            // candles are sorted, so the expiry row can only be after `i`
            let tail = &candles[i + 1..];
            position_of(tail, expiry)
                .map(|j| condition.label(candle.price(column), tail[j].price(column)))
        })
        .collect()
}

/// Label for a single `(timestamp, timeframe)` pair.
///
/// Returns `None` when either the open or the expiry row is missing.
#[must_use]
pub fn calculate_single_label(
    candles: &[Candle],
    timestamp: DateTime<Utc>,
    timeframe_minutes: u32,
    column: PriceColumn,
    condition: SettlementCondition,
) -> Option<u8> {
    let open = position_of(candles, timestamp)?;
    let expiry = timestamp + Duration::minutes(i64::from(timeframe_minutes));
    let close = position_of(candles, expiry)?;
    Some(condition.label(
        candles[open].price(column),
        candles[close].price(column),
    ))
}

/// Pairs each candle with its label and drops undefined rows.
#[must_use]
pub fn labelled_rows(
    candles: &[Candle],
    timeframe_minutes: u32,
    condition: SettlementCondition,
) -> Vec<(&Candle, u8)> {
    candles
        .iter()
        .zip(add_direction_labels(
            candles,
            timeframe_minutes,
            PriceColumn::Close,
            condition,
        ))
        .filter_map(|(c, label)| label.map(|l| (c, l)))
        .collect()
}
