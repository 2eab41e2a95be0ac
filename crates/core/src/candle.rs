//! OHLCV candles and the ordered series the labeler, strategies and the
//! backtest engine operate on.
//!
//! Lookups are timestamp based, never row-offset based: exchange history has
//! gaps, and a gap must surface as a missing value rather than a shifted one.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A single OHLCV candle. `timestamp` is the candle open time in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    #[must_use]
    pub fn new(
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Returns the named price column.
    #[must_use]
    pub fn price(&self, column: PriceColumn) -> f64 {
        match column {
            PriceColumn::Open => self.open,
            PriceColumn::High => self.high,
            PriceColumn::Low => self.low,
            PriceColumn::Close => self.close,
        }
    }
}

/// Which candle price a label or settlement compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceColumn {
    Open,
    High,
    Low,
    #[default]
    Close,
}

/// Finds the index of the candle stamped exactly `ts` in a sorted slice.
#[must_use]
pub fn position_of(candles: &[Candle], ts: DateTime<Utc>) -> Option<usize> {
    candles.binary_search_by_key(&ts, |c| c.timestamp).ok()
}

/// Ordered OHLCV history with strictly increasing timestamps.
///
/// Gaps are allowed. Construction validates ordering so every consumer can
/// binary-search by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OhlcvSeries {
    candles: Vec<Candle>,
}

impl OhlcvSeries {
    /// Builds a series from candles already in strictly increasing order.
    ///
    /// # Errors
    /// Returns an error if two consecutive candles are not strictly increasing
    /// in time.
    pub fn new(candles: Vec<Candle>) -> Result<Self> {
        for pair in candles.windows(2) {
            if pair[1].timestamp <= pair[0].timestamp {
                bail!(
                    "OHLCV timestamps must be strictly increasing: {} followed by {}",
                    pair[0].timestamp,
                    pair[1].timestamp
                );
            }
        }
        Ok(Self { candles })
    }

    /// Sorts candles by timestamp and drops duplicate timestamps (first wins).
    #[must_use]
    pub fn from_unsorted(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);
        Self { candles }
    }

    #[must_use]
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    #[must_use]
    pub fn into_candles(self) -> Vec<Candle> {
        self.candles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.candles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    #[must_use]
    pub fn first_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.first().map(|c| c.timestamp)
    }

    #[must_use]
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.timestamp)
    }

    /// Index of the candle stamped exactly `ts`.
    #[must_use]
    pub fn position(&self, ts: DateTime<Utc>) -> Option<usize> {
        position_of(&self.candles, ts)
    }

    /// Candle stamped exactly `ts`, if present.
    #[must_use]
    pub fn get(&self, ts: DateTime<Utc>) -> Option<&Candle> {
        self.position(ts).map(|i| &self.candles[i])
    }

    /// Closing price at exactly `ts`. Never nearest, never interpolated.
    #[must_use]
    pub fn close_at(&self, ts: DateTime<Utc>) -> Option<f64> {
        self.get(ts).map(|c| c.close)
    }

    /// Candles with `start <= t < end`.
    #[must_use]
    pub fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Candle] {
        let lo = self.candles.partition_point(|c| c.timestamp < start);
        let hi = self.candles.partition_point(|c| c.timestamp < end);
        if lo >= hi {
            return &[];
        }
        &self.candles[lo..hi]
    }

    /// Candles with `start <= t <= end`.
    #[must_use]
    pub fn range_inclusive(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[Candle] {
        let lo = self.candles.partition_point(|c| c.timestamp < start);
        let hi = self.candles.partition_point(|c| c.timestamp <= end);
        if lo >= hi {
            return &[];
        }
        &self.candles[lo..hi]
    }

    /// History up to and including `ts`.
    #[must_use]
    pub fn up_to(&self, ts: DateTime<Utc>) -> &[Candle] {
        let hi = self.candles.partition_point(|c| c.timestamp <= ts);
        &self.candles[..hi]
    }

    /// Appends candles that are strictly newer than the current tail.
    ///
    /// # Errors
    /// Returns an error if the extension would break strict ordering.
    pub fn extend(&mut self, more: impl IntoIterator<Item = Candle>) -> Result<()> {
        for candle in more {
            if let Some(last) = self.candles.last() {
                if candle.timestamp <= last.timestamp {
                    bail!(
                        "cannot append candle at {} after {}",
                        candle.timestamp,
                        last.timestamp
                    );
                }
            }
            self.candles.push(candle);
        }
        Ok(())
    }

    /// Duration between first and last candle.
    #[must_use]
    pub fn span(&self) -> Duration {
        match (self.first_timestamp(), self.last_timestamp()) {
            (Some(first), Some(last)) => last - first,
            _ => Duration::zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn candle(minute: i64, close: f64) -> Candle {
        Candle::new(ts(minute), close, close, close, close, 1.0)
    }

    // ============================================
    // Construction
    // ============================================

    #[test]
    fn test_new_rejects_non_increasing_timestamps() {
        let result = OhlcvSeries::new(vec![candle(1, 1.0), candle(1, 2.0)]);
        assert!(result.is_err());

        let result = OhlcvSeries::new(vec![candle(2, 1.0), candle(1, 2.0)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_accepts_gaps() {
        let series = OhlcvSeries::new(vec![candle(0, 1.0), candle(5, 2.0)]).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.span(), Duration::minutes(5));
    }

    #[test]
    fn test_from_unsorted_sorts_and_dedups() {
        let series = OhlcvSeries::from_unsorted(vec![candle(3, 3.0), candle(1, 1.0), candle(3, 9.0)]);
        assert_eq!(series.len(), 2);
        assert_eq!(series.first_timestamp(), Some(ts(1)));
        assert_eq!(series.last_timestamp(), Some(ts(3)));
    }

    // ============================================
    // Lookup
    // ============================================

    #[test]
    fn test_close_at_requires_exact_timestamp() {
        let series = OhlcvSeries::new(vec![candle(0, 10.0), candle(2, 12.0)]).unwrap();
        assert_eq!(series.close_at(ts(0)), Some(10.0));
        assert_eq!(series.close_at(ts(1)), None);
        assert_eq!(series.close_at(ts(2)), Some(12.0));
    }

    #[test]
    fn test_range_bounds() {
        let series = OhlcvSeries::new((0..10).map(|m| candle(m, m as f64)).collect()).unwrap();
        assert_eq!(series.range(ts(2), ts(5)).len(), 3);
        assert_eq!(series.range_inclusive(ts(2), ts(5)).len(), 4);
        assert_eq!(series.up_to(ts(4)).len(), 5);
        assert!(series.range(ts(5), ts(5)).is_empty());
        assert!(series.range(ts(20), ts(30)).is_empty());
    }

    // ============================================
    // Extend
    // ============================================

    #[test]
    fn test_extend_rejects_older_candles() {
        let mut series = OhlcvSeries::new(vec![candle(0, 1.0), candle(1, 1.0)]).unwrap();
        assert!(series.extend([candle(2, 1.0)]).is_ok());
        assert!(series.extend([candle(2, 1.0)]).is_err());
    }
}
