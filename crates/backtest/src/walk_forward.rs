//! Walk-forward fold generation.
//!
//! Each fold pairs a test window `[start, end)` with the trailing training
//! window `[start - train, start)`. Folds are generated eagerly so they can be
//! evaluated in parallel.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BacktestError;

/// Window sizes for a walk-forward run, in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub train_days: u32,
    pub test_days: u32,
    /// Distance between consecutive fold starts. Defaults to `test_days`.
    pub step_days: u32,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self::new(60, 7)
    }
}

impl WalkForwardConfig {
    /// Contiguous, non-overlapping test windows.
    #[must_use]
    pub fn new(train_days: u32, test_days: u32) -> Self {
        Self {
            train_days,
            test_days,
            step_days: test_days,
        }
    }

    /// Sets a custom step. A step shorter than `test_days` overlaps test
    /// windows; a longer one leaves gaps.
    #[must_use]
    pub fn with_step_days(mut self, step_days: u32) -> Self {
        self.step_days = step_days;
        self
    }

    #[must_use]
    pub fn train_window(&self) -> Duration {
        Duration::days(i64::from(self.train_days))
    }

    #[must_use]
    pub fn test_window(&self) -> Duration {
        Duration::days(i64::from(self.test_days))
    }

    #[must_use]
    pub fn step(&self) -> Duration {
        Duration::days(i64::from(self.step_days))
    }

    /// # Errors
    /// Returns [`BacktestError::InvalidConfig`] if any window is zero.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.test_days == 0 {
            return Err(BacktestError::InvalidConfig("test_days must be positive".into()));
        }
        if self.step_days == 0 {
            return Err(BacktestError::InvalidConfig("step_days must be positive".into()));
        }
        Ok(())
    }

    /// Folds covering `[first + train, last)`.
    ///
    /// Returns no folds when the data does not extend past the first training
    /// window. The final fold is truncated at `last`.
    #[must_use]
    pub fn generate_folds(&self, first: DateTime<Utc>, last: DateTime<Utc>) -> Vec<Fold> {
        let start = first + self.train_window();
        let end = last;
        if start >= end || self.step_days == 0 || self.test_days == 0 {
            return Vec::new();
        }

        let mut folds = Vec::new();
        let mut current = start;
        while current < end {
            let fold_end = (current + self.test_window()).min(end);
            folds.push(Fold {
                index: folds.len(),
                train_start: current - self.train_window(),
                start: current,
                end: fold_end,
            });
            current += self.step();
        }
        folds
    }
}

/// One train/test split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub index: usize,
    pub train_start: DateTime<Utc>,
    /// Inclusive test start; also the exclusive end of training data.
    pub start: DateTime<Utc>,
    /// Exclusive test end.
    pub end: DateTime<Utc>,
}

impl Fold {
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::days(d)
    }

    #[test]
    fn test_contiguous_folds() {
        let config = WalkForwardConfig::new(30, 10);
        let folds = config.generate_folds(day(0), day(100));

        assert_eq!(folds.len(), 7);
        assert_eq!(folds[0].start, day(30));
        assert_eq!(folds[0].train_start, day(0));
        for pair in folds.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "test windows must be contiguous");
        }
        assert_eq!(folds.last().unwrap().end, day(100));
    }

    #[test]
    fn test_last_fold_is_truncated() {
        let config = WalkForwardConfig::new(10, 7);
        let folds = config.generate_folds(day(0), day(20));
        assert_eq!(folds.len(), 2);
        assert_eq!(folds[1].start, day(17));
        assert_eq!(folds[1].end, day(20));
    }

    #[test]
    fn test_no_folds_when_history_too_short() {
        let config = WalkForwardConfig::new(30, 7);
        assert!(config.generate_folds(day(0), day(30)).is_empty());
        assert!(config.generate_folds(day(0), day(10)).is_empty());
    }

    #[test]
    fn test_overlapping_step() {
        let config = WalkForwardConfig::new(10, 10).with_step_days(5);
        let folds = config.generate_folds(day(0), day(30));
        // starts at 10, 15, 20, 25
        assert_eq!(folds.len(), 4);
        assert!(folds[0].end > folds[1].start);
        assert_eq!(folds[3].end, day(30));
    }

    #[test]
    fn test_gapped_step() {
        let config = WalkForwardConfig::new(10, 5).with_step_days(10);
        let folds = config.generate_folds(day(0), day(40));
        assert_eq!(folds.len(), 3);
        assert!(folds[0].end < folds[1].start);
    }

    #[test]
    fn test_zero_step_is_invalid() {
        let config = WalkForwardConfig::new(10, 5).with_step_days(0);
        assert!(config.validate().is_err());
        assert!(config.generate_folds(day(0), day(40)).is_empty());
    }

    #[test]
    fn test_fold_contains_is_half_open() {
        let config = WalkForwardConfig::new(1, 1);
        let fold = config.generate_folds(day(0), day(5))[0];
        assert!(fold.contains(day(1)));
        assert!(!fold.contains(day(2)));
    }
}
