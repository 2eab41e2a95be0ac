//! Calibration and drift analysis over settled predictions.
//!
//! The threshold search sizes hypothetical bets with the same function the
//! live gate uses, so a recommended threshold reflects real bet sizes.

use btc_predictor_core::config::DEFAULT_EVENT_CONTRACT_PAYOUT;
use btc_predictor_core::risk::bet_for_threshold_f64;
use btc_predictor_core::{AppConfig, Direction, RiskControlConfig, SimulatedTrade, Venue};
use btc_predictor_data::StoredSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bin edges for calibration analysis. Narrow bins near 0.5 where most
/// signals land; the final edge admits a confidence of exactly 1.0.
pub const ANALYSIS_BIN_EDGES: [f64; 10] = [0.50, 0.52, 0.54, 0.56, 0.58, 0.60, 0.65, 0.70, 0.80, 1.01];

/// Accuracy slope (per window) beyond which drift is reported.
pub const DRIFT_SLOPE_THRESHOLD: f64 = 0.02;

/// One settled prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub confidence: f64,
    pub correct: bool,
}

impl CalibrationSample {
    /// `None` for pending trades.
    #[must_use]
    pub fn from_trade(trade: &SimulatedTrade) -> Option<Self> {
        trade.result().map(|result| Self {
            timestamp: trade.open_time(),
            direction: trade.direction(),
            confidence: trade.confidence(),
            correct: result.is_win(),
        })
    }

    /// `None` for signals that have not been settled yet.
    #[must_use]
    pub fn from_stored_signal(stored: &StoredSignal) -> Option<Self> {
        stored.is_correct.map(|correct| Self {
            timestamp: stored.signal.timestamp,
            direction: stored.signal.direction,
            confidence: stored.signal.confidence,
            correct,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalysisParams {
    pub min_bet: f64,
    pub max_bet: f64,
    pub payout_ratio: f64,
    /// Threshold the live gate currently uses; reported next to the best one.
    pub current_threshold: Option<f64>,
    /// Thresholds with fewer qualifying samples are never recommended.
    pub min_samples: usize,
    pub drift_window: usize,
    pub drift_step: usize,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        let limits = RiskControlConfig::default();
        Self {
            min_bet: limits.min_bet(),
            max_bet: limits.max_bet(),
            payout_ratio: DEFAULT_EVENT_CONTRACT_PAYOUT,
            current_threshold: None,
            min_samples: 10,
            drift_window: 30,
            drift_step: 10,
        }
    }
}

impl AnalysisParams {
    /// Bet range, payout and current threshold as the live gate sees them for
    /// `venue` at `timeframe_minutes`.
    #[must_use]
    pub fn from_config(config: &AppConfig, venue: Venue, timeframe_minutes: u32) -> Self {
        let limits = &config.risk_control;
        Self {
            min_bet: limits.min_bet(),
            max_bet: limits.max_bet(),
            payout_ratio: config.payout_ratio(venue, timeframe_minutes),
            current_threshold: Some(config.confidence_threshold(timeframe_minutes)),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub accuracy: f64,
    pub mean_confidence: f64,
}

impl CalibrationBin {
    /// Realized accuracy minus predicted confidence.
    #[must_use]
    pub fn gap(&self) -> f64 {
        self.accuracy - self.mean_confidence
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub threshold: f64,
    pub count: usize,
    pub accuracy: f64,
    pub avg_bet: f64,
    pub expected_pnl_per_trade: f64,
    pub trades_per_day: f64,
    pub expected_pnl_per_day: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftTrend {
    Declining,
    Stable,
    Improving,
    /// Fewer than two windows.
    Insufficient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowAccuracy {
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub count: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub windows: Vec<WindowAccuracy>,
    /// Fitted change in accuracy per window.
    pub slope: f64,
    pub trend: DriftTrend,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakAccuracy {
    /// Position within a run of same-direction signals.
    pub n: usize,
    pub count: usize,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub baseline_accuracy: f64,
    pub by_streak: Vec<StreakAccuracy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub total: usize,
    pub accuracy: f64,
    pub ece: f64,
    pub bins: Vec<CalibrationBin>,
    pub thresholds: Vec<ThresholdRow>,
    pub best_threshold: Option<ThresholdRow>,
    #[serde(default)]
    pub current_threshold: Option<ThresholdRow>,
    pub drift: DriftReport,
    pub consistency: ConsistencyReport,
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// Groups samples into `[edges[i], edges[i+1])` bins, omitting empty ones.
#[must_use]
pub fn calibration_bins(samples: &[CalibrationSample], edges: &[f64]) -> Vec<CalibrationBin> {
    edges
        .windows(2)
        .filter_map(|edge| {
            let (lower, upper) = (edge[0], edge[1]);
            let in_bin: Vec<&CalibrationSample> = samples
                .iter()
                .filter(|s| s.confidence >= lower && s.confidence < upper)
                .collect();
            if in_bin.is_empty() {
                return None;
            }
            let correct = in_bin.iter().filter(|s| s.correct).count();
            Some(CalibrationBin {
                lower,
                upper,
                count: in_bin.len(),
                accuracy: ratio(correct, in_bin.len()),
                mean_confidence: mean(in_bin.iter().map(|s| s.confidence)),
            })
        })
        .collect()
}

/// `sum(count / total * |accuracy - mean_confidence|)` over bins.
#[must_use]
pub fn expected_calibration_error(bins: &[CalibrationBin]) -> f64 {
    let total: usize = bins.iter().map(|b| b.count).sum();
    if total == 0 {
        return 0.0;
    }
    bins.iter()
        .map(|b| ratio(b.count, total) * b.gap().abs())
        .sum()
}

/// Thresholds from 0.50 to 0.70 in steps of 0.01.
#[must_use]
pub fn default_threshold_grid() -> Vec<f64> {
    (50..=70).map(|i| f64::from(i) / 100.0).collect()
}

/// Evaluates "only trade signals at or above `t`" for each threshold.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn threshold_analysis(
    samples: &[CalibrationSample],
    thresholds: &[f64],
    params: &AnalysisParams,
) -> Vec<ThresholdRow> {
    let span_days = sample_span_days(samples);
    thresholds
        .iter()
        .map(|&threshold| {
            let taken: Vec<&CalibrationSample> =
                samples.iter().filter(|s| s.confidence >= threshold).collect();
            let correct = taken.iter().filter(|s| s.correct).count();
            let accuracy = ratio(correct, taken.len());
            let avg_bet = mean(taken.iter().map(|s| {
                bet_for_threshold_f64(s.confidence, threshold, params.min_bet, params.max_bet)
            }));
            let expected_pnl_per_trade = if taken.is_empty() {
                0.0
            } else {
                avg_bet * (accuracy * params.payout_ratio - 1.0)
            };
            let trades_per_day = taken.len() as f64 / span_days;
            ThresholdRow {
                threshold,
                count: taken.len(),
                accuracy,
                avg_bet,
                expected_pnl_per_trade,
                trades_per_day,
                expected_pnl_per_day: expected_pnl_per_trade * trades_per_day,
            }
        })
        .collect()
}

/// Threshold with the highest expected PnL per day among rows with at least
/// `min_samples` trades.
#[must_use]
pub fn best_threshold(rows: &[ThresholdRow], min_samples: usize) -> Option<&ThresholdRow> {
    rows.iter()
        .filter(|r| r.count >= min_samples)
        .max_by(|a, b| a.expected_pnl_per_day.total_cmp(&b.expected_pnl_per_day))
}

/// Time covered by `samples` in days, never below 0.1.
#[allow(clippy::cast_precision_loss)]
fn sample_span_days(samples: &[CalibrationSample]) -> f64 {
    let first = samples.iter().map(|s| s.timestamp).min();
    let last = samples.iter().map(|s| s.timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => ((last - first).num_seconds() as f64 / 86_400.0).max(0.1),
        _ => 0.1,
    }
}

/// Rolling-window accuracy with a least-squares trend.
///
/// `samples` must be in time order.
#[must_use]
pub fn detect_drift(samples: &[CalibrationSample], window: usize, step: usize) -> DriftReport {
    let window = window.max(1);
    let step = step.max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    while start + window <= samples.len() {
        let slice = &samples[start..start + window];
        windows.push(WindowAccuracy {
            index: windows.len(),
            start: slice[0].timestamp,
            end: slice[slice.len() - 1].timestamp,
            count: slice.len(),
            accuracy: ratio(slice.iter().filter(|s| s.correct).count(), slice.len()),
        });
        start += step;
    }

    if windows.len() < 2 {
        return DriftReport {
            windows,
            slope: 0.0,
            trend: DriftTrend::Insufficient,
        };
    }

    #[allow(clippy::cast_precision_loss)]
    let points: Vec<(f64, f64)> = windows
        .iter()
        .map(|w| (w.index as f64, w.accuracy))
        .collect();
    let slope = linear_slope(&points);
    let trend = if slope < -DRIFT_SLOPE_THRESHOLD {
        DriftTrend::Declining
    } else if slope > DRIFT_SLOPE_THRESHOLD {
        DriftTrend::Improving
    } else {
        DriftTrend::Stable
    };
    DriftReport {
        windows,
        slope,
        trend,
    }
}

/// Ordinary least-squares slope of `y` on `x`.
#[must_use]
pub fn linear_slope(points: &[(f64, f64)]) -> f64 {
    let x_mean = mean(points.iter().map(|p| p.0));
    let y_mean = mean(points.iter().map(|p| p.1));
    let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), &(x, y)| {
        (num + (x - x_mean) * (y - y_mean), den + (x - x_mean).powi(2))
    });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Accuracy of signals by their position in a run of same-direction
/// signals, for positions `2..=max_n`. `samples` must be in time order.
#[must_use]
pub fn consecutive_consistency(samples: &[CalibrationSample], max_n: usize) -> ConsistencyReport {
    let mut streaks = Vec::with_capacity(samples.len());
    let mut previous: Option<Direction> = None;
    let mut run = 0usize;
    for sample in samples {
        run = if previous == Some(sample.direction) { run + 1 } else { 1 };
        previous = Some(sample.direction);
        streaks.push(run);
    }

    let by_streak = (2..=max_n)
        .map(|n| {
            let at_n: Vec<&CalibrationSample> = samples
                .iter()
                .zip(&streaks)
                .filter(|(_, s)| **s == n)
                .map(|(sample, _)| sample)
                .collect();
            StreakAccuracy {
                n,
                count: at_n.len(),
                accuracy: ratio(at_n.iter().filter(|s| s.correct).count(), at_n.len()),
            }
        })
        .collect();

    ConsistencyReport {
        baseline_accuracy: ratio(samples.iter().filter(|s| s.correct).count(), samples.len()),
        by_streak,
    }
}

/// Full analysis. Samples are sorted by time first.
#[must_use]
pub fn analyze(samples: &[CalibrationSample], params: &AnalysisParams) -> CalibrationReport {
    let mut ordered = samples.to_vec();
    ordered.sort_by_key(|s| s.timestamp);

    let bins = calibration_bins(&ordered, &ANALYSIS_BIN_EDGES);
    let thresholds = threshold_analysis(&ordered, &default_threshold_grid(), params);
    let best = best_threshold(&thresholds, params.min_samples).cloned();
    let current = params
        .current_threshold
        .and_then(|t| threshold_analysis(&ordered, &[t], params).pop());

    CalibrationReport {
        total: ordered.len(),
        accuracy: ratio(ordered.iter().filter(|s| s.correct).count(), ordered.len()),
        ece: expected_calibration_error(&bins),
        bins,
        thresholds,
        best_threshold: best,
        current_threshold: current,
        drift: detect_drift(&ordered, params.drift_window, params.drift_step),
        consistency: consecutive_consistency(&ordered, 5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(hours: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap() + Duration::hours(hours)
    }

    fn sample(hour: i64, direction: Direction, confidence: f64, correct: bool) -> CalibrationSample {
        CalibrationSample {
            timestamp: ts(hour),
            direction,
            confidence,
            correct,
        }
    }

    // ============================================
    // ECE
    // ============================================

    #[test]
    fn test_perfectly_calibrated_bin_has_zero_ece() {
        // 0.75 confidence, 3 of 4 correct
        let samples: Vec<_> = (0..4)
            .map(|i| sample(i, Direction::Higher, 0.75, i != 0))
            .collect();
        let bins = calibration_bins(&samples, &ANALYSIS_BIN_EDGES);
        assert_eq!(bins.len(), 1);
        assert!(expected_calibration_error(&bins).abs() < 1e-12);
    }

    #[test]
    fn test_ece_weights_bins_by_count() {
        let samples = vec![
            sample(0, Direction::Higher, 0.51, true),
            sample(1, Direction::Higher, 0.51, true),
            sample(2, Direction::Higher, 0.90, false),
            sample(3, Direction::Higher, 0.90, false),
        ];
        let bins = calibration_bins(&samples, &ANALYSIS_BIN_EDGES);
        assert_eq!(bins.len(), 2);
        // 0.5 * |1.0 - 0.51| + 0.5 * |0.0 - 0.90|
        let expected = 0.5 * 0.49 + 0.5 * 0.90;
        assert!((expected_calibration_error(&bins) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_confidence_one_lands_in_last_bin() {
        let samples = vec![sample(0, Direction::Higher, 1.0, true)];
        let bins = calibration_bins(&samples, &ANALYSIS_BIN_EDGES);
        assert_eq!(bins.len(), 1);
        assert!((bins[0].lower - 0.80).abs() < 1e-12);
    }

    // ============================================
    // Threshold Search
    // ============================================

    #[test]
    fn test_threshold_grid() {
        let grid = default_threshold_grid();
        assert_eq!(grid.len(), 21);
        assert!((grid[0] - 0.50).abs() < 1e-12);
        assert!((grid[20] - 0.70).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_row_uses_live_bet_sizing() {
        // two samples over one day, both at 0.6 and correct
        let samples = vec![
            sample(0, Direction::Higher, 0.6, true),
            sample(24, Direction::Higher, 0.6, true),
        ];
        let params = AnalysisParams::default();
        let rows = threshold_analysis(&samples, &[0.6, 0.65], &params);

        let at = &rows[0];
        assert_eq!(at.count, 2);
        assert!((at.avg_bet - 5.0).abs() < 1e-12);
        assert!((at.expected_pnl_per_trade - 5.0 * (1.85 - 1.0)).abs() < 1e-9);
        assert!((at.trades_per_day - 2.0).abs() < 1e-12);

        assert_eq!(rows[1].count, 0);
        assert_eq!(rows[1].expected_pnl_per_day, 0.0);
    }

    #[test]
    fn test_best_threshold_respects_min_samples() {
        let mut samples: Vec<_> = (0..20)
            .map(|i| sample(i, Direction::Higher, 0.55, i % 2 == 0))
            .collect();
        // a few very accurate high-confidence signals
        samples.extend((20..23).map(|i| sample(i, Direction::Higher, 0.69, true)));

        let params = AnalysisParams {
            min_samples: 10,
            ..AnalysisParams::default()
        };
        let rows = threshold_analysis(&samples, &default_threshold_grid(), &params);
        let best = best_threshold(&rows, params.min_samples).unwrap();
        assert!(best.count >= 10);

        let loose = best_threshold(&rows, 1).unwrap();
        assert!(loose.threshold > 0.55);
    }

    #[test]
    fn test_params_follow_configured_bet_range_and_payout() {
        let mut config = AppConfig::default();
        config.risk_control.bet_range = [10.0, 40.0];
        let params = AnalysisParams::from_config(&config, Venue::Binance, 10);
        assert_eq!(params.min_bet, 10.0);
        assert_eq!(params.max_bet, 40.0);
        assert!((params.payout_ratio - 1.80).abs() < 1e-12);
        assert_eq!(params.current_threshold, Some(0.606));

        // every signal sits exactly on the live threshold, so each bet is the minimum
        let samples: Vec<_> = (0..12)
            .map(|i| sample(i, Direction::Higher, 0.606, i % 3 != 0))
            .collect();
        let report = analyze(&samples, &params);
        let current = report.current_threshold.unwrap();
        assert!((current.threshold - 0.606).abs() < 1e-12);
        assert_eq!(current.count, 12);
        assert!((current.avg_bet - 10.0).abs() < 1e-9);

        let at_60 = report
            .thresholds
            .iter()
            .find(|r| (r.threshold - 0.60).abs() < 1e-9)
            .unwrap();
        assert!(at_60.avg_bet > 10.0 && at_60.avg_bet < 40.0);
    }

    #[test]
    fn test_current_threshold_absent_without_config() {
        let samples: Vec<_> = (0..5).map(|i| sample(i, Direction::Lower, 0.7, true)).collect();
        let report = analyze(&samples, &AnalysisParams::default());
        assert!(report.current_threshold.is_none());
    }

    #[test]
    fn test_sample_from_stored_signal() {
        use btc_predictor_core::PredictionSignal;

        let signal = PredictionSignal::new("s", ts(3), 10, Direction::Lower, 0.64, 100.0).unwrap();
        let mut stored = StoredSignal::new(signal);
        assert!(CalibrationSample::from_stored_signal(&stored).is_none());

        stored.is_correct = Some(false);
        let sample = CalibrationSample::from_stored_signal(&stored).unwrap();
        assert_eq!(sample.timestamp, ts(3));
        assert_eq!(sample.direction, Direction::Lower);
        assert!(!sample.correct);
    }

    // ============================================
    // Drift
    // ============================================

    #[test]
    fn test_declining_accuracy_detected() {
        // accuracy falls from 100% to 0% over 60 samples
        let samples: Vec<_> = (0..60)
            .map(|i| sample(i, Direction::Higher, 0.7, i < 30))
            .collect();
        let report = detect_drift(&samples, 30, 10);
        assert_eq!(report.windows.len(), 4);
        assert_eq!(report.trend, DriftTrend::Declining);
        assert!(report.slope < 0.0);
    }

    #[test]
    fn test_flat_accuracy_is_stable() {
        let samples: Vec<_> = (0..60)
            .map(|i| sample(i, Direction::Higher, 0.7, i % 2 == 0))
            .collect();
        let report = detect_drift(&samples, 30, 10);
        assert_eq!(report.trend, DriftTrend::Stable);
    }

    #[test]
    fn test_too_few_samples_is_insufficient() {
        let samples: Vec<_> = (0..35)
            .map(|i| sample(i, Direction::Higher, 0.7, true))
            .collect();
        let report = detect_drift(&samples, 30, 10);
        assert_eq!(report.windows.len(), 1);
        assert_eq!(report.trend, DriftTrend::Insufficient);
    }

    #[test]
    fn test_linear_slope() {
        let slope = linear_slope(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]);
        assert!((slope - 2.0).abs() < 1e-12);
        assert_eq!(linear_slope(&[(1.0, 1.0)]), 0.0);
    }

    // ============================================
    // Consistency
    // ============================================

    #[test]
    fn test_streak_positions() {
        use Direction::{Higher as H, Lower as L};
        let samples = vec![
            sample(0, H, 0.7, false),
            sample(1, H, 0.7, true),
            sample(2, H, 0.7, true),
            sample(3, L, 0.7, false),
            sample(4, L, 0.7, true),
        ];
        let report = consecutive_consistency(&samples, 5);
        assert!((report.baseline_accuracy - 0.6).abs() < 1e-12);

        let second = &report.by_streak[0];
        assert_eq!(second.n, 2);
        assert_eq!(second.count, 2);
        assert!((second.accuracy - 1.0).abs() < 1e-12);

        let third = &report.by_streak[1];
        assert_eq!(third.count, 1);
        assert_eq!(report.by_streak[3].count, 0);
    }

    #[test]
    fn test_analyze_sorts_and_combines() {
        let samples: Vec<_> = (0..40)
            .rev()
            .map(|i| sample(i, Direction::Higher, 0.62, i % 4 != 0))
            .collect();
        let report = analyze(&samples, &AnalysisParams::default());
        assert_eq!(report.total, 40);
        assert!((report.accuracy - 0.75).abs() < 1e-12);
        assert_eq!(report.drift.windows.len(), 2);
        assert!(report.best_threshold.is_some());
    }
}
