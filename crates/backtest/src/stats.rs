//! Summary statistics over settled trades.
//!
//! Every float in [`BacktestStats`] is finite so the struct serializes to
//! plain JSON. Subsets with no trades report 0.0.

use btc_predictor_core::{Direction, SimulatedTrade};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Confidence buckets, left-closed. The last bucket includes 1.0.
pub const CALIBRATION_BUCKETS: [(f64, f64); 5] =
    [(0.5, 0.6), (0.6, 0.7), (0.7, 0.8), (0.8, 0.9), (0.9, 1.0)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub label: String,
    pub lower: f64,
    pub upper: f64,
    pub win_rate: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldStats {
    pub fold: usize,
    pub trades: usize,
    pub wins: usize,
    pub da: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BacktestStats {
    pub total_trades: usize,
    pub wins: usize,
    pub higher_trades: usize,
    pub lower_trades: usize,
    pub total_da: f64,
    pub higher_da: f64,
    pub lower_da: f64,
    pub inverted_da: f64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_pnl: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub mdd: Decimal,
    pub sharpe: f64,
    pub max_consecutive_losses: u32,
    pub calibration: Vec<CalibrationBucket>,
    pub cumulative_pnl: Vec<f64>,
    pub per_fold_da: Vec<f64>,
    pub per_fold: Vec<FoldStats>,
    pub fold_sigma: f64,
    pub worst_fold_da: f64,
    pub trimmed_mean_da: f64,
}

impl BacktestStats {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_trades == 0
    }
}

/// Computes statistics over the settled trades in `trades`, in the given
/// order. Pending trades are ignored.
///
/// `test_days` must match the engine's test window so per-fold figures line
/// up with the folds that produced them.
#[must_use]
pub fn calculate_backtest_stats(trades: &[SimulatedTrade], test_days: u32) -> BacktestStats {
    let settled: Vec<&SimulatedTrade> = trades.iter().filter(|t| !t.is_pending()).collect();
    if settled.is_empty() {
        return BacktestStats::default();
    }

    let total_trades = settled.len();
    let wins = settled.iter().filter(|t| t.is_win()).count();
    let (higher_trades, higher_wins) = direction_counts(&settled, Direction::Higher);
    let (lower_trades, lower_wins) = direction_counts(&settled, Direction::Lower);
    let total_da = ratio(wins, total_trades);

    let pnl: Vec<Decimal> = settled.iter().map(|t| t.pnl().unwrap_or_default()).collect();
    let cumulative = cumulative_sum(&pnl);
    let total_pnl = cumulative.last().copied().unwrap_or_default();

    let per_fold = per_fold_stats(&settled, test_days);
    let per_fold_da: Vec<f64> = per_fold.iter().map(|f| f.da).collect();
    let (fold_sigma, worst_fold_da, trimmed_mean_da) = fold_robustness(&per_fold_da);

    BacktestStats {
        total_trades,
        wins,
        higher_trades,
        lower_trades,
        total_da,
        higher_da: ratio(higher_wins, higher_trades),
        lower_da: ratio(lower_wins, lower_trades),
        inverted_da: 1.0 - total_da,
        total_pnl,
        mdd: max_drawdown(&cumulative),
        sharpe: sharpe_ratio(&pnl),
        max_consecutive_losses: max_consecutive_losses(settled.iter().map(|t| t.is_win())),
        calibration: calibration_table(&settled),
        cumulative_pnl: cumulative.iter().map(|d| d.to_f64().unwrap_or(0.0)).collect(),
        per_fold_da,
        per_fold,
        fold_sigma,
        worst_fold_da,
        trimmed_mean_da,
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn direction_counts(trades: &[&SimulatedTrade], direction: Direction) -> (usize, usize) {
    trades
        .iter()
        .filter(|t| t.direction() == direction)
        .fold((0, 0), |(n, w), t| (n + 1, w + usize::from(t.is_win())))
}

#[must_use]
pub fn cumulative_sum(pnl: &[Decimal]) -> Vec<Decimal> {
    pnl.iter()
        .scan(Decimal::ZERO, |acc, p| {
            *acc += *p;
            Some(*acc)
        })
        .collect()
}

/// Largest peak-to-trough fall of a cumulative PnL curve.
///
/// The peak starts at the first point, so a curve that only falls from its
/// first value reports that fall.
#[must_use]
pub fn max_drawdown(cumulative: &[Decimal]) -> Decimal {
    let Some(&first) = cumulative.first() else {
        return Decimal::ZERO;
    };
    let mut peak = first;
    let mut max_dd = Decimal::ZERO;
    for &equity in cumulative {
        if equity > peak {
            peak = equity;
        }
        let drawdown = peak - equity;
        if drawdown > max_dd {
            max_dd = drawdown;
        }
    }
    max_dd
}

/// Trade-level Sharpe: mean over sample standard deviation. Not annualized.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sharpe_ratio(pnl: &[Decimal]) -> f64 {
    if pnl.len() < 2 {
        return 0.0;
    }
    let values: Vec<f64> = pnl.iter().map(|p| p.to_f64().unwrap_or(0.0)).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std == 0.0 || !std.is_finite() {
        0.0
    } else {
        mean / std
    }
}

/// Longest run of losses in order.
pub fn max_consecutive_losses(outcomes: impl IntoIterator<Item = bool>) -> u32 {
    let mut current_streak = 0u32;
    let mut max_streak = 0u32;
    for won in outcomes {
        if won {
            current_streak = 0;
        } else {
            current_streak += 1;
            max_streak = max_streak.max(current_streak);
        }
    }
    max_streak
}

fn bucket_label(lower: f64, upper: f64, last: bool) -> String {
    if last {
        format!("[{lower:.1}, {upper:.1}]")
    } else {
        format!("[{lower:.1}, {upper:.1})")
    }
}

fn calibration_table(trades: &[&SimulatedTrade]) -> Vec<CalibrationBucket> {
    let last = CALIBRATION_BUCKETS.len() - 1;
    CALIBRATION_BUCKETS
        .iter()
        .enumerate()
        .filter_map(|(i, &(lower, upper))| {
            let in_bucket: Vec<&&SimulatedTrade> = trades
                .iter()
                .filter(|t| {
                    let c = t.confidence();
                    c >= lower && (c < upper || (i == last && c <= upper))
                })
                .collect();
            if in_bucket.is_empty() {
                return None;
            }
            let wins = in_bucket.iter().filter(|t| t.is_win()).count();
            Some(CalibrationBucket {
                label: bucket_label(lower, upper, i == last),
                lower,
                upper,
                win_rate: ratio(wins, in_bucket.len()),
                count: in_bucket.len(),
            })
        })
        .collect()
}

/// Assigns trades to `floor((open_time - first_open) / test_days)` and
/// reports each non-empty fold in index order.
fn per_fold_stats(trades: &[&SimulatedTrade], test_days: u32) -> Vec<FoldStats> {
    let Some(first) = trades.iter().map(|t| t.open_time()).min() else {
        return Vec::new();
    };
    let width = i64::from(test_days.max(1)) * 86_400;

    let mut folds: std::collections::BTreeMap<usize, (usize, usize)> =
        std::collections::BTreeMap::new();
    for trade in trades {
        let offset = (trade.open_time() - first).num_seconds();
        let index = usize::try_from(offset / width).unwrap_or(0);
        let entry = folds.entry(index).or_default();
        entry.0 += 1;
        entry.1 += usize::from(trade.is_win());
    }

    folds
        .into_iter()
        .map(|(fold, (trades, wins))| FoldStats {
            fold,
            trades,
            wins,
            da: ratio(wins, trades),
        })
        .collect()
}

/// `(population std, minimum, trimmed mean)` of per-fold accuracies.
///
/// The trimmed mean drops one best and one worst fold when there are at
/// least three folds.
#[allow(clippy::cast_precision_loss)]
fn fold_robustness(das: &[f64]) -> (f64, f64, f64) {
    if das.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = das.len() as f64;
    let mean = das.iter().sum::<f64>() / n;
    let sigma = (das.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n).sqrt();
    let worst = das.iter().copied().fold(f64::INFINITY, f64::min);

    let trimmed = if das.len() >= 3 {
        let mut sorted = das.to_vec();
        sorted.sort_by(f64::total_cmp);
        let inner = &sorted[1..sorted.len() - 1];
        inner.iter().sum::<f64>() / inner.len() as f64
    } else {
        mean
    };
    (sigma, worst, trimmed)
}
