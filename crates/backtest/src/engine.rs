//! Parallel walk-forward backtest engine.
//!
//! Every fold builds its own strategy from the factory, fits it on the
//! trailing window and predicts one contract period at a time. Folds run on
//! a dedicated rayon pool and share only the read-only OHLCV series.

use btc_predictor_core::candle::position_of;
use btc_predictor_core::risk::{calculate_bet, RiskConfig};
use btc_predictor_core::{
    Candle, OhlcvSeries, SettlementCondition, SettlementError, SimulatedTrade, Strategy, Venue,
};
use chrono::Duration;
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::BacktestError;
use crate::walk_forward::{Fold, WalkForwardConfig};

/// Worker count for fold evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Concurrency {
    AllCores,
    #[default]
    AllButOne,
    Fixed(usize),
}

impl Concurrency {
    /// Parses the `n_jobs` convention: `-1` all cores, `-2` all but one,
    /// positive `n` a fixed pool.
    ///
    /// # Errors
    /// Returns [`BacktestError::InvalidConfig`] for zero or values below -2.
    pub fn from_n_jobs(n_jobs: i64) -> Result<Self, BacktestError> {
        match n_jobs {
            -1 => Ok(Self::AllCores),
            -2 => Ok(Self::AllButOne),
            n if n > 0 => usize::try_from(n)
                .map(Self::Fixed)
                .map_err(|_| BacktestError::InvalidConfig(format!("n_jobs {n} is too large"))),
            n => Err(BacktestError::InvalidConfig(format!(
                "n_jobs must be -1, -2 or positive, got {n}"
            ))),
        }
    }

    #[must_use]
    pub fn threads(self) -> usize {
        let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        match self {
            Self::AllCores => cores,
            Self::AllButOne => cores.saturating_sub(1).max(1),
            Self::Fixed(n) => n.max(1),
        }
    }
}

impl FromStr for Concurrency {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let n = s
            .trim()
            .parse::<i64>()
            .map_err(|_| BacktestError::InvalidConfig(format!("invalid n_jobs '{s}'")))?;
        Self::from_n_jobs(n)
    }
}

/// Everything a backtest run needs besides the strategy and the data.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub timeframe_minutes: u32,
    pub walk_forward: WalkForwardConfig,
    pub settlement_condition: SettlementCondition,
    pub payout_ratio: f64,
    pub concurrency: Concurrency,
    pub risk: RiskConfig,
}

impl BacktestConfig {
    /// Exchange-referenced settlement (`>`) with the default risk settings.
    #[must_use]
    pub fn new(timeframe_minutes: u32, train_days: u32, test_days: u32) -> Self {
        Self {
            timeframe_minutes,
            walk_forward: WalkForwardConfig::new(train_days, test_days),
            settlement_condition: SettlementCondition::Strict,
            payout_ratio: btc_predictor_core::config::DEFAULT_EVENT_CONTRACT_PAYOUT,
            concurrency: Concurrency::default(),
            risk: RiskConfig::default(),
        }
    }

    #[must_use]
    pub fn with_step_days(mut self, step_days: u32) -> Self {
        self.walk_forward = self.walk_forward.with_step_days(step_days);
        self
    }

    #[must_use]
    pub fn with_settlement(mut self, condition: SettlementCondition, payout_ratio: f64) -> Self {
        self.settlement_condition = condition;
        self.payout_ratio = payout_ratio;
        self
    }

    /// Settlement condition and payout for `venue`, taken from `app`.
    #[must_use]
    pub fn with_venue(self, venue: Venue, app: &btc_predictor_core::AppConfig) -> Self {
        let payout = app.payout_ratio(venue, self.timeframe_minutes);
        self.with_settlement(venue.settlement_condition(), payout)
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_risk(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    /// # Errors
    /// Returns [`BacktestError::InvalidConfig`] describing the first invalid
    /// field.
    pub fn validate(&self) -> Result<(), BacktestError> {
        if self.timeframe_minutes == 0 {
            return Err(BacktestError::InvalidConfig(
                "timeframe_minutes must be positive".into(),
            ));
        }
        if !(self.payout_ratio.is_finite() && self.payout_ratio >= 1.0) {
            return Err(BacktestError::InvalidConfig(format!(
                "payout_ratio must be at least 1.0, got {}",
                self.payout_ratio
            )));
        }
        self.walk_forward.validate()
    }
}

pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    /// # Errors
    /// Returns [`BacktestError::InvalidConfig`] if the configuration is
    /// invalid.
    pub fn new(config: BacktestConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Runs every fold and returns the settled trades sorted by `open_time`.
    ///
    /// An empty series or one too short for a single fold yields no trades.
    ///
    /// # Errors
    /// Returns the first strategy failure (in fold order) wrapped in
    /// [`BacktestError::Strategy`]. Partial results are discarded.
    pub fn run<F>(&self, factory: &F, series: &OhlcvSeries) -> Result<Vec<SimulatedTrade>, BacktestError>
    where
        F: Fn() -> Box<dyn Strategy> + Sync + ?Sized,
    {
        let (Some(first), Some(last)) = (series.first_timestamp(), series.last_timestamp()) else {
            info!("no OHLCV data, nothing to backtest");
            return Ok(Vec::new());
        };
        let folds = self.config.walk_forward.generate_folds(first, last);
        if folds.is_empty() {
            info!(
                %first,
                %last,
                train_days = self.config.walk_forward.train_days,
                "history shorter than the training window, no folds"
            );
            return Ok(Vec::new());
        }

        let threads = self.config.concurrency.threads();
        info!(
            folds = folds.len(),
            threads,
            timeframe = self.config.timeframe_minutes,
            condition = %self.config.settlement_condition,
            payout = self.config.payout_ratio,
            "starting walk-forward backtest"
        );

        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build()?;
        let per_fold: Vec<Result<Vec<SimulatedTrade>, BacktestError>> = pool.install(|| {
            folds
                .par_iter()
                .map(|fold| self.run_fold(factory, series, fold))
                .collect()
        });

        let mut trades = Vec::new();
        for fold_trades in per_fold {
            trades.extend(fold_trades?);
        }
        // stable: trades at equal open_time keep fold order
        trades.sort_by_key(SimulatedTrade::open_time);

        info!(trades = trades.len(), "backtest complete");
        Ok(trades)
    }

    fn run_fold<F>(
        &self,
        factory: &F,
        series: &OhlcvSeries,
        fold: &Fold,
    ) -> Result<Vec<SimulatedTrade>, BacktestError>
    where
        F: Fn() -> Box<dyn Strategy> + Sync + ?Sized,
    {
        let tf = self.config.timeframe_minutes;
        let fold_data = series.range_inclusive(fold.train_start, fold.end);
        let test_begin = fold_data.partition_point(|c| c.timestamp < fold.start);
        let test_end = fold_data.partition_point(|c| c.timestamp < fold.end);

        let mut strategy = factory();
        if strategy.requires_fitting() {
            strategy
                .fit(&fold_data[..test_begin], tf)
                .map_err(|source| BacktestError::Strategy {
                    fold: fold.index,
                    source,
                })?;
        }

        let stride = usize::try_from(tf).unwrap_or(usize::MAX).max(1);
        let mut trades = Vec::new();
        for i in (test_begin..test_end).step_by(stride) {
            if let Some(trade) = self.evaluate_point(strategy.as_ref(), fold_data, i, fold)? {
                trades.push(trade);
            }
        }

        debug!(
            fold = fold.index,
            start = %fold.start,
            end = %fold.end,
            candidates = (test_end - test_begin).div_ceil(stride),
            trades = trades.len(),
            "fold complete"
        );
        Ok(trades)
    }

    /// Predicts at row `i` of `fold_data` and settles the resulting trade.
    ///
    /// Returns `None` when the bet size is zero or the expiry row is missing.
    fn evaluate_point(
        &self,
        strategy: &dyn Strategy,
        fold_data: &[Candle],
        i: usize,
        fold: &Fold,
    ) -> Result<Option<SimulatedTrade>, BacktestError> {
        let tf = self.config.timeframe_minutes;
        let candle = &fold_data[i];
        let signal = strategy
            .predict(&fold_data[..=i], tf)
            .map_err(|source| BacktestError::Strategy {
                fold: fold.index,
                source,
            })?;

        let bet = calculate_bet(signal.confidence, tf, &self.config.risk);
        if bet <= Decimal::ZERO {
            return Ok(None);
        }

        let expiry = candle.timestamp + Duration::minutes(i64::from(tf));
        let Some(close_idx) = position_of(&fold_data[i + 1..], expiry) else {
            return Ok(None);
        };
        let close_price = fold_data[i + 1 + close_idx].close;

        let mut trade = SimulatedTrade::open(
            signal.strategy_name,
            signal.direction,
            signal.confidence,
            tf,
            bet,
            candle.timestamp,
            candle.close,
        );
        match trade.settle(
            close_price,
            self.config.settlement_condition,
            self.config.payout_ratio,
        ) {
            Ok(_) => Ok(Some(trade)),
            Err(SettlementError::NonFinitePrice(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Convenience wrapper around [`BacktestEngine`].
///
/// # Errors
/// See [`BacktestEngine::new`] and [`BacktestEngine::run`].
pub fn run_backtest<F>(
    factory: &F,
    series: &OhlcvSeries,
    config: BacktestConfig,
) -> Result<Vec<SimulatedTrade>, BacktestError>
where
    F: Fn() -> Box<dyn Strategy> + Sync + ?Sized,
{
    BacktestEngine::new(config)?.run(factory, series)
}
