use btc_predictor_core::SettlementError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("invalid backtest configuration: {0}")]
    InvalidConfig(String),

    #[error("strategy failed in fold {fold}: {source}")]
    Strategy {
        fold: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("settlement failed: {0}")]
    Settlement(#[from] SettlementError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
