use thiserror::Error;
use uuid::Uuid;

/// Failures a strategy raises from `fit` or `predict`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("strategy '{strategy}' has no fitted model for {timeframe}m")]
    NotFitted { strategy: String, timeframe: u32 },

    #[error("strategy '{strategy}' does not support {timeframe}m")]
    UnsupportedTimeframe { strategy: String, timeframe: u32 },

    #[error("insufficient data: need at least {required} rows, got {available}")]
    InsufficientData { required: usize, available: usize },
}

/// Failures moving a trade from pending to settled.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettlementError {
    #[error("trade {0} is already settled")]
    AlreadySettled(Uuid),

    #[error("close price must be finite, got {0}")]
    NonFinitePrice(f64),

    #[error("payout ratio {0} cannot be represented as a decimal")]
    InvalidPayout(f64),

    #[error("trade record is inconsistent: {0}")]
    InconsistentRecord(String),
}
