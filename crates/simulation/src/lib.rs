pub mod processor;
pub mod settler;

pub use processor::process_signal;
pub use settler::{
    settle_pending_signals, settle_pending_trades, SettlementSummary,
    DEFAULT_SIGNAL_MAX_AGE_HOURS, PRICE_INTERVAL, PRICE_SYMBOL,
};
