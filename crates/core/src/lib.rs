pub mod candle;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod labeling;
pub mod risk;
pub mod signal;
pub mod trade;
pub mod traits;

pub use candle::{Candle, OhlcvSeries, PriceColumn};
pub use config::{
    AppConfig, DatabaseConfig, EventContractConfig, PolymarketConfig, RiskControlConfig,
    TimeframeTable,
};
pub use config_loader::ConfigLoader;
pub use error::{SettlementError, StrategyError};
pub use labeling::{add_direction_labels, calculate_single_label};
pub use risk::{calculate_bet, should_trade, DailyStats, RiskConfig};
pub use signal::{Direction, FeaturesUsed, PredictionSignal, SUPPORTED_TIMEFRAMES};
pub use trade::{SettlementCondition, SimulatedTrade, TradeRecord, TradeResult, Venue};
pub use traits::{Strategy, StrategyFactory};
