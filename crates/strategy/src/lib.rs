pub mod base_rate;
pub mod ma_crossover;
pub mod registry;

pub use base_rate::BaseRateStrategy;
pub use ma_crossover::{MaCrossoverParams, MaCrossoverStrategy};
pub use registry::StrategyRegistry;
