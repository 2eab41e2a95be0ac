pub mod csv_storage;
pub mod database;
pub mod memory;
pub mod store;

pub use csv_storage::{read_ohlcv_csv, write_ohlcv_csv};
pub use database::PgStore;
pub use memory::MemoryStore;
pub use store::{daily_stats_from_trades, ActualDirection, DataStore, StoredSignal};
