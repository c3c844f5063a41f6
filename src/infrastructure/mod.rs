pub mod clock;
pub mod http_client;
pub mod memory_store;
pub mod parquet_store;
pub mod redis;

pub use clock::{ManualClock, SystemClock};
pub use http_client::HttpTransport;
pub use memory_store::MemoryStore;
pub use parquet_store::ParquetStore;
pub use self::redis::RedisRepository;
