pub mod assemble;
pub mod checkpoint;
mod config;
mod crawler;
pub mod errors;
mod fetch;
mod limiter;
pub mod prefixes;
mod record;
pub mod registry;
pub mod store;

pub use assemble::{Assemble, Assembly, EntityAssembler};
pub use checkpoint::{CheckpointRecord, CheckpointStore, JsonCheckpointStore, MemoryCheckpointStore};
pub use config::{CrawlerConfig, OnError, RegistryConfig, RequestConfig, RetryPolicy};
pub use crawler::{filter_recent, CrawlOutcome, CrawlState, CrawlStats, Crawler};
pub use errors::{ErrorCounter, FileErrorCounter, MemoryErrorCounter};
pub use fetch::{parse_body, FetchClient, FetchError};
pub use limiter::FetchLimiter;
pub use prefixes::PrefixSpace;
pub use record::{Address, EntityRecord, RawEntity};
pub use store::{EntityStore, MemoryEntityStore, PersistOutcome};

pub use anyhow;
pub use tokio_util::sync::CancellationToken;
