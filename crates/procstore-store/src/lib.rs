// ABOUTME: Persistence layer for procstore, backed by embedded SQLite.
// ABOUTME: Provides the error dedup store, the sequenced log store, retry policy, and the manager facade.

pub mod config;
pub mod connection;
pub mod error;
pub mod error_store;
pub mod log_store;
pub mod manager;
pub mod retry;
pub mod transaction;

pub use config::{ConfigError, StoreConfig};
pub use connection::{ConnectionOwnership, SharedConnection, open_connection, resolve_store_path};
pub use error::{StorageError, StorageResult};
pub use error_store::ErrorStorage;
pub use log_store::LogStorage;
pub use manager::{RetentionReport, StorageManager};
pub use retry::{RetryPolicy, guard};
pub use transaction::StoreTransaction;
