//! Storage backends for the kurz URL shortener.
//!
//! Two implementations of the [`Storage`] contract live here: an in-memory
//! backend with an optional newline-delimited JSON append log for
//! single-process durability, and a Postgres backend with ACID semantics and
//! soft delete. The asynchronous delete-worker pool that drains deletion
//! jobs into either backend is in [`worker`].

pub mod log;
pub mod memory;
pub mod postgres;
pub mod worker;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use worker::{spawn_delete_pool, DeletePool, DeleteQueue, DELETE_WORKER_COUNT};

use kurz_core::{Result, Storage};
use std::sync::Arc;
use tracing::warn;

/// Selects a backend from the configuration.
///
/// A blank DSN selects the in-memory backend. When the DSN is set but
/// Postgres cannot be reached or bootstrapped, the service degrades to the
/// in-memory backend rather than refusing to start.
pub async fn connect(database_dsn: &str, file_storage_path: &str) -> Result<Arc<dyn Storage>> {
    if database_dsn.trim().is_empty() {
        return Ok(Arc::new(MemoryStorage::open(file_storage_path)?));
    }

    match PostgresStorage::connect(database_dsn).await {
        Ok(storage) => Ok(Arc::new(storage)),
        Err(err) => {
            warn!(%err, "postgres unavailable, falling back to in-memory storage");
            Ok(Arc::new(MemoryStorage::open(file_storage_path)?))
        }
    }
}
