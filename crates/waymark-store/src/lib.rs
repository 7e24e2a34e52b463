//! Waymark Store - Local state persistence
//!
//! SQLite-based storage for:
//! - Reminders and their geofences
//! - The durable trigger delivery queue
//! - Sync cursor watermarks
//!
//! ## Architecture
//!
//! This crate implements the `IReminderStore` and `ITriggerQueue` ports
//! from `waymark-core` using SQLite as the storage backend. It is a driven
//! (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteStore`] - Implementation of both ports over one database,
//!   plus the in-memory grid index behind the spatial candidate query
//! - [`GridIndex`] - Cell-based candidate lookup for geofences
//! - [`StoreError`] - Error types for storage operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use waymark_store::{DatabasePool, SqliteStore};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/waymark/waymark.db")).await?;
//! let store = SqliteStore::open(pool.pool().clone(), 1000).await?;
//! // Use store as IReminderStore / ITriggerQueue...
//! # Ok(())
//! # }
//! ```

pub mod grid;
pub mod pool;
pub mod repository;
pub mod trigger_queue;

pub use grid::GridIndex;
pub use pool::DatabasePool;
pub use repository::SqliteStore;

/// Errors that can occur during storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Serialization or deserialization of domain types failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// No row exists for the requested id
    #[error("Not found: {0}")]
    NotFound(String),

    /// The database failed its integrity check
    #[error("Storage corrupted: {0}")]
    Corrupted(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::QueryFailed(e.to_string())
    }
}
