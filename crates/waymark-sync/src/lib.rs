//! Waymark Sync - Multi-device synchronization engine
//!
//! Provides:
//! - Cursor-based incremental pull from the account's remote store
//! - Revision-checked optimistic push with bounded concurrency
//! - Last-writer-wins merge resolution with surfaced losers
//! - Debounced scheduling of sync cycles after local edits
//!
//! ## Modules
//!
//! - [`engine`] - Bidirectional sync engine orchestrating pull/push cycles
//! - [`merge`] - Pure last-writer-wins ordering over reminder copies
//! - [`backoff`] - Exponential retry delays for failed cycles
//! - [`scheduler`] - Debounce/interval loop that requests cycles

pub mod backoff;
pub mod engine;
pub mod merge;
pub mod scheduler;

pub use backoff::Backoff;
pub use engine::{SyncEngine, SyncReport};
pub use merge::MergeOutcome;
pub use scheduler::SyncScheduler;
