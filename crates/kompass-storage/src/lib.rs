//! Storage layer for KOMpass.
//!
//! Persists user-scoped records (routes, fitness summaries, models, training
//! data) across a local directory tree and two interchangeable cloud stores,
//! under hard byte ceilings:
//! - Backend adapters with a uniform put/get/list/delete/usage contract
//! - Priority-ordered backend selection with startup fallback
//! - Per-user and global quota checks before every write
//! - FIFO eviction bounded by per-category retention floors
//! - Verified, resumable migration between backends
//! - Irreversible PII scrubbing for fitness records
//! - Backend-wide statistics with capacity alerts

pub mod backend;
pub mod bootstrap;
pub mod codec;
pub mod error;
pub mod evictor;
pub mod manager;
pub mod migrate;
pub mod quota;
pub mod retry;
pub mod scrub;
pub mod stats;

pub use backend::{
    categories_for, BackendAdapter, CreationClock, DocumentStoreBackend, DocumentStoreSettings,
    LocalBackend, MemoryBackend, ObjectStoreBackend, ObjectStoreSettings, Operation,
};
pub use bootstrap::{build_manager, build_manager_with};
pub use error::{BackendError, StorageError};
pub use evictor::{EvictedRecord, EvictionReport, FifoEvictor};
pub use manager::{SaveReceipt, StorageInfo, StorageManager, UsageReport};
pub use migrate::{MigrationFailure, MigrationReport, Migrator};
pub use quota::{CategoryUsage, Ceiling, QuotaTracker, UsageSnapshot};
pub use retry::{RetryPolicy, RetryingBackend};
pub use scrub::scrub;
pub use stats::{collect_stats, AlertLevel, BackendStats};
