//! Backend adapters.
//!
//! Every physical store sits behind [`BackendAdapter`], so the manager,
//! quota tracker, evictor and migrator never know which medium they are
//! talking to. Records are raw bytes addressed by `(scope, category, key)`;
//! the adapter assigns `created_at` at write time and lists oldest first.

mod document_store;
mod http;
mod local;
mod memory;
mod object_store;

pub use document_store::{DocumentStoreBackend, DocumentStoreSettings};
pub use local::LocalBackend;
pub use memory::{MemoryBackend, Operation};
pub use object_store::{ObjectStoreBackend, ObjectStoreSettings};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kompass_types::{BackendConfig, BackendKind, Category, RecordMeta, Scope};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::BackendError;

/// Uniform contract over one physical store.
///
/// Implementations must be `Send + Sync`; the manager shares them across
/// tasks behind `Arc`.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Kind, priority and limits of this backend.
    fn config(&self) -> &BackendConfig;

    fn kind(&self) -> BackendKind {
        self.config().kind
    }

    /// Cheap reachability probe. Never retried.
    async fn health_check(&self) -> Result<(), BackendError>;

    /// Write a record, replacing any previous record at the same address.
    ///
    /// Rejects payloads over `max_file_size_bytes` with
    /// [`BackendError::SizeExceeded`] before touching the store.
    async fn put(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError>;

    /// Read a record. Missing records yield [`BackendError::NotFound`].
    async fn get(&self, scope: &Scope, category: Category, key: &str)
        -> Result<Vec<u8>, BackendError>;

    /// Records in `(scope, category)`, sorted by `(created_at, key)`.
    async fn list(&self, scope: &Scope, category: Category)
        -> Result<Vec<RecordMeta>, BackendError>;

    /// Remove a record. Deleting a missing record succeeds.
    async fn delete(&self, scope: &Scope, category: Category, key: &str)
        -> Result<(), BackendError>;

    /// Scopes holding at least one record.
    async fn list_scopes(&self) -> Result<Vec<Scope>, BackendError>;

    /// Bytes held by `scope` across all categories.
    async fn usage(&self, scope: &Scope) -> Result<u64, BackendError> {
        let mut total = 0;
        for category in categories_for(scope) {
            total += self
                .list(scope, category)
                .await?
                .iter()
                .map(|r| r.size_bytes)
                .sum::<u64>();
        }
        Ok(total)
    }

    /// Bytes held by every scope on this backend.
    async fn usage_total(&self) -> Result<u64, BackendError> {
        let mut total = 0;
        for scope in self.list_scopes().await? {
            total += self.usage(&scope).await?;
        }
        Ok(total)
    }
}

/// Categories that may hold records in `scope`.
pub fn categories_for(scope: &Scope) -> impl Iterator<Item = Category> + '_ {
    Category::ALL
        .into_iter()
        .filter(move |c| !scope.is_global() || c.allows_global())
}

/// Reject a payload larger than the backend's per-record limit.
pub(crate) fn check_record_size(config: &BackendConfig, len: usize) -> Result<(), BackendError> {
    let size = len as u64;
    let max = config.limits.max_file_size_bytes;
    if size > max {
        return Err(BackendError::SizeExceeded { size, max });
    }
    Ok(())
}

/// Sort listing entries oldest first, breaking timestamp ties by key.
pub(crate) fn sort_oldest_first(records: &mut [RecordMeta]) {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Hands out strictly increasing creation timestamps.
///
/// Wall-clock time at microsecond resolution, bumped by one microsecond
/// whenever two writes land in the same tick or the clock steps backwards.
#[derive(Debug, Default)]
pub struct CreationClock {
    last_micros: AtomicI64,
}

impl CreationClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock whose first timestamp is later than `micros`.
    pub fn starting_after(micros: i64) -> Self {
        Self {
            last_micros: AtomicI64::new(micros),
        }
    }

    /// Next timestamp, strictly after every one handed out before.
    pub fn next(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_micros();
        let mut last = self.last_micros.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self.last_micros.compare_exchange(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return micros_to_datetime(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Make sure future timestamps land after `at`.
    pub fn observe(&self, at: DateTime<Utc>) {
        self.last_micros
            .fetch_max(at.timestamp_micros(), Ordering::SeqCst);
    }
}

pub(crate) fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_micros(micros).unwrap_or_default()
}
