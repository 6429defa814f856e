//! Storage manager: the facade collaborators call.
//!
//! Backends are probed once at startup and kept in priority order; the
//! first healthy one is active. `save`, `list` and `delete` go to the
//! active backend, while `load` walks every available backend so records
//! written before a backend switch stay readable. Quota ceilings are
//! enforced before each write, with FIFO eviction as the first remedy.
//! Ceilings are soft: the check and the write are not atomic, so
//! concurrent writers can overshoot them briefly.

use kompass_types::{
    validate_key, BackendKind, Category, QuotaLimits, RecordMeta, Scope,
};
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

use crate::backend::BackendAdapter;
use crate::codec;
use crate::error::{BackendError, StorageError};
use crate::evictor::{EvictionReport, FifoEvictor};
use crate::migrate::{MigrationReport, Migrator};
use crate::quota::{CategoryUsage, Ceiling, QuotaTracker};
use crate::retry::{RetryPolicy, RetryingBackend};
use crate::scrub::scrub;
use crate::stats::{collect_stats, BackendStats};

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveReceipt {
    /// Backend the record was written to
    pub backend: BackendKind,
    pub size_bytes: u64,
    /// Eviction performed to make room, if any
    pub eviction: Option<EvictionReport>,
}

/// Which backends the manager is using.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageInfo {
    pub active: BackendKind,
    pub available: Vec<BackendKind>,
    pub demoted: Vec<BackendKind>,
    pub limits: QuotaLimits,
}

/// Usage of one scope on the active backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    pub scope: Scope,
    pub backend: BackendKind,
    pub categories: BTreeMap<Category, CategoryUsage>,
    pub scope_bytes: u64,
    pub total_bytes: u64,
    pub user_limit_bytes: u64,
    pub total_limit_bytes: u64,
    pub user_usage_percent: f64,
    pub total_usage_percent: f64,
    pub over_threshold: bool,
}

/// Priority-ordered, quota-aware front for the configured backends.
pub struct StorageManager {
    /// Every configured backend, in priority order
    configured: Vec<Arc<dyn BackendAdapter>>,
    /// Backends in use, in priority order; the first is active
    available: RwLock<Vec<Arc<dyn BackendAdapter>>>,
}

impl StorageManager {
    /// Probe every candidate once and keep the healthy ones.
    ///
    /// Each backend is wrapped in a [`RetryingBackend`] using `retry`.
    /// Fails with [`StorageError::NoBackendAvailable`] when no candidate
    /// answers its health probe.
    pub async fn connect(
        mut candidates: Vec<Arc<dyn BackendAdapter>>,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        candidates.sort_by_key(|b| b.config().priority);
        let configured: Vec<Arc<dyn BackendAdapter>> = candidates
            .into_iter()
            .map(|b| Arc::new(RetryingBackend::new(b, retry.clone())) as Arc<dyn BackendAdapter>)
            .collect();

        let mut available = Vec::with_capacity(configured.len());
        for backend in &configured {
            match backend.health_check().await {
                Ok(()) => {
                    debug!(backend = %backend.kind(), "Backend passed startup probe");
                    available.push(Arc::clone(backend));
                }
                Err(e) => {
                    warn!(backend = %backend.kind(), error = %e, "Backend failed startup probe, demoting");
                }
            }
        }

        let Some(active) = available.first() else {
            error!(configured = configured.len(), "No storage backend available");
            return Err(StorageError::NoBackendAvailable);
        };
        info!(
            active = %active.kind(),
            available = available.len(),
            configured = configured.len(),
            "Storage manager ready"
        );

        Ok(Self {
            configured,
            available: RwLock::new(available),
        })
    }

    fn available(&self) -> Vec<Arc<dyn BackendAdapter>> {
        self.available
            .read()
            .expect("backend list lock poisoned")
            .clone()
    }

    /// Backend that receives writes.
    pub fn active(&self) -> Arc<dyn BackendAdapter> {
        let available = self.available.read().expect("backend list lock poisoned");
        // connect() guarantees one entry and demote() never removes the last
        Arc::clone(&available[0])
    }

    /// A configured backend by kind, whether or not it is available.
    pub fn backend(&self, kind: BackendKind) -> Option<Arc<dyn BackendAdapter>> {
        self.configured.iter().find(|b| b.kind() == kind).cloned()
    }

    /// Drop `kind` from the available list for the rest of the process.
    ///
    /// Returns false when it is the last available backend.
    fn demote(&self, kind: BackendKind) -> bool {
        let mut available = self.available.write().expect("backend list lock poisoned");
        if available.len() <= 1 {
            return false;
        }
        let before = available.len();
        available.retain(|b| b.kind() != kind);
        before != available.len()
    }

    pub fn storage_info(&self) -> StorageInfo {
        let available: Vec<BackendKind> = self.available().iter().map(|b| b.kind()).collect();
        let demoted = self
            .configured
            .iter()
            .map(|b| b.kind())
            .filter(|k| !available.contains(k))
            .collect();
        let active = self.active();
        StorageInfo {
            active: active.kind(),
            available,
            demoted,
            limits: active.config().limits.clone(),
        }
    }

    /// Store `payload` under `(scope, category, key)`, replacing any
    /// previous record.
    ///
    /// Fitness payloads are scrubbed first. Oversized records fail with
    /// [`StorageError::SizeExceeded`] before any backend call; writes that
    /// would break a ceiling trigger eviction and fail with
    /// [`StorageError::QuotaExceeded`] if that is not enough. A backend
    /// that stays unavailable through its retries is demoted and the write
    /// moves to the next one.
    pub async fn save(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
        payload: &Value,
    ) -> Result<SaveReceipt, StorageError> {
        validate_key(key)?;
        scope.check_category(category)?;

        let payload = if category.is_pii_bearing() {
            Cow::Owned(scrub(category, payload))
        } else {
            Cow::Borrowed(payload)
        };
        let bytes = codec::encode(&payload)?;

        loop {
            let backend = self.active();
            match self.save_to(backend.as_ref(), scope, category, key, &bytes).await {
                Err(StorageError::Unavailable(reason)) if self.demote(backend.kind()) => {
                    warn!(
                        backend = %backend.kind(),
                        next = %self.active().kind(),
                        error = %reason,
                        "Active backend unavailable, falling back"
                    );
                }
                result => return result,
            }
        }
    }

    async fn save_to(
        &self,
        backend: &dyn BackendAdapter,
        scope: &Scope,
        category: Category,
        key: &str,
        bytes: &[u8],
    ) -> Result<SaveReceipt, StorageError> {
        let limits = &backend.config().limits;
        let size = bytes.len() as u64;
        if size > limits.max_file_size_bytes {
            return Err(StorageError::SizeExceeded {
                size,
                max: limits.max_file_size_bytes,
            });
        }

        let eviction = self.make_room(backend, scope, category, key, size).await?;
        backend.put(scope, category, key, bytes).await?;

        info!(
            backend = %backend.kind(),
            scope = %scope,
            category = %category,
            key,
            size,
            "Saved record"
        );
        Ok(SaveReceipt {
            backend: backend.kind(),
            size_bytes: size,
            eviction,
        })
    }

    /// Evict if a write of `size` bytes would break a ceiling.
    async fn make_room(
        &self,
        backend: &dyn BackendAdapter,
        scope: &Scope,
        category: Category,
        key: &str,
        size: u64,
    ) -> Result<Option<EvictionReport>, StorageError> {
        let limits = &backend.config().limits;
        let mut snapshot = QuotaTracker::new(backend).snapshot(scope).await?;

        let Some(ceiling) = snapshot.exceeded_ceiling(limits, category, key, size) else {
            return Ok(None);
        };
        if !limits.auto_cleanup_enabled {
            warn!(scope = %scope, ceiling = ceiling.name, "Quota exceeded and auto cleanup disabled");
            return Err(quota_exceeded(scope, ceiling, size));
        }

        info!(scope = %scope, ceiling = ceiling.name, used = ceiling.used, limit = ceiling.limit, "Write would exceed ceiling, evicting");
        let report = FifoEvictor::new(backend).evict_with(&mut snapshot).await?;

        match snapshot.exceeded_ceiling(limits, category, key, size) {
            None => Ok(Some(report)),
            Some(ceiling) => {
                warn!(scope = %scope, ceiling = ceiling.name, evicted = report.count(), "Quota still exceeded after eviction");
                Err(quota_exceeded(scope, ceiling, size))
            }
        }
    }

    /// Read a record, trying every available backend in priority order.
    ///
    /// Misses and backend failures both fall through to the next backend;
    /// `Ok(None)` means no backend had the record.
    pub async fn load(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<Option<Value>, StorageError> {
        validate_key(key)?;
        scope.check_category(category)?;

        for backend in self.available() {
            match backend.get(scope, category, key).await {
                Ok(bytes) => match codec::decode(&bytes) {
                    Ok(value) => return Ok(Some(value)),
                    Err(e) => {
                        warn!(backend = %backend.kind(), scope = %scope, key, error = %e, "Stored record is corrupt, skipping");
                    }
                },
                Err(BackendError::NotFound(_)) => {}
                Err(e) => {
                    warn!(backend = %backend.kind(), scope = %scope, key, error = %e, "Read failed, trying next backend");
                }
            }
        }
        Ok(None)
    }

    /// Records in `(scope, category)` on the active backend, oldest first.
    pub async fn list(
        &self,
        scope: &Scope,
        category: Category,
    ) -> Result<Vec<RecordMeta>, StorageError> {
        scope.check_category(category)?;
        Ok(self.active().list(scope, category).await?)
    }

    /// Delete a record from the active backend. Missing records succeed.
    pub async fn delete(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        scope.check_category(category)?;
        self.active().delete(scope, category, key).await?;
        debug!(scope = %scope, category = %category, key, "Deleted record");
        Ok(())
    }

    /// Run an eviction pass over `scope` on the active backend.
    pub async fn cleanup(&self, scope: &Scope) -> Result<EvictionReport, StorageError> {
        let backend = self.active();
        Ok(FifoEvictor::new(backend.as_ref()).evict(scope).await?)
    }

    pub async fn usage_report(&self, scope: &Scope) -> Result<UsageReport, StorageError> {
        let backend = self.active();
        let limits = backend.config().limits.clone();
        let snapshot = QuotaTracker::new(backend.as_ref()).snapshot(scope).await?;

        let categories = snapshot
            .records
            .keys()
            .map(|c| (*c, snapshot.category_usage(*c)))
            .collect();
        Ok(UsageReport {
            scope: scope.clone(),
            backend: backend.kind(),
            categories,
            scope_bytes: snapshot.scope_bytes,
            total_bytes: snapshot.total_bytes,
            user_limit_bytes: limits.max_user_storage_bytes,
            total_limit_bytes: limits.max_total_storage_bytes,
            user_usage_percent: snapshot.user_fraction(&limits) * 100.0,
            total_usage_percent: snapshot.total_fraction(&limits) * 100.0,
            over_threshold: snapshot.over_threshold(&limits),
        })
    }

    /// Record counts, bytes and alert level across every scope on the
    /// active backend.
    pub async fn backend_stats(&self) -> Result<BackendStats, StorageError> {
        let backend = self.active();
        Ok(collect_stats(backend.as_ref()).await?)
    }

    /// Move records from `source` to `dest`. Never fails; see the report.
    pub async fn migrate(
        &self,
        source: BackendKind,
        dest: BackendKind,
        scope: Option<&Scope>,
    ) -> MigrationReport {
        let (Some(src), Some(dst)) = (self.backend(source), self.backend(dest)) else {
            return MigrationReport::aborted(format!(
                "both {source} and {dest} must be configured"
            ));
        };
        Migrator::new(src.as_ref(), dst.as_ref()).migrate(scope).await
    }

    /// Store a payload, reporting success as a flag.
    pub async fn save_data(
        &self,
        payload: &Value,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> bool {
        match self.save(scope, category, key, payload).await {
            Ok(_) => true,
            Err(e) => {
                error!(scope = %scope, category = %category, key, error = %e, "Save failed");
                false
            }
        }
    }

    /// Load a payload; any failure reads as "no saved data".
    pub async fn load_data(&self, scope: &Scope, category: Category, key: &str) -> Option<Value> {
        match self.load(scope, category, key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(scope = %scope, category = %category, key, error = %e, "Load failed");
                None
            }
        }
    }

    /// Keys in `(scope, category)`, oldest first; empty on failure.
    pub async fn list_user_data(&self, scope: &Scope, category: Category) -> Vec<String> {
        match self.list(scope, category).await {
            Ok(records) => records.into_iter().map(|r| r.key).collect(),
            Err(e) => {
                warn!(scope = %scope, category = %category, error = %e, "List failed");
                Vec::new()
            }
        }
    }

    /// Move local records to the active remote backend.
    pub async fn migrate_local_to_remote(&self, scope: Option<&Scope>) -> MigrationReport {
        let dest = self.active().kind();
        if !dest.is_remote() {
            return MigrationReport::aborted("no remote backend is active");
        }
        self.migrate(BackendKind::Local, dest, scope).await
    }
}

fn quota_exceeded(scope: &Scope, ceiling: Ceiling, requested: u64) -> StorageError {
    StorageError::QuotaExceeded {
        scope: scope.to_string(),
        ceiling: ceiling.name,
        used: ceiling.used,
        requested,
        limit: ceiling.limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use kompass_types::BackendConfig;
    use serde_json::json;

    fn memory(kind: BackendKind, priority: u32) -> Arc<MemoryBackend> {
        Arc::new(MemoryBackend::new(BackendConfig::new(
            kind,
            priority,
            QuotaLimits::default(),
        )))
    }

    async fn manager(backends: &[Arc<MemoryBackend>]) -> Result<StorageManager, StorageError> {
        let candidates = backends
            .iter()
            .map(|b| Arc::clone(b) as Arc<dyn BackendAdapter>)
            .collect();
        StorageManager::connect(candidates, RetryPolicy::none()).await
    }

    fn u1() -> Scope {
        Scope::user("u1").unwrap()
    }

    #[tokio::test]
    async fn test_unhealthy_preferred_backend_is_demoted() {
        let document = memory(BackendKind::Document, 0);
        let local = memory(BackendKind::Local, 2);
        document.set_healthy(false);

        let manager = manager(&[local.clone(), document.clone()]).await.unwrap();
        let info = manager.storage_info();
        assert_eq!(info.active, BackendKind::Local);
        assert_eq!(info.demoted, vec![BackendKind::Document]);

        manager
            .save(&u1(), Category::Routes, "a.json", &json!({"a": 1}))
            .await
            .unwrap();
        assert_eq!(local.write_count(), 1);
        assert_eq!(document.write_count(), 0);
    }

    #[tokio::test]
    async fn test_no_backend_available() {
        let local = memory(BackendKind::Local, 0);
        local.set_healthy(false);
        assert!(matches!(
            manager(&[local]).await,
            Err(StorageError::NoBackendAvailable)
        ));
    }

    #[tokio::test]
    async fn test_load_reads_legacy_backend() {
        let object = memory(BackendKind::Object, 0);
        let local = memory(BackendKind::Local, 1);
        local
            .put(&u1(), Category::Routes, "old.json", b"{\"legacy\": true}")
            .await
            .unwrap();

        let manager = manager(&[object, local]).await.unwrap();
        let value = manager.load(&u1(), Category::Routes, "old.json").await.unwrap();
        assert_eq!(value, Some(json!({"legacy": true})));
        assert_eq!(manager.load(&u1(), Category::Routes, "none.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fitness_is_scrubbed_before_write() {
        let local = memory(BackendKind::Local, 0);
        let manager = manager(&[local]).await.unwrap();
        let payload = json!({"basic_info": {"id": 7, "firstname": "Ann", "ftp": 250}});

        manager
            .save(&u1(), Category::Fitness, "rider.json", &payload)
            .await
            .unwrap();
        let stored = manager
            .load(&u1(), Category::Fitness, "rider.json")
            .await
            .unwrap()
            .unwrap();
        assert!(stored["basic_info"].get("firstname").is_none());
        assert_eq!(stored["basic_info"]["ftp"], json!(250));
        assert_eq!(stored["anonymization"]["pii_removed"], json!(true));
    }

    #[tokio::test]
    async fn test_validation_happens_before_backend() {
        let local = memory(BackendKind::Local, 0);
        let manager = manager(&[local.clone()]).await.unwrap();

        let err = manager
            .save(&u1(), Category::Routes, "../x", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        let err = manager
            .save(&Scope::Global, Category::Routes, "x.json", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));

        let err = manager
            .save(&u1(), Category::Routes, "x.json", &json!(3))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
        assert_eq!(local.write_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_active_falls_back_on_save() {
        let object = memory(BackendKind::Object, 0);
        let local = memory(BackendKind::Local, 1);
        let manager = manager(&[object.clone(), local.clone()]).await.unwrap();

        object.fail_next(crate::backend::Operation::List, 1);
        let receipt = manager
            .save(&u1(), Category::Routes, "a.json", &json!({}))
            .await
            .unwrap();
        assert_eq!(receipt.backend, BackendKind::Local);
        assert_eq!(manager.storage_info().demoted, vec![BackendKind::Object]);
    }

    #[tokio::test]
    async fn test_migrate_local_to_remote_requires_remote() {
        let local = memory(BackendKind::Local, 0);
        let manager = manager(&[local]).await.unwrap();
        let report = manager.migrate_local_to_remote(None).await;
        assert!(report.aborted.is_some());
    }

    #[tokio::test]
    async fn test_facade_helpers() {
        let local = memory(BackendKind::Local, 0);
        let manager = manager(&[local]).await.unwrap();

        assert!(manager.save_data(&json!({"n": 1}), &u1(), Category::Routes, "a.json").await);
        assert!(manager.save_data(&json!({"n": 2}), &u1(), Category::Routes, "b.json").await);
        assert!(!manager.save_data(&json!("scalar"), &u1(), Category::Routes, "c.json").await);

        assert_eq!(
            manager.load_data(&u1(), Category::Routes, "a.json").await,
            Some(json!({"n": 1}))
        );
        assert_eq!(manager.load_data(&u1(), Category::Routes, "zzz").await, None);
        assert_eq!(
            manager.list_user_data(&u1(), Category::Routes).await,
            vec!["a.json", "b.json"]
        );
    }

    #[tokio::test]
    async fn test_backend_stats_use_active_backend() {
        let object = memory(BackendKind::Object, 0);
        let local = memory(BackendKind::Local, 1);
        local
            .put(&u1(), Category::Routes, "legacy.json", b"{}")
            .await
            .unwrap();
        let manager = manager(&[object, local]).await.unwrap();
        manager
            .save(&u1(), Category::Routes, "a.json", &json!({"a": 1}))
            .await
            .unwrap();

        let stats = manager.backend_stats().await.unwrap();
        assert_eq!(stats.backend, BackendKind::Object);
        assert_eq!(stats.total_records, 1);
        assert_eq!(stats.user_count, 1);
    }
}
