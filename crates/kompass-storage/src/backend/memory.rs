//! In-process backend for tests and dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kompass_types::{BackendConfig, Category, RecordMeta, Scope};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{check_record_size, sort_oldest_first, BackendAdapter, CreationClock};
use crate::error::BackendError;

/// Adapter operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    Get,
    List,
    Delete,
}

type Address = (Scope, Category, String);

#[derive(Debug, Clone)]
struct Stored {
    bytes: Vec<u8>,
    created_at: DateTime<Utc>,
}

/// Backend that keeps records in a map.
///
/// Supports failure injection: [`fail_next`](MemoryBackend::fail_next)
/// makes the next `n` calls of an operation return
/// [`BackendError::Unavailable`], and [`set_healthy`](MemoryBackend::set_healthy)
/// controls the startup probe.
#[derive(Debug)]
pub struct MemoryBackend {
    config: BackendConfig,
    records: Mutex<BTreeMap<Address, Stored>>,
    clock: CreationClock,
    failures: Mutex<HashMap<Operation, usize>>,
    healthy: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            records: Mutex::new(BTreeMap::new()),
            clock: CreationClock::new(),
            failures: Mutex::new(HashMap::new()),
            healthy: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
        }
    }

    /// Make the next `times` calls of `op` fail as unavailable.
    pub fn fail_next(&self, op: Operation, times: usize) {
        let mut failures = self.failures.lock().expect("failures mutex poisoned");
        *failures.entry(op).or_insert(0) += times;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().expect("records mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn maybe_fail(&self, op: Operation) -> Result<(), BackendError> {
        let mut failures = self.failures.lock().expect("failures mutex poisoned");
        match failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(BackendError::Unavailable(format!(
                    "injected {op:?} failure"
                )))
            }
            _ => Ok(()),
        }
    }

    fn address(scope: &Scope, category: Category, key: &str) -> Address {
        (scope.clone(), category, key.to_string())
    }
}

#[async_trait]
impl BackendAdapter for MemoryBackend {
    fn config(&self) -> &BackendConfig {
        &self.config
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("memory backend marked unhealthy".into()))
        }
    }

    async fn put(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
        bytes: &[u8],
    ) -> Result<(), BackendError> {
        check_record_size(&self.config, bytes.len())?;
        self.maybe_fail(Operation::Put)?;
        let stored = Stored {
            bytes: bytes.to_vec(),
            created_at: self.clock.next(),
        };
        self.records
            .lock()
            .expect("records mutex poisoned")
            .insert(Self::address(scope, category, key), stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<Vec<u8>, BackendError> {
        self.maybe_fail(Operation::Get)?;
        self.records
            .lock()
            .expect("records mutex poisoned")
            .get(&Self::address(scope, category, key))
            .map(|s| s.bytes.clone())
            .ok_or_else(|| BackendError::NotFound(format!("{scope}/{category}/{key}")))
    }

    async fn list(
        &self,
        scope: &Scope,
        category: Category,
    ) -> Result<Vec<RecordMeta>, BackendError> {
        self.maybe_fail(Operation::List)?;
        let records = self.records.lock().expect("records mutex poisoned");
        let mut listed: Vec<RecordMeta> = records
            .iter()
            .filter(|((s, c, _), _)| s == scope && *c == category)
            .map(|((_, _, key), stored)| {
                RecordMeta::new(key.clone(), stored.created_at, stored.bytes.len() as u64)
            })
            .collect();
        sort_oldest_first(&mut listed);
        Ok(listed)
    }

    async fn delete(
        &self,
        scope: &Scope,
        category: Category,
        key: &str,
    ) -> Result<(), BackendError> {
        self.maybe_fail(Operation::Delete)?;
        self.records
            .lock()
            .expect("records mutex poisoned")
            .remove(&Self::address(scope, category, key));
        Ok(())
    }

    async fn list_scopes(&self) -> Result<Vec<Scope>, BackendError> {
        let records = self.records.lock().expect("records mutex poisoned");
        let scopes: BTreeSet<Scope> = records.keys().map(|(s, _, _)| s.clone()).collect();
        Ok(scopes.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kompass_types::{BackendKind, QuotaLimits};

    fn backend() -> MemoryBackend {
        MemoryBackend::new(BackendConfig::new(
            BackendKind::Local,
            0,
            QuotaLimits::default(),
        ))
    }

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let b = backend();
        let scope = Scope::user("u1").unwrap();
        b.put(&scope, Category::Routes, "a.json", b"{}").await.unwrap();
        b.put(&scope, Category::Routes, "a.json", b"[]").await.unwrap();
        assert_eq!(b.get(&scope, Category::Routes, "a.json").await.unwrap(), b"[]");
        assert_eq!(b.len(), 1);
        assert_eq!(b.write_count(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let b = backend();
        let scope = Scope::user("u1").unwrap();
        b.fail_next(Operation::Get, 2);
        assert!(b.get(&scope, Category::Routes, "x").await.unwrap_err().is_retryable());
        assert!(b.get(&scope, Category::Routes, "x").await.unwrap_err().is_retryable());
        assert!(b.get(&scope, Category::Routes, "x").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_default_usage_sums_listings() {
        let b = backend();
        let u1 = Scope::user("u1").unwrap();
        let u2 = Scope::user("u2").unwrap();
        b.put(&u1, Category::Routes, "a", &[0; 10]).await.unwrap();
        b.put(&u1, Category::Fitness, "b", &[0; 5]).await.unwrap();
        b.put(&u2, Category::Routes, "a", &[0; 7]).await.unwrap();
        b.put(&Scope::Global, Category::Models, "m", &[0; 3]).await.unwrap();

        assert_eq!(b.usage(&u1).await.unwrap(), 15);
        assert_eq!(b.usage(&Scope::Global).await.unwrap(), 3);
        assert_eq!(b.usage_total().await.unwrap(), 25);
        assert_eq!(b.list_scopes().await.unwrap().len(), 3);
    }
}
