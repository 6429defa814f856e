//! Usage accounting against a backend's ceilings.
//!
//! Usage is computed from listings at the start of each operation and kept
//! in a [`UsageSnapshot`] for its duration. Nothing is cached between
//! operations, so concurrent writers can briefly overshoot a ceiling.

use kompass_types::{Category, QuotaLimits, RecordMeta, Scope};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::backend::{categories_for, BackendAdapter};
use crate::error::BackendError;

/// Record count and bytes for one category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryUsage {
    pub count: usize,
    pub bytes: u64,
}

/// Point-in-time usage of one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageSnapshot {
    pub scope: Scope,

    /// Listings per category, oldest first
    pub records: BTreeMap<Category, Vec<RecordMeta>>,

    /// Bytes held by the scope
    pub scope_bytes: u64,

    /// Bytes held by the whole backend
    pub total_bytes: u64,
}

impl UsageSnapshot {
    pub fn category_usage(&self, category: Category) -> CategoryUsage {
        self.records
            .get(&category)
            .map(|records| CategoryUsage {
                count: records.len(),
                bytes: records.iter().map(|r| r.size_bytes).sum(),
            })
            .unwrap_or_default()
    }

    /// Size of the record currently stored under `key`, if any.
    pub fn existing_size(&self, category: Category, key: &str) -> u64 {
        self.records
            .get(&category)
            .and_then(|records| records.iter().find(|r| r.key == key))
            .map(|r| r.size_bytes)
            .unwrap_or(0)
    }

    /// Account for a deleted record.
    pub fn remove(&mut self, category: Category, key: &str) -> Option<RecordMeta> {
        let records = self.records.get_mut(&category)?;
        let pos = records.iter().position(|r| r.key == key)?;
        let removed = records.remove(pos);
        self.scope_bytes = self.scope_bytes.saturating_sub(removed.size_bytes);
        self.total_bytes = self.total_bytes.saturating_sub(removed.size_bytes);
        Some(removed)
    }

    /// Scope usage as a fraction of the per-user ceiling.
    pub fn user_fraction(&self, limits: &QuotaLimits) -> f64 {
        fraction(self.scope_bytes, limits.max_user_storage_bytes)
    }

    /// Backend usage as a fraction of the total ceiling.
    pub fn total_fraction(&self, limits: &QuotaLimits) -> f64 {
        fraction(self.total_bytes, limits.max_total_storage_bytes)
    }

    /// Whether either ratio has reached the cleanup threshold.
    ///
    /// The per-user ratio is ignored for the global scope.
    pub fn over_threshold(&self, limits: &QuotaLimits) -> bool {
        let threshold = limits.cleanup_threshold_fraction;
        (!self.scope.is_global() && self.user_fraction(limits) >= threshold)
            || self.total_fraction(limits) >= threshold
    }

    /// Ceiling a write of `incoming` bytes to `(category, key)` would break.
    pub fn exceeded_ceiling(
        &self,
        limits: &QuotaLimits,
        category: Category,
        key: &str,
        incoming: u64,
    ) -> Option<Ceiling> {
        let replaced = self.existing_size(category, key);
        let user_after = self.scope_bytes.saturating_sub(replaced) + incoming;
        let total_after = self.total_bytes.saturating_sub(replaced) + incoming;

        if !self.scope.is_global() && user_after > limits.max_user_storage_bytes {
            return Some(Ceiling {
                name: "user",
                used: self.scope_bytes.saturating_sub(replaced),
                limit: limits.max_user_storage_bytes,
            });
        }
        if total_after > limits.max_total_storage_bytes {
            return Some(Ceiling {
                name: "total",
                used: self.total_bytes.saturating_sub(replaced),
                limit: limits.max_total_storage_bytes,
            });
        }
        None
    }
}

/// A byte ceiling and the usage measured against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ceiling {
    pub name: &'static str,
    pub used: u64,
    pub limit: u64,
}

/// Answers usage questions for one backend.
pub struct QuotaTracker<'a> {
    backend: &'a dyn BackendAdapter,
}

impl<'a> QuotaTracker<'a> {
    pub fn new(backend: &'a dyn BackendAdapter) -> Self {
        Self { backend }
    }

    pub fn limits(&self) -> &QuotaLimits {
        &self.backend.config().limits
    }

    /// Bytes held by `scope` across all categories.
    pub async fn usage(&self, scope: &Scope) -> Result<u64, BackendError> {
        self.backend.usage(scope).await
    }

    /// Bytes held by the whole backend.
    pub async fn usage_total(&self) -> Result<u64, BackendError> {
        self.backend.usage_total().await
    }

    /// Whether `scope` (or the backend as a whole) has reached the cleanup
    /// threshold.
    pub async fn should_evict(&self, scope: &Scope) -> Result<bool, BackendError> {
        let limits = self.limits();
        let threshold = limits.cleanup_threshold_fraction;
        if !scope.is_global()
            && fraction(self.usage(scope).await?, limits.max_user_storage_bytes) >= threshold
        {
            return Ok(true);
        }
        Ok(fraction(self.usage_total().await?, limits.max_total_storage_bytes) >= threshold)
    }

    /// List every category of `scope` and total the result.
    pub async fn snapshot(&self, scope: &Scope) -> Result<UsageSnapshot, BackendError> {
        let mut records = BTreeMap::new();
        let mut scope_bytes = 0;
        for category in categories_for(scope) {
            let listed = self.backend.list(scope, category).await?;
            scope_bytes += listed.iter().map(|r| r.size_bytes).sum::<u64>();
            records.insert(category, listed);
        }
        let total_bytes = self.usage_total().await?;

        Ok(UsageSnapshot {
            scope: scope.clone(),
            records,
            scope_bytes,
            // A listing may race a concurrent write; never report less than the scope
            total_bytes: total_bytes.max(scope_bytes),
        })
    }
}

fn fraction(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return f64::INFINITY;
    }
    used as f64 / limit as f64
}
