//! FIFO eviction bounded by per-category retention floors.
//!
//! Categories are visited in [`Category::ALL`] order. Within a category the
//! oldest records go first, but a single pass never removes more than half
//! of a category and never leaves fewer than `min_records_to_keep`.
//! Eviction stops as soon as usage drops below the cleanup threshold.

use kompass_types::{Category, Scope};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::BackendAdapter;
use crate::error::BackendError;
use crate::quota::{QuotaTracker, UsageSnapshot};

/// A record removed by eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictedRecord {
    pub category: Category,
    pub key: String,
    pub size_bytes: u64,
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvictionReport {
    pub evicted: Vec<EvictedRecord>,
    pub bytes_reclaimed: u64,

    /// Usage is below the cleanup threshold after the pass
    pub below_threshold: bool,

    /// Retention floors stopped the pass while still over threshold
    pub floor_reached: bool,
}

impl EvictionReport {
    pub fn count(&self) -> usize {
        self.evicted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty()
    }
}

/// Removes the oldest records of a scope until it is back under threshold.
pub struct FifoEvictor<'a> {
    backend: &'a dyn BackendAdapter,
}

impl<'a> FifoEvictor<'a> {
    pub fn new(backend: &'a dyn BackendAdapter) -> Self {
        Self { backend }
    }

    /// Run one pass over `scope`.
    pub async fn evict(&self, scope: &Scope) -> Result<EvictionReport, BackendError> {
        let mut snapshot = QuotaTracker::new(self.backend).snapshot(scope).await?;
        self.evict_with(&mut snapshot).await
    }

    /// Run one pass using an existing snapshot, updating it as records go.
    pub async fn evict_with(
        &self,
        snapshot: &mut UsageSnapshot,
    ) -> Result<EvictionReport, BackendError> {
        let limits = self.backend.config().limits.clone();
        let scope = snapshot.scope.clone();
        let mut report = EvictionReport::default();

        for category in Category::ALL {
            if !snapshot.over_threshold(&limits) {
                break;
            }
            let victims = plan(snapshot, category, limits.min_records_to_keep);
            for key in victims {
                if !snapshot.over_threshold(&limits) {
                    break;
                }
                self.backend.delete(&scope, category, &key).await?;
                if let Some(removed) = snapshot.remove(category, &key) {
                    debug!(scope = %scope, category = %category, key = %removed.key, size = removed.size_bytes, "Evicted record");
                    report.bytes_reclaimed += removed.size_bytes;
                    report.evicted.push(EvictedRecord {
                        category,
                        key: removed.key,
                        size_bytes: removed.size_bytes,
                    });
                }
            }
        }

        report.below_threshold = !snapshot.over_threshold(&limits);
        report.floor_reached = !report.below_threshold;

        if report.floor_reached {
            warn!(
                scope = %scope,
                evicted = report.count(),
                scope_bytes = snapshot.scope_bytes,
                total_bytes = snapshot.total_bytes,
                "Eviction floor reached; scope remains over cleanup threshold"
            );
        } else if !report.is_empty() {
            info!(
                scope = %scope,
                evicted = report.count(),
                bytes_reclaimed = report.bytes_reclaimed,
                "Eviction complete"
            );
        }
        Ok(report)
    }
}

/// Oldest keys of `category` that this pass may remove.
fn plan(snapshot: &UsageSnapshot, category: Category, min_keep: usize) -> Vec<String> {
    let Some(records) = snapshot.records.get(&category) else {
        return Vec::new();
    };
    let count = records.len();
    let removable = count.saturating_sub(min_keep);
    let target = removable.min(count / 2);
    records.iter().take(target).map(|r| r.key.clone()).collect()
}
