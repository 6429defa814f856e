//! Backend-wide storage statistics and capacity alerts.
//!
//! Walks every scope on a backend and aggregates record counts and bytes
//! per category, then grades usage of the total ceiling.

use kompass_types::{BackendKind, Category, Scope};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::backend::{categories_for, BackendAdapter};
use crate::error::BackendError;
use crate::quota::CategoryUsage;

/// How close a backend is to its total ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Below 70%
    Normal,
    /// 70% or more: FIFO cleanup is active
    Info,
    /// 80% or more
    Warning,
    /// 90% or more
    Critical,
}

impl AlertLevel {
    pub fn from_percent(percent: f64) -> Self {
        if percent >= 90.0 {
            AlertLevel::Critical
        } else if percent >= 80.0 {
            AlertLevel::Warning
        } else if percent >= 70.0 {
            AlertLevel::Info
        } else {
            AlertLevel::Normal
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "Storage usage normal",
            AlertLevel::Info => "Storage over 70%, FIFO cleanup active",
            AlertLevel::Warning => "Storage over 80%, monitor closely",
            AlertLevel::Critical => "Storage over 90%, immediate action required",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertLevel::Normal => "normal",
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Aggregate usage of one backend across all scopes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendStats {
    pub backend: BackendKind,
    pub total_records: usize,
    /// User scopes holding at least one record
    pub user_count: usize,
    pub has_global: bool,
    pub categories: BTreeMap<Category, CategoryUsage>,
    pub total_bytes: u64,
    pub total_limit_bytes: u64,
    pub usage_percent: f64,
    pub alert: AlertLevel,
}

/// Collect statistics for every scope on `backend`.
pub async fn collect_stats(backend: &dyn BackendAdapter) -> Result<BackendStats, BackendError> {
    let mut categories: BTreeMap<Category, CategoryUsage> = BTreeMap::new();
    let mut user_count = 0;
    let mut has_global = false;

    for scope in backend.list_scopes().await? {
        let mut scope_records = 0;
        for category in categories_for(&scope) {
            let records = backend.list(&scope, category).await?;
            if records.is_empty() {
                continue;
            }
            scope_records += records.len();
            let usage = categories.entry(category).or_default();
            usage.count += records.len();
            usage.bytes += records.iter().map(|r| r.size_bytes).sum::<u64>();
        }
        match scope {
            Scope::Global => has_global = scope_records > 0,
            Scope::User(_) if scope_records > 0 => user_count += 1,
            Scope::User(_) => {}
        }
    }

    let total_records = categories.values().map(|u| u.count).sum();
    let total_bytes = categories.values().map(|u| u.bytes).sum();
    let total_limit_bytes = backend.config().limits.max_total_storage_bytes;
    let usage_percent = if total_limit_bytes == 0 {
        0.0
    } else {
        total_bytes as f64 / total_limit_bytes as f64 * 100.0
    };
    let alert = AlertLevel::from_percent(usage_percent);

    if alert >= AlertLevel::Warning {
        warn!(backend = %backend.kind(), usage_percent, alert = %alert, "{}", alert.message());
    }
    debug!(
        backend = %backend.kind(),
        total_records,
        user_count,
        total_bytes,
        "Collected backend statistics"
    );

    Ok(BackendStats {
        backend: backend.kind(),
        total_records,
        user_count,
        has_global,
        categories,
        total_bytes,
        total_limit_bytes,
        usage_percent,
        alert,
    })
}
