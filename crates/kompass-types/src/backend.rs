//! Backend kinds and the byte ceilings each backend enforces.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KompassError;

const MB: f64 = 1024.0 * 1024.0;
const GB: f64 = 1024.0 * MB;

/// Physical medium behind a backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Directory tree on the local filesystem
    Local,
    /// Cloud object store (bucket of blobs)
    Object,
    /// Cloud document store (collections of documents)
    Document,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::Object => "object",
            BackendKind::Document => "document",
        }
    }

    /// Whether calls to this backend cross the network.
    pub fn is_remote(&self) -> bool {
        !matches!(self, BackendKind::Local)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = KompassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "filesystem" | "fs" => Ok(BackendKind::Local),
            "object" | "object_store" | "gcs" | "s3" => Ok(BackendKind::Object),
            "document" | "document_store" | "firestore" | "firebase" => {
                Ok(BackendKind::Document)
            }
            other => Err(KompassError::InvalidBackend(other.to_string())),
        }
    }
}

/// Capacity ceilings and cleanup policy for one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Largest single serialized record accepted
    pub max_file_size_bytes: u64,

    /// Per-user ceiling (summed over all categories)
    pub max_user_storage_bytes: u64,

    /// Ceiling for everything on the backend
    pub max_total_storage_bytes: u64,

    /// Usage fraction (of either ceiling) at which eviction starts
    pub cleanup_threshold_fraction: f64,

    /// Per `(scope, category)` floor the evictor never goes below
    pub min_records_to_keep: usize,

    /// Evict before failing a write that would exceed a ceiling
    pub auto_cleanup_enabled: bool,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        Self {
            max_file_size_bytes: mb_to_bytes(50.0),
            max_user_storage_bytes: mb_to_bytes(100.0),
            max_total_storage_bytes: gb_to_bytes(4.5),
            cleanup_threshold_fraction: 0.70,
            min_records_to_keep: 5,
            auto_cleanup_enabled: true,
        }
    }
}

impl QuotaLimits {
    /// Per-user usage at which eviction starts.
    pub fn user_threshold_bytes(&self) -> f64 {
        self.max_user_storage_bytes as f64 * self.cleanup_threshold_fraction
    }

    /// Backend-wide usage at which eviction starts.
    pub fn total_threshold_bytes(&self) -> f64 {
        self.max_total_storage_bytes as f64 * self.cleanup_threshold_fraction
    }
}

/// Static description of a configured backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Lower value is preferred when choosing the active backend
    pub priority: u32,

    pub limits: QuotaLimits,
}

impl BackendConfig {
    pub fn new(kind: BackendKind, priority: u32, limits: QuotaLimits) -> Self {
        Self {
            kind,
            priority,
            limits,
        }
    }
}

/// Convert megabytes (binary) to bytes.
pub fn mb_to_bytes(mb: f64) -> u64 {
    (mb * MB).round() as u64
}

/// Convert gigabytes (binary) to bytes.
pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb * GB).round() as u64
}
