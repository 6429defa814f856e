//! Shared helpers for kompass-storage integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kompass_storage::{codec, BackendAdapter, MemoryBackend, RetryPolicy, StorageManager};
use kompass_types::{BackendConfig, BackendKind, QuotaLimits, Scope};
use serde_json::{json, Value};

/// Bytes `{"pad": ""}` takes when pretty-printed.
const PAD_OVERHEAD: usize = 15;

/// A payload whose stored form is exactly `size` bytes.
pub fn payload_of_size(size: usize) -> Value {
    assert!(size >= PAD_OVERHEAD, "payload must be at least {PAD_OVERHEAD} bytes");
    let payload = json!({ "pad": "x".repeat(size - PAD_OVERHEAD) });
    assert_eq!(codec::encode(&payload).unwrap().len(), size);
    payload
}

pub fn user(id: &str) -> Scope {
    Scope::user(id).unwrap()
}

pub fn limits(user_bytes: u64, min_keep: usize) -> QuotaLimits {
    QuotaLimits {
        max_file_size_bytes: user_bytes,
        max_user_storage_bytes: user_bytes,
        max_total_storage_bytes: user_bytes * 100,
        cleanup_threshold_fraction: 0.70,
        min_records_to_keep: min_keep,
        auto_cleanup_enabled: true,
    }
}

pub fn memory(kind: BackendKind, priority: u32, limits: QuotaLimits) -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::new(BackendConfig::new(kind, priority, limits)))
}

/// Retries with millisecond backoff so tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(4),
        ..Default::default()
    }
}

pub async fn connect(backends: Vec<Arc<dyn BackendAdapter>>) -> StorageManager {
    match StorageManager::connect(backends, fast_retry()).await {
        Ok(manager) => manager,
        Err(e) => panic!("manager failed to connect: {e}"),
    }
}

pub async fn connect_memory(backend: &Arc<MemoryBackend>) -> StorageManager {
    connect(vec![Arc::clone(backend) as Arc<dyn BackendAdapter>]).await
}
