//! Local-to-remote migration end to end.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use common::{connect, memory, user};
use kompass_storage::{BackendAdapter, LocalBackend, Operation};
use kompass_types::{BackendConfig, BackendKind, Category, QuotaLimits, Scope};

fn local(dir: &TempDir) -> Arc<LocalBackend> {
    let config = BackendConfig::new(BackendKind::Local, 1, QuotaLimits::default());
    Arc::new(LocalBackend::open(dir.path(), config).unwrap())
}

async fn seed(backend: &LocalBackend) {
    for (scope, category, key) in [
        (user("u1"), Category::Routes, "a.json"),
        (user("u1"), Category::Fitness, "rider.json"),
        (user("u2"), Category::Routes, "b.json"),
        (Scope::Global, Category::Models, "model.json"),
    ] {
        let bytes = serde_json::to_vec(&json!({ "key": key })).unwrap();
        backend.put(&scope, category, key, &bytes).await.unwrap();
    }
}

#[tokio::test]
async fn test_migrate_twice_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let source = local(&dir);
    seed(&source).await;
    let remote = memory(BackendKind::Object, 0, QuotaLimits::default());

    let manager = connect(vec![
        Arc::clone(&source) as Arc<dyn BackendAdapter>,
        Arc::clone(&remote) as Arc<dyn BackendAdapter>,
    ])
    .await;

    let first = manager.migrate_local_to_remote(None).await;
    assert!(first.is_success(), "{first:?}");
    assert_eq!(first.migrated, 4);
    assert_eq!(remote.len(), 4);
    assert!(source.list_scopes().await.unwrap().is_empty());

    let writes = remote.write_count();
    let second = manager.migrate_local_to_remote(None).await;
    assert!(second.is_success());
    assert_eq!(second.migrated, 0);
    assert_eq!(second.scanned, 0);
    assert_eq!(remote.write_count(), writes);
    assert_eq!(remote.len(), 4);

    assert_eq!(
        manager.load(&user("u2"), Category::Routes, "b.json").await.unwrap(),
        Some(json!({"key": "b.json"}))
    );
}

#[tokio::test]
async fn test_resume_after_partial_failure() {
    let dir = TempDir::new().unwrap();
    let source = local(&dir);
    seed(&source).await;
    let remote = memory(BackendKind::Document, 0, QuotaLimits::default());

    let manager = connect(vec![
        Arc::clone(&source) as Arc<dyn BackendAdapter>,
        Arc::clone(&remote) as Arc<dyn BackendAdapter>,
    ])
    .await;

    // More failures than the retry policy absorbs
    remote.fail_next(Operation::Put, 4);
    let first = manager.migrate_local_to_remote(None).await;
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.migrated, 3);

    let second = manager.migrate_local_to_remote(None).await;
    assert!(second.is_success(), "{second:?}");
    assert_eq!(second.scanned, 1);
    assert_eq!(second.migrated, 1);
    assert_eq!(remote.len(), 4);
}

#[tokio::test]
async fn test_single_scope_migration() {
    let dir = TempDir::new().unwrap();
    let source = local(&dir);
    seed(&source).await;
    let remote = memory(BackendKind::Object, 0, QuotaLimits::default());

    let manager = connect(vec![
        Arc::clone(&source) as Arc<dyn BackendAdapter>,
        Arc::clone(&remote) as Arc<dyn BackendAdapter>,
    ])
    .await;

    let report = manager.migrate_local_to_remote(Some(&user("u1"))).await;
    assert_eq!(report.migrated, 2);
    assert_eq!(
        source.list_scopes().await.unwrap(),
        vec![Scope::Global, user("u2")]
    );
}
