//! Storage manager behavior against real and in-memory backends.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::TempDir;

use common::{connect, connect_memory, limits, memory, user};
use kompass_storage::{BackendAdapter, LocalBackend, Operation};
use kompass_types::{BackendConfig, BackendKind, Category, QuotaLimits, Scope};

fn local(dir: &TempDir, priority: u32) -> Arc<dyn BackendAdapter> {
    let config = BackendConfig::new(BackendKind::Local, priority, QuotaLimits::default());
    Arc::new(LocalBackend::open(dir.path(), config).unwrap())
}

#[tokio::test]
async fn test_last_write_wins_on_disk() {
    let dir = TempDir::new().unwrap();
    let manager = connect(vec![local(&dir, 0)]).await;
    let u1 = user("u1");

    for n in 0..5 {
        manager
            .save(&u1, Category::Routes, "loop.json", &json!({ "version": n }))
            .await
            .unwrap();
    }

    assert_eq!(
        manager.load(&u1, Category::Routes, "loop.json").await.unwrap(),
        Some(json!({ "version": 4 }))
    );
    assert_eq!(manager.list(&u1, Category::Routes).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_overwrite_refreshes_creation_order() {
    let dir = TempDir::new().unwrap();
    let manager = connect(vec![local(&dir, 0)]).await;
    let u1 = user("u1");

    for key in ["a.json", "b.json", "c.json", "a.json"] {
        manager
            .save(&u1, Category::Routes, key, &json!({}))
            .await
            .unwrap();
    }

    assert_eq!(
        manager.list_user_data(&u1, Category::Routes).await,
        ["b.json", "c.json", "a.json"]
    );
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let backend = memory(BackendKind::Object, 0, QuotaLimits::default());
    let manager = connect_memory(&backend).await;
    let u1 = user("u1");
    let payload = json!({"name": "Loop", "distance_km": 42.0});

    backend.fail_next(Operation::Put, 3);
    let receipt = manager
        .save(&u1, Category::Routes, "loop.json", &payload)
        .await
        .unwrap();

    assert_eq!(receipt.backend, BackendKind::Object);
    assert_eq!(backend.write_count(), 1);
    assert_eq!(backend.len(), 1);
    assert_eq!(
        manager.load(&u1, Category::Routes, "loop.json").await.unwrap(),
        Some(payload)
    );
}

#[tokio::test]
async fn test_reads_fall_back_to_legacy_local_data() {
    let dir = TempDir::new().unwrap();
    let u1 = user("u1");
    {
        let manager = connect(vec![local(&dir, 0)]).await;
        manager
            .save(&u1, Category::Routes, "legacy.json", &json!({"from": "local"}))
            .await
            .unwrap();
    }

    let remote = memory(BackendKind::Document, 0, QuotaLimits::default());
    let manager = connect(vec![
        local(&dir, 1),
        Arc::clone(&remote) as Arc<dyn BackendAdapter>,
    ])
    .await;
    assert_eq!(manager.storage_info().active, BackendKind::Document);

    assert_eq!(
        manager.load(&u1, Category::Routes, "legacy.json").await.unwrap(),
        Some(json!({"from": "local"}))
    );

    // New writes go to the remote and shadow the local copy
    manager
        .save(&u1, Category::Routes, "legacy.json", &json!({"from": "remote"}))
        .await
        .unwrap();
    assert_eq!(
        manager.load(&u1, Category::Routes, "legacy.json").await.unwrap(),
        Some(json!({"from": "remote"}))
    );
    assert_eq!(remote.write_count(), 1);
}

#[tokio::test]
async fn test_failed_read_degrades_to_no_data() {
    let backend = memory(BackendKind::Object, 0, QuotaLimits::default());
    let manager = connect_memory(&backend).await;
    let u1 = user("u1");
    manager
        .save(&u1, Category::Routes, "a.json", &json!({}))
        .await
        .unwrap();

    backend.fail_next(Operation::Get, 10);
    assert_eq!(manager.load_data(&u1, Category::Routes, "a.json").await, None);
}

#[tokio::test]
async fn test_global_scope_for_models() {
    let backend = memory(BackendKind::Local, 0, limits(10_000, 0));
    let manager = connect_memory(&backend).await;

    manager
        .save(&Scope::Global, Category::Models, "route_model.json", &json!({"weights": [0.1, 0.2]}))
        .await
        .unwrap();
    assert!(manager
        .save(&Scope::Global, Category::Fitness, "x.json", &json!({}))
        .await
        .is_err());

    assert_eq!(
        manager.list_user_data(&Scope::Global, Category::Models).await,
        ["route_model.json"]
    );
}

#[tokio::test]
async fn test_usage_report() {
    let backend = memory(BackendKind::Local, 0, limits(1000, 0));
    let manager = connect_memory(&backend).await;
    let u1 = user("u1");
    manager
        .save(&u1, Category::Routes, "a.json", &common::payload_of_size(300))
        .await
        .unwrap();
    manager
        .save(&u1, Category::Fitness, "b.json", &json!({"ftp": 250}))
        .await
        .unwrap();

    let report = manager.usage_report(&u1).await.unwrap();
    assert_eq!(report.categories[&Category::Routes].count, 1);
    assert_eq!(report.categories[&Category::Routes].bytes, 300);
    assert_eq!(report.categories[&Category::Fitness].count, 1);
    assert!(report.scope_bytes > 300);
    assert!(!report.over_threshold);
    assert!(report.user_usage_percent > 30.0);
}

#[tokio::test]
async fn test_delete_then_load_is_absent() {
    let backend = memory(BackendKind::Local, 0, QuotaLimits::default());
    let manager = connect_memory(&backend).await;
    let u1 = user("u1");
    manager
        .save(&u1, Category::Routes, "a.json", &json!({}))
        .await
        .unwrap();

    manager.delete(&u1, Category::Routes, "a.json").await.unwrap();
    manager.delete(&u1, Category::Routes, "a.json").await.unwrap();
    assert_eq!(manager.load(&u1, Category::Routes, "a.json").await.unwrap(), None);
}
