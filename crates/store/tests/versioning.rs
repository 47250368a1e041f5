#![forbid(unsafe_code)]

use crelay_core::{KindTarget, ObjectStore, ResourceCoordinate, StoreError};
use crelay_store::MemoryStore;
use serde_json::json;

fn scoring(name: &str) -> ResourceCoordinate {
    ResourceCoordinate::new("extension.datatunerx.io", "v1beta1", "scorings", "ml", name)
}

#[tokio::test]
async fn every_write_advances_the_version() {
    let store = MemoryStore::new();
    let at = scoring("run-7");
    let v0 = store.insert(&at, json!({"spec": {"a": 1}}));

    let v1 = store.patch_merge(&at, &json!({"spec": {"b": 2}})).await.expect("patch");
    assert_ne!(v0, v1);

    let mut obj = store.get(&at).await.expect("get");
    assert_eq!(obj.version, v1);
    obj.raw["status"] = json!({"phase": "done"});
    let v2 = store.update_status(&at, &obj).await.expect("status");
    assert_ne!(v1, v2);

    let after = store.object(&at).expect("present");
    assert_eq!(after["spec"], json!({"a": 1, "b": 2}));
    assert_eq!(after["status"], json!({"phase": "done"}));
    assert_eq!(after["metadata"]["name"], json!("run-7"));
    assert_eq!(after["metadata"]["namespace"], json!("ml"));
}

#[tokio::test]
async fn stale_status_write_conflicts() {
    let store = MemoryStore::new();
    let at = scoring("run-7");
    store.insert(&at, json!({"spec": {}}));

    let stale = store.get(&at).await.expect("get");
    store.patch_merge(&at, &json!({"spec": {"touched": true}})).await.expect("patch");

    let err = store.update_status(&at, &stale).await.unwrap_err();
    assert_eq!(err, StoreError::Conflict);
}

#[tokio::test]
async fn status_update_ignores_spec_changes_in_submitted_object() {
    let store = MemoryStore::new();
    let at = scoring("run-7");
    store.insert(&at, json!({"spec": {"keep": true}}));

    let mut obj = store.get(&at).await.expect("get");
    obj.raw["spec"] = json!({"keep": false});
    obj.raw["status"] = json!({"score": 0.9});
    store.update_status(&at, &obj).await.expect("status");

    let after = store.object(&at).expect("present");
    assert_eq!(after["spec"], json!({"keep": true}));
    assert_eq!(after["status"], json!({"score": 0.9}));
}

#[tokio::test]
async fn injected_conflicts_fire_then_clear() {
    let store = MemoryStore::new();
    let at = scoring("run-7");
    let v0 = store.insert(&at, json!({"spec": {"x": 1}}));
    store.inject_conflicts(&at, 2);

    assert_eq!(store.patch_merge(&at, &json!({"spec": {"x": 2}})).await, Err(StoreError::Conflict));
    assert_eq!(store.pending_conflicts(&at), 1);
    assert_eq!(store.patch_merge(&at, &json!({"spec": {"x": 2}})).await, Err(StoreError::Conflict));
    // conflicting writes left the content alone but moved the version
    let mid = store.get(&at).await.expect("get");
    assert_eq!(mid.raw["spec"], json!({"x": 1}));
    assert_ne!(mid.version, v0);

    store.patch_merge(&at, &json!({"spec": {"x": 2}})).await.expect("third write lands");
    assert_eq!(store.object(&at).expect("present")["spec"], json!({"x": 2}));
}

#[tokio::test]
async fn deletes_report_absence_and_injected_failures() {
    let store = MemoryStore::new();
    let at = ResourceCoordinate::new("batch.example.io", "v1", "events", "ml", "evt");
    store.insert(&at, json!({}));

    store.fail_deletes(Some(StoreError::Backend("apiserver down".into())));
    assert!(matches!(store.delete(&at).await, Err(StoreError::Backend(_))));
    assert!(store.contains(&at));

    store.fail_deletes(None);
    store.delete(&at).await.expect("first delete");
    assert_eq!(store.delete(&at).await, Err(StoreError::NotFound));
    assert_eq!(store.calls().deletes, 3);
}

#[tokio::test]
async fn writes_to_missing_objects_are_not_found() {
    let store = MemoryStore::new();
    let at = scoring("ghost");
    assert_eq!(store.patch_merge(&at, &json!({"spec": {}})).await, Err(StoreError::NotFound));
    assert!(matches!(store.get(&at).await, Err(StoreError::NotFound)));
}

#[tokio::test]
async fn list_by_label_filters_scope_and_labels() {
    let store = MemoryStore::new();
    let services = KindTarget::new("ray.io", "v1", "rayservices");
    store.insert(&services.at("ml", "b"), json!({"metadata": {"labels": {"serviceType": "inferenceService"}}}));
    store.insert(&services.at("ml", "a"), json!({"metadata": {"labels": {"serviceType": "inferenceService"}}}));
    store.insert(&services.at("ml", "c"), json!({"metadata": {"labels": {"serviceType": "batch"}}}));
    store.insert(&services.at("other", "d"), json!({"metadata": {"labels": {"serviceType": "inferenceService"}}}));
    store.insert(&scoring("e"), json!({"metadata": {"labels": {"serviceType": "inferenceService"}}}));

    let hits = store.list_by_label(&services, "ml", "serviceType=inferenceService").await.expect("list");
    let names: Vec<_> = hits.iter().map(|o| o.raw["metadata"]["name"].as_str().unwrap_or_default().to_string()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(store.calls().lists, 1);
}
