use std::sync::Arc;
use std::time::Duration;

use crelay_api::{DeleteOutcome, ErrorKind, Relay, RelayError, RelayRequest, StrategyKind, TriggerRef};
use crelay_apply::ConflictRetryUpdater;
use crelay_core::{BackoffPolicy, KindTable, NoJitter, ObjectStore, ResourceCoordinate, StoreError};
use crelay_store::MemoryStore;
use serde_json::{json, Value};

fn scoring(name: &str) -> ResourceCoordinate {
    ResourceCoordinate::new("extension.datatunerx.io", "v1beta1", "scorings", "ml", name)
}

fn job(name: &str) -> ResourceCoordinate {
    ResourceCoordinate::new("batch.example.io", "v1", "scoringjobs", "ml", name)
}

fn relay_over(store: &Arc<MemoryStore>) -> Relay {
    let handle: Arc<dyn ObjectStore> = store.clone();
    let updater = ConflictRetryUpdater::new(BackoffPolicy::default()).with_jitter(Arc::new(NoJitter));
    Relay::new(handle, KindTable::builtin()).with_updater(updater)
}

fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.insert(
        &scoring("run-7"),
        json!({
            "spec": {
                "datasetMetadata": {"datasetInfo": {"subsets": [], "features": ["q"]}},
                "scorer": "bleu"
            },
            "status": {"phase": "Running"}
        }),
    );
    store.insert(&job("run-7-job"), json!({"spec": {"image": "scorer:1"}}));
    store
}

fn request(kind: &str, payload: Value) -> RelayRequest {
    RelayRequest {
        short_kind: kind.to_string(),
        namespace: "ml".to_string(),
        target_name: "run-7".to_string(),
        trigger: TriggerRef::Explicit(job("run-7-job")),
        payload,
    }
}

#[tokio::test(start_paused = true)]
async fn scoring_subsets_replaced_and_trigger_deleted() {
    let store = seeded();
    let relay = relay_over(&store);

    let out = relay
        .relay(request("scorings", json!([{"id": 1}, {"id": 2}])))
        .await
        .expect("relay ok");

    assert_eq!(out.strategy, StrategyKind::CollectionReplacement);
    assert_eq!(out.cleanup, DeleteOutcome::Deleted);
    assert_eq!(out.message(), "scorings ml/run-7 updated successfully");

    let obj = store.object(&scoring("run-7")).expect("target kept");
    assert_eq!(obj["spec"]["datasetMetadata"]["datasetInfo"]["subsets"], json!([{"id": 1}, {"id": 2}]));
    assert_eq!(obj["spec"]["datasetMetadata"]["datasetInfo"]["features"], json!(["q"]));
    assert_eq!(obj["spec"]["scorer"], json!("bleu"));
    assert_eq!(obj["status"], json!({"phase": "Running"}));
    assert_eq!(obj["metadata"]["resourceVersion"], json!(out.resource_version.as_str()));
    assert!(!store.contains(&job("run-7-job")));
}

#[tokio::test(start_paused = true)]
async fn unknown_kind_makes_no_store_calls() {
    let store = seeded();
    let relay = relay_over(&store);

    let err = relay.relay(request("widgets", json!([]))).await.unwrap_err();

    assert!(matches!(err, RelayError::UnknownResourceKind(ref t) if t == "widgets"));
    assert_eq!(store.calls().total(), 0);
    assert!(store.contains(&job("run-7-job")));
}

#[tokio::test(start_paused = true)]
async fn scalar_payload_makes_no_store_calls() {
    let store = seeded();
    let relay = relay_over(&store);

    let err = relay.relay(request("scorings", json!("just a string"))).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedPayloadShape);
    assert!(err.is_input_error());
    assert_eq!(store.calls().total(), 0);
}

#[tokio::test(start_paused = true)]
async fn status_payload_leaves_spec_untouched() {
    let store = seeded();
    let relay = relay_over(&store);
    let before = store.object(&scoring("run-7")).expect("seeded");

    let status = json!({"phase": "Succeeded", "score": "0.82"});
    let out = relay.relay(request("scorings", status.clone())).await.expect("relay ok");

    assert_eq!(out.strategy, StrategyKind::StatusReplacement);
    let obj = store.object(&scoring("run-7")).expect("target kept");
    assert_eq!(obj["status"], status);
    assert_eq!(obj["spec"], before["spec"]);
    assert_eq!(store.calls().status_updates, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_cleanup_reports_committed_mutation() {
    let store = seeded();
    store.fail_deletes(Some(StoreError::Backend("etcd timeout".into())));
    let relay = relay_over(&store);

    let err = relay.relay(request("scorings", json!([{"id": 3}]))).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CleanupFailed);
    assert!(err.mutation_committed());
    let obj = store.object(&scoring("run-7")).expect("target kept");
    assert_eq!(obj["spec"]["datasetMetadata"]["datasetInfo"]["subsets"], json!([{"id": 3}]));
    assert!(store.contains(&job("run-7-job")));
}

#[tokio::test(start_paused = true)]
async fn missing_trigger_is_not_an_error() {
    let store = seeded();
    let relay = relay_over(&store);
    let mut req = request("scorings", json!([]));
    req.trigger = TriggerRef::Explicit(job("already-reaped"));

    let out = relay.relay(req).await.expect("relay ok");

    assert_eq!(out.cleanup, DeleteOutcome::AlreadyAbsent);
}

#[tokio::test(start_paused = true)]
async fn missing_target_leaves_trigger_in_place() {
    let store = seeded();
    let relay = relay_over(&store);
    let mut req = request("scorings", json!({"phase": "Done"}));
    req.target_name = "run-8".to_string();

    let err = relay.relay(req).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TargetNotFound);
    assert_eq!(store.calls().deletes, 0);
    assert!(store.contains(&job("run-7-job")));
}

#[tokio::test(start_paused = true)]
async fn same_resource_trigger_uses_target_kind() {
    let store = seeded();
    store.insert(&scoring("run-7-done"), json!({"spec": {}}));
    let relay = relay_over(&store);
    let mut req = request("scorings", json!([{"id": 9}]));
    req.trigger = TriggerRef::SameResource { name: "run-7-done".to_string() };

    let out = relay.relay(req).await.expect("relay ok");

    assert_eq!(out.trigger, scoring("run-7-done"));
    assert!(!store.contains(&scoring("run-7-done")));
    assert!(store.contains(&scoring("run-7")));
    assert!(store.contains(&job("run-7-job")));
}

#[tokio::test(start_paused = true)]
async fn exhausted_conflicts_keep_trigger() {
    let store = seeded();
    store.inject_conflicts(&scoring("run-7"), 10);
    let relay = relay_over(&store);

    let err = relay.relay(request("scorings", json!([{"id": 1}]))).await.unwrap_err();

    assert!(matches!(err, RelayError::ConflictRetryExhausted { attempts: 4, .. }));
    assert_eq!(store.calls().deletes, 0);
    let obj = store.object(&scoring("run-7")).expect("target kept");
    assert_eq!(obj["spec"]["datasetMetadata"]["datasetInfo"]["subsets"], json!([]));
}

#[tokio::test(start_paused = true)]
async fn request_timeout_bounds_backoff() {
    let store = seeded();
    store.inject_conflicts(&scoring("run-7"), 10);
    let updater = ConflictRetryUpdater::new(BackoffPolicy { steps: 10, ..BackoffPolicy::default() })
        .with_jitter(Arc::new(NoJitter));
    let handle: Arc<dyn ObjectStore> = store.clone();
    let relay = Relay::new(handle, KindTable::builtin())
        .with_updater(updater)
        .with_request_timeout(Some(Duration::from_millis(100)));

    let err = relay.relay(request("scorings", json!([]))).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    assert!(store.contains(&job("run-7-job")));
}

#[tokio::test(start_paused = true)]
async fn services_listed_by_label() {
    let store = seeded();
    let svc = |name: &str| ResourceCoordinate::new("ray.io", "v1", "rayservices", "ml", name);
    store.insert(&svc("llm"), json!({"metadata": {"labels": {"serviceType": "inferenceService"}}}));
    store.insert(&svc("batch"), json!({"metadata": {"labels": {"serviceType": "batch"}}}));
    let relay = relay_over(&store);

    let items = relay.list_services("ml").await.expect("listed");

    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["metadata"]["name"], json!("llm"));
}

#[tokio::test(start_paused = true)]
async fn trigger_naming_the_target_is_rejected_untouched() {
    let store = seeded();
    let before = store.object(&scoring("run-7")).expect("seeded");
    let relay = relay_over(&store);

    let mut same_name = request("scorings", json!([{"id": 1}]));
    same_name.trigger = TriggerRef::SameResource { name: "run-7".to_string() };
    let err = relay.relay(same_name).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TriggerIsTarget);
    assert!(err.is_input_error());

    let mut explicit = request("scorings", json!({"phase": "Done"}));
    explicit.trigger = TriggerRef::Explicit(scoring("run-7"));
    let err = relay.relay(explicit).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TriggerIsTarget);

    assert_eq!(store.calls().total(), 0);
    assert_eq!(store.object(&scoring("run-7")), Some(before));
}
