//! crelay store: in-RAM versioned object store.
//!
//! Mirrors the apiserver semantics the relay depends on: every write bumps
//! `metadata.resourceVersion`, status writes are preconditioned on the
//! submitted version, merge patches follow RFC 7386. Conflicts and backend
//! failures can be injected per coordinate, and every call is counted.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use crelay_core::{
    resource_version, KindTarget, ObjectStore, ResourceCoordinate, StoreError, StoredObject, VersionToken,
};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::debug;

/// Per-operation call counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StoreCalls {
    pub gets: usize,
    pub patches: usize,
    pub status_updates: usize,
    pub deletes: usize,
    pub lists: usize,
}

impl StoreCalls {
    pub fn total(&self) -> usize {
        self.gets + self.patches + self.status_updates + self.deletes + self.lists
    }
}

#[derive(Default)]
struct Inner {
    objects: FxHashMap<ResourceCoordinate, Json>,
    next_rv: u64,
    conflicts: FxHashMap<ResourceCoordinate, u32>,
    write_failures: FxHashMap<ResourceCoordinate, StoreError>,
    delete_failure: Option<StoreError>,
    calls: StoreCalls,
}

impl Inner {
    fn bump(&mut self, at: &ResourceCoordinate) -> Option<VersionToken> {
        self.next_rv += 1;
        let rv = self.next_rv.to_string();
        let obj = self.objects.get_mut(at)?;
        set_meta(obj, "resourceVersion", Json::String(rv.clone()));
        Some(VersionToken(rv))
    }

    /// Consume an injected failure for a write at `at`, if any.
    fn injected_write_failure(&mut self, at: &ResourceCoordinate) -> Option<StoreError> {
        if let Some(err) = self.write_failures.get(at) {
            return Some(err.clone());
        }
        let remaining = self.conflicts.get_mut(at)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        // A concurrent writer wins the race: the stored version moves on.
        self.bump(at);
        Some(StoreError::Conflict)
    }
}

/// In-RAM `ObjectStore`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not wedge other assertions.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create or replace an object. `metadata.name`/`namespace` are set from `at`.
    pub fn insert(&self, at: &ResourceCoordinate, mut raw: Json) -> VersionToken {
        if !raw.is_object() {
            raw = Json::Object(serde_json::Map::new());
        }
        set_meta(&mut raw, "name", Json::String(at.name.clone()));
        set_meta(&mut raw, "namespace", Json::String(at.namespace.clone()));
        let mut inner = self.lock();
        inner.next_rv += 1;
        let rv = inner.next_rv.to_string();
        set_meta(&mut raw, "resourceVersion", Json::String(rv.clone()));
        inner.objects.insert(at.clone(), raw);
        VersionToken(rv)
    }

    /// Current raw object, if present.
    pub fn object(&self, at: &ResourceCoordinate) -> Option<Json> {
        self.lock().objects.get(at).cloned()
    }

    pub fn contains(&self, at: &ResourceCoordinate) -> bool {
        self.lock().objects.contains_key(at)
    }

    /// Reject the next `n` writes at `at` with a conflict, advancing the stored
    /// version each time as a concurrent writer would.
    pub fn inject_conflicts(&self, at: &ResourceCoordinate, n: u32) {
        self.lock().conflicts.insert(at.clone(), n);
    }

    /// Conflicts injected at `at` that have not fired yet.
    pub fn pending_conflicts(&self, at: &ResourceCoordinate) -> u32 {
        self.lock().conflicts.get(at).copied().unwrap_or(0)
    }

    /// Fail every write at `at` with `err` until cleared.
    pub fn fail_writes(&self, at: &ResourceCoordinate, err: StoreError) {
        self.lock().write_failures.insert(at.clone(), err);
    }

    /// Fail every delete with `err` (`None` restores normal deletes).
    pub fn fail_deletes(&self, err: Option<StoreError>) {
        self.lock().delete_failure = err;
    }

    pub fn calls(&self) -> StoreCalls {
        self.lock().calls
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, at: &ResourceCoordinate) -> Result<StoredObject, StoreError> {
        let mut inner = self.lock();
        inner.calls.gets += 1;
        let raw = inner.objects.get(at).cloned().ok_or(StoreError::NotFound)?;
        StoredObject::from_raw(raw)
    }

    async fn patch_merge(&self, at: &ResourceCoordinate, patch: &Json) -> Result<VersionToken, StoreError> {
        let mut inner = self.lock();
        inner.calls.patches += 1;
        if !inner.objects.contains_key(at) {
            return Err(StoreError::NotFound);
        }
        if let Some(err) = inner.injected_write_failure(at) {
            debug!(target_obj = %at, error = %err, "memory store rejected patch");
            return Err(err);
        }
        let obj = inner.objects.get_mut(at).ok_or(StoreError::NotFound)?;
        // A patch carrying a resourceVersion is a precondition.
        if let Some(want) = resource_version(patch) {
            if resource_version(obj) != Some(want) {
                return Err(StoreError::Conflict);
            }
        }
        merge_patch(obj, patch);
        inner.bump(at).ok_or(StoreError::NotFound)
    }

    async fn update_status(&self, at: &ResourceCoordinate, object: &StoredObject) -> Result<VersionToken, StoreError> {
        let mut inner = self.lock();
        inner.calls.status_updates += 1;
        if !inner.objects.contains_key(at) {
            return Err(StoreError::NotFound);
        }
        if let Some(err) = inner.injected_write_failure(at) {
            debug!(target_obj = %at, error = %err, "memory store rejected status update");
            return Err(err);
        }
        let obj = inner.objects.get_mut(at).ok_or(StoreError::NotFound)?;
        if let Some(want) = resource_version(&object.raw) {
            if resource_version(obj) != Some(want) {
                return Err(StoreError::Conflict);
            }
        }
        // Only the status section is taken from the submitted object.
        if let Some(map) = obj.as_object_mut() {
            match object.raw.get("status") {
                Some(status) => {
                    map.insert("status".into(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        inner.bump(at).ok_or(StoreError::NotFound)
    }

    async fn delete(&self, at: &ResourceCoordinate) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.calls.deletes += 1;
        if let Some(err) = inner.delete_failure.clone() {
            return Err(err);
        }
        inner.objects.remove(at).map(|_| ()).ok_or(StoreError::NotFound)
    }

    async fn list_by_label(
        &self,
        target: &KindTarget,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<StoredObject>, StoreError> {
        let wanted = parse_selector(selector)?;
        let mut inner = self.lock();
        inner.calls.lists += 1;
        let mut hits: Vec<(&ResourceCoordinate, &Json)> = inner
            .objects
            .iter()
            .filter(|(at, _)| at.namespace == namespace && at.target() == *target)
            .filter(|(_, raw)| labels_match(raw, &wanted))
            .collect();
        hits.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        hits.into_iter().map(|(_, raw)| StoredObject::from_raw(raw.clone())).collect()
    }
}

fn set_meta(obj: &mut Json, key: &str, value: Json) {
    let Some(map) = obj.as_object_mut() else { return };
    let meta = map.entry("metadata").or_insert_with(|| Json::Object(serde_json::Map::new()));
    if !meta.is_object() {
        *meta = Json::Object(serde_json::Map::new());
    }
    if let Some(m) = meta.as_object_mut() {
        m.insert(key.to_string(), value);
    }
}

/// Apply an RFC 7386 JSON merge patch to `target` in place.
pub fn merge_patch(target: &mut Json, patch: &Json) {
    let Json::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Json::Object(serde_json::Map::new());
    }
    let Some(target_map) = target.as_object_mut() else { return };
    for (k, v) in patch_map {
        if v.is_null() {
            target_map.remove(k);
        } else {
            merge_patch(target_map.entry(k.clone()).or_insert(Json::Null), v);
        }
    }
}

fn parse_selector(selector: &str) -> Result<Vec<(String, String)>, StoreError> {
    let mut out = Vec::new();
    for term in selector.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (k, v) = term
            .split_once('=')
            .ok_or_else(|| StoreError::Backend(format!("unsupported label selector term: {}", term)))?;
        let v = v.strip_prefix('=').unwrap_or(v);
        out.push((k.trim().to_string(), v.trim().to_string()));
    }
    Ok(out)
}

fn labels_match(raw: &Json, wanted: &[(String, String)]) -> bool {
    let labels = raw.get("metadata").and_then(|m| m.get("labels")).and_then(|l| l.as_object());
    wanted.iter().all(|(k, v)| {
        labels
            .and_then(|l| l.get(k))
            .and_then(|x| x.as_str())
            .map(|x| x == v)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_patch_replaces_nested_arrays_and_keeps_siblings() {
        let mut doc = json!({
            "spec": {
                "datasetMetadata": {
                    "datasetInfo": { "subsets": [{"id": 0}], "features": ["a"] },
                    "languages": ["en"]
                },
                "other": 1
            }
        });
        merge_patch(&mut doc, &json!({"spec": {"datasetMetadata": {"datasetInfo": {"subsets": [{"id": 1}]}}}}));
        assert_eq!(doc["spec"]["datasetMetadata"]["datasetInfo"]["subsets"], json!([{"id": 1}]));
        assert_eq!(doc["spec"]["datasetMetadata"]["datasetInfo"]["features"], json!(["a"]));
        assert_eq!(doc["spec"]["datasetMetadata"]["languages"], json!(["en"]));
        assert_eq!(doc["spec"]["other"], json!(1));
    }

    #[test]
    fn merge_patch_null_removes_and_creates_missing_parents() {
        let mut doc = json!({"a": 1, "b": 2});
        merge_patch(&mut doc, &json!({"a": null, "c": {"d": true}}));
        assert_eq!(doc, json!({"b": 2, "c": {"d": true}}));

        let mut scalar_parent = json!({"spec": "flat"});
        merge_patch(&mut scalar_parent, &json!({"spec": {"x": 1}}));
        assert_eq!(scalar_parent, json!({"spec": {"x": 1}}));
    }

    #[test]
    fn selector_parsing_accepts_single_and_double_equals() {
        let sel = parse_selector("serviceType=inferenceService, tier==gpu").expect("valid");
        assert_eq!(
            sel,
            vec![
                ("serviceType".to_string(), "inferenceService".to_string()),
                ("tier".to_string(), "gpu".to_string())
            ]
        );
        assert!(parse_selector("").expect("empty").is_empty());
        assert!(parse_selector("exists-only").is_err());
    }

    #[test]
    fn labels_match_requires_every_term() {
        let raw = json!({"metadata": {"labels": {"a": "1", "b": "2"}}});
        assert!(labels_match(&raw, &[("a".into(), "1".into())]));
        assert!(!labels_match(&raw, &[("a".into(), "1".into()), ("c".into(), "3".into())]));
        assert!(labels_match(&json!({}), &[]));
    }
}
