//! crelay kubehub: client bootstrap and a Kubernetes-backed `ObjectStore`.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use crelay_core::{KindTarget, ObjectStore, ResourceCoordinate, StoreError, StoredObject, VersionToken};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject},
    Client,
};
use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info};

/// Build a client from `KUBECONFIG` / local kubeconfig, falling back to in-cluster config.
pub async fn connect() -> Result<Client> {
    match std::env::var("KUBECONFIG") {
        Ok(path) if !path.is_empty() => info!(kubeconfig = %path, "using kubeconfig file"),
        _ => info!("KUBECONFIG unset; using default kubeconfig or in-cluster config"),
    }
    Client::try_default().await.context("building kube client")
}

/// Dynamic `ApiResource` for a served plural. The relay never creates objects,
/// so the kind stays empty.
pub fn api_resource(target: &KindTarget) -> ApiResource {
    let api_version = if target.group.is_empty() {
        target.version.clone()
    } else {
        format!("{}/{}", target.group, target.version)
    };
    ApiResource {
        group: target.group.clone(),
        version: target.version.clone(),
        api_version,
        kind: String::new(),
        plural: target.resource.clone(),
    }
}

/// `ObjectStore` over the Kubernetes API using dynamic objects.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect().await?))
    }

    fn api(&self, target: &KindTarget, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &api_resource(target))
    }

    fn api_at(&self, at: &ResourceCoordinate) -> Api<DynamicObject> {
        self.api(&at.target(), &at.namespace)
    }
}

/// Map a kube error into the store taxonomy: 409 is a version conflict, 404 is absence.
pub fn store_error(op: &'static str, e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict,
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound,
        other => {
            counter!("kube_store_errors", 1u64, "op" => op);
            StoreError::Backend(format!("{}: {}", op, other))
        }
    }
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn stored(obj: &DynamicObject) -> Result<StoredObject, StoreError> {
    let mut raw = serde_json::to_value(obj).map_err(|e| StoreError::Backend(format!("serializing object: {}", e)))?;
    strip_managed_fields(&mut raw);
    StoredObject::from_raw(raw)
}

fn version_of(obj: &DynamicObject) -> Result<VersionToken, StoreError> {
    obj.metadata
        .resource_version
        .clone()
        .map(VersionToken)
        .ok_or_else(|| StoreError::Backend("response missing metadata.resourceVersion".into()))
}

#[async_trait::async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, at: &ResourceCoordinate) -> Result<StoredObject, StoreError> {
        let obj = self.api_at(at).get(&at.name).await.map_err(|e| store_error("get", e))?;
        debug!(target_obj = %at, rv = ?obj.metadata.resource_version, "fetched object");
        stored(&obj)
    }

    async fn patch_merge(&self, at: &ResourceCoordinate, patch: &Json) -> Result<VersionToken, StoreError> {
        let obj = self
            .api_at(at)
            .patch(&at.name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| store_error("patch", e))?;
        version_of(&obj)
    }

    async fn update_status(&self, at: &ResourceCoordinate, object: &StoredObject) -> Result<VersionToken, StoreError> {
        let data = serde_json::to_vec(&object.raw).map_err(|e| StoreError::Backend(format!("serializing object: {}", e)))?;
        let obj = self
            .api_at(at)
            .replace_status(&at.name, &PostParams::default(), data)
            .await
            .map_err(|e| store_error("replace_status", e))?;
        version_of(&obj)
    }

    async fn delete(&self, at: &ResourceCoordinate) -> Result<(), StoreError> {
        self.api_at(at)
            .delete(&at.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| store_error("delete", e))
    }

    async fn list_by_label(
        &self,
        target: &KindTarget,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<StoredObject>, StoreError> {
        let lp = ListParams::default().labels(selector);
        let list = self.api(target, namespace).list(&lp).await.map_err(|e| store_error("list", e))?;
        list.items.iter().map(stored).collect()
    }
}
