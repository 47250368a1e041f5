use std::sync::Arc;
use std::time::Duration;

use crelay_apply::{
    classify, store_failure, ApplyMutation, CascadeDeleter, ConflictRetryUpdater, DeleteOutcome, StrategyKind,
};
use crelay_core::{
    KindTable, KindTarget, ObjectStore, RelayError, RelayResult, ResourceCoordinate, VersionToken,
};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// How the trigger object is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerRef {
    /// Fully qualified, independent of the target.
    Explicit(ResourceCoordinate),
    /// Named object living under the target's resolved group/version/resource
    /// and namespace.
    SameResource { name: String },
}

/// One completion reported by an external job.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub short_kind: String,
    pub namespace: String,
    pub target_name: String,
    pub trigger: TriggerRef,
    pub payload: Json,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayOutcome {
    pub target: ResourceCoordinate,
    pub strategy: StrategyKind,
    pub resource_version: VersionToken,
    pub trigger: ResourceCoordinate,
    pub cleanup: DeleteOutcome,
}

impl RelayOutcome {
    /// `<resource> <namespace>/<name> updated successfully`
    pub fn message(&self) -> String {
        format!(
            "{} {}/{} updated successfully",
            self.target.resource, self.target.namespace, self.target.name
        )
    }
}

/// Where the label-selected service listing looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceListing {
    pub target: KindTarget,
    pub selector: String,
}

impl Default for ServiceListing {
    fn default() -> Self {
        Self {
            target: KindTarget::new("ray.io", "v1", "rayservices"),
            selector: "serviceType=inferenceService".to_string(),
        }
    }
}

/// Resource completion relay over an injected store handle.
pub struct Relay {
    store: Arc<dyn ObjectStore>,
    kinds: KindTable,
    updater: ConflictRetryUpdater,
    deleter: CascadeDeleter,
    request_timeout: Option<Duration>,
    services: ServiceListing,
}

impl Relay {
    pub fn new(store: Arc<dyn ObjectStore>, kinds: KindTable) -> Self {
        Self {
            store,
            kinds,
            updater: ConflictRetryUpdater::default(),
            deleter: CascadeDeleter::new(),
            request_timeout: None,
            services: ServiceListing::default(),
        }
    }

    pub fn with_updater(mut self, updater: ConflictRetryUpdater) -> Self {
        self.updater = updater;
        self
    }

    /// Bound on conflict backoff for a single call.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_services(mut self, services: ServiceListing) -> Self {
        self.services = services;
        self
    }

    pub fn kinds(&self) -> &KindTable {
        &self.kinds
    }

    pub fn services(&self) -> &ServiceListing {
        &self.services
    }

    /// Resolve, classify, mutate, then delete the trigger.
    ///
    /// The trigger is only deleted after the store confirmed the mutation. A
    /// failed deletion yields `CleanupFailed` with the mutation left in place.
    /// A trigger addressing the target itself is rejected before any store call.
    pub async fn relay(&self, req: RelayRequest) -> RelayResult<RelayOutcome> {
        let t0 = std::time::Instant::now();
        counter!("relay_attempts", 1u64);
        let span = info_span!(
            "relay",
            id = %Uuid::new_v4(),
            kind = %req.short_kind,
            ns = %req.namespace,
            name = %req.target_name,
        );
        let res = self.relay_inner(req).instrument(span).await;
        match &res {
            Ok(_) => {
                histogram!("relay_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
                counter!("relay_ok", 1u64);
            }
            Err(e) => {
                counter!("relay_err", 1u64, "kind" => e.kind().as_str());
            }
        }
        res
    }

    async fn relay_inner(&self, req: RelayRequest) -> RelayResult<RelayOutcome> {
        let deadline = self.request_timeout.map(|t| tokio::time::Instant::now() + t);

        let kind = self.kinds.resolve(&req.short_kind)?;
        let target = kind.at(&req.namespace, &req.target_name);
        let trigger = match req.trigger {
            TriggerRef::Explicit(at) => at,
            TriggerRef::SameResource { name } => kind.at(&req.namespace, &name),
        };
        if trigger == target {
            return Err(RelayError::TriggerIsTarget(trigger.to_string()));
        }
        let mutation = classify(req.payload)?;

        let current = if mutation.needs_current() {
            Some(self.store.get(&target).await.map_err(|e| store_failure(&target, e))?)
        } else {
            None
        };
        let version = self
            .updater
            .apply(self.store.as_ref(), &target, current, &mutation, deadline)
            .await?;
        info!(target_obj = %target, rv = %version, strategy = mutation.kind().as_str(), "mutation committed");

        let cleanup = self.deleter.delete(self.store.as_ref(), &trigger, &target).await?;
        if cleanup == DeleteOutcome::AlreadyAbsent {
            warn!(trigger = %trigger, "trigger was already gone");
        }
        Ok(RelayOutcome { target, strategy: mutation.kind(), resource_version: version, trigger, cleanup })
    }

    /// Raw objects of the configured service resource matching the label selector.
    pub async fn list_services(&self, namespace: &str) -> RelayResult<Vec<Json>> {
        let items = self
            .store
            .list_by_label(&self.services.target, namespace, &self.services.selector)
            .await
            .map_err(|e| RelayError::StoreUnavailable(e.to_string()))?;
        Ok(items.into_iter().map(|o| o.raw).collect())
    }
}
