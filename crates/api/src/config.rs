//! Startup flags shared by the server and the operator CLI.

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use crelay_apply::ConflictRetryUpdater;
use crelay_core::kinds::{DEFAULT_TARGET_GROUP, DEFAULT_TARGET_VERSION};
use crelay_core::{BackoffPolicy, ConfigError, KindTable, KindTarget, ObjectStore};

use crate::inference::{HttpForwarder, InferenceProxy, DEFAULT_CLUSTER_DOMAIN};
use crate::relay::{Relay, ServiceListing};

#[derive(Args, Debug, Clone)]
pub struct RelayArgs {
    /// API group of the target resources
    #[arg(long = "target-group", env = "CRELAY_TARGET_GROUP", default_value = DEFAULT_TARGET_GROUP)]
    pub target_group: String,

    /// API version of the target resources
    #[arg(long = "target-version", env = "CRELAY_TARGET_VERSION", default_value = DEFAULT_TARGET_VERSION)]
    pub target_version: String,

    /// Extra kind tokens, e.g. "evals=example.io/v1/evaluations,..."
    #[arg(long = "extra-kinds", env = "CRELAY_EXTRA_KINDS")]
    pub extra_kinds: Option<String>,

    /// Write attempts per relay call, including the first
    #[arg(long = "max-attempts", env = "CRELAY_MAX_ATTEMPTS", default_value_t = 4)]
    pub max_attempts: u32,

    /// First conflict backoff in milliseconds
    #[arg(long = "backoff-base-ms", env = "CRELAY_BACKOFF_BASE_MS", default_value_t = 10)]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff in milliseconds
    #[arg(long = "backoff-max-ms", env = "CRELAY_BACKOFF_MAX_MS", default_value_t = 10_000)]
    pub backoff_max_ms: u64,

    /// Per-call bound on conflict backoff; unset means no bound
    #[arg(long = "request-timeout-secs", env = "CRELAY_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Label selector for the service listing
    #[arg(long = "service-label", env = "INFERENCE_SERVICE_LABEL", default_value = "serviceType=inferenceService")]
    pub service_label: String,

    #[arg(long = "service-group", env = "RAYGROUP", default_value = "ray.io")]
    pub service_group: String,

    #[arg(long = "service-version", env = "RAY_SERVICE_VERSION", default_value = "v1")]
    pub service_version: String,

    #[arg(long = "service-resource", env = "RAY_SERVICE_RESOURCE", default_value = "rayservices")]
    pub service_resource: String,

    /// DNS suffix of in-cluster services for the inference proxy
    #[arg(long = "cluster-domain", env = "CRELAY_CLUSTER_DOMAIN", default_value = DEFAULT_CLUSTER_DOMAIN)]
    pub cluster_domain: String,

    /// Timeout for a forwarded chat completion
    #[arg(long = "inference-timeout-secs", env = "CRELAY_INFERENCE_TIMEOUT_SECS", default_value_t = 120)]
    pub inference_timeout_secs: u64,
}

impl RelayArgs {
    /// Built-in tokens under the configured group/version plus any extras.
    pub fn kind_table(&self) -> Result<KindTable, ConfigError> {
        let mut table = KindTable::builtin_under(&self.target_group, &self.target_version);
        if let Some(extra) = self.extra_kinds.as_deref() {
            table.extend_from_spec(extra)?;
        }
        Ok(table)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        let base = BackoffPolicy::default();
        BackoffPolicy {
            steps: self.max_attempts.max(1),
            initial: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            ..base
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn services(&self) -> ServiceListing {
        ServiceListing {
            target: KindTarget::new(&self.service_group, &self.service_version, &self.service_resource),
            selector: self.service_label.clone(),
        }
    }

    /// Assemble a relay over `store` from these flags.
    pub fn build(&self, store: Arc<dyn ObjectStore>) -> Result<Relay, ConfigError> {
        let kinds = self.kind_table()?;
        Ok(Relay::new(store, kinds)
            .with_updater(ConflictRetryUpdater::new(self.backoff()))
            .with_request_timeout(self.request_timeout())
            .with_services(self.services()))
    }

    /// Chat proxy over `store` for the configured service resource.
    pub fn inference(&self, store: Arc<dyn ObjectStore>) -> Result<InferenceProxy, ConfigError> {
        let forwarder = HttpForwarder::new(Duration::from_secs(self.inference_timeout_secs.max(1)))
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(InferenceProxy::new(store, self.services().target, Arc::new(forwarder))
            .with_cluster_domain(self.cluster_domain.clone()))
    }
}
