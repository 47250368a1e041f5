use std::sync::Arc;

use crelay_core::{
    BackoffPolicy, Jitter, ObjectStore, RelayError, ResourceCoordinate, StoreError, StoredObject, ThreadRngJitter,
    VersionToken,
};
use metrics::counter;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::strategy::ApplyMutation;

/// Read-modify-write loop retrying version conflicts with bounded backoff.
///
/// Only `StoreError::Conflict` is retried. After a conflict the next attempt
/// re-reads the object, so a stale version token is never resubmitted.
#[derive(Clone)]
pub struct ConflictRetryUpdater {
    policy: BackoffPolicy,
    jitter: Arc<dyn Jitter>,
}

impl Default for ConflictRetryUpdater {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl ConflictRetryUpdater {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, jitter: Arc::new(ThreadRngJitter) }
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn Jitter>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Apply `mutation` to the object at `at`.
    ///
    /// `current` seeds the first attempt for strategies that need the whole
    /// object; it is discarded after any conflict. Backoff sleeps are cut short
    /// by `deadline`.
    pub async fn apply(
        &self,
        store: &dyn ObjectStore,
        at: &ResourceCoordinate,
        current: Option<StoredObject>,
        mutation: &dyn ApplyMutation,
        deadline: Option<Instant>,
    ) -> Result<VersionToken, RelayError> {
        let attempts = self.policy.attempts();
        let mut current = current;
        for attempt in 0..attempts {
            if mutation.needs_current() && current.is_none() {
                current = Some(store.get(at).await.map_err(|e| store_failure(at, e))?);
            }
            debug!(target_obj = %at, attempt, strategy = mutation.kind().as_str(), "write attempt");
            match mutation.apply_once(store, at, current.as_ref()).await {
                Ok(version) => return Ok(version),
                Err(StoreError::Conflict) => {
                    counter!("relay_conflicts", 1u64);
                    warn!(target_obj = %at, attempt, "version conflict");
                    current = None;
                    if attempt + 1 < attempts {
                        let delay = self.policy.delay_for(attempt, self.jitter.sample());
                        sleep_or_deadline(delay, deadline, at).await?;
                    }
                }
                Err(e) => return Err(store_failure(at, e)),
            }
        }
        Err(RelayError::ConflictRetryExhausted { target: at.to_string(), attempts })
    }
}

async fn sleep_or_deadline(
    delay: std::time::Duration,
    deadline: Option<Instant>,
    at: &ResourceCoordinate,
) -> Result<(), RelayError> {
    let Some(deadline) = deadline else {
        tokio::time::sleep(delay).await;
        return Ok(());
    };
    let now = Instant::now();
    if now >= deadline {
        return Err(RelayError::DeadlineExceeded(at.to_string()));
    }
    let rem = deadline.duration_since(now);
    if tokio::time::timeout(rem, tokio::time::sleep(delay)).await.is_err() {
        return Err(RelayError::DeadlineExceeded(at.to_string()));
    }
    Ok(())
}

/// Map a store error on the target object into the relay taxonomy.
pub fn store_failure(at: &ResourceCoordinate, e: StoreError) -> RelayError {
    match e {
        StoreError::NotFound => RelayError::TargetNotFound(at.to_string()),
        StoreError::Conflict => RelayError::ConflictRetryExhausted { target: at.to_string(), attempts: 1 },
        StoreError::Backend(msg) => RelayError::StoreUnavailable(msg),
    }
}
