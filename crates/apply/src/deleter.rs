use crelay_core::{ObjectStore, RelayError, ResourceCoordinate, StoreError};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteOutcome {
    Deleted,
    /// Nothing to delete; a previous call already removed it.
    AlreadyAbsent,
}

/// Removes the trigger object once its effect is committed to the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeDeleter;

impl CascadeDeleter {
    pub fn new() -> Self {
        Self
    }

    /// Delete `trigger`; `committed` names the already-updated target for error reporting.
    ///
    /// Absence is success. Other failures become `CleanupFailed` and never
    /// touch the committed target.
    pub async fn delete(
        &self,
        store: &dyn ObjectStore,
        trigger: &ResourceCoordinate,
        committed: &ResourceCoordinate,
    ) -> Result<DeleteOutcome, RelayError> {
        match store.delete(trigger).await {
            Ok(()) => {
                debug!(trigger = %trigger, "trigger deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(StoreError::NotFound) => {
                debug!(trigger = %trigger, "trigger already absent");
                Ok(DeleteOutcome::AlreadyAbsent)
            }
            Err(e) => {
                counter!("relay_cleanup_failed", 1u64);
                warn!(trigger = %trigger, target_obj = %committed, error = %e, "trigger cleanup failed");
                Err(RelayError::CleanupFailed {
                    target: committed.to_string(),
                    trigger: trigger.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
