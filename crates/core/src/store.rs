//! The versioned object store seam consumed by the relay.

use serde_json::Value as Json;

use crate::error::StoreError;
use crate::kinds::KindTarget;
use crate::{ResourceCoordinate, StoredObject, VersionToken};

/// Key-addressed store of structured objects carrying version tokens.
///
/// Implementations: the Kubernetes API (`crelay-kubehub`) and an in-RAM store
/// (`crelay-store`).
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Read the whole object and its current version token.
    async fn get(&self, at: &ResourceCoordinate) -> Result<StoredObject, StoreError>;

    /// Apply a JSON merge patch (RFC 7386). Returns the new version token.
    async fn patch_merge(&self, at: &ResourceCoordinate, patch: &Json) -> Result<VersionToken, StoreError>;

    /// Write `object.status` through the status subresource.
    ///
    /// Fails with `StoreError::Conflict` when `metadata.resourceVersion` of the
    /// submitted object is no longer current.
    async fn update_status(&self, at: &ResourceCoordinate, object: &StoredObject) -> Result<VersionToken, StoreError>;

    /// Delete the object. Absent objects report `StoreError::NotFound`.
    async fn delete(&self, at: &ResourceCoordinate) -> Result<(), StoreError>;

    /// List objects of `target` in `namespace` matching an equality label selector.
    async fn list_by_label(
        &self,
        target: &KindTarget,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<StoredObject>, StoreError>;
}
