//! crelay core types: object coordinates, version tokens, the kind table,
//! errors and the versioned object store seam.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

pub mod backoff;
pub mod error;
pub mod kinds;
pub mod store;

pub use backoff::{BackoffPolicy, Jitter, NoJitter, ThreadRngJitter};
pub use error::{ConfigError, ErrorKind, RelayError, RelayResult, StoreError};
pub use kinds::{KindTable, KindTarget};
pub use store::ObjectStore;

pub mod prelude {
    pub use super::{
        KindTable, KindTarget, ObjectStore, RelayError, RelayResult, ResourceCoordinate, StoreError,
        StoredObject, VersionToken,
    };
}

/// Addressing tuple for a single object in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceCoordinate {
    pub group: String,
    pub version: String,
    /// Plural resource name as served by the API (e.g. `scorings`).
    pub resource: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceCoordinate {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        resource: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            resource: resource.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `group/version`, or just `version` for the core group.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Key in the same shape as `KindTarget::gvr_key`.
    pub fn gvr_key(&self) -> String {
        format!("{}/{}", self.api_version(), self.resource)
    }

    /// The kind target this coordinate lives under.
    pub fn target(&self) -> KindTarget {
        KindTarget {
            group: self.group.clone(),
            version: self.version.clone(),
            resource: self.resource.clone(),
        }
    }
}

impl fmt::Display for ResourceCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.gvr_key(), self.namespace, self.name)
    }
}

/// Opaque token that changes on every successful write of an object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct VersionToken(pub String);

impl VersionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A whole object as read from the store, together with its version token.
///
/// `raw` keeps the wire shape (`metadata`, `spec`, `status`, ...); the token is
/// mirrored from `metadata.resourceVersion`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredObject {
    pub raw: Json,
    pub version: VersionToken,
}

impl StoredObject {
    /// Wrap a raw object, reading its token from `metadata.resourceVersion`.
    pub fn from_raw(raw: Json) -> Result<Self, StoreError> {
        let version = resource_version(&raw)
            .map(|s| VersionToken(s.to_string()))
            .ok_or_else(|| StoreError::Backend("object missing metadata.resourceVersion".into()))?;
        Ok(Self { raw, version })
    }

    pub fn spec(&self) -> Option<&Json> {
        self.raw.get("spec")
    }

    pub fn status(&self) -> Option<&Json> {
        self.raw.get("status")
    }
}

/// Read `metadata.resourceVersion` from a raw object.
pub fn resource_version(raw: &Json) -> Option<&str> {
    raw.get("metadata").and_then(|m| m.get("resourceVersion")).and_then(|v| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_renders_core_and_grouped_keys() {
        let grouped = ResourceCoordinate::new("extension.datatunerx.io", "v1beta1", "scorings", "ml", "run-7");
        assert_eq!(grouped.api_version(), "extension.datatunerx.io/v1beta1");
        assert_eq!(grouped.to_string(), "extension.datatunerx.io/v1beta1/scorings ml/run-7");

        let core = ResourceCoordinate::new("", "v1", "configmaps", "ml", "cm");
        assert_eq!(core.api_version(), "v1");
        assert_eq!(core.gvr_key(), "v1/configmaps");
    }

    #[test]
    fn stored_object_reads_resource_version() {
        let raw = serde_json::json!({"metadata": {"name": "x", "resourceVersion": "42"}, "spec": {"a": 1}});
        let obj = StoredObject::from_raw(raw).expect("has rv");
        assert_eq!(obj.version.as_str(), "42");
        assert_eq!(obj.spec(), Some(&serde_json::json!({"a": 1})));
        assert!(obj.status().is_none());
    }

    #[test]
    fn stored_object_without_resource_version_is_rejected() {
        let err = StoredObject::from_raw(serde_json::json!({"metadata": {"name": "x"}})).unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
