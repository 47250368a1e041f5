//! Short kind tokens and the table resolving them to served resources.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RelayError};
use crate::ResourceCoordinate;

pub const DEFAULT_TARGET_GROUP: &str = "extension.datatunerx.io";
pub const DEFAULT_TARGET_VERSION: &str = "v1beta1";

/// Tokens accepted out of the box; each maps to the plural of the same name.
pub const BUILTIN_TOKENS: &[&str] = &["datasets", "scorings"];

/// Group/version/plural of a served resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct KindTarget {
    pub group: String,
    pub version: String,
    pub resource: String,
}

impl KindTarget {
    pub fn new(group: impl Into<String>, version: impl Into<String>, resource: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), resource: resource.into() }
    }

    /// Parse `group/version/plural` or `version/plural` (core group).
    pub fn parse(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [version, resource] if !version.is_empty() && !resource.is_empty() => {
                Some(Self::new("", *version, *resource))
            }
            [group, version, resource] if !group.is_empty() && !version.is_empty() && !resource.is_empty() => {
                Some(Self::new(*group, *version, *resource))
            }
            _ => None,
        }
    }

    pub fn gvr_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.resource)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.resource)
        }
    }

    /// Address a named object of this resource in `namespace`.
    pub fn at(&self, namespace: &str, name: &str) -> ResourceCoordinate {
        ResourceCoordinate::new(&self.group, &self.version, &self.resource, namespace, name)
    }
}

/// Fixed mapping from short kind tokens to served resources.
///
/// Built once at startup; extending it requires a restart.
#[derive(Debug, Clone, Default)]
pub struct KindTable {
    entries: BTreeMap<String, KindTarget>,
}

impl KindTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Built-in tokens under the default target group/version.
    pub fn builtin() -> Self {
        Self::builtin_under(DEFAULT_TARGET_GROUP, DEFAULT_TARGET_VERSION)
    }

    /// Built-in tokens under an explicit group/version.
    pub fn builtin_under(group: &str, version: &str) -> Self {
        let mut table = Self::empty();
        for token in BUILTIN_TOKENS {
            table.insert(*token, KindTarget::new(group, version, *token));
        }
        table
    }

    pub fn insert(&mut self, token: impl Into<String>, target: KindTarget) {
        self.entries.insert(token.into(), target);
    }

    /// Add comma-separated `token=group/version/plural` entries.
    pub fn extend_from_spec(&mut self, spec: &str) -> Result<(), ConfigError> {
        for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (token, key) = entry
                .split_once('=')
                .ok_or_else(|| ConfigError::KindMapping(entry.to_string()))?;
            let token = token.trim();
            let target = KindTarget::parse(key.trim()).ok_or_else(|| ConfigError::KindMapping(entry.to_string()))?;
            if token.is_empty() {
                return Err(ConfigError::KindMapping(entry.to_string()));
            }
            self.insert(token, target);
        }
        Ok(())
    }

    pub fn resolve(&self, token: &str) -> Result<&KindTarget, RelayError> {
        self.entries
            .get(token)
            .ok_or_else(|| RelayError::UnknownResourceKind(token.to_string()))
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
