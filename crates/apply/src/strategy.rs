use crelay_core::{ObjectStore, ResourceCoordinate, StoreError, StoredObject, VersionToken};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

/// Nested `spec` field replaced by collection payloads.
pub const SUBSETS_PATH: &[&str] = &["spec", "datasetMetadata", "datasetInfo", "subsets"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    CollectionReplacement,
    StatusReplacement,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::CollectionReplacement => "collectionReplacement",
            StrategyKind::StatusReplacement => "statusReplacement",
        }
    }
}

/// One write attempt of a mutation strategy against the store.
#[async_trait::async_trait]
pub trait ApplyMutation: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether each attempt must start from a freshly read object.
    fn needs_current(&self) -> bool;

    async fn apply_once(
        &self,
        store: &dyn ObjectStore,
        at: &ResourceCoordinate,
        current: Option<&StoredObject>,
    ) -> Result<VersionToken, StoreError>;
}

/// Replace `spec.datasetMetadata.datasetInfo.subsets` through a merge patch.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionReplacement {
    subsets: Vec<Json>,
}

impl CollectionReplacement {
    pub fn new(subsets: Vec<Json>) -> Self {
        Self { subsets }
    }

    pub fn subsets(&self) -> &[Json] {
        &self.subsets
    }

    /// Merge patch touching only the subsets field.
    pub fn patch(&self) -> Json {
        SUBSETS_PATH
            .iter()
            .rev()
            .fold(Json::Array(self.subsets.clone()), |inner, key| {
                let mut m = Map::new();
                m.insert((*key).to_string(), inner);
                Json::Object(m)
            })
    }
}

#[async_trait::async_trait]
impl ApplyMutation for CollectionReplacement {
    fn kind(&self) -> StrategyKind {
        StrategyKind::CollectionReplacement
    }

    fn needs_current(&self) -> bool {
        false
    }

    async fn apply_once(
        &self,
        store: &dyn ObjectStore,
        at: &ResourceCoordinate,
        _current: Option<&StoredObject>,
    ) -> Result<VersionToken, StoreError> {
        store.patch_merge(at, &self.patch()).await
    }
}

/// Overwrite the whole `status` section and write it through the status subresource.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReplacement {
    status: Map<String, Json>,
}

impl StatusReplacement {
    pub fn new(status: Map<String, Json>) -> Self {
        Self { status }
    }

    pub fn status(&self) -> &Map<String, Json> {
        &self.status
    }

    /// `current` with its status replaced; keeps the version token as write precondition.
    pub fn candidate(&self, current: &StoredObject) -> StoredObject {
        let mut next = current.clone();
        if let Some(map) = next.raw.as_object_mut() {
            map.insert("status".into(), Json::Object(self.status.clone()));
        }
        next
    }
}

#[async_trait::async_trait]
impl ApplyMutation for StatusReplacement {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StatusReplacement
    }

    fn needs_current(&self) -> bool {
        true
    }

    async fn apply_once(
        &self,
        store: &dyn ObjectStore,
        at: &ResourceCoordinate,
        current: Option<&StoredObject>,
    ) -> Result<VersionToken, StoreError> {
        let current =
            current.ok_or_else(|| StoreError::Backend("status replacement requires the current object".into()))?;
        store.update_status(at, &self.candidate(current)).await
    }
}

/// Strategy selected by the payload classifier.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    ReplaceSubsets(CollectionReplacement),
    ReplaceStatus(StatusReplacement),
}

impl Mutation {
    fn strategy(&self) -> &dyn ApplyMutation {
        match self {
            Mutation::ReplaceSubsets(s) => s,
            Mutation::ReplaceStatus(s) => s,
        }
    }
}

#[async_trait::async_trait]
impl ApplyMutation for Mutation {
    fn kind(&self) -> StrategyKind {
        self.strategy().kind()
    }

    fn needs_current(&self) -> bool {
        self.strategy().needs_current()
    }

    async fn apply_once(
        &self,
        store: &dyn ObjectStore,
        at: &ResourceCoordinate,
        current: Option<&StoredObject>,
    ) -> Result<VersionToken, StoreError> {
        self.strategy().apply_once(store, at, current).await
    }
}
