//! Store-level and relay-level error taxonomy.

use serde::{Deserialize, Serialize};

/// Errors reported by an `ObjectStore` implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The write was computed against a version token that is no longer current.
    #[error("version conflict")]
    Conflict,
    #[error("not found")]
    NotFound,
    /// Anything else the backend reported (transport, RBAC, validation, ...).
    #[error("{0}")]
    Backend(String),
}

/// Terminal outcomes of a relay call.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid resourceKind: {0}")]
    UnknownResourceKind(String),
    #[error("unsupported payload shape: expected an array or an object, got {0}")]
    UnsupportedPayloadShape(&'static str),
    /// The trigger resolves to the object being updated.
    #[error("trigger {0} is the target itself")]
    TriggerIsTarget(String),
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("failed to update {target}: still conflicting after {attempts} attempts")]
    ConflictRetryExhausted { target: String, attempts: u32 },
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// The target mutation is committed; only the trigger deletion failed.
    #[error("{target} updated but deleting {trigger} failed: {reason}")]
    CleanupFailed { target: String, trigger: String, reason: String },
    #[error("deadline exceeded while updating {0}")]
    DeadlineExceeded(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// Stable, serializable identifier for each `RelayError` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    UnknownResourceKind,
    UnsupportedPayloadShape,
    TriggerIsTarget,
    TargetNotFound,
    ConflictRetryExhausted,
    StoreUnavailable,
    CleanupFailed,
    DeadlineExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownResourceKind => "UnknownResourceKind",
            ErrorKind::UnsupportedPayloadShape => "UnsupportedPayloadShape",
            ErrorKind::TriggerIsTarget => "TriggerIsTarget",
            ErrorKind::TargetNotFound => "TargetNotFound",
            ErrorKind::ConflictRetryExhausted => "ConflictRetryExhausted",
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::CleanupFailed => "CleanupFailed",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
        }
    }
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::UnknownResourceKind(_) => ErrorKind::UnknownResourceKind,
            RelayError::UnsupportedPayloadShape(_) => ErrorKind::UnsupportedPayloadShape,
            RelayError::TriggerIsTarget(_) => ErrorKind::TriggerIsTarget,
            RelayError::TargetNotFound(_) => ErrorKind::TargetNotFound,
            RelayError::ConflictRetryExhausted { .. } => ErrorKind::ConflictRetryExhausted,
            RelayError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            RelayError::CleanupFailed { .. } => ErrorKind::CleanupFailed,
            RelayError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
        }
    }

    /// True when the target mutation was committed despite the error.
    pub fn mutation_committed(&self) -> bool {
        matches!(self, RelayError::CleanupFailed { .. })
    }

    /// Rejected before any store call was made.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            RelayError::UnknownResourceKind(_)
                | RelayError::UnsupportedPayloadShape(_)
                | RelayError::TriggerIsTarget(_)
        )
    }
}

/// Startup configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid kind mapping `{0}` (expect token=group/version/plural or token=version/plural)")]
    KindMapping(String),
    #[error("cannot build HTTP client: {0}")]
    HttpClient(String),
}
