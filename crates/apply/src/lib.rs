//! crelay apply: payload classification, mutation strategies, the
//! conflict-retrying updater and trigger cleanup.

#![forbid(unsafe_code)]

mod classify;
mod deleter;
mod strategy;
mod updater;

pub use classify::{classify, json_type_name};
pub use deleter::{CascadeDeleter, DeleteOutcome};
pub use strategy::{
    ApplyMutation, CollectionReplacement, Mutation, StatusReplacement, StrategyKind, SUBSETS_PATH,
};
pub use updater::{store_failure, ConflictRetryUpdater};
