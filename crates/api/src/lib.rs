//! crelay public API façade.
//!
//! `Relay` composes kind resolution, payload classification, the
//! conflict-retrying updater and trigger cleanup into one call. `http` exposes
//! it over axum together with the inference chat proxy; `config` holds the
//! startup flags shared by the binaries.

#![forbid(unsafe_code)]

pub mod config;
pub mod http;
pub mod inference;
mod relay;

pub use crelay_apply::{DeleteOutcome, StrategyKind};
pub use crelay_core::{ErrorKind, RelayError, RelayResult};
pub use relay::{Relay, RelayOutcome, RelayRequest, ServiceListing, TriggerRef};
