//! # wot-common
//!
//! Shared entity model, errors, configuration, and external-adapter
//! contracts for the web-of-trust graph engine.
//!
//! ## Core Types
//!
//! - [`Identity`]/[`OwnIdentity`]: a remote pseudonym / a locally-held signing identity
//! - [`Trust`]: a directed, signed edge with value in [-100, +100]
//! - [`Score`]: the derived per-(owner, trustee) value/rank/capacity view
//!
//! ## Adapters (C7)
//!
//! - [`adapters::Clock`] / [`adapters::RandomSource`]: narrow collaborator seams
//! - [`adapters::IdentityFileProducer`] / [`adapters::IdentityFileConsumer`]:
//!   export/import of an own-identity's signed document, XML wire format
//!   and network fetch/insert excluded by design (§1)
//! - [`adapters::ChangeSubscriber`]: post-commit change notifications

pub mod adapters;
pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, Limits};
pub use error::{Result, WotError};
pub use types::{
    FetchState, Identity, IdentityId, OwnIdentity, OwnIdentityFields, Rank, Score, Trust, Uri,
    UriShape, CAPACITIES, MAX_RANK_IDX, SENTINEL_VALUE, TRUST_MAX, TRUST_MIN,
};

/// Crate version, surfaced for diagnostics/logging.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
