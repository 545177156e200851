//! Core data types for the web-of-trust engine

pub mod identity;
pub mod identity_id;
pub mod score;
pub mod trust;

pub use identity::{FetchState, Identity, OwnIdentity, OwnIdentityFields};
pub use identity_id::{IdentityId, Uri, UriShape};
pub use score::{Rank, Score, CAPACITIES, MAX_RANK_IDX, SENTINEL_VALUE};
pub use trust::{Trust, TRUST_MAX, TRUST_MIN};
