//! Error types for the web-of-trust engine
//!
//! Provides a unified error type and domain-specific error variants, one
//! meaning per variant per the error taxonomy of the trust-graph spec.

use thiserror::Error;

/// Result type alias using [`WotError`]
pub type Result<T> = std::result::Result<T, WotError>;

/// Unified error type for web-of-trust operations
#[derive(Debug, Error)]
pub enum WotError {
    /// User-supplied input violates a documented constraint (range,
    /// length, charset, duplicate creation, self-trust).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A URI could not be parsed or carries the wrong key type.
    #[error("malformed URI: {0}")]
    MalformedUri(String),

    /// Lookup by id/uri returned no row.
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),

    /// No Trust row exists for the queried pair.
    #[error("no trust from {truster} to {trustee}")]
    NotTrusted { truster: String, trustee: String },

    /// No Score row exists for the queried pair.
    #[error("{trustee} is not in {owner}'s trust tree")]
    NotInTrustTree { owner: String, trustee: String },

    /// Invariant 1 violation: more than one Identity row for an id.
    #[error("duplicate identity: {0}")]
    DuplicateIdentity(String),

    /// Invariant 1 violation: more than one Trust row for an ordered pair.
    #[error("duplicate trust from {truster} to {trustee}")]
    DuplicateTrust { truster: String, trustee: String },

    /// Invariant 1 violation: more than one Score row for an (owner, trustee) pair.
    #[error("duplicate score for owner {owner}, trustee {trustee}")]
    DuplicateScore { owner: String, trustee: String },

    /// Any other invariant failing during verification.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// Commit failed; the caller must retry or surface the failure.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// The store could not be locked, opened, or read.
    #[error("store error: {0}")]
    Store(String),

    /// A subscriber fell behind its bounded change queue and was dropped.
    #[error("subscriber lagged and was disconnected: {0} events dropped")]
    SubscriberLagged(u64),
}

impl From<serde_json::Error> for WotError {
    fn from(err: serde_json::Error) -> Self {
        WotError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_parameter_display() {
        let err = WotError::InvalidParameter("trust value out of range".to_string());
        assert!(err.to_string().contains("trust value out of range"));
    }

    #[test]
    fn not_in_trust_tree_display() {
        let err = WotError::NotInTrustTree {
            owner: "ownerA".into(),
            trustee: "trusteeB".into(),
        };
        assert!(err.to_string().contains("ownerA"));
        assert!(err.to_string().contains("trusteeB"));
    }
}
