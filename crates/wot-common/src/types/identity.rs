//! Identity and OwnIdentity — the "own" vs "remote" polymorphism is
//! represented as a tagged variant with a common attribute set, not as an
//! inheritance relationship: `delete_own`/`restore_own` swap the variant
//! explicitly rather than converting a subtype.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity_id::{IdentityId, Uri};
use crate::config::Limits;
use crate::error::{Result, WotError};

/// Whether the current edition of an identity's signed document has been
/// retrieved and parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchState {
    NotFetched,
    Fetched,
    ParsingFailed,
}

/// A remote pseudonym, addressed by its [`IdentityId`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub request_uri: Uri,
    pub latest_edition_hint: u64,
    pub fetch_state: FetchState,
    pub nickname: Option<String>,
    pub publishes_trust_list: bool,
    pub contexts: BTreeSet<String>,
    pub properties: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
    pub last_fetched: Option<DateTime<Utc>>,
    pub last_changed: DateTime<Utc>,
    /// Optimistic-concurrency counter, bumped on every store-level mutation.
    pub version: u64,
}

impl Identity {
    pub fn new(request_uri: Uri, now: DateTime<Utc>) -> Self {
        let id = request_uri.identity_id();
        let edition = request_uri.edition;
        Self {
            id,
            request_uri,
            latest_edition_hint: edition,
            fetch_state: FetchState::NotFetched,
            nickname: None,
            publishes_trust_list: false,
            contexts: BTreeSet::new(),
            properties: BTreeMap::new(),
            created: now,
            last_fetched: None,
            last_changed: now,
            version: 0,
        }
    }

    pub fn set_nickname(&mut self, nickname: &str, limits: &Limits) -> Result<()> {
        if nickname.is_empty() || nickname.chars().count() > limits.nickname_max_length {
            return Err(WotError::InvalidParameter(format!(
                "nickname must be 1-{} chars",
                limits.nickname_max_length
            )));
        }
        if !nickname
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_. ".contains(c))
        {
            return Err(WotError::InvalidParameter(
                "nickname contains disallowed characters".into(),
            ));
        }
        self.nickname = Some(nickname.to_string());
        Ok(())
    }

    /// Assign a new edition to the request URI. Equal or greater is
    /// accepted; lower fails. Assigning a strictly greater edition
    /// resets `fetch_state` to `NotFetched`.
    pub fn set_edition(&mut self, edition: u64, now: DateTime<Utc>) -> Result<()> {
        if edition < self.request_uri.edition {
            return Err(WotError::InvalidParameter(format!(
                "edition {edition} is older than known edition {}",
                self.request_uri.edition
            )));
        }
        if edition > self.request_uri.edition {
            self.fetch_state = FetchState::NotFetched;
        }
        self.request_uri.edition = edition;
        if edition > self.latest_edition_hint {
            self.latest_edition_hint = edition;
        }
        self.last_changed = now;
        self.version += 1;
        Ok(())
    }

    pub fn on_fetched(&mut self, now: DateTime<Utc>) {
        self.fetch_state = FetchState::Fetched;
        self.last_fetched = Some(now);
        self.version += 1;
    }

    /// Mark the identity for re-fetch of its current edition: clears
    /// `fetch_state` and decrements the edition by one (floor 0) so the
    /// same edition is re-downloaded rather than skipped.
    pub fn mark_for_refetch(&mut self, now: DateTime<Utc>) {
        self.fetch_state = FetchState::NotFetched;
        if self.request_uri.edition > 0 {
            self.request_uri.edition -= 1;
        }
        self.last_changed = now;
        self.version += 1;
    }
}

/// Own-identity bookkeeping: the signing half of the key pair is never
/// revealed outside this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnIdentityFields {
    pub insert_uri: Uri,
    pub last_inserted_edition: Option<u64>,
    pub last_insert_date: Option<DateTime<Utc>>,
    pub next_edition_to_insert: u64,
}

/// An identity for which this instance holds the signing key. Extends
/// [`Identity`] with insert-side bookkeeping and roots a trust tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnIdentity {
    pub identity: Identity,
    pub own: OwnIdentityFields,
}

impl OwnIdentity {
    pub fn new(insert_uri: Uri, request_uri: Uri, now: DateTime<Utc>) -> Self {
        Self {
            identity: Identity::new(request_uri, now),
            own: OwnIdentityFields {
                insert_uri,
                last_inserted_edition: None,
                last_insert_date: None,
                next_edition_to_insert: 0,
            },
        }
    }

    pub fn id(&self) -> &IdentityId {
        &self.identity.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::identity_id::UriShape;

    fn dummy_uri(edition: u64) -> Uri {
        Uri {
            routing_key: [1u8; 32],
            crypto_key: [2u8; 32],
            extra: vec![],
            doc_name: "WebOfTrust".into(),
            edition,
            shape: UriShape::Modern,
            is_insert: false,
        }
    }

    #[test]
    fn set_edition_rejects_regression() {
        let now = Utc::now();
        let mut id = Identity::new(dummy_uri(3), now);
        assert!(id.set_edition(2, now).is_err());
        assert!(id.set_edition(3, now).is_ok());
        assert!(id.set_edition(4, now).is_ok());
        assert_eq!(id.fetch_state, FetchState::NotFetched);
    }

    #[test]
    fn mark_for_refetch_floors_at_zero() {
        let now = Utc::now();
        let mut id = Identity::new(dummy_uri(0), now);
        id.fetch_state = FetchState::Fetched;
        id.mark_for_refetch(now);
        assert_eq!(id.request_uri.edition, 0);
        assert_eq!(id.fetch_state, FetchState::NotFetched);

        let mut id2 = Identity::new(dummy_uri(5), now);
        id2.mark_for_refetch(now);
        assert_eq!(id2.request_uri.edition, 4);
    }
}
