//! Identity lifecycle (C5): creating, restoring, and deleting own
//! identities, and registering remote identities by URI. Every transition
//! here is followed by a full Score recomputation for the affected owner.

use chrono::{DateTime, Utc};
use tracing::instrument;
use wot_common::{Identity, IdentityId, OwnIdentity, Uri, WotError};

use crate::error::{EngineError, Result};
use crate::score;
use crate::store::Store;

/// Create a fresh OwnIdentity rooted by a brand new key pair's URIs
/// (§4.5 `create_own`). The caller is responsible for generating
/// `insert_uri`/`request_uri` (via [`crate::adapters::RandomSource`]);
/// this function only establishes the store-side bookkeeping.
#[instrument(skip(store))]
pub fn create_own(
    store: &dyn Store,
    insert_uri: Uri,
    request_uri: Uri,
    now: DateTime<Utc>,
) -> Result<OwnIdentity> {
    let id = request_uri.identity_id();
    if store.get_own_identity(&id).is_some() || store.get_identity(&id).is_some() {
        return Err(EngineError::Wot(WotError::DuplicateIdentity(id.to_string())));
    }

    store.begin()?;
    let own = OwnIdentity::new(insert_uri, request_uri, now);
    store.put_own_identity(own.clone())?;
    for s in score::compute_all_scores(own.id(), store) {
        store.put_score(s)?;
    }
    store.commit()?;
    Ok(own)
}

/// Register a remote identity by its request URI (§4.5 `add_identity`).
#[instrument(skip(store))]
pub fn add_identity(store: &dyn Store, request_uri: Uri, now: DateTime<Utc>) -> Result<Identity> {
    let id = request_uri.identity_id();
    if store.get_identity(&id).is_some() || store.get_own_identity(&id).is_some() {
        return Err(EngineError::Wot(WotError::DuplicateIdentity(id.to_string())));
    }
    store.begin()?;
    let identity = Identity::new(request_uri, now);
    store.put_identity(identity.clone())?;
    store.commit()?;
    Ok(identity)
}

/// Restore local control over an identity from its insert URI (§4.5
/// `restore_own`): if a remote Identity with the same id is already
/// known, its edition/fetch history/contexts/properties are inherited
/// and its given Trusts carry over unchanged (they key on id, not on
/// the own/remote distinction).
#[instrument(skip(store))]
pub fn restore_own(store: &dyn Store, insert_uri: Uri, now: DateTime<Utc>) -> Result<OwnIdentity> {
    let request_uri = insert_uri.to_request_uri();
    let id = request_uri.identity_id();
    if store.get_own_identity(&id).is_some() {
        return Err(EngineError::Wot(WotError::DuplicateIdentity(id.to_string())));
    }

    store.begin()?;
    let mut identity = match store.get_identity(&id) {
        Some(existing) => existing,
        None => Identity::new(request_uri.clone(), now),
    };
    // Accept the insert URI's edition only if strictly greater than known.
    if insert_uri.edition > identity.request_uri.edition {
        identity.request_uri.edition = insert_uri.edition;
    }
    identity.fetch_state = wot_common::FetchState::NotFetched;
    identity.last_changed = now;
    identity.version += 1;
    store.remove_identity(&id)?;

    let own = OwnIdentity {
        identity,
        own: wot_common::OwnIdentityFields {
            insert_uri,
            last_inserted_edition: None,
            last_insert_date: Some(now),
            next_edition_to_insert: 0,
        },
    };
    store.put_own_identity(own.clone())?;
    for s in score::compute_all_scores(own.id(), store) {
        store.put_score(s)?;
    }
    store.commit()?;
    Ok(own)
}

/// Relinquish local control over an own identity, demoting it back to a
/// plain [`Identity`] (§4.5 `delete_own`). Given trusts, nickname,
/// contexts, and properties survive; the entire Score-tree rooted at
/// this owner is removed. Trusts received from others are untouched.
#[instrument(skip(store))]
pub fn delete_own(store: &dyn Store, id: &IdentityId) -> Result<Identity> {
    let own = store
        .get_own_identity(id)
        .ok_or_else(|| EngineError::Wot(WotError::UnknownIdentity(id.to_string())))?;

    store.begin()?;
    let identity = own.identity;
    store.remove_own_identity(id)?;
    store.put_identity(identity.clone())?;
    for score in store.scores_of_owner(id) {
        store.remove_score(id, &score.trustee)?;
    }
    store.commit()?;
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use wot_common::types::identity_id::UriShape;

    fn uri(byte: u8, is_insert: bool) -> Uri {
        Uri {
            routing_key: [byte; 32],
            crypto_key: [9u8; 32],
            extra: vec![],
            doc_name: "WebOfTrust".into(),
            edition: 0,
            shape: UriShape::Modern,
            is_insert,
        }
    }

    #[test]
    fn create_own_seeds_self_score() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let own = create_own(&store, uri(1, true), uri(1, false), now).unwrap();
        let scores = store.scores_of_owner(own.id());
        assert_eq!(scores.len(), 1);
        assert!(scores[0].is_self_score());
    }

    #[test]
    fn create_own_rejects_duplicate() {
        let store = MemoryStore::new();
        let now = Utc::now();
        create_own(&store, uri(1, true), uri(1, false), now).unwrap();
        assert!(create_own(&store, uri(1, true), uri(1, false), now).is_err());
    }

    #[test]
    fn restore_own_inherits_known_identity() {
        let store = MemoryStore::new();
        let now = Utc::now();
        add_identity(&store, uri(2, false), now).unwrap();

        let own = restore_own(&store, uri(2, true), now).unwrap();
        assert_eq!(own.identity.fetch_state, wot_common::FetchState::NotFetched);
        assert!(store.get_identity(own.id()).is_none());
        assert!(store.get_own_identity(own.id()).is_some());
    }

    #[test]
    fn delete_own_preserves_identity_and_clears_scores() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let own = create_own(&store, uri(3, true), uri(3, false), now).unwrap();
        let id = own.id().clone();

        let identity = delete_own(&store, &id).unwrap();
        assert_eq!(identity.id, id);
        assert!(store.get_own_identity(&id).is_none());
        assert!(store.get_identity(&id).is_some());
        assert!(store.scores_of_owner(&id).is_empty());
    }
}
