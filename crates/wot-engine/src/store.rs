//! Store facade (C2): transactional CRUD over Identities, OwnIdentities,
//! Trusts, and Scores, indexed by id and by ordered pair.
//!
//! Every mutating method operates against an implicit active transaction
//! (§4.2): callers must `begin()` before mutating and either `commit()` or
//! `rollback()` before the next `begin()`. Read-only accessors work
//! whether or not a transaction is open, and see the pending writes of an
//! open transaction if one exists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use wot_common::{Identity, IdentityId, OwnIdentity, Score, Trust, Uri};

use crate::error::{EngineError, Result};

/// Narrow store contract the score engine and import/lifecycle logic
/// consume (C2). A concrete backend that persists to disk would implement
/// this trait the same way [`MemoryStore`] implements it in-process.
pub trait Store: Send + Sync {
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self);

    fn get_identity(&self, id: &IdentityId) -> Option<Identity>;
    fn get_identity_by_uri(&self, uri: &Uri) -> Option<Identity>;
    fn get_own_identity(&self, id: &IdentityId) -> Option<OwnIdentity>;
    fn is_own(&self, id: &IdentityId) -> bool;

    fn put_identity(&self, identity: Identity) -> Result<()>;
    fn put_own_identity(&self, own: OwnIdentity) -> Result<()>;
    /// Remove the OwnIdentity row for `id`, if any (used by `delete_own`,
    /// which replaces it with a plain Identity in the same transaction).
    fn remove_own_identity(&self, id: &IdentityId) -> Result<()>;
    fn remove_identity(&self, id: &IdentityId) -> Result<()>;

    fn all_identities(&self) -> Vec<Identity>;
    fn all_own_identities(&self) -> Vec<OwnIdentity>;

    fn get_trust(&self, truster: &IdentityId, trustee: &IdentityId) -> Option<Trust>;
    fn put_trust(&self, trust: Trust) -> Result<()>;
    fn remove_trust(&self, truster: &IdentityId, trustee: &IdentityId) -> Result<()>;
    fn trusts_given_by(&self, truster: &IdentityId) -> Vec<Trust>;
    fn trusts_received_by(&self, trustee: &IdentityId) -> Vec<Trust>;
    fn all_trusts(&self) -> Vec<Trust>;

    fn get_score(&self, owner: &IdentityId, trustee: &IdentityId) -> Option<Score>;
    fn put_score(&self, score: Score) -> Result<()>;
    fn remove_score(&self, owner: &IdentityId, trustee: &IdentityId) -> Result<()>;
    fn scores_of_owner(&self, owner: &IdentityId) -> Vec<Score>;
    fn scores_with_trustee(&self, trustee: &IdentityId) -> Vec<Score>;
    fn all_scores(&self) -> Vec<Score>;

    /// Advisory single-process database lock (C6). A second attempt to
    /// lock an already-locked store fails fast.
    fn try_lock(&self) -> Result<DatabaseLockGuard<'_>>;
}

/// RAII guard releasing the advisory database lock on drop.
pub struct DatabaseLockGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> Drop for DatabaseLockGuard<'a> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[derive(Default, Clone)]
struct Inner {
    identities: HashMap<IdentityId, Identity>,
    own_identities: HashMap<IdentityId, OwnIdentity>,
    trusts: HashMap<(IdentityId, IdentityId), Trust>,
    scores: HashMap<(IdentityId, IdentityId), Score>,
}

/// Reference in-memory [`Store`] implementation: the default backend used
/// by every test and by callers with no durable-storage requirement.
/// Commits swap a staged clone into place; rollback simply discards it.
pub struct MemoryStore {
    committed: RwLock<Inner>,
    staging: Mutex<Option<Inner>>,
    locked: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            committed: RwLock::new(Inner::default()),
            staging: Mutex::new(None),
            locked: AtomicBool::new(false),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&Inner) -> R) -> R {
        let staging = self.staging.lock();
        if let Some(inner) = staging.as_ref() {
            f(inner)
        } else {
            f(&self.committed.read())
        }
    }

    fn write<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> Result<R> {
        let mut staging = self.staging.lock();
        match staging.as_mut() {
            Some(inner) => Ok(f(inner)),
            None => Err(EngineError::NoActiveTransaction),
        }
    }
}

impl Store for MemoryStore {
    fn begin(&self) -> Result<()> {
        let mut staging = self.staging.lock();
        if staging.is_some() {
            return Err(EngineError::TransactionAlreadyActive);
        }
        *staging = Some(self.committed.read().clone());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut staging = self.staging.lock();
        let staged = staging
            .take()
            .ok_or(EngineError::NoActiveTransaction)?;
        *self.committed.write() = staged;
        Ok(())
    }

    fn rollback(&self) {
        let mut staging = self.staging.lock();
        *staging = None;
    }

    fn get_identity(&self, id: &IdentityId) -> Option<Identity> {
        self.read(|i| i.identities.get(id).cloned())
    }

    fn get_identity_by_uri(&self, uri: &Uri) -> Option<Identity> {
        let id = uri.identity_id();
        self.get_identity(&id)
    }

    fn get_own_identity(&self, id: &IdentityId) -> Option<OwnIdentity> {
        self.read(|i| i.own_identities.get(id).cloned())
    }

    fn is_own(&self, id: &IdentityId) -> bool {
        self.read(|i| i.own_identities.contains_key(id))
    }

    fn put_identity(&self, identity: Identity) -> Result<()> {
        self.write(|i| {
            i.identities.insert(identity.id.clone(), identity);
        })
    }

    fn put_own_identity(&self, own: OwnIdentity) -> Result<()> {
        self.write(|i| {
            let id = own.identity.id.clone();
            i.identities.remove(&id);
            i.own_identities.insert(id, own);
        })
    }

    fn remove_own_identity(&self, id: &IdentityId) -> Result<()> {
        self.write(|i| {
            i.own_identities.remove(id);
        })
    }

    fn remove_identity(&self, id: &IdentityId) -> Result<()> {
        self.write(|i| {
            i.identities.remove(id);
        })
    }

    fn all_identities(&self) -> Vec<Identity> {
        self.read(|i| i.identities.values().cloned().collect())
    }

    fn all_own_identities(&self) -> Vec<OwnIdentity> {
        self.read(|i| i.own_identities.values().cloned().collect())
    }

    fn get_trust(&self, truster: &IdentityId, trustee: &IdentityId) -> Option<Trust> {
        self.read(|i| i.trusts.get(&(truster.clone(), trustee.clone())).cloned())
    }

    fn put_trust(&self, trust: Trust) -> Result<()> {
        self.write(|i| {
            let key = (trust.truster.clone(), trust.trustee.clone());
            i.trusts.insert(key, trust);
        })
    }

    fn remove_trust(&self, truster: &IdentityId, trustee: &IdentityId) -> Result<()> {
        self.write(|i| {
            i.trusts.remove(&(truster.clone(), trustee.clone()));
        })
    }

    fn trusts_given_by(&self, truster: &IdentityId) -> Vec<Trust> {
        self.read(|i| {
            i.trusts
                .values()
                .filter(|t| &t.truster == truster)
                .cloned()
                .collect()
        })
    }

    fn trusts_received_by(&self, trustee: &IdentityId) -> Vec<Trust> {
        self.read(|i| {
            i.trusts
                .values()
                .filter(|t| &t.trustee == trustee)
                .cloned()
                .collect()
        })
    }

    fn all_trusts(&self) -> Vec<Trust> {
        self.read(|i| i.trusts.values().cloned().collect())
    }

    fn get_score(&self, owner: &IdentityId, trustee: &IdentityId) -> Option<Score> {
        self.read(|i| i.scores.get(&(owner.clone(), trustee.clone())).cloned())
    }

    fn put_score(&self, score: Score) -> Result<()> {
        self.write(|i| {
            let key = (score.owner.clone(), score.trustee.clone());
            i.scores.insert(key, score);
        })
    }

    fn remove_score(&self, owner: &IdentityId, trustee: &IdentityId) -> Result<()> {
        self.write(|i| {
            i.scores.remove(&(owner.clone(), trustee.clone()));
        })
    }

    fn scores_of_owner(&self, owner: &IdentityId) -> Vec<Score> {
        self.read(|i| {
            i.scores
                .values()
                .filter(|s| &s.owner == owner)
                .cloned()
                .collect()
        })
    }

    fn scores_with_trustee(&self, trustee: &IdentityId) -> Vec<Score> {
        self.read(|i| {
            i.scores
                .values()
                .filter(|s| &s.trustee == trustee)
                .cloned()
                .collect()
        })
    }

    fn all_scores(&self) -> Vec<Score> {
        self.read(|i| i.scores.values().cloned().collect())
    }

    fn try_lock(&self) -> Result<DatabaseLockGuard<'_>> {
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::DatabaseAlreadyLocked);
        }
        Ok(DatabaseLockGuard { flag: &self.locked })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use wot_common::types::identity_id::UriShape;

    fn dummy_uri(routing_byte: u8, edition: u64) -> Uri {
        Uri {
            routing_key: [routing_byte; 32],
            crypto_key: [2u8; 32],
            extra: vec![],
            doc_name: "WebOfTrust".into(),
            edition,
            shape: UriShape::Modern,
            is_insert: false,
        }
    }

    #[test]
    fn commit_persists_writes_and_rollback_discards_them() {
        let store = MemoryStore::new();
        let id = Identity::new(dummy_uri(1, 0), Utc::now());
        let id_key = id.id.clone();

        store.begin().unwrap();
        store.put_identity(id.clone()).unwrap();
        store.rollback();
        assert!(store.get_identity(&id_key).is_none());

        store.begin().unwrap();
        store.put_identity(id).unwrap();
        store.commit().unwrap();
        assert!(store.get_identity(&id_key).is_some());
    }

    #[test]
    fn mutating_without_active_transaction_fails() {
        let store = MemoryStore::new();
        let id = Identity::new(dummy_uri(1, 0), Utc::now());
        assert!(matches!(
            store.put_identity(id),
            Err(EngineError::NoActiveTransaction)
        ));
    }

    #[test]
    fn nested_begin_fails() {
        let store = MemoryStore::new();
        store.begin().unwrap();
        assert!(matches!(
            store.begin(),
            Err(EngineError::TransactionAlreadyActive)
        ));
    }

    #[test]
    fn second_lock_fails_fast() {
        let store = MemoryStore::new();
        let _guard = store.try_lock().unwrap();
        assert!(matches!(
            store.try_lock(),
            Err(EngineError::DatabaseAlreadyLocked)
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let store = MemoryStore::new();
        {
            let _guard = store.try_lock().unwrap();
        }
        assert!(store.try_lock().is_ok());
    }
}
