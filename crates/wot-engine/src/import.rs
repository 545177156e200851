//! Trust-list import (C4): atomic application of a remote identity's
//! fetched trust list, with anti-Sybil stub-identity flood control and a
//! scoped Score recomputation on close.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{instrument, warn};
use wot_common::{Identity, IdentityId, Limits, Trust, Uri};

use crate::error::{EngineError, Result};
use crate::score;
use crate::store::Store;

/// Outcome of a finished trust-list import, reported for logging/metrics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub identities_stubbed: usize,
    pub identities_ignored: usize,
    pub trusts_upserted: usize,
    pub trusts_removed: usize,
    pub scores_changed: usize,
}

/// One entry of a fetched trust list.
pub struct TrustListEntry {
    pub trustee_uri: Uri,
    pub value: i64,
    pub comment: String,
}

/// Explicit transactional handle for a single trust-list import (§4.4).
/// `finish` commits and runs the scoped recomputation; dropping it
/// without calling `finish` rolls the transaction back. Holds the
/// engine's store-wide writer lock for its lifetime, if one was supplied,
/// so an import serializes with direct `set_trust`/`remove_trust` calls
/// instead of merely racing them at the store's transaction layer.
pub struct Batch<'s> {
    store: &'s dyn Store,
    x: IdentityId,
    opened_at: DateTime<Utc>,
    previous_trustees: HashSet<IdentityId>,
    current_trustees: HashSet<IdentityId>,
    summary: ImportSummary,
    finished: bool,
    _guard: Option<parking_lot::MutexGuard<'s, ()>>,
}

impl<'s> Batch<'s> {
    fn x_has_positive_capacity_anywhere(&self) -> bool {
        self.store
            .scores_with_trustee(&self.x)
            .iter()
            .any(|s| s.capacity > 0)
    }

    /// Upsert `x`'s own published fields (nickname/contexts/properties)
    /// and bump its edition. Does not touch trust-list entries.
    pub fn set_fields(
        &mut self,
        nickname: Option<String>,
        publishes_trust_list: bool,
        contexts: impl IntoIterator<Item = String>,
        properties: impl IntoIterator<Item = (String, String)>,
        edition: u64,
        now: DateTime<Utc>,
        limits: &Limits,
    ) -> Result<()> {
        let mut identity = self
            .store
            .get_identity(&self.x)
            .ok_or_else(|| EngineError::Wot(wot_common::WotError::UnknownIdentity(self.x.to_string())))?;

        identity.set_edition(edition, now)?;
        identity.on_fetched(now);
        if let Some(nick) = nickname {
            identity.set_nickname(&nick, limits)?;
        }
        identity.publishes_trust_list = publishes_trust_list;
        identity.contexts = contexts.into_iter().collect();
        identity.properties = properties.into_iter().collect();
        identity.last_changed = now;
        self.store.put_identity(identity)?;
        Ok(())
    }

    /// Upsert one trust-list entry, applying the anti-Sybil flood-control
    /// rule to previously-unknown trustees (§4.4 step 3).
    pub fn upsert_trust_entry(
        &mut self,
        entry: TrustListEntry,
        now: DateTime<Utc>,
        limits: &Limits,
    ) -> Result<()> {
        let trustee_id = entry.trustee_uri.identity_id();

        if self.store.get_identity(&trustee_id).is_none() && !self.store.is_own(&trustee_id) {
            if self.x_has_positive_capacity_anywhere() {
                let stub = Identity::new(entry.trustee_uri.clone(), now);
                self.store.put_identity(stub)?;
                self.summary.identities_stubbed += 1;
            } else {
                self.summary.identities_ignored += 1;
                return Ok(());
            }
        }

        match self.store.get_trust(&self.x, &trustee_id) {
            Some(mut existing) => {
                existing.update(entry.value, entry.comment, now, limits)?;
                self.store.put_trust(existing)?;
            }
            None => {
                let trust = Trust::new(self.x.clone(), trustee_id.clone(), entry.value, entry.comment, now, limits)?;
                self.store.put_trust(trust)?;
            }
        }
        self.summary.trusts_upserted += 1;
        self.current_trustees.insert(trustee_id);
        Ok(())
    }

    /// Remove stale trusts, run the scoped recomputation, and commit
    /// (§4.4 steps 4-5).
    ///
    /// Propagation is seeded not just at `x` but at every stale trustee
    /// removed above: a trustee whose sole incoming trust was just dropped
    /// would otherwise never be walked, leaving its (now-wrong) Score rows
    /// stranded in the store instead of recomputed down to removal.
    #[instrument(skip(self))]
    pub fn finish(mut self) -> Result<ImportSummary> {
        let mut stale_trustees = Vec::new();
        for stale in self.previous_trustees.difference(&self.current_trustees) {
            self.store.remove_trust(&self.x, stale)?;
            self.summary.trusts_removed += 1;
            stale_trustees.push(stale.clone());
        }

        let mut scores_changed = 0;
        for owner in self.store.all_own_identities() {
            let mut merged: HashMap<IdentityId, (Option<wot_common::Score>, Option<wot_common::Score>)> =
                HashMap::new();
            for seed in std::iter::once(&self.x).chain(stale_trustees.iter()) {
                for (trustee, before, after) in score::propagate_from(owner.id(), seed, self.store)? {
                    merged.entry(trustee).or_insert((before, after));
                }
            }
            for (trustee, (before, after)) in merged {
                let identical = match (&before, &after) {
                    (Some(b), Some(a)) => {
                        b.value == a.value && b.rank == a.rank && b.capacity == a.capacity
                    }
                    (None, None) => true,
                    _ => false,
                };
                if identical {
                    continue;
                }
                // §4.3 step 4: capacity 0 -> >0 forces a re-fetch of the
                // trustee, whose own trustees were never imported while
                // it carried zero capacity.
                let was_zero = before.as_ref().map(|s| s.capacity <= 0).unwrap_or(true);
                let now_positive = after.as_ref().map(|s| s.capacity > 0).unwrap_or(false);
                if was_zero && now_positive {
                    if let Some(mut identity) = self.store.get_identity(&trustee) {
                        identity.mark_for_refetch(self.opened_at);
                        self.store.put_identity(identity)?;
                    }
                }
                scores_changed += 1;
            }
        }
        self.summary.scores_changed = scores_changed;

        self.store.commit()?;
        self.finished = true;
        Ok(std::mem::take(&mut self.summary))
    }
}

impl<'s> Drop for Batch<'s> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(x = %self.x, "trust-list import batch dropped without finish(); rolling back");
            self.store.rollback();
        }
    }
}

/// Open a trust-list import batch for remote identity `x` (§4.4 step 1).
pub fn begin_trust_list_import(store: &dyn Store, x: IdentityId) -> Result<Batch<'_>> {
    begin_trust_list_import_at(store, x, Utc::now())
}

/// Same as [`begin_trust_list_import`] but with an explicit timestamp,
/// used by callers with their own [`crate::Clock`](wot_common::adapters::Clock) abstraction.
pub fn begin_trust_list_import_at(
    store: &dyn Store,
    x: IdentityId,
    now: DateTime<Utc>,
) -> Result<Batch<'_>> {
    begin_trust_list_import_locked(store, x, now, None)
}

/// Same as [`begin_trust_list_import_at`], additionally holding `guard` for
/// the batch's lifetime so the import serializes against the engine's
/// single-writer lock rather than only against the store's own
/// transaction guard.
pub fn begin_trust_list_import_locked<'s>(
    store: &'s dyn Store,
    x: IdentityId,
    now: DateTime<Utc>,
    guard: Option<parking_lot::MutexGuard<'s, ()>>,
) -> Result<Batch<'s>> {
    store.begin()?;
    let previous_trustees = store
        .trusts_given_by(&x)
        .into_iter()
        .map(|t| t.trustee)
        .collect();
    Ok(Batch {
        store,
        x,
        opened_at: now,
        previous_trustees,
        current_trustees: HashSet::new(),
        summary: ImportSummary::default(),
        finished: false,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use wot_common::types::identity_id::UriShape;
    use wot_common::{Config, OwnIdentity};

    fn uri(byte: u8) -> Uri {
        Uri {
            routing_key: [byte; 32],
            crypto_key: [2u8; 32],
            extra: vec![],
            doc_name: "WebOfTrust".into(),
            edition: 0,
            shape: UriShape::Modern,
            is_insert: false,
        }
    }

    fn insert_uri(byte: u8) -> Uri {
        let mut u = uri(byte);
        u.is_insert = true;
        u
    }

    #[test]
    fn unknown_trustee_ignored_without_capacity() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let limits = Config::default().limits;

        store.begin().unwrap();
        let x = Identity::new(uri(1), now);
        let x_id = x.id.clone();
        store.put_identity(x).unwrap();
        store.commit().unwrap();

        let mut batch = begin_trust_list_import(&store, x_id).unwrap();
        batch
            .upsert_trust_entry(
                TrustListEntry {
                    trustee_uri: uri(2),
                    value: 50,
                    comment: String::new(),
                },
                now,
                &limits,
            )
            .unwrap();
        let summary = batch.finish().unwrap();
        assert_eq!(summary.identities_stubbed, 0);
        assert_eq!(summary.identities_ignored, 1);
        assert!(store.get_identity(&IdentityId::from_routing_key(&[2u8; 32])).is_none());
    }

    #[test]
    fn unknown_trustee_stubbed_when_truster_capacitated() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let limits = Config::default().limits;

        store.begin().unwrap();
        let own = OwnIdentity::new(insert_uri(0), uri(0), now);
        let owner_id = own.id().clone();
        let x = Identity::new(uri(1), now);
        let x_id = x.id.clone();
        store.put_own_identity(own).unwrap();
        store.put_identity(x).unwrap();
        let direct = Trust::new(owner_id.clone(), x_id.clone(), 100, String::new(), now, &limits).unwrap();
        store.put_trust(direct).unwrap();
        store.commit().unwrap();

        // Give x a Score with positive capacity via a full recompute.
        let scores = score::compute_all_scores(&owner_id, &store);
        store.begin().unwrap();
        for s in scores {
            store.put_score(s).unwrap();
        }
        store.commit().unwrap();

        let mut batch = begin_trust_list_import(&store, x_id).unwrap();
        batch
            .upsert_trust_entry(
                TrustListEntry {
                    trustee_uri: uri(2),
                    value: 50,
                    comment: String::new(),
                },
                now,
                &limits,
            )
            .unwrap();
        let summary = batch.finish().unwrap();
        assert_eq!(summary.identities_stubbed, 1);
        assert!(store.get_identity(&IdentityId::from_routing_key(&[2u8; 32])).is_some());
    }

    #[test]
    fn drop_without_finish_rolls_back() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let limits = Config::default().limits;

        store.begin().unwrap();
        let x = Identity::new(uri(1), now);
        let x_id = x.id.clone();
        store.put_identity(x).unwrap();
        store.commit().unwrap();

        {
            let mut batch = begin_trust_list_import(&store, x_id.clone()).unwrap();
            batch
                .upsert_trust_entry(
                    TrustListEntry {
                        trustee_uri: uri(2),
                        value: 50,
                        comment: String::new(),
                    },
                    now,
                    &limits,
                )
                .unwrap();
            // dropped here without finish()
        }

        assert!(store.get_trust(&x_id, &IdentityId::from_routing_key(&[2u8; 32])).is_none());
        // store must be usable again (no leftover active transaction)
        store.begin().unwrap();
        store.commit().unwrap();
    }
}
