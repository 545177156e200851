//! # wot-engine
//!
//! Trust-graph computation engine for the web of trust: the store facade
//! (C2), the Score engine (C3), trust-list import (C4), identity lifecycle
//! (C5), and integrity & repair (C6), composed behind a single [`Engine`]
//! facade that owns the store lock (§5) and the post-commit change bus.
//!
//! ## Components
//!
//! - [`store`]: the [`store::Store`] trait and the in-memory reference
//!   [`store::MemoryStore`] backend.
//! - [`score`]: full and incremental Score (re)computation, the three
//!   cross-checked rank reference algorithms.
//! - [`import`]: the [`import::Batch`] trust-list import bracket.
//! - [`lifecycle`]: `create_own` / `add_identity` / `restore_own` /
//!   `delete_own`.
//! - [`integrity`]: whole-store invariant scanning and Score reconciliation.

pub mod error;
pub mod import;
pub mod integrity;
pub mod lifecycle;
pub mod score;
pub mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};
use wot_common::adapters::{ChangeEvent, ChangeKind, ChangeSubscriber, IdentityFileConsumer, IdentityFileImport};
use wot_common::{Config, Identity, IdentityId, OwnIdentity, Trust, Uri, WotError};

pub use error::{EngineError, Result};
pub use import::{Batch, ImportSummary, TrustListEntry};
pub use integrity::Violation;
pub use store::{MemoryStore, Store};

/// Capacity of the post-commit change-event broadcast channel before a
/// lagging subscriber is disconnected (§5 back-pressure policy).
const CHANGE_BUS_CAPACITY: usize = 1024;

/// Single entry point coordinating every public operation of the
/// trust-graph engine. Owns the store lock: every mutator below acquires
/// it before touching the store and releases it on return, matching the
/// single-writer/concurrent-reader concurrency model of §5.
pub struct Engine {
    store: Arc<dyn Store>,
    config: Config,
    lock: Mutex<()>,
    bus: broadcast::Sender<ChangeEvent>,
}

impl Engine {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        let (bus, _rx) = broadcast::channel(CHANGE_BUS_CAPACITY);
        Self {
            store,
            config,
            lock: Mutex::new(()),
            bus,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn publish(&self, kind: ChangeKind, before: Option<&impl serde::Serialize>, after: Option<&impl serde::Serialize>) {
        let event = ChangeEvent {
            kind,
            before: before.map(|b| serde_json::to_value(b).unwrap_or(serde_json::Value::Null)),
            after: after.map(|a| serde_json::to_value(a).unwrap_or(serde_json::Value::Null)),
        };
        // A full channel only means no subscriber is listening right now;
        // publishing must never block or fail the caller's transaction.
        let _ = self.bus.send(event);
    }

    /// Subscribe to post-commit change events. Per §6, an initial
    /// synchronization snapshot of every Identity/Trust/Score is handed
    /// back alongside the live receiver, taken atomically under the store
    /// lock so no commit can interleave between snapshot and live stream.
    pub fn subscribe_with_snapshot(
        &self,
    ) -> (Vec<ChangeEvent>, broadcast::Receiver<ChangeEvent>) {
        let _guard = self.lock.lock();
        let rx = self.bus.subscribe();
        let mut snapshot = Vec::new();
        for identity in self.store.all_identities() {
            snapshot.push(ChangeEvent {
                kind: ChangeKind::Identity,
                before: None,
                after: Some(serde_json::to_value(&identity).unwrap_or(serde_json::Value::Null)),
            });
        }
        for own in self.store.all_own_identities() {
            snapshot.push(ChangeEvent {
                kind: ChangeKind::Identity,
                before: None,
                after: Some(serde_json::to_value(&own.identity).unwrap_or(serde_json::Value::Null)),
            });
        }
        for trust in self.store.all_trusts() {
            snapshot.push(ChangeEvent {
                kind: ChangeKind::Trust,
                before: None,
                after: Some(serde_json::to_value(&trust).unwrap_or(serde_json::Value::Null)),
            });
        }
        for score in self.store.all_scores() {
            snapshot.push(ChangeEvent {
                kind: ChangeKind::Score,
                before: None,
                after: Some(serde_json::to_value(&score).unwrap_or(serde_json::Value::Null)),
            });
        }
        (snapshot, rx)
    }

    /// Drive `subscriber` with the post-commit change stream, replaying the
    /// snapshot first (§6). If the subscriber falls behind the bounded
    /// queue far enough to lag, it is disconnected and the task terminates
    /// with [`WotError::SubscriberLagged`] rather than silently dropping
    /// the events it missed.
    pub fn subscribe(&self, subscriber: Arc<dyn ChangeSubscriber>) -> tokio::task::JoinHandle<WotError> {
        let (snapshot, rx) = self.subscribe_with_snapshot();
        tokio::spawn(drive_change_subscriber(snapshot, rx, subscriber))
    }

    /// Set (or update) a direct trust edge and propagate the resulting
    /// Score changes for every OwnIdentity (§4.3 `set_trust`).
    #[instrument(skip(self))]
    pub fn set_trust(
        &self,
        truster: &IdentityId,
        trustee: &IdentityId,
        value: i64,
        comment: String,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _guard = self.lock.lock();
        self.store.begin()?;

        let result = (|| -> Result<()> {
            if self.store.get_identity(trustee).is_none() && self.store.get_own_identity(trustee).is_none()
            {
                return Err(wot_common::WotError::UnknownIdentity(trustee.to_string()).into());
            }

            let trust = match self.store.get_trust(truster, trustee) {
                Some(mut existing) => {
                    existing.update(value, comment, now, &self.config.limits)?;
                    existing
                }
                None => wot_common::Trust::new(
                    truster.clone(),
                    trustee.clone(),
                    value,
                    comment,
                    now,
                    &self.config.limits,
                )?,
            };
            self.store.put_trust(trust)?;

            self.propagate_and_persist(truster, trustee, now)
        })();

        match result {
            Ok(()) => {
                self.store.commit()?;
                Ok(())
            }
            Err(e) => {
                self.store.rollback();
                Err(e)
            }
        }
    }

    /// Remove a direct trust edge and propagate the resulting Score
    /// changes (§4.3 `remove_trust`).
    #[instrument(skip(self))]
    pub fn remove_trust(&self, truster: &IdentityId, trustee: &IdentityId, now: DateTime<Utc>) -> Result<()> {
        let _guard = self.lock.lock();
        self.store.begin()?;

        let result = (|| -> Result<()> {
            self.store.remove_trust(truster, trustee)?;
            self.propagate_and_persist(truster, trustee, now)
        })();

        match result {
            Ok(()) => {
                self.store.commit()?;
                Ok(())
            }
            Err(e) => {
                self.store.rollback();
                Err(e)
            }
        }
    }

    /// Propagate a changed edge `truster -> trustee` across every
    /// OwnIdentity's trust tree: only `truster`'s own tree and
    /// `truster`'s/`trustee`'s position within every other OwnIdentity's
    /// tree can possibly move (§4.3 incremental update algorithm).
    ///
    /// [`score::propagate_from`] already writes each recomputed Score
    /// through to the store as it walks the BFS; this only needs to apply
    /// the capacity-transition refetch rule and publish change events for
    /// whatever it reports as actually changed.
    fn propagate_and_persist(
        &self,
        truster: &IdentityId,
        trustee: &IdentityId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let _ = truster;
        for owner in self.store.all_own_identities() {
            let owner_id = owner.id().clone();
            let changed = score::propagate_from(&owner_id, trustee, self.store.as_ref())?;
            for (_node, before, after) in changed {
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
                self.apply_capacity_refetch_rule(&before, &after, now)?;
                match &after {
                    Some(s) => self.publish(ChangeKind::Score, before.as_ref(), Some(s)),
                    None => self.publish(ChangeKind::Score, before.as_ref(), None::<&wot_common::Score>),
                }
            }
        }
        Ok(())
    }

    /// §4.3 step 4: when a Score's capacity transitions 0 -> >0, the
    /// trustee identity must be marked for re-fetch, because its own
    /// trustees were never imported while it carried zero capacity.
    fn apply_capacity_refetch_rule(
        &self,
        before: &Option<wot_common::Score>,
        after: &Option<wot_common::Score>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let was_zero = before.as_ref().map(|s| s.capacity <= 0).unwrap_or(true);
        let now_positive = after.as_ref().map(|s| s.capacity > 0).unwrap_or(false);
        if was_zero && now_positive {
            if let Some(s) = after {
                if let Some(mut identity) = self.store.get_identity(&s.trustee) {
                    identity.mark_for_refetch(now);
                    self.store.put_identity(identity)?;
                }
            }
        }
        Ok(())
    }

    /// Open a trust-list import batch for remote identity `x` (§4.4).
    /// Holds the engine's writer lock until the batch is finished or
    /// dropped, serializing it against `set_trust`/`remove_trust` calls.
    pub fn begin_trust_list_import(&self, x: IdentityId) -> Result<Batch<'_>> {
        let guard = self.lock.lock();
        import::begin_trust_list_import_locked(self.store.as_ref(), x, Utc::now(), Some(guard))
    }

    #[instrument(skip(self))]
    pub fn create_own(&self, insert_uri: Uri, request_uri: Uri, now: DateTime<Utc>) -> Result<OwnIdentity> {
        let _guard = self.lock.lock();
        let own = lifecycle::create_own(self.store.as_ref(), insert_uri, request_uri, now)?;
        self.publish(ChangeKind::Identity, None::<&Identity>, Some(&own.identity));
        info!(id = %own.id(), "own identity created");
        Ok(own)
    }

    #[instrument(skip(self))]
    pub fn add_identity(&self, request_uri: Uri, now: DateTime<Utc>) -> Result<Identity> {
        let _guard = self.lock.lock();
        let identity = lifecycle::add_identity(self.store.as_ref(), request_uri, now)?;
        self.publish(ChangeKind::Identity, None::<&Identity>, Some(&identity));
        Ok(identity)
    }

    #[instrument(skip(self))]
    pub fn restore_own(&self, insert_uri: Uri, now: DateTime<Utc>) -> Result<OwnIdentity> {
        let _guard = self.lock.lock();
        let own = lifecycle::restore_own(self.store.as_ref(), insert_uri, now)?;
        self.publish(ChangeKind::Identity, None::<&Identity>, Some(&own.identity));
        info!(id = %own.id(), "own identity restored");
        Ok(own)
    }

    #[instrument(skip(self))]
    pub fn delete_own(&self, id: &IdentityId, now: DateTime<Utc>) -> Result<Identity> {
        let _guard = self.lock.lock();
        let _ = now;
        let identity = lifecycle::delete_own(self.store.as_ref(), id)?;
        self.publish(ChangeKind::Identity, None::<&Identity>, Some(&identity));
        info!(id = %id, "own identity deleted");
        Ok(identity)
    }

    /// Full recomputation for `owner`; returns `true` if the stored Scores
    /// already matched (§4.3 `compute_all_scores`'s self-check contract).
    pub fn compute_all_scores(&self, owner: &IdentityId) -> bool {
        let _guard = self.lock.lock();
        integrity::compute_all_scores_matches_stored(self.store.as_ref(), owner)
    }

    #[instrument(skip(self))]
    pub fn verify_and_correct_stored_scores(&self) -> Result<bool> {
        let _guard = self.lock.lock();
        self.store.begin()?;
        let result = integrity::verify_and_correct_stored_scores(self.store.as_ref());
        match result {
            Ok(changed) => {
                self.store.commit()?;
                Ok(changed)
            }
            Err(e) => {
                self.store.rollback();
                Err(e)
            }
        }
    }

    pub fn verify_database_integrity(&self) -> Vec<Violation> {
        let _guard = self.lock.lock();
        integrity::verify_database_integrity(self.store.as_ref())
    }

    #[instrument(skip(self))]
    pub fn delete_duplicate_objects(&self) -> Result<usize> {
        let _guard = self.lock.lock();
        self.store.begin()?;
        let result = integrity::delete_duplicate_objects(self.store.as_ref());
        match result {
            Ok(n) => {
                self.store.commit()?;
                Ok(n)
            }
            Err(e) => {
                self.store.rollback();
                Err(e)
            }
        }
    }

    pub fn get_trust(&self, truster: &IdentityId, trustee: &IdentityId) -> Option<Trust> {
        self.store.get_trust(truster, trustee)
    }

    pub fn get_score(&self, owner: &IdentityId, trustee: &IdentityId) -> Option<wot_common::Score> {
        self.store.get_score(owner, trustee)
    }

    pub fn get_identity(&self, id: &IdentityId) -> Option<Identity> {
        self.store.get_identity(id)
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }
}

async fn drive_change_subscriber(
    snapshot: Vec<ChangeEvent>,
    mut rx: broadcast::Receiver<ChangeEvent>,
    subscriber: Arc<dyn ChangeSubscriber>,
) -> WotError {
    for event in snapshot {
        subscriber.on_change(event);
    }
    loop {
        match rx.recv().await {
            Ok(event) => subscriber.on_change(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(dropped = n, "subscriber lagged, disconnecting");
                return WotError::SubscriberLagged(n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return WotError::Store("change bus closed".into());
            }
        }
    }
}

impl IdentityFileConsumer for Engine {
    /// Applies an already-parsed, already-verified identity file via the
    /// same trust-list import bracket (C4) that a direct fetch would use.
    fn import(&self, doc: IdentityFileImport) -> wot_common::Result<()> {
        let now = Utc::now();
        let limits = self.config.limits.clone();
        let mut batch = self.begin_trust_list_import(doc.identity_id)?;
        batch.set_fields(
            doc.nickname,
            doc.publishes_trust_list,
            doc.contexts,
            doc.properties,
            doc.edition,
            now,
            &limits,
        )?;
        for entry in doc.trust_list {
            let trustee_uri = Uri::parse_request(&entry.trustee_request_uri)?;
            batch.upsert_trust_entry(
                TrustListEntry {
                    trustee_uri,
                    value: entry.value,
                    comment: entry.comment,
                },
                now,
                &limits,
            )?;
        }
        batch.finish()?;
        Ok(())
    }
}

/// Crate version, surfaced for diagnostics/logging.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    struct CollectingSubscriber(std::sync::Mutex<Vec<ChangeEvent>>);

    impl ChangeSubscriber for CollectingSubscriber {
        fn on_change(&self, event: ChangeEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn lagging_subscriber_is_disconnected_with_terminal_error() {
        let (tx, rx) = broadcast::channel(2);
        let subscriber = Arc::new(CollectingSubscriber(std::sync::Mutex::new(Vec::new())));

        for _ in 0..5 {
            let _ = tx.send(ChangeEvent {
                kind: ChangeKind::Trust,
                before: None,
                after: None,
            });
        }

        let err = drive_change_subscriber(Vec::new(), rx, subscriber).await;
        assert!(matches!(err, WotError::SubscriberLagged(_)));
    }
}
