//! External-adapter contracts (C7): the narrow set of collaborators the
//! core engine consumes from the rest of the application — a clock, a
//! random source, an identity-file producer/consumer, and a change
//! subscriber. Network fetch/insert, XML serialization, HTTP/UI, and the
//! introduction-puzzle protocol all live on the far side of these traits
//! and are out of scope here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{IdentityId, OwnIdentity, Trust};

/// Supplies the current time. Abstracted so the engine's tests can use a
/// fixed clock instead of depending on wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always returns the same instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Supplies random bytes. Used only for `constant_random_pad` generation
/// and similar non-cryptographic-to-the-algorithm bookkeeping — never for
/// Score computation, which is fully deterministic given the Trust graph.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, out: &mut [u8]);
}

/// OS-backed randomness (via `rand`'s `OsRng`).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, out: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(out);
    }
}

/// One outbound trust entry as it appears in an exported identity file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustListEntry {
    pub trustee_request_uri: String,
    pub value: i64,
    pub comment: String,
}

/// The bounded, size-capped export of an [`OwnIdentity`]'s public fields
/// and outbound trust list, ready for the (out-of-scope) XML/network
/// layer to serialize and publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityFileExport {
    pub nickname: Option<String>,
    pub publishes_trust_list: bool,
    pub contexts: Vec<String>,
    pub properties: Vec<(String, String)>,
    pub trust_list: Vec<TrustListEntry>,
    pub truncated: bool,
}

/// Produces the bounded export for an own-identity, truncating the trust
/// list deterministically (lowest-id trustee dropped last) when it would
/// exceed `max_trust_list_entries` or `max_identity_file_bytes`.
pub trait IdentityFileProducer: Send + Sync {
    fn export(
        &self,
        own: &OwnIdentity,
        trusts: &[Trust],
        max_entries: usize,
        max_bytes: usize,
    ) -> IdentityFileExport;
}

/// Default producer: sorts trustees by id descending (so the
/// lowest-id entries are dropped first when truncating) and serializes
/// via `serde_json` to measure the byte cap.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIdentityFileProducer;

impl IdentityFileProducer for DefaultIdentityFileProducer {
    fn export(
        &self,
        own: &OwnIdentity,
        trusts: &[Trust],
        max_entries: usize,
        max_bytes: usize,
    ) -> IdentityFileExport {
        let mut entries: Vec<(IdentityId, TrustListEntry)> = trusts
            .iter()
            .filter(|t| t.truster == own.identity.id)
            .map(|t| {
                (
                    t.trustee.clone(),
                    TrustListEntry {
                        trustee_request_uri: t.trustee.to_string(),
                        value: t.value,
                        comment: t.comment.clone(),
                    },
                )
            })
            .collect();
        // Highest id first so popping from the back drops lowest-id last.
        entries.sort_by(|a, b| b.0.cmp(&a.0));

        let mut truncated = entries.len() > max_entries;
        entries.truncate(max_entries);

        let mut export = IdentityFileExport {
            nickname: own.identity.nickname.clone(),
            publishes_trust_list: own.identity.publishes_trust_list,
            contexts: own.identity.contexts.iter().cloned().collect(),
            properties: own.identity.properties.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            trust_list: entries.into_iter().map(|(_, e)| e).collect(),
            truncated,
        };

        while !export.trust_list.is_empty() {
            let size = serde_json::to_vec(&export).map(|v| v.len()).unwrap_or(usize::MAX);
            if size <= max_bytes {
                break;
            }
            export.trust_list.pop();
            truncated = true;
        }
        export.truncated = truncated;
        export
    }
}

/// One inbound identity file as handed to the engine after off-engine
/// parsing (XML decode, signature verification) has already happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityFileImport {
    pub identity_id: IdentityId,
    pub edition: u64,
    pub nickname: Option<String>,
    pub publishes_trust_list: bool,
    pub contexts: Vec<String>,
    pub properties: Vec<(String, String)>,
    pub trust_list: Vec<TrustListEntry>,
}

/// Accepts an already-parsed, already-verified identity file and applies
/// it to the engine (C4). XML decoding and signature verification happen
/// upstream of this trait, outside the core's scope.
pub trait IdentityFileConsumer: Send + Sync {
    fn import(&self, doc: IdentityFileImport) -> crate::error::Result<()>;
}

/// A committed, post-transaction change for a subscriber to observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChangeKind {
    Identity,
    Trust,
    Score,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
}

/// Observes committed changes. Implementations must not block; a slow
/// subscriber is disconnected rather than allowed to apply back-pressure
/// to the engine (§5).
pub trait ChangeSubscriber: Send + Sync {
    fn on_change(&self, event: ChangeEvent);
}
