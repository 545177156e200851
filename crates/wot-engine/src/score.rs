//! Score engine (C3): converts the signed Trust graph into per-owner
//! Score trees with bounded capacity propagation, resistant to Sybil
//! inflation by construction (only capacitated trusters can move rank,
//! capacity, or value).

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, instrument, warn};
use wot_common::{IdentityId, Rank, Score, Trust, CAPACITIES, MAX_RANK_IDX};

use crate::error::Result;
use crate::store::Store;

fn capacity_for_rank(rank: u32) -> i64 {
    CAPACITIES[(rank as usize).min(MAX_RANK_IDX)]
}

/// Does `owner` directly assign a negative trust to `target`? Per §4.7
/// this forces `target`'s capacity to 0 even if other positive paths
/// exist, independent of rank.
fn owner_directly_distrusts(owner: &IdentityId, target: &IdentityId, store: &dyn Store) -> bool {
    store
        .get_trust(owner, target)
        .map(|t| t.is_negative())
        .unwrap_or(false)
}

/// Full forward breadth-first computation of rank and capacity for every
/// identity reachable from `owner`, including identities reachable only
/// through a capacitated negative trust (marked [`Rank::Distrusted`]).
///
/// This is the one true reference computation: every other entry point in
/// this module (`compute_all_scores`, `compute_rank_from_scratch_forward`,
/// `compute_rank_from_scratch_caching`) is built on top of it or is
/// required to agree with it.
fn bfs_ranks_and_capacities(
    owner: &IdentityId,
    store: &dyn Store,
) -> (HashMap<IdentityId, Rank>, HashMap<IdentityId, i64>) {
    let mut ranks: HashMap<IdentityId, Rank> = HashMap::new();
    let mut capacities: HashMap<IdentityId, i64> = HashMap::new();
    let mut queue: VecDeque<IdentityId> = VecDeque::new();

    ranks.insert(owner.clone(), Rank::Normal(0));
    capacities.insert(owner.clone(), CAPACITIES[0]);
    queue.push_back(owner.clone());

    while let Some(u) = queue.pop_front() {
        let cap_u = *capacities.get(&u).unwrap_or(&0);
        if cap_u <= 0 {
            continue;
        }
        let rank_u = match ranks.get(&u) {
            Some(Rank::Normal(r)) => *r,
            _ => continue,
        };
        for edge in store.trusts_given_by(&u) {
            if !edge.is_positive() {
                continue;
            }
            if ranks.contains_key(&edge.trustee) {
                continue; // already discovered at an equal-or-shorter rank
            }
            let candidate_rank = rank_u + 1;
            let cap = if owner_directly_distrusts(owner, &edge.trustee, store) {
                0
            } else {
                capacity_for_rank(candidate_rank)
            };
            ranks.insert(edge.trustee.clone(), Rank::Normal(candidate_rank));
            capacities.insert(edge.trustee.clone(), cap);
            if cap > 0 {
                queue.push_back(edge.trustee.clone());
            }
        }
    }

    // Second pass: anything not reached by a positive path, but targeted
    // by a capacitated negative trust, is present-but-distrusted.
    let mut distrusted_candidates: HashSet<IdentityId> = HashSet::new();
    for (u, cap) in capacities.clone() {
        if cap <= 0 {
            continue;
        }
        for edge in store.trusts_given_by(&u) {
            if edge.is_negative() && !ranks.contains_key(&edge.trustee) {
                distrusted_candidates.insert(edge.trustee);
            }
        }
    }
    for trustee in distrusted_candidates {
        ranks.insert(trustee.clone(), Rank::Distrusted);
        capacities.insert(trustee, 0);
    }

    (ranks, capacities)
}

fn compute_value(
    owner: &IdentityId,
    target: &IdentityId,
    capacities: &HashMap<IdentityId, i64>,
    store: &dyn Store,
) -> i64 {
    if target == owner {
        return wot_common::SENTINEL_VALUE;
    }
    store
        .trusts_received_by(target)
        .into_iter()
        .map(|t| {
            let cap = *capacities.get(&t.truster).unwrap_or(&0);
            t.value * cap / 100
        })
        .sum()
}

/// Full recomputation of every Score owned by `owner` (C3).
///
/// Used when an own-identity is created/restored/deleted, a trust-list
/// import batch closes, `verify_and_correct_stored_scores` runs, or an
/// incremental update detects an inconsistency.
#[instrument(skip(store))]
pub fn compute_all_scores(owner: &IdentityId, store: &dyn Store) -> Vec<Score> {
    let (ranks, capacities) = bfs_ranks_and_capacities(owner, store);
    let mut scores = Vec::with_capacity(ranks.len());
    for (trustee, rank) in ranks {
        let capacity = *capacities.get(&trustee).unwrap_or(&0);
        let value = compute_value(owner, &trustee, &capacities, store);
        scores.push(Score {
            owner: owner.clone(),
            trustee,
            value,
            rank,
            capacity,
        });
    }
    scores
}

/// Reference rank computation via memoized top-down recursion. Distinct
/// traversal strategy from [`compute_rank_from_scratch_forward`]; both
/// must agree on every input (§8 cross-algorithm-equivalence).
pub fn compute_rank_from_scratch(
    owner: &IdentityId,
    target: &IdentityId,
    store: &dyn Store,
) -> Option<Rank> {
    #[derive(Clone, Copy)]
    enum State {
        InProgress,
        Done(Option<u32>),
    }

    fn recurse(
        owner: &IdentityId,
        id: &IdentityId,
        store: &dyn Store,
        memo: &mut HashMap<IdentityId, State>,
    ) -> Option<u32> {
        if id == owner {
            return Some(0);
        }
        match memo.get(id) {
            Some(State::Done(r)) => return *r,
            Some(State::InProgress) => return None, // cycle guard
            None => {}
        }
        memo.insert(id.clone(), State::InProgress);

        let mut best: Option<u32> = None;
        for edge in store.trusts_received_by(id) {
            if !edge.is_positive() {
                continue;
            }
            if let Some(truster_rank) = recurse(owner, &edge.truster, store, memo) {
                let truster_cap = if owner_directly_distrusts(owner, &edge.truster, store) {
                    0
                } else {
                    capacity_for_rank(truster_rank)
                };
                let truster_cap = if edge.truster == *owner {
                    CAPACITIES[0]
                } else {
                    truster_cap
                };
                if truster_cap > 0 {
                    let candidate = truster_rank + 1;
                    best = Some(best.map_or(candidate, |b| b.min(candidate)));
                }
            }
        }
        memo.insert(id.clone(), State::Done(best));
        best
    }

    let mut memo = HashMap::new();
    match recurse(owner, target, store, &mut memo) {
        Some(r) => Some(Rank::Normal(r)),
        None => {
            // No positive path; is there a capacitated negative edge?
            let (ranks, capacities) = bfs_ranks_and_capacities(owner, store);
            let _ = ranks;
            let has_capacitated_negative = store.trusts_received_by(target).into_iter().any(|t| {
                t.is_negative() && *capacities.get(&t.truster).unwrap_or(&0) > 0
            });
            if has_capacitated_negative {
                Some(Rank::Distrusted)
            } else {
                None
            }
        }
    }
}

/// Reference rank computation via iterative forward BFS (the same
/// traversal [`compute_all_scores`] uses internally).
pub fn compute_rank_from_scratch_forward(
    owner: &IdentityId,
    target: &IdentityId,
    store: &dyn Store,
) -> Option<Rank> {
    let (ranks, _capacities) = bfs_ranks_and_capacities(owner, store);
    ranks.get(target).copied()
}

/// Forward BFS reusing a caller-supplied rank cache across repeated
/// calls against the same graph snapshot, so propagation through a
/// shared BFS frontier is computed once.
pub fn compute_rank_from_scratch_caching(
    owner: &IdentityId,
    target: &IdentityId,
    store: &dyn Store,
    cache: &mut HashMap<IdentityId, Rank>,
) -> Option<Rank> {
    if let Some(rank) = cache.get(target) {
        return Some(*rank);
    }
    let (ranks, _capacities) = bfs_ranks_and_capacities(owner, store);
    cache.extend(ranks.iter().map(|(k, v)| (k.clone(), *v)));
    ranks.get(target).copied()
}

/// Recompute a single node's (rank, capacity) from its direct incoming
/// trusts, trusting that every *other* node's stored Score is already
/// consistent (the incremental updater's "cheap check", §4.3 step 2).
fn recompute_from_direct_edges(
    owner: &IdentityId,
    target: &IdentityId,
    store: &dyn Store,
) -> Option<(Rank, i64)> {
    if target == owner {
        return Some((Rank::Normal(0), CAPACITIES[0]));
    }
    let truster_capacity = |truster: &IdentityId| -> Option<i64> {
        if truster == owner {
            Some(CAPACITIES[0])
        } else {
            store.get_score(owner, truster).map(|s| s.capacity)
        }
    };
    let truster_rank = |truster: &IdentityId| -> Option<u32> {
        if truster == owner {
            Some(0)
        } else {
            match store.get_score(owner, truster).map(|s| s.rank) {
                Some(Rank::Normal(r)) => Some(r),
                _ => None,
            }
        }
    };

    let incoming = store.trusts_received_by(target);
    let mut best_rank: Option<u32> = None;
    for t in &incoming {
        if !t.is_positive() {
            continue;
        }
        let cap = truster_capacity(&t.truster).unwrap_or(0);
        if cap <= 0 {
            continue;
        }
        if let Some(r) = truster_rank(&t.truster) {
            best_rank = Some(best_rank.map_or(r + 1, |b| b.min(r + 1)));
        }
    }
    if let Some(r) = best_rank {
        let cap = if owner_directly_distrusts(owner, target, store) {
            0
        } else {
            capacity_for_rank(r)
        };
        return Some((Rank::Normal(r), cap));
    }
    for t in &incoming {
        if !t.is_negative() {
            continue;
        }
        let cap = truster_capacity(&t.truster).unwrap_or(0);
        if cap > 0 {
            return Some((Rank::Distrusted, 0));
        }
    }
    None
}

/// Value of `node` using each truster's *stored* capacity, except `node`
/// itself, which uses the freshly recomputed `capacity` (the stored
/// Score for `node` is still the pre-update one while this runs).
fn value_with_fresh_capacity(
    owner: &IdentityId,
    node: &IdentityId,
    capacity: i64,
    store: &dyn Store,
) -> i64 {
    let mut capacities: HashMap<IdentityId, i64> = HashMap::new();
    for t in store.trusts_received_by(node) {
        let cap = if t.truster == *owner {
            CAPACITIES[0]
        } else {
            store
                .get_score(owner, &t.truster)
                .map(|s| s.capacity)
                .unwrap_or(0)
        };
        capacities.insert(t.truster, cap);
    }
    capacities.insert(node.clone(), capacity);
    compute_value(owner, node, &capacities, store)
}

/// Incremental update entry point (§4.3 steps 1-4), run once per
/// OwnIdentity `owner` after a Trust insert/update/remove affecting
/// `changed_trustee`. Returns the set of trustees whose Score changed,
/// which the caller uses to drive the capacity-transition refetch rule.
///
/// Propagation walks outward from `changed_trustee` along positive edges
/// from nodes with positive capacity, stopping as soon as a node's
/// recomputed Score matches what is already stored (§4.3 step 2's cheap
/// check generalized into a termination condition). Each node's new Score
/// is written to `store` as soon as it is computed — not deferred to the
/// caller — because [`recompute_from_direct_edges`] trusts that every
/// *other* node's stored Score is already current; without writing
/// through, a node that loses capacity this pass would leave its
/// downstream trustees reading its stale, still-capacitated Score.
#[instrument(skip(store))]
pub fn propagate_from(
    owner: &IdentityId,
    changed_trustee: &IdentityId,
    store: &dyn Store,
) -> Result<Vec<(IdentityId, Option<Score>, Option<Score>)>> {
    let mut changed = Vec::new();
    let mut queue: VecDeque<IdentityId> = VecDeque::new();
    let mut visited: HashSet<IdentityId> = HashSet::new();
    queue.push_back(changed_trustee.clone());

    while let Some(node) = queue.pop_front() {
        if !visited.insert(node.clone()) {
            continue;
        }
        let before = store.get_score(owner, &node);
        let after = recompute_from_direct_edges(owner, &node, store).map(|(rank, capacity)| {
            let value = value_with_fresh_capacity(owner, &node, capacity, store);
            Score {
                owner: owner.clone(),
                trustee: node.clone(),
                value,
                rank,
                capacity,
            }
        });

        let unchanged = match (&before, &after) {
            (None, None) => true,
            (Some(b), Some(a)) => b.value == a.value && b.rank == a.rank && b.capacity == a.capacity,
            _ => false,
        };

        if unchanged && node != *changed_trustee {
            continue; // stable: no further propagation needed past this node
        }

        debug!(trustee = %node, "score changed, propagating");
        let next_capacity = after.as_ref().map(|s| s.capacity).unwrap_or(0);
        let prev_capacity = before.as_ref().map(|s| s.capacity).unwrap_or(0);

        match &after {
            Some(s) => store.put_score(s.clone())?,
            None => store.remove_score(owner, &node)?,
        }
        changed.push((node.clone(), before, after));

        // A node whose capacity *dropped* still needs its previously
        // capacitated out-edges walked once more: their trustees may no
        // longer be reachable at all and their stale Score rows must be
        // recomputed (down to removal) rather than left in the store.
        if next_capacity > 0 || prev_capacity > 0 {
            for edge in store.trusts_given_by(&node) {
                if edge.is_positive() {
                    queue.push_back(edge.trustee);
                }
            }
        }
    }

    if changed.is_empty() {
        warn!(trustee = %changed_trustee, "incremental update touched no scores");
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use wot_common::{Config, Trust};

    fn id(byte: u8) -> IdentityId {
        IdentityId::from_routing_key(&[byte; 32])
    }

    fn trust(store: &MemoryStore, from: u8, to: u8, value: i64) {
        let t = Trust::new(id(from), id(to), value, String::new(), Utc::now(), &Config::default().limits)
            .unwrap();
        store.begin().unwrap();
        store.put_trust(t).unwrap();
        store.commit().unwrap();
    }

    #[test]
    fn two_hop_capacity_and_value() {
        let store = MemoryStore::new();
        let owner = id(0); // A
        trust(&store, 0, 1, 100); // A -> B
        trust(&store, 1, 2, 50); // B -> C

        let scores = compute_all_scores(&owner, &store);
        let b = scores.iter().find(|s| s.trustee == id(1)).unwrap();
        assert_eq!(b.rank, Rank::Normal(1));
        assert_eq!(b.capacity, 40);
        assert_eq!(b.value, 100);

        let c = scores.iter().find(|s| s.trustee == id(2)).unwrap();
        assert_eq!(c.rank, Rank::Normal(2));
        assert_eq!(c.capacity, 16);
        assert_eq!(c.value, 20); // 50 * 40 / 100
    }

    #[test]
    fn distrust_removes_downstream_reachability() {
        let store = MemoryStore::new();
        let owner = id(0);
        trust(&store, 0, 1, 100);
        trust(&store, 1, 2, 50);
        trust(&store, 0, 1, -1); // overwrite A->B with distrust

        let scores = compute_all_scores(&owner, &store);
        let b = scores.iter().find(|s| s.trustee == id(1)).unwrap();
        assert_eq!(b.rank, Rank::Distrusted);
        assert_eq!(b.capacity, 0);

        assert!(scores.iter().all(|s| s.trustee != id(2)));
    }

    #[test]
    fn malicious_trusters_cannot_move_benign_scores() {
        let store = MemoryStore::new();
        let owner = id(0); // A
        trust(&store, 0, 10, 100); // A -> S (seed)
        trust(&store, 10, 20, 100); // S -> X
        trust(&store, 10, 21, 100); // S -> Y
        trust(&store, 10, 30, -100); // S -> M1
        trust(&store, 10, 31, -100); // S -> M2
        trust(&store, 10, 32, -100); // S -> M3
        trust(&store, 30, 20, -100); // M1 -> X
        trust(&store, 31, 21, -100); // M2 -> Y
        trust(&store, 32, 20, -100); // M3 -> X

        let scores = compute_all_scores(&owner, &store);
        let x = scores.iter().find(|s| s.trustee == id(20)).unwrap();
        let y = scores.iter().find(|s| s.trustee == id(21)).unwrap();
        assert!(x.capacity > 0);
        assert!(y.capacity > 0);
        assert_eq!(x.value, 100 * 40 / 100);

        for m in [30u8, 31, 32] {
            let score = scores.iter().find(|s| s.trustee == id(m)).unwrap();
            assert_eq!(score.capacity, 0);
        }
    }

    #[test]
    fn cross_algorithm_equivalence() {
        let store = MemoryStore::new();
        let owner = id(0);
        trust(&store, 0, 1, 100);
        trust(&store, 1, 2, 50);
        trust(&store, 2, 3, 10);

        let mut cache = HashMap::new();
        for target in [id(1), id(2), id(3)] {
            let a = compute_rank_from_scratch(&owner, &target, &store);
            let b = compute_rank_from_scratch_forward(&owner, &target, &store);
            let c = compute_rank_from_scratch_caching(&owner, &target, &store, &mut cache);
            assert_eq!(a, b, "mismatch for {target}");
            assert_eq!(b, c, "mismatch for {target}");
        }
    }

    #[test]
    fn self_score_is_always_present() {
        let store = MemoryStore::new();
        let owner = id(0);
        let scores = compute_all_scores(&owner, &store);
        assert_eq!(scores.len(), 1);
        assert!(scores[0].is_self_score());
        assert_eq!(scores[0].value, wot_common::SENTINEL_VALUE);
    }
}
