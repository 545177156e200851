//! Score — the derived, per-(owner, trustee) view of the trust graph.
//!
//! Scores are never independently editable; they are a pure function of
//! the current set of [`crate::types::OwnIdentity`]s and
//! [`crate::types::Trust`]s (§score engine). This module only carries the
//! shape of a Score row and the fixed capacity table.

use serde::{Deserialize, Serialize};

use super::identity_id::IdentityId;

/// Capacity by rank, indexed `CAPACITIES[rank.min(MAX_RANK_IDX)]`.
pub const CAPACITIES: [i64; 6] = [100, 40, 16, 6, 2, 1];
pub const MAX_RANK_IDX: usize = CAPACITIES.len() - 1;

/// Value used for a self-Score (`truster == trustee == owner`).
pub const SENTINEL_VALUE: i64 = i64::MAX;

/// Rank: either a finite distance in the positive-capacity subgraph, or
/// `Distrusted` when the trustee is reachable only through a capacitated
/// negative trust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rank {
    Normal(u32),
    Distrusted,
}

impl Rank {
    pub fn capacity_index(self) -> usize {
        match self {
            Rank::Normal(r) => (r as usize).min(MAX_RANK_IDX),
            Rank::Distrusted => MAX_RANK_IDX, // overridden to 0 by direct distrust rule
        }
    }

    pub fn is_distrusted(self) -> bool {
        matches!(self, Rank::Distrusted)
    }
}

/// A materialized Score row for `(owner, trustee)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    pub owner: IdentityId,
    pub trustee: IdentityId,
    pub value: i64,
    pub rank: Rank,
    pub capacity: i64,
}

impl Score {
    pub fn self_score(owner: IdentityId) -> Self {
        Self {
            trustee: owner.clone(),
            owner,
            value: SENTINEL_VALUE,
            rank: Rank::Normal(0),
            capacity: CAPACITIES[0],
        }
    }

    pub fn is_self_score(&self) -> bool {
        self.owner == self.trustee
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_score_has_max_capacity_and_rank_zero() {
        let owner = IdentityId::from_routing_key(&[9u8; 32]);
        let score = Score::self_score(owner);
        assert_eq!(score.rank, Rank::Normal(0));
        assert_eq!(score.capacity, 100);
        assert_eq!(score.value, SENTINEL_VALUE);
        assert!(score.is_self_score());
    }

    #[test]
    fn rank_beyond_table_clamps_capacity_index() {
        assert_eq!(Rank::Normal(99).capacity_index(), MAX_RANK_IDX);
        assert_eq!(CAPACITIES[Rank::Normal(99).capacity_index()], 1);
    }
}
