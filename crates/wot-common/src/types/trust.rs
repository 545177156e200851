//! Trust — a directed, signed edge between two identities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity_id::IdentityId;
use crate::config::Limits;
use crate::error::{Result, WotError};

pub const TRUST_MIN: i64 = -100;
pub const TRUST_MAX: i64 = 100;

/// A directed trust edge `truster -> trustee`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trust {
    pub truster: IdentityId,
    pub trustee: IdentityId,
    pub value: i64,
    pub comment: String,
    pub created: DateTime<Utc>,
    pub last_changed: DateTime<Utc>,
}

impl Trust {
    /// Construct a new Trust, validating value range, comment length, and
    /// the no-self-trust invariant.
    pub fn new(
        truster: IdentityId,
        trustee: IdentityId,
        value: i64,
        comment: String,
        now: DateTime<Utc>,
        limits: &Limits,
    ) -> Result<Self> {
        if truster == trustee {
            return Err(WotError::InvalidParameter(
                "an identity cannot trust itself".into(),
            ));
        }
        if !(TRUST_MIN..=TRUST_MAX).contains(&value) {
            return Err(WotError::InvalidParameter(format!(
                "trust value {value} out of range [{TRUST_MIN}, {TRUST_MAX}]"
            )));
        }
        if comment.chars().count() > limits.comment_max_length {
            return Err(WotError::InvalidParameter(format!(
                "comment longer than {} chars",
                limits.comment_max_length
            )));
        }
        Ok(Self {
            truster,
            trustee,
            value,
            comment,
            created: now,
            last_changed: now,
        })
    }

    pub fn update(
        &mut self,
        value: i64,
        comment: String,
        now: DateTime<Utc>,
        limits: &Limits,
    ) -> Result<()> {
        if !(TRUST_MIN..=TRUST_MAX).contains(&value) {
            return Err(WotError::InvalidParameter(format!(
                "trust value {value} out of range [{TRUST_MIN}, {TRUST_MAX}]"
            )));
        }
        if comment.chars().count() > limits.comment_max_length {
            return Err(WotError::InvalidParameter(format!(
                "comment longer than {} chars",
                limits.comment_max_length
            )));
        }
        self.value = value;
        self.comment = comment;
        self.last_changed = now;
        Ok(())
    }

    pub fn is_positive(&self) -> bool {
        self.value > 0
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> IdentityId {
        IdentityId::from_routing_key(&[byte; 32])
    }

    #[test]
    fn rejects_self_trust() {
        let now = Utc::now();
        let a = id(1);
        let err = Trust::new(a.clone(), a, 50, String::new(), now, &Limits::default()).unwrap_err();
        assert!(matches!(err, WotError::InvalidParameter(_)));
    }

    #[test]
    fn rejects_out_of_range_value() {
        let now = Utc::now();
        let err = Trust::new(id(1), id(2), 101, String::new(), now, &Limits::default())
            .unwrap_err();
        assert!(matches!(err, WotError::InvalidParameter(_)));
    }

    #[test]
    fn accepts_boundary_values() {
        let now = Utc::now();
        assert!(Trust::new(id(1), id(2), -100, String::new(), now, &Limits::default()).is_ok());
        assert!(Trust::new(id(1), id(2), 100, String::new(), now, &Limits::default()).is_ok());
    }
}
