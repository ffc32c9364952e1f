//! Error taxonomy for the rotation & settlement engine.
//!
//! Expected business conditions (an incomplete collection, a paused group)
//! are plain `Err` values, never panics. Only `ConcurrentModification` is
//! retried automatically, and only once.

use thiserror::Error;

use crate::model::{ContributionId, GroupId, GroupStatus, PayoutId, PayoutStatus, UserId};
use crate::store::{Entity, StoreError};

use super::turn_order::TurnOrderError;

/// Top-level error returned by [`Engine::apply`](super::Engine::apply) and
/// the engine's query methods.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0:?} {1} not found")]
    NotFound(Entity, u64),

    #[error("user {user} is not the admin of group {group}")]
    Unauthorized { group: GroupId, user: UserId },

    /// Stored data violates an invariant; corruption, not a business
    /// condition.
    #[error("invalid state: {0}")]
    InvalidState(#[from] TurnOrderError),

    #[error("cycle {cycle} collection incomplete: {paid}/{total} paid ({rate:.1}%)")]
    IncompleteCollection {
        cycle: u32,
        paid: u32,
        total: u32,
        rate: f64,
    },

    #[error("group {group} is not active ({status:?})")]
    GroupNotActive {
        group: GroupId,
        status: GroupStatus,
    },

    /// The current recipient slot is vacated. The advance is blocked rather
    /// than guessing a substitute recipient.
    #[error("no active member holds the recipient slot for cycle {cycle} of group {group}")]
    AnomalousTurnOrder { group: GroupId, cycle: u32 },

    /// A conditional write lost its race. Callers retry once (re-read,
    /// re-check, re-attempt) before surfacing this.
    #[error("conditional write lost the race")]
    ConcurrentModification,

    #[error("contribution {0} is cancelled")]
    ContributionCancelled(ContributionId),

    #[error("payout {payout} is {status:?}, not actionable for this operation")]
    InvalidPayoutStatus {
        payout: PayoutId,
        status: PayoutStatus,
    },
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(entity, id) => EngineError::NotFound(entity, id),
            // Duplicate inserts and lost CAS writes all mean another writer
            // got there first; the retry path re-reads and resumes.
            StoreError::ConcurrentModification(_, _)
            | StoreError::DuplicateContribution { .. }
            | StoreError::DuplicatePayout { .. } => EngineError::ConcurrentModification,
        }
    }
}
