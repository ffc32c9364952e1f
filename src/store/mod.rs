//! Abstract Ledger Store boundary.
//!
//! The engine is specified against this trait, not a concrete document
//! database. It requires only filtered reads by `(group, cycle)` and
//! conditional single-document writes; it never assumes multi-document
//! transactions. Only the store layer touches persistence.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{
    Contribution, ContributionId, Group, GroupId, Member, Payout, PayoutId, UserId,
};

mod memory;
pub use memory::MemoryLedger;

/// Entity kind, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Group,
    Member,
    Contribution,
    Payout,
}

/// Errors surfaced by a ledger store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0:?} {1} not found")]
    NotFound(Entity, u64),

    /// A conditional write lost the race: the document no longer matches
    /// the expected precondition.
    #[error("conditional write on {0:?} {1} failed: concurrent modification")]
    ConcurrentModification(Entity, u64),

    #[error("contribution already exists for group {group} member {member} cycle {cycle}")]
    DuplicateContribution {
        group: GroupId,
        member: UserId,
        cycle: u32,
    },

    #[error("non-cancelled payout already exists for group {group} cycle {cycle}")]
    DuplicatePayout { group: GroupId, cycle: u32 },
}

/// Persistence boundary for groups, members, contributions, and payouts.
///
/// Implementations must provide per-document atomic read-modify-write and
/// read-your-writes consistency. The two `conditional_*` methods are the
/// engine's only defense against concurrent admins; a plain read-then-write
/// sequence is not an acceptable implementation of either.
pub trait LedgerStore {
    fn get_group(&self, id: GroupId) -> Result<Group, StoreError>;

    /// Replace the group document, conditioned on its stored `current_cycle`
    /// still being `expected_cycle`. Fails with
    /// [`StoreError::ConcurrentModification`] if another writer advanced the
    /// cycle first.
    fn conditional_update_group(
        &mut self,
        expected_cycle: u32,
        group: Group,
    ) -> Result<(), StoreError>;

    /// Members of a group, ordered by `join_order`. Includes removed
    /// members; callers filter by status.
    fn list_members(&self, group_id: GroupId) -> Result<Vec<Member>, StoreError>;

    fn get_member(&self, group_id: GroupId, user_id: UserId) -> Result<Member, StoreError>;

    fn update_member(&mut self, member: Member) -> Result<(), StoreError>;

    fn list_contributions(
        &self,
        group_id: GroupId,
        cycle: u32,
    ) -> Result<Vec<Contribution>, StoreError>;

    fn get_contribution(&self, id: ContributionId) -> Result<Contribution, StoreError>;

    /// Insert a new contribution, assigning its id. Rejects a second
    /// contribution for the same `(group, member, cycle)`.
    fn create_contribution(
        &mut self,
        contribution: Contribution,
    ) -> Result<ContributionId, StoreError>;

    /// Transition a contribution to `Paid`, conditioned on it currently
    /// being unpaid (`Pending` or `Overdue`). Returns `true` when the write
    /// applied and `false` when the contribution was not unpaid, so a
    /// racing double confirmation is a no-op rather than a double count.
    fn mark_contribution_paid(
        &mut self,
        id: ContributionId,
        paid_date: DateTime<Utc>,
        verified_by: UserId,
        is_late: bool,
        grace_period_used: bool,
    ) -> Result<bool, StoreError>;

    fn update_contribution(&mut self, contribution: Contribution) -> Result<(), StoreError>;

    /// Insert a new payout, assigning its id. Rejects a second non-cancelled
    /// payout for the same `(group, cycle)`.
    fn create_payout(&mut self, payout: Payout) -> Result<PayoutId, StoreError>;

    fn get_payout(&self, id: PayoutId) -> Result<Payout, StoreError>;

    /// The non-cancelled payout for `(group, cycle)`, if one exists.
    fn find_payout(&self, group_id: GroupId, cycle: u32) -> Result<Option<Payout>, StoreError>;

    /// All payouts of a group, cancelled included, ordered by cycle.
    fn list_payouts(&self, group_id: GroupId) -> Result<Vec<Payout>, StoreError>;

    fn update_payout(&mut self, payout: Payout) -> Result<(), StoreError>;
}
