//! Payout turn-order derivation.
//!
//! Turn order is never persisted. It is a pure function of the membership
//! and the group's cycle counter, re-derivable from stored state at any
//! time, so stored and computed order cannot drift apart.

use thiserror::Error;

use crate::model::{Group, Member, UserId};

/// Join-order corruption detected while deriving turn order. These signal
/// bad data, not a business condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TurnOrderError {
    #[error("duplicate join order {0} among active members")]
    DuplicateJoinOrder(u32),

    #[error("join order {0} outside 1..={1}")]
    JoinOrderOutOfRange(u32, u32),
}

/// Where a rotation slot stands relative to the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The cycle already closed; its recipient was paid.
    Paid,
    /// The cycle currently collecting.
    Current,
    Upcoming,
    /// The slot's member was removed; nobody is assigned to this cycle.
    Unassigned,
}

/// One slot of the payout rotation: the cycle, the member assigned to it
/// (by join order), and its status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnSlot {
    pub cycle: u32,
    pub member: Option<UserId>,
    pub status: TurnStatus,
}

/// Check that active members' join orders are a valid subset of
/// `1..=max_members` with no duplicates.
fn validate(group: &Group, members: &[Member]) -> Result<(), TurnOrderError> {
    let mut seen = vec![false; group.max_members as usize];
    for member in members.iter().filter(|m| m.is_active()) {
        if member.join_order == 0 || member.join_order > group.max_members {
            return Err(TurnOrderError::JoinOrderOutOfRange(
                member.join_order,
                group.max_members,
            ));
        }
        let slot = &mut seen[(member.join_order - 1) as usize];
        if *slot {
            return Err(TurnOrderError::DuplicateJoinOrder(member.join_order));
        }
        *slot = true;
    }
    Ok(())
}

fn active_with_order(members: &[Member], order: u32) -> Option<&Member> {
    members
        .iter()
        .find(|m| m.is_active() && m.join_order == order)
}

/// The full rotation: one slot per cycle `1..=total_cycles`, in order.
/// Slots vacated by removal are reported unassigned, never silently skipped.
pub fn compute(group: &Group, members: &[Member]) -> Result<Vec<TurnSlot>, TurnOrderError> {
    validate(group, members)?;

    let slots = (1..=group.total_cycles)
        .map(|cycle| {
            let member = active_with_order(members, cycle);
            let status = match member {
                None => TurnStatus::Unassigned,
                Some(_) if cycle < group.current_cycle => TurnStatus::Paid,
                Some(_) if cycle == group.current_cycle => TurnStatus::Current,
                Some(_) => TurnStatus::Upcoming,
            };
            TurnSlot {
                cycle,
                member: member.map(|m| m.user_id),
                status,
            }
        })
        .collect();

    Ok(slots)
}

/// The member due to receive the current cycle's pool. `None` means the
/// slot is vacated, a flagged anomaly the cycle advance refuses to guess
/// around.
pub fn current_recipient<'a>(
    group: &Group,
    members: &'a [Member],
) -> Result<Option<&'a Member>, TurnOrderError> {
    validate(group, members)?;
    Ok(active_with_order(members, group.current_cycle))
}

/// The member due after the current recipient. `None` past the final cycle;
/// rotation never wraps because `total_cycles == max_members`.
pub fn next_recipient<'a>(
    group: &Group,
    members: &'a [Member],
) -> Result<Option<&'a Member>, TurnOrderError> {
    validate(group, members)?;
    if group.current_cycle >= group.total_cycles {
        return Ok(None);
    }
    Ok(active_with_order(members, group.current_cycle + 1))
}
