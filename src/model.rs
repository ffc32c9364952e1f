//! Core domain records for the rotation & settlement engine.
//!
//! Groups, members, contributions, and payouts are closed structs with
//! explicit status enumerations; unknown status values fail deserialization
//! at the storage boundary instead of propagating.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};

use crate::Amount;

/// Savings group identifier.
pub type GroupId = u64;

/// User identifier (membership records reference users by this id).
pub type UserId = u64;

/// Contribution record identifier.
pub type ContributionId = u64;

/// Payout record identifier.
pub type PayoutId = u64;

/// How often a group collects contributions and rotates the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// End of a cycle opening at `start`. Monthly cycles end one calendar
    /// month later (day-of-month clamped), not a fixed 30 days.
    pub fn cycle_end_from(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Frequency::Daily => start + Duration::days(1),
            Frequency::Weekly => start + Duration::days(7),
            Frequency::Monthly => start
                .checked_add_months(Months::new(1))
                .unwrap_or(start + Duration::days(30)),
        }
    }
}

/// Lifecycle status of a savings group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// Cycles in progress; the only status cycles can advance from.
    Active,
    /// Every member has been paid out; the group is immutable.
    Completed,
    /// Suspended by an admin; may return to `Active`.
    Paused,
    /// Abandoned; terminal.
    Cancelled,
}

/// A savings circle: fixed contribution per cycle, one recipient per cycle,
/// exactly `total_cycles == max_members` cycles in total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub admin_id: UserId,
    pub contribution_amount: Amount,
    pub max_members: u32,
    pub frequency: Frequency,
    /// 1-indexed; advances past `total_cycles` exactly once, on completion.
    pub current_cycle: u32,
    pub total_cycles: u32,
    pub cycle_start: DateTime<Utc>,
    pub cycle_end: DateTime<Utc>,
    pub grace_days: i64,
    pub status: GroupStatus,
    pub total_collected: Amount,
    pub total_paid_out: Amount,
    pub successful_cycles: u32,
}

impl Group {
    pub fn is_active(&self) -> bool {
        self.status == GroupStatus::Active
    }

    /// Due date for contributions of the current cycle.
    pub fn current_due_date(&self) -> DateTime<Utc> {
        self.cycle_end
    }
}

/// A member's role within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Treasurer,
    Member,
}

/// Membership status. Removed members keep their history and their
/// join-order slot; the slot is never renumbered or reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Inactive,
    Removed,
    Pending,
}

/// One user's participation in one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub group_id: GroupId,
    /// Position in the payout rotation, assigned at join time. Dense and
    /// unique among active members; gaps appear only through removal.
    pub join_order: u32,
    pub role: MemberRole,
    pub status: MemberStatus,
    pub total_contributed: Amount,
    pub on_time_payments: u32,
    pub late_payments: u32,
    pub missed_payments: u32,
    pub payout_received: bool,
    /// Cycle in which this member's payout was created, once it has been.
    pub payout_cycle: Option<u32>,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }

    /// Historical on-time percentage. Members with no payment history yet
    /// start at 100.
    pub fn reliability(&self) -> f64 {
        let expected = self.on_time_payments + self.late_payments + self.missed_payments;
        if expected == 0 {
            return 100.0;
        }
        self.on_time_payments as f64 / expected as f64 * 100.0
    }
}

/// Status of a single payment obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionStatus {
    Pending,
    Paid,
    Overdue,
    Cancelled,
}

/// One member's payment obligation for one cycle. At most one exists per
/// (group, member, cycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub id: ContributionId,
    pub group_id: GroupId,
    pub member_id: UserId,
    pub cycle: u32,
    pub amount: Amount,
    pub due_date: DateTime<Utc>,
    /// Stored status. Overdue is additionally derived at read time; the
    /// stored value is only rewritten on confirmation or cancellation.
    pub status: ContributionStatus,
    pub paid_date: Option<DateTime<Utc>>,
    pub is_late: bool,
    pub grace_period_used: bool,
    pub verified: bool,
    pub verified_by: Option<UserId>,
    /// Penalty applied by a late-payment action; deducted from the cycle's
    /// payout net amount.
    pub penalty: Amount,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Contribution {
    pub fn new(
        id: ContributionId,
        group: &Group,
        member_id: UserId,
        cycle: u32,
        due_date: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            group_id: group.id,
            member_id,
            cycle,
            amount: group.contribution_amount,
            due_date,
            status: ContributionStatus::Pending,
            paid_date: None,
            is_late: false,
            grace_period_used: false,
            verified: false,
            verified_by: None,
            penalty: Amount::ZERO,
            note: None,
            created_at,
        }
    }

    pub fn is_unpaid(&self) -> bool {
        matches!(
            self.status,
            ContributionStatus::Pending | ContributionStatus::Overdue
        )
    }
}

/// Disbursement status for a completed cycle's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// The disbursement record for one cycle. At most one non-cancelled payout
/// exists per (group, cycle).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: PayoutId,
    pub group_id: GroupId,
    pub recipient_id: UserId,
    pub cycle: u32,
    pub gross_amount: Amount,
    pub processing_fee: Amount,
    pub penalty_deductions: Amount,
    pub net_amount: Amount,
    pub status: PayoutStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}

impl Payout {
    pub fn is_cancelled(&self) -> bool {
        self.status == PayoutStatus::Cancelled
    }

    pub fn retries_exhausted(&self) -> bool {
        self.status == PayoutStatus::Failed && self.retry_count >= self.max_retries
    }
}
