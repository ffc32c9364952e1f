//! Per-cycle payment status projection.
//!
//! A read-only view: lateness reclassification happens at query time and is
//! never written back, so no clock-driven background job is needed and
//! repeated queries are side-effect free.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::Amount;
use crate::model::{Contribution, ContributionStatus, Group, Member, UserId};

/// Effective payment state of one member for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Paid,
    Pending,
    Overdue,
}

/// One member's line in the cycle summary.
#[derive(Debug, Clone, Serialize)]
pub struct MemberPaymentStatus {
    pub member_id: UserId,
    pub state: PaymentState,
    pub amount: Amount,
    pub due_date: DateTime<Utc>,
    pub paid_date: Option<DateTime<Utc>>,
}

/// Aggregate payment status for one cycle of a group.
#[derive(Debug, Clone, Serialize)]
pub struct CycleStatus {
    pub cycle: u32,
    pub per_member: Vec<MemberPaymentStatus>,
    pub paid_count: u32,
    /// Currently active members; removed members never count, even for
    /// past cycles, since they cannot be expected to pay.
    pub total_members: u32,
    /// Percentage, `paid_count / total_members * 100`. Zero for a group
    /// with no active members.
    pub completion_rate: f64,
}

impl CycleStatus {
    /// Full collection: every active member paid, and there is at least one.
    pub fn is_complete(&self) -> bool {
        self.total_members > 0 && self.paid_count == self.total_members
    }

    fn empty(cycle: u32) -> Self {
        Self {
            cycle,
            per_member: Vec::new(),
            paid_count: 0,
            total_members: 0,
            completion_rate: 0.0,
        }
    }
}

fn classify(contribution: &Contribution, grace_days: i64, now: DateTime<Utc>) -> PaymentState {
    match contribution.status {
        ContributionStatus::Paid => PaymentState::Paid,
        _ if now > contribution.due_date + Duration::days(grace_days) => PaymentState::Overdue,
        _ => PaymentState::Pending,
    }
}

/// Compute the payment status of `cycle` from a snapshot of the group, its
/// members, and the cycle's contribution rows.
///
/// Active members with no contribution row yet get a synthesized implicit
/// `Pending` entry, covering the window where a freshly opened cycle's
/// batch-create has not landed. A cancelled contribution waives the
/// obligation: that member is excluded from the summary for this cycle.
pub fn check_status(
    group: &Group,
    members: &[Member],
    contributions: &[Contribution],
    cycle: u32,
    now: DateTime<Utc>,
) -> CycleStatus {
    let active: Vec<&Member> = members.iter().filter(|m| m.is_active()).collect();
    if active.is_empty() {
        return CycleStatus::empty(cycle);
    }

    let mut per_member = Vec::with_capacity(active.len());
    for member in &active {
        let row = contributions
            .iter()
            .find(|c| c.member_id == member.user_id && c.cycle == cycle);
        let entry = match row {
            Some(c) if c.status == ContributionStatus::Cancelled => continue,
            Some(c) => MemberPaymentStatus {
                member_id: member.user_id,
                state: classify(c, group.grace_days, now),
                amount: c.amount,
                due_date: c.due_date,
                paid_date: c.paid_date,
            },
            None => MemberPaymentStatus {
                member_id: member.user_id,
                state: PaymentState::Pending,
                amount: group.contribution_amount,
                due_date: group.current_due_date(),
                paid_date: None,
            },
        };
        per_member.push(entry);
    }

    let total_members = per_member.len() as u32;
    if total_members == 0 {
        return CycleStatus::empty(cycle);
    }
    let paid_count = per_member
        .iter()
        .filter(|m| m.state == PaymentState::Paid)
        .count() as u32;

    CycleStatus {
        cycle,
        per_member,
        paid_count,
        total_members,
        completion_rate: paid_count as f64 / total_members as f64 * 100.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Frequency, GroupStatus, MemberRole, MemberStatus};
    use chrono::TimeZone;

    fn group() -> Group {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Group {
            id: 1,
            admin_id: 1,
            contribution_amount: Amount::from_float(1000.0),
            max_members: 3,
            frequency: Frequency::Weekly,
            current_cycle: 1,
            total_cycles: 3,
            cycle_start: start,
            cycle_end: Frequency::Weekly.cycle_end_from(start),
            grace_days: 2,
            status: GroupStatus::Active,
            total_collected: Amount::ZERO,
            total_paid_out: Amount::ZERO,
            successful_cycles: 0,
        }
    }

    fn member(user_id: UserId, join_order: u32, status: MemberStatus) -> Member {
        Member {
            user_id,
            group_id: 1,
            join_order,
            role: MemberRole::Member,
            status,
            total_contributed: Amount::ZERO,
            on_time_payments: 0,
            late_payments: 0,
            missed_payments: 0,
            payout_received: false,
            payout_cycle: None,
        }
    }

    fn paid(group: &Group, user: UserId, at: DateTime<Utc>) -> Contribution {
        let mut c = Contribution::new(user, group, user, 1, group.cycle_end, group.cycle_start);
        c.status = ContributionStatus::Paid;
        c.paid_date = Some(at);
        c
    }

    #[test]
    fn counts_paid_and_pending() {
        let g = group();
        let members = vec![
            member(10, 1, MemberStatus::Active),
            member(20, 2, MemberStatus::Active),
            member(30, 3, MemberStatus::Active),
        ];
        let contributions = vec![
            paid(&g, 10, g.cycle_start),
            Contribution::new(2, &g, 20, 1, g.cycle_end, g.cycle_start),
            Contribution::new(3, &g, 30, 1, g.cycle_end, g.cycle_start),
        ];

        let status = check_status(&g, &members, &contributions, 1, g.cycle_start);
        assert_eq!(status.paid_count, 1);
        assert_eq!(status.total_members, 3);
        assert!((status.completion_rate - 33.333).abs() < 0.01);
        assert!(!status.is_complete());
    }

    #[test]
    fn synthesizes_implicit_pending_for_missing_rows() {
        let g = group();
        let members = vec![
            member(10, 1, MemberStatus::Active),
            member(20, 2, MemberStatus::Active),
        ];
        // Batch-create has not run yet: no contribution rows at all.
        let status = check_status(&g, &members, &[], 1, g.cycle_start);

        assert_eq!(status.per_member.len(), 2);
        assert!(
            status
                .per_member
                .iter()
                .all(|m| m.state == PaymentState::Pending)
        );
        assert_eq!(status.per_member[0].amount, g.contribution_amount);
        assert_eq!(status.per_member[0].due_date, g.cycle_end);
        assert_eq!(status.completion_rate, 0.0);
    }

    #[test]
    fn overdue_only_past_due_date_plus_grace() {
        let g = group();
        let members = vec![member(10, 1, MemberStatus::Active)];
        let contributions = vec![Contribution::new(1, &g, 10, 1, g.cycle_end, g.cycle_start)];

        let at_grace_end = g.cycle_end + Duration::days(g.grace_days);
        let status = check_status(&g, &members, &contributions, 1, at_grace_end);
        assert_eq!(status.per_member[0].state, PaymentState::Pending);

        let past_grace = at_grace_end + Duration::seconds(1);
        let status = check_status(&g, &members, &contributions, 1, past_grace);
        assert_eq!(status.per_member[0].state, PaymentState::Overdue);
    }

    #[test]
    fn removed_members_excluded_from_denominator() {
        let g = group();
        let members = vec![
            member(10, 1, MemberStatus::Active),
            member(20, 2, MemberStatus::Removed),
        ];
        let contributions = vec![paid(&g, 10, g.cycle_start)];

        let status = check_status(&g, &members, &contributions, 1, g.cycle_start);
        assert_eq!(status.total_members, 1);
        assert_eq!(status.completion_rate, 100.0);
        assert!(status.is_complete());
    }

    #[test]
    fn cancelled_contribution_waives_the_obligation() {
        let g = group();
        let members = vec![
            member(10, 1, MemberStatus::Active),
            member(20, 2, MemberStatus::Active),
        ];
        let mut cancelled = Contribution::new(2, &g, 20, 1, g.cycle_end, g.cycle_start);
        cancelled.status = ContributionStatus::Cancelled;
        let contributions = vec![paid(&g, 10, g.cycle_start), cancelled];

        let status = check_status(&g, &members, &contributions, 1, g.cycle_start);
        assert_eq!(status.total_members, 1);
        assert!(status.is_complete());
    }

    #[test]
    fn no_active_members_yields_zeroed_summary() {
        let g = group();
        let members = vec![member(10, 1, MemberStatus::Removed)];
        let status = check_status(&g, &members, &[], 1, g.cycle_start);

        assert_eq!(status.total_members, 0);
        assert_eq!(status.paid_count, 0);
        assert_eq!(status.completion_rate, 0.0);
        assert!(!status.is_complete());
        assert!(status.per_member.is_empty());
    }

    #[test]
    fn completion_rate_stable_under_wall_clock_advance() {
        let g = group();
        let members = vec![
            member(10, 1, MemberStatus::Active),
            member(20, 2, MemberStatus::Active),
        ];
        let contributions = vec![
            paid(&g, 10, g.cycle_start),
            Contribution::new(2, &g, 20, 1, g.cycle_end, g.cycle_start),
        ];

        let before = check_status(&g, &members, &contributions, 1, g.cycle_start);
        // Far past the grace period: the pending row reclassifies overdue,
        // but the rate counts paid members only.
        let later = check_status(
            &g,
            &members,
            &contributions,
            1,
            g.cycle_end + Duration::days(30),
        );

        assert_eq!(later.per_member[1].state, PaymentState::Overdue);
        assert_eq!(before.completion_rate, later.completion_rate);
        assert_eq!(before.paid_count, later.paid_count);
        // Stored rows untouched.
        assert_eq!(contributions[1].status, ContributionStatus::Pending);
    }
}
