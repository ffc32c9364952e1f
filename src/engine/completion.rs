//! Whole-group completion diagnostics.
//!
//! A read-only sweep over a group's members and payout history. Used by the
//! client UI and suitable for an operational health check; it never mutates
//! state.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{Group, GroupStatus, Member, Payout};

/// Result of validating a group's completion state.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub is_completed: bool,
    /// Cycles still to run, the current one included. Zero once completed.
    pub remaining_cycles: u32,
    /// Detected anomalies, human-readable. Empty means healthy.
    pub issues: Vec<String>,
}

/// Validate a group's completion state and enumerate anomalies: rotation
/// slots that never received a payout despite the group being completed,
/// payouts failed beyond their retry budget, and duplicate payouts for a
/// single cycle.
pub fn validate(group: &Group, members: &[Member], payouts: &[Payout]) -> CompletionReport {
    let is_completed =
        group.status == GroupStatus::Completed || group.current_cycle > group.total_cycles;
    let remaining_cycles = if group.current_cycle > group.total_cycles {
        0
    } else {
        group.total_cycles - group.current_cycle + 1
    };

    let mut issues = Vec::new();

    let mut per_cycle: HashMap<u32, u32> = HashMap::new();
    for payout in payouts.iter().filter(|p| !p.is_cancelled()) {
        *per_cycle.entry(payout.cycle).or_insert(0) += 1;
    }

    let mut duplicate_cycles: Vec<u32> = per_cycle
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(cycle, _)| *cycle)
        .collect();
    duplicate_cycles.sort_unstable();
    for cycle in duplicate_cycles {
        issues.push(format!(
            "cycle {cycle} has {} non-cancelled payouts",
            per_cycle[&cycle]
        ));
    }

    if is_completed {
        for member in members.iter().filter(|m| m.is_active()) {
            if !per_cycle.contains_key(&member.join_order) {
                issues.push(format!(
                    "member {} (join order {}) was never paid out",
                    member.user_id, member.join_order
                ));
            }
        }
    }

    for payout in payouts {
        if payout.retries_exhausted() {
            issues.push(format!(
                "payout {} for cycle {} failed after {} retries and needs manual intervention",
                payout.id, payout.cycle, payout.retry_count
            ));
        }
    }

    CompletionReport {
        is_completed,
        remaining_cycles,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use crate::model::{Frequency, MemberRole, MemberStatus, PayoutStatus, UserId};
    use chrono::Utc;

    fn group(current_cycle: u32, status: GroupStatus) -> Group {
        let now = Utc::now();
        Group {
            id: 1,
            admin_id: 1,
            contribution_amount: Amount::from_float(1000.0),
            max_members: 3,
            frequency: Frequency::Weekly,
            current_cycle,
            total_cycles: 3,
            cycle_start: now,
            cycle_end: Frequency::Weekly.cycle_end_from(now),
            grace_days: 2,
            status,
            total_collected: Amount::ZERO,
            total_paid_out: Amount::ZERO,
            successful_cycles: 0,
        }
    }

    fn member(user_id: UserId, join_order: u32) -> Member {
        Member {
            user_id,
            group_id: 1,
            join_order,
            role: MemberRole::Member,
            status: MemberStatus::Active,
            total_contributed: Amount::ZERO,
            on_time_payments: 0,
            late_payments: 0,
            missed_payments: 0,
            payout_received: true,
            payout_cycle: Some(join_order),
        }
    }

    fn payout(id: u64, cycle: u32, status: PayoutStatus) -> Payout {
        Payout {
            id,
            group_id: 1,
            recipient_id: cycle as UserId * 10,
            cycle,
            gross_amount: Amount::from_float(3000.0),
            processing_fee: Amount::ZERO,
            penalty_deductions: Amount::ZERO,
            net_amount: Amount::from_float(3000.0),
            status,
            retry_count: 0,
            max_retries: 3,
            approved: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn healthy_completed_group() {
        let g = group(4, GroupStatus::Completed);
        let members = vec![member(10, 1), member(20, 2), member(30, 3)];
        let payouts = vec![
            payout(1, 1, PayoutStatus::Completed),
            payout(2, 2, PayoutStatus::Completed),
            payout(3, 3, PayoutStatus::Completed),
        ];

        let report = validate(&g, &members, &payouts);
        assert!(report.is_completed);
        assert_eq!(report.remaining_cycles, 0);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn in_progress_group_reports_remaining_cycles() {
        let g = group(2, GroupStatus::Active);
        let members = vec![member(10, 1), member(20, 2), member(30, 3)];
        let payouts = vec![payout(1, 1, PayoutStatus::Completed)];

        let report = validate(&g, &members, &payouts);
        assert!(!report.is_completed);
        // Cycles 2 and 3 still to run.
        assert_eq!(report.remaining_cycles, 2);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn flags_member_never_paid_out() {
        let g = group(4, GroupStatus::Completed);
        let members = vec![member(10, 1), member(20, 2), member(30, 3)];
        // Cycle 2's payout missing entirely.
        let payouts = vec![
            payout(1, 1, PayoutStatus::Completed),
            payout(3, 3, PayoutStatus::Completed),
        ];

        let report = validate(&g, &members, &payouts);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("member 20"));
        assert!(report.issues[0].contains("never paid out"));
    }

    #[test]
    fn cancelled_payout_does_not_cover_a_slot() {
        let g = group(4, GroupStatus::Completed);
        let members = vec![member(10, 1), member(20, 2)];
        let mut g = g;
        g.max_members = 2;
        g.total_cycles = 2;
        g.current_cycle = 3;
        let payouts = vec![
            payout(1, 1, PayoutStatus::Completed),
            payout(2, 2, PayoutStatus::Cancelled),
        ];

        let report = validate(&g, &members, &payouts);
        assert!(report.issues.iter().any(|i| i.contains("member 20")));
    }

    #[test]
    fn flags_retry_exhausted_failure() {
        let g = group(2, GroupStatus::Active);
        let members = vec![member(10, 1), member(20, 2), member(30, 3)];
        let mut failed = payout(1, 1, PayoutStatus::Failed);
        failed.retry_count = 3;

        let report = validate(&g, &members, &[failed]);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("manual intervention"));
    }

    #[test]
    fn flags_duplicate_payouts_for_one_cycle() {
        let g = group(2, GroupStatus::Active);
        let members = vec![member(10, 1), member(20, 2), member(30, 3)];
        let payouts = vec![
            payout(1, 1, PayoutStatus::Completed),
            payout(2, 1, PayoutStatus::Scheduled),
        ];

        let report = validate(&g, &members, &payouts);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("cycle 1 has 2"));
    }
}
