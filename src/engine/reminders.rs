//! Reminder and escalation target selection.
//!
//! Decides *who* should be nudged about a late contribution and how hard.
//! Delivery (push/SMS/email) belongs to the caller; this module only emits
//! reminder intents.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::engine::status::{CycleStatus, PaymentState};
use crate::model::UserId;

/// How strongly to escalate a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderSeverity {
    Warning,
    Penalty,
}

/// A reminder intent for one member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReminderTarget {
    pub member_id: UserId,
    pub severity: ReminderSeverity,
    pub days_overdue: i64,
}

/// Escalation policy. Kept outside the engine core so products can tune it
/// per group without touching the rotation logic.
#[derive(Debug, Clone, Copy)]
pub struct ReminderPolicy {
    /// Days overdue (past due date and grace) after which a warning
    /// escalates to a penalty reminder.
    pub penalty_after_days: i64,
}

impl Default for ReminderPolicy {
    fn default() -> Self {
        Self {
            penalty_after_days: 7,
        }
    }
}

/// Select reminder targets from a cycle status summary.
///
/// Overdue members at least one full day past `due_date + grace` get a
/// `Warning`; beyond the policy threshold they escalate to `Penalty`.
pub fn select_reminder_targets(
    summary: &CycleStatus,
    grace_days: i64,
    now: DateTime<Utc>,
    policy: ReminderPolicy,
) -> Vec<ReminderTarget> {
    summary
        .per_member
        .iter()
        .filter(|m| m.state == PaymentState::Overdue)
        .filter_map(|m| {
            let overdue_since = m.due_date + Duration::days(grace_days);
            let days_overdue = (now - overdue_since).num_days();
            if days_overdue <= 0 {
                return None;
            }
            let severity = if days_overdue >= policy.penalty_after_days {
                ReminderSeverity::Penalty
            } else {
                ReminderSeverity::Warning
            };
            Some(ReminderTarget {
                member_id: m.member_id,
                severity,
                days_overdue,
            })
        })
        .collect()
}
