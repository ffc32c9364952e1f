//! Rotation & settlement engine for rotating-savings groups.
//!
//! The engine maintains the payout rotation, tracks per-cycle contribution
//! status, and advances groups cycle by cycle, emitting one payout per
//! cycle until every member has been paid once. Commands can also be fed
//! as an async stream.

use chrono::{DateTime, Duration, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::model::{
    Contribution, ContributionId, ContributionStatus, Group, GroupId, GroupStatus, Member, Payout,
    PayoutId, PayoutStatus, UserId,
};
use crate::store::{LedgerStore, StoreError};

pub mod completion;
pub mod reminders;
pub mod status;
pub mod turn_order;

mod error;
pub use error::EngineError;

pub use completion::CompletionReport;
pub use reminders::{ReminderPolicy, ReminderSeverity, ReminderTarget};
pub use status::{CycleStatus, MemberPaymentStatus, PaymentState};
pub use turn_order::{TurnOrderError, TurnSlot, TurnStatus};

/// Engine configuration, passed explicitly at construction. No globals;
/// every engine instance is independent.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Flat fee withheld from each payout.
    pub processing_fee: Amount,
    /// Retry budget for a payout before it is forced to `Failed`.
    pub payout_max_retries: u32,
    pub reminder_policy: ReminderPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            processing_fee: Amount::ZERO,
            payout_max_retries: 3,
            reminder_policy: ReminderPolicy::default(),
        }
    }
}

/// An administrative action against the engine. Each variant carries the
/// caller-supplied identity (authenticated upstream) and, where relevant,
/// its effective timestamp.
#[derive(Debug, Clone)]
pub enum Command {
    /// Confirm a member's contribution as paid. Double confirmation is a
    /// no-op, not a double count.
    ConfirmContribution {
        contribution: ContributionId,
        acting_admin: UserId,
        at: DateTime<Utc>,
    },
    /// Close the current cycle: create the payout, advance the counter,
    /// open the next cycle's contributions.
    AdvanceCycle {
        group: GroupId,
        acting_admin: UserId,
        at: DateTime<Utc>,
    },
    /// Record a note (and optionally a penalty) against a late
    /// contribution. Does not change the contribution's status.
    RecordLatePayment {
        contribution: ContributionId,
        acting_admin: UserId,
        note: String,
        penalty: Option<Amount>,
        at: DateTime<Utc>,
    },
    /// Approve a scheduled payout for processing.
    ApprovePayout {
        payout: PayoutId,
        acting_admin: UserId,
    },
    /// Confirm a processing payout as disbursed.
    CompletePayout {
        payout: PayoutId,
        acting_admin: UserId,
    },
    /// Record a failed disbursement attempt; exhausting the retry budget
    /// forces the payout to `Failed`.
    FailPayoutAttempt {
        payout: PayoutId,
        acting_admin: UserId,
    },
}

/// Result of a successful cycle advance.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleAdvance {
    pub group: GroupId,
    pub new_cycle: u32,
    /// Actual collected pool for the closed cycle (gross, before fee and
    /// penalty deductions).
    pub payout_amount: Amount,
    pub recipient: UserId,
    /// True when the advance exhausted the rotation and completed the group.
    pub group_completed: bool,
}

/// Outcome of a successfully applied [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    ContributionConfirmed {
        contribution: ContributionId,
        /// False when the contribution was already paid (no-op).
        newly_paid: bool,
        late: bool,
    },
    CycleAdvanced(CycleAdvance),
    LatePaymentRecorded {
        contribution: ContributionId,
        penalty: Amount,
    },
    PayoutApproved {
        payout: PayoutId,
    },
    PayoutCompleted {
        payout: PayoutId,
    },
    PayoutAttemptFailed {
        payout: PayoutId,
        retries_left: u32,
        exhausted: bool,
    },
}

/// The rotation & settlement engine.
///
/// Owns a [`LedgerStore`] handle; the cycle advance is the single write
/// path that changes group-cycle state, everything else is a read-only
/// projection.
pub struct Engine<S> {
    store: S,
    config: EngineConfig,
}

/// Public API
impl<S: LedgerStore> Engine<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, EngineConfig::default())
    }

    pub fn with_config(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Apply a single command.
    ///
    /// A lost conditional-write race is retried once (re-read, re-check,
    /// re-attempt) before surfacing [`EngineError::ConcurrentModification`].
    pub fn apply(&mut self, command: Command) -> Result<Outcome, EngineError> {
        let (kind, actor, subject) = command_meta(&command);
        let mut result = self.apply_once(&command);
        if matches!(result, Err(EngineError::ConcurrentModification)) {
            warn!(
                command = kind,
                actor,
                subject,
                "conditional write lost the race, retrying once"
            );
            result = self.apply_once(&command);
        }
        log_result(kind, actor, subject, &result);
        result
    }

    /// Apply a stream of commands. Failed commands are logged by `apply`
    /// and skipped; the stream is never aborted.
    pub async fn run(&mut self, mut commands: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = commands.next().await {
            let _ = self.apply(command);
        }
    }

    /// Payment status summary for one cycle of a group.
    pub fn check_status(
        &self,
        group_id: GroupId,
        cycle: u32,
        now: DateTime<Utc>,
    ) -> Result<CycleStatus, EngineError> {
        let group = self.store.get_group(group_id)?;
        let members = self.store.list_members(group_id)?;
        let contributions = self.store.list_contributions(group_id, cycle)?;
        Ok(status::check_status(
            &group,
            &members,
            &contributions,
            cycle,
            now,
        ))
    }

    /// The full payout rotation, derived from membership and the cycle
    /// counter.
    pub fn turn_order(&self, group_id: GroupId) -> Result<Vec<TurnSlot>, EngineError> {
        let group = self.store.get_group(group_id)?;
        let members = self.store.list_members(group_id)?;
        Ok(turn_order::compute(&group, &members)?)
    }

    /// The member due to receive the current cycle's pool, if the slot is
    /// assigned.
    pub fn current_recipient(&self, group_id: GroupId) -> Result<Option<Member>, EngineError> {
        let group = self.store.get_group(group_id)?;
        let members = self.store.list_members(group_id)?;
        Ok(turn_order::current_recipient(&group, &members)?.cloned())
    }

    /// The member due after the current recipient.
    pub fn next_recipient(&self, group_id: GroupId) -> Result<Option<Member>, EngineError> {
        let group = self.store.get_group(group_id)?;
        let members = self.store.list_members(group_id)?;
        Ok(turn_order::next_recipient(&group, &members)?.cloned())
    }

    /// Completion diagnostics for a group.
    pub fn validate_completion(&self, group_id: GroupId) -> Result<CompletionReport, EngineError> {
        let group = self.store.get_group(group_id)?;
        let members = self.store.list_members(group_id)?;
        let payouts = self.store.list_payouts(group_id)?;
        Ok(completion::validate(&group, &members, &payouts))
    }

    /// Reminder intents for the current cycle's late payers. Emits who and
    /// how hard; delivery is the caller's job.
    pub fn reminder_targets(
        &self,
        group_id: GroupId,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReminderTarget>, EngineError> {
        let group = self.store.get_group(group_id)?;
        let summary = self.check_status(group_id, group.current_cycle, now)?;
        Ok(reminders::select_reminder_targets(
            &summary,
            group.grace_days,
            now,
            self.config.reminder_policy,
        ))
    }
}

/// Private API
impl<S: LedgerStore> Engine<S> {
    fn apply_once(&mut self, command: &Command) -> Result<Outcome, EngineError> {
        match command {
            Command::ConfirmContribution {
                contribution,
                acting_admin,
                at,
            } => self.confirm_contribution(*contribution, *acting_admin, *at),
            Command::AdvanceCycle {
                group,
                acting_admin,
                at,
            } => self
                .process_next_cycle(*group, *acting_admin, *at)
                .map(Outcome::CycleAdvanced),
            Command::RecordLatePayment {
                contribution,
                acting_admin,
                note,
                penalty,
                at,
            } => self.record_late_payment(*contribution, *acting_admin, note, *penalty, *at),
            Command::ApprovePayout {
                payout,
                acting_admin,
            } => self.approve_payout(*payout, *acting_admin),
            Command::CompletePayout {
                payout,
                acting_admin,
            } => self.complete_payout(*payout, *acting_admin),
            Command::FailPayoutAttempt {
                payout,
                acting_admin,
            } => self.fail_payout_attempt(*payout, *acting_admin),
        }
    }

    fn require_admin(group: &Group, acting_admin: UserId) -> Result<(), EngineError> {
        if group.admin_id != acting_admin {
            return Err(EngineError::Unauthorized {
                group: group.id,
                user: acting_admin,
            });
        }
        Ok(())
    }

    fn require_active(group: &Group) -> Result<(), EngineError> {
        if !group.is_active() {
            return Err(EngineError::GroupNotActive {
                group: group.id,
                status: group.status,
            });
        }
        Ok(())
    }

    /// Confirm a contribution as paid and update the member's payment
    /// history. The store write is conditioned on the contribution still
    /// being unpaid, so a racing second confirmation changes nothing.
    fn confirm_contribution(
        &mut self,
        contribution_id: ContributionId,
        acting_admin: UserId,
        at: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let contribution = self.store.get_contribution(contribution_id)?;
        if contribution.status == ContributionStatus::Cancelled {
            return Err(EngineError::ContributionCancelled(contribution_id));
        }
        let group = self.store.get_group(contribution.group_id)?;
        Self::require_admin(&group, acting_admin)?;

        let grace_end = contribution.due_date + Duration::days(group.grace_days);
        let is_late = at > grace_end;
        let grace_period_used = !is_late && at > contribution.due_date;

        let newly_paid = self.store.mark_contribution_paid(
            contribution_id,
            at,
            acting_admin,
            is_late,
            grace_period_used,
        )?;

        if newly_paid {
            let mut member = self
                .store
                .get_member(group.id, contribution.member_id)?;
            member.total_contributed += contribution.amount;
            if is_late {
                member.late_payments += 1;
            } else {
                member.on_time_payments += 1;
            }
            self.store.update_member(member)?;
        }

        Ok(Outcome::ContributionConfirmed {
            contribution: contribution_id,
            newly_paid,
            late: is_late,
        })
    }

    /// Advance a group from its current cycle to the next.
    ///
    /// Preconditions are checked without mutating anything: the caller must
    /// be the group admin, the group must be active, the current cycle must
    /// be fully collected, and the recipient slot must be assigned. The
    /// payout is created before the cycle counter moves; an existing
    /// non-cancelled payout for the current cycle is taken as evidence the
    /// payout step already ran, and the advance resumes from the counter
    /// increment instead of duplicating it.
    fn process_next_cycle(
        &mut self,
        group_id: GroupId,
        acting_admin: UserId,
        at: DateTime<Utc>,
    ) -> Result<CycleAdvance, EngineError> {
        let group = self.store.get_group(group_id)?;
        Self::require_admin(&group, acting_admin)?;
        Self::require_active(&group)?;

        let members = self.store.list_members(group_id)?;
        let cycle = group.current_cycle;

        // A crash between the cycle increment and the batch-create can leave
        // the open cycle short of rows. Recreate whatever is missing before
        // judging the collection, so the shortfall stays payable.
        self.ensure_cycle_rows(&group, &members, cycle, group.cycle_end, at)?;

        let payout = match self.store.find_payout(group_id, cycle)? {
            Some(existing) => {
                warn!(
                    group = group_id,
                    cycle,
                    payout = existing.id,
                    "payout already exists for current cycle, resuming partial advance"
                );
                existing
            }
            None => {
                let contributions = self.store.list_contributions(group_id, cycle)?;
                let summary =
                    status::check_status(&group, &members, &contributions, cycle, at);
                if !summary.is_complete() {
                    return Err(EngineError::IncompleteCollection {
                        cycle,
                        paid: summary.paid_count,
                        total: summary.total_members,
                        rate: summary.completion_rate,
                    });
                }

                let recipient = turn_order::current_recipient(&group, &members)?
                    .ok_or(EngineError::AnomalousTurnOrder {
                        group: group_id,
                        cycle,
                    })?
                    .user_id;

                // Actual collected total, not the nominal amount.
                let gross: Amount = contributions
                    .iter()
                    .filter(|c| c.status == ContributionStatus::Paid)
                    .map(|c| c.amount)
                    .sum();
                let penalties: Amount = contributions.iter().map(|c| c.penalty).sum();
                let fee = self.config.processing_fee;

                let payout = Payout {
                    id: 0,
                    group_id,
                    recipient_id: recipient,
                    cycle,
                    gross_amount: gross,
                    processing_fee: fee,
                    penalty_deductions: penalties,
                    net_amount: gross.saturating_sub(fee).saturating_sub(penalties),
                    status: PayoutStatus::Scheduled,
                    retry_count: 0,
                    max_retries: self.config.payout_max_retries,
                    approved: false,
                    created_at: at,
                };
                // A duplicate insert means another admin slipped in between
                // our lookup and the insert; it converts to a lost race and
                // the retry path resumes from their payout.
                let id = self.store.create_payout(payout.clone())?;
                Payout { id, ..payout }
            }
        };

        // Mark the recipient as paid out. Safe to repeat on resume.
        let mut recipient = self.store.get_member(group_id, payout.recipient_id)?;
        if !recipient.payout_received {
            recipient.payout_received = true;
            recipient.payout_cycle = Some(cycle);
            self.store.update_member(recipient)?;
        }

        let new_cycle = cycle + 1;
        let group_completed = new_cycle > group.total_cycles;

        let mut updated = group.clone();
        updated.current_cycle = new_cycle;
        updated.total_collected += payout.gross_amount;
        updated.total_paid_out += payout.net_amount;
        updated.successful_cycles += 1;
        if group_completed {
            updated.status = GroupStatus::Completed;
        } else {
            updated.cycle_start = at;
            updated.cycle_end = group.frequency.cycle_end_from(at);
        }
        let due_date = updated.cycle_end;
        self.store.conditional_update_group(cycle, updated)?;

        if !group_completed {
            self.ensure_cycle_rows(&group, &members, new_cycle, due_date, at)?;
        }

        info!(
            group = group_id,
            new_cycle,
            recipient = payout.recipient_id,
            amount = %payout.gross_amount,
            group_completed,
            "cycle closed"
        );

        Ok(CycleAdvance {
            group: group_id,
            new_cycle,
            payout_amount: payout.gross_amount,
            recipient: payout.recipient_id,
            group_completed,
        })
    }

    /// Create any contribution rows of `cycle` that do not exist yet. Rows
    /// already present (a cancelled waiver included) are left untouched, so
    /// repeating this after a partial batch is safe.
    fn ensure_cycle_rows(
        &mut self,
        group: &Group,
        members: &[Member],
        cycle: u32,
        due_date: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        for member in members.iter().filter(|m| m.is_active()) {
            let row = Contribution::new(0, group, member.user_id, cycle, due_date, at);
            match self.store.create_contribution(row) {
                Ok(_) => {}
                Err(StoreError::DuplicateContribution { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Record an administrative note (and optional penalty) against a late
    /// contribution. Leaves the contribution's status untouched; the
    /// penalty is deducted from the cycle's payout at settlement.
    fn record_late_payment(
        &mut self,
        contribution_id: ContributionId,
        acting_admin: UserId,
        note: &str,
        penalty: Option<Amount>,
        _at: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        let mut contribution = self.store.get_contribution(contribution_id)?;
        if contribution.status == ContributionStatus::Cancelled {
            return Err(EngineError::ContributionCancelled(contribution_id));
        }
        let group = self.store.get_group(contribution.group_id)?;
        Self::require_admin(&group, acting_admin)?;

        contribution.note = match contribution.note.take() {
            Some(existing) => Some(format!("{existing}; {note}")),
            None => Some(note.to_string()),
        };
        let applied = penalty.unwrap_or(Amount::ZERO);
        contribution.penalty += applied;
        self.store.update_contribution(contribution.clone())?;

        if applied.is_positive() {
            let mut member = self
                .store
                .get_member(group.id, contribution.member_id)?;
            member.missed_payments += 1;
            self.store.update_member(member)?;
        }

        Ok(Outcome::LatePaymentRecorded {
            contribution: contribution_id,
            penalty: applied,
        })
    }

    fn load_payout_for_admin(
        &self,
        payout_id: PayoutId,
        acting_admin: UserId,
    ) -> Result<Payout, EngineError> {
        let payout = self.store.get_payout(payout_id)?;
        let group = self.store.get_group(payout.group_id)?;
        Self::require_admin(&group, acting_admin)?;
        Ok(payout)
    }

    fn approve_payout(
        &mut self,
        payout_id: PayoutId,
        acting_admin: UserId,
    ) -> Result<Outcome, EngineError> {
        let mut payout = self.load_payout_for_admin(payout_id, acting_admin)?;
        if payout.status != PayoutStatus::Scheduled {
            return Err(EngineError::InvalidPayoutStatus {
                payout: payout_id,
                status: payout.status,
            });
        }
        payout.approved = true;
        payout.status = PayoutStatus::Processing;
        self.store.update_payout(payout)?;
        Ok(Outcome::PayoutApproved { payout: payout_id })
    }

    fn complete_payout(
        &mut self,
        payout_id: PayoutId,
        acting_admin: UserId,
    ) -> Result<Outcome, EngineError> {
        let mut payout = self.load_payout_for_admin(payout_id, acting_admin)?;
        if payout.status != PayoutStatus::Processing {
            return Err(EngineError::InvalidPayoutStatus {
                payout: payout_id,
                status: payout.status,
            });
        }
        payout.status = PayoutStatus::Completed;
        self.store.update_payout(payout)?;
        Ok(Outcome::PayoutCompleted { payout: payout_id })
    }

    fn fail_payout_attempt(
        &mut self,
        payout_id: PayoutId,
        acting_admin: UserId,
    ) -> Result<Outcome, EngineError> {
        let mut payout = self.load_payout_for_admin(payout_id, acting_admin)?;
        if payout.status != PayoutStatus::Processing {
            return Err(EngineError::InvalidPayoutStatus {
                payout: payout_id,
                status: payout.status,
            });
        }
        payout.retry_count += 1;
        let exhausted = payout.retry_count >= payout.max_retries;
        if exhausted {
            payout.status = PayoutStatus::Failed;
            warn!(
                payout = payout_id,
                retries = payout.retry_count,
                "payout retry budget exhausted, manual intervention required"
            );
        }
        let retries_left = payout.max_retries - payout.retry_count.min(payout.max_retries);
        self.store.update_payout(payout)?;
        Ok(Outcome::PayoutAttemptFailed {
            payout: payout_id,
            retries_left,
            exhausted,
        })
    }
}

fn command_meta(command: &Command) -> (&'static str, UserId, u64) {
    match command {
        Command::ConfirmContribution {
            contribution,
            acting_admin,
            ..
        } => ("confirm_contribution", *acting_admin, *contribution),
        Command::AdvanceCycle {
            group,
            acting_admin,
            ..
        } => ("advance_cycle", *acting_admin, *group),
        Command::RecordLatePayment {
            contribution,
            acting_admin,
            ..
        } => ("record_late_payment", *acting_admin, *contribution),
        Command::ApprovePayout {
            payout,
            acting_admin,
        } => ("approve_payout", *acting_admin, *payout),
        Command::CompletePayout {
            payout,
            acting_admin,
        } => ("complete_payout", *acting_admin, *payout),
        Command::FailPayoutAttempt {
            payout,
            acting_admin,
        } => ("fail_payout_attempt", *acting_admin, *payout),
    }
}

/// Small helper to log `apply` results
fn log_result(kind: &str, actor: UserId, subject: u64, result: &Result<Outcome, EngineError>) {
    match result {
        Ok(_) => {
            info!(actor, subject, "{kind} applied");
        }
        Err(e) => {
            info!(actor, subject, reason = %e, "{kind} rejected");
        }
    }
}
