use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::model::{
    Contribution, ContributionId, ContributionStatus, Group, GroupId, Member, Payout, PayoutId,
    UserId,
};

use super::{Entity, LedgerStore, StoreError};

/// In-memory ledger store.
///
/// Reference implementation of [`LedgerStore`] used by tests and benches.
/// Honors the same conditional-write semantics a hosted document store
/// would: the group CAS and the contribution status condition are checked
/// against the stored document, not the caller's snapshot.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    groups: HashMap<GroupId, Group>,
    /// Keyed by (group, user); membership is per group.
    members: HashMap<(GroupId, UserId), Member>,
    contributions: HashMap<ContributionId, Contribution>,
    payouts: HashMap<PayoutId, Payout>,
    next_contribution_id: ContributionId,
    next_payout_id: PayoutId,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            next_contribution_id: 1,
            next_payout_id: 1,
            ..Self::default()
        }
    }

    /// Seed a group document. Test/bench setup; group formation itself is
    /// outside the engine.
    pub fn insert_group(&mut self, group: Group) {
        self.groups.insert(group.id, group);
    }

    /// Seed a membership record.
    pub fn insert_member(&mut self, member: Member) {
        self.members
            .insert((member.group_id, member.user_id), member);
    }

    /// Seed a contribution with a pre-assigned id (e.g. reconstructing a
    /// partially-applied state).
    pub fn insert_contribution(&mut self, contribution: Contribution) {
        self.next_contribution_id = self.next_contribution_id.max(contribution.id + 1);
        self.contributions.insert(contribution.id, contribution);
    }

    /// Seed a payout with a pre-assigned id.
    pub fn insert_payout(&mut self, payout: Payout) {
        self.next_payout_id = self.next_payout_id.max(payout.id + 1);
        self.payouts.insert(payout.id, payout);
    }
}

impl LedgerStore for MemoryLedger {
    fn get_group(&self, id: GroupId) -> Result<Group, StoreError> {
        self.groups
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Group, id))
    }

    fn conditional_update_group(
        &mut self,
        expected_cycle: u32,
        group: Group,
    ) -> Result<(), StoreError> {
        let id = group.id;
        let stored = self
            .groups
            .get_mut(&id)
            .ok_or(StoreError::NotFound(Entity::Group, id))?;
        if stored.current_cycle != expected_cycle {
            return Err(StoreError::ConcurrentModification(Entity::Group, id));
        }
        *stored = group;
        Ok(())
    }

    fn list_members(&self, group_id: GroupId) -> Result<Vec<Member>, StoreError> {
        let mut members: Vec<Member> = self
            .members
            .values()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| m.join_order);
        Ok(members)
    }

    fn get_member(&self, group_id: GroupId, user_id: UserId) -> Result<Member, StoreError> {
        self.members
            .get(&(group_id, user_id))
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Member, user_id))
    }

    fn update_member(&mut self, member: Member) -> Result<(), StoreError> {
        let key = (member.group_id, member.user_id);
        if !self.members.contains_key(&key) {
            return Err(StoreError::NotFound(Entity::Member, member.user_id));
        }
        self.members.insert(key, member);
        Ok(())
    }

    fn list_contributions(
        &self,
        group_id: GroupId,
        cycle: u32,
    ) -> Result<Vec<Contribution>, StoreError> {
        let mut rows: Vec<Contribution> = self
            .contributions
            .values()
            .filter(|c| c.group_id == group_id && c.cycle == cycle)
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.id);
        Ok(rows)
    }

    fn get_contribution(&self, id: ContributionId) -> Result<Contribution, StoreError> {
        self.contributions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Contribution, id))
    }

    fn create_contribution(
        &mut self,
        mut contribution: Contribution,
    ) -> Result<ContributionId, StoreError> {
        let duplicate = self.contributions.values().any(|c| {
            c.group_id == contribution.group_id
                && c.member_id == contribution.member_id
                && c.cycle == contribution.cycle
        });
        if duplicate {
            return Err(StoreError::DuplicateContribution {
                group: contribution.group_id,
                member: contribution.member_id,
                cycle: contribution.cycle,
            });
        }
        let id = self.next_contribution_id;
        self.next_contribution_id += 1;
        contribution.id = id;
        self.contributions.insert(id, contribution);
        Ok(id)
    }

    fn mark_contribution_paid(
        &mut self,
        id: ContributionId,
        paid_date: DateTime<Utc>,
        verified_by: UserId,
        is_late: bool,
        grace_period_used: bool,
    ) -> Result<bool, StoreError> {
        let stored = self
            .contributions
            .get_mut(&id)
            .ok_or(StoreError::NotFound(Entity::Contribution, id))?;
        if !stored.is_unpaid() {
            return Ok(false);
        }
        stored.status = ContributionStatus::Paid;
        stored.paid_date = Some(paid_date);
        stored.verified = true;
        stored.verified_by = Some(verified_by);
        stored.is_late = is_late;
        stored.grace_period_used = grace_period_used;
        Ok(true)
    }

    fn update_contribution(&mut self, contribution: Contribution) -> Result<(), StoreError> {
        if !self.contributions.contains_key(&contribution.id) {
            return Err(StoreError::NotFound(Entity::Contribution, contribution.id));
        }
        self.contributions.insert(contribution.id, contribution);
        Ok(())
    }

    fn create_payout(&mut self, mut payout: Payout) -> Result<PayoutId, StoreError> {
        let duplicate = self
            .payouts
            .values()
            .any(|p| p.group_id == payout.group_id && p.cycle == payout.cycle && !p.is_cancelled());
        if duplicate {
            return Err(StoreError::DuplicatePayout {
                group: payout.group_id,
                cycle: payout.cycle,
            });
        }
        let id = self.next_payout_id;
        self.next_payout_id += 1;
        payout.id = id;
        self.payouts.insert(id, payout);
        Ok(id)
    }

    fn get_payout(&self, id: PayoutId) -> Result<Payout, StoreError> {
        self.payouts
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(Entity::Payout, id))
    }

    fn find_payout(&self, group_id: GroupId, cycle: u32) -> Result<Option<Payout>, StoreError> {
        Ok(self
            .payouts
            .values()
            .find(|p| p.group_id == group_id && p.cycle == cycle && !p.is_cancelled())
            .cloned())
    }

    fn list_payouts(&self, group_id: GroupId) -> Result<Vec<Payout>, StoreError> {
        let mut rows: Vec<Payout> = self
            .payouts
            .values()
            .filter(|p| p.group_id == group_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| (p.cycle, p.id));
        Ok(rows)
    }

    fn update_payout(&mut self, payout: Payout) -> Result<(), StoreError> {
        if !self.payouts.contains_key(&payout.id) {
            return Err(StoreError::NotFound(Entity::Payout, payout.id));
        }
        self.payouts.insert(payout.id, payout);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Frequency, GroupStatus, PayoutStatus};
    use crate::Amount;

    fn group(id: GroupId, cycle: u32) -> Group {
        let now = Utc::now();
        Group {
            id,
            admin_id: 1,
            contribution_amount: Amount::from_float(1000.0),
            max_members: 3,
            frequency: Frequency::Weekly,
            current_cycle: cycle,
            total_cycles: 3,
            cycle_start: now,
            cycle_end: Frequency::Weekly.cycle_end_from(now),
            grace_days: 2,
            status: GroupStatus::Active,
            total_collected: Amount::ZERO,
            total_paid_out: Amount::ZERO,
            successful_cycles: 0,
        }
    }

    fn contribution(group: &Group, member: UserId, cycle: u32) -> Contribution {
        Contribution::new(0, group, member, cycle, group.cycle_end, Utc::now())
    }

    #[test]
    fn get_group_not_found() {
        let store = MemoryLedger::new();
        assert!(matches!(
            store.get_group(9),
            Err(StoreError::NotFound(Entity::Group, 9))
        ));
    }

    #[test]
    fn conditional_update_group_applies_on_matching_cycle() {
        let mut store = MemoryLedger::new();
        store.insert_group(group(1, 1));

        let mut updated = group(1, 1);
        updated.current_cycle = 2;
        store.conditional_update_group(1, updated).unwrap();

        assert_eq!(store.get_group(1).unwrap().current_cycle, 2);
    }

    #[test]
    fn conditional_update_group_rejects_stale_expectation() {
        let mut store = MemoryLedger::new();
        store.insert_group(group(1, 2));

        let result = store.conditional_update_group(1, group(1, 1));
        assert!(matches!(
            result,
            Err(StoreError::ConcurrentModification(Entity::Group, 1))
        ));
        // Stored document untouched.
        assert_eq!(store.get_group(1).unwrap().current_cycle, 2);
    }

    #[test]
    fn create_contribution_assigns_ids_and_rejects_duplicates() {
        let mut store = MemoryLedger::new();
        let g = group(1, 1);
        store.insert_group(g.clone());

        let id = store.create_contribution(contribution(&g, 10, 1)).unwrap();
        assert_eq!(id, 1);

        let result = store.create_contribution(contribution(&g, 10, 1));
        assert!(matches!(
            result,
            Err(StoreError::DuplicateContribution {
                group: 1,
                member: 10,
                cycle: 1
            })
        ));

        // Same member, different cycle is fine.
        let id = store.create_contribution(contribution(&g, 10, 2)).unwrap();
        assert_eq!(id, 2);
    }

    #[test]
    fn mark_contribution_paid_is_conditional_on_unpaid() {
        let mut store = MemoryLedger::new();
        let g = group(1, 1);
        store.insert_group(g.clone());
        let id = store.create_contribution(contribution(&g, 10, 1)).unwrap();

        let now = Utc::now();
        assert!(store.mark_contribution_paid(id, now, 1, false, false).unwrap());
        // Second confirmation is a no-op, not a double count.
        assert!(!store.mark_contribution_paid(id, now, 1, false, false).unwrap());

        let stored = store.get_contribution(id).unwrap();
        assert_eq!(stored.status, ContributionStatus::Paid);
        assert_eq!(stored.paid_date, Some(now));
        assert_eq!(stored.verified_by, Some(1));
    }

    #[test]
    fn create_payout_rejects_second_non_cancelled_for_cycle() {
        let mut store = MemoryLedger::new();
        let payout = Payout {
            id: 0,
            group_id: 1,
            recipient_id: 10,
            cycle: 1,
            gross_amount: Amount::from_float(3000.0),
            processing_fee: Amount::ZERO,
            penalty_deductions: Amount::ZERO,
            net_amount: Amount::from_float(3000.0),
            status: PayoutStatus::Scheduled,
            retry_count: 0,
            max_retries: 3,
            approved: false,
            created_at: Utc::now(),
        };
        store.create_payout(payout.clone()).unwrap();

        let result = store.create_payout(payout.clone());
        assert!(matches!(
            result,
            Err(StoreError::DuplicatePayout { group: 1, cycle: 1 })
        ));

        // A cancelled payout frees the slot.
        let mut stored = store.find_payout(1, 1).unwrap().unwrap();
        stored.status = PayoutStatus::Cancelled;
        store.update_payout(stored).unwrap();
        store.create_payout(payout).unwrap();
    }

    #[test]
    fn find_payout_skips_cancelled() {
        let mut store = MemoryLedger::new();
        let mut payout = Payout {
            id: 5,
            group_id: 1,
            recipient_id: 10,
            cycle: 1,
            gross_amount: Amount::from_float(3000.0),
            processing_fee: Amount::ZERO,
            penalty_deductions: Amount::ZERO,
            net_amount: Amount::from_float(3000.0),
            status: PayoutStatus::Cancelled,
            retry_count: 0,
            max_retries: 3,
            approved: false,
            created_at: Utc::now(),
        };
        store.insert_payout(payout.clone());
        assert!(store.find_payout(1, 1).unwrap().is_none());

        payout.id = 6;
        payout.status = PayoutStatus::Scheduled;
        store.insert_payout(payout);
        assert_eq!(store.find_payout(1, 1).unwrap().unwrap().id, 6);
    }

    #[test]
    fn list_members_sorted_by_join_order() {
        use crate::model::{MemberRole, MemberStatus};
        let mut store = MemoryLedger::new();
        for (user, order) in [(30, 3), (10, 1), (20, 2)] {
            store.insert_member(Member {
                user_id: user,
                group_id: 1,
                join_order: order,
                role: MemberRole::Member,
                status: MemberStatus::Active,
                total_contributed: Amount::ZERO,
                on_time_payments: 0,
                late_payments: 0,
                missed_payments: 0,
                payout_received: false,
                payout_cycle: None,
            });
        }
        let orders: Vec<u32> = store
            .list_members(1)
            .unwrap()
            .iter()
            .map(|m| m.join_order)
            .collect();
        assert_eq!(orders, vec![1, 2, 3]);
    }
}
