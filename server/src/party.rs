//! Party formation: creation, membership, leadership and readiness.
//!
//! Invariants kept by [`PartyManager`]:
//! - a party never holds more members than its size,
//! - the leader is always a current member,
//! - a user belongs to at most one party (tracked by a reverse index),
//! - a party with no members does not exist.
//!
//! A full party whose members are all ready is removed in the same call that
//! made it so, and handed back to the caller to become a session.

use crate::error::{CoordinatorError, Result};
use crate::utils::generate_id;
use log::{debug, info};
use shared::{PartyId, PartyMember, PartyStatus, UserId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartySize {
    Two = 2,
    Four = 4,
}

impl PartySize {
    /// Four-player parties must be asked for explicitly, anything else is a duo.
    pub fn from_requested(max_size: u8) -> Self {
        match max_size {
            4 => Self::Four,
            _ => Self::Two,
        }
    }

    pub fn capacity(&self) -> usize {
        *self as usize
    }
}

#[derive(Debug, Clone)]
pub struct Party {
    pub id: PartyId,
    pub leader_id: UserId,
    pub size: PartySize,
    /// Members in join order with their ready flag.
    members: Vec<PartyMember>,
}

impl Party {
    fn new(leader_id: &str, size: PartySize) -> Self {
        Self {
            id: generate_id("party"),
            leader_id: leader_id.to_string(),
            size,
            members: vec![PartyMember {
                user_id: leader_id.to_string(),
                ready: false,
            }],
        }
    }

    pub fn member_ids(&self) -> Vec<UserId> {
        self.members.iter().map(|m| m.user_id.clone()).collect()
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.members.iter().any(|m| m.user_id == user_id)
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= self.size.capacity()
    }

    /// Full and every member flagged ready.
    pub fn is_launchable(&self) -> bool {
        self.is_full() && self.members.iter().all(|m| m.ready)
    }

    pub fn is_ready(&self, user_id: &str) -> bool {
        self.members
            .iter()
            .any(|m| m.user_id == user_id && m.ready)
    }

    fn add_member(&mut self, user_id: &str) -> bool {
        if self.is_full() {
            return false;
        }
        self.members.push(PartyMember {
            user_id: user_id.to_string(),
            ready: false,
        });
        true
    }

    fn remove_member(&mut self, user_id: &str) {
        self.members.retain(|m| m.user_id != user_id);

        // Earliest remaining member takes over
        if self.leader_id == user_id {
            if let Some(first) = self.members.first() {
                self.leader_id = first.user_id.clone();
            }
        }
    }

    fn set_ready(&mut self, user_id: &str, ready: bool) {
        if let Some(member) = self.members.iter_mut().find(|m| m.user_id == user_id) {
            member.ready = ready;
        }
    }

    pub fn status(&self) -> PartyStatus {
        PartyStatus {
            id: self.id.clone(),
            leader_id: self.leader_id.clone(),
            max_size: self.size as u8,
            members: self.members.clone(),
        }
    }
}

/// What is left after a member departs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub party_id: PartyId,
    pub user_id: UserId,
    /// Status of the remaining party, `None` if it was dissolved.
    pub remaining: Option<PartyStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyOutcome {
    /// The party still exists with the new flags.
    Updated(PartyStatus),
    /// The party was full and all ready; it has been removed.
    Launched {
        status: PartyStatus,
        members: Vec<UserId>,
    },
}

#[derive(Debug, Default)]
pub struct PartyManager {
    parties: HashMap<PartyId, Party>,
    membership: HashMap<UserId, PartyId>,
}

impl PartyManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, leader_id: &str, requested_size: u8) -> Result<PartyStatus> {
        if self.membership.contains_key(leader_id) {
            return Err(CoordinatorError::AlreadyInParty);
        }

        let party = Party::new(leader_id, PartySize::from_requested(requested_size));
        let status = party.status();
        info!(
            "Party {} created by {} (size {})",
            party.id,
            leader_id,
            party.size.capacity()
        );

        self.membership
            .insert(leader_id.to_string(), party.id.clone());
        self.parties.insert(party.id.clone(), party);
        Ok(status)
    }

    pub fn join(&mut self, party_id: &str, user_id: &str) -> Result<PartyStatus> {
        if self.membership.contains_key(user_id) {
            return Err(CoordinatorError::AlreadyInParty);
        }

        let party = self
            .parties
            .get_mut(party_id)
            .ok_or_else(|| CoordinatorError::PartyNotFound(party_id.to_string()))?;

        if !party.add_member(user_id) {
            return Err(CoordinatorError::PartyFull);
        }

        self.membership
            .insert(user_id.to_string(), party_id.to_string());
        debug!("{} joined party {}", user_id, party_id);
        Ok(party.status())
    }

    pub fn leave(&mut self, user_id: &str) -> Result<Departure> {
        let party_id = self
            .membership
            .remove(user_id)
            .ok_or(CoordinatorError::NotInParty)?;

        let party = self
            .parties
            .get_mut(&party_id)
            .ok_or_else(|| CoordinatorError::PartyNotFound(party_id.clone()))?;
        party.remove_member(user_id);

        let remaining = if party.members.is_empty() {
            self.parties.remove(&party_id);
            info!("Party {} dissolved", party_id);
            None
        } else {
            Some(party.status())
        };

        debug!("{} left party {}", user_id, party_id);
        Ok(Departure {
            party_id,
            user_id: user_id.to_string(),
            remaining,
        })
    }

    /// Removes `target_id` from the leader's party.
    pub fn kick(&mut self, leader_id: &str, target_id: &str) -> Result<Departure> {
        let party = self.party_of(leader_id).ok_or(CoordinatorError::NotInParty)?;

        if party.leader_id != leader_id {
            return Err(CoordinatorError::NotLeader);
        }
        if leader_id == target_id {
            return Err(CoordinatorError::CannotKickSelf);
        }
        if !party.contains(target_id) {
            return Err(CoordinatorError::NotPartyMember(target_id.to_string()));
        }

        info!("{} kicked {} from party {}", leader_id, target_id, party.id);
        self.leave(target_id)
    }

    /// Sets the user's ready flag and launches the party if it is complete.
    pub fn set_ready(&mut self, user_id: &str, ready: bool) -> Result<ReadyOutcome> {
        let party_id = self
            .membership
            .get(user_id)
            .cloned()
            .ok_or(CoordinatorError::NotInParty)?;

        let party = self
            .parties
            .get_mut(&party_id)
            .ok_or_else(|| CoordinatorError::PartyNotFound(party_id.clone()))?;
        party.set_ready(user_id, ready);

        if !party.is_launchable() {
            return Ok(ReadyOutcome::Updated(party.status()));
        }

        // Removal happens before returning, so no later toggle can see this party
        let party = self
            .parties
            .remove(&party_id)
            .ok_or_else(|| CoordinatorError::PartyNotFound(party_id.clone()))?;
        for member in &party.members {
            self.membership.remove(&member.user_id);
        }

        info!("Party {} is ready, launching", party.id);
        Ok(ReadyOutcome::Launched {
            status: party.status(),
            members: party.member_ids(),
        })
    }

    pub fn toggle_ready(&mut self, user_id: &str) -> Result<ReadyOutcome> {
        let current = self
            .party_of(user_id)
            .map(|party| party.is_ready(user_id))
            .ok_or(CoordinatorError::NotInParty)?;
        self.set_ready(user_id, !current)
    }

    pub fn party_of(&self, user_id: &str) -> Option<&Party> {
        self.membership
            .get(user_id)
            .and_then(|party_id| self.parties.get(party_id))
    }

    pub fn get(&self, party_id: &str) -> Option<&Party> {
        self.parties.get(party_id)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.membership.contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    /// Checks every structural invariant; used by tests.
    pub fn check_invariants(&self) -> bool {
        let parties_ok = self.parties.values().all(|party| {
            !party.members.is_empty()
                && party.members.len() <= party.size.capacity()
                && party.contains(&party.leader_id)
                && party
                    .members
                    .iter()
                    .all(|m| self.membership.get(&m.user_id) == Some(&party.id))
        });
        let index_ok = self.membership.iter().all(|(user, party_id)| {
            self.parties
                .get(party_id)
                .is_some_and(|party| party.contains(user))
        });
        parties_ok && index_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(status: &PartyStatus) -> Vec<String> {
        status.member_ids()
    }

    #[test]
    fn test_party_size_from_request() {
        assert_eq!(PartySize::from_requested(4), PartySize::Four);
        assert_eq!(PartySize::from_requested(2), PartySize::Two);
        assert_eq!(PartySize::from_requested(3), PartySize::Two);
        assert_eq!(PartySize::Four.capacity(), 4);
    }

    #[test]
    fn test_create_party() {
        let mut manager = PartyManager::new();
        let status = manager.create("alice", 2).unwrap();

        assert_eq!(status.leader_id, "alice");
        assert_eq!(status.max_size, 2);
        assert_eq!(ids(&status), vec!["alice"]);
        assert!(!status.members[0].ready);
        assert!(manager.is_member("alice"));
        assert!(manager.check_invariants());
    }

    #[test]
    fn test_create_while_partied_fails() {
        let mut manager = PartyManager::new();
        manager.create("alice", 2).unwrap();

        assert_eq!(
            manager.create("alice", 4),
            Err(CoordinatorError::AlreadyInParty)
        );
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_join_party() {
        let mut manager = PartyManager::new();
        let party_id = manager.create("alice", 2).unwrap().id;

        let status = manager.join(&party_id, "bob").unwrap();

        assert_eq!(ids(&status), vec!["alice", "bob"]);
        assert!(manager.check_invariants());
    }

    #[test]
    fn test_join_rejections() {
        let mut manager = PartyManager::new();
        let party_id = manager.create("alice", 2).unwrap().id;
        manager.join(&party_id, "bob").unwrap();

        assert_eq!(
            manager.join(&party_id, "carol"),
            Err(CoordinatorError::PartyFull)
        );
        assert_eq!(
            manager.join("party_missing", "carol"),
            Err(CoordinatorError::PartyNotFound("party_missing".into()))
        );
        assert_eq!(
            manager.join(&party_id, "bob"),
            Err(CoordinatorError::AlreadyInParty)
        );
        assert!(!manager.is_member("carol"));
        assert!(manager.check_invariants());
    }

    #[test]
    fn test_leader_leaving_promotes_earliest_member() {
        let mut manager = PartyManager::new();
        let party_id = manager.create("alice", 4).unwrap().id;
        manager.join(&party_id, "bob").unwrap();
        manager.join(&party_id, "carol").unwrap();

        let departure = manager.leave("alice").unwrap();
        let remaining = departure.remaining.unwrap();

        assert_eq!(remaining.leader_id, "bob");
        assert_eq!(ids(&remaining), vec!["bob", "carol"]);
        assert!(!manager.is_member("alice"));
        assert!(manager.check_invariants());
    }

    #[test]
    fn test_last_member_leaving_dissolves_party() {
        let mut manager = PartyManager::new();
        let party_id = manager.create("alice", 2).unwrap().id;

        let departure = manager.leave("alice").unwrap();

        assert_eq!(departure.party_id, party_id);
        assert!(departure.remaining.is_none());
        assert!(manager.get(&party_id).is_none());
        assert!(manager.is_empty());
    }

    #[test]
    fn test_leave_without_party() {
        let mut manager = PartyManager::new();
        assert_eq!(manager.leave("alice"), Err(CoordinatorError::NotInParty));
    }

    #[test]
    fn test_kick_requires_leader() {
        let mut manager = PartyManager::new();
        let party_id = manager.create("alice", 4).unwrap().id;
        manager.join(&party_id, "bob").unwrap();
        manager.join(&party_id, "carol").unwrap();

        assert_eq!(
            manager.kick("bob", "carol"),
            Err(CoordinatorError::NotLeader)
        );
        assert_eq!(
            manager.kick("alice", "alice"),
            Err(CoordinatorError::CannotKickSelf)
        );
        assert_eq!(
            manager.kick("alice", "dave"),
            Err(CoordinatorError::NotPartyMember("dave".into()))
        );

        let departure = manager.kick("alice", "carol").unwrap();
        assert_eq!(departure.user_id, "carol");
        assert_eq!(ids(&departure.remaining.unwrap()), vec!["alice", "bob"]);
        assert!(!manager.is_member("carol"));
        assert!(manager.check_invariants());
    }

    #[test]
    fn test_toggle_ready_flips_flag() {
        let mut manager = PartyManager::new();
        manager.create("alice", 2).unwrap();

        match manager.toggle_ready("alice").unwrap() {
            ReadyOutcome::Updated(status) => assert!(status.members[0].ready),
            other => panic!("unexpected outcome {:?}", other),
        }
        match manager.toggle_ready("alice").unwrap() {
            ReadyOutcome::Updated(status) => assert!(!status.members[0].ready),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_ready_party_that_is_not_full_stays() {
        let mut manager = PartyManager::new();
        let party_id = manager.create("alice", 4).unwrap().id;
        manager.join(&party_id, "bob").unwrap();
        manager.set_ready("alice", true).unwrap();

        let outcome = manager.set_ready("bob", true).unwrap();

        assert!(matches!(outcome, ReadyOutcome::Updated(_)));
        assert!(manager.get(&party_id).is_some());
    }

    #[test]
    fn test_full_ready_party_launches_once() {
        let mut manager = PartyManager::new();
        let party_id = manager.create("alice", 2).unwrap().id;
        manager.join(&party_id, "bob").unwrap();
        manager.toggle_ready("alice").unwrap();

        let outcome = manager.toggle_ready("bob").unwrap();
        match outcome {
            ReadyOutcome::Launched { members, status } => {
                assert_eq!(members, vec!["alice", "bob"]);
                assert_eq!(status.id, party_id);
            }
            other => panic!("expected launch, got {:?}", other),
        }

        // Party is gone; a late toggle cannot launch it again
        assert!(manager.get(&party_id).is_none());
        assert!(!manager.is_member("alice"));
        assert_eq!(
            manager.toggle_ready("alice"),
            Err(CoordinatorError::NotInParty)
        );
        assert!(manager.check_invariants());
    }

    #[test]
    fn test_new_member_resets_full_readiness() {
        let mut manager = PartyManager::new();
        let party_id = manager.create("alice", 4).unwrap().id;
        for user in ["bob", "carol"] {
            manager.join(&party_id, user).unwrap();
        }
        for user in ["alice", "bob", "carol"] {
            manager.set_ready(user, true).unwrap();
        }

        manager.join(&party_id, "dave").unwrap();
        let party = manager.get(&party_id).unwrap();

        assert!(party.is_full());
        assert!(!party.is_launchable());
        assert!(!party.is_ready("dave"));
    }
}
