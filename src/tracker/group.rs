//! Groups and their membership rules
//!
//! The owner is always a participant while anyone remains. When the owner
//! leaves, the smallest remaining participant id takes over.

use std::collections::BTreeSet;

/// A sharing group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: String,
    owner: Option<String>,
    participants: BTreeSet<String>,
    applicants: BTreeSet<String>,
}

/// What happened to ownership when a participant left
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerChange {
    Unchanged,
    Transferred(String),
    Cleared,
}

impl Group {
    /// A new group with its creator as owner and only participant
    pub fn new(id: impl Into<String>, owner: impl Into<String>) -> Self {
        let owner = owner.into();
        let mut participants = BTreeSet::new();
        participants.insert(owner.clone());
        Self {
            id: id.into(),
            owner: Some(owner),
            participants,
            applicants: BTreeSet::new(),
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn is_owner(&self, user: &str) -> bool {
        self.owner.as_deref() == Some(user)
    }

    pub fn is_participant(&self, user: &str) -> bool {
        self.participants.contains(user)
    }

    pub fn is_applicant(&self, user: &str) -> bool {
        self.applicants.contains(user)
    }

    pub fn participants(&self) -> impl Iterator<Item = &String> {
        self.participants.iter()
    }

    pub fn applicants(&self) -> impl Iterator<Item = &String> {
        self.applicants.iter()
    }

    /// Record a join request
    pub fn apply(&mut self, user: impl Into<String>) {
        self.applicants.insert(user.into());
    }

    /// Promote a pending applicant; false when there was no such request
    pub fn accept(&mut self, user: &str) -> bool {
        if !self.applicants.remove(user) {
            return false;
        }
        self.participants.insert(user.to_string());
        true
    }

    /// Remove a participant and apply the ownership rule
    pub fn leave(&mut self, user: &str) -> OwnerChange {
        if !self.participants.remove(user) || !self.is_owner(user) {
            return OwnerChange::Unchanged;
        }

        match self.participants.iter().next().cloned() {
            Some(next) => {
                self.owner = Some(next.clone());
                OwnerChange::Transferred(next)
            }
            None => {
                self.owner = None;
                OwnerChange::Cleared
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_group_owner_is_participant() {
        let group = Group::new("G1", "alice");
        assert!(group.is_owner("alice"));
        assert!(group.is_participant("alice"));
        assert_eq!(group.applicants().count(), 0);
    }

    #[test]
    fn test_apply_then_accept() {
        let mut group = Group::new("G1", "alice");
        group.apply("bob");
        assert!(group.is_applicant("bob"));
        assert!(!group.is_participant("bob"));

        assert!(group.accept("bob"));
        assert!(group.is_participant("bob"));
        assert!(!group.is_applicant("bob"));
        assert!(!group.accept("carol"));
    }

    #[test]
    fn test_owner_leaves_smallest_id_takes_over() {
        let mut group = Group::new("G1", "mallory");
        for user in ["dave", "bob", "zed"] {
            group.apply(user);
            group.accept(user);
        }

        assert_eq!(group.leave("mallory"), OwnerChange::Transferred("bob".to_string()));
        assert!(group.is_owner("bob"));
        assert!(group.is_participant("bob"));
    }

    #[test]
    fn test_last_member_leaves_clears_owner() {
        let mut group = Group::new("G1", "alice");
        assert_eq!(group.leave("alice"), OwnerChange::Cleared);
        assert!(group.owner().is_none());
        assert_eq!(group.participants().count(), 0);
    }

    #[test]
    fn test_non_owner_leaves() {
        let mut group = Group::new("G1", "alice");
        group.apply("bob");
        group.accept("bob");
        assert_eq!(group.leave("bob"), OwnerChange::Unchanged);
        assert!(group.is_owner("alice"));
    }
}
