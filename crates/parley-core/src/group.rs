//! Private group state as a pure fold over signed membership events.
//!
//! Every peer keeps the union of all events it has seen for a group and
//! recomputes members, admins and name from scratch after each merge. The
//! log is replayed in `MembershipUpdateEvent`'s `Ord` order (clock first),
//! so two peers holding the same set of events always agree, whatever order
//! the events arrived in. Events with a bad signature or that are not valid
//! at their position in the log are skipped.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::debug;

use parley_shared::membership::{MembershipEventType, MembershipUpdateEvent};
use parley_shared::types::group_chat_created_by;
use parley_store::ChatMember;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum GroupError {
    #[error("Group {0} has no valid creation event")]
    MissingCreation(String),

    #[error("Group {0} was not created by the key its ID names")]
    CreatorMismatch(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub chat_id: String,
    pub name: String,
    pub creator: String,
    pub members: BTreeSet<String>,
    pub admins: BTreeSet<String>,
    pub joined: BTreeSet<String>,
    /// Sorted, deduplicated, signature-checked log.
    pub events: Vec<MembershipUpdateEvent>,
}

impl Group {
    /// Fold `events` into the group state for `chat_id`.
    pub fn from_events(
        chat_id: &str,
        events: impl IntoIterator<Item = MembershipUpdateEvent>,
    ) -> Result<Self, GroupError> {
        let mut log: Vec<MembershipUpdateEvent> = events
            .into_iter()
            .filter(|e| e.chat_id == chat_id)
            .filter(|e| match e.verify() {
                Ok(()) => true,
                Err(err) => {
                    debug!(chat_id, from = %e.from, error = %err, "Dropping unsigned membership event");
                    false
                }
            })
            .collect();
        log.sort();
        log.dedup();

        let mut group = Self {
            chat_id: chat_id.to_string(),
            name: String::new(),
            creator: String::new(),
            members: BTreeSet::new(),
            admins: BTreeSet::new(),
            joined: BTreeSet::new(),
            events: Vec::new(),
        };
        for event in &log {
            if group.is_valid(event) {
                group.apply(event);
            } else {
                debug!(chat_id, from = %event.from, kind = ?event.event_type, "Skipping invalid membership event");
            }
        }
        group.events = log;

        if group.creator.is_empty() {
            return Err(GroupError::MissingCreation(chat_id.to_string()));
        }
        if !group_chat_created_by(chat_id, &group.creator) {
            return Err(GroupError::CreatorMismatch(chat_id.to_string()));
        }
        Ok(group)
    }

    /// Fold the union of two logs.
    pub fn merge(
        chat_id: &str,
        existing: &[MembershipUpdateEvent],
        incoming: &[MembershipUpdateEvent],
    ) -> Result<Self, GroupError> {
        Self::from_events(chat_id, existing.iter().chain(incoming).cloned())
    }

    pub fn is_member(&self, id: &str) -> bool {
        self.members.contains(id)
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.admins.contains(id)
    }

    pub fn max_clock(&self) -> u64 {
        self.events.iter().map(|e| e.clock).max().unwrap_or(0)
    }

    pub fn chat_members(&self) -> Vec<ChatMember> {
        self.members
            .iter()
            .map(|id| ChatMember {
                id: id.clone(),
                admin: self.admins.contains(id),
                joined: self.joined.contains(id),
            })
            .collect()
    }

    fn is_valid(&self, event: &MembershipUpdateEvent) -> bool {
        let from = event.from.as_str();
        match event.event_type {
            MembershipEventType::ChatCreated => {
                self.creator.is_empty() && self.members.is_empty() && !event.name.trim().is_empty()
            }
            MembershipEventType::NameChanged => {
                self.admins.contains(from) && !event.name.trim().is_empty()
            }
            MembershipEventType::MembersAdded => {
                self.admins.contains(from) && !event.members.is_empty()
            }
            MembershipEventType::MemberJoined => {
                event.member() == Some(from) && self.members.contains(from)
            }
            MembershipEventType::MemberRemoved => match event.member() {
                Some(member) if self.members.contains(member) => {
                    member == from
                        || (self.admins.contains(from) && !self.admins.contains(member))
                }
                _ => false,
            },
            MembershipEventType::AdminsAdded => {
                self.admins.contains(from)
                    && !event.members.is_empty()
                    && event.members.iter().all(|m| self.members.contains(m))
            }
            MembershipEventType::AdminRemoved => {
                self.admins.contains(from) && event.member() == Some(from)
            }
        }
    }

    fn apply(&mut self, event: &MembershipUpdateEvent) {
        match event.event_type {
            MembershipEventType::ChatCreated => {
                self.name = event.name.clone();
                self.creator = event.from.clone();
                self.members.insert(event.from.clone());
                self.admins.insert(event.from.clone());
                self.joined.insert(event.from.clone());
            }
            MembershipEventType::NameChanged => self.name = event.name.clone(),
            MembershipEventType::MembersAdded => {
                self.members.extend(event.members.iter().cloned());
            }
            MembershipEventType::MemberJoined => {
                self.joined.insert(event.from.clone());
            }
            MembershipEventType::MemberRemoved => {
                if let Some(member) = event.member() {
                    self.members.remove(member);
                    self.admins.remove(member);
                    self.joined.remove(member);
                }
            }
            MembershipEventType::AdminsAdded => {
                self.admins.extend(event.members.iter().cloned());
            }
            MembershipEventType::AdminRemoved => {
                self.admins.remove(&event.from);
            }
        }
    }
}
