//! Signed group membership events.
//!
//! A private group's state is never shipped directly. Every change is an
//! event signed by the member who made it, and each peer folds the union of
//! the events it has seen into the current member list.

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;
use crate::identity::{verify_signature_bytes, Identity};
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum MembershipEventType {
    ChatCreated = 1,
    NameChanged = 2,
    MembersAdded = 3,
    MemberJoined = 4,
    MemberRemoved = 5,
    AdminsAdded = 6,
    AdminRemoved = 7,
}

/// One entry of a group's membership log.
///
/// Field order matters: the derived `Ord` sorts by clock first, which is the
/// order in which the log is replayed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MembershipUpdateEvent {
    pub clock: u64,
    pub event_type: MembershipEventType,
    /// Hex key of the member who issued (and signed) the event.
    pub from: String,
    /// Subject members (added, joined, removed or promoted).
    pub members: Vec<String>,
    /// New group name for `ChatCreated` and `NameChanged`.
    pub name: String,
    pub chat_id: String,
    pub signature: Vec<u8>,
}

impl MembershipUpdateEvent {
    /// Build and sign an event on behalf of `signer`.
    pub fn new_signed(
        signer: &Identity,
        chat_id: &str,
        clock: u64,
        event_type: MembershipEventType,
        members: Vec<String>,
        name: String,
    ) -> Self {
        let mut event = Self {
            clock,
            event_type,
            from: signer.user_id().to_hex(),
            members,
            name,
            chat_id: chat_id.to_string(),
            signature: Vec::new(),
        };
        event.signature = signer.sign(&event.signing_bytes()).to_bytes().to_vec();
        event
    }

    /// Bytes covered by the signature: every field except the signature itself.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.chat_id.as_bytes());
        out.push(0);
        out.extend_from_slice(&self.clock.to_le_bytes());
        out.push(self.event_type as u8);
        out.extend_from_slice(self.from.as_bytes());
        out.push(0);
        for member in &self.members {
            out.extend_from_slice(member.as_bytes());
            out.push(0);
        }
        out.push(0);
        out.extend_from_slice(self.name.as_bytes());
        out
    }

    /// Check that `from` is a valid key and that it signed this event.
    pub fn verify(&self) -> Result<(), IdentityError> {
        let from = UserId::from_hex(&self.from)?;
        verify_signature_bytes(&from.0, &self.signing_bytes(), &self.signature)
    }

    /// The single subject of `MemberJoined`, `MemberRemoved` and `AdminRemoved`.
    pub fn member(&self) -> Option<&str> {
        self.members.first().map(String::as_str)
    }
}
