//! Domain model structs persisted in the local SQLite database.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can be handed
//! directly to a UI layer inside a response diff.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::constants::TIMELINE_CHAT_ID;
use parley_shared::membership::MembershipUpdateEvent;
use parley_shared::protocol::{
    ChatScope, ContentType, EmojiKind, IdentityImage, PayloadType, TrustStatus,
    VerificationStatus,
};
use parley_shared::UserId;

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChatType {
    OneToOne,
    Public,
    PrivateGroup,
    Profile,
    Timeline,
    CommunityChannel,
}

impl ChatType {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::OneToOne => 1,
            Self::Public => 2,
            Self::PrivateGroup => 3,
            Self::Profile => 4,
            Self::Timeline => 5,
            Self::CommunityChannel => 6,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::OneToOne),
            2 => Some(Self::Public),
            3 => Some(Self::PrivateGroup),
            4 => Some(Self::Profile),
            5 => Some(Self::Timeline),
            6 => Some(Self::CommunityChannel),
            _ => None,
        }
    }

    /// Wire scope used for content payloads addressed to this kind of chat.
    pub fn scope(self) -> ChatScope {
        match self {
            Self::OneToOne => ChatScope::OneToOne,
            Self::PrivateGroup => ChatScope::PrivateGroup,
            Self::CommunityChannel => ChatScope::CommunityChat,
            Self::Public | Self::Profile | Self::Timeline => ChatScope::Public,
        }
    }
}

/// A member of a private group chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMember {
    /// Hex-encoded public key.
    pub id: String,
    pub admin: bool,
    /// Whether the member accepted the invitation.
    pub joined: bool,
}

/// A conversation of any kind. Chats are never deleted while referenced,
/// only deactivated and tombstoned through `deleted_at_clock_value`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chat {
    /// Contact key for one-to-one chats, topic for public chats,
    /// `<uuid>-<creator key>` for groups, `@<key>` for profiles.
    pub id: String,
    pub name: String,
    pub chat_type: ChatType,
    /// Visible to the user.
    pub active: bool,
    /// Creation time (ms).
    pub timestamp: u64,
    /// Highest logical clock observed for this chat. Never decreases.
    pub last_clock_value: u64,
    /// Edits with a clock at or below this are ignored.
    pub deleted_at_clock_value: u64,
    /// Messages with a clock at or below this are already read.
    pub read_messages_at_clock_value: u64,
    /// Clock at which we joined (public chats) or were added (groups).
    pub joined: u64,
    pub unviewed_messages_count: u32,
    pub muted: bool,
    pub last_message: Option<Box<Message>>,
    pub members: Vec<ChatMember>,
    pub membership_updates: Vec<MembershipUpdateEvent>,
}

impl Chat {
    fn blank(id: String, name: String, chat_type: ChatType, timestamp: u64) -> Self {
        Self {
            id,
            name,
            chat_type,
            active: true,
            timestamp,
            last_clock_value: 0,
            deleted_at_clock_value: 0,
            read_messages_at_clock_value: 0,
            joined: 0,
            unviewed_messages_count: 0,
            muted: false,
            last_message: None,
            members: Vec::new(),
            membership_updates: Vec::new(),
        }
    }

    pub fn new_one_to_one(contact: &UserId, timestamp: u64) -> Self {
        let id = contact.to_hex();
        let name = contact.short();
        Self::blank(id, name, ChatType::OneToOne, timestamp)
    }

    pub fn new_public(topic: &str, timestamp: u64) -> Self {
        Self::blank(topic.to_string(), topic.to_string(), ChatType::Public, timestamp)
    }

    pub fn new_profile(owner: &UserId, timestamp: u64) -> Self {
        Self::blank(
            owner.profile_chat_id(),
            owner.short(),
            ChatType::Profile,
            timestamp,
        )
    }

    pub fn new_timeline(timestamp: u64) -> Self {
        Self::blank(
            TIMELINE_CHAT_ID.to_string(),
            "timeline".to_string(),
            ChatType::Timeline,
            timestamp,
        )
    }

    pub fn new_private_group(id: &str, name: &str, timestamp: u64) -> Self {
        Self::blank(
            id.to_string(),
            name.to_string(),
            ChatType::PrivateGroup,
            timestamp,
        )
    }

    pub fn new_community_channel(id: &str, name: &str, timestamp: u64) -> Self {
        Self::blank(
            id.to_string(),
            name.to_string(),
            ChatType::CommunityChannel,
            timestamp,
        )
    }

    pub fn is_one_to_one(&self) -> bool {
        self.chat_type == ChatType::OneToOne
    }

    pub fn is_public(&self) -> bool {
        matches!(
            self.chat_type,
            ChatType::Public | ChatType::Profile | ChatType::Timeline
        )
    }

    pub fn is_private_group(&self) -> bool {
        self.chat_type == ChatType::PrivateGroup
    }

    /// Public chats (not profile or timeline feeds), one-to-one chats and
    /// private groups follow the identity to paired installations.
    pub fn should_be_synced(&self) -> bool {
        matches!(
            self.chat_type,
            ChatType::Public | ChatType::OneToOne | ChatType::PrivateGroup
        )
    }

    /// Counterparty of a one-to-one chat.
    pub fn counterparty(&self) -> Option<UserId> {
        if !self.is_one_to_one() {
            return None;
        }
        UserId::from_hex(&self.id).ok()
    }

    pub fn has_member(&self, id: &str) -> bool {
        self.members.iter().any(|m| m.id == id)
    }

    pub fn is_admin(&self, id: &str) -> bool {
        self.members.iter().any(|m| m.id == id && m.admin)
    }

    /// Raise `last_clock_value` to `clock` if it is newer.
    pub fn bump_clock(&mut self, clock: u64) {
        if clock > self.last_clock_value {
            self.last_clock_value = clock;
        }
    }

    /// Fold a newly accepted message into the chat's cached state.
    pub fn update_from_message(&mut self, message: &Message) {
        let newer = self
            .last_message
            .as_ref()
            .map(|last| last.clock <= message.clock)
            .unwrap_or(true);
        if newer && !message.deleted {
            self.last_message = Some(Box::new(message.clone()));
        }
        self.bump_clock(message.clock);
    }

    /// Hide the chat and tombstone everything up to `clock`.
    pub fn deactivate(&mut self, clock: u64) {
        self.active = false;
        if clock > self.deleted_at_clock_value {
            self.deleted_at_clock_value = clock;
        }
        self.last_message = None;
        self.unviewed_messages_count = 0;
        self.bump_clock(clock);
    }
}

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A known identity. Created lazily the first time a key is referenced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    /// Hex-encoded public key.
    pub id: String,
    pub display_name: String,
    pub ens_name: String,
    pub ens_verified: bool,
    pub local_nickname: String,
    pub bio: String,
    /// Clock of the contact's own latest broadcast.
    pub last_updated: u64,
    /// Clock of the latest edit made on one of our installations.
    pub last_updated_locally: u64,
    /// Clock of the latest identity publication applied.
    pub identity_clock: u64,
    pub added: bool,
    pub blocked: bool,
    pub removed: bool,
    pub has_added_us: bool,
    pub verification_status: VerificationStatus,
    pub trust_status: TrustStatus,
    pub images: BTreeMap<String, IdentityImage>,
}

impl Contact {
    pub fn new(id: &UserId) -> Self {
        Self {
            id: id.to_hex(),
            display_name: String::new(),
            ens_name: String::new(),
            ens_verified: false,
            local_nickname: String::new(),
            bio: String::new(),
            last_updated: 0,
            last_updated_locally: 0,
            identity_clock: 0,
            added: false,
            blocked: false,
            removed: false,
            has_added_us: false,
            verification_status: VerificationStatus::default(),
            trust_status: TrustStatus::default(),
            images: BTreeMap::new(),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        UserId::from_hex(&self.id).ok()
    }

    /// Whether the contact carries any state worth syncing.
    pub fn has_non_default_flags(&self) -> bool {
        self.added
            || self.blocked
            || self.removed
            || self.has_added_us
            || !self.local_nickname.is_empty()
    }

    pub fn is_mutual(&self) -> bool {
        self.added && self.has_added_us
    }

    pub fn mark_added(&mut self, clock: u64) {
        self.added = true;
        self.removed = false;
        self.last_updated_locally = clock;
    }

    pub fn remove(&mut self, clock: u64) {
        self.added = false;
        self.removed = true;
        self.last_updated_locally = clock;
    }

    pub fn block(&mut self, clock: u64) {
        self.blocked = true;
        self.added = false;
        self.last_updated_locally = clock;
    }

    pub fn unblock(&mut self, clock: u64) {
        self.blocked = false;
        self.last_updated_locally = clock;
    }
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallationMetadata {
    pub name: String,
    pub device_type: String,
}

/// One device sharing our identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Installation {
    pub id: String,
    /// Hex key of the identity owning this installation.
    pub identity: String,
    pub version: u32,
    pub enabled: bool,
    /// When we first learned about it (ms).
    pub timestamp: u64,
    pub metadata: Option<InstallationMetadata>,
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A chat message as stored and displayed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    /// Hex key of the author.
    pub from: String,
    pub clock: u64,
    pub timestamp: u64,
    /// Transport timestamp (ms).
    pub whisper_timestamp: u64,
    pub content_type: ContentType,
    pub text: String,
    pub response_to: String,
    pub seen: bool,
    pub deleted: bool,
    /// Clock of the latest applied edit, 0 if never edited.
    pub edited_at: u64,
    pub outgoing: bool,
}

/// An edit received before the message it targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingEdit {
    pub message_id: String,
    pub chat_id: String,
    pub from: String,
    pub clock: u64,
    pub text: String,
}

/// A delete received before the message it targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingDelete {
    pub message_id: String,
    pub chat_id: String,
    pub from: String,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinRecord {
    /// Derived from signer, message and chat.
    pub id: String,
    pub message_id: String,
    pub chat_id: String,
    pub pinned_by: String,
    pub pinned: bool,
    pub clock: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionRecord {
    /// Derived from signer, message, chat and emoji.
    pub id: String,
    pub message_id: String,
    pub chat_id: String,
    pub from: String,
    pub emoji: EmojiKind,
    pub retracted: bool,
    pub clock: u64,
}

// ---------------------------------------------------------------------------
// Outbound envelopes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ResendPolicy {
    #[default]
    None,
    Automatic,
    DataSync,
}

impl ResendPolicy {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Automatic => 1,
            Self::DataSync => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => Self::Automatic,
            2 => Self::DataSync,
            _ => Self::None,
        }
    }
}

/// Durable record of an outbound send attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawMessage {
    /// Assigned by the encryption layer when sealing.
    pub id: String,
    pub local_chat_id: String,
    pub payload: Vec<u8>,
    pub payload_type: PayloadType,
    /// Hex keys the payload was addressed to. Empty for broadcasts.
    pub recipients: Vec<String>,
    pub resend: ResendPolicy,
    pub send_count: u32,
    pub sent: bool,
    /// Wall-clock time of the last attempt (ms).
    pub last_sent: u64,
    pub skip_group_message_wrap: bool,
}

impl RawMessage {
    pub fn new(local_chat_id: &str, payload_type: PayloadType, payload: Vec<u8>) -> Self {
        Self {
            id: String::new(),
            local_chat_id: local_chat_id.to_string(),
            payload,
            payload_type,
            recipients: Vec::new(),
            resend: ResendPolicy::None,
            send_count: 0,
            sent: false,
            last_sent: 0,
            skip_group_message_wrap: false,
        }
    }

    pub fn with_resend(mut self, resend: ResendPolicy) -> Self {
        self.resend = resend;
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletBalance {
    pub address: String,
    /// Decimal string in the smallest unit.
    pub balance: String,
    pub updated_at: DateTime<Utc>,
}

/// A transaction referenced by a message, waiting for on-chain validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionToValidate {
    pub transaction_hash: String,
    pub message_id: String,
    pub command_id: String,
    pub from: String,
    pub retry_count: u32,
    pub first_seen: DateTime<Utc>,
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, clock: u64) -> Message {
        Message {
            id: id.into(),
            chat_id: "status".into(),
            from: "aa".repeat(32),
            clock,
            timestamp: clock,
            whisper_timestamp: clock,
            content_type: ContentType::Text,
            text: "hello".into(),
            response_to: String::new(),
            seen: false,
            deleted: false,
            edited_at: 0,
            outgoing: false,
        }
    }

    #[test]
    fn test_update_from_message_keeps_newest() {
        let mut chat = Chat::new_public("status", 1);
        chat.update_from_message(&message("b", 20));
        chat.update_from_message(&message("a", 10));
        assert_eq!(chat.last_message.as_ref().unwrap().id, "b");
        assert_eq!(chat.last_clock_value, 20);
    }

    #[test]
    fn test_deactivate_tombstones_and_clears() {
        let mut chat = Chat::new_public("status", 1);
        chat.update_from_message(&message("a", 10));
        chat.deactivate(15);
        assert!(!chat.active);
        assert_eq!(chat.deleted_at_clock_value, 15);
        assert!(chat.last_message.is_none());
        chat.deactivate(12);
        assert_eq!(chat.deleted_at_clock_value, 15);
    }

    #[test]
    fn test_sync_scope_excludes_feeds() {
        let key = UserId([3u8; 32]);
        assert!(Chat::new_public("status", 0).should_be_synced());
        assert!(Chat::new_one_to_one(&key, 0).should_be_synced());
        assert!(!Chat::new_profile(&key, 0).should_be_synced());
        assert!(!Chat::new_timeline(0).should_be_synced());
    }

    #[test]
    fn test_block_clears_added() {
        let mut contact = Contact::new(&UserId([1u8; 32]));
        contact.mark_added(3);
        contact.block(4);
        assert!(contact.blocked && !contact.added);
        assert_eq!(contact.last_updated_locally, 4);
    }
}
