//! Typed application payloads.
//!
//! Every payload travels as `(type tag, bincode bytes)`. The tag set is
//! closed: [`ApplicationMessage::decode`] returns `Ok(None)` for tags this
//! build does not know, and callers surface those payloads untouched.

use base64::Engine as _;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::constants::MAX_PAYLOAD_SIZE;
use crate::error::ProtocolError;
use crate::membership::MembershipUpdateEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u16)]
pub enum PayloadType {
    ChatMessage = 1,
    EditMessage = 2,
    DeleteMessage = 3,
    PinMessage = 4,
    EmojiReaction = 5,
    MembershipUpdate = 6,
    ContactUpdate = 7,
    ChatIdentity = 8,
    PairInstallation = 9,
    SyncInstallationContact = 10,
    SyncInstallationPublicChat = 11,
    SyncChatRemoved = 12,
    SyncChatMessagesRead = 13,
    SyncClearHistory = 14,
    SyncSetting = 15,
    SyncProfilePictures = 16,
    SyncWalletAccounts = 17,
    SyncKeycards = 18,
    SyncSavedAddress = 19,
    Backup = 20,
    SyncOneToOneChat = 21,
}

impl PayloadType {
    pub const ALL: [PayloadType; 21] = [
        Self::ChatMessage,
        Self::EditMessage,
        Self::DeleteMessage,
        Self::PinMessage,
        Self::EmojiReaction,
        Self::MembershipUpdate,
        Self::ContactUpdate,
        Self::ChatIdentity,
        Self::PairInstallation,
        Self::SyncInstallationContact,
        Self::SyncInstallationPublicChat,
        Self::SyncChatRemoved,
        Self::SyncChatMessagesRead,
        Self::SyncClearHistory,
        Self::SyncSetting,
        Self::SyncProfilePictures,
        Self::SyncWalletAccounts,
        Self::SyncKeycards,
        Self::SyncSavedAddress,
        Self::Backup,
        Self::SyncOneToOneChat,
    ];

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(tag: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_u16() == tag)
    }

    /// Payloads that only paired installations of the same identity may send.
    pub fn is_sync(self) -> bool {
        matches!(
            self,
            Self::PairInstallation
                | Self::SyncInstallationContact
                | Self::SyncInstallationPublicChat
                | Self::SyncOneToOneChat
                | Self::SyncChatRemoved
                | Self::SyncChatMessagesRead
                | Self::SyncClearHistory
                | Self::SyncSetting
                | Self::SyncProfilePictures
                | Self::SyncWalletAccounts
                | Self::SyncKeycards
                | Self::SyncSavedAddress
                | Self::Backup
        )
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ---------------------------------------------------------------------------
// Chat content
// ---------------------------------------------------------------------------

/// Which kind of conversation a content payload targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatScope {
    OneToOne,
    Public,
    PrivateGroup,
    CommunityChat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Text,
    Emoji,
    Sticker,
    Image,
    Audio,
    System,
}

impl ContentType {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Text => 1,
            Self::Emoji => 2,
            Self::Sticker => 3,
            Self::Image => 4,
            Self::Audio => 5,
            Self::System => 6,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::Text),
            2 => Some(Self::Emoji),
            3 => Some(Self::Sticker),
            4 => Some(Self::Image),
            5 => Some(Self::Audio),
            6 => Some(Self::System),
            _ => None,
        }
    }

    pub fn is_media(self) -> bool {
        matches!(self, Self::Image | Self::Audio)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub clock: u64,
    /// Sender wall-clock time in milliseconds.
    pub timestamp: u64,
    pub chat_id: String,
    pub scope: ChatScope,
    pub content_type: ContentType,
    pub text: String,
    /// ID of the message this one replies to, or empty.
    pub response_to: String,
    /// Attached image or audio bytes.
    pub media: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditMessage {
    pub clock: u64,
    pub chat_id: String,
    pub scope: ChatScope,
    pub message_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteMessage {
    pub clock: u64,
    pub chat_id: String,
    pub scope: ChatScope,
    pub message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMessage {
    pub clock: u64,
    pub chat_id: String,
    pub scope: ChatScope,
    pub message_id: String,
    pub pinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmojiKind {
    Love,
    ThumbsUp,
    ThumbsDown,
    Laugh,
    Sad,
    Angry,
}

impl EmojiKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Love => "love",
            Self::ThumbsUp => "thumbs-up",
            Self::ThumbsDown => "thumbs-down",
            Self::Laugh => "laugh",
            Self::Sad => "sad",
            Self::Angry => "angry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "love" => Some(Self::Love),
            "thumbs-up" => Some(Self::ThumbsUp),
            "thumbs-down" => Some(Self::ThumbsDown),
            "laugh" => Some(Self::Laugh),
            "sad" => Some(Self::Sad),
            "angry" => Some(Self::Angry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmojiReaction {
    pub clock: u64,
    pub chat_id: String,
    pub scope: ChatScope,
    pub message_id: String,
    pub emoji: EmojiKind,
    pub retracted: bool,
}

/// A payload carried inside a group's membership context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedPayload {
    pub type_tag: u16,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipUpdate {
    pub chat_id: String,
    pub events: Vec<MembershipUpdateEvent>,
    pub wrapped: Option<WrappedPayload>,
}

// ---------------------------------------------------------------------------
// Contacts and identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    pub clock: u64,
    pub display_name: String,
    pub ens_name: String,
}

/// A named profile image. On the wire the payload may be sealed, in which
/// case `encryption_keys` holds one wrapped content key per recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityImage {
    pub name: String,
    pub payload: Vec<u8>,
    pub encrypted: bool,
    pub encryption_keys: Vec<Vec<u8>>,
    pub clock: u64,
}

impl IdentityImage {
    pub fn plain(name: impl Into<String>, payload: Vec<u8>, clock: u64) -> Self {
        Self {
            name: name.into(),
            payload,
            encrypted: false,
            encryption_keys: Vec::new(),
            clock,
        }
    }

    /// `data:` URI for display. Sealed images have none.
    pub fn data_uri(&self) -> Option<String> {
        if self.encrypted || self.payload.is_empty() {
            return None;
        }
        let mime = image_mime(&self.payload);
        Some(format!(
            "data:{};base64,{}",
            mime,
            base64::engine::general_purpose::STANDARD.encode(&self.payload)
        ))
    }
}

fn image_mime(payload: &[u8]) -> &'static str {
    if payload.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if payload.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if payload.starts_with(b"RIFF") {
        "image/webp"
    } else {
        "application/octet-stream"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatIdentity {
    pub clock: u64,
    pub description: String,
    pub images: Vec<IdentityImage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Verifying,
    Verified,
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TrustStatus {
    #[default]
    Unknown,
    Trusted,
    Untrustworthy,
}

// ---------------------------------------------------------------------------
// Installations and sync
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairInstallation {
    pub clock: u64,
    pub installation_id: String,
    pub name: String,
    pub device_type: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInstallationContact {
    pub id: String,
    /// The contact's own broadcast clock.
    pub last_updated: u64,
    /// Clock of the last local edit on the sending device.
    pub last_updated_locally: u64,
    pub display_name: String,
    pub ens_name: String,
    pub local_nickname: String,
    pub added: bool,
    pub blocked: bool,
    pub removed: bool,
    pub has_added_us: bool,
    pub muted: bool,
    pub verification_status: VerificationStatus,
    pub trust_status: TrustStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInstallationPublicChat {
    pub clock: u64,
    pub id: String,
}

/// A one-to-one chat opened on another installation. `clock` is the clock
/// at which it was opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOneToOneChat {
    pub clock: u64,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChatRemoved {
    pub clock: u64,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChatMessagesRead {
    pub clock: u64,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncClearHistory {
    pub chat_id: String,
    pub cleared_at: u64,
}

/// Account settings that follow the identity across installations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SettingField {
    DisplayName,
    Bio,
    MessagesFromContactsOnly,
    ProfilePicturesVisibility,
    Currency,
    PreferredName,
    SocialLinks,
}

impl SettingField {
    pub const ALL: [SettingField; 7] = [
        Self::DisplayName,
        Self::Bio,
        Self::MessagesFromContactsOnly,
        Self::ProfilePicturesVisibility,
        Self::Currency,
        Self::PreferredName,
        Self::SocialLinks,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::DisplayName => "display_name",
            Self::Bio => "bio",
            Self::MessagesFromContactsOnly => "messages_from_contacts_only",
            Self::ProfilePicturesVisibility => "profile_pictures_visibility",
            Self::Currency => "currency",
            Self::PreferredName => "preferred_name",
            Self::SocialLinks => "social_links",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| f.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingValue {
    Text(String),
    Flag(bool),
    Number(i64),
    List(Vec<String>),
}

impl SettingValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Who may see our profile pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfilePicturesVisibility {
    ContactsOnly = 1,
    Everyone = 2,
    None = 3,
}

impl ProfilePicturesVisibility {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Self::ContactsOnly),
            2 => Some(Self::Everyone),
            3 => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSetting {
    pub clock: u64,
    pub field: SettingField,
    pub value: SettingValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProfilePictures {
    pub pictures: Vec<IdentityImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAccount {
    pub address: String,
    pub name: String,
    pub color: String,
    pub kind: String,
    pub path: String,
    pub public_key: String,
    pub hidden: bool,
    pub removed: bool,
    pub clock: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncWalletAccounts {
    pub accounts: Vec<WalletAccount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keycard {
    pub keycard_uid: String,
    pub name: String,
    pub locked: bool,
    pub key_uid: String,
    pub addresses: Vec<String>,
    pub removed: bool,
    pub clock: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncKeycards {
    pub keycards: Vec<Keycard>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedAddress {
    pub address: String,
    pub name: String,
    pub favourite: bool,
    pub removed: bool,
    pub update_clock: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub clock: u64,
    pub contacts: Vec<SyncInstallationContact>,
    pub public_chats: Vec<SyncInstallationPublicChat>,
}

// ---------------------------------------------------------------------------
// Closed payload set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationMessage {
    ChatMessage(ChatMessage),
    EditMessage(EditMessage),
    DeleteMessage(DeleteMessage),
    PinMessage(PinMessage),
    EmojiReaction(EmojiReaction),
    MembershipUpdate(MembershipUpdate),
    ContactUpdate(ContactUpdate),
    ChatIdentity(ChatIdentity),
    PairInstallation(PairInstallation),
    SyncInstallationContact(SyncInstallationContact),
    SyncInstallationPublicChat(SyncInstallationPublicChat),
    SyncChatRemoved(SyncChatRemoved),
    SyncChatMessagesRead(SyncChatMessagesRead),
    SyncClearHistory(SyncClearHistory),
    SyncSetting(SyncSetting),
    SyncProfilePictures(SyncProfilePictures),
    SyncWalletAccounts(SyncWalletAccounts),
    SyncKeycards(SyncKeycards),
    SyncSavedAddress(SavedAddress),
    Backup(Backup),
    SyncOneToOneChat(SyncOneToOneChat),
}

macro_rules! payload_table {
    ($($variant:ident),+ $(,)?) => {
        impl ApplicationMessage {
            pub fn payload_type(&self) -> PayloadType {
                match self {
                    $(Self::$variant(_) => PayloadType::$variant,)+
                }
            }

            pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
                match self {
                    $(Self::$variant(inner) => encode_inner(inner),)+
                }
            }

            /// Decode `bytes` according to `tag`. Unknown tags yield `Ok(None)`.
            pub fn decode(tag: u16, bytes: &[u8]) -> Result<Option<Self>, ProtocolError> {
                let Some(payload_type) = PayloadType::from_u16(tag) else {
                    return Ok(None);
                };
                let message = match payload_type {
                    $(PayloadType::$variant => Self::$variant(decode_inner(tag, bytes)?),)+
                };
                Ok(Some(message))
            }
        }
    };
}

payload_table!(
    ChatMessage,
    EditMessage,
    DeleteMessage,
    PinMessage,
    EmojiReaction,
    MembershipUpdate,
    ContactUpdate,
    ChatIdentity,
    PairInstallation,
    SyncInstallationContact,
    SyncInstallationPublicChat,
    SyncChatRemoved,
    SyncChatMessagesRead,
    SyncClearHistory,
    SyncSetting,
    SyncProfilePictures,
    SyncWalletAccounts,
    SyncKeycards,
    SyncSavedAddress,
    Backup,
    SyncOneToOneChat,
);

fn encode_inner<T: Serialize>(inner: &T) -> Result<Vec<u8>, ProtocolError> {
    let bytes = bincode::serialize(inner).map_err(|e| ProtocolError::Encode(e.to_string()))?;
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

fn decode_inner<T: DeserializeOwned>(tag: u16, bytes: &[u8]) -> Result<T, ProtocolError> {
    if bytes.len() > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::TooLarge(bytes.len()));
    }
    bincode::deserialize(bytes).map_err(|e| ProtocolError::Decode {
        tag,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_tags_are_unique() {
        for (i, a) in PayloadType::ALL.iter().enumerate() {
            assert_eq!(PayloadType::from_u16(a.as_u16()), Some(*a));
            for b in &PayloadType::ALL[i + 1..] {
                assert_ne!(a.as_u16(), b.as_u16());
            }
        }
    }

    #[test]
    fn test_unknown_tag_is_not_an_error() {
        assert_eq!(ApplicationMessage::decode(999, b"whatever").unwrap(), None);
    }

    #[test]
    fn test_garbage_for_known_tag_is_an_error() {
        let err = ApplicationMessage::decode(PayloadType::ChatMessage.as_u16(), &[1, 2, 3]);
        assert!(matches!(err, Err(ProtocolError::Decode { tag: 1, .. })));
    }

    #[test]
    fn test_decode_dispatches_on_tag() {
        let removed = ApplicationMessage::SyncChatRemoved(SyncChatRemoved {
            clock: 4,
            id: "status".into(),
        });
        let bytes = removed.encode().unwrap();
        let decoded =
            ApplicationMessage::decode(PayloadType::SyncChatRemoved.as_u16(), &bytes).unwrap();
        assert_eq!(decoded, Some(removed));
    }

    #[test]
    fn test_sealed_image_has_no_data_uri() {
        let mut image = IdentityImage::plain("thumbnail", vec![0x89, b'P', b'N', b'G', 1], 1);
        assert!(image.data_uri().unwrap().starts_with("data:image/png;base64,"));
        image.encrypted = true;
        assert_eq!(image.data_uri(), None);
    }

    #[test]
    fn test_setting_keys_round_trip() {
        for field in SettingField::ALL {
            assert_eq!(SettingField::from_key(field.key()), Some(field));
        }
    }
}
