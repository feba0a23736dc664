//! Response diffs returned by every messenger call.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use parley_shared::protocol::{
    IdentityImage, Keycard, SavedAddress, SettingField, SettingValue, WalletAccount,
};
use parley_store::{Chat, Contact, Installation, Message, PinRecord, ReactionRecord};

/// A payload with a type tag this build does not handle, passed through for
/// the client to interpret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawPayload {
    pub id: String,
    pub sender: String,
    pub type_tag: u16,
    pub payload: Vec<u8>,
}

/// Entities touched by one call, keyed by ID.
///
/// Two diffs can always be merged: keys present on one side only are
/// copied, and when both sides carry the same entity the one with the
/// higher clock wins. On equal clocks the diff passed to [`merge`] wins:
/// callers merge diffs in the order their operations ran.
///
/// Installations carry no clock, only the time they were first seen, so an
/// enable or disable within one call is decided by the later diff.
///
/// [`merge`]: MessengerResponse::merge
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MessengerResponse {
    pub chats: BTreeMap<String, Chat>,
    pub contacts: BTreeMap<String, Contact>,
    pub messages: BTreeMap<String, Message>,
    pub removed_messages: BTreeSet<String>,
    pub installations: BTreeMap<String, Installation>,
    pub pins: BTreeMap<String, PinRecord>,
    pub reactions: BTreeMap<String, ReactionRecord>,
    pub settings: BTreeMap<SettingField, SettingValue>,
    pub identity_images: BTreeMap<String, IdentityImage>,
    pub wallet_accounts: BTreeMap<String, WalletAccount>,
    pub keycards: BTreeMap<String, Keycard>,
    pub saved_addresses: BTreeMap<String, SavedAddress>,
    pub raw_payloads: BTreeMap<String, RawPayload>,
}

impl MessengerResponse {
    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
            && self.contacts.is_empty()
            && self.messages.is_empty()
            && self.removed_messages.is_empty()
            && self.installations.is_empty()
            && self.pins.is_empty()
            && self.reactions.is_empty()
            && self.settings.is_empty()
            && self.identity_images.is_empty()
            && self.wallet_accounts.is_empty()
            && self.keycards.is_empty()
            && self.saved_addresses.is_empty()
            && self.raw_payloads.is_empty()
    }

    pub fn add_chat(&mut self, chat: Chat) {
        self.chats.insert(chat.id.clone(), chat);
    }

    pub fn add_contact(&mut self, contact: Contact) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn add_message(&mut self, message: Message) {
        if message.deleted {
            self.messages.remove(&message.id);
            self.removed_messages.insert(message.id);
        } else {
            self.messages.insert(message.id.clone(), message);
        }
    }

    pub fn add_installation(&mut self, installation: Installation) {
        self.installations.insert(installation.id.clone(), installation);
    }

    pub fn merge(&mut self, other: MessengerResponse) {
        merge_by(&mut self.chats, other.chats, |c| (c.last_clock_value, c.deleted_at_clock_value));
        merge_by(&mut self.contacts, other.contacts, |c| {
            (c.last_updated_locally, c.last_updated, c.identity_clock)
        });
        merge_by(&mut self.messages, other.messages, |m| (m.clock, m.edited_at));
        merge_by(&mut self.installations, other.installations, |i| i.timestamp);
        merge_by(&mut self.pins, other.pins, |p| p.clock);
        merge_by(&mut self.reactions, other.reactions, |r| r.clock);
        merge_by(&mut self.identity_images, other.identity_images, |i| i.clock);
        merge_by(&mut self.wallet_accounts, other.wallet_accounts, |a| a.clock);
        merge_by(&mut self.keycards, other.keycards, |k| k.clock);
        merge_by(&mut self.saved_addresses, other.saved_addresses, |s| s.update_clock);
        self.settings.extend(other.settings);
        self.raw_payloads.extend(other.raw_payloads);

        self.removed_messages.extend(other.removed_messages);
        for id in &self.removed_messages {
            self.messages.remove(id);
        }
    }
}

fn merge_by<V, C: Ord>(
    into: &mut BTreeMap<String, V>,
    from: BTreeMap<String, V>,
    clock: impl Fn(&V) -> C,
) {
    // Ties go to `incoming`.
    for (key, incoming) in from {
        match into.get(&key) {
            Some(existing) if clock(existing) > clock(&incoming) => {}
            _ => {
                into.insert(key, incoming);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: &str, clock: u64) -> Chat {
        let mut chat = Chat::new_public(id, 0);
        chat.last_clock_value = clock;
        chat
    }

    #[test]
    fn test_merge_prefers_higher_clock_in_either_order() {
        let mut older = MessengerResponse::default();
        older.add_chat(chat("status", 5));
        let mut newer = MessengerResponse::default();
        newer.add_chat(chat("status", 7));
        newer.add_chat(chat("other", 1));

        let mut a = older.clone();
        a.merge(newer.clone());
        let mut b = newer;
        b.merge(older);

        assert_eq!(a, b);
        assert_eq!(a.chats["status"].last_clock_value, 7);
        assert_eq!(a.chats.len(), 2);
    }

    #[test]
    fn test_later_installation_change_wins_on_equal_timestamp() {
        let installation = |enabled| Installation {
            id: "laptop".into(),
            identity: "aa".repeat(32),
            version: 1,
            enabled,
            timestamp: 1_000,
            metadata: None,
        };
        let mut enabled = MessengerResponse::default();
        enabled.add_installation(installation(true));
        let mut disabled = MessengerResponse::default();
        disabled.add_installation(installation(false));

        let mut a = enabled.clone();
        a.merge(disabled.clone());
        assert!(!a.installations["laptop"].enabled);

        let mut b = disabled;
        b.merge(enabled);
        assert!(b.installations["laptop"].enabled);
    }

    #[test]
    fn test_removed_messages_win_over_copies() {
        let message = Message {
            id: "m1".into(),
            chat_id: "status".into(),
            from: "aa".into(),
            clock: 3,
            timestamp: 3,
            whisper_timestamp: 3,
            content_type: parley_shared::protocol::ContentType::Text,
            text: "hi".into(),
            response_to: String::new(),
            seen: false,
            deleted: false,
            edited_at: 0,
            outgoing: false,
        };
        let mut shown = MessengerResponse::default();
        shown.add_message(message.clone());

        let mut removed = MessengerResponse::default();
        removed.add_message(Message {
            deleted: true,
            ..message
        });

        shown.merge(removed);
        assert!(shown.messages.is_empty());
        assert!(shown.removed_messages.contains("m1"));
        assert!(!shown.is_empty());
    }

    #[test]
    fn test_diff_serializes_for_the_ui() {
        let mut response = MessengerResponse::default();
        response
            .settings
            .insert(SettingField::Bio, SettingValue::Text("hi".into()));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["settings"]["Bio"]["Text"], "hi");
    }
}
