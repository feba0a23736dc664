//! Accumulator for one inbound pass.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use parley_shared::protocol::{
    IdentityImage, Keycard, PayloadType, SavedAddress, SettingField, SettingValue, WalletAccount,
};
use parley_shared::UserId;
use parley_store::{
    Chat, Contact, Database, Installation, Message, PendingDelete, PendingEdit, PinRecord,
    ReactionRecord, StateFlush, StoredSetting,
};

use crate::entity_store::EntityStore;
use crate::error::{optional, CoreError};
use crate::response::MessengerResponse;

/// The inner message currently being handled.
#[derive(Debug, Clone)]
pub struct CurrentMessage {
    pub id: String,
    pub sender: UserId,
    pub sender_hex: String,
    pub payload_type: PayloadType,
    /// Transport timestamp (ms).
    pub transport_timestamp: u64,
}

/// Everything one call to the inbound pipeline touched.
///
/// Reads go to this pass first, then to the live entity stores or the
/// database. Writes stay here until the pass is flushed in one transaction;
/// only then are touched chats, contacts and installations published to the
/// entity stores.
pub struct ReceivedMessageState<'a> {
    pub db: &'a Database,
    chat_store: &'a EntityStore<String, Chat>,
    contact_store: &'a EntityStore<String, Contact>,
    installation_store: &'a EntityStore<String, Installation>,
    pub current: Option<CurrentMessage>,
    /// Message IDs already handled in this pass.
    pub seen_ids: HashSet<String>,
    chats: BTreeMap<String, Chat>,
    contacts: BTreeMap<String, Contact>,
    installations: BTreeMap<String, Installation>,
    /// Chats whose transport subscriptions must be reconciled.
    pub settle_chats: BTreeSet<String>,
    /// An installation of ours was enabled during this pass.
    pub installation_enabled: bool,

    pub messages: BTreeMap<String, Message>,
    pub pending_edits: Vec<PendingEdit>,
    pub pending_deletes: BTreeMap<String, PendingDelete>,
    pub resolved_pending: BTreeSet<String>,
    pub pins: BTreeMap<String, PinRecord>,
    pub reactions: BTreeMap<String, ReactionRecord>,
    pub settings: BTreeMap<SettingField, (SettingValue, u64)>,
    pub identity_images: BTreeMap<String, IdentityImage>,
    pub wallet_accounts: BTreeMap<String, WalletAccount>,
    pub keycards: BTreeMap<String, Keycard>,
    pub saved_addresses: BTreeMap<String, SavedAddress>,
    pub read_markers: BTreeMap<String, u64>,
    pub cleared_histories: BTreeMap<String, u64>,

    pub response: MessengerResponse,
    /// `(message id, error)` for inner messages that were dropped.
    pub failures: Vec<(String, String)>,
}

impl<'a> ReceivedMessageState<'a> {
    pub fn new(
        db: &'a Database,
        chat_store: &'a EntityStore<String, Chat>,
        contact_store: &'a EntityStore<String, Contact>,
        installation_store: &'a EntityStore<String, Installation>,
    ) -> Self {
        Self {
            db,
            chat_store,
            contact_store,
            installation_store,
            current: None,
            seen_ids: HashSet::new(),
            chats: BTreeMap::new(),
            contacts: BTreeMap::new(),
            installations: BTreeMap::new(),
            settle_chats: BTreeSet::new(),
            installation_enabled: false,
            messages: BTreeMap::new(),
            pending_edits: Vec::new(),
            pending_deletes: BTreeMap::new(),
            resolved_pending: BTreeSet::new(),
            pins: BTreeMap::new(),
            reactions: BTreeMap::new(),
            settings: BTreeMap::new(),
            identity_images: BTreeMap::new(),
            wallet_accounts: BTreeMap::new(),
            keycards: BTreeMap::new(),
            saved_addresses: BTreeMap::new(),
            read_markers: BTreeMap::new(),
            cleared_histories: BTreeMap::new(),
            response: MessengerResponse::default(),
            failures: Vec::new(),
        }
    }

    pub fn current(&self) -> Result<&CurrentMessage, CoreError> {
        self.current
            .as_ref()
            .ok_or(CoreError::Validation("no message being handled".into()))
    }

    // -- entities -------------------------------------------------------------

    pub fn chat(&self, id: &str) -> Option<Chat> {
        self.chats
            .get(id)
            .cloned()
            .or_else(|| self.chat_store.get(id))
    }

    pub fn put_chat(&mut self, chat: Chat) {
        self.chats.insert(chat.id.clone(), chat);
    }

    /// Every chat as seen by this pass.
    pub fn all_chats(&self) -> Vec<Chat> {
        let mut all: BTreeMap<String, Chat> = self
            .chat_store
            .values()
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        all.extend(self.chats.clone());
        all.into_values().collect()
    }

    pub fn contact(&self, id: &str) -> Option<Contact> {
        self.contacts
            .get(id)
            .cloned()
            .or_else(|| self.contact_store.get(id))
    }

    /// The contact for `id`, or a fresh one if it was never referenced.
    pub fn contact_or_new(&self, id: &UserId) -> Contact {
        self.contact(&id.to_hex()).unwrap_or_else(|| Contact::new(id))
    }

    pub fn put_contact(&mut self, contact: Contact) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn installation(&self, id: &str) -> Option<Installation> {
        self.installations
            .get(id)
            .cloned()
            .or_else(|| self.installation_store.get(id))
    }

    pub fn put_installation(&mut self, installation: Installation) {
        self.installations
            .insert(installation.id.clone(), installation);
    }

    /// Publish touched entities to the live stores and the response. Call
    /// only after the flush committed.
    pub fn publish_entities(&mut self) {
        for (id, chat) in std::mem::take(&mut self.chats) {
            self.response.add_chat(chat.clone());
            self.chat_store.insert(id, chat);
        }
        for (id, contact) in std::mem::take(&mut self.contacts) {
            self.response.add_contact(contact.clone());
            self.contact_store.insert(id, contact);
        }
        for (id, installation) in std::mem::take(&mut self.installations) {
            self.response.add_installation(installation.clone());
            self.installation_store.insert(id, installation);
        }
    }

    // -- lookups that see this pass before the database ----------------------

    pub fn message(&self, id: &str) -> Result<Option<Message>, CoreError> {
        if let Some(message) = self.messages.get(id) {
            return Ok(Some(message.clone()));
        }
        optional(self.db.message_by_id(id))
    }

    /// Pending edits for `message_id`, newest first.
    pub fn pending_edits_for(&self, message_id: &str) -> Result<Vec<PendingEdit>, CoreError> {
        if self.resolved_pending.contains(message_id) {
            return Ok(Vec::new());
        }
        let mut edits: Vec<PendingEdit> = self
            .pending_edits
            .iter()
            .filter(|e| e.message_id == message_id)
            .cloned()
            .collect();
        edits.extend(self.db.pending_edits_for(message_id)?);
        edits.sort_by(|a, b| b.clock.cmp(&a.clock));
        Ok(edits)
    }

    pub fn pending_delete_for(&self, message_id: &str) -> Result<Option<PendingDelete>, CoreError> {
        if self.resolved_pending.contains(message_id) {
            return Ok(None);
        }
        if let Some(delete) = self.pending_deletes.get(message_id) {
            return Ok(Some(delete.clone()));
        }
        Ok(self.db.pending_delete_for(message_id)?)
    }

    pub fn pin(&self, id: &str) -> Result<Option<PinRecord>, CoreError> {
        if let Some(pin) = self.pins.get(id) {
            return Ok(Some(pin.clone()));
        }
        Ok(self.db.pin_by_id(id)?)
    }

    pub fn reaction(&self, id: &str) -> Result<Option<ReactionRecord>, CoreError> {
        if let Some(reaction) = self.reactions.get(id) {
            return Ok(Some(reaction.clone()));
        }
        Ok(self.db.reaction_by_id(id)?)
    }

    pub fn setting(&self, field: SettingField) -> Result<Option<StoredSetting>, CoreError> {
        if let Some((value, clock)) = self.settings.get(&field) {
            return Ok(Some(StoredSetting {
                field,
                value: value.clone(),
                clock: *clock,
            }));
        }
        Ok(self.db.get_setting(field)?)
    }

    pub fn identity_image(&self, name: &str) -> Result<Option<IdentityImage>, CoreError> {
        if let Some(image) = self.identity_images.get(name) {
            return Ok(Some(image.clone()));
        }
        Ok(self
            .db
            .identity_images()?
            .into_iter()
            .find(|image| image.name == name))
    }

    pub fn wallet_account(&self, address: &str) -> Result<Option<WalletAccount>, CoreError> {
        if let Some(account) = self.wallet_accounts.get(address) {
            return Ok(Some(account.clone()));
        }
        Ok(self.db.wallet_account(address)?)
    }

    pub fn keycard(&self, uid: &str) -> Result<Option<Keycard>, CoreError> {
        if let Some(keycard) = self.keycards.get(uid) {
            return Ok(Some(keycard.clone()));
        }
        Ok(self.db.keycard(uid)?)
    }

    pub fn saved_address(&self, address: &str) -> Result<Option<SavedAddress>, CoreError> {
        if let Some(saved) = self.saved_addresses.get(address) {
            return Ok(Some(saved.clone()));
        }
        Ok(self.db.saved_address(address)?)
    }

    /// Latest non-deleted message of a chat other than `excluding`, looking at
    /// this pass and storage.
    pub fn latest_visible_message(
        &self,
        chat_id: &str,
        excluding: &str,
    ) -> Result<Option<Message>, CoreError> {
        let stored = self.db.messages_for_chat(chat_id, 50)?;
        let latest = stored
            .into_iter()
            .map(|m| self.messages.get(&m.id).cloned().unwrap_or(m))
            .chain(self.messages.values().filter(|m| m.chat_id == chat_id).cloned())
            .filter(|m| !m.deleted && m.id != excluding)
            .max_by_key(|m| m.clock);
        Ok(latest)
    }

    // -- writes ---------------------------------------------------------------

    pub fn put_message(&mut self, message: Message) {
        self.response.add_message(message.clone());
        self.messages.insert(message.id.clone(), message);
    }

    /// Every row this pass buffered. Touched entities are copied, not taken,
    /// so they can still be published after the commit. Pending rows
    /// resolved within the same pass are never written.
    pub fn take_flush(&mut self) -> StateFlush {
        let resolved = std::mem::take(&mut self.resolved_pending);
        let mut pending_edits = std::mem::take(&mut self.pending_edits);
        pending_edits.retain(|e| !resolved.contains(&e.message_id));
        let mut pending_deletes = std::mem::take(&mut self.pending_deletes);
        pending_deletes.retain(|id, _| !resolved.contains(id));

        StateFlush {
            chats: self.chats.values().cloned().collect(),
            contacts: self.contacts.values().cloned().collect(),
            installations: self.installations.values().cloned().collect(),
            messages: std::mem::take(&mut self.messages).into_values().collect(),
            pending_edits,
            pending_deletes: pending_deletes.into_values().collect(),
            resolved_pending: resolved.into_iter().collect(),
            pins: std::mem::take(&mut self.pins).into_values().collect(),
            reactions: std::mem::take(&mut self.reactions).into_values().collect(),
            settings: std::mem::take(&mut self.settings)
                .into_iter()
                .map(|(field, (value, clock))| (field, value, clock))
                .collect(),
            identity_images: std::mem::take(&mut self.identity_images).into_values().collect(),
            wallet_accounts: std::mem::take(&mut self.wallet_accounts).into_values().collect(),
            keycards: std::mem::take(&mut self.keycards).into_values().collect(),
            saved_addresses: std::mem::take(&mut self.saved_addresses).into_values().collect(),
            read_markers: std::mem::take(&mut self.read_markers).into_iter().collect(),
            cleared_histories: std::mem::take(&mut self.cleared_histories).into_iter().collect(),
        }
    }
}
