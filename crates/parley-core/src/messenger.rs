//! The messenger: entity stores, collaborators and shared helpers.
//!
//! User actions live in [`crate::actions`], inbound handling in
//! [`crate::handlers`], outbound routing in [`crate::dispatcher`]. Every
//! entry point that mutates state takes the state lock for its whole run, so
//! an inbound pass and a user action never interleave their
//! read-modify-write sequences.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use parley_shared::protocol::{SettingField, SettingValue};
use parley_shared::{Identity, UserId};
use parley_store::{Chat, ChatType, Contact, Database, Installation, InstallationMetadata};

use crate::clock::{ClockAuthority, TimeSource};
use crate::config::MessengerConfig;
use crate::encryption::{EncryptionLayer, SignedEnvelopeCodec};
use crate::entity_store::EntityStore;
use crate::error::CoreError;
use crate::settle::SyncSettler;
use crate::state::ReceivedMessageState;
use crate::transport::{Transport, TransportError};

/// External collaborators a messenger is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub encryption: Arc<dyn EncryptionLayer>,
    pub time: Arc<dyn TimeSource>,
}

pub struct Messenger {
    identity: Identity,
    user_id: UserId,
    installation_id: String,
    config: MessengerConfig,
    db: Mutex<Database>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) encryption: Arc<dyn EncryptionLayer>,
    pub(crate) clock: ClockAuthority,
    pub(crate) chats: EntityStore<String, Chat>,
    pub(crate) contacts: EntityStore<String, Contact>,
    /// Installations of our own identity.
    pub(crate) installations: EntityStore<String, Installation>,
    state_lock: Mutex<()>,
    pub(crate) settler: Mutex<SyncSettler>,
}

impl Messenger {
    /// Load persisted state and register this installation.
    pub fn new(
        identity: Identity,
        installation_id: &str,
        db: Database,
        collaborators: Collaborators,
        config: MessengerConfig,
    ) -> Result<Self, CoreError> {
        let user_id = identity.user_id();
        let chats: EntityStore<String, Chat> = db
            .list_chats()?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let contacts: EntityStore<String, Contact> = db
            .list_contacts()?
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();
        let installations: EntityStore<String, Installation> = db
            .installations_for(&user_id.to_hex())?
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect();

        collaborators.encryption.load_installations(installations.values());

        let settler = SyncSettler::new(config.settle_quiet_period, config.settle_max_wait);
        let messenger = Self {
            identity,
            user_id,
            installation_id: installation_id.to_string(),
            config,
            db: Mutex::new(db),
            transport: collaborators.transport,
            encryption: collaborators.encryption,
            clock: ClockAuthority::new(collaborators.time),
            chats,
            contacts,
            installations,
            state_lock: Mutex::new(()),
            settler: Mutex::new(settler),
        };

        messenger.ensure_own_installation()?;
        messenger.ensure_self_chat()?;
        messenger.join_filters()?;

        info!(
            user = %messenger.user_id.short(),
            installation = %messenger.installation_id,
            chats = messenger.chats.len(),
            contacts = messenger.contacts.len(),
            "Messenger started"
        );
        Ok(messenger)
    }

    /// Build a messenger on the in-process codec.
    pub fn with_signed_codec(
        identity: Identity,
        installation_id: &str,
        db: Database,
        transport: Arc<dyn Transport>,
        time: Arc<dyn TimeSource>,
        config: MessengerConfig,
    ) -> Result<Self, CoreError> {
        let codec = SignedEnvelopeCodec::new(identity.clone(), installation_id, time.clone());
        let collaborators = Collaborators {
            transport,
            encryption: Arc::new(codec),
            time,
        };
        Self::new(identity, installation_id, db, collaborators, config)
    }

    // -- accessors -----------------------------------------------------------

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn chat(&self, id: &str) -> Option<Chat> {
        self.chats.get(id)
    }

    /// Every known chat, sorted by ID.
    pub fn chats(&self) -> Vec<Chat> {
        let mut chats = self.chats.values();
        chats.sort_by(|a, b| a.id.cmp(&b.id));
        chats
    }

    pub fn contact(&self, id: &str) -> Option<Contact> {
        self.contacts.get(id)
    }

    /// Every known contact, sorted by ID.
    pub fn contacts(&self) -> Vec<Contact> {
        let mut contacts = self.contacts.values();
        contacts.sort_by(|a, b| a.id.cmp(&b.id));
        contacts
    }

    // -- crate helpers -------------------------------------------------------

    pub(crate) fn my_hex(&self) -> String {
        self.user_id.to_hex()
    }

    pub(crate) fn is_me(&self, id: &str) -> bool {
        id == self.my_hex()
    }

    pub(crate) fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ()> {
        self.state_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn settler(&self) -> MutexGuard<'_, SyncSettler> {
        self.settler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn new_pass<'a>(&'a self, db: &'a Database) -> ReceivedMessageState<'a> {
        ReceivedMessageState::new(db, &self.chats, &self.contacts, &self.installations)
    }

    /// More than one enabled installation shares our identity.
    pub(crate) fn has_paired_devices(&self) -> bool {
        self.installations.filter(|i| i.enabled).len() > 1
    }

    pub(crate) fn save_chat(&self, chat: Chat) -> Result<Chat, CoreError> {
        self.db().save_chat(&chat)?;
        self.chats.insert(chat.id.clone(), chat.clone());
        Ok(chat)
    }

    pub(crate) fn save_contact(&self, contact: Contact) -> Result<Contact, CoreError> {
        self.db().save_contact(&contact)?;
        self.contacts.insert(contact.id.clone(), contact.clone());
        Ok(contact)
    }

    pub(crate) fn save_installation(&self, installation: Installation) -> Result<Installation, CoreError> {
        self.db().save_installation(&installation)?;
        self.installations
            .insert(installation.id.clone(), installation.clone());
        Ok(installation)
    }

    pub(crate) fn contact_or_new(&self, id: &UserId) -> Contact {
        self.contacts
            .get(&id.to_hex())
            .unwrap_or_else(|| Contact::new(id))
    }

    pub(crate) fn require_chat(&self, id: &str) -> Result<Chat, CoreError> {
        self.chats
            .get(id)
            .ok_or_else(|| CoreError::not_found("chat", id))
    }

    /// Next clock of the self chat, which stamps every sync payload. The
    /// caller commits it with [`Messenger::commit_self_clock`].
    pub(crate) fn last_clock_with_related_chat(&self) -> Result<(u64, Chat), CoreError> {
        let chat = match self.chats.get(&self.my_hex()) {
            Some(chat) => chat,
            None => self.ensure_self_chat()?,
        };
        let (clock, _) = self.clock.next(chat.last_clock_value);
        Ok((clock, chat))
    }

    pub(crate) fn commit_self_clock(&self, clock: u64) -> Result<(), CoreError> {
        let Some(chat) = self.chats.update(&self.my_hex(), |chat| {
            chat.bump_clock(clock);
            chat.clone()
        }) else {
            return Err(CoreError::not_found("chat", self.my_hex()));
        };
        self.db().save_chat(&chat)?;
        Ok(())
    }

    /// Next clock for a synced setting.
    pub(crate) fn next_setting_clock(&self, field: SettingField) -> Result<u64, CoreError> {
        let last = self.db().get_setting(field)?.map(|s| s.clock).unwrap_or(0);
        Ok(self.clock.next(last).0)
    }

    pub(crate) fn setting_value(&self, field: SettingField) -> Result<Option<SettingValue>, CoreError> {
        Ok(self.db().get_setting(field)?.map(|s| s.value))
    }

    /// Contacts-only policy: when enabled, only ourselves, added contacts and
    /// senders in an active or public chat get through.
    pub(crate) fn is_message_allowed_from(
        &self,
        state: &ReceivedMessageState<'_>,
        sender_hex: &str,
        chat: Option<&Chat>,
    ) -> Result<(), CoreError> {
        let contacts_only = state
            .setting(SettingField::MessagesFromContactsOnly)?
            .and_then(|s| s.value.as_flag())
            .unwrap_or(self.config.messages_from_contacts_only);
        if !contacts_only || self.is_me(sender_hex) {
            return Ok(());
        }
        if chat.is_some_and(|c| c.active || c.is_public()) {
            return Ok(());
        }
        if state.contact(sender_hex).is_some_and(|c| c.added) {
            return Ok(());
        }
        Err(CoreError::Permission(format!(
            "messages from {sender_hex} are not accepted"
        )))
    }

    // -- transport filters ---------------------------------------------------

    pub(crate) fn join_chat_filter(&self, chat: &Chat) -> Result<(), CoreError> {
        match chat.chat_type {
            ChatType::Public | ChatType::Profile | ChatType::Timeline => {
                self.transport.join_public(&chat.id)?
            }
            ChatType::OneToOne => {
                if let Some(key) = chat.counterparty() {
                    self.transport.join_private(&key)?;
                }
            }
            ChatType::PrivateGroup => {
                let members: Vec<UserId> = chat
                    .members
                    .iter()
                    .filter_map(|m| UserId::from_hex(&m.id).ok())
                    .collect();
                self.transport.join_group(&members)?;
            }
            ChatType::CommunityChannel => {}
        }
        Ok(())
    }

    pub(crate) fn leave_chat_filter(&self, chat: &Chat) -> Result<(), CoreError> {
        let topic = match chat.chat_type {
            ChatType::Public | ChatType::Profile | ChatType::Timeline => chat.id.clone(),
            ChatType::OneToOne => match chat.counterparty() {
                Some(key) if key != self.user_id => key.private_topic(),
                _ => return Ok(()),
            },
            ChatType::PrivateGroup | ChatType::CommunityChannel => return Ok(()),
        };
        match self.transport.remove_filter(&topic) {
            Ok(()) | Err(TransportError::NotSubscribed(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Join or leave the topic of every chat in `chat_ids` according to its
    /// current `active` flag.
    pub(crate) fn reconcile_filters(&self, chat_ids: &[String]) -> Result<(), CoreError> {
        for id in chat_ids {
            let Some(chat) = self.chats.get(id) else {
                continue;
            };
            if chat.active {
                self.join_chat_filter(&chat)?;
            } else {
                self.leave_chat_filter(&chat)?;
            }
            debug!(chat_id = %id, active = chat.active, "Filter reconciled");
        }
        Ok(())
    }

    // -- startup -------------------------------------------------------------

    fn ensure_own_installation(&self) -> Result<(), CoreError> {
        let existing = self.installations.get(&self.installation_id);
        let metadata = InstallationMetadata {
            name: self.config.device_name.clone(),
            device_type: self.config.device_type.clone(),
        };
        if existing
            .as_ref()
            .is_some_and(|i| i.enabled && i.metadata.as_ref() == Some(&metadata))
        {
            return Ok(());
        }
        let installation = Installation {
            id: self.installation_id.clone(),
            identity: self.my_hex(),
            version: SignedEnvelopeCodec::VERSION,
            enabled: true,
            timestamp: existing.map(|i| i.timestamp).unwrap_or_else(|| self.now_ms()),
            metadata: Some(metadata.clone()),
        };
        self.encryption
            .set_installation_metadata(&self.installation_id, metadata)?;
        self.save_installation(installation)?;
        Ok(())
    }

    fn ensure_self_chat(&self) -> Result<Chat, CoreError> {
        if let Some(chat) = self.chats.get(&self.my_hex()) {
            return Ok(chat);
        }
        let mut chat = Chat::new_one_to_one(&self.user_id, self.now_ms());
        chat.active = false;
        self.save_chat(chat)
    }

    fn join_filters(&self) -> Result<(), CoreError> {
        self.transport.join_private(&self.user_id)?;
        self.transport.join_public(&self.user_id.profile_chat_id())?;
        for chat in self.chats.filter(|c| c.active) {
            self.join_chat_filter(&chat)?;
        }
        Ok(())
    }
}
