//! Payloads sent by our own paired installations.
//!
//! Every handler is clock-gated so a full replay from another device is
//! idempotent, and the outcome does not depend on delivery order.

use tracing::{debug, warn};

use parley_shared::protocol::{
    Backup, ProfilePicturesVisibility, SavedAddress, SettingField, SettingValue,
    SyncChatMessagesRead, SyncChatRemoved, SyncClearHistory, SyncInstallationContact,
    SyncInstallationPublicChat, SyncKeycards, SyncOneToOneChat, SyncProfilePictures,
    SyncSetting, SyncWalletAccounts,
};
use parley_shared::UserId;
use parley_store::{Chat, ChatType};

use super::validate;
use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::state::ReceivedMessageState;

/// `<uuid>-<creator key>`.
fn looks_like_group_id(id: &str) -> bool {
    id.rsplit_once('-')
        .is_some_and(|(prefix, key)| !prefix.is_empty() && UserId::from_hex(key).is_ok())
}

impl Messenger {
    /// Toggle the one-to-one and profile chats of a contact. Only existing
    /// chats are touched.
    fn set_contact_chats_active(
        &self,
        state: &mut ReceivedMessageState<'_>,
        contact: &UserId,
        active: bool,
        clock: u64,
    ) {
        for id in [contact.to_hex(), contact.profile_chat_id()] {
            let Some(mut chat) = state.chat(&id) else {
                continue;
            };
            if chat.active == active {
                continue;
            }
            chat.active = active;
            chat.bump_clock(clock);
            state.settle_chats.insert(id);
            state.put_chat(chat);
        }
    }

    /// Make sure an added contact has its one-to-one and profile chats.
    fn ensure_contact_chats(&self, state: &mut ReceivedMessageState<'_>, contact: &UserId, clock: u64) {
        let now = self.now_ms();
        for mut chat in [
            Chat::new_one_to_one(contact, now),
            Chat::new_profile(contact, now),
        ] {
            if let Some(existing) = state.chat(&chat.id) {
                if existing.active {
                    continue;
                }
                chat = existing;
                chat.active = true;
            }
            chat.bump_clock(clock);
            state.settle_chats.insert(chat.id.clone());
            state.put_chat(chat);
        }
    }

    pub(super) fn handle_sync_installation_contact(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncInstallationContact,
    ) -> Result<(), CoreError> {
        if self.is_me(&sync.id) {
            return Ok(());
        }
        let key = UserId::from_hex(&sync.id)?;
        let mut contact = state.contact_or_new(&key);
        let before = contact.clone();

        // Fields broadcast by the contact follow its own clock.
        if sync.last_updated > contact.last_updated {
            if !sync.display_name.is_empty() {
                contact.display_name = validate::display_name(&sync.display_name)?;
            }
            contact.ens_name = sync.ens_name.clone();
            contact.has_added_us = sync.has_added_us;
            contact.last_updated = sync.last_updated;
        }

        // Fields edited on our installations follow the local clock. Block
        // is evaluated before the relationship flags: a blocked contact's
        // chats stay inactive whatever `added` says.
        let clock = sync.last_updated_locally;
        if clock > contact.last_updated_locally {
            if sync.blocked && !contact.blocked {
                debug!(contact = %key.short(), clock, "Blocking contact from sync");
                self.set_contact_chats_active(state, &key, false, clock);
            } else if !sync.blocked && contact.blocked {
                debug!(contact = %key.short(), clock, "Unblocking contact from sync");
                if let Some(mut chat) = state.chat(&key.to_hex()) {
                    chat.active = true;
                    chat.bump_clock(clock);
                    state.settle_chats.insert(chat.id.clone());
                    state.put_chat(chat);
                }
            }

            if !sync.blocked {
                if sync.added && !contact.added {
                    self.ensure_contact_chats(state, &key, clock);
                } else if sync.removed && !contact.removed {
                    if let Some(mut chat) = state.chat(&key.profile_chat_id()) {
                        chat.active = false;
                        chat.bump_clock(clock);
                        state.settle_chats.insert(chat.id.clone());
                        state.put_chat(chat);
                    }
                }
            }

            contact.added = sync.added && !sync.blocked;
            contact.blocked = sync.blocked;
            contact.removed = sync.removed;
            contact.local_nickname = sync.local_nickname;
            contact.verification_status = sync.verification_status;
            contact.trust_status = sync.trust_status;
            contact.last_updated_locally = clock;

            if let Some(mut chat) = state.chat(&key.to_hex()) {
                if chat.muted != sync.muted {
                    chat.muted = sync.muted;
                    state.put_chat(chat);
                }
            }
        }

        if contact != before {
            state.put_contact(contact);
        }
        Ok(())
    }

    pub(super) fn handle_sync_installation_public_chat(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncInstallationPublicChat,
    ) -> Result<(), CoreError> {
        if sync.id.is_empty() || sync.clock == 0 {
            return Err(CoreError::Validation("public chat sync without id or clock".into()));
        }
        let mut chat = match state.chat(&sync.id) {
            Some(chat) if chat.chat_type != ChatType::Public => {
                return Err(CoreError::Validation(format!(
                    "{} is a {:?} chat, not public",
                    chat.id, chat.chat_type
                )));
            }
            Some(chat) if chat.active || sync.clock <= chat.deleted_at_clock_value => {
                debug!(chat_id = %chat.id, "Public chat already joined or removed later");
                return Ok(());
            }
            Some(chat) => chat,
            None => Chat::new_public(&sync.id, self.now_ms()),
        };
        chat.active = true;
        chat.joined = sync.clock;
        chat.bump_clock(sync.clock);
        state.settle_chats.insert(chat.id.clone());
        state.put_chat(chat);
        Ok(())
    }

    /// Open a one-to-one chat another installation opened. A blocked
    /// contact's chat stays closed, and so does a chat removed at or after
    /// `clock`.
    pub(super) fn handle_sync_one_to_one_chat(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncOneToOneChat,
    ) -> Result<(), CoreError> {
        if sync.clock == 0 {
            return Err(CoreError::Validation("one-to-one chat sync without clock".into()));
        }
        let key = UserId::from_hex(&sync.id)?;
        if self.is_me(&sync.id) {
            return Ok(());
        }
        if state.contact(&sync.id).is_some_and(|c| c.blocked) {
            debug!(chat_id = %sync.id, "Not opening chat with blocked contact");
            return Ok(());
        }
        let mut chat = match state.chat(&sync.id) {
            Some(chat) if chat.chat_type != ChatType::OneToOne => {
                return Err(CoreError::Validation(format!(
                    "{} is a {:?} chat, not one-to-one",
                    chat.id, chat.chat_type
                )));
            }
            Some(chat) if chat.active || sync.clock <= chat.deleted_at_clock_value => {
                debug!(chat_id = %chat.id, "One-to-one chat already open or removed later");
                return Ok(());
            }
            Some(chat) => chat,
            None => Chat::new_one_to_one(&key, self.now_ms()),
        };
        chat.active = true;
        chat.joined = chat.joined.max(sync.clock);
        chat.bump_clock(sync.clock);
        state.settle_chats.insert(chat.id.clone());
        state.put_chat(chat);
        Ok(())
    }

    pub(super) fn handle_sync_chat_removed(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncChatRemoved,
    ) -> Result<(), CoreError> {
        let mut chat = match state.chat(&sync.id) {
            Some(chat) => chat,
            // Groups are only created from their membership log.
            None if looks_like_group_id(&sync.id) => return Ok(()),
            None => match UserId::from_hex(&sync.id) {
                Ok(key) => Chat::new_one_to_one(&key, self.now_ms()),
                Err(_) => Chat::new_public(&sync.id, self.now_ms()),
            },
        };
        if sync.clock <= chat.deleted_at_clock_value || sync.clock < chat.joined {
            debug!(chat_id = %chat.id, clock = sync.clock, "Ignoring stale chat removal");
            return Ok(());
        }
        chat.deactivate(sync.clock);
        state.settle_chats.insert(chat.id.clone());
        state.put_chat(chat);
        Ok(())
    }

    pub(super) fn handle_sync_chat_messages_read(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncChatMessagesRead,
    ) -> Result<(), CoreError> {
        let mut chat = state
            .chat(&sync.id)
            .ok_or_else(|| CoreError::not_found("chat", &sync.id))?;
        if sync.clock <= chat.read_messages_at_clock_value {
            return Ok(());
        }
        chat.read_messages_at_clock_value = sync.clock;
        chat.unviewed_messages_count = 0;

        let seen: Vec<_> = state
            .messages
            .values()
            .filter(|m| m.chat_id == chat.id && !m.seen && m.clock <= sync.clock)
            .cloned()
            .collect();
        for mut message in seen {
            message.seen = true;
            state.put_message(message);
        }
        state.read_markers.insert(chat.id.clone(), sync.clock);
        state.put_chat(chat);
        Ok(())
    }

    pub(super) fn handle_sync_clear_history(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncClearHistory,
    ) -> Result<(), CoreError> {
        let mut chat = state
            .chat(&sync.chat_id)
            .ok_or_else(|| CoreError::not_found("chat", &sync.chat_id))?;
        if sync.cleared_at <= chat.deleted_at_clock_value {
            return Ok(());
        }
        chat.deleted_at_clock_value = sync.cleared_at;
        if chat
            .last_message
            .as_ref()
            .is_some_and(|m| m.clock <= sync.cleared_at)
        {
            chat.last_message = None;
        }
        chat.unviewed_messages_count = 0;
        chat.bump_clock(sync.cleared_at);

        let cleared: Vec<String> = state
            .messages
            .values()
            .filter(|m| m.chat_id == chat.id && m.clock <= sync.cleared_at)
            .map(|m| m.id.clone())
            .collect();
        for id in cleared {
            state.messages.remove(&id);
            state.response.messages.remove(&id);
        }
        state.cleared_histories.insert(chat.id.clone(), sync.cleared_at);
        state.put_chat(chat);
        Ok(())
    }

    pub(super) fn handle_sync_setting(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncSetting,
    ) -> Result<(), CoreError> {
        if state
            .setting(sync.field)?
            .is_some_and(|existing| existing.clock >= sync.clock)
        {
            debug!(field = sync.field.key(), clock = sync.clock, "Ignoring stale setting");
            return Ok(());
        }
        let value = validate_setting(sync.field, sync.value)?;
        state.response.settings.insert(sync.field, value.clone());
        state.settings.insert(sync.field, (value, sync.clock));
        Ok(())
    }

    pub(super) fn handle_sync_profile_pictures(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncProfilePictures,
    ) -> Result<(), CoreError> {
        for picture in sync.pictures {
            if picture.encrypted {
                warn!(image = %picture.name, "Ignoring sealed own profile picture");
                continue;
            }
            if state
                .identity_image(&picture.name)?
                .is_some_and(|existing| existing.clock >= picture.clock)
            {
                continue;
            }
            state
                .response
                .identity_images
                .insert(picture.name.clone(), picture.clone());
            state.identity_images.insert(picture.name.clone(), picture);
        }
        Ok(())
    }

    pub(super) fn handle_sync_wallet_accounts(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncWalletAccounts,
    ) -> Result<(), CoreError> {
        for account in sync.accounts {
            if account.address.is_empty() {
                continue;
            }
            if state
                .wallet_account(&account.address)?
                .is_some_and(|existing| existing.clock >= account.clock)
            {
                continue;
            }
            state
                .response
                .wallet_accounts
                .insert(account.address.clone(), account.clone());
            state.wallet_accounts.insert(account.address.clone(), account);
        }
        Ok(())
    }

    pub(super) fn handle_sync_keycards(
        &self,
        state: &mut ReceivedMessageState<'_>,
        sync: SyncKeycards,
    ) -> Result<(), CoreError> {
        for keycard in sync.keycards {
            if keycard.keycard_uid.is_empty() {
                continue;
            }
            if state
                .keycard(&keycard.keycard_uid)?
                .is_some_and(|existing| existing.clock >= keycard.clock)
            {
                continue;
            }
            state
                .response
                .keycards
                .insert(keycard.keycard_uid.clone(), keycard.clone());
            state.keycards.insert(keycard.keycard_uid.clone(), keycard);
        }
        Ok(())
    }

    pub(super) fn handle_sync_saved_address(
        &self,
        state: &mut ReceivedMessageState<'_>,
        saved: SavedAddress,
    ) -> Result<(), CoreError> {
        if saved.address.is_empty() {
            return Err(CoreError::Validation("saved address without address".into()));
        }
        if state
            .saved_address(&saved.address)?
            .is_some_and(|existing| existing.update_clock >= saved.update_clock)
        {
            return Ok(());
        }
        state
            .response
            .saved_addresses
            .insert(saved.address.clone(), saved.clone());
        state.saved_addresses.insert(saved.address.clone(), saved);
        Ok(())
    }

    /// A backup is applied entry by entry through the regular handlers. A
    /// bad entry is skipped.
    pub(super) fn handle_backup(
        &self,
        state: &mut ReceivedMessageState<'_>,
        backup: Backup,
    ) -> Result<(), CoreError> {
        debug!(
            clock = backup.clock,
            contacts = backup.contacts.len(),
            public_chats = backup.public_chats.len(),
            "Applying backup"
        );
        for contact in backup.contacts {
            let id = contact.id.clone();
            match self.handle_sync_installation_contact(state, contact) {
                Ok(()) => {}
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => warn!(contact = %id, error = %e, "Skipping backed up contact"),
            }
        }
        for chat in backup.public_chats {
            let id = chat.id.clone();
            match self.handle_sync_installation_public_chat(state, chat) {
                Ok(()) => {}
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => warn!(chat_id = %id, error = %e, "Skipping backed up chat"),
            }
        }
        Ok(())
    }
}

/// Check that a synced value has the shape its field expects.
pub(crate) fn validate_setting(field: SettingField, value: SettingValue) -> Result<SettingValue, CoreError> {
    let mismatch = || CoreError::Validation(format!("unexpected value for setting {}", field.key()));
    match field {
        SettingField::DisplayName => {
            let name = value.as_text().ok_or_else(mismatch)?;
            Ok(SettingValue::Text(validate::display_name(name)?))
        }
        SettingField::Bio => {
            validate::bio(value.as_text().ok_or_else(mismatch)?)?;
            Ok(value)
        }
        SettingField::MessagesFromContactsOnly => {
            value.as_flag().ok_or_else(mismatch)?;
            Ok(value)
        }
        SettingField::ProfilePicturesVisibility => {
            let raw = value.as_number().ok_or_else(mismatch)?;
            ProfilePicturesVisibility::from_i64(raw).ok_or_else(mismatch)?;
            Ok(value)
        }
        SettingField::Currency | SettingField::PreferredName => {
            value.as_text().ok_or_else(mismatch)?;
            Ok(value)
        }
        SettingField::SocialLinks => match value {
            SettingValue::List(_) => Ok(value),
            _ => Err(mismatch()),
        },
    }
}
