//! Contact relationship edits. Every edit bumps the contact's local clock
//! and is synced to our other installations.

use tracing::info;

use parley_shared::protocol::{
    ApplicationMessage, ContactUpdate, SettingField, TrustStatus, VerificationStatus,
};
use parley_shared::UserId;
use parley_store::{Chat, Contact};

use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::response::MessengerResponse;

impl Messenger {
    /// Add `key` as a contact, open its chats and let it know.
    pub fn add_contact(&self, key: &UserId) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if self.contact(&key.to_hex()).is_some_and(|c| c.blocked) {
            return Err(CoreError::Validation(format!(
                "{} is blocked, unblock it first",
                key.short()
            )));
        }
        let contact = self.update_contact_locally(key, |contact, clock| contact.mark_added(clock))?;
        let mut response = MessengerResponse::default();

        let now = self.now_ms();
        for chat in [Chat::new_one_to_one(key, now), Chat::new_profile(key, now)] {
            let chat = self.set_chat_active(chat, true)?;
            response.add_chat(chat);
        }

        let chat = self.send_contact_update_locked(key)?;
        info!(contact = %key.short(), "Contact added");
        response.add_chat(chat);
        response.add_contact(contact);
        Ok(response)
    }

    /// Drop the relationship. The one-to-one chat stays, the profile feed
    /// is unsubscribed.
    pub fn remove_contact(&self, key: &UserId) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let contact = self.update_contact_locally(key, |contact, clock| contact.remove(clock))?;
        let mut response = MessengerResponse::default();
        if let Some(chat) = self.chat(&key.profile_chat_id()) {
            response.add_chat(self.set_chat_active(chat, false)?);
        }
        response.add_contact(contact);
        Ok(response)
    }

    /// Block `key`: its chats are hidden and its messages dropped on
    /// arrival.
    pub fn block_contact(&self, key: &UserId) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let contact = self.update_contact_locally(key, |contact, clock| contact.block(clock))?;
        let mut response = MessengerResponse::default();
        for id in [key.to_hex(), key.profile_chat_id()] {
            if let Some(chat) = self.chat(&id) {
                response.add_chat(self.set_chat_active(chat, false)?);
            }
        }
        info!(contact = %key.short(), "Contact blocked");
        response.add_contact(contact);
        Ok(response)
    }

    pub fn unblock_contact(&self, key: &UserId) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let contact = self.update_contact_locally(key, |contact, clock| contact.unblock(clock))?;
        let mut response = MessengerResponse::default();
        if let Some(chat) = self.chat(&key.to_hex()) {
            response.add_chat(self.set_chat_active(chat, true)?);
        }
        response.add_contact(contact);
        Ok(response)
    }

    pub fn set_local_nickname(&self, key: &UserId, nickname: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let nickname = nickname.trim().to_string();
        let contact = self.update_contact_locally(key, |contact, _| contact.local_nickname = nickname)?;
        let mut response = MessengerResponse::default();
        response.add_contact(contact);
        Ok(response)
    }

    pub fn set_trust_status(&self, key: &UserId, status: TrustStatus) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let contact = self.update_contact_locally(key, |contact, _| contact.trust_status = status)?;
        let mut response = MessengerResponse::default();
        response.add_contact(contact);
        Ok(response)
    }

    pub fn set_verification_status(
        &self,
        key: &UserId,
        status: VerificationStatus,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let contact =
            self.update_contact_locally(key, |contact, _| contact.verification_status = status)?;
        let mut response = MessengerResponse::default();
        response.add_contact(contact);
        Ok(response)
    }

    // -- helpers -------------------------------------------------------------

    /// Apply a local edit to the contact for `key` at its next local clock,
    /// persist it and sync it.
    pub(crate) fn update_contact_locally(
        &self,
        key: &UserId,
        edit: impl FnOnce(&mut Contact, u64),
    ) -> Result<Contact, CoreError> {
        if *key == self.user_id() {
            return Err(CoreError::Validation("cannot edit ourselves as a contact".into()));
        }
        let mut contact = self.contact_or_new(key);
        let (clock, _) = self.clock.next(contact.last_updated_locally);
        edit(&mut contact, clock);
        contact.last_updated_locally = clock;
        let contact = self.save_contact(contact)?;
        self.sync_contact(&contact)?;
        Ok(contact)
    }

    /// Persist `chat` with the given `active` flag and move its transport
    /// subscription along.
    fn set_chat_active(&self, mut chat: Chat, active: bool) -> Result<Chat, CoreError> {
        if let Some(existing) = self.chat(&chat.id) {
            chat = existing;
        }
        let changed = chat.active != active || !self.chats.contains(&chat.id);
        chat.active = active;
        if !changed {
            return Ok(chat);
        }
        let chat = self.save_chat(chat)?;
        if active {
            self.join_chat_filter(&chat)?;
        } else {
            self.leave_chat_filter(&chat)?;
        }
        Ok(chat)
    }

    /// Send our display name to `key` on the one-to-one chat.
    pub(crate) fn send_contact_update_locked(&self, key: &UserId) -> Result<Chat, CoreError> {
        let mut chat = self.require_chat(&key.to_hex())?;
        let display_name = self
            .setting_value(SettingField::DisplayName)?
            .and_then(|v| v.as_text().map(str::to_string))
            .unwrap_or_default();
        let (clock, _) = self.clock.next(chat.last_clock_value);
        let update = ApplicationMessage::ContactUpdate(ContactUpdate {
            clock,
            display_name,
            ens_name: String::new(),
        });
        self.send_application_message(&chat.id, &update)?;
        chat.bump_clock(clock);
        self.save_chat(chat)
    }
}

#[cfg(test)]
mod tests {
    use crate::testkit::TestNet;
    use crate::transport::Transport;
    use parley_shared::protocol::TrustStatus;

    #[test]
    fn test_add_contact_opens_chats_and_notifies() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");

        let response = alice.messenger.add_contact(&bob.user_id()).unwrap();
        let bob_hex = bob.user_id().to_hex();
        assert!(response.contacts[&bob_hex].added);
        assert!(response.chats[&bob_hex].active);
        assert!(response.chats[&bob.user_id().profile_chat_id()].active);
        assert!(alice
            .transport
            .filters()
            .contains(&bob.user_id().profile_chat_id()));

        bob.messenger.retrieve_all().unwrap();
        let alice_seen = bob.messenger.contact(&alice.user_id().to_hex()).unwrap();
        assert!(alice_seen.has_added_us);
        assert!(!alice_seen.added);
    }

    #[test]
    fn test_block_hides_chats_and_unblock_restores() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");
        alice.messenger.add_contact(&bob.user_id()).unwrap();

        let blocked = alice.messenger.block_contact(&bob.user_id()).unwrap();
        let bob_hex = bob.user_id().to_hex();
        assert!(blocked.contacts[&bob_hex].blocked);
        assert!(!blocked.contacts[&bob_hex].added);
        assert!(!blocked.chats[&bob_hex].active);
        assert!(alice.messenger.add_contact(&bob.user_id()).is_err());

        bob.messenger.create_one_to_one_chat(&alice.user_id()).unwrap();
        bob.messenger
            .send_chat_message(&alice.user_id().to_hex(), "hello?", None)
            .unwrap();
        let dropped = alice.messenger.retrieve_all().unwrap();
        assert!(dropped.messages.is_empty());

        let unblocked = alice.messenger.unblock_contact(&bob.user_id()).unwrap();
        assert!(!unblocked.contacts[&bob_hex].blocked);
        assert!(unblocked.chats[&bob_hex].active);
    }

    #[test]
    fn test_local_edits_raise_local_clock() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");

        let first = alice
            .messenger
            .set_local_nickname(&bob.user_id(), " Bobby ")
            .unwrap();
        let bob_hex = bob.user_id().to_hex();
        let first = first.contacts[&bob_hex].clone();
        assert_eq!(first.local_nickname, "Bobby");

        let second = alice
            .messenger
            .set_trust_status(&bob.user_id(), TrustStatus::Trusted)
            .unwrap();
        let second = &second.contacts[&bob_hex];
        assert_eq!(second.trust_status, TrustStatus::Trusted);
        assert!(second.last_updated_locally > first.last_updated_locally);

        assert!(alice
            .messenger
            .set_local_nickname(&alice.user_id(), "me")
            .is_err());
    }
}
