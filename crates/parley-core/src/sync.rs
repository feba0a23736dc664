//! Multi-device sync driver.
//!
//! Replays local state to our paired installations as typed sync payloads.
//! The receiving installation runs them through the regular inbound
//! pipeline, so there is no separate reconciliation path. Every helper is a
//! no-op while no other installation is enabled.

use tracing::{debug, info, warn};

use parley_shared::protocol::{
    ApplicationMessage, Backup, IdentityImage, Keycard, MembershipUpdate, SavedAddress,
    SettingField, SettingValue, SyncChatMessagesRead, SyncChatRemoved, SyncClearHistory,
    SyncInstallationContact, SyncInstallationPublicChat, SyncKeycards, SyncOneToOneChat,
    SyncProfilePictures, SyncSetting, SyncWalletAccounts, WalletAccount,
};
use parley_store::{Chat, ChatType, Contact};

use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::response::MessengerResponse;

impl Messenger {
    /// Send our complete state to every paired installation.
    pub fn sync_devices(&self) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.sync_devices_locked()
    }

    pub(crate) fn sync_devices_locked(&self) -> Result<MessengerResponse, CoreError> {
        let mut response = MessengerResponse::default();
        if !self.has_paired_devices() {
            debug!("No paired installations, nothing to sync");
            return Ok(response);
        }
        let mut sent = 0usize;

        for chat in self.chats() {
            if !chat.should_be_synced() || self.is_me(&chat.id) {
                continue;
            }
            if chat.active {
                match chat.chat_type {
                    ChatType::Public => sent += self.sync_public_chat(&chat)?,
                    ChatType::OneToOne => sent += self.sync_one_to_one_chat(&chat)?,
                    ChatType::PrivateGroup => sent += self.sync_group(&chat)?,
                    _ => {}
                }
                if chat.deleted_at_clock_value > 0 {
                    sent += self.sync_clear_history(&chat.id, chat.deleted_at_clock_value)?;
                }
            } else if chat.deleted_at_clock_value > 0 {
                sent += self.sync_chat_removed(&chat.id, chat.deleted_at_clock_value)?;
            }
            if chat.read_messages_at_clock_value > 0 {
                sent += self.sync_chat_messages_read(&chat.id, chat.read_messages_at_clock_value)?;
            }
        }

        for contact in self.contacts() {
            if contact.has_non_default_flags() {
                sent += self.sync_contact(&contact)?;
            }
        }

        let settings = self.db().all_settings()?;
        for setting in settings {
            sent += self.sync_setting_with_clock(setting.field, setting.value, setting.clock)?;
        }

        let pictures = self.db().identity_images()?;
        if !pictures.is_empty() {
            sent += self.sync_profile_pictures(pictures)?;
        }
        let accounts = self.db().wallet_accounts()?;
        if !accounts.is_empty() {
            sent += self.sync_wallet_accounts(accounts)?;
        }
        let keycards = self.db().keycards()?;
        if !keycards.is_empty() {
            sent += self.sync_keycards(keycards)?;
        }
        let addresses = self.db().saved_addresses()?;
        for address in addresses {
            sent += self.sync_saved_address(address)?;
        }

        info!(payloads = sent, "Synced devices");
        if let Some(chat) = self.chat(&self.my_hex()) {
            response.add_chat(chat);
        }
        Ok(response)
    }

    fn sync_one(&self, build: impl FnOnce(u64) -> ApplicationMessage) -> Result<usize, CoreError> {
        Ok(usize::from(self.dispatch_sync(build)?.is_some()))
    }

    pub(crate) fn contact_sync_payload(&self, contact: &Contact) -> SyncInstallationContact {
        let muted = self.chat(&contact.id).is_some_and(|c| c.muted);
        SyncInstallationContact {
            id: contact.id.clone(),
            last_updated: contact.last_updated,
            last_updated_locally: contact.last_updated_locally,
            display_name: contact.display_name.clone(),
            ens_name: contact.ens_name.clone(),
            local_nickname: contact.local_nickname.clone(),
            added: contact.added,
            blocked: contact.blocked,
            removed: contact.removed,
            has_added_us: contact.has_added_us,
            muted,
            verification_status: contact.verification_status,
            trust_status: contact.trust_status,
        }
    }

    pub(crate) fn sync_contact(&self, contact: &Contact) -> Result<usize, CoreError> {
        let payload = self.contact_sync_payload(contact);
        self.sync_one(|_| ApplicationMessage::SyncInstallationContact(payload))
    }

    pub(crate) fn sync_public_chat(&self, chat: &Chat) -> Result<usize, CoreError> {
        let id = chat.id.clone();
        let joined = chat.joined;
        self.sync_one(|clock| {
            ApplicationMessage::SyncInstallationPublicChat(SyncInstallationPublicChat {
                clock: if joined > 0 { joined } else { clock },
                id,
            })
        })
    }

    pub(crate) fn sync_one_to_one_chat(&self, chat: &Chat) -> Result<usize, CoreError> {
        let id = chat.id.clone();
        let joined = chat.joined;
        self.sync_one(|clock| {
            ApplicationMessage::SyncOneToOneChat(SyncOneToOneChat {
                clock: if joined > 0 { joined } else { clock },
                id,
            })
        })
    }

    /// Groups travel as their membership log.
    pub(crate) fn sync_group(&self, chat: &Chat) -> Result<usize, CoreError> {
        let update = MembershipUpdate {
            chat_id: chat.id.clone(),
            events: chat.membership_updates.clone(),
            wrapped: None,
        };
        self.sync_one(|_| ApplicationMessage::MembershipUpdate(update))
    }

    pub(crate) fn sync_chat_removed(&self, chat_id: &str, clock: u64) -> Result<usize, CoreError> {
        let id = chat_id.to_string();
        self.sync_one(|_| ApplicationMessage::SyncChatRemoved(SyncChatRemoved { clock, id }))
    }

    pub(crate) fn sync_chat_messages_read(&self, chat_id: &str, clock: u64) -> Result<usize, CoreError> {
        let id = chat_id.to_string();
        self.sync_one(|_| {
            ApplicationMessage::SyncChatMessagesRead(SyncChatMessagesRead { clock, id })
        })
    }

    pub(crate) fn sync_clear_history(&self, chat_id: &str, cleared_at: u64) -> Result<usize, CoreError> {
        let chat_id = chat_id.to_string();
        self.sync_one(|_| {
            ApplicationMessage::SyncClearHistory(SyncClearHistory { chat_id, cleared_at })
        })
    }

    pub(crate) fn sync_setting_with_clock(
        &self,
        field: SettingField,
        value: SettingValue,
        clock: u64,
    ) -> Result<usize, CoreError> {
        self.sync_one(|_| ApplicationMessage::SyncSetting(SyncSetting { clock, field, value }))
    }

    pub(crate) fn sync_profile_pictures(&self, pictures: Vec<IdentityImage>) -> Result<usize, CoreError> {
        self.sync_one(|_| ApplicationMessage::SyncProfilePictures(SyncProfilePictures { pictures }))
    }

    pub(crate) fn sync_wallet_accounts(&self, accounts: Vec<WalletAccount>) -> Result<usize, CoreError> {
        self.sync_one(|_| ApplicationMessage::SyncWalletAccounts(SyncWalletAccounts { accounts }))
    }

    pub(crate) fn sync_keycards(&self, keycards: Vec<Keycard>) -> Result<usize, CoreError> {
        self.sync_one(|_| ApplicationMessage::SyncKeycards(SyncKeycards { keycards }))
    }

    pub(crate) fn sync_saved_address(&self, address: SavedAddress) -> Result<usize, CoreError> {
        self.sync_one(|_| ApplicationMessage::SyncSavedAddress(address))
    }

    /// Bundle contacts and joined public chats into one payload for our
    /// paired installations. Returns whether anything was sent.
    pub fn backup(&self) -> Result<bool, CoreError> {
        let _guard = self.lock_state();
        let contacts: Vec<_> = self
            .contacts()
            .iter()
            .filter(|c| c.has_non_default_flags())
            .map(|c| self.contact_sync_payload(c))
            .collect();
        let public_chats: Vec<_> = self
            .chats()
            .into_iter()
            .filter(|c| c.active && c.chat_type == ChatType::Public)
            .map(|c| SyncInstallationPublicChat {
                clock: c.joined.max(1),
                id: c.id,
            })
            .collect();
        if contacts.is_empty() && public_chats.is_empty() {
            return Ok(false);
        }
        let sent = self.dispatch_sync(|clock| {
            ApplicationMessage::Backup(Backup {
                clock,
                contacts,
                public_chats,
            })
        })?;
        if sent.is_some() {
            debug!("Backup sent");
        }
        Ok(sent.is_some())
    }

    /// Apply the pending subscription changes once the settler releases
    /// them. Returns how many chats were reconciled.
    ///
    /// A failed batch is handed back to the settler whole and retried on a
    /// later tick. Reconciling a chat twice is harmless.
    pub fn settle(&self) -> Result<usize, CoreError> {
        let _guard = self.lock_state();
        let now = self.now_ms();
        let Some(batch) = self.settler().poll(now) else {
            return Ok(0);
        };
        let count = batch.len();
        if let Err(e) = self.reconcile_filters(&batch) {
            let mut settler = self.settler();
            settler.requeue(batch);
            settler.finish(self.now_ms());
            warn!(chats = count, error = %e, "Settling failed, batch requeued");
            return Err(e);
        }
        self.settler().finish(self.now_ms());
        debug!(chats = count, "Settled chat subscriptions");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use parley_shared::{Identity, UserId};
    use parley_store::{Chat, Database};

    use crate::clock::{ManualTimeSource, TimeSource};
    use crate::encryption::SignedEnvelopeCodec;
    use crate::messenger::{Collaborators, Messenger};
    use crate::settle::SettleState;
    use crate::testkit::{self, START_MS};
    use crate::transport::{Envelope, MemoryNetwork, MemoryTransport, Transport, TransportError};

    /// Fails the first join of `topic`, then behaves like `inner`.
    struct FailOnce {
        inner: MemoryTransport,
        topic: String,
        failed: AtomicBool,
    }

    impl Transport for FailOnce {
        fn send_private(&self, recipient: &UserId, payload: &[u8]) -> Result<String, TransportError> {
            self.inner.send_private(recipient, payload)
        }

        fn send_public(&self, topic: &str, payload: &[u8]) -> Result<String, TransportError> {
            self.inner.send_public(topic, payload)
        }

        fn send_group(&self, recipients: &[UserId], payload: &[u8]) -> Result<String, TransportError> {
            self.inner.send_group(recipients, payload)
        }

        fn retrieve_all(&self) -> Result<HashMap<String, Vec<Envelope>>, TransportError> {
            self.inner.retrieve_all()
        }

        fn join_private(&self, key: &UserId) -> Result<(), TransportError> {
            self.inner.join_private(key)
        }

        fn join_public(&self, topic: &str) -> Result<(), TransportError> {
            if topic == self.topic && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(TransportError::SendFailed(format!("cannot join {topic}")));
            }
            self.inner.join_public(topic)
        }

        fn join_group(&self, members: &[UserId]) -> Result<(), TransportError> {
            self.inner.join_group(members)
        }

        fn remove_filter(&self, topic: &str) -> Result<(), TransportError> {
            self.inner.remove_filter(topic)
        }

        fn filters(&self) -> Vec<String> {
            self.inner.filters()
        }
    }

    #[test]
    fn test_failed_settle_keeps_the_batch() {
        let time = ManualTimeSource::new(START_MS);
        let clock: Arc<dyn TimeSource> = Arc::new(time.clone());
        let identity = Identity::generate();
        let transport = Arc::new(FailOnce {
            inner: MemoryNetwork::new().endpoint(identity.user_id(), clock.clone()),
            topic: "beta".into(),
            failed: AtomicBool::new(false),
        });
        let codec = SignedEnvelopeCodec::new(identity.clone(), "alice-phone", clock.clone());
        let messenger = Messenger::new(
            identity,
            "alice-phone",
            Database::open_in_memory().unwrap(),
            Collaborators {
                transport: transport.clone(),
                encryption: Arc::new(codec),
                time: clock,
            },
            testkit::config(),
        )
        .unwrap();

        for topic in ["alpha", "beta"] {
            messenger.save_chat(Chat::new_public(topic, START_MS)).unwrap();
        }
        messenger
            .settler()
            .note(["alpha".to_string(), "beta".to_string()], START_MS);

        let quiet = messenger.config().settle_quiet_period.as_millis() as u64;
        time.advance(quiet);
        assert!(messenger.settle().is_err());
        assert!(matches!(messenger.settler().state(), SettleState::Collecting { .. }));
        assert!(!transport.filters().contains(&"beta".to_string()));

        time.advance(quiet);
        assert_eq!(messenger.settle().unwrap(), 2);
        assert_eq!(messenger.settler().state(), SettleState::Idle);
        let filters = transport.filters();
        assert!(filters.contains(&"alpha".to_string()));
        assert!(filters.contains(&"beta".to_string()));
    }
}
