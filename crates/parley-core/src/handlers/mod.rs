//! Inbound pipeline.
//!
//! One call handles one transport batch under the state lock: decode every
//! envelope, drop messages from blocked senders and duplicates, route each
//! typed payload to its handler, then flush everything the pass touched in
//! a single transaction. A handler error only drops its own message, except
//! storage errors, which abort the batch before anything is flushed.

mod chat_message;
mod contact;
mod identity;
mod installation;
mod membership;
mod sync;
pub(crate) mod validate;

pub(crate) use chat_message::{pin_id, reaction_id};
pub(crate) use sync::validate_setting;

use std::collections::HashMap;

use tracing::{debug, info, warn};

use parley_shared::protocol::ApplicationMessage;

use crate::encryption::DecodedMessage;
use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::response::{MessengerResponse, RawPayload};
use crate::state::{CurrentMessage, ReceivedMessageState};
use crate::transport::Envelope;

impl Messenger {
    /// Pull everything the transport delivered and run it through the
    /// pipeline. Triggers a full sync when an installation got enabled and
    /// sync-on-pairing is configured.
    pub fn retrieve_all(&self) -> Result<MessengerResponse, CoreError> {
        let batches = self.transport.retrieve_all()?;
        let (mut response, installation_enabled) = self.handle_batches(batches)?;

        if installation_enabled && self.config().sync_on_pairing {
            info!("Installation enabled, syncing devices");
            let _guard = self.lock_state();
            response.merge(self.sync_devices_locked()?);
        }
        Ok(response)
    }

    /// Run already retrieved envelopes, grouped by topic, through the
    /// pipeline.
    pub fn handle_retrieved_messages(
        &self,
        batches: HashMap<String, Vec<Envelope>>,
    ) -> Result<MessengerResponse, CoreError> {
        Ok(self.handle_batches(batches)?.0)
    }

    fn handle_batches(
        &self,
        batches: HashMap<String, Vec<Envelope>>,
    ) -> Result<(MessengerResponse, bool), CoreError> {
        let _guard = self.lock_state();
        let db = self.db();
        let mut state = self.new_pass(&db);

        let mut topics: Vec<_> = batches.into_iter().collect();
        topics.sort_by(|a, b| a.0.cmp(&b.0));

        for (topic, envelopes) in topics {
            for envelope in envelopes {
                let decoded = match self.encryption.decode(&envelope) {
                    Ok(decoded) => decoded,
                    Err(e) => {
                        warn!(topic = %topic, envelope = %envelope.id, error = %e, "Skipping undecodable envelope");
                        continue;
                    }
                };
                for message in decoded {
                    let id = message.id.clone();
                    if let Err(e) = self.handle_decoded(&mut state, message) {
                        if e.aborts_batch() {
                            return Err(e);
                        }
                        warn!(id = %id, error = %e, "Dropping inbound message");
                        state.failures.push((id, e.to_string()));
                    }
                }
            }
        }
        state.current = None;

        let flush = state.take_flush();
        db.flush(&flush)?;
        state.publish_entities();

        if !state.settle_chats.is_empty() {
            let now = self.now_ms();
            self.settler()
                .note(std::mem::take(&mut state.settle_chats), now);
        }
        if !state.failures.is_empty() {
            debug!(failures = state.failures.len(), "Inbound pass finished with dropped messages");
        }

        let installation_enabled = state.installation_enabled;
        Ok((std::mem::take(&mut state.response), installation_enabled))
    }

    fn handle_decoded(
        &self,
        state: &mut ReceivedMessageState<'_>,
        message: DecodedMessage,
    ) -> Result<(), CoreError> {
        for installation in message.installations {
            if state.installation(&installation.id).is_none() {
                debug!(installation = %installation.id, "New own installation");
                state.put_installation(installation);
            }
        }

        let sender_hex = message.sender.to_hex();
        if state.contact(&sender_hex).is_some_and(|c| c.blocked) {
            debug!(sender = %message.sender.short(), "Dropping message from blocked contact");
            return Ok(());
        }

        if !state.seen_ids.insert(message.id.clone()) || state.db.message_exists(&message.id)? {
            debug!(id = %message.id, "Dropping duplicate message");
            return Ok(());
        }

        let Some(application) = ApplicationMessage::decode(message.type_tag, &message.payload)? else {
            debug!(id = %message.id, tag = message.type_tag, "Unknown payload type, passing through");
            state.response.raw_payloads.insert(
                message.id.clone(),
                RawPayload {
                    id: message.id,
                    sender: sender_hex,
                    type_tag: message.type_tag,
                    payload: message.payload,
                },
            );
            return Ok(());
        };

        state.current = Some(CurrentMessage {
            id: message.id,
            sender: message.sender,
            sender_hex,
            payload_type: application.payload_type(),
            transport_timestamp: message.transport_timestamp,
        });
        self.handle_application_message(state, application)
    }

    /// Route one typed payload to its handler.
    pub(crate) fn handle_application_message(
        &self,
        state: &mut ReceivedMessageState<'_>,
        message: ApplicationMessage,
    ) -> Result<(), CoreError> {
        let payload_type = message.payload_type();
        if payload_type.is_sync() && !self.is_me(&state.current()?.sender_hex) {
            return Err(CoreError::Permission(format!(
                "{payload_type} accepted only from our own installations"
            )));
        }

        match message {
            ApplicationMessage::ChatMessage(m) => self.handle_chat_message(state, m),
            ApplicationMessage::EditMessage(m) => self.handle_edit_message(state, m),
            ApplicationMessage::DeleteMessage(m) => self.handle_delete_message(state, m),
            ApplicationMessage::PinMessage(m) => self.handle_pin_message(state, m),
            ApplicationMessage::EmojiReaction(m) => self.handle_emoji_reaction(state, m),
            ApplicationMessage::MembershipUpdate(m) => self.handle_membership_update(state, m),
            ApplicationMessage::ContactUpdate(m) => self.handle_contact_update(state, m),
            ApplicationMessage::ChatIdentity(m) => self.handle_chat_identity(state, m),
            ApplicationMessage::PairInstallation(m) => self.handle_pair_installation(state, m),
            ApplicationMessage::SyncInstallationContact(m) => {
                self.handle_sync_installation_contact(state, m)
            }
            ApplicationMessage::SyncInstallationPublicChat(m) => {
                self.handle_sync_installation_public_chat(state, m)
            }
            ApplicationMessage::SyncOneToOneChat(m) => self.handle_sync_one_to_one_chat(state, m),
            ApplicationMessage::SyncChatRemoved(m) => self.handle_sync_chat_removed(state, m),
            ApplicationMessage::SyncChatMessagesRead(m) => {
                self.handle_sync_chat_messages_read(state, m)
            }
            ApplicationMessage::SyncClearHistory(m) => self.handle_sync_clear_history(state, m),
            ApplicationMessage::SyncSetting(m) => self.handle_sync_setting(state, m),
            ApplicationMessage::SyncProfilePictures(m) => self.handle_sync_profile_pictures(state, m),
            ApplicationMessage::SyncWalletAccounts(m) => self.handle_sync_wallet_accounts(state, m),
            ApplicationMessage::SyncKeycards(m) => self.handle_sync_keycards(state, m),
            ApplicationMessage::SyncSavedAddress(m) => self.handle_sync_saved_address(state, m),
            ApplicationMessage::Backup(m) => self.handle_backup(state, m),
        }
    }
}
