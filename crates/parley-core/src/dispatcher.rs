//! Outbound routing.
//!
//! [`Messenger::dispatch_message`] picks recipients and transport scope from
//! the chat type, seals the payload once, hands it to the transport and
//! persists the send attempt whatever its resend policy.

use tracing::{debug, info, warn};

use parley_shared::protocol::{ApplicationMessage, MembershipUpdate, PayloadType, WrappedPayload};
use parley_shared::UserId;
use parley_store::{ChatType, RawMessage, ResendPolicy};

use crate::encryption::SealedMessage;
use crate::error::CoreError;
use crate::messenger::Messenger;

impl Messenger {
    /// Send `raw` to the chat it names and record the attempt.
    ///
    /// Fails without sending anything if the chat is unknown.
    pub(crate) fn dispatch_message(&self, mut raw: RawMessage) -> Result<RawMessage, CoreError> {
        let chat = self.require_chat(&raw.local_chat_id)?;

        match chat.chat_type {
            ChatType::OneToOne => {
                let counterparty = chat.counterparty().ok_or_else(|| {
                    CoreError::Validation(format!("one-to-one chat {} has no valid key", chat.id))
                })?;
                let sealed = self.seal(&raw)?;
                if counterparty != self.user_id() {
                    let transport_id = self.transport.send_private(&counterparty, &sealed.bytes)?;
                    debug!(chat_id = %chat.id, transport_id = %transport_id, "Sent private message");
                    raw.recipients = vec![counterparty.to_hex()];
                }
                self.send_to_paired_devices(&sealed)?;
                raw.id = sealed.id;
            }
            ChatType::Public | ChatType::Profile | ChatType::Timeline => {
                let sealed = self.seal(&raw)?;
                let transport_id = self.transport.send_public(&chat.id, &sealed.bytes)?;
                debug!(chat_id = %chat.id, transport_id = %transport_id, "Sent public message");
                raw.id = sealed.id;
            }
            ChatType::PrivateGroup => {
                let mut recipients = if raw.recipients.is_empty() {
                    chat.members.iter().map(|m| m.id.clone()).collect()
                } else {
                    raw.recipients.clone()
                };
                if !self.has_paired_devices() {
                    recipients.retain(|r| !self.is_me(r));
                }
                recipients.sort();
                recipients.dedup();

                if !raw.skip_group_message_wrap && raw.payload_type != PayloadType::MembershipUpdate {
                    let wrapped = ApplicationMessage::MembershipUpdate(MembershipUpdate {
                        chat_id: chat.id.clone(),
                        events: chat.membership_updates.clone(),
                        wrapped: Some(WrappedPayload {
                            type_tag: raw.payload_type.as_u16(),
                            payload: std::mem::take(&mut raw.payload),
                        }),
                    });
                    raw.payload = wrapped.encode()?;
                    raw.payload_type = PayloadType::MembershipUpdate;
                }

                let sealed = self.seal(&raw)?;
                if recipients.is_empty() {
                    // Nobody else to reach; the message is delivered as far
                    // as it ever will be.
                    raw.sent = true;
                } else {
                    let keys = recipients
                        .iter()
                        .map(|r| UserId::from_hex(r))
                        .collect::<Result<Vec<_>, _>>()?;
                    let transport_id = self.transport.send_group(&keys, &sealed.bytes)?;
                    debug!(
                        chat_id = %chat.id,
                        transport_id = %transport_id,
                        recipients = keys.len(),
                        "Sent group message"
                    );
                }
                raw.recipients = recipients;
                raw.id = sealed.id;
            }
            ChatType::CommunityChannel => {
                return Err(CoreError::NotImplemented("dispatch to community channels"));
            }
        }

        raw.send_count += 1;
        raw.last_sent = self.now_ms();
        self.db().save_raw_message(&raw)?;
        Ok(raw)
    }

    fn seal(&self, raw: &RawMessage) -> Result<SealedMessage, CoreError> {
        Ok(self.encryption.seal(raw.payload_type, &raw.payload)?)
    }

    /// Deliver an already sealed payload to our other installations.
    fn send_to_paired_devices(&self, sealed: &SealedMessage) -> Result<(), CoreError> {
        if !self.has_paired_devices() {
            return Ok(());
        }
        self.transport.send_private(&self.user_id(), &sealed.bytes)?;
        Ok(())
    }

    /// Encode `message` for `chat_id` and dispatch it with automatic resend.
    pub(crate) fn send_application_message(
        &self,
        chat_id: &str,
        message: &ApplicationMessage,
    ) -> Result<RawMessage, CoreError> {
        let raw = RawMessage::new(chat_id, message.payload_type(), message.encode()?)
            .with_resend(ResendPolicy::Automatic);
        self.dispatch_message(raw)
    }

    /// Send a payload to our own paired installations, stamped with the self
    /// chat's next clock. A no-op without paired installations.
    pub(crate) fn dispatch_sync(
        &self,
        build: impl FnOnce(u64) -> ApplicationMessage,
    ) -> Result<Option<RawMessage>, CoreError> {
        if !self.has_paired_devices() {
            return Ok(None);
        }
        let (clock, chat) = self.last_clock_with_related_chat()?;
        let message = build(clock);
        let raw = RawMessage::new(&chat.id, message.payload_type(), message.encode()?)
            .with_resend(ResendPolicy::Automatic);
        let raw = self.dispatch_message(raw)?;
        self.commit_self_clock(clock)?;
        Ok(Some(raw))
    }

    /// Announce this installation to every other installation of our
    /// identity. Goes out even while none of them is enabled yet.
    pub(crate) fn dispatch_pairing(
        &self,
        build: impl FnOnce(u64) -> ApplicationMessage,
    ) -> Result<RawMessage, CoreError> {
        let (clock, chat) = self.last_clock_with_related_chat()?;
        let message = build(clock);
        let mut raw = RawMessage::new(&chat.id, message.payload_type(), message.encode()?);

        let sealed = self.seal(&raw)?;
        let transport_id = self.transport.send_private(&self.user_id(), &sealed.bytes)?;
        debug!(transport_id = %transport_id, "Sent pairing announcement");

        raw.id = sealed.id;
        raw.recipients = vec![self.my_hex()];
        raw.send_count += 1;
        raw.last_sent = self.now_ms();
        self.db().save_raw_message(&raw)?;
        self.commit_self_clock(clock)?;
        Ok(raw)
    }

    /// Resend every automatic-resend message whose backoff elapsed.
    /// Returns how many were resent.
    pub fn resend_expired_messages(&self) -> Result<usize, CoreError> {
        let _guard = self.lock_state();
        let max = self.config().resend_max_count;
        let min_delay = self.config().resend_min_delay.as_millis() as u64;
        let now = self.now_ms();

        let ids = self.db().expired_message_ids(max)?;
        let mut resent = 0;
        for id in ids {
            let raw = self.db().raw_message_by_id(&id)?;
            let Some(chat) = self.chats.get(&raw.local_chat_id) else {
                continue;
            };
            if !(chat.is_public() || chat.chat_type == ChatType::CommunityChannel) {
                continue;
            }
            if now < next_resend_at(&raw, min_delay) {
                continue;
            }
            match self.dispatch_message(raw) {
                Ok(raw) => {
                    info!(id = %raw.id, send_count = raw.send_count, "Resent message");
                    resent += 1;
                }
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => warn!(id = %id, error = %e, "Resend failed"),
            }
        }
        Ok(resent)
    }

    /// Confirm delivery of the given raw messages.
    pub fn mark_messages_sent(&self, ids: &[String]) -> Result<usize, CoreError> {
        let db = self.db();
        let mut updated = 0;
        for id in ids {
            if db.mark_raw_message_sent(id)? {
                updated += 1;
            }
        }
        Ok(updated)
    }
}

/// `last_sent + 2^(send_count-1) * min_delay`.
fn next_resend_at(raw: &RawMessage, min_delay_ms: u64) -> u64 {
    let exponent = raw.send_count.saturating_sub(1).min(32);
    let backoff = min_delay_ms.saturating_mul(1u64 << exponent);
    raw.last_sent.saturating_add(backoff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{Device, TestNet};
    use parley_store::Chat;

    fn group_of(device: &Device, members: &[&Device]) -> Chat {
        let keys: Vec<UserId> = members.iter().map(|d| d.user_id()).collect();
        let response = device.messenger.create_group_chat("friends", &keys).unwrap();
        response
            .chats
            .into_values()
            .find(|c| c.chat_type == ChatType::PrivateGroup)
            .unwrap()
    }

    fn sorted_hex(devices: &[&Device]) -> Vec<String> {
        let mut keys: Vec<String> = devices.iter().map(|d| d.user_id().to_hex()).collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let mut raw = RawMessage::new("status", PayloadType::ChatMessage, Vec::new());
        raw.last_sent = 1_000;
        raw.send_count = 1;
        assert_eq!(next_resend_at(&raw, 30_000), 31_000);
        raw.send_count = 2;
        assert_eq!(next_resend_at(&raw, 30_000), 61_000);
        raw.send_count = 3;
        assert_eq!(next_resend_at(&raw, 30_000), 121_000);
    }

    #[test]
    fn test_community_channels_are_not_implemented() {
        let net = crate::testkit::TestNet::new();
        let alice = net.device("alice-phone");
        alice
            .messenger
            .save_chat(parley_store::Chat::new_community_channel("guild-general", "general", 1))
            .unwrap();
        alice.transport.clear_sent();

        let err = alice
            .messenger
            .send_chat_message("guild-general", "hello", None)
            .unwrap_err();
        assert!(matches!(err, CoreError::NotImplemented(_)));
        assert!(alice.transport.sent().is_empty());
    }

    #[test]
    fn test_group_payloads_are_wrapped_and_skip_self() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");
        let carol = net.device("carol-phone");
        let group = group_of(&alice, &[&bob, &carol]);
        assert!(group.has_member(&alice.user_id().to_hex()));

        let raw = RawMessage::new(&group.id, PayloadType::ChatMessage, b"hello".to_vec());
        let sent = alice.messenger.dispatch_message(raw).unwrap();
        assert_eq!(sent.recipients, sorted_hex(&[&bob, &carol]));
        assert_eq!(sent.payload_type, PayloadType::MembershipUpdate);

        let stored = alice.messenger.db().raw_message_by_id(&sent.id).unwrap();
        assert_eq!(stored.recipients, sent.recipients);
        assert_eq!(stored.payload_type, PayloadType::MembershipUpdate);
        let Some(ApplicationMessage::MembershipUpdate(update)) =
            ApplicationMessage::decode(stored.payload_type.as_u16(), &stored.payload).unwrap()
        else {
            panic!("group payload is not a membership update");
        };
        assert_eq!(update.chat_id, group.id);
        assert_eq!(update.events, group.membership_updates);
        assert_eq!(
            update.wrapped,
            Some(WrappedPayload {
                type_tag: PayloadType::ChatMessage.as_u16(),
                payload: b"hello".to_vec(),
            })
        );
    }

    #[test]
    fn test_explicit_group_recipients_override_members() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");
        let carol = net.device("carol-phone");
        let group = group_of(&alice, &[&bob, &carol]);

        let mut raw = RawMessage::new(&group.id, PayloadType::ChatMessage, b"psst".to_vec());
        raw.recipients = vec![bob.user_id().to_hex(), alice.user_id().to_hex()];
        let sent = alice.messenger.dispatch_message(raw).unwrap();
        assert_eq!(sent.recipients, vec![bob.user_id().to_hex()]);
        assert_eq!(
            alice.messenger.db().raw_message_by_id(&sent.id).unwrap().recipients,
            vec![bob.user_id().to_hex()]
        );
    }

    #[test]
    fn test_paired_devices_keep_self_in_group_recipients() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let _laptop = net.paired_device(&alice, "alice-laptop");
        let bob = net.device("bob-phone");
        let group = group_of(&alice, &[&bob]);

        let raw = RawMessage::new(&group.id, PayloadType::ChatMessage, b"hello".to_vec());
        let sent = alice.messenger.dispatch_message(raw).unwrap();
        assert_eq!(sent.recipients, sorted_hex(&[&alice, &bob]));

        let mut log = RawMessage::new(&group.id, PayloadType::MembershipUpdate, Vec::new());
        log.recipients = vec![bob.user_id().to_hex()];
        let sent = alice.messenger.dispatch_message(log).unwrap();
        assert_eq!(sent.payload_type, PayloadType::MembershipUpdate);
        assert!(sent.payload.is_empty());
    }
}
