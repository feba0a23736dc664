//! Chat content: messages, edits, deletes, pins and reactions.

use tracing::debug;

use parley_shared::constants::{ID_CONTEXT_PIN, ID_CONTEXT_REACTION};
use parley_shared::crypto::derive_id;
use parley_shared::protocol::{
    ChatMessage, ChatScope, DeleteMessage, EditMessage, EmojiKind, EmojiReaction, PinMessage,
};
use parley_shared::UserId;
use parley_store::{Chat, ChatType, Message, PendingDelete, PendingEdit, PinRecord, ReactionRecord};

use super::validate;
use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::state::ReceivedMessageState;

/// Deterministic ID of the pin `signer` put on `message_id` in `chat_id`.
pub(crate) fn pin_id(signer: &UserId, message_id: &str, chat_id: &str) -> String {
    derive_id(
        ID_CONTEXT_PIN,
        &[&signer.0, message_id.as_bytes(), chat_id.as_bytes()],
    )
}

/// Deterministic ID of one emoji reaction.
pub(crate) fn reaction_id(
    signer: &UserId,
    message_id: &str,
    chat_id: &str,
    emoji: EmojiKind,
) -> String {
    derive_id(
        ID_CONTEXT_REACTION,
        &[
            &signer.0,
            message_id.as_bytes(),
            chat_id.as_bytes(),
            emoji.as_str().as_bytes(),
        ],
    )
}

/// Whether `from` may delete a message written by `author` in `chat`.
fn may_delete(chat: &Chat, author: &str, from: &str) -> bool {
    author == from || (chat.is_private_group() && chat.is_admin(from))
}

impl Messenger {
    /// Local ID of the chat a content payload belongs to. One-to-one
    /// payloads name the recipient's side, so a peer's message lands in the
    /// chat keyed by the peer.
    fn content_chat_id(
        &self,
        state: &ReceivedMessageState<'_>,
        scope: ChatScope,
        chat_id: &str,
    ) -> Result<String, CoreError> {
        let sender = &state.current()?.sender_hex;
        match scope {
            ChatScope::OneToOne if self.is_me(sender) => Ok(chat_id.to_string()),
            ChatScope::OneToOne => Ok(sender.clone()),
            ChatScope::Public | ChatScope::PrivateGroup => Ok(chat_id.to_string()),
            ChatScope::CommunityChat => Err(CoreError::NotImplemented("community chat messages")),
        }
    }

    /// The existing chat a content payload targets, checked against scope,
    /// group membership and the contacts-only policy.
    fn content_chat(
        &self,
        state: &ReceivedMessageState<'_>,
        scope: ChatScope,
        chat_id: &str,
    ) -> Result<Chat, CoreError> {
        let id = self.content_chat_id(state, scope, chat_id)?;
        let chat = state
            .chat(&id)
            .ok_or_else(|| CoreError::not_found("chat", id))?;
        self.check_content_chat(state, &chat, scope)?;
        Ok(chat)
    }

    fn check_content_chat(
        &self,
        state: &ReceivedMessageState<'_>,
        chat: &Chat,
        scope: ChatScope,
    ) -> Result<(), CoreError> {
        validate::scope(chat, scope)?;
        let sender = &state.current()?.sender_hex;
        if chat.is_private_group() && !chat.has_member(sender) {
            return Err(CoreError::Permission(format!(
                "{sender} is not a member of {}",
                chat.id
            )));
        }
        self.is_message_allowed_from(state, sender, Some(chat))
    }

    pub(super) fn handle_chat_message(
        &self,
        state: &mut ReceivedMessageState<'_>,
        message: ChatMessage,
    ) -> Result<(), CoreError> {
        let current = state.current()?.clone();
        validate::chat_message(&message, current.transport_timestamp)?;

        let chat_id = self.content_chat_id(state, message.scope, &message.chat_id)?;
        let (mut chat, created) = match state.chat(&chat_id) {
            Some(chat) => (chat, false),
            None if message.scope == ChatScope::OneToOne => {
                self.is_message_allowed_from(state, &current.sender_hex, None)?;
                let counterparty = UserId::from_hex(&chat_id)?;
                debug!(chat_id = %chat_id, "Creating one-to-one chat for incoming message");
                (Chat::new_one_to_one(&counterparty, current.transport_timestamp), true)
            }
            None => return Err(CoreError::not_found("chat", chat_id)),
        };
        self.check_content_chat(state, &chat, message.scope)?;

        if chat.is_public() && message.content_type.is_media() {
            return Err(CoreError::Validation(format!(
                "{:?} messages are not allowed in public chats",
                message.content_type
            )));
        }
        if message.clock <= chat.deleted_at_clock_value {
            debug!(
                chat_id = %chat.id,
                clock = message.clock,
                deleted_at = chat.deleted_at_clock_value,
                "Ignoring message below the chat tombstone"
            );
            return Ok(());
        }

        let outgoing = self.is_me(&current.sender_hex);
        let mut stored = Message {
            id: current.id.clone(),
            chat_id: chat.id.clone(),
            from: current.sender_hex.clone(),
            clock: message.clock,
            timestamp: message.timestamp,
            whisper_timestamp: current.transport_timestamp,
            content_type: message.content_type,
            text: message.text,
            response_to: message.response_to,
            seen: outgoing || message.clock <= chat.read_messages_at_clock_value,
            deleted: false,
            edited_at: 0,
            outgoing,
        };
        self.replay_pending(state, &chat, &mut stored)?;

        if stored.deleted {
            chat.bump_clock(stored.clock);
        } else {
            chat.update_from_message(&stored);
            if !stored.seen {
                chat.unviewed_messages_count += 1;
            }
        }
        if !chat.active && chat.chat_type == ChatType::OneToOne && !self.is_me(&chat.id) {
            chat.active = true;
            state.settle_chats.insert(chat.id.clone());
        } else if created {
            state.settle_chats.insert(chat.id.clone());
        }

        debug!(id = %stored.id, chat_id = %chat.id, clock = stored.clock, "Chat message accepted");
        state.put_message(stored);
        state.put_chat(chat);
        Ok(())
    }

    /// Apply edits and deletes that arrived before `message`.
    fn replay_pending(
        &self,
        state: &mut ReceivedMessageState<'_>,
        chat: &Chat,
        message: &mut Message,
    ) -> Result<(), CoreError> {
        let mut resolved = false;

        if let Some(delete) = state.pending_delete_for(&message.id)? {
            resolved = true;
            if may_delete(chat, &message.from, &delete.from) {
                debug!(id = %message.id, "Replaying pending delete");
                message.deleted = true;
                message.text.clear();
            }
        }
        let edits = state.pending_edits_for(&message.id)?;
        if !edits.is_empty() {
            resolved = true;
        }
        if !message.deleted {
            // Newest first: the first edit by the author wins.
            if let Some(edit) = edits.iter().find(|e| e.from == message.from) {
                debug!(id = %message.id, clock = edit.clock, "Replaying pending edit");
                message.text = edit.text.clone();
                message.edited_at = edit.clock;
            }
        }
        if resolved {
            state.resolved_pending.insert(message.id.clone());
        }
        Ok(())
    }

    pub(super) fn handle_edit_message(
        &self,
        state: &mut ReceivedMessageState<'_>,
        edit: EditMessage,
    ) -> Result<(), CoreError> {
        validate::edit_message(&edit)?;
        let sender = state.current()?.sender_hex.clone();
        let mut chat = self.content_chat(state, edit.scope, &edit.chat_id)?;
        if edit.clock <= chat.deleted_at_clock_value {
            debug!(chat_id = %chat.id, "Ignoring edit below the chat tombstone");
            return Ok(());
        }

        let Some(mut message) = state.message(&edit.message_id)? else {
            debug!(id = %edit.message_id, "Edit for unknown message, keeping it pending");
            state.pending_edits.push(PendingEdit {
                message_id: edit.message_id,
                chat_id: chat.id,
                from: sender,
                clock: edit.clock,
                text: edit.text,
            });
            return Ok(());
        };

        if message.from != sender {
            return Err(CoreError::Permission(format!(
                "{sender} cannot edit a message by {}",
                message.from
            )));
        }
        if message.chat_id != chat.id {
            return Err(CoreError::Validation(format!(
                "message {} does not belong to chat {}",
                message.id, chat.id
            )));
        }
        if message.deleted || edit.clock <= message.edited_at {
            debug!(id = %message.id, clock = edit.clock, "Ignoring stale edit");
            return Ok(());
        }

        message.text = edit.text;
        message.edited_at = edit.clock;
        if chat.last_message.as_ref().is_some_and(|m| m.id == message.id) {
            chat.last_message = Some(Box::new(message.clone()));
        }
        chat.bump_clock(edit.clock);
        state.put_message(message);
        state.put_chat(chat);
        Ok(())
    }

    pub(super) fn handle_delete_message(
        &self,
        state: &mut ReceivedMessageState<'_>,
        delete: DeleteMessage,
    ) -> Result<(), CoreError> {
        validate::delete_message(&delete)?;
        let sender = state.current()?.sender_hex.clone();
        let mut chat = self.content_chat(state, delete.scope, &delete.chat_id)?;
        if delete.clock <= chat.deleted_at_clock_value {
            debug!(chat_id = %chat.id, "Ignoring delete below the chat tombstone");
            return Ok(());
        }

        let Some(mut message) = state.message(&delete.message_id)? else {
            debug!(id = %delete.message_id, "Delete for unknown message, keeping it pending");
            state
                .pending_deletes
                .entry(delete.message_id.clone())
                .or_insert(PendingDelete {
                    message_id: delete.message_id,
                    chat_id: chat.id,
                    from: sender,
                    clock: delete.clock,
                });
            return Ok(());
        };

        if !may_delete(&chat, &message.from, &sender) {
            return Err(CoreError::Permission(format!(
                "{sender} cannot delete a message by {}",
                message.from
            )));
        }
        if message.chat_id != chat.id {
            return Err(CoreError::Validation(format!(
                "message {} does not belong to chat {}",
                message.id, chat.id
            )));
        }
        if message.deleted {
            return Ok(());
        }

        message.deleted = true;
        message.text.clear();
        if !message.seen && !message.outgoing {
            chat.unviewed_messages_count = chat.unviewed_messages_count.saturating_sub(1);
        }
        if chat.last_message.as_ref().is_some_and(|m| m.id == message.id) {
            chat.last_message = state
                .latest_visible_message(&chat.id, &message.id)?
                .map(Box::new);
        }
        chat.bump_clock(delete.clock);
        state.put_message(message);
        state.put_chat(chat);
        Ok(())
    }

    pub(super) fn handle_pin_message(
        &self,
        state: &mut ReceivedMessageState<'_>,
        pin: PinMessage,
    ) -> Result<(), CoreError> {
        validate::pin_message(&pin)?;
        let sender = state.current()?.sender;
        let chat = self.content_chat(state, pin.scope, &pin.chat_id)?;
        if pin.clock <= chat.deleted_at_clock_value {
            return Ok(());
        }

        let id = pin_id(&sender, &pin.message_id, &chat.id);
        if state.pin(&id)?.is_some_and(|existing| existing.clock >= pin.clock) {
            debug!(id = %id, clock = pin.clock, "Ignoring stale pin");
            return Ok(());
        }
        let record = PinRecord {
            id: id.clone(),
            message_id: pin.message_id,
            chat_id: chat.id,
            pinned_by: sender.to_hex(),
            pinned: pin.pinned,
            clock: pin.clock,
        };
        state.response.pins.insert(id.clone(), record.clone());
        state.pins.insert(id, record);
        Ok(())
    }

    pub(super) fn handle_emoji_reaction(
        &self,
        state: &mut ReceivedMessageState<'_>,
        reaction: EmojiReaction,
    ) -> Result<(), CoreError> {
        validate::emoji_reaction(&reaction)?;
        let sender = state.current()?.sender;
        let chat = self.content_chat(state, reaction.scope, &reaction.chat_id)?;
        if reaction.clock <= chat.deleted_at_clock_value {
            return Ok(());
        }

        let id = reaction_id(&sender, &reaction.message_id, &chat.id, reaction.emoji);
        if state
            .reaction(&id)?
            .is_some_and(|existing| existing.clock >= reaction.clock)
        {
            debug!(id = %id, clock = reaction.clock, "Ignoring stale reaction");
            return Ok(());
        }
        let record = ReactionRecord {
            id: id.clone(),
            message_id: reaction.message_id,
            chat_id: chat.id,
            from: sender.to_hex(),
            emoji: reaction.emoji,
            retracted: reaction.retracted,
            clock: reaction.clock,
        };
        state.response.reactions.insert(id.clone(), record.clone());
        state.reactions.insert(id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{deliver, envelope_from, TestNet};
    use parley_shared::protocol::ApplicationMessage;
    use parley_shared::Identity;

    fn pin(clock: u64, pinned: bool) -> ApplicationMessage {
        ApplicationMessage::PinMessage(PinMessage {
            clock,
            chat_id: "one-to-one".into(),
            scope: ChatScope::OneToOne,
            message_id: "m1".into(),
            pinned,
        })
    }

    fn reaction(clock: u64, retracted: bool) -> ApplicationMessage {
        ApplicationMessage::EmojiReaction(EmojiReaction {
            clock,
            chat_id: "one-to-one".into(),
            scope: ChatScope::OneToOne,
            message_id: "m1".into(),
            emoji: EmojiKind::Love,
            retracted,
        })
    }

    #[test]
    fn test_pin_and_reaction_ids_are_deterministic() {
        let signer = UserId([7; 32]);
        assert_eq!(pin_id(&signer, "m1", "c"), pin_id(&signer, "m1", "c"));
        assert_ne!(pin_id(&signer, "m1", "c"), pin_id(&UserId([8; 32]), "m1", "c"));
        assert_ne!(
            reaction_id(&signer, "m1", "c", EmojiKind::Love),
            reaction_id(&signer, "m1", "c", EmojiKind::Laugh)
        );
    }

    #[test]
    fn test_admins_may_delete_in_groups_only() {
        let admin = "aa".repeat(32);
        let author = "bb".repeat(32);
        let mut group = Chat::new_private_group("g", "friends", 1);
        group.members.push(parley_store::ChatMember {
            id: admin.clone(),
            admin: true,
            joined: true,
        });
        assert!(may_delete(&group, &author, &author));
        assert!(may_delete(&group, &author, &admin));
        assert!(!may_delete(&Chat::new_public("status", 1), &author, &admin));
    }

    #[test]
    fn test_pins_and_reactions_converge_in_either_order() {
        let net = TestNet::new();
        let alice = Identity::generate();
        let alice_hex = alice.user_id().to_hex();
        let in_order = net.device("bob-phone");
        let reversed = net.device("carol-phone");
        for device in [&in_order, &reversed] {
            device.messenger.create_one_to_one_chat(&alice.user_id()).unwrap();
        }
        let seal = |message: &ApplicationMessage| envelope_from(&alice, "alice-phone", &net.time, message);

        let older = [pin(5, true), reaction(5, false)];
        let newer = [pin(7, false), reaction(7, true)];
        for message in older.iter().chain(&newer) {
            deliver(&in_order, seal(message));
        }
        for message in newer.iter().chain(&older) {
            deliver(&reversed, seal(message));
        }

        let pin_key = pin_id(&alice.user_id(), "m1", &alice_hex);
        let reaction_key = reaction_id(&alice.user_id(), "m1", &alice_hex, EmojiKind::Love);
        let final_pin = in_order.messenger.db().pin_by_id(&pin_key).unwrap().unwrap();
        let final_reaction = in_order
            .messenger
            .db()
            .reaction_by_id(&reaction_key)
            .unwrap()
            .unwrap();
        assert_eq!(final_pin.clock, 7);
        assert!(!final_pin.pinned);
        assert_eq!(final_reaction.clock, 7);
        assert!(final_reaction.retracted);
        assert_eq!(
            reversed.messenger.db().pin_by_id(&pin_key).unwrap(),
            Some(final_pin.clone())
        );
        assert_eq!(
            reversed.messenger.db().reaction_by_id(&reaction_key).unwrap(),
            Some(final_reaction.clone())
        );

        // Same clock, different content: the stored record wins.
        let replay = deliver(&in_order, seal(&pin(7, true)));
        assert!(replay.pins.is_empty());
        let replay = deliver(&in_order, seal(&reaction(7, false)));
        assert!(replay.reactions.is_empty());
        // Exact replay of the newest payloads.
        for message in &newer {
            let replay = deliver(&in_order, seal(message));
            assert!(replay.pins.is_empty());
            assert!(replay.reactions.is_empty());
        }
        assert_eq!(
            in_order.messenger.db().pin_by_id(&pin_key).unwrap(),
            Some(final_pin)
        );
        assert_eq!(
            in_order.messenger.db().reaction_by_id(&reaction_key).unwrap(),
            Some(final_reaction)
        );
    }
}
