//! Sending chat content: messages, media, edits, deletes, pins and
//! reactions.

use tracing::debug;

use parley_shared::protocol::{
    ApplicationMessage, ChatMessage, ContentType, DeleteMessage, EditMessage, EmojiKind,
    EmojiReaction, PinMessage,
};
use parley_store::{Chat, Message, PinRecord, ReactionRecord};

use crate::error::{optional, CoreError};
use crate::handlers::validate;
use crate::handlers::{pin_id, reaction_id};
use crate::messenger::Messenger;
use crate::response::MessengerResponse;

impl Messenger {
    pub fn send_chat_message(
        &self,
        chat_id: &str,
        text: &str,
        response_to: Option<&str>,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.send_content_locked(chat_id, ContentType::Text, text, response_to, Vec::new())
    }

    /// Send an image or audio clip. Not allowed in public chats.
    pub fn send_media_message(
        &self,
        chat_id: &str,
        content_type: ContentType,
        media: Vec<u8>,
        caption: &str,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if !content_type.is_media() {
            return Err(CoreError::Validation(format!("{content_type:?} is not a media type")));
        }
        self.send_content_locked(chat_id, content_type, caption, None, media)
    }

    /// Replace the text of one of our own messages.
    pub fn edit_message(&self, message_id: &str, text: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut message = self.require_message(message_id)?;
        if !self.is_me(&message.from) {
            return Err(CoreError::Permission("only the author can edit a message".into()));
        }
        if message.deleted {
            return Err(CoreError::Validation(format!("message {message_id} is deleted")));
        }
        let mut chat = self.require_chat(&message.chat_id)?;
        let (clock, _) = self.clock.next(chat.last_clock_value);
        let edit = EditMessage {
            clock,
            chat_id: chat.id.clone(),
            scope: chat.chat_type.scope(),
            message_id: message.id.clone(),
            text: text.to_string(),
        };
        validate::edit_message(&edit)?;
        self.send_application_message(&chat.id, &ApplicationMessage::EditMessage(edit))?;

        message.text = text.to_string();
        message.edited_at = clock;
        self.db().save_message(&message)?;
        if chat.last_message.as_ref().is_some_and(|m| m.id == message.id) {
            chat.last_message = Some(Box::new(message.clone()));
        }
        chat.bump_clock(clock);
        let chat = self.save_chat(chat)?;
        debug!(id = %message.id, clock, "Message edited");

        let mut response = MessengerResponse::default();
        response.add_message(message);
        response.add_chat(chat);
        Ok(response)
    }

    /// Delete a message we wrote, or any message in a group we administer.
    pub fn delete_message(&self, message_id: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut message = self.require_message(message_id)?;
        let mut chat = self.require_chat(&message.chat_id)?;
        let me = self.my_hex();
        if message.from != me && !(chat.is_private_group() && chat.is_admin(&me)) {
            return Err(CoreError::Permission("cannot delete someone else's message".into()));
        }
        if message.deleted {
            let mut response = MessengerResponse::default();
            response.add_message(message);
            return Ok(response);
        }

        let (clock, _) = self.clock.next(chat.last_clock_value);
        let delete = DeleteMessage {
            clock,
            chat_id: chat.id.clone(),
            scope: chat.chat_type.scope(),
            message_id: message.id.clone(),
        };
        validate::delete_message(&delete)?;
        self.send_application_message(&chat.id, &ApplicationMessage::DeleteMessage(delete))?;

        message.deleted = true;
        message.text.clear();
        self.db().save_message(&message)?;
        if chat.last_message.as_ref().is_some_and(|m| m.id == message.id) {
            chat.last_message = self.db().latest_message_for_chat(&chat.id)?.map(Box::new);
        }
        chat.bump_clock(clock);
        let chat = self.save_chat(chat)?;
        debug!(id = %message.id, clock, "Message deleted");

        let mut response = MessengerResponse::default();
        response.add_message(message);
        response.add_chat(chat);
        Ok(response)
    }

    /// Pin or unpin a message of `chat_id`.
    pub fn send_pin_message(
        &self,
        chat_id: &str,
        message_id: &str,
        pinned: bool,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let mut chat = self.require_chat(chat_id)?;
        self.require_message_in(&chat, message_id)?;

        let (clock, _) = self.clock.next(chat.last_clock_value);
        let pin = PinMessage {
            clock,
            chat_id: chat.id.clone(),
            scope: chat.chat_type.scope(),
            message_id: message_id.to_string(),
            pinned,
        };
        validate::pin_message(&pin)?;
        self.send_application_message(&chat.id, &ApplicationMessage::PinMessage(pin))?;

        let record = PinRecord {
            id: pin_id(&self.user_id(), message_id, &chat.id),
            message_id: message_id.to_string(),
            chat_id: chat.id.clone(),
            pinned_by: self.my_hex(),
            pinned,
            clock,
        };
        self.db().save_pin(&record)?;
        chat.bump_clock(clock);
        let chat = self.save_chat(chat)?;

        let mut response = MessengerResponse::default();
        response.pins.insert(record.id.clone(), record);
        response.add_chat(chat);
        Ok(response)
    }

    pub fn send_emoji_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: EmojiKind,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.send_reaction_locked(chat_id, message_id, emoji, false)
    }

    pub fn retract_emoji_reaction(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: EmojiKind,
    ) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        self.send_reaction_locked(chat_id, message_id, emoji, true)
    }

    // -- helpers -------------------------------------------------------------

    fn require_message(&self, message_id: &str) -> Result<Message, CoreError> {
        optional(self.db().message_by_id(message_id))?
            .ok_or_else(|| CoreError::not_found("message", message_id))
    }

    fn require_message_in(&self, chat: &Chat, message_id: &str) -> Result<Message, CoreError> {
        let message = self.require_message(message_id)?;
        if message.chat_id != chat.id {
            return Err(CoreError::Validation(format!(
                "message {message_id} does not belong to chat {}",
                chat.id
            )));
        }
        Ok(message)
    }

    fn send_content_locked(
        &self,
        chat_id: &str,
        content_type: ContentType,
        text: &str,
        response_to: Option<&str>,
        media: Vec<u8>,
    ) -> Result<MessengerResponse, CoreError> {
        let mut chat = self.require_chat(chat_id)?;
        if chat.is_public() && content_type.is_media() {
            return Err(CoreError::Validation(format!(
                "{content_type:?} messages are not allowed in public chats"
            )));
        }
        if chat.is_private_group() && !chat.has_member(&self.my_hex()) {
            return Err(CoreError::Permission(format!("not a member of {chat_id}")));
        }

        let (clock, now) = self.clock.next(chat.last_clock_value);
        let message = ChatMessage {
            clock,
            timestamp: now,
            chat_id: chat.id.clone(),
            scope: chat.chat_type.scope(),
            content_type,
            text: text.to_string(),
            response_to: response_to.unwrap_or_default().to_string(),
            media,
        };
        validate::chat_message(&message, now)?;
        let raw = self.send_application_message(&chat.id, &ApplicationMessage::ChatMessage(message))?;

        let stored = Message {
            id: raw.id,
            chat_id: chat.id.clone(),
            from: self.my_hex(),
            clock,
            timestamp: now,
            whisper_timestamp: now,
            content_type,
            text: text.to_string(),
            response_to: response_to.unwrap_or_default().to_string(),
            seen: true,
            deleted: false,
            edited_at: 0,
            outgoing: true,
        };
        self.db().save_message(&stored)?;
        chat.update_from_message(&stored);
        if !chat.active && chat.is_one_to_one() && !self.is_me(&chat.id) {
            chat.active = true;
            self.join_chat_filter(&chat)?;
        }
        let chat = self.save_chat(chat)?;
        debug!(id = %stored.id, chat_id = %chat.id, clock, "Message sent");

        let mut response = MessengerResponse::default();
        response.add_message(stored);
        response.add_chat(chat);
        Ok(response)
    }

    fn send_reaction_locked(
        &self,
        chat_id: &str,
        message_id: &str,
        emoji: EmojiKind,
        retracted: bool,
    ) -> Result<MessengerResponse, CoreError> {
        let mut chat = self.require_chat(chat_id)?;
        self.require_message_in(&chat, message_id)?;

        let (clock, _) = self.clock.next(chat.last_clock_value);
        let reaction = EmojiReaction {
            clock,
            chat_id: chat.id.clone(),
            scope: chat.chat_type.scope(),
            message_id: message_id.to_string(),
            emoji,
            retracted,
        };
        validate::emoji_reaction(&reaction)?;
        self.send_application_message(&chat.id, &ApplicationMessage::EmojiReaction(reaction))?;

        let record = ReactionRecord {
            id: reaction_id(&self.user_id(), message_id, &chat.id, emoji),
            message_id: message_id.to_string(),
            chat_id: chat.id.clone(),
            from: self.my_hex(),
            emoji,
            retracted,
            clock,
        };
        self.db().save_reaction(&record)?;
        chat.bump_clock(clock);
        let chat = self.save_chat(chat)?;

        let mut response = MessengerResponse::default();
        response.reactions.insert(record.id.clone(), record);
        response.add_chat(chat);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use crate::testkit::TestNet;
    use parley_shared::protocol::{ContentType, EmojiKind};

    #[test]
    fn test_message_edit_and_delete_reach_recipient() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");
        alice.messenger.create_one_to_one_chat(&bob.user_id()).unwrap();
        let bob_hex = bob.user_id().to_hex();
        let alice_hex = alice.user_id().to_hex();

        let sent = alice.messenger.send_chat_message(&bob_hex, "hi", None).unwrap();
        let id = sent.messages.keys().next().unwrap().clone();
        let received = bob.messenger.retrieve_all().unwrap();
        assert_eq!(received.messages[&id].text, "hi");
        assert_eq!(received.messages[&id].chat_id, alice_hex);

        net.advance(1_000);
        alice.messenger.edit_message(&id, "hi there").unwrap();
        let edited = bob.messenger.retrieve_all().unwrap();
        assert_eq!(edited.messages[&id].text, "hi there");
        assert!(edited.messages[&id].edited_at > 0);

        net.advance(1_000);
        let deleted = alice.messenger.delete_message(&id).unwrap();
        assert!(deleted.removed_messages.contains(&id));
        let removed = bob.messenger.retrieve_all().unwrap();
        assert!(removed.removed_messages.contains(&id));
        assert!(bob.messenger.chat(&alice_hex).unwrap().last_message.is_none());

        assert!(bob.messenger.edit_message(&id, "mine").is_err());
    }

    #[test]
    fn test_media_rejected_in_public_chats() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        alice.messenger.join_public_chat("status").unwrap();

        let err = alice
            .messenger
            .send_media_message("status", ContentType::Image, vec![0x89, b'P', b'N', b'G'], "")
            .unwrap_err();
        assert!(matches!(err, crate::CoreError::Validation(_)));
        assert!(alice
            .messenger
            .send_media_message("status", ContentType::Text, vec![1], "")
            .is_err());
    }

    #[test]
    fn test_pins_and_reactions_are_recorded_on_both_sides() {
        let net = TestNet::new();
        let alice = net.device("alice-phone");
        let bob = net.device("bob-phone");
        alice.messenger.join_public_chat("status").unwrap();
        bob.messenger.join_public_chat("status").unwrap();

        let sent = alice.messenger.send_chat_message("status", "gm", None).unwrap();
        let id = sent.messages.keys().next().unwrap().clone();
        bob.messenger.retrieve_all().unwrap();

        let pinned = bob.messenger.send_pin_message("status", &id, true).unwrap();
        assert_eq!(pinned.pins.len(), 1);
        bob.messenger
            .send_emoji_reaction("status", &id, EmojiKind::ThumbsUp)
            .unwrap();
        let retracted = bob
            .messenger
            .retract_emoji_reaction("status", &id, EmojiKind::ThumbsUp)
            .unwrap();
        assert!(retracted.reactions.values().all(|r| r.retracted));

        let received = alice.messenger.retrieve_all().unwrap();
        assert_eq!(received.pins.len(), 1);
        assert!(received.pins.values().all(|p| p.pinned));
        let reaction = received.reactions.values().next().unwrap();
        assert!(reaction.retracted);
        assert_eq!(reaction.emoji, EmojiKind::ThumbsUp);

        assert!(bob.messenger.send_pin_message("status", "missing", true).is_err());
    }
}
