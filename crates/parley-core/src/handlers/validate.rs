//! Structural checks run before any handler touches state.

use parley_shared::constants::{
    BIO_MAX_CHARS, DISPLAY_NAME_MAX_CHARS, DISPLAY_NAME_MIN_CHARS, MAX_CLOCK_DRIFT_MS,
};
use parley_shared::protocol::{
    ChatMessage, ChatScope, DeleteMessage, EditMessage, EmojiReaction, PairInstallation,
    PinMessage,
};
use parley_store::Chat;

use crate::error::CoreError;

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::Validation(reason.into())
}

fn require_common(clock: u64, chat_id: &str) -> Result<(), CoreError> {
    if clock == 0 {
        return Err(invalid("clock is zero"));
    }
    if chat_id.is_empty() {
        return Err(invalid("chat id is empty"));
    }
    Ok(())
}

fn require_target(clock: u64, chat_id: &str, message_id: &str) -> Result<(), CoreError> {
    require_common(clock, chat_id)?;
    if message_id.is_empty() {
        return Err(invalid("target message id is empty"));
    }
    Ok(())
}

/// `transport_timestamp` is the time the transport stamped the envelope with.
pub fn chat_message(message: &ChatMessage, transport_timestamp: u64) -> Result<(), CoreError> {
    require_common(message.clock, &message.chat_id)?;
    if message.timestamp == 0 {
        return Err(invalid("timestamp is zero"));
    }
    if message.timestamp > transport_timestamp.saturating_add(MAX_CLOCK_DRIFT_MS) {
        return Err(invalid(format!(
            "timestamp {} is too far ahead of transport time {}",
            message.timestamp, transport_timestamp
        )));
    }
    if message.content_type.is_media() {
        if message.media.is_empty() {
            return Err(invalid("media message without media"));
        }
    } else {
        if !message.media.is_empty() {
            return Err(invalid("media attached to a non-media message"));
        }
        if message.text.trim().is_empty() {
            return Err(invalid("text is empty"));
        }
    }
    Ok(())
}

pub fn edit_message(message: &EditMessage) -> Result<(), CoreError> {
    require_target(message.clock, &message.chat_id, &message.message_id)?;
    if message.text.trim().is_empty() {
        return Err(invalid("edited text is empty"));
    }
    Ok(())
}

pub fn delete_message(message: &DeleteMessage) -> Result<(), CoreError> {
    require_target(message.clock, &message.chat_id, &message.message_id)
}

pub fn pin_message(message: &PinMessage) -> Result<(), CoreError> {
    require_target(message.clock, &message.chat_id, &message.message_id)
}

pub fn emoji_reaction(message: &EmojiReaction) -> Result<(), CoreError> {
    require_target(message.clock, &message.chat_id, &message.message_id)
}

pub fn pair_installation(message: &PairInstallation) -> Result<(), CoreError> {
    if message.clock == 0 {
        return Err(invalid("clock is zero"));
    }
    if message.installation_id.is_empty() {
        return Err(invalid("installation id is empty"));
    }
    Ok(())
}

/// The payload's declared scope must match the kind of chat it lands in.
pub fn scope(chat: &Chat, scope: ChatScope) -> Result<(), CoreError> {
    if chat.chat_type.scope() != scope {
        return Err(invalid(format!(
            "{:?} payload for {:?} chat {}",
            scope, chat.chat_type, chat.id
        )));
    }
    Ok(())
}

/// Trim and check a display name. Returns the trimmed name.
pub fn display_name(name: &str) -> Result<String, CoreError> {
    let name = name.trim();
    let len = name.chars().count();
    if !(DISPLAY_NAME_MIN_CHARS..=DISPLAY_NAME_MAX_CHARS).contains(&len) {
        return Err(invalid(format!(
            "display name must be {DISPLAY_NAME_MIN_CHARS} to {DISPLAY_NAME_MAX_CHARS} characters"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
    {
        return Err(invalid("display name has disallowed characters"));
    }
    let lower = name.to_lowercase();
    if [".eth", "-eth", "_eth"].iter().any(|s| lower.ends_with(s)) {
        return Err(invalid("display name looks like an ENS name"));
    }
    Ok(name.to_string())
}

pub fn bio(bio: &str) -> Result<(), CoreError> {
    if bio.chars().count() > BIO_MAX_CHARS {
        return Err(invalid(format!("bio longer than {BIO_MAX_CHARS} characters")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::protocol::ContentType;

    fn text(timestamp: u64) -> ChatMessage {
        ChatMessage {
            clock: 1,
            timestamp,
            chat_id: "status".into(),
            scope: ChatScope::Public,
            content_type: ContentType::Text,
            text: "hello".into(),
            response_to: String::new(),
            media: Vec::new(),
        }
    }

    #[test]
    fn test_drift_is_bounded() {
        assert!(chat_message(&text(1_000), 1_000).is_ok());
        assert!(chat_message(&text(1_000 + MAX_CLOCK_DRIFT_MS), 1_000).is_ok());
        assert!(chat_message(&text(1_001 + MAX_CLOCK_DRIFT_MS), 1_000).is_err());
    }

    #[test]
    fn test_empty_or_mismatched_content_is_rejected() {
        let mut m = text(10);
        m.text = "   ".into();
        assert!(chat_message(&m, 10).is_err());

        m.content_type = ContentType::Image;
        assert!(chat_message(&m, 10).is_err());
        m.media = vec![1, 2, 3];
        assert!(chat_message(&m, 10).is_ok());

        let mut m = text(10);
        m.clock = 0;
        assert!(chat_message(&m, 10).is_err());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(display_name("  alice  ").unwrap(), "alice");
        assert!(display_name("al").is_err());
        assert!(display_name(&"a".repeat(25)).is_err());
        assert!(display_name("alice.bob").is_err());
        assert!(display_name("alice-eth").is_err());
        assert!(display_name("alice_ETH").is_err());
        assert!(display_name("alice smith_2").is_ok());
    }

    #[test]
    fn test_scope_must_match_chat_type() {
        let chat = Chat::new_public("status", 1);
        assert!(scope(&chat, ChatScope::Public).is_ok());
        assert!(scope(&chat, ChatScope::OneToOne).is_err());
    }
}
