use serde::{Deserialize, Serialize};

use crate::constants::{PROFILE_CHAT_PREFIX, PUBKEY_SIZE};
use crate::error::IdentityError;

// User identity = Ed25519 public key (32 bytes)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub [u8; 32]);

impl UserId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(s).map_err(|e| IdentityError::InvalidHex(e.to_string()))?;
        if bytes.len() != PUBKEY_SIZE {
            return Err(IdentityError::InvalidHex(format!(
                "expected {} bytes, got {}",
                PUBKEY_SIZE,
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }

    /// ID of the profile chat that carries this user's identity updates.
    pub fn profile_chat_id(&self) -> String {
        format!("{}{}", PROFILE_CHAT_PREFIX, self.to_hex())
    }

    /// Transport topic on which private payloads for this key are delivered.
    pub fn private_topic(&self) -> String {
        format!("private:{}", self.to_hex())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Build a private group chat ID. The creator key is always the suffix.
pub fn group_chat_id(creator: &UserId) -> String {
    format!("{}-{}", uuid::Uuid::new_v4(), creator.to_hex())
}

/// Whether `chat_id` was created by `creator` according to the group ID rule.
pub fn group_chat_created_by(chat_id: &str, creator_hex: &str) -> bool {
    chat_id
        .strip_suffix(creator_hex)
        .map(|prefix| prefix.ends_with('-'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        assert!(UserId::from_hex("abcd").is_err());
        assert!(UserId::from_hex(&"zz".repeat(32)).is_err());
    }

    #[test]
    fn test_group_chat_id_ends_with_creator() {
        let creator = UserId([7u8; 32]);
        let id = group_chat_id(&creator);
        assert!(group_chat_created_by(&id, &creator.to_hex()));
        assert!(!group_chat_created_by(&id, &UserId([8u8; 32]).to_hex()));
    }
}
