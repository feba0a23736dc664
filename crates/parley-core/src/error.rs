use thiserror::Error;

use parley_shared::{CryptoError, IdentityError, ProtocolError};
use parley_store::StoreError;

use crate::encryption::EncryptionError;
use crate::group::GroupError;
use crate::transport::TransportError;

/// Errors surfaced by the messenger core.
///
/// Handler-local failures (validation, permission, crypto) only drop the
/// inner message that caused them. Storage failures abort the whole call.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not allowed: {0}")]
    Permission(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Encryption layer error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Balance source error: {0}")]
    Balance(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
}

impl CoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Whether the error must abort an inbound batch instead of only the
    /// offending message.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<GroupError> for CoreError {
    fn from(e: GroupError) -> Self {
        Self::Validation(e.to_string())
    }
}

/// Map a store lookup that returned [`StoreError::NotFound`] to `None`.
pub(crate) fn optional<T>(result: parley_store::Result<T>) -> Result<Option<T>, CoreError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_aborts_batch() {
        assert!(CoreError::Storage(StoreError::NotFound).aborts_batch());
        assert!(!CoreError::Validation("bad".into()).aborts_batch());
        assert!(!CoreError::Permission("nope".into()).aborts_batch());
        assert!(!CoreError::Crypto(CryptoError::DecryptionFailed).aborts_batch());
        assert!(!CoreError::NotImplemented("community").aborts_batch());
    }

    #[test]
    fn test_optional_maps_not_found() {
        let missing: parley_store::Result<u8> = Err(StoreError::NotFound);
        assert_eq!(optional(missing).unwrap(), None);
        assert_eq!(optional(Ok(3u8)).unwrap(), Some(3));
    }
}
