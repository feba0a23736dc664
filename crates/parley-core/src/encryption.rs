//! Encryption-layer collaborator.
//!
//! The messenger hands typed payload bytes to an [`EncryptionLayer`] to seal
//! and gets decoded inner messages back for every delivered envelope. The
//! layer also owns per-installation bookkeeping for our own identity.
//!
//! [`SignedEnvelopeCodec`] is the in-process implementation: frames are
//! bincode-encoded and signed with the sender's Ed25519 key. It authenticates
//! but does not hide content.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use parley_shared::constants::ID_CONTEXT_MESSAGE;
use parley_shared::crypto::derive_id;
use parley_shared::identity::verify_signature_bytes;
use parley_shared::protocol::PayloadType;
use parley_shared::{Identity, UserId};
use parley_store::{Installation, InstallationMetadata};

use crate::clock::TimeSource;
use crate::transport::Envelope;

#[derive(Error, Debug)]
pub enum EncryptionError {
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Envelope signature check failed")]
    Authentication,

    #[error("Unknown installation {0}")]
    UnknownInstallation(String),

    #[error("Sealing failed: {0}")]
    Seal(String),
}

/// Output of sealing one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// Message ID, identical on every receiving installation.
    pub id: String,
    pub bytes: Vec<u8>,
}

/// One typed inner message recovered from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMessage {
    pub id: String,
    /// Key that signed the payload.
    pub sender: UserId,
    pub type_tag: u16,
    pub payload: Vec<u8>,
    /// Transport timestamp of the carrying envelope (ms).
    pub transport_timestamp: u64,
    /// Installations of our own identity first seen while decoding.
    pub installations: Vec<Installation>,
}

pub trait EncryptionLayer: Send + Sync {
    fn seal(&self, payload_type: PayloadType, payload: &[u8]) -> Result<SealedMessage, EncryptionError>;

    fn decode(&self, envelope: &Envelope) -> Result<Vec<DecodedMessage>, EncryptionError>;

    /// Seed the layer with installations persisted by an earlier run.
    fn load_installations(&self, installations: Vec<Installation>);

    fn enable_installation(&self, installation_id: &str) -> Result<(), EncryptionError>;

    fn disable_installation(&self, installation_id: &str) -> Result<(), EncryptionError>;

    fn set_installation_metadata(
        &self,
        installation_id: &str,
        metadata: InstallationMetadata,
    ) -> Result<(), EncryptionError>;
}

/// ID of a message sent by `sender`. Independent of which installation sealed
/// or received it.
pub fn message_id(sender: &UserId, type_tag: u16, payload: &[u8]) -> String {
    derive_id(
        ID_CONTEXT_MESSAGE,
        &[&sender.0, &type_tag.to_le_bytes(), payload],
    )
}

// ---------------------------------------------------------------------------
// Signed envelope codec
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    sender: [u8; 32],
    installation_id: String,
    installation_version: u32,
    type_tag: u16,
    payload: Vec<u8>,
    /// Sender wall-clock time (ms).
    timestamp: u64,
    signature: Vec<u8>,
}

impl Frame {
    fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.payload.len() + 96);
        out.extend_from_slice(&self.sender);
        out.extend_from_slice(self.installation_id.as_bytes());
        out.push(0);
        out.extend_from_slice(&self.installation_version.to_le_bytes());
        out.extend_from_slice(&self.type_tag.to_le_bytes());
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}

pub struct SignedEnvelopeCodec {
    identity: Identity,
    installation_id: String,
    version: u32,
    time: Arc<dyn TimeSource>,
    /// Installations of our own identity, keyed by installation ID.
    installations: Mutex<HashMap<String, Installation>>,
}

impl SignedEnvelopeCodec {
    pub const VERSION: u32 = 1;

    pub fn new(identity: Identity, installation_id: &str, time: Arc<dyn TimeSource>) -> Self {
        let own = Installation {
            id: installation_id.to_string(),
            identity: identity.user_id().to_hex(),
            version: Self::VERSION,
            enabled: true,
            timestamp: time.now_ms(),
            metadata: None,
        };
        let mut installations = HashMap::new();
        installations.insert(own.id.clone(), own);
        Self {
            identity,
            installation_id: installation_id.to_string(),
            version: Self::VERSION,
            time,
            installations: Mutex::new(installations),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Installation>> {
        self.installations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of every own installation this codec knows about.
    pub fn installations(&self) -> Vec<Installation> {
        self.lock().values().cloned().collect()
    }

    fn set_enabled(&self, installation_id: &str, enabled: bool) -> Result<(), EncryptionError> {
        let mut installations = self.lock();
        let installation = installations
            .get_mut(installation_id)
            .ok_or_else(|| EncryptionError::UnknownInstallation(installation_id.to_string()))?;
        installation.enabled = enabled;
        Ok(())
    }
}

impl EncryptionLayer for SignedEnvelopeCodec {
    fn seal(&self, payload_type: PayloadType, payload: &[u8]) -> Result<SealedMessage, EncryptionError> {
        let mut frame = Frame {
            sender: self.identity.public_key_bytes(),
            installation_id: self.installation_id.clone(),
            installation_version: self.version,
            type_tag: payload_type.as_u16(),
            payload: payload.to_vec(),
            timestamp: self.time.now_ms(),
            signature: Vec::new(),
        };
        frame.signature = self.identity.sign(&frame.signing_bytes()).to_bytes().to_vec();
        let bytes = bincode::serialize(&frame).map_err(|e| EncryptionError::Seal(e.to_string()))?;

        Ok(SealedMessage {
            id: message_id(&self.identity.user_id(), frame.type_tag, payload),
            bytes,
        })
    }

    fn decode(&self, envelope: &Envelope) -> Result<Vec<DecodedMessage>, EncryptionError> {
        let frame: Frame = bincode::deserialize(&envelope.payload)
            .map_err(|e| EncryptionError::Malformed(e.to_string()))?;
        verify_signature_bytes(&frame.sender, &frame.signing_bytes(), &frame.signature)
            .map_err(|_| EncryptionError::Authentication)?;

        let sender = UserId(frame.sender);
        let mut learned = Vec::new();
        if sender == self.identity.user_id() {
            if frame.installation_id == self.installation_id {
                debug!(envelope = %envelope.id, "Skipping own echo");
                return Ok(Vec::new());
            }
            let mut installations = self.lock();
            if !installations.contains_key(&frame.installation_id) {
                let installation = Installation {
                    id: frame.installation_id.clone(),
                    identity: sender.to_hex(),
                    version: frame.installation_version,
                    enabled: false,
                    timestamp: envelope.timestamp,
                    metadata: None,
                };
                debug!(installation = %installation.id, "Learned own installation");
                installations.insert(installation.id.clone(), installation.clone());
                learned.push(installation);
            }
        }

        Ok(vec![DecodedMessage {
            id: message_id(&sender, frame.type_tag, &frame.payload),
            sender,
            type_tag: frame.type_tag,
            payload: frame.payload,
            transport_timestamp: envelope.timestamp,
            installations: learned,
        }])
    }

    fn load_installations(&self, installations: Vec<Installation>) {
        let mut known = self.lock();
        for installation in installations {
            if installation.id != self.installation_id {
                known.insert(installation.id.clone(), installation);
            }
        }
    }

    fn enable_installation(&self, installation_id: &str) -> Result<(), EncryptionError> {
        self.set_enabled(installation_id, true)
    }

    fn disable_installation(&self, installation_id: &str) -> Result<(), EncryptionError> {
        self.set_enabled(installation_id, false)
    }

    fn set_installation_metadata(
        &self,
        installation_id: &str,
        metadata: InstallationMetadata,
    ) -> Result<(), EncryptionError> {
        let mut installations = self.lock();
        let installation = installations
            .get_mut(installation_id)
            .ok_or_else(|| EncryptionError::UnknownInstallation(installation_id.to_string()))?;
        installation.metadata = Some(metadata);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualTimeSource;

    fn envelope(bytes: Vec<u8>) -> Envelope {
        Envelope {
            id: "env".into(),
            topic: "t".into(),
            payload: bytes,
            timestamp: 7,
        }
    }

    #[test]
    fn test_seal_then_decode_on_another_identity() {
        let time: Arc<dyn TimeSource> = Arc::new(ManualTimeSource::new(5));
        let alice = Identity::generate();
        let alice_id = alice.user_id();
        let sender = SignedEnvelopeCodec::new(alice, "a1", time.clone());
        let receiver = SignedEnvelopeCodec::new(Identity::generate(), "b1", time);

        let sealed = sender.seal(PayloadType::ChatMessage, b"payload").unwrap();
        let decoded = receiver.decode(&envelope(sealed.bytes)).unwrap();

        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, sealed.id);
        assert_eq!(decoded[0].sender, alice_id);
        assert_eq!(decoded[0].transport_timestamp, 7);
        assert!(decoded[0].installations.is_empty());
    }

    #[test]
    fn test_tampered_frame_is_rejected() {
        let time: Arc<dyn TimeSource> = Arc::new(ManualTimeSource::new(5));
        let codec = SignedEnvelopeCodec::new(Identity::generate(), "a1", time.clone());
        let other = SignedEnvelopeCodec::new(Identity::generate(), "b1", time);

        let mut bytes = codec.seal(PayloadType::ContactUpdate, b"abc").unwrap().bytes;
        let last = bytes.len() - 70;
        bytes[last] ^= 0xff;
        assert!(other.decode(&envelope(bytes)).is_err());
        assert!(matches!(
            other.decode(&envelope(vec![1, 2, 3])),
            Err(EncryptionError::Malformed(_))
        ));
    }

    #[test]
    fn test_own_installations_are_learned_disabled() {
        let time: Arc<dyn TimeSource> = Arc::new(ManualTimeSource::new(5));
        let identity = Identity::generate();
        let secret = *identity.secret_bytes();
        let first = SignedEnvelopeCodec::new(identity, "a1", time.clone());
        let second = SignedEnvelopeCodec::new(Identity::from_secret_bytes(&secret), "a2", time);

        let sealed = second.seal(PayloadType::PairInstallation, b"pair").unwrap();
        let decoded = first.decode(&envelope(sealed.bytes.clone())).unwrap();
        assert_eq!(decoded[0].installations.len(), 1);
        assert!(!decoded[0].installations[0].enabled);

        // Known now, so not reported again.
        let again = first.decode(&envelope(sealed.bytes)).unwrap();
        assert!(again[0].installations.is_empty());

        first.enable_installation("a2").unwrap();
        assert!(first.installations().iter().all(|i| i.enabled));

        // A fresh codec seeded from storage knows the same installations.
        let reloaded = SignedEnvelopeCodec::new(
            Identity::from_secret_bytes(&secret),
            "a1",
            Arc::new(ManualTimeSource::new(5)),
        );
        reloaded.load_installations(first.installations());
        reloaded.disable_installation("a2").unwrap();

        // Our own echo decodes to nothing.
        let echo = first.seal(PayloadType::PairInstallation, b"x").unwrap();
        assert!(first.decode(&envelope(echo.bytes)).unwrap().is_empty());
    }
}
