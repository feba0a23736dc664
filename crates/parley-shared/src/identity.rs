use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::crypto::{derive_key, SymmetricKey};
use crate::error::IdentityError;
use crate::types::UserId;

/// A user's cryptographic identity based on Ed25519.
/// The public key serves as the user ID and is shared by every paired
/// installation of the same account.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

/// Serializable format for storing/exporting identity
#[derive(Serialize, Deserialize)]
pub struct IdentityExport {
    pub secret_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Restore identity from secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    pub fn from_export(export: &IdentityExport) -> Self {
        Self::from_secret_bytes(&export.secret_key)
    }

    /// Get the user ID (public key)
    pub fn user_id(&self) -> UserId {
        UserId(self.signing_key.verifying_key().to_bytes())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn to_export(&self) -> IdentityExport {
        IdentityExport {
            secret_key: *self.signing_key.as_bytes(),
            public_key: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// X25519 Diffie-Hellman between this identity and `peer`, both keys
    /// mapped from their Edwards form. The raw shared secret is run through
    /// the BLAKE3 KDF under `context` before use.
    pub fn shared_key(&self, peer: &UserId, context: &str) -> Result<SymmetricKey, IdentityError> {
        let peer_key = VerifyingKey::from_bytes(&peer.0).map_err(|_| IdentityError::InvalidKeyBytes)?;
        let secret = StaticSecret::from(self.signing_key.to_scalar_bytes());
        let public = X25519Public::from(peer_key.to_montgomery().to_bytes());
        let shared = secret.diffie_hellman(&public);
        Ok(derive_key(context, shared.as_bytes()))
    }
}

/// Verify a signature against a public key
pub fn verify_signature(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), IdentityError> {
    let verifying_key =
        VerifyingKey::from_bytes(pubkey_bytes).map_err(|_| IdentityError::InvalidKeyBytes)?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| IdentityError::InvalidSignature)
}

/// Verify a detached signature carried as raw bytes.
pub fn verify_signature_bytes(
    pubkey_bytes: &[u8; 32],
    message: &[u8],
    signature: &[u8],
) -> Result<(), IdentityError> {
    let signature =
        Signature::from_slice(signature).map_err(|_| IdentityError::InvalidSignature)?;
    verify_signature(pubkey_bytes, message, &signature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::KDF_CONTEXT_IDENTITY_IMAGE_KEY;

    #[test]
    fn test_identity_roundtrip() {
        let id = Identity::generate();
        let export = id.to_export();
        let restored = Identity::from_export(&export);
        assert_eq!(id.user_id(), restored.user_id());
    }

    #[test]
    fn test_sign_verify() {
        let id = Identity::generate();
        let message = b"Hello, Parley!";
        let signature = id.sign(message);

        assert!(verify_signature(&id.public_key_bytes(), message, &signature).is_ok());
        assert!(verify_signature(&id.public_key_bytes(), b"wrong", &signature).is_err());
        assert!(
            verify_signature_bytes(&id.public_key_bytes(), message, &signature.to_bytes()).is_ok()
        );
    }

    #[test]
    fn test_shared_key_is_symmetric() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let carol = Identity::generate();

        let ab = alice
            .shared_key(&bob.user_id(), KDF_CONTEXT_IDENTITY_IMAGE_KEY)
            .unwrap();
        let ba = bob
            .shared_key(&alice.user_id(), KDF_CONTEXT_IDENTITY_IMAGE_KEY)
            .unwrap();
        let ac = alice
            .shared_key(&carol.user_id(), KDF_CONTEXT_IDENTITY_IMAGE_KEY)
            .unwrap();

        assert_eq!(ab, ba);
        assert_ne!(ab, ac);
    }

    #[test]
    fn test_shared_key_depends_on_context() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let k1 = alice.shared_key(&bob.user_id(), "ctx-a").unwrap();
        let k2 = alice.shared_key(&bob.user_id(), "ctx-b").unwrap();
        assert_ne!(k1, k2);
    }
}
