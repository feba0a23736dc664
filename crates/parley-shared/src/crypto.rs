use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use crate::constants::{NONCE_SIZE, SYMMETRIC_KEY_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

/// Decrypt `nonce || ciphertext`. An authentication failure and a truncated
/// input both surface as [`CryptoError::DecryptionFailed`].
pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

pub fn symmetric_key_from_slice(bytes: &[u8]) -> Result<SymmetricKey, CryptoError> {
    if bytes.len() != SYMMETRIC_KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: SYMMETRIC_KEY_SIZE,
            got: bytes.len(),
        });
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(bytes);
    Ok(key)
}

// BLAKE3 KDF with domain separation
pub fn derive_key(context: &str, material: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(material);
    let hash = hasher.finalize();
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash.as_bytes()[..32]);
    key
}

/// Deterministic hex ID over a sequence of length-prefixed parts.
pub fn derive_id(context: &str, parts: &[&[u8]]) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_symmetric_key();
        let plaintext = b"meet at the usual place";

        let encrypted = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &encrypted).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = generate_symmetric_key();
        let key2 = generate_symmetric_key();

        let encrypted = encrypt(&key1, b"secret").unwrap();
        assert!(matches!(
            decrypt(&key2, &encrypted),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_truncated_input_fails() {
        let key = generate_symmetric_key();
        assert!(decrypt(&key, &[0u8; 5]).is_err());
    }

    #[test]
    fn test_derive_id_is_length_prefixed() {
        // ("ab", "c") and ("a", "bc") must not collide.
        let a = derive_id("ctx", &[b"ab", b"c"]);
        let b = derive_id("ctx", &[b"a", b"bc"]);
        assert_ne!(a, b);
        assert_eq!(a, derive_id("ctx", &[b"ab", b"c"]));
    }

    #[test]
    fn test_symmetric_key_from_slice_length() {
        assert!(symmetric_key_from_slice(&[1u8; 31]).is_err());
        assert_eq!(symmetric_key_from_slice(&[1u8; 32]).unwrap(), [1u8; 32]);
    }
}
