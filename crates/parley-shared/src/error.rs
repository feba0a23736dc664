use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid public key bytes")]
    InvalidKeyBytes,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid hex key: {0}")]
    InvalidHex(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Payload encoding failed: {0}")]
    Encode(String),

    #[error("Payload decoding failed for type {tag}: {reason}")]
    Decode { tag: u16, reason: String },

    #[error("Payload too large: {0} bytes")]
    TooLarge(usize),
}
