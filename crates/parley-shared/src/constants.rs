/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric key size in bytes (for XChaCha20-Poly1305)
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Maximum encoded payload size in bytes (256 KiB)
pub const MAX_PAYLOAD_SIZE: usize = 262_144;

/// How far a chat message timestamp may run ahead of its transport timestamp.
pub const MAX_CLOCK_DRIFT_MS: u64 = 120_000;

/// Display name length bounds (in characters, after trimming)
pub const DISPLAY_NAME_MIN_CHARS: usize = 5;
pub const DISPLAY_NAME_MAX_CHARS: usize = 24;

/// Maximum bio length in characters
pub const BIO_MAX_CHARS: usize = 240;

/// Prefix of profile chat IDs (`@<hex key>`)
pub const PROFILE_CHAT_PREFIX: &str = "@";

/// Chat ID of the timeline feed
pub const TIMELINE_CHAT_ID: &str = "@timeline";

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_IDENTITY_IMAGE_KEY: &str = "parley-identity-image-key-v1";

/// Domain separation for deterministic entity IDs
pub const ID_CONTEXT_MESSAGE: &str = "parley-message-id-v1";
pub const ID_CONTEXT_PIN: &str = "parley-pin-id-v1";
pub const ID_CONTEXT_REACTION: &str = "parley-reaction-id-v1";
