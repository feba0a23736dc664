//! # parley-shared
//!
//! Types shared by every Parley crate: identifiers, the Ed25519 identity,
//! symmetric crypto helpers, group membership events and the closed set of
//! typed payloads exchanged between peers and paired installations.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod membership;
pub mod protocol;
pub mod types;

pub use error::{CryptoError, IdentityError, ProtocolError};
pub use identity::Identity;
pub use types::UserId;
