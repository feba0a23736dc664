//! Identity key persistence.
//!
//! The secret key is stored hex-encoded in a single file next to the
//! database. A missing file means a fresh identity is generated and saved.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context};
use tracing::info;

use parley_shared::Identity;

pub const KEY_FILE: &str = "identity.key";

/// Load the identity stored at `path`, or create and store a new one.
pub fn load_or_create(path: &Path) -> anyhow::Result<Identity> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading identity key {}", path.display()))?;
        let bytes = hex::decode(text.trim()).context("identity key is not valid hex")?;
        let Ok(secret) = <[u8; 32]>::try_from(bytes.as_slice()) else {
            bail!("identity key must be 32 bytes, found {}", bytes.len());
        };
        let identity = Identity::from_secret_bytes(&secret);
        info!(user = %identity.user_id().short(), "Loaded identity");
        return Ok(identity);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let identity = Identity::generate();
    fs::write(path, hex::encode(identity.secret_bytes()))
        .with_context(|| format!("writing identity key {}", path.display()))?;
    info!(user = %identity.user_id().short(), path = %path.display(), "Generated new identity");
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_key_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KEY_FILE);

        let first = load_or_create(&path).unwrap();
        let second = load_or_create(&path).unwrap();
        assert_eq!(first.user_id(), second.user_id());
    }

    #[test]
    fn test_malformed_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KEY_FILE);

        fs::write(&path, "not hex").unwrap();
        assert!(load_or_create(&path).is_err());
        fs::write(&path, "abcd").unwrap();
        assert!(load_or_create(&path).is_err());
    }
}
