//! Per-recipient sealing of identity images.
//!
//! One random content key per publication encrypts every image. The content
//! key is then wrapped once per recipient with a key derived from X25519
//! between our identity and theirs, and the wrapped blobs are attached to
//! each image. A receiver tries every blob with the key it shares with the
//! sender; blobs addressed to someone else fail authentication and are
//! skipped.

use tracing::debug;

use parley_shared::constants::KDF_CONTEXT_IDENTITY_IMAGE_KEY;
use parley_shared::crypto::{self, SymmetricKey};
use parley_shared::protocol::IdentityImage;
use parley_shared::{CryptoError, Identity, UserId};

use crate::error::CoreError;

/// Seal `images` in place for `recipients`.
pub fn encrypt_identity_images(
    identity: &Identity,
    images: &mut [IdentityImage],
    recipients: &[UserId],
) -> Result<(), CoreError> {
    let content_key = crypto::generate_symmetric_key();

    let mut wrapped_keys = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        let pair_key = identity.shared_key(recipient, KDF_CONTEXT_IDENTITY_IMAGE_KEY)?;
        wrapped_keys.push(crypto::encrypt(&pair_key, &content_key)?);
    }

    for image in images.iter_mut() {
        image.payload = crypto::encrypt(&content_key, &image.payload)?;
        image.encrypted = true;
        image.encryption_keys = wrapped_keys.clone();
    }
    Ok(())
}

/// Open every sealed image in `images` that carries a key for us.
///
/// Images without a matching blob stay `encrypted`; that is not an error.
pub fn decrypt_identity_images(
    identity: &Identity,
    sender: &UserId,
    images: &mut [IdentityImage],
) -> Result<(), CoreError> {
    if !images.iter().any(|image| image.encrypted) {
        return Ok(());
    }
    let pair_key = identity.shared_key(sender, KDF_CONTEXT_IDENTITY_IMAGE_KEY)?;

    for image in images.iter_mut().filter(|image| image.encrypted) {
        let Some(content_key) = unwrap_content_key(&pair_key, &image.encryption_keys)? else {
            debug!(image = %image.name, "No wrapped key addressed to us");
            continue;
        };
        image.payload = crypto::decrypt(&content_key, &image.payload)?;
        image.encrypted = false;
        image.encryption_keys.clear();
    }
    Ok(())
}

fn unwrap_content_key(
    pair_key: &SymmetricKey,
    blobs: &[Vec<u8>],
) -> Result<Option<SymmetricKey>, CoreError> {
    for blob in blobs {
        match crypto::decrypt(pair_key, blob) {
            Ok(bytes) => return Ok(Some(crypto::symmetric_key_from_slice(&bytes)?)),
            Err(CryptoError::DecryptionFailed) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str, payload: &[u8]) -> IdentityImage {
        IdentityImage::plain(name, payload.to_vec(), 3)
    }

    #[test]
    fn test_any_recipient_recovers_plaintext() {
        let sender = Identity::generate();
        let recipients: Vec<Identity> = (0..4).map(|_| Identity::generate()).collect();
        let keys: Vec<UserId> = recipients.iter().map(Identity::user_id).collect();

        let mut images = vec![image("thumbnail", b"small"), image("large", b"big picture")];
        encrypt_identity_images(&sender, &mut images, &keys).unwrap();
        assert!(images.iter().all(|i| i.encrypted && i.encryption_keys.len() == 4));
        assert_ne!(images[0].payload, b"small");

        for recipient in &recipients {
            let mut received = images.clone();
            decrypt_identity_images(recipient, &sender.user_id(), &mut received).unwrap();
            assert!(!received[0].encrypted);
            assert_eq!(received[0].payload, b"small");
            assert_eq!(received[1].payload, b"big picture");
            assert!(received[1].encryption_keys.is_empty());
        }
    }

    #[test]
    fn test_outsider_leaves_images_sealed_without_error() {
        let sender = Identity::generate();
        let friend = Identity::generate();
        let outsider = Identity::generate();

        let mut images = vec![image("thumbnail", b"small")];
        encrypt_identity_images(&sender, &mut images, &[friend.user_id()]).unwrap();

        let mut received = images.clone();
        decrypt_identity_images(&outsider, &sender.user_id(), &mut received).unwrap();
        assert!(received[0].encrypted);
        assert_eq!(received, images);
    }

    #[test]
    fn test_no_recipients_means_no_keys() {
        let sender = Identity::generate();
        let mut images = vec![image("thumbnail", b"small")];
        encrypt_identity_images(&sender, &mut images, &[]).unwrap();
        assert!(images[0].encrypted);
        assert!(images[0].encryption_keys.is_empty());
    }

    #[test]
    fn test_plain_images_pass_through() {
        let me = Identity::generate();
        let mut images = vec![image("thumbnail", b"small")];
        decrypt_identity_images(&me, &Identity::generate().user_id(), &mut images).unwrap();
        assert_eq!(images[0].payload, b"small");
    }
}
