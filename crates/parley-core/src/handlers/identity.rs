//! Identity publications received on a contact's profile topic.

use tracing::debug;

use parley_shared::protocol::ChatIdentity;

use super::validate;
use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::sealer::decrypt_identity_images;
use crate::state::ReceivedMessageState;

impl Messenger {
    /// Bio is gated by the contact's identity clock, each image by its own
    /// clock. Images we hold no key for are dropped.
    pub(super) fn handle_chat_identity(
        &self,
        state: &mut ReceivedMessageState<'_>,
        identity: ChatIdentity,
    ) -> Result<(), CoreError> {
        let current = state.current()?.clone();
        if self.is_me(&current.sender_hex) {
            return Ok(());
        }
        let profile_chat = state.chat(&current.sender.profile_chat_id());
        self.is_message_allowed_from(state, &current.sender_hex, profile_chat.as_ref())?;
        validate::bio(&identity.description)?;

        let mut contact = state.contact_or_new(&current.sender);
        let mut changed = false;

        if identity.clock > contact.identity_clock {
            contact.bio = identity.description;
            contact.identity_clock = identity.clock;
            changed = true;
        }

        let mut images = identity.images;
        decrypt_identity_images(self.identity(), &current.sender, &mut images)?;
        for mut image in images {
            if image.encrypted {
                debug!(contact = %current.sender.short(), image = %image.name, "Dropping image not sealed for us");
                continue;
            }
            let newer = contact
                .images
                .get(&image.name)
                .map_or(true, |old| image.clock > old.clock);
            if newer {
                image.encryption_keys.clear();
                contact.images.insert(image.name.clone(), image);
                changed = true;
            }
        }

        if changed {
            debug!(contact = %current.sender.short(), clock = contact.identity_clock, "Identity applied");
            state.put_contact(contact);
        }
        Ok(())
    }
}
