//! Contact updates broadcast by the contacts themselves.

use tracing::debug;

use parley_shared::protocol::ContactUpdate;

use super::validate;
use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::state::ReceivedMessageState;

impl Messenger {
    /// A peer announces that it added us, with its current display name.
    /// Gated by the contact's remote clock.
    pub(super) fn handle_contact_update(
        &self,
        state: &mut ReceivedMessageState<'_>,
        update: ContactUpdate,
    ) -> Result<(), CoreError> {
        let current = state.current()?.clone();
        if self.is_me(&current.sender_hex) {
            return Ok(());
        }
        let own_chat = state.chat(&current.sender_hex);
        self.is_message_allowed_from(state, &current.sender_hex, own_chat.as_ref())?;

        let mut contact = state.contact_or_new(&current.sender);
        if update.clock <= contact.last_updated {
            debug!(contact = %current.sender.short(), clock = update.clock, "Ignoring stale contact update");
            return Ok(());
        }

        if !update.display_name.is_empty() {
            contact.display_name = validate::display_name(&update.display_name)?;
        }
        if contact.ens_name != update.ens_name {
            contact.ens_name = update.ens_name;
            contact.ens_verified = false;
        }
        contact.has_added_us = true;
        contact.last_updated = update.clock;

        debug!(contact = %current.sender.short(), clock = update.clock, "Contact update applied");
        state.put_contact(contact);
        Ok(())
    }
}
