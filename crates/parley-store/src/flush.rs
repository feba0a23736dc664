//! Transactional write of everything one inbound pass touched.

use parley_shared::protocol::{
    IdentityImage, Keycard, SavedAddress, SettingField, SettingValue, WalletAccount,
};

use crate::database::Database;
use crate::error::Result;
use crate::models::{
    Chat, Contact, Installation, Message, PendingDelete, PendingEdit, PinRecord, ReactionRecord,
};

/// Rows to persist at the end of a pass. Either all of them land or none do.
#[derive(Debug, Default, Clone)]
pub struct StateFlush {
    pub chats: Vec<Chat>,
    pub contacts: Vec<Contact>,
    pub installations: Vec<Installation>,
    pub messages: Vec<Message>,
    pub pending_edits: Vec<PendingEdit>,
    pub pending_deletes: Vec<PendingDelete>,
    /// Message IDs whose pending edits/deletes were replayed.
    pub resolved_pending: Vec<String>,
    pub pins: Vec<PinRecord>,
    pub reactions: Vec<ReactionRecord>,
    pub settings: Vec<(SettingField, SettingValue, u64)>,
    pub identity_images: Vec<IdentityImage>,
    pub wallet_accounts: Vec<WalletAccount>,
    pub keycards: Vec<Keycard>,
    pub saved_addresses: Vec<SavedAddress>,
    /// `(chat_id, clock)`: mark messages up to clock as seen.
    pub read_markers: Vec<(String, u64)>,
    /// `(chat_id, clock)`: drop messages up to clock.
    pub cleared_histories: Vec<(String, u64)>,
}

impl StateFlush {
    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
            && self.contacts.is_empty()
            && self.installations.is_empty()
            && self.messages.is_empty()
            && self.pending_edits.is_empty()
            && self.pending_deletes.is_empty()
            && self.resolved_pending.is_empty()
            && self.pins.is_empty()
            && self.reactions.is_empty()
            && self.settings.is_empty()
            && self.identity_images.is_empty()
            && self.wallet_accounts.is_empty()
            && self.keycards.is_empty()
            && self.saved_addresses.is_empty()
            && self.read_markers.is_empty()
            && self.cleared_histories.is_empty()
    }
}

impl Database {
    /// Write a whole [`StateFlush`] inside one transaction. On error the
    /// transaction is dropped and rolled back.
    pub fn flush(&self, batch: &StateFlush) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let tx = self.conn().unchecked_transaction()?;

        for (chat_id, clock) in &batch.cleared_histories {
            self.clear_history(chat_id, *clock)?;
        }
        self.save_chats(&batch.chats)?;
        for contact in &batch.contacts {
            self.save_contact(contact)?;
        }
        for installation in &batch.installations {
            self.save_installation(installation)?;
        }
        for message in &batch.messages {
            self.save_message(message)?;
        }
        for message_id in &batch.resolved_pending {
            self.delete_pending_edits(message_id)?;
            self.delete_pending_delete(message_id)?;
        }
        for edit in &batch.pending_edits {
            self.save_pending_edit(edit)?;
        }
        for delete in &batch.pending_deletes {
            self.save_pending_delete(delete)?;
        }
        for pin in &batch.pins {
            self.save_pin(pin)?;
        }
        for reaction in &batch.reactions {
            self.save_reaction(reaction)?;
        }
        for (field, value, clock) in &batch.settings {
            self.set_setting(*field, value, *clock)?;
        }
        for image in &batch.identity_images {
            self.save_identity_image(image)?;
        }
        for account in &batch.wallet_accounts {
            self.save_wallet_account(account)?;
        }
        for keycard in &batch.keycards {
            self.save_keycard(keycard)?;
        }
        for saved in &batch.saved_addresses {
            self.save_saved_address(saved)?;
        }
        for (chat_id, clock) in &batch.read_markers {
            self.mark_all_read(chat_id, *clock)?;
        }

        tx.commit()?;

        tracing::debug!(
            chats = batch.chats.len(),
            contacts = batch.contacts.len(),
            messages = batch.messages.len(),
            "flushed inbound state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::UserId;

    #[test]
    fn test_flush_writes_everything() {
        let db = Database::open_in_memory().unwrap();
        let batch = StateFlush {
            chats: vec![Chat::new_public("status", 1)],
            contacts: vec![Contact::new(&UserId([9u8; 32]))],
            settings: vec![(SettingField::Currency, SettingValue::Text("eur".into()), 3)],
            ..Default::default()
        };
        db.flush(&batch).unwrap();

        assert_eq!(db.list_chats().unwrap().len(), 1);
        assert_eq!(db.list_contacts().unwrap().len(), 1);
        assert_eq!(db.get_setting(SettingField::Currency).unwrap().unwrap().clock, 3);
    }

    #[test]
    fn test_failed_flush_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        db.conn()
            .execute_batch(
                "CREATE TRIGGER reject_contacts BEFORE INSERT ON contacts
                 BEGIN SELECT RAISE(ABORT, 'nope'); END;",
            )
            .unwrap();

        let batch = StateFlush {
            chats: vec![Chat::new_public("status", 1)],
            contacts: vec![Contact::new(&UserId([9u8; 32]))],
            ..Default::default()
        };
        assert!(db.flush(&batch).is_err());
        assert!(db.list_chats().unwrap().is_empty());
    }
}
