use rusqlite::params;

use crate::columns::{clock, get_bool, get_clock, get_json, to_json};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::Contact;

const CONTACT_COLUMNS: &str = "id, display_name, ens_name, ens_verified, local_nickname, bio,
     last_updated, last_updated_locally, identity_clock, added, blocked, removed,
     has_added_us, verification_status, trust_status, images";

impl Database {
    pub fn save_contact(&self, contact: &Contact) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO contacts ({CONTACT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            params![
                contact.id,
                contact.display_name,
                contact.ens_name,
                contact.ens_verified,
                contact.local_nickname,
                contact.bio,
                clock(contact.last_updated),
                clock(contact.last_updated_locally),
                clock(contact.identity_clock),
                contact.added,
                contact.blocked,
                contact.removed,
                contact.has_added_us,
                to_json(&contact.verification_status)?,
                to_json(&contact.trust_status)?,
                to_json(&contact.images)?,
            ],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, id: &str) -> Result<Contact> {
        self.conn()
            .query_row(
                &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
                params![id],
                row_to_contact,
            )
            .map_err(not_found)
    }

    pub fn list_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {CONTACT_COLUMNS} FROM contacts ORDER BY id ASC"))?;
        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        display_name: row.get(1)?,
        ens_name: row.get(2)?,
        ens_verified: get_bool(row, 3)?,
        local_nickname: row.get(4)?,
        bio: row.get(5)?,
        last_updated: get_clock(row, 6)?,
        last_updated_locally: get_clock(row, 7)?,
        identity_clock: get_clock(row, 8)?,
        added: get_bool(row, 9)?,
        blocked: get_bool(row, 10)?,
        removed: get_bool(row, 11)?,
        has_added_us: get_bool(row, 12)?,
        verification_status: get_json(row, 13)?,
        trust_status: get_json(row, 14)?,
        images: get_json(row, 15)?,
    })
}
