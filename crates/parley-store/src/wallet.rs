//! Wallet accounts, balances, keycards and saved addresses.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::protocol::{Keycard, SavedAddress, WalletAccount};

use crate::columns::{clock, get_bool, get_clock, get_json, to_json};
use crate::database::Database;
use crate::error::Result;
use crate::models::WalletBalance;

impl Database {
    pub fn save_wallet_account(&self, account: &WalletAccount) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO wallet_accounts
                 (address, name, color, kind, path, public_key, hidden, removed, clock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                account.address,
                account.name,
                account.color,
                account.kind,
                account.path,
                account.public_key,
                account.hidden,
                account.removed,
                clock(account.clock),
            ],
        )?;
        Ok(())
    }

    pub fn wallet_account(&self, address: &str) -> Result<Option<WalletAccount>> {
        let account = self
            .conn()
            .query_row(
                "SELECT address, name, color, kind, path, public_key, hidden, removed, clock
                 FROM wallet_accounts WHERE address = ?1",
                params![address],
                row_to_account,
            )
            .optional()?;
        Ok(account)
    }

    /// All accounts, including removed ones (they are synced as tombstones).
    pub fn wallet_accounts(&self) -> Result<Vec<WalletAccount>> {
        let mut stmt = self.conn().prepare(
            "SELECT address, name, color, kind, path, public_key, hidden, removed, clock
             FROM wallet_accounts ORDER BY address ASC",
        )?;
        let rows = stmt.query_map([], row_to_account)?;

        let mut accounts = Vec::new();
        for row in rows {
            accounts.push(row?);
        }
        Ok(accounts)
    }

    pub fn save_wallet_balance(&self, address: &str, balance: &str, at: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO wallet_balances (address, balance, updated_at)
             VALUES (?1, ?2, ?3)",
            params![address, balance, at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn wallet_balance(&self, address: &str) -> Result<Option<WalletBalance>> {
        let row = self
            .conn()
            .query_row(
                "SELECT address, balance, updated_at FROM wallet_balances WHERE address = ?1",
                params![address],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((address, balance, ts)) => {
                let updated_at = DateTime::parse_from_rfc3339(&ts)?.with_timezone(&Utc);
                Ok(Some(WalletBalance {
                    address,
                    balance,
                    updated_at,
                }))
            }
            None => Ok(None),
        }
    }

    // -- keycards -----------------------------------------------------------

    pub fn save_keycard(&self, keycard: &Keycard) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO keycards
                 (keycard_uid, name, locked, key_uid, addresses, removed, clock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                keycard.keycard_uid,
                keycard.name,
                keycard.locked,
                keycard.key_uid,
                to_json(&keycard.addresses)?,
                keycard.removed,
                clock(keycard.clock),
            ],
        )?;
        Ok(())
    }

    pub fn keycard(&self, keycard_uid: &str) -> Result<Option<Keycard>> {
        let keycard = self
            .conn()
            .query_row(
                "SELECT keycard_uid, name, locked, key_uid, addresses, removed, clock
                 FROM keycards WHERE keycard_uid = ?1",
                params![keycard_uid],
                row_to_keycard,
            )
            .optional()?;
        Ok(keycard)
    }

    pub fn keycards(&self) -> Result<Vec<Keycard>> {
        let mut stmt = self.conn().prepare(
            "SELECT keycard_uid, name, locked, key_uid, addresses, removed, clock
             FROM keycards ORDER BY keycard_uid ASC",
        )?;
        let rows = stmt.query_map([], row_to_keycard)?;

        let mut keycards = Vec::new();
        for row in rows {
            keycards.push(row?);
        }
        Ok(keycards)
    }

    // -- saved addresses ----------------------------------------------------

    pub fn save_saved_address(&self, saved: &SavedAddress) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO saved_addresses (address, name, favourite, removed, update_clock)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                saved.address,
                saved.name,
                saved.favourite,
                saved.removed,
                clock(saved.update_clock),
            ],
        )?;
        Ok(())
    }

    pub fn saved_address(&self, address: &str) -> Result<Option<SavedAddress>> {
        let saved = self
            .conn()
            .query_row(
                "SELECT address, name, favourite, removed, update_clock
                 FROM saved_addresses WHERE address = ?1",
                params![address],
                row_to_saved_address,
            )
            .optional()?;
        Ok(saved)
    }

    pub fn saved_addresses(&self) -> Result<Vec<SavedAddress>> {
        let mut stmt = self.conn().prepare(
            "SELECT address, name, favourite, removed, update_clock
             FROM saved_addresses ORDER BY address ASC",
        )?;
        let rows = stmt.query_map([], row_to_saved_address)?;

        let mut saved = Vec::new();
        for row in rows {
            saved.push(row?);
        }
        Ok(saved)
    }
}

fn row_to_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<WalletAccount> {
    Ok(WalletAccount {
        address: row.get(0)?,
        name: row.get(1)?,
        color: row.get(2)?,
        kind: row.get(3)?,
        path: row.get(4)?,
        public_key: row.get(5)?,
        hidden: get_bool(row, 6)?,
        removed: get_bool(row, 7)?,
        clock: get_clock(row, 8)?,
    })
}

fn row_to_keycard(row: &rusqlite::Row<'_>) -> rusqlite::Result<Keycard> {
    Ok(Keycard {
        keycard_uid: row.get(0)?,
        name: row.get(1)?,
        locked: get_bool(row, 2)?,
        key_uid: row.get(3)?,
        addresses: get_json(row, 4)?,
        removed: get_bool(row, 5)?,
        clock: get_clock(row, 6)?,
    })
}

fn row_to_saved_address(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedAddress> {
    Ok(SavedAddress {
        address: row.get(0)?,
        name: row.get(1)?,
        favourite: get_bool(row, 2)?,
        removed: get_bool(row, 3)?,
        update_clock: get_clock(row, 4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_and_balance() {
        let db = Database::open_in_memory().unwrap();
        let account = WalletAccount {
            address: "0xabc".into(),
            name: "main".into(),
            color: "#ff0000".into(),
            kind: "generated".into(),
            path: "m/44'/60'/0'/0/0".into(),
            public_key: "04ff".into(),
            hidden: false,
            removed: false,
            clock: 5,
        };
        db.save_wallet_account(&account).unwrap();
        assert_eq!(db.wallet_account("0xabc").unwrap(), Some(account));

        let now = Utc::now();
        db.save_wallet_balance("0xabc", "1000", now).unwrap();
        let balance = db.wallet_balance("0xabc").unwrap().unwrap();
        assert_eq!(balance.balance, "1000");
        assert_eq!(balance.updated_at.timestamp(), now.timestamp());
    }

    #[test]
    fn test_keycards_and_saved_addresses_list() {
        let db = Database::open_in_memory().unwrap();
        db.save_keycard(&Keycard {
            keycard_uid: "kc-1".into(),
            name: "backup card".into(),
            locked: false,
            key_uid: "key-1".into(),
            addresses: vec!["0xabc".into()],
            removed: false,
            clock: 1,
        })
        .unwrap();
        db.save_saved_address(&SavedAddress {
            address: "0xdef".into(),
            name: "alice".into(),
            favourite: true,
            removed: false,
            update_clock: 3,
        })
        .unwrap();

        assert_eq!(db.keycards().unwrap()[0].addresses, vec!["0xabc".to_string()]);
        assert!(db.saved_address("0xdef").unwrap().unwrap().favourite);
        assert_eq!(db.saved_addresses().unwrap().len(), 1);
    }
}
