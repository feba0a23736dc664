//! Account settings and our own identity images.
//!
//! Synced settings are stored as JSON values next to the clock of their last
//! change, so incoming sync payloads can be gated per field. Keys that are
//! not a [`SettingField`] hold node-local values and are never synced.

use rusqlite::{params, OptionalExtension};

use parley_shared::protocol::{IdentityImage, SettingField, SettingValue};

use crate::columns::{clock, get_clock, get_json, to_json};
use crate::database::Database;
use crate::error::Result;

/// A stored setting together with the clock of its last change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSetting {
    pub field: SettingField,
    pub value: SettingValue,
    pub clock: u64,
}

impl Database {
    pub fn get_setting(&self, field: SettingField) -> Result<Option<StoredSetting>> {
        let row = self
            .conn()
            .query_row(
                "SELECT value, clock FROM settings WHERE key = ?1",
                params![field.key()],
                |row| Ok((get_json::<SettingValue>(row, 0)?, get_clock(row, 1)?)),
            )
            .optional()?;
        Ok(row.map(|(value, clock)| StoredSetting {
            field,
            value,
            clock,
        }))
    }

    pub fn set_setting(&self, field: SettingField, value: &SettingValue, at: u64) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO settings (key, value, clock) VALUES (?1, ?2, ?3)",
            params![field.key(), to_json(value)?, clock(at)],
        )?;
        Ok(())
    }

    pub fn all_settings(&self) -> Result<Vec<StoredSetting>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT key, value, clock FROM settings ORDER BY key ASC")?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            Ok((key, get_json::<serde_json::Value>(row, 1)?, get_clock(row, 2)?))
        })?;

        let mut settings = Vec::new();
        for row in rows {
            let (key, raw, clock) = row?;
            let Some(field) = SettingField::from_key(&key) else {
                continue;
            };
            let value: SettingValue = serde_json::from_value(raw)?;
            settings.push(StoredSetting {
                field,
                value,
                clock,
            });
        }
        Ok(settings)
    }

    /// Read a node-local string value.
    pub fn get_local_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| get_json::<String>(row, 0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_local_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO settings (key, value, clock) VALUES (?1, ?2, 0)",
            params![key, to_json(&value)?],
        )?;
        Ok(())
    }

    // -- own identity images ------------------------------------------------

    pub fn save_identity_image(&self, image: &IdentityImage) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO identity_images (name, payload, clock) VALUES (?1, ?2, ?3)",
            params![image.name, image.payload, clock(image.clock)],
        )?;
        Ok(())
    }

    pub fn identity_images(&self) -> Result<Vec<IdentityImage>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT name, payload, clock FROM identity_images ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(IdentityImage::plain(
                row.get::<_, String>(0)?,
                row.get(1)?,
                get_clock(row, 2)?,
            ))
        })?;

        let mut images = Vec::new();
        for row in rows {
            images.push(row?);
        }
        Ok(images)
    }
}
