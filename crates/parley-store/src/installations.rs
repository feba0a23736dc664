use rusqlite::params;

use crate::columns::{clock, get_bool, get_clock};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Installation, InstallationMetadata};

impl Database {
    pub fn save_installation(&self, installation: &Installation) -> Result<()> {
        let (name, device_type) = match &installation.metadata {
            Some(meta) => (Some(meta.name.as_str()), Some(meta.device_type.as_str())),
            None => (None, None),
        };
        self.conn().execute(
            "INSERT OR REPLACE INTO installations
                 (identity, id, version, enabled, timestamp, name, device_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                installation.identity,
                installation.id,
                installation.version,
                installation.enabled,
                clock(installation.timestamp),
                name,
                device_type,
            ],
        )?;
        Ok(())
    }

    pub fn get_installation(&self, identity: &str, id: &str) -> Result<Installation> {
        self.conn()
            .query_row(
                "SELECT identity, id, version, enabled, timestamp, name, device_type
                 FROM installations WHERE identity = ?1 AND id = ?2",
                params![identity, id],
                row_to_installation,
            )
            .map_err(not_found)
    }

    pub fn installations_for(&self, identity: &str) -> Result<Vec<Installation>> {
        let mut stmt = self.conn().prepare(
            "SELECT identity, id, version, enabled, timestamp, name, device_type
             FROM installations WHERE identity = ?1 ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![identity], row_to_installation)?;

        let mut installations = Vec::new();
        for row in rows {
            installations.push(row?);
        }
        Ok(installations)
    }
}

fn row_to_installation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Installation> {
    let name: Option<String> = row.get(5)?;
    let device_type: Option<String> = row.get(6)?;
    let metadata = match (name, device_type) {
        (None, None) => None,
        (name, device_type) => Some(InstallationMetadata {
            name: name.unwrap_or_default(),
            device_type: device_type.unwrap_or_default(),
        }),
    };

    Ok(Installation {
        identity: row.get(0)?,
        id: row.get(1)?,
        version: row.get(2)?,
        enabled: get_bool(row, 3)?,
        timestamp: get_clock(row, 4)?,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installations_are_scoped_by_identity() {
        let db = Database::open_in_memory().unwrap();
        let ours = Installation {
            id: "inst-a".into(),
            identity: "aa".into(),
            version: 1,
            enabled: true,
            timestamp: 1,
            metadata: Some(InstallationMetadata {
                name: "laptop".into(),
                device_type: "desktop".into(),
            }),
        };
        let theirs = Installation {
            identity: "bb".into(),
            metadata: None,
            ..ours.clone()
        };
        db.save_installation(&ours).unwrap();
        db.save_installation(&theirs).unwrap();

        assert_eq!(db.installations_for("aa").unwrap(), vec![ours.clone()]);
        assert_eq!(db.get_installation("bb", "inst-a").unwrap().metadata, None);
    }
}
