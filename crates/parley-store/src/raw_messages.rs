use rusqlite::params;

use parley_shared::protocol::PayloadType;

use crate::columns::{clock, conversion_error, get_bool, get_clock, get_json, to_json};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{RawMessage, ResendPolicy};

const RAW_COLUMNS: &str = "id, local_chat_id, payload, payload_type, recipients, resend,
     send_count, sent, last_sent, skip_group_message_wrap";

impl Database {
    pub fn save_raw_message(&self, raw: &RawMessage) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO raw_messages ({RAW_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                raw.id,
                raw.local_chat_id,
                raw.payload,
                raw.payload_type.as_u16(),
                to_json(&raw.recipients)?,
                raw.resend.as_i64(),
                raw.send_count,
                raw.sent,
                clock(raw.last_sent),
                raw.skip_group_message_wrap,
            ],
        )?;
        Ok(())
    }

    pub fn raw_message_by_id(&self, id: &str) -> Result<RawMessage> {
        self.conn()
            .query_row(
                &format!("SELECT {RAW_COLUMNS} FROM raw_messages WHERE id = ?1"),
                params![id],
                row_to_raw_message,
            )
            .map_err(not_found)
    }

    /// IDs of unsent, automatically resent envelopes that have not yet used
    /// up `max_send_count` attempts.
    pub fn expired_message_ids(&self, max_send_count: u32) -> Result<Vec<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM raw_messages
             WHERE resend = ?1 AND sent = 0 AND send_count <= ?2
             ORDER BY last_sent ASC",
        )?;
        let rows = stmt.query_map(
            params![ResendPolicy::Automatic.as_i64(), max_send_count],
            |row| row.get::<_, String>(0),
        )?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub fn mark_raw_message_sent(&self, id: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE raw_messages SET sent = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_raw_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessage> {
    let tag: u16 = row.get(3)?;
    let payload_type = PayloadType::from_u16(tag)
        .ok_or_else(|| conversion_error(3, format!("unknown payload type {tag}")))?;
    let resend: i64 = row.get(5)?;

    Ok(RawMessage {
        id: row.get(0)?,
        local_chat_id: row.get(1)?,
        payload: row.get(2)?,
        payload_type,
        recipients: get_json(row, 4)?,
        resend: ResendPolicy::from_i64(resend),
        send_count: row.get(6)?,
        sent: get_bool(row, 7)?,
        last_sent: get_clock(row, 8)?,
        skip_group_message_wrap: get_bool(row, 9)?,
    })
}
