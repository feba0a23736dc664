use rusqlite::{params, OptionalExtension};

use parley_shared::protocol::ContentType;

use crate::columns::{clock, conversion_error, get_bool, get_clock};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Message, PendingDelete, PendingEdit};

const MESSAGE_COLUMNS: &str = "id, chat_id, source, clock, timestamp, whisper_timestamp,
     content_type, text, response_to, seen, deleted, edited_at, outgoing";

impl Database {
    pub fn save_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO user_messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                message.id,
                message.chat_id,
                message.from,
                clock(message.clock),
                clock(message.timestamp),
                clock(message.whisper_timestamp),
                message.content_type.as_i64(),
                message.text,
                message.response_to,
                message.seen,
                message.deleted,
                clock(message.edited_at),
                message.outgoing,
            ],
        )?;
        Ok(())
    }

    pub fn message_by_id(&self, id: &str) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM user_messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .map_err(not_found)
    }

    pub fn message_exists(&self, id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM user_messages WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn messages_for_chat(&self, chat_id: &str, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM user_messages
             WHERE chat_id = ?1
             ORDER BY clock DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![chat_id, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Newest non-deleted message of a chat, used after the current last
    /// message gets deleted.
    pub fn latest_message_for_chat(&self, chat_id: &str) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM user_messages
                     WHERE chat_id = ?1 AND deleted = 0
                     ORDER BY clock DESC
                     LIMIT 1"
                ),
                params![chat_id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Mark every message up to `clock` as seen. Returns the number updated.
    pub fn mark_all_read(&self, chat_id: &str, up_to_clock: u64) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE user_messages SET seen = 1 WHERE chat_id = ?1 AND clock <= ?2 AND seen = 0",
            params![chat_id, clock(up_to_clock)],
        )?;
        Ok(affected)
    }

    /// Drop every message of `chat_id` with a clock at or below `up_to_clock`.
    pub fn clear_history(&self, chat_id: &str, up_to_clock: u64) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM user_messages WHERE chat_id = ?1 AND clock <= ?2",
            params![chat_id, clock(up_to_clock)],
        )?;
        Ok(affected)
    }

    // -- pending edits / deletes --------------------------------------------

    pub fn save_pending_edit(&self, edit: &PendingEdit) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO pending_edits (message_id, clock, chat_id, source, text)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                edit.message_id,
                clock(edit.clock),
                edit.chat_id,
                edit.from,
                edit.text,
            ],
        )?;
        Ok(())
    }

    /// Pending edits for a message, newest first.
    pub fn pending_edits_for(&self, message_id: &str) -> Result<Vec<PendingEdit>> {
        let mut stmt = self.conn().prepare(
            "SELECT message_id, clock, chat_id, source, text FROM pending_edits
             WHERE message_id = ?1 ORDER BY clock DESC",
        )?;
        let rows = stmt.query_map(params![message_id], |row| {
            Ok(PendingEdit {
                message_id: row.get(0)?,
                clock: get_clock(row, 1)?,
                chat_id: row.get(2)?,
                from: row.get(3)?,
                text: row.get(4)?,
            })
        })?;

        let mut edits = Vec::new();
        for row in rows {
            edits.push(row?);
        }
        Ok(edits)
    }

    pub fn delete_pending_edits(&self, message_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM pending_edits WHERE message_id = ?1",
            params![message_id],
        )?;
        Ok(())
    }

    pub fn save_pending_delete(&self, delete: &PendingDelete) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO pending_deletes (message_id, chat_id, source, clock)
             VALUES (?1, ?2, ?3, ?4)",
            params![delete.message_id, delete.chat_id, delete.from, clock(delete.clock)],
        )?;
        Ok(())
    }

    pub fn pending_delete_for(&self, message_id: &str) -> Result<Option<PendingDelete>> {
        let delete = self
            .conn()
            .query_row(
                "SELECT message_id, chat_id, source, clock FROM pending_deletes
                 WHERE message_id = ?1",
                params![message_id],
                |row| {
                    Ok(PendingDelete {
                        message_id: row.get(0)?,
                        chat_id: row.get(1)?,
                        from: row.get(2)?,
                        clock: get_clock(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(delete)
    }

    pub fn delete_pending_delete(&self, message_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM pending_deletes WHERE message_id = ?1",
            params![message_id],
        )?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let content_raw: i64 = row.get(6)?;
    let content_type = ContentType::from_i64(content_raw)
        .ok_or_else(|| conversion_error(6, format!("unknown content type {content_raw}")))?;

    Ok(Message {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        from: row.get(2)?,
        clock: get_clock(row, 3)?,
        timestamp: get_clock(row, 4)?,
        whisper_timestamp: get_clock(row, 5)?,
        content_type,
        text: row.get(7)?,
        response_to: row.get(8)?,
        seen: get_bool(row, 9)?,
        deleted: get_bool(row, 10)?,
        edited_at: get_clock(row, 11)?,
        outgoing: get_bool(row, 12)?,
    })
}
