use rusqlite::params;

use crate::columns::{clock, conversion_error, get_bool, get_clock, get_json, to_json};
use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{Chat, ChatType};

const CHAT_COLUMNS: &str = "id, name, chat_type, active, timestamp, last_clock_value,
     deleted_at_clock_value, read_messages_at_clock_value, joined,
     unviewed_messages_count, muted, last_message, members, membership_updates";

impl Database {
    /// Insert or fully replace a chat row.
    pub fn save_chat(&self, chat: &Chat) -> Result<()> {
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO chats ({CHAT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                chat.id,
                chat.name,
                chat.chat_type.as_i64(),
                chat.active,
                clock(chat.timestamp),
                clock(chat.last_clock_value),
                clock(chat.deleted_at_clock_value),
                clock(chat.read_messages_at_clock_value),
                clock(chat.joined),
                chat.unviewed_messages_count,
                chat.muted,
                to_json(&chat.last_message)?,
                to_json(&chat.members)?,
                to_json(&chat.membership_updates)?,
            ],
        )?;
        Ok(())
    }

    pub fn save_chats(&self, chats: &[Chat]) -> Result<()> {
        for chat in chats {
            self.save_chat(chat)?;
        }
        Ok(())
    }

    pub fn get_chat(&self, id: &str) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id],
                row_to_chat,
            )
            .map_err(not_found)
    }

    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("SELECT {CHAT_COLUMNS} FROM chats ORDER BY timestamp ASC"))?;
        let rows = stmt.query_map([], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }
        Ok(chats)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let chat_type_raw: i64 = row.get(2)?;
    let chat_type = ChatType::from_i64(chat_type_raw)
        .ok_or_else(|| conversion_error(2, format!("unknown chat type {chat_type_raw}")))?;

    Ok(Chat {
        id: row.get(0)?,
        name: row.get(1)?,
        chat_type,
        active: get_bool(row, 3)?,
        timestamp: get_clock(row, 4)?,
        last_clock_value: get_clock(row, 5)?,
        deleted_at_clock_value: get_clock(row, 6)?,
        read_messages_at_clock_value: get_clock(row, 7)?,
        joined: get_clock(row, 8)?,
        unviewed_messages_count: row.get(9)?,
        muted: get_bool(row, 10)?,
        last_message: get_json(row, 11)?,
        members: get_json(row, 12)?,
        membership_updates: get_json(row, 13)?,
    })
}
