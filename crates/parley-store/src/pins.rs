//! Pinned messages and emoji reactions. Both are keyed by deterministic IDs
//! so a re-delivered payload lands on the same row.

use rusqlite::{params, OptionalExtension};

use parley_shared::protocol::EmojiKind;

use crate::columns::{clock, conversion_error, get_bool, get_clock};
use crate::database::Database;
use crate::error::Result;
use crate::models::{PinRecord, ReactionRecord};

impl Database {
    pub fn save_pin(&self, pin: &PinRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO pin_messages (id, message_id, chat_id, pinned_by, pinned, clock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                pin.id,
                pin.message_id,
                pin.chat_id,
                pin.pinned_by,
                pin.pinned,
                clock(pin.clock),
            ],
        )?;
        Ok(())
    }

    pub fn pin_by_id(&self, id: &str) -> Result<Option<PinRecord>> {
        let pin = self
            .conn()
            .query_row(
                "SELECT id, message_id, chat_id, pinned_by, pinned, clock
                 FROM pin_messages WHERE id = ?1",
                params![id],
                |row| {
                    Ok(PinRecord {
                        id: row.get(0)?,
                        message_id: row.get(1)?,
                        chat_id: row.get(2)?,
                        pinned_by: row.get(3)?,
                        pinned: get_bool(row, 4)?,
                        clock: get_clock(row, 5)?,
                    })
                },
            )
            .optional()?;
        Ok(pin)
    }

    pub fn save_reaction(&self, reaction: &ReactionRecord) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO emoji_reactions
                 (id, message_id, chat_id, source, emoji, retracted, clock)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                reaction.id,
                reaction.message_id,
                reaction.chat_id,
                reaction.from,
                reaction.emoji.as_str(),
                reaction.retracted,
                clock(reaction.clock),
            ],
        )?;
        Ok(())
    }

    pub fn reaction_by_id(&self, id: &str) -> Result<Option<ReactionRecord>> {
        let reaction = self
            .conn()
            .query_row(
                "SELECT id, message_id, chat_id, source, emoji, retracted, clock
                 FROM emoji_reactions WHERE id = ?1",
                params![id],
                row_to_reaction,
            )
            .optional()?;
        Ok(reaction)
    }

    /// Live (non-retracted) reactions on a message.
    pub fn reactions_for_message(&self, message_id: &str) -> Result<Vec<ReactionRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, message_id, chat_id, source, emoji, retracted, clock
             FROM emoji_reactions WHERE message_id = ?1 AND retracted = 0
             ORDER BY clock ASC",
        )?;
        let rows = stmt.query_map(params![message_id], row_to_reaction)?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }
}

fn row_to_reaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReactionRecord> {
    let emoji_raw: String = row.get(4)?;
    let emoji = EmojiKind::parse(&emoji_raw)
        .ok_or_else(|| conversion_error(4, format!("unknown emoji {emoji_raw}")))?;

    Ok(ReactionRecord {
        id: row.get(0)?,
        message_id: row.get(1)?,
        chat_id: row.get(2)?,
        from: row.get(3)?,
        emoji,
        retracted: get_bool(row, 5)?,
        clock: get_clock(row, 6)?,
    })
}
