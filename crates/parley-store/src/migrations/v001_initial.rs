//! v001 -- Initial schema creation.
//!
//! Creates the messaging tables: chats, contacts, installations, outbound
//! raw messages, user messages with their pending edits/deletes, pins,
//! reactions, settings and our own identity images.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chats
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id                           TEXT PRIMARY KEY NOT NULL,
    name                         TEXT NOT NULL,
    chat_type                    INTEGER NOT NULL,
    active                       INTEGER NOT NULL DEFAULT 1,  -- boolean 0/1
    timestamp                    INTEGER NOT NULL,            -- ms
    last_clock_value             INTEGER NOT NULL DEFAULT 0,
    deleted_at_clock_value       INTEGER NOT NULL DEFAULT 0,
    read_messages_at_clock_value INTEGER NOT NULL DEFAULT 0,
    joined                       INTEGER NOT NULL DEFAULT 0,
    unviewed_messages_count      INTEGER NOT NULL DEFAULT 0,
    muted                        INTEGER NOT NULL DEFAULT 0,
    last_message                 TEXT NOT NULL DEFAULT 'null', -- JSON
    members                      TEXT NOT NULL DEFAULT '[]',   -- JSON
    membership_updates           TEXT NOT NULL DEFAULT '[]'    -- JSON
);

-- ----------------------------------------------------------------
-- Contacts
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id                   TEXT PRIMARY KEY NOT NULL,   -- hex-encoded pubkey
    display_name         TEXT NOT NULL DEFAULT '',
    ens_name             TEXT NOT NULL DEFAULT '',
    ens_verified         INTEGER NOT NULL DEFAULT 0,
    local_nickname       TEXT NOT NULL DEFAULT '',
    bio                  TEXT NOT NULL DEFAULT '',
    last_updated         INTEGER NOT NULL DEFAULT 0,
    last_updated_locally INTEGER NOT NULL DEFAULT 0,
    identity_clock       INTEGER NOT NULL DEFAULT 0,
    added                INTEGER NOT NULL DEFAULT 0,
    blocked              INTEGER NOT NULL DEFAULT 0,
    removed              INTEGER NOT NULL DEFAULT 0,
    has_added_us         INTEGER NOT NULL DEFAULT 0,
    verification_status  TEXT NOT NULL,               -- JSON enum
    trust_status         TEXT NOT NULL,               -- JSON enum
    images               TEXT NOT NULL DEFAULT '{}'   -- JSON map
);

-- ----------------------------------------------------------------
-- Installations (ours and paired)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS installations (
    identity    TEXT NOT NULL,                -- hex-encoded pubkey
    id          TEXT NOT NULL,
    version     INTEGER NOT NULL DEFAULT 0,
    enabled     INTEGER NOT NULL DEFAULT 0,
    timestamp   INTEGER NOT NULL,
    name        TEXT,
    device_type TEXT,
    PRIMARY KEY (identity, id)
);

-- ----------------------------------------------------------------
-- Outbound envelopes
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS raw_messages (
    id                      TEXT PRIMARY KEY NOT NULL,
    local_chat_id           TEXT NOT NULL,
    payload                 BLOB NOT NULL,
    payload_type            INTEGER NOT NULL,
    recipients              TEXT NOT NULL DEFAULT '[]',  -- JSON
    resend                  INTEGER NOT NULL DEFAULT 0,
    send_count              INTEGER NOT NULL DEFAULT 0,
    sent                    INTEGER NOT NULL DEFAULT 0,
    last_sent               INTEGER NOT NULL DEFAULT 0,
    skip_group_message_wrap INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_raw_messages_resend
    ON raw_messages(resend, sent);

-- ----------------------------------------------------------------
-- User messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_messages (
    id                TEXT PRIMARY KEY NOT NULL,
    chat_id           TEXT NOT NULL,
    source            TEXT NOT NULL,              -- hex-encoded author key
    clock             INTEGER NOT NULL,
    timestamp         INTEGER NOT NULL,
    whisper_timestamp INTEGER NOT NULL,
    content_type      INTEGER NOT NULL,
    text              TEXT NOT NULL DEFAULT '',
    response_to       TEXT NOT NULL DEFAULT '',
    seen              INTEGER NOT NULL DEFAULT 0,
    deleted           INTEGER NOT NULL DEFAULT 0,
    edited_at         INTEGER NOT NULL DEFAULT 0,
    outgoing          INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_user_messages_chat_clock
    ON user_messages(chat_id, clock DESC);

CREATE TABLE IF NOT EXISTS pending_edits (
    message_id TEXT NOT NULL,
    clock      INTEGER NOT NULL,
    chat_id    TEXT NOT NULL,
    source     TEXT NOT NULL,
    text       TEXT NOT NULL,
    PRIMARY KEY (message_id, clock)
);

CREATE TABLE IF NOT EXISTS pending_deletes (
    message_id TEXT PRIMARY KEY NOT NULL,
    chat_id    TEXT NOT NULL,
    source     TEXT NOT NULL,
    clock      INTEGER NOT NULL
);

-- ----------------------------------------------------------------
-- Pins and reactions (deterministic IDs)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS pin_messages (
    id         TEXT PRIMARY KEY NOT NULL,
    message_id TEXT NOT NULL,
    chat_id    TEXT NOT NULL,
    pinned_by  TEXT NOT NULL,
    pinned     INTEGER NOT NULL,
    clock      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS emoji_reactions (
    id         TEXT PRIMARY KEY NOT NULL,
    message_id TEXT NOT NULL,
    chat_id    TEXT NOT NULL,
    source     TEXT NOT NULL,
    emoji      TEXT NOT NULL,
    retracted  INTEGER NOT NULL DEFAULT 0,
    clock      INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_emoji_reactions_message
    ON emoji_reactions(message_id);

-- ----------------------------------------------------------------
-- Settings and own identity images
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS settings (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,                          -- JSON
    clock INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS identity_images (
    name    TEXT PRIMARY KEY NOT NULL,
    payload BLOB NOT NULL,
    clock   INTEGER NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
