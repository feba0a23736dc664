use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS wallet_accounts (
    address    TEXT PRIMARY KEY NOT NULL,
    name       TEXT NOT NULL,
    color      TEXT NOT NULL DEFAULT '',
    kind       TEXT NOT NULL DEFAULT '',
    path       TEXT NOT NULL DEFAULT '',
    public_key TEXT NOT NULL DEFAULT '',
    hidden     INTEGER NOT NULL DEFAULT 0,
    removed    INTEGER NOT NULL DEFAULT 0,
    clock      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS wallet_balances (
    address    TEXT PRIMARY KEY NOT NULL,
    balance    TEXT NOT NULL,                     -- decimal string
    updated_at TEXT NOT NULL                      -- RFC-3339
);

CREATE TABLE IF NOT EXISTS keycards (
    keycard_uid TEXT PRIMARY KEY NOT NULL,
    name        TEXT NOT NULL,
    locked      INTEGER NOT NULL DEFAULT 0,
    key_uid     TEXT NOT NULL,
    addresses   TEXT NOT NULL DEFAULT '[]',       -- JSON
    removed     INTEGER NOT NULL DEFAULT 0,
    clock       INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS saved_addresses (
    address      TEXT PRIMARY KEY NOT NULL,
    name         TEXT NOT NULL,
    favourite    INTEGER NOT NULL DEFAULT 0,
    removed      INTEGER NOT NULL DEFAULT 0,
    update_clock INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions_to_validate (
    transaction_hash TEXT PRIMARY KEY NOT NULL,
    message_id       TEXT NOT NULL,
    command_id       TEXT NOT NULL,
    source           TEXT NOT NULL,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    first_seen       TEXT NOT NULL,               -- RFC-3339
    validate         INTEGER NOT NULL DEFAULT 1
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
