//! v001 -- Initial schema creation.
//!
//! Creates `chat_sessions`, `messages`, `contacts`, `saved_contacts` and the
//! `app_settings` key/value table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Chat sessions (one per contact)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_sessions (
    contact_id   TEXT PRIMARY KEY NOT NULL,
    contact_name TEXT NOT NULL,
    created_at   TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- Messages (append-only, ordered by seq)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    contact_id TEXT NOT NULL,                 -- FK -> chat_sessions(contact_id)
    text       TEXT NOT NULL,
    sender     TEXT NOT NULL,                 -- 'me' | 'peer'
    kind       TEXT NOT NULL,                 -- 'text' | 'audio' | 'image' | 'video'
    payload    TEXT NOT NULL,                 -- JSON of the type-specific fields
    delivered  INTEGER NOT NULL DEFAULT 0,
    timestamp  TEXT NOT NULL,

    FOREIGN KEY (contact_id) REFERENCES chat_sessions(contact_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_contact_seq ON messages(contact_id, seq);

-- ----------------------------------------------------------------
-- Contacts (presence + last message preview)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contacts (
    id                TEXT PRIMARY KEY NOT NULL,
    name              TEXT NOT NULL,
    is_online         INTEGER NOT NULL DEFAULT 0,
    last_message      TEXT,
    last_message_time TEXT
);

-- ----------------------------------------------------------------
-- Saved contacts (connection codes kept for reconnection)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS saved_contacts (
    id             TEXT PRIMARY KEY NOT NULL,
    name           TEXT NOT NULL,
    offer_code     TEXT,
    answer_code    TEXT,
    my_role        TEXT NOT NULL,             -- 'initiator' | 'receiver'
    created_at     TEXT NOT NULL,
    last_connected TEXT
);

-- ----------------------------------------------------------------
-- App settings (current session pointer, ...)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS app_settings (
    key   TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
