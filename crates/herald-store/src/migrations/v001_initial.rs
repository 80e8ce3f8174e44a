//! v001 -- Initial schema creation.
//!
//! Creates users with their external identity, groups with membership, and
//! the per-user conversation log.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name       TEXT,
    telephone  TEXT,
    region     TEXT,
    comment    TEXT,
    handle     TEXT,                        -- public handle entered by an operator
    blocked    INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    created_at TEXT NOT NULL                -- RFC-3339
);

-- ----------------------------------------------------------------
-- External chat-network identities (one per user)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS external_identities (
    user_id       TEXT PRIMARY KEY NOT NULL,  -- FK -> users(id)
    external_id   INTEGER NOT NULL UNIQUE,    -- numeric chat-network id
    username      TEXT,
    first_name    TEXT,
    language_code TEXT,
    is_bot        INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Groups and membership
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS contact_groups (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name       TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL,
    user_id  TEXT NOT NULL,

    PRIMARY KEY (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES contact_groups(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_group_members_user ON group_members(user_id);

-- ----------------------------------------------------------------
-- Conversation messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    user_id    TEXT NOT NULL,               -- FK -> users(id)
    content    TEXT NOT NULL,
    direction  TEXT NOT NULL,               -- INCOMING / OUTGOING
    is_read    INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_user_ts ON messages(user_id, created_at);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
