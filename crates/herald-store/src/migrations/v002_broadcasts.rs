use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS broadcasts (
    id         TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    name       TEXT NOT NULL,
    message    TEXT NOT NULL,
    images     TEXT NOT NULL DEFAULT '[]',  -- JSON array of media URLs
    status     TEXT NOT NULL,               -- IN_PROGRESS / COMPLETED / FAILED
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Target selection, kept for audit. Deleting a group only drops the link.
CREATE TABLE IF NOT EXISTS broadcast_groups (
    broadcast_id TEXT NOT NULL,
    group_id     TEXT NOT NULL,

    PRIMARY KEY (broadcast_id, group_id),
    FOREIGN KEY (broadcast_id) REFERENCES broadcasts(id) ON DELETE CASCADE,
    FOREIGN KEY (group_id) REFERENCES contact_groups(id) ON DELETE CASCADE
);

-- One row per recipient attempt. user_id is not a foreign key: attempts
-- outlive the user row.
CREATE TABLE IF NOT EXISTS delivery_attempts (
    id           TEXT PRIMARY KEY NOT NULL,
    broadcast_id TEXT NOT NULL,
    user_id      TEXT NOT NULL,
    outcome      TEXT NOT NULL,
    detail       TEXT,
    attempted_at TEXT NOT NULL,

    FOREIGN KEY (broadcast_id) REFERENCES broadcasts(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_delivery_attempts_broadcast
    ON delivery_attempts(broadcast_id);
CREATE INDEX IF NOT EXISTS idx_broadcasts_status ON broadcasts(status);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
