//! The per-user conversation log. Entries are append-only apart from the
//! `is_read` flag.

use chrono::Utc;
use herald_shared::{Direction, MessageId, UserId};
use rusqlite::params;

use crate::database::{col_parsed, col_ts, col_uuid, fmt_ts, placeholders, Database};
use crate::error::{Result, StoreError};
use crate::models::Message;
use crate::users::user_exists;

const MESSAGE_SELECT: &str =
    "SELECT id, user_id, content, direction, is_read, created_at FROM messages";

impl Database {
    /// Append an entry to a user's log. New entries are unread.
    pub fn append_message(
        &self,
        user_id: UserId,
        content: &str,
        direction: Direction,
    ) -> Result<Message> {
        if !user_exists(self.conn(), user_id)? {
            return Err(StoreError::NotFound("User"));
        }

        let message = Message {
            id: MessageId::new(),
            user_id,
            content: content.to_string(),
            direction,
            is_read: false,
            created_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO messages (id, user_id, content, direction, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![
                message.id.to_string(),
                user_id.to_string(),
                message.content,
                direction.as_str(),
                fmt_ts(&message.created_at),
            ],
        )?;
        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("{MESSAGE_SELECT} WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("Message"),
                other => StoreError::Sqlite(other),
            })
    }

    /// A user's log in append order. An unknown user has an empty log.
    pub fn list_messages_for_user(&self, user_id: UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "{MESSAGE_SELECT} WHERE user_id = ?1 ORDER BY created_at ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map(params![user_id.to_string()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Flip `is_read` on the given entries. Unknown and already-read ids are
    /// ignored; returns how many entries changed.
    pub fn mark_messages_read(&self, ids: &[MessageId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE messages SET is_read = 1 WHERE is_read = 0 AND id IN ({})",
            placeholders(ids.len())
        );
        let values: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let affected = self
            .conn()
            .execute(&sql, rusqlite::params_from_iter(values.iter()))?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: MessageId(col_uuid(row, 0)?),
        user_id: UserId(col_uuid(row, 1)?),
        content: row.get(2)?,
        direction: col_parsed(row, 3)?,
        is_read: row.get(4)?,
        created_at: col_ts(row, 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    fn db_with_user() -> (Database, UserId) {
        let mut db = Database::open_in_memory().unwrap();
        let user = db.create_user(&NewUser::default()).unwrap();
        (db, user.id)
    }

    #[test]
    fn append_and_list_in_order() {
        let (db, user_id) = db_with_user();

        for i in 0..5 {
            let direction = if i % 2 == 0 {
                Direction::Incoming
            } else {
                Direction::Outgoing
            };
            db.append_message(user_id, &format!("msg {i}"), direction)
                .unwrap();
        }

        let log = db.list_messages_for_user(user_id).unwrap();
        let contents: Vec<_> = log.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["msg 0", "msg 1", "msg 2", "msg 3", "msg 4"]);
        assert!(log.iter().all(|m| !m.is_read));
        assert_eq!(log[1].direction, Direction::Outgoing);
    }

    #[test]
    fn append_for_unknown_user_fails() {
        let db = Database::open_in_memory().unwrap();
        let err = db
            .append_message(UserId::new(), "hello", Direction::Incoming)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn mark_read_is_idempotent() {
        let (db, user_id) = db_with_user();
        let a = db.append_message(user_id, "a", Direction::Incoming).unwrap();
        let b = db.append_message(user_id, "b", Direction::Incoming).unwrap();

        assert_eq!(db.mark_messages_read(&[a.id, MessageId::new()]).unwrap(), 1);
        assert_eq!(db.mark_messages_read(&[a.id]).unwrap(), 0);
        assert_eq!(db.mark_messages_read(&[]).unwrap(), 0);

        assert!(db.get_message(a.id).unwrap().is_read);
        assert!(!db.get_message(b.id).unwrap().is_read);
    }

    #[test]
    fn deleting_user_removes_log() {
        let (db, user_id) = db_with_user();
        let msg = db.append_message(user_id, "a", Direction::Incoming).unwrap();

        db.delete_user(user_id).unwrap();
        assert!(db.list_messages_for_user(user_id).unwrap().is_empty());
        assert!(db.get_message(msg.id).unwrap_err().is_not_found());
    }
}
