//! Conversation Store: the per-user message log seen by the relay and the
//! REST surface.

use herald_shared::{Direction, MessageId, UserId};
use herald_store::{Message, Result};

use crate::db::SharedDb;

#[derive(Clone)]
pub struct ConversationStore {
    db: SharedDb,
}

impl ConversationStore {
    pub fn new(db: SharedDb) -> Self {
        Self { db }
    }

    /// Fails with `NotFound("User")` when the user does not exist.
    pub async fn append(
        &self,
        user_id: UserId,
        content: &str,
        direction: Direction,
    ) -> Result<Message> {
        self.db.lock().await.append_message(user_id, content, direction)
    }

    /// Snapshot of the log, oldest first.
    pub async fn list_for(&self, user_id: UserId) -> Result<Vec<Message>> {
        self.db.lock().await.list_messages_for_user(user_id)
    }

    pub async fn mark_read(&self, ids: &[MessageId]) -> Result<usize> {
        self.db.lock().await.mark_messages_read(ids)
    }
}
