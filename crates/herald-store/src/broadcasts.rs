//! CRUD operations for [`Broadcast`] records and their per-recipient
//! delivery attempts.

use chrono::Utc;
use herald_shared::{BroadcastId, BroadcastStatus, GroupId, UserId};
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::database::{col_parsed, col_ts, col_uuid, fmt_ts, Database};
use crate::error::{Result, StoreError};
use crate::groups::find_groups_in;
use crate::models::{AttemptOutcome, Broadcast, BroadcastUpdate, DeliveryAttempt, NewBroadcast};

const BROADCAST_SELECT: &str =
    "SELECT id, name, message, images, status, created_at, updated_at FROM broadcasts";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a broadcast row together with its group links.
    pub fn create_broadcast(&mut self, new: &NewBroadcast) -> Result<Broadcast> {
        self.transaction(|tx| {
            let id = BroadcastId::new();
            let now = fmt_ts(&Utc::now());
            let images = serde_json::to_string(&new.images)
                .map_err(|e| StoreError::InvalidReference(format!("images: {e}")))?;

            tx.execute(
                "INSERT INTO broadcasts (id, name, message, images, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    id.to_string(),
                    new.name,
                    new.message,
                    images,
                    new.status.as_str(),
                    now,
                ],
            )?;
            link_groups(tx, id, &new.group_ids)?;
            fetch_broadcast(tx, id)
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_broadcast(&self, id: BroadcastId) -> Result<Broadcast> {
        fetch_broadcast(self.conn(), id)
    }

    /// List all broadcasts, newest first.
    pub fn list_broadcasts(&self) -> Result<Vec<Broadcast>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{BROADCAST_SELECT} ORDER BY created_at DESC"))?;
        let rows = stmt.query_map([], row_to_broadcast)?;

        let mut broadcasts = Vec::new();
        for row in rows {
            let mut broadcast = row?;
            broadcast.group_ids = group_ids_for(self.conn(), broadcast.id)?;
            broadcasts.push(broadcast);
        }
        Ok(broadcasts)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Move a broadcast to `status`. Only `IN_PROGRESS` rows transition;
    /// returns `false` when the row is missing or already terminal.
    pub fn set_broadcast_status(&self, id: BroadcastId, status: BroadcastStatus) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE broadcasts SET status = ?2, updated_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![
                id.to_string(),
                status.as_str(),
                fmt_ts(&Utc::now()),
                BroadcastStatus::InProgress.as_str(),
            ],
        )?;
        Ok(affected > 0)
    }

    /// Edit the record. A new group set replaces the stored one wholesale and
    /// must resolve completely.
    pub fn update_broadcast(
        &mut self,
        id: BroadcastId,
        update: &BroadcastUpdate,
    ) -> Result<Broadcast> {
        self.transaction(|tx| {
            let affected = tx.execute(
                "UPDATE broadcasts SET
                    name = COALESCE(?2, name),
                    message = COALESCE(?3, message),
                    updated_at = ?4
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    update.name,
                    update.message,
                    fmt_ts(&Utc::now()),
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound("Broadcast"));
            }

            if let Some(group_ids) = &update.group_ids {
                let mut wanted = group_ids.clone();
                wanted.sort();
                wanted.dedup();
                let found = find_groups_in(tx, &wanted)?;
                if found.len() != wanted.len() {
                    return Err(StoreError::InvalidReference(
                        "some groups were not found".into(),
                    ));
                }

                tx.execute(
                    "DELETE FROM broadcast_groups WHERE broadcast_id = ?1",
                    params![id.to_string()],
                )?;
                link_groups(tx, id, &wanted)?;
            }

            fetch_broadcast(tx, id)
        })
    }

    /// Terminate every broadcast still `IN_PROGRESS` as `FAILED` and return
    /// their ids. Used at startup: no dispatch survives a restart.
    pub fn fail_stale_broadcasts(&mut self) -> Result<Vec<BroadcastId>> {
        self.transaction(|tx| {
            let mut stmt = tx.prepare("SELECT id FROM broadcasts WHERE status = ?1")?;
            let rows = stmt.query_map(params![BroadcastStatus::InProgress.as_str()], |row| {
                col_uuid(row, 0)
            })?;
            let ids = rows
                .map(|r| r.map(BroadcastId).map_err(StoreError::Sqlite))
                .collect::<Result<Vec<_>>>()?;

            tx.execute(
                "UPDATE broadcasts SET status = ?2, updated_at = ?3 WHERE status = ?1",
                params![
                    BroadcastStatus::InProgress.as_str(),
                    BroadcastStatus::Failed.as_str(),
                    fmt_ts(&Utc::now()),
                ],
            )?;
            Ok(ids)
        })
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    // ON DELETE CASCADE: group links and delivery attempts only
    pub fn delete_broadcast(&self, id: BroadcastId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM broadcasts WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delivery attempts
    // ------------------------------------------------------------------

    pub fn record_delivery_attempt(
        &self,
        broadcast_id: BroadcastId,
        user_id: UserId,
        outcome: AttemptOutcome,
        detail: Option<&str>,
    ) -> Result<DeliveryAttempt> {
        let attempt = DeliveryAttempt {
            id: Uuid::new_v4(),
            broadcast_id,
            user_id,
            outcome,
            detail: detail.map(str::to_string),
            attempted_at: Utc::now(),
        };

        self.conn().execute(
            "INSERT INTO delivery_attempts
                (id, broadcast_id, user_id, outcome, detail, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attempt.id.to_string(),
                broadcast_id.to_string(),
                user_id.to_string(),
                outcome.as_str(),
                attempt.detail,
                fmt_ts(&attempt.attempted_at),
            ],
        )?;
        Ok(attempt)
    }

    pub fn list_delivery_attempts(
        &self,
        broadcast_id: BroadcastId,
    ) -> Result<Vec<DeliveryAttempt>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, broadcast_id, user_id, outcome, detail, attempted_at
             FROM delivery_attempts
             WHERE broadcast_id = ?1
             ORDER BY attempted_at ASC, rowid ASC",
        )?;

        let rows = stmt.query_map(params![broadcast_id.to_string()], |row| {
            Ok(DeliveryAttempt {
                id: col_uuid(row, 0)?,
                broadcast_id: BroadcastId(col_uuid(row, 1)?),
                user_id: UserId(col_uuid(row, 2)?),
                outcome: col_parsed(row, 3)?,
                detail: row.get(4)?,
                attempted_at: col_ts(row, 5)?,
            })
        })?;

        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row?);
        }
        Ok(attempts)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fetch_broadcast(conn: &Connection, id: BroadcastId) -> Result<Broadcast> {
    let mut broadcast = conn
        .query_row(
            &format!("{BROADCAST_SELECT} WHERE id = ?1"),
            params![id.to_string()],
            row_to_broadcast,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("Broadcast"),
            other => StoreError::Sqlite(other),
        })?;
    broadcast.group_ids = group_ids_for(conn, id)?;
    Ok(broadcast)
}

fn link_groups(conn: &Connection, id: BroadcastId, group_ids: &[GroupId]) -> Result<()> {
    for group_id in group_ids {
        conn.execute(
            "INSERT OR IGNORE INTO broadcast_groups (broadcast_id, group_id) VALUES (?1, ?2)",
            params![id.to_string(), group_id.to_string()],
        )?;
    }
    Ok(())
}

fn group_ids_for(conn: &Connection, id: BroadcastId) -> Result<Vec<GroupId>> {
    let mut stmt = conn.prepare(
        "SELECT group_id FROM broadcast_groups WHERE broadcast_id = ?1 ORDER BY group_id",
    )?;
    let rows = stmt.query_map(params![id.to_string()], |row| col_uuid(row, 0))?;
    rows.map(|r| r.map(GroupId).map_err(StoreError::Sqlite))
        .collect()
}

fn row_to_broadcast(row: &rusqlite::Row<'_>) -> rusqlite::Result<Broadcast> {
    let images_json: String = row.get(3)?;
    let images: Vec<String> = serde_json::from_str(&images_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Broadcast {
        id: BroadcastId(col_uuid(row, 0)?),
        name: row.get(1)?,
        message: row.get(2)?,
        images,
        status: col_parsed(row, 4)?,
        group_ids: Vec::new(),
        created_at: col_ts(row, 5)?,
        updated_at: col_ts(row, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    fn new_broadcast(group_ids: Vec<GroupId>) -> NewBroadcast {
        NewBroadcast {
            name: "Promo".into(),
            message: "Hi".into(),
            images: vec!["https://img.example/1.png".into()],
            status: BroadcastStatus::InProgress,
            group_ids,
        }
    }

    #[test]
    fn create_and_get_broadcast() {
        let mut db = Database::open_in_memory().unwrap();
        let group = db.create_group("G1", &[]).unwrap();

        let broadcast = db.create_broadcast(&new_broadcast(vec![group.id])).unwrap();
        let loaded = db.get_broadcast(broadcast.id).unwrap();
        assert_eq!(loaded.status, BroadcastStatus::InProgress);
        assert_eq!(loaded.group_ids, vec![group.id]);
        assert_eq!(loaded.images.len(), 1);
    }

    #[test]
    fn terminal_status_does_not_transition_again() {
        let mut db = Database::open_in_memory().unwrap();
        let broadcast = db.create_broadcast(&new_broadcast(vec![])).unwrap();

        assert!(db
            .set_broadcast_status(broadcast.id, BroadcastStatus::Completed)
            .unwrap());
        assert!(!db
            .set_broadcast_status(broadcast.id, BroadcastStatus::Failed)
            .unwrap());
        assert_eq!(
            db.get_broadcast(broadcast.id).unwrap().status,
            BroadcastStatus::Completed
        );
    }

    #[test]
    fn deleting_group_keeps_broadcast() {
        let mut db = Database::open_in_memory().unwrap();
        let group = db.create_group("G1", &[]).unwrap();
        let broadcast = db.create_broadcast(&new_broadcast(vec![group.id])).unwrap();

        db.delete_group(group.id).unwrap();
        let loaded = db.get_broadcast(broadcast.id).unwrap();
        assert!(loaded.group_ids.is_empty());
    }

    #[test]
    fn update_replaces_groups_wholesale() {
        let mut db = Database::open_in_memory().unwrap();
        let g1 = db.create_group("G1", &[]).unwrap();
        let g2 = db.create_group("G2", &[]).unwrap();
        let broadcast = db.create_broadcast(&new_broadcast(vec![g1.id])).unwrap();

        let updated = db
            .update_broadcast(
                broadcast.id,
                &BroadcastUpdate {
                    name: Some("Renamed".into()),
                    group_ids: Some(vec![g2.id]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.message, "Hi");
        assert_eq!(updated.group_ids, vec![g2.id]);
    }

    #[test]
    fn update_with_unknown_group_is_rejected() {
        let mut db = Database::open_in_memory().unwrap();
        let g1 = db.create_group("G1", &[]).unwrap();
        let broadcast = db.create_broadcast(&new_broadcast(vec![g1.id])).unwrap();

        let err = db
            .update_broadcast(
                broadcast.id,
                &BroadcastUpdate {
                    name: Some("Renamed".into()),
                    group_ids: Some(vec![g1.id, GroupId::new()]),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidReference(_)));

        // Rolled back: the name did not change either.
        assert_eq!(db.get_broadcast(broadcast.id).unwrap().name, "Promo");
    }

    #[test]
    fn stale_broadcasts_are_failed() {
        let mut db = Database::open_in_memory().unwrap();
        let stale = db.create_broadcast(&new_broadcast(vec![])).unwrap();
        let done = db.create_broadcast(&new_broadcast(vec![])).unwrap();
        db.set_broadcast_status(done.id, BroadcastStatus::Completed)
            .unwrap();

        let failed = db.fail_stale_broadcasts().unwrap();
        assert_eq!(failed, vec![stale.id]);
        assert_eq!(
            db.get_broadcast(stale.id).unwrap().status,
            BroadcastStatus::Failed
        );
        assert_eq!(
            db.get_broadcast(done.id).unwrap().status,
            BroadcastStatus::Completed
        );
    }

    #[test]
    fn delivery_attempts_are_listed_and_survive_user_deletion() {
        let mut db = Database::open_in_memory().unwrap();
        let user = db.create_user(&NewUser::default()).unwrap();
        let broadcast = db.create_broadcast(&new_broadcast(vec![])).unwrap();

        db.record_delivery_attempt(broadcast.id, user.id, AttemptOutcome::Blocked, Some("403"))
            .unwrap();
        db.delete_user(user.id).unwrap();

        let attempts = db.list_delivery_attempts(broadcast.id).unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].outcome, AttemptOutcome::Blocked);
        assert_eq!(attempts[0].detail.as_deref(), Some("403"));

        db.delete_broadcast(broadcast.id).unwrap();
        assert!(db.list_delivery_attempts(broadcast.id).unwrap().is_empty());
    }
}
