//! CRUD operations for [`Group`] records and group membership.

use chrono::Utc;
use herald_shared::{GroupId, UserId};
use rusqlite::{params, params_from_iter, Connection};

use crate::database::{col_ts, col_uuid, fmt_ts, placeholders, Database};
use crate::error::{Result, StoreError};
use crate::models::{Group, User};
use crate::users::{row_to_user, USER_SELECT};

impl Database {
    /// Insert a new group. Member ids that do not resolve to a user are
    /// dropped.
    pub fn create_group(&mut self, name: &str, member_ids: &[UserId]) -> Result<Group> {
        self.transaction(|tx| {
            let id = GroupId::new();
            tx.execute(
                "INSERT INTO contact_groups (id, name, created_at) VALUES (?1, ?2, ?3)",
                params![id.to_string(), name, fmt_ts(&Utc::now())],
            )?;
            insert_members(tx, id, member_ids)?;
            fetch_group(tx, id)
        })
    }

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        fetch_group(self.conn(), id)
    }

    /// List all groups ordered by name.
    pub fn list_groups(&self) -> Result<Vec<Group>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id, name, created_at FROM contact_groups ORDER BY name ASC")?;
        let rows = stmt.query_map([], row_to_group)?;

        let mut groups = Vec::new();
        for row in rows {
            let mut group = row?;
            group.member_ids = member_ids_for(self.conn(), group.id)?;
            groups.push(group);
        }
        Ok(groups)
    }

    /// Load every group whose id is in `ids`. Unknown ids are skipped, so the
    /// result may be shorter than the input.
    pub fn find_groups(&self, ids: &[GroupId]) -> Result<Vec<Group>> {
        find_groups_in(self.conn(), ids)
    }

    /// Users belonging to a group, with `group_ids` left empty.
    pub fn get_group_members(&self, id: GroupId) -> Result<Vec<User>> {
        let mut stmt = self.conn().prepare(&format!(
            "{USER_SELECT}
             JOIN group_members m ON m.user_id = u.id
             WHERE m.group_id = ?1
             ORDER BY u.created_at ASC"
        ))?;
        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Rename a group and/or replace its member set wholesale.
    pub fn update_group(
        &mut self,
        id: GroupId,
        name: Option<&str>,
        member_ids: Option<&[UserId]>,
    ) -> Result<Group> {
        self.transaction(|tx| {
            let affected = tx.execute(
                "UPDATE contact_groups SET name = COALESCE(?2, name) WHERE id = ?1",
                params![id.to_string(), name],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound("Group"));
            }

            if let Some(member_ids) = member_ids {
                tx.execute(
                    "DELETE FROM group_members WHERE group_id = ?1",
                    params![id.to_string()],
                )?;
                insert_members(tx, id, member_ids)?;
            }

            fetch_group(tx, id)
        })
    }

    // ON DELETE CASCADE drops memberships and broadcast links only; users and
    // broadcasts survive.
    pub fn delete_group(&self, id: GroupId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM contact_groups WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn find_groups_in(conn: &Connection, ids: &[GroupId]) -> Result<Vec<Group>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT id, name, created_at FROM contact_groups WHERE id IN ({}) ORDER BY name ASC",
        placeholders(ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter().map(|id| id.to_string())), row_to_group)?;

    let mut groups = Vec::new();
    for row in rows {
        let mut group = row?;
        group.member_ids = member_ids_for(conn, group.id)?;
        groups.push(group);
    }
    Ok(groups)
}

fn fetch_group(conn: &Connection, id: GroupId) -> Result<Group> {
    let mut group = conn
        .query_row(
            "SELECT id, name, created_at FROM contact_groups WHERE id = ?1",
            params![id.to_string()],
            row_to_group,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("Group"),
            other => StoreError::Sqlite(other),
        })?;
    group.member_ids = member_ids_for(conn, id)?;
    Ok(group)
}

fn insert_members(conn: &Connection, group_id: GroupId, member_ids: &[UserId]) -> Result<()> {
    for user_id in member_ids {
        conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id)
             SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM users WHERE id = ?2)",
            params![group_id.to_string(), user_id.to_string()],
        )?;
    }
    Ok(())
}

fn member_ids_for(conn: &Connection, group_id: GroupId) -> Result<Vec<UserId>> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM group_members WHERE group_id = ?1 ORDER BY user_id")?;
    let rows = stmt.query_map(params![group_id.to_string()], |row| col_uuid(row, 0))?;
    rows.map(|r| r.map(UserId).map_err(StoreError::Sqlite))
        .collect()
}

fn row_to_group(row: &rusqlite::Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: GroupId(col_uuid(row, 0)?),
        name: row.get(1)?,
        member_ids: Vec::new(),
        created_at: col_ts(row, 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewUser;

    fn user(db: &mut Database) -> UserId {
        db.create_user(&NewUser::default()).unwrap().id
    }

    #[test]
    fn create_group_drops_unknown_members() {
        let mut db = Database::open_in_memory().unwrap();
        let alice = user(&mut db);

        let group = db.create_group("VIP", &[alice, UserId::new()]).unwrap();
        assert_eq!(group.member_ids, vec![alice]);
        assert_eq!(db.get_user(alice).unwrap().group_ids, vec![group.id]);
    }

    #[test]
    fn find_groups_skips_unknown_ids() {
        let mut db = Database::open_in_memory().unwrap();
        let g1 = db.create_group("a", &[]).unwrap();

        let found = db.find_groups(&[g1.id, GroupId::new()]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(db.find_groups(&[]).unwrap().is_empty());
    }

    #[test]
    fn update_replaces_member_set() {
        let mut db = Database::open_in_memory().unwrap();
        let a = user(&mut db);
        let b = user(&mut db);
        let group = db.create_group("g", &[a]).unwrap();

        let updated = db.update_group(group.id, None, Some(&[b])).unwrap();
        assert_eq!(updated.name, "g");
        assert_eq!(updated.member_ids, vec![b]);

        let renamed = db.update_group(group.id, Some("h"), None).unwrap();
        assert_eq!(renamed.name, "h");
        assert_eq!(renamed.member_ids, vec![b]);
    }

    #[test]
    fn delete_group_keeps_users() {
        let mut db = Database::open_in_memory().unwrap();
        let a = user(&mut db);
        let group = db.create_group("g", &[a]).unwrap();

        assert!(db.delete_group(group.id).unwrap());
        assert!(!db.delete_group(group.id).unwrap());

        let survivor = db.get_user(a).unwrap();
        assert!(survivor.group_ids.is_empty());
    }

    #[test]
    fn deleting_user_detaches_from_group() {
        let mut db = Database::open_in_memory().unwrap();
        let a = user(&mut db);
        let group = db.create_group("g", &[a]).unwrap();

        db.delete_user(a).unwrap();
        assert!(db.get_group_members(group.id).unwrap().is_empty());
    }
}
