//! CRUD operations for [`User`] records and their external identity.

use chrono::Utc;
use herald_shared::{ExternalId, GroupId, UserId};
use rusqlite::{params, Connection, OptionalExtension};

use crate::database::{col_ts, col_uuid, fmt_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{ExternalIdentity, IdentityProfile, NewUser, User, UserUpdate};

pub(crate) const USER_SELECT: &str = "SELECT u.id, u.name, u.telephone, u.region, u.comment,
        u.handle, u.blocked, u.created_at,
        e.external_id, e.username, e.first_name, e.language_code, e.is_bot, e.created_at
     FROM users u
     LEFT JOIN external_identities e ON e.user_id = u.id";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Insert a new user, its optional identity and its group memberships.
    /// Group ids that do not resolve are dropped.
    pub fn create_user(&mut self, new: &NewUser) -> Result<User> {
        self.transaction(|tx| {
            let id = UserId::new();
            let now = fmt_ts(&Utc::now());

            tx.execute(
                "INSERT INTO users
                    (id, name, telephone, region, comment, handle, blocked, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                params![
                    id.to_string(),
                    new.name,
                    new.telephone,
                    new.region,
                    new.comment,
                    new.handle,
                    now,
                ],
            )?;

            if let Some(profile) = &new.identity {
                if find_user_id_by_external(tx, ExternalId(profile.external_id))?.is_some() {
                    return Err(StoreError::InvalidReference(format!(
                        "external id {} is already registered",
                        profile.external_id
                    )));
                }
                insert_identity(tx, id, profile)?;
            }

            replace_memberships(tx, id, &new.group_ids)?;
            fetch_user(tx, id)
        })
    }

    /// Register the identity carried by an inbound event, or refresh its
    /// display fields if it is already known. Returns the owning user and
    /// whether it was created by this call.
    pub fn upsert_identity(&mut self, profile: &IdentityProfile) -> Result<(User, bool)> {
        self.transaction(|tx| {
            if let Some(user_id) = find_user_id_by_external(tx, ExternalId(profile.external_id))? {
                tx.execute(
                    "UPDATE external_identities
                     SET username = ?2, first_name = ?3, language_code = ?4
                     WHERE external_id = ?1",
                    params![
                        profile.external_id,
                        profile.username,
                        profile.first_name,
                        profile.language_code,
                    ],
                )?;
                return Ok((fetch_user(tx, user_id)?, false));
            }

            let id = UserId::new();
            tx.execute(
                "INSERT INTO users (id, blocked, created_at) VALUES (?1, 0, ?2)",
                params![id.to_string(), fmt_ts(&Utc::now())],
            )?;
            insert_identity(tx, id, profile)?;
            Ok((fetch_user(tx, id)?, true))
        })
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_user(&self, id: UserId) -> Result<User> {
        fetch_user(self.conn(), id)
    }

    /// List all users, oldest first.
    pub fn list_users(&self) -> Result<Vec<User>> {
        let mut stmt = self
            .conn()
            .prepare(&format!("{USER_SELECT} ORDER BY u.created_at ASC, u.rowid ASC"))?;
        let rows = stmt.query_map([], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            let mut user = row?;
            user.group_ids = group_ids_for(self.conn(), user.id)?;
            users.push(user);
        }
        Ok(users)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    pub fn update_user(&mut self, id: UserId, update: &UserUpdate) -> Result<User> {
        self.transaction(|tx| {
            let affected = tx.execute(
                "UPDATE users SET
                    name = COALESCE(?2, name),
                    telephone = COALESCE(?3, telephone),
                    region = COALESCE(?4, region),
                    comment = COALESCE(?5, comment),
                    handle = COALESCE(?6, handle)
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    update.name,
                    update.telephone,
                    update.region,
                    update.comment,
                    update.handle,
                ],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound("User"));
            }

            if let Some(group_ids) = &update.group_ids {
                tx.execute(
                    "DELETE FROM group_members WHERE user_id = ?1",
                    params![id.to_string()],
                )?;
                replace_memberships(tx, id, group_ids)?;
            }

            fetch_user(tx, id)
        })
    }

    /// Set the blocked-by-recipient flag. Returns `false` if the user is gone.
    pub fn set_user_blocked(&self, id: UserId, blocked: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET blocked = ?2 WHERE id = ?1",
            params![id.to_string(), blocked],
        )?;
        Ok(affected > 0)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    // ON DELETE CASCADE: identity, memberships and messages go with it
    pub fn delete_user(&self, id: UserId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub(crate) fn fetch_user(conn: &Connection, id: UserId) -> Result<User> {
    let mut user = conn
        .query_row(
            &format!("{USER_SELECT} WHERE u.id = ?1"),
            params![id.to_string()],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound("User"),
            other => StoreError::Sqlite(other),
        })?;
    user.group_ids = group_ids_for(conn, id)?;
    Ok(user)
}

pub(crate) fn user_exists(conn: &Connection, id: UserId) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ?1",
            params![id.to_string()],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn find_user_id_by_external(
    conn: &Connection,
    external_id: ExternalId,
) -> Result<Option<UserId>> {
    let id = conn
        .query_row(
            "SELECT user_id FROM external_identities WHERE external_id = ?1",
            params![external_id.0],
            |row| col_uuid(row, 0),
        )
        .optional()?;
    Ok(id.map(UserId))
}

fn insert_identity(conn: &Connection, user_id: UserId, profile: &IdentityProfile) -> Result<()> {
    conn.execute(
        "INSERT INTO external_identities
            (user_id, external_id, username, first_name, language_code, is_bot, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user_id.to_string(),
            profile.external_id,
            profile.username,
            profile.first_name,
            profile.language_code,
            profile.is_bot,
            fmt_ts(&Utc::now()),
        ],
    )?;
    Ok(())
}

fn replace_memberships(conn: &Connection, user_id: UserId, group_ids: &[GroupId]) -> Result<()> {
    for group_id in group_ids {
        conn.execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id)
             SELECT ?1, ?2 WHERE EXISTS (SELECT 1 FROM contact_groups WHERE id = ?1)",
            params![group_id.to_string(), user_id.to_string()],
        )?;
    }
    Ok(())
}

fn group_ids_for(conn: &Connection, user_id: UserId) -> Result<Vec<GroupId>> {
    let mut stmt =
        conn.prepare("SELECT group_id FROM group_members WHERE user_id = ?1 ORDER BY group_id")?;
    let rows = stmt.query_map(params![user_id.to_string()], |row| col_uuid(row, 0))?;
    rows.map(|r| r.map(GroupId).map_err(StoreError::Sqlite))
        .collect()
}

/// Map a row produced by `USER_SELECT` to a [`User`] with empty `group_ids`.
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let external_id: Option<i64> = row.get(8)?;
    let identity = match external_id {
        Some(external_id) => Some(ExternalIdentity {
            external_id: ExternalId(external_id),
            username: row.get(9)?,
            first_name: row.get(10)?,
            language_code: row.get(11)?,
            is_bot: row.get(12)?,
            created_at: col_ts(row, 13)?,
        }),
        None => None,
    };

    Ok(User {
        id: UserId(col_uuid(row, 0)?),
        name: row.get(1)?,
        telephone: row.get(2)?,
        region: row.get(3)?,
        comment: row.get(4)?,
        handle: row.get(5)?,
        blocked: row.get(6)?,
        identity,
        group_ids: Vec::new(),
        created_at: col_ts(row, 7)?,
    })
}
