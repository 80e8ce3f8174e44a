use std::collections::BTreeMap;

use herald_shared::{GroupId, UserId};
use herald_store::{Database, Group, StoreError, User};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no groups found for the provided ids")]
    NoGroupsFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The groups that resolved and the union of their members, unique by user
/// id and ordered by it.
#[derive(Debug, Clone)]
pub struct Recipients {
    pub groups: Vec<Group>,
    pub users: Vec<User>,
}

pub fn resolve_recipients(
    db: &Database,
    group_ids: &[GroupId],
) -> Result<Recipients, ResolveError> {
    let groups = db.find_groups(group_ids)?;
    if groups.is_empty() {
        return Err(ResolveError::NoGroupsFound);
    }

    let mut users: BTreeMap<UserId, User> = BTreeMap::new();
    for group in &groups {
        for member in db.get_group_members(group.id)? {
            users.entry(member.id).or_insert(member);
        }
    }

    Ok(Recipients {
        groups,
        users: users.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_store::NewUser;

    #[test]
    fn union_is_deduplicated_by_user_id() {
        let mut db = Database::open_in_memory().unwrap();
        let u1 = db.create_user(&NewUser::default()).unwrap();
        let u2 = db.create_user(&NewUser::default()).unwrap();
        let u3 = db.create_user(&NewUser::default()).unwrap();
        let g1 = db.create_group("G1", &[u1.id, u2.id]).unwrap();
        let g2 = db.create_group("G2", &[u2.id, u3.id]).unwrap();

        let recipients = resolve_recipients(&db, &[g1.id, g2.id]).unwrap();
        let mut ids: Vec<_> = recipients.users.iter().map(|u| u.id).collect();
        ids.sort();
        let mut expected = vec![u1.id, u2.id, u3.id];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(recipients.groups.len(), 2);
    }

    #[test]
    fn unknown_ids_are_skipped_when_one_resolves() {
        let mut db = Database::open_in_memory().unwrap();
        let u1 = db.create_user(&NewUser::default()).unwrap();
        let g1 = db.create_group("G1", &[u1.id]).unwrap();

        let recipients = resolve_recipients(&db, &[GroupId::new(), g1.id]).unwrap();
        assert_eq!(recipients.users.len(), 1);
        assert_eq!(recipients.groups.len(), 1);
    }

    #[test]
    fn no_matching_group_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        let err = resolve_recipients(&db, &[GroupId::new()]).unwrap_err();
        assert!(matches!(err, ResolveError::NoGroupsFound));
    }

    #[test]
    fn empty_groups_resolve_to_no_users() {
        let mut db = Database::open_in_memory().unwrap();
        let g1 = db.create_group("Empty", &[]).unwrap();
        let recipients = resolve_recipients(&db, &[g1.id]).unwrap();
        assert!(recipients.users.is_empty());
    }
}
