use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{StoreError, USERNAMES_TABLE, USERS_TABLE};

/// An account.  Never modified after signup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    /// PHC-format password hash; the plain password is never stored.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct UserStore {
    db: Arc<Database>,
}

impl UserStore {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new user with a fresh id.  Fails with
    /// [`StoreError::UsernameTaken`] when the username is in use; the check and
    /// the insert share one write transaction.
    pub fn create(&self, username: &str, password_hash: &str) -> Result<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&user)?;

        let tx = self.db.begin_write()?;
        {
            let mut names = tx.open_table(USERNAMES_TABLE)?;
            if names.get(username)?.is_some() {
                return Err(StoreError::UsernameTaken(username.to_string()).into());
            }
            names.insert(username, user.id.as_str())?;

            let mut users = tx.open_table(USERS_TABLE)?;
            users.insert(user.id.as_str(), bytes.as_slice())?;
        }
        tx.commit()?;

        tracing::info!(user_id = %user.id, "user created");
        Ok(user)
    }

    pub fn get(&self, id: &str) -> Result<Option<User>> {
        let tx = self.db.begin_read()?;
        let users = tx.open_table(USERS_TABLE)?;
        match users.get(id)? {
            None => Ok(None),
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        }
    }

    pub fn find_by_username(&self, username: &str) -> Result<Option<User>> {
        let id = {
            let tx = self.db.begin_read()?;
            let names = tx.open_table(USERNAMES_TABLE)?;
            match names.get(username)? {
                None => return Ok(None),
                Some(value) => value.value().to_string(),
            }
        };
        self.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::{Store, StoreError};

    fn store_in(dir: &TempDir) -> Store {
        Store::open(dir.path().join("db").join("mindful.redb")).unwrap()
    }

    #[test]
    fn create_then_lookup_by_name_and_id() {
        let dir = TempDir::new().unwrap();
        let users = store_in(&dir).users();

        let alice = users.create("alice", "$argon2id$fake").unwrap();
        assert_eq!(alice.username, "alice");
        assert!(uuid::Uuid::parse_str(&alice.id).is_ok());

        assert_eq!(users.find_by_username("alice").unwrap(), Some(alice.clone()));
        assert_eq!(users.get(&alice.id).unwrap(), Some(alice));
    }

    #[test]
    fn duplicate_username_is_rejected() {
        let dir = TempDir::new().unwrap();
        let users = store_in(&dir).users();
        users.create("alice", "h1").unwrap();

        let err = users.create("alice", "h2").unwrap_err();
        assert_eq!(
            err.downcast_ref::<StoreError>(),
            Some(&StoreError::UsernameTaken("alice".to_string()))
        );
        // The first account is untouched.
        assert_eq!(
            users.find_by_username("alice").unwrap().unwrap().password_hash,
            "h1"
        );
    }

    #[test]
    fn unknown_lookups_are_none() {
        let dir = TempDir::new().unwrap();
        let users = store_in(&dir).users();
        assert!(users.find_by_username("ghost").unwrap().is_none());
        assert!(users.get("no-such-id").unwrap().is_none());
    }

    #[test]
    fn users_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let id = store_in(&dir).users().create("carol", "h").unwrap().id;
        let reopened = store_in(&dir);
        assert_eq!(reopened.users().get(&id).unwrap().unwrap().username, "carol");
    }
}
