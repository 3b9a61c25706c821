//! Embedded document store for accounts and the chat log, backed by [`redb`].
//!
//! # Tables
//!
//! | Name         | Key                   | Value                    |
//! |--------------|-----------------------|--------------------------|
//! | `users`      | user id (UUID string) | JSON [`User`]            |
//! | `usernames`  | username              | user id                  |
//! | `chat_turns` | `(user id, seq)`      | JSON [`ChatTurn`]        |
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use redb::{Database, TableDefinition};
use thiserror::Error;

pub mod chat_log;
pub mod users;

pub use chat_log::{ChatLog, ChatTurn, HistoryEntry};
pub use users::{User, UserStore};

pub(crate) const USERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("users");
pub(crate) const USERNAMES_TABLE: TableDefinition<&str, &str> = TableDefinition::new("usernames");
pub(crate) const CHAT_TURNS_TABLE: TableDefinition<(&str, u64), &[u8]> =
    TableDefinition::new("chat_turns");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("username {0:?} already exists")]
    UsernameTaken(String),
}

#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
    path: PathBuf,
}

impl Store {
    /// Open or create the database file at `path`, creating every table.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(&path)
            .with_context(|| format!("opening redb store at {}", path.display()))?;

        {
            let tx = db.begin_write()?;
            tx.open_table(USERS_TABLE)?;
            tx.open_table(USERNAMES_TABLE)?;
            tx.open_table(CHAT_TURNS_TABLE)?;
            tx.commit()?;
        }
        tracing::debug!(path = %path.display(), "document store opened");

        Ok(Self {
            db: Arc::new(db),
            path,
        })
    }

    pub fn users(&self) -> UserStore {
        UserStore::new(self.db.clone())
    }

    pub fn chat_log(&self) -> ChatLog {
        ChatLog::new(self.db.clone())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
