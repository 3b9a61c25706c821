use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable};
use serde::{Deserialize, Serialize};

use crate::CHAT_TURNS_TABLE;

/// One exchange: what the user said and what the bot answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub user_id: String,
    pub user_message: String,
    pub bot_response: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn now(
        user_id: impl Into<String>,
        user_message: impl Into<String>,
        bot_response: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_message: user_message.into(),
            bot_response: bot_response.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A turn as shown in the history panel, under its `YYYY-MM-DD` heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// `HH:MM`, UTC.
    pub time: String,
    pub user_message: String,
    pub bot_response: String,
}

/// Append-only log of chat turns, keyed by `(user_id, seq)`.
#[derive(Clone)]
pub struct ChatLog {
    db: Arc<Database>,
}

impl ChatLog {
    pub(crate) fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist `turn` after the user's latest one.  Returns its sequence number.
    pub fn append(&self, turn: &ChatTurn) -> Result<u64> {
        let bytes = serde_json::to_vec(turn)?;
        let user_id = turn.user_id.as_str();

        let tx = self.db.begin_write()?;
        let seq = {
            let mut table = tx.open_table(CHAT_TURNS_TABLE)?;
            let last = table
                .range((user_id, 0u64)..=(user_id, u64::MAX))?
                .next_back()
                .transpose()?
                .map(|(key, _)| key.value().1);
            let seq = last.map_or(0, |last| last + 1);
            table.insert((user_id, seq), bytes.as_slice())?;
            seq
        };
        tx.commit()?;

        tracing::debug!(user_id, seq, "chat turn logged");
        Ok(seq)
    }

    /// Every turn of `user_id`, oldest first.
    pub fn turns_for(&self, user_id: &str) -> Result<Vec<ChatTurn>> {
        let tx = self.db.begin_read()?;
        let table = tx.open_table(CHAT_TURNS_TABLE)?;
        let mut turns = Vec::new();
        for item in table.range((user_id, 0u64)..=(user_id, u64::MAX))? {
            let (_, value) = item?;
            turns.push(serde_json::from_slice(value.value())?);
        }
        Ok(turns)
    }

    /// The user's turns grouped by calendar date, dates ascending.
    pub fn history_for(&self, user_id: &str) -> Result<BTreeMap<String, Vec<HistoryEntry>>> {
        Ok(group_by_date(self.turns_for(user_id)?))
    }
}

pub fn group_by_date(turns: Vec<ChatTurn>) -> BTreeMap<String, Vec<HistoryEntry>> {
    let mut history: BTreeMap<String, Vec<HistoryEntry>> = BTreeMap::new();
    for turn in turns {
        let date = turn.timestamp.format("%Y-%m-%d").to_string();
        history.entry(date).or_default().push(HistoryEntry {
            time: turn.timestamp.format("%H:%M").to_string(),
            user_message: turn.user_message,
            bot_response: turn.bot_response,
        });
    }
    history
}
