use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Bot,
}

impl Role {
    /// Prefix used when a record is rendered into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Bot => "bot",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One line of a user's memory transcript.
///
/// The same `id` is stored next to the record's embedding in the
/// [`VectorIndex`](crate::index::VectorIndex), so search hits are joined back
/// to text by key rather than by insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub recorded_at: DateTime<Utc>,
}

impl TranscriptRecord {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            recorded_at: Utc::now(),
        }
    }

    /// `"{role}: {text}"`, the form used in the recent-messages window.
    pub fn rendered(&self) -> String {
        format!("{}: {}", self.role, self.text)
    }
}

/// Collapse every run of whitespace (including newlines) to a single space and
/// trim both ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
