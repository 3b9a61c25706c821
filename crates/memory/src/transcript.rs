use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use crate::schema::TranscriptRecord;

/// Append-only JSONL transcript of one user's conversation.
#[derive(Debug, Clone)]
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &TranscriptRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening transcript {}", self.path.display()))?;
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        // The index save that follows refers to this record by id, so it must
        // reach disk first.
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    /// All records in append order.  A missing file is an empty transcript.
    pub async fn load(&self) -> Result<Vec<TranscriptRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading transcript {}", self.path.display()));
            }
        };
        let mut records = Vec::new();
        let mut corrupt_count = 0usize;

        for (line_idx, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<TranscriptRecord>(line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    corrupt_count += 1;
                    tracing::warn!(
                        line = line_idx + 1,
                        error = %err,
                        path = %self.path.display(),
                        "corrupt transcript record, skipping line"
                    );
                }
            }
        }

        if corrupt_count > 0 {
            tracing::warn!(
                corrupt_lines = corrupt_count,
                path = %self.path.display(),
                "transcript loaded with skipped corrupt lines"
            );
        }

        Ok(records)
    }

    /// The last `n` records, oldest first.
    pub async fn tail(&self, n: usize) -> Result<Vec<TranscriptRecord>> {
        let mut records = self.load().await?;
        if records.len() > n {
            records.drain(..records.len() - n);
        }
        Ok(records)
    }
}
