use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use mindful_config::MemoryConfig;
use mindful_llm::Embedder;

use crate::error::{MemoryError, validate_user_id};
use crate::index::VectorIndex;
use crate::schema::{Role, TranscriptRecord, normalize_whitespace};
use crate::transcript::Transcript;

/// Texts sent per embedding request when rebuilding an index.
const REINDEX_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub vectors: usize,
    pub transcript_records: usize,
}

/// Per-user long-term memory: one vector index file and one transcript file
/// per user, both keyed by user id.
pub struct VectorMemory {
    index_dir: PathBuf,
    transcript_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl VectorMemory {
    pub fn new(
        index_dir: impl Into<PathBuf>,
        transcript_dir: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            index_dir: index_dir.into(),
            transcript_dir: transcript_dir.into(),
            embedder,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &MemoryConfig, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(config.index_dir(), config.transcript_dir(), embedder)
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn index_path(&self, user_id: &str) -> Result<PathBuf, MemoryError> {
        let user_id = validate_user_id(user_id)?;
        Ok(self.index_dir.join(format!("index_{user_id}.bin")))
    }

    pub fn transcript_path(&self, user_id: &str) -> Result<PathBuf, MemoryError> {
        let user_id = validate_user_id(user_id)?;
        Ok(self.transcript_dir.join(format!("transcript_{user_id}.jsonl")))
    }

    fn transcript(&self, user_id: &str) -> Result<Transcript, MemoryError> {
        Ok(Transcript::new(self.transcript_path(user_id)?))
    }

    /// Exclusive access to one user's index and transcript.  Hold the guard
    /// across a whole load → store → save sequence.
    ///
    /// Entries nobody holds or awaits are dropped on each call, so the map
    /// only grows with the number of concurrently active users.
    pub async fn lock_user(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Clones are only taken under this mutex, so a count of one means idle.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(user_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// The user's index, or an empty one when no index file exists yet.
    pub async fn load(&self, user_id: &str) -> Result<VectorIndex> {
        let path = self.index_path(user_id)?;
        let exists = tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?;
        if !exists {
            debug!(user_id, "no index on disk, starting empty");
            return Ok(VectorIndex::new(self.dimension()));
        }

        let index = VectorIndex::read_from(&path).await?;
        if index.dimension() != self.dimension() {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension(),
                actual: index.dimension(),
            })
            .with_context(|| format!("loading {}", path.display()));
        }
        debug!(user_id, vectors = index.len(), "index loaded");
        Ok(index)
    }

    /// Embed `text` and append it to both the transcript and the in-memory
    /// index under one record id.  The index is not persisted; call
    /// [`save`](Self::save) afterwards.
    #[instrument(skip(self, index, text), fields(text_len = text.len()))]
    pub async fn store(
        &self,
        user_id: &str,
        index: &mut VectorIndex,
        text: &str,
        role: Role,
    ) -> Result<TranscriptRecord> {
        let transcript = self.transcript(user_id)?;
        let record = TranscriptRecord::new(role, normalize_whitespace(text));
        let embedding = self.embedder.embed(&record.text).await?;
        if embedding.len() != index.dimension() {
            return Err(MemoryError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedding.len(),
            }
            .into());
        }

        transcript.append(&record).await?;
        index.add(record.id, &embedding)?;
        debug!(id = %record.id, vectors = index.len(), "memory record stored");
        Ok(record)
    }

    /// Overwrite the user's index file with `index`.
    pub async fn save(&self, user_id: &str, index: &VectorIndex) -> Result<()> {
        let path = self.index_path(user_id)?;
        index.write_to(&path).await?;
        debug!(user_id, vectors = index.len(), path = %path.display(), "index saved");
        Ok(())
    }

    /// Texts of the `top_k` records most similar to `query`, nearest first,
    /// joined by newlines.  Empty when the user has no transcript.
    #[instrument(skip(self, query, index), fields(vectors = index.len()))]
    pub async fn retrieve(
        &self,
        user_id: &str,
        query: &str,
        index: &VectorIndex,
        top_k: usize,
    ) -> Result<String> {
        let records = self.transcript(user_id)?.load().await?;
        if records.is_empty() || index.is_empty() || top_k == 0 {
            return Ok(String::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let hits = index.search(&query_embedding, top_k)?;

        let by_id: HashMap<Uuid, &TranscriptRecord> =
            records.iter().map(|record| (record.id, record)).collect();
        let lines = hits
            .iter()
            .filter_map(|hit| by_id.get(&hit.id))
            .map(|record| record.text.as_str())
            .collect::<Vec<_>>();

        debug!(hits = hits.len(), matched = lines.len(), "memory retrieved");
        Ok(lines.join("\n"))
    }

    /// The last `n` transcript records rendered as `"{role}: {text}"`.
    pub async fn recent(&self, user_id: &str, n: usize) -> Result<String> {
        let lines = self
            .transcript(user_id)?
            .tail(n)
            .await?
            .iter()
            .map(TranscriptRecord::rendered)
            .collect::<Vec<_>>();
        Ok(lines.join("\n"))
    }

    pub async fn stats(&self, user_id: &str) -> Result<MemoryStats> {
        Ok(MemoryStats {
            vectors: self.load(user_id).await?.len(),
            transcript_records: self.transcript(user_id)?.load().await?.len(),
        })
    }

    /// Rebuild the user's index from the transcript and save it.  Used when
    /// the index file is lost, corrupt, or built with another embedding model.
    pub async fn reindex(&self, user_id: &str) -> Result<VectorIndex> {
        let records = self.transcript(user_id)?.load().await?;
        let mut index = VectorIndex::new(self.dimension());

        for batch in records.chunks(REINDEX_BATCH) {
            let texts = batch.iter().map(|record| record.text.clone()).collect::<Vec<_>>();
            let embeddings = self.embedder.embed_batch(&texts).await?;
            for (record, embedding) in batch.iter().zip(&embeddings) {
                index.add(record.id, embedding)?;
            }
        }

        self.save(user_id, &index).await?;
        info!(user_id, vectors = index.len(), "index rebuilt from transcript");
        Ok(index)
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn transcript_dir(&self) -> &Path {
        &self.transcript_dir
    }
}
