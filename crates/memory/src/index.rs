//! Exact nearest-neighbour index over one user's memory embeddings.
//!
//! Vectors are stored contiguously and searched by brute force under squared
//! Euclidean (L2) distance.  Each vector carries the id of the transcript
//! record it was computed from.
//!
//! # On-disk format
//!
//! `bincode` (standard config) encoding of [`VectorIndex`], written to a
//! `.tmp` sibling and renamed into place.  `format_version` is checked on read.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bincode::{Decode, Encode};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::MemoryError;

pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Upper bound on the bytes a decoded index may claim, about 340k records at
/// 768 dimensions.  Length prefixes beyond it are rejected before allocating.
pub const MAX_INDEX_BYTES: usize = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub id: Uuid,
    /// Squared L2 distance to the query.
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct VectorIndex {
    format_version: u32,
    dimension: usize,
    ids: Vec<u128>,
    /// Row-major, `ids.len() * dimension` components.
    vectors: Vec<f32>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            format_version: INDEX_FORMAT_VERSION,
            dimension,
            ids: Vec::new(),
            vectors: Vec::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.ids.iter().map(|raw| Uuid::from_u128(*raw))
    }

    pub fn add(&mut self, id: Uuid, vector: &[f32]) -> Result<(), MemoryError> {
        self.check_dimension(vector)?;
        self.ids.push(id.as_u128());
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    /// The `k` stored vectors closest to `query`, nearest first.  Returns
    /// fewer than `k` hits when the index holds fewer vectors.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, MemoryError> {
        self.check_dimension(query)?;
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = self
            .vectors
            .chunks_exact(self.dimension.max(1))
            .zip(&self.ids)
            .map(|(row, id)| SearchHit {
                id: Uuid::from_u128(*id),
                distance: squared_l2(row, query),
            })
            .collect::<Vec<_>>();

        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(k);
        Ok(hits)
    }

    pub async fn read_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("reading vector index {}", path.display()))?;
        if bytes.len() > MAX_INDEX_BYTES {
            bail!(
                "vector index {} is {} bytes, limit is {MAX_INDEX_BYTES}",
                path.display(),
                bytes.len()
            );
        }
        let config = bincode::config::standard().with_limit::<MAX_INDEX_BYTES>();
        let (index, _): (Self, usize) = bincode::decode_from_slice(&bytes, config)
            .with_context(|| format!("decoding vector index {}", path.display()))?;

        if index.format_version != INDEX_FORMAT_VERSION {
            bail!(
                "vector index {} has format version {}, expected {}",
                path.display(),
                index.format_version,
                INDEX_FORMAT_VERSION
            );
        }
        let expected_components = index.ids.len().checked_mul(index.dimension);
        if expected_components != Some(index.vectors.len()) {
            bail!(
                "vector index {} is truncated: {} components for {} ids of dimension {}",
                path.display(),
                index.vectors.len(),
                index.ids.len(),
                index.dimension
            );
        }
        Ok(index)
    }

    /// Overwrite `path` with this index.  Crash-safe: the bytes go to a `.tmp`
    /// sibling first and are renamed over the original after `fsync`.
    pub async fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = bincode::encode_to_vec(self, bincode::config::standard())
            .context("encoding vector index")?;
        let tmp_path = tmp_sibling(path);

        let write_result: Result<()> = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), MemoryError> {
        if vector.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "index.bin".to_string());
    path.with_file_name(format!("{filename}.tmp"))
}
