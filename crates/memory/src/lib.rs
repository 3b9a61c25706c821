pub mod error;
pub mod index;
pub mod manager;
pub mod schema;
pub mod transcript;

pub use error::MemoryError;
pub use index::{SearchHit, VectorIndex};
pub use manager::{MemoryStats, VectorMemory};
pub use schema::{Role, TranscriptRecord, normalize_whitespace};
pub use transcript::Transcript;
