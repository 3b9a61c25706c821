pub mod crisis;
pub mod prompt_builder;
mod runtime;

pub use crisis::CrisisDetector;
pub use runtime::{ChatRuntime, Reply, ReplyKind};
