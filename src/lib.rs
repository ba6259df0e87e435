//! codewake: a multi-workspace semantic code index.

pub mod cache;
pub mod chunker;
pub mod config;
pub mod digest_tree;
pub mod embedding;
pub mod error;
pub mod index;
pub mod logging;
pub mod orchestrator;
pub mod scheduler;
pub mod watch;
pub mod worker;

pub use error::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

// Re-export key public types for convenience.
pub use config::Config;
pub use index::{DetailedStats, Hit, Tag};
pub use orchestrator::{IndexOrchestrator, IndexStats, IndexStatus, K_MAX_QUERY_CHARS};
pub use watch::{FileEvent, Watcher};
pub use worker::{ProgressSink, WorkerHost, WorkerMessage, WorkerOp, WorkerRequest};
