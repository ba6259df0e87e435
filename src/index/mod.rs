pub mod state;
pub mod storage;
pub mod store;
pub mod types;

// Re-export key types for convenient access via `crate::index::*`
pub use state::VectorTable;
pub use store::{ApplyProgress, VectorStore};
pub use types::{DetailedStats, FileRef, Hit, RefreshPlan, StoredRow, Tag, TableMetadata, VectorRow};
