use std::path::PathBuf;

/// All errors that can occur in codewake.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("initialization failed: {0}")]
    InitFailed(String),

    #[error("workspace not found: {}", path.display())]
    WorkspaceNotFound { path: PathBuf },

    #[error("already indexing workspace: {}", path.display())]
    AlreadyIndexing { path: PathBuf },

    #[error("operation cancelled")]
    Cancelled,

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("vector index failed: {0}")]
    VectorIndexFailed(String),

    #[error("retrieval failed: {0}")]
    RetrieveFailed(String),

    #[error("query too long: {len} characters (max {max})")]
    QueryTooLong { len: usize, max: usize },

    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("index not found: {}", path.display())]
    IndexNotFound { path: PathBuf },

    #[error("index corrupted: {0}")]
    IndexCorrupted(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("logging initialization failed: {0}")]
    Logging(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn init_failed_variant_formats() {
        let err = Error::InitFailed("grammar load error".into());
        assert_eq!(err.to_string(), "initialization failed: grammar load error");
    }

    #[test]
    fn workspace_not_found_variant_formats() {
        let err = Error::WorkspaceNotFound {
            path: PathBuf::from("/tmp/ws"),
        };
        assert!(err.to_string().contains("/tmp/ws"));
    }

    #[test]
    fn already_indexing_variant_formats() {
        let err = Error::AlreadyIndexing {
            path: PathBuf::from("/tmp/ws"),
        };
        assert!(err.to_string().contains("already indexing"));
    }

    #[test]
    fn cancelled_variant_formats() {
        assert_eq!(Error::Cancelled.to_string(), "operation cancelled");
    }

    #[test]
    fn embedding_failed_variant_formats() {
        let err = Error::EmbeddingFailed("timeout".into());
        assert_eq!(err.to_string(), "embedding failed: timeout");
    }

    #[test]
    fn vector_index_failed_variant_formats() {
        let err = Error::VectorIndexFailed("corrupt hnsw".into());
        assert_eq!(err.to_string(), "vector index failed: corrupt hnsw");
    }

    #[test]
    fn retrieve_failed_variant_formats() {
        let err = Error::RetrieveFailed("no such table".into());
        assert_eq!(err.to_string(), "retrieval failed: no such table");
    }

    #[test]
    fn query_too_long_variant_formats() {
        let err = Error::QueryTooLong {
            len: 20_000,
            max: 10_000,
        };
        let s = err.to_string();
        assert!(s.contains("20000"));
        assert!(s.contains("10000"));
    }

    #[test]
    fn config_invalid_variant_formats() {
        let err = Error::ConfigInvalid("embedding model not found".into());
        assert_eq!(err.to_string(), "configuration invalid: embedding model not found");
    }

    #[test]
    fn worker_crashed_variant_formats() {
        let err = Error::WorkerCrashed("exit code 137".into());
        assert_eq!(err.to_string(), "worker crashed: exit code 137");
    }

    #[test]
    fn index_not_found_variant_formats() {
        let err = Error::IndexNotFound {
            path: PathBuf::from("/tmp/idx"),
        };
        assert!(err.to_string().contains("/tmp/idx"));
    }

    #[test]
    fn index_corrupted_variant_formats() {
        let err = Error::IndexCorrupted("crc mismatch".into());
        assert_eq!(err.to_string(), "index corrupted: crc mismatch");
    }

    #[test]
    fn io_from_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        let err: Error = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn serialization_variant_formats() {
        let err = Error::Serialization("invalid rkyv".into());
        assert_eq!(err.to_string(), "serialization error: invalid rkyv");
    }

    #[test]
    fn cache_variant_formats() {
        let err = Error::Cache("sled open failed".into());
        assert_eq!(err.to_string(), "cache error: sled open failed");
    }

    #[test]
    fn error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
