//! Data types for the per-workspace, per-artifact vector tables.

use std::collections::HashMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Table-naming key: `(directory, artifact_id, optional branch)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub directory: PathBuf,
    pub artifact_id: String,
    pub branch: Option<String>,
}

impl Tag {
    pub fn new(directory: PathBuf, artifact_id: impl Into<String>) -> Self {
        Self {
            directory,
            artifact_id: artifact_id.into(),
            branch: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Deterministic hash used as the physical table's file-name stem.
    pub fn table_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.directory.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.artifact_id.as_bytes());
        hasher.update([0u8]);
        if let Some(branch) = &self.branch {
            hasher.update(branch.as_bytes());
        }
        let digest = hasher.finalize();
        let mut s = String::with_capacity(digest.len() * 2);
        use std::fmt::Write;
        for b in digest {
            write!(s, "{:02x}", b).unwrap();
        }
        s
    }
}

/// A row to be written to a vector table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VectorRow {
    pub uuid: String,
    pub cache_key: String,
    pub path: String,
    pub vector: Vec<f32>,
    pub start_line: usize,
    pub end_line: usize,
    pub contents: String,
    pub language_tag: Option<String>,
}

/// Identifies a file within a refresh plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRef {
    pub path: String,
    pub cache_key: String,
}

/// The three-way partition driving `VectorStore::apply`.
#[derive(Debug, Clone, Default)]
pub struct RefreshPlan {
    pub compute: Vec<FileRef>,
    pub delete: Vec<FileRef>,
    pub preserve: Vec<FileRef>,
}

/// A single kNN result.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Hit {
    pub path: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    /// Distance; smaller is better.
    pub score: f32,
    pub language_tag: Option<String>,
}

/// Persisted form of a `VectorRow`, addressable by its usearch numeric key.
#[derive(Debug, Clone, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct StoredRow {
    pub uuid: String,
    pub cache_key: String,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub contents: String,
    pub language_tag: Option<String>,
}

impl From<&VectorRow> for StoredRow {
    fn from(row: &VectorRow) -> Self {
        Self {
            uuid: row.uuid.clone(),
            cache_key: row.cache_key.clone(),
            path: row.path.clone(),
            start_line: row.start_line,
            end_line: row.end_line,
            contents: row.contents.clone(),
            language_tag: row.language_tag.clone(),
        }
    }
}

/// Per-table metadata persisted alongside the HNSW graph.
#[derive(Debug, Clone, PartialEq, rkyv::Archive, rkyv::Serialize, rkyv::Deserialize)]
#[rkyv(derive(Debug))]
pub struct TableMetadata {
    /// Keyed by usearch numeric key (as a string, rkyv-friendly).
    pub rows: HashMap<String, StoredRow>,
    pub dimensions: usize,
    pub artifact_id: String,
    pub last_updated: u64,
}

impl TableMetadata {
    pub fn empty(dimensions: usize, artifact_id: impl Into<String>) -> Self {
        Self {
            rows: HashMap::new(),
            dimensions,
            artifact_id: artifact_id.into(),
            last_updated: 0,
        }
    }
}

/// Aggregate stats for a table, beyond a bare row count.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetailedStats {
    pub chunks: usize,
    pub unique_files: usize,
    pub language_histogram: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_is_deterministic() {
        let tag = Tag::new(PathBuf::from("/ws"), "local:minilm:384");
        assert_eq!(tag.table_name(), tag.table_name());
    }

    #[test]
    fn table_name_differs_by_artifact_id() {
        let a = Tag::new(PathBuf::from("/ws"), "local:minilm:384");
        let b = Tag::new(PathBuf::from("/ws"), "local:minilm-v2:384");
        assert_ne!(a.table_name(), b.table_name());
    }

    #[test]
    fn table_name_differs_by_branch() {
        let a = Tag::new(PathBuf::from("/ws"), "local:minilm:384");
        let b = a.clone().with_branch("feature-x");
        assert_ne!(a.table_name(), b.table_name());
    }
}
