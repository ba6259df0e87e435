use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::RwLock;
use usearch::Index as HnswIndex;

use crate::error::{Error, Result};
use crate::index::storage;
use crate::index::types::{DetailedStats, Hit, StoredRow, TableMetadata, VectorRow};

/// Internal mutable state protected by the RwLock.
struct TableState {
    metadata: TableMetadata,
    hnsw: HnswIndex,
    /// uuid -> usearch numeric key.
    id_to_key: HashMap<String, u64>,
    next_key: u64,
    dirty: bool,
}

/// Thread-safe handle to a single memory-mapped vector table.
pub struct VectorTable {
    path: PathBuf,
    state: RwLock<TableState>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl VectorTable {
    /// Open an existing table file at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let (metadata, hnsw) = storage::load_table(path)?;

        let mut id_to_key = HashMap::new();
        let mut max_key: Option<u64> = None;
        for (key_str, row) in &metadata.rows {
            let key: u64 = key_str
                .parse()
                .map_err(|_| Error::IndexCorrupted(format!("non-numeric row key: {key_str}")))?;
            id_to_key.insert(row.uuid.clone(), key);
            max_key = Some(max_key.map_or(key, |m: u64| m.max(key)));
        }
        let next_key = max_key.map_or(0, |k| k + 1);

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(TableState {
                metadata,
                hnsw,
                id_to_key,
                next_key,
                dirty: false,
            }),
        })
    }

    /// Create a new, empty table file at the given path.
    pub fn create(path: &Path, dimensions: usize, artifact_id: &str) -> Result<Self> {
        let metadata = TableMetadata::empty(dimensions, artifact_id);
        let hnsw = storage::create_hnsw(dimensions)?;
        hnsw.reserve(10)
            .map_err(|e| Error::Serialization(format!("usearch reserve: {e}")))?;

        storage::write_table(path, &metadata, &hnsw)?;

        Ok(Self {
            path: path.to_path_buf(),
            state: RwLock::new(TableState {
                metadata,
                hnsw,
                id_to_key: HashMap::new(),
                next_key: 0,
                dirty: false,
            }),
        })
    }

    /// Open an existing table or create a new one if it doesn't exist.
    pub fn open_or_create(path: &Path, dimensions: usize, artifact_id: &str) -> Result<Self> {
        match Self::open(path) {
            Ok(table) => Ok(table),
            Err(Error::IndexNotFound { .. }) => Self::create(path, dimensions, artifact_id),
            Err(e) => Err(e),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.state.read().metadata.dimensions
    }

    /// Insert rows, each getting a fresh numeric key.
    pub fn insert_rows(&self, rows: &[VectorRow]) -> Result<()> {
        let mut state = self.state.write();
        for row in rows {
            let key = state.next_key;
            state.next_key += 1;
            state
                .hnsw
                .reserve(state.hnsw.size() + 1)
                .map_err(|e| Error::VectorIndexFailed(format!("reserve: {e}")))?;
            state
                .hnsw
                .add(key, &row.vector)
                .map_err(|e| Error::VectorIndexFailed(format!("add: {e}")))?;
            state.id_to_key.insert(row.uuid.clone(), key);
            state.metadata.rows.insert(key.to_string(), StoredRow::from(row));
        }
        state.dirty = true;
        Ok(())
    }

    /// Remove every row whose `path` matches.
    pub fn delete_by_path(&self, path: &str) -> Result<usize> {
        let mut state = self.state.write();
        let keys: Vec<(String, u64)> = state
            .metadata
            .rows
            .iter()
            .filter(|(_, row)| row.path == path)
            .map(|(k, row)| (k.clone(), state.id_to_key[&row.uuid]))
            .collect();

        for (key_str, key) in &keys {
            let _ = state.hnsw.remove(*key);
            if let Some(row) = state.metadata.rows.remove(key_str) {
                state.id_to_key.remove(&row.uuid);
            }
        }
        state.dirty = !keys.is_empty() || state.dirty;
        Ok(keys.len())
    }

    pub fn row_count(&self) -> usize {
        self.state.read().metadata.rows.len()
    }

    pub fn detailed_stats(&self) -> DetailedStats {
        let state = self.state.read();
        let mut unique_files = std::collections::HashSet::new();
        let mut language_histogram = HashMap::new();
        for row in state.metadata.rows.values() {
            unique_files.insert(row.path.clone());
            if let Some(lang) = &row.language_tag {
                *language_histogram.entry(lang.clone()).or_insert(0) += 1;
            }
        }
        DetailedStats {
            chunks: state.metadata.rows.len(),
            unique_files: unique_files.len(),
            language_histogram,
        }
    }

    /// k-nearest-neighbours search; ascending distance (smaller is better).
    pub fn knn(&self, query_vec: &[f32], k: usize) -> Result<Vec<Hit>> {
        let state = self.state.read();
        if state.metadata.rows.is_empty() {
            return Ok(Vec::new());
        }
        let matches = state
            .hnsw
            .search(query_vec, k)
            .map_err(|e| Error::RetrieveFailed(format!("hnsw search: {e}")))?;

        let mut hits = Vec::with_capacity(matches.keys.len());
        for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
            if let Some(row) = state.metadata.rows.get(&key.to_string()) {
                hits.push(Hit {
                    path: row.path.clone(),
                    content: row.contents.clone(),
                    start_line: row.start_line,
                    end_line: row.end_line,
                    score: *distance,
                    language_tag: row.language_tag.clone(),
                });
            }
        }
        Ok(hits)
    }

    /// Persist the table to disk if dirty.
    pub fn save(&self) -> Result<()> {
        let mut state = self.state.write();
        if !state.dirty {
            return Ok(());
        }
        state.metadata.last_updated = now_unix();
        storage::write_table(&self.path, &state.metadata, &state.hnsw)?;
        state.dirty = false;
        Ok(())
    }
}
