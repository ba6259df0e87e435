//! Durable, cross-workspace embedding cache: maps
//! `(content-digest, embedding-model-id)` to a vector plus chunk metadata.
//!
//! Backed by `sled` rather than the single rkyv blob the vector store uses,
//! since this store needs real keyed upsert/delete across workspaces
//! instead of a single-writer whole-file rewrite.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sled::Transactional;
use tracing::debug;

use crate::error::{Error, Result};

/// One cached embedding, keyed primarily by `uuid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub uuid: String,
    pub cache_key: String,
    pub path: String,
    pub artifact_id: String,
    pub vector: Vec<f32>,
    pub start_line: usize,
    pub end_line: usize,
    pub contents: String,
    pub language_tag: Option<String>,
    /// Unix epoch seconds.
    pub created_at: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub rows: u64,
    pub bytes: u64,
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Durable embedding cache shared across all workspaces.
pub struct EmbeddingCache {
    entries: sled::Tree,
    by_cache_key: sled::Tree,
    by_path: sled::Tree,
    db: sled::Db,
}

const SEP: u8 = 0;

fn cache_key_prefix(cache_key: &str, artifact_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(cache_key.len() + artifact_id.len() + 1);
    key.extend_from_slice(cache_key.as_bytes());
    key.push(SEP);
    key.extend_from_slice(artifact_id.as_bytes());
    key.push(SEP);
    key
}

fn path_prefix(path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(path.len() + 1);
    key.extend_from_slice(path.as_bytes());
    key.push(SEP);
    key
}

impl EmbeddingCache {
    /// Open (creating if absent) the cache database at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let db = sled::open(dir).map_err(|e| Error::Cache(format!("failed to open sled db: {e}")))?;
        let entries = db
            .open_tree("entries")
            .map_err(|e| Error::Cache(format!("failed to open 'entries' tree: {e}")))?;
        let by_cache_key = db
            .open_tree("by_cache_key")
            .map_err(|e| Error::Cache(format!("failed to open 'by_cache_key' tree: {e}")))?;
        let by_path = db
            .open_tree("by_path")
            .map_err(|e| Error::Cache(format!("failed to open 'by_path' tree: {e}")))?;
        Ok(Self {
            entries,
            by_cache_key,
            by_path,
            db,
        })
    }

    /// Every entry whose `(cache_key, artifact_id)` matches. Ordering is
    /// unspecified.
    pub fn get(&self, cache_key: &str, artifact_id: &str) -> Result<Vec<CacheEntry>> {
        let prefix = cache_key_prefix(cache_key, artifact_id);
        let mut out = Vec::new();
        for kv in self.by_cache_key.scan_prefix(&prefix) {
            let (key, _) = kv.map_err(|e| Error::Cache(e.to_string()))?;
            let uuid = &key[prefix.len()..];
            if let Some(entry) = self.get_by_uuid(uuid)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    /// Every entry whose `path` matches, restricted to `artifact_id`.
    /// Grounded lookup for `VectorStore::apply`'s preserve phase: an
    /// unchanged file may hold several differently-digested chunks, so
    /// reuse is addressed by path rather than by a single chunk `cache_key`.
    pub fn get_by_path(&self, path: &str, artifact_id: &str) -> Result<Vec<CacheEntry>> {
        let prefix = path_prefix(path);
        let mut out = Vec::new();
        for kv in self.by_path.scan_prefix(&prefix) {
            let (key, _) = kv.map_err(|e| Error::Cache(e.to_string()))?;
            let uuid = &key[prefix.len()..];
            if let Some(entry) = self.get_by_uuid(uuid)? {
                if entry.artifact_id == artifact_id {
                    out.push(entry);
                }
            }
        }
        Ok(out)
    }

    fn get_by_uuid(&self, uuid: &[u8]) -> Result<Option<CacheEntry>> {
        match self.entries.get(uuid).map_err(|e| Error::Cache(e.to_string()))? {
            Some(bytes) => {
                let entry: CacheEntry =
                    bincode::deserialize(&bytes).map_err(|e| Error::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Insert or replace entries by `uuid`, atomically as a single batch:
    /// either every row in `entries` lands, or none do.
    pub fn put(&self, entries: &[CacheEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut entries_batch = sled::Batch::default();
        let mut by_cache_key_batch = sled::Batch::default();
        let mut by_path_batch = sled::Batch::default();

        for entry in entries {
            let bytes = bincode::serialize(entry).map_err(|e| Error::Serialization(e.to_string()))?;
            entries_batch.insert(entry.uuid.as_bytes(), bytes);

            let mut ck_key = cache_key_prefix(&entry.cache_key, &entry.artifact_id);
            ck_key.extend_from_slice(entry.uuid.as_bytes());
            by_cache_key_batch.insert(ck_key, &[]);

            let mut path_key = path_prefix(&entry.path);
            path_key.extend_from_slice(entry.uuid.as_bytes());
            by_path_batch.insert(path_key, &[]);
        }

        (&self.entries, &self.by_cache_key, &self.by_path)
            .transaction(|(entries, by_cache_key, by_path)| {
                entries.apply_batch(&entries_batch)?;
                by_cache_key.apply_batch(&by_cache_key_batch)?;
                by_path.apply_batch(&by_path_batch)?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError<sled::Error>| {
                Error::Cache(format!("put transaction failed: {e}"))
            })?;

        debug!(count = entries.len(), "put cache entries");
        Ok(())
    }

    /// Remove every entry for `path`.
    pub fn delete_by_path(&self, path: &str) -> Result<()> {
        let prefix = path_prefix(path);
        let uuids: Vec<Vec<u8>> = self
            .by_path
            .scan_prefix(&prefix)
            .map(|kv| kv.map(|(k, _)| k[prefix.len()..].to_vec()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Cache(e.to_string()))?;

        for uuid in uuids {
            self.remove_uuid(&uuid)?;
        }
        Ok(())
    }

    /// Remove the entry for `(path, cache_key)`, if present.
    pub fn delete(&self, path: &str, cache_key: &str) -> Result<()> {
        let prefix = path_prefix(path);
        let uuids: Vec<Vec<u8>> = self
            .by_path
            .scan_prefix(&prefix)
            .map(|kv| kv.map(|(k, _)| k[prefix.len()..].to_vec()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Cache(e.to_string()))?;

        for uuid in uuids {
            if let Some(entry) = self.get_by_uuid(&uuid)? {
                if entry.cache_key == cache_key {
                    self.remove_uuid(&uuid)?;
                }
            }
        }
        Ok(())
    }

    fn remove_uuid(&self, uuid: &[u8]) -> Result<()> {
        let Some(entry) = self.get_by_uuid(uuid)? else {
            return Ok(());
        };

        self.entries.remove(uuid).map_err(|e| Error::Cache(e.to_string()))?;

        let mut ck_key = cache_key_prefix(&entry.cache_key, &entry.artifact_id);
        ck_key.extend_from_slice(uuid);
        self.by_cache_key
            .remove(ck_key)
            .map_err(|e| Error::Cache(e.to_string()))?;

        let mut path_key = path_prefix(&entry.path);
        path_key.extend_from_slice(uuid);
        self.by_path
            .remove(path_key)
            .map_err(|e| Error::Cache(e.to_string()))?;

        Ok(())
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<()> {
        self.entries.clear().map_err(|e| Error::Cache(e.to_string()))?;
        self.by_cache_key.clear().map_err(|e| Error::Cache(e.to_string()))?;
        self.by_path.clear().map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let rows = self.entries.len() as u64;
        let mut bytes = 0u64;
        for kv in self.entries.iter() {
            let (_, v) = kv.map_err(|e| Error::Cache(e.to_string()))?;
            bytes += v.len() as u64;
        }
        Ok(CacheStats { rows, bytes })
    }

    /// Remove every entry whose `created_at` is older than `age`.
    pub fn evict_older_than(&self, age: Duration) -> Result<usize> {
        let cutoff = now_unix().saturating_sub(age.as_secs());
        let mut evicted = 0;
        let uuids: Vec<Vec<u8>> = self
            .entries
            .iter()
            .keys()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Cache(e.to_string()))?;

        for uuid in uuids {
            if let Some(entry) = self.get_by_uuid(&uuid)? {
                if entry.created_at < cutoff {
                    self.remove_uuid(&uuid)?;
                    evicted += 1;
                }
            }
        }
        Ok(evicted)
    }

    /// Block until pending writes are durable on disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush().map_err(|e| Error::Cache(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(uuid: &str, cache_key: &str, artifact_id: &str, path: &str) -> CacheEntry {
        CacheEntry {
            uuid: uuid.into(),
            cache_key: cache_key.into(),
            path: path.into(),
            artifact_id: artifact_id.into(),
            vector: vec![0.1, 0.2, 0.3],
            start_line: 1,
            end_line: 5,
            contents: "fn x() {}".into(),
            language_tag: Some("rust".into()),
            created_at: now_unix(),
        }
    }

    #[test]
    fn put_then_get_by_cache_key_and_artifact() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(dir.path()).unwrap();
        let e = entry("u1", "digest-a", "model-x", "a.rs");
        cache.put(&[e.clone()]).unwrap();

        let found = cache.get("digest-a", "model-x").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0], e);

        assert!(cache.get("digest-a", "model-y").unwrap().is_empty());
    }

    #[test]
    fn put_replaces_by_uuid() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(dir.path()).unwrap();
        let mut e = entry("u1", "digest-a", "model-x", "a.rs");
        cache.put(&[e.clone()]).unwrap();

        e.contents = "fn x() { 1 + 1; }".into();
        cache.put(&[e.clone()]).unwrap();

        let found = cache.get("digest-a", "model-x").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].contents, "fn x() { 1 + 1; }");
    }

    #[test]
    fn get_by_path_returns_every_chunk_for_unchanged_file() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(dir.path()).unwrap();
        cache
            .put(&[
                entry("u1", "d1", "model-x", "a.rs"),
                entry("u2", "d2", "model-x", "a.rs"),
                entry("u3", "d3", "model-x", "b.rs"),
            ])
            .unwrap();

        let found = cache.get_by_path("a.rs", "model-x").unwrap();
        assert_eq!(found.len(), 2);
        assert!(cache.get_by_path("a.rs", "model-y").unwrap().is_empty());
    }

    #[test]
    fn delete_by_path_removes_all_entries_for_path() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(dir.path()).unwrap();
        cache
            .put(&[
                entry("u1", "d1", "model-x", "a.rs"),
                entry("u2", "d2", "model-x", "a.rs"),
                entry("u3", "d3", "model-x", "b.rs"),
            ])
            .unwrap();

        cache.delete_by_path("a.rs").unwrap();

        assert!(cache.get("d1", "model-x").unwrap().is_empty());
        assert!(cache.get("d2", "model-x").unwrap().is_empty());
        assert_eq!(cache.get("d3", "model-x").unwrap().len(), 1);
    }

    #[test]
    fn delete_single_path_cache_key_pair() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(dir.path()).unwrap();
        cache
            .put(&[entry("u1", "d1", "model-x", "a.rs"), entry("u2", "d2", "model-x", "a.rs")])
            .unwrap();

        cache.delete("a.rs", "d1").unwrap();

        assert!(cache.get("d1", "model-x").unwrap().is_empty());
        assert_eq!(cache.get("d2", "model-x").unwrap().len(), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(dir.path()).unwrap();
        cache.put(&[entry("u1", "d1", "model-x", "a.rs")]).unwrap();
        cache.clear().unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.rows, 0);
    }

    #[test]
    fn stats_reports_row_count() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(dir.path()).unwrap();
        cache
            .put(&[entry("u1", "d1", "model-x", "a.rs"), entry("u2", "d2", "model-x", "b.rs")])
            .unwrap();
        let stats = cache.stats().unwrap();
        assert_eq!(stats.rows, 2);
        assert!(stats.bytes > 0);
    }

    #[test]
    fn evict_older_than_removes_stale_entries() {
        let dir = TempDir::new().unwrap();
        let cache = EmbeddingCache::open(dir.path()).unwrap();
        let mut old = entry("u1", "d1", "model-x", "a.rs");
        old.created_at = now_unix().saturating_sub(1000);
        let fresh = entry("u2", "d2", "model-x", "b.rs");
        cache.put(&[old, fresh]).unwrap();

        let evicted = cache.evict_older_than(Duration::from_secs(100)).unwrap();
        assert_eq!(evicted, 1);
        assert!(cache.get("d1", "model-x").unwrap().is_empty());
        assert_eq!(cache.get("d2", "model-x").unwrap().len(), 1);
    }
}
