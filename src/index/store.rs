//! VectorStore: a registry of per-workspace, per-artifact physical
//! tables, keyed by a deterministic hash of `(directory, artifact_id,
//! optional branch)`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::{CacheEntry, EmbeddingCache};
use crate::chunker::Chunk;
use crate::embedding::batch::embed_in_batches;
use crate::embedding::provider::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::state::VectorTable;
use crate::index::types::{DetailedStats, FileRef, Hit, RefreshPlan, Tag, VectorRow};

/// Reports progress during `apply`.
pub trait ApplyProgress: Send + Sync {
    fn on_file_batch(&self, completed: usize, total: usize);
}

impl<F: Fn(usize, usize) + Send + Sync> ApplyProgress for F {
    fn on_file_batch(&self, completed: usize, total: usize) {
        self(completed, total)
    }
}

/// Registry of vector tables, backed by files under `<data_dir>/vectors/`.
pub struct VectorStore {
    data_dir: PathBuf,
    tables: RwLock<HashMap<String, Arc<VectorTable>>>,
}

impl VectorStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            tables: RwLock::new(HashMap::new()),
        }
    }

    fn table_path(&self, tag: &Tag) -> PathBuf {
        self.data_dir.join("vectors").join(format!("{}.idx", tag.table_name()))
    }

    /// Idempotent: creates the physical table if it doesn't exist yet, and
    /// loads it into the in-memory registry either way.
    pub fn ensure_table(&self, tag: &Tag, dimensions: usize) -> Result<()> {
        let name = tag.table_name();
        if self.tables.read().contains_key(&name) {
            return Ok(());
        }
        let path = self.table_path(tag);
        let table = VectorTable::open_or_create(&path, dimensions, &tag.artifact_id)?;
        self.tables.write().insert(name, Arc::new(table));
        Ok(())
    }

    fn get_table(&self, tag: &Tag) -> Result<Arc<VectorTable>> {
        let name = tag.table_name();
        if let Some(table) = self.tables.read().get(&name) {
            return Ok(table.clone());
        }
        let path = self.table_path(tag);
        let table = Arc::new(VectorTable::open(&path)?);
        self.tables.write().insert(name, table.clone());
        Ok(table)
    }

    pub fn has_table(&self, tag: &Tag) -> bool {
        self.table_path(tag).exists() || self.tables.read().contains_key(&tag.table_name())
    }

    pub fn row_count(&self, tag: &Tag) -> Option<usize> {
        self.get_table(tag).ok().map(|t| t.row_count())
    }

    pub fn detailed_stats(&self, tag: &Tag) -> Option<DetailedStats> {
        self.get_table(tag).ok().map(|t| t.detailed_stats())
    }

    pub fn delete_table(&self, tag: &Tag) -> Result<()> {
        self.tables.write().remove(&tag.table_name());
        let path = self.table_path(tag);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Apply a refresh plan: deletes, then cache-preserved inserts, then
    /// freshly computed embeddings, honoring cancellation between steps.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        tag: &Tag,
        plan: &RefreshPlan,
        chunk_source: impl Fn(&FileRef) -> Vec<Chunk>,
        provider: &dyn EmbeddingProvider,
        cache: &EmbeddingCache,
        file_batch_size: usize,
        embedding_batch_size: usize,
        progress: Option<&dyn ApplyProgress>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.ensure_table(tag, provider.dimensions())?;
        let table = self.get_table(tag)?;

        // Step 1: deletions. The whole file's cache entries go too (an
        // unchanged file's chunks are addressed by path, not a single
        // chunk-level cache_key, so the narrower `cache.delete` by
        // `(path, cache_key)` pair would leave sibling chunks orphaned).
        for file_ref in &plan.delete {
            table.delete_by_path(&file_ref.path)?;
            cache.delete_by_path(&file_ref.path)?;
        }

        // Step 2: preserved files, reusing cached vectors. Delete first so
        // repeated incremental refreshes over an unchanged file don't
        // accumulate duplicate rows.
        for file_ref in &plan.preserve {
            let entries = cache.get_by_path(&file_ref.path, &tag.artifact_id)?;
            if !entries.is_empty() {
                table.delete_by_path(&file_ref.path)?;
                table.insert_rows(&entries.iter().map(entry_to_row).collect::<Vec<_>>())?;
            }
        }

        // Step 3: freshly computed files, in file-batches.
        let total_batches = plan.compute.chunks(file_batch_size.max(1)).count();
        for (batch_idx, file_batch) in plan.compute.chunks(file_batch_size.max(1)).enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            for file_ref in file_batch {
                table.delete_by_path(&file_ref.path)?;
            }

            let mut all_chunks = Vec::new();
            for file_ref in file_batch {
                all_chunks.extend(chunk_source(file_ref));
            }

            if all_chunks.is_empty() {
                if let Some(p) = progress {
                    p.on_file_batch(batch_idx + 1, total_batches);
                }
                continue;
            }

            let texts: Vec<String> = all_chunks.iter().map(|c| c.content.clone()).collect();
            let vectors = embed_in_batches(provider, &texts, embedding_batch_size, cancel).await?;

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut rows = Vec::with_capacity(all_chunks.len());
            let mut cache_entries = Vec::with_capacity(all_chunks.len());
            let created_at = crate::cache::now_unix();

            for (chunk, vector) in all_chunks.iter().zip(vectors.into_iter()) {
                let uuid = uuid::Uuid::new_v4().to_string();
                let path = chunk.workspace_rel_path.to_string_lossy().into_owned();
                rows.push(VectorRow {
                    uuid: uuid.clone(),
                    cache_key: chunk.digest.clone(),
                    path: path.clone(),
                    vector: vector.clone(),
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    contents: chunk.content.clone(),
                    language_tag: chunk.language_tag.clone(),
                });
                cache_entries.push(CacheEntry {
                    uuid,
                    cache_key: chunk.digest.clone(),
                    path,
                    artifact_id: tag.artifact_id.clone(),
                    vector,
                    start_line: chunk.start_line,
                    end_line: chunk.end_line,
                    contents: chunk.content.clone(),
                    language_tag: chunk.language_tag.clone(),
                    created_at,
                });
            }

            table.insert_rows(&rows)?;
            cache.put(&cache_entries)?;

            debug!(batch = batch_idx + 1, total = total_batches, rows = rows.len(), "file-batch applied");
            if let Some(p) = progress {
                p.on_file_batch(batch_idx + 1, total_batches);
            }
        }

        table.save()?;
        info!(tag = %tag.table_name(), "apply complete");
        Ok(())
    }

    /// Globally sorted ascending by distance across the tags queried, then
    /// truncated to `k`. Ties break on `(path, start_line)`.
    pub fn knn(&self, query_vec: &[f32], k: usize, tags: &[Tag]) -> Result<Vec<Hit>> {
        let mut all_hits = Vec::new();
        for tag in tags {
            if let Ok(table) = self.get_table(tag) {
                all_hits.extend(table.knn(query_vec, k)?);
            }
        }

        all_hits.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        all_hits.truncate(k);
        Ok(all_hits)
    }
}

fn entry_to_row(entry: &CacheEntry) -> VectorRow {
    VectorRow {
        uuid: entry.uuid.clone(),
        cache_key: entry.cache_key.clone(),
        path: entry.path.clone(),
        vector: entry.vector.clone(),
        start_line: entry.start_line,
        end_line: entry.end_line,
        contents: entry.contents.clone(),
        language_tag: entry.language_tag.clone(),
    }
}

pub fn workspace_data_dir(root: &Path) -> PathBuf {
    root.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::MockProvider;
    use tempfile::TempDir;

    fn chunk(path: &str, content: &str) -> Chunk {
        Chunk {
            workspace_rel_path: PathBuf::from(path),
            digest: format!("digest-{content}"),
            content: content.to_string(),
            start_line: 1,
            end_line: 1,
            language_tag: Some("rust".into()),
            scope_path: vec![],
            is_sub_split: false,
        }
    }

    #[tokio::test]
    async fn apply_computes_and_persists_rows() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::new(dir.path().join("data"));
        let cache = EmbeddingCache::open(&dir.path().join("cache")).unwrap();
        let provider = MockProvider::new(8);
        let tag = Tag::new(PathBuf::from("/ws"), provider.embedding_id());

        let plan = RefreshPlan {
            compute: vec![FileRef {
                path: "a.rs".into(),
                cache_key: "digest-fn a() {}".into(),
            }],
            delete: vec![],
            preserve: vec![],
        };

        let cancel = CancellationToken::new();
        store
            .apply(
                &tag,
                &plan,
                |_file_ref| vec![chunk("a.rs", "fn a() {}")],
                &provider,
                &cache,
                100,
                32,
                None,
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(store.row_count(&tag), Some(1));
        assert_eq!(cache.get("digest-fn a() {}", &tag.artifact_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn apply_preserve_reuses_cached_vector() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::new(dir.path().join("data"));
        let cache = EmbeddingCache::open(&dir.path().join("cache")).unwrap();
        let provider = MockProvider::new(8);
        let tag = Tag::new(PathBuf::from("/ws"), provider.embedding_id());
        store.ensure_table(&tag, 8).unwrap();

        cache
            .put(&[CacheEntry {
                uuid: "u1".into(),
                cache_key: "d1".into(),
                path: "a.rs".into(),
                artifact_id: tag.artifact_id.clone(),
                vector: vec![0.1; 8],
                start_line: 1,
                end_line: 1,
                contents: "fn a() {}".into(),
                language_tag: Some("rust".into()),
                created_at: crate::cache::now_unix(),
            }])
            .unwrap();

        let plan = RefreshPlan {
            compute: vec![],
            delete: vec![],
            preserve: vec![FileRef {
                path: "a.rs".into(),
                cache_key: "d1".into(),
            }],
        };
        let cancel = CancellationToken::new();
        store
            .apply(&tag, &plan, |_| vec![], &provider, &cache, 100, 32, None, &cancel)
            .await
            .unwrap();

        assert_eq!(store.row_count(&tag), Some(1));
    }

    #[tokio::test]
    async fn apply_delete_removes_rows_and_cache() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::new(dir.path().join("data"));
        let cache = EmbeddingCache::open(&dir.path().join("cache")).unwrap();
        let provider = MockProvider::new(8);
        let tag = Tag::new(PathBuf::from("/ws"), provider.embedding_id());

        let plan = RefreshPlan {
            compute: vec![FileRef {
                path: "a.rs".into(),
                cache_key: "digest-fn a() {}".into(),
            }],
            delete: vec![],
            preserve: vec![],
        };
        let cancel = CancellationToken::new();
        store
            .apply(&tag, &plan, |_| vec![chunk("a.rs", "fn a() {}")], &provider, &cache, 100, 32, None, &cancel)
            .await
            .unwrap();
        assert_eq!(store.row_count(&tag), Some(1));

        let delete_plan = RefreshPlan {
            compute: vec![],
            delete: vec![FileRef {
                path: "a.rs".into(),
                cache_key: "digest-fn a() {}".into(),
            }],
            preserve: vec![],
        };
        store
            .apply(&tag, &delete_plan, |_| vec![], &provider, &cache, 100, 32, None, &cancel)
            .await
            .unwrap();
        assert_eq!(store.row_count(&tag), Some(0));
    }

    #[tokio::test]
    async fn apply_respects_cancellation() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::new(dir.path().join("data"));
        let cache = EmbeddingCache::open(&dir.path().join("cache")).unwrap();
        let provider = MockProvider::new(8);
        let tag = Tag::new(PathBuf::from("/ws"), provider.embedding_id());

        let plan = RefreshPlan {
            compute: vec![FileRef {
                path: "a.rs".into(),
                cache_key: "digest-fn a() {}".into(),
            }],
            delete: vec![],
            preserve: vec![],
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = store
            .apply(&tag, &plan, |_| vec![chunk("a.rs", "fn a() {}")], &provider, &cache, 100, 32, None, &cancel)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn knn_merges_and_sorts_across_tags() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::new(dir.path().join("data"));
        let tag_a = Tag::new(PathBuf::from("/ws"), "mock:8");
        let tag_b = tag_a.clone().with_branch("feature");

        store.ensure_table(&tag_a, 3).unwrap();
        store.ensure_table(&tag_b, 3).unwrap();

        let table_a = store.get_table(&tag_a).unwrap();
        table_a
            .insert_rows(&[VectorRow {
                uuid: "a".into(),
                cache_key: "da".into(),
                path: "a.rs".into(),
                vector: vec![1.0, 0.0, 0.0],
                start_line: 1,
                end_line: 1,
                contents: "fn a() {}".into(),
                language_tag: None,
            }])
            .unwrap();

        let table_b = store.get_table(&tag_b).unwrap();
        table_b
            .insert_rows(&[VectorRow {
                uuid: "b".into(),
                cache_key: "db".into(),
                path: "b.rs".into(),
                vector: vec![1.0, 0.0, 0.0],
                start_line: 1,
                end_line: 1,
                contents: "fn b() {}".into(),
                language_tag: None,
            }])
            .unwrap();

        let hits = store.knn(&[1.0, 0.0, 0.0], 5, &[tag_a, tag_b]).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "a.rs");
        assert_eq!(hits[1].path, "b.rs");
    }
}
