//! IndexOrchestrator: a registry of per-workspace engines behind one
//! façade, so a single process can index and query many workspaces at once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock as SyncRwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cache::EmbeddingCache;
use crate::chunker::{self, Chunk};
use crate::config::Config;
use crate::digest_tree::{Change, FileDigestTree};
use crate::embedding::provider::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::index::store::ApplyProgress;
use crate::index::{DetailedStats, FileRef, Hit, RefreshPlan, Tag, VectorStore};
use crate::scheduler::Scheduler;

/// Query strings longer than this raise `QueryTooLong`.
pub const K_MAX_QUERY_CHARS: usize = 10_000;

/// Aggregate status of a workspace's index.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub workspace: PathBuf,
    pub embedding_id: String,
    pub file_count: usize,
    pub row_count: Option<usize>,
    pub root_hash: String,
}

/// Aggregate statistics, best-effort.
pub type IndexStats = DetailedStats;

/// Per-workspace mutable engine: its loaded config, provider, and on-disk
/// digest tree path.
struct WorkspaceEngine {
    config: Config,
    provider: Arc<dyn EmbeddingProvider>,
    tree_path: PathBuf,
}

fn workspace_hash(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    use std::fmt::Write;
    let mut s = String::with_capacity(digest.len() * 2);
    for b in digest {
        write!(s, "{:02x}", b).unwrap();
    }
    s
}

/// Orchestrates full and incremental refreshes, retrieval, and lifecycle
/// management across many workspaces.
pub struct IndexOrchestrator {
    data_dir: PathBuf,
    cache: Arc<EmbeddingCache>,
    vector_store: Arc<VectorStore>,
    scheduler: Arc<Scheduler>,
    engines: RwLock<HashMap<PathBuf, Arc<SyncRwLock<WorkspaceEngine>>>>,
}

impl IndexOrchestrator {
    pub fn new(data_dir: PathBuf, scan_slots: usize, embed_permits: usize) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;
        let cache = Arc::new(EmbeddingCache::open(&data_dir.join("cache"))?);
        let vector_store = Arc::new(VectorStore::new(data_dir.clone()));
        let scheduler = Scheduler::new(scan_slots, embed_permits);
        Ok(Self {
            data_dir,
            cache,
            vector_store,
            scheduler,
            engines: RwLock::new(HashMap::new()),
        })
    }

    fn tree_path(&self, workspace: &Path) -> PathBuf {
        self.data_dir.join("trees").join(format!("{}.json", workspace_hash(workspace)))
    }

    async fn engine_for(&self, workspace: &Path) -> Result<Arc<SyncRwLock<WorkspaceEngine>>> {
        if let Some(engine) = self.engines.read().await.get(workspace) {
            return Ok(Arc::clone(engine));
        }

        let config = Config::load(workspace)?;
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config)?);
        let engine = Arc::new(SyncRwLock::new(WorkspaceEngine {
            config,
            provider,
            tree_path: self.tree_path(workspace),
        }));

        self.engines.write().await.insert(workspace.to_path_buf(), Arc::clone(&engine));
        Ok(engine)
    }

    /// Replace a workspace's embedding provider.
    ///
    /// Per the "singleton → owned handle" redesign note, this simply drops
    /// and reconstructs the per-workspace engine rather than mutating it in
    /// place; any in-flight refresh for the old provider's table is
    /// unaffected since tables are addressed by `embedding_id`.
    pub async fn set_embedding_provider(&self, workspace: &Path, config: Config) -> Result<()> {
        let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config)?);
        let engine = Arc::new(SyncRwLock::new(WorkspaceEngine {
            config,
            provider,
            tree_path: self.tree_path(workspace),
        }));
        self.engines.write().await.insert(workspace.to_path_buf(), engine);
        Ok(())
    }

    fn chunk_source(config: &Config, workspace: PathBuf) -> impl Fn(&FileRef) -> Vec<Chunk> {
        let max_chunk_tokens = config.max_chunk_tokens;
        move |file_ref: &FileRef| -> Vec<Chunk> {
            let abs_path = workspace.join(&file_ref.path);
            match std::fs::read_to_string(&abs_path) {
                Ok(content) => chunker::chunk(Path::new(&file_ref.path), &content, max_chunk_tokens),
                Err(e) => {
                    tracing::warn!(path = %abs_path.display(), error = %e, "failed to read file for chunking");
                    Vec::new()
                }
            }
        }
    }

    /// Full refresh of a workspace's index.
    pub async fn index(
        &self,
        workspace: &Path,
        progress: Option<&dyn ApplyProgress>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let engine = self.engine_for(workspace).await?;
        let mut guard = self.scheduler.enter(workspace).await?;

        let (config, provider, tree_path) = {
            let e = engine.read();
            (e.config.clone(), Arc::clone(&e.provider), e.tree_path.clone())
        };

        let mut tree = FileDigestTree::load(&tree_path, workspace.to_path_buf(), &config)
            .unwrap_or_else(|_| FileDigestTree::new(workspace.to_path_buf(), &config));
        let old_root = tree.root_hash().to_string();

        let scan_result = tree.full_scan()?;
        let tag = Tag::new(workspace.to_path_buf(), provider.embedding_id());

        let plan = if scan_result.changes.is_empty() && tree.root_hash() == old_root {
            let paths = tree.all_paths();
            let up_to_date = match self.vector_store.row_count(&tag) {
                Some(row_count) if !paths.is_empty() => {
                    (row_count as f64) >= 0.9 * (paths.len() as f64)
                }
                Some(_) => true,
                None => false,
            };

            if up_to_date {
                guard.finish();
                return Ok(());
            }

            debug!(workspace = %workspace.display(), "forced rebuild: vector store below freshness threshold");
            let compute = paths
                .iter()
                .filter_map(|p| tree.get_node(p).map(|n| FileRef {
                    path: p.clone(),
                    cache_key: n.content_hash.clone(),
                }))
                .collect();
            RefreshPlan {
                compute,
                delete: Vec::new(),
                preserve: Vec::new(),
            }
        } else {
            build_plan(&tree, &scan_result.changes)
        };

        tree.save(&tree_path)?;

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        guard.begin_embed().await?;

        let chunk_source = Self::chunk_source(&config, workspace.to_path_buf());
        self.vector_store
            .apply(
                &tag,
                &plan,
                chunk_source,
                provider.as_ref(),
                &self.cache,
                config.file_batch_size,
                config.embedding_batch_size,
                progress,
                cancel,
            )
            .await?;

        guard.begin_save();
        tree.save(&tree_path)?;
        guard.finish();

        info!(workspace = %workspace.display(), "full refresh complete");
        Ok(())
    }

    /// Incremental refresh driven by a set of touched paths.
    pub async fn on_files_changed(&self, workspace: &Path, touched: &[PathBuf]) -> Result<()> {
        let engine = self.engine_for(workspace).await?;
        let mut guard = self.scheduler.enter(workspace).await?;

        let (config, provider, tree_path) = {
            let e = engine.read();
            (e.config.clone(), Arc::clone(&e.provider), e.tree_path.clone())
        };

        let mut tree = FileDigestTree::load(&tree_path, workspace.to_path_buf(), &config)
            .unwrap_or_else(|_| FileDigestTree::new(workspace.to_path_buf(), &config));

        let scan_result = tree.update(touched)?;
        let tag = Tag::new(workspace.to_path_buf(), provider.embedding_id());
        let plan = build_plan(&tree, &scan_result.changes);

        tree.save(&tree_path)?;

        let cancel = CancellationToken::new();
        guard.begin_embed().await?;

        let chunk_source = Self::chunk_source(&config, workspace.to_path_buf());
        self.vector_store
            .apply(
                &tag,
                &plan,
                chunk_source,
                provider.as_ref(),
                &self.cache,
                config.file_batch_size,
                config.embedding_concurrency.max(1) * config.embedding_batch_size,
                None,
                &cancel,
            )
            .await?;

        guard.begin_save();
        tree.save(&tree_path)?;
        guard.finish();
        Ok(())
    }

    /// Run a retrieval query against a workspace's index.
    pub async fn retrieve(&self, workspace: &Path, query: &str, top_k: usize) -> Result<Vec<Hit>> {
        if query.chars().count() > K_MAX_QUERY_CHARS {
            return Err(Error::QueryTooLong {
                len: query.chars().count(),
                max: K_MAX_QUERY_CHARS,
            });
        }

        let engine = self.engine_for(workspace).await?;
        let (provider,) = {
            let e = engine.read();
            (Arc::clone(&e.provider),)
        };

        let vectors = provider.embed_batch(&[query.to_string()]).await?;
        let query_vec = vectors.into_iter().next().unwrap_or_default();
        let tag = Tag::new(workspace.to_path_buf(), provider.embedding_id());
        self.vector_store.knn(&query_vec, top_k, &[tag])
    }

    /// Delete a workspace's entire index: its vector table and digest tree.
    pub async fn delete_index(&self, workspace: &Path) -> Result<()> {
        let engine = self.engine_for(workspace).await?;
        let (provider, tree_path) = {
            let e = engine.read();
            (Arc::clone(&e.provider), e.tree_path.clone())
        };
        let tag = Tag::new(workspace.to_path_buf(), provider.embedding_id());
        self.vector_store.delete_table(&tag)?;
        if tree_path.exists() {
            std::fs::remove_file(&tree_path)?;
        }
        self.engines.write().await.remove(workspace);
        Ok(())
    }

    pub async fn status(&self, workspace: &Path) -> Result<IndexStatus> {
        let engine = self.engine_for(workspace).await?;
        let (config, provider, tree_path) = {
            let e = engine.read();
            (e.config.clone(), Arc::clone(&e.provider), e.tree_path.clone())
        };
        let tree = FileDigestTree::load(&tree_path, workspace.to_path_buf(), &config)
            .unwrap_or_else(|_| FileDigestTree::new(workspace.to_path_buf(), &config));
        let tag = Tag::new(workspace.to_path_buf(), provider.embedding_id());

        Ok(IndexStatus {
            workspace: workspace.to_path_buf(),
            embedding_id: provider.embedding_id(),
            file_count: tree.len(),
            row_count: self.vector_store.row_count(&tag),
            root_hash: tree.root_hash().to_string(),
        })
    }

    pub async fn stats(&self, workspace: &Path) -> Option<IndexStats> {
        let engine = self.engine_for(workspace).await.ok()?;
        let provider = {
            let e = engine.read();
            Arc::clone(&e.provider)
        };
        let tag = Tag::new(workspace.to_path_buf(), provider.embedding_id());
        self.vector_store.detailed_stats(&tag)
    }
}

/// Build a `RefreshPlan` from a digest-tree diff: added/modified paths
/// compute, deleted paths delete, everything else unchanged preserves.
fn build_plan(tree: &FileDigestTree, changes: &[Change]) -> RefreshPlan {
    let changed_paths: std::collections::HashSet<&str> = changes.iter().map(|c| c.path()).collect();

    let mut compute = Vec::new();
    let mut delete = Vec::new();

    for change in changes {
        match change {
            Change::Add(node) | Change::Modify(node) => compute.push(FileRef {
                path: node.relative_path.clone(),
                cache_key: node.content_hash.clone(),
            }),
            Change::Delete(path) => delete.push(FileRef {
                path: path.clone(),
                cache_key: String::new(),
            }),
        }
    }

    let preserve = tree
        .all_paths()
        .into_iter()
        .filter(|p| !changed_paths.contains(p.as_str()))
        .filter_map(|p| {
            tree.get_node(&p).map(|n| FileRef {
                path: p,
                cache_key: n.content_hash.clone(),
            })
        })
        .collect();

    RefreshPlan {
        compute,
        delete,
        preserve,
    }
}
