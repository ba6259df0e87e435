//! Content-addressed file tree: detects per-file and aggregate changes
//! cheaply and deterministically.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::{Config, BUILTIN_IGNORE_PATTERNS};
use crate::error::Result;

/// A single file's digest-tree entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileNode {
    pub relative_path: String,
    pub size: u64,
    pub mtime: u64,
    pub content_hash: String,
}

/// A change produced by scanning the workspace against a prior snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Add(FileNode),
    Modify(FileNode),
    Delete(String),
}

impl Change {
    pub fn path(&self) -> &str {
        match self {
            Change::Add(n) | Change::Modify(n) => &n.relative_path,
            Change::Delete(p) => p,
        }
    }
}

/// Result of a scan: the set of changes observed.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub changes: Vec<Change>,
    /// Files skipped due to a read/permission error (treated as absent).
    pub errored_paths: Vec<String>,
}

/// Content-addressed snapshot of a workspace.
///
/// Nodes are kept in lexicographic path order (`BTreeMap`) so that
/// `full_scan` on identical contents always produces the same `root_hash`
/// regardless of filesystem traversal order.
#[derive(Debug, Clone)]
pub struct FileDigestTree {
    nodes: BTreeMap<String, FileNode>,
    root_hash: String,
    workspace_root: PathBuf,
    include_extensions: Vec<String>,
    exclude_patterns: Vec<String>,
    max_file_size: u64,
}

/// On-disk record: `(path, size, mtime, content_hash)` rows plus the
/// aggregate root_hash at time of write.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct PersistedTree {
    root_hash: String,
    nodes: Vec<FileNode>,
}

impl FileDigestTree {
    /// Create a fresh, empty tree rooted at `workspace_root`, configured
    /// per spec §4.1 (include_extensions / exclude_patterns / max_file_size).
    pub fn new(workspace_root: PathBuf, config: &Config) -> Self {
        let mut tree = Self {
            nodes: BTreeMap::new(),
            root_hash: empty_root_hash(),
            workspace_root,
            include_extensions: config.include_extensions.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
            max_file_size: config.max_file_size,
        };
        tree.recompute_root_hash();
        tree
    }

    /// Load a previously persisted tree; discards and returns a fresh empty
    /// tree if the stored root_hash does not match the recomputed one
    /// (spec §4.1 persistence invariant).
    pub fn load(path: &Path, workspace_root: PathBuf, config: &Config) -> Result<Self> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new(workspace_root, config));
            }
            Err(e) => return Err(e.into()),
        };

        let persisted: PersistedTree = serde_json::from_slice(&bytes)
            .map_err(|e| crate::error::Error::Serialization(e.to_string()))?;

        let mut nodes = BTreeMap::new();
        for node in persisted.nodes {
            nodes.insert(node.relative_path.clone(), node);
        }

        let mut tree = Self {
            nodes,
            root_hash: String::new(),
            workspace_root,
            include_extensions: config.include_extensions.clone(),
            exclude_patterns: config.exclude_patterns.clone(),
            max_file_size: config.max_file_size,
        };
        tree.recompute_root_hash();

        if tree.root_hash != persisted.root_hash {
            warn!("digest tree root_hash mismatch on load, discarding and rebuilding");
            return Ok(Self::new(tree.workspace_root, config));
        }

        Ok(tree)
    }

    /// Persist this tree as `(path, size, mtime, content_hash)` rows plus
    /// the root_hash, to `path`, atomically (write-tmp, fsync, rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let persisted = PersistedTree {
            root_hash: self.root_hash.clone(),
            nodes: self.nodes.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec(&persisted)
            .map_err(|e| crate::error::Error::Serialization(e.to_string()))?;

        let tmp_path = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            use std::io::Write;
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    pub fn root_hash(&self) -> &str {
        &self.root_hash
    }

    pub fn get_node(&self, relative_path: &str) -> Option<&FileNode> {
        self.nodes.get(relative_path)
    }

    pub fn all_paths(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A path is indexable iff its extension is in `include_extensions`,
    /// no exclude pattern matches any path segment, and its size is within
    /// `max_file_size`.
    pub fn is_indexable(&self, relative_path: &Path, size: u64) -> bool {
        if size > self.max_file_size {
            return false;
        }
        let ext_ok = relative_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| self.include_extensions.iter().any(|e| e == ext))
            .unwrap_or(false);
        if !ext_ok {
            return false;
        }

        for pattern in BUILTIN_IGNORE_PATTERNS {
            let dir_name = pattern.trim_start_matches('!').trim_end_matches('/');
            for component in relative_path.components() {
                if let std::path::Component::Normal(c) = component {
                    if c == dir_name {
                        return false;
                    }
                }
            }
        }

        let path_str = relative_path.to_string_lossy();
        for pattern in &self.exclude_patterns {
            if path_str.contains(pattern.as_str()) {
                return false;
            }
        }

        true
    }

    /// Walk the workspace, producing the full set of changes against the
    /// current snapshot, then mutate the tree in place and recompute
    /// `root_hash`.
    pub fn full_scan(&mut self) -> Result<ScanResult> {
        let mut seen = std::collections::BTreeSet::new();
        let mut result = ScanResult::default();

        let overrides = build_overrides(&self.workspace_root, &self.exclude_patterns)?;
        let walker = WalkBuilder::new(&self.workspace_root)
            .standard_filters(true)
            .overrides(overrides)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!(error = %e, "directory walk error, skipping subtree");
                    continue;
                }
            };

            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let relative = match path.strip_prefix(&self.workspace_root) {
                Ok(r) => r.to_path_buf(),
                Err(_) => continue,
            };

            let meta = match fs::metadata(path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %relative.display(), error = %e, "failed to stat file, skipping");
                    result.errored_paths.push(relative.to_string_lossy().into_owned());
                    continue;
                }
            };

            if !self.is_indexable(&relative, meta.len()) {
                continue;
            }

            let rel_str = relative.to_string_lossy().into_owned();
            seen.insert(rel_str.clone());

            match digest_file(path, &meta, rel_str.clone()) {
                Ok(node) => {
                    match self.nodes.get(&rel_str) {
                        Some(existing) if existing.content_hash == node.content_hash => {}
                        Some(_) => result.changes.push(Change::Modify(node.clone())),
                        None => result.changes.push(Change::Add(node.clone())),
                    }
                    self.nodes.insert(rel_str, node);
                }
                Err(e) => {
                    warn!(path = %rel_str, error = %e, "failed to read file, skipping");
                    result.errored_paths.push(rel_str);
                }
            }
        }

        let deleted: Vec<String> = self
            .nodes
            .keys()
            .filter(|p| !seen.contains(*p))
            .cloned()
            .collect();
        for path in deleted {
            self.nodes.remove(&path);
            result.changes.push(Change::Delete(path));
        }

        self.recompute_root_hash();
        Ok(result)
    }

    /// Incremental form: for each path in `touched_paths`, digest the file
    /// if it exists and is indexable, emitting the appropriate Change; if
    /// absent or non-indexable but present in the tree, emit `Delete`.
    pub fn update(&mut self, touched_paths: &[PathBuf]) -> Result<ScanResult> {
        let mut result = ScanResult::default();

        for relative in touched_paths {
            let rel_str = relative.to_string_lossy().into_owned();
            let full_path = self.workspace_root.join(relative);

            let meta = match fs::metadata(&full_path) {
                Ok(m) if m.is_file() => Some(m),
                _ => None,
            };

            let indexable = meta
                .as_ref()
                .map(|m| self.is_indexable(relative, m.len()))
                .unwrap_or(false);

            if !indexable {
                if self.nodes.remove(&rel_str).is_some() {
                    result.changes.push(Change::Delete(rel_str));
                }
                continue;
            }

            let meta = meta.unwrap();
            match digest_file(&full_path, &meta, rel_str.clone()) {
                Ok(node) => {
                    match self.nodes.get(&rel_str) {
                        Some(existing) if existing.content_hash == node.content_hash => {}
                        Some(_) => result.changes.push(Change::Modify(node.clone())),
                        None => result.changes.push(Change::Add(node.clone())),
                    }
                    self.nodes.insert(rel_str, node);
                }
                Err(e) => {
                    warn!(path = %rel_str, error = %e, "failed to read touched file, skipping");
                    result.errored_paths.push(rel_str);
                }
            }
        }

        self.recompute_root_hash();
        Ok(result)
    }

    /// `root_hash = H(concat(H(path_i) || content_hash_i))` over nodes in
    /// lexicographic path order (guaranteed by `BTreeMap` iteration).
    fn recompute_root_hash(&mut self) {
        let mut hasher = Sha256::new();
        for (path, node) in &self.nodes {
            let path_hash = Sha256::digest(path.as_bytes());
            hasher.update(path_hash);
            hasher.update(node.content_hash.as_bytes());
        }
        self.root_hash = hex::encode(hasher.finalize());
    }
}

fn empty_root_hash() -> String {
    hex::encode(Sha256::digest(b""))
}

fn digest_file(path: &Path, meta: &fs::Metadata, relative_path: String) -> Result<FileNode> {
    let bytes = fs::read(path)?;
    let content_hash = hex::encode(Sha256::digest(&bytes));
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    Ok(FileNode {
        relative_path,
        size: meta.len(),
        mtime,
        content_hash,
    })
}

fn build_overrides(dir: &Path, exclude_patterns: &[String]) -> Result<ignore::overrides::Override> {
    let mut builder = OverrideBuilder::new(dir);
    for pattern in BUILTIN_IGNORE_PATTERNS {
        builder
            .add(pattern)
            .map_err(|e| crate::error::Error::ConfigInvalid(format!("invalid built-in ignore pattern '{pattern}': {e}")))?;
    }
    for pattern in exclude_patterns {
        let negated = if pattern.starts_with('!') {
            pattern.clone()
        } else {
            format!("!{pattern}")
        };
        builder
            .add(&negated)
            .map_err(|e| crate::error::Error::ConfigInvalid(format!("invalid exclude pattern '{pattern}': {e}")))?;
    }
    builder
        .build()
        .map_err(|e| crate::error::Error::ConfigInvalid(format!("failed to build override rules: {e}")))
}

/// Thin hex-encoding helper, avoiding an extra crate dependency (sha2's
/// `Digest::finalize` returns a `GenericArray`, not a `String`).
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{:02x}", b).unwrap();
        }
        s
    }
}
