use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Serialize;

use crate::error::Error;

/// Supported embedding provider backends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EmbeddingProviderKind {
    /// A local in-process model (e.g. an ONNX/candle model on disk).
    Local,
    /// A remote HTTP embedding endpoint (OpenAI-compatible).
    Remote,
    /// Deterministic, dependency-free provider used in tests and dry runs.
    Mock,
}

impl FromStr for EmbeddingProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "mock" => Ok(Self::Mock),
            other => Err(Error::ConfigInvalid(format!(
                "unknown embedding provider '{other}': expected local, remote, or mock"
            ))),
        }
    }
}

/// Full configuration for codewake, loaded from environment / `.codewake` file / defaults.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    // Embedding provider selection.
    pub embedding_provider: EmbeddingProviderKind,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub remote_endpoint: Option<String>,
    pub remote_api_key: Option<String>,
    pub local_model_path: Option<PathBuf>,

    // FileDigestTree indexability (spec §4.1 / §6).
    pub include_extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub max_file_size: u64,

    // Chunking.
    pub max_chunk_tokens: usize,

    // Scheduling / batching (spec §4.6, §6).
    pub file_batch_size: usize,
    pub embedding_batch_size: usize,
    pub embedding_concurrency: usize,
    pub scan_slots: usize,

    // Cache / retention.
    pub cache_expiry_days: u64,
    pub orphan_expiry_days: u64,
    pub model_cache_home: PathBuf,

    // Watching.
    pub watch_enabled: bool,
    pub watch_debounce_ms: u64,

    // Retrieval.
    pub search_default_limit: usize,
}

/// Directories and extensions that are always excluded from file discovery.
pub const BUILTIN_IGNORE_PATTERNS: &[&str] = &[
    "!.claude/",
    "!.cursor/",
    "!.vscode/",
    "!.idea/",
    "!.git/",
    "!node_modules/",
    "!.obsidian/",
    "!__pycache__/",
    "!.next/",
    "!.nuxt/",
    "!.svelte-kit/",
    "!target/",
    "!dist/",
    "!build/",
    "!out/",
];

const DEFAULT_EXTENSIONS: &[&str] = &["rs", "ts", "tsx", "js", "jsx", "py", "go"];

impl Config {
    /// Load configuration with priority: shell env > `.codewake` file > `.env` file > built-in defaults.
    pub fn load(project_root: &Path) -> Result<Self, Error> {
        // Load .codewake file first (ignore if missing).
        // dotenvy::from_path does NOT override existing env vars,
        // so shell env always takes priority.
        let _ = dotenvy::from_path(project_root.join(".codewake"));

        // Load .env as a fallback for shared secrets (e.g., remote API keys).
        let _ = dotenvy::from_path(project_root.join(".env"));

        let embedding_provider =
            env_or_default("CODEWAKE_EMBEDDING_PROVIDER", "mock").parse::<EmbeddingProviderKind>()?;

        let embedding_model = env_or_default("CODEWAKE_EMBEDDING_MODEL", "local-minilm");
        let embedding_dimensions = parse_env::<usize>("CODEWAKE_EMBEDDING_DIMENSIONS", 384)?;
        let remote_endpoint = std::env::var("CODEWAKE_REMOTE_ENDPOINT").ok();
        let remote_api_key = std::env::var("CODEWAKE_REMOTE_API_KEY").ok();
        let local_model_path = std::env::var("CODEWAKE_LOCAL_MODEL_PATH").ok().map(PathBuf::from);

        let include_extensions = parse_comma_list_string(
            "CODEWAKE_INCLUDE_EXTENSIONS",
            DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        );
        let exclude_patterns = parse_comma_list_string("CODEWAKE_EXCLUDE_PATTERNS", vec![]);
        let max_file_size = parse_env::<u64>("CODEWAKE_MAX_FILE_SIZE", 1_000_000)?;

        let max_chunk_tokens = parse_env::<usize>("CODEWAKE_MAX_CHUNK_TOKENS", 256)?;

        let file_batch_size = parse_env::<usize>("CODEWAKE_FILE_BATCH_SIZE", 100)?;
        let embedding_batch_size = parse_env::<usize>("CODEWAKE_EMBEDDING_BATCH_SIZE", 32)?;
        let embedding_concurrency =
            parse_env::<usize>("CODEWAKE_EMBEDDING_CONCURRENCY", 3)?.clamp(1, 1000);
        let scan_slots = parse_env::<usize>("CODEWAKE_SCAN_SLOTS", 3)?;

        let cache_expiry_days = parse_env::<u64>("CODEWAKE_CACHE_EXPIRY_DAYS", 30)?;
        let orphan_expiry_days = parse_env::<u64>("CODEWAKE_ORPHAN_EXPIRY_DAYS", 30)?;
        let model_cache_home = std::env::var("CODEWAKE_MODEL_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::cache_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("codewake")
            });

        let watch_enabled = parse_env_bool("CODEWAKE_WATCH", true)?;
        let watch_debounce_ms = parse_env::<u64>("CODEWAKE_WATCH_DEBOUNCE_MS", 500)?;

        let search_default_limit = parse_env::<usize>("CODEWAKE_SEARCH_DEFAULT_LIMIT", 10)?;

        let config = Self {
            embedding_provider,
            embedding_model,
            embedding_dimensions,
            remote_endpoint,
            remote_api_key,
            local_model_path,
            include_extensions,
            exclude_patterns,
            max_file_size,
            max_chunk_tokens,
            file_batch_size,
            embedding_batch_size,
            embedding_concurrency,
            scan_slots,
            cache_expiry_days,
            orphan_expiry_days,
            model_cache_home,
            watch_enabled,
            watch_debounce_ms,
            search_default_limit,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate constraint invariants on the loaded config.
    fn validate(&self) -> Result<(), Error> {
        if self.embedding_dimensions == 0 {
            return Err(Error::ConfigInvalid("embedding_dimensions must be > 0".into()));
        }
        if self.embedding_batch_size == 0 {
            return Err(Error::ConfigInvalid("embedding_batch_size must be > 0".into()));
        }
        if self.file_batch_size == 0 {
            return Err(Error::ConfigInvalid("file_batch_size must be > 0".into()));
        }
        if self.scan_slots == 0 {
            return Err(Error::ConfigInvalid("scan_slots must be > 0".into()));
        }
        if self.max_chunk_tokens == 0 {
            return Err(Error::ConfigInvalid("max_chunk_tokens must be > 0".into()));
        }
        if matches!(self.embedding_provider, EmbeddingProviderKind::Remote) && self.remote_endpoint.is_none()
        {
            return Err(Error::ConfigInvalid(
                "remote provider requires CODEWAKE_REMOTE_ENDPOINT to be set".into(),
            ));
        }
        Ok(())
    }
}

/// Read an env var or return a default string value.
fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an env var into a typed value, using a default if not set.
fn parse_env<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr + ToString,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| Error::ConfigInvalid(format!("failed to parse {key}='{val}': {e}"))),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean env var (true/false/1/0).
fn parse_env_bool(key: &str, default: bool) -> Result<bool, Error> {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(Error::ConfigInvalid(format!(
                "failed to parse {key}='{val}': expected true/false/1/0/yes/no"
            ))),
        },
        Err(_) => Ok(default),
    }
}

/// Parse a comma-separated env var into Vec<String>, trimming whitespace.
fn parse_comma_list_string(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val.split(',').map(|s| s.trim().to_string()).collect(),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that read/write environment variables.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ALL_VARS: &[&str] = &[
        "CODEWAKE_EMBEDDING_PROVIDER",
        "CODEWAKE_EMBEDDING_MODEL",
        "CODEWAKE_EMBEDDING_DIMENSIONS",
        "CODEWAKE_REMOTE_ENDPOINT",
        "CODEWAKE_REMOTE_API_KEY",
        "CODEWAKE_LOCAL_MODEL_PATH",
        "CODEWAKE_INCLUDE_EXTENSIONS",
        "CODEWAKE_EXCLUDE_PATTERNS",
        "CODEWAKE_MAX_FILE_SIZE",
        "CODEWAKE_MAX_CHUNK_TOKENS",
        "CODEWAKE_FILE_BATCH_SIZE",
        "CODEWAKE_EMBEDDING_BATCH_SIZE",
        "CODEWAKE_EMBEDDING_CONCURRENCY",
        "CODEWAKE_SCAN_SLOTS",
        "CODEWAKE_CACHE_EXPIRY_DAYS",
        "CODEWAKE_ORPHAN_EXPIRY_DAYS",
        "CODEWAKE_MODEL_CACHE_HOME",
        "CODEWAKE_WATCH",
        "CODEWAKE_WATCH_DEBOUNCE_MS",
        "CODEWAKE_SEARCH_DEFAULT_LIMIT",
    ];

    fn clear_all() {
        for var in ALL_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn provider_kind_case_insensitive() {
        assert_eq!(
            "local".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Local
        );
        assert_eq!(
            "Remote".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Remote
        );
        assert_eq!(
            "MOCK".parse::<EmbeddingProviderKind>().unwrap(),
            EmbeddingProviderKind::Mock
        );
    }

    #[test]
    fn provider_kind_unknown_rejected() {
        let result = "unknown".parse::<EmbeddingProviderKind>();
        assert!(result.is_err());
    }

    #[test]
    fn default_values_match_spec() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_all();

        let config = Config::load(Path::new("/nonexistent")).unwrap();

        assert_eq!(config.embedding_provider, EmbeddingProviderKind::Mock);
        assert_eq!(config.embedding_dimensions, 384);
        assert_eq!(config.max_chunk_tokens, 256);
        assert_eq!(config.file_batch_size, 100);
        assert_eq!(config.embedding_batch_size, 32);
        assert_eq!(config.embedding_concurrency, 3);
        assert_eq!(config.scan_slots, 3);
        assert_eq!(config.cache_expiry_days, 30);
        assert_eq!(config.orphan_expiry_days, 30);
        assert!(config.watch_enabled);
        assert_eq!(config.watch_debounce_ms, 500);
        assert_eq!(config.search_default_limit, 10);
    }

    #[test]
    fn embedding_concurrency_clamped() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_all();
        std::env::set_var("CODEWAKE_EMBEDDING_CONCURRENCY", "5000");
        let config = Config::load(Path::new("/nonexistent")).unwrap();
        std::env::remove_var("CODEWAKE_EMBEDDING_CONCURRENCY");
        assert_eq!(config.embedding_concurrency, 1000);
    }

    #[test]
    fn validation_rejects_zero_dimensions() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_all();
        std::env::set_var("CODEWAKE_EMBEDDING_DIMENSIONS", "0");
        let result = Config::load(Path::new("/nonexistent"));
        std::env::remove_var("CODEWAKE_EMBEDDING_DIMENSIONS");
        assert!(result.is_err());
    }

    #[test]
    fn validation_rejects_zero_batch_size() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_all();
        std::env::set_var("CODEWAKE_EMBEDDING_BATCH_SIZE", "0");
        let result = Config::load(Path::new("/nonexistent"));
        std::env::remove_var("CODEWAKE_EMBEDDING_BATCH_SIZE");
        assert!(result.is_err());
    }

    #[test]
    fn validation_requires_remote_endpoint() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_all();
        std::env::set_var("CODEWAKE_EMBEDDING_PROVIDER", "remote");
        let result = Config::load(Path::new("/nonexistent"));
        std::env::remove_var("CODEWAKE_EMBEDDING_PROVIDER");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("remote"));
    }

    #[test]
    fn comma_separated_include_extensions() {
        let _lock = ENV_MUTEX.lock().unwrap();
        std::env::set_var("CODEWAKE_INCLUDE_EXTENSIONS", " rs , py ");
        let exts = parse_comma_list_string("CODEWAKE_INCLUDE_EXTENSIONS", vec![]);
        std::env::remove_var("CODEWAKE_INCLUDE_EXTENSIONS");
        assert_eq!(exts, vec!["rs".to_string(), "py".to_string()]);
    }

    #[test]
    fn parse_error_on_non_numeric() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_all();
        std::env::set_var("CODEWAKE_EMBEDDING_DIMENSIONS", "abc");
        let result = Config::load(Path::new("/nonexistent"));
        std::env::remove_var("CODEWAKE_EMBEDDING_DIMENSIONS");
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("CODEWAKE_EMBEDDING_DIMENSIONS"));
    }
}
