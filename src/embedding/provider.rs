use async_trait::async_trait;

use crate::config::{Config, EmbeddingProviderKind};
use crate::error::Error;

use super::local::LocalProvider;
use super::mock::MockProvider;
use super::remote::RemoteProvider;

/// Outcome of a provider's self-diagnostic `test()` call.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ProviderTestResult {
    pub ok: bool,
    pub error: Option<String>,
    pub dimension: Option<usize>,
}

/// Interface for turning text into vectors.
///
/// The core depends only on this trait; swapping providers changes
/// `embedding_id()`, which forces a disjoint VectorStore table rather than
/// silently mixing incompatible vectors (spec §4.5, §9 back-compat note).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, returning one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>>;

    /// The dimensionality of the embedding vectors produced.
    fn dimensions(&self) -> usize;

    /// Human-readable name for this provider.
    fn name(&self) -> &str;

    /// Stable identifier across runs: provider + model name + dimension,
    /// plus endpoint-host for remote providers or model revision for local
    /// ones. Used as the VectorStore/EmbeddingCache `artifact_id`.
    fn embedding_id(&self) -> String;

    /// Self-diagnostic: attempt a trivial embed call and report the outcome.
    async fn test(&self) -> ProviderTestResult {
        match self.embed_batch(&["ping".to_string()]).await {
            Ok(vectors) => ProviderTestResult {
                ok: true,
                error: None,
                dimension: vectors.first().map(|v| v.len()),
            },
            Err(e) => ProviderTestResult {
                ok: false,
                error: Some(e.to_string()),
                dimension: None,
            },
        }
    }
}

/// Create an embedding provider based on the current configuration.
pub fn create_provider(config: &Config) -> crate::Result<Box<dyn EmbeddingProvider>> {
    match config.embedding_provider {
        EmbeddingProviderKind::Local => Ok(Box::new(LocalProvider::new(
            config.embedding_model.clone(),
            config.embedding_dimensions,
            config.local_model_path.clone(),
        )?)),
        EmbeddingProviderKind::Remote => {
            let endpoint = config.remote_endpoint.clone().ok_or_else(|| {
                Error::ConfigInvalid("remote provider requires CODEWAKE_REMOTE_ENDPOINT".into())
            })?;
            Ok(Box::new(RemoteProvider::new(
                endpoint,
                config.remote_api_key.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            )))
        }
        EmbeddingProviderKind::Mock => Ok(Box::new(MockProvider::new(config.embedding_dimensions))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn base_config() -> Config {
        Config {
            embedding_provider: EmbeddingProviderKind::Mock,
            embedding_model: "mock-model".into(),
            embedding_dimensions: 128,
            remote_endpoint: None,
            remote_api_key: None,
            local_model_path: None,
            include_extensions: vec!["rs".into()],
            exclude_patterns: vec![],
            max_file_size: 1_000_000,
            max_chunk_tokens: 256,
            file_batch_size: 100,
            embedding_batch_size: 32,
            embedding_concurrency: 3,
            scan_slots: 3,
            cache_expiry_days: 30,
            orphan_expiry_days: 30,
            model_cache_home: PathBuf::from("/tmp/codewake-test"),
            watch_enabled: false,
            watch_debounce_ms: 500,
            search_default_limit: 10,
        }
    }

    #[test]
    fn create_provider_mock() {
        let config = base_config();
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "mock");
        assert_eq!(provider.dimensions(), 128);
    }

    #[test]
    fn create_provider_remote_requires_endpoint() {
        let mut config = base_config();
        config.embedding_provider = EmbeddingProviderKind::Remote;
        let result = create_provider(&config);
        assert!(result.is_err());
    }

    #[test]
    fn create_provider_remote_with_endpoint() {
        let mut config = base_config();
        config.embedding_provider = EmbeddingProviderKind::Remote;
        config.remote_endpoint = Some("https://api.example.com/v1/embeddings".into());
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.name(), "remote");
    }

    #[tokio::test]
    async fn mock_test_reports_ok() {
        let provider = MockProvider::new(16);
        let result = provider.test().await;
        assert!(result.ok);
        assert_eq!(result.dimension, Some(16));
    }
}
