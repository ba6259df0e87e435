use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use model2vec_rs::model::StaticModel;

use crate::error::Error;

use super::provider::EmbeddingProvider;

/// In-process embedding provider backed by a static model2vec model,
/// loaded either from a local path or the configured model name (resolved
/// against the HuggingFace Hub cache).
pub struct LocalProvider {
    model_name: String,
    dimensions: usize,
    model: Mutex<StaticModel>,
}

impl LocalProvider {
    pub fn new(model_name: String, dimensions: usize, model_path: Option<PathBuf>) -> crate::Result<Self> {
        let source = model_path
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_name.clone());

        let model = StaticModel::from_pretrained(&source, None, None, None)
            .map_err(|e| Error::InitFailed(format!("failed to load local model '{source}': {e}")))?;

        Ok(Self {
            model_name,
            dimensions,
            model: Mutex::new(model),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let model = self.model.lock().map_err(|_| Error::EmbeddingFailed("local model lock poisoned".into()))?;
        let owned: Vec<String> = texts.to_vec();
        let vectors = model.encode(&owned);

        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(Error::EmbeddingFailed(format!(
                    "local model produced {}-dim vector, expected {}",
                    vector.len(),
                    self.dimensions
                )));
            }
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "local"
    }

    fn embedding_id(&self) -> String {
        format!("local:{}:{}", self.model_name, self.dimensions)
    }
}
