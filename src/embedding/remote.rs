use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;

use super::provider::EmbeddingProvider;

/// Remote HTTP embedding provider (OpenAI-compatible `/embeddings` endpoint).
///
/// `embedding_id` folds in the endpoint host, model name, and declared
/// dimension, so pointing at a different host or model always lands in a
/// disjoint VectorStore table.
pub struct RemoteProvider {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl RemoteProvider {
    pub fn new(endpoint: String, api_key: Option<String>, model: String, dimensions: usize) -> Self {
        Self {
            endpoint,
            api_key,
            model,
            dimensions,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint_host(&self) -> String {
        reqwest::Url::parse(&self.endpoint)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "unknown-host".to_string())
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteProvider {
    async fn embed_batch(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                Error::EmbeddingFailed(format!("network failure contacting {}: {e}", self.endpoint_host()))
            } else {
                Error::EmbeddingFailed(format!("request to {} failed: {e}", self.endpoint_host()))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Error::EmbeddingFailed(format!(
                "authentication failed against {}: HTTP {status}",
                self.endpoint_host()
            )));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::EmbeddingFailed(format!(
                "rate limited by {}: HTTP {status}",
                self.endpoint_host()
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(Error::EmbeddingFailed(format!(
                "{} returned HTTP {status}: {message}",
                self.endpoint_host()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFailed(format!("invalid response body: {e}")))?;

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for vector in &vectors {
            if vector.len() != self.dimensions {
                return Err(Error::EmbeddingFailed(format!(
                    "dimension mismatch: provider returned {}-dim vector, expected {}",
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
        "remote"
    }

    fn embedding_id(&self) -> String {
        format!("remote:{}:{}:{}", self.endpoint_host(), self.model, self.dimensions)
    }
}
