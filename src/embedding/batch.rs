//! Sub-batching embedding calls within a single workspace's embed phase.
//!
//! Sub-batches run strictly sequentially: embedding is CPU- or
//! network-bound, and concurrent calls either risk OOM (local models) or
//! provider-side rate limits (remote models).

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::provider::EmbeddingProvider;

/// Embed `texts` in sequential sub-batches of `batch_size`, checking
/// `cancel` between sub-batches.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<f32>>> {
    let mut out = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let vectors = provider.embed_batch(batch).await?;
        if vectors.len() != batch.len() {
            return Err(Error::EmbeddingFailed(format!(
                "provider returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }
        out.extend(vectors);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::mock::MockProvider;

    #[tokio::test]
    async fn embeds_all_texts_across_sub_batches() {
        let provider = MockProvider::new(8);
        let texts: Vec<String> = (0..10).map(|i| format!("text-{i}")).collect();
        let cancel = CancellationToken::new();

        let result = embed_in_batches(&provider, &texts, 3, &cancel).await.unwrap();
        assert_eq!(result.len(), 10);
    }

    #[tokio::test]
    async fn respects_cancellation_between_batches() {
        let provider = MockProvider::new(8);
        let texts: Vec<String> = (0..10).map(|i| format!("text-{i}")).collect();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = embed_in_batches(&provider, &texts, 3, &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn empty_input_yields_empty_output() {
        let provider = MockProvider::new(8);
        let texts: Vec<String> = Vec::new();
        let cancel = CancellationToken::new();

        let result = embed_in_batches(&provider, &texts, 3, &cancel).await.unwrap();
        assert!(result.is_empty());
    }
}
