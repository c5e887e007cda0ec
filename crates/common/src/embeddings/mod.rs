//! Embedding service abstraction
//!
//! Provides a unified interface for embedding providers:
//! - OpenAI-compatible `/embeddings` endpoints
//! - A deterministic offline provider for tests and local runs
//!
//! Providers only perform one request. [`Embedder`] adds batching, the
//! retry policy and the `EMBED_DIM` check on every returned vector.

use crate::cancel::CancellationToken;
use crate::config::EmbeddingConfig;
use crate::errors::{parse_retry_after, AppError, Result, Service};
use crate::metrics;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A single embedding request against an external service
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `texts` in one call, returning vectors in input order
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI embedding client
pub struct OpenAIEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAIEmbeddingProvider {
    /// Create a new OpenAI embedding provider
    pub fn new(
        api_key: String,
        model: String,
        dimension: usize,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key,
            model,
            dimension,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }

    /// Only the v3 models accept a requested output size
    fn requested_dimensions(&self) -> Option<usize> {
        self.model.starts_with("text-embedding-3").then_some(self.dimension)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = OpenAIRequest {
            input: texts,
            model: &self.model,
            dimensions: self.requested_dimensions(),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::from_transport(Service::Embedding, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::from_status(Service::Embedding, status, retry_after, &body));
        }

        let mut result: OpenAIResponse = response.json().await.map_err(|e| {
            AppError::EmbeddingService {
                message: format!("Failed to parse response: {}", e),
                retryable: false,
            }
        })?;

        result.data.sort_by_key(|e| e.index);
        Ok(result.data.into_iter().map(|e| e.embedding).collect())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic offline embedder
///
/// Hashes lower-cased word tokens into signed buckets and L2-normalizes the
/// result. Texts sharing vocabulary land close together, which is enough to
/// exercise retrieval without a network.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bytes) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

/// Batched, retried, dimension-checked embedding client
#[derive(Clone)]
pub struct Embedder {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl Embedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        dimension: usize,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            dimension,
            batch_size: batch_size.max(1),
            retry,
        }
    }

    /// Get the model name
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Get the embedding dimension every vector must have
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed a single text (queries)
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        self.embed_request(&texts)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::EmbeddingService {
                message: "Empty response".to_string(),
                retryable: false,
            })
    }

    /// Embed many texts (ingestion), one retried request per batch
    ///
    /// Cancellation is honoured between batches; a batch already sent is
    /// allowed to complete.
    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for (batch_index, batch) in texts.chunks(self.batch_size).enumerate() {
            cancel.check("embedding batch")?;
            debug!(
                batch = batch_index,
                batch_size = batch.len(),
                embedded = all_embeddings.len(),
                total = texts.len(),
                "Embedding batch"
            );
            all_embeddings.extend(self.embed_request(batch).await?);
        }

        Ok(all_embeddings)
    }

    async fn embed_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let result = self
            .retry
            .run("embed", || self.provider.embed_texts(texts))
            .await
            .map_err(|e| e.into_service_error(Service::Embedding))
            .and_then(|vectors| self.validate(texts.len(), vectors));

        metrics::record_embedding(
            start.elapsed().as_secs_f64(),
            self.model_name(),
            texts.len(),
            result.is_ok(),
        );
        result
    }

    fn validate(&self, expected_count: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected_count {
            return Err(AppError::EmbeddingService {
                message: format!(
                    "Expected {} embeddings, service returned {}",
                    expected_count,
                    vectors.len()
                ),
                retryable: false,
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(AppError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig, retry: RetryPolicy) -> Result<Embedder> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "embedding.api_key is required for the openai provider".to_string(),
            })?;
            Arc::new(OpenAIEmbeddingProvider::new(
                key,
                config.model.clone(),
                config.dimension,
                config.api_base.clone(),
                retry.call_timeout(),
            )?)
        }
        "mock" => Arc::new(MockEmbeddingProvider::new(config.dimension)),
        other => {
            return Err(AppError::Configuration {
                message: format!("unknown embedding provider '{}'", other),
            })
        }
    };

    Ok(Embedder::new(provider, config.dimension, config.batch_size, retry))
}
