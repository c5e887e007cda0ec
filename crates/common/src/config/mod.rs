//! Configuration management for RagForge pipelines
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use crate::errors::{AppError, Result};
use crate::models::{CollectionSpec, DistanceMetric};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector index configuration
    #[serde(default)]
    pub index: IndexConfig,

    /// Chunking policy
    #[serde(default)]
    pub chunking: ChunkingSettings,

    /// Language model configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Query limits
    #[serde(default)]
    pub query: QuerySettings,

    /// Retry policy for every external call
    #[serde(default)]
    pub retry: RetryConfig,

    /// Ingestion throttling
    #[serde(default)]
    pub ingest: IngestSettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (EMBED_DIM)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Number of texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    /// Index backend: pgvector, memory
    #[serde(default = "default_index_backend")]
    pub backend: String,

    /// Collection name
    #[serde(default = "default_collection")]
    pub collection: String,

    /// Distance metric: cosine, euclid, dot
    #[serde(default = "default_metric")]
    pub metric: String,

    /// Database holding the pgvector collections
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Database URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkingSettings {
    /// Maximum chunk length in characters
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Characters shared by adjacent chunks
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Completion provider: openai, mock
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// API key for the language model
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Chat model
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Maximum output tokens
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuerySettings {
    /// top_k used when a request does not specify one
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Upper bound accepted for top_k
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Characters of chunk text reported per source
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Attempts per external call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Timeout applied to each individual call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IngestSettings {
    /// Ingestions admitted per minute (unset disables throttling)
    pub throttle_per_minute: Option<u32>,

    /// Per-document limit; repeat ingestions over it are skipped
    pub source_rate_limit: Option<SourceRateLimit>,
}

/// At most `limit` ingestions of one `source_id` per `period_secs`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceRateLimit {
    pub limit: u32,
    pub period_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default)]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_batch_size() -> usize { 64 }
fn default_index_backend() -> String { "pgvector".to_string() }
fn default_collection() -> String { "docs".to_string() }
fn default_metric() -> String { "cosine".to_string() }
fn default_database_url() -> String { "postgres://localhost/ragforge".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_max_chunk_size() -> usize { 1000 }
fn default_overlap_size() -> usize { 200 }
fn default_generation_provider() -> String { "openai".to_string() }
fn default_generation_model() -> String { "gpt-4o-mini".to_string() }
fn default_max_tokens() -> u32 { 1024 }
fn default_temperature() -> f32 { 0.2 }
fn default_top_k() -> usize { 5 }
fn default_max_top_k() -> usize { 50 }
fn default_excerpt_chars() -> usize { 300 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 200 }
fn default_max_backoff() -> u64 { 5_000 }
fn default_call_timeout() -> u64 { 30 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "ragforge".to_string() }

const EMBEDDING_PROVIDERS: &[&str] = &["openai", "mock"];
const GENERATION_PROVIDERS: &[&str] = &["openai", "mock"];
const INDEX_BACKENDS: &[&str] = &["pgvector", "memory"];

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__EMBEDDING__DIMENSION=1536
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Check cross-field invariants; a failure here must abort start-up
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimension == 0 {
            return Err(configuration("embedding.dimension must be greater than zero"));
        }
        if self.embedding.batch_size == 0 {
            return Err(configuration("embedding.batch_size must be greater than zero"));
        }
        if !EMBEDDING_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            return Err(configuration(format!(
                "unknown embedding provider '{}'",
                self.embedding.provider
            )));
        }
        if !GENERATION_PROVIDERS.contains(&self.generation.provider.as_str()) {
            return Err(configuration(format!(
                "unknown generation provider '{}'",
                self.generation.provider
            )));
        }
        if !INDEX_BACKENDS.contains(&self.index.backend.as_str()) {
            return Err(configuration(format!(
                "unknown index backend '{}'",
                self.index.backend
            )));
        }
        self.index.metric.parse::<DistanceMetric>()?;

        if self.chunking.max_chunk_size == 0 {
            return Err(configuration("chunking.max_chunk_size must be greater than zero"));
        }
        if self.chunking.overlap_size >= self.chunking.max_chunk_size {
            return Err(configuration(format!(
                "chunking.overlap_size ({}) must be smaller than chunking.max_chunk_size ({})",
                self.chunking.overlap_size, self.chunking.max_chunk_size
            )));
        }

        if self.query.max_top_k == 0 {
            return Err(configuration("query.max_top_k must be greater than zero"));
        }
        if self.query.default_top_k == 0 || self.query.default_top_k > self.query.max_top_k {
            return Err(configuration(format!(
                "query.default_top_k must be within 1..={}",
                self.query.max_top_k
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(configuration("retry.max_attempts must be at least 1"));
        }
        if self.retry.call_timeout_secs == 0 {
            return Err(configuration("retry.call_timeout_secs must be greater than zero"));
        }
        if self.ingest.throttle_per_minute == Some(0) {
            return Err(configuration("ingest.throttle_per_minute must be greater than zero"));
        }
        if let Some(limit) = &self.ingest.source_rate_limit {
            if limit.limit == 0 || limit.period_secs == 0 {
                return Err(configuration(
                    "ingest.source_rate_limit needs a positive limit and period_secs",
                ));
            }
        }

        Ok(())
    }

    /// Collection the pipelines read and write
    pub fn collection_spec(&self) -> Result<CollectionSpec> {
        Ok(CollectionSpec {
            name: self.index.collection.clone(),
            dimension: self.embedding.dimension,
            metric: self.index.metric.parse()?,
        })
    }
}

fn configuration(message: impl Into<String>) -> AppError {
    AppError::Configuration { message: message.into() }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_index_backend(),
            collection: default_collection(),
            metric: default_metric(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap_size: default_overlap_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_key: None,
            api_base: None,
            model: default_generation_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: 0,
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            chunking: ChunkingSettings::default(),
            generation: GenerationConfig::default(),
            query: QuerySettings::default(),
            retry: RetryConfig::default(),
            ingest: IngestSettings::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
