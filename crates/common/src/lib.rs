//! RagForge Common Library
//!
//! Shared code for the ingestion and query pipelines including:
//! - Configuration management
//! - Error types and handling
//! - Chunk and vector record types
//! - Embedding client abstraction
//! - Vector index clients (pgvector, in-memory)
//! - Answer generation client
//! - Retry policy and cancellation
//! - Metrics and observability

pub mod cancel;
pub mod config;
pub mod db;
pub mod embeddings;
pub mod errors;
pub mod generation;
pub mod index;
pub mod metrics;
pub mod models;
pub mod retry;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, ErrorCode, Result};
pub use generation::AnswerGenerator;
pub use index::VectorIndex;
pub use models::{Chunk, CollectionSpec, DistanceMetric, SearchFilter, SearchHit, VectorRecord};
pub use retry::RetryPolicy;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 1536;
