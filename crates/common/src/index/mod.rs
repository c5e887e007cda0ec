//! Vector index client abstraction
//!
//! A collection has a fixed dimension and distance metric. Scores returned by
//! every backend are normalized so that a higher score means more similar.

mod memory;
mod pgvector;

pub use memory::MemoryVectorIndex;
pub use pgvector::PgVectorIndex;

use crate::config::IndexConfig;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::models::{CollectionSpec, SearchFilter, SearchHit, VectorRecord};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;

/// Trait for vector index backends
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent, otherwise verify dimension and metric
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()>;

    /// Dimension and metric of an existing collection
    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionSpec>>;

    /// Write records atomically, overwriting any with the same id
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

    /// Atomically replace every record of `source_id` with `records`
    ///
    /// Concurrent replacements of the same source are serialized; the
    /// collection ends up holding exactly one of the written versions.
    async fn replace_source(
        &self,
        collection: &str,
        source_id: &str,
        records: &[VectorRecord],
    ) -> Result<()>;

    /// Remove every record of `source_id`, returning how many were removed
    async fn delete_source(&self, collection: &str, source_id: &str) -> Result<u64>;

    /// Top `top_k` records by descending score, ties broken by ascending id
    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>>;

    /// Number of stored records matching `filter`
    async fn count(&self, collection: &str, filter: &SearchFilter) -> Result<u64>;

    /// Backend name for logging
    fn backend(&self) -> &'static str;
}

/// Create a vector index client based on configuration
pub async fn create_index(config: &IndexConfig) -> Result<Arc<dyn VectorIndex>> {
    match config.backend.as_str() {
        "pgvector" => {
            let pool = DbPool::new(&config.database).await?;
            let index = PgVectorIndex::new(pool);
            index.bootstrap().await?;
            Ok(Arc::new(index))
        }
        "memory" => Ok(Arc::new(MemoryVectorIndex::new())),
        other => Err(AppError::Configuration {
            message: format!("unknown index backend '{}'", other),
        }),
    }
}

/// Reject a search before it reaches the backend
pub(crate) fn check_search(spec: &CollectionSpec, query: &[f32], top_k: usize) -> Result<()> {
    if top_k == 0 {
        return Err(AppError::InvalidQuery {
            message: "top_k must be a positive integer".to_string(),
        });
    }
    check_dimension(spec, query.len())
}

/// Reject a write batch before anything is written
pub(crate) fn check_records(
    spec: &CollectionSpec,
    source_id: Option<&str>,
    records: &[VectorRecord],
) -> Result<()> {
    for record in records {
        check_dimension(spec, record.dimension())?;
        if let Some(source_id) = source_id {
            if record.payload().source_id != source_id {
                return Err(AppError::Internal {
                    message: format!(
                        "record {} belongs to '{}', not '{}'",
                        record.id(),
                        record.payload().source_id,
                        source_id
                    ),
                });
            }
        }
    }
    Ok(())
}

fn check_dimension(spec: &CollectionSpec, actual: usize) -> Result<()> {
    if actual != spec.dimension {
        return Err(AppError::EmbeddingDimensionMismatch {
            expected: spec.dimension,
            actual,
        });
    }
    Ok(())
}

pub(crate) fn missing_collection(name: &str) -> AppError {
    AppError::VectorIndex {
        message: format!("collection '{}' does not exist", name),
        retryable: false,
    }
}

/// Descending score, then ascending id
pub(crate) fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}
