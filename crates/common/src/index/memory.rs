//! In-process vector index
//!
//! Holds collections in memory behind a single lock. Used by the `memory`
//! backend and throughout the test suites.

use super::{check_records, check_search, missing_collection, rank, VectorIndex};
use crate::errors::Result;
use crate::models::{CollectionSpec, SearchFilter, SearchHit, VectorRecord};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

struct Collection {
    spec: CollectionSpec,
    records: BTreeMap<Uuid, VectorRecord>,
}

/// Vector index kept entirely in memory
#[derive(Default)]
pub struct MemoryVectorIndex {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored records of a collection in id order
    pub async fn records(&self, collection: &str) -> Vec<VectorRecord> {
        self.collections
            .read()
            .await
            .get(collection)
            .map(|c| c.records.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let mut collections = self.collections.write().await;
        match collections.get(&spec.name) {
            Some(existing) => spec.verify(&existing.spec),
            None => {
                collections.insert(
                    spec.name.clone(),
                    Collection { spec: spec.clone(), records: BTreeMap::new() },
                );
                Ok(())
            }
        }
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionSpec>> {
        Ok(self.collections.read().await.get(name).map(|c| c.spec.clone()))
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing_collection(collection))?;

        check_records(&target.spec, None, records)?;
        for record in records {
            target.records.insert(record.id(), record.clone());
        }
        Ok(())
    }

    async fn replace_source(
        &self,
        collection: &str,
        source_id: &str,
        records: &[VectorRecord],
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing_collection(collection))?;

        check_records(&target.spec, Some(source_id), records)?;
        target.records.retain(|_, r| r.payload().source_id != source_id);
        for record in records {
            target.records.insert(record.id(), record.clone());
        }
        Ok(())
    }

    async fn delete_source(&self, collection: &str, source_id: &str) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing_collection(collection))?;

        let before = target.records.len();
        target.records.retain(|_, r| r.payload().source_id != source_id);
        Ok((before - target.records.len()) as u64)
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| missing_collection(collection))?;

        check_search(&target.spec, query, top_k)?;

        let mut hits: Vec<SearchHit> = target
            .records
            .values()
            .filter(|r| filter.matches(r.payload()))
            .map(|r| SearchHit {
                id: r.id(),
                score: target.spec.metric.similarity(query, r.vector()),
                payload: r.payload().clone(),
            })
            .collect();

        hits.sort_by(rank);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn count(&self, collection: &str, filter: &SearchFilter) -> Result<u64> {
        let collections = self.collections.read().await;
        let target = collections
            .get(collection)
            .ok_or_else(|| missing_collection(collection))?;

        Ok(target.records.values().filter(|r| filter.matches(r.payload())).count() as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AppError;
    use crate::models::{CharSpan, Chunk, DistanceMetric};
    use tokio_test::{assert_err, assert_ok};

    fn spec(dimension: usize) -> CollectionSpec {
        CollectionSpec {
            name: "docs".to_string(),
            dimension,
            metric: DistanceMetric::Cosine,
        }
    }

    fn record(source_id: &str, index: usize, vector: Vec<f32>) -> VectorRecord {
        let dimension = vector.len();
        let chunk = Chunk::new(
            source_id,
            index,
            format!("{} chunk {}", source_id, index),
            CharSpan { start: index * 10, end: index * 10 + 10 },
        );
        VectorRecord::new(chunk, vector, dimension).unwrap()
    }

    async fn index_with(records: &[VectorRecord]) -> MemoryVectorIndex {
        let index = MemoryVectorIndex::new();
        index.ensure_collection(&spec(2)).await.unwrap();
        index.upsert("docs", records).await.unwrap();
        index
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let index = MemoryVectorIndex::new();
        assert_ok!(index.ensure_collection(&spec(4)).await);
        assert_ok!(index.ensure_collection(&spec(4)).await);

        let err = index.ensure_collection(&spec(8)).await.unwrap_err();
        assert!(matches!(err, AppError::CollectionConfigMismatch { existing_dimension: 4, .. }));

        let mut dot = spec(4);
        dot.metric = DistanceMetric::Dot;
        assert_err!(index.ensure_collection(&dot).await);
    }

    #[tokio::test]
    async fn test_search_sorted_and_bounded() {
        let index = index_with(&[
            record("a.pdf", 0, vec![1.0, 0.0]),
            record("a.pdf", 1, vec![0.0, 1.0]),
            record("a.pdf", 2, vec![0.7, 0.7]),
        ])
        .await;

        let hits = index.search("docs", &[1.0, 0.1], 2, &SearchFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.sequence_index, 0);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let all = index.search("docs", &[1.0, 0.1], 50, &SearchFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_ties_broken_by_id() {
        let index = index_with(&[
            record("a.pdf", 0, vec![1.0, 0.0]),
            record("b.pdf", 0, vec![1.0, 0.0]),
            record("c.pdf", 0, vec![1.0, 0.0]),
        ])
        .await;

        let hits = index.search("docs", &[1.0, 0.0], 3, &SearchFilter::default()).await.unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[tokio::test]
    async fn test_zero_top_k_rejected() {
        let index = index_with(&[record("a.pdf", 0, vec![1.0, 0.0])]).await;
        let err = index.search("docs", &[1.0, 0.0], 0, &SearchFilter::default()).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidQuery { .. }));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_same_id() {
        let index = index_with(&[record("a.pdf", 0, vec![1.0, 0.0])]).await;
        index.upsert("docs", &[record("a.pdf", 0, vec![0.0, 1.0])]).await.unwrap();

        let stored = index.records("docs").await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].vector(), &[0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_leaves_index_unmodified() {
        let index = index_with(&[record("a.pdf", 0, vec![1.0, 0.0])]).await;

        let batch = vec![record("b.pdf", 0, vec![1.0, 0.0]), record("b.pdf", 1, vec![1.0, 0.0, 0.0])];
        let err = index.upsert("docs", &batch).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingDimensionMismatch { expected: 2, actual: 3 }));
        assert_eq!(index.count("docs", &SearchFilter::default()).await.unwrap(), 1);

        let err = index.search("docs", &[1.0], 1, &SearchFilter::default()).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingDimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn test_replace_source_removes_orphans() {
        let index = index_with(&[
            record("a.pdf", 0, vec![1.0, 0.0]),
            record("a.pdf", 1, vec![1.0, 0.0]),
            record("a.pdf", 2, vec![1.0, 0.0]),
            record("b.pdf", 0, vec![0.0, 1.0]),
        ])
        .await;

        index
            .replace_source("docs", "a.pdf", &[record("a.pdf", 0, vec![0.5, 0.5])])
            .await
            .unwrap();

        assert_eq!(index.count("docs", &SearchFilter::source("a.pdf")).await.unwrap(), 1);
        assert_eq!(index.count("docs", &SearchFilter::source("b.pdf")).await.unwrap(), 1);

        let foreign = index
            .replace_source("docs", "a.pdf", &[record("b.pdf", 3, vec![0.5, 0.5])])
            .await;
        assert_err!(foreign);
    }

    #[tokio::test]
    async fn test_filter_and_delete_source() {
        let index = index_with(&[
            record("a.pdf", 0, vec![1.0, 0.0]),
            record("b.pdf", 0, vec![1.0, 0.0]),
        ])
        .await;

        let hits = index.search("docs", &[1.0, 0.0], 5, &SearchFilter::source("b.pdf")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.source_id, "b.pdf");

        assert_eq!(index.delete_source("docs", "a.pdf").await.unwrap(), 1);
        assert_eq!(index.count("docs", &SearchFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zero_vector_scores_zero() {
        let index = index_with(&[
            record("a.pdf", 0, vec![0.0, 0.0]),
            record("a.pdf", 1, vec![-1.0, 0.0]),
        ])
        .await;

        let hits = index.search("docs", &[1.0, 0.0], 2, &SearchFilter::default()).await.unwrap();
        assert_eq!(hits[0].payload.sequence_index, 0);
        assert_eq!(hits[0].score, 0.0);
        assert!(hits[1].score < 0.0);
    }

    #[tokio::test]
    async fn test_missing_collection() {
        let index = MemoryVectorIndex::new();
        assert!(index.describe_collection("docs").await.unwrap().is_none());
        assert_err!(index.search("docs", &[1.0], 1, &SearchFilter::default()).await);
    }
}
