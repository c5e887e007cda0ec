//! Core record types shared by the ingestion and query pipelines

use crate::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Similarity function a collection is created with
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    Cosine,
    Euclid,
    Dot,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclid => "euclid",
            DistanceMetric::Dot => "dot",
        }
    }

    /// Similarity between two vectors, higher is closer for every metric
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let dot = dot(a, b);
                let norms = norm(a) * norm(b);
                if norms == 0.0 {
                    0.0
                } else {
                    dot / norms
                }
            }
            DistanceMetric::Euclid => {
                let squared: f32 = a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum();
                -squared.sqrt()
            }
            DistanceMetric::Dot => dot(a, b),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "euclid" | "euclidean" | "l2" => Ok(DistanceMetric::Euclid),
            "dot" | "inner_product" => Ok(DistanceMetric::Dot),
            other => Err(AppError::Configuration {
                message: format!("unknown distance metric '{}'", other),
            }),
        }
    }
}

/// Name, dimension and metric of a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
}

impl CollectionSpec {
    /// Fail unless `existing` was created with the same dimension and metric
    pub fn verify(&self, existing: &CollectionSpec) -> Result<()> {
        if existing.dimension != self.dimension || existing.metric != self.metric {
            return Err(AppError::CollectionConfigMismatch {
                name: self.name.clone(),
                existing_dimension: existing.dimension,
                existing_metric: existing.metric.to_string(),
                expected_dimension: self.dimension,
                expected_metric: self.metric.to_string(),
            });
        }
        Ok(())
    }
}

/// Character offsets of a chunk in the extracted document text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharSpan {
    pub start: usize,
    pub end: usize,
}

impl CharSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Deterministic chunk id for `(source_id, sequence_index)`
///
/// UUIDv5 in the URL namespace over `"{source_id}:{sequence_index}"`, so
/// re-ingesting a document reproduces the ids of the previous run.
pub fn chunk_id(source_id: &str, sequence_index: usize) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{}:{}", source_id, sequence_index).as_bytes(),
    )
}

/// A contiguous span of a document's text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: Uuid,
    pub source_id: String,
    pub sequence_index: usize,
    pub text: String,
    pub char_span: CharSpan,
}

impl Chunk {
    pub fn new(source_id: &str, sequence_index: usize, text: String, char_span: CharSpan) -> Self {
        Self {
            chunk_id: chunk_id(source_id, sequence_index),
            source_id: source_id.to_string(),
            sequence_index,
            text,
            char_span,
        }
    }
}

/// Payload stored next to every vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub text: String,
    pub source_id: String,
    pub sequence_index: usize,
    pub char_span: CharSpan,
}

/// Embedding plus payload, keyed by chunk id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    id: Uuid,
    vector: Vec<f32>,
    payload: ChunkPayload,
}

impl VectorRecord {
    /// Pair a chunk with its embedding, checking the dimension up front
    pub fn new(chunk: Chunk, vector: Vec<f32>, dimension: usize) -> Result<Self> {
        if vector.len() != dimension {
            return Err(AppError::EmbeddingDimensionMismatch {
                expected: dimension,
                actual: vector.len(),
            });
        }
        if chunk.source_id.is_empty() {
            return Err(AppError::Internal {
                message: format!("chunk {} has an empty source_id", chunk.chunk_id),
            });
        }
        Ok(Self {
            id: chunk.chunk_id,
            vector,
            payload: ChunkPayload {
                text: chunk.text,
                source_id: chunk.source_id,
                sequence_index: chunk.sequence_index,
                char_span: chunk.char_span,
            },
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }

    pub fn payload(&self) -> &ChunkPayload {
        &self.payload
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

/// Payload filter applied during search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub source_id: Option<String>,
}

impl SearchFilter {
    pub fn source(source_id: impl Into<String>) -> Self {
        Self { source_id: Some(source_id.into()) }
    }

    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        self.source_id
            .as_deref()
            .map_or(true, |source_id| payload.source_id == source_id)
    }
}

/// One search result, score normalized so that higher means more similar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub score: f32,
    pub payload: ChunkPayload,
}
