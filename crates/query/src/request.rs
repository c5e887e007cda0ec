//! Query request and response types

use ragforge_common::config::QuerySettings;
use ragforge_common::errors::{AppError, Result};
use ragforge_common::models::SearchFilter;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A question to answer from the ingested documents
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 4000))]
    pub question: String,

    /// Number of chunks to retrieve; the configured default when absent
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Restrict retrieval to one document
    #[serde(default)]
    #[validate(length(min = 1))]
    pub source_id: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: None,
            source_id: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Check the request and resolve `top_k` against the configured bounds
    pub fn validated(&self, settings: &QuerySettings) -> Result<ValidatedQuery> {
        self.validate().map_err(|e| AppError::InvalidQuery {
            message: e.to_string(),
        })?;

        let question = self.question.trim();
        if question.is_empty() {
            return Err(AppError::InvalidQuery {
                message: "question must not be blank".to_string(),
            });
        }

        let top_k = self.top_k.unwrap_or(settings.default_top_k);
        if top_k == 0 || top_k > settings.max_top_k {
            return Err(AppError::InvalidQuery {
                message: format!(
                    "top_k must be between 1 and {}, got {}",
                    settings.max_top_k, top_k
                ),
            });
        }

        Ok(ValidatedQuery {
            question: question.to_string(),
            top_k,
            filter: SearchFilter {
                source_id: self.source_id.clone(),
            },
        })
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    pub question: String,
    pub top_k: usize,
    pub filter: SearchFilter,
}

/// A chunk handed to the language model as context
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub chunk_id: Uuid,
    pub source_id: String,
    pub sequence_index: usize,
    pub text_excerpt: String,
    pub score: f32,
}

/// Answer plus the sources it was grounded on, best match first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub num_contexts: usize,
    /// Documents that contributed context, in rank order
    pub source_ids: Vec<String>,
    pub processing_time_ms: u64,
}
