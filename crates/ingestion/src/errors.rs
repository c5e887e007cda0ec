//! Ingestion error types

use crate::processor::IngestState;
use ragforge_common::errors::{AppError, ErrorCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failed ingestion: the underlying error and where it happened
#[derive(Error, Debug)]
#[error("Ingestion of '{source_id}' failed after {stage}: {error}")]
pub struct IngestionError {
    pub source_id: String,
    /// Last state reached; the transition out of it failed
    pub stage: IngestState,
    #[source]
    pub error: AppError,
}

impl IngestionError {
    pub fn new(source_id: &str, stage: IngestState, error: AppError) -> Self {
        Self {
            source_id: source_id.to_string(),
            stage,
            error,
        }
    }

    /// Whether the index may hold a partial write for this document
    ///
    /// Records are replaced in one transaction, so only a failure whose
    /// outcome is unknown during the write itself can leave anything behind.
    pub fn partial_index_state(&self) -> bool {
        self.stage == IngestState::Embedded
            && !matches!(
                self.error.code(),
                ErrorCode::EmbeddingDimensionMismatch
                    | ErrorCode::CollectionConfigMismatch
                    | ErrorCode::ConfigurationError
                    | ErrorCode::Cancelled
            )
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.error.code(),
            message: self.error.to_string(),
            stage: self.stage,
            partial_index_state: self.partial_index_state(),
        }
    }
}

/// Structured payload attached to a failed ingestion
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailureReport {
    pub kind: ErrorCode,
    pub message: String,
    pub stage: IngestState,
    pub partial_index_state: bool,
}
