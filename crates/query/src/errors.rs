//! Query error types

use ragforge_common::errors::{AppError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Step of a query that was running when it failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStage {
    Validate,
    Embed,
    Search,
    Generate,
}

impl QueryStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStage::Validate => "VALIDATE",
            QueryStage::Embed => "EMBED",
            QueryStage::Search => "SEARCH",
            QueryStage::Generate => "GENERATE",
        }
    }
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed query: the underlying error and the step it happened in
#[derive(Error, Debug)]
#[error("Query failed during {stage}: {error}")]
pub struct QueryError {
    pub stage: QueryStage,
    #[source]
    pub error: AppError,
}

impl QueryError {
    pub fn new(stage: QueryStage, error: AppError) -> Self {
        Self { stage, error }
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code()
    }

    pub fn report(&self) -> QueryFailureReport {
        QueryFailureReport {
            kind: self.error.code(),
            message: self.error.to_string(),
            stage: self.stage,
        }
    }
}

/// Structured payload for a failed query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryFailureReport {
    pub kind: ErrorCode,
    pub message: String,
    pub stage: QueryStage,
}
