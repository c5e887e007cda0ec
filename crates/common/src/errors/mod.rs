//! Error types for RagForge pipelines
//!
//! Provides a single error taxonomy shared by ingestion and query:
//! - Distinct variants for every failure mode the pipeline can hit
//! - Machine-readable error codes
//! - Transient/fatal classification consumed by the retry layer

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Caller errors (1xxx)
    InvalidQuery,
    DocumentParseError,
    SourceRateLimited,

    // Configuration errors (2xxx)
    ConfigurationError,
    EmbeddingDimensionMismatch,
    CollectionConfigMismatch,

    // External service errors (8xxx)
    EmbeddingServiceError,
    VectorIndexError,
    AnswerGenerationError,
    RateLimited,
    Timeout,
    UpstreamError,

    // Internal errors (9xxx)
    Cancelled,
    DatabaseError,
    SerializationError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::InvalidQuery => 1001,
            ErrorCode::DocumentParseError => 1002,
            ErrorCode::SourceRateLimited => 1003,

            ErrorCode::ConfigurationError => 2001,
            ErrorCode::EmbeddingDimensionMismatch => 2002,
            ErrorCode::CollectionConfigMismatch => 2003,

            ErrorCode::EmbeddingServiceError => 8001,
            ErrorCode::VectorIndexError => 8002,
            ErrorCode::AnswerGenerationError => 8003,
            ErrorCode::RateLimited => 8004,
            ErrorCode::Timeout => 8005,
            ErrorCode::UpstreamError => 8006,

            ErrorCode::Cancelled => 9001,
            ErrorCode::DatabaseError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::InternalError => 9004,
        }
    }
}

/// External service an error originated from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Embedding,
    VectorIndex,
    Generation,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Service::Embedding => f.write_str("embedding"),
            Service::VectorIndex => f.write_str("vector index"),
            Service::Generation => f.write_str("generation"),
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Caller errors
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Document parse error for {source_id}: {message}")]
    DocumentParse { source_id: String, message: String },

    #[error("'{source_id}' was ingested too recently, retry in {}s", .retry_after.as_secs())]
    SourceRateLimited {
        source_id: String,
        retry_after: Duration,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Collection '{name}' exists with dimension {existing_dimension} and metric {existing_metric}, \
         configured dimension {expected_dimension} and metric {expected_metric}"
    )]
    CollectionConfigMismatch {
        name: String,
        existing_dimension: usize,
        existing_metric: String,
        expected_dimension: usize,
        expected_metric: String,
    },

    // External service errors
    #[error("Embedding service error: {message}")]
    EmbeddingService { message: String, retryable: bool },

    #[error("Vector index error: {message}")]
    VectorIndex { message: String, retryable: bool },

    #[error("Answer generation error: {message}")]
    AnswerGeneration { message: String, retryable: bool },

    #[error("Rate limited by {service} service")]
    RateLimited {
        service: Service,
        retry_after: Option<Duration>,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Cancelled before {operation}")]
    Cancelled { operation: String },

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::InvalidQuery { .. } => ErrorCode::InvalidQuery,
            AppError::DocumentParse { .. } => ErrorCode::DocumentParseError,
            AppError::SourceRateLimited { .. } => ErrorCode::SourceRateLimited,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::EmbeddingDimensionMismatch { .. } => ErrorCode::EmbeddingDimensionMismatch,
            AppError::CollectionConfigMismatch { .. } => ErrorCode::CollectionConfigMismatch,
            AppError::EmbeddingService { .. } => ErrorCode::EmbeddingServiceError,
            AppError::VectorIndex { .. } => ErrorCode::VectorIndexError,
            AppError::AnswerGeneration { .. } => ErrorCode::AnswerGenerationError,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Timeout { .. } => ErrorCode::Timeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Cancelled { .. } => ErrorCode::Cancelled,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Service-level failure attributed to `service`
    pub fn service(service: Service, message: impl Into<String>, retryable: bool) -> AppError {
        let message = message.into();
        match service {
            Service::Embedding => AppError::EmbeddingService { message, retryable },
            Service::VectorIndex => AppError::VectorIndex { message, retryable },
            Service::Generation => AppError::AnswerGeneration { message, retryable },
        }
    }

    /// Classify a non-success HTTP status returned by `service`
    ///
    /// 429 is a rate limit, 408 and 5xx are transient, any other status is
    /// permanent since resending the same request will not change it.
    pub fn from_status(
        service: Service,
        status: reqwest::StatusCode,
        retry_after: Option<Duration>,
        body: &str,
    ) -> AppError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return AppError::RateLimited { service, retry_after };
        }
        let retryable = status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT;
        AppError::service(service, format!("API error {}: {}", status, body), retryable)
    }

    /// Classify a transport failure talking to `service`
    pub fn from_transport(service: Service, err: reqwest::Error) -> AppError {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request();
        AppError::service(service, format!("Request failed: {}", err), retryable)
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::EmbeddingService { retryable, .. }
            | AppError::VectorIndex { retryable, .. }
            | AppError::AnswerGeneration { retryable, .. } => *retryable,
            AppError::RateLimited { .. } | AppError::Timeout { .. } => true,
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            // Connection drops and pool exhaustion recover; SQL errors do not
            AppError::Database(e) => matches!(
                e,
                sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_)
            ),
            _ => false,
        }
    }

    /// Delay requested by the remote service before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Fatal configuration problems that must stop the process
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::ConfigurationError
                | ErrorCode::EmbeddingDimensionMismatch
                | ErrorCode::CollectionConfigMismatch
        )
    }

    /// Re-label an exhausted transient error as the failure of `service`
    ///
    /// Timeouts and rate limits that outlived the retry budget are reported
    /// as the owning service's error so callers see a single kind per stage.
    pub fn into_service_error(self, service: Service) -> AppError {
        match self {
            AppError::Timeout { .. } | AppError::RateLimited { .. } | AppError::HttpClient(_) => {
                AppError::service(service, self.to_string(), false)
            }
            AppError::Database(e) if service == Service::VectorIndex => {
                AppError::service(service, e.to_string(), false)
            }
            other => other,
        }
    }
}

/// Delay from a `Retry-After` header given in whole seconds
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
