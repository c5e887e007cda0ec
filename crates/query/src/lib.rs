//! RagForge Query
//!
//! Answers questions from ingested documents:
//! - Request validation and top_k resolution
//! - Query embedding and vector search
//! - Grounded answer generation with cited sources

pub mod context;
pub mod errors;
pub mod orchestrator;
pub mod request;

pub use context::NO_CONTEXT_ANSWER;
pub use errors::{QueryError, QueryFailureReport, QueryStage};
pub use orchestrator::QueryOrchestrator;
pub use request::{QueryRequest, QueryResponse, SourceRef};
