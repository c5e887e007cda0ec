//! RagForge Ingestion
//!
//! Turns a PDF into indexed chunks:
//! 1. Extracts text from the PDF
//! 2. Splits it into overlapping chunks
//! 3. Embeds every chunk
//! 4. Replaces the document's records in the vector index

pub mod chunker;
pub mod errors;
pub mod pdf;
pub mod processor;
pub mod throttle;

pub use chunker::Chunker;
pub use errors::{FailureReport, IngestionError};
pub use processor::{IngestOrchestrator, IngestRequest, IngestResponse, IngestState, PdfSource};
