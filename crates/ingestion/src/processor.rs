//! Ingest orchestrator
//!
//! Drives one document through extraction, chunking, embedding and the index
//! write. Every run moves through
//! `RECEIVED → EXTRACTED → CHUNKED → EMBEDDED → UPSERTED → DONE`, or ends in
//! `FAILED` carrying the state it failed from. A document ingested again
//! before its per-source limit allows ends in `SKIPPED` without any work.

use crate::chunker::Chunker;
use crate::errors::{FailureReport, IngestionError};
use crate::pdf::{extract_text_from_pdf, read_pdf, ExtractedDocument};
use crate::throttle::{
    check_source, create_source_limiter, create_throttle, IngestThrottle, SourceLimiter,
};
use chrono::{DateTime, Utc};
use ragforge_common::cancel::CancellationToken;
use ragforge_common::config::AppConfig;
use ragforge_common::embeddings::Embedder;
use ragforge_common::errors::{AppError, Result, Service};
use ragforge_common::index::VectorIndex;
use ragforge_common::metrics;
use ragforge_common::models::{Chunk, CollectionSpec, VectorRecord};
use ragforge_common::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn, Span};

/// Lifecycle of one ingestion request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IngestState {
    Received,
    Extracted,
    Chunked,
    Embedded,
    Upserted,
    Done,
    Skipped,
    Failed,
}

impl IngestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestState::Received => "RECEIVED",
            IngestState::Extracted => "EXTRACTED",
            IngestState::Chunked => "CHUNKED",
            IngestState::Embedded => "EMBEDDED",
            IngestState::Upserted => "UPSERTED",
            IngestState::Done => "DONE",
            IngestState::Skipped => "SKIPPED",
            IngestState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestState::Done | IngestState::Skipped | IngestState::Failed)
    }
}

impl fmt::Display for IngestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the PDF bytes come from
#[derive(Debug, Clone)]
pub enum PdfSource {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// One document to ingest
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Caller-supplied document id; path requests fall back to the file name
    pub source_id: Option<String>,
    pub content: PdfSource,
}

impl IngestRequest {
    pub fn from_bytes(source_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            content: PdfSource::Bytes(bytes),
        }
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: None,
            content: PdfSource::Path(path.into()),
        }
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// The document id this request ingests under
    pub fn resolve_source_id(&self) -> Result<String> {
        let resolved = match (&self.source_id, &self.content) {
            (Some(source_id), _) => Some(source_id.trim().to_string()),
            (None, PdfSource::Path(path)) => path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            (None, PdfSource::Bytes(_)) => None,
        };

        resolved
            .filter(|source_id| !source_id.is_empty())
            .ok_or_else(|| AppError::InvalidQuery {
                message: "source_id is required".to_string(),
            })
    }
}

/// Facts about the ingested PDF
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentInfo {
    pub sha256: String,
    pub page_count: usize,
    pub char_count: usize,
}

impl From<&ExtractedDocument> for DocumentInfo {
    fn from(doc: &ExtractedDocument) -> Self {
        Self {
            sha256: doc.sha256.clone(),
            page_count: doc.page_count,
            char_count: doc.text.chars().count(),
        }
    }
}

/// Outcome of one ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    /// DONE, SKIPPED or FAILED
    pub status: IngestState,
    pub source_id: String,
    /// Chunks written to the index (zero unless the run is DONE)
    pub chunk_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureReport>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl IngestResponse {
    pub fn is_done(&self) -> bool {
        self.status == IngestState::Done
    }
}

/// Progress of a single run
struct IngestRun {
    source_id: String,
    state: IngestState,
    document: Option<DocumentInfo>,
    chunk_count: usize,
}

impl IngestRun {
    fn new(source_id: String) -> Self {
        Self {
            source_id,
            state: IngestState::Received,
            document: None,
            chunk_count: 0,
        }
    }

    fn advance(&mut self, next: IngestState) {
        info!(
            source_id = %self.source_id,
            from = %self.state,
            to = %next,
            "Ingestion state transition"
        );
        self.state = next;
    }

    fn fail(&self, error: AppError) -> IngestionError {
        IngestionError::new(&self.source_id, self.state, error)
    }
}

/// Ingest orchestrator
pub struct IngestOrchestrator {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    collection: CollectionSpec,
    chunker: Chunker,
    retry: RetryPolicy,
    throttle: Option<Arc<IngestThrottle>>,
    source_limiter: Option<Arc<SourceLimiter>>,
}

impl IngestOrchestrator {
    pub fn new(
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        collection: CollectionSpec,
        chunker: Chunker,
        retry: RetryPolicy,
    ) -> Result<Self> {
        if embedder.dimension() != collection.dimension {
            return Err(AppError::EmbeddingDimensionMismatch {
                expected: collection.dimension,
                actual: embedder.dimension(),
            });
        }

        Ok(Self {
            embedder,
            index,
            collection,
            chunker,
            retry,
            throttle: None,
            source_limiter: None,
        })
    }

    /// Build from configuration with clients constructed by the caller
    pub fn from_config(
        config: &AppConfig,
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        let orchestrator = Self::new(
            embedder,
            index,
            config.collection_spec()?,
            Chunker::from_settings(&config.chunking)?,
            RetryPolicy::from_config(&config.retry),
        )?;
        Ok(orchestrator
            .with_throttle(create_throttle(config.ingest.throttle_per_minute))
            .with_source_limit(
                config
                    .ingest
                    .source_rate_limit
                    .as_ref()
                    .and_then(create_source_limiter),
            ))
    }

    pub fn with_throttle(mut self, throttle: Option<Arc<IngestThrottle>>) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_source_limit(mut self, limiter: Option<Arc<SourceLimiter>>) -> Self {
        self.source_limiter = limiter;
        self
    }

    pub fn collection(&self) -> &CollectionSpec {
        &self.collection
    }

    /// Ingest one document
    pub async fn run_ingest(&self, request: IngestRequest) -> IngestResponse {
        self.run_ingest_with_cancel(request, &CancellationToken::new()).await
    }

    /// Ingest one document, stopping before the next external call once
    /// `cancel` fires
    #[instrument(skip(self, request, cancel), fields(source_id = tracing::field::Empty))]
    pub async fn run_ingest_with_cancel(
        &self,
        request: IngestRequest,
        cancel: &CancellationToken,
    ) -> IngestResponse {
        let start = Instant::now();

        let (mut run, outcome) = match request.resolve_source_id() {
            Ok(source_id) => {
                Span::current().record("source_id", source_id.as_str());
                let mut run = IngestRun::new(source_id);
                let outcome = self.ingest(&request, cancel, &mut run).await;
                (run, outcome)
            }
            Err(e) => {
                let run = IngestRun::new(String::new());
                let outcome = Err(run.fail(e));
                (run, outcome)
            }
        };

        let (status, error) = match outcome {
            Ok(()) => {
                run.advance(IngestState::Done);
                info!(
                    source_id = %run.source_id,
                    chunk_count = run.chunk_count,
                    "Ingestion complete"
                );
                (IngestState::Done, None)
            }
            Err(err) if matches!(err.error, AppError::SourceRateLimited { .. }) => {
                warn!(
                    source_id = %run.source_id,
                    error = %err.error,
                    "Ingestion skipped"
                );
                run.advance(IngestState::Skipped);
                run.chunk_count = 0;
                (IngestState::Skipped, Some(err.report()))
            }
            Err(err) => {
                error!(
                    source_id = %run.source_id,
                    stage = %err.stage,
                    error = %err.error,
                    partial_index_state = err.partial_index_state(),
                    "Ingestion failed"
                );
                run.advance(IngestState::Failed);
                run.chunk_count = 0;
                (IngestState::Failed, Some(err.report()))
            }
        };

        let duration = start.elapsed();
        metrics::record_ingestion(
            duration.as_secs_f64(),
            run.chunk_count,
            &status.as_str().to_lowercase(),
        );

        IngestResponse {
            status,
            source_id: run.source_id,
            chunk_count: run.chunk_count,
            document: run.document,
            error,
            completed_at: Utc::now(),
            duration_ms: duration.as_millis() as u64,
        }
    }

    #[instrument(skip_all, fields(source_id = %run.source_id))]
    async fn ingest(
        &self,
        request: &IngestRequest,
        cancel: &CancellationToken,
        run: &mut IngestRun,
    ) -> std::result::Result<(), IngestionError> {
        if let Some(limiter) = &self.source_limiter {
            check_source(limiter, &run.source_id).map_err(|e| run.fail(e))?;
        }
        if let Some(throttle) = &self.throttle {
            throttle.until_ready().await;
        }

        // RECEIVED -> EXTRACTED
        let bytes: Cow<'_, [u8]> = match &request.content {
            PdfSource::Bytes(bytes) => Cow::Borrowed(bytes.as_slice()),
            PdfSource::Path(path) => Cow::Owned(
                read_pdf(&run.source_id, path).await.map_err(|e| run.fail(e))?,
            ),
        };
        let extracted = extract_text_from_pdf(&run.source_id, &bytes).map_err(|e| run.fail(e))?;
        run.document = Some(DocumentInfo::from(&extracted));
        run.advance(IngestState::Extracted);

        // EXTRACTED -> CHUNKED
        let chunks: Vec<Chunk> = self.chunker.chunks(&run.source_id, &extracted.text).collect();
        run.chunk_count = chunks.len();
        run.advance(IngestState::Chunked);

        // CHUNKED -> EMBEDDED: nothing is written unless every chunk embeds
        self.ensure_collection(cancel).await.map_err(|e| run.fail(e))?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts, cancel)
            .await
            .map_err(|e| run.fail(e))?;

        let records = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord::new(chunk, vector, self.collection.dimension))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| run.fail(e))?;
        run.advance(IngestState::Embedded);

        // EMBEDDED -> UPSERTED: replaces every earlier chunk of this document
        cancel.check("index write").map_err(|e| run.fail(e))?;
        self.retry
            .run("replace_source", || {
                self.index
                    .replace_source(&self.collection.name, &run.source_id, &records)
            })
            .await
            .map_err(|e| run.fail(e.into_service_error(Service::VectorIndex)))?;
        run.advance(IngestState::Upserted);

        Ok(())
    }

    #[instrument(skip_all, fields(collection = %self.collection.name))]
    async fn ensure_collection(&self, cancel: &CancellationToken) -> Result<()> {
        cancel.check("collection check")?;
        self.retry
            .run("ensure_collection", || self.index.ensure_collection(&self.collection))
            .await
            .map_err(|e| e.into_service_error(Service::VectorIndex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::build_test_pdf;
    use async_trait::async_trait;
    use ragforge_common::embeddings::{EmbeddingProvider, MockEmbeddingProvider};
    use ragforge_common::errors::ErrorCode;
    use ragforge_common::index::MemoryVectorIndex;
    use ragforge_common::models::{chunk_id, DistanceMetric, SearchFilter};
    use crate::throttle::throttle_with_quota;
    use governor::Quota;
    use ragforge_common::config::SourceRateLimit;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DIM: usize = 16;

    /// Mock embeddings with a call counter and an optional outage
    struct CountingProvider {
        inner: MockEmbeddingProvider,
        calls: AtomicUsize,
        failing: bool,
    }

    impl CountingProvider {
        fn new(dimension: usize, failing: bool) -> Arc<Self> {
            Arc::new(Self {
                inner: MockEmbeddingProvider::new(dimension),
                calls: AtomicUsize::new(0),
                failing,
            })
        }
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(AppError::EmbeddingService {
                    message: "upstream 503".to_string(),
                    retryable: true,
                });
            }
            self.inner.embed_texts(texts).await
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(
            3,
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_secs(5),
        )
    }

    fn collection() -> CollectionSpec {
        CollectionSpec {
            name: "docs".to_string(),
            dimension: DIM,
            metric: DistanceMetric::Cosine,
        }
    }

    fn orchestrator(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<MemoryVectorIndex>,
        max_chunk_size: usize,
        overlap_size: usize,
    ) -> IngestOrchestrator {
        let embedder = Embedder::new(provider, DIM, 4, fast_retry());
        IngestOrchestrator::new(
            embedder,
            index,
            collection(),
            Chunker::new(max_chunk_size, overlap_size).unwrap(),
            fast_retry(),
        )
        .unwrap()
    }

    fn three_page_pdf() -> Vec<u8> {
        let pages: Vec<String> = (1..=3)
            .map(|page| {
                (0..18)
                    .map(|line| {
                        format!(
                            "Section {} line {} describes the cooling loop and pump schedule. ",
                            page, line
                        )
                    })
                    .collect()
            })
            .collect();
        let pages: Vec<&str> = pages.iter().map(String::as_str).collect();
        build_test_pdf(&pages)
    }

    #[tokio::test]
    async fn test_three_page_document_is_idempotent() {
        let index = Arc::new(MemoryVectorIndex::new());
        let provider = CountingProvider::new(DIM, false);
        let ingest = orchestrator(provider.clone(), index.clone(), 500, 50);
        let pdf = three_page_pdf();

        let first = ingest.run_ingest(IngestRequest::from_bytes("manual.pdf", pdf.clone())).await;
        assert!(first.is_done(), "{:?}", first.error);
        assert!(first.chunk_count > 3);
        assert_eq!(first.document.as_ref().unwrap().page_count, 3);

        let stored = index.records("docs").await;
        assert_eq!(stored.len(), first.chunk_count);
        for i in 0..first.chunk_count {
            assert!(stored.iter().any(|r| r.id() == chunk_id("manual.pdf", i)));
        }

        let second = ingest.run_ingest(IngestRequest::from_bytes("manual.pdf", pdf)).await;
        assert!(second.is_done());
        assert_eq!(second.chunk_count, first.chunk_count);
        assert_eq!(index.records("docs").await, stored);
    }

    #[tokio::test]
    async fn test_reingest_with_new_policy_removes_orphans() {
        let index = Arc::new(MemoryVectorIndex::new());
        let provider = CountingProvider::new(DIM, false);
        let pdf = three_page_pdf();

        let fine = orchestrator(provider.clone(), index.clone(), 300, 30);
        let many = fine.run_ingest(IngestRequest::from_bytes("manual.pdf", pdf.clone())).await;

        let coarse = orchestrator(provider, index.clone(), 1500, 100);
        let few = coarse.run_ingest(IngestRequest::from_bytes("manual.pdf", pdf)).await;

        assert!(few.chunk_count < many.chunk_count);
        let count = index.count("docs", &SearchFilter::source("manual.pdf")).await.unwrap();
        assert_eq!(count as usize, few.chunk_count);
    }

    #[tokio::test]
    async fn test_corrupt_pdf_fails_at_extraction() {
        let index = Arc::new(MemoryVectorIndex::new());
        let provider = CountingProvider::new(DIM, false);
        let ingest = orchestrator(provider.clone(), index.clone(), 500, 50);

        let response = ingest
            .run_ingest(IngestRequest::from_bytes("broken.pdf", b"%PDF-1.4 garbage".to_vec()))
            .await;

        assert_eq!(response.status, IngestState::Failed);
        assert_eq!(response.chunk_count, 0);
        let report = response.error.unwrap();
        assert_eq!(report.kind, ErrorCode::DocumentParseError);
        assert_eq!(report.stage, IngestState::Received);
        assert!(!report.partial_index_state);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_leaves_index_unmodified() {
        let index = Arc::new(MemoryVectorIndex::new());
        let good = orchestrator(CountingProvider::new(DIM, false), index.clone(), 500, 50);
        assert!(good.run_ingest(IngestRequest::from_bytes("first.pdf", three_page_pdf())).await.is_done());
        let before = index.records("docs").await;

        // Service answers with 8-dimensional vectors while 16 are configured
        let bad = orchestrator(CountingProvider::new(8, false), index.clone(), 500, 50);
        let response = bad.run_ingest(IngestRequest::from_bytes("second.pdf", three_page_pdf())).await;

        let report = response.error.unwrap();
        assert_eq!(report.kind, ErrorCode::EmbeddingDimensionMismatch);
        assert_eq!(report.stage, IngestState::Chunked);
        assert_eq!(index.records("docs").await, before);
    }

    #[tokio::test]
    async fn test_embedding_outage_fails_before_any_write() {
        let index = Arc::new(MemoryVectorIndex::new());
        let provider = CountingProvider::new(DIM, true);
        let ingest = orchestrator(provider.clone(), index.clone(), 500, 50);

        let response = ingest.run_ingest(IngestRequest::from_bytes("manual.pdf", three_page_pdf())).await;

        let report = response.error.unwrap();
        assert_eq!(report.kind, ErrorCode::EmbeddingServiceError);
        assert_eq!(report.stage, IngestState::Chunked);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.count("docs", &SearchFilter::default()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_makes_no_external_calls() {
        let index = Arc::new(MemoryVectorIndex::new());
        let provider = CountingProvider::new(DIM, false);
        let ingest = orchestrator(provider.clone(), index.clone(), 500, 50);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = ingest
            .run_ingest_with_cancel(IngestRequest::from_bytes("manual.pdf", three_page_pdf()), &cancel)
            .await;

        let report = response.error.unwrap();
        assert_eq!(report.kind, ErrorCode::Cancelled);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(index.describe_collection("docs").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_ingestions_of_same_source() {
        let index = Arc::new(MemoryVectorIndex::new());
        let ingest = orchestrator(CountingProvider::new(DIM, false), index.clone(), 500, 50);
        let pdf = three_page_pdf();

        let (a, b) = tokio::join!(
            ingest.run_ingest(IngestRequest::from_bytes("manual.pdf", pdf.clone())),
            ingest.run_ingest(IngestRequest::from_bytes("manual.pdf", pdf)),
        );
        assert!(a.is_done() && b.is_done());
        assert_eq!(index.records("docs").await.len(), a.chunk_count);
    }

    #[tokio::test]
    async fn test_path_request_uses_file_name() {
        let path = std::env::temp_dir().join(format!("ragforge-{}.pdf", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, three_page_pdf()).await.unwrap();
        let expected = path.file_name().unwrap().to_string_lossy().to_string();

        let index = Arc::new(MemoryVectorIndex::new());
        let ingest = orchestrator(CountingProvider::new(DIM, false), index.clone(), 500, 50);
        let response = ingest.run_ingest(IngestRequest::from_path(&path)).await;
        tokio::fs::remove_file(&path).await.ok();

        assert!(response.is_done());
        assert_eq!(response.source_id, expected);
        assert_eq!(
            index.count("docs", &SearchFilter::source(expected)).await.unwrap() as usize,
            response.chunk_count
        );
    }

    #[tokio::test]
    async fn test_missing_source_id_rejected() {
        let index = Arc::new(MemoryVectorIndex::new());
        let ingest = orchestrator(CountingProvider::new(DIM, false), index, 500, 50);

        let response = ingest.run_ingest(IngestRequest::from_bytes("  ", three_page_pdf())).await;
        assert_eq!(response.status, IngestState::Failed);
        assert_eq!(response.error.unwrap().kind, ErrorCode::InvalidQuery);
    }

    #[test]
    fn test_embedder_must_match_collection() {
        let embedder = Embedder::new(Arc::new(MockEmbeddingProvider::new(8)), 8, 4, fast_retry());
        let result = IngestOrchestrator::new(
            embedder,
            Arc::new(MemoryVectorIndex::new()),
            collection(),
            Chunker::new(500, 50).unwrap(),
            fast_retry(),
        );
        assert!(matches!(result, Err(AppError::EmbeddingDimensionMismatch { expected: 16, actual: 8 })));
    }

    #[tokio::test]
    async fn test_throttle_delays_instead_of_dropping() {
        let index = Arc::new(MemoryVectorIndex::new());
        let ingest = orchestrator(CountingProvider::new(DIM, false), index, 500, 50)
            .with_throttle(Some(throttle_with_quota(
                Quota::with_period(Duration::from_millis(300)).unwrap(),
            )));

        let start = std::time::Instant::now();
        for i in 0..3 {
            let response = ingest
                .run_ingest(IngestRequest::from_bytes(format!("doc-{}.pdf", i), three_page_pdf()))
                .await;
            assert!(response.is_done());
        }
        // One run is admitted at once; the other two each wait a full period
        assert!(start.elapsed() >= Duration::from_millis(550), "{:?}", start.elapsed());
    }

    #[tokio::test]
    async fn test_source_limit_skips_repeat_ingestion() {
        let provider = CountingProvider::new(DIM, false);
        let index = Arc::new(MemoryVectorIndex::new());
        let ingest = orchestrator(provider.clone(), index.clone(), 500, 50).with_source_limit(
            create_source_limiter(&SourceRateLimit { limit: 1, period_secs: 3600 }),
        );

        let first = ingest.run_ingest(IngestRequest::from_bytes("a.pdf", three_page_pdf())).await;
        assert!(first.is_done());
        let calls = provider.calls.load(Ordering::SeqCst);
        let stored = index.count("docs", &SearchFilter::default()).await.unwrap();

        let second = ingest.run_ingest(IngestRequest::from_bytes("a.pdf", three_page_pdf())).await;
        assert_eq!(second.status, IngestState::Skipped);
        assert_eq!(second.chunk_count, 0);
        let report = second.error.unwrap();
        assert_eq!(report.kind, ErrorCode::SourceRateLimited);
        assert_eq!(report.stage, IngestState::Received);
        assert!(!report.partial_index_state);
        assert_eq!(provider.calls.load(Ordering::SeqCst), calls);
        assert_eq!(index.count("docs", &SearchFilter::default()).await.unwrap(), stored);

        let other = ingest.run_ingest(IngestRequest::from_bytes("b.pdf", three_page_pdf())).await;
        assert!(other.is_done());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&IngestState::Upserted).unwrap(), "\"UPSERTED\"");
        assert_eq!(serde_json::to_string(&IngestState::Skipped).unwrap(), "\"SKIPPED\"");
        assert!(IngestState::Failed.is_terminal());
        assert!(IngestState::Skipped.is_terminal());
        assert!(!IngestState::Embedded.is_terminal());
    }
}
