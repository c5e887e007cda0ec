//! Query orchestration: embed, retrieve, generate

use crate::context::{RetrievedContext, NO_CONTEXT_ANSWER};
use crate::errors::{QueryError, QueryStage};
use crate::request::{QueryRequest, QueryResponse, ValidatedQuery};
use ragforge_common::{
    cancel::CancellationToken,
    config::{AppConfig, QuerySettings},
    embeddings::Embedder,
    errors::{AppError, Result, Service},
    generation::AnswerGenerator,
    index::VectorIndex,
    metrics,
    models::CollectionSpec,
    retry::RetryPolicy,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Answers questions from one collection
pub struct QueryOrchestrator {
    embedder: Embedder,
    index: Arc<dyn VectorIndex>,
    collection: CollectionSpec,
    generator: AnswerGenerator,
    settings: QuerySettings,
    retry: RetryPolicy,
}

impl QueryOrchestrator {
    pub fn new(
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        collection: CollectionSpec,
        generator: AnswerGenerator,
        settings: QuerySettings,
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
            generator,
            settings,
            retry,
        })
    }

    pub fn from_config(
        config: &AppConfig,
        embedder: Embedder,
        index: Arc<dyn VectorIndex>,
        generator: AnswerGenerator,
    ) -> Result<Self> {
        Self::new(
            embedder,
            index,
            config.collection_spec()?,
            generator,
            config.query.clone(),
            RetryPolicy::from_config(&config.retry),
        )
    }

    pub fn collection(&self) -> &CollectionSpec {
        &self.collection
    }

    /// Create the collection if needed and check it matches the configuration
    pub async fn ensure_collection(&self) -> Result<()> {
        self.retry
            .run("ensure_collection", || self.index.ensure_collection(&self.collection))
            .await
            .map_err(|e| e.into_service_error(Service::VectorIndex))
    }

    /// Answer one question
    pub async fn run_query(
        &self,
        request: QueryRequest,
    ) -> std::result::Result<QueryResponse, QueryError> {
        self.run_query_with_cancel(request, &CancellationToken::new()).await
    }

    /// Answer one question, stopping before the next external call once
    /// `cancel` fires
    #[instrument(skip(self, request, cancel), fields(top_k = tracing::field::Empty))]
    pub async fn run_query_with_cancel(
        &self,
        request: QueryRequest,
        cancel: &CancellationToken,
    ) -> std::result::Result<QueryResponse, QueryError> {
        let start = Instant::now();

        let result = self.answer(&request, cancel, start).await;

        let (result_count, outcome) = match &result {
            Ok(response) if response.num_contexts == 0 => (0, "no_context"),
            Ok(response) => (response.num_contexts, "answered"),
            Err(err) => match err.error {
                AppError::InvalidQuery { .. } => (0, "invalid"),
                AppError::Cancelled { .. } => (0, "cancelled"),
                _ => (0, "failed"),
            },
        };
        metrics::record_query(start.elapsed().as_secs_f64(), result_count, outcome);

        match &result {
            Ok(response) => info!(
                contexts = response.num_contexts,
                duration_ms = response.processing_time_ms,
                outcome,
                "Query answered"
            ),
            Err(err) => warn!(
                stage = %err.stage,
                error = %err.error,
                code = ?err.code(),
                "Query failed"
            ),
        }
        result
    }

    async fn answer(
        &self,
        request: &QueryRequest,
        cancel: &CancellationToken,
        start: Instant,
    ) -> std::result::Result<QueryResponse, QueryError> {
        // Rejected requests never reach the embedding service
        let query = request
            .validated(&self.settings)
            .map_err(|e| QueryError::new(QueryStage::Validate, e))?;
        tracing::Span::current().record("top_k", query.top_k);

        let context = self.retrieve(&query, cancel).await?;
        debug!(hits = context.len(), "Retrieved context");

        let answer = if context.is_empty() {
            NO_CONTEXT_ANSWER.to_string()
        } else {
            cancel
                .check("answer generation")
                .map_err(|e| QueryError::new(QueryStage::Generate, e))?;
            self.generator
                .generate(&query.question, &context.texts())
                .await
                .map_err(|e| QueryError::new(QueryStage::Generate, e))?
        };

        Ok(QueryResponse {
            answer,
            sources: context.sources(self.settings.excerpt_chars),
            num_contexts: context.len(),
            source_ids: context.source_ids(),
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    #[instrument(skip_all, fields(top_k = query.top_k))]
    async fn retrieve(
        &self,
        query: &ValidatedQuery,
        cancel: &CancellationToken,
    ) -> std::result::Result<RetrievedContext, QueryError> {
        let embed_error = |e| QueryError::new(QueryStage::Embed, e);
        cancel.check("query embedding").map_err(embed_error)?;
        let vector = self.embedder.embed(&query.question).await.map_err(embed_error)?;

        let search_error = |e| QueryError::new(QueryStage::Search, e);
        cancel.check("vector search").map_err(search_error)?;
        let hits = self
            .retry
            .run("search", || {
                self.index
                    .search(&self.collection.name, &vector, query.top_k, &query.filter)
            })
            .await
            .map_err(|e| search_error(e.into_service_error(Service::VectorIndex)))?;

        Ok(RetrievedContext::new(hits))
    }
}
