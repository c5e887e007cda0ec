//! PostgreSQL + pgvector index
//!
//! Collections are catalogued in `rag_collections`; each one is stored in its
//! own `rag_<name>` table. All vector SQL is issued as raw statements.
//!
//! Searches are exact scans ordered by the normalized score, so results match
//! the in-memory backend row for row. No approximate (HNSW/IVFFlat) index is
//! built: it would cap results at `hnsw.ef_search` and reject dimensions above
//! 2000.

use super::{check_records, check_search, missing_collection, VectorIndex};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::models::{
    CharSpan, ChunkPayload, CollectionSpec, DistanceMetric, SearchFilter, SearchHit, VectorRecord,
};
use async_trait::async_trait;
use regex_lite::Regex;
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, DbBackend, QueryResult, Statement, TransactionTrait,
};
use std::sync::OnceLock;
use tracing::{debug, info};
use uuid::Uuid;

const CATALOG_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS rag_collections (
    name TEXT PRIMARY KEY,
    dimension INTEGER NOT NULL,
    metric TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Vector index backed by pgvector
#[derive(Clone)]
pub struct PgVectorIndex {
    pool: DbPool,
}

impl PgVectorIndex {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Install the extension and the collection catalog
    pub async fn bootstrap(&self) -> Result<()> {
        let conn = self.pool.conn();
        conn.execute_unprepared("CREATE EXTENSION IF NOT EXISTS vector")
            .await
            .map_err(index_error)?;
        conn.execute_unprepared(CATALOG_DDL).await.map_err(index_error)?;
        info!("pgvector catalog ready");
        Ok(())
    }

    async fn require_collection(&self, name: &str) -> Result<CollectionSpec> {
        self.describe_collection(name)
            .await?
            .ok_or_else(|| missing_collection(name))
    }

    async fn insert_records(
        txn: &DatabaseTransaction,
        table: &str,
        records: &[VectorRecord],
    ) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (id, source_id, sequence_index, text, char_start, char_end, embedding)
            VALUES ($1, $2, $3, $4, $5, $6, $7::vector)
            ON CONFLICT (id) DO UPDATE SET
                source_id = EXCLUDED.source_id,
                sequence_index = EXCLUDED.sequence_index,
                text = EXCLUDED.text,
                char_start = EXCLUDED.char_start,
                char_end = EXCLUDED.char_end,
                embedding = EXCLUDED.embedding
            "#,
            table
        );

        for record in records {
            let payload = record.payload();
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                &sql,
                vec![
                    record.id().into(),
                    payload.source_id.clone().into(),
                    (payload.sequence_index as i32).into(),
                    payload.text.clone().into(),
                    (payload.char_span.start as i64).into(),
                    (payload.char_span.end as i64).into(),
                    vector_literal(record.vector()).into(),
                ],
            );
            txn.execute(stmt).await.map_err(index_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn ensure_collection(&self, spec: &CollectionSpec) -> Result<()> {
        let table = table_name(&spec.name)?;
        let txn = self.pool.conn().begin().await.map_err(index_error)?;

        // Serialize concurrent creators of the same collection
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            vec![format!("rag_collections:{}", spec.name).into()],
        ))
        .await
        .map_err(index_error)?;

        let existing = txn
            .query_one(describe_statement(&spec.name))
            .await
            .map_err(index_error)?
            .map(|row| decode_spec(&spec.name, &row))
            .transpose()?;

        if let Some(existing) = existing {
            txn.rollback().await.map_err(index_error)?;
            return spec.verify(&existing);
        }

        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "INSERT INTO rag_collections (name, dimension, metric) VALUES ($1, $2, $3)",
            vec![
                spec.name.clone().into(),
                (spec.dimension as i32).into(),
                spec.metric.as_str().into(),
            ],
        ))
        .await
        .map_err(index_error)?;

        txn.execute_unprepared(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                source_id TEXT NOT NULL,
                sequence_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                char_start BIGINT NOT NULL,
                char_end BIGINT NOT NULL,
                embedding vector({dimension}) NOT NULL
            )
            "#,
            table = table,
            dimension = spec.dimension
        ))
        .await
        .map_err(index_error)?;

        txn.execute_unprepared(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_source_idx ON {table} (source_id)",
            table = table
        ))
        .await
        .map_err(index_error)?;

        txn.commit().await.map_err(index_error)?;

        info!(
            collection = %spec.name,
            dimension = spec.dimension,
            metric = %spec.metric,
            "Created collection"
        );
        Ok(())
    }

    async fn describe_collection(&self, name: &str) -> Result<Option<CollectionSpec>> {
        self.pool
            .conn()
            .query_one(describe_statement(name))
            .await
            .map_err(index_error)?
            .map(|row| decode_spec(name, &row))
            .transpose()
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let table = table_name(collection)?;
        let spec = self.require_collection(collection).await?;
        check_records(&spec, None, records)?;

        let txn = self.pool.conn().begin().await.map_err(index_error)?;
        Self::insert_records(&txn, &table, records).await?;
        txn.commit().await.map_err(index_error)?;

        debug!(collection, count = records.len(), "Upserted records");
        Ok(())
    }

    async fn replace_source(
        &self,
        collection: &str,
        source_id: &str,
        records: &[VectorRecord],
    ) -> Result<()> {
        let table = table_name(collection)?;
        let spec = self.require_collection(collection).await?;
        check_records(&spec, Some(source_id), records)?;

        let txn = self.pool.conn().begin().await.map_err(index_error)?;

        // Held until commit: writers of the same source queue behind each other
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            vec![format!("{}:{}", collection, source_id).into()],
        ))
        .await
        .map_err(index_error)?;

        let deleted = txn
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &format!("DELETE FROM {} WHERE source_id = $1", table),
                vec![source_id.into()],
            ))
            .await
            .map_err(index_error)?
            .rows_affected();

        Self::insert_records(&txn, &table, records).await?;
        txn.commit().await.map_err(index_error)?;

        debug!(
            collection,
            source_id,
            deleted,
            written = records.len(),
            "Replaced source records"
        );
        Ok(())
    }

    async fn delete_source(&self, collection: &str, source_id: &str) -> Result<u64> {
        let table = table_name(collection)?;
        self.require_collection(collection).await?;

        let result = self
            .pool
            .conn()
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                &format!("DELETE FROM {} WHERE source_id = $1", table),
                vec![source_id.into()],
            ))
            .await
            .map_err(index_error)?;

        Ok(result.rows_affected())
    }

    async fn search(
        &self,
        collection: &str,
        query: &[f32],
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>> {
        let table = table_name(collection)?;
        let spec = self.require_collection(collection).await?;
        check_search(&spec, query, top_k)?;

        let source_filter = filter
            .source_id
            .as_ref()
            .map(|_| "WHERE source_id = $3")
            .unwrap_or("");

        let sql = format!(
            r#"
            SELECT
                id,
                source_id,
                sequence_index,
                text,
                char_start,
                char_end,
                ({score})::float8 AS score
            FROM {table}
            {filter}
            ORDER BY score DESC, id ASC
            LIMIT $2
            "#,
            score = score_expression(spec.metric),
            table = table,
            filter = source_filter
        );

        let mut values: Vec<sea_orm::Value> = vec![
            vector_literal(query).into(),
            (top_k as i64).into(),
        ];
        if let Some(source_id) = &filter.source_id {
            values.push(source_id.clone().into());
        }

        let rows = self
            .pool
            .conn()
            .query_all(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await
            .map_err(index_error)?;

        rows.iter().map(decode_hit).collect()
    }

    async fn count(&self, collection: &str, filter: &SearchFilter) -> Result<u64> {
        let table = table_name(collection)?;
        self.require_collection(collection).await?;

        let (sql, values): (String, Vec<sea_orm::Value>) = match &filter.source_id {
            Some(source_id) => (
                format!("SELECT COUNT(*) FROM {} WHERE source_id = $1", table),
                vec![source_id.clone().into()],
            ),
            None => (format!("SELECT COUNT(*) FROM {}", table), vec![]),
        };

        let row = self
            .pool
            .conn()
            .query_one(Statement::from_sql_and_values(DbBackend::Postgres, &sql, values))
            .await
            .map_err(index_error)?
            .ok_or_else(|| AppError::VectorIndex {
                message: "COUNT returned no rows".to_string(),
                retryable: false,
            })?;

        let count: i64 = row.try_get_by_index(0).map_err(index_error)?;
        Ok(count as u64)
    }

    fn backend(&self) -> &'static str {
        "pgvector"
    }
}

fn describe_statement(name: &str) -> Statement {
    Statement::from_sql_and_values(
        DbBackend::Postgres,
        "SELECT dimension, metric FROM rag_collections WHERE name = $1",
        vec![name.into()],
    )
}

fn decode_spec(name: &str, row: &QueryResult) -> Result<CollectionSpec> {
    let dimension: i32 = row.try_get_by_index(0).map_err(index_error)?;
    let metric: String = row.try_get_by_index(1).map_err(index_error)?;
    Ok(CollectionSpec {
        name: name.to_string(),
        dimension: dimension as usize,
        metric: metric.parse()?,
    })
}

fn decode_hit(row: &QueryResult) -> Result<SearchHit> {
    let id: Uuid = row.try_get_by_index(0).map_err(index_error)?;
    let source_id: String = row.try_get_by_index(1).map_err(index_error)?;
    let sequence_index: i32 = row.try_get_by_index(2).map_err(index_error)?;
    let text: String = row.try_get_by_index(3).map_err(index_error)?;
    let char_start: i64 = row.try_get_by_index(4).map_err(index_error)?;
    let char_end: i64 = row.try_get_by_index(5).map_err(index_error)?;
    let score: f64 = row.try_get_by_index(6).map_err(index_error)?;

    Ok(SearchHit {
        id,
        score: score as f32,
        payload: ChunkPayload {
            text,
            source_id,
            sequence_index: sequence_index as usize,
            char_span: CharSpan {
                start: char_start as usize,
                end: char_end as usize,
            },
        },
    })
}

/// Table holding a collection, after validating the name as an identifier
fn table_name(collection: &str) -> Result<String> {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    let ident = IDENT.get_or_init(|| {
        Regex::new(r"^[a-z_][a-z0-9_]{0,47}$").expect("collection name pattern is valid")
    });

    if !ident.is_match(collection) {
        return Err(AppError::Configuration {
            message: format!(
                "collection name '{}' must be lowercase letters, digits or underscores",
                collection
            ),
        });
    }
    Ok(format!("rag_{}", collection))
}

/// Convert a vector to pgvector's text format "[1,2,...]"
fn vector_literal(vector: &[f32]) -> String {
    format!(
        "[{}]",
        vector
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

/// Score with higher meaning closer; `<#>` yields the negated inner product
///
/// Cosine distance against a zero vector is NaN in pgvector; it scores 0.
fn score_expression(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => {
            "COALESCE(NULLIF(1 - (embedding <=> $1::vector), 'NaN'::float8), 0)"
        }
        DistanceMetric::Euclid => "-(embedding <-> $1::vector)",
        DistanceMetric::Dot => "-(embedding <#> $1::vector)",
    }
}

fn index_error(err: sea_orm::DbErr) -> AppError {
    let retryable = matches!(
        err,
        sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_)
    );
    AppError::VectorIndex {
        message: err.to_string(),
        retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::models::Chunk;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_table_name_validation() {
        assert_eq!(table_name("docs").unwrap(), "rag_docs");
        assert_eq!(table_name("team_2_docs").unwrap(), "rag_team_2_docs");
        assert!(table_name("Docs").is_err());
        assert!(table_name("docs; DROP TABLE x").is_err());
        assert!(table_name("").is_err());
    }

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[1.0, -0.5, 0.25]), "[1,-0.5,0.25]");
    }

    #[test]
    fn test_score_expression_uses_metric_operator() {
        assert!(score_expression(DistanceMetric::Cosine).contains("<=>"));
        assert!(score_expression(DistanceMetric::Cosine).contains("'NaN'"));
        assert!(score_expression(DistanceMetric::Euclid).contains("<->"));
        assert!(score_expression(DistanceMetric::Dot).contains("<#>"));
    }

    // Live tests: run with DATABASE_URL pointing at Postgres with pgvector and
    // `cargo test -- --ignored`. Each test works in its own collection.

    async fn live_index(dimension: usize) -> Option<(PgVectorIndex, CollectionSpec)> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let config = DatabaseConfig {
            url,
            ..DatabaseConfig::default()
        };
        let index = PgVectorIndex::new(DbPool::new(&config).await.unwrap());
        index.bootstrap().await.unwrap();

        let spec = CollectionSpec {
            name: format!("t_{}", Uuid::new_v4().simple()),
            dimension,
            metric: DistanceMetric::Cosine,
        };
        index.ensure_collection(&spec).await.unwrap();
        Some((index, spec))
    }

    async fn drop_collection(index: &PgVectorIndex, name: &str) {
        let conn = index.pool.conn();
        conn.execute_unprepared(&format!("DROP TABLE IF EXISTS rag_{}", name))
            .await
            .unwrap();
        conn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "DELETE FROM rag_collections WHERE name = $1",
            vec![name.into()],
        ))
        .await
        .unwrap();
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

    #[tokio::test]
    #[ignore]
    async fn test_live_ensure_collection_checks_catalog() {
        let Some((index, spec)) = live_index(2).await else { return };

        assert_ok!(index.ensure_collection(&spec).await);
        assert_eq!(index.describe_collection(&spec.name).await.unwrap(), Some(spec.clone()));

        let wider = CollectionSpec { dimension: 4, ..spec.clone() };
        let err = index.ensure_collection(&wider).await.unwrap_err();
        assert!(matches!(err, AppError::CollectionConfigMismatch { existing_dimension: 2, .. }));

        drop_collection(&index, &spec.name).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_large_dimension_collection() {
        let Some((index, spec)) = live_index(3072).await else { return };

        let mut vector = vec![0.0; 3072];
        vector[0] = 1.0;
        index.upsert(&spec.name, &[record("a.pdf", 0, vector.clone())]).await.unwrap();
        let hits = index.search(&spec.name, &vector, 1, &SearchFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 1);

        drop_collection(&index, &spec.name).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_search_sorted_bounded_and_exact() {
        let Some((index, spec)) = live_index(2).await else { return };

        index
            .upsert(
                &spec.name,
                &[
                    record("a.pdf", 0, vec![1.0, 0.0]),
                    record("a.pdf", 1, vec![0.0, 1.0]),
                    record("a.pdf", 2, vec![0.7, 0.7]),
                ],
            )
            .await
            .unwrap();

        let hits = index.search(&spec.name, &[1.0, 0.1], 2, &SearchFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].payload.sequence_index, 0);
        assert!(hits[0].score > 0.9);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        // more rows than an approximate index would return by default
        let many: Vec<VectorRecord> = (0..45)
            .map(|i| record("b.pdf", i, vec![1.0, i as f32 / 45.0]))
            .collect();
        index.upsert(&spec.name, &many).await.unwrap();
        let filtered = index
            .search(&spec.name, &[1.0, 0.0], 50, &SearchFilter::source("b.pdf"))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 45);

        drop_collection(&index, &spec.name).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_ties_broken_by_id() {
        let Some((index, spec)) = live_index(2).await else { return };

        index
            .upsert(
                &spec.name,
                &[
                    record("a.pdf", 0, vec![1.0, 0.0]),
                    record("b.pdf", 0, vec![1.0, 0.0]),
                    record("c.pdf", 0, vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = index.search(&spec.name, &[1.0, 0.0], 3, &SearchFilter::default()).await.unwrap();
        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        drop_collection(&index, &spec.name).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_zero_vector_scores_zero() {
        let Some((index, spec)) = live_index(2).await else { return };

        index
            .upsert(
                &spec.name,
                &[record("a.pdf", 0, vec![0.0, 0.0]), record("a.pdf", 1, vec![-1.0, 0.0])],
            )
            .await
            .unwrap();

        let hits = index.search(&spec.name, &[1.0, 0.0], 2, &SearchFilter::default()).await.unwrap();
        assert_eq!(hits[0].payload.sequence_index, 0);
        assert_eq!(hits[0].score, 0.0);
        assert!(hits[1].score < 0.0);

        drop_collection(&index, &spec.name).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_replace_source_removes_orphans() {
        let Some((index, spec)) = live_index(2).await else { return };

        index
            .upsert(
                &spec.name,
                &[
                    record("a.pdf", 0, vec![1.0, 0.0]),
                    record("a.pdf", 1, vec![1.0, 0.0]),
                    record("a.pdf", 2, vec![1.0, 0.0]),
                    record("b.pdf", 0, vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        index
            .replace_source(&spec.name, "a.pdf", &[record("a.pdf", 0, vec![0.5, 0.5])])
            .await
            .unwrap();

        assert_eq!(index.count(&spec.name, &SearchFilter::source("a.pdf")).await.unwrap(), 1);
        assert_eq!(index.count(&spec.name, &SearchFilter::source("b.pdf")).await.unwrap(), 1);
        assert_eq!(index.delete_source(&spec.name, "b.pdf").await.unwrap(), 1);

        drop_collection(&index, &spec.name).await;
    }

    #[tokio::test]
    #[ignore]
    async fn test_live_failed_batch_rolls_back() {
        let Some((index, spec)) = live_index(2).await else { return };
        index.upsert(&spec.name, &[record("a.pdf", 0, vec![1.0, 0.0])]).await.unwrap();

        let wrong_dimension = vec![record("b.pdf", 0, vec![1.0, 0.0]), record("b.pdf", 1, vec![1.0, 0.0, 0.0])];
        let err = index.upsert(&spec.name, &wrong_dimension).await.unwrap_err();
        assert!(matches!(err, AppError::EmbeddingDimensionMismatch { .. }));

        // Postgres rejects NUL in text, failing the second insert mid-transaction
        let nul_chunk = Chunk::new("b.pdf", 1, "bad\0text".to_string(), CharSpan { start: 0, end: 8 });
        let rejected = VectorRecord::new(nul_chunk, vec![0.0, 1.0], 2).unwrap();
        let mid_batch = vec![record("b.pdf", 0, vec![1.0, 0.0]), rejected];
        assert_err!(index.replace_source(&spec.name, "b.pdf", &mid_batch).await);

        assert_eq!(index.count(&spec.name, &SearchFilter::default()).await.unwrap(), 1);

        drop_collection(&index, &spec.name).await;
    }
}
