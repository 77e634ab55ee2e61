//! `RetrievalStore`: the public C6 surface over a swappable `VectorBackend`
//! and `Embedder` (§4.6).

use crate::embedder::{EmbedError, Embedder};
use nlsql_core::{Dialect, PastQuery, VectorBackend, VectorError, VectorMetric};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval embedding error: {0}")]
    Embed(#[from] EmbedError),

    #[error("retrieval vector store error: {0}")]
    Vector(#[from] VectorError),

    #[error("retrieval payload error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Filters applied on top of the raw cosine-similarity ranking, since
/// `VectorBackend::search`'s `filter` is an opaque backend-defined blob and
/// cannot be relied on to understand dialect/schema_name/success (§4.6).
#[derive(Debug, Clone)]
pub struct SearchFilter {
    pub dialect: Dialect,
    pub schema_name: Option<String>,
    pub include_failures: bool,
}

impl SearchFilter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect, schema_name: None, include_failures: false }
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }

    pub fn include_failures(mut self) -> Self {
        self.include_failures = true;
        self
    }
}

/// Candidate pool multiplier fetched from the backend before this store's
/// own dialect/schema/success filtering and threshold cut narrow it to `k`.
const CANDIDATE_OVERFETCH: usize = 5;
const MIN_CANDIDATES: usize = 20;

pub struct RetrievalStore {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    default_threshold: f32,
    initialized: Mutex<bool>,
    recorded_ids: Mutex<HashSet<String>>,
}

impl RetrievalStore {
    pub fn new(backend: Arc<dyn VectorBackend>, embedder: Arc<dyn Embedder>, collection: impl Into<String>) -> Self {
        Self {
            backend,
            embedder,
            collection: collection.into(),
            default_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            initialized: Mutex::new(false),
            recorded_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_default_threshold(mut self, threshold: f32) -> Self {
        self.default_threshold = threshold;
        self
    }

    async fn ensure_collection(&self) -> Result<(), RetrievalError> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }
        self.backend
            .create_collection(&self.collection, self.embedder.dimension(), VectorMetric::Cosine)
            .await?;
        *initialized = true;
        Ok(())
    }

    /// Embeds `query.user_query` with the fixed embedding model and upserts
    /// it keyed by `PastQuery::derive_id(user_query, sql_query, connection_id)`
    /// (§4.6), so recording the same pair twice overwrites rather than
    /// duplicates.
    pub async fn record(&self, connection_id: &str, mut query: PastQuery) -> Result<(), RetrievalError> {
        self.ensure_collection().await?;

        let embedding = self.embedder.embed(&query.user_query).await?;
        query.embedding = embedding.clone();

        let id = PastQuery::derive_id(&query.user_query, &query.sql_query, connection_id);
        let payload = serde_json::to_value(&query)?;
        self.backend.upsert(&self.collection, &id, &embedding, payload).await?;
        self.recorded_ids.lock().await.insert(id);
        Ok(())
    }

    /// CSV-style batch ingestion: records are expected to already be parsed
    /// into `PastQuery` values by the caller (§4.6); returns the count
    /// recorded.
    pub async fn bulk_import(&self, connection_id: &str, records: Vec<PastQuery>) -> Result<usize, RetrievalError> {
        let mut count = 0;
        for record in records {
            self.record(connection_id, record).await?;
            count += 1;
        }
        Ok(count)
    }

    /// Top-k past queries whose cosine similarity to `user_query`'s
    /// embedding is at least `threshold` (default 0.7), filtered by dialect
    /// and (optionally) schema name, restricted to successful queries
    /// unless `filter.include_failures` is set, ordered by similarity
    /// descending (§4.6).
    pub async fn search(
        &self,
        user_query: &str,
        filter: &SearchFilter,
        k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<PastQuery>, RetrievalError> {
        self.ensure_collection().await?;

        let embedding = self.embedder.embed(user_query).await?;
        let threshold = threshold.unwrap_or(self.default_threshold);
        let candidate_k = (k * CANDIDATE_OVERFETCH).max(MIN_CANDIDATES);

        let matches = match self.backend.search(&self.collection, &embedding, candidate_k, None).await {
            Ok(matches) => matches,
            Err(VectorError::CollectionNotFound(_)) => return Ok(Vec::new()),
            Err(other) => return Err(other.into()),
        };

        let mut results = Vec::new();
        for candidate in matches {
            if candidate.score < threshold {
                continue;
            }
            let Ok(past) = serde_json::from_value::<PastQuery>(candidate.payload) else {
                continue;
            };
            if past.dialect != filter.dialect {
                continue;
            }
            if let Some(schema_name) = &filter.schema_name {
                if past.schema_name.as_deref() != Some(schema_name.as_str()) {
                    continue;
                }
            }
            if !filter.include_failures && !past.success {
                continue;
            }
            results.push(past);
            if results.len() == k {
                break;
            }
        }
        Ok(results)
    }

    /// Deletes every record this store has recorded into its collection.
    /// `VectorBackend` has no bulk-wipe or id-enumeration primitive, so this
    /// replays `delete` over the ids this instance has itself upserted.
    pub async fn clear(&self) -> Result<(), RetrievalError> {
        let mut ids = self.recorded_ids.lock().await;
        for id in ids.drain() {
            self.backend.delete(&self.collection, &id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashingEmbedder;
    use nlsql_test_support::FakeVectorBackend;

    fn store() -> RetrievalStore {
        RetrievalStore::new(Arc::new(FakeVectorBackend::new()), Arc::new(HashingEmbedder::default()), "past_queries")
    }

    #[tokio::test]
    async fn record_then_search_returns_the_same_query_at_position_zero() {
        let store = store();
        let query = PastQuery::new("list all vendors", "SELECT * FROM vendors", Dialect::Postgres, true);
        store.record("app_localhost_5432", query.clone()).await.unwrap();

        let filter = SearchFilter::new(Dialect::Postgres);
        let results = store.search("list all vendors", &filter, 1, None).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].sql_query, query.sql_query);
    }

    #[tokio::test]
    async fn search_excludes_failed_queries_by_default() {
        let store = store();
        let query = PastQuery::new("list all vendors", "SELECT * FROM vendors", Dialect::Postgres, false);
        store.record("app_localhost_5432", query).await.unwrap();

        let filter = SearchFilter::new(Dialect::Postgres);
        let results = store.search("list all vendors", &filter, 5, None).await.unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn search_respects_dialect_filter() {
        let store = store();
        let query = PastQuery::new("list all vendors", "SELECT * FROM vendors", Dialect::Postgres, true);
        store.record("app_localhost_5432", query).await.unwrap();

        let filter = SearchFilter::new(Dialect::MySql);
        let results = store.search("list all vendors", &filter, 5, None).await.unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn clear_removes_all_recorded_queries() {
        let store = store();
        let query = PastQuery::new("list all vendors", "SELECT * FROM vendors", Dialect::Postgres, true);
        store.record("app_localhost_5432", query).await.unwrap();
        store.clear().await.unwrap();

        let filter = SearchFilter::new(Dialect::Postgres);
        let results = store.search("list all vendors", &filter, 5, Some(0.0)).await.unwrap();
        assert!(results.is_empty());
    }
}
