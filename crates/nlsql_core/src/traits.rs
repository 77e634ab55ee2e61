//! Capability interfaces at the system's external boundaries (§6, §9).
//!
//! Every collaborator the core talks to — database, language model, vector
//! store, graph store — is a small trait here rather than a duck-typed
//! object; a null implementation backs each optional one so the state
//! machine can short-circuit a disabled subsystem without special-casing it.

use crate::connection::{ConnectionConfig, ConnectionHandle};
use crate::error::DbError;
use crate::graph_model::{GraphEdge, GraphNode, NodeLabel};
use crate::result::ResultSet;
use crate::schema::SchemaSnapshot;
use crate::sql_dialect::DialectIdioms;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Handle for cancelling a running query against a specific dialect driver
/// (§4.8). Best-effort: the query may already have completed, or the
/// dialect may not support server-side cancellation at all.
pub trait QueryCancelHandle: Send + Sync {
    fn cancel(&self) -> Result<(), DbError>;
    fn is_cancelled(&self) -> bool;
}

/// No-op cancel handle for dialects without cancellation support.
#[derive(Clone)]
pub struct NoopCancelHandle;

impl QueryCancelHandle for NoopCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Dialect-specific connect/introspect/execute/disconnect contract (§4.1).
/// Synchronous and blocking by design: the state machine's caller is
/// responsible for moving these calls off whatever async executor it runs
/// on (e.g. `tokio::task::spawn_blocking`), mirroring how the core's
/// synchronous drivers are bridged into an async outer layer.
pub trait DbAdapter: Send + Sync {
    /// Open a session. Credentials are validated lazily, on first real
    /// query, not at socket-open time — except SQLite, which opens (and
    /// optionally creates) the file immediately.
    fn connect(&self, config: ConnectionConfig) -> Result<ConnectionHandle, DbError>;

    fn introspect(&self, handle: &ConnectionHandle) -> Result<SchemaSnapshot, DbError>;

    /// `limit` is a server-side cap applied only when the generated SQL
    /// carries no user-specified limit of its own (§4.1).
    fn execute(
        &self,
        handle: &ConnectionHandle,
        sql: &str,
        limit: Option<u32>,
    ) -> Result<ResultSet, DbError>;

    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DbError>;

    /// Dialect idioms consumed by the Context Budgeter to write the
    /// system-prompt paragraph (§4.1, §4.3).
    fn dialect_idioms(&self) -> &DialectIdioms;

    fn cancel_handle(&self, _handle: &ConnectionHandle) -> Arc<dyn QueryCancelHandle> {
        Arc::new(NoopCancelHandle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionParams {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: std::time::Duration,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
            timeout: std::time::Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub finish_reason: String,
}

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("llm provider error: {0}")]
    ProviderError(String),
    #[error("llm call timed out")]
    Timeout,
    #[error("llm call cancelled")]
    Cancelled,
    #[error("llm response was not valid JSON: {0}")]
    InvalidResponse(String),
}

/// External language-model interface (§6). Prompt assembly is in scope;
/// the provider itself is an opaque collaborator.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        params: &CompletionParams,
    ) -> Result<Completion, LlmError>;

    /// Parses the completion as JSON; on a non-JSON response, retries once
    /// with a stricter "JSON only" system message appended, then fails
    /// (§6).
    async fn complete_json(
        &self,
        messages: &[Message],
        params: &CompletionParams,
        schema_hint: &str,
    ) -> Result<serde_json::Value, LlmError>;

    fn max_context_tokens(&self) -> u32;
    fn max_output_tokens(&self) -> u32;
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMetric {
    Cosine,
}

#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Error)]
pub enum VectorError {
    #[error("vector collection not found: {0}")]
    CollectionNotFound(String),
    #[error("vector backend unavailable: {0}")]
    Unavailable(String),
    #[error("vector backend error: {0}")]
    Other(String),
}

/// Vector store capability backing C6 (§4.6, §6).
#[async_trait]
pub trait VectorBackend: Send + Sync {
    async fn create_collection(
        &self,
        collection: &str,
        dim: usize,
        metric: VectorMetric,
    ) -> Result<(), VectorError>;

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f32],
        payload: serde_json::Value,
    ) -> Result<(), VectorError>;

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<serde_json::Value>,
    ) -> Result<Vec<VectorMatch>, VectorError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), VectorError>;

    async fn count(&self, collection: &str) -> Result<usize, VectorError>;
}

#[derive(Debug, Clone, Error)]
pub enum GraphBackendError {
    #[error("graph backend unavailable: {0}")]
    Unavailable(String),
    #[error("graph backend error: {0}")]
    Other(String),
}

/// External graph database capability backing C5 (§4.5, §6). Parameter
/// naming matters here: a caller binding the user's question as a query
/// parameter must not call it `query` if the underlying graph query
/// language reserves that name — see `nlsql_graph`'s external-backend
/// adapter, which binds it as `user_query`.
#[async_trait]
pub trait GraphBackend: Send + Sync {
    async fn upsert_node(&self, connection_id: &str, node: &GraphNode) -> Result<(), GraphBackendError>;

    async fn upsert_edge(&self, connection_id: &str, edge: &GraphEdge) -> Result<(), GraphBackendError>;

    async fn clear_connection(&self, connection_id: &str) -> Result<(), GraphBackendError>;

    async fn shortest_path(
        &self,
        connection_id: &str,
        from_key: &str,
        to_key: &str,
        max_depth: usize,
    ) -> Result<Option<Vec<String>>, GraphBackendError>;

    async fn neighbors(&self, connection_id: &str, key: &str) -> Result<Vec<String>, GraphBackendError>;

    async fn subgraph_by_label(
        &self,
        connection_id: &str,
        label: NodeLabel,
    ) -> Result<Vec<GraphNode>, GraphBackendError>;
}

/// Null graph backend: lets C9 disable the graph subsystem cleanly (§9).
pub struct NoopGraphBackend;

#[async_trait]
impl GraphBackend for NoopGraphBackend {
    async fn upsert_node(&self, _connection_id: &str, _node: &GraphNode) -> Result<(), GraphBackendError> {
        Ok(())
    }

    async fn upsert_edge(&self, _connection_id: &str, _edge: &GraphEdge) -> Result<(), GraphBackendError> {
        Ok(())
    }

    async fn clear_connection(&self, _connection_id: &str) -> Result<(), GraphBackendError> {
        Ok(())
    }

    async fn shortest_path(
        &self,
        _connection_id: &str,
        _from_key: &str,
        _to_key: &str,
        _max_depth: usize,
    ) -> Result<Option<Vec<String>>, GraphBackendError> {
        Ok(None)
    }

    async fn neighbors(&self, _connection_id: &str, _key: &str) -> Result<Vec<String>, GraphBackendError> {
        Ok(Vec::new())
    }

    async fn subgraph_by_label(
        &self,
        _connection_id: &str,
        _label: NodeLabel,
    ) -> Result<Vec<GraphNode>, GraphBackendError> {
        Ok(Vec::new())
    }
}

/// Null vector backend: lets C9 disable the retrieval subsystem cleanly (§9).
pub struct NoopVectorBackend;

#[async_trait]
impl VectorBackend for NoopVectorBackend {
    async fn create_collection(
        &self,
        _collection: &str,
        _dim: usize,
        _metric: VectorMetric,
    ) -> Result<(), VectorError> {
        Ok(())
    }

    async fn upsert(
        &self,
        _collection: &str,
        _id: &str,
        _vector: &[f32],
        _payload: serde_json::Value,
    ) -> Result<(), VectorError> {
        Ok(())
    }

    async fn search(
        &self,
        _collection: &str,
        _vector: &[f32],
        _k: usize,
        _filter: Option<serde_json::Value>,
    ) -> Result<Vec<VectorMatch>, VectorError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _collection: &str, _id: &str) -> Result<(), VectorError> {
        Ok(())
    }

    async fn count(&self, _collection: &str) -> Result<usize, VectorError> {
        Ok(0)
    }
}
