use crate::connection::ConnectionHandle;
use crate::error::DbError;
use crate::graph_model::GraphInsights;
use crate::ontology_model::ResolutionResult;
use crate::retrieval_model::PastQuery;
use crate::schema::SchemaSnapshot;

/// How a query's state-machine run concluded (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Success,
    Exhausted,
    Fatal,
}

/// Transient, one per user question (§3, §4.8). Owned by the caller driving
/// a single state-machine run; never shared across queries.
#[derive(Debug, Clone)]
pub struct QueryState {
    pub question: String,
    pub handle: ConnectionHandle,
    pub snapshot: SchemaSnapshot,
    pub attempt: u32,
    pub max_attempts: u32,
    pub last_sql: Option<String>,
    pub last_error: Option<DbError>,
    pub focused_tables: Vec<String>,
    pub ontology_hits: ResolutionResult,
    pub graph_hits: GraphInsights,
    pub retrieval_hits: Vec<PastQuery>,
    pub terminal: Option<Terminal>,
}

impl QueryState {
    pub fn new(
        question: impl Into<String>,
        handle: ConnectionHandle,
        snapshot: SchemaSnapshot,
        max_attempts: u32,
    ) -> Self {
        Self {
            question: question.into(),
            handle,
            snapshot,
            attempt: 0,
            max_attempts,
            last_sql: None,
            last_error: None,
            focused_tables: Vec::new(),
            ontology_hits: ResolutionResult::empty(),
            graph_hits: GraphInsights::empty(),
            retrieval_hits: Vec::new(),
            terminal: None,
        }
    }

    pub fn is_first_attempt(&self) -> bool {
        self.attempt == 0
    }

    pub fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
