pub mod config;
pub mod connection;
pub mod error;
pub mod graph_model;
pub mod ontology_model;
pub mod query_state;
pub mod result;
pub mod retrieval_model;
pub mod schema;
pub mod sql_dialect;
pub mod task;
pub mod traits;
pub mod value;

pub use config::{NlsqlConfig, NlsqlConfigStore};
pub use connection::{ConnectionConfig, ConnectionHandle, Dialect};
pub use error::{DbError, ErrorKind, FormattedError};
pub use graph_model::{EdgeLabel, GraphEdge, GraphInsights, GraphNode, JoinPath, NodeLabel};
pub use ontology_model::{ColumnHint, Concept, Ontology, Property, Relationship, ResolutionResult};
pub use query_state::{QueryState, Terminal};
pub use result::{ColumnMeta, ResultSet};
pub use retrieval_model::PastQuery;
pub use schema::{ColumnInfo, ConnectionInfo, ForeignKeyRef, SchemaSnapshot, TableInfo, ViewInfo};
pub use sql_dialect::{DialectFeatures, DialectIdioms, LimitStyle, PlaceholderStyle, SqlDialect};
pub use task::CancelToken;
pub use traits::{
    Completion, CompletionParams, DbAdapter, GraphBackend, GraphBackendError, LlmError,
    LlmProvider, Message, NoopCancelHandle, NoopGraphBackend, NoopVectorBackend,
    QueryCancelHandle, Role, VectorBackend, VectorError, VectorMatch, VectorMetric,
};
pub use value::Value;
