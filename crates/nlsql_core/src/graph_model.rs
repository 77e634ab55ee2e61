use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeLabel {
    Database,
    Schema,
    Table,
    Column,
    Index,
    Concept,
    Property,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeLabel {
    HasSchema,
    Contains,
    HasColumn,
    /// column -> column, carries `constraint_name`.
    References,
    /// table -> table, derived from foreign keys.
    RelatedTo,
    HasIndex,
    /// Concept -> Property.
    HasProperty,
    /// Property -> Column, carries `confidence`.
    MapsToColumn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub label: NodeLabel,
    /// Stable identity within `connection_id`, e.g. table name or
    /// `"table.column"`, never a pointer (§9).
    pub key: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub label: EdgeLabel,
    pub from_key: String,
    pub to_key: String,
    pub constraint_name: Option<String>,
    pub confidence: Option<f32>,
}

/// A suggested column relevant to a question, surfaced by graph insights
/// (§4.5). Distinct from `ontology_model::ColumnHint` — graph hints carry no
/// concept/property provenance, only the matched table/column pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphColumnHint {
    pub table: String,
    pub column: String,
    pub confidence: f32,
}

/// A shortest `RELATED_TO` path between two tables (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinPath {
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedConcept {
    pub concept: String,
    pub confidence: f32,
}

/// Output of `GraphStore::insights` (§4.5).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphInsights {
    pub suggested_columns: Vec<GraphColumnHint>,
    pub join_paths: Vec<JoinPath>,
    pub related_tables: Vec<String>,
    pub ranked_concepts: Vec<RankedConcept>,
}

impl GraphInsights {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Result of a `GraphStore::sync` call (§4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub node_count: usize,
    pub edge_count: usize,
}
