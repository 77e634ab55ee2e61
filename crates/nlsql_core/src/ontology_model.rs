use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    References,
    BelongsTo,
    HasMany,
    AssociatedWith,
}

/// Domain noun tying one or more tables together (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    /// PascalCase, e.g. `"Vendor"`.
    pub name: String,
    pub description: String,
    pub tables: Vec<String>,
    pub synonyms: Vec<String>,
}

/// One concept attribute mapped to a concrete `(table, column)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub concept: String,
    /// Compound token, e.g. `"vendorname"`.
    pub property_name: String,
    pub table: String,
    pub column: String,
    pub semantic_meaning: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_concept: String,
    pub to_concept: String,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    pub via_table: Option<String>,
    pub confidence: f32,
}

/// Bound to a single `connection_id` (§3, §4.4). Pruned/regenerated as the
/// schema fingerprint drifts; see `nlsql_ontology` for that lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ontology {
    pub concepts: Vec<Concept>,
    pub properties: Vec<Property>,
    pub relationships: Vec<Relationship>,
    pub generated_at: DateTime<Utc>,
    pub schema_fingerprint: String,
}

impl Ontology {
    pub fn empty(schema_fingerprint: impl Into<String>) -> Self {
        Self {
            concepts: Vec::new(),
            properties: Vec::new(),
            relationships: Vec::new(),
            generated_at: Utc::now(),
            schema_fingerprint: schema_fingerprint.into(),
        }
    }

    pub fn concept(&self, name: &str) -> Option<&Concept> {
        self.concepts.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Drop every `Property` whose `(table, column)` is no longer present in
    /// `table_columns` (§3's Ontology invariant).
    pub fn prune_stale_properties(&mut self, table_columns: &dyn Fn(&str, &str) -> bool) {
        self.properties
            .retain(|p| table_columns(&p.table, &p.column));
    }
}

/// A single ontology-backed suggestion that a column is relevant to the
/// current question (§4.4, §GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnHint {
    pub table: String,
    pub column: String,
    pub concept: String,
    pub property: String,
    pub confidence: f32,
}

/// Output of `OntologyStore::resolve` (§4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub hints: Vec<ColumnHint>,
    pub reasoning: String,
    pub confidence: f32,
}

impl ResolutionResult {
    pub fn empty() -> Self {
        Self::default()
    }
}
