//! `GraphStore`: the public C5 surface — idempotent snapshot/ontology sync
//! plus natural-language insights — sitting in front of a swappable
//! `GraphBackend` (§4.5).

use nlsql_core::graph_model::{GraphColumnHint, RankedConcept, SyncReport};
use nlsql_core::{
    EdgeLabel, GraphBackend, GraphBackendError, GraphEdge, GraphInsights, GraphNode, JoinPath,
    NodeLabel, Ontology, SchemaSnapshot,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::in_process::InProcessGraphBackend;

pub const DEFAULT_MAX_JOIN_DEPTH: usize = 2;

pub struct GraphStore {
    active: RwLock<Arc<dyn GraphBackend>>,
    fallback: Arc<InProcessGraphBackend>,
    max_join_depth: usize,
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    pub fn new() -> Self {
        let fallback = Arc::new(InProcessGraphBackend::new());
        Self {
            active: RwLock::new(fallback.clone() as Arc<dyn GraphBackend>),
            fallback,
            max_join_depth: DEFAULT_MAX_JOIN_DEPTH,
        }
    }

    pub fn with_max_join_depth(mut self, max_join_depth: usize) -> Self {
        self.max_join_depth = max_join_depth;
        self
    }

    /// Reload Coordinator hook (§4.9): swap the active backend. Queries
    /// already holding a clone of the previous `Arc` finish against it.
    pub fn set_backend(&self, backend: Arc<dyn GraphBackend>) {
        *self.active.write().expect("graph store lock poisoned") = backend;
    }

    fn active_backend(&self) -> Arc<dyn GraphBackend> {
        self.active.read().expect("graph store lock poisoned").clone()
    }

    fn degrade_to_fallback(&self, reason: &str) {
        log::warn!("external graph backend unavailable ({reason}), falling back to the in-process graph");
        *self.active.write().expect("graph store lock poisoned") = self.fallback.clone();
    }

    /// Clears and rebuilds `connection_id`'s graph from `snapshot` and
    /// `ontology`: one `Table`/`Column` node per schema entity, one
    /// `Concept`/`Property` node per ontology entity, `HasColumn`,
    /// `References`, and `RelatedTo` edges from the schema's foreign keys,
    /// and `HasProperty`/`MapsToColumn` edges from the ontology (§4.5).
    /// Calling this twice with the same inputs reports identical counts.
    pub async fn sync(
        &self,
        connection_id: &str,
        snapshot: &SchemaSnapshot,
        ontology: &Ontology,
    ) -> Result<SyncReport, GraphBackendError> {
        self.clear(connection_id).await?;

        let mut node_count = 0usize;
        let mut edge_count = 0usize;

        for table in &snapshot.tables {
            self.upsert_node(connection_id, table_node(&table.table_name)).await?;
            node_count += 1;

            for column in &table.columns {
                let column_key = format!("{}.{}", table.table_name, column.name);
                self.upsert_node(connection_id, column_node(&column_key, &column.name)).await?;
                node_count += 1;

                self.upsert_edge(
                    connection_id,
                    GraphEdge {
                        label: EdgeLabel::HasColumn,
                        from_key: table.table_name.clone(),
                        to_key: column_key,
                        constraint_name: None,
                        confidence: None,
                    },
                )
                .await?;
                edge_count += 1;
            }

            for fk in &table.foreign_keys {
                self.upsert_edge(
                    connection_id,
                    GraphEdge {
                        label: EdgeLabel::References,
                        from_key: format!("{}.{}", table.table_name, fk.column),
                        to_key: format!("{}.{}", fk.ref_table, fk.ref_column),
                        constraint_name: None,
                        confidence: None,
                    },
                )
                .await?;
                edge_count += 1;

                self.upsert_edge(
                    connection_id,
                    GraphEdge {
                        label: EdgeLabel::RelatedTo,
                        from_key: table.table_name.clone(),
                        to_key: fk.ref_table.clone(),
                        constraint_name: None,
                        confidence: None,
                    },
                )
                .await?;
                edge_count += 1;
            }
        }

        for concept in &ontology.concepts {
            self.upsert_node(connection_id, concept_node(&concept.name)).await?;
            node_count += 1;
        }

        for property in &ontology.properties {
            let property_key = property_key(&property.concept, &property.property_name);
            self.upsert_node(connection_id, property_node(&property_key, &property.property_name)).await?;
            node_count += 1;

            self.upsert_edge(
                connection_id,
                GraphEdge {
                    label: EdgeLabel::HasProperty,
                    from_key: property.concept.clone(),
                    to_key: property_key.clone(),
                    constraint_name: None,
                    confidence: None,
                },
            )
            .await?;
            edge_count += 1;

            if snapshot.has_column(&property.table, &property.column) {
                self.upsert_edge(
                    connection_id,
                    GraphEdge {
                        label: EdgeLabel::MapsToColumn,
                        from_key: property_key,
                        to_key: format!("{}.{}", property.table, property.column),
                        constraint_name: None,
                        confidence: Some(property.confidence),
                    },
                )
                .await?;
                edge_count += 1;
            }
        }

        Ok(SyncReport { node_count, edge_count })
    }

    /// Lowercases and tokenizes `question`, matches it against every synced
    /// `Property` node by full-contains (either direction) and word-level
    /// substring (the same `>3`-char filter as the ontology resolver), then
    /// derives suggested columns, join paths, related tables, and a
    /// confidence-ranked concept list from the graph around those hits
    /// (§4.5).
    pub async fn insights(&self, connection_id: &str, question: &str) -> Result<GraphInsights, GraphBackendError> {
        let question_lower = question.to_lowercase();
        let words: Vec<&str> = question_lower.split_whitespace().collect();

        let properties = self.subgraph_by_label(connection_id, NodeLabel::Property).await?;

        let mut column_hits: HashMap<(String, String), f32> = HashMap::new();
        let mut concept_hits: HashMap<String, f32> = HashMap::new();

        for property in &properties {
            let property_lower = property.display_name.to_lowercase();
            let score = if question_lower.contains(&property_lower) {
                0.8
            } else if !question_lower.is_empty() && property_lower.contains(&question_lower) {
                0.7
            } else if words.iter().any(|w| w.len() > 3 && property_lower.contains(w)) {
                0.6
            } else {
                continue;
            };

            for neighbor_key in self.neighbors(connection_id, &property.key).await? {
                match neighbor_key.split_once('.') {
                    Some((table, column)) => {
                        let entry = column_hits.entry((table.to_string(), column.to_string())).or_insert(0.0);
                        *entry = entry.max(score);
                    }
                    None => {
                        let entry = concept_hits.entry(neighbor_key).or_insert(0.0);
                        *entry = entry.max(score);
                    }
                }
            }
        }

        let mut suggested_columns: Vec<GraphColumnHint> = column_hits
            .into_iter()
            .map(|((table, column), confidence)| GraphColumnHint { table, column, confidence })
            .collect();
        suggested_columns.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

        let mut ranked_concepts: Vec<RankedConcept> = concept_hits
            .into_iter()
            .map(|(concept, confidence)| RankedConcept { concept, confidence })
            .collect();
        ranked_concepts.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap());

        let hit_tables: Vec<String> = {
            let set: HashSet<String> = suggested_columns.iter().map(|h| h.table.clone()).collect();
            let mut tables: Vec<String> = set.into_iter().collect();
            tables.sort();
            tables
        };

        let mut join_paths = Vec::new();
        for i in 0..hit_tables.len() {
            for j in (i + 1)..hit_tables.len() {
                if let Some(path) = self
                    .shortest_path(connection_id, &hit_tables[i], &hit_tables[j], self.max_join_depth)
                    .await?
                {
                    if path.len() > 1 {
                        join_paths.push(JoinPath { tables: path });
                    }
                }
            }
        }

        let mut related_tables = HashSet::new();
        for table in &hit_tables {
            for neighbor in self.neighbors(connection_id, table).await? {
                if !neighbor.contains('.') && !hit_tables.contains(&neighbor) {
                    related_tables.insert(neighbor);
                }
            }
        }
        let mut related_tables: Vec<String> = related_tables.into_iter().collect();
        related_tables.sort();

        Ok(GraphInsights { suggested_columns, join_paths, related_tables, ranked_concepts })
    }

    async fn clear(&self, connection_id: &str) -> Result<(), GraphBackendError> {
        let backend = self.active_backend();
        match backend.clear_connection(connection_id).await {
            Err(GraphBackendError::Unavailable(reason)) => {
                self.degrade_to_fallback(&reason);
                self.fallback.clear_connection(connection_id).await
            }
            other => other,
        }
    }

    async fn upsert_node(&self, connection_id: &str, node: GraphNode) -> Result<(), GraphBackendError> {
        let backend = self.active_backend();
        match backend.upsert_node(connection_id, &node).await {
            Err(GraphBackendError::Unavailable(reason)) => {
                self.degrade_to_fallback(&reason);
                self.fallback.upsert_node(connection_id, &node).await
            }
            other => other,
        }
    }

    async fn upsert_edge(&self, connection_id: &str, edge: GraphEdge) -> Result<(), GraphBackendError> {
        let backend = self.active_backend();
        match backend.upsert_edge(connection_id, &edge).await {
            Err(GraphBackendError::Unavailable(reason)) => {
                self.degrade_to_fallback(&reason);
                self.fallback.upsert_edge(connection_id, &edge).await
            }
            other => other,
        }
    }

    async fn neighbors(&self, connection_id: &str, key: &str) -> Result<Vec<String>, GraphBackendError> {
        let backend = self.active_backend();
        match backend.neighbors(connection_id, key).await {
            Err(GraphBackendError::Unavailable(reason)) => {
                self.degrade_to_fallback(&reason);
                self.fallback.neighbors(connection_id, key).await
            }
            other => other,
        }
    }

    async fn shortest_path(
        &self,
        connection_id: &str,
        from_key: &str,
        to_key: &str,
        max_depth: usize,
    ) -> Result<Option<Vec<String>>, GraphBackendError> {
        let backend = self.active_backend();
        match backend.shortest_path(connection_id, from_key, to_key, max_depth).await {
            Err(GraphBackendError::Unavailable(reason)) => {
                self.degrade_to_fallback(&reason);
                self.fallback.shortest_path(connection_id, from_key, to_key, max_depth).await
            }
            other => other,
        }
    }

    async fn subgraph_by_label(&self, connection_id: &str, label: NodeLabel) -> Result<Vec<GraphNode>, GraphBackendError> {
        let backend = self.active_backend();
        match backend.subgraph_by_label(connection_id, label).await {
            Err(GraphBackendError::Unavailable(reason)) => {
                self.degrade_to_fallback(&reason);
                self.fallback.subgraph_by_label(connection_id, label).await
            }
            other => other,
        }
    }
}

pub fn property_key(concept: &str, property_name: &str) -> String {
    format!("{concept}::{property_name}")
}

fn table_node(table_name: &str) -> GraphNode {
    GraphNode { label: NodeLabel::Table, key: table_name.to_string(), display_name: table_name.to_string() }
}

fn column_node(key: &str, column_name: &str) -> GraphNode {
    GraphNode { label: NodeLabel::Column, key: key.to_string(), display_name: column_name.to_string() }
}

fn concept_node(name: &str) -> GraphNode {
    GraphNode { label: NodeLabel::Concept, key: name.to_string(), display_name: name.to_string() }
}

fn property_node(key: &str, property_name: &str) -> GraphNode {
    GraphNode { label: NodeLabel::Property, key: key.to_string(), display_name: property_name.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_test_support::fixtures::{sample_ontology, sample_schema};

    #[tokio::test]
    async fn sync_is_idempotent() {
        let store = GraphStore::new();
        let schema = sample_schema();
        let ontology = sample_ontology(schema.fingerprint());

        let first = store.sync("conn", &schema, &ontology).await.unwrap();
        let second = store.sync("conn", &schema, &ontology).await.unwrap();

        assert_eq!(first.node_count, second.node_count);
        assert_eq!(first.edge_count, second.edge_count);
    }

    #[tokio::test]
    async fn insights_suggests_columns_and_related_tables() {
        let store = GraphStore::new();
        let schema = sample_schema();
        let ontology = sample_ontology(schema.fingerprint());
        store.sync("conn", &schema, &ontology).await.unwrap();

        let insights = store.insights("conn", "show me the customer name").await.unwrap();

        assert!(insights
            .suggested_columns
            .iter()
            .any(|h| h.table == "customers" && h.column == "name"));
        assert!(insights.ranked_concepts.iter().any(|c| c.concept == "customer"));
    }

    #[tokio::test]
    async fn insights_finds_join_path_between_related_tables() {
        let store = GraphStore::new();
        let schema = sample_schema();
        let mut ontology = sample_ontology(schema.fingerprint());
        ontology.properties.push(nlsql_core::Property {
            concept: "customer".to_string(),
            property_name: "ordertotal".to_string(),
            table: "orders".to_string(),
            column: "total_cents".to_string(),
            semantic_meaning: "how much an order cost".to_string(),
            confidence: 0.8,
        });
        store.sync("conn", &schema, &ontology).await.unwrap();

        let insights = store.insights("conn", "customer name and ordertotal").await.unwrap();

        assert!(insights.join_paths.iter().any(|p| p.tables.contains(&"customers".to_string())
            && p.tables.contains(&"orders".to_string())));
    }
}
