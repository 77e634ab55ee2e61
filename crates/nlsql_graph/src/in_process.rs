//! Default, dependency-free `GraphBackend`: a `petgraph` directed graph per
//! `connection_id` (§4.5). Swapped out for an external graph database via
//! `GraphStore::set_backend`, and swapped back into as a fallback when the
//! external backend reports itself unavailable.

use async_trait::async_trait;
use nlsql_core::{GraphBackend, GraphBackendError, GraphEdge, GraphNode, NodeLabel};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

#[derive(Default)]
struct ConnectionGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

#[derive(Default)]
pub struct InProcessGraphBackend {
    graphs: RwLock<HashMap<String, ConnectionGraph>>,
}

impl InProcessGraphBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphBackend for InProcessGraphBackend {
    async fn upsert_node(&self, connection_id: &str, node: &GraphNode) -> Result<(), GraphBackendError> {
        let mut graphs = self.graphs.write().expect("graph lock poisoned");
        let connection = graphs.entry(connection_id.to_string()).or_default();

        if let Some(&idx) = connection.index.get(&node.key) {
            connection.graph[idx] = node.clone();
        } else {
            let idx = connection.graph.add_node(node.clone());
            connection.index.insert(node.key.clone(), idx);
        }
        Ok(())
    }

    async fn upsert_edge(&self, connection_id: &str, edge: &GraphEdge) -> Result<(), GraphBackendError> {
        let mut graphs = self.graphs.write().expect("graph lock poisoned");
        let connection = graphs.entry(connection_id.to_string()).or_default();

        let from = *connection.index.get(&edge.from_key).ok_or_else(|| {
            GraphBackendError::Other(format!("upsert_edge: unknown node {}", edge.from_key))
        })?;
        let to = *connection.index.get(&edge.to_key).ok_or_else(|| {
            GraphBackendError::Other(format!("upsert_edge: unknown node {}", edge.to_key))
        })?;
        connection.graph.add_edge(from, to, edge.clone());
        Ok(())
    }

    async fn clear_connection(&self, connection_id: &str) -> Result<(), GraphBackendError> {
        self.graphs.write().expect("graph lock poisoned").remove(connection_id);
        Ok(())
    }

    async fn shortest_path(
        &self,
        connection_id: &str,
        from_key: &str,
        to_key: &str,
        max_depth: usize,
    ) -> Result<Option<Vec<String>>, GraphBackendError> {
        let graphs = self.graphs.read().expect("graph lock poisoned");
        let Some(connection) = graphs.get(connection_id) else {
            return Ok(None);
        };
        Ok(bfs_shortest_path(connection, from_key, to_key, max_depth))
    }

    async fn neighbors(&self, connection_id: &str, key: &str) -> Result<Vec<String>, GraphBackendError> {
        let graphs = self.graphs.read().expect("graph lock poisoned");
        let Some(connection) = graphs.get(connection_id) else {
            return Ok(Vec::new());
        };
        let Some(&idx) = connection.index.get(key) else {
            return Ok(Vec::new());
        };
        Ok(undirected_neighbor_keys(connection, idx))
    }

    async fn subgraph_by_label(&self, connection_id: &str, label: NodeLabel) -> Result<Vec<GraphNode>, GraphBackendError> {
        let graphs = self.graphs.read().expect("graph lock poisoned");
        let Some(connection) = graphs.get(connection_id) else {
            return Ok(Vec::new());
        };
        Ok(connection
            .graph
            .node_weights()
            .filter(|n| n.label == label)
            .cloned()
            .collect())
    }
}

fn undirected_neighbor_keys(connection: &ConnectionGraph, idx: NodeIndex) -> Vec<String> {
    let mut keys: Vec<String> = connection
        .graph
        .neighbors_undirected(idx)
        .map(|n| connection.graph[n].key.clone())
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// BFS over undirected adjacency, capped at `max_depth` hops. Labels are not
/// considered here; see `nlsql_graph::store` for why that's safe at the
/// default `max_depth` of 2.
fn bfs_shortest_path(connection: &ConnectionGraph, from: &str, to: &str, max_depth: usize) -> Option<Vec<String>> {
    let start = *connection.index.get(from)?;
    let goal = *connection.index.get(to)?;

    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(vec![start]);
    visited.insert(start);

    while let Some(path) = queue.pop_front() {
        let current = *path.last().unwrap();
        if current == goal {
            return Some(path.into_iter().map(|idx| connection.graph[idx].key.clone()).collect());
        }
        if path.len() > max_depth {
            continue;
        }
        for next in connection.graph.neighbors_undirected(current) {
            if visited.insert(next) {
                let mut extended = path.clone();
                extended.push(next);
                queue.push_back(extended);
            }
        }
    }
    None
}
