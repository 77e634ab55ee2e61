use async_trait::async_trait;
use nlsql_core::{GraphBackend, GraphBackendError, GraphEdge, GraphNode, NodeLabel};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct ConnectionGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
}

/// In-memory `GraphBackend` fake (§4.5), partitioned per `connection_id`
/// like the real external-backend adapter.
#[derive(Default)]
pub struct FakeGraphBackend {
    graphs: Mutex<HashMap<String, ConnectionGraph>>,
    unavailable: Mutex<bool>,
}

impl FakeGraphBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unavailable(self) -> Self {
        *mutex_lock(&self.unavailable) = true;
        self
    }
}

#[async_trait]
impl GraphBackend for FakeGraphBackend {
    async fn upsert_node(&self, connection_id: &str, node: &GraphNode) -> Result<(), GraphBackendError> {
        self.check_available()?;
        mutex_lock(&self.graphs).entry(connection_id.to_string()).or_default().nodes.push(node.clone());
        Ok(())
    }

    async fn upsert_edge(&self, connection_id: &str, edge: &GraphEdge) -> Result<(), GraphBackendError> {
        self.check_available()?;
        mutex_lock(&self.graphs).entry(connection_id.to_string()).or_default().edges.push(edge.clone());
        Ok(())
    }

    async fn clear_connection(&self, connection_id: &str) -> Result<(), GraphBackendError> {
        self.check_available()?;
        mutex_lock(&self.graphs).remove(connection_id);
        Ok(())
    }

    async fn shortest_path(&self, connection_id: &str, from_key: &str, to_key: &str, max_depth: usize) -> Result<Option<Vec<String>>, GraphBackendError> {
        self.check_available()?;
        let graphs = mutex_lock(&self.graphs);
        let Some(graph) = graphs.get(connection_id) else {
            return Ok(None);
        };
        Ok(bfs_shortest_path(graph, from_key, to_key, max_depth))
    }

    async fn neighbors(&self, connection_id: &str, key: &str) -> Result<Vec<String>, GraphBackendError> {
        self.check_available()?;
        let graphs = mutex_lock(&self.graphs);
        let Some(graph) = graphs.get(connection_id) else {
            return Ok(Vec::new());
        };
        Ok(graph
            .edges
            .iter()
            .filter_map(|e| {
                if e.from_key == key {
                    Some(e.to_key.clone())
                } else if e.to_key == key {
                    Some(e.from_key.clone())
                } else {
                    None
                }
            })
            .collect())
    }

    async fn subgraph_by_label(&self, connection_id: &str, label: NodeLabel) -> Result<Vec<GraphNode>, GraphBackendError> {
        self.check_available()?;
        let graphs = mutex_lock(&self.graphs);
        let Some(graph) = graphs.get(connection_id) else {
            return Ok(Vec::new());
        };
        Ok(graph.nodes.iter().filter(|n| n.label == label).cloned().collect())
    }
}

impl FakeGraphBackend {
    fn check_available(&self) -> Result<(), GraphBackendError> {
        if *mutex_lock(&self.unavailable) {
            Err(GraphBackendError::Unavailable("fake graph backend disabled for this test".to_string()))
        } else {
            Ok(())
        }
    }
}

fn bfs_shortest_path(graph: &ConnectionGraph, from: &str, to: &str, max_depth: usize) -> Option<Vec<String>> {
    use std::collections::VecDeque;

    let mut visited = std::collections::HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(vec![from.to_string()]);
    visited.insert(from.to_string());

    while let Some(path) = queue.pop_front() {
        let current = path.last().unwrap();
        if current == to {
            return Some(path);
        }
        if path.len() > max_depth {
            continue;
        }
        for edge in &graph.edges {
            let next = if edge.from_key == *current {
                Some(edge.to_key.clone())
            } else if edge.to_key == *current {
                Some(edge.from_key.clone())
            } else {
                None
            };
            if let Some(next) = next {
                if visited.insert(next.clone()) {
                    let mut extended = path.clone();
                    extended.push(next);
                    queue.push_back(extended);
                }
            }
        }
    }
    None
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}
