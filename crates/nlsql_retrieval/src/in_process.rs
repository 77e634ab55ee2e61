//! Default, dependency-free `VectorBackend` (§4.6, §6): a
//! `Vec<(String, Vec<f32>, serde_json::Value)>` per collection behind an
//! `RwLock`, scored by plain `f32` cosine-similarity arithmetic. Used when
//! no external vector store is configured; swappable for one behind the
//! same trait without touching `RetrievalStore`.

use async_trait::async_trait;
use nlsql_core::{VectorBackend, VectorError, VectorMatch, VectorMetric};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

struct StoredVector {
    id: String,
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Default)]
struct Collection {
    entries: Vec<StoredVector>,
    index: HashMap<String, usize>,
}

#[derive(Default)]
pub struct InProcessVectorBackend {
    collections: RwLock<HashMap<String, Collection>>,
}

impl InProcessVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorBackend for InProcessVectorBackend {
    async fn create_collection(&self, collection: &str, _dim: usize, _metric: VectorMetric) -> Result<(), VectorError> {
        wl(&self.collections).entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, vector: &[f32], payload: serde_json::Value) -> Result<(), VectorError> {
        let mut collections = wl(&self.collections);
        let entry = collections.entry(collection.to_string()).or_default();

        let stored = StoredVector { id: id.to_string(), vector: vector.to_vec(), payload };
        if let Some(&idx) = entry.index.get(id) {
            entry.entries[idx] = stored;
        } else {
            entry.index.insert(id.to_string(), entry.entries.len());
            entry.entries.push(stored);
        }
        Ok(())
    }

    async fn search(&self, collection: &str, vector: &[f32], k: usize, _filter: Option<serde_json::Value>) -> Result<Vec<VectorMatch>, VectorError> {
        let collections = rl(&self.collections);
        let Some(entry) = collections.get(collection) else {
            return Err(VectorError::CollectionNotFound(collection.to_string()));
        };

        let mut matches: Vec<VectorMatch> = entry
            .entries
            .iter()
            .map(|stored| VectorMatch { id: stored.id.clone(), score: cosine_similarity(vector, &stored.vector), payload: stored.payload.clone() })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), VectorError> {
        let mut collections = wl(&self.collections);
        if let Some(entry) = collections.get_mut(collection) {
            if let Some(idx) = entry.index.remove(id) {
                entry.entries.remove(idx);
                for (_, existing_idx) in entry.index.iter_mut() {
                    if *existing_idx > idx {
                        *existing_idx -= 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, VectorError> {
        Ok(rl(&self.collections).get(collection).map(|e| e.entries.len()).unwrap_or(0))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn rl<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn wl<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity_descending() {
        let backend = InProcessVectorBackend::new();
        backend.create_collection("past_queries", 2, VectorMetric::Cosine).await.unwrap();
        backend.upsert("past_queries", "a", &[1.0, 0.0], serde_json::json!({"id": "a"})).await.unwrap();
        backend.upsert("past_queries", "b", &[0.0, 1.0], serde_json::json!({"id": "b"})).await.unwrap();

        let results = backend.search("past_queries", &[0.9, 0.1], 2, None).await.unwrap();
        assert_eq!(results[0].id, "a");
    }

    #[tokio::test]
    async fn delete_removes_entry_and_keeps_index_consistent() {
        let backend = InProcessVectorBackend::new();
        backend.create_collection("c", 2, VectorMetric::Cosine).await.unwrap();
        backend.upsert("c", "a", &[1.0, 0.0], serde_json::json!({})).await.unwrap();
        backend.upsert("c", "b", &[0.0, 1.0], serde_json::json!({})).await.unwrap();
        backend.delete("c", "a").await.unwrap();

        assert_eq!(backend.count("c").await.unwrap(), 1);
        let results = backend.search("c", &[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(results[0].id, "b");
    }

    #[tokio::test]
    async fn search_on_unknown_collection_errors() {
        let backend = InProcessVectorBackend::new();
        let err = backend.search("missing", &[1.0], 1, None).await.unwrap_err();
        assert!(matches!(err, VectorError::CollectionNotFound(_)));
    }
}
