use async_trait::async_trait;
use nlsql_core::{VectorBackend, VectorError, VectorMatch, VectorMetric};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Clone)]
struct StoredVector {
    vector: Vec<f32>,
    payload: serde_json::Value,
}

/// In-memory `VectorBackend` fake (§4.6), scoring by cosine similarity like
/// the real in-process default so ranking tests exercise realistic behavior.
#[derive(Default)]
pub struct FakeVectorBackend {
    collections: Mutex<HashMap<String, HashMap<String, StoredVector>>>,
    unavailable: Mutex<bool>,
}

impl FakeVectorBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unavailable(self) -> Self {
        *mutex_lock(&self.unavailable) = true;
        self
    }
}

#[async_trait]
impl VectorBackend for FakeVectorBackend {
    async fn create_collection(&self, collection: &str, _dim: usize, _metric: VectorMetric) -> Result<(), VectorError> {
        self.check_available()?;
        mutex_lock(&self.collections).entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, id: &str, vector: &[f32], payload: serde_json::Value) -> Result<(), VectorError> {
        self.check_available()?;
        mutex_lock(&self.collections)
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), StoredVector { vector: vector.to_vec(), payload });
        Ok(())
    }

    async fn search(&self, collection: &str, vector: &[f32], k: usize, _filter: Option<serde_json::Value>) -> Result<Vec<VectorMatch>, VectorError> {
        self.check_available()?;
        let collections = mutex_lock(&self.collections);
        let Some(entries) = collections.get(collection) else {
            return Err(VectorError::CollectionNotFound(collection.to_string()));
        };

        let mut matches: Vec<VectorMatch> = entries
            .iter()
            .map(|(id, stored)| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &stored.vector),
                payload: stored.payload.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), VectorError> {
        self.check_available()?;
        if let Some(entries) = mutex_lock(&self.collections).get_mut(collection) {
            entries.remove(id);
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<usize, VectorError> {
        self.check_available()?;
        Ok(mutex_lock(&self.collections).get(collection).map(|e| e.len()).unwrap_or(0))
    }
}

impl FakeVectorBackend {
    fn check_available(&self) -> Result<(), VectorError> {
        if *mutex_lock(&self.unavailable) {
            Err(VectorError::Unavailable("fake vector backend disabled for this test".to_string()))
        } else {
            Ok(())
        }
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

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}
