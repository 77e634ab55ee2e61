//! A per-`connection_id` `SchemaSnapshot` cache with a TTL, the same
//! read-write-lock-over-a-map shape the ontology cache uses (§5: "schema
//! snapshot cache: same pattern").

use nlsql_core::SchemaSnapshot;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

pub const DEFAULT_SCHEMA_TTL: Duration = Duration::from_secs(300);

struct Cached {
    snapshot: SchemaSnapshot,
    fetched_at: Instant,
}

pub struct SchemaCache {
    entries: RwLock<HashMap<String, Cached>>,
    ttl: Duration,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl }
    }

    /// Returns the cached snapshot for `connection_id` if present and not
    /// past its TTL.
    pub fn get_fresh(&self, connection_id: &str) -> Option<SchemaSnapshot> {
        let entries = rl(&self.entries);
        entries.get(connection_id).and_then(|cached| {
            if cached.fetched_at.elapsed() < self.ttl {
                Some(cached.snapshot.clone())
            } else {
                None
            }
        })
    }

    pub fn put(&self, connection_id: &str, snapshot: SchemaSnapshot) {
        wl(&self.entries).insert(connection_id.to_string(), Cached { snapshot, fetched_at: Instant::now() });
    }

    /// Called on disconnect so a stale snapshot never outlives its
    /// connection (§5).
    pub fn invalidate(&self, connection_id: &str) {
        wl(&self.entries).remove(connection_id);
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
    use nlsql_test_support::fixtures::sample_schema;

    #[test]
    fn miss_then_hit_then_invalidate() {
        let cache = SchemaCache::new(Duration::from_secs(60));
        assert!(cache.get_fresh("app_localhost_5432").is_none());

        cache.put("app_localhost_5432", sample_schema());
        assert!(cache.get_fresh("app_localhost_5432").is_some());

        cache.invalidate("app_localhost_5432");
        assert!(cache.get_fresh("app_localhost_5432").is_none());
    }

    #[test]
    fn entries_expire_past_their_ttl() {
        let cache = SchemaCache::new(Duration::from_millis(1));
        cache.put("app_localhost_5432", sample_schema());
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get_fresh("app_localhost_5432").is_none());
    }
}
