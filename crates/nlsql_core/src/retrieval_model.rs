use crate::connection::Dialect;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One recorded historical query, embedded and indexed by C6 (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PastQuery {
    pub user_query: String,
    pub sql_query: String,
    pub dialect: Dialect,
    pub schema_name: Option<String>,
    pub success: bool,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: JsonValue,
    pub recorded_at: DateTime<Utc>,
}

impl PastQuery {
    pub fn new(
        user_query: impl Into<String>,
        sql_query: impl Into<String>,
        dialect: Dialect,
        success: bool,
    ) -> Self {
        Self {
            user_query: user_query.into(),
            sql_query: sql_query.into(),
            dialect,
            schema_name: None,
            success,
            embedding: Vec::new(),
            metadata: JsonValue::Null,
            recorded_at: Utc::now(),
        }
    }

    /// Deterministic id derived from `(user_query, sql_query, connection_id)`
    /// (§4.6), stable across re-imports so `upsert` is idempotent.
    pub fn derive_id(user_query: &str, sql_query: &str, connection_id: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(user_query.as_bytes());
        hasher.update(b"\0");
        hasher.update(sql_query.as_bytes());
        hasher.update(b"\0");
        hasher.update(connection_id.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_id_is_deterministic() {
        let a = PastQuery::derive_id("list vendors", "SELECT * FROM vendors", "app_localhost_5432");
        let b = PastQuery::derive_id("list vendors", "SELECT * FROM vendors", "app_localhost_5432");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_id_changes_with_connection() {
        let a = PastQuery::derive_id("list vendors", "SELECT * FROM vendors", "app_localhost_5432");
        let b = PastQuery::derive_id("list vendors", "SELECT * FROM vendors", "other_localhost_5432");
        assert_ne!(a, b);
    }
}
