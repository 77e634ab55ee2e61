use crate::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Preserved through every transform of a `SchemaSnapshot` (§3, §4.2
/// invariant). Losing this is a bug, not a degraded-feature case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    /// Schema-qualified name, e.g. `"public.purchase_order"`.
    pub full_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub row_count: Option<u64>,
    /// At most 3 rows, kept small for LLM context.
    pub sample_rows: Vec<Vec<Value>>,
}

impl TableInfo {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        let table_name = table_name.into();
        Self {
            full_name: table_name.clone(),
            table_name,
            columns,
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            row_count: None,
            sample_rows: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewInfo {
    pub full_name: String,
    pub view_name: String,
}

/// Canonical introspected shape produced by C1 and normalized by C2 (§4.2).
///
/// `tables` is always a flat, ordered `Vec` — never a map keyed by name —
/// so consumers can iterate it directly; `table_index` gives C8's focus
/// logic an O(1) lookup without turning the list itself into a map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub database_name: String,
    pub connection_info: ConnectionInfo,
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub views: Vec<ViewInfo>,
    pub timestamp: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn new(database_name: impl Into<String>, connection_info: ConnectionInfo, tables: Vec<TableInfo>) -> Self {
        Self {
            database_name: database_name.into(),
            connection_info,
            tables,
            views: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attaches the separately-introspected view list to the snapshot.
    pub fn with_views(mut self, views: Vec<ViewInfo>) -> Self {
        self.views = views;
        self
    }

    /// Lookup index from table name to position in `tables`. Rebuilt on
    /// demand rather than stored, so `tables` stays the single source of
    /// truth and the index can never silently drift out of sync with it.
    pub fn table_index(&self) -> HashMap<&str, usize> {
        self.tables
            .iter()
            .enumerate()
            .map(|(idx, table)| (table.table_name.as_str(), idx))
            .collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.iter().find(|t| t.table_name.eq_ignore_ascii_case(name))
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.table(table)
            .is_some_and(|t| t.column(column).is_some())
    }

    /// Derive a copy restricted to the named tables, preserving
    /// `connection_info`/`database_name`/`views`/`timestamp` per the §4.2
    /// invariant. Unknown names are silently dropped.
    pub fn with_focused_tables(&self, names: &[String]) -> SchemaSnapshot {
        let wanted: Vec<String> = names.iter().map(|n| n.to_lowercase()).collect();
        let tables = self
            .tables
            .iter()
            .filter(|t| wanted.contains(&t.table_name.to_lowercase()))
            .cloned()
            .collect();

        SchemaSnapshot {
            database_name: self.database_name.clone(),
            connection_info: self.connection_info.clone(),
            tables,
            views: self.views.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Content hash of `(table_name, column_name, data_type)` tuples, used
    /// to detect schema drift for ontology cache invalidation (§3, §4.4).
    pub fn fingerprint(&self) -> String {
        let mut entries: Vec<String> = self
            .tables
            .iter()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .map(move |c| format!("{}.{}:{}", t.table_name, c.name, c.data_type))
            })
            .collect();
        entries.sort();

        let mut hasher = Sha256::new();
        for entry in &entries {
            hasher.update(entry.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> SchemaSnapshot {
        SchemaSnapshot::new(
            "app",
            ConnectionInfo {
                host: "localhost".into(),
                port: 5432,
                database: "app".into(),
            },
            vec![
                TableInfo::new(
                    "purchase_order",
                    vec![ColumnInfo {
                        name: "vendorgroup".into(),
                        data_type: "character varying".into(),
                        is_nullable: true,
                        is_primary_key: false,
                        default_value: None,
                    }],
                ),
                TableInfo::new("invoice", vec![]),
            ],
        )
    }

    #[test]
    fn focused_snapshot_preserves_connection_info() {
        let snapshot = sample_snapshot();
        let focused = snapshot.with_focused_tables(&["purchase_order".to_string()]);

        assert_eq!(focused.tables.len(), 1);
        assert_eq!(focused.connection_info.database, snapshot.connection_info.database);
        assert_eq!(focused.database_name, snapshot.database_name);
    }

    #[test]
    fn fingerprint_is_stable_and_order_independent() {
        let a = sample_snapshot();
        let mut b = sample_snapshot();
        b.tables.reverse();

        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_changes_on_column_change() {
        let a = sample_snapshot();
        let mut b = sample_snapshot();
        b.tables[0].columns[0].data_type = "integer".into();

        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
