//! Example custom `DbAdapter` for nlsql.
//!
//! Shows the minimum needed to plug a new dialect into the orchestrator
//! without touching `nlsql_core` or `nlsql_orchestrator`: one struct
//! implementing `DbAdapter`, storing a handful of in-memory tables keyed by
//! `ConnectionHandle::id()`. Run it with `cargo run` from this directory; it
//! connects, introspects, runs one canned SELECT through the orchestrator
//! against a scripted LLM response, and prints the result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nlsql_core::{
    ColumnInfo, ColumnMeta, ConnectionConfig, ConnectionHandle, ConnectionInfo, DbAdapter, DbError,
    DialectIdioms, LimitStyle, PlaceholderStyle, ResultSet, SchemaSnapshot, TableInfo, Value,
};
use nlsql_orchestrator::{Orchestrator, RunOptions};
use nlsql_test_support::FakeLlmProvider;
use uuid::Uuid;

/// A table held entirely in memory: rows are just `Vec<Value>` aligned with
/// `columns`, no SQL execution engine behind it.
struct MemTable {
    columns: Vec<ColumnInfo>,
    rows: Vec<Vec<Value>>,
}

/// Per-connection in-memory database. `connect` creates a fresh copy seeded
/// with one `widgets` table; `execute` only understands `SELECT * FROM
/// <table>` well enough to demonstrate the adapter contract, not full SQL.
struct MemDatabase {
    tables: HashMap<String, MemTable>,
}

impl MemDatabase {
    fn seeded() -> Self {
        let mut tables = HashMap::new();
        tables.insert(
            "widgets".to_string(),
            MemTable {
                columns: vec![
                    ColumnInfo { name: "id".into(), data_type: "integer".into(), is_nullable: false, is_primary_key: true, default_value: None },
                    ColumnInfo { name: "name".into(), data_type: "text".into(), is_nullable: false, is_primary_key: false, default_value: None },
                ],
                rows: vec![
                    vec![Value::Int(1), Value::Text("sprocket".into())],
                    vec![Value::Int(2), Value::Text("gizmo".into())],
                ],
            },
        );
        Self { tables }
    }
}

/// Implements `DbAdapter` (§4.1) for the toy in-memory dialect. One
/// instance serves every connection, the way `SqliteDriver` and
/// `PostgresDriver` do: state lives behind a `Mutex<HashMap<Uuid, _>>`
/// keyed by the handle's id, not on the adapter struct itself.
pub struct MemDriver {
    idioms: DialectIdioms,
    connections: Mutex<HashMap<Uuid, MemDatabase>>,
}

impl MemDriver {
    pub fn new() -> Self {
        Self {
            idioms: DialectIdioms {
                limit_style: LimitStyle::Limit,
                current_timestamp: "NOW()",
                concat_operator: "||",
                placeholder_style: PlaceholderStyle::QuestionMark,
                prompt_rules: "This is an in-memory toy dialect. Use LIMIT n for row limiting.",
                features: nlsql_core::DialectFeatures::empty(),
            },
            connections: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbAdapter for MemDriver {
    fn connect(&self, config: ConnectionConfig) -> Result<ConnectionHandle, DbError> {
        let handle = ConnectionHandle::new(config);
        self.connections.lock().expect("mem driver lock poisoned").insert(handle.id(), MemDatabase::seeded());
        Ok(handle)
    }

    fn introspect(&self, handle: &ConnectionHandle) -> Result<SchemaSnapshot, DbError> {
        let connections = self.connections.lock().expect("mem driver lock poisoned");
        let db = connections.get(&handle.id()).ok_or_else(|| DbError::connection_error("unknown connection"))?;

        let tables = db
            .tables
            .iter()
            .map(|(name, table)| {
                let mut info = TableInfo::new(name, table.columns.clone());
                info.row_count = Some(table.rows.len() as u64);
                info
            })
            .collect();

        let connection_info = ConnectionInfo {
            host: handle.config().host.clone(),
            port: handle.config().port,
            database: handle.config().database.clone(),
        };
        Ok(SchemaSnapshot::new(handle.config().database.clone(), connection_info, tables))
    }

    fn execute(&self, handle: &ConnectionHandle, sql: &str, limit: Option<u32>) -> Result<ResultSet, DbError> {
        let connections = self.connections.lock().expect("mem driver lock poisoned");
        let db = connections.get(&handle.id()).ok_or_else(|| DbError::connection_error("unknown connection"))?;

        let table_name = sql
            .to_uppercase()
            .split("FROM")
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .map(|name| name.to_lowercase())
            .ok_or_else(|| DbError::syntax_error(format!("could not find a table name in: {sql}")))?;

        let table = db.tables.get(&table_name).ok_or_else(|| DbError::object_not_found(format!("no such table: {table_name}")))?;

        let mut rows = table.rows.clone();
        if let Some(limit) = limit {
            rows.truncate(limit as usize);
        }

        Ok(ResultSet {
            columns: table.columns.iter().map(|c| ColumnMeta { name: c.name.clone(), type_name: c.data_type.clone() }).collect(),
            rows,
            execution_time: std::time::Duration::from_micros(50),
        })
    }

    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        self.connections.lock().expect("mem driver lock poisoned").remove(&handle.id());
        Ok(())
    }

    fn dialect_idioms(&self) -> &DialectIdioms {
        &self.idioms
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let adapter = Arc::new(MemDriver::new());
    let config = ConnectionConfig::postgres("localhost", 0, "demo", "demo");
    let handle = adapter.connect(config).expect("connect");

    let llm = Arc::new(FakeLlmProvider::new().with_response(r#"{"sql": "SELECT * FROM widgets", "explanation": "lists every widget"}"#));

    let orchestrator = Orchestrator::new(adapter.clone(), llm, nlsql_core::NlsqlConfig::default(), None);
    let outcome = orchestrator.run(handle.clone(), "list all widgets", RunOptions::default()).await.expect("query should succeed");

    println!("-- {}", outcome.explanation);
    println!("{}", outcome.sql);
    for row in &outcome.result.rows {
        let cells: Vec<String> = row.iter().map(|v| v.as_display_string()).collect();
        println!("{}", cells.join(" | "));
    }

    adapter.disconnect(&handle).expect("disconnect");
}
