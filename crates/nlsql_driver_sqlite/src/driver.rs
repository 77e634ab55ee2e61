use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use nlsql_core::sql_dialect::{self, DialectFeatures, DialectIdioms, LimitStyle, PlaceholderStyle, SqlDialect};
use nlsql_core::{
    ColumnInfo, ColumnMeta, ConnectionConfig, ConnectionHandle, ConnectionInfo, DbAdapter, DbError,
    Dialect, ForeignKeyRef, NoopCancelHandle, QueryCancelHandle, ResultSet, SchemaSnapshot,
    TableInfo, Value, ViewInfo,
};
use rusqlite::{Connection as RusqliteConnection, InterruptHandle, types::ValueRef};

pub struct SqliteDialectImpl {
    idioms: DialectIdioms,
}

impl SqliteDialectImpl {
    pub fn new() -> Self {
        Self {
            idioms: DialectIdioms {
                limit_style: LimitStyle::Limit,
                current_timestamp: "CURRENT_TIMESTAMP",
                concat_operator: "||",
                placeholder_style: PlaceholderStyle::QuestionMark,
                prompt_rules: "This is SQLite. Use LIMIT n for row limiting, || for string concatenation, CURRENT_TIMESTAMP for the current time.",
                features: DialectFeatures::COMMON_TABLE_EXPRESSIONS
                    | DialectFeatures::WINDOW_FUNCTIONS
                    | DialectFeatures::RETURNING_CLAUSE
                    | DialectFeatures::JSON_FUNCTIONS
                    | DialectFeatures::UPSERT,
            },
        }
    }
}

impl Default for SqliteDialectImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDialect for SqliteDialectImpl {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn qualified_table(&self, _schema: Option<&str>, table: &str) -> String {
        self.quote_identifier(table)
    }

    fn value_to_literal(&self, value: &Value) -> String {
        sql_dialect::default_value_to_literal(value, |s| self.escape_string(s))
    }

    fn escape_string(&self, s: &str) -> String {
        sql_dialect::default_escape_string(s)
    }

    fn idioms(&self) -> &DialectIdioms {
        &self.idioms
    }
}

/// Per-dialect driver satisfying `DbAdapter` (§4.1). A single
/// `SqliteDriver` instance is stateless; each `connect` call opens its own
/// `rusqlite::Connection` guarded behind a `Mutex`, since `rusqlite`'s
/// connection type is not internally synchronized.
pub struct SqliteDriver {
    dialect: SqliteDialectImpl,
    conns: Mutex<std::collections::HashMap<uuid::Uuid, Arc<OpenConnection>>>,
}

struct OpenConnection {
    conn: Mutex<RusqliteConnection>,
    cancelled: Arc<AtomicBool>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self {
            dialect: SqliteDialectImpl::new(),
            conns: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

struct SqliteCancelHandle {
    cancelled: Arc<AtomicBool>,
    interrupt_handle: InterruptHandle,
}

impl QueryCancelHandle for SqliteCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.interrupt_handle.interrupt();
        log::info!("sqlite: interrupt signal sent");
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl DbAdapter for SqliteDriver {
    fn connect(&self, config: ConnectionConfig) -> Result<ConnectionHandle, DbError> {
        if config.dialect != Dialect::Sqlite {
            return Err(DbError::connection_error("sqlite driver received a non-sqlite config"));
        }

        let path = config
            .file_path
            .clone()
            .ok_or_else(|| DbError::connection_error("sqlite connection requires a file_path"))?;

        if !config.create_if_missing && !path.exists() {
            return Err(DbError::connection_error(format!(
                "sqlite database file does not exist: {}",
                path.display()
            )));
        }

        let conn = RusqliteConnection::open(&path)
            .map_err(|e| DbError::connection_error(e.to_string()))?;

        let handle = ConnectionHandle::new(config);
        let open = Arc::new(OpenConnection {
            conn: Mutex::new(conn),
            cancelled: Arc::new(AtomicBool::new(false)),
        });

        self.conns
            .lock()
            .map_err(|_| DbError::other("sqlite connection registry poisoned"))?
            .insert(handle.id(), open);

        Ok(handle)
    }

    fn introspect(&self, handle: &ConnectionHandle) -> Result<SchemaSnapshot, DbError> {
        let open = self.open_connection(handle)?;
        let conn = open.conn.lock().map_err(|_| DbError::other("sqlite lock poisoned"))?;

        let table_names = list_names(&conn, "table")?;
        let mut tables = Vec::with_capacity(table_names.len());
        for name in &table_names {
            tables.push(table_info(&conn, name)?);
        }

        let view_names = list_names(&conn, "view")?;
        let views = view_names
            .into_iter()
            .map(|name| ViewInfo { full_name: name.clone(), view_name: name })
            .collect();

        Ok(SchemaSnapshot::new(
            handle.config().file_path.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            ConnectionInfo { host: String::new(), port: 0, database: String::new() },
            tables,
        ).with_views(views))
    }

    fn execute(
        &self,
        handle: &ConnectionHandle,
        sql: &str,
        limit: Option<u32>,
    ) -> Result<ResultSet, DbError> {
        let open = self.open_connection(handle)?;
        open.cancelled.store(false, Ordering::SeqCst);
        let conn = open.conn.lock().map_err(|_| DbError::other("sqlite lock poisoned"))?;

        let start = Instant::now();
        let effective_sql = if limit.is_some() && !sql_has_limit(sql) {
            format!("{} {}", sql.trim_end_matches(';'), self.dialect.limit_clause(limit.unwrap()))
        } else {
            sql.to_string()
        };

        let mut stmt = conn
            .prepare(&effective_sql)
            .map_err(|e| classify_sqlite_error(&e, &open.cancelled))?;

        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let columns: Vec<ColumnMeta> = column_names
            .iter()
            .map(|name| ColumnMeta { name: name.clone(), type_name: "TEXT".to_string() })
            .collect();

        let mut rows = Vec::new();
        let mut query_rows = stmt
            .query([])
            .map_err(|e| classify_sqlite_error(&e, &open.cancelled))?;

        loop {
            match query_rows.next() {
                Ok(Some(row)) => {
                    let mut values = Vec::with_capacity(column_names.len());
                    for i in 0..column_names.len() {
                        values.push(sqlite_value(row, i));
                    }
                    rows.push(values);
                }
                Ok(None) => break,
                Err(e) => return Err(classify_sqlite_error(&e, &open.cancelled)),
            }
        }

        Ok(ResultSet { columns, rows, execution_time: start.elapsed() })
    }

    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        self.conns
            .lock()
            .map_err(|_| DbError::other("sqlite connection registry poisoned"))?
            .remove(&handle.id());
        Ok(())
    }

    fn dialect_idioms(&self) -> &DialectIdioms {
        self.dialect.idioms()
    }

    fn cancel_handle(&self, handle: &ConnectionHandle) -> Arc<dyn QueryCancelHandle> {
        match self.open_connection(handle) {
            Ok(open) => match open.conn.lock() {
                Ok(conn) => Arc::new(SqliteCancelHandle {
                    cancelled: open.cancelled.clone(),
                    interrupt_handle: conn.get_interrupt_handle(),
                }),
                Err(_) => Arc::new(NoopCancelHandle),
            },
            Err(_) => Arc::new(NoopCancelHandle),
        }
    }
}

impl SqliteDriver {
    fn open_connection(&self, handle: &ConnectionHandle) -> Result<Arc<OpenConnection>, DbError> {
        self.conns
            .lock()
            .map_err(|_| DbError::other("sqlite connection registry poisoned"))?
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| DbError::connection_error("sqlite connection handle is not open"))
    }
}

fn sql_has_limit(sql: &str) -> bool {
    sql.to_ascii_uppercase().contains("LIMIT")
}

fn list_names(conn: &RusqliteConnection, kind: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = ?1 AND name NOT LIKE 'sqlite_%' ORDER BY name")
        .map_err(|e| DbError::other(e.to_string()))?;
    let names = stmt
        .query_map([kind], |row| row.get::<_, String>(0))
        .map_err(|e| DbError::other(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DbError::other(e.to_string()))?;
    Ok(names)
}

fn table_info(conn: &RusqliteConnection, table: &str) -> Result<TableInfo, DbError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info('{table}')"))
        .map_err(|e| DbError::other(e.to_string()))?;

    let mut columns = Vec::new();
    let mut primary_key = Vec::new();
    let mut rows = stmt.query([]).map_err(|e| DbError::other(e.to_string()))?;
    while let Some(row) = rows.next().map_err(|e| DbError::other(e.to_string()))? {
        let name: String = row.get(1).map_err(|e| DbError::other(e.to_string()))?;
        let data_type: String = row.get(2).map_err(|e| DbError::other(e.to_string()))?;
        let not_null: i32 = row.get(3).map_err(|e| DbError::other(e.to_string()))?;
        let default_value: Option<String> = row.get(4).map_err(|e| DbError::other(e.to_string()))?;
        let pk_index: i32 = row.get(5).map_err(|e| DbError::other(e.to_string()))?;

        if pk_index > 0 {
            primary_key.push(name.clone());
        }

        columns.push(ColumnInfo {
            name,
            data_type,
            is_nullable: not_null == 0,
            is_primary_key: pk_index > 0,
            default_value,
        });
    }
    drop(rows);

    let mut fk_stmt = conn
        .prepare(&format!("PRAGMA foreign_key_list('{table}')"))
        .map_err(|e| DbError::other(e.to_string()))?;
    let mut foreign_keys = Vec::new();
    let mut fk_rows = fk_stmt.query([]).map_err(|e| DbError::other(e.to_string()))?;
    while let Some(row) = fk_rows.next().map_err(|e| DbError::other(e.to_string()))? {
        let ref_table: String = row.get(2).map_err(|e| DbError::other(e.to_string()))?;
        let column: String = row.get(3).map_err(|e| DbError::other(e.to_string()))?;
        let ref_column: String = row.get(4).map_err(|e| DbError::other(e.to_string()))?;
        foreign_keys.push(ForeignKeyRef { column, ref_table, ref_column });
    }

    let mut info = TableInfo::new(table, columns);
    info.primary_key = primary_key;
    info.foreign_keys = foreign_keys;
    Ok(info)
}

fn sqlite_value(row: &rusqlite::Row, idx: usize) -> Value {
    match row.get_ref_unwrap(idx) {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

fn classify_sqlite_error(err: &rusqlite::Error, cancelled: &AtomicBool) -> DbError {
    if cancelled.load(Ordering::SeqCst) {
        return DbError::Cancelled;
    }
    match err {
        rusqlite::Error::SqliteFailure(e, Some(msg)) if msg.contains("no such table") => {
            DbError::object_not_found(msg.clone())
        }
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("syntax error") => {
            DbError::syntax_error(msg.clone())
        }
        other => DbError::other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn driver_with_schema() -> (SqliteDriver, ConnectionHandle, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let driver = SqliteDriver::new();
        let config = ConnectionConfig::sqlite(file.path().to_path_buf());
        let handle = driver.connect(config).unwrap();
        let open = driver.open_connection(&handle).unwrap();
        open.conn
            .lock()
            .unwrap()
            .execute_batch("CREATE TABLE purchase_order (id INTEGER PRIMARY KEY, vendorgroup TEXT);")
            .unwrap();
        (driver, handle, file)
    }

    #[test]
    fn introspect_reports_table_and_columns() {
        let (driver, handle, _file) = driver_with_schema();
        let snapshot = driver.introspect(&handle).unwrap();
        assert_eq!(snapshot.tables.len(), 1);
        assert!(snapshot.has_column("purchase_order", "vendorgroup"));
    }

    #[test]
    fn execute_applies_server_side_limit_when_sql_has_none() {
        let (driver, handle, _file) = driver_with_schema();
        let result = driver
            .execute(&handle, "SELECT * FROM purchase_order", Some(10))
            .unwrap();
        assert_eq!(result.columns.len(), 2);
    }

    #[test]
    fn unknown_table_is_object_not_found() {
        let (driver, handle, _file) = driver_with_schema();
        let err = driver.execute(&handle, "SELECT * FROM nope", None).unwrap_err();
        assert!(matches!(err, DbError::ObjectNotFoundError(_)));
    }
}
