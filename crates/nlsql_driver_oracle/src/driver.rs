use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use nlsql_core::sql_dialect::{self, DialectFeatures, DialectIdioms, LimitStyle, PlaceholderStyle, SqlDialect};
use nlsql_core::{
    ColumnInfo, ColumnMeta, ConnectionConfig, ConnectionHandle, ConnectionInfo, DbAdapter, DbError,
    Dialect, ForeignKeyRef, NoopCancelHandle, QueryCancelHandle, ResultSet, SchemaSnapshot,
    TableInfo, Value, ViewInfo,
};
use oracle::sql_type::OracleType;
use oracle::{Connection, Row};
use uuid::Uuid;

pub struct OracleDialectImpl {
    idioms: DialectIdioms,
}

impl OracleDialectImpl {
    pub fn new() -> Self {
        Self {
            idioms: DialectIdioms {
                limit_style: LimitStyle::FetchFirst,
                current_timestamp: "SYSDATE",
                concat_operator: "||",
                placeholder_style: PlaceholderStyle::ColonNumber,
                prompt_rules: "This is Oracle. Use FETCH FIRST n ROWS ONLY or ROWNUM for row limiting, || for string concatenation, SYSDATE for the current time, SELECT ... FROM DUAL for expression-only queries, double-quoted identifiers.",
                features: DialectFeatures::COMMON_TABLE_EXPRESSIONS
                    | DialectFeatures::WINDOW_FUNCTIONS
                    | DialectFeatures::RETURNING_CLAUSE
                    | DialectFeatures::JSON_FUNCTIONS,
            },
        }
    }
}

impl Default for OracleDialectImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDialect for OracleDialectImpl {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(schema) => format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(table)),
            None => self.quote_identifier(table),
        }
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

struct OpenConnection {
    conn: Mutex<Connection>,
    schema: String,
    cancelled: Arc<AtomicBool>,
}

/// Oracle `DbAdapter` (§4.1), built on the synchronous `oracle` crate (OCI bindings).
///
/// The registry and cancellation shape mirror the other three drivers in
/// this workspace.
pub struct OracleDriver {
    dialect: OracleDialectImpl,
    conns: Mutex<HashMap<Uuid, Arc<OpenConnection>>>,
}

impl OracleDriver {
    pub fn new() -> Self {
        Self {
            dialect: OracleDialectImpl::new(),
            conns: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for OracleDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbAdapter for OracleDriver {
    fn connect(&self, config: ConnectionConfig) -> Result<ConnectionHandle, DbError> {
        if config.dialect != Dialect::Oracle {
            return Err(DbError::connection_error("oracle driver received a non-oracle config"));
        }

        let service = config
            .service_name
            .clone()
            .or_else(|| config.sid.clone())
            .unwrap_or_else(|| config.database.clone());
        let connect_string = format!("{}:{}/{}", config.host, config.port, service);
        let conn = Connection::connect(&config.user, "", &connect_string)
            .map_err(|e| classify_oracle_error(&e))?;

        let handle = ConnectionHandle::new(config.clone());
        let open = Arc::new(OpenConnection {
            conn: Mutex::new(conn),
            schema: config.user.to_ascii_uppercase(),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        self.conns
            .lock()
            .map_err(|_| DbError::other("oracle connection registry poisoned"))?
            .insert(handle.id(), open);

        Ok(handle)
    }

    fn introspect(&self, handle: &ConnectionHandle) -> Result<SchemaSnapshot, DbError> {
        let open = self.open_connection(handle)?;
        let conn = open.conn.lock().map_err(|_| DbError::other("oracle lock poisoned"))?;

        let columns_by_table = columns_for_schema(&conn, &open.schema)?;
        let fks_by_table = foreign_keys_for_schema(&conn, &open.schema)?;

        let mut table_names = Vec::new();
        let rows = conn
            .query("SELECT table_name FROM all_tables WHERE owner = :1 ORDER BY table_name", &[&open.schema])
            .map_err(|e| classify_oracle_error(&e))?;
        for row in rows {
            let row = row.map_err(|e| classify_oracle_error(&e))?;
            table_names.push(row.get::<_, String>(0).map_err(|e| classify_oracle_error(&e))?);
        }

        let tables: Vec<TableInfo> = table_names
            .into_iter()
            .map(|name| {
                let columns = columns_by_table.get(&name).cloned().unwrap_or_default();
                let primary_key = columns.iter().filter(|c| c.is_primary_key).map(|c| c.name.clone()).collect();
                let mut info = TableInfo::new(&name, columns);
                info.primary_key = primary_key;
                info.foreign_keys = fks_by_table.get(&name).cloned().unwrap_or_default();
                info
            })
            .collect();

        let mut views = Vec::new();
        let view_rows = conn
            .query("SELECT view_name FROM all_views WHERE owner = :1 ORDER BY view_name", &[&open.schema])
            .map_err(|e| classify_oracle_error(&e))?;
        for row in view_rows {
            let row = row.map_err(|e| classify_oracle_error(&e))?;
            let name: String = row.get(0).map_err(|e| classify_oracle_error(&e))?;
            views.push(ViewInfo { full_name: name.clone(), view_name: name });
        }

        Ok(SchemaSnapshot::new(
            open.schema.clone(),
            ConnectionInfo { host: handle.config().host.clone(), port: handle.config().port, database: handle.config().database.clone() },
            tables,
        )
        .with_views(views))
    }

    fn execute(
        &self,
        handle: &ConnectionHandle,
        sql: &str,
        limit: Option<u32>,
    ) -> Result<ResultSet, DbError> {
        let open = self.open_connection(handle)?;
        let conn = open.conn.lock().map_err(|_| DbError::other("oracle lock poisoned"))?;

        let start = Instant::now();
        let effective_sql = if limit.is_some() && !sql_has_row_limit(sql) {
            format!("{} {}", sql.trim_end_matches(';'), self.dialect.limit_clause(limit.unwrap()))
        } else {
            sql.to_string()
        };

        let rows = conn.query(&effective_sql, &[]).map_err(|e| classify_oracle_error(&e))?;

        let columns: Vec<ColumnMeta> = rows
            .column_info()
            .iter()
            .map(|c| ColumnMeta { name: c.name().to_string(), type_name: format!("{:?}", c.oracle_type()) })
            .collect();

        let mut result_rows = Vec::new();
        for row in rows {
            let row = row.map_err(|e| classify_oracle_error(&e))?;
            let values = (0..columns.len())
                .map(|i| oracle_value(&row, i))
                .collect();
            result_rows.push(values);
        }

        Ok(ResultSet { columns, rows: result_rows, execution_time: start.elapsed() })
    }

    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        self.conns
            .lock()
            .map_err(|_| DbError::other("oracle connection registry poisoned"))?
            .remove(&handle.id());
        Ok(())
    }

    fn dialect_idioms(&self) -> &DialectIdioms {
        self.dialect.idioms()
    }

    fn cancel_handle(&self, _handle: &ConnectionHandle) -> Arc<dyn QueryCancelHandle> {
        // The `oracle` crate requires the originating thread's session handle
        // to break a running call; there is no safe cross-thread handle to
        // expose here, so cancellation is best-effort no-op.
        Arc::new(NoopCancelHandle)
    }
}

impl OracleDriver {
    fn open_connection(&self, handle: &ConnectionHandle) -> Result<Arc<OpenConnection>, DbError> {
        self.conns
            .lock()
            .map_err(|_| DbError::other("oracle connection registry poisoned"))?
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| DbError::connection_error("oracle connection handle is not open"))
    }
}

fn sql_has_row_limit(sql: &str) -> bool {
    let upper = sql.to_ascii_uppercase();
    upper.contains("FETCH FIRST") || upper.contains("ROWNUM")
}

fn columns_for_schema(conn: &Connection, schema: &str) -> Result<HashMap<String, Vec<ColumnInfo>>, DbError> {
    let rows = conn
        .query(
            "SELECT table_name, column_name, data_type, nullable, data_default \
             FROM all_tab_columns WHERE owner = :1 ORDER BY table_name, column_id",
            &[&schema],
        )
        .map_err(|e| classify_oracle_error(&e))?;

    let pk_columns = primary_key_columns(conn, schema)?;

    let mut result: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
    for row in rows {
        let row = row.map_err(|e| classify_oracle_error(&e))?;
        let table_name: String = row.get(0).map_err(|e| classify_oracle_error(&e))?;
        let column_name: String = row.get(1).map_err(|e| classify_oracle_error(&e))?;
        let data_type: String = row.get(2).map_err(|e| classify_oracle_error(&e))?;
        let nullable: String = row.get(3).map_err(|e| classify_oracle_error(&e))?;
        let default_value: Option<String> = row.get(4).map_err(|e| classify_oracle_error(&e))?;

        let is_primary_key = pk_columns
            .get(&table_name)
            .map(|cols| cols.contains(&column_name))
            .unwrap_or(false);

        result.entry(table_name).or_default().push(ColumnInfo {
            name: column_name,
            data_type,
            is_nullable: nullable == "Y",
            is_primary_key,
            default_value,
        });
    }
    Ok(result)
}

fn primary_key_columns(conn: &Connection, schema: &str) -> Result<HashMap<String, Vec<String>>, DbError> {
    let rows = conn
        .query(
            "SELECT cols.table_name, cols.column_name \
             FROM all_constraints cons \
             JOIN all_cons_columns cols ON cons.constraint_name = cols.constraint_name AND cons.owner = cols.owner \
             WHERE cons.constraint_type = 'P' AND cons.owner = :1",
            &[&schema],
        )
        .map_err(|e| classify_oracle_error(&e))?;

    let mut result: HashMap<String, Vec<String>> = HashMap::new();
    for row in rows {
        let row = row.map_err(|e| classify_oracle_error(&e))?;
        let table_name: String = row.get(0).map_err(|e| classify_oracle_error(&e))?;
        let column_name: String = row.get(1).map_err(|e| classify_oracle_error(&e))?;
        result.entry(table_name).or_default().push(column_name);
    }
    Ok(result)
}

fn foreign_keys_for_schema(conn: &Connection, schema: &str) -> Result<HashMap<String, Vec<ForeignKeyRef>>, DbError> {
    let rows = conn
        .query(
            "SELECT a.table_name, a.column_name, c_pk.table_name AS ref_table, b.column_name AS ref_column \
             FROM all_cons_columns a \
             JOIN all_constraints c ON a.owner = c.owner AND a.constraint_name = c.constraint_name \
             JOIN all_constraints c_pk ON c.r_owner = c_pk.owner AND c.r_constraint_name = c_pk.constraint_name \
             JOIN all_cons_columns b ON c_pk.owner = b.owner AND c_pk.constraint_name = b.constraint_name AND a.position = b.position \
             WHERE c.constraint_type = 'R' AND a.owner = :1",
            &[&schema],
        )
        .map_err(|e| classify_oracle_error(&e))?;

    let mut result: HashMap<String, Vec<ForeignKeyRef>> = HashMap::new();
    for row in rows {
        let row = row.map_err(|e| classify_oracle_error(&e))?;
        let table_name: String = row.get(0).map_err(|e| classify_oracle_error(&e))?;
        let column: String = row.get(1).map_err(|e| classify_oracle_error(&e))?;
        let ref_table: String = row.get(2).map_err(|e| classify_oracle_error(&e))?;
        let ref_column: String = row.get(3).map_err(|e| classify_oracle_error(&e))?;
        result.entry(table_name).or_default().push(ForeignKeyRef { column, ref_table, ref_column });
    }
    Ok(result)
}

fn oracle_value(row: &Row, idx: usize) -> Value {
    let column = &row.column_info()[idx];
    match column.oracle_type() {
        OracleType::Number(_, _) | OracleType::Float(_) | OracleType::BinaryFloat | OracleType::BinaryDouble => {
            match row.get::<_, Option<f64>>(idx) {
                Ok(Some(f)) => Value::Float(f),
                _ => Value::Null,
            }
        }
        OracleType::Date | OracleType::Timestamp(_) | OracleType::TimestampTZ(_) | OracleType::TimestampLTZ(_) => {
            match row.get::<_, Option<DateTime<Utc>>>(idx) {
                Ok(Some(dt)) => Value::DateTime(dt),
                _ => Value::Null,
            }
        }
        _ => match row.get::<_, Option<String>>(idx) {
            Ok(Some(s)) => Value::Text(s),
            _ => Value::Null,
        },
    }
}

fn classify_oracle_error(err: &oracle::Error) -> DbError {
    let message = err.to_string();
    if message.contains("ORA-00942") {
        DbError::object_not_found(message)
    } else if message.contains("ORA-01017") || message.contains("ORA-01031") {
        DbError::auth_error(message)
    } else if message.contains("ORA-00904") {
        DbError::object_not_found(message)
    } else if message.contains("ORA-00933") || message.contains("ORA-00936") {
        DbError::syntax_error(message)
    } else if message.contains("ORA-01722") {
        DbError::type_mismatch(message)
    } else if message.contains("ORA-01013") {
        DbError::Cancelled
    } else {
        DbError::other(message)
    }
}
