use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use nlsql_core::sql_dialect::{self, DialectFeatures, DialectIdioms, LimitStyle, PlaceholderStyle, SqlDialect};
use nlsql_core::{
    ColumnInfo, ColumnMeta, ConnectionConfig, ConnectionHandle, ConnectionInfo, DbAdapter, DbError,
    Dialect, ForeignKeyRef, NoopCancelHandle, QueryCancelHandle, ResultSet, SchemaSnapshot,
    TableInfo, Value, ViewInfo,
};
use native_tls::TlsConnector;
use postgres::{CancelToken as PgCancelToken, Client, NoTls};
use postgres_native_tls::MakeTlsConnector;
use uuid::Uuid;

pub struct PostgresDialectImpl {
    idioms: DialectIdioms,
}

impl PostgresDialectImpl {
    pub fn new() -> Self {
        Self {
            idioms: DialectIdioms {
                limit_style: LimitStyle::Limit,
                current_timestamp: "NOW()",
                concat_operator: "||",
                placeholder_style: PlaceholderStyle::DollarNumber,
                prompt_rules: "This is PostgreSQL. Use LIMIT n for row limiting, || for string concatenation, NOW() for the current time, double-quoted identifiers for case-sensitive names.",
                features: DialectFeatures::COMMON_TABLE_EXPRESSIONS
                    | DialectFeatures::WINDOW_FUNCTIONS
                    | DialectFeatures::RETURNING_CLAUSE
                    | DialectFeatures::JSON_FUNCTIONS
                    | DialectFeatures::UPSERT,
            },
        }
    }
}

impl Default for PostgresDialectImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDialect for PostgresDialectImpl {
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

    fn cast_syntax(&self, column: &str, target_type: &str) -> String {
        format!("{column}::{target_type}")
    }
}

struct OpenConnection {
    client: Mutex<Client>,
    cancelled: Arc<AtomicBool>,
}

/// PostgreSQL `DbAdapter` (§4.1). Uses the synchronous `postgres::Client`
/// over an optional TLS connector, falling back to a plaintext connection
/// when TLS negotiation fails.
pub struct PostgresDriver {
    dialect: PostgresDialectImpl,
    conns: Mutex<HashMap<Uuid, Arc<OpenConnection>>>,
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self {
            dialect: PostgresDialectImpl::new(),
            conns: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

struct PostgresCancelHandle {
    cancel_token: PgCancelToken,
    cancelled: Arc<AtomicBool>,
}

impl QueryCancelHandle for PostgresCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel_token
            .cancel_query(NoTls)
            .map_err(|e| DbError::other(e.to_string()))
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl DbAdapter for PostgresDriver {
    fn connect(&self, config: ConnectionConfig) -> Result<ConnectionHandle, DbError> {
        if config.dialect != Dialect::Postgres {
            return Err(DbError::connection_error("postgres driver received a non-postgres config"));
        }

        // Password is supplied out-of-band via the connection string's
        // environment (PGPASSWORD) or a .pgpass file, matching the
        // teacher's separation of credentials from the profile.
        let conn_string = format!(
            "host={} port={} dbname={} user={}",
            config.host, config.port, config.database, config.user
        );

        let client = match TlsConnector::new() {
            Ok(connector) => {
                let tls = MakeTlsConnector::new(connector);
                match Client::connect(&conn_string, tls) {
                    Ok(client) => client,
                    Err(_) => Client::connect(&conn_string, NoTls)
                        .map_err(|e| DbError::connection_error(e.to_string()))?,
                }
            }
            Err(_) => Client::connect(&conn_string, NoTls)
                .map_err(|e| DbError::connection_error(e.to_string()))?,
        };

        let handle = ConnectionHandle::new(config);
        let open = Arc::new(OpenConnection {
            client: Mutex::new(client),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        self.conns
            .lock()
            .map_err(|_| DbError::other("postgres connection registry poisoned"))?
            .insert(handle.id(), open);

        Ok(handle)
    }

    fn introspect(&self, handle: &ConnectionHandle) -> Result<SchemaSnapshot, DbError> {
        let open = self.open_connection(handle)?;
        let mut client = open.client.lock().map_err(|_| DbError::other("postgres lock poisoned"))?;

        let columns_by_table = columns_for_schema(&mut client, "public")?;
        let fks_by_table = foreign_keys_for_schema(&mut client, "public")?;

        let table_rows = client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_type = 'BASE TABLE' AND table_schema = $1 ORDER BY table_name",
                &[&"public"],
            )
            .map_err(|e| DbError::other(e.to_string()))?;

        let tables: Vec<TableInfo> = table_rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                let columns = columns_by_table.get(&name).cloned().unwrap_or_default();
                let primary_key = columns
                    .iter()
                    .filter(|c| c.is_primary_key)
                    .map(|c| c.name.clone())
                    .collect();
                let mut info = TableInfo::new(&name, columns);
                info.primary_key = primary_key;
                info.foreign_keys = fks_by_table.get(&name).cloned().unwrap_or_default();
                info
            })
            .collect();

        let view_rows = client
            .query(
                "SELECT table_name FROM information_schema.views WHERE table_schema = $1 ORDER BY table_name",
                &[&"public"],
            )
            .map_err(|e| DbError::other(e.to_string()))?;
        let views = view_rows
            .iter()
            .map(|row| {
                let name: String = row.get(0);
                ViewInfo { full_name: name.clone(), view_name: name }
            })
            .collect();

        Ok(SchemaSnapshot::new(
            handle.config().database.clone(),
            ConnectionInfo {
                host: handle.config().host.clone(),
                port: handle.config().port,
                database: handle.config().database.clone(),
            },
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
        open.cancelled.store(false, Ordering::SeqCst);
        let mut client = open.client.lock().map_err(|_| DbError::other("postgres lock poisoned"))?;

        let start = Instant::now();
        let effective_sql = if limit.is_some() && !sql_has_limit(sql) {
            format!("{} {}", sql.trim_end_matches(';'), self.dialect.limit_clause(limit.unwrap()))
        } else {
            sql.to_string()
        };

        let rows = client.query(&effective_sql, &[]).map_err(|e| classify_postgres_error(&e))?;

        if rows.is_empty() {
            return Ok(ResultSet { columns: Vec::new(), rows: Vec::new(), execution_time: start.elapsed() });
        }

        let columns: Vec<ColumnMeta> = rows[0]
            .columns()
            .iter()
            .map(|col| ColumnMeta { name: col.name().to_string(), type_name: col.type_().name().to_string() })
            .collect();

        let result_rows = rows
            .iter()
            .map(|row| (0..columns.len()).map(|i| postgres_value(row, i)).collect())
            .collect();

        Ok(ResultSet { columns, rows: result_rows, execution_time: start.elapsed() })
    }

    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        self.conns
            .lock()
            .map_err(|_| DbError::other("postgres connection registry poisoned"))?
            .remove(&handle.id());
        Ok(())
    }

    fn dialect_idioms(&self) -> &DialectIdioms {
        self.dialect.idioms()
    }

    fn cancel_handle(&self, handle: &ConnectionHandle) -> Arc<dyn QueryCancelHandle> {
        match self.open_connection(handle) {
            Ok(open) => match open.client.lock() {
                Ok(client) => Arc::new(PostgresCancelHandle {
                    cancel_token: client.cancel_token(),
                    cancelled: open.cancelled.clone(),
                }),
                Err(_) => Arc::new(NoopCancelHandle),
            },
            Err(_) => Arc::new(NoopCancelHandle),
        }
    }
}

impl PostgresDriver {
    fn open_connection(&self, handle: &ConnectionHandle) -> Result<Arc<OpenConnection>, DbError> {
        self.conns
            .lock()
            .map_err(|_| DbError::other("postgres connection registry poisoned"))?
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| DbError::connection_error("postgres connection handle is not open"))
    }
}

fn sql_has_limit(sql: &str) -> bool {
    sql.to_ascii_uppercase().contains("LIMIT")
}

fn columns_for_schema(client: &mut Client, schema: &str) -> Result<HashMap<String, Vec<ColumnInfo>>, DbError> {
    let rows = client
        .query(
            r#"
            SELECT
                c.table_name,
                c.column_name,
                c.data_type,
                c.is_nullable = 'YES' as nullable,
                c.column_default,
                COALESCE(
                    (SELECT true FROM information_schema.table_constraints tc
                     JOIN information_schema.key_column_usage kcu
                       ON tc.constraint_name = kcu.constraint_name
                      AND tc.table_schema = kcu.table_schema
                     WHERE tc.constraint_type = 'PRIMARY KEY'
                       AND tc.table_schema = c.table_schema
                       AND tc.table_name = c.table_name
                       AND kcu.column_name = c.column_name),
                    false
                ) as is_pk
            FROM information_schema.columns c
            JOIN information_schema.tables t
              ON c.table_schema = t.table_schema AND c.table_name = t.table_name
            WHERE c.table_schema = $1 AND t.table_type = 'BASE TABLE'
            ORDER BY c.table_name, c.ordinal_position
            "#,
            &[&schema],
        )
        .map_err(|e| DbError::other(e.to_string()))?;

    let mut result: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
    for row in rows {
        let table_name: String = row.get(0);
        result.entry(table_name).or_default().push(ColumnInfo {
            name: row.get(1),
            data_type: row.get(2),
            is_nullable: row.get(3),
            is_primary_key: row.get(5),
            default_value: row.get(4),
        });
    }
    Ok(result)
}

fn foreign_keys_for_schema(client: &mut Client, schema: &str) -> Result<HashMap<String, Vec<ForeignKeyRef>>, DbError> {
    let rows = client
        .query(
            r#"
            SELECT
                tc.table_name,
                kcu.column_name,
                ccu.table_name AS ref_table,
                ccu.column_name AS ref_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1
            "#,
            &[&schema],
        )
        .map_err(|e| DbError::other(e.to_string()))?;

    let mut result: HashMap<String, Vec<ForeignKeyRef>> = HashMap::new();
    for row in rows {
        let table_name: String = row.get(0);
        result.entry(table_name).or_default().push(ForeignKeyRef {
            column: row.get(1),
            ref_table: row.get(2),
            ref_column: row.get(3),
        });
    }
    Ok(result)
}

fn postgres_value(row: &postgres::Row, idx: usize) -> Value {
    let type_name = row.columns()[idx].type_().name();
    match type_name {
        "int2" | "int4" | "int8" => row.try_get::<_, Option<i64>>(idx).ok().flatten().map(Value::Int).unwrap_or(Value::Null),
        "float4" | "float8" | "numeric" => row.try_get::<_, Option<f64>>(idx).ok().flatten().map(Value::Float).unwrap_or(Value::Null),
        "bool" => row.try_get::<_, Option<bool>>(idx).ok().flatten().map(Value::Bool).unwrap_or(Value::Null),
        "timestamp" | "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(Value::DateTime)
            .unwrap_or(Value::Null),
        "date" => row.try_get::<_, Option<NaiveDate>>(idx).ok().flatten().map(Value::Date).unwrap_or(Value::Null),
        "time" => row.try_get::<_, Option<NaiveTime>>(idx).ok().flatten().map(Value::Time).unwrap_or(Value::Null),
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx).ok().flatten().map(Value::Bytes).unwrap_or(Value::Null),
        "json" | "jsonb" => row.try_get::<_, Option<String>>(idx).ok().flatten().map(Value::Json).unwrap_or(Value::Null),
        _ => row.try_get::<_, Option<String>>(idx).ok().flatten().map(Value::Text).unwrap_or(Value::Null),
    }
}

fn classify_postgres_error(err: &postgres::Error) -> DbError {
    use postgres::error::SqlState;
    let Some(code) = err.code() else {
        return DbError::other(err.to_string());
    };
    match *code {
        SqlState::UNDEFINED_TABLE | SqlState::UNDEFINED_COLUMN => DbError::object_not_found(err.to_string()),
        SqlState::INVALID_TEXT_REPRESENTATION | SqlState::DATATYPE_MISMATCH => DbError::type_mismatch(err.to_string()),
        SqlState::SYNTAX_ERROR => DbError::syntax_error(err.to_string()),
        SqlState::INVALID_PASSWORD | SqlState::INVALID_AUTHORIZATION_SPECIFICATION => DbError::auth_error(err.to_string()),
        SqlState::INSUFFICIENT_PRIVILEGE => DbError::permission_error(err.to_string()),
        SqlState::QUERY_CANCELED => DbError::Cancelled,
        _ => DbError::other(err.to_string()),
    }
}
