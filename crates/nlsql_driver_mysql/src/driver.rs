use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use mysql::prelude::Queryable;
use mysql::{Conn, Opts, OptsBuilder, Value as MysqlValue};
use nlsql_core::sql_dialect::{self, DialectFeatures, DialectIdioms, LimitStyle, PlaceholderStyle, SqlDialect};
use nlsql_core::{
    ColumnInfo, ColumnMeta, ConnectionConfig, ConnectionHandle, ConnectionInfo, DbAdapter, DbError,
    Dialect, ForeignKeyRef, NoopCancelHandle, QueryCancelHandle, ResultSet, SchemaSnapshot,
    TableInfo, Value, ViewInfo,
};
use uuid::Uuid;

pub struct MysqlDialectImpl {
    idioms: DialectIdioms,
}

impl MysqlDialectImpl {
    pub fn new() -> Self {
        Self {
            idioms: DialectIdioms {
                limit_style: LimitStyle::Limit,
                current_timestamp: "NOW()",
                concat_operator: "CONCAT",
                placeholder_style: PlaceholderStyle::QuestionMark,
                prompt_rules: "This is MySQL. Use LIMIT n for row limiting, CONCAT(a, b) instead of ||, NOW() for the current time, backtick-quoted identifiers.",
                features: DialectFeatures::COMMON_TABLE_EXPRESSIONS
                    | DialectFeatures::WINDOW_FUNCTIONS
                    | DialectFeatures::JSON_FUNCTIONS
                    | DialectFeatures::UPSERT,
            },
        }
    }
}

impl Default for MysqlDialectImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDialect for MysqlDialectImpl {
    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
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
    conn: Mutex<Conn>,
    database: String,
    cancelled: Arc<AtomicBool>,
}

/// MySQL `DbAdapter` (§4.1), built on the synchronous `mysql` crate.
pub struct MysqlDriver {
    dialect: MysqlDialectImpl,
    conns: Mutex<HashMap<Uuid, Arc<OpenConnection>>>,
}

impl MysqlDriver {
    pub fn new() -> Self {
        Self {
            dialect: MysqlDialectImpl::new(),
            conns: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MysqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbAdapter for MysqlDriver {
    fn connect(&self, config: ConnectionConfig) -> Result<ConnectionHandle, DbError> {
        if config.dialect != Dialect::MySql {
            return Err(DbError::connection_error("mysql driver received a non-mysql config"));
        }

        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(config.host.clone()))
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .db_name(Some(config.database.clone()));
        let conn = Conn::new(Opts::from(opts)).map_err(|e| DbError::connection_error(e.to_string()))?;

        let handle = ConnectionHandle::new(config.clone());
        let open = Arc::new(OpenConnection {
            conn: Mutex::new(conn),
            database: config.database,
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        self.conns
            .lock()
            .map_err(|_| DbError::other("mysql connection registry poisoned"))?
            .insert(handle.id(), open);

        Ok(handle)
    }

    fn introspect(&self, handle: &ConnectionHandle) -> Result<SchemaSnapshot, DbError> {
        let open = self.open_connection(handle)?;
        let mut conn = open.conn.lock().map_err(|_| DbError::other("mysql lock poisoned"))?;

        let columns_by_table = columns_for_database(&mut conn, &open.database)?;
        let fks_by_table = foreign_keys_for_database(&mut conn, &open.database)?;

        let table_names: Vec<String> = conn
            .exec(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_type = 'BASE TABLE' AND table_schema = ? ORDER BY table_name",
                (&open.database,),
            )
            .map_err(|e| DbError::other(e.to_string()))?;

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

        let view_names: Vec<String> = conn
            .exec(
                "SELECT table_name FROM information_schema.views WHERE table_schema = ? ORDER BY table_name",
                (&open.database,),
            )
            .map_err(|e| DbError::other(e.to_string()))?;
        let views = view_names
            .into_iter()
            .map(|name| ViewInfo { full_name: name.clone(), view_name: name })
            .collect();

        Ok(SchemaSnapshot::new(
            open.database.clone(),
            ConnectionInfo { host: handle.config().host.clone(), port: handle.config().port, database: open.database.clone() },
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
        let mut conn = open.conn.lock().map_err(|_| DbError::other("mysql lock poisoned"))?;

        let start = Instant::now();
        let effective_sql = if limit.is_some() && !sql_has_limit(sql) {
            format!("{} {}", sql.trim_end_matches(';'), self.dialect.limit_clause(limit.unwrap()))
        } else {
            sql.to_string()
        };

        let mut result = conn.query_iter(&effective_sql).map_err(|e| classify_mysql_error(&e))?;

        let columns: Vec<ColumnMeta> = result
            .columns()
            .map(|cols| {
                cols.as_ref()
                    .iter()
                    .map(|c| ColumnMeta { name: c.name_str().to_string(), type_name: format!("{:?}", c.column_type()) })
                    .collect()
            })
            .unwrap_or_default();

        let mut rows = Vec::new();
        for row in result.by_ref() {
            let row = row.map_err(|e| classify_mysql_error(&e))?;
            let values = (0..columns.len()).map(|i| mysql_value(row.as_ref(i))).collect();
            rows.push(values);
        }

        Ok(ResultSet { columns, rows, execution_time: start.elapsed() })
    }

    fn disconnect(&self, handle: &ConnectionHandle) -> Result<(), DbError> {
        self.conns
            .lock()
            .map_err(|_| DbError::other("mysql connection registry poisoned"))?
            .remove(&handle.id());
        Ok(())
    }

    fn dialect_idioms(&self) -> &DialectIdioms {
        self.dialect.idioms()
    }

    fn cancel_handle(&self, _handle: &ConnectionHandle) -> Arc<dyn QueryCancelHandle> {
        // The `mysql` crate has no portable KILL QUERY helper at this
        // abstraction level; cancellation is best-effort no-op here.
        Arc::new(NoopCancelHandle)
    }
}

impl MysqlDriver {
    fn open_connection(&self, handle: &ConnectionHandle) -> Result<Arc<OpenConnection>, DbError> {
        self.conns
            .lock()
            .map_err(|_| DbError::other("mysql connection registry poisoned"))?
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| DbError::connection_error("mysql connection handle is not open"))
    }
}

fn sql_has_limit(sql: &str) -> bool {
    sql.to_ascii_uppercase().contains("LIMIT")
}

fn columns_for_database(conn: &mut Conn, database: &str) -> Result<HashMap<String, Vec<ColumnInfo>>, DbError> {
    let rows: Vec<(String, String, String, String, Option<String>, String)> = conn
        .exec(
            "SELECT table_name, column_name, data_type, is_nullable, column_default, column_key \
             FROM information_schema.columns WHERE table_schema = ? ORDER BY table_name, ordinal_position",
            (database,),
        )
        .map_err(|e| DbError::other(e.to_string()))?;

    let mut result: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
    for (table_name, name, data_type, is_nullable, default_value, column_key) in rows {
        result.entry(table_name).or_default().push(ColumnInfo {
            name,
            data_type,
            is_nullable: is_nullable == "YES",
            is_primary_key: column_key == "PRI",
            default_value,
        });
    }
    Ok(result)
}

fn foreign_keys_for_database(conn: &mut Conn, database: &str) -> Result<HashMap<String, Vec<ForeignKeyRef>>, DbError> {
    let rows: Vec<(String, String, String, String)> = conn
        .exec(
            "SELECT table_name, column_name, referenced_table_name, referenced_column_name \
             FROM information_schema.key_column_usage \
             WHERE table_schema = ? AND referenced_table_name IS NOT NULL",
            (database,),
        )
        .map_err(|e| DbError::other(e.to_string()))?;

    let mut result: HashMap<String, Vec<ForeignKeyRef>> = HashMap::new();
    for (table_name, column, ref_table, ref_column) in rows {
        result.entry(table_name).or_default().push(ForeignKeyRef { column, ref_table, ref_column });
    }
    Ok(result)
}

fn mysql_value(value: Option<MysqlValue>) -> Value {
    match value {
        None | Some(MysqlValue::NULL) => Value::Null,
        Some(MysqlValue::Int(i)) => Value::Int(i),
        Some(MysqlValue::UInt(u)) => Value::Int(u as i64),
        Some(MysqlValue::Float(f)) => Value::Float(f as f64),
        Some(MysqlValue::Double(f)) => Value::Float(f),
        Some(MysqlValue::Bytes(b)) => Value::Text(String::from_utf8_lossy(&b).to_string()),
        Some(MysqlValue::Date(year, month, day, hour, minute, second, micro)) => {
            match chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| d.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micro))
            {
                Some(naive) if hour == 0 && minute == 0 && second == 0 && micro == 0 => {
                    Value::Date(naive.date())
                }
                Some(naive) => Value::DateTime(chrono::DateTime::from_naive_utc_and_offset(naive, chrono::Utc)),
                None => Value::Null,
            }
        }
        Some(MysqlValue::Time(negative, days, hours, minutes, seconds, micros)) => {
            let total_hours = days as u32 * 24 + hours as u32;
            match chrono::NaiveTime::from_hms_micro_opt(total_hours, minutes as u32, seconds as u32, micros) {
                Some(time) => Value::Text(format!("{}{}", if negative { "-" } else { "" }, time)),
                None => Value::Null,
            }
        }
    }
}

fn classify_mysql_error(err: &mysql::Error) -> DbError {
    let message = err.to_string();
    if message.contains("doesn't exist") || message.contains("Unknown table") || message.contains("Unknown column") {
        DbError::object_not_found(message)
    } else if message.contains("Access denied") {
        DbError::auth_error(message)
    } else if message.contains("syntax") {
        DbError::syntax_error(message)
    } else if message.contains("Incorrect") && message.contains("value") {
        DbError::type_mismatch(message)
    } else {
        DbError::other(message)
    }
}
