use nlsql_core::{
    ColumnMeta, ConnectionConfig, ConnectionHandle, ConnectionInfo, DbAdapter, DbError,
    DialectIdioms, LimitStyle, NoopCancelHandle, PlaceholderStyle, QueryCancelHandle, ResultSet,
    SchemaSnapshot, Value,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
pub enum FakeQueryOutcome {
    Success(ResultSet),
    Error(DbError),
}

impl FakeQueryOutcome {
    fn into_result(self) -> Result<ResultSet, DbError> {
        match self {
            Self::Success(result) => Ok(result),
            Self::Error(error) => Err(error),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriverStats {
    pub executed_sql: Vec<String>,
    pub connect_calls: usize,
    pub disconnect_calls: usize,
}

struct FakeDriverState {
    schema: RwLock<SchemaSnapshot>,
    query_outcomes: RwLock<HashMap<String, FakeQueryOutcome>>,
    default_outcome: RwLock<Option<FakeQueryOutcome>>,
    executed_sql: Mutex<Vec<String>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    connect_error: RwLock<Option<DbError>>,
    introspect_error: RwLock<Option<DbError>>,
}

impl Default for FakeDriverState {
    fn default() -> Self {
        Self {
            schema: RwLock::new(SchemaSnapshot::new("fake", ConnectionInfo { host: String::new(), port: 0, database: String::new() }, Vec::new())),
            query_outcomes: RwLock::new(HashMap::new()),
            default_outcome: RwLock::new(None),
            executed_sql: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            connect_error: RwLock::new(None),
            introspect_error: RwLock::new(None),
        }
    }
}

/// Fakes `DbAdapter` (§4.1) for driving the orchestrator's state machine in
/// tests without a real database. One fixed `ConnectionConfig`'s dialect is
/// carried at construction so `dialect_idioms()` answers consistently.
#[derive(Clone)]
pub struct FakeDriver {
    idioms: DialectIdioms,
    state: Arc<FakeDriverState>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self {
            idioms: DialectIdioms {
                limit_style: LimitStyle::Limit,
                current_timestamp: "NOW()",
                concat_operator: "||",
                placeholder_style: PlaceholderStyle::QuestionMark,
                prompt_rules: "fake dialect for tests",
                features: nlsql_core::DialectFeatures::all(),
            },
            state: Arc::new(FakeDriverState::default()),
        }
    }

    pub fn with_schema(self, schema: SchemaSnapshot) -> Self {
        *rwlock_write(&self.state.schema) = schema;
        self
    }

    pub fn with_query_result(self, sql: impl Into<String>, result: ResultSet) -> Self {
        rwlock_write(&self.state.query_outcomes).insert(sql.into(), FakeQueryOutcome::Success(result));
        self
    }

    pub fn with_query_error(self, sql: impl Into<String>, error: DbError) -> Self {
        rwlock_write(&self.state.query_outcomes).insert(sql.into(), FakeQueryOutcome::Error(error));
        self
    }

    pub fn with_default_result(self, result: ResultSet) -> Self {
        *rwlock_write(&self.state.default_outcome) = Some(FakeQueryOutcome::Success(result));
        self
    }

    pub fn with_default_error(self, error: DbError) -> Self {
        *rwlock_write(&self.state.default_outcome) = Some(FakeQueryOutcome::Error(error));
        self
    }

    pub fn with_connect_error(self, error: DbError) -> Self {
        *rwlock_write(&self.state.connect_error) = Some(error);
        self
    }

    pub fn with_introspect_error(self, error: DbError) -> Self {
        *rwlock_write(&self.state.introspect_error) = Some(error);
        self
    }

    pub fn stats(&self) -> FakeDriverStats {
        FakeDriverStats {
            executed_sql: mutex_lock(&self.state.executed_sql).clone(),
            connect_calls: self.state.connect_calls.load(Ordering::Relaxed),
            disconnect_calls: self.state.disconnect_calls.load(Ordering::Relaxed),
        }
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DbAdapter for FakeDriver {
    fn connect(&self, config: ConnectionConfig) -> Result<ConnectionHandle, DbError> {
        self.state.connect_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = rwlock_read(&self.state.connect_error).clone() {
            return Err(error);
        }
        Ok(ConnectionHandle::new(config))
    }

    fn introspect(&self, _handle: &ConnectionHandle) -> Result<SchemaSnapshot, DbError> {
        if let Some(error) = rwlock_read(&self.state.introspect_error).clone() {
            return Err(error);
        }
        Ok(rwlock_read(&self.state.schema).clone())
    }

    fn execute(&self, _handle: &ConnectionHandle, sql: &str, limit: Option<u32>) -> Result<ResultSet, DbError> {
        mutex_lock(&self.state.executed_sql).push(sql.to_string());

        if let Some(outcome) = rwlock_read(&self.state.query_outcomes).get(sql).cloned() {
            return outcome.into_result();
        }
        if let Some(outcome) = rwlock_read(&self.state.default_outcome).clone() {
            return outcome.into_result();
        }

        let mut result = ResultSet::empty();
        result.columns.push(ColumnMeta { name: "value".to_string(), type_name: "integer".to_string() });
        result.rows.push(vec![Value::Int(1)]);
        if let Some(limit) = limit {
            result.rows.truncate(limit as usize);
        }
        Ok(result)
    }

    fn disconnect(&self, _handle: &ConnectionHandle) -> Result<(), DbError> {
        self.state.disconnect_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn dialect_idioms(&self) -> &DialectIdioms {
        &self.idioms
    }

    fn cancel_handle(&self, _handle: &ConnectionHandle) -> Arc<dyn QueryCancelHandle> {
        Arc::new(NoopCancelHandle)
    }
}

fn rwlock_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn rwlock_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}
