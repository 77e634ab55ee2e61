use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Database dialects the adapter layer supports (§3, §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dialect {
    Postgres,
    MySql,
    Oracle,
    Sqlite,
}

impl Dialect {
    pub fn display_name(&self) -> &'static str {
        match self {
            Dialect::Postgres => "PostgreSQL",
            Dialect::MySql => "MySQL",
            Dialect::Oracle => "Oracle",
            Dialect::Sqlite => "SQLite",
        }
    }
}

/// Connection parameters supplied by the caller. Not itself cached or keyed;
/// `ConnectionHandle::connection_id()` is the stable partition key derived
/// from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub dialect: Dialect,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    /// Oracle SID, mutually exclusive in practice with `service_name`.
    pub sid: Option<String>,
    /// Oracle service name.
    pub service_name: Option<String>,
    /// SQLite file path; `database`/`host`/`port` are placeholders for this dialect.
    pub file_path: Option<PathBuf>,
    /// For SQLite: create the file if it doesn't exist. Ignored otherwise.
    pub create_if_missing: bool,
}

impl ConnectionConfig {
    pub fn postgres(host: impl Into<String>, port: u16, database: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            dialect: Dialect::Postgres,
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            sid: None,
            service_name: None,
            file_path: None,
            create_if_missing: false,
        }
    }

    pub fn mysql(host: impl Into<String>, port: u16, database: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            dialect: Dialect::MySql,
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            sid: None,
            service_name: None,
            file_path: None,
            create_if_missing: false,
        }
    }

    pub fn oracle(host: impl Into<String>, port: u16, service_name: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            dialect: Dialect::Oracle,
            host: host.into(),
            port,
            database: String::new(),
            user: user.into(),
            sid: None,
            service_name: Some(service_name.into()),
            file_path: None,
            create_if_missing: false,
        }
    }

    pub fn sqlite(file_path: impl Into<PathBuf>) -> Self {
        Self {
            dialect: Dialect::Sqlite,
            host: String::new(),
            port: 0,
            database: String::new(),
            user: String::new(),
            sid: None,
            service_name: None,
            file_path: Some(file_path.into()),
            create_if_missing: false,
        }
    }
}

/// Immutable handle to an open database session (§3).
///
/// `connection_id` is the only key downstream caches (ontology, schema
/// snapshot, graph, retrieval) and persisted artifacts use to partition
/// per-database state.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    config: ConnectionConfig,
    connection_id: String,
}

impl ConnectionHandle {
    pub fn new(config: ConnectionConfig) -> Self {
        let connection_id = derive_connection_id(&config);
        Self {
            id: Uuid::new_v4(),
            config,
            connection_id,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

fn derive_connection_id(config: &ConnectionConfig) -> String {
    if config.dialect == Dialect::Sqlite {
        let path = config
            .file_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        format!("{path}_sqlite_0")
    } else {
        format!("{}_{}_{}", config.database, config.host, config.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_for_network_dialect() {
        let handle = ConnectionHandle::new(ConnectionConfig::postgres("db.internal", 5432, "orders", "svc"));
        assert_eq!(handle.connection_id(), "orders_db.internal_5432");
    }

    #[test]
    fn connection_id_for_sqlite() {
        let handle = ConnectionHandle::new(ConnectionConfig::sqlite("/data/app.db"));
        assert_eq!(handle.connection_id(), "/data/app.db_sqlite_0");
    }
}
