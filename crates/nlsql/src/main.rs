//! `nlsql`: the CLI entrypoint wiring C1 (drivers), C4 (ontology), C5
//! (graph), C6 (retrieval), and C8/C9 (orchestrator, reload) behind the
//! single `run` entrypoint (§6). Headless subsystem wiring for a
//! natural-language query tool, exposed as a `clap` CLI.

mod llm_provider;

use clap::{Parser, Subcommand, ValueEnum};
use llm_provider::HttpLlmProvider;
use nlsql_core::{ConnectionConfig, DbAdapter, Dialect, NlsqlConfig, NlsqlConfigStore};
use nlsql_graph::GraphStore;
use nlsql_ontology::OntologyStore;
use nlsql_orchestrator::{Orchestrator, RunOptions};
use nlsql_retrieval::{HashingEmbedder, InProcessVectorBackend, RetrievalStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nlsql", version, about = "Natural-language-to-SQL query orchestrator")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the configuration document (defaults to the platform config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask a natural-language question against a live database connection.
    Ask(AskArgs),
    /// Inspect or edit the persisted configuration (§6, §4.9).
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Generate (and optionally persist) the ontology for a connection (§4.4).
    Ontology(OntologyArgs),
    /// Project a connection's schema into the graph store (§4.5).
    GraphSync(ConnectionArgs),
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved configuration document and its on-disk path.
    Show,
    /// Write the default configuration document, overwriting any existing one.
    Init,
    /// Toggle the ontology subsystem on/off without restarting (§4.9).
    SetOntology { enabled: bool },
    /// Toggle the graph subsystem on/off without restarting (§4.9).
    SetGraph { enabled: bool },
    /// Toggle the retrieval subsystem on/off without restarting (§4.9).
    SetRetrieval { enabled: bool },
    /// Change the model's declared context window, which may shift the
    /// Context Budgeter's strategy (§4.3, §4.9).
    SetMaxContextTokens { tokens: u32 },
}

#[derive(clap::Args)]
struct OntologyArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    llm: LlmArgs,

    /// Directory to persist the generated ontology's YAML/OWL files into.
    #[arg(long)]
    persist_dir: Option<PathBuf>,
}

#[derive(clap::Args)]
struct AskArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    llm: LlmArgs,

    /// The natural-language question to answer.
    question: String,

    /// Maximum generate/execute/retry attempts (§4.8, §7).
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Allow DDL/DML if the model proposes it (off by default, §4.8).
    #[arg(long)]
    allow_writes: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Oracle,
    Sqlite,
}

#[derive(clap::Args)]
struct ConnectionArgs {
    #[arg(long, value_enum)]
    dialect: DialectArg,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(long, default_value_t = 0)]
    port: u16,

    #[arg(long, default_value = "")]
    database: String,

    #[arg(long, default_value = "")]
    user: String,

    /// Oracle service name.
    #[arg(long)]
    service_name: Option<String>,

    /// SQLite file path.
    #[arg(long)]
    file: Option<PathBuf>,

    /// SQLite only: create the file if it doesn't already exist.
    #[arg(long)]
    create_if_missing: bool,
}

#[derive(clap::Args)]
struct LlmArgs {
    /// Base URL of an OpenAI-chat-completions-compatible endpoint.
    #[arg(long, default_value = "https://api.openai.com/v1")]
    llm_url: String,

    #[arg(long, default_value = "gpt-4o-mini")]
    llm_model: String,

    /// API key; falls back to the `NLSQL_LLM_API_KEY` environment variable.
    #[arg(long)]
    llm_api_key: Option<String>,
}

impl ConnectionArgs {
    fn into_config(self) -> Result<ConnectionConfig, String> {
        let config = match self.dialect {
            DialectArg::Postgres => ConnectionConfig::postgres(self.host, self.port, self.database, self.user),
            DialectArg::Mysql => ConnectionConfig::mysql(self.host, self.port, self.database, self.user),
            DialectArg::Oracle => {
                let service_name = self.service_name.ok_or("--service-name is required for oracle")?;
                ConnectionConfig::oracle(self.host, self.port, service_name, self.user)
            }
            DialectArg::Sqlite => {
                let path = self.file.ok_or("--file is required for sqlite")?;
                let mut config = ConnectionConfig::sqlite(path);
                config.create_if_missing = self.create_if_missing;
                config
            }
        };
        Ok(config)
    }
}

fn build_adapter(dialect: Dialect) -> Result<Arc<dyn DbAdapter>, String> {
    match dialect {
        #[cfg(feature = "postgres")]
        Dialect::Postgres => Ok(Arc::new(nlsql_driver_postgres::PostgresDriver::new())),
        #[cfg(not(feature = "postgres"))]
        Dialect::Postgres => Err("this build was compiled without the postgres driver feature".to_string()),

        #[cfg(feature = "mysql")]
        Dialect::MySql => Ok(Arc::new(nlsql_driver_mysql::MysqlDriver::new())),
        #[cfg(not(feature = "mysql"))]
        Dialect::MySql => Err("this build was compiled without the mysql driver feature".to_string()),

        #[cfg(feature = "oracle")]
        Dialect::Oracle => Ok(Arc::new(nlsql_driver_oracle::OracleDriver::new())),
        #[cfg(not(feature = "oracle"))]
        Dialect::Oracle => Err("this build was compiled without the oracle driver feature".to_string()),

        #[cfg(feature = "sqlite")]
        Dialect::Sqlite => Ok(Arc::new(nlsql_driver_sqlite::SqliteDriver::new())),
        #[cfg(not(feature = "sqlite"))]
        Dialect::Sqlite => Err("this build was compiled without the sqlite driver feature".to_string()),
    }
}

fn build_llm(args: &LlmArgs, config: &NlsqlConfig) -> HttpLlmProvider {
    let api_key = args.llm_api_key.clone().or_else(|| std::env::var("NLSQL_LLM_API_KEY").ok());
    HttpLlmProvider::new(args.llm_url.clone(), args.llm_model.clone(), api_key)
        .with_max_context_tokens(config.llm.max_context_tokens)
        .with_max_output_tokens(config.llm.max_output_tokens)
}

fn config_store(path: Option<PathBuf>) -> Result<NlsqlConfigStore, String> {
    match path {
        Some(path) => Ok(NlsqlConfigStore::at(path)),
        None => NlsqlConfigStore::new().map_err(|e| e.to_string()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let store = config_store(cli.config)?;

    match cli.command {
        Command::Ask(args) => ask(args, &store).await,
        Command::Config { action } => config_action(action, &store),
        Command::Ontology(args) => ontology(args, &store).await,
        Command::GraphSync(args) => graph_sync(args, &store).await,
    }
}

async fn ask(args: AskArgs, store: &NlsqlConfigStore) -> Result<(), String> {
    let config = store.load().map_err(|e| e.to_string())?;
    let connection_config = args.connection.into_config()?;
    let dialect = connection_config.dialect;

    let adapter = build_adapter(dialect)?;
    let handle = adapter.connect(connection_config).map_err(|e| e.to_string())?;

    let llm = Arc::new(build_llm(&args.llm, &config));

    let retrieval_store = if config.retrieval.enabled {
        let backend = Arc::new(InProcessVectorBackend::new());
        let embedder = Arc::new(HashingEmbedder::default());
        Some(Arc::new(RetrievalStore::new(backend, embedder, "past_queries").with_default_threshold(config.retrieval.similarity_threshold)))
    } else {
        None
    };

    let orchestrator = Orchestrator::new(adapter.clone(), llm, config, retrieval_store);

    let mut options = RunOptions::default();
    options.max_attempts = args.max_attempts;
    options.read_only = !args.allow_writes;

    match orchestrator.run(handle.clone(), args.question, options).await {
        Ok(success) => {
            println!("-- {}", success.explanation);
            println!("{}", success.sql);
            print_result(&success.result);
        }
        Err(failure) => {
            eprintln!("query failed: {:?}: {}", failure.kind, failure.message);
            for attempt in &failure.attempts {
                eprintln!("  attempt {}: sql={:?} error={:?}", attempt.attempt, attempt.sql, attempt.error);
            }
            adapter.disconnect(&handle).map_err(|e| e.to_string())?;
            return Err(failure.message);
        }
    }

    adapter.disconnect(&handle).map_err(|e| e.to_string())
}

fn print_result(result: &nlsql_core::ResultSet) {
    let headers: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    println!("{}", headers.join(" | "));
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(|v| v.as_display_string()).collect();
        println!("{}", cells.join(" | "));
    }
    println!("({} rows, {:?})", result.row_count(), result.execution_time);
}

fn config_action(action: ConfigAction, store: &NlsqlConfigStore) -> Result<(), String> {
    match action {
        ConfigAction::Show => {
            let config = store.load().map_err(|e| e.to_string())?;
            println!("path: {}", store.path().display());
            println!("{}", serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?);
        }
        ConfigAction::Init => {
            store.save(&NlsqlConfig::default()).map_err(|e| e.to_string())?;
            println!("wrote default configuration to {}", store.path().display());
        }
        ConfigAction::SetOntology { enabled } => {
            let mut config = store.load().map_err(|e| e.to_string())?;
            config.ontology.enabled = enabled;
            store.save(&config).map_err(|e| e.to_string())?;
        }
        ConfigAction::SetGraph { enabled } => {
            let mut config = store.load().map_err(|e| e.to_string())?;
            config.graph.enabled = enabled;
            store.save(&config).map_err(|e| e.to_string())?;
        }
        ConfigAction::SetRetrieval { enabled } => {
            let mut config = store.load().map_err(|e| e.to_string())?;
            config.retrieval.enabled = enabled;
            store.save(&config).map_err(|e| e.to_string())?;
        }
        ConfigAction::SetMaxContextTokens { tokens } => {
            let mut config = store.load().map_err(|e| e.to_string())?;
            config.llm.max_context_tokens = tokens;
            store.save(&config).map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

async fn ontology(args: OntologyArgs, store: &NlsqlConfigStore) -> Result<(), String> {
    let config = store.load().map_err(|e| e.to_string())?;
    let connection_config = args.connection.into_config()?;
    let dialect = connection_config.dialect;

    let adapter = build_adapter(dialect)?;
    let handle = adapter.connect(connection_config).map_err(|e| e.to_string())?;
    let snapshot = adapter.introspect(&handle).map_err(|e| e.to_string())?;

    let llm = Arc::new(build_llm(&args.llm, &config));
    let ontology_store = OntologyStore::new(llm).with_max_concepts(config.ontology.max_concepts as usize);
    let generated = ontology_store.get_or_generate(handle.connection_id(), &snapshot).await.map_err(|e| e.to_string())?;

    println!("{}", serde_yaml::to_string(&generated).map_err(|e| e.to_string())?);

    if let Some(dir) = args.persist_dir {
        std::fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
        ontology_store
            .persist(&generated, &snapshot.database_name, &snapshot.connection_info.host, snapshot.connection_info.port, &dir)
            .await
            .map_err(|e| e.to_string())?;
        println!("persisted ontology under {}", dir.display());
    }

    adapter.disconnect(&handle).map_err(|e| e.to_string())
}

async fn graph_sync(args: ConnectionArgs, store: &NlsqlConfigStore) -> Result<(), String> {
    let config = store.load().map_err(|e| e.to_string())?;
    let connection_config = args.into_config()?;
    let dialect = connection_config.dialect;

    let adapter = build_adapter(dialect)?;
    let handle = adapter.connect(connection_config).map_err(|e| e.to_string())?;
    let snapshot = adapter.introspect(&handle).map_err(|e| e.to_string())?;

    let graph_store = GraphStore::new().with_max_join_depth(config.graph.max_join_depth as usize);
    let empty_ontology = nlsql_core::Ontology::empty(snapshot.fingerprint());
    let report = graph_store
        .sync(handle.connection_id(), &snapshot, &empty_ontology)
        .await
        .map_err(|e| e.to_string())?;

    println!("synced {} nodes, {} edges", report.node_count, report.edge_count);
    adapter.disconnect(&handle).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }
}
