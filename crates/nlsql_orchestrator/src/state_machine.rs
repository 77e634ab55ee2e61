//! C8: the Query State Machine, and the `run` entrypoint it backs (§6).
//!
//! States: `Generate -> Validate -> Execute -> Succeed`, with `AnalyzeError`
//! as the shared retry hub and `Fail` as the other terminal. Transitions
//! follow §4.8 exactly: a synthesized `SyntaxError` routes unparseable or
//! disallowed model output straight to `AnalyzeError`; `Validate` is local
//! and cheap; only `Execute` and `Generate` touch the outside world and so
//! are the only states wrapped in a deadline; `AnalyzeError` always clears
//! `last_sql` before a retry so a known-broken statement is never resent.

use crate::budgeter::{self, PromptContext};
use crate::error::OrchestratorError;
use crate::error_analyzer::{ErrorAnalysis, ErrorAnalyzer};
use crate::reload::{GenerateSnapshot, ReloadCoordinator};
use crate::schema_cache::{SchemaCache, DEFAULT_SCHEMA_TTL};
use nlsql_core::{
    CancelToken, CompletionParams, ConnectionHandle, DbAdapter, DbError, ErrorKind, LlmProvider, NlsqlConfig, PastQuery,
    QueryState, ResultSet, Terminal,
};
use nlsql_retrieval::{RetrievalStore, SearchFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_ALLOWED_KEYWORDS: &[&str] = &["SELECT", "WITH", "SHOW", "EXPLAIN"];
const READ_ONLY_FORBIDDEN: &[&str] = &["INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE"];
const SQL_SCHEMA_HINT: &str = r#"{"sql": "string", "explanation": "string"}"#;

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub sql: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunSuccess {
    pub sql: String,
    pub explanation: String,
    pub result: ResultSet,
    pub trace: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct PartialOutcome {
    pub sql: Option<String>,
    pub explanation: Option<String>,
}

/// Matches §6's error format verbatim: `{kind, message, attempts, partial}`.
/// `partial` never carries a `ResultSet` — per §7, a run that ends in `Fail`
/// never returns a query result, successful or not.
#[derive(Debug, Clone)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
    pub attempts: Vec<AttemptRecord>,
    pub partial: PartialOutcome,
}

#[derive(Clone)]
pub struct RunOptions {
    pub max_attempts: Option<u32>,
    pub read_only: bool,
    pub allowed_keywords: Vec<String>,
    pub cancel: CancelToken,
    pub result_limit: Option<u32>,
    pub record_retrieval: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_attempts: None,
            read_only: true,
            allowed_keywords: DEFAULT_ALLOWED_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            cancel: CancelToken::new(),
            result_limit: Some(200),
            record_retrieval: true,
        }
    }
}

enum Next {
    Retry,
    Fail(ErrorAnalysis),
}

/// Wires C1 (`adapter`) and C2 (`llm`) through C3-C9 behind the single
/// `run` entrypoint (§6).
pub struct Orchestrator {
    adapter: Arc<dyn DbAdapter>,
    llm: Arc<dyn LlmProvider>,
    reload: Arc<ReloadCoordinator>,
    error_analyzer: ErrorAnalyzer,
    schema_cache: SchemaCache,
    default_max_attempts: u32,
    handle_locks: AsyncMutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    ontology_inflight: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<dyn DbAdapter>,
        llm: Arc<dyn LlmProvider>,
        config: NlsqlConfig,
        retrieval_store: Option<Arc<RetrievalStore>>,
    ) -> Self {
        let default_max_attempts = config.llm.max_attempts;
        let reload = Arc::new(ReloadCoordinator::new(llm.clone(), config, retrieval_store));

        Self {
            adapter,
            llm,
            reload,
            error_analyzer: ErrorAnalyzer::new(),
            schema_cache: SchemaCache::new(DEFAULT_SCHEMA_TTL),
            default_max_attempts,
            handle_locks: AsyncMutex::new(HashMap::new()),
            ontology_inflight: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn reload_coordinator(&self) -> &Arc<ReloadCoordinator> {
        &self.reload
    }

    async fn handle_lock(&self, handle: &ConnectionHandle) -> Arc<AsyncMutex<()>> {
        let mut locks = self.handle_locks.lock().await;
        locks.entry(handle.id()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    async fn ontology_lock(&self, connection_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.ontology_inflight.lock().await;
        locks.entry(connection_id.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    async fn fetch_snapshot(&self, handle: &ConnectionHandle) -> Result<nlsql_core::SchemaSnapshot, OrchestratorError> {
        if let Some(snapshot) = self.schema_cache.get_fresh(handle.connection_id()) {
            return Ok(snapshot);
        }

        let adapter = self.adapter.clone();
        let handle_clone = handle.clone();
        let snapshot = tokio::task::spawn_blocking(move || adapter.introspect(&handle_clone))
            .await
            .map_err(|e| OrchestratorError::other(format!("introspect task panicked: {e}")))??;

        self.schema_cache.put(handle.connection_id(), snapshot.clone());
        Ok(snapshot)
    }

    /// Single-flight wrapper around C4's `get_or_generate`: the second
    /// concurrent caller for the same `connection_id` awaits the first's
    /// result instead of triggering duplicate LLM work (§5).
    async fn resolve_ontology(
        &self,
        snap: &GenerateSnapshot,
        connection_id: &str,
        state: &QueryState,
    ) -> Result<nlsql_core::ResolutionResult, nlsql_ontology::OntologyError> {
        let lock = self.ontology_lock(connection_id).await;
        let _guard = lock.lock().await;
        let ontology = snap.ontology_store.get_or_generate(connection_id, &state.snapshot).await?;
        Ok(nlsql_ontology::OntologyStore::resolve(&ontology, &state.question, &state.snapshot))
    }

    /// The single top-level entrypoint (§6): `run(handle, question, options)
    /// -> {sql, explanation, result, trace} | error`.
    pub async fn run(
        &self,
        handle: ConnectionHandle,
        question: impl Into<String>,
        options: RunOptions,
    ) -> Result<RunSuccess, RunFailure> {
        let question = question.into();
        let lock = self.handle_lock(&handle).await;
        let _guard = lock.lock().await;

        if options.cancel.is_cancelled() {
            return Err(cancelled_failure(Vec::new(), None));
        }

        let snapshot = self
            .fetch_snapshot(&handle)
            .await
            .map_err(|e| RunFailure { kind: e.kind(), message: e.to_string(), attempts: Vec::new(), partial: PartialOutcome::default() })?;

        let connection_id = handle.connection_id().to_string();
        let max_attempts = options.max_attempts.unwrap_or(self.default_max_attempts);
        let mut state = QueryState::new(question, handle.clone(), snapshot, max_attempts);

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut force_full_types = false;
        let mut previous_sql: Option<String> = None;
        let mut previous_error: Option<DbError> = None;

        loop {
            if options.cancel.is_cancelled() {
                return Err(cancelled_failure(attempts, state.last_sql.clone()));
            }

            // ---- Generate ----
            let snap = self.reload.snapshot();

            let ontology_hits = if snap.ontology_enabled {
                match self.resolve_ontology(&snap, &connection_id, &state).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        log::warn!("ontology subsystem unavailable for this attempt: {e}");
                        nlsql_core::ResolutionResult::empty()
                    }
                }
            } else {
                nlsql_core::ResolutionResult::empty()
            };

            let graph_hits = if snap.graph_enabled {
                match snap.graph_store.insights(&connection_id, &state.question).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        log::warn!("graph subsystem unavailable for this attempt: {e}");
                        nlsql_core::GraphInsights::empty()
                    }
                }
            } else {
                nlsql_core::GraphInsights::empty()
            };

            let retrieval_hits: Vec<PastQuery> = if snap.retrieval_enabled && state.is_first_attempt() {
                match &snap.retrieval_store {
                    Some(store) => {
                        let filter = SearchFilter::new(state.handle.dialect());
                        match store.search(&state.question, &filter, snap.retrieval_top_k, Some(snap.retrieval_threshold)).await {
                            Ok(hits) => hits,
                            Err(e) => {
                                log::warn!("retrieval subsystem unavailable for this attempt: {e}");
                                Vec::new()
                            }
                        }
                    }
                    None => Vec::new(),
                }
            } else {
                Vec::new()
            };

            state.ontology_hits = ontology_hits;
            state.graph_hits = graph_hits;
            state.retrieval_hits = retrieval_hits;

            let ctx = PromptContext {
                question: &state.question,
                dialect_idioms: self.adapter.dialect_idioms(),
                schema: &state.snapshot,
                ontology_hits: &state.ontology_hits,
                graph_hits: &state.graph_hits,
                retrieval_hits: &state.retrieval_hits,
                attempt: state.attempt,
                previous_sql: previous_sql.as_deref(),
                previous_error: previous_error.as_ref(),
                force_full_types,
                focused_tables: &state.focused_tables,
            };

            let assembled = match snap.budgeter.assemble(&ctx) {
                Ok(prompt) => prompt,
                Err(_first_overflow) => {
                    let degraded = budgeter::degrade(snap.budgeter.strategy());
                    match snap.budgeter.assemble_at(&ctx, degraded) {
                        Ok(prompt) => prompt,
                        Err(overflow) => {
                            return Err(RunFailure {
                                kind: ErrorKind::Budget,
                                message: format!(
                                    "prompt requires {} tokens but only {} remain after degrading strategy",
                                    overflow.estimated_tokens, overflow.max_tokens
                                ),
                                attempts,
                                partial: PartialOutcome::default(),
                            });
                        }
                    }
                }
            };

            let params = CompletionParams { max_tokens: self.llm.max_output_tokens(), timeout: DEFAULT_LLM_TIMEOUT, ..Default::default() };
            let completion = timeout(DEFAULT_LLM_TIMEOUT, self.llm.complete_json(&assembled.messages, &params, SQL_SCHEMA_HINT)).await;

            let (sql, explanation) = match completion {
                Err(_elapsed) => {
                    let db_err = DbError::Timeout;
                    attempts.push(AttemptRecord { attempt: state.attempt, sql: None, error: Some("llm call timed out".to_string()) });
                    match self.route_error(&mut state, &db_err, "", &mut force_full_types) {
                        Next::Retry => {
                            previous_sql = None;
                            previous_error = Some(db_err);
                            continue;
                        }
                        Next::Fail(analysis) => return Err(fail(analysis, attempts, PartialOutcome::default())),
                    }
                }
                Ok(Err(llm_err)) => {
                    let db_err = DbError::other(llm_err.to_string());
                    attempts.push(AttemptRecord { attempt: state.attempt, sql: None, error: Some(llm_err.to_string()) });
                    match self.route_error(&mut state, &db_err, "", &mut force_full_types) {
                        Next::Retry => {
                            previous_sql = None;
                            previous_error = Some(db_err);
                            continue;
                        }
                        Next::Fail(analysis) => return Err(fail(analysis, attempts, PartialOutcome::default())),
                    }
                }
                Ok(Ok(json)) => match parse_generation(&json, &options.allowed_keywords) {
                    Ok(pair) => pair,
                    Err(message) => {
                        let db_err = DbError::syntax_error(message);
                        attempts.push(AttemptRecord { attempt: state.attempt, sql: None, error: Some(db_err.to_string()) });
                        match self.route_error(&mut state, &db_err, "", &mut force_full_types) {
                            Next::Retry => {
                                previous_sql = None;
                                previous_error = Some(db_err);
                                continue;
                            }
                            Next::Fail(analysis) => return Err(fail(analysis, attempts, PartialOutcome::default())),
                        }
                    }
                },
            };

            // ---- Validate ----
            if let Err(message) = validate_sql(&sql, options.read_only) {
                let db_err = DbError::syntax_error(message);
                attempts.push(AttemptRecord { attempt: state.attempt, sql: Some(sql.clone()), error: Some(db_err.to_string()) });
                match self.route_error(&mut state, &db_err, &sql, &mut force_full_types) {
                    Next::Retry => {
                        previous_sql = Some(sql);
                        previous_error = Some(db_err);
                        continue;
                    }
                    Next::Fail(analysis) => {
                        return Err(fail(analysis, attempts, PartialOutcome { sql: Some(sql), explanation: Some(explanation) }))
                    }
                }
            }

            // ---- Execute ----
            let adapter = self.adapter.clone();
            let exec_handle = handle.clone();
            let exec_sql = sql.clone();
            let limit = options.result_limit;
            let execution =
                timeout(DEFAULT_DB_TIMEOUT, tokio::task::spawn_blocking(move || adapter.execute(&exec_handle, &exec_sql, limit))).await;

            match execution {
                Err(_elapsed) => {
                    let db_err = DbError::Timeout;
                    attempts.push(AttemptRecord { attempt: state.attempt, sql: Some(sql.clone()), error: Some("db call timed out".to_string()) });
                    match self.route_error(&mut state, &db_err, &sql, &mut force_full_types) {
                        Next::Retry => {
                            previous_sql = Some(sql);
                            previous_error = Some(db_err);
                            continue;
                        }
                        Next::Fail(analysis) => {
                            return Err(fail(analysis, attempts, PartialOutcome { sql: Some(sql), explanation: Some(explanation) }))
                        }
                    }
                }
                Ok(Err(join_err)) => {
                    let db_err = OrchestratorError::other(format!("execute task panicked: {join_err}"));
                    attempts.push(AttemptRecord { attempt: state.attempt, sql: Some(sql.clone()), error: Some(db_err.to_string()) });
                    return Err(RunFailure {
                        kind: db_err.kind(),
                        message: db_err.to_string(),
                        attempts,
                        partial: PartialOutcome { sql: Some(sql), explanation: Some(explanation) },
                    });
                }
                Ok(Ok(Err(db_err))) => {
                    attempts.push(AttemptRecord { attempt: state.attempt, sql: Some(sql.clone()), error: Some(db_err.to_string()) });
                    match self.route_error(&mut state, &db_err, &sql, &mut force_full_types) {
                        Next::Retry => {
                            previous_sql = Some(sql);
                            previous_error = Some(db_err);
                            continue;
                        }
                        Next::Fail(analysis) => {
                            return Err(fail(analysis, attempts, PartialOutcome { sql: Some(sql), explanation: Some(explanation) }))
                        }
                    }
                }
                Ok(Ok(Ok(result))) => {
                    attempts.push(AttemptRecord { attempt: state.attempt, sql: Some(sql.clone()), error: None });
                    state.terminal = Some(Terminal::Success);

                    if snap.retrieval_enabled && options.record_retrieval {
                        if let Some(store) = snap.retrieval_store.clone() {
                            let conn = connection_id.clone();
                            let record = PastQuery::new(state.question.clone(), sql.clone(), handle.dialect(), true);
                            tokio::spawn(async move {
                                if let Err(e) = store.record(&conn, record).await {
                                    log::warn!("failed to record retrieval entry: {e}");
                                }
                            });
                        }
                    }

                    return Ok(RunSuccess { sql, explanation, result, trace: attempts });
                }
            }
        }
    }

    /// `AnalyzeError` (§4.8): runs C7 and decides whether to loop back to
    /// `Generate` (clearing `last_sql`, narrowing `focused_tables`) or
    /// terminate in `Fail`.
    fn route_error(&self, state: &mut QueryState, error: &DbError, sql: &str, force_full_types: &mut bool) -> Next {
        let analysis = self.error_analyzer.analyze(error, sql, &state.snapshot, state.handle.dialect());

        if !analysis.should_retry || state.exhausted() {
            state.terminal = Some(if analysis.should_retry { Terminal::Exhausted } else { Terminal::Fatal });
            return Next::Fail(analysis);
        }

        state.attempt += 1;
        state.last_sql = None;
        state.last_error = Some(error.clone());

        if analysis.kind == ErrorKind::TypeMismatch && !analysis.mentioned_tables.is_empty() {
            *force_full_types = true;
            state.focused_tables = analysis.mentioned_tables.clone();
        } else if !analysis.suggested_tables.is_empty() {
            state.focused_tables = analysis.suggested_tables.clone();
        } else if !analysis.mentioned_tables.is_empty() {
            state.focused_tables = analysis.mentioned_tables.clone();
        }

        Next::Retry
    }
}

fn fail(analysis: ErrorAnalysis, attempts: Vec<AttemptRecord>, partial: PartialOutcome) -> RunFailure {
    RunFailure { kind: analysis.kind, message: analysis.hints.join("; "), attempts, partial }
}

fn cancelled_failure(attempts: Vec<AttemptRecord>, last_sql: Option<String>) -> RunFailure {
    RunFailure {
        kind: ErrorKind::Cancelled,
        message: "query cancelled".to_string(),
        attempts,
        partial: PartialOutcome { sql: last_sql, explanation: None },
    }
}

fn parse_generation(json: &serde_json::Value, allowed_keywords: &[String]) -> Result<(String, String), String> {
    let sql = json
        .get("sql")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "response did not contain a string \"sql\" field".to_string())?;
    let explanation = json.get("explanation").and_then(|v| v.as_str()).unwrap_or_default();

    let trimmed = sql.trim();
    let first_word = trimmed.split_whitespace().next().unwrap_or_default().to_uppercase();
    if !allowed_keywords.iter().any(|k| k.eq_ignore_ascii_case(&first_word)) {
        return Err(format!(
            "generated statement does not start with an allowed keyword ({}): {trimmed}",
            allowed_keywords.join(", ")
        ));
    }

    Ok((trimmed.to_string(), explanation.to_string()))
}

fn validate_sql(sql: &str, read_only: bool) -> Result<(), String> {
    if sql.trim().is_empty() {
        return Err("generated SQL is empty".to_string());
    }

    let statements: Vec<&str> = sql.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    if statements.len() != 1 {
        return Err(format!("expected exactly one SQL statement, found {}", statements.len()));
    }

    if read_only {
        let upper = sql.to_uppercase();
        if let Some(word) = READ_ONLY_FORBIDDEN.iter().find(|kw| contains_keyword(&upper, kw)) {
            return Err(format!("read-only mode forbids {word} statements"));
        }
    }

    Ok(())
}

fn contains_keyword(haystack: &str, keyword: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric() && c != '_').any(|tok| tok == *keyword)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_generation_rejects_disallowed_statements() {
        let json = serde_json::json!({"sql": "DELETE FROM customers", "explanation": "x"});
        let allowed: Vec<String> = DEFAULT_ALLOWED_KEYWORDS.iter().map(|s| s.to_string()).collect();
        assert!(parse_generation(&json, &allowed).is_err());
    }

    #[test]
    fn parse_generation_accepts_select() {
        let json = serde_json::json!({"sql": "SELECT 1", "explanation": "x"});
        let allowed: Vec<String> = DEFAULT_ALLOWED_KEYWORDS.iter().map(|s| s.to_string()).collect();
        assert!(parse_generation(&json, &allowed).is_ok());
    }

    #[test]
    fn validate_sql_rejects_multiple_statements() {
        assert!(validate_sql("SELECT 1; SELECT 2", true).is_err());
    }

    #[test]
    fn validate_sql_rejects_ddl_in_read_only_mode() {
        assert!(validate_sql("DROP TABLE customers", true).is_err());
    }

    #[test]
    fn validate_sql_accepts_plain_select() {
        assert!(validate_sql("SELECT * FROM customers", true).is_ok());
    }
}
