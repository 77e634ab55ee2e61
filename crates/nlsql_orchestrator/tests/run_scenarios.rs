//! End-to-end exercises of `Orchestrator::run` against the fakes in
//! `nlsql_test_support`: one test per representative scenario the state
//! machine must handle (ontology-assisted generation, type-mismatch retry,
//! near-neighbor table suggestion, retrieval hits, and a disabled
//! subsystem's absence from the assembled prompt).

use nlsql_core::{ColumnMeta, ConnectionConfig, ConnectionHandle, DbError, NlsqlConfig, ResultSet, Value};
use nlsql_ontology::save_yaml;
use nlsql_orchestrator::{Orchestrator, RunOptions};
use nlsql_retrieval::{HashingEmbedder, InProcessVectorBackend, RetrievalStore};
use nlsql_test_support::{fixtures, FakeDriver, FakeLlmProvider};
use std::sync::Arc;

/// Ontology generation is LLM-driven; tests that don't preload a static
/// ontology into the cache must disable it so `FakeLlmProvider`'s scripted
/// SQL-generation responses aren't consumed by the three-phase ontology
/// pipeline instead.
fn no_ontology_config() -> NlsqlConfig {
    let mut config = NlsqlConfig::default();
    config.ontology.enabled = false;
    config
}

fn handle() -> ConnectionHandle {
    ConnectionHandle::new(ConnectionConfig::postgres("localhost", 5432, "app", "app_user"))
}

fn vendor_schema() -> nlsql_core::SchemaSnapshot {
    let table = nlsql_core::TableInfo {
        full_name: "purchase_order".to_string(),
        table_name: "purchase_order".to_string(),
        columns: vec![
            fixtures::column("vendorgroup", "character varying", false),
            fixtures::column("country", "character varying", false),
            fixtures::column("totalinrpo", "numeric", false),
        ],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
        row_count: Some(10),
        sample_rows: Vec::new(),
    };
    nlsql_core::SchemaSnapshot::new(
        "app",
        nlsql_core::ConnectionInfo { host: "localhost".to_string(), port: 5432, database: "app".to_string() },
        vec![table],
    )
}

fn result_with_rows(column_name: &str, values: Vec<Value>) -> ResultSet {
    ResultSet {
        columns: vec![ColumnMeta { name: column_name.to_string(), type_name: "text".to_string() }],
        rows: values.into_iter().map(|v| vec![v]).collect(),
        execution_time: std::time::Duration::ZERO,
    }
}

/// S1: a vendor-name question resolves through the ontology to
/// `purchase_order.vendorgroup`, and the prompt the fake LLM receives
/// carries that column name in its recommendation section.
#[tokio::test]
async fn vendor_name_query_resolves_through_ontology() {
    let schema = vendor_schema();
    let sql = "SELECT DISTINCT vendorgroup FROM purchase_order;";

    let driver = Arc::new(
        FakeDriver::new()
            .with_schema(schema.clone())
            .with_query_result(sql, result_with_rows("vendorgroup", vec![Value::Text("Acme".to_string())])),
    );
    let llm = Arc::new(
        FakeLlmProvider::new()
            .with_response(serde_json::json!({"sql": sql, "explanation": "distinct vendor groups"}).to_string()),
    );

    let orchestrator = Orchestrator::new(driver.clone(), llm.clone(), NlsqlConfig::default(), None);

    let mut ontology = nlsql_core::Ontology::empty(schema.fingerprint());
    ontology.concepts.push(nlsql_core::Concept {
        name: "Vendor".to_string(),
        description: "a supplier of goods".to_string(),
        tables: vec!["purchase_order".to_string()],
        synonyms: vec!["supplier".to_string()],
    });
    ontology.properties.push(nlsql_core::Property {
        concept: "Vendor".to_string(),
        property_name: "vendorname".to_string(),
        table: "purchase_order".to_string(),
        column: "vendorgroup".to_string(),
        semantic_meaning: "the vendor's display name".to_string(),
        confidence: 0.9,
    });

    let yaml_path = std::env::temp_dir().join(format!("nlsql_ontology_test_{}.yml", uuid::Uuid::new_v4()));
    save_yaml(&ontology, &yaml_path).expect("save ontology");
    let connection_id = handle().connection_id().to_string();
    orchestrator
        .reload_coordinator()
        .snapshot()
        .ontology_store
        .load_static(&connection_id, &yaml_path)
        .await
        .expect("load ontology");
    let _ = std::fs::remove_file(&yaml_path);

    let outcome = orchestrator.run(handle(), "find all unique vendor names", RunOptions::default()).await;

    let success = outcome.expect("run should succeed");
    assert_eq!(success.sql, sql);

    let last_prompt = llm.stats().last_messages;
    let joined: String = last_prompt.iter().map(|m| m.content.clone()).collect::<Vec<_>>().join("\n");
    assert!(joined.contains("vendorgroup"), "prompt should surface the resolved column: {joined}");
}

/// S2: a type mismatch on the first attempt narrows the retry's focused
/// tables and the second, cast-bearing attempt succeeds.
#[tokio::test]
async fn type_mismatch_retries_with_a_cast() {
    let web_user = nlsql_core::TableInfo {
        full_name: "web_user".to_string(),
        table_name: "web_user".to_string(),
        columns: vec![fixtures::primary_key_column("id", "integer")],
        primary_key: vec!["id".to_string()],
        foreign_keys: Vec::new(),
        row_count: None,
        sample_rows: Vec::new(),
    };
    let wue = nlsql_core::TableInfo {
        full_name: "wue".to_string(),
        table_name: "wue".to_string(),
        columns: vec![fixtures::column("user_staffno", "character varying", false)],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
        row_count: None,
        sample_rows: Vec::new(),
    };
    let schema = nlsql_core::SchemaSnapshot::new(
        "app",
        nlsql_core::ConnectionInfo { host: "localhost".to_string(), port: 5432, database: "app".to_string() },
        vec![web_user, wue],
    );

    let bad_sql = "SELECT * FROM web_user JOIN wue ON web_user.id = wue.user_staffno";
    let good_sql = "SELECT * FROM web_user JOIN wue ON web_user.id = CAST(wue.user_staffno AS INTEGER)";

    let driver = Arc::new(
        FakeDriver::new()
            .with_schema(schema)
            .with_query_error(bad_sql, DbError::type_mismatch("operator does not exist: integer = character varying"))
            .with_query_result(good_sql, fixtures::empty_result()),
    );
    let llm = Arc::new(
        FakeLlmProvider::new()
            .with_response(serde_json::json!({"sql": bad_sql, "explanation": "join on staff number"}).to_string())
            .with_response(serde_json::json!({"sql": good_sql, "explanation": "join with explicit cast"}).to_string()),
    );

    let orchestrator = Orchestrator::new(driver.clone(), llm, no_ontology_config(), None);
    let outcome = orchestrator.run(handle(), "join user to workflow extension by staff number", RunOptions::default()).await;

    let success = outcome.expect("second attempt should succeed");
    assert_eq!(success.sql, good_sql);
    assert_eq!(success.trace.len(), 2, "the failed first attempt and the successful retry should both be recorded");
    assert!(success.trace[0].error.is_some());
    assert!(success.trace[1].error.is_none());

    let stats = driver.stats();
    assert_eq!(stats.executed_sql, vec![bad_sql.to_string(), good_sql.to_string()]);
}

/// S4: a reference to a non-existent table on the first attempt is
/// corrected to its near-neighbor on the retry.
#[tokio::test]
async fn unknown_table_retries_with_suggested_neighbor() {
    let table = nlsql_core::TableInfo {
        full_name: "user_role_permissions".to_string(),
        table_name: "user_role_permissions".to_string(),
        columns: vec![fixtures::column("role".to_string(), "character varying", false)],
        primary_key: Vec::new(),
        foreign_keys: Vec::new(),
        row_count: None,
        sample_rows: Vec::new(),
    };
    let schema = nlsql_core::SchemaSnapshot::new(
        "app",
        nlsql_core::ConnectionInfo { host: "localhost".to_string(), port: 5432, database: "app".to_string() },
        vec![table],
    );

    let bad_sql = "SELECT * FROM role_permission";
    let good_sql = "SELECT * FROM user_role_permissions";

    let driver = Arc::new(
        FakeDriver::new()
            .with_schema(schema)
            .with_query_error(bad_sql, DbError::object_not_found("relation \"role_permission\" does not exist"))
            .with_query_result(good_sql, fixtures::empty_result()),
    );
    let llm = Arc::new(
        FakeLlmProvider::new()
            .with_response(serde_json::json!({"sql": bad_sql, "explanation": "list role permissions"}).to_string())
            .with_response(serde_json::json!({"sql": good_sql, "explanation": "list role permissions"}).to_string()),
    );

    let orchestrator = Orchestrator::new(driver, llm, no_ontology_config(), None);
    let outcome = orchestrator.run(handle(), "list every role permission", RunOptions::default()).await;

    let success = outcome.expect("retry against the suggested table should succeed");
    assert_eq!(success.sql, good_sql);
}

/// S5: a recorded past (question, SQL) pair surfaces as a retrieval hit for
/// a semantically close rephrasing, with similarity at or above the default
/// threshold.
#[tokio::test]
async fn similar_past_query_surfaces_as_a_retrieval_hit() {
    let embedder = Arc::new(HashingEmbedder::default());
    let backend = Arc::new(InProcessVectorBackend::new());
    let retrieval = Arc::new(RetrievalStore::new(backend, embedder, "past_queries"));

    let recorded = nlsql_core::PastQuery::new("list all vendors", "SELECT * FROM vendors", nlsql_core::Dialect::Postgres, true);
    retrieval.record("app_localhost_5432", recorded).await.expect("record");

    let hits = retrieval
        .search("please list all vendors now", &nlsql_retrieval::SearchFilter::new(nlsql_core::Dialect::Postgres), 5, None)
        .await
        .expect("search");

    assert!(!hits.is_empty(), "a close rephrasing should surface the recorded pair");
    assert_eq!(hits[0].sql_query, "SELECT * FROM vendors");
}

/// S6: disabling ontology via the reload coordinator takes effect on the
/// very next query, and the prompt the LLM receives carries no ontology
/// recommendation section.
#[tokio::test]
async fn disabling_ontology_removes_it_from_the_next_prompt() {
    let schema = fixtures::sample_schema();
    let sql = "SELECT name FROM customers";

    let driver = Arc::new(FakeDriver::new().with_schema(schema.clone()).with_query_result(sql, fixtures::empty_result()));
    let llm = Arc::new(
        FakeLlmProvider::new().with_response(serde_json::json!({"sql": sql, "explanation": "customer names"}).to_string()),
    );

    let orchestrator = Orchestrator::new(driver, llm.clone(), NlsqlConfig::default(), None);

    let ontology = fixtures::sample_ontology(schema.fingerprint());
    let yaml_path = std::env::temp_dir().join(format!("nlsql_ontology_test_{}.yml", uuid::Uuid::new_v4()));
    save_yaml(&ontology, &yaml_path).expect("save ontology");
    let connection_id = handle().connection_id().to_string();
    orchestrator
        .reload_coordinator()
        .snapshot()
        .ontology_store
        .load_static(&connection_id, &yaml_path)
        .await
        .expect("load ontology");
    let _ = std::fs::remove_file(&yaml_path);

    let mut config = orchestrator.reload_coordinator().config();
    config.ontology.enabled = false;
    orchestrator.reload_coordinator().apply(config);

    orchestrator.run(handle(), "what are the customer names", RunOptions::default()).await.expect("run should succeed");

    let last_prompt = llm.stats().last_messages;
    let joined: String = last_prompt.iter().map(|m| m.content.clone()).collect::<Vec<_>>().join("\n");
    assert!(!joined.to_lowercase().contains("ontology"), "disabled ontology must not appear in the prompt: {joined}");
}
