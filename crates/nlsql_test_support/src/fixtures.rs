use nlsql_core::{
    ColumnInfo, ColumnMeta, Concept, ConnectionInfo, Dialect, ForeignKeyRef, Ontology, PastQuery,
    Property, ResultSet, SchemaSnapshot, TableInfo, Value,
};

pub fn column(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> ColumnInfo {
    ColumnInfo {
        name: name.into(),
        data_type: data_type.into(),
        is_nullable: nullable,
        is_primary_key: false,
        default_value: None,
    }
}

pub fn primary_key_column(name: impl Into<String>, data_type: impl Into<String>) -> ColumnInfo {
    ColumnInfo {
        name: name.into(),
        data_type: data_type.into(),
        is_nullable: false,
        is_primary_key: true,
        default_value: None,
    }
}

/// A small two-table schema (`customers`, `orders`) with one foreign key,
/// representative enough to exercise ontology/graph resolution end to end.
pub fn sample_schema() -> SchemaSnapshot {
    let customers = TableInfo {
        full_name: "customers".to_string(),
        table_name: "customers".to_string(),
        columns: vec![
            primary_key_column("id", "integer"),
            column("name", "character varying", false),
            column("email", "character varying", true),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: Vec::new(),
        row_count: Some(120),
        sample_rows: vec![vec![Value::Int(1), Value::Text("Ada Lovelace".to_string()), Value::Text("ada@example.com".to_string())]],
    };

    let mut orders = TableInfo {
        full_name: "orders".to_string(),
        table_name: "orders".to_string(),
        columns: vec![
            primary_key_column("id", "integer"),
            column("customer_id", "integer", false),
            column("total_cents", "integer", false),
            column("placed_at", "timestamp", false),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![ForeignKeyRef {
            column: "customer_id".to_string(),
            ref_table: "customers".to_string(),
            ref_column: "id".to_string(),
        }],
        row_count: Some(540),
        sample_rows: Vec::new(),
    };
    orders.sample_rows.push(vec![Value::Int(1), Value::Int(1), Value::Int(4200), Value::Text("2026-01-02 10:00:00".to_string())]);

    SchemaSnapshot::new(
        "app",
        ConnectionInfo { host: "localhost".to_string(), port: 5432, database: "app".to_string() },
        vec![customers, orders],
    )
}

pub fn empty_result() -> ResultSet {
    ResultSet::empty()
}

pub fn single_row_result(column_name: impl Into<String>, value: Value) -> ResultSet {
    ResultSet {
        columns: vec![ColumnMeta { name: column_name.into(), type_name: "text".to_string() }],
        rows: vec![vec![value]],
        execution_time: std::time::Duration::ZERO,
    }
}

/// A minimal ontology over `sample_schema()`, grounded on the `customers`
/// and `orders` tables' actual columns.
pub fn sample_ontology(schema_fingerprint: impl Into<String>) -> Ontology {
    let mut ontology = Ontology::empty(schema_fingerprint);
    ontology.concepts.push(Concept {
        name: "customer".to_string(),
        description: "a person who places orders".to_string(),
        tables: vec!["customers".to_string()],
        synonyms: vec!["client".to_string(), "buyer".to_string()],
    });
    ontology.properties.push(Property {
        concept: "customer".to_string(),
        property_name: "name".to_string(),
        table: "customers".to_string(),
        column: "name".to_string(),
        semantic_meaning: "the customer's full name".to_string(),
        confidence: 0.9,
    });
    ontology
}

pub fn sample_past_query(dialect: Dialect) -> PastQuery {
    PastQuery::new("how many customers do we have", "SELECT COUNT(*) FROM customers", dialect, true)
}
