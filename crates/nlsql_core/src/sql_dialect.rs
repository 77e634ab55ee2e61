use crate::Value;
use bitflags::bitflags;

bitflags! {
    /// SQL features a dialect supports, consulted by the Context Budgeter
    /// to shape the system-prompt paragraph (§4.3) and by the Error
    /// Analyzer when suggesting alternative syntax (§4.7).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DialectFeatures: u32 {
        const COMMON_TABLE_EXPRESSIONS = 1 << 0;
        const WINDOW_FUNCTIONS = 1 << 1;
        const RETURNING_CLAUSE = 1 << 2;
        const JSON_FUNCTIONS = 1 << 3;
        const UPSERT = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` placeholders (SQLite, MySQL).
    QuestionMark,
    /// `$1`, `$2`, etc. (PostgreSQL).
    DollarNumber,
    /// `:1`, `:2`, etc. (Oracle).
    ColonNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitStyle {
    /// `LIMIT n` (PostgreSQL, MySQL, SQLite).
    Limit,
    /// `WHERE ROWNUM <= n` (Oracle, legacy form).
    RowNum,
    /// `FETCH FIRST n ROWS ONLY` (Oracle 12c+, ANSI SQL).
    FetchFirst,
}

/// Dialect-specific SQL idioms declared by a driver and consumed by the
/// Context Budgeter (C3) to write the dialect paragraph of the system
/// prompt, and by the Error Analyzer (C7) to suggest cast syntax (§4.1, §4.3).
#[derive(Debug, Clone)]
pub struct DialectIdioms {
    pub limit_style: LimitStyle,
    pub current_timestamp: &'static str,
    pub concat_operator: &'static str,
    pub placeholder_style: PlaceholderStyle,
    /// Human-readable system-prompt rule, emitted verbatim (§4.3).
    pub prompt_rules: &'static str,
    pub features: DialectFeatures,
}

/// Database-specific SQL syntax (quoting, escaping, literals).
pub trait SqlDialect: Send + Sync {
    fn quote_identifier(&self, name: &str) -> String;

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String;

    fn value_to_literal(&self, value: &Value) -> String;

    fn escape_string(&self, s: &str) -> String;

    fn idioms(&self) -> &DialectIdioms;

    /// Build the `LIMIT`/`ROWNUM`/`FETCH FIRST` suffix for `n` rows,
    /// following this dialect's `LimitStyle` (§4.1).
    fn limit_clause(&self, n: u32) -> String {
        match self.idioms().limit_style {
            LimitStyle::Limit => format!("LIMIT {n}"),
            LimitStyle::RowNum => format!("WHERE ROWNUM <= {n}"),
            LimitStyle::FetchFirst => format!("FETCH FIRST {n} ROWS ONLY"),
        }
    }

    /// Cast syntax suggested by the Error Analyzer for a type mismatch (§4.7).
    fn cast_syntax(&self, column: &str, target_type: &str) -> String {
        format!("CAST({column} AS {target_type})")
    }
}

/// Standard ANSI SQL literal formatting, reused by every dialect's
/// `value_to_literal`/`escape_string` implementation.
pub fn default_value_to_literal(value: &Value, escape: impl Fn(&str) -> String) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", escape(s)),
        Value::Bytes(b) => {
            let hex: String = b.iter().map(|byte| format!("{byte:02x}")).collect();
            format!("X'{hex}'")
        }
        Value::Json(s) => format!("'{}'", escape(s)),
        Value::Decimal(s) => s.clone(),
        Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .map(|v| default_value_to_literal(v, &escape))
                .collect();
            format!("ARRAY[{}]", parts.join(", "))
        }
    }
}

pub fn default_escape_string(s: &str) -> String {
    s.replace('\'', "''")
}
