//! C3: the Context Budgeter. Picks a section-budget strategy from the
//! model's context window, renders the ontology/graph/retrieval/schema/error
//! sections within their caps, and assembles the final prompt in the order
//! fixed by §4.8: system, then (if non-empty) ontology resolution context,
//! then graph insights, then retrieval examples, then focused schema, then
//! the error-retry block (attempt > 0 only), then the user question, then
//! the JSON-response contract reminder.
//!
//! "conversation" in the strategy table (§4.3) is the combined
//! ontology+graph+retrieval block; "system" is the dialect+instruction
//! block; "reserved" covers the trailing question + JSON contract reminder.

use nlsql_core::config::Strategy;
use nlsql_core::{DbError, DialectFeatures, DialectIdioms, GraphInsights, Message, PastQuery, ResolutionResult, SchemaSnapshot};

pub const TRUNCATION_SUFFIX: &str = " ...(truncated)";
const ERROR_QUOTE_CAP_CHARS: usize = 120;
const JSON_CONTRACT_REMINDER: &str =
    "Respond with a single JSON object of exactly this shape: {\"sql\": string, \"explanation\": string}. No text outside the JSON.";

/// `ceil(chars / 4)`, with no model-specific tokenizer (§4.3).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub fn strategy_for_tokens(max_context_tokens: u32) -> Strategy {
    if max_context_tokens <= 3000 {
        Strategy::Concise
    } else if max_context_tokens <= 6000 {
        Strategy::Semi
    } else if max_context_tokens <= 10_000 {
        Strategy::Expanded
    } else {
        Strategy::Large
    }
}

/// One step down the table (§7's Budget-error degrade-and-retry-once rule).
pub fn degrade(strategy: Strategy) -> Strategy {
    match strategy {
        Strategy::Large => Strategy::Expanded,
        Strategy::Expanded => Strategy::Semi,
        Strategy::Semi => Strategy::Concise,
        Strategy::Concise => Strategy::Concise,
    }
}

struct SectionShares {
    system: f32,
    schema: f32,
    conversation: f32,
    error: f32,
    reserved: f32,
}

fn shares(strategy: Strategy) -> SectionShares {
    match strategy {
        Strategy::Concise => SectionShares { system: 0.15, schema: 0.40, conversation: 0.20, error: 0.15, reserved: 0.10 },
        Strategy::Semi => SectionShares { system: 0.12, schema: 0.45, conversation: 0.20, error: 0.13, reserved: 0.10 },
        Strategy::Expanded => SectionShares { system: 0.10, schema: 0.50, conversation: 0.20, error: 0.10, reserved: 0.10 },
        Strategy::Large => SectionShares { system: 0.08, schema: 0.55, conversation: 0.20, error: 0.10, reserved: 0.07 },
    }
}

struct SchemaDetail {
    types: bool,
    pk_fk_flags: bool,
    fk_targets: bool,
    sample_rows: bool,
}

fn schema_detail(strategy: Strategy) -> SchemaDetail {
    match strategy {
        Strategy::Concise => SchemaDetail { types: false, pk_fk_flags: false, fk_targets: false, sample_rows: false },
        Strategy::Semi => SchemaDetail { types: true, pk_fk_flags: true, fk_targets: false, sample_rows: false },
        Strategy::Expanded => SchemaDetail { types: true, pk_fk_flags: true, fk_targets: true, sample_rows: false },
        Strategy::Large => SchemaDetail { types: true, pk_fk_flags: true, fk_targets: true, sample_rows: true },
    }
}

fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if text.is_empty() {
        return String::new();
    }
    if max_tokens == 0 {
        return String::new();
    }
    let max_chars = max_tokens * 4;
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let suffix_chars = TRUNCATION_SUFFIX.chars().count();
    let keep = max_chars.saturating_sub(suffix_chars);
    let truncated: String = text.chars().take(keep).collect();
    format!("{truncated}{TRUNCATION_SUFFIX}")
}

fn render_table(table: &nlsql_core::TableInfo, detail: &SchemaDetail) -> String {
    let cols: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let mut s = c.name.clone();
            if detail.types {
                s.push(':');
                s.push_str(&c.data_type);
            }
            if detail.pk_fk_flags && c.is_primary_key {
                s.push_str("[PK]");
            }
            if detail.pk_fk_flags {
                if let Some(fk) = table.foreign_keys.iter().find(|fk| fk.column == c.name) {
                    if detail.fk_targets {
                        s.push_str(&format!("[FK->{}.{}]", fk.ref_table, fk.ref_column));
                    } else {
                        s.push_str("[FK]");
                    }
                }
            }
            s
        })
        .collect();

    let mut out = format!("{}: {}", table.table_name, cols.join(", "));
    if detail.sample_rows {
        for row in table.sample_rows.iter().take(3) {
            let values: Vec<String> = row.iter().map(|v| v.as_display_string()).collect();
            out.push_str(&format!("\n  sample: {}", values.join(", ")));
        }
    }
    out
}

fn render_schema_section(snapshot: &SchemaSnapshot, strategy: Strategy, force_full_types: bool) -> String {
    let mut detail = schema_detail(strategy);
    if force_full_types {
        detail.types = true;
    }
    snapshot.tables.iter().map(|t| render_table(t, &detail)).collect::<Vec<_>>().join("\n")
}

fn render_ontology_section(hits: &ResolutionResult) -> String {
    if hits.hints.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = hits
        .hints
        .iter()
        .map(|h| format!("- {}.{} (concept {}, property {}, confidence {:.2})", h.table, h.column, h.concept, h.property, h.confidence))
        .collect();
    format!("Ontology hints (confidence {:.2}):\n{}\n{}", hits.confidence, lines.join("\n"), hits.reasoning)
}

fn render_graph_section(insights: &GraphInsights) -> String {
    if insights.suggested_columns.is_empty() && insights.join_paths.is_empty() && insights.related_tables.is_empty() {
        return String::new();
    }
    let mut lines = Vec::new();
    for c in &insights.suggested_columns {
        lines.push(format!("- {}.{} (confidence {:.2})", c.table, c.column, c.confidence));
    }
    for p in &insights.join_paths {
        lines.push(format!("- join path: {}", p.tables.join(" -> ")));
    }
    if !insights.related_tables.is_empty() {
        lines.push(format!("- related tables: {}", insights.related_tables.join(", ")));
    }
    format!("Graph insights:\n{}", lines.join("\n"))
}

fn render_retrieval_section(past: &[PastQuery]) -> String {
    if past.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = past.iter().map(|p| format!("Q: {}\nSQL: {}", p.user_query, p.sql_query)).collect();
    format!("Similar past queries:\n{}", lines.join("\n\n"))
}

fn render_error_section(previous_sql: Option<&str>, previous_error: Option<&DbError>) -> String {
    match (previous_sql, previous_error) {
        (Some(sql), Some(err)) => {
            let message = err.to_string();
            let quoted: String = message.chars().take(ERROR_QUOTE_CAP_CHARS).collect();
            format!("The previous attempt failed.\nSQL: {sql}\nError: {quoted}")
        }
        _ => String::new(),
    }
}

fn system_prompt_text(idioms: &DialectIdioms) -> String {
    let mut text = format!(
        "You translate natural-language questions into a single read-only SQL statement (SELECT, WITH, SHOW, or EXPLAIN) for the target database. {}",
        idioms.prompt_rules
    );
    if idioms.features.contains(DialectFeatures::COMMON_TABLE_EXPRESSIONS) {
        text.push_str(" Common table expressions (WITH ...) are supported.");
    }
    if idioms.features.contains(DialectFeatures::WINDOW_FUNCTIONS) {
        text.push_str(" Window functions (OVER ...) are supported.");
    }
    if idioms.features.contains(DialectFeatures::JSON_FUNCTIONS) {
        text.push_str(" Native JSON functions are available for JSON-typed columns.");
    }
    text
}

/// Everything the budgeter needs to assemble one attempt's prompt. Built
/// fresh by the state machine at every `Generate` entry.
pub struct PromptContext<'a> {
    pub question: &'a str,
    pub dialect_idioms: &'a DialectIdioms,
    pub schema: &'a SchemaSnapshot,
    pub ontology_hits: &'a ResolutionResult,
    pub graph_hits: &'a GraphInsights,
    pub retrieval_hits: &'a [PastQuery],
    pub attempt: u32,
    pub previous_sql: Option<&'a str>,
    pub previous_error: Option<&'a DbError>,
    pub force_full_types: bool,
    pub focused_tables: &'a [String],
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub messages: Vec<Message>,
    pub estimated_tokens: usize,
    pub strategy: Strategy,
}

#[derive(Debug, Clone)]
pub struct BudgetExceeded {
    pub estimated_tokens: usize,
    pub max_tokens: usize,
}

pub struct ContextBudgeter {
    max_context_tokens: u32,
    strategy_override: Option<Strategy>,
}

impl ContextBudgeter {
    pub fn new(max_context_tokens: u32) -> Self {
        Self { max_context_tokens, strategy_override: None }
    }

    pub fn with_strategy_override(mut self, strategy: Strategy) -> Self {
        self.strategy_override = Some(strategy);
        self
    }

    pub fn maybe_with_strategy_override(self, strategy: Option<Strategy>) -> Self {
        match strategy {
            Some(s) => self.with_strategy_override(s),
            None => self,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy_override.unwrap_or_else(|| strategy_for_tokens(self.max_context_tokens))
    }

    pub fn max_tokens(&self) -> usize {
        self.max_context_tokens as usize
    }

    pub fn assemble(&self, ctx: &PromptContext<'_>) -> Result<AssembledPrompt, BudgetExceeded> {
        self.assemble_at(ctx, self.strategy())
    }

    /// Lets the state machine retry once at a degraded strategy when the
    /// caller's preferred strategy overflows the budget (§7).
    pub fn assemble_at(&self, ctx: &PromptContext<'_>, strategy: Strategy) -> Result<AssembledPrompt, BudgetExceeded> {
        let max_tokens = self.max_tokens();
        let shares = shares(strategy);

        let system_cap = (max_tokens as f32 * shares.system) as usize;
        let schema_cap = (max_tokens as f32 * shares.schema) as usize;
        let conversation_cap = (max_tokens as f32 * shares.conversation) as usize;
        let error_cap = (max_tokens as f32 * shares.error) as usize;
        let reserved_cap = (max_tokens as f32 * shares.reserved) as usize;

        let is_retry = ctx.attempt > 0;

        let system_text = truncate_to_tokens(&system_prompt_text(ctx.dialect_idioms), system_cap);

        let schema_for_section;
        let schema_ref: &SchemaSnapshot = if is_retry && !ctx.focused_tables.is_empty() {
            schema_for_section = ctx.schema.with_focused_tables(ctx.focused_tables);
            &schema_for_section
        } else {
            ctx.schema
        };
        let schema_text = truncate_to_tokens(&render_schema_section(schema_ref, strategy, ctx.force_full_types), schema_cap);

        let mut conversation_parts = Vec::new();
        let ontology_text = render_ontology_section(ctx.ontology_hits);
        if !ontology_text.is_empty() {
            conversation_parts.push(ontology_text);
        }
        let graph_text = render_graph_section(ctx.graph_hits);
        if !graph_text.is_empty() {
            conversation_parts.push(graph_text);
        }
        if !is_retry {
            let retrieval_text = render_retrieval_section(ctx.retrieval_hits);
            if !retrieval_text.is_empty() {
                conversation_parts.push(retrieval_text);
            }
        }
        let conversation_text = truncate_to_tokens(&conversation_parts.join("\n\n"), conversation_cap);

        let error_text = if is_retry {
            truncate_to_tokens(&render_error_section(ctx.previous_sql, ctx.previous_error), error_cap)
        } else {
            String::new()
        };

        let question_and_contract = format!("{}\n\n{}", ctx.question, JSON_CONTRACT_REMINDER);
        let reserved_text = truncate_to_tokens(&question_and_contract, reserved_cap);

        let mut system_sections = vec![system_text];
        if !conversation_text.is_empty() {
            system_sections.push(conversation_text);
        }
        if !schema_text.is_empty() {
            system_sections.push(format!("Schema:\n{schema_text}"));
        }
        if !error_text.is_empty() {
            system_sections.push(error_text);
        }

        let messages = vec![Message::system(system_sections.join("\n\n")), Message::user(reserved_text)];

        let estimated_tokens: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
        if estimated_tokens > max_tokens {
            return Err(BudgetExceeded { estimated_tokens, max_tokens });
        }

        Ok(AssembledPrompt { messages, estimated_tokens, strategy })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nlsql_test_support::fixtures::sample_schema;

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn strategy_boundaries_match_the_table() {
        assert_eq!(strategy_for_tokens(3000), Strategy::Concise);
        assert_eq!(strategy_for_tokens(3001), Strategy::Semi);
        assert_eq!(strategy_for_tokens(6000), Strategy::Semi);
        assert_eq!(strategy_for_tokens(6001), Strategy::Expanded);
        assert_eq!(strategy_for_tokens(10_000), Strategy::Expanded);
        assert_eq!(strategy_for_tokens(10_001), Strategy::Large);
    }

    #[test]
    fn degrade_steps_down_one_level_and_floors_at_concise() {
        assert_eq!(degrade(Strategy::Large), Strategy::Expanded);
        assert_eq!(degrade(Strategy::Expanded), Strategy::Semi);
        assert_eq!(degrade(Strategy::Semi), Strategy::Concise);
        assert_eq!(degrade(Strategy::Concise), Strategy::Concise);
    }

    #[test]
    fn truncation_appends_the_literal_suffix() {
        let long = "x".repeat(100);
        let truncated = truncate_to_tokens(&long, 10);
        assert!(truncated.ends_with(TRUNCATION_SUFFIX));
        assert!(truncated.len() < long.len());
    }

    #[test]
    fn retry_prompt_is_strictly_smaller_than_attempt_zero() {
        let schema = sample_schema();
        let idioms = DialectIdioms {
            limit_style: nlsql_core::LimitStyle::Limit,
            current_timestamp: "NOW()",
            concat_operator: "||",
            placeholder_style: nlsql_core::PlaceholderStyle::DollarNumber,
            prompt_rules: "use standard SQL",
            features: nlsql_core::DialectFeatures::empty(),
        };
        let budgeter = ContextBudgeter::new(6000);
        let ontology = ResolutionResult::empty();
        let graph = GraphInsights::empty();
        let retrieval = vec![nlsql_test_support::fixtures::sample_past_query(nlsql_core::Dialect::Postgres)];

        let attempt0_ctx = PromptContext {
            question: "how many customers do we have",
            dialect_idioms: &idioms,
            schema: &schema,
            ontology_hits: &ontology,
            graph_hits: &graph,
            retrieval_hits: &retrieval,
            attempt: 0,
            previous_sql: None,
            previous_error: None,
            force_full_types: false,
            focused_tables: &[],
        };
        let attempt0 = budgeter.assemble(&attempt0_ctx).unwrap();

        let focused = vec!["customers".to_string()];
        let prev_error = DbError::syntax_error("relation \"custmers\" does not exist");
        let retry_ctx = PromptContext {
            attempt: 1,
            previous_sql: Some("SELECT * FROM custmers"),
            previous_error: Some(&prev_error),
            focused_tables: &focused,
            ..attempt0_ctx
        };
        let retry = budgeter.assemble(&retry_ctx).unwrap();

        assert!(retry.estimated_tokens < attempt0.estimated_tokens);
    }

    #[test]
    fn force_full_types_overrides_concise_strategy() {
        let schema = sample_schema();
        let text_without = render_schema_section(&schema, Strategy::Concise, false);
        let text_with = render_schema_section(&schema, Strategy::Concise, true);
        assert!(!text_without.contains(':'));
        assert!(text_with.contains(':'));
    }

    #[test]
    fn every_strategy_stays_within_its_own_budget() {
        let schema = sample_schema();
        let idioms = DialectIdioms {
            limit_style: nlsql_core::LimitStyle::Limit,
            current_timestamp: "NOW()",
            concat_operator: "||",
            placeholder_style: nlsql_core::PlaceholderStyle::QuestionMark,
            prompt_rules: "use standard SQL",
            features: nlsql_core::DialectFeatures::empty(),
        };
        let ontology = ResolutionResult::empty();
        let graph = GraphInsights::empty();

        for &max_tokens in &[2000u32, 4000, 8000, 12000] {
            let budgeter = ContextBudgeter::new(max_tokens);
            let ctx = PromptContext {
                question: "list all vendors",
                dialect_idioms: &idioms,
                schema: &schema,
                ontology_hits: &ontology,
                graph_hits: &graph,
                retrieval_hits: &[],
                attempt: 0,
                previous_sql: None,
                previous_error: None,
                force_full_types: false,
                focused_tables: &[],
            };
            let assembled = budgeter.assemble(&ctx).unwrap();
            assert!(assembled.estimated_tokens <= max_tokens as usize);
        }
    }
}
