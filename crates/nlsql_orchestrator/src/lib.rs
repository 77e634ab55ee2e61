//! Orchestrates natural-language-to-SQL generation: assembles a bounded
//! prompt from schema, ontology, graph, and retrieval context (C3-C6),
//! drives the generate/validate/execute/retry state machine (C7-C8), and
//! applies live configuration changes (C9) — all behind the single `run`
//! entrypoint (§6).

pub mod budgeter;
pub mod error;
pub mod error_analyzer;
pub mod reload;
pub mod schema_cache;
pub mod state_machine;

pub use budgeter::{degrade, estimate_tokens, strategy_for_tokens, AssembledPrompt, BudgetExceeded, ContextBudgeter, PromptContext};
pub use error::OrchestratorError;
pub use error_analyzer::{ErrorAnalysis, ErrorAnalyzer, TypeInfo};
pub use reload::{GenerateSnapshot, ReloadCoordinator};
pub use schema_cache::SchemaCache;
pub use state_machine::{AttemptRecord, Orchestrator, PartialOutcome, RunFailure, RunOptions, RunSuccess};
