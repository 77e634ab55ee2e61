use nlsql_core::traits::LlmError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OntologyError {
    #[error("ontology generation failed: {0}")]
    Llm(#[from] LlmError),

    #[error("ontology file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ontology YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("ontology LLM response was malformed: {0}")]
    MalformedResponse(String),

    #[error("ontology JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
