use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Concise,
    Semi,
    Expanded,
    Large,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    pub max_context_tokens: u32,
    pub max_output_tokens: u32,
    /// Forces a strategy regardless of `max_context_tokens` (§4.3, §4.9).
    pub strategy_override: Option<Strategy>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
            max_context_tokens: 6000,
            max_output_tokens: 1024,
            strategy_override: None,
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologyConfig {
    pub enabled: bool,
    #[serde(default = "default_max_concepts")]
    pub max_concepts: u32,
    pub static_file: Option<PathBuf>,
    #[serde(default)]
    pub persist_yaml: bool,
    #[serde(default)]
    pub persist_owl: bool,
}

fn default_max_concepts() -> u32 {
    20
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concepts: default_max_concepts(),
            static_file: None,
            persist_yaml: false,
            persist_owl: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    pub enabled: bool,
    #[serde(default = "default_max_join_depth")]
    pub max_join_depth: u32,
    /// When absent, the in-process `petgraph` backend is used (§4.5).
    pub external_backend_url: Option<String>,
}

fn default_max_join_depth() -> u32 {
    2
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_join_depth: default_max_join_depth(),
            external_backend_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub enabled: bool,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    pub embedding_model: String,
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_top_k() -> u32 {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            similarity_threshold: default_similarity_threshold(),
            top_k: default_top_k(),
            embedding_model: "none".to_string(),
        }
    }
}

/// Single mutable configuration document (§6). `nlsql_orchestrator`'s
/// Reload Coordinator (C9) is the only mutator at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NlsqlConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub ontology: OntologyConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

/// Loads/saves `NlsqlConfig` from the user's config directory.
pub struct NlsqlConfigStore {
    path: PathBuf,
}

impl NlsqlConfigStore {
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        let app_dir = config_dir.join("nlsql");
        fs::create_dir_all(&app_dir)?;

        Ok(Self { path: app_dir.join("config.json") })
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn load(&self) -> Result<NlsqlConfig, ConfigError> {
        if !self.path.exists() {
            return Ok(NlsqlConfig::default());
        }

        let content = fs::read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn save(&self, config: &NlsqlConfig) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(&self.path, content)?;
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_json() {
        let config = NlsqlConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: NlsqlConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.llm.max_context_tokens, config.llm.max_context_tokens);
    }
}
