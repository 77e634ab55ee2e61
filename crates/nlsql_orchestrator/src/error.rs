//! The orchestrator's own error type (§7). `DbError` covers everything C1
//! can raise; this adds the two kinds only the orchestrator itself raises —
//! `Budget` (prompt still over the cap after one strategy degrade) and
//! `ProviderError` (the LLM provider itself failed) — and carries the full
//! `ErrorKind` taxonomy through.

use nlsql_core::{DbError, ErrorKind, LlmError};
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum OrchestratorError {
    #[error("connection failed: {0}")]
    ConnectionError(String),
    #[error("authentication failed: {0}")]
    AuthError(String),
    #[error("permission denied: {0}")]
    PermissionError(String),
    #[error("object not found: {0}")]
    ObjectNotFound(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("syntax error: {0}")]
    SyntaxError(String),
    #[error("query cancelled")]
    Cancelled,
    #[error("query timed out")]
    Timeout,
    #[error("prompt still exceeds the token budget after degrading strategy: {0}")]
    Budget(String),
    #[error("llm provider error: {0}")]
    ProviderError(String),
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionError(_) => ErrorKind::ConnectionError,
            Self::AuthError(_) => ErrorKind::AuthError,
            Self::PermissionError(_) => ErrorKind::PermissionError,
            Self::ObjectNotFound(_) => ErrorKind::ObjectNotFound,
            Self::TypeMismatch(_) => ErrorKind::TypeMismatch,
            Self::SyntaxError(_) => ErrorKind::SyntaxError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout => ErrorKind::Timeout,
            Self::Budget(_) => ErrorKind::Budget,
            Self::ProviderError(_) => ErrorKind::ProviderError,
            Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Kinds C7 never retries regardless of attempts remaining (§7).
    pub fn is_retriable_kind(&self) -> bool {
        !matches!(self, Self::AuthError(_) | Self::PermissionError(_))
    }

    pub fn budget(msg: impl Into<String>) -> Self {
        Self::Budget(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

impl From<DbError> for OrchestratorError {
    fn from(err: DbError) -> Self {
        match err.kind() {
            ErrorKind::ConnectionError => Self::ConnectionError(err.to_string()),
            ErrorKind::AuthError => Self::AuthError(err.to_string()),
            ErrorKind::PermissionError => Self::PermissionError(err.to_string()),
            ErrorKind::ObjectNotFound => Self::ObjectNotFound(err.to_string()),
            ErrorKind::TypeMismatch => Self::TypeMismatch(err.to_string()),
            ErrorKind::SyntaxError => Self::SyntaxError(err.to_string()),
            ErrorKind::Cancelled => Self::Cancelled,
            ErrorKind::Timeout => Self::Timeout,
            ErrorKind::Budget | ErrorKind::ProviderError | ErrorKind::Other => Self::Other(err.to_string()),
        }
    }
}

impl From<LlmError> for OrchestratorError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout => Self::Timeout,
            LlmError::Cancelled => Self::Cancelled,
            LlmError::ProviderError(msg) => Self::ProviderError(msg),
            LlmError::InvalidResponse(msg) => Self::ProviderError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_permission_are_not_retriable() {
        assert!(!OrchestratorError::AuthError("x".into()).is_retriable_kind());
        assert!(!OrchestratorError::PermissionError("x".into()).is_retriable_kind());
        assert!(OrchestratorError::Timeout.is_retriable_kind());
    }

    #[test]
    fn kind_maps_budget_and_provider_error_correctly() {
        assert_eq!(OrchestratorError::budget("over").kind(), ErrorKind::Budget);
        assert_eq!(OrchestratorError::ProviderError("x".into()).kind(), ErrorKind::ProviderError);
    }
}
