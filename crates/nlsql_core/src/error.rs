use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured detail carried by most `DbError` variants, modeled on what a
/// database actually reports: a message plus optional detail/hint/code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormattedError {
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    pub code: Option<String>,
}

impl FormattedError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for FormattedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, " (detail: {detail})")?;
        }
        if let Some(code) = &self.code {
            write!(f, " [{code}]")?;
        }
        Ok(())
    }
}

/// Closed error taxonomy surfaced by a `DbAdapter` (§4.1).
///
/// Every driver maps its native error representation onto one of these
/// variants rather than leaking a driver-specific error type upward.
#[derive(Debug, Error, Clone)]
pub enum DbError {
    #[error("connection failed: {0}")]
    ConnectionError(FormattedError),

    #[error("authentication failed: {0}")]
    AuthError(FormattedError),

    #[error("permission denied: {0}")]
    PermissionError(FormattedError),

    #[error("object not found: {0}")]
    ObjectNotFoundError(FormattedError),

    #[error("type mismatch: {0}")]
    TypeMismatchError(FormattedError),

    #[error("syntax error: {0}")]
    SyntaxError(FormattedError),

    #[error("result too large: {0}")]
    ResultTooLargeError(FormattedError),

    #[error("query cancelled")]
    Cancelled,

    #[error("query timed out")]
    Timeout,

    #[error("{0}")]
    Other(FormattedError),
}

/// Closed error-kind set (§7), shared by `DbError` and the orchestrator's
/// own error type so `ErrorAnalyzer` can match on one vocabulary regardless
/// of which layer raised the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConnectionError,
    AuthError,
    PermissionError,
    ObjectNotFound,
    TypeMismatch,
    SyntaxError,
    Cancelled,
    Timeout,
    Budget,
    ProviderError,
    Other,
}

impl DbError {
    pub fn connection_error(msg: impl Into<String>) -> Self {
        Self::ConnectionError(FormattedError::new(msg))
    }

    pub fn auth_error(msg: impl Into<String>) -> Self {
        Self::AuthError(FormattedError::new(msg))
    }

    pub fn permission_error(msg: impl Into<String>) -> Self {
        Self::PermissionError(FormattedError::new(msg))
    }

    pub fn object_not_found(msg: impl Into<String>) -> Self {
        Self::ObjectNotFoundError(FormattedError::new(msg))
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatchError(FormattedError::new(msg))
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError(FormattedError::new(msg))
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(FormattedError::new(msg))
    }

    /// Access the structured detail, if this variant carries one.
    pub fn formatted(&self) -> Option<&FormattedError> {
        match self {
            Self::ConnectionError(f)
            | Self::AuthError(f)
            | Self::PermissionError(f)
            | Self::ObjectNotFoundError(f)
            | Self::TypeMismatchError(f)
            | Self::SyntaxError(f)
            | Self::ResultTooLargeError(f)
            | Self::Other(f) => Some(f),
            Self::Cancelled | Self::Timeout => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionError(_) => ErrorKind::ConnectionError,
            Self::AuthError(_) => ErrorKind::AuthError,
            Self::PermissionError(_) => ErrorKind::PermissionError,
            Self::ObjectNotFoundError(_) => ErrorKind::ObjectNotFound,
            Self::TypeMismatchError(_) => ErrorKind::TypeMismatch,
            Self::SyntaxError(_) => ErrorKind::SyntaxError,
            Self::ResultTooLargeError(_) => ErrorKind::Other,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout => ErrorKind::Timeout,
            Self::Other(_) => ErrorKind::Other,
        }
    }
}
