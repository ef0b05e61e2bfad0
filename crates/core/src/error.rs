//! Error types for the Duet domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each pipeline stage has its own error enum; the top-level [`Error`] wraps
//! them and maps every failure onto one of the seven [`ErrorKind`]s the
//! session reports back to the user.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kinds of failure a pipeline run can end in.
///
/// Every kind is recovered at the pipeline boundary and surfaced as a
/// system annotation turn; none of them takes the host process down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFoundEdit,
    AmbiguousEdit,
    StructureError,
    SyntaxError,
    ReloadError,
    GatewayError,
    ConcurrentInvokeError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFoundEdit => "NotFoundEdit",
            ErrorKind::AmbiguousEdit => "AmbiguousEdit",
            ErrorKind::StructureError => "StructureError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::ReloadError => "ReloadError",
            ErrorKind::GatewayError => "GatewayError",
            ErrorKind::ConcurrentInvokeError => "ConcurrentInvokeError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The top-level error type for all Duet operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Pipeline errors ---
    #[error("Edit rejected: {0}")]
    Patch(#[from] PatchError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Reload failed: {0}")]
    Reload(#[from] ReloadError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("An invocation is already in flight")]
    ConcurrentInvoke,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- I/O ---
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// The pipeline error kind, if this error belongs to the pipeline.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Patch(e) => Some(e.kind()),
            Error::Validation(e) => Some(e.kind()),
            Error::Reload(_) => Some(ErrorKind::ReloadError),
            Error::Gateway(_) => Some(ErrorKind::GatewayError),
            Error::ConcurrentInvoke => Some(ErrorKind::ConcurrentInvokeError),
            _ => None,
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// A parser diagnostic: where the kernel text stopped making sense, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// 1-based line number
    pub line: usize,
    /// 1-based column number
    pub column: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}:{}: {}", self.line, self.column, self.message)
    }
}

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("edit #{index} not found: '{preview}'")]
    NotFound { index: usize, preview: String },

    #[error("edit #{index} ambiguous ({count}x): '{preview}'")]
    Ambiguous {
        index: usize,
        count: usize,
        preview: String,
    },
}

impl PatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PatchError::NotFound { .. } => ErrorKind::NotFoundEdit,
            PatchError::Ambiguous { .. } => ErrorKind::AmbiguousEdit,
        }
    }

    /// Index of the offending edit within its batch.
    pub fn index(&self) -> usize {
        match self {
            PatchError::NotFound { index, .. } | PatchError::Ambiguous { index, .. } => *index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("separator line missing")]
    MissingSeparator,

    #[error("separator line appears {count} times")]
    DuplicateSeparator { count: usize },

    #[error("annotation line {line} is not a comment")]
    UncommentedAnnotation { line: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("structure broken: {0}")]
    Structure(#[from] StructureError),

    #[error("syntax error at {0}")]
    Syntax(Diagnostic),
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValidationError::Structure(_) => ErrorKind::StructureError,
            ValidationError::Syntax(_) => ErrorKind::SyntaxError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReloadError {
    #[error("kernel does not parse: {0}")]
    Parse(Diagnostic),

    #[error("kernel raised during load: {0}")]
    Runtime(String),

    #[error("kernel does not define required entry point '{0}'")]
    MissingEntryPoint(String),
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("No credential configured for the collaborator")]
    MissingCredential,

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Request aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_error_displays_correctly() {
        let err = Error::Patch(PatchError::Ambiguous {
            index: 1,
            count: 2,
            preview: "x = 1".into(),
        });
        assert!(err.to_string().contains("ambiguous (2x)"));
        assert!(err.to_string().contains("x = 1"));
        assert_eq!(err.kind(), Some(ErrorKind::AmbiguousEdit));
    }

    #[test]
    fn validation_error_kinds() {
        let structure: Error = ValidationError::from(StructureError::MissingSeparator).into();
        assert_eq!(structure.kind(), Some(ErrorKind::StructureError));

        let syntax: Error = ValidationError::Syntax(Diagnostic::new(3, 5, "expected ':'")).into();
        assert_eq!(syntax.kind(), Some(ErrorKind::SyntaxError));
        assert!(syntax.to_string().contains("line 3:5"));
    }

    #[test]
    fn gateway_error_wraps_provider_error() {
        let err: Error = GatewayError::from(ProviderError::AuthenticationFailed("bad key".into())).into();
        assert_eq!(err.kind(), Some(ErrorKind::GatewayError));
        assert!(err.to_string().contains("bad key"));
    }

    #[test]
    fn non_pipeline_errors_have_no_kind() {
        let err = Error::Config {
            message: "broken".into(),
        };
        assert!(err.kind().is_none());
        assert_eq!(Error::ConcurrentInvoke.kind(), Some(ErrorKind::ConcurrentInvokeError));
    }

    #[test]
    fn error_kind_names() {
        assert_eq!(ErrorKind::NotFoundEdit.to_string(), "NotFoundEdit");
        assert_eq!(ErrorKind::ReloadError.as_str(), "ReloadError");
    }
}
