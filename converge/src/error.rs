//! Error types for converge

use std::time::Duration;

/// Boxed remote error carried inside [`ConvergeError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How a failed remote call should be treated by the retry executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; safe to repeat verbatim (rate limiting, network blips, "resource busy").
    Retryable,
    /// Permanent for this attempt (bad input, authorization, conflicting state).
    Fatal,
    /// The addressed remote resource does not exist. Interpreted by the calling operation.
    NotFound,
}

/// Per-API-family error classifier.
///
/// Implemented by the error type of a remote client so that retry policies
/// can be built without threading a classifier closure through every call site.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

/// Discriminant of [`ConvergeError`], for callers that branch on the failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    NotFound,
    Timeout,
    DeclaredFailure,
    UnexpectedState,
    MalformedHandle,
    AlreadyExists,
    Invalid,
    Cancelled,
}

/// Error type for convergence operations
#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    #[error("remote call failed: {0}")]
    Fatal(#[source] BoxError),

    #[error("remote resource not found: {0}")]
    NotFound(#[source] BoxError),

    #[error("timed out after {elapsed:?} ({attempts} attempts){}", last_error_suffix(.last_error))]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        #[source]
        last_error: Option<BoxError>,
    },

    #[error("remote resource reached failure state {state}")]
    DeclaredFailure { state: String },

    #[error("remote resource reached unexpected state {state}")]
    UnexpectedState { state: String },

    #[error("malformed handle {handle:?}: expected {expected} parts, found {found}")]
    MalformedHandle {
        handle: String,
        expected: usize,
        found: usize,
    },

    #[error("resource already exists: {handle}")]
    AlreadyExists { handle: String },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("resource {handle} was created but did not become ready: {source}")]
    NotReady {
        handle: String,
        #[source]
        source: Box<ConvergeError>,
    },
}

fn last_error_suffix(last_error: &Option<BoxError>) -> String {
    match last_error {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}

impl ConvergeError {
    /// Failure kind. For a partially created resource this is the kind of the
    /// failure that interrupted the readiness wait.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConvergeError::Fatal(_) => ErrorKind::Fatal,
            ConvergeError::NotFound(_) => ErrorKind::NotFound,
            ConvergeError::Timeout { .. } => ErrorKind::Timeout,
            ConvergeError::DeclaredFailure { .. } => ErrorKind::DeclaredFailure,
            ConvergeError::UnexpectedState { .. } => ErrorKind::UnexpectedState,
            ConvergeError::MalformedHandle { .. } => ErrorKind::MalformedHandle,
            ConvergeError::AlreadyExists { .. } => ErrorKind::AlreadyExists,
            ConvergeError::Invalid(_) => ErrorKind::Invalid,
            ConvergeError::Cancelled => ErrorKind::Cancelled,
            ConvergeError::NotReady { source, .. } => source.kind(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ConvergeError::NotFound(_))
    }

    /// Handle of a resource that exists remotely despite the error, if any.
    pub fn handle(&self) -> Option<&str> {
        match self {
            ConvergeError::NotReady { handle, .. } | ConvergeError::AlreadyExists { handle } => {
                Some(handle.as_str())
            }
            _ => None,
        }
    }

    /// Wrap a remote error according to its class. Retryable errors that reach
    /// this point have exhausted nothing yet and are reported as fatal.
    pub(crate) fn from_remote<E>(class: ErrorClass, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match class {
            ErrorClass::NotFound => ConvergeError::NotFound(Box::new(error)),
            ErrorClass::Fatal | ErrorClass::Retryable => ConvergeError::Fatal(Box::new(error)),
        }
    }
}

/// Result type alias for converge operations
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl From<String> for ConvergeError {
    fn from(s: String) -> Self {
        ConvergeError::Invalid(s)
    }
}

impl From<&str> for ConvergeError {
    fn from(s: &str) -> Self {
        ConvergeError::Invalid(s.to_string())
    }
}
