use converge::{Classify, ErrorClass};
use thiserror::Error;

/// API error codes that signal a transient condition on the control plane.
const RETRYABLE_CODES: [&str; 3] = [
    "RequestLimitExceeded",
    "InternalError",
    "FailedOperation.TaskConflict",
];

/// Code prefixes for resources locked by another in-flight operation.
const RETRYABLE_PREFIXES: [&str; 2] = ["ResourceInUse", "ResourceBusy"];

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned error (HTTP {status}) {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Too many requests, rate limited")]
    RateLimited,

    #[error("Service unavailable, retry later")]
    ServiceUnavailable,

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Resource not found ({code}): {message}")]
    NotFound { code: String, message: String },

    #[error("Operation refused: {0}")]
    Refused(String),

    #[error("Invalid identifier {0:?} returned by the control plane")]
    InvalidId(String),
}

impl ApiError {
    /// API error code, when the control plane returned one.
    pub fn code(&self) -> Option<&str> {
        match self {
            ApiError::Api { code, .. } | ApiError::NotFound { code, .. } if !code.is_empty() => {
                Some(code.as_str())
            }
            _ => None,
        }
    }
}

fn is_retryable_code(code: &str) -> bool {
    RETRYABLE_CODES.contains(&code) || RETRYABLE_PREFIXES.iter().any(|p| code.starts_with(p))
}

fn is_not_found_code(code: &str) -> bool {
    code.starts_with("ResourceNotFound") || code.ends_with("NotFound")
}

impl Classify for ApiError {
    fn class(&self) -> ErrorClass {
        match self {
            ApiError::Request(e) if e.is_connect() || e.is_timeout() => ErrorClass::Retryable,
            ApiError::Timeout(_) | ApiError::RateLimited | ApiError::ServiceUnavailable => {
                ErrorClass::Retryable
            }
            ApiError::NotFound { .. } => ErrorClass::NotFound,
            ApiError::Api { status, code, .. } => {
                if is_not_found_code(code) {
                    ErrorClass::NotFound
                } else if *status == 429 || *status >= 500 || is_retryable_code(code) {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Fatal
                }
            }
            ApiError::Request(_)
            | ApiError::Parse(_)
            | ApiError::Unauthorized
            | ApiError::Refused(_)
            | ApiError::InvalidId(_) => ErrorClass::Fatal,
        }
    }
}
