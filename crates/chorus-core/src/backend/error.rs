//! Backend error types

use thiserror::Error;

/// Error type for backend operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Network/connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// API error (authentication, server failure, rejected request)
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited
    #[error("Rate limited{}", retry_suffix(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    /// Invalid request (bad parameters)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No adapter exists for the provider
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Provider needs a key that was not configured
    #[error("{0} API key not found")]
    MissingApiKey(String),

    /// Response could not be understood
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn retry_suffix(retry_after: &Option<u64>) -> String {
    retry_after
        .map(|seconds| format!(", retry after {} seconds", seconds))
        .unwrap_or_default()
}

impl From<ureq::Error> for BackendError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let retry_after = response
                    .header("retry-after")
                    .and_then(|v| v.parse::<u64>().ok());
                let message = response
                    .into_string()
                    .unwrap_or_else(|_| "Unknown error".to_string());
                if status == 429 {
                    BackendError::RateLimited { retry_after }
                } else if status == 401 || status == 403 {
                    BackendError::Api {
                        status,
                        message: "Authentication failed".to_string(),
                    }
                } else {
                    BackendError::Api { status, message }
                }
            }
            ureq::Error::Transport(transport) => BackendError::Connection(transport.to_string()),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Malformed(format!("JSON error: {}", err))
    }
}
