use thiserror::Error;

/// Failure of a single call against the scoring service.
///
/// `Clone` because one in-flight result is handed to every caller that
/// joined the same deduplicated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The transport could not complete (DNS, refused connection, timeout).
    #[error("Network error: {0}")]
    Network(String),
    /// The service answered with a status outside 200-299.
    #[error("{}", http_message(*status, message))]
    Http { status: u16, message: String },
    /// A streaming upload failed, either in transit or with a non-2xx status.
    #[error("{message}")]
    Upload { status: Option<u16>, message: String },
    /// The response body was not valid JSON for the expected shape.
    #[error("Invalid response body: {0}")]
    Parse(String),
    /// The request was rejected locally before anything was sent.
    #[error("Invalid request: {0}")]
    Invalid(String),
    /// The caller cancelled the operation or a newer submission superseded it.
    #[error("Request cancelled")]
    Cancelled,
}

fn http_message(status: u16, message: &str) -> String {
    if message.trim().is_empty() {
        format!("Request failed ({status})")
    } else {
        message.to_string()
    }
}

impl ApiError {
    /// HTTP status carried by the error, if the server produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Upload { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Parse(err.to_string())
    }
}
