//! Error types for the Kafka REST log hook

use std::fmt;

pub type Result<T> = std::result::Result<T, HookError>;

#[derive(Debug)]
pub enum HookError {
    /// Invalid construction-time configuration
    Config(String),

    /// Unusable TLS material (certificate, key or CA bundle)
    Tls(String),

    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request could not be sent
    Http(reqwest::Error),

    /// JSON serialization/deserialization failed
    Json(serde_json::Error),

    /// A single record could not be formatted
    Format(String),

    /// The proxy answered with a non-success status
    Delivery { topic: String, status: u16 },

    /// The request exceeded the configured client timeout
    Timeout,

    /// The collector task is no longer accepting events
    CollectorClosed,
}

impl HookError {
    /// True for failures where the request never produced an HTTP response.
    pub fn is_send_failure(&self) -> bool {
        matches!(self, HookError::Http(_) | HookError::Timeout)
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::Config(msg) => write!(f, "Configuration error: {}", msg),
            HookError::Tls(msg) => write!(f, "TLS configuration error: {}", msg),
            HookError::Io(err) => write!(f, "IO error: {}", err),
            HookError::Http(err) => write!(f, "HTTP error: {}", err),
            HookError::Json(err) => write!(f, "JSON error: {}", err),
            HookError::Format(msg) => write!(f, "Formatting error: {}", msg),
            HookError::Delivery { topic, status } => write!(
                f,
                "Unable to deliver payload to Kafka REST Proxy on topic '{}' HTTP:{}",
                topic, status
            ),
            HookError::Timeout => write!(f, "Request timeout"),
            HookError::CollectorClosed => write!(f, "Collector is no longer running"),
        }
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HookError::Io(err) => Some(err),
            HookError::Http(err) => Some(err),
            HookError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HookError {
    fn from(err: std::io::Error) -> Self {
        HookError::Io(err)
    }
}

impl From<reqwest::Error> for HookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            HookError::Timeout
        } else {
            HookError::Http(err)
        }
    }
}

impl From<serde_json::Error> for HookError {
    fn from(err: serde_json::Error) -> Self {
        HookError::Json(err)
    }
}
