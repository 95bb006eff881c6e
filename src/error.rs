use hyper::StatusCode;
use thiserror::Error;
use tokio::time::Duration;

/// Main error type for the politeness proxy
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The request target could not be turned into an absolute URL
    #[error("Invalid URL: {url}: {message}")]
    InvalidUrl { url: String, message: String },

    /// Network related errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Forwarding to the upstream host failed
    #[error("Upstream error: {target}: {message}")]
    Upstream { target: String, message: String },

    /// robots.txt handling errors
    #[error("Robots error: {message}")]
    Robots { message: String },

    /// Response cache errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Timeout errors; `duration` is `None` when the limit is unknown
    #[error("Operation timed out{}: {operation}", after(.duration))]
    Timeout {
        duration: Option<Duration>,
        operation: String,
    },

    /// IO related errors
    #[error("IO error: {message}")]
    Io { message: String },

    /// Internal server errors
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ProxyError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid URL error
    pub fn invalid_url<U: Into<String>, S: Into<String>>(url: U, message: S) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream<T: Into<String>, S: Into<String>>(target: T, message: S) -> Self {
        Self::Upstream {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a robots.txt error
    pub fn robots<S: Into<String>>(message: S) -> Self {
        Self::Robots {
            message: message.into(),
        }
    }

    /// Create a cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration: Some(duration),
            operation: operation.into(),
        }
    }

    /// Create an IO error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// HTTP status reported to the crawler when the pipeline fails with this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            ProxyError::Network { .. } | ProxyError::Upstream { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Config { .. }
            | ProxyError::Robots { .. }
            | ProxyError::Cache { .. }
            | ProxyError::Io { .. }
            | ProxyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn after(duration: &Option<Duration>) -> String {
    duration
        .map(|d| format!(" after {:?}", d))
        .unwrap_or_default()
}

/// Result type alias for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Convert from anyhow::Error to ProxyError
impl From<anyhow::Error> for ProxyError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(io_err) = err.downcast_ref::<std::io::Error>() {
            return ProxyError::io(io_err.to_string());
        }

        if let Some(hyper_err) = err.downcast_ref::<hyper::Error>() {
            return ProxyError::network(format!("HTTP error: {}", hyper_err));
        }

        ProxyError::internal(err.to_string())
    }
}

/// Convert from std::io::Error to ProxyError
impl From<std::io::Error> for ProxyError {
    fn from(err: std::io::Error) -> Self {
        ProxyError::io(err.to_string())
    }
}

/// Convert from hyper::Error to ProxyError
impl From<hyper::Error> for ProxyError {
    fn from(err: hyper::Error) -> Self {
        if err.is_timeout() {
            ProxyError::Timeout {
                duration: None,
                operation: format!("HTTP request: {}", err),
            }
        } else if err.is_connect() {
            ProxyError::network(format!("Connection error: {}", err))
        } else {
            ProxyError::network(format!("HTTP error: {}", err))
        }
    }
}

/// Convert from toml::de::Error to ProxyError
impl From<toml::de::Error> for ProxyError {
    fn from(err: toml::de::Error) -> Self {
        ProxyError::config(format!("TOML parsing error: {}", err))
    }
}

/// Convert from notify::Error to ProxyError
impl From<notify::Error> for ProxyError {
    fn from(err: notify::Error) -> Self {
        ProxyError::io(format!("File watching error: {}", err))
    }
}

/// Convert from serde_json::Error to ProxyError
impl From<serde_json::Error> for ProxyError {
    fn from(err: serde_json::Error) -> Self {
        ProxyError::cache(format!("JSON serialization error: {}", err))
    }
}

/// Convert from hyper::http::uri::InvalidUri to ProxyError
impl From<hyper::http::uri::InvalidUri> for ProxyError {
    fn from(err: hyper::http::uri::InvalidUri) -> Self {
        ProxyError::invalid_url("", err.to_string())
    }
}

/// Convert from hyper::http::Error to ProxyError
impl From<hyper::http::Error> for ProxyError {
    fn from(err: hyper::http::Error) -> Self {
        ProxyError::internal(format!("HTTP error: {}", err))
    }
}

/// Convert from url::ParseError to ProxyError
impl From<url::ParseError> for ProxyError {
    fn from(err: url::ParseError) -> Self {
        ProxyError::invalid_url("", err.to_string())
    }
}
