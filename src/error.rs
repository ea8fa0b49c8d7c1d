//! Error types for the StockDash network layer

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for configuration, storage and CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for anything that travels through `DataManager::fetch`
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Top-level error type for the application
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation failed: {0}")]
    Other(String),
}

/// Errors produced while fetching remote data.
///
/// Cloneable because one failed operation is reported to every caller
/// attached to the same dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Circuit breaker is OPEN for {0}")]
    CircuitOpen(String),

    #[error("Rate limit exceeded{}", retry_hint(.0))]
    RateLimited(Option<Duration>),

    #[error("Authentication failed. Check the configured API token.")]
    Unauthorized,

    #[error("Access denied. You don't have permission to access this resource.")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Offline: request for {0} queued for replay")]
    Offline(String),

    #[error("Request for {0} was dropped before it completed")]
    Cancelled(String),
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(". Retry after {:?}", d),
        None => String::new(),
    }
}

/// Coarse classification of a [`FetchError`], used as the metrics error tag
/// and by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    CircuitOpen,
    RateLimit,
    Auth,
    Client,
    Server,
    Network,
    Timeout,
    InvalidResponse,
    Offline,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::Client => "client",
            ErrorKind::Server => "server",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::Offline => "offline",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Transient failures worth retrying with exponential backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Server
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::CircuitOpen(_) => ErrorKind::CircuitOpen,
            FetchError::RateLimited(_) => ErrorKind::RateLimit,
            FetchError::Unauthorized | FetchError::Forbidden => ErrorKind::Auth,
            FetchError::NotFound(_) | FetchError::BadRequest(_) => ErrorKind::Client,
            FetchError::Server(_) => ErrorKind::Server,
            FetchError::Network(_) => ErrorKind::Network,
            FetchError::Timeout(_) => ErrorKind::Timeout,
            FetchError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            FetchError::Offline(_) => ErrorKind::Offline,
            FetchError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout("Request timed out".to_string())
        } else if err.is_connect() {
            FetchError::Network("Failed to connect to API".to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to save configuration: {0}")]
    SaveError(String),
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Durable key-value storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Could not determine cache directory")]
    NoHome,

    #[error("Storage IO error: {0}")]
    Io(String),

    #[error("Storage database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage is unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_message_is_exact() {
        let err = FetchError::CircuitOpen("quotes".to_string());
        assert_eq!(err.to_string(), "Circuit breaker is OPEN for quotes");
    }

    #[test]
    fn test_rate_limit_message_with_hint() {
        let err = FetchError::RateLimited(Some(Duration::from_secs(30)));
        let msg = err.to_string();
        assert!(msg.contains("Rate limit"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn test_rate_limit_message_without_hint() {
        let err = FetchError::RateLimited(None);
        assert_eq!(err.to_string(), "Rate limit exceeded");
    }

    #[test]
    fn test_not_found_includes_resource() {
        let err = FetchError::NotFound("/quote/ZZZZ".to_string());
        assert!(err.to_string().contains("ZZZZ"));
    }

    #[test]
    fn test_offline_names_key() {
        let err = FetchError::Offline("price:AAPL".to_string());
        assert!(err.to_string().contains("price:AAPL"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            FetchError::CircuitOpen("x".into()).kind(),
            ErrorKind::CircuitOpen
        );
        assert_eq!(FetchError::RateLimited(None).kind(), ErrorKind::RateLimit);
        assert_eq!(FetchError::Unauthorized.kind(), ErrorKind::Auth);
        assert_eq!(FetchError::Forbidden.kind(), ErrorKind::Auth);
        assert_eq!(FetchError::NotFound("x".into()).kind(), ErrorKind::Client);
        assert_eq!(FetchError::BadRequest("x".into()).kind(), ErrorKind::Client);
        assert_eq!(FetchError::Server("x".into()).kind(), ErrorKind::Server);
        assert_eq!(FetchError::Network("x".into()).kind(), ErrorKind::Network);
        assert_eq!(FetchError::Timeout("x".into()).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn test_transient_kinds() {
        assert!(ErrorKind::Network.is_transient());
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::Server.is_transient());
        assert!(!ErrorKind::Client.is_transient());
        assert!(!ErrorKind::Auth.is_transient());
        assert!(!ErrorKind::CircuitOpen.is_transient());
        assert!(!ErrorKind::RateLimit.is_transient());
    }

    #[test]
    fn test_error_kind_tags() {
        assert_eq!(ErrorKind::CircuitOpen.to_string(), "circuit_open");
        assert_eq!(ErrorKind::RateLimit.as_str(), "rate_limit");
        assert_eq!(ErrorKind::InvalidResponse.as_str(), "invalid_response");
    }

    #[test]
    fn test_error_from_fetch_error() {
        let err: Error = FetchError::Unauthorized.into();
        match err {
            Error::Fetch(FetchError::Unauthorized) => (),
            _ => panic!("Expected Error::Fetch(FetchError::Unauthorized)"),
        }
    }

    #[test]
    fn test_config_error_from_yaml_error() {
        let yaml_str = "invalid: [yaml: content";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let config_err: ConfigError = yaml_err.into();

        match config_err {
            ConfigError::ParseError(_) => (),
            _ => panic!("Expected ConfigError::ParseError"),
        }
    }

    #[test]
    fn test_storage_error_message() {
        let err = StorageError::Io("disk full".to_string());
        assert!(err.to_string().contains("disk full"));
    }
}
