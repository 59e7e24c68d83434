use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// A request was rejected before any job was created.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("At least one source is required")]
    NoSources,

    #[error("Too many sources: {count} (maximum {max})")]
    TooManySources { count: usize, max: usize },

    #[error("Creator name is empty")]
    EmptyCreator,

    #[error("Duplicate source: {0}")]
    DuplicateSource(String),

    #[error("Items per source must be between 1 and {max}, got {value}")]
    InvalidItemCap { value: u32, max: u32 },

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider {provider} is not available: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Model name is empty")]
    EmptyModel,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Failure of the source or fetch/transcribe collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transient fetch failure: {0}")]
    Transient(String),

    #[error("Fetch failed: {0}")]
    Terminal(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl FetchError {
    /// Whether the retry utility should try again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout(_) | FetchError::Transient(_))
    }
}

/// Failure of an LLM provider call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request ({status}): {message}")]
    InvalidRequest { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Classify an HTTP error status from a provider API.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ProviderError::Authentication(message),
            408 => ProviderError::Timeout(Duration::ZERO),
            429 => ProviderError::RateLimited(message),
            500..=599 => ProviderError::Unavailable { status, message },
            _ => ProviderError::InvalidRequest { status, message },
        }
    }

    /// Transient failures are retried; terminal ones never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimited(_)
                | ProviderError::Unavailable { .. }
                | ProviderError::Connection(_)
        )
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Unavailable { status, .. } => Some(*status),
            ProviderError::InvalidRequest { status, .. } => Some(*status),
            ProviderError::RateLimited(_) => Some(429),
            _ => None,
        }
    }
}

/// Model output could not be turned into records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("No JSON payload found in model output")]
    NoPayload,

    #[error("Malformed JSON: {0}")]
    Json(String),

    #[error("Expected an array of records, found {0}")]
    UnexpectedShape(String),
}

/// A job record or artifact could not be written.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Asset store error: {0}")]
    Store(String),
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_classification() {
        assert!(ProviderError::from_status(429, "slow down").is_retryable());
        assert!(ProviderError::from_status(503, "overloaded").is_retryable());
        assert!(!ProviderError::from_status(401, "bad key").is_retryable());
        assert!(!ProviderError::from_status(400, "bad request").is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ProviderError::InvalidResponse("x".into()).is_retryable());
    }

    #[test]
    fn test_provider_error_status_code() {
        assert_eq!(ProviderError::from_status(502, "x").status_code(), Some(502));
        assert_eq!(ProviderError::Connection("x".into()).status_code(), None);
    }

    #[test]
    fn test_fetch_error_classification() {
        assert!(FetchError::Timeout(Duration::from_secs(3)).is_retryable());
        assert!(FetchError::Transient("reset".into()).is_retryable());
        assert!(!FetchError::Terminal("private account".into()).is_retryable());
        assert!(!FetchError::NotFound("abc".into()).is_retryable());
    }
}
