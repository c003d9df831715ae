//! Error types for the cleanup-core library.
//!
//! Structured error handling for every component of the analysis pipeline.
//! `CleanupError` is for hard failures surfaced to the caller (bad
//! configuration, a vault integrity violation). Day-to-day degraded
//! operation of `analyze()` is instead encoded on `AnalysisResult` via
//! [`ErrorKind`] and never raised.

use std::fmt;
use std::io;

use thiserror::Error;

/// Main result type for cleanup-core operations.
pub type Result<T> = std::result::Result<T, CleanupError>;

/// Comprehensive error type for all cleanup-core operations.
#[derive(Error, Debug)]
pub enum CleanupError {
    /// I/O related errors (cache files, vault fallback file, locks).
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: io::Error,
    },

    /// Configuration errors, raised eagerly at construction time.
    #[error("configuration error: {message}")]
    Config {
        message: String,
        field: Option<String>,
    },

    /// Cache errors that are not simply treated as a miss.
    #[error("cache error: {message}")]
    Cache { message: String, key: Option<String> },

    /// Credential vault errors.
    #[error("vault error: {message}")]
    Vault {
        message: String,
        provider: Option<String>,
    },

    /// Vault integrity-tag verification failure. Kept distinct from
    /// `Vault` because §7 treats it as its own propagation path.
    #[error("credential integrity check failed for provider '{provider}'")]
    Integrity { provider: String },

    /// LLM transport errors that escaped retry/breaker handling
    /// (construction-time, e.g. an invalid endpoint URL).
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Input validation errors.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Generic internal errors.
    #[error("internal error: {message}")]
    Internal {
        message: String,
        context: Option<String>,
    },
}

impl CleanupError {
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: None,
        }
    }

    pub fn config_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            key: None,
        }
    }

    pub fn cache_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    pub fn vault(message: impl Into<String>) -> Self {
        Self::Vault {
            message: message.into(),
            provider: None,
        }
    }

    pub fn vault_provider(message: impl Into<String>, provider: impl Into<String>) -> Self {
        Self::Vault {
            message: message.into(),
            provider: Some(provider.into()),
        }
    }

    pub fn integrity(provider: impl Into<String>) -> Self {
        Self::Integrity {
            provider: provider.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            context: None,
        }
    }

    /// Add context to an existing error, where the variant carries one.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        match &mut self {
            Self::Internal { context: ctx, .. } => {
                *ctx = Some(context.into());
            }
            _ => {}
        }
        self
    }
}

impl From<io::Error> for CleanupError {
    fn from(err: io::Error) -> Self {
        Self::io("I/O operation failed", err)
    }
}

impl From<serde_json::Error> for CleanupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON (de)serialization failed: {err}"),
            context: Some("serde_json".to_string()),
        }
    }
}

impl From<serde_yaml::Error> for CleanupError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Internal {
            message: format!("YAML (de)serialization failed: {err}"),
            context: Some("serde_yaml".to_string()),
        }
    }
}

impl From<reqwest::Error> for CleanupError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            message: format!("HTTP request failed: {err}"),
        }
    }
}

/// Classification of a degraded `analyze()` outcome, stored on
/// `AnalysisResult::error_kind`. See spec §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    QuotaExceeded,
    Authentication,
    Timeout,
    NetworkError,
    ServerError,
    Unknown,
    BreakerOpen,
    Integrity,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::RateLimit => "rate_limit",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Authentication => "authentication",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::ServerError => "server_error",
            Self::Unknown => "unknown",
            Self::BreakerOpen => "breaker_open",
            Self::Integrity => "integrity",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    /// Classify a transport error message per the fixed, case-insensitive,
    /// priority-ordered substring table in spec §4.1.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("too many requests") {
            Self::RateLimit
        } else if lower.contains("quota") || lower.contains("billing") {
            Self::QuotaExceeded
        } else if lower.contains("unauthorized") || lower.contains("authentication") {
            Self::Authentication
        } else if lower.contains("timeout") {
            Self::Timeout
        } else if lower.contains("network") || lower.contains("connection") {
            Self::NetworkError
        } else if lower.contains("server error") || lower.contains("internal") {
            Self::ServerError
        } else {
            Self::Unknown
        }
    }
}

/// Result extension trait for adding context to errors.
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;

    fn context(self, msg: &'static str) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<CleanupError>,
{
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }

    fn context(self, msg: &'static str) -> Result<T> {
        self.map_err(|e| e.into().with_context(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CleanupError::config("invalid configuration");
        assert!(matches!(err, CleanupError::Config { .. }));

        let err = CleanupError::integrity("openai");
        assert!(matches!(err, CleanupError::Integrity { .. }));
    }

    #[test]
    fn test_error_with_context() {
        let err = CleanupError::internal("something went wrong").with_context("during cache load");
        if let CleanupError::Internal { context, .. } = err {
            assert_eq!(context, Some("during cache load".to_string()));
        } else {
            panic!("expected Internal error");
        }
    }

    #[test]
    fn test_classify_priority_order() {
        // "rate limit" must win even if other keywords are also present.
        assert_eq!(
            ErrorKind::classify("rate limit exceeded due to quota"),
            ErrorKind::RateLimit
        );
        assert_eq!(ErrorKind::classify("Quota exceeded"), ErrorKind::QuotaExceeded);
        assert_eq!(ErrorKind::classify("401 Unauthorized"), ErrorKind::Authentication);
        assert_eq!(ErrorKind::classify("request timeout"), ErrorKind::Timeout);
        assert_eq!(ErrorKind::classify("connection reset"), ErrorKind::NetworkError);
        assert_eq!(ErrorKind::classify("500 internal server error"), ErrorKind::ServerError);
        assert_eq!(ErrorKind::classify("teapot"), ErrorKind::Unknown);
    }

    #[test]
    fn test_result_extension() {
        let result: std::result::Result<i32, std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "not found"));
        let wrapped = result.context("loading cache metadata");
        assert!(wrapped.is_err());
    }
}
