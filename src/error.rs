//! Error types for the passive scan engine
//!
//! Library code returns these structured errors; the binary wraps them in
//! `anyhow` with context.

use thiserror::Error;

/// Main error type for pscan operations
#[derive(Error, Debug)]
pub enum PscanError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Payload store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Scope definition errors
    #[error("Scope error: {0}")]
    Scope(#[from] crate::scope::ScopeError),

    /// Management API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write configuration file: {path}")]
    WriteError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Failed to serialize configuration: {0}")]
    SerializeError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Could not determine the configuration directory")]
    NoConfigDir,
}

/// Errors raised while resolving a queued message's payload
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Message {0} not found in store")]
    NotFound(u64),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Typed management API error
///
/// Mirrors the error kinds a remote API client can receive; none of them
/// leave engine state modified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Does not exist: {0}")]
    DoesNotExist(String),

    #[error("Illegal parameter: {0}")]
    IllegalParameter(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Unknown action: {0}")]
    BadAction(String),

    #[error("Unknown view: {0}")]
    BadView(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable wire code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::DoesNotExist(_) => "does_not_exist",
            ApiError::IllegalParameter(_) => "illegal_parameter",
            ApiError::MissingParameter(_) => "missing_parameter",
            ApiError::BadAction(_) => "bad_action",
            ApiError::BadView(_) => "bad_view",
            ApiError::Internal(_) => "internal_error",
        }
    }

    /// The parameter or name the error refers to
    pub fn detail(&self) -> &str {
        match self {
            ApiError::DoesNotExist(d)
            | ApiError::IllegalParameter(d)
            | ApiError::MissingParameter(d)
            | ApiError::BadAction(d)
            | ApiError::BadView(d)
            | ApiError::Internal(d) => d,
        }
    }
}

impl PscanError {
    /// Recover a typed error from an `anyhow` error, looking through context
    ///
    /// Gives the original error back when nothing in it is a pscan error.
    pub fn recover(err: anyhow::Error) -> Result<Self, anyhow::Error> {
        let err = match err.downcast::<ConfigError>() {
            Ok(e) => return Ok(e.into()),
            Err(err) => err,
        };
        let err = match err.downcast::<crate::scope::ScopeError>() {
            Ok(e) => return Ok(e.into()),
            Err(err) => err,
        };
        let err = match err.downcast::<ApiError>() {
            Ok(e) => return Ok(e.into()),
            Err(err) => err,
        };
        let err = match err.downcast::<StoreError>() {
            Ok(e) => return Ok(e.into()),
            Err(err) => err,
        };
        err.downcast::<std::io::Error>().map(PscanError::from)
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PscanError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            PscanError::Store(e) => format!("Message store issue: {}", e.user_hint()),
            PscanError::Scope(e) => format!("Scope issue: {}", e),
            PscanError::Api(e) => format!("Management API issue: {}", e.user_hint()),
            PscanError::Io(e) => format!("File system issue: {}", e),
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::WriteError { path, .. } => {
                format!("Could not write '{}'. Check directory permissions.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
            _ => self.to_string(),
        }
    }
}

impl UserHint for StoreError {
    fn user_hint(&self) -> String {
        match self {
            StoreError::NotFound(id) => {
                format!("Message {} was evicted before it could be scanned.", id)
            }
            StoreError::Unavailable(_) => {
                "The message store could not be reached. Pending messages are dropped.".into()
            }
        }
    }
}

impl UserHint for ApiError {
    fn user_hint(&self) -> String {
        match self {
            ApiError::DoesNotExist(param) => {
                format!("No such item for '{}'. List rules to see valid ids.", param)
            }
            ApiError::IllegalParameter(param) => {
                format!("'{}' has an invalid value.", param)
            }
            ApiError::MissingParameter(param) => {
                format!("Parameter '{}' is required.", param)
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_codes() {
        assert_eq!(ApiError::DoesNotExist("id".into()).code(), "does_not_exist");
        assert_eq!(ApiError::IllegalParameter("id".into()).code(), "illegal_parameter");
        assert_eq!(ApiError::BadView("x".into()).detail(), "x");
    }

    #[test]
    fn test_user_message_wraps_hint() {
        let err: PscanError = ApiError::MissingParameter("enabled".into()).into();
        assert!(err.user_message().contains("'enabled' is required"));
    }

    #[test]
    fn test_recover_through_context() {
        use anyhow::Context;

        let result: Result<(), ConfigError> = Err(ConfigError::ValidationError {
            field: "scanner.workers".into(),
            reason: "must be at least 1".into(),
        });
        let err = result.context("Invalid configuration").unwrap_err();

        let typed = PscanError::recover(err).unwrap();
        assert!(matches!(typed, PscanError::Config(_)));
        assert!(typed.user_message().contains("'scanner.workers'"));
    }

    #[test]
    fn test_recover_leaves_foreign_errors() {
        let err = anyhow::anyhow!("something else");
        let back = PscanError::recover(err).unwrap_err();
        assert_eq!(back.to_string(), "something else");
    }
}
