//! # SwKit Common
//!
//! Common error types and logging configuration for the SwKit service
//! worker host.
//!
//! ## Features
//!
//! - Unified error type with optional sources and backtraces
//! - Logging configuration and setup
//! - Result and Option extension traits

use std::time::Duration;
use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for SwKit.
#[derive(Error, Debug)]
pub enum SwKitError {
    /// Worker lifecycle errors.
    #[error("Lifecycle error: {message}")]
    Lifecycle {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Client registry errors.
    #[error("Clients error: {message}")]
    Clients {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout errors.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Option<backtrace::Backtrace>,
    },
}

impl SwKitError {
    /// Create a lifecycle error.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: None,
        }
    }

    /// Create a lifecycle error with source.
    pub fn lifecycle_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Lifecycle {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a clients error.
    pub fn clients(message: impl Into<String>) -> Self {
        Self::Clients {
            message: message.into(),
            source: None,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with backtrace.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Some(backtrace::Backtrace::new()),
        }
    }

    /// Get the error category for diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            SwKitError::Lifecycle { .. } => "lifecycle",
            SwKitError::Clients { .. } => "clients",
            SwKitError::Config { .. } => "config",
            SwKitError::Io(_) => "io",
            SwKitError::Timeout(_) => "timeout",
            SwKitError::NotFound(_) => "not_found",
            SwKitError::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for SwKit operations.
pub type Result<T> = std::result::Result<T, SwKitError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| SwKitError::Internal {
            message: format!("{}: {}", message.into(), e),
            backtrace: Some(backtrace::Backtrace::new()),
        })
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| SwKitError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(SwKitError::lifecycle("test").category(), "lifecycle");
        assert_eq!(SwKitError::clients("test").category(), "clients");
        assert_eq!(
            SwKitError::Timeout(Duration::from_secs(1)).category(),
            "timeout"
        );
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = SwKitError::lifecycle_with_source("install", io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_result_context() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        let err = result.context("opening scope").unwrap_err();
        assert_eq!(err.category(), "internal");
        assert!(err.to_string().contains("opening scope"));
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(42);
        assert_eq!(some.ok_or_not_found("client").unwrap(), 42);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("client"),
            Err(SwKitError::NotFound(_))
        ));
    }
}
