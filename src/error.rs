//! Error handling for framepipe
//!
//! This module defines the application-level error type and a Result alias.
//! Engine errors live in [`crate::pipeline::error`] and convert into
//! [`FramepipeError`] at the application boundary.

use crate::pipeline::error::PipelineError;
use thiserror::Error;

/// Main error type for framepipe operations
#[derive(Error, Debug)]
pub enum FramepipeError {
    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Graph construction or run failures
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FramepipeError>,
    },
}

impl FramepipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FramepipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is a graph configuration
    /// error rather than a runtime failure.
    pub fn is_configuration_error(&self) -> bool {
        match self {
            FramepipeError::Config(_) => true,
            FramepipeError::Pipeline(e) => e.is_configuration_error(),
            FramepipeError::WithContext { source, .. } => source.is_configuration_error(),
            _ => false,
        }
    }
}

/// Result type alias for framepipe operations
pub type Result<T> = std::result::Result<T, FramepipeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FramepipeError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FramepipeError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FramepipeError::Config("missing nodes".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing nodes");
    }

    #[test]
    fn test_error_with_context() {
        let err = FramepipeError::Config("test".to_string());
        let with_ctx = err.with_context("Failed to load");
        assert!(with_ctx.to_string().contains("Failed to load"));
        assert!(with_ctx.is_configuration_error());
    }

    #[test]
    fn test_pipeline_error_context() {
        let result: std::result::Result<(), PipelineError> =
            Err(PipelineError::DuplicateName("cam".into()));
        let err = result.context("Building graph").unwrap_err();
        assert!(err.to_string().starts_with("Building graph"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_fatal_is_not_configuration() {
        let err = FramepipeError::from(PipelineError::Fatal {
            node: "sink".into(),
            cycle: 4,
            message: "disk full".into(),
        });
        assert!(!err.is_configuration_error());
    }
}
