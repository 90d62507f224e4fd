//! Error handling for taprec
//!
//! This module defines the crate-level error type and a Result alias. Layer
//! specific errors (`EngineError`, `BranchError`) convert into it with `?`.

use crate::engine::EngineError;
use crate::recording::BranchError;
use thiserror::Error;

/// Main error type for taprec operations
#[derive(Error, Debug)]
pub enum TapRecError {
    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Branch construction and lifecycle errors
    #[error("Branch error: {0}")]
    Branch(#[from] BranchError),

    /// Errors reported by the graph engine
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<TapRecError>,
    },
}

impl TapRecError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        TapRecError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<toml::de::Error> for TapRecError {
    fn from(err: toml::de::Error) -> Self {
        TapRecError::Toml(err.to_string())
    }
}

impl From<toml::ser::Error> for TapRecError {
    fn from(err: toml::ser::Error) -> Self {
        TapRecError::Toml(err.to_string())
    }
}

/// Result type alias for taprec operations
pub type Result<T> = std::result::Result<T, TapRecError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<TapRecError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StageId;

    #[test]
    fn test_error_display() {
        let err = TapRecError::Config("missing section".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing section");
    }

    #[test]
    fn test_error_with_context() {
        let result: std::result::Result<(), EngineError> =
            Err(EngineError::UnknownStage(StageId(3)));
        let err = result.context("Failed to start pipeline").unwrap_err();
        assert!(err.to_string().contains("Failed to start pipeline"));
        assert!(matches!(err, TapRecError::WithContext { .. }));
    }

    #[test]
    fn test_branch_error_converts() {
        let err: TapRecError = BranchError::UnknownBranch(crate::recording::BranchId(4)).into();
        assert!(err.to_string().starts_with("Branch error"));
    }
}
