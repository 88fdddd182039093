use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Settings loading and validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {reason}")]
    Load { reason: String },

    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Logging bootstrap errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    #[error("invalid log directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },

    #[error("cannot prepare log directory {path}: {reason}")]
    LogDir { path: String, reason: String },

    #[error("global subscriber already installed: {reason}")]
    AlreadyInitialized { reason: String },
}

impl ConfigError {
    pub fn invalid(
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl ErrorExt for ConfigError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Load { .. } => StatusCode::ConfigLoad,
            Self::Invalid { .. } => StatusCode::ConfigInvalid,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for LoggingError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidDirective { .. } => StatusCode::ConfigInvalid,
            Self::LogDir { .. } => StatusCode::Io,
            Self::AlreadyInitialized { .. } => StatusCode::LoggingInit,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
