use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Errors raised while driving a subsystem through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubsystemError {
    #[error("subsystem {subsystem} failed to initialise: {reason}")]
    InitFailed { subsystem: String, reason: String },

    #[error("subsystem {subsystem} failed to start: {reason}")]
    StartFailed { subsystem: String, reason: String },

    #[error("subsystem {subsystem} failed to shut down: {reason}")]
    ShutdownFailed { subsystem: String, reason: String },

    #[error("subsystem {subsystem} cannot go from {from} to {to}")]
    InvalidTransition {
        subsystem: String,
        from: &'static str,
        to: &'static str,
    },
}

impl SubsystemError {
    pub fn subsystem(&self) -> &str {
        match self {
            Self::InitFailed { subsystem, .. }
            | Self::StartFailed { subsystem, .. }
            | Self::ShutdownFailed { subsystem, .. }
            | Self::InvalidTransition { subsystem, .. } => subsystem,
        }
    }
}

impl ErrorExt for SubsystemError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InitFailed { .. } | Self::StartFailed { .. } => StatusCode::InitFailed,
            Self::ShutdownFailed { .. } => StatusCode::ShutdownFailed,
            Self::InvalidTransition { .. } => StatusCode::InvalidTransition,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
