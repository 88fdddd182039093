use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Failure reported by a single listener invocation.
///
/// A failing listener never affects the dispatcher or sibling listeners.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    #[error("listener failed: {reason}")]
    Failed { reason: String },

    #[error("listener panicked: {reason}")]
    Panicked { reason: String },

    #[error("unexpected payload, expected {expected}")]
    UnexpectedPayload { expected: &'static str },
}

impl ListenerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn unexpected_payload(expected: &'static str) -> Self {
        Self::UnexpectedPayload { expected }
    }
}

impl From<String> for ListenerError {
    fn from(reason: String) -> Self {
        Self::Failed { reason }
    }
}

impl From<&str> for ListenerError {
    fn from(reason: &str) -> Self {
        Self::failed(reason)
    }
}

impl ErrorExt for ListenerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Failed { .. } => StatusCode::ListenerFailed,
            Self::Panicked { .. } => StatusCode::ListenerPanicked,
            Self::UnexpectedPayload { .. } => StatusCode::PayloadMismatch,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
