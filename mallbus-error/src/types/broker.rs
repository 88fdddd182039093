use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};
#[cfg(test)]
use crate::LogLevel;

/// Reasons a publish was rejected.
///
/// Rejections are part of normal operation: the broker logs and counts them
/// and hands them back as a value. Nothing is retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("broker is not running, {kind} message dropped")]
    NotRunning { kind: String },

    #[error("message queue is full ({capacity} slots), {kind} message dropped")]
    QueueFull { kind: String, capacity: usize },
}

/// Broker construction and lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("invalid broker configuration: {field} {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("no tokio runtime available to run the dispatcher")]
    NoRuntime,

    #[error("broker was stopped and cannot be restarted")]
    Stopped,
}

impl PublishError {
    pub fn kind(&self) -> &str {
        match self {
            Self::NotRunning { kind } | Self::QueueFull { kind, .. } => kind,
        }
    }
}

impl ErrorExt for PublishError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotRunning { .. } => StatusCode::NotRunning,
            Self::QueueFull { .. } => StatusCode::QueueFull,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl ErrorExt for BrokerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidConfig { .. } => StatusCode::ConfigInvalid,
            Self::NoRuntime => StatusCode::NoRuntime,
            Self::Stopped => StatusCode::AlreadyStopped,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
