use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Errors while awaiting the outcome of a tracked publish.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("delivery not completed within {waited_ms} ms")]
    Timeout { waited_ms: u64 },

    #[error("delivery abandoned: broker stopped before all listeners finished")]
    Abandoned,
}

impl ErrorExt for DeliveryError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::Timeout,
            Self::Abandoned => StatusCode::Abandoned,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
