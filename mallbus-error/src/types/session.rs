use std::any::Any;

use thiserror::Error;

use crate::{ErrorExt, StatusCode};

/// Session store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("malformed session token: {token}")]
    InvalidToken { token: String },
}

impl ErrorExt for SessionError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::Unauthorized,
            Self::Expired => StatusCode::SessionExpired,
            Self::InvalidToken { .. } => StatusCode::InvalidToken,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogLevel;

    #[test]
    fn test_session_error_codes() {
        let err = SessionError::InvalidToken {
            token: "secret-ish".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::InvalidToken);
        assert_eq!(err.log_level(), LogLevel::Info);
        assert_eq!(SessionError::Expired.status_code(), StatusCode::SessionExpired);
    }
}
