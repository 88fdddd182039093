use std::{any::Any, error::Error};

use crate::{LogLevel, StatusCode};

/// Common surface of every error in the workspace (object-safe).
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Defaults to [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Level the error should be logged at, derived from its code.
    fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    /// For downcasting through `dyn ErrorExt`.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;

    #[derive(Debug)]
    struct Opaque;

    impl fmt::Display for Opaque {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "opaque")
        }
    }

    impl Error for Opaque {}

    impl ErrorExt for Opaque {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_defaults_to_internal_error() {
        assert_eq!(Opaque.status_code(), StatusCode::Internal);
        assert_eq!(Opaque.log_level(), LogLevel::Error);
    }
}
