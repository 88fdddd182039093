use std::{fmt, panic::Location, sync::Arc};

use crate::{ErrorExt, LogLevel, StatusCode};

/// A root error plus the steps it went through on its way up, innermost
/// first.
///
/// Used where a failure crosses several layers before anyone handles it:
/// a subsystem's `init` failing inside the host inside application boot.
#[derive(Clone)]
pub struct StackError {
    root: Arc<dyn ErrorExt>,
    trail: Vec<Step>,
}

/// One `context` call: what was being done and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub doing: String,
    pub at: &'static Location<'static>,
}

impl StackError {
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            root: Arc::new(err),
            trail: Vec::new(),
        }
    }

    /// Records what the caller was doing when the error reached it.
    #[track_caller]
    pub fn context(
        mut self,
        doing: impl Into<String>,
    ) -> Self {
        self.trail.push(Step {
            doing: doing.into(),
            at: Location::caller(),
        });
        self
    }

    /// Code of the root error; context never changes it.
    pub fn status_code(&self) -> StatusCode {
        self.root.status_code()
    }

    pub fn log_level(&self) -> LogLevel {
        self.root.log_level()
    }

    pub fn root(&self) -> &dyn ErrorExt {
        self.root.as_ref()
    }

    pub fn trail(&self) -> &[Step] {
        &self.trail
    }

    pub fn downcast_ref<T: ErrorExt>(&self) -> Option<&T> {
        self.root.as_any().downcast_ref::<T>()
    }
}

impl fmt::Display for StackError {
    /// Outermost step first: `booting: starting catalogue: <root>`.
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for step in self.trail.iter().rev() {
            write!(f, "{}: ", step.doing)?;
        }
        write!(f, "{}", self.root)
    }
}

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let trail: Vec<String> = self
            .trail
            .iter()
            .map(|s| format!("{} ({}:{})", s.doing, s.at.file(), s.at.line()))
            .collect();
        f.debug_struct("StackError")
            .field("root", &self.root.to_string())
            .field("status_code", &self.status_code())
            .field("trail", &trail)
            .finish()
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.root.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    fn from(err: E) -> Self {
        StackError::new(err)
    }
}

/// `.context(..)` on any `Result` whose error converts into [`StackError`].
pub trait ResultExt<T> {
    fn context(
        self,
        doing: impl Into<String>,
    ) -> Result<T, StackError>;

    /// Builds the description only on error.
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: Into<StackError>> ResultExt<T> for Result<T, E> {
    #[track_caller]
    fn context(
        self,
        doing: impl Into<String>,
    ) -> Result<T, StackError> {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(doing)),
        }
    }

    #[track_caller]
    fn with_context<C, F>(
        self,
        f: F,
    ) -> Result<T, StackError>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(e.into().context(f())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MallResult, PublishError, SubsystemError};

    fn init_payments() -> Result<(), SubsystemError> {
        Err(SubsystemError::InitFailed {
            subsystem: "payments".to_string(),
            reason: "gateway offline".to_string(),
        })
    }

    fn boot() -> MallResult<()> {
        init_payments().context("initialising subsystems")?;
        Ok(())
    }

    #[test]
    fn test_display_outermost_first() {
        let err = boot().context("booting").unwrap_err();
        assert_eq!(
            err.to_string(),
            "booting: initialising subsystems: subsystem payments failed to initialise: gateway offline"
        );
        assert_eq!(err.trail().len(), 2);
        assert_eq!(err.trail()[0].doing, "initialising subsystems");
    }

    #[test]
    fn test_step_records_caller_location() {
        let err = boot().unwrap_err();
        assert_eq!(err.trail()[0].at.file(), file!());
    }

    #[test]
    fn test_root_is_kept() {
        let err = boot().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InitFailed);
        assert_eq!(err.log_level(), LogLevel::Error);
        assert_eq!(
            err.downcast_ref::<SubsystemError>().map(|e| e.subsystem()),
            Some("payments")
        );
        assert!(err.downcast_ref::<PublishError>().is_none());
    }

    #[test]
    fn test_with_context_is_lazy() {
        let ok: Result<u8, SubsystemError> = Ok(1);
        let value = ok
            .with_context(|| -> String { panic!("built on success") })
            .unwrap();
        assert_eq!(value, 1);
    }
}
