pub mod context;
pub mod ext;
pub mod status_code;
pub mod types;

pub use context::*;
pub use ext::*;
pub use status_code::*;
pub use types::*;

/// Result of operations that attach context while unwinding, such as
/// application boot and subsystem lifecycle.
pub type MallResult<T> = Result<T, StackError>;
