pub mod broker;
pub mod config;
pub mod delivery;
pub mod listener;
pub mod session;
pub mod subsystem;

// Publicly re-export all error types from the submodules to simplify access
// from external code.
pub use broker::*;
pub use config::*;
pub use delivery::*;
pub use listener::*;
pub use session::*;
pub use subsystem::*;
