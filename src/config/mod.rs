//! Application settings: defaults, optional `mallbus.toml`, then
//! `MALLBUS_*` environment variables.

pub mod settings;

pub use settings::*;
