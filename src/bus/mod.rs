//! In-process publish/subscribe event bus.
//!
//! - `event`: the closed set of event kinds.
//! - `message`: the immutable message envelope and its identities.
//! - `listener`: the listener contract and closure adapters.
//! - `registry`: per-kind listener sets with snapshot reads.
//! - `broker`: the engine (bounded queue, dispatcher, worker pool).
//! - `delivery`: tracked publishes and listener failure reports.
//! - `request`: request/response helpers built on the broker.
//! - `stats`: engine counters.

pub mod broker;
pub mod delivery;
pub mod event;
pub mod listener;
pub mod message;
pub mod registry;
pub mod request;
pub mod stats;

pub use broker::*;
pub use delivery::{Delivery, DeliveryReport, DeliverySummary, ListenerFailure};
pub use event::*;
pub use listener::*;
pub use message::*;
pub use registry::*;
pub use stats::*;
