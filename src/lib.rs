//! `mallbus`: an in-process asynchronous event broker for the mall
//! console application.
//!
//! Subsystems never call each other directly. They publish typed
//! [`Message`]s of an [`EventKind`] to a shared [`Broker`], which queues
//! them, fans them out to the listeners registered for that kind and runs
//! each listener on a bounded worker pool.

/// Event bus: kinds, messages, listeners, the broker engine.
pub mod bus;
/// Settings loading (defaults, `mallbus.toml`, environment).
pub mod config;
/// Logging bootstrap (filters, formats, sinks).
pub mod logging;
/// Session tokens and the injected session store.
pub mod session;
/// Subsystem lifecycle and subscription bookkeeping.
pub mod subsystem;
/// Scheduled report triggers.
pub mod timer;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

pub use bus::{
    listener_fn, Broker, BrokerConfig, BrokerState, CorrelationId, Delivery, DeliveryReport,
    EventKind, Listener, ListenerFailure, ListenerId, Message, MessageId, StatsSnapshot,
};
pub use config::{LogFormat, LoggingSettings, Settings};
pub use logging::{init_logging, LoggingHandle};
pub use mallbus_error::{
    BrokerError, ConfigError, DeliveryError, ErrorExt, ListenerError, LogLevel, LoggingError,
    MallResult, PublishError, ResultExt, SessionError, StackError, StatusCode, SubsystemError,
};
pub use session::{SessionStore, SessionToken};
pub use subsystem::{LifecycleState, Subscriptions, Subsystem, SubsystemHost};
pub use timer::{next_daily_report, next_monthly_report, Schedule, TimeActor};
