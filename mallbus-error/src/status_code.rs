use std::fmt;

#[cfg(feature = "extras")]
use strum_macros::AsRefStr;

/// Status codes used to categorise broker errors.
///
/// # Ranges:
/// - 1xxx: General
/// - 2xxx: Payloads
/// - 3xxx: Sessions
/// - 4xxx: Capacity and backpressure
/// - 5xxx: Lifecycle
/// - 6xxx: Delivery
/// - 7xxx: Configuration / IO
#[cfg_attr(feature = "extras", derive(AsRefStr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 1xxx: General ===
    Internal = 1003,

    // === 2xxx: Payloads ===
    PayloadMismatch = 2003,

    // === 3xxx: Sessions ===
    SessionExpired = 3000,
    InvalidToken = 3001,
    Unauthorized = 3002,

    // === 4xxx: Capacity ===
    QueueFull = 4000,

    // === 5xxx: Lifecycle ===
    NotRunning = 5000,
    AlreadyStopped = 5001,
    NoRuntime = 5002,
    InvalidTransition = 5003,
    InitFailed = 5004,
    ShutdownFailed = 5005,

    // === 6xxx: Delivery ===
    Timeout = 6000,
    Abandoned = 6001,
    ListenerFailed = 6002,
    ListenerPanicked = 6003,

    // === 7xxx: Configuration / IO ===
    ConfigInvalid = 7000,
    ConfigLoad = 7001,
    Io = 7002,
    LoggingInit = 7003,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl StatusCode {
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Level an error with this code is logged at.
    ///
    /// Backpressure and lifecycle rejections are expected under load and
    /// go to `Warn`. Any listener failure, including a payload of the wrong
    /// shape, is an `Error`.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Timeout => LogLevel::Debug,
            Self::SessionExpired | Self::InvalidToken | Self::Unauthorized => LogLevel::Info,
            Self::QueueFull | Self::NotRunning | Self::AlreadyStopped | Self::Abandoned => {
                LogLevel::Warn
            }
            _ => LogLevel::Error,
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "extras")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "extras"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}
