//! Error types for stream-bridge.
//!
//! Errors are split into two categories:
//! - **Control-path errors** ([`BridgeError`]): returned when opening, starting,
//!   stopping or reconfiguring a stream
//! - **Audio-thread reports**: never returned, surfaced via
//!   [`Stream::poll_events`](crate::Stream::poll_events) as [`StreamEvent`](crate::StreamEvent)s

/// Errors returned by control-path operations.
///
/// Nothing on the audio thread produces a `BridgeError`; a failing callback can
/// only be observed through its [`StatusCode`](crate::StatusCode) or a
/// [`StreamEvent`](crate::StreamEvent).
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The stream configuration is inconsistent.
    #[error("invalid stream config: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The operation requires the stream to be stopped.
    #[error("stream is active - stop it before replacing the callback")]
    StreamActive,

    /// Every slot of the indexed stream table is claimed.
    #[error("stream table full ({capacity} slots in use)")]
    StreamTableFull {
        /// Number of slots in the table.
        capacity: usize,
    },

    /// No default device is configured on this system.
    #[error("no default audio device configured")]
    NoDefaultDevice,

    /// The requested device was not found.
    #[error("device not found: {name}")]
    DeviceNotFound {
        /// Name of the device that wasn't found.
        name: String,
    },

    /// The requested sample format is not supported by the driver.
    #[error("unsupported sample format: {format}")]
    UnsupportedFormat {
        /// The format that wasn't supported.
        format: String,
    },

    /// The driver cannot open a stream with this shape.
    #[error("unsupported stream configuration: {reason}")]
    UnsupportedConfig {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// An error from the underlying audio library.
    #[error("audio backend error: {0}")]
    BackendError(String),
}

impl BridgeError {
    /// Creates an invalid config error with the given reason.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Creates an unsupported config error with the given reason.
    pub fn unsupported_config(reason: impl Into<String>) -> Self {
        Self::UnsupportedConfig {
            reason: reason.into(),
        }
    }
}
