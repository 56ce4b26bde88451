//! Runtime events for monitoring stream health.
//!
//! Events are non-fatal notifications. The audio thread can't log or allocate,
//! so it queues compact [`AudioReport`]s; [`Stream::poll_events`] turns them
//! into [`StreamEvent`]s on the calling thread.
//!
//! [`Stream::poll_events`]: crate::Stream::poll_events

use std::sync::Arc;

use crate::{StatusCode, StatusFlags};

/// Runtime events emitted by a [`Stream`](crate::Stream).
///
/// # Example
///
/// ```
/// use stream_bridge::StreamEvent;
///
/// fn handle_event(event: StreamEvent) {
///     match event {
///         StreamEvent::StatusFlagsRaised { period, flags } => {
///             eprintln!("period {period}: {flags:?}");
///         }
///         StreamEvent::CallbackPanicked { period } => {
///             eprintln!("callback panicked in period {period}");
///         }
///         StreamEvent::Finished { status, periods } => {
///             eprintln!("stream finished with {status:?} after {periods} periods");
///         }
///         StreamEvent::ReportsDropped { count } => {
///             eprintln!("{count} reports lost");
///         }
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The driver flagged an underflow, overflow or priming period.
    StatusFlagsRaised {
        /// Zero-based index of the period.
        period: u64,
        /// Flags passed with that period.
        flags: StatusFlags,
    },

    /// The callback panicked; the stream was aborted.
    CallbackPanicked {
        /// Zero-based index of the period.
        period: u64,
    },

    /// The callback finished the stream.
    ///
    /// Emitted once, the first time a poll observes the outcome.
    Finished {
        /// `Complete` or `Abort`.
        status: StatusCode,
        /// Periods dispatched to the callback, including the last one.
        periods: u64,
    },

    /// The report queue was full and reports were discarded.
    ///
    /// Increase [`StreamConfig::report_capacity`](crate::StreamConfig::report_capacity)
    /// or poll more often.
    ReportsDropped {
        /// Reports discarded since the previous poll.
        count: u64,
    },
}

/// Compact record queued by the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AudioReport {
    Flags { period: u64, flags: StatusFlags },
    Panicked { period: u64 },
}

impl From<AudioReport> for StreamEvent {
    fn from(report: AudioReport) -> Self {
        match report {
            AudioReport::Flags { period, flags } => Self::StatusFlagsRaised { period, flags },
            AudioReport::Panicked { period } => Self::CallbackPanicked { period },
        }
    }
}

/// Callback type for receiving runtime events.
///
/// Register one with [`Stream::on_event`](crate::Stream::on_event). It runs on
/// whichever thread calls [`Stream::poll_events`](crate::Stream::poll_events),
/// never on the audio thread.
pub type EventCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use stream_bridge::{event_callback, StreamEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(StreamEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}
