//! # stream-bridge
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Real-time audio callback bridge.
//!
//! Audio drivers call back on their own high-priority thread through one fixed
//! native signature. `stream-bridge` sits at that boundary: a trampoline with
//! the driver's signature packs each period's arguments into a
//! [`CallbackContext`] and dispatches it to processing logic that is linked
//! independently and registered at runtime.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stream_bridge::{CpalDriver, Period, StatusCode, Stream, StreamConfig};
//!
//! let driver = CpalDriver::default_output()?;
//! let mut phase = 0.0f32;
//!
//! let mut stream = Stream::open(&driver, &StreamConfig::output(2), move |period: &mut Period<'_>| {
//!     let Some(out) = period.output::<f32>() else {
//!         return StatusCode::Abort;
//!     };
//!     for frame in out.chunks_mut(2) {
//!         let sample = (phase * std::f32::consts::TAU).sin() * 0.2;
//!         frame.fill(sample);
//!         phase = (phase + 440.0 / 48_000.0) % 1.0;
//!     }
//!     StatusCode::Continue
//! })?;
//!
//! stream.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(2));
//! stream.stop()?;
//! # Ok::<(), stream_bridge::BridgeError>(())
//! ```
//!
//! ## Architecture
//!
//! Three ways to bind a driver stream, from most to least shared:
//!
//! - **Global**: [`trampoline`] reads the entry point stored by
//!   [`set_dispatch`]. One callback identity per process; the trampoline always
//!   answers `Continue`.
//! - **Indexed**: [`indexed_trampoline`] reads the [`StreamTable`] slot named by
//!   the user-data token. Streams are independent; still always `Continue`.
//! - **Typed**: [`Stream`] owns an [`AudioCallback`] reached through the
//!   user-data token. Its [`StatusCode`] reaches the driver and panics abort the
//!   stream.
//!
//! On the audio thread nothing locks, allocates or logs. Problems seen there
//! are queued and surface on the control thread as [`StreamEvent`]s.

// unsafe_code lint is configured in Cargo.toml as "deny"; boundary modules opt in
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between frame counts and sizes
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod bridge;
mod config;
mod context;
pub mod driver;
mod error;
mod event;
mod raw;
mod sample;
mod status;
mod stream;

pub use bridge::{
    dispatch_registered, indexed_trampoline, set_dispatch, stream_bridge_dispatch, trampoline,
    DispatchFn, RawStreamCallback, RegistrationSlot, StreamId, StreamTable, MAX_STREAMS,
};
pub use config::StreamConfig;
pub use context::{CallbackContext, TimeInfo};
pub use driver::{
    default_output_device_name, list_output_devices, CpalDriver, Driver, DriverStream,
    MockDriver, MockPeriod, MockSample, MockStream, PeriodResult, POISON_BYTE,
};
pub use error::BridgeError;
pub use event::{event_callback, EventCallback, StreamEvent};
pub use raw::RawStream;
pub use sample::{Int24, Sample, SampleFormat};
pub use status::{StatusCode, StatusFlags};
pub use stream::{AudioCallback, Period, Stream};
