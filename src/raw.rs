//! Driver streams bound to the raw trampolines.

use std::ffi::c_void;

use crate::bridge::{set_dispatch, STREAM_TABLE};
use crate::{
    indexed_trampoline, trampoline, BridgeError, DispatchFn, Driver, DriverStream, StreamConfig,
    StreamId,
};

/// A claimed stream-table slot, released when dropped.
#[derive(Debug)]
struct SlotLease(StreamId);

impl Drop for SlotLease {
    fn drop(&mut self) {
        // A late period after release finds an empty slot and dispatches nothing.
        STREAM_TABLE.release(self.0);
        tracing::debug!("Released {}", self.0);
    }
}

#[derive(Debug)]
enum Binding {
    Global,
    Indexed(SlotLease),
}

/// A driver stream whose periods go through a trampoline to a [`DispatchFn`].
///
/// Two bindings exist:
///
/// - [`open_global`](Self::open_global): the process-wide slot. Every globally
///   bound stream shares one entry point, and the callback's outcome never
///   reaches the driver.
/// - [`open_indexed`](Self::open_indexed): a slot of its own in the stream
///   table, so streams don't interfere. Outcomes still don't reach the driver.
///
/// Dropping a `RawStream` stops and closes the driver stream; an indexed
/// stream then frees its slot.
pub struct RawStream {
    // Dropped before `binding`: the driver stream closes before its slot is freed.
    driver_stream: Box<dyn DriverStream>,
    binding: Binding,
}

impl RawStream {
    /// Registers `entry` process-wide and opens a stream bound to
    /// [`trampoline`].
    ///
    /// `user_data` reaches the entry point as
    /// [`CallbackContext::stream`](crate::CallbackContext::stream). The
    /// registration replaces whatever entry point other global streams were
    /// using.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the driver can't open it.
    pub fn open_global(
        driver: &dyn Driver,
        config: &StreamConfig,
        entry: DispatchFn,
        user_data: *mut c_void,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        set_dispatch(entry);
        let driver_stream = driver.open_stream(config, trampoline, user_data)?;

        tracing::info!(
            "Opened globally dispatched stream: {}in/{}out {} @ {}Hz",
            config.input_channels,
            config.output_channels,
            config.sample_format,
            config.sample_rate
        );

        Ok(Self {
            driver_stream,
            binding: Binding::Global,
        })
    }

    /// Claims a stream-table slot for `entry` and opens a stream bound to
    /// [`indexed_trampoline`].
    ///
    /// The entry point receives the [`StreamId`] token as its descriptor's
    /// `stream` handle.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::StreamTableFull`] if no slot is free, or an error
    /// from the driver.
    pub fn open_indexed(
        driver: &dyn Driver,
        config: &StreamConfig,
        entry: DispatchFn,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let lease = SlotLease(STREAM_TABLE.claim(entry)?);
        let id = lease.0;

        // On error the lease drops and frees the slot.
        let driver_stream =
            driver.open_stream(config, indexed_trampoline, id.token() as *mut c_void)?;

        tracing::info!(
            "Opened {}: {}in/{}out {} @ {}Hz",
            id,
            config.input_channels,
            config.output_channels,
            config.sample_format,
            config.sample_rate
        );

        Ok(Self {
            driver_stream,
            binding: Binding::Indexed(lease),
        })
    }

    /// The stream's table id, for indexed streams.
    pub fn id(&self) -> Option<StreamId> {
        match &self.binding {
            Binding::Global => None,
            Binding::Indexed(lease) => Some(lease.0),
        }
    }

    /// Replaces the entry point, effective from the next period.
    ///
    /// For a global stream this is [`set_dispatch`] and affects every global
    /// stream.
    pub fn set_dispatch(&self, entry: DispatchFn) {
        match &self.binding {
            Binding::Global => set_dispatch(entry),
            Binding::Indexed(lease) => STREAM_TABLE.set(lease.0, entry),
        }
    }

    /// Starts the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to start.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        self.driver_stream.start()
    }

    /// Stops the stream once queued buffers have played.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to stop.
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        self.driver_stream.stop()
    }

    /// Stops the stream immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to abort.
    pub fn abort(&mut self) -> Result<(), BridgeError> {
        self.driver_stream.abort()
    }

    /// Returns `true` while the driver is calling back.
    pub fn is_active(&self) -> bool {
        self.driver_stream.is_active()
    }
}

impl Drop for RawStream {
    fn drop(&mut self) {
        if self.driver_stream.is_active() {
            if let Err(e) = self.driver_stream.stop() {
                tracing::warn!("Failed to stop stream on drop: {}", e);
            }
        }
    }
}
