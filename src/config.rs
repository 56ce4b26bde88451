//! Configuration types for bridged streams.

use crate::{BridgeError, SampleFormat};

/// Shape of a stream as handed to the driver.
///
/// The bridge does not negotiate any of these values; they are passed to the
/// [`Driver`](crate::Driver) as-is and used to size the typed buffer views in
/// [`Period`](crate::Period).
///
/// # Example
///
/// ```
/// use stream_bridge::{SampleFormat, StreamConfig};
///
/// let config = StreamConfig {
///     frames_per_buffer: 128,
///     sample_format: SampleFormat::I16,
///     ..StreamConfig::output(2)
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Sample rate in Hz.
    ///
    /// Default: 48000
    pub sample_rate: u32,

    /// Number of input channels. `0` for an output-only stream.
    ///
    /// Default: 0
    pub input_channels: u16,

    /// Number of output channels. `0` for an input-only stream.
    ///
    /// Default: 2
    pub output_channels: u16,

    /// Frames the driver delivers per period.
    ///
    /// Default: 256
    pub frames_per_buffer: u32,

    /// Sample format of both buffers.
    ///
    /// Default: [`SampleFormat::F32`]
    pub sample_format: SampleFormat,

    /// Capacity of the queue carrying audio-thread reports (status flags,
    /// caught panics) to [`Stream::poll_events`](crate::Stream::poll_events).
    ///
    /// Reports beyond this capacity are counted and dropped.
    /// Default: 64
    pub report_capacity: usize,

    /// Whether each direction uses a single buffer of interleaved frames.
    ///
    /// When `false` the driver passes, per direction, an array of
    /// per-channel buffer pointers instead, and the buffer views in
    /// [`Period`](crate::Period) are per channel.
    /// Default: true
    pub interleaved: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            input_channels: 0,
            output_channels: 2,
            frames_per_buffer: 256,
            sample_format: SampleFormat::F32,
            report_capacity: 64,
            interleaved: true,
        }
    }
}

impl StreamConfig {
    /// Output-only stream with the given channel count.
    pub fn output(channels: u16) -> Self {
        Self {
            input_channels: 0,
            output_channels: channels,
            ..Self::default()
        }
    }

    /// Input-only stream with the given channel count.
    pub fn input(channels: u16) -> Self {
        Self {
            input_channels: channels,
            output_channels: 0,
            ..Self::default()
        }
    }

    /// Full-duplex stream.
    pub fn duplex(input_channels: u16, output_channels: u16) -> Self {
        Self {
            input_channels,
            output_channels,
            ..Self::default()
        }
    }

    /// Non-interleaved copy of this configuration.
    #[must_use]
    pub fn planar(self) -> Self {
        Self {
            interleaved: false,
            ..self
        }
    }

    /// Bytes in one period of the input buffer, summed over channels.
    #[must_use]
    pub fn input_buffer_bytes(&self, frames: usize) -> usize {
        frames * usize::from(self.input_channels) * self.sample_format.sample_size()
    }

    /// Bytes in one period of the output buffer, summed over channels.
    #[must_use]
    pub fn output_buffer_bytes(&self, frames: usize) -> usize {
        frames * usize::from(self.output_channels) * self.sample_format.sample_size()
    }

    /// Checks the configuration for values no driver could accept.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.sample_rate == 0 {
            return Err(BridgeError::invalid_config("sample_rate must be positive"));
        }
        if self.input_channels == 0 && self.output_channels == 0 {
            return Err(BridgeError::invalid_config(
                "stream needs at least one input or output channel",
            ));
        }
        if self.frames_per_buffer == 0 {
            return Err(BridgeError::invalid_config(
                "frames_per_buffer must be positive",
            ));
        }
        if self.report_capacity == 0 {
            return Err(BridgeError::invalid_config(
                "report_capacity must be positive",
            ));
        }
        Ok(())
    }
}
