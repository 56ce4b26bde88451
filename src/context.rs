//! Per-invocation context descriptor.
//!
//! A [`CallbackContext`] is built on the audio thread's stack for every period
//! and dropped when the period returns. It aliases driver-owned memory and owns
//! nothing.

#![allow(unsafe_code)] // raw buffer views over driver memory

use std::ffi::{c_ulong, c_void};
use std::ptr;
use std::time::Duration;

use crate::{Sample, StatusFlags};

/// Driver timing for one period, in seconds on the stream's clock.
///
/// Layout matches the native protocol's time-info record.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[repr(C)]
pub struct TimeInfo {
    /// When the first input sample was captured at the ADC.
    pub input_buffer_adc_time: f64,
    /// When the callback was invoked.
    pub current_time: f64,
    /// When the first output sample will reach the DAC.
    pub output_buffer_dac_time: f64,
}

impl TimeInfo {
    /// Converts a stream-clock value to a `Duration`, clamping negatives and
    /// non-finite values to zero.
    #[must_use]
    pub fn to_duration(seconds: f64) -> Duration {
        if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::ZERO
        }
    }

    /// Distance between now and the moment the output buffer is heard.
    #[must_use]
    pub fn output_latency(&self) -> Duration {
        Self::to_duration(self.output_buffer_dac_time - self.current_time)
    }
}

/// Parameters of one callback invocation.
///
/// Every field is copied verbatim from the native callback arguments; the
/// bridge performs no transformation and no reordering. `stream` carries the
/// driver's user-data token.
///
/// # Lifetime
///
/// The buffer and time-info pointers are valid only until the dispatched call
/// returns. Holding on to them, or to slices made from them, past that point is
/// undefined behaviour.
#[derive(Debug)]
#[repr(C)]
pub struct CallbackContext {
    /// Opaque stream handle / user-data token, owned by the driver.
    pub stream: *mut c_void,
    /// Input samples, or null for output-only streams.
    ///
    /// For non-interleaved streams this points at an array of per-channel
    /// buffer pointers.
    pub input: *const c_void,
    /// Output samples, or null for input-only streams.
    ///
    /// For non-interleaved streams this points at an array of per-channel
    /// buffer pointers.
    pub output: *mut c_void,
    /// Frames in this period.
    pub frame_count: c_ulong,
    /// Driver timing, may be null.
    pub time_info: *const TimeInfo,
    /// Driver status bits for this period.
    pub status_flags: StatusFlags,
}

impl CallbackContext {
    /// Builds a descriptor from the raw native arguments.
    #[must_use]
    pub fn from_raw(
        input: *const c_void,
        output: *mut c_void,
        frame_count: c_ulong,
        time_info: *const TimeInfo,
        status_flags: StatusFlags,
        user_data: *mut c_void,
    ) -> Self {
        Self {
            stream: user_data,
            input,
            output,
            frame_count,
            time_info,
            status_flags,
        }
    }

    /// An empty descriptor with null buffers and zero frames.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_raw(
            ptr::null(),
            ptr::null_mut(),
            0,
            ptr::null(),
            StatusFlags::NONE,
            ptr::null_mut(),
        )
    }

    /// Frames in this period as `usize`.
    #[must_use]
    pub fn frames(&self) -> usize {
        usize::try_from(self.frame_count).unwrap_or(usize::MAX)
    }

    /// Driver timing for this period, if the driver provided it.
    ///
    /// # Safety
    ///
    /// Must be called while the period is in flight.
    #[must_use]
    pub unsafe fn time_info(&self) -> Option<&TimeInfo> {
        self.time_info.as_ref()
    }

    /// Views the input buffer as `channels`-interleaved samples of `T`.
    ///
    /// Returns `None` if the stream has no input buffer.
    ///
    /// # Safety
    ///
    /// Must be called while the period is in flight, and the driver's buffer
    /// must hold at least `frame_count * channels` samples of type `T`.
    #[must_use]
    pub unsafe fn input_samples<T: Sample>(&self, channels: usize) -> Option<&[T]> {
        if self.input.is_null() {
            return None;
        }
        let len = span::<T>(self.frames(), channels)?;
        Some(std::slice::from_raw_parts(self.input.cast::<T>(), len))
    }

    /// Views the output buffer as `channels`-interleaved samples of `T`.
    ///
    /// Returns `None` if the stream has no output buffer.
    ///
    /// # Safety
    ///
    /// Same as [`input_samples`](Self::input_samples); additionally no other
    /// reference to the output buffer may be alive.
    #[must_use]
    pub unsafe fn output_samples<T: Sample>(&mut self, channels: usize) -> Option<&mut [T]> {
        if self.output.is_null() {
            return None;
        }
        let len = span::<T>(self.frames(), channels)?;
        Some(std::slice::from_raw_parts_mut(self.output.cast::<T>(), len))
    }

    /// Views one channel of a non-interleaved input.
    ///
    /// `input` is read as an array of per-channel pointers. Returns `None` if
    /// the stream has no input or the channel's pointer is null.
    ///
    /// # Safety
    ///
    /// Must be called while the period is in flight. The pointer array must
    /// have more than `channel` entries, each pointing at `frame_count` samples
    /// of type `T`.
    #[must_use]
    pub unsafe fn input_channel_samples<T: Sample>(&self, channel: usize) -> Option<&[T]> {
        if self.input.is_null() {
            return None;
        }
        let len = span::<T>(self.frames(), 1)?;
        let data = *self.input.cast::<*const T>().add(channel);
        if data.is_null() {
            return None;
        }
        Some(std::slice::from_raw_parts(data, len))
    }

    /// Views one channel of a non-interleaved output.
    ///
    /// # Safety
    ///
    /// Same as [`input_channel_samples`](Self::input_channel_samples);
    /// additionally no other reference to that channel may be alive.
    #[must_use]
    pub unsafe fn output_channel_samples<T: Sample>(&mut self, channel: usize) -> Option<&mut [T]> {
        if self.output.is_null() {
            return None;
        }
        let len = span::<T>(self.frames(), 1)?;
        let data = *self.output.cast::<*mut T>().add(channel);
        if data.is_null() {
            return None;
        }
        Some(std::slice::from_raw_parts_mut(data, len))
    }
}

/// Sample count of a `frames` x `channels` view, if it fits in one allocation.
pub(crate) fn span<T>(frames: usize, channels: usize) -> Option<usize> {
    let len = frames.checked_mul(channels)?;
    let bytes = len.checked_mul(std::mem::size_of::<T>())?;
    isize::try_from(bytes).ok().map(|_| len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_is_verbatim() {
        let input = [1.0f32; 8];
        let mut output = [0.0f32; 8];
        let time = TimeInfo::default();
        let token = 0xdead_usize as *mut c_void;

        let ctx = CallbackContext::from_raw(
            input.as_ptr().cast(),
            output.as_mut_ptr().cast(),
            4,
            &time,
            StatusFlags::INPUT_OVERFLOW,
            token,
        );

        assert_eq!(ctx.input, input.as_ptr().cast());
        assert_eq!(ctx.output, output.as_mut_ptr().cast::<c_void>());
        assert_eq!(ctx.frame_count, 4);
        assert_eq!(ctx.time_info, ptr::addr_of!(time));
        assert_eq!(ctx.status_flags, StatusFlags::INPUT_OVERFLOW);
        assert_eq!(ctx.stream, token);
    }

    #[test]
    fn test_sample_views() {
        let input = [0.5f32, -0.5, 0.25, -0.25];
        let mut output = [0.0f32; 4];
        let mut ctx = CallbackContext::from_raw(
            input.as_ptr().cast(),
            output.as_mut_ptr().cast(),
            2,
            ptr::null(),
            StatusFlags::NONE,
            ptr::null_mut(),
        );

        unsafe {
            assert_eq!(ctx.input_samples::<f32>(2), Some(&input[..]));
            let out = ctx.output_samples::<f32>(2).unwrap();
            out.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
            assert!(ctx.time_info().is_none());
        }
        assert_eq!(output, [1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_empty_context_has_no_buffers() {
        let mut ctx = CallbackContext::empty();
        unsafe {
            assert!(ctx.input_samples::<i16>(1).is_none());
            assert!(ctx.output_samples::<i16>(1).is_none());
        }
        assert_eq!(ctx.frames(), 0);
    }

    #[test]
    fn test_oversized_period_has_no_view() {
        let mut sample = [0i16; 2];
        let mut ctx = CallbackContext::from_raw(
            sample.as_ptr().cast(),
            sample.as_mut_ptr().cast(),
            2,
            ptr::null(),
            StatusFlags::NONE,
            ptr::null_mut(),
        );
        unsafe {
            assert!(ctx.input_samples::<i16>(usize::MAX).is_none());
            assert!(ctx.output_samples::<i16>(usize::MAX).is_none());
        }
        assert_eq!(span::<i16>(usize::MAX, 2), None);
        assert_eq!(span::<f32>(usize::MAX / 2, 1), None);
        assert_eq!(span::<f32>(256, 2), Some(512));
    }

    #[test]
    fn test_channel_views() {
        let left = [1i32, 2, 3];
        let right = [4i32, 5, 6];
        let inputs = [left.as_ptr(), right.as_ptr()];
        let mut out_left = [0i32; 3];
        let mut out_right = [0i32; 3];
        let outputs = [out_left.as_mut_ptr(), out_right.as_mut_ptr()];

        let mut ctx = CallbackContext::from_raw(
            inputs.as_ptr().cast(),
            outputs.as_ptr().cast_mut().cast(),
            3,
            ptr::null(),
            StatusFlags::NONE,
            ptr::null_mut(),
        );

        unsafe {
            assert_eq!(ctx.input_channel_samples::<i32>(1), Some(&right[..]));
            ctx.output_channel_samples::<i32>(0).unwrap().copy_from_slice(&[7, 8, 9]);
            ctx.output_channel_samples::<i32>(1).unwrap().fill(-1);
        }
        assert_eq!(out_left, [7, 8, 9]);
        assert_eq!(out_right, [-1; 3]);
    }

    #[test]
    fn test_output_latency() {
        let time = TimeInfo {
            input_buffer_adc_time: 0.0,
            current_time: 1.0,
            output_buffer_dac_time: 1.5,
        };
        assert_eq!(time.output_latency(), Duration::from_millis(500));

        let late = TimeInfo {
            output_buffer_dac_time: 0.5,
            ..time
        };
        assert_eq!(late.output_latency(), Duration::ZERO);
    }
}
