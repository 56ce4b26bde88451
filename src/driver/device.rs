//! CPAL-backed driver.

#![allow(unsafe_code)] // calls raw native callbacks

use std::ffi::{c_ulong, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SizedSample, StreamConfig as CpalStreamConfig, StreamInstant};

use super::{Driver, DriverStream};
use crate::{
    BridgeError, RawStreamCallback, Sample, SampleFormat, StatusCode, StatusFlags, StreamConfig,
    TimeInfo,
};

/// Driver for a CPAL device.
///
/// CPAL streams are either input or output, so a config with both input and
/// output channels is rejected. Only `f32` and `i16` buffers are supported.
/// CPAL reports no xruns; every period carries [`StatusFlags::NONE`].
#[must_use]
pub struct CpalDriver {
    device: Device,
}

impl CpalDriver {
    /// Opens the default output device.
    ///
    /// # Errors
    ///
    /// Returns `NoDefaultDevice` if no default output device is configured.
    pub fn default_output() -> Result<Self, BridgeError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(BridgeError::NoDefaultDevice)?;

        Ok(Self { device })
    }

    /// Opens the default input device.
    ///
    /// # Errors
    ///
    /// Returns `NoDefaultDevice` if no default input device is configured.
    pub fn default_input() -> Result<Self, BridgeError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(BridgeError::NoDefaultDevice)?;

        Ok(Self { device })
    }

    /// Opens a device by name, searching every device of the default host.
    ///
    /// # Errors
    ///
    /// Returns `DeviceNotFound` if no device with the given name exists.
    pub fn by_name(name: &str) -> Result<Self, BridgeError> {
        let host = cpal::default_host();
        let devices = host
            .devices()
            .map_err(|e| BridgeError::BackendError(e.to_string()))?;

        for device in devices {
            if let Ok(device_name) = device.name() {
                if device_name == name {
                    return Ok(Self { device });
                }
            }
        }

        Err(BridgeError::DeviceNotFound {
            name: name.to_string(),
        })
    }

    /// Returns the device name.
    pub fn name(&self) -> String {
        self.device.name().unwrap_or_else(|_| "unknown".to_string())
    }

    fn build<T>(
        &self,
        config: &StreamConfig,
        callback: RawStreamCallback,
        user_data: *mut c_void,
        state: &Arc<CpalState>,
    ) -> Result<cpal::Stream, BridgeError>
    where
        T: Sample + SizedSample,
    {
        let fixed = CpalStreamConfig {
            channels: config.input_channels.max(config.output_channels),
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: BufferSize::Fixed(config.frames_per_buffer),
        };

        let built = match self.build_with::<T>(&fixed, config, callback, user_data, state) {
            Err(cpal::BuildStreamError::StreamConfigNotSupported) => {
                tracing::warn!(
                    "{}: {} frames per buffer not supported, using device default",
                    self.name(),
                    config.frames_per_buffer
                );
                let flexible = CpalStreamConfig {
                    buffer_size: BufferSize::Default,
                    ..fixed
                };
                self.build_with::<T>(&flexible, config, callback, user_data, state)
            }
            other => other,
        };
        built.map_err(|e| BridgeError::BackendError(e.to_string()))
    }

    fn build_with<T>(
        &self,
        cpal_config: &CpalStreamConfig,
        config: &StreamConfig,
        callback: RawStreamCallback,
        user_data: *mut c_void,
        state: &Arc<CpalState>,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: Sample + SizedSample,
    {
        let channels = usize::from(cpal_config.channels);
        // Raw pointers aren't Send; the token is only handed back to `callback`.
        let token = user_data as usize;
        let state = Arc::clone(state);
        let mut origin: Option<StreamInstant> = None;

        let on_error = |err: cpal::StreamError| {
            tracing::error!("Audio stream error: {}", err);
        };

        if config.output_channels > 0 {
            self.device.build_output_stream(
                cpal_config,
                move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                    let Some(_running) = state.enter() else {
                        data.fill(<T as cpal::Sample>::EQUILIBRIUM);
                        return;
                    };
                    let ts = info.timestamp();
                    let start = *origin.get_or_insert(ts.callback);
                    let time = TimeInfo {
                        input_buffer_adc_time: 0.0,
                        current_time: seconds_since(&ts.callback, &start),
                        output_buffer_dac_time: seconds_since(&ts.playback, &start),
                    };
                    // SAFETY: `data` and `time` outlive the call.
                    let status = unsafe {
                        callback(
                            ptr::null(),
                            data.as_mut_ptr().cast(),
                            (data.len() / channels) as c_ulong,
                            &time,
                            StatusFlags::NONE,
                            token as *mut c_void,
                        )
                    };
                    state.observe(status);
                },
                on_error,
                None,
            )
        } else {
            self.device.build_input_stream(
                cpal_config,
                move |data: &[T], info: &cpal::InputCallbackInfo| {
                    let Some(_running) = state.enter() else {
                        return;
                    };
                    let ts = info.timestamp();
                    let start = *origin.get_or_insert(ts.capture);
                    let time = TimeInfo {
                        input_buffer_adc_time: seconds_since(&ts.capture, &start),
                        current_time: seconds_since(&ts.callback, &start),
                        output_buffer_dac_time: 0.0,
                    };
                    // SAFETY: `data` and `time` outlive the call.
                    let status = unsafe {
                        callback(
                            data.as_ptr().cast(),
                            ptr::null_mut(),
                            (data.len() / channels) as c_ulong,
                            &time,
                            StatusFlags::NONE,
                            token as *mut c_void,
                        )
                    };
                    state.observe(status);
                },
                on_error,
                None,
            )
        }
    }
}

fn seconds_since(instant: &StreamInstant, origin: &StreamInstant) -> f64 {
    instant
        .duration_since(origin)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

impl Driver for CpalDriver {
    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: RawStreamCallback,
        user_data: *mut c_void,
    ) -> Result<Box<dyn DriverStream>, BridgeError> {
        config.validate()?;
        if config.input_channels > 0 && config.output_channels > 0 {
            return Err(BridgeError::unsupported_config(
                "cpal has no full-duplex streams; open an input and an output stream",
            ));
        }
        if !config.interleaved {
            return Err(BridgeError::unsupported_config(
                "cpal only delivers interleaved buffers",
            ));
        }

        let state = Arc::new(CpalState::default());
        let stream = match config.sample_format {
            SampleFormat::F32 => self.build::<f32>(config, callback, user_data, &state)?,
            SampleFormat::I16 => self.build::<i16>(config, callback, user_data, &state)?,
            format => {
                return Err(BridgeError::UnsupportedFormat {
                    format: format.to_string(),
                });
            }
        };

        tracing::info!(
            "Opened {} stream on {}: {}ch {} @ {}Hz",
            if config.output_channels > 0 { "output" } else { "input" },
            self.name(),
            config.input_channels.max(config.output_channels),
            config.sample_format,
            config.sample_rate
        );

        Ok(Box::new(CpalStream { stream, state }))
    }
}

/// Flags shared between the control thread and the CPAL callback.
///
/// The callback only reaches the bridge between [`enter`](Self::enter) and
/// dropping the returned guard. `started` and `in_callback` are `SeqCst` on
/// both sides: either the callback sees the gate closed, or
/// [`quiesce`](Self::quiesce) sees the callback running and waits for it.
#[derive(Default)]
struct CpalState {
    started: AtomicBool,
    finished: AtomicBool,
    in_callback: AtomicBool,
}

impl CpalState {
    /// Marks a callback as running, if the stream is started and unfinished.
    fn enter(&self) -> Option<Running<'_>> {
        self.in_callback.store(true, Ordering::SeqCst);
        if self.started.load(Ordering::SeqCst) && !self.finished.load(Ordering::Acquire) {
            Some(Running(self))
        } else {
            self.in_callback.store(false, Ordering::Release);
            None
        }
    }

    fn observe(&self, status: std::ffi::c_int) {
        if StatusCode::from_raw(status).map_or(true, StatusCode::is_finished) {
            self.finished.store(true, Ordering::Release);
        }
    }

    /// Closes the gate and waits until no callback is inside it.
    fn quiesce(&self) {
        self.started.store(false, Ordering::SeqCst);
        while self.in_callback.load(Ordering::SeqCst) {
            std::thread::yield_now();
        }
    }
}

/// A callback inside the gate. Dropping it lets `quiesce` return.
struct Running<'a>(&'a CpalState);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.in_callback.store(false, Ordering::Release);
    }
}

/// A CPAL stream. Dropping it closes the device stream.
struct CpalStream {
    stream: cpal::Stream,
    state: Arc<CpalState>,
}

impl DriverStream for CpalStream {
    fn start(&mut self) -> Result<(), BridgeError> {
        self.state.finished.store(false, Ordering::Release);
        self.stream
            .play()
            .map_err(|e| BridgeError::BackendError(e.to_string()))?;
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    // The gate closes even if pausing fails: the device may keep calling
    // back, but nothing reaches the bridge until the next `start`.
    fn stop(&mut self) -> Result<(), BridgeError> {
        self.state.quiesce();
        self.stream
            .pause()
            .map_err(|e| BridgeError::BackendError(e.to_string()))
    }

    // CPAL has no separate abort.
    fn abort(&mut self) -> Result<(), BridgeError> {
        self.stop()
    }

    fn is_active(&self) -> bool {
        self.state.started.load(Ordering::SeqCst) && !self.state.finished.load(Ordering::Acquire)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.state.quiesce();
    }
}
