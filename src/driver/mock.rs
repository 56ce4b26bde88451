//! Mock driver for running periods without hardware.

#![allow(unsafe_code)] // calls raw native callbacks

use std::ffi::{c_int, c_ulong, c_void};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Driver, DriverStream};
use crate::{
    BridgeError, Int24, RawStreamCallback, StatusCode, StatusFlags, StreamConfig, TimeInfo,
};

/// Byte written over both buffers after every period.
///
/// A callback that kept a buffer reference past its return reads this instead
/// of audio.
pub const POISON_BYTE: u8 = 0xA5;

/// A driver that runs periods on demand, on the calling thread.
///
/// The test keeps a clone of the driver to reach the streams it opened and
/// drive them period by period. Every period hands the callback freshly filled
/// buffers and poisons them as soon as the callback returns.
///
/// # Example
///
/// ```
/// use stream_bridge::{MockDriver, StatusCode, Stream, StreamConfig};
///
/// let driver = MockDriver::new();
/// let mut stream = Stream::open(&driver, &StreamConfig::output(1), |period: &mut stream_bridge::Period<'_>| {
///     if let Some(out) = period.output::<f32>() {
///         out.fill(0.25);
///     }
///     StatusCode::Continue
/// })
/// .unwrap();
/// stream.start().unwrap();
///
/// let result = driver.last_stream().unwrap().run_period().unwrap();
/// assert_eq!(result.status, Some(StatusCode::Continue));
/// assert_eq!(result.output_samples::<f32>()[0], 0.25);
/// ```
#[derive(Clone, Default)]
pub struct MockDriver {
    streams: Arc<Mutex<Vec<Arc<MockStream>>>>,
}

impl MockDriver {
    /// Creates a driver with no streams.
    pub fn new() -> Self {
        Self::default()
    }

    /// The stream opened `index`-th, if any.
    pub fn stream(&self, index: usize) -> Option<Arc<MockStream>> {
        self.streams.lock().get(index).cloned()
    }

    /// The most recently opened stream.
    pub fn last_stream(&self) -> Option<Arc<MockStream>> {
        self.streams.lock().last().cloned()
    }

    /// Number of streams opened so far.
    pub fn stream_count(&self) -> usize {
        self.streams.lock().len()
    }
}

impl Driver for MockDriver {
    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: RawStreamCallback,
        user_data: *mut c_void,
    ) -> Result<Box<dyn DriverStream>, BridgeError> {
        config.validate()?;

        let stream = Arc::new(MockStream {
            config: config.clone(),
            callback,
            user_data: user_data as usize,
            active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            periods: AtomicU64::new(0),
            buffers: Mutex::new(MockBuffers::default()),
        });
        self.streams.lock().push(Arc::clone(&stream));

        tracing::debug!(
            "MockDriver opened stream #{}: {}in/{}out {} @ {}Hz",
            self.stream_count() - 1,
            config.input_channels,
            config.output_channels,
            config.sample_format,
            config.sample_rate
        );

        Ok(Box::new(MockHandle { stream }))
    }
}

/// Buffer memory with 8-byte alignment, so any sample type can be viewed in it.
#[derive(Default)]
struct AlignedBuffer {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBuffer {
    fn resize(&mut self, len: usize) {
        self.words.resize(len.div_ceil(8), 0);
        self.len = len;
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }

    fn as_ptr(&self) -> *const c_void {
        if self.len == 0 {
            ptr::null()
        } else {
            self.words.as_ptr().cast()
        }
    }

    fn as_mut_ptr(&mut self) -> *mut c_void {
        if self.len == 0 {
            ptr::null_mut()
        } else {
            self.words.as_mut_ptr().cast()
        }
    }
}

/// Per-channel pointers into a non-interleaved buffer.
#[derive(Default)]
struct ChannelTable(Vec<*mut c_void>);

// SAFETY: the pointers only address buffers owned by the same `MockBuffers`,
// which is only reached under its mutex.
unsafe impl Send for ChannelTable {}

impl ChannelTable {
    /// Splits `buffer` into `channels` equal runs and returns the address of the
    /// pointer array, or null if there is nothing to point at.
    fn point_into(&mut self, buffer: &mut AlignedBuffer, channels: usize) -> *mut c_void {
        self.0.clear();
        if buffer.len == 0 || channels == 0 {
            return ptr::null_mut();
        }
        let stride = buffer.len / channels;
        let base = buffer.as_mut_ptr().cast::<u8>();
        for channel in 0..channels {
            // SAFETY: `channel * stride` is within the buffer.
            self.0.push(unsafe { base.add(channel * stride) }.cast());
        }
        self.0.as_mut_ptr().cast()
    }
}

#[derive(Default)]
struct MockBuffers {
    input: AlignedBuffer,
    output: AlignedBuffer,
    input_channels: ChannelTable,
    output_channels: ChannelTable,
    time: TimeInfo,
    clock_seconds: f64,
}

/// Parameters of one mock period.
#[derive(Debug, Clone, Default)]
pub struct MockPeriod {
    /// Frames to deliver. `None` uses the stream's `frames_per_buffer`.
    pub frames: Option<usize>,
    /// Raw input bytes, copied into the input buffer (rest is silence).
    ///
    /// For non-interleaved streams the bytes are laid out channel after
    /// channel, `frames` samples each.
    pub input: Vec<u8>,
    /// Status flags passed to the callback.
    pub flags: StatusFlags,
    /// Timing passed to the callback. `None` uses the stream's own clock.
    pub time_info: Option<TimeInfo>,
}

impl MockPeriod {
    /// A period of `frames` frames with silent input.
    pub fn frames(frames: usize) -> Self {
        Self {
            frames: Some(frames),
            ..Self::default()
        }
    }

    /// Sets the raw input bytes.
    #[must_use]
    pub fn with_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.input = input.into();
        self
    }

    /// Sets the status flags.
    #[must_use]
    pub fn with_flags(mut self, flags: StatusFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Sets explicit timing.
    #[must_use]
    pub fn with_time_info(mut self, time_info: TimeInfo) -> Self {
        self.time_info = Some(time_info);
        self
    }
}

/// What the driver observed during one period.
#[derive(Debug, Clone)]
pub struct PeriodResult {
    /// Value returned by the callback, as the driver sees it.
    pub raw_status: c_int,
    /// `raw_status` interpreted; `None` if outside the protocol.
    pub status: Option<StatusCode>,
    /// Output bytes as the callback left them, captured before poisoning.
    ///
    /// For non-interleaved streams the channels follow one another.
    pub output: Vec<u8>,
    /// Address of the input buffer handed to the callback (0 if none). For
    /// non-interleaved streams, the address of the channel pointer array.
    pub input_addr: usize,
    /// Address of the output buffer handed to the callback (0 if none). For
    /// non-interleaved streams, the address of the channel pointer array.
    pub output_addr: usize,
    /// Address of the time info handed to the callback.
    pub time_info_addr: usize,
    /// Frame count handed to the callback.
    pub frames: usize,
}

impl PeriodResult {
    /// Decodes the captured output bytes as native-endian samples.
    pub fn output_samples<T: MockSample>(&self) -> Vec<T> {
        decode(&self.output)
    }

    /// Decodes one channel of a non-interleaved stream's captured output.
    ///
    /// Empty if the stream has no such channel.
    pub fn output_channel_samples<T: MockSample>(&self, channel: usize) -> Vec<T> {
        let len = self.frames * std::mem::size_of::<T>();
        let start = channel * len;
        self.output
            .get(start..start + len)
            .map(decode)
            .unwrap_or_default()
    }
}

fn decode<T: MockSample>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(std::mem::size_of::<T>())
        .map(T::from_ne_slice)
        .collect()
}

/// Sample types [`PeriodResult::output_samples`] can decode.
pub trait MockSample: Sized {
    /// Decodes one sample from exactly `size_of::<Self>()` bytes.
    fn from_ne_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_mock_sample {
    ($($ty:ty),*) => {
        $(
            impl MockSample for $ty {
                fn from_ne_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(raw)
                }
            }
        )*
    };
}

impl_mock_sample!(f32, i32, i16, i8, u8);

impl MockSample for Int24 {
    fn from_ne_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 3];
        raw.copy_from_slice(bytes);
        Int24(raw)
    }
}

/// A stream opened by [`MockDriver`].
pub struct MockStream {
    config: StreamConfig,
    callback: RawStreamCallback,
    user_data: usize,
    active: AtomicBool,
    closed: AtomicBool,
    periods: AtomicU64,
    /// Held for the whole period, so stop/close wait for an in-flight callback.
    buffers: Mutex<MockBuffers>,
}

impl MockStream {
    /// The configuration the stream was opened with.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The user-data token the bridge registered.
    pub fn user_data(&self) -> *mut c_void {
        self.user_data as *mut c_void
    }

    /// Returns `true` while the stream accepts periods.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Returns `true` once the handle was dropped.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Periods run so far.
    pub fn periods(&self) -> u64 {
        self.periods.load(Ordering::SeqCst)
    }

    /// Runs one period of `frames_per_buffer` frames with silent input.
    ///
    /// Returns `None` if the stream is not active.
    pub fn run_period(&self) -> Option<PeriodResult> {
        self.run_period_with(MockPeriod::default())
    }

    /// Runs one period described by `period`.
    ///
    /// Returns `None` if the stream is not active. A `Complete` or `Abort`
    /// status deactivates the stream, as a real driver would.
    pub fn run_period_with(&self, period: MockPeriod) -> Option<PeriodResult> {
        let mut buffers = self.buffers.lock();
        if !self.is_active() || self.is_closed() {
            return None;
        }

        let frames = period
            .frames
            .unwrap_or(self.config.frames_per_buffer as usize);
        let silence = self.config.sample_format.silence_byte();

        buffers.input.resize(self.config.input_buffer_bytes(frames));
        buffers.output.resize(self.config.output_buffer_bytes(frames));
        buffers.input.bytes_mut().fill(silence);
        let copied = period.input.len().min(buffers.input.len);
        buffers.input.bytes_mut()[..copied].copy_from_slice(&period.input[..copied]);
        buffers.output.bytes_mut().fill(silence);

        let period_seconds = frames as f64 / f64::from(self.config.sample_rate);
        let clock = buffers.clock_seconds;
        buffers.time = period.time_info.unwrap_or(TimeInfo {
            input_buffer_adc_time: clock,
            current_time: clock,
            output_buffer_dac_time: clock + period_seconds,
        });
        buffers.clock_seconds = clock + period_seconds;

        let buffers = &mut *buffers;
        let (input, output) = if self.config.interleaved {
            (buffers.input.as_ptr(), buffers.output.as_mut_ptr())
        } else {
            let input = buffers
                .input_channels
                .point_into(&mut buffers.input, usize::from(self.config.input_channels));
            let output = buffers
                .output_channels
                .point_into(&mut buffers.output, usize::from(self.config.output_channels));
            (input.cast_const(), output)
        };
        let time_info: *const TimeInfo = &buffers.time;

        // SAFETY: buffers and channel tables are live and sized for `frames`
        // until after the call; the lock keeps them exclusive to this period.
        let raw_status = unsafe {
            (self.callback)(
                input,
                output,
                frames as c_ulong,
                time_info,
                period.flags,
                self.user_data(),
            )
        };
        self.periods.fetch_add(1, Ordering::SeqCst);

        let result = PeriodResult {
            raw_status,
            status: StatusCode::from_raw(raw_status),
            output: buffers.output.bytes().to_vec(),
            input_addr: input as usize,
            output_addr: output as usize,
            time_info_addr: time_info as usize,
            frames,
        };

        buffers.input.bytes_mut().fill(POISON_BYTE);
        buffers.output.bytes_mut().fill(POISON_BYTE);

        if result.status.map_or(true, StatusCode::is_finished) {
            self.active.store(false, Ordering::SeqCst);
        }

        Some(result)
    }

    /// Runs periods until the stream deactivates or `max` periods ran.
    pub fn run_periods(&self, max: usize) -> Vec<PeriodResult> {
        let mut results = Vec::new();
        for _ in 0..max {
            match self.run_period() {
                Some(result) => results.push(result),
                None => break,
            }
        }
        results
    }
}

/// Lifecycle handle returned to the bridge.
struct MockHandle {
    stream: Arc<MockStream>,
}

impl DriverStream for MockHandle {
    fn start(&mut self) -> Result<(), BridgeError> {
        if self.stream.is_closed() {
            return Err(BridgeError::BackendError("stream closed".to_string()));
        }
        self.stream.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BridgeError> {
        let _in_flight = self.stream.buffers.lock();
        self.stream.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&mut self) -> Result<(), BridgeError> {
        self.stop()
    }

    fn is_active(&self) -> bool {
        self.stream.is_active()
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let _in_flight = self.stream.buffers.lock();
        self.stream.active.store(false, Ordering::SeqCst);
        self.stream.closed.store(true, Ordering::SeqCst);
    }
}
