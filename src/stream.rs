//! Typed streams: per-stream callback objects with real outcomes.

#![allow(unsafe_code)] // shared state reached through the driver's user-data token

use std::cell::UnsafeCell;
use std::ffi::{c_int, c_ulong, c_void};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::bridge::rt_guard;
use crate::context::span;
use crate::event::AudioReport;
use crate::{
    BridgeError, CallbackContext, Driver, DriverStream, EventCallback, Sample, SampleFormat,
    StatusCode, StatusFlags, StreamConfig, StreamEvent, TimeInfo,
};

/// Per-stream audio processing.
///
/// Called on the audio thread once per period. The returned [`StatusCode`]
/// reaches the driver: `Complete` and `Abort` finish the stream. A panic is
/// caught and treated as `Abort`.
///
/// Closures of the shape `FnMut(&mut Period<'_>) -> StatusCode` implement
/// this trait.
///
/// # Real-time constraints
///
/// `process` runs under the driver's deadline. Don't lock, allocate, log or
/// block in it.
pub trait AudioCallback: Send + 'static {
    /// Processes one period.
    fn process(&mut self, period: &mut Period<'_>) -> StatusCode;
}

impl<F> AudioCallback for F
where
    F: FnMut(&mut Period<'_>) -> StatusCode + Send + 'static,
{
    fn process(&mut self, period: &mut Period<'_>) -> StatusCode {
        self(period)
    }
}

/// One period as seen by an [`AudioCallback`].
///
/// Buffer views are typed and sized from the stream's configuration; a view
/// requested with the wrong sample type is `None`. Interleaved streams use
/// [`input`](Period::input), [`output`](Period::output) and
/// [`buffers`](Period::buffers); non-interleaved streams use
/// [`input_channel`](Period::input_channel) and
/// [`output_channel`](Period::output_channel). Nothing here can outlive the
/// call to [`AudioCallback::process`].
pub struct Period<'a> {
    ctx: &'a mut CallbackContext,
    format: SampleFormat,
    input_channels: usize,
    output_channels: usize,
    interleaved: bool,
    index: u64,
}

impl Period<'_> {
    /// Frames in this period.
    pub fn frames(&self) -> usize {
        self.ctx.frames()
    }

    /// Zero-based index of this period since the stream was (re)started.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Driver status bits for this period.
    pub fn status_flags(&self) -> StatusFlags {
        self.ctx.status_flags
    }

    /// Driver timing for this period, if provided.
    pub fn time_info(&self) -> Option<&TimeInfo> {
        // SAFETY: a `Period` only exists while its period is in flight.
        unsafe { self.ctx.time_info() }
    }

    /// The raw descriptor, as passed to dispatch entry points.
    pub fn context(&self) -> &CallbackContext {
        &*self.ctx
    }

    /// Number of input channels.
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    /// Number of output channels.
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Whether the buffers are interleaved.
    pub fn is_interleaved(&self) -> bool {
        self.interleaved
    }

    fn fits<T: Sample>(&self, ptr: *const c_void) -> bool {
        self.interleaved && T::FORMAT == self.format && ptr.cast::<T>().is_aligned()
    }

    /// Interleaved input samples.
    ///
    /// `None` for output-only or non-interleaved streams, or if `T` doesn't
    /// match the stream's sample format.
    pub fn input<T: Sample>(&self) -> Option<&[T]> {
        if !self.fits::<T>(self.ctx.input) {
            return None;
        }
        // SAFETY: the driver sized the input buffer for `frames * input_channels`
        // samples of the configured format, which `T` matches.
        unsafe { self.ctx.input_samples::<T>(self.input_channels) }
    }

    /// Interleaved output samples, to be filled by the callback.
    ///
    /// `None` for input-only or non-interleaved streams, or if `T` doesn't
    /// match the stream's sample format.
    pub fn output<T: Sample>(&mut self) -> Option<&mut [T]> {
        self.buffers::<T>().1
    }

    /// Input and output views at once, for duplex processing.
    pub fn buffers<T: Sample>(&mut self) -> (Option<&[T]>, Option<&mut [T]>) {
        let input = if self.fits::<T>(self.ctx.input) {
            // SAFETY: as in `input`; the driver's input and output buffers
            // never overlap.
            unsafe { self.ctx.input_samples::<T>(self.input_channels) }
        } else {
            None
        };
        let output = if self.ctx.output.is_null() || !self.fits::<T>(self.ctx.output.cast_const()) {
            None
        } else {
            span::<T>(self.ctx.frames(), self.output_channels).map(|len| {
                // SAFETY: as above; `&mut self` keeps this the only output view.
                unsafe { std::slice::from_raw_parts_mut(self.ctx.output.cast::<T>(), len) }
            })
        };
        (input, output)
    }

    fn channel_fits<T: Sample>(&self, channel: usize, channels: usize) -> bool {
        !self.interleaved && T::FORMAT == self.format && channel < channels
    }

    /// Input samples of one channel of a non-interleaved stream.
    ///
    /// `None` for interleaved streams, for a channel the stream doesn't have,
    /// or if `T` doesn't match the stream's sample format.
    pub fn input_channel<T: Sample>(&self, channel: usize) -> Option<&[T]> {
        if !self.channel_fits::<T>(channel, self.input_channels) {
            return None;
        }
        // SAFETY: the driver passes one pointer per input channel, each to
        // `frames` samples of the configured format.
        let samples = unsafe { self.ctx.input_channel_samples::<T>(channel) }?;
        samples.as_ptr().is_aligned().then_some(samples)
    }

    /// Output samples of one channel of a non-interleaved stream.
    ///
    /// `None` for interleaved streams, for a channel the stream doesn't have,
    /// or if `T` doesn't match the stream's sample format.
    pub fn output_channel<T: Sample>(&mut self, channel: usize) -> Option<&mut [T]> {
        if !self.channel_fits::<T>(channel, self.output_channels) {
            return None;
        }
        // SAFETY: as in `input_channel`; `&mut self` keeps this the only view.
        let samples = unsafe { self.ctx.output_channel_samples::<T>(channel) }?;
        samples.as_ptr().is_aligned().then_some(samples)
    }

    /// Writes silence to the whole output, whatever the sample format.
    pub fn silence_output(&mut self) {
        if self.ctx.output.is_null() {
            return;
        }
        let size = self.format.sample_size();
        let silence = self.format.silence_byte();
        if self.interleaved {
            let Some(len) = span::<u8>(self.ctx.frames(), self.output_channels * size) else {
                return;
            };
            // SAFETY: the output buffer holds `len` bytes for this period.
            unsafe { std::ptr::write_bytes(self.ctx.output.cast::<u8>(), silence, len) };
            return;
        }

        let Some(len) = span::<u8>(self.ctx.frames(), size) else {
            return;
        };
        let channels = self.ctx.output.cast::<*mut u8>();
        for channel in 0..self.output_channels {
            // SAFETY: the pointer array holds one entry per output channel, each
            // to `len` bytes.
            unsafe {
                let data = *channels.add(channel);
                if !data.is_null() {
                    std::ptr::write_bytes(data, silence, len);
                }
            }
        }
    }
}

/// State reached by the audio thread through the user-data token.
///
/// The audio thread is the only user of `callback` and `reports` while the
/// stream is active; the control thread only touches them while it is not.
struct StreamShared {
    callback: UnsafeCell<Box<dyn AudioCallback>>,
    format: SampleFormat,
    input_channels: usize,
    output_channels: usize,
    interleaved: bool,
    /// Raw `StatusCode` of the first finishing period, `Continue` until then.
    outcome: AtomicI32,
    periods: AtomicU64,
    reports: UnsafeCell<HeapProd<AudioReport>>,
    dropped_reports: AtomicU64,
}

// SAFETY: see the struct docs; every other field is atomic or immutable.
unsafe impl Sync for StreamShared {}

impl StreamShared {
    fn outcome(&self) -> Option<StatusCode> {
        StatusCode::from_raw(self.outcome.load(Ordering::Acquire)).filter(|s| s.is_finished())
    }

    /// Runs one period on the audio thread.
    fn run_period(&self, mut ctx: CallbackContext) -> StatusCode {
        if let Some(finished) = self.outcome() {
            return finished;
        }

        let index = self.periods.fetch_add(1, Ordering::Relaxed);
        if !ctx.status_flags.is_empty() {
            self.report(AudioReport::Flags {
                period: index,
                flags: ctx.status_flags,
            });
        }

        let mut period = Period {
            ctx: &mut ctx,
            format: self.format,
            input_channels: self.input_channels,
            output_channels: self.output_channels,
            interleaved: self.interleaved,
            index,
        };
        let status = rt_guard!(None; {
            // SAFETY: only the audio thread touches the callback while active.
            let callback = unsafe { &mut *self.callback.get() };
            Some(callback.process(&mut period))
        });
        let status = status.unwrap_or_else(|| {
            self.report(AudioReport::Panicked { period: index });
            StatusCode::Abort
        });

        if status.is_finished() {
            self.outcome.store(status.as_raw(), Ordering::Release);
        }
        status
    }

    fn report(&self, report: AudioReport) {
        // SAFETY: the producer is only used from the audio thread.
        let producer = unsafe { &mut *self.reports.get() };
        if producer.try_push(report).is_err() {
            self.dropped_reports.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Driver-facing callback of typed streams; `user_data` is the stream's state.
unsafe extern "C" fn stream_trampoline(
    input: *const c_void,
    output: *mut c_void,
    frame_count: c_ulong,
    time_info: *const TimeInfo,
    status_flags: StatusFlags,
    user_data: *mut c_void,
) -> c_int {
    // SAFETY: `Stream` registers a pointer to its `StreamShared`, which outlives
    // the driver stream.
    let Some(shared) = (unsafe { user_data.cast::<StreamShared>().as_ref() }) else {
        return StatusCode::Continue.as_raw();
    };
    let ctx = CallbackContext::from_raw(
        input,
        output,
        frame_count,
        time_info,
        status_flags,
        user_data,
    );
    shared.run_period(ctx).as_raw()
}

/// A driver stream bound to its own [`AudioCallback`].
///
/// Each `Stream` owns its callback object and reaches it through the driver's
/// user-data token, so any number of streams run independently. The callback's
/// status reaches the driver, and audio-thread problems are queued as
/// [`StreamEvent`]s.
///
/// # Lifecycle
///
/// 1. [`open`](Stream::open) with a driver, config and callback
/// 2. [`start`](Stream::start); the driver calls back every period
/// 3. The callback returns `Complete`/`Abort`, or the control side calls
///    [`stop`](Stream::stop)/[`abort`](Stream::abort)
/// 4. Dropping the `Stream` stops and closes the driver stream
///
/// # Example
///
/// ```
/// use stream_bridge::{MockDriver, Period, StatusCode, Stream, StreamConfig};
///
/// let driver = MockDriver::new();
/// let mut remaining = 2;
/// let mut stream = Stream::open(&driver, &StreamConfig::output(2), move |period: &mut Period<'_>| {
///     period.silence_output();
///     remaining -= 1;
///     if remaining == 0 { StatusCode::Complete } else { StatusCode::Continue }
/// })
/// .unwrap();
///
/// stream.start().unwrap();
/// driver.last_stream().unwrap().run_periods(10);
/// assert_eq!(stream.outcome(), Some(StatusCode::Complete));
/// assert_eq!(stream.periods(), 2);
/// ```
pub struct Stream {
    // Dropped before `shared`: the driver must be gone before its token dies.
    driver_stream: Box<dyn DriverStream>,
    shared: Arc<StreamShared>,
    reports: HeapCons<AudioReport>,
    event_callback: Option<EventCallback>,
    finished_reported: bool,
}

impl Stream {
    /// Opens a stream on `driver` that runs `callback` every period.
    ///
    /// The stream is opened stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the driver can't open it.
    pub fn open<C: AudioCallback>(
        driver: &dyn Driver,
        config: &StreamConfig,
        callback: C,
    ) -> Result<Self, BridgeError> {
        config.validate()?;

        let (producer, consumer) = HeapRb::<AudioReport>::new(config.report_capacity).split();
        let shared = Arc::new(StreamShared {
            callback: UnsafeCell::new(Box::new(callback)),
            format: config.sample_format,
            input_channels: usize::from(config.input_channels),
            output_channels: usize::from(config.output_channels),
            interleaved: config.interleaved,
            outcome: AtomicI32::new(StatusCode::Continue.as_raw()),
            periods: AtomicU64::new(0),
            reports: UnsafeCell::new(producer),
            dropped_reports: AtomicU64::new(0),
        });

        let user_data = Arc::as_ptr(&shared).cast_mut().cast::<c_void>();
        let driver_stream = driver.open_stream(config, stream_trampoline, user_data)?;

        tracing::info!(
            "Opened stream: {}in/{}out {} @ {}Hz, {} frames per buffer",
            config.input_channels,
            config.output_channels,
            config.sample_format,
            config.sample_rate,
            config.frames_per_buffer
        );

        Ok(Self {
            driver_stream,
            shared,
            reports: consumer,
            event_callback: None,
            finished_reported: false,
        })
    }

    /// Sets the callback for runtime events.
    ///
    /// It runs inside [`poll_events`](Self::poll_events).
    #[must_use]
    pub fn on_event<F>(mut self, callback: F) -> Self
    where
        F: Fn(StreamEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(Arc::new(callback));
        self
    }

    /// Starts the stream.
    ///
    /// Restarting a finished stream clears its outcome and period count.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to start.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        if self.driver_stream.is_active() {
            return Ok(());
        }
        self.shared
            .outcome
            .store(StatusCode::Continue.as_raw(), Ordering::Release);
        self.shared.periods.store(0, Ordering::Relaxed);
        self.finished_reported = false;

        self.driver_stream.start()?;
        tracing::debug!("Stream started");
        Ok(())
    }

    /// Stops the stream once queued buffers have played.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to stop.
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        self.driver_stream.stop()?;
        tracing::debug!("Stream stopped after {} periods", self.periods());
        Ok(())
    }

    /// Stops the stream immediately, discarding queued buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if the driver fails to abort.
    pub fn abort(&mut self) -> Result<(), BridgeError> {
        self.driver_stream.abort()?;
        tracing::debug!("Stream aborted after {} periods", self.periods());
        Ok(())
    }

    /// Returns `true` while the driver is calling back.
    pub fn is_active(&self) -> bool {
        self.driver_stream.is_active()
    }

    /// Replaces the callback object.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::StreamActive`] while the stream is active; stop
    /// it first.
    pub fn set_callback<C: AudioCallback>(&mut self, callback: C) -> Result<(), BridgeError> {
        if self.driver_stream.is_active() {
            return Err(BridgeError::StreamActive);
        }
        // SAFETY: the driver is inactive, so no period is touching the callback.
        unsafe {
            *self.shared.callback.get() = Box::new(callback);
        }
        tracing::debug!("Stream callback replaced");
        Ok(())
    }

    /// The status that finished the stream, once a callback returned
    /// `Complete` or `Abort` (or panicked).
    pub fn outcome(&self) -> Option<StatusCode> {
        self.shared.outcome()
    }

    /// Periods dispatched to the callback since the last start.
    pub fn periods(&self) -> u64 {
        self.shared.periods.load(Ordering::Relaxed)
    }

    /// Drains queued audio-thread reports into events.
    ///
    /// Each event is logged and passed to the [`on_event`](Self::on_event)
    /// callback. [`StreamEvent::Finished`] is included the first time the
    /// outcome is observed.
    pub fn poll_events(&mut self) -> Vec<StreamEvent> {
        let mut events: Vec<StreamEvent> = Vec::new();
        while let Some(report) = self.reports.try_pop() {
            events.push(report.into());
        }

        let dropped = self.shared.dropped_reports.swap(0, Ordering::Relaxed);
        if dropped > 0 {
            events.push(StreamEvent::ReportsDropped { count: dropped });
        }

        if !self.finished_reported {
            if let Some(status) = self.outcome() {
                self.finished_reported = true;
                events.push(StreamEvent::Finished {
                    status,
                    periods: self.periods(),
                });
            }
        }

        for event in &events {
            log_event(event);
            if let Some(ref callback) = self.event_callback {
                callback(event.clone());
            }
        }
        events
    }

    /// Waits until the callback finishes the stream, checking every
    /// `poll_interval`.
    ///
    /// Returns immediately if the stream already finished. Never returns for a
    /// stream whose callback keeps returning `Continue`; combine with
    /// `tokio::time::timeout` where that matters.
    pub async fn wait_finished(&self, poll_interval: Duration) -> StatusCode {
        let mut interval = tokio::time::interval(poll_interval.max(Duration::from_millis(1)));
        loop {
            interval.tick().await;
            if let Some(status) = self.outcome() {
                return status;
            }
        }
    }
}

fn log_event(event: &StreamEvent) {
    match event {
        StreamEvent::StatusFlagsRaised { period, flags } if flags.is_xrun() => {
            tracing::warn!("Period {}: driver reported {:?}", period, flags);
        }
        StreamEvent::StatusFlagsRaised { period, flags } => {
            tracing::debug!("Period {}: driver reported {:?}", period, flags);
        }
        StreamEvent::CallbackPanicked { period } => {
            tracing::error!("Callback panicked in period {}, stream aborted", period);
        }
        StreamEvent::Finished { status, periods } => {
            tracing::info!("Stream finished with {:?} after {} periods", status, periods);
        }
        StreamEvent::ReportsDropped { count } => {
            tracing::warn!("Report queue full, {} reports dropped", count);
        }
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.driver_stream.is_active() {
            if let Err(e) = self.driver_stream.stop() {
                tracing::warn!("Failed to stop stream on drop: {}", e);
            }
        }
    }
}
