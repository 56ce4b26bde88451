//! Integration tests for stream-bridge.
//!
//! Note: Tests that require actual audio hardware are marked with
//! `#[ignore]` and should be run manually.

#![allow(unsafe_code)]
#![allow(clippy::unwrap_used)]

use std::cell::Cell;
use std::ffi::{c_ulong, c_void};
use std::ptr;
use std::time::Duration;

use parking_lot::Mutex;
use stream_bridge::{
    dispatch_registered, set_dispatch, trampoline, CallbackContext, MockDriver, MockPeriod,
    Period, RawStream, SampleFormat, StatusCode, StatusFlags, Stream, StreamConfig, StreamEvent,
    TimeInfo, POISON_BYTE,
};

/// Tests touching the process-wide slot take this lock.
static GLOBAL_SLOT: Mutex<()> = parking_lot::const_mutex(());

thread_local! {
    static LAST_ENTRY: Cell<u32> = const { Cell::new(0) };
    static CALLS: Cell<u32> = const { Cell::new(0) };
    static SEEN: Cell<Option<Seen>> = const { Cell::new(None) };
    static RETAINED: Cell<*mut c_void> = const { Cell::new(ptr::null_mut()) };
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Seen {
    stream: *mut c_void,
    input: *const c_void,
    output: *mut c_void,
    frame_count: c_ulong,
    time_info: *const TimeInfo,
    status_flags: StatusFlags,
}

unsafe extern "C-unwind" fn entry_a(ctx: *mut CallbackContext) {
    LAST_ENTRY.set(1);
    CALLS.set(CALLS.get() + 1);
    if let Some(out) = (*ctx).output_samples::<f32>(2) {
        out.fill(0.1);
    }
}

unsafe extern "C-unwind" fn entry_b(ctx: *mut CallbackContext) {
    LAST_ENTRY.set(2);
    CALLS.set(CALLS.get() + 1);
    if let Some(out) = (*ctx).output_samples::<f32>(2) {
        out.fill(0.2);
    }
}

unsafe extern "C-unwind" fn record_fields(ctx: *mut CallbackContext) {
    let ctx = &*ctx;
    SEEN.set(Some(Seen {
        stream: ctx.stream,
        input: ctx.input,
        output: ctx.output,
        frame_count: ctx.frame_count,
        time_info: ctx.time_info,
        status_flags: ctx.status_flags,
    }));
}

unsafe extern "C-unwind" fn retain_output(ctx: *mut CallbackContext) {
    RETAINED.set((*ctx).output);
    if let Some(out) = (*ctx).output_samples::<f32>(2) {
        out.fill(0.5);
    }
}

unsafe extern "C-unwind" fn explode(_: *mut CallbackContext) {
    panic!("entry point fault");
}

unsafe extern "C-unwind" fn ramp_channels(ctx: *mut CallbackContext) {
    let ctx = &mut *ctx;
    for channel in 0..2 {
        if let Some(out) = ctx.output_channel_samples::<f32>(channel) {
            for (frame, sample) in out.iter_mut().enumerate() {
                *sample = (channel * 10 + frame) as f32;
            }
        }
    }
}

fn stereo_f32(frames: u32) -> StreamConfig {
    StreamConfig {
        frames_per_buffer: frames,
        ..StreamConfig::output(2)
    }
}

fn call_trampoline(frames: c_ulong, output: &mut [f32]) -> i32 {
    unsafe {
        trampoline(
            ptr::null(),
            output.as_mut_ptr().cast(),
            frames,
            ptr::null(),
            StatusFlags::NONE,
            ptr::null_mut(),
        )
    }
}

// ============================================================================
// Global slot
// ============================================================================

#[test]
fn test_most_recent_registration_wins() {
    let _guard = GLOBAL_SLOT.lock();
    let mut output = [0.0f32; 8];

    set_dispatch(entry_a);
    set_dispatch(entry_b);
    assert!(dispatch_registered());

    LAST_ENTRY.set(0);
    CALLS.set(0);
    let status = call_trampoline(4, &mut output);

    assert_eq!(status, StatusCode::Continue.as_raw());
    assert_eq!(LAST_ENTRY.get(), 2);
    assert_eq!(CALLS.get(), 1);
    assert_eq!(output, [0.2; 8]);
}

#[test]
fn test_descriptor_fields_are_verbatim() {
    let _guard = GLOBAL_SLOT.lock();
    set_dispatch(record_fields);

    let input = [0i16; 6];
    let mut output = [0i16; 6];
    let time = TimeInfo {
        input_buffer_adc_time: 1.0,
        current_time: 1.5,
        output_buffer_dac_time: 2.0,
    };
    let flags = StatusFlags::OUTPUT_UNDERFLOW | StatusFlags::from_bits_retain(0x100);
    let token = 0x5eed_usize as *mut c_void;

    SEEN.set(None);
    let status = unsafe {
        trampoline(
            input.as_ptr().cast(),
            output.as_mut_ptr().cast(),
            3,
            &time,
            flags,
            token,
        )
    };

    assert_eq!(status, StatusCode::Continue.as_raw());
    assert_eq!(
        SEEN.get(),
        Some(Seen {
            stream: token,
            input: input.as_ptr().cast(),
            output: output.as_mut_ptr().cast(),
            frame_count: 3,
            time_info: ptr::addr_of!(time),
            status_flags: flags,
        })
    );
}

#[test]
fn test_256_frame_period_dispatches_once() {
    let _guard = GLOBAL_SLOT.lock();
    let driver = MockDriver::new();
    let mut stream =
        RawStream::open_global(&driver, &stereo_f32(256), record_fields, ptr::null_mut())
            .unwrap();
    stream.start().unwrap();

    SEEN.set(None);
    let result = driver.last_stream().unwrap().run_period().unwrap();

    assert_eq!(result.status, Some(StatusCode::Continue));
    let seen = SEEN.get().unwrap();
    assert_eq!(seen.frame_count, 256);
    assert_eq!(seen.output as usize, result.output_addr);
    assert_eq!(seen.time_info as usize, result.time_info_addr);
    assert!(seen.input.is_null());
}

#[test]
fn test_reregistration_applies_to_next_period() {
    let _guard = GLOBAL_SLOT.lock();
    let driver = MockDriver::new();
    let mut stream =
        RawStream::open_global(&driver, &stereo_f32(4), entry_a, ptr::null_mut()).unwrap();
    stream.start().unwrap();
    let mock = driver.last_stream().unwrap();

    let first = mock.run_period().unwrap();
    assert_eq!(first.output_samples::<f32>(), vec![0.1; 8]);

    set_dispatch(entry_b);
    let second = mock.run_period().unwrap();
    assert_eq!(second.output_samples::<f32>(), vec![0.2; 8]);
    assert!(stream.is_active());
}

#[test]
fn test_global_streams_share_one_callback() {
    let _guard = GLOBAL_SLOT.lock();
    let driver = MockDriver::new();
    let mut first =
        RawStream::open_global(&driver, &stereo_f32(4), entry_a, ptr::null_mut()).unwrap();
    let mut second =
        RawStream::open_global(&driver, &stereo_f32(4), entry_b, ptr::null_mut()).unwrap();
    first.start().unwrap();
    second.start().unwrap();

    // The second registration replaced the first for both streams.
    let result = driver.stream(0).unwrap().run_period().unwrap();
    assert_eq!(result.output_samples::<f32>(), vec![0.2; 8]);
}

#[test]
fn test_panicking_entry_keeps_stream_running() {
    let _guard = GLOBAL_SLOT.lock();
    let driver = MockDriver::new();
    let mut stream =
        RawStream::open_global(&driver, &stereo_f32(4), explode, ptr::null_mut()).unwrap();
    stream.start().unwrap();
    let mock = driver.last_stream().unwrap();

    for _ in 0..3 {
        let result = mock.run_period().unwrap();
        assert_eq!(result.status, Some(StatusCode::Continue));
        // Nothing was written; the driver plays what the buffer held.
        assert_eq!(result.output, vec![0u8; 32]);
    }
    assert!(stream.is_active());
}

#[test]
fn test_buffers_poisoned_after_period() {
    let _guard = GLOBAL_SLOT.lock();
    let driver = MockDriver::new();
    let mut stream =
        RawStream::open_global(&driver, &stereo_f32(4), retain_output, ptr::null_mut()).unwrap();
    stream.start().unwrap();
    let mock = driver.last_stream().unwrap();

    let result = mock.run_period().unwrap();
    assert_eq!(result.output_samples::<f32>(), vec![0.5; 8]);

    // A reference kept past the return sees poison, not audio.
    let retained = RETAINED.get().cast::<u8>();
    let stale: Vec<u8> = (0..32)
        .map(|i| unsafe { ptr::read_volatile(retained.add(i)) })
        .collect();
    assert!(stale.iter().all(|&b| b == POISON_BYTE));
}

// ============================================================================
// Indexed table
// ============================================================================

#[test]
fn test_indexed_streams_are_independent() {
    let driver = MockDriver::new();
    let mut a = RawStream::open_indexed(&driver, &stereo_f32(4), entry_a).unwrap();
    let mut b = RawStream::open_indexed(&driver, &stereo_f32(4), entry_b).unwrap();
    assert_ne!(a.id(), b.id());
    a.start().unwrap();
    b.start().unwrap();

    let mock_a = driver.stream(0).unwrap();
    let mock_b = driver.stream(1).unwrap();

    for _ in 0..3 {
        assert_eq!(mock_a.run_period().unwrap().output_samples::<f32>(), vec![0.1; 8]);
        assert_eq!(mock_b.run_period().unwrap().output_samples::<f32>(), vec![0.2; 8]);
    }

    b.set_dispatch(entry_a);
    assert_eq!(mock_b.run_period().unwrap().output_samples::<f32>(), vec![0.1; 8]);

    drop(b);
    assert!(mock_b.is_closed());
    assert_eq!(mock_a.run_period().unwrap().output_samples::<f32>(), vec![0.1; 8]);
}

#[test]
fn test_indexed_entry_receives_id_token() {
    let driver = MockDriver::new();
    let mut stream = RawStream::open_indexed(&driver, &stereo_f32(8), record_fields).unwrap();
    stream.start().unwrap();

    SEEN.set(None);
    driver.last_stream().unwrap().run_period().unwrap();

    let seen = SEEN.get().unwrap();
    assert_eq!(seen.stream as usize, stream.id().unwrap().token());
    assert_eq!(seen.frame_count, 8);
}

#[test]
fn test_indexed_planar_stream_writes_each_channel() {
    let driver = MockDriver::new();
    let config = stereo_f32(3).planar();
    let mut stream = RawStream::open_indexed(&driver, &config, ramp_channels).unwrap();
    stream.start().unwrap();

    let mock = driver.last_stream().unwrap();
    let result = mock.run_period().unwrap();
    assert_eq!(result.output_channel_samples::<f32>(0), vec![0.0, 1.0, 2.0]);
    assert_eq!(result.output_channel_samples::<f32>(1), vec![10.0, 11.0, 12.0]);
}

// ============================================================================
// Typed streams
// ============================================================================

#[test]
fn test_typed_streams_finish_independently() {
    let driver = MockDriver::new();
    let config = StreamConfig {
        sample_format: SampleFormat::I16,
        ..stereo_f32(16)
    };

    let mut countdown = 2;
    let mut finishing = Stream::open(&driver, &config, move |period: &mut Period<'_>| {
        period.silence_output();
        countdown -= 1;
        if countdown == 0 {
            StatusCode::Complete
        } else {
            StatusCode::Continue
        }
    })
    .unwrap();
    let mut endless = Stream::open(&driver, &config, |period: &mut Period<'_>| {
        period.output::<i16>().unwrap().fill(100);
        StatusCode::Continue
    })
    .unwrap();
    finishing.start().unwrap();
    endless.start().unwrap();

    let finishing_mock = driver.stream(0).unwrap();
    let endless_mock = driver.stream(1).unwrap();

    assert_eq!(finishing_mock.run_periods(10).len(), 2);
    let results = endless_mock.run_periods(10);
    assert_eq!(results.len(), 10);
    assert!(results
        .iter()
        .all(|r| r.output_samples::<i16>() == vec![100; 32]));

    assert_eq!(finishing.outcome(), Some(StatusCode::Complete));
    assert_eq!(endless.outcome(), None);
    assert!(endless.is_active());
}

#[test]
fn test_typed_panic_aborts_and_reports() {
    let driver = MockDriver::new();
    let mut stream = Stream::open(&driver, &stereo_f32(4), |period: &mut Period<'_>| {
        if period.index() == 1 {
            panic!("bad period");
        }
        StatusCode::Continue
    })
    .unwrap();
    stream.start().unwrap();

    let mock = driver.last_stream().unwrap();
    let results = mock.run_periods(5);
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].status, Some(StatusCode::Abort));

    let events = stream.poll_events();
    assert_eq!(
        events,
        vec![
            StreamEvent::CallbackPanicked { period: 1 },
            StreamEvent::Finished {
                status: StatusCode::Abort,
                periods: 2
            },
        ]
    );
}

#[test]
fn test_typed_period_sees_driver_timing_and_flags() {
    let driver = MockDriver::new();
    let mut stream = Stream::open(&driver, &stereo_f32(4), |period: &mut Period<'_>| {
        let latency = period.time_info().map(TimeInfo::output_latency);
        let primed = period.status_flags().contains(StatusFlags::PRIMING_OUTPUT);
        if primed && latency == Some(Duration::from_millis(250)) {
            StatusCode::Complete
        } else {
            StatusCode::Abort
        }
    })
    .unwrap();
    stream.start().unwrap();

    let period = MockPeriod::default()
        .with_flags(StatusFlags::PRIMING_OUTPUT)
        .with_time_info(TimeInfo {
            input_buffer_adc_time: 0.0,
            current_time: 10.0,
            output_buffer_dac_time: 10.25,
        });
    let result = driver.last_stream().unwrap().run_period_with(period).unwrap();
    assert_eq!(result.status, Some(StatusCode::Complete));
}

#[tokio::test]
async fn test_wait_finished_with_driver_thread() {
    let driver = MockDriver::new();
    let mut stream = Stream::open(&driver, &stereo_f32(64), |period: &mut Period<'_>| {
        period.silence_output();
        if period.index() == 49 {
            StatusCode::Complete
        } else {
            StatusCode::Continue
        }
    })
    .unwrap();
    stream.start().unwrap();

    let mock = driver.last_stream().unwrap();
    let audio_thread = std::thread::spawn(move || {
        let mut periods = 0;
        while mock.run_period().is_some() {
            periods += 1;
            std::thread::sleep(Duration::from_micros(100));
        }
        periods
    });

    let status = tokio::time::timeout(
        Duration::from_secs(10),
        stream.wait_finished(Duration::from_millis(2)),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::Complete);
    assert_eq!(audio_thread.join().unwrap(), 50);
    assert_eq!(stream.periods(), 50);
}

// ============================================================================
// Hardware
// ============================================================================

#[test]
#[ignore = "requires audio hardware"]
fn test_cpal_output_stream_completes() {
    use stream_bridge::CpalDriver;

    let driver = CpalDriver::default_output().unwrap();
    let mut stream = Stream::open(&driver, &StreamConfig::output(2), |period: &mut Period<'_>| {
        period.silence_output();
        if period.index() >= 20 {
            StatusCode::Complete
        } else {
            StatusCode::Continue
        }
    })
    .unwrap();
    stream.start().unwrap();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap();
    let status = runtime.block_on(async {
        tokio::time::timeout(
            Duration::from_secs(10),
            stream.wait_finished(Duration::from_millis(10)),
        )
        .await
    });

    assert_eq!(status.unwrap(), StatusCode::Complete);
}
