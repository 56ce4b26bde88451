//! Global dispatch example.
//!
//! Registers a plain `extern "C-unwind"` entry point process-wide and plays
//! quiet white noise through the default output device. Halfway through, the
//! entry point is swapped for silence; the change is heard from the next
//! period on.
//!
//! Run with: cargo run --example noise

use std::cell::Cell;
use std::ptr;
use std::time::Duration;

use stream_bridge::{set_dispatch, CallbackContext, CpalDriver, RawStream, StreamConfig};

const CHANNELS: u16 = 2;

thread_local! {
    // Only ever touched on the audio thread.
    static SEED: Cell<u32> = const { Cell::new(0x1234_5678) };
}

fn next_sample() -> f32 {
    SEED.with(|seed| {
        let next = seed.get().wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        seed.set(next);
        (next >> 8) as f32 / (1 << 24) as f32 * 2.0 - 1.0
    })
}

#[allow(unsafe_code)]
unsafe extern "C-unwind" fn noise(ctx: *mut CallbackContext) {
    if let Some(out) = (*ctx).output_samples::<f32>(usize::from(CHANNELS)) {
        for sample in out {
            *sample = next_sample() * 0.05;
        }
    }
}

#[allow(unsafe_code)]
unsafe extern "C-unwind" fn silence(ctx: *mut CallbackContext) {
    if let Some(out) = (*ctx).output_samples::<f32>(usize::from(CHANNELS)) {
        out.fill(0.0);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt::init();

    let driver = CpalDriver::default_output()?;
    let config = StreamConfig::output(CHANNELS);

    let mut stream = RawStream::open_global(&driver, &config, noise, ptr::null_mut())?;
    stream.start()?;
    println!("Noise on {}...", driver.name());
    std::thread::sleep(Duration::from_secs(2));

    set_dispatch(silence);
    println!("Swapped to silence");
    std::thread::sleep(Duration::from_secs(1));

    stream.stop()?;
    Ok(())
}
