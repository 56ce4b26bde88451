//! Typed stream example.
//!
//! Plays a 440 Hz sine on the default output device for three seconds, then
//! lets the callback finish the stream.
//!
//! Run with: cargo run --example sine

use std::f32::consts::TAU;
use std::time::Duration;

use stream_bridge::{CpalDriver, Period, StatusCode, Stream, StreamConfig};

const FREQUENCY: f32 = 440.0;
const SECONDS: u64 = 3;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt::init();

    if let Ok(devices) = stream_bridge::list_output_devices() {
        println!("Output devices:");
        for device in devices {
            println!("  - {device}");
        }
    }

    let driver = CpalDriver::default_output()?;
    let config = StreamConfig::output(2);
    let sample_rate = config.sample_rate as f32;
    let total_frames = config.sample_rate as u64 * SECONDS;

    let mut phase = 0.0f32;
    let mut played = 0u64;
    let mut stream = Stream::open(&driver, &config, move |period: &mut Period<'_>| {
        let Some(out) = period.output::<f32>() else {
            return StatusCode::Abort;
        };
        for frame in out.chunks_mut(2) {
            frame.fill((phase * TAU).sin() * 0.2);
            phase = (phase + FREQUENCY / sample_rate) % 1.0;
        }
        played += period.frames() as u64;
        if played >= total_frames {
            StatusCode::Complete
        } else {
            StatusCode::Continue
        }
    })?
    .on_event(|event| println!("event: {event:?}"));

    println!("Playing {FREQUENCY} Hz on {} for {SECONDS}s...", driver.name());
    stream.start()?;

    let status = stream.wait_finished(Duration::from_millis(50)).await;
    stream.poll_events();
    stream.stop()?;

    println!("Finished with {status:?} after {} periods", stream.periods());
    Ok(())
}
