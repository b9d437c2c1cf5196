//! Measure request/reply latency by reading WHO_AM_I in a loop.
//!
//! Run with:
//!   cargo run --release --example reply-speed -- /dev/ttyACM0 2000

use std::time::Duration;

use harpio::frame::registers::WHO_AM_I;
use harpio::{Device, DeviceConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let port = args
        .next()
        .ok_or("usage: reply-speed <serial port | unix:path> [count]")?;
    let count: u32 = args.next().as_deref().unwrap_or("1000").parse()?;

    let device = Device::open(DeviceConfig::new(port))?;
    let mut samples: Vec<Duration> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let reply = device.read_register(WHO_AM_I, harpio::frame::PayloadType::U16)?;
        samples.push(reply.round_trip());
    }
    device.disconnect()?;

    let us: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1e6).collect();
    let mean = us.iter().sum::<f64>() / us.len().max(1) as f64;
    let std_dev = (us.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / us.len().max(1) as f64).sqrt();
    let max = us.iter().copied().fold(0.0, f64::max);
    println!("{count} requests: mean {mean:.1} us, std dev {std_dev:.1} us, max {max:.1} us");
    Ok(())
}
