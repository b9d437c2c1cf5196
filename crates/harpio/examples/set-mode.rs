//! Switch a HARP device between Standby and Active.
//!
//! Run with:
//!   cargo run --example set-mode -- /dev/ttyACM0 active

use std::time::Duration;

use harpio::{Device, DeviceConfig, DeviceMode};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let port = args
        .next()
        .ok_or("usage: set-mode <serial port | unix:path> [standby|active|speed]")?;
    let mode: DeviceMode = args.next().as_deref().unwrap_or("active").parse()?;

    let device = Device::open(DeviceConfig::new(port).with_timeout(Duration::from_millis(500)))?;
    eprintln!("Current mode: {}", device.read_device_mode()?);

    let reported = device.set_mode(mode)?;
    eprintln!("Device reports: {reported}");
    eprintln!("Session state: {}", device.state());

    device.disconnect()?;
    Ok(())
}
