//! Print the identity and status of a HARP device.
//!
//! Run with:
//!   cargo run --example get-info -- /dev/ttyACM0
//!
//! Against an emulated device:
//!   cargo run --features cli -- emulate /tmp/harp.sock
//!   cargo run --example get-info -- unix:/tmp/harp.sock

use harpio::{Device, DeviceConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port = std::env::args()
        .nth(1)
        .ok_or("usage: get-info <serial port | unix:path>")?;

    let device = Device::open(DeviceConfig::new(port))?;
    let info = device.info()?;
    println!("{info}");

    let dump = device.dump_registers()?;
    eprintln!(
        "{} of {} registers read",
        dump.succeeded(),
        dump.registers.len()
    );
    device.disconnect()?;
    Ok(())
}
