use harpio_device::DeviceMode;
use serde::Serialize;

use crate::cmd::ModeArgs;
use crate::exit::{device_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct ModeOutput {
    mode: DeviceMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested: Option<DeviceMode>,
}

pub fn run(args: ModeArgs, format: OutputFormat) -> CliResult<i32> {
    let device = args.connect.open()?;
    let mode = match args.mode {
        Some(requested) => device.set_mode(requested),
        None => device.read_device_mode(),
    }
    .map_err(|err| device_error("mode failed", err))?;
    device
        .disconnect()
        .map_err(|err| device_error("disconnect failed", err))?;

    let out = ModeOutput {
        mode,
        requested: args.mode,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&[("Mode", mode.to_string())]),
        OutputFormat::Pretty => println!("mode: {mode}"),
        OutputFormat::Raw => println!("{mode}"),
    }

    match args.mode {
        Some(requested) if requested != mode => Ok(FAILURE),
        _ => Ok(SUCCESS),
    }
}
