use harpio_device::DeviceInfo;

use crate::cmd::InfoArgs;
use crate::exit::{device_error, CliResult, FAILURE, SUCCESS};
use crate::output::{or_dash, print_fields, print_json, OutputFormat};

pub fn run(args: InfoArgs, format: OutputFormat) -> CliResult<i32> {
    let device = args.connect.open()?;
    let info = device.info().map_err(|err| device_error("info failed", err))?;
    device
        .disconnect()
        .map_err(|err| device_error("disconnect failed", err))?;

    print_info(&info, format);
    if info.failures.is_empty() {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

fn print_info(info: &DeviceInfo, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(info),
        OutputFormat::Table => {
            let mut fields = vec![
                ("WHO_AM_I", or_dash(info.who_am_i)),
                ("Device name", or_dash(info.device_name.as_deref())),
                ("Hardware", or_dash(info.hardware_version.as_deref())),
                ("Assembly", or_dash(info.assembly_version)),
                ("Core", or_dash(info.core_version.as_deref())),
                ("Firmware", or_dash(info.firmware_version.as_deref())),
                ("Serial number", or_dash(info.serial_number)),
                ("Mode", or_dash(info.mode)),
                (
                    "Timestamp",
                    or_dash(info.timestamp.map(|ts| format!("{ts:.6}"))),
                ),
            ];
            for failure in &info.failures {
                fields.push(("Failed", format!("{} ({})", failure.name, failure.kind)));
            }
            print_fields(&fields);
        }
        OutputFormat::Pretty => println!("{info}"),
        OutputFormat::Raw => println!("{}", or_dash(info.who_am_i)),
    }
}
