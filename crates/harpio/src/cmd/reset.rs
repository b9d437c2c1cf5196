use harpio_device::{DeviceState, ResetFlags};
use serde::Serialize;

use crate::cmd::ResetArgs;
use crate::exit::{device_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, OutputFormat};

#[derive(Serialize)]
struct ResetOutput {
    flags: u8,
    state: DeviceState,
}

pub fn run(args: ResetArgs, format: OutputFormat) -> CliResult<i32> {
    let flags = flags(&args);
    let device = args.connect.open()?;
    device
        .reset_device(flags)
        .map_err(|err| device_error("reset failed", err))?;
    let state = device.state();
    device
        .disconnect()
        .map_err(|err| device_error("disconnect failed", err))?;

    let out = ResetOutput {
        flags: flags.bits(),
        state,
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&[
            ("Flags", format!("{:#04x}", out.flags)),
            ("State", state.to_string()),
        ]),
        OutputFormat::Pretty | OutputFormat::Raw => println!("{state}"),
    }
    Ok(SUCCESS)
}

/// RESET_DEV bits for the given options; a plain `reset` reboots with defaults.
fn flags(args: &ResetArgs) -> ResetFlags {
    if args.bootloader {
        return ResetFlags::BOOT_USB;
    }
    let mut flags = ResetFlags::from_bits(0);
    if args.defaults {
        flags = flags | ResetFlags::RST_DEF;
    }
    if args.eeprom {
        flags = flags | ResetFlags::RST_EE;
    }
    if args.save {
        flags = flags | ResetFlags::SAVE;
    }
    if args.name_to_default {
        flags = flags | ResetFlags::NAME_TO_DEFAULT;
    }
    if flags.bits() == 0 {
        flags = ResetFlags::RST_DEF;
    }
    flags
}
