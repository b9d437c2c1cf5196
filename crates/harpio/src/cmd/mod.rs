use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use harpio_device::{Device, DeviceConfig, DeviceMode, RegisterMap, RetryPolicy};

use crate::exit::{device_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod bench;
pub mod dump;
pub mod emulate;
pub mod info;
pub mod mode;
pub mod read;
pub mod reset;
pub mod version;
pub mod write;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print device identity and status.
    Info(InfoArgs),
    /// Read every register of the register map.
    Dump(DumpArgs),
    /// Show or change the operating mode.
    Mode(ModeArgs),
    /// Read one register.
    Read(ReadArgs),
    /// Write one register.
    Write(WriteArgs),
    /// Reset or reboot the device.
    Reset(ResetArgs),
    /// Measure request/reply round-trip times.
    Bench(BenchArgs),
    /// Serve an emulated device on a Unix socket.
    Emulate(EmulateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Info(args) => info::run(args, format),
        Command::Dump(args) => dump::run(args, format),
        Command::Mode(args) => mode::run(args, format),
        Command::Read(args) => read::run(args, format),
        Command::Write(args) => write::run(args, format),
        Command::Reset(args) => reset::run(args, format),
        Command::Bench(args) => bench::run(args, format),
        Command::Emulate(args) => emulate::run(args),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the device. Flags override the `--config` file.
#[derive(Args, Debug, Default)]
pub struct ConnectArgs {
    /// Serial port, or `unix:<path>` for an emulated device.
    #[arg(long, short = 'p', alias = "address", env = "HARPIO_PORT")]
    pub port: Option<String>,
    /// JSON session config file.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Reply timeout (e.g. 1s, 250ms).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Attempts per request, including the first.
    #[arg(long)]
    pub retries: Option<u32>,
    /// Serial baud rate.
    #[arg(long)]
    pub baud: Option<u32>,
    /// Append raw link traffic to this file.
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
    /// JSON register map extending the common bank.
    #[arg(long, value_name = "FILE")]
    pub register_map: Option<PathBuf>,
    /// Fail unless WHO_AM_I matches.
    #[arg(long, value_name = "ID")]
    pub expect_who_am_i: Option<u16>,
}

impl ConnectArgs {
    pub fn device_config(&self) -> CliResult<DeviceConfig> {
        let mut config = match &self.config {
            Some(path) => {
                DeviceConfig::from_path(path).map_err(|err| device_error("config", err))?
            }
            None => DeviceConfig::default(),
        };
        if let Some(port) = &self.port {
            config.address = port.clone();
        }
        if config.address.is_empty() {
            return Err(CliError::usage(
                "no device given (use --port, HARPIO_PORT or a --config file)",
            ));
        }
        if let Some(timeout) = &self.timeout {
            config.timeout = parse_duration(timeout)?;
        }
        if let Some(retries) = self.retries {
            config.retry = RetryPolicy {
                max_attempts: retries,
                ..config.retry
            };
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(path) = &self.log_file {
            config.comm_log = Some(path.clone());
        }
        if let Some(path) = &self.register_map {
            config.registers =
                RegisterMap::from_path(path).map_err(|err| device_error("register map", err))?;
            config.register_map_path = Some(path.clone());
        }
        if let Some(who_am_i) = self.expect_who_am_i {
            config = config.with_expected_who_am_i(who_am_i);
        }
        Ok(config)
    }

    pub fn open(&self) -> CliResult<Device> {
        let config = self.device_config()?;
        Device::open(config).map_err(|err| device_error("connect failed", err))
    }
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    #[command(flatten)]
    pub connect: ConnectArgs,
    /// Only the common registers (0-15).
    #[arg(long)]
    pub common: bool,
}

#[derive(Args, Debug)]
pub struct ModeArgs {
    /// Mode to switch to (standby, active, speed). Omit to read it.
    #[arg(value_parser = parse_mode)]
    pub mode: Option<DeviceMode>,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Register name or address (decimal or 0x hex).
    pub register: String,
    /// Payload type for registers missing from the map (U8, S16, Float, ...).
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub payload_type: Option<String>,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Register name or address (decimal or 0x hex).
    pub register: String,
    /// Values to write; several for array registers.
    #[arg(required = true, num_args = 1.., allow_negative_numbers = true)]
    pub values: Vec<String>,
    /// Payload type for registers missing from the map.
    #[arg(long = "type", short = 't', value_name = "TYPE")]
    pub payload_type: Option<String>,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Reboot into the USB bootloader for a firmware update.
    #[arg(long, conflicts_with_all = ["defaults", "eeprom", "save"])]
    pub bootloader: bool,
    /// Reboot with default register values (the default action).
    #[arg(long)]
    pub defaults: bool,
    /// Reboot with the values saved in non-volatile memory.
    #[arg(long, conflicts_with = "defaults")]
    pub eeprom: bool,
    /// Save the current registers to non-volatile memory.
    #[arg(long)]
    pub save: bool,
    /// Restore the default device name.
    #[arg(long)]
    pub name_to_default: bool,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct BenchArgs {
    /// Number of requests.
    #[arg(long, short = 'n', default_value = "1000")]
    pub count: u32,
    /// Register to read.
    #[arg(long, default_value = "WHO_AM_I")]
    pub register: String,
    #[command(flatten)]
    pub connect: ConnectArgs,
}

#[derive(Args, Debug)]
pub struct EmulateArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// Exit after serving N connections.
    #[arg(long)]
    pub count: Option<usize>,
    /// WHO_AM_I the emulated device reports.
    #[arg(long, default_value = "1216")]
    pub who_am_i: u16,
    /// Device name the emulated device reports.
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_mode(input: &str) -> Result<DeviceMode, String> {
    input.parse()
}

/// Parse `5s`, `250ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
    }

    #[test]
    fn parse_duration_invalid() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = ConnectArgs {
            port: Some("unix:/tmp/dev.sock".to_string()),
            timeout: Some("250ms".to_string()),
            retries: Some(3),
            baud: Some(115_200),
            expect_who_am_i: Some(1216),
            ..ConnectArgs::default()
        };
        let config = args.device_config().unwrap();
        assert_eq!(config.address, "unix:/tmp/dev.sock");
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.expected_who_am_i, Some(1216));
    }

    #[test]
    fn missing_port_is_usage_error() {
        let err = ConnectArgs::default().device_config().unwrap_err();
        assert_eq!(err.code, crate::exit::USAGE);
    }
}
