use harpio_device::register_map::parse_address;
use harpio_device::{Reply, RegisterMap, RegisterValue};
use harpio_frame::PayloadType;
use serde::Serialize;

use crate::cmd::ReadArgs;
use crate::exit::{device_error, frame_error, CliError, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_raw, OutputFormat};

/// A register resolved from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: Option<String>,
    pub address: u8,
    pub payload_type: PayloadType,
}

impl Target {
    /// Resolve `key` against the map. Addresses missing from the map need
    /// an explicit type.
    pub fn resolve(map: &RegisterMap, key: &str, payload_type: Option<&str>) -> CliResult<Self> {
        let payload_type = payload_type
            .map(|raw| raw.parse::<PayloadType>().map_err(CliError::usage))
            .transpose()?;
        if let Ok(spec) = map.resolve(key) {
            return Ok(Self {
                name: Some(spec.name.clone()),
                address: spec.address,
                payload_type: payload_type.unwrap_or(spec.payload_type),
            });
        }
        let address = parse_address(key)
            .ok_or_else(|| CliError::usage(format!("unknown register: {key}")))?;
        let payload_type = payload_type.ok_or_else(|| {
            CliError::usage(format!(
                "register {address} is not in the register map; pass --type"
            ))
        })?;
        Ok(Self {
            name: None,
            address,
            payload_type,
        })
    }

    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} ({})", self.address),
            None => self.address.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct ValueOutput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    pub address: u8,
    #[serde(rename = "type")]
    pub payload_type: &'static str,
    pub value: RegisterValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    pub round_trip_us: u64,
}

pub fn run(args: ReadArgs, format: OutputFormat) -> CliResult<i32> {
    let device = args.connect.open()?;
    let target = Target::resolve(device.registers(), &args.register, args.payload_type.as_deref())?;
    let reply = device
        .read_register(target.address, target.payload_type)
        .map_err(|err| device_error(&format!("read {} failed", target.label()), err))?;
    device
        .disconnect()
        .map_err(|err| device_error("disconnect failed", err))?;

    print_reply(&target, &reply, format)?;
    Ok(SUCCESS)
}

/// Print a read or write reply.
pub fn print_reply(target: &Target, reply: &Reply, format: OutputFormat) -> CliResult<()> {
    let payload = &reply.frame.payload;
    if format == OutputFormat::Raw {
        print_raw(payload.as_bytes());
        return Ok(());
    }

    let value =
        RegisterValue::from_payload(payload).map_err(|err| frame_error("bad reply payload", err))?;
    let out = ValueOutput {
        name: target.name.as_deref(),
        address: target.address,
        payload_type: payload.payload_type().name(),
        value,
        timestamp: reply.frame.timestamp.map(|ts| ts.as_secs_f64()),
        round_trip_us: u64::try_from(reply.round_trip().as_micros()).unwrap_or(u64::MAX),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&[
            ("Register", target.label()),
            ("Type", out.payload_type.to_string()),
            ("Value", out.value.to_string()),
            (
                "Timestamp",
                out.timestamp.map_or_else(|| "-".to_string(), |ts| format!("{ts:.6}")),
            ),
        ]),
        OutputFormat::Pretty | OutputFormat::Raw => println!("{} = {}", target.label(), out.value),
    }
    Ok(())
}
