use std::str::FromStr;

use harpio_frame::{Payload, PayloadElement, PayloadType};

use crate::cmd::read::{print_reply, Target};
use crate::cmd::WriteArgs;
use crate::exit::{device_error, CliError, CliResult, SUCCESS};
use crate::output::OutputFormat;

pub fn run(args: WriteArgs, format: OutputFormat) -> CliResult<i32> {
    let device = args.connect.open()?;
    let target = Target::resolve(device.registers(), &args.register, args.payload_type.as_deref())?;
    let payload = parse_payload(target.payload_type, &args.values)?;
    if let Some(spec) = device.registers().by_address(target.address) {
        if payload.len() != spec.count && spec.count > 1 {
            tracing::warn!(
                register = %spec.name,
                expected = spec.count,
                given = payload.len(),
                "element count differs from the register map"
            );
        }
    }

    let reply = device
        .write_register(target.address, payload)
        .map_err(|err| device_error(&format!("write {} failed", target.label()), err))?;
    device
        .disconnect()
        .map_err(|err| device_error("disconnect failed", err))?;

    print_reply(&target, &reply, format)?;
    Ok(SUCCESS)
}

/// Parse command-line values as elements of `payload_type`.
pub fn parse_payload(payload_type: PayloadType, values: &[String]) -> CliResult<Payload> {
    match payload_type {
        PayloadType::U8 => parse_all::<u8>(values),
        PayloadType::S8 => parse_all::<i8>(values),
        PayloadType::U16 => parse_all::<u16>(values),
        PayloadType::S16 => parse_all::<i16>(values),
        PayloadType::U32 => parse_all::<u32>(values),
        PayloadType::S32 => parse_all::<i32>(values),
        PayloadType::U64 => parse_all::<u64>(values),
        PayloadType::S64 => parse_all::<i64>(values),
        PayloadType::Float => parse_all::<f32>(values),
    }
}

fn parse_all<T>(values: &[String]) -> CliResult<Payload>
where
    T: PayloadElement + FromStr,
{
    let parsed = values
        .iter()
        .map(|raw| parse_one::<T>(raw))
        .collect::<CliResult<Vec<T>>>()?;
    Ok(Payload::from_slice(&parsed))
}

fn parse_one<T: PayloadElement + FromStr>(raw: &str) -> CliResult<T> {
    let invalid = || CliError::usage(format!("'{raw}' is not a valid {} value", T::TYPE));
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if T::TYPE.is_float() {
            return Err(invalid());
        }
        let value = u64::from_str_radix(hex, 16).map_err(|_| invalid())?;
        return value.to_string().parse().map_err(|_| invalid());
    }
    raw.parse().map_err(|_| invalid())
}
