//! Structured results of register dumps and device info queries.

use std::fmt;

use harpio_frame::registers::{
    ASSEMBLY_VERSION, CORE_VERSION_H, CORE_VERSION_L, DEVICE_NAME, FW_VERSION_H, FW_VERSION_L,
    HW_VERSION_H, HW_VERSION_L, OPERATION_CTRL, SERIAL_NUMBER, TIMESTAMP_MICRO, TIMESTAMP_SECOND,
    WHO_AM_I,
};
use harpio_frame::{HarpTimestamp, Payload, PayloadType};
use serde::Serialize;

use crate::error::DeviceError;
use crate::mode::{DeviceMode, OperationCtrl};

/// Decoded register contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Int(i64),
    Unsigned(u64),
    Float(f32),
    IntArray(Vec<i64>),
    UnsignedArray(Vec<u64>),
    FloatArray(Vec<f32>),
}

impl RegisterValue {
    pub fn from_payload(payload: &Payload) -> harpio_frame::Result<Self> {
        let scalar = payload.len() == 1;
        Ok(match payload.payload_type() {
            PayloadType::Float if scalar => RegisterValue::Float(payload.as_float()?),
            PayloadType::Float => RegisterValue::FloatArray(payload.array::<f32>()?),
            PayloadType::U64 if scalar => RegisterValue::Unsigned(payload.value::<u64>()?),
            PayloadType::U64 => RegisterValue::UnsignedArray(payload.array::<u64>()?),
            _ if scalar => RegisterValue::Int(payload.as_int()?),
            _ => RegisterValue::IntArray(payload.as_int_array()?),
        })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            RegisterValue::Int(v) => Some(*v),
            RegisterValue::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
            let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
            write!(f, "[{}]", rendered.join(", "))
        }
        match self {
            RegisterValue::Int(v) => write!(f, "{v}"),
            RegisterValue::Unsigned(v) => write!(f, "{v}"),
            RegisterValue::Float(v) => write!(f, "{v}"),
            RegisterValue::IntArray(v) => list(f, v),
            RegisterValue::UnsignedArray(v) => list(f, v),
            RegisterValue::FloatArray(v) => list(f, v),
        }
    }
}

/// Coarse failure classification for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Checksum,
    Format,
    Desync,
    ErrorReply,
    NotConnected,
    Other,
}

impl FailureKind {
    pub fn of(err: &DeviceError) -> Self {
        match err {
            DeviceError::Transport(e) if e.is_timeout() => FailureKind::Timeout,
            DeviceError::Frame(e) if e.is_checksum() => FailureKind::Checksum,
            DeviceError::Frame(e) if e.is_format() => FailureKind::Format,
            DeviceError::ProtocolDesync { .. } | DeviceError::UnexpectedReply { .. } => {
                FailureKind::Desync
            }
            DeviceError::ErrorReply { .. } => FailureKind::ErrorReply,
            DeviceError::NotConnected => FailureKind::NotConnected,
            _ => FailureKind::Other,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Checksum => "checksum",
            FailureKind::Format => "format",
            FailureKind::Desync => "desync",
            FailureKind::ErrorReply => "error reply",
            FailureKind::NotConnected => "not connected",
            FailureKind::Other => "error",
        };
        f.write_str(name)
    }
}

/// Result of reading one register during a dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReadOutcome {
    Ok {
        value: RegisterValue,
        #[serde(rename = "type", serialize_with = "type_name")]
        payload_type: PayloadType,
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    Failed {
        kind: FailureKind,
        error: String,
    },
}

fn type_name<S: serde::Serializer>(ty: &PayloadType, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(ty.name())
}

/// One register of a dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterReadout {
    pub name: String,
    pub address: u8,
    #[serde(flatten)]
    pub outcome: ReadOutcome,
}

impl RegisterReadout {
    pub fn value(&self) -> Option<&RegisterValue> {
        match &self.outcome {
            ReadOutcome::Ok { value, .. } => Some(value),
            ReadOutcome::Failed { .. } => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, ReadOutcome::Ok { .. })
    }
}

/// Per-register results of a dump, in read order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegisterDump {
    pub registers: Vec<RegisterReadout>,
}

impl RegisterDump {
    pub fn get(&self, address: u8) -> Option<&RegisterReadout> {
        self.registers.iter().find(|r| r.address == address)
    }

    pub fn value(&self, address: u8) -> Option<&RegisterValue> {
        self.get(address).and_then(RegisterReadout::value)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RegisterReadout> {
        self.registers.iter().filter(|r| !r.is_ok())
    }

    pub fn succeeded(&self) -> usize {
        self.registers.iter().filter(|r| r.is_ok()).count()
    }

    fn int(&self, address: u8) -> Option<i64> {
        self.value(address).and_then(RegisterValue::as_int)
    }

    fn byte(&self, address: u8) -> Option<u8> {
        self.int(address).and_then(|v| u8::try_from(v).ok())
    }

    fn version(&self, major: u8, minor: u8) -> Option<String> {
        Some(format!("{}.{}", self.byte(major)?, self.byte(minor)?))
    }
}

/// A register that failed to read, as listed in [`DeviceInfo`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterFailure {
    pub name: String,
    pub address: u8,
    pub kind: FailureKind,
    pub error: String,
}

/// Identity and status summary built from the common registers.
///
/// Fields are `None` when their register failed to read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub who_am_i: Option<u16>,
    pub hardware_version: Option<String>,
    pub assembly_version: Option<u8>,
    pub core_version: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<u16>,
    pub device_name: Option<String>,
    pub mode: Option<DeviceMode>,
    pub operation_ctrl: Option<u8>,
    /// Device clock in seconds.
    pub timestamp: Option<f64>,
    pub failures: Vec<RegisterFailure>,
}

impl DeviceInfo {
    pub fn from_dump(dump: &RegisterDump) -> Self {
        let operation_ctrl = dump.byte(OPERATION_CTRL);
        let timestamp = match (dump.int(TIMESTAMP_SECOND), dump.int(TIMESTAMP_MICRO)) {
            (Some(seconds), Some(ticks)) => Some(
                HarpTimestamp::new(
                    u32::try_from(seconds).unwrap_or_default(),
                    u16::try_from(ticks).unwrap_or_default(),
                )
                .as_secs_f64(),
            ),
            _ => None,
        };
        let failures = dump
            .registers
            .iter()
            .filter_map(|r| match &r.outcome {
                ReadOutcome::Failed { kind, error } => Some(RegisterFailure {
                    name: r.name.clone(),
                    address: r.address,
                    kind: *kind,
                    error: error.clone(),
                }),
                ReadOutcome::Ok { .. } => None,
            })
            .collect();

        Self {
            who_am_i: dump.int(WHO_AM_I).and_then(|v| u16::try_from(v).ok()),
            hardware_version: dump.version(HW_VERSION_H, HW_VERSION_L),
            assembly_version: dump.byte(ASSEMBLY_VERSION),
            core_version: dump.version(CORE_VERSION_H, CORE_VERSION_L),
            firmware_version: dump.version(FW_VERSION_H, FW_VERSION_L),
            serial_number: dump.int(SERIAL_NUMBER).and_then(|v| u16::try_from(v).ok()),
            device_name: dump.value(DEVICE_NAME).and_then(decode_name),
            mode: operation_ctrl.map(|bits| OperationCtrl(bits).mode()),
            operation_ctrl,
            timestamp,
            failures,
        }
    }
}

/// NUL-terminated ASCII name from a U8 array register.
fn decode_name(value: &RegisterValue) -> Option<String> {
    let bytes: Vec<u8> = match value {
        RegisterValue::IntArray(values) => values
            .iter()
            .map(|v| u8::try_from(*v).ok())
            .collect::<Option<_>>()?,
        RegisterValue::Int(v) => vec![u8::try_from(*v).ok()?],
        _ => return None,
    };
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show<T: fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map_or_else(|| "<unavailable>".to_string(), ToString::to_string)
        }
        writeln!(f, "Device name:       {}", show(&self.device_name))?;
        writeln!(f, "WHO_AM_I:          {}", show(&self.who_am_i))?;
        writeln!(f, "Hardware version:  {}", show(&self.hardware_version))?;
        writeln!(f, "Assembly version:  {}", show(&self.assembly_version))?;
        writeln!(f, "Core version:      {}", show(&self.core_version))?;
        writeln!(f, "Firmware version:  {}", show(&self.firmware_version))?;
        writeln!(f, "Serial number:     {}", show(&self.serial_number))?;
        writeln!(f, "Mode:              {}", show(&self.mode))?;
        write!(f, "Timestamp (s):     {}", show(&self.timestamp))?;
        for failure in &self.failures {
            write!(f, "\n! {} ({}): {}", failure.name, failure.address, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(name: &str, address: u8, payload: Payload) -> RegisterReadout {
        RegisterReadout {
            name: name.to_string(),
            address,
            outcome: ReadOutcome::Ok {
                value: RegisterValue::from_payload(&payload).unwrap(),
                payload_type: payload.payload_type(),
                timestamp: None,
            },
        }
    }

    #[test]
    fn values_from_payloads() {
        assert_eq!(
            RegisterValue::from_payload(&Payload::from_value(-3i16)).unwrap(),
            RegisterValue::Int(-3)
        );
        assert_eq!(
            RegisterValue::from_payload(&Payload::from_value(u64::MAX)).unwrap(),
            RegisterValue::Unsigned(u64::MAX)
        );
        assert_eq!(
            RegisterValue::from_payload(&Payload::from_slice(&[0.5f32, 1.0])).unwrap(),
            RegisterValue::FloatArray(vec![0.5, 1.0])
        );
        assert_eq!(
            RegisterValue::from_payload(&Payload::from_slice(&[1u8, 2])).unwrap().to_string(),
            "[1, 2]"
        );
    }

    #[test]
    fn info_from_partial_dump() {
        let mut name = b"pico harp".to_vec();
        name.resize(25, 0);
        let dump = RegisterDump {
            registers: vec![
                ok("WHO_AM_I", WHO_AM_I, Payload::from_value(1216u16)),
                ok("HW_VERSION_H", HW_VERSION_H, Payload::from_value(1u8)),
                ok("HW_VERSION_L", HW_VERSION_L, Payload::from_value(2u8)),
                RegisterReadout {
                    name: "CORE_VERSION_L".to_string(),
                    address: CORE_VERSION_L,
                    outcome: ReadOutcome::Failed {
                        kind: FailureKind::Timeout,
                        error: "timed out".to_string(),
                    },
                },
                ok("OPERATION_CTRL", OPERATION_CTRL, Payload::from_value(0x41u8)),
                ok("DEVICE_NAME", DEVICE_NAME, Payload::from_slice(&name)),
            ],
        };

        let info = DeviceInfo::from_dump(&dump);
        assert_eq!(info.who_am_i, Some(1216));
        assert_eq!(info.hardware_version.as_deref(), Some("1.2"));
        assert_eq!(info.core_version, None);
        assert_eq!(info.device_name.as_deref(), Some("pico harp"));
        assert_eq!(info.mode, Some(DeviceMode::Active));
        assert_eq!(info.failures.len(), 1);
        assert_eq!(info.failures[0].kind, FailureKind::Timeout);
        assert!(info.to_string().contains("Core version:      <unavailable>"));
    }

    #[test]
    fn dump_serializes_status_per_register() {
        let dump = RegisterDump {
            registers: vec![
                ok("WHO_AM_I", WHO_AM_I, Payload::from_value(7u16)),
                RegisterReadout {
                    name: "CORE_VERSION_L".to_string(),
                    address: 5,
                    outcome: ReadOutcome::Failed {
                        kind: FailureKind::Timeout,
                        error: "timed out".to_string(),
                    },
                },
            ],
        };
        let json = serde_json::to_value(&dump).unwrap();
        assert_eq!(json["registers"][0]["status"], "ok");
        assert_eq!(json["registers"][0]["value"], 7);
        assert_eq!(json["registers"][0]["type"], "U16");
        assert_eq!(json["registers"][1]["status"], "failed");
        assert_eq!(json["registers"][1]["kind"], "timeout");
        assert_eq!(dump.succeeded(), 1);
        assert_eq!(dump.failures().count(), 1);
    }
}
