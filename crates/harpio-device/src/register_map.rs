//! Configurable register table.
//!
//! Register addresses are looked up by name, never hard-coded in the
//! session. The default table is the HARP common bank; a JSON file can
//! move common registers and add application registers:
//!
//! ```json
//! {
//!   "common": true,
//!   "registers": [
//!     { "name": "RESET_DEV", "address": 11, "type": "U8" },
//!     { "name": "LED_PWM", "address": 32, "type": "U16", "count": 2 }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use harpio_frame::registers::{self, APP_REGISTER_START, COMMON_REGISTERS};
use harpio_frame::{PayloadType, MAX_TIMESTAMPED_PAYLOAD};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DeviceError, Result};

pub const WHO_AM_I: &str = "WHO_AM_I";
pub const OPERATION_CTRL: &str = "OPERATION_CTRL";
pub const RESET_DEV: &str = "RESET_DEV";

/// Registers every map must define, with their required shape.
const REQUIRED_ROLES: [(&str, PayloadType); 3] = [
    (WHO_AM_I, PayloadType::U16),
    (OPERATION_CTRL, PayloadType::U8),
    (RESET_DEV, PayloadType::U8),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
    #[default]
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// One register of the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSpec {
    pub name: String,
    pub address: u8,
    #[serde(rename = "type", with = "payload_type_name")]
    pub payload_type: PayloadType,
    /// Element count; more than one for array registers.
    #[serde(default = "one")]
    pub count: usize,
    #[serde(default)]
    pub access: Access,
}

fn one() -> usize {
    1
}

impl RegisterSpec {
    pub fn new(name: impl Into<String>, address: u8, payload_type: PayloadType) -> Self {
        Self {
            name: name.into(),
            address,
            payload_type,
            count: 1,
            access: Access::ReadWrite,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn is_common(&self) -> bool {
        registers::is_common(self.address)
    }
}

/// Validated register table, kept in address order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterMap {
    registers: Vec<RegisterSpec>,
}

#[derive(Deserialize)]
struct RegisterMapFile {
    #[serde(default = "yes")]
    common: bool,
    #[serde(default)]
    registers: Vec<RegisterSpec>,
}

fn yes() -> bool {
    true
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::harp_common()
    }
}

impl RegisterMap {
    /// The HARP common register bank.
    pub fn harp_common() -> Self {
        let registers = COMMON_REGISTERS
            .iter()
            .map(|r| {
                let access = if r.writable {
                    Access::ReadWrite
                } else {
                    Access::Read
                };
                RegisterSpec::new(r.name, r.address, r.payload_type)
                    .with_count(r.count)
                    .with_access(access)
            })
            .collect();
        Self { registers }
    }

    /// Build and validate a map from an explicit register list.
    pub fn new(registers: Vec<RegisterSpec>) -> Result<Self> {
        let mut map = Self { registers };
        map.registers.sort_by_key(|r| r.address);
        map.validate()?;
        Ok(map)
    }

    /// The common bank plus `extra`. Entries named like a common register
    /// replace it.
    pub fn with_overrides(extra: Vec<RegisterSpec>) -> Result<Self> {
        let mut registers = Self::harp_common().registers;
        for spec in extra {
            match registers.iter_mut().find(|r| r.name == spec.name) {
                Some(existing) => *existing = spec,
                None => registers.push(spec),
            }
        }
        Self::new(registers)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let file: RegisterMapFile = serde_json::from_str(json)?;
        if file.common {
            Self::with_overrides(file.registers)
        } else {
            Self::new(file.registers)
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            DeviceError::Config(format!("cannot read register map {}: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Check names, addresses, shapes and required roles.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        let mut addresses = HashSet::new();

        for spec in &self.registers {
            if spec.name.is_empty() {
                return Err(invalid(format!("register at address {} has no name", spec.address)));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(invalid(format!("duplicate register name {}", spec.name)));
            }
            if !addresses.insert(spec.address) {
                return Err(invalid(format!("duplicate register address {}", spec.address)));
            }

            let common_name = registers::common_by_name(&spec.name).is_some();
            if common_name && spec.address >= APP_REGISTER_START {
                return Err(invalid(format!(
                    "common register {} must be below address {APP_REGISTER_START}, got {}",
                    spec.name, spec.address
                )));
            }
            if !common_name && spec.address < APP_REGISTER_START {
                return Err(invalid(format!(
                    "application register {} must be at address {APP_REGISTER_START} or above, got {}",
                    spec.name, spec.address
                )));
            }

            let bytes = spec.count * spec.payload_type.width();
            if spec.count == 0 || bytes > MAX_TIMESTAMPED_PAYLOAD {
                return Err(invalid(format!(
                    "register {} has {} elements; 1..={} bytes allowed",
                    spec.name, spec.count, MAX_TIMESTAMPED_PAYLOAD
                )));
            }
        }

        for (role, payload_type) in REQUIRED_ROLES {
            let spec = self
                .get(role)
                .ok_or_else(|| invalid(format!("required register {role} is missing")))?;
            if spec.payload_type != payload_type || spec.count != 1 {
                return Err(invalid(format!(
                    "register {role} must be a single {payload_type}, got {} x{}",
                    spec.payload_type, spec.count
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisterSpec> {
        self.registers
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
    }

    pub fn by_address(&self, address: u8) -> Option<&RegisterSpec> {
        self.registers.iter().find(|r| r.address == address)
    }

    /// Resolve a register name, or a decimal/`0x` address.
    pub fn resolve(&self, key: &str) -> Result<&RegisterSpec> {
        if let Some(spec) = self.get(key) {
            return Ok(spec);
        }
        parse_address(key)
            .and_then(|address| self.by_address(address))
            .ok_or_else(|| DeviceError::UnknownRegister(key.to_string()))
    }

    /// Address of a named register.
    pub fn address_of(&self, name: &str) -> Result<u8> {
        self.get(name)
            .map(|r| r.address)
            .ok_or_else(|| DeviceError::UnknownRegister(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterSpec> {
        self.registers.iter()
    }

    pub fn common(&self) -> impl Iterator<Item = &RegisterSpec> {
        self.registers.iter().filter(|r| r.is_common())
    }

    pub fn application(&self) -> impl Iterator<Item = &RegisterSpec> {
        self.registers.iter().filter(|r| !r.is_common())
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

/// Parse `42` or `0x2A`.
pub fn parse_address(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

fn invalid(message: String) -> DeviceError {
    DeviceError::RegisterMap(message)
}

mod payload_type_name {
    use super::*;

    pub fn serialize<S: Serializer>(value: &PayloadType, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(value.name())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<PayloadType, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_map_is_valid_common_bank() {
        let map = RegisterMap::default();
        map.validate().unwrap();
        assert_eq!(map.len(), 16);
        assert_eq!(map.address_of(RESET_DEV).unwrap(), 11);
        assert_eq!(map.get("device_name").unwrap().count, 25);
        assert!(!map.get(WHO_AM_I).unwrap().access.writable());
        assert_eq!(map.application().count(), 0);
    }

    #[test]
    fn json_overrides_and_extends() {
        let map = RegisterMap::from_json_str(
            r#"{
                "registers": [
                    { "name": "RESET_DEV", "address": 17, "type": "U8" },
                    { "name": "LED_PWM", "address": 32, "type": "U16", "count": 2 },
                    { "name": "ANALOG_IN", "address": 33, "type": "Float", "access": "read" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(map.address_of(RESET_DEV).unwrap(), 17);
        assert!(map.by_address(11).is_none());
        let led = map.resolve("led_pwm").unwrap();
        assert_eq!((led.payload_type, led.count), (PayloadType::U16, 2));
        assert_eq!(map.resolve("0x21").unwrap().name, "ANALOG_IN");
        assert_eq!(map.application().count(), 2);
    }

    #[test]
    fn rejects_duplicate_address() {
        let err = RegisterMap::with_overrides(vec![
            RegisterSpec::new("A", 40, PayloadType::U8),
            RegisterSpec::new("B", 40, PayloadType::U8),
        ])
        .unwrap_err();
        assert!(matches!(err, DeviceError::RegisterMap(ref m) if m.contains("duplicate register address")));
    }

    #[test]
    fn rejects_application_register_in_common_range() {
        let err = RegisterMap::with_overrides(vec![RegisterSpec::new("LED", 20, PayloadType::U8)])
            .unwrap_err();
        assert!(matches!(err, DeviceError::RegisterMap(_)));
    }

    #[test]
    fn rejects_common_register_in_application_range() {
        let err =
            RegisterMap::with_overrides(vec![RegisterSpec::new("RESET_DEV", 40, PayloadType::U8)])
                .unwrap_err();
        assert!(matches!(err, DeviceError::RegisterMap(_)));
    }

    #[test]
    fn requires_roles() {
        let err = RegisterMap::from_json_str(
            r#"{ "common": false, "registers": [ { "name": "WHO_AM_I", "address": 0, "type": "U16" } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DeviceError::RegisterMap(ref m) if m.contains("OPERATION_CTRL")));
    }

    #[test]
    fn rejects_wrong_role_shape() {
        let err = RegisterMap::with_overrides(vec![RegisterSpec::new("WHO_AM_I", 0, PayloadType::U8)])
            .unwrap_err();
        assert!(matches!(err, DeviceError::RegisterMap(_)));
    }

    #[test]
    fn rejects_oversized_array() {
        let err = RegisterMap::with_overrides(vec![
            RegisterSpec::new("BIG", 50, PayloadType::U32).with_count(100),
        ])
        .unwrap_err();
        assert!(matches!(err, DeviceError::RegisterMap(_)));
    }

    #[test]
    fn unknown_register_lookup() {
        let map = RegisterMap::default();
        assert!(matches!(map.resolve("NOPE"), Err(DeviceError::UnknownRegister(_))));
        assert!(matches!(map.resolve("200"), Err(DeviceError::UnknownRegister(_))));
        assert_eq!(map.resolve("10").unwrap().name, "OPERATION_CTRL");
    }

    #[test]
    fn bad_type_name_is_json_error() {
        let err = RegisterMap::from_json_str(
            r#"{ "registers": [ { "name": "X", "address": 40, "type": "U7" } ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, DeviceError::Json(_)));
    }

    #[test]
    fn parse_address_forms() {
        assert_eq!(parse_address("32"), Some(32));
        assert_eq!(parse_address("0x2a"), Some(42));
        assert_eq!(parse_address("256"), None);
        assert_eq!(parse_address("reg"), None);
    }
}
