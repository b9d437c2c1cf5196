use std::path::{Path, PathBuf};
use std::time::Duration;

use harpio_transport::SerialConfig;
use serde::{Deserialize, Serialize};

use crate::correlator::{DEFAULT_QUIET_INTERVAL, DEFAULT_TIMEOUT};
use crate::error::{DeviceError, Result};
use crate::register_map::RegisterMap;
use crate::retry::RetryPolicy;

/// Session settings.
///
/// Deserialisable from JSON; durations are given in milliseconds:
///
/// ```json
/// {
///   "address": "/dev/ttyACM0",
///   "timeout_ms": 500,
///   "retry": { "max_attempts": 3, "backoff_ms": 20 },
///   "comm_log": "link.log",
///   "expected_who_am_i": 1216,
///   "register_map": "device-registers.json"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port name, or `unix:<path>` for a socket link.
    pub address: String,
    /// Serial baud rate.
    pub baud_rate: u32,
    /// Per-request reply deadline.
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// Silence that ends a resync drain.
    #[serde(rename = "quiet_interval_ms", with = "millis")]
    pub quiet_interval: Duration,
    pub retry: RetryPolicy,
    /// Append raw link traffic to this file.
    pub comm_log: Option<PathBuf>,
    /// Read WHO_AM_I on connect.
    pub verify_identity: bool,
    /// Fail the connect if WHO_AM_I differs.
    pub expected_who_am_i: Option<u16>,
    /// Register table file; the common bank when unset.
    #[serde(rename = "register_map")]
    pub register_map_path: Option<PathBuf>,
    #[serde(skip)]
    pub registers: RegisterMap,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            baud_rate: SerialConfig::default().baud_rate,
            timeout: DEFAULT_TIMEOUT,
            quiet_interval: DEFAULT_QUIET_INTERVAL,
            retry: RetryPolicy::default(),
            comm_log: None,
            verify_identity: true,
            expected_who_am_i: None,
            register_map_path: None,
            registers: RegisterMap::default(),
        }
    }
}

impl DeviceConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file, then its register map if one is named.
    ///
    /// A relative `register_map` path is resolved against the config
    /// file's directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            DeviceError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        let mut config: DeviceConfig = serde_json::from_str(&json)?;
        if let Some(map_path) = config.register_map_path.take() {
            let resolved = match path.parent() {
                Some(dir) if map_path.is_relative() => dir.join(map_path),
                _ => map_path,
            };
            config.registers = RegisterMap::from_path(&resolved)?;
            config.register_map_path = Some(resolved);
        }
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_comm_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.comm_log = Some(path.into());
        self
    }

    pub fn with_registers(mut self, registers: RegisterMap) -> Self {
        self.registers = registers;
        self
    }

    pub fn with_expected_who_am_i(mut self, who_am_i: u16) -> Self {
        self.expected_who_am_i = Some(who_am_i);
        self
    }

    pub fn serial(&self) -> SerialConfig {
        SerialConfig {
            baud_rate: self.baud_rate,
            ..SerialConfig::default()
        }
    }

    /// Reject settings no session could run with.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(DeviceError::Config("device address is empty".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(DeviceError::Config("timeout must be positive".to_string()));
        }
        if self.baud_rate == 0 {
            return Err(DeviceError::Config("baud rate must be positive".to_string()));
        }
        if self.expected_who_am_i.is_some() && !self.verify_identity {
            return Err(DeviceError::Config(
                "expected_who_am_i requires verify_identity".to_string(),
            ));
        }
        self.registers.validate()
    }
}

/// Serde adapter for `Duration` fields stored as integer milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("harpio-config-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn defaults_are_valid_once_addressed() {
        let config = DeviceConfig::default();
        assert!(matches!(config.validate(), Err(DeviceError::Config(_))));

        let config = DeviceConfig::new("/dev/ttyACM0");
        config.validate().unwrap();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.serial().baud_rate, 1_000_000);
    }

    #[test]
    fn loads_json_with_relative_register_map() {
        let dir = temp_dir("load");
        std::fs::write(
            dir.join("map.json"),
            r#"{ "registers": [ { "name": "LED", "address": 32, "type": "U8" } ] }"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("device.json"),
            r#"{
                "address": "unix:/tmp/dev.sock",
                "timeout_ms": 250,
                "retry": { "max_attempts": 3 },
                "expected_who_am_i": 1216,
                "register_map": "map.json"
            }"#,
        )
        .unwrap();

        let config = DeviceConfig::from_path(dir.join("device.json")).unwrap();
        assert_eq!(config.address, "unix:/tmp/dev.sock");
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.expected_who_am_i, Some(1216));
        assert_eq!(config.registers.address_of("LED").unwrap(), 32);
        assert_eq!(config.register_map_path, Some(dir.join("map.json")));
        config.validate().unwrap();

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = DeviceConfig::from_path("/nonexistent/harpio.json").unwrap_err();
        assert!(matches!(err, DeviceError::Config(_)));
    }

    #[test]
    fn identity_expectation_needs_verification() {
        let mut config = DeviceConfig::new("COM3").with_expected_who_am_i(7);
        config.verify_identity = false;
        assert!(matches!(config.validate(), Err(DeviceError::Config(_))));
    }
}
