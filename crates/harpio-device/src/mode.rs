//! Operating mode and control bit fields of the common registers.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::Serialize;

/// Operating mode held in OPERATION_CTRL bits 0-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    Standby,
    Active,
    Reserved,
    Speed,
}

impl DeviceMode {
    pub fn from_bits(bits: u8) -> Self {
        match bits & OperationCtrl::OP_MODE_MASK {
            0 => DeviceMode::Standby,
            1 => DeviceMode::Active,
            2 => DeviceMode::Reserved,
            _ => DeviceMode::Speed,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            DeviceMode::Standby => 0,
            DeviceMode::Active => 1,
            DeviceMode::Reserved => 2,
            DeviceMode::Speed => 3,
        }
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceMode::Standby => "standby",
            DeviceMode::Active => "active",
            DeviceMode::Reserved => "reserved",
            DeviceMode::Speed => "speed",
        };
        f.write_str(name)
    }
}

impl FromStr for DeviceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standby" => Ok(DeviceMode::Standby),
            "active" => Ok(DeviceMode::Active),
            "speed" => Ok(DeviceMode::Speed),
            other => Err(format!(
                "unknown device mode '{other}' (expected standby, active or speed)"
            )),
        }
    }
}

/// OPERATION_CTRL register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct OperationCtrl(pub u8);

impl OperationCtrl {
    pub const OP_MODE_MASK: u8 = 0b0000_0011;
    /// Request a dump of every register. Always reads back as zero.
    pub const DUMP: u8 = 1 << 3;
    /// Suppress replies.
    pub const MUTE_RPL: u8 = 1 << 4;
    pub const VISUALEN: u8 = 1 << 5;
    pub const OPLEDEN: u8 = 1 << 6;
    pub const ALIVE_EN: u8 = 1 << 7;

    pub fn mode(self) -> DeviceMode {
        DeviceMode::from_bits(self.0)
    }

    /// Replace the mode bits, keep every other bit except DUMP.
    pub fn with_mode(self, mode: DeviceMode) -> Self {
        Self((self.0 & !(Self::OP_MODE_MASK | Self::DUMP)) | mode.bits())
    }

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

/// RESET_DEV command bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResetFlags(u8);

impl ResetFlags {
    /// Reset and boot with default register values.
    pub const RST_DEF: ResetFlags = ResetFlags(0x01);
    /// Reset and boot with values stored in non-volatile memory.
    pub const RST_EE: ResetFlags = ResetFlags(0x02);
    /// Save the current non-common register values.
    pub const SAVE: ResetFlags = ResetFlags(0x04);
    pub const NAME_TO_DEFAULT: ResetFlags = ResetFlags(0x08);
    /// RP2040: reboot into the USB mass-storage bootloader.
    pub const BOOT_USB: ResetFlags = ResetFlags(0x20);
    /// Read-only status: booted with defaults.
    pub const BOOT_DEF: ResetFlags = ResetFlags(0x40);
    /// Read-only status: booted from non-volatile memory.
    pub const BOOT_EE: ResetFlags = ResetFlags(0x80);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: ResetFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether writing these flags reboots the device and ends the link.
    pub const fn reboots(self) -> bool {
        self.0 & (Self::RST_DEF.0 | Self::RST_EE.0 | Self::BOOT_USB.0) != 0
    }
}

impl BitOr for ResetFlags {
    type Output = ResetFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        ResetFlags(self.0 | rhs.0)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeviceState {
    Disconnected,
    /// Link open. `mode` is the last mode the device reported.
    Connected { mode: Option<DeviceMode> },
    /// A reset was issued; the device is rebooting.
    Reset,
    /// The device is rebooting into its bootloader.
    BootloaderUpdate,
}

impl DeviceState {
    pub fn is_connected(self) -> bool {
        matches!(self, DeviceState::Connected { .. })
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Disconnected => f.write_str("disconnected"),
            DeviceState::Connected { mode: Some(mode) } => write!(f, "connected ({mode})"),
            DeviceState::Connected { mode: None } => f.write_str("connected"),
            DeviceState::Reset => f.write_str("reset"),
            DeviceState::BootloaderUpdate => f.write_str("bootloader update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_bits_roundtrip() {
        for mode in [
            DeviceMode::Standby,
            DeviceMode::Active,
            DeviceMode::Reserved,
            DeviceMode::Speed,
        ] {
            assert_eq!(DeviceMode::from_bits(mode.bits()), mode);
        }
        assert_eq!(DeviceMode::from_bits(0b1111_0001), DeviceMode::Active);
    }

    #[test]
    fn with_mode_preserves_other_bits_and_clears_dump() {
        let ctrl = OperationCtrl(OperationCtrl::OPLEDEN | OperationCtrl::DUMP | 0b01);
        let next = ctrl.with_mode(DeviceMode::Standby);
        assert_eq!(next.mode(), DeviceMode::Standby);
        assert!(next.contains(OperationCtrl::OPLEDEN));
        assert!(!next.contains(OperationCtrl::DUMP));
    }

    #[test]
    fn parse_mode_names() {
        assert_eq!("Active".parse::<DeviceMode>().unwrap(), DeviceMode::Active);
        assert!("reserved".parse::<DeviceMode>().is_err());
    }

    #[test]
    fn reset_flags_classify_reboots() {
        assert!(ResetFlags::RST_DEF.reboots());
        assert!(ResetFlags::BOOT_USB.reboots());
        assert!(!ResetFlags::SAVE.reboots());
        assert!(!(ResetFlags::SAVE | ResetFlags::NAME_TO_DEFAULT).reboots());
        assert_eq!((ResetFlags::SAVE | ResetFlags::RST_EE).bits(), 0x06);
    }

    #[test]
    fn state_display() {
        assert_eq!(
            DeviceState::Connected {
                mode: Some(DeviceMode::Active)
            }
            .to_string(),
            "connected (active)"
        );
        assert_eq!(DeviceState::BootloaderUpdate.to_string(), "bootloader update");
    }
}
