//! Common register addresses shared by every HARP device.
//!
//! Addresses below [`APP_REGISTER_START`] are reserved for the common bank;
//! only 0..=15 are defined. Everything from 32 up belongs to the device
//! application.

use crate::payload::PayloadType;

pub const WHO_AM_I: u8 = 0;
pub const HW_VERSION_H: u8 = 1;
pub const HW_VERSION_L: u8 = 2;
pub const ASSEMBLY_VERSION: u8 = 3;
pub const CORE_VERSION_H: u8 = 4;
pub const CORE_VERSION_L: u8 = 5;
pub const FW_VERSION_H: u8 = 6;
pub const FW_VERSION_L: u8 = 7;
pub const TIMESTAMP_SECOND: u8 = 8;
pub const TIMESTAMP_MICRO: u8 = 9;
pub const OPERATION_CTRL: u8 = 10;
pub const RESET_DEV: u8 = 11;
pub const DEVICE_NAME: u8 = 12;
pub const SERIAL_NUMBER: u8 = 13;
pub const CLOCK_CONFIG: u8 = 14;
pub const TIMESTAMP_OFFSET: u8 = 15;

/// First application register address.
pub const APP_REGISTER_START: u8 = 32;

/// Element count of the DEVICE_NAME array.
pub const DEVICE_NAME_LEN: usize = 25;

/// Static description of a defined common register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonRegister {
    pub name: &'static str,
    pub address: u8,
    pub payload_type: PayloadType,
    pub count: usize,
    pub writable: bool,
}

const fn reg(
    name: &'static str,
    address: u8,
    payload_type: PayloadType,
    count: usize,
    writable: bool,
) -> CommonRegister {
    CommonRegister {
        name,
        address,
        payload_type,
        count,
        writable,
    }
}

/// The defined common registers, in address order.
pub const COMMON_REGISTERS: [CommonRegister; 16] = [
    reg("WHO_AM_I", WHO_AM_I, PayloadType::U16, 1, false),
    reg("HW_VERSION_H", HW_VERSION_H, PayloadType::U8, 1, false),
    reg("HW_VERSION_L", HW_VERSION_L, PayloadType::U8, 1, false),
    reg("ASSEMBLY_VERSION", ASSEMBLY_VERSION, PayloadType::U8, 1, false),
    reg("CORE_VERSION_H", CORE_VERSION_H, PayloadType::U8, 1, false),
    reg("CORE_VERSION_L", CORE_VERSION_L, PayloadType::U8, 1, false),
    reg("FW_VERSION_H", FW_VERSION_H, PayloadType::U8, 1, false),
    reg("FW_VERSION_L", FW_VERSION_L, PayloadType::U8, 1, false),
    reg("TIMESTAMP_SECOND", TIMESTAMP_SECOND, PayloadType::U32, 1, true),
    reg("TIMESTAMP_MICRO", TIMESTAMP_MICRO, PayloadType::U16, 1, false),
    reg("OPERATION_CTRL", OPERATION_CTRL, PayloadType::U8, 1, true),
    reg("RESET_DEV", RESET_DEV, PayloadType::U8, 1, true),
    reg("DEVICE_NAME", DEVICE_NAME, PayloadType::U8, DEVICE_NAME_LEN, true),
    reg("SERIAL_NUMBER", SERIAL_NUMBER, PayloadType::U16, 1, true),
    reg("CLOCK_CONFIG", CLOCK_CONFIG, PayloadType::U8, 1, true),
    reg("TIMESTAMP_OFFSET", TIMESTAMP_OFFSET, PayloadType::U8, 1, true),
];

/// True for addresses in the reserved common bank.
pub fn is_common(address: u8) -> bool {
    address < APP_REGISTER_START
}

pub fn common(address: u8) -> Option<&'static CommonRegister> {
    COMMON_REGISTERS.iter().find(|r| r.address == address)
}

pub fn common_by_name(name: &str) -> Option<&'static CommonRegister> {
    COMMON_REGISTERS
        .iter()
        .find(|r| r.name.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_address_ordered() {
        for (index, register) in COMMON_REGISTERS.iter().enumerate() {
            assert_eq!(usize::from(register.address), index);
            assert!(is_common(register.address));
        }
    }

    #[test]
    fn lookup_by_name_and_address() {
        assert_eq!(common(OPERATION_CTRL).unwrap().name, "OPERATION_CTRL");
        assert_eq!(common_by_name("who_am_i").unwrap().address, WHO_AM_I);
        assert_eq!(common(DEVICE_NAME).unwrap().count, DEVICE_NAME_LEN);
        assert!(common(20).is_none());
        assert!(!is_common(APP_REGISTER_START));
    }
}
