use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::ops::Deref;
use std::str::FromStr;

use crate::core::modbus::Value;

/// The 64-bit ROM code of a 1-Wire device.
///
/// Stable across power cycles, unlike the index the bridge assigns while
/// enumerating the bus.
#[derive(Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
pub struct SensorSerial(pub u64);

impl SensorSerial {
    /// Joins the four registers the bridge exposes per sensor, most
    /// significant register first.
    pub fn from_registers(registers: [Value; 4]) -> SensorSerial {
        SensorSerial(
            registers
                .iter()
                .fold(0u64, |acc, register| (acc << 16) | *register as u64),
        )
    }

    /// The ROM code in wire order (family code first).
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl From<u64> for SensorSerial {
    fn from(value: u64) -> Self {
        SensorSerial(value)
    }
}

impl Deref for SensorSerial {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for SensorSerial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018X}", self.0)
    }
}

impl FromStr for SensorSerial {
    type Err = ParseIntError;

    /// Accepts a base-prefixed literal (`0x`, `0o`, `0b`) or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
            (rest, 16)
        } else if let Some(rest) = lower.strip_prefix("0o") {
            (rest, 8)
        } else if let Some(rest) = lower.strip_prefix("0b") {
            (rest, 2)
        } else {
            (lower.as_str(), 10)
        };

        u64::from_str_radix(&digits.replace('_', ""), radix).map(SensorSerial)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn joins_registers_big_endian() {
        let serial = SensorSerial::from_registers([0x28FF, 0x641A, 0x0500, 0x0000]);

        assert_eq!(serial.to_bytes(), [0x28, 0xFF, 0x64, 0x1A, 0x05, 0x00, 0x00, 0x00]);
        assert_eq!(*serial, 0x28FF_641A_0500_0000);
    }

    #[test]
    fn parses_prefixed_literals() {
        assert_eq!("0x28FF641A05000000".parse(), Ok(SensorSerial(0x28FF_641A_0500_0000)));
        assert_eq!("0X10".parse(), Ok(SensorSerial(16)));
        assert_eq!("0o17".parse(), Ok(SensorSerial(15)));
        assert_eq!("0b101".parse(), Ok(SensorSerial(5)));
        assert_eq!("42".parse(), Ok(SensorSerial(42)));
        assert!("0xZZ".parse::<SensorSerial>().is_err());
        assert!("".parse::<SensorSerial>().is_err());
    }

    #[test]
    fn displays_as_hex() {
        assert_eq!(SensorSerial(0x28FF).to_string(), "0x00000000000028FF");
    }
}
