use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Full-scale output of the bias DACs, in volts.
pub const FULL_SCALE_VOLTS: f64 = 60.0;

/// Resolution of the bias DACs.
pub const DAC_BITS: u32 = 12;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ConversionError {
    #[error("voltage {voltage} V is outside [0, {full_scale}] V")]
    VoltageOutOfRange { voltage: f64, full_scale: f64 },
}

/// A DAC input/holding register value.
///
/// Codes read back from the bridge are carried unmodified; codes derived
/// from a voltage are always within `0..=max_code`.
#[derive(Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Debug, Default)]
pub struct RawDacCode(pub u16);

impl From<u16> for RawDacCode {
    fn from(value: u16) -> Self {
        RawDacCode(value)
    }
}

impl Deref for RawDacCode {
    type Target = u16;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub trait Dac {
    /// Converts a register code to the voltage it commands.
    fn to_voltage(&self, digital: RawDacCode) -> f64;

    /// Converts a requested voltage to the register code commanding it.
    fn to_digital(&self, voltage: f64) -> Result<RawDacCode, ConversionError>;
}

/// A linear unipolar DAC: `V = code * full_scale / 2^bits`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearDac {
    pub full_scale: f64,
    pub bits: u32,
}

impl Default for LinearDac {
    /// The 12-bit, 60 V bias supply the bridge drives.
    fn default() -> Self {
        LinearDac {
            full_scale: FULL_SCALE_VOLTS,
            bits: DAC_BITS,
        }
    }
}

impl LinearDac {
    fn steps(&self) -> f64 {
        (1u32 << self.bits) as f64
    }

    pub fn max_code(&self) -> u16 {
        ((1u32 << self.bits) - 1) as u16
    }

    /// Smallest voltage increment the DAC can express.
    pub fn quantum(&self) -> f64 {
        self.full_scale / self.steps()
    }
}

impl Dac for LinearDac {
    fn to_voltage(&self, digital: RawDacCode) -> f64 {
        *digital as f64 * self.full_scale / self.steps()
    }

    fn to_digital(&self, voltage: f64) -> Result<RawDacCode, ConversionError> {
        // NaN fails both comparisons, hence the negated form.
        if !(0.0..=self.full_scale).contains(&voltage) {
            return Err(ConversionError::VoltageOutOfRange {
                voltage,
                full_scale: self.full_scale,
            });
        }

        // Truncates toward zero; full scale itself lands one past the top code.
        let code = (voltage * self.steps() / self.full_scale) as u32;
        Ok(RawDacCode(code.min(self.max_code() as u32) as u16))
    }
}

pub fn raw_to_volts(raw: RawDacCode) -> f64 {
    LinearDac::default().to_voltage(raw)
}

pub fn volts_to_raw(voltage: f64) -> Result<RawDacCode, ConversionError> {
    LinearDac::default().to_digital(voltage)
}
