//! Register layout of the bridge.
//!
//! The bridge exposes one flat Modbus address space split into three zones:
//!
//! - the DAC channel zone, `sipm_channels` blocks of `board_count * 8`
//!   registers (2 chips of 4 channels per board),
//! - one temperature-count register directly after it,
//! - the temperature-sensor zone, 4 registers per enumerated sensor.
//!
//! Every function here is pure arithmetic. Coordinates outside their declared
//! width, and results that would not fit a 16-bit address, are errors.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::modbus::Address;

pub const CHANNELS_PER_CHIP: u16 = 4;
pub const CHIPS_PER_BOARD: u16 = 2;
pub const REGISTERS_PER_SENSOR: u16 = 4;

/// Default number of SiPM channel blocks in the DAC zone.
pub const DEFAULT_SIPM_CHANNELS: u16 = 2;

pub const LEGACY_BOARD_ADDRESSES: u16 = 128;
pub const LEGACY_CHIPS: u16 = 4;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("{dimension} {value} is out of range (must be below {limit})")]
    OutOfRange {
        dimension: &'static str,
        value: u32,
        limit: u32,
    },
    #[error("register address does not fit the 16-bit address space")]
    Overflow,
    #[error("coordinate uses the {found} scheme but the session is configured for {expected}")]
    SchemeMismatch {
        expected: AddressScheme,
        found: AddressScheme,
    },
    #[error("a coordinate has 2, 3 or 4 components, got {0}")]
    Arity(usize),
}

/// Which board/chip encoding the connected firmware understands.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AddressScheme {
    /// `board, chip, channel` (and optionally the SiPM block).
    #[default]
    Canonical,
    /// `board address, chip` as used by firmware predating the temperature bus.
    Legacy,
}

impl Display for AddressScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressScheme::Canonical => write!(f, "canonical"),
            AddressScheme::Legacy => write!(f, "legacy"),
        }
    }
}

/// Where a DAC channel lives in the hardware.
///
/// Serialised as the plain component list it was written as in the alias
/// directory: `[board, chip, channel]`, `[board, chip, channel, sipm]` or, for
/// the legacy scheme, `[board_address, chip]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "Vec<u16>", try_from = "Vec<u16>")]
pub enum HardwareCoordinate {
    Channel {
        board: u16,
        dac_chip: u16,
        channel: u16,
        sipm: u16,
    },
    Legacy {
        board_address: u16,
        dac_chip: u16,
    },
}

impl HardwareCoordinate {
    pub fn channel(board: u16, dac_chip: u16, channel: u16) -> HardwareCoordinate {
        HardwareCoordinate::Channel {
            board,
            dac_chip,
            channel,
            sipm: 0,
        }
    }

    pub fn scheme(&self) -> AddressScheme {
        match self {
            HardwareCoordinate::Channel { .. } => AddressScheme::Canonical,
            HardwareCoordinate::Legacy { .. } => AddressScheme::Legacy,
        }
    }
}

impl From<HardwareCoordinate> for Vec<u16> {
    fn from(value: HardwareCoordinate) -> Self {
        match value {
            HardwareCoordinate::Channel {
                board,
                dac_chip,
                channel,
                sipm: 0,
            } => vec![board, dac_chip, channel],
            HardwareCoordinate::Channel {
                board,
                dac_chip,
                channel,
                sipm,
            } => vec![board, dac_chip, channel, sipm],
            HardwareCoordinate::Legacy {
                board_address,
                dac_chip,
            } => vec![board_address, dac_chip],
        }
    }
}

impl TryFrom<Vec<u16>> for HardwareCoordinate {
    type Error = AddressError;

    fn try_from(value: Vec<u16>) -> Result<Self, Self::Error> {
        match value[..] {
            [board_address, dac_chip] => Ok(HardwareCoordinate::Legacy {
                board_address,
                dac_chip,
            }),
            [board, dac_chip, channel] => Ok(HardwareCoordinate::channel(board, dac_chip, channel)),
            [board, dac_chip, channel, sipm] => Ok(HardwareCoordinate::Channel {
                board,
                dac_chip,
                channel,
                sipm,
            }),
            _ => Err(AddressError::Arity(value.len())),
        }
    }
}

impl Display for HardwareCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HardwareCoordinate::Channel {
                board,
                dac_chip,
                channel,
                sipm: 0,
            } => write!(f, "board {board} chip {dac_chip} channel {channel}"),
            HardwareCoordinate::Channel {
                board,
                dac_chip,
                channel,
                sipm,
            } => write!(f, "sipm {sipm} board {board} chip {dac_chip} channel {channel}"),
            HardwareCoordinate::Legacy {
                board_address,
                dac_chip,
            } => write!(f, "board address {board_address} chip {dac_chip}"),
        }
    }
}

/// The bridge's address map for a given topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterLayout {
    pub board_count: u16,
    pub sipm_channels: u16,
    pub scheme: AddressScheme,
}

impl Default for RegisterLayout {
    fn default() -> Self {
        RegisterLayout::canonical(1)
    }
}

impl RegisterLayout {
    pub fn new(board_count: u16, sipm_channels: u16, scheme: AddressScheme) -> RegisterLayout {
        RegisterLayout {
            board_count,
            sipm_channels,
            scheme,
        }
    }

    pub fn canonical(board_count: u16) -> RegisterLayout {
        RegisterLayout::new(board_count, DEFAULT_SIPM_CHANNELS, AddressScheme::Canonical)
    }

    /// Registers spanned by one SiPM block: every channel of every board.
    fn block_len(&self) -> Result<u16, AddressError> {
        self.board_count
            .checked_mul(CHIPS_PER_BOARD * CHANNELS_PER_CHIP)
            .ok_or(AddressError::Overflow)
    }

    /// Canonical channel address:
    /// `board_count*8*sipm + 8*board + 4*dac_chip + channel`.
    pub fn channel_address(
        &self,
        board: u16,
        dac_chip: u16,
        channel: u16,
        sipm: u16,
    ) -> Result<Address, AddressError> {
        within("sipm channel", sipm, self.sipm_channels)?;
        within("board", board, self.board_count)?;
        within("dac chip", dac_chip, CHIPS_PER_BOARD)?;
        within("channel", channel, CHANNELS_PER_CHIP)?;

        let in_block = board
            .checked_mul(CHIPS_PER_BOARD * CHANNELS_PER_CHIP)
            .and_then(|offset| offset.checked_add(CHANNELS_PER_CHIP * dac_chip + channel))
            .ok_or(AddressError::Overflow)?;

        self.block_len()?
            .checked_mul(sipm)
            .and_then(|base| base.checked_add(in_block))
            .ok_or(AddressError::Overflow)
    }

    /// Legacy flat address: `4*board_address + dac_chip`.
    pub fn legacy_address(board_address: u16, dac_chip: u16) -> Result<Address, AddressError> {
        within("board address", board_address, LEGACY_BOARD_ADDRESSES)?;
        within("dac chip", dac_chip, LEGACY_CHIPS)?;
        Ok(LEGACY_CHIPS * board_address + dac_chip)
    }

    /// Address of a directory coordinate under the configured scheme.
    pub fn address_of(&self, coordinate: &HardwareCoordinate) -> Result<Address, AddressError> {
        if coordinate.scheme() != self.scheme {
            return Err(AddressError::SchemeMismatch {
                expected: self.scheme,
                found: coordinate.scheme(),
            });
        }

        match *coordinate {
            HardwareCoordinate::Channel {
                board,
                dac_chip,
                channel,
                sipm,
            } => self.channel_address(board, dac_chip, channel, sipm),
            HardwareCoordinate::Legacy {
                board_address,
                dac_chip,
            } => RegisterLayout::legacy_address(board_address, dac_chip),
        }
    }

    /// The register holding the number of sensors found by the last bus scan,
    /// one past the end of the DAC zone.
    pub fn temp_count_address(&self) -> Result<Address, AddressError> {
        self.block_len()?
            .checked_mul(self.sipm_channels)
            .ok_or(AddressError::Overflow)
    }

    /// One of the four registers belonging to an enumerated sensor.
    pub fn temp_sensor_address(&self, index: u16, offset: u16) -> Result<Address, AddressError> {
        within("sensor register offset", offset, REGISTERS_PER_SENSOR)?;

        index
            .checked_mul(REGISTERS_PER_SENSOR)
            .and_then(|base| base.checked_add(offset))
            .and_then(|rel| rel.checked_add(1))
            .zip(self.temp_count_address().ok())
            .and_then(|(rel, count)| count.checked_add(rel))
            .ok_or(AddressError::Overflow)
    }
}

fn within(dimension: &'static str, value: u16, limit: u16) -> Result<(), AddressError> {
    if value < limit {
        Ok(())
    } else {
        Err(AddressError::OutOfRange {
            dimension,
            value: value as u32,
            limit: limit as u32,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn canonical_zone_boundaries() {
        let layout = RegisterLayout::canonical(4);

        assert_eq!(layout.channel_address(0, 0, 0, 0), Ok(0));
        assert_eq!(layout.channel_address(3, 1, 3, 0), Ok(31));
        assert_eq!(layout.channel_address(0, 0, 0, 1), Ok(32));
        assert_eq!(layout.channel_address(3, 1, 3, 1), Ok(63));
    }

    #[test]
    fn canonical_rejects_out_of_width() {
        let layout = RegisterLayout::canonical(4);

        assert!(matches!(
            layout.channel_address(0, 0, 4, 0),
            Err(AddressError::OutOfRange { dimension: "channel", .. })
        ));
        assert!(matches!(
            layout.channel_address(0, 2, 0, 0),
            Err(AddressError::OutOfRange { dimension: "dac chip", .. })
        ));
        assert!(matches!(
            layout.channel_address(4, 0, 0, 0),
            Err(AddressError::OutOfRange { dimension: "board", .. })
        ));
        assert!(matches!(
            layout.channel_address(0, 0, 0, 2),
            Err(AddressError::OutOfRange { dimension: "sipm channel", .. })
        ));
    }

    #[test]
    fn temperature_zone() {
        let layout = RegisterLayout::canonical(4);

        assert_eq!(layout.temp_count_address(), Ok(64));
        assert_eq!(layout.temp_sensor_address(0, 0), Ok(65));
        assert_eq!(layout.temp_sensor_address(2, 3), Ok(76));
        assert!(layout.temp_sensor_address(0, 4).is_err());
    }

    #[test]
    fn temperature_zone_rejects_wrapping() {
        let layout = RegisterLayout::canonical(4);
        assert_eq!(layout.temp_sensor_address(u16::MAX / 4, 3), Err(AddressError::Overflow));
    }

    #[test]
    fn oversized_topology_overflows() {
        let layout = RegisterLayout::canonical(u16::MAX);
        assert_eq!(layout.temp_count_address(), Err(AddressError::Overflow));
    }

    #[test]
    fn legacy_scheme() {
        assert_eq!(RegisterLayout::legacy_address(0, 0), Ok(0));
        assert_eq!(RegisterLayout::legacy_address(2, 3), Ok(11));
        assert!(RegisterLayout::legacy_address(128, 0).is_err());
        assert!(RegisterLayout::legacy_address(0, 4).is_err());
    }

    #[test]
    fn scheme_is_selected_by_configuration() {
        let canonical = RegisterLayout::canonical(2);
        let legacy = RegisterLayout::new(2, 1, AddressScheme::Legacy);
        let old = HardwareCoordinate::Legacy {
            board_address: 1,
            dac_chip: 2,
        };

        assert_eq!(legacy.address_of(&old), Ok(6));
        assert!(matches!(
            canonical.address_of(&old),
            Err(AddressError::SchemeMismatch { .. })
        ));
        assert_eq!(canonical.address_of(&HardwareCoordinate::channel(1, 1, 1)), Ok(13));
    }

    #[test]
    fn coordinate_component_lists() {
        let coordinate = HardwareCoordinate::try_from(vec![0, 1, 2]).expect("Must convert");
        assert_eq!(coordinate, HardwareCoordinate::channel(0, 1, 2));
        assert_eq!(Vec::from(coordinate), vec![0, 1, 2]);

        let with_sipm = HardwareCoordinate::try_from(vec![0, 1, 2, 1]).expect("Must convert");
        assert_eq!(Vec::from(with_sipm), vec![0, 1, 2, 1]);

        assert_eq!(
            HardwareCoordinate::try_from(vec![1]),
            Err(AddressError::Arity(1))
        );
    }
}
