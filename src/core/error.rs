use std::time::Duration;

use thiserror::Error;

use crate::core::address::AddressError;
use crate::core::conversion::ConversionError;
use crate::core::device::SensorSerial;
use crate::core::directory::DirectoryError;
use crate::core::modbus;
use crate::core::store::StoreError;

/// Everything a bridge operation can fail with.
///
/// Address and voltage errors are raised before any register is touched.
/// Alias errors abort the whole batch they occur in. Transport errors are
/// passed through untouched; nothing here retries.
#[derive(Debug, Error)]
pub enum DacError {
    #[error("invalid channel address: {0}")]
    AddressOutOfRange(#[from] AddressError),
    #[error(transparent)]
    VoltageOutOfRange(#[from] ConversionError),
    #[error("alias `{0}` not found in the directory")]
    AliasNotFound(String),
    #[error("sensor `{alias}` ({serial}) was not found on the bus")]
    SensorNotOnBus { alias: String, serial: SensorSerial },
    #[error(transparent)]
    MalformedEntry(#[from] DirectoryError),
    #[error("bridge did not reply within {0:?}")]
    TransportTimeout(Duration),
    #[error("transport error: {0}")]
    TransportError(modbus::Error),
    #[error("temperature bus scan failed with code {0}")]
    SensorInitError(i16),
    #[error("sensor index {index} out of range ({count} sensors enumerated)")]
    IndexOutOfRange { index: u16, count: u16 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<modbus::Error> for DacError {
    fn from(err: modbus::Error) -> DacError {
        match err {
            modbus::Error::Timeout(after) => DacError::TransportTimeout(after),
            err => DacError::TransportError(err),
        }
    }
}
