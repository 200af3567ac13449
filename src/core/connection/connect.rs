use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::address::RegisterLayout;
use crate::core::modbus::{Error, Transport};

/// Baud rates the bridge firmware can be flashed with.
pub const SUPPORTED_BAUDRATES: [u32; 5] = [4800, 9600, 14400, 19200, 28800];

pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_TIMEOUT_SECS: f64 = 0.3;

/// How to reach the bridge: the serial port and its line parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    pub baudrate: u32,
    /// Seconds to wait for each reply.
    pub timeout: f64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        SerialSettings::new(DEFAULT_PORT, DEFAULT_BAUDRATE, DEFAULT_TIMEOUT_SECS)
    }
}

impl SerialSettings {
    pub fn new(port: impl Into<String>, baudrate: u32, timeout: f64) -> SerialSettings {
        SerialSettings {
            port: port.into(),
            baudrate,
            timeout,
        }
    }

    /// Reply timeout; values that are not a positive, representable duration
    /// fall back to the default.
    pub fn timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.timeout) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// A way of opening a [`Transport`] to a bridge flashed for `layout`.
#[allow(async_fn_in_trait)]
pub trait Connect {
    type Transport: Transport;

    async fn connect(
        settings: &SerialSettings,
        layout: RegisterLayout,
    ) -> Result<Self::Transport, Error>;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn timeout_in_seconds() {
        let settings = SerialSettings::new(DEFAULT_PORT, DEFAULT_BAUDRATE, 1.5);
        assert_eq!(settings.timeout(), Duration::from_millis(1500));
    }

    #[test]
    fn unusable_timeouts_fall_back() {
        let fallback = Duration::from_secs_f64(DEFAULT_TIMEOUT_SECS);

        for timeout in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e30] {
            let settings = SerialSettings::new(DEFAULT_PORT, DEFAULT_BAUDRATE, timeout);
            assert_eq!(settings.timeout(), fallback, "timeout={timeout}");
        }
    }
}
