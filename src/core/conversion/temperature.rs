//! Conversions for the DS18B20-style 1-Wire sensors behind the bridge.
//!
//! The bridge ships signed 16-bit readings over unsigned Modbus registers by
//! adding a bias of 32768. [`debias`] undoes that at the transport boundary;
//! everything downstream works with the signed value.

/// Bias added by the bridge firmware to every signed quantity it reports.
pub const REGISTER_BIAS: i32 = 32768;

/// Signed readings at or below this value mean the sensor did not answer.
pub const DISCONNECTED_RAW: i16 = -7040;

/// Reported in place of a temperature for a disconnected sensor.
pub const DISCONNECTED_CELSIUS: f64 = -127.0;

/// Degrees Celsius per least significant bit at 12-bit precision.
pub const CELSIUS_PER_LSB: f64 = 0.0078125;

/// Worst-case conversion time at 12-bit precision, in milliseconds.
pub const CONVERSION_LATENCY_MS: u64 = 750;

/// Reinterprets a biased register value as the signed value it encodes.
pub fn debias(register: u16) -> i16 {
    (register as i32 - REGISTER_BIAS) as i16
}

/// Encodes a signed value the way the bridge does.
pub fn bias(value: i16) -> u16 {
    (value as i32 + REGISTER_BIAS) as u16
}

pub fn is_disconnected(raw: i16) -> bool {
    raw <= DISCONNECTED_RAW
}

pub fn raw_to_deg_c(raw: i16) -> f64 {
    if is_disconnected(raw) {
        DISCONNECTED_CELSIUS
    } else {
        raw as f64 * CELSIUS_PER_LSB
    }
}

pub fn deg_c_to_deg_f(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn celsius_from_raw() {
        assert_eq!(raw_to_deg_c(0), 0.0);
        assert_eq!(raw_to_deg_c(128), 1.0);
        assert_eq!(raw_to_deg_c(-128), -1.0);
        assert_eq!(raw_to_deg_c(3200), 25.0);
    }

    #[test]
    fn disconnected_sentinel() {
        assert_eq!(raw_to_deg_c(-7040), -127.0);
        assert_eq!(raw_to_deg_c(-7041), -127.0);
        assert_eq!(raw_to_deg_c(i16::MIN), -127.0);
        assert_ne!(raw_to_deg_c(-7039), -127.0);
    }

    #[test]
    fn bias_boundary() {
        assert_eq!(debias(32768), 0);
        assert_eq!(debias(0), i16::MIN);
        assert_eq!(debias(u16::MAX), i16::MAX);
        assert_eq!(debias(32768 - 7040), -7040);
        assert_eq!(debias(bias(-55 * 128)), -55 * 128);
    }

    #[test]
    fn fahrenheit() {
        assert_eq!(deg_c_to_deg_f(0.0), 32.0);
        assert_eq!(deg_c_to_deg_f(100.0), 212.0);
        assert_eq!(deg_c_to_deg_f(-40.0), -40.0);
    }
}
