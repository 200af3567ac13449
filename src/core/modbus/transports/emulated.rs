use std::collections::HashMap;

use log::trace;

use crate::core::conversion::temperature::bias;
use crate::prelude::*;

/// What a DS18B20 reports when it has dropped off the bus: -127 °C.
const DISCONNECTED_READING: i16 = -127 * 128;

/// A sensor physically attached to the emulated 1-Wire bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmulatedSensor {
    pub serial: SensorSerial,
    pub raw: i16,
    pub connected: bool,
}

/// An in-memory model of the bridge firmware.
///
/// DAC writes land in both the holding and the input register, coils start
/// powered off, and a read of the temperature-count input register rescans the
/// bus. Addresses outside the layout's zones raise
/// [`ExceptionCode::IllegalDataAddress`], as the firmware does.
///
/// Allows for testing behaviour without a bridge present.
#[derive(Debug)]
pub struct EmulatedTransport {
    layout: RegisterLayout,

    holding: HashMap<Address, Value>,
    input: HashMap<Address, Value>,
    coils: HashMap<Address, bool>,

    bus: Vec<EmulatedSensor>,
    enumerated: usize,
    scan_failure: Option<i16>,
    presence: HashMap<usize, bool>,

    writes: Vec<WriteFunction>,
    reads: usize,
    closed: bool,
}

/// Which part of the register map an address falls in.
enum Zone {
    Dac,
    TempCount,
    Sensor { index: usize, offset: u16 },
    Unmapped,
}

impl EmulatedTransport {
    pub fn new(layout: RegisterLayout) -> EmulatedTransport {
        EmulatedTransport {
            layout,
            holding: HashMap::new(),
            input: HashMap::new(),
            coils: HashMap::new(),
            bus: vec![],
            enumerated: 0,
            scan_failure: None,
            presence: HashMap::new(),
            writes: vec![],
            reads: 0,
            closed: false,
        }
    }

    /// Attaches a responding sensor reading `raw / 128` °C.
    pub fn with_sensor(mut self, serial: impl Into<SensorSerial>, raw: i16) -> EmulatedTransport {
        self.bus.push(EmulatedSensor {
            serial: serial.into(),
            raw,
            connected: true,
        });
        self
    }

    /// Attaches a sensor that enumerates but no longer answers conversions.
    pub fn with_disconnected_sensor(mut self, serial: impl Into<SensorSerial>) -> EmulatedTransport {
        self.bus.push(EmulatedSensor {
            serial: serial.into(),
            raw: DISCONNECTED_READING,
            connected: false,
        });
        self
    }

    /// Makes every bus scan report `code` (a negative error count).
    pub fn with_scan_failure(mut self, code: i16) -> EmulatedTransport {
        self.scan_failure = Some(code);
        self
    }

    /// Presets the DAC input register independently of the holding register,
    /// as happens when the bridge samples the DAC on the wrong clock edge.
    pub fn with_input_register(mut self, addr: Address, value: Value) -> EmulatedTransport {
        self.input.insert(addr, value);
        self
    }

    pub fn holding_register(&self, addr: Address) -> Value {
        self.holding.get(&addr).copied().unwrap_or(0)
    }

    pub fn coil(&self, addr: Address) -> bool {
        self.coils.get(&addr).copied().unwrap_or(false)
    }

    /// Every write accepted so far, in order.
    pub fn writes(&self) -> &[WriteFunction] {
        &self.writes
    }

    pub fn reads(&self) -> usize {
        self.reads
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn zone(&self, addr: Address) -> Zone {
        let count = match self.layout.temp_count_address() {
            Ok(count) => count,
            Err(_) => return Zone::Unmapped,
        };

        if addr < count {
            return Zone::Dac;
        }
        if addr == count {
            return Zone::TempCount;
        }

        let relative = (addr - count - 1) as usize;
        let index = relative / REGISTERS_PER_SENSOR as usize;
        let offset = (relative % REGISTERS_PER_SENSOR as usize) as u16;

        if index < self.enumerated {
            Zone::Sensor { index, offset }
        } else {
            Zone::Unmapped
        }
    }

    fn scan(&mut self) -> i16 {
        self.presence.clear();
        match self.scan_failure {
            Some(code) => {
                self.enumerated = 0;
                code
            }
            None => {
                self.enumerated = self.bus.len();
                self.bus.len() as i16
            }
        }
    }

    fn illegal() -> Error {
        Error::Exception(ExceptionCode::IllegalDataAddress)
    }
}

impl Transport for EmulatedTransport {
    async fn read(&mut self, _slave: SlaveId, function: ReadFunction) -> Result<Reading, Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        self.reads += 1;
        trace!("Emulated read {function:?}");

        let addr = function.address();
        match (function, self.zone(addr)) {
            (ReadFunction::Coil(_), Zone::Dac) => Ok(Reading::Bit(self.coil(addr))),
            (ReadFunction::Coil(_), Zone::Sensor { index, offset: 0 }) => Ok(Reading::Bit(
                self.presence.get(&index).copied().unwrap_or(false),
            )),

            (ReadFunction::HoldingRegister(_), Zone::Dac) => {
                Ok(Reading::Word(self.holding_register(addr)))
            }
            (ReadFunction::HoldingRegister(_), Zone::Sensor { index, offset }) => {
                let word = self.bus[index].serial.0 >> (16 * (3 - offset as u64));
                Ok(Reading::Word((word & 0xFFFF) as Value))
            }

            (ReadFunction::InputRegister(_), Zone::Dac) => {
                Ok(Reading::Word(self.input.get(&addr).copied().unwrap_or(0)))
            }
            (ReadFunction::InputRegister(_), Zone::TempCount) => {
                let count = self.scan();
                Ok(Reading::Word(bias(count)))
            }
            (ReadFunction::InputRegister(_), Zone::Sensor { index, offset: 0 }) => {
                Ok(Reading::Word(bias(self.bus[index].raw)))
            }

            _ => Err(EmulatedTransport::illegal()),
        }
    }

    async fn write(&mut self, _slave: SlaveId, function: WriteFunction) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }

        trace!("Emulated write {function:?}");

        match (function, self.zone(function.address())) {
            (WriteFunction::SingleRegister(addr, value), Zone::Dac) => {
                self.holding.insert(addr, value);
                self.input.insert(addr, value);
            }
            (WriteFunction::SingleCoil(addr, on), Zone::Dac) => {
                self.coils.insert(addr, on);
            }
            (WriteFunction::SingleCoil(_, true), Zone::Sensor { index, offset: 0 }) => {
                let connected = self.bus[index].connected;
                self.presence.insert(index, connected);
            }
            _ => return Err(EmulatedTransport::illegal()),
        }

        self.writes.push(function);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), Error> {
        self.closed = true;
        Ok(())
    }
}

pub struct Emulated;

impl Connect for Emulated {
    type Transport = EmulatedTransport;

    async fn connect(
        _settings: &SerialSettings,
        layout: RegisterLayout,
    ) -> Result<Self::Transport, Error> {
        Ok(EmulatedTransport::new(layout))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn register_write_is_mirrored() {
        let mut bridge = EmulatedTransport::new(RegisterLayout::canonical(1));

        bridge.write_register(0, 5, 1000).await.expect("Must write");

        assert_eq!(bridge.read_holding_register(0, 5).await.expect("!"), 1000);
        assert_eq!(bridge.read_input_register(0, 5).await.expect("!"), 1000);
    }

    #[tokio::test]
    async fn sensor_registers_require_a_scan() {
        let mut bridge = EmulatedTransport::new(RegisterLayout::canonical(1))
            .with_sensor(0x28FF_641A_0500_0000u64, 3200);

        // 1 board, 2 SiPM blocks: the count register sits at 16.
        let result = bridge.read_holding_register(0, 17).await;
        assert!(matches!(result, Err(Error::Exception(ExceptionCode::IllegalDataAddress))));

        assert_eq!(bridge.read_input_register(0, 16).await.expect("!"), bias(1));
        assert_eq!(bridge.read_holding_register(0, 17).await.expect("!"), 0x28FF);
        assert_eq!(bridge.read_holding_register(0, 20).await.expect("!"), 0x0000);
    }

    #[tokio::test]
    async fn closed_bridge_refuses() {
        let mut bridge = EmulatedTransport::new(RegisterLayout::default());
        bridge.close().await.expect("Must close");

        assert!(matches!(bridge.read_bit(0, 0).await, Err(Error::Closed)));
    }
}
