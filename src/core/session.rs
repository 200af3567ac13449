use std::collections::HashMap;

use log::{debug, info, warn};

use crate::core::conversion::temperature::debias;
use crate::prelude::*;

/// The sensors found by one scan of the 1-Wire bus, keyed by serial.
///
/// Indices are only meaningful until the next scan, so a map is rebuilt
/// whenever a session needs to talk to sensors by serial.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusMap {
    indices: HashMap<SensorSerial, u16>,
    serials: Vec<SensorSerial>,
}

impl BusMap {
    pub fn index_of(&self, serial: &SensorSerial) -> Option<u16> {
        self.indices.get(serial).copied()
    }

    /// Serials in bus index order.
    pub fn serials(&self) -> &[SensorSerial] {
        &self.serials
    }

    pub fn len(&self) -> usize {
        self.serials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.serials.is_empty()
    }
}

impl FromIterator<SensorSerial> for BusMap {
    fn from_iter<I: IntoIterator<Item = SensorSerial>>(iter: I) -> Self {
        let serials: Vec<SensorSerial> = iter.into_iter().collect();
        let indices = serials
            .iter()
            .enumerate()
            .map(|(index, serial)| (*serial, index as u16))
            .collect();

        BusMap { indices, serials }
    }
}

/// A live connection to one bridge.
///
/// Every operation is a blocking round-trip and reads through to the
/// hardware: power state, commanded voltages and bus enumeration all live on
/// the bridge. The one thing remembered locally is how many sensors the last
/// scan found, since sensor indices are only valid against that scan.
///
/// Call [`DeviceSession::close`] when done. A session dropped on an error
/// path releases its port through the transport's own `Drop`.
#[derive(Debug)]
pub struct DeviceSession<T>
where
    T: Transport,
{
    slave: SlaveId,
    layout: RegisterLayout,
    transport: T,
    sensor_count: Option<u16>,
}

impl<T> DeviceSession<T>
where
    T: Transport,
{
    pub fn new(slave: SlaveId, layout: RegisterLayout, transport: T) -> DeviceSession<T> {
        DeviceSession {
            slave,
            layout,
            transport,
            sensor_count: None,
        }
    }

    pub fn slave(&self) -> SlaveId {
        self.slave
    }

    pub fn layout(&self) -> &RegisterLayout {
        &self.layout
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sensors found by the last [`DeviceSession::init_temperature_bus`], if any.
    pub fn sensor_count(&self) -> Option<u16> {
        self.sensor_count
    }

    pub fn address_of(&self, coordinate: &HardwareCoordinate) -> Result<Address, DacError> {
        Ok(self.layout.address_of(coordinate)?)
    }

    /// Writes the DAC input register. The channel's output only follows once
    /// it is powered up.
    pub async fn set_voltage(&mut self, addr: Address, raw: RawDacCode) -> Result<(), DacError> {
        debug!("Setting channel {addr} to code {}", *raw);
        Ok(self.transport.write_register(self.slave, addr, *raw).await?)
    }

    /// The last code commanded on a channel, from the bridge's holding register.
    pub async fn get_commanded_voltage(&mut self, addr: Address) -> Result<RawDacCode, DacError> {
        let value = self.transport.read_holding_register(self.slave, addr).await?;
        Ok(RawDacCode(value))
    }

    /// The DAC's own input register as sampled by the bridge.
    ///
    /// The bridge samples on the wrong side of the DAC clock, so this is only
    /// good as a liveness check. Use [`DeviceSession::get_commanded_voltage`]
    /// for the value actually commanded.
    pub async fn read_approx_voltage(&mut self, addr: Address) -> Result<RawDacCode, DacError> {
        let value = self.transport.read_input_register(self.slave, addr).await?;
        Ok(RawDacCode(value))
    }

    pub async fn set_channel_power(&mut self, addr: Address, on: bool) -> Result<(), DacError> {
        debug!("Powering channel {addr} {}", if on { "up" } else { "down" });
        Ok(self.transport.write_bit(self.slave, addr, on).await?)
    }

    /// Channels power up disabled.
    pub async fn get_channel_power(&mut self, addr: Address) -> Result<bool, DacError> {
        Ok(self.transport.read_bit(self.slave, addr).await?)
    }

    /// Has the bridge rescan the 1-Wire bus and returns how many sensors it
    /// found. Must precede any indexed sensor operation in a session.
    pub async fn init_temperature_bus(&mut self) -> Result<u16, DacError> {
        let addr = self.layout.temp_count_address()?;
        let raw = self.transport.read_input_register(self.slave, addr).await?;

        let count = debias(raw);
        if count < 0 {
            self.sensor_count = None;
            return Err(DacError::SensorInitError(count));
        }

        info!("Temperature bus scan found {count} sensor(s)");
        self.sensor_count = Some(count as u16);
        Ok(count as u16)
    }

    pub async fn get_sensor_serial(&mut self, index: u16) -> Result<SensorSerial, DacError> {
        let count = self.sensor_count.unwrap_or(0);
        if index >= count {
            return Err(DacError::IndexOutOfRange { index, count });
        }

        let mut registers = [0; REGISTERS_PER_SENSOR as usize];
        for (offset, register) in (0..REGISTERS_PER_SENSOR).zip(registers.iter_mut()) {
            let addr = self.layout.temp_sensor_address(index, offset)?;
            *register = self.transport.read_holding_register(self.slave, addr).await?;
        }

        Ok(SensorSerial::from_registers(registers))
    }

    /// Scans the bus and reads every serial, yielding a fresh serial-to-index map.
    pub async fn scan_bus(&mut self) -> Result<BusMap, DacError> {
        let count = self.init_temperature_bus().await?;

        let mut serials = Vec::with_capacity(count as usize);
        for index in 0..count {
            serials.push(self.get_sensor_serial(index).await?);
        }

        Ok(serials.into_iter().collect())
    }

    /// Starts a conversion. Returns `false` when the sensor did not answer.
    ///
    /// The result is not ready for [`CONVERSION_LATENCY_MS`]; waiting is up to
    /// the caller.
    pub async fn trigger_conversion(&mut self, index: u16) -> Result<bool, DacError> {
        let addr = self.layout.temp_sensor_address(index, 0)?;
        self.transport.write_bit(self.slave, addr, true).await?;

        let present = self.transport.read_bit(self.slave, addr).await?;
        if !present {
            warn!("Sensor {index} did not acknowledge the conversion request");
        }
        Ok(present)
    }

    /// The signed reading of the last conversion; see [`raw_to_deg_c`].
    pub async fn read_temperature(&mut self, index: u16) -> Result<i16, DacError> {
        let addr = self.layout.temp_sensor_address(index, 0)?;
        let raw = self.transport.read_input_register(self.slave, addr).await?;
        Ok(debias(raw))
    }

    /// Releases the transport.
    pub async fn close(mut self) -> Result<(), DacError> {
        info!("Closing session with slave {}", self.slave);
        Ok(self.transport.close().await?)
    }
}
