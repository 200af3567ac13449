//! The batch operations behind each `dacctl` subcommand.
//!
//! Each command resolves its whole token list up front (see
//! [`BatchResolver`]) and only then talks to the bridge, one target at a
//! time, in token order. A transport failure stops the batch where it
//! happened; the targets before it have already been acted on.

use std::time::Duration;

use log::{debug, info, warn};

use crate::core::resolve::{BatchResolver, ResolvedChannel, ResolvedSensor};
use crate::core::session::BusMap;
use crate::core::store::{SessionConfig, SessionStore};
use crate::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelPower {
    pub channel: ResolvedChannel,
    pub on: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelVoltage {
    pub channel: ResolvedChannel,
    pub raw: RawDacCode,
    pub volts: f64,
}

impl ChannelVoltage {
    fn new(channel: ResolvedChannel, raw: RawDacCode) -> ChannelVoltage {
        ChannelVoltage {
            channel,
            raw,
            volts: raw_to_volts(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub sensor: ResolvedSensor,
    pub raw: i16,
    pub celsius: f64,
    pub fahrenheit: f64,
    /// Whether the sensor acknowledged the conversion request.
    pub present: bool,
}

impl SensorReading {
    pub fn is_disconnected(&self) -> bool {
        !self.present || is_disconnected(self.raw)
    }
}

/// One enumerated sensor, with its alias when the directory knows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorListing {
    pub index: u16,
    pub serial: SensorSerial,
    pub alias: Option<String>,
}

/// Parses both directories, checks the connection parameters and persists
/// the result, replacing any previous session state. Touches no hardware.
pub fn init<S: SessionStore>(
    store: &S,
    config: SessionConfig,
    dac_text: &str,
    temperature_text: &str,
) -> Result<SessionConfig, DacError> {
    let directory = AliasDirectory::parse(dac_text, temperature_text)?;
    config.validate()?;

    // Catch coordinates the configured layout cannot address now, rather
    // than on first use.
    let layout = config.layout();
    for (alias, coordinate) in directory.dac().iter() {
        layout.address_of(coordinate).map_err(|err| {
            warn!("Alias `{alias}` ({coordinate}) cannot be addressed: {err}");
            err
        })?;
    }

    let config = config.with_directory(&directory);
    store.save(&config)?;

    info!(
        "Initialised session: {} DAC alias(es), {} temperature alias(es)",
        directory.dac().len(),
        directory.temperature().len()
    );
    Ok(config)
}

fn resolve_channels<T: Transport>(
    session: &DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
) -> Result<Vec<ResolvedChannel>, DacError> {
    let channels = BatchResolver::new(directory).channels(tokens, session.layout())?;
    for channel in &channels {
        debug!("`{}` -> register {}", channel.alias, channel.address);
    }
    Ok(channels)
}

async fn set_power<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
    on: bool,
) -> Result<Vec<ResolvedChannel>, DacError> {
    let channels = resolve_channels(session, directory, tokens)?;
    for channel in &channels {
        session.set_channel_power(channel.address, on).await?;
    }
    Ok(channels)
}

pub async fn power_up<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
) -> Result<Vec<ResolvedChannel>, DacError> {
    set_power(session, directory, tokens, true).await
}

pub async fn power_down<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
) -> Result<Vec<ResolvedChannel>, DacError> {
    set_power(session, directory, tokens, false).await
}

pub async fn get_power<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
) -> Result<Vec<ChannelPower>, DacError> {
    let mut states = vec![];
    for channel in resolve_channels(session, directory, tokens)? {
        let on = session.get_channel_power(channel.address).await?;
        states.push(ChannelPower { channel, on });
    }
    Ok(states)
}

/// The commanded voltage of each channel.
pub async fn get_v<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
) -> Result<Vec<ChannelVoltage>, DacError> {
    let mut voltages = vec![];
    for channel in resolve_channels(session, directory, tokens)? {
        let raw = session.get_commanded_voltage(channel.address).await?;
        voltages.push(ChannelVoltage::new(channel, raw));
    }
    Ok(voltages)
}

/// The voltage each DAC reports back, which may lag what was commanded.
pub async fn read_v<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
) -> Result<Vec<ChannelVoltage>, DacError> {
    let mut voltages = vec![];
    for channel in resolve_channels(session, directory, tokens)? {
        let raw = session.read_approx_voltage(channel.address).await?;
        voltages.push(ChannelVoltage::new(channel, raw));
    }
    Ok(voltages)
}

/// Sets every channel to `volts`. The voltage is validated before any write.
pub async fn update_v<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
    volts: f64,
) -> Result<Vec<ChannelVoltage>, DacError> {
    let raw = volts_to_raw(volts)?;

    let mut voltages = vec![];
    for channel in resolve_channels(session, directory, tokens)? {
        session.set_voltage(channel.address, raw).await?;
        voltages.push(ChannelVoltage::new(channel, raw));
    }
    Ok(voltages)
}

pub async fn num_temp_sensors<T: Transport>(session: &mut DeviceSession<T>) -> Result<u16, DacError> {
    session.init_temperature_bus().await
}

/// Every sensor on the bus in index order.
pub async fn temp_sensor_ser_nums<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
) -> Result<Vec<SensorListing>, DacError> {
    let bus = session.scan_bus().await?;
    Ok(listings(&bus, directory))
}

fn listings(bus: &BusMap, directory: &AliasDirectory) -> Vec<SensorListing> {
    bus.serials()
        .iter()
        .zip(0u16..)
        .map(|(serial, index)| SensorListing {
            index,
            serial: *serial,
            alias: directory.alias_of(serial).map(str::to_string),
        })
        .collect()
}

/// Triggers a conversion on every sensor, waits out the conversion latency
/// once for the whole batch, then reads each result.
pub async fn read_t<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
) -> Result<Vec<SensorReading>, DacError> {
    read_t_after(
        session,
        directory,
        tokens,
        Duration::from_millis(CONVERSION_LATENCY_MS),
    )
    .await
}

pub async fn read_t_after<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    tokens: &[String],
    latency: Duration,
) -> Result<Vec<SensorReading>, DacError> {
    let resolver = BatchResolver::new(directory);

    // Directory misses abort before the bus is even scanned.
    resolver.sensor_serials(tokens)?;

    let bus = session.scan_bus().await?;
    let sensors = resolver.sensors(tokens, &bus)?;

    let mut presence = Vec::with_capacity(sensors.len());
    for sensor in &sensors {
        presence.push(session.trigger_conversion(sensor.index).await?);
    }

    if !sensors.is_empty() {
        tokio::time::sleep(latency).await;
    }

    let mut readings = Vec::with_capacity(sensors.len());
    for (sensor, present) in sensors.into_iter().zip(presence) {
        let raw = session.read_temperature(sensor.index).await?;
        let celsius = raw_to_deg_c(raw);
        if is_disconnected(raw) {
            warn!("Sensor `{}` ({}) is disconnected", sensor.alias, sensor.serial);
        }

        readings.push(SensorReading {
            sensor,
            raw,
            celsius,
            fahrenheit: deg_c_to_deg_f(celsius),
            present,
        });
    }

    Ok(readings)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::store::MemoryStore;

    const DAC: &str = "biasA 0 1 2\nbiasB 3 0 1\n";
    const TEMP: &str = "plate 0x28FF641A05000000\nair 0x2800000000000001\n";

    fn tokens(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|token| token.to_string()).collect()
    }

    fn session() -> (DeviceSession<EmulatedTransport>, AliasDirectory) {
        let layout = RegisterLayout::canonical(4);
        let transport = EmulatedTransport::new(layout)
            .with_sensor(0x2800_0000_0000_0001u64, -640)
            .with_sensor(0x28FF_641A_0500_0000u64, 3200);

        (
            DeviceSession::new(0, layout, transport),
            AliasDirectory::parse(DAC, TEMP).expect("Must parse"),
        )
    }

    #[test]
    fn init_rejects_unaddressable_directory() {
        let store = MemoryStore::new();
        let config = SessionConfig::default();

        // biasB sits on board 3, but the default is one board.
        let result = init(&store, config, DAC, "");
        assert!(matches!(result, Err(DacError::AddressOutOfRange(_))), "result={result:?}");
        assert!(store.load().is_err());
    }

    #[test]
    fn init_rejects_malformed_directory() {
        let store = MemoryStore::new();
        let result = init(&store, SessionConfig::default(), "lonely\n", "");
        assert!(matches!(result, Err(DacError::MalformedEntry(_))));
    }

    #[tokio::test]
    async fn update_then_get() {
        let (mut session, directory) = session();

        let updated = update_v(&mut session, &directory, &tokens(&["all"]), 12.5)
            .await
            .expect("Must update");
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|v| v.raw == RawDacCode(853)));

        let read = get_v(&mut session, &directory, &tokens(&["biasB"]))
            .await
            .expect("Must read");
        assert!((read[0].volts - 12.5).abs() < 60.0 / 4096.0);
        assert_eq!(session.transport().holding_register(25), 853);
    }

    #[tokio::test]
    async fn invalid_voltage_touches_nothing() {
        let (mut session, directory) = session();

        let result = update_v(&mut session, &directory, &tokens(&["biasA"]), 61.0).await;
        assert!(matches!(result, Err(DacError::VoltageOutOfRange(_))));
        assert!(session.transport().writes().is_empty());
    }

    #[tokio::test]
    async fn unknown_alias_touches_nothing() {
        let (mut session, directory) = session();

        let result = power_up(&mut session, &directory, &tokens(&["biasA", "nope"])).await;
        assert!(matches!(result, Err(DacError::AliasNotFound(alias)) if alias == "nope"));
        assert!(session.transport().writes().is_empty());
        assert_eq!(session.transport().reads(), 0);
    }

    #[tokio::test]
    async fn power_cycle() {
        let (mut session, directory) = session();

        power_up(&mut session, &directory, &tokens(&["biasA"])).await.expect("!");
        let power = get_power(&mut session, &directory, &tokens(&["all"])).await.expect("!");
        assert_eq!(power.iter().map(|p| p.on).collect::<Vec<_>>(), vec![true, false]);

        power_down(&mut session, &directory, &tokens(&["biasA"])).await.expect("!");
        assert!(!session.transport().coil(6));
    }

    #[tokio::test]
    async fn read_v_reports_the_input_register() {
        let layout = RegisterLayout::canonical(4);
        let transport = EmulatedTransport::new(layout).with_input_register(6, 852);
        let mut session = DeviceSession::new(0, layout, transport);
        let directory = AliasDirectory::parse(DAC, "").expect("Must parse");

        let read = read_v(&mut session, &directory, &tokens(&["biasA"])).await.expect("!");
        assert_eq!(read[0].raw, RawDacCode(852));
    }

    #[tokio::test]
    async fn lists_sensors_with_aliases() {
        let (mut session, directory) = session();

        assert_eq!(num_temp_sensors(&mut session).await.expect("!"), 2);

        let listing = temp_sensor_ser_nums(&mut session, &directory).await.expect("!");
        assert_eq!(listing[0].alias.as_deref(), Some("air"));
        assert_eq!(listing[1].serial, SensorSerial(0x28FF_641A_0500_0000));
        assert_eq!(listing[1].index, 1);
    }

    #[tokio::test]
    async fn reads_temperatures_by_alias() {
        let (mut session, directory) = session();

        let readings = read_t_after(&mut session, &directory, &tokens(&["plate", "air"]), Duration::ZERO)
            .await
            .expect("Must read");

        assert_eq!(readings[0].sensor.index, 1);
        assert_eq!(readings[0].celsius, 25.0);
        assert_eq!(readings[0].fahrenheit, 77.0);
        assert_eq!(readings[1].celsius, -5.0);
        assert!(readings.iter().all(|r| !r.is_disconnected()));
    }

    #[tokio::test]
    async fn sensor_missing_from_bus() {
        let layout = RegisterLayout::canonical(4);
        let transport = EmulatedTransport::new(layout).with_sensor(0x28FF_641A_0500_0000u64, 0);
        let mut session = DeviceSession::new(0, layout, transport);
        let directory = AliasDirectory::parse("", TEMP).expect("Must parse");

        let result = read_t_after(&mut session, &directory, &tokens(&["all"]), Duration::ZERO).await;
        assert!(matches!(result, Err(DacError::SensorNotOnBus { alias, .. }) if alias == "air"));
        assert!(session.transport().writes().is_empty());
    }

    #[tokio::test]
    async fn disconnected_sensor_reads_sentinel() {
        let layout = RegisterLayout::canonical(1);
        let transport = EmulatedTransport::new(layout).with_disconnected_sensor(7u64);
        let mut session = DeviceSession::new(0, layout, transport);
        let directory = AliasDirectory::parse("", "gone 7\n").expect("Must parse");

        let readings = read_t_after(&mut session, &directory, &tokens(&["gone"]), Duration::ZERO)
            .await
            .expect("Must read");
        assert_eq!(readings[0].celsius, DISCONNECTED_CELSIUS);
        assert!(readings[0].is_disconnected());
    }
}
