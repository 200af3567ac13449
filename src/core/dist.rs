use log::info;

use crate::core::store::SessionConfig;
use crate::prelude::*;

/// The entry-point structure for talking to a DAC bridge.
///
/// This structure does not need to be initialised, but is rather a namespace for helper methods
/// to open a [`DeviceSession`] over a chosen transport.
///
/// An example of connecting to an emulated bridge is shown below, note the [turbofish](https://rust.code-maven.com/turbofish)
/// syntax used in specifying the [`Emulated`] transport.
///
/// ```rust
/// use dacmaster::prelude::*;
///
/// # async fn docs() {
/// let settings = SerialSettings::default();
/// let session = DacMaster::connect::<Emulated>(0, &settings, RegisterLayout::canonical(4))
///     .await
///     .expect("Must connect");
///
/// println!("Connected to slave {}", session.slave());
/// }
/// ```
///
/// Once connected, use the methods of the returned [`DeviceSession`] to drive the bridge.
/// Functionality is *instanced*: each session owns its transport exclusively, so two
/// operations on one bridge can never interleave on the wire.
///
/// ## Transports
///
/// - [`Rtu`].
///     Modbus RTU over a serial port, typically a USB-RS485 adapter. The bridge answers
///     one request at a time; each round-trip is bounded by [`SerialSettings::timeout`].
///
/// - [`Emulated`].
///     An in-memory model of the bridge firmware. Does not require a bridge present, and
///     can be used for unit and integration testing.
///
pub struct DacMaster;

impl DacMaster {
    /// The preferred way to open a session.
    ///
    /// ```
    /// use dacmaster::prelude::*;
    ///
    /// # async fn docs() {
    /// let settings = SerialSettings::new("/dev/ttyUSB0", 9600, 0.3);
    /// let mut session = DacMaster::connect::<Rtu>(0, &settings, RegisterLayout::canonical(1))
    ///     .await
    ///     .expect("Must connect");
    ///
    /// let addr = session
    ///     .address_of(&HardwareCoordinate::channel(0, 1, 2))
    ///     .expect("Must resolve");
    /// session.set_voltage(addr, volts_to_raw(12.5).expect("In range")).await.expect("Must write");
    /// session.set_channel_power(addr, true).await.expect("Must write");
    /// }
    /// ```
    pub async fn connect<T>(
        slave: SlaveId,
        settings: &SerialSettings,
        layout: RegisterLayout,
    ) -> Result<DeviceSession<<T as Connect>::Transport>, DacError>
    where
        T: Connect,
    {
        info!(
            "Connecting to slave {slave} on {} at {} baud",
            settings.port, settings.baudrate
        );

        let transport = T::connect(settings, layout).await?;
        Ok(DeviceSession::new(slave, layout, transport))
    }

    /// Reopens the session persisted by `init`.
    ///
    /// ```
    /// use dacmaster::prelude::*;
    ///
    /// # async fn docs() {
    /// let config = FileStore::default().load().expect("Run `dacctl init` first");
    /// let session = DacMaster::from_config::<Rtu>(&config).await;
    /// }
    /// ```
    pub async fn from_config<T>(
        config: &SessionConfig,
    ) -> Result<DeviceSession<<T as Connect>::Transport>, DacError>
    where
        T: Connect,
    {
        DacMaster::connect::<T>(config.slave_id, &config.settings(), config.layout()).await
    }

    /// Wraps an already open transport, skipping the connection step.
    ///
    /// ```
    /// use dacmaster::prelude::*;
    ///
    /// # async fn docs() {
    /// let layout = RegisterLayout::canonical(4);
    /// let bridge = EmulatedTransport::new(layout).with_sensor(0x28FF_641A_0500_0000u64, 3200);
    ///
    /// let mut session = DacMaster::connect_with(0, layout, bridge);
    /// assert_eq!(session.init_temperature_bus().await.expect("Must scan"), 1);
    /// }
    /// ```
    pub fn connect_with<T>(slave: SlaveId, layout: RegisterLayout, transport: T) -> DeviceSession<T>
    where
        T: Transport,
    {
        DeviceSession::new(slave, layout, transport)
    }
}
