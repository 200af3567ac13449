use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::{error, warn};

use dacmaster::core::commands;
use dacmaster::prelude::*;

const DAC_DIR_FILE: &str = "DacDir.txt";
const TEMP_DIR_FILE: &str = "TempDir.txt";

/// Control SiPM bias voltages and read temperature sensors through a Modbus bridge.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Session state file (defaults to $DACCTL_STATE or ./dacctl_state.json)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialise bridge communications and load the alias directories
    Init(InitArgs),
    /// Power up channels
    #[command(name = "powerUp", alias = "powUp")]
    PowerUp(Channels),
    /// Power down channels
    #[command(name = "powerDown", aliases = ["powDn", "powDown"])]
    PowerDown(Channels),
    /// Show whether channels are powered
    #[command(name = "getPower")]
    GetPower(Channels),
    /// Show the commanded voltage of channels
    #[command(name = "getV", alias = "gtV")]
    GetV(Channels),
    /// Show the voltage the DACs report back (approximate)
    #[command(name = "readV")]
    ReadV(Channels),
    /// Set the output voltage of channels
    #[command(name = "updateV", alias = "newV")]
    UpdateV {
        /// Channel aliases, or `all`
        #[arg(required = true, allow_negative_numbers = true)]
        channels: Vec<String>,
        /// New voltage in volts (0 to 60)
        #[arg(allow_negative_numbers = true)]
        volts: f64,
    },
    /// Read temperature sensors
    #[command(name = "readT")]
    ReadT(Channels),
    /// Rescan the 1-Wire bus and count the sensors on it
    #[command(name = "numTempSensors")]
    NumTempSensors,
    /// List the serial number of every sensor on the bus
    #[command(name = "tempSensorSerNums")]
    TempSensorSerNums,
}

#[derive(Args, Debug)]
struct Channels {
    /// Aliases from the directory, or `all`
    #[arg(required = true)]
    aliases: Vec<String>,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Modbus slave id of the bridge
    #[arg(short, long = "slaveId", default_value_t = 0)]
    slave_id: u8,
    /// Serial port the bridge is attached to
    #[arg(short, long, default_value = DEFAULT_PORT)]
    port: String,
    /// Number of DAC boards behind the bridge
    #[arg(short = 'n', long = "numBoards", default_value_t = 1)]
    num_boards: u16,
    /// Serial line speed
    #[arg(short, long, default_value_t = DEFAULT_BAUDRATE)]
    baudrate: u32,
    /// Seconds to wait for each reply
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: f64,
    /// SiPM channel blocks per board
    #[arg(long = "sipmChannels", default_value_t = DEFAULT_SIPM_CHANNELS)]
    sipm_channels: u16,
    /// Address encoding understood by the bridge firmware
    #[arg(long, value_enum, default_value_t = AddressScheme::Canonical)]
    scheme: AddressScheme,
    /// DAC alias directory
    #[arg(short = 'a', long = "addressFile", default_value = DAC_DIR_FILE)]
    address_file: PathBuf,
    /// Temperature sensor alias directory (TempDir.txt when present)
    #[arg(short = 't', long = "tempFile")]
    temp_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, level));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let store = cli.state.map(FileStore::new).unwrap_or_default();

    let command = match cli.command {
        Command::Init(args) => return init(&store, args),
        command => command,
    };

    let config = store.load()?;
    let directory = config.directory();
    let mut session = DacMaster::from_config::<Rtu>(&config).await?;

    let result = execute(&mut session, &directory, command).await;
    let closed = session.close().await;

    if let (Err(_), Err(err)) = (&result, &closed) {
        warn!("Failed to close session: {err}");
    }
    Ok(result.and(closed)?)
}

fn read_directory(path: &Path) -> Result<String, Box<dyn Error>> {
    std::fs::read_to_string(path)
        .map_err(|err| format!("cannot read directory {}: {err}", path.display()).into())
}

fn init(store: &FileStore, args: InitArgs) -> Result<(), Box<dyn Error>> {
    let dac_text = read_directory(&args.address_file)?;
    let temperature_text = match &args.temp_file {
        Some(path) => read_directory(path)?,
        None if Path::new(TEMP_DIR_FILE).exists() => read_directory(Path::new(TEMP_DIR_FILE))?,
        None => String::new(),
    };

    let config = SessionConfig {
        slave_id: args.slave_id,
        port: args.port,
        baudrate: args.baudrate,
        board_count: args.num_boards,
        sipm_channels: args.sipm_channels,
        timeout: args.timeout,
        scheme: args.scheme,
        ..SessionConfig::default()
    };

    let config = commands::init(store, config, &dac_text, &temperature_text)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("Session state written to {}", store.path().display());
    Ok(())
}

async fn execute<T: Transport>(
    session: &mut DeviceSession<T>,
    directory: &AliasDirectory,
    command: Command,
) -> Result<(), DacError> {
    match command {
        Command::Init(_) => {}
        Command::PowerUp(channels) => {
            for channel in commands::power_up(session, directory, &channels.aliases).await? {
                println!("{}: register {} powered up", channel.alias, channel.address);
            }
        }
        Command::PowerDown(channels) => {
            for channel in commands::power_down(session, directory, &channels.aliases).await? {
                println!("{}: register {} powered down", channel.alias, channel.address);
            }
        }
        Command::GetPower(channels) => {
            for state in commands::get_power(session, directory, &channels.aliases).await? {
                let power = if state.on { "on" } else { "off" };
                println!("{}: {power}", state.channel.alias);
            }
        }
        Command::GetV(channels) => {
            for voltage in commands::get_v(session, directory, &channels.aliases).await? {
                println!("{}: {:.3} V (code {})", voltage.channel.alias, voltage.volts, *voltage.raw);
            }
        }
        Command::ReadV(channels) => {
            for voltage in commands::read_v(session, directory, &channels.aliases).await? {
                println!("{}: ~{:.3} V (code {})", voltage.channel.alias, voltage.volts, *voltage.raw);
            }
        }
        Command::UpdateV { channels, volts } => {
            for voltage in commands::update_v(session, directory, &channels, volts).await? {
                println!(
                    "{}: set to {:.3} V (code {})",
                    voltage.channel.alias, voltage.volts, *voltage.raw
                );
            }
        }
        Command::ReadT(sensors) => {
            for reading in commands::read_t(session, directory, &sensors.aliases).await? {
                let note = if reading.is_disconnected() { " (disconnected)" } else { "" };
                println!(
                    "{}: {:.2} °C / {:.2} °F{note}",
                    reading.sensor.alias, reading.celsius, reading.fahrenheit
                );
            }
        }
        Command::NumTempSensors => {
            println!("{}", commands::num_temp_sensors(session).await?);
        }
        Command::TempSensorSerNums => {
            for sensor in commands::temp_sensor_ser_nums(session, directory).await? {
                let alias = sensor.alias.as_deref().unwrap_or("-");
                println!("{}: {} {alias}", sensor.index, sensor.serial);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use clap::CommandFactory;

    use super::*;

    fn update_v(args: &[&str]) -> (Vec<String>, f64) {
        let cli = Cli::try_parse_from(args).expect("Must parse");
        match cli.command {
            Command::UpdateV { channels, volts } => (channels, volts),
            command => panic!("unexpected command {command:?}"),
        }
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn update_v_takes_aliases_then_volts() {
        let (channels, volts) = update_v(&["dacctl", "newV", "biasA", "biasB", "12.5"]);
        assert_eq!(channels, vec!["biasA", "biasB"]);
        assert_eq!(volts, 12.5);
    }

    #[test]
    fn negative_volts_reach_range_check() {
        let (channels, volts) = update_v(&["dacctl", "updateV", "biasA", "-1"]);
        assert_eq!(channels, vec!["biasA"]);
        assert_eq!(volts, -1.0);
    }

    #[test]
    fn init_accepts_camel_case_flags() {
        let cli = Cli::try_parse_from([
            "dacctl", "init", "--slaveId", "3", "--numBoards", "4", "--sipmChannels", "1",
        ])
        .expect("Must parse");

        match cli.command {
            Command::Init(args) => {
                assert_eq!(args.slave_id, 3);
                assert_eq!(args.num_boards, 4);
                assert_eq!(args.sipm_channels, 1);
                assert_eq!(args.address_file, PathBuf::from(DAC_DIR_FILE));
            }
            command => panic!("unexpected command {command:?}"),
        }
    }
}
