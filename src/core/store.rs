//! Session state shared between invocations of the CLI.
//!
//! `init` writes a [`SessionConfig`]; every other command reads it back and
//! rebuilds a session from it. The state is never modified in place.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prelude::*;

/// Environment variable overriding the state file location.
pub const STATE_ENV: &str = "DACCTL_STATE";
pub const DEFAULT_STATE_FILE: &str = "dacctl_state.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no session state at {0}; run `init` first")]
    Missing(PathBuf),
    #[error("session state is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error("session state I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("baud rate {0} is not supported by the bridge (one of {SUPPORTED_BAUDRATES:?})")]
    UnsupportedBaudrate(u32),
    #[error("a session needs at least one board")]
    NoBoards,
    #[error("a board needs at least one SiPM channel block")]
    NoSipmChannels,
    #[error("reply timeout {0} s is not a positive number of seconds")]
    InvalidTimeout(f64),
}

/// Everything needed to reconnect to a bridge and resolve aliases on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub slave_id: SlaveId,
    pub port: String,
    pub baudrate: u32,
    pub board_count: u16,
    #[serde(default = "default_sipm_channels")]
    pub sipm_channels: u16,
    pub timeout: f64,
    #[serde(default)]
    pub scheme: AddressScheme,
    pub dac_aliases: AliasMap<HardwareCoordinate>,
    pub temp_aliases: AliasMap<SensorSerial>,
    pub inverse_temp_aliases: BTreeMap<u64, String>,
}

fn default_sipm_channels() -> u16 {
    DEFAULT_SIPM_CHANNELS
}

impl Default for SessionConfig {
    fn default() -> Self {
        let settings = SerialSettings::default();
        SessionConfig {
            slave_id: 0,
            port: settings.port,
            baudrate: settings.baudrate,
            board_count: 1,
            sipm_channels: DEFAULT_SIPM_CHANNELS,
            timeout: settings.timeout,
            scheme: AddressScheme::default(),
            dac_aliases: AliasMap::new(),
            temp_aliases: AliasMap::new(),
            inverse_temp_aliases: BTreeMap::new(),
        }
    }
}

impl SessionConfig {
    /// Checks the connection parameters the bridge firmware constrains.
    pub fn validate(&self) -> Result<(), StoreError> {
        if !SUPPORTED_BAUDRATES.contains(&self.baudrate) {
            return Err(StoreError::UnsupportedBaudrate(self.baudrate));
        }
        if self.board_count == 0 {
            return Err(StoreError::NoBoards);
        }
        if self.sipm_channels == 0 {
            return Err(StoreError::NoSipmChannels);
        }
        if self.timeout <= 0.0 || Duration::try_from_secs_f64(self.timeout).is_err() {
            return Err(StoreError::InvalidTimeout(self.timeout));
        }
        Ok(())
    }

    /// Replaces the alias maps with those of `directory`.
    pub fn with_directory(mut self, directory: &AliasDirectory) -> SessionConfig {
        self.dac_aliases = directory.dac().clone();
        self.temp_aliases = directory.temperature().clone();
        self.inverse_temp_aliases = directory
            .inverse()
            .iter()
            .map(|(serial, alias)| (serial.0, alias.clone()))
            .collect();
        self
    }

    pub fn settings(&self) -> SerialSettings {
        SerialSettings::new(self.port.clone(), self.baudrate, self.timeout)
    }

    pub fn layout(&self) -> RegisterLayout {
        RegisterLayout::new(self.board_count, self.sipm_channels, self.scheme)
    }

    pub fn directory(&self) -> AliasDirectory {
        AliasDirectory::from_parts(
            self.dac_aliases.clone(),
            self.temp_aliases.clone(),
            self.inverse_temp_aliases
                .iter()
                .map(|(serial, alias)| (SensorSerial(*serial), alias.clone()))
                .collect(),
        )
    }
}

/// Where session state lives between invocations.
pub trait SessionStore {
    fn load(&self) -> Result<SessionConfig, StoreError>;
    fn save(&self, config: &SessionConfig) -> Result<(), StoreError>;
}

/// JSON state on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl Default for FileStore {
    /// `$DACCTL_STATE`, or `dacctl_state.json` in the working directory.
    fn default() -> Self {
        let path = std::env::var_os(STATE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        FileStore { path }
    }
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> FileStore {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl SessionStore for FileStore {
    fn load(&self) -> Result<SessionConfig, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Missing(self.path.clone()))
            }
            Err(err) => return Err(err.into()),
        };

        debug!("Loaded session state from {}", self.path.display());
        Ok(serde_json::from_str(&content)?)
    }

    fn save(&self, config: &SessionConfig) -> Result<(), StoreError> {
        let content = serde_json::to_vec_pretty(config)?;

        // Readers never observe a half-written file: the rename is atomic
        // within one filesystem, hence the temporary file sits alongside.
        let mut file = tempfile::NamedTempFile::new_in(self.directory())?;
        file.write_all(&content)?;
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|err| err.error)?;

        info!("Saved session state to {}", self.path.display());
        Ok(())
    }
}

/// State held in memory; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Stores `raw` verbatim, valid JSON or not.
    pub fn with_raw(raw: impl Into<String>) -> MemoryStore {
        MemoryStore {
            slot: Arc::new(Mutex::new(Some(raw.into()))),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<String>>, StoreError> {
        self.slot
            .lock()
            .map_err(|_| io::Error::other("session store lock poisoned").into())
    }
}

impl SessionStore for MemoryStore {
    fn load(&self) -> Result<SessionConfig, StoreError> {
        match self.lock()?.as_deref() {
            Some(content) => Ok(serde_json::from_str(content)?),
            None => Err(StoreError::Missing(PathBuf::from("<memory>"))),
        }
    }

    fn save(&self, config: &SessionConfig) -> Result<(), StoreError> {
        let content = serde_json::to_string(config)?;
        *self.lock()? = Some(content);
        Ok(())
    }
}
