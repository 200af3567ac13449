//! Human-chosen names for DAC channels and temperature sensors.
//!
//! Directories are plain text, one entry per line:
//!
//! ```text
//! # DAC directory: alias board chip channel [sipm]
//! biasA 0 1 2
//! biasB 3 0 1   # trailing comments are fine
//!
//! # temperature directory: alias ... serial
//! plate 0x28FF641A05000000
//! ```
//!
//! A repeated alias replaces the earlier entry in place.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use log::debug;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::core::address::HardwareCoordinate;
use crate::core::device::SensorSerial;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("line {line}: malformed entry for `{alias}`: {reason}")]
    MalformedEntry {
        line: usize,
        alias: String,
        reason: String,
    },
}

impl DirectoryError {
    fn malformed(line: usize, alias: &str, reason: impl Into<String>) -> DirectoryError {
        DirectoryError::MalformedEntry {
            line,
            alias: alias.to_string(),
            reason: reason.into(),
        }
    }
}

/// An insertion-ordered map from alias to value.
///
/// Re-inserting an alias replaces its value but keeps its original position,
/// so the order `all` expands to is the order aliases first appeared in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasMap<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> Default for AliasMap<V> {
    fn default() -> Self {
        AliasMap {
            entries: vec![],
            index: HashMap::new(),
        }
    }
}

impl<V> AliasMap<V> {
    pub fn new() -> AliasMap<V> {
        AliasMap::default()
    }

    /// Returns the value previously bound to `alias`, if any.
    pub fn insert(&mut self, alias: impl Into<String>, value: V) -> Option<V> {
        let alias = alias.into();
        match self.index.get(&alias) {
            Some(&position) => Some(std::mem::replace(&mut self.entries[position].1, value)),
            None => {
                self.index.insert(alias.clone(), self.entries.len());
                self.entries.push((alias, value));
                None
            }
        }
    }

    pub fn get(&self, alias: &str) -> Option<&V> {
        self.index.get(alias).map(|&position| &self.entries[position].1)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.index.contains_key(alias)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(alias, value)| (alias.as_str(), value))
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(alias, _)| alias.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for AliasMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = AliasMap::new();
        for (alias, value) in iter {
            map.insert(alias, value);
        }
        map
    }
}

impl<V: Serialize> Serialize for AliasMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (alias, value) in &self.entries {
            map.serialize_entry(alias, value)?;
        }
        map.end()
    }
}

struct AliasMapVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for AliasMapVisitor<V> {
    type Value = AliasMap<V>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of aliases")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = AliasMap::new();
        while let Some((alias, value)) = access.next_entry::<String, V>()? {
            map.insert(alias, value);
        }
        Ok(map)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for AliasMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(AliasMapVisitor(PhantomData))
    }
}

/// The aliases known to a session: DAC channels, temperature sensors, and
/// the reverse lookup from sensor serial to alias used when displaying.
///
/// Immutable once built; re-running `init` replaces it wholesale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasDirectory {
    dac: AliasMap<HardwareCoordinate>,
    temperature: AliasMap<SensorSerial>,
    inverse: HashMap<SensorSerial, String>,
}

impl AliasDirectory {
    pub fn new(
        dac: AliasMap<HardwareCoordinate>,
        temperature: AliasMap<SensorSerial>,
    ) -> AliasDirectory {
        // Later aliases for the same serial win, like any other reassignment.
        let inverse = temperature
            .iter()
            .map(|(alias, serial)| (*serial, alias.to_string()))
            .collect();

        AliasDirectory {
            dac,
            temperature,
            inverse,
        }
    }

    /// Restores a directory exactly as it was persisted.
    pub fn from_parts(
        dac: AliasMap<HardwareCoordinate>,
        temperature: AliasMap<SensorSerial>,
        inverse: HashMap<SensorSerial, String>,
    ) -> AliasDirectory {
        AliasDirectory {
            dac,
            temperature,
            inverse,
        }
    }

    pub fn parse(dac_text: &str, temperature_text: &str) -> Result<AliasDirectory, DirectoryError> {
        Ok(AliasDirectory::new(
            parse_dac_directory(dac_text)?,
            parse_temperature_directory(temperature_text)?,
        ))
    }

    pub fn dac(&self) -> &AliasMap<HardwareCoordinate> {
        &self.dac
    }

    pub fn temperature(&self) -> &AliasMap<SensorSerial> {
        &self.temperature
    }

    pub fn inverse(&self) -> &HashMap<SensorSerial, String> {
        &self.inverse
    }

    pub fn alias_of(&self, serial: &SensorSerial) -> Option<&str> {
        self.inverse.get(serial).map(String::as_str)
    }
}

/// Yields `(line number, alias, value tokens)` for every entry line.
fn entries(text: &str) -> impl Iterator<Item = (usize, &str, Vec<&str>)> {
    text.lines().enumerate().filter_map(|(number, line)| {
        let content = line.split('#').next().unwrap_or_default();
        let mut tokens = content.split_whitespace();
        let alias = tokens.next()?;
        Some((number + 1, alias, tokens.collect()))
    })
}

pub fn parse_dac_directory(text: &str) -> Result<AliasMap<HardwareCoordinate>, DirectoryError> {
    let mut map = AliasMap::new();

    for (line, alias, values) in entries(text) {
        if values.is_empty() {
            return Err(DirectoryError::malformed(line, alias, "alias has no coordinate"));
        }

        let components = values
            .iter()
            .map(|token| token.parse::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| DirectoryError::malformed(line, alias, err.to_string()))?;

        let coordinate = HardwareCoordinate::try_from(components)
            .map_err(|err| DirectoryError::malformed(line, alias, err.to_string()))?;

        if let Some(previous) = map.insert(alias, coordinate) {
            debug!("Alias `{alias}` redefined on line {line} (was {previous})");
        }
    }

    Ok(map)
}

pub fn parse_temperature_directory(text: &str) -> Result<AliasMap<SensorSerial>, DirectoryError> {
    let mut map = AliasMap::new();

    for (line, alias, values) in entries(text) {
        let literal = values
            .last()
            .ok_or_else(|| DirectoryError::malformed(line, alias, "alias has no serial number"))?;

        let serial = literal
            .parse::<SensorSerial>()
            .map_err(|err| DirectoryError::malformed(line, alias, format!("`{literal}`: {err}")))?;

        if let Some(previous) = map.insert(alias, serial) {
            debug!("Alias `{alias}` redefined on line {line} (was {previous})");
        }
    }

    Ok(map)
}
