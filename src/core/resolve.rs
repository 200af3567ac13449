use log::debug;

use crate::core::session::BusMap;
use crate::prelude::*;

/// The token that expands to every alias in a directory.
pub const ALL: &str = "all";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub alias: String,
    pub coordinate: HardwareCoordinate,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSensor {
    pub alias: String,
    pub serial: SensorSerial,
    pub index: u16,
}

/// Turns the alias tokens of one command into concrete targets.
///
/// Resolution is all-or-nothing: every token is resolved, and every address
/// computed, before a caller touches the hardware. The first token that fails
/// aborts the batch, so a command never leaves some of its channels changed
/// and others not because of a typo.
pub struct BatchResolver<'a> {
    directory: &'a AliasDirectory,
}

impl<'a> BatchResolver<'a> {
    pub fn new(directory: &'a AliasDirectory) -> BatchResolver<'a> {
        BatchResolver { directory }
    }

    pub fn channels<S: AsRef<str>>(
        &self,
        tokens: &[S],
        layout: &RegisterLayout,
    ) -> Result<Vec<ResolvedChannel>, DacError> {
        let map = self.directory.dac();

        expand(tokens, map)
            .into_iter()
            .map(|alias| {
                let coordinate = *map
                    .get(alias)
                    .ok_or_else(|| DacError::AliasNotFound(alias.to_string()))?;
                let address = layout.address_of(&coordinate)?;

                debug!("Resolved `{alias}` to {coordinate} at register {address}");
                Ok(ResolvedChannel {
                    alias: alias.to_string(),
                    coordinate,
                    address,
                })
            })
            .collect()
    }

    /// First stage of sensor resolution: alias to serial, without any I/O.
    pub fn sensor_serials<S: AsRef<str>>(
        &self,
        tokens: &[S],
    ) -> Result<Vec<(String, SensorSerial)>, DacError> {
        let map = self.directory.temperature();

        expand(tokens, map)
            .into_iter()
            .map(|alias| {
                map.get(alias)
                    .map(|serial| (alias.to_string(), *serial))
                    .ok_or_else(|| DacError::AliasNotFound(alias.to_string()))
            })
            .collect()
    }

    /// Both stages: alias to serial, then serial to its index in `bus`.
    pub fn sensors<S: AsRef<str>>(
        &self,
        tokens: &[S],
        bus: &BusMap,
    ) -> Result<Vec<ResolvedSensor>, DacError> {
        self.sensor_serials(tokens)?
            .into_iter()
            .map(|(alias, serial)| match bus.index_of(&serial) {
                Some(index) => {
                    debug!("Resolved `{alias}` ({serial}) to bus index {index}");
                    Ok(ResolvedSensor {
                        alias,
                        serial,
                        index,
                    })
                }
                None => Err(DacError::SensorNotOnBus { alias, serial }),
            })
            .collect()
    }
}

/// A lone `all` (any case) stands for every alias in directory order;
/// otherwise the tokens are taken as given.
fn expand<'t, S, V>(tokens: &'t [S], map: &'t AliasMap<V>) -> Vec<&'t str>
where
    S: AsRef<str>,
{
    match tokens {
        [only] if only.as_ref().eq_ignore_ascii_case(ALL) => map.aliases().collect(),
        tokens => tokens.iter().map(AsRef::as_ref).collect(),
    }
}
