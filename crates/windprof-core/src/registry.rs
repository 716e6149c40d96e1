use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, RegistryError, Result};
use crate::types::{Deployment, Station, TimeWindow};

/// Validated deployment metadata for every station, answering "which
/// instrument was here during this window".
#[derive(Debug, Clone)]
pub struct DeploymentRegistry {
    /// Sorted by (station_code, start) at construction.
    deployments: Vec<Deployment>,
}

impl DeploymentRegistry {
    /// Validates and indexes the deployment records. Any malformed record or
    /// same-station overlap rejects the whole registry; a pipeline run never
    /// starts on metadata that can resolve ambiguously.
    pub fn new(mut deployments: Vec<Deployment>) -> std::result::Result<Self, RegistryError> {
        for dep in &deployments {
            if dep.end_datetime <= dep.start_datetime {
                return Err(RegistryError::InvalidInterval {
                    station_code: dep.station_code.clone(),
                    instrument_serial: dep.instrument_serial.clone(),
                    window: dep.interval(),
                });
            }
            if dep.model.is_range_native() && dep.scan_elevation_deg.is_none() {
                return Err(RegistryError::MissingElevation {
                    station_code: dep.station_code.clone(),
                    instrument_serial: dep.instrument_serial.clone(),
                });
            }
        }

        deployments.sort_by(|a, b| {
            (a.station_code.as_str(), a.start_datetime)
                .cmp(&(b.station_code.as_str(), b.start_datetime))
        });

        // Intervals are half-open for the overlap check, so back-to-back
        // deployments sharing an instant are legal.
        for pair in deployments.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if a.station_code == b.station_code && b.start_datetime < a.end_datetime {
                return Err(RegistryError::OverlappingDeployments {
                    station_code: a.station_code.clone(),
                    first_serial: a.instrument_serial.clone(),
                    second_serial: b.instrument_serial.clone(),
                });
            }
        }

        info!(deployments = deployments.len(), "deployment registry built");
        Ok(Self { deployments })
    }

    pub fn from_json_str(raw: &str, origin: &str) -> Result<Self> {
        let deployments: Vec<Deployment> =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
                path: origin.to_string(),
                message: e.to_string(),
            })?;
        Ok(Self::new(deployments)?)
    }

    pub fn from_json_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&raw, &path.display().to_string())
    }

    /// The deployment active at `station_code` over `window`.
    ///
    /// Zero matches is a normal outcome (the station simply has no
    /// instrument then) and returns `Ok(None)`; more than one match means
    /// the window straddles a swap-over and cannot be attributed to a single
    /// instrument.
    pub fn resolve(
        &self,
        station_code: &str,
        window: &TimeWindow,
    ) -> std::result::Result<Option<&Deployment>, RegistryError> {
        let matches: Vec<&Deployment> = self
            .deployments
            .iter()
            .filter(|d| d.station_code == station_code && d.covers(window))
            .collect();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(Some(matches[0])),
            n => Err(RegistryError::ConcurrentDeployments {
                station_code: station_code.to_string(),
                window: *window,
                count: n,
                serials: matches
                    .iter()
                    .map(|d| d.instrument_serial.clone())
                    .collect(),
            }),
        }
    }

    /// Distinct station codes, ascending. This is the processing order.
    pub fn station_codes(&self) -> Vec<&str> {
        let mut codes: Vec<&str> = self
            .deployments
            .iter()
            .map(|d| d.station_code.as_str())
            .collect();
        codes.sort_unstable();
        codes.dedup();
        codes
    }

    pub fn iter(&self) -> impl Iterator<Item = &Deployment> {
        self.deployments.iter()
    }

    pub fn len(&self) -> usize {
        self.deployments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }
}

/// Station site metadata keyed by station code.
#[derive(Debug, Clone)]
pub struct StationIndex {
    by_code: BTreeMap<String, Station>,
}

impl StationIndex {
    pub fn new(stations: Vec<Station>) -> std::result::Result<Self, ConfigError> {
        let mut by_code = BTreeMap::new();
        for station in stations {
            let code = station.station_code.clone();
            if by_code.insert(code.clone(), station).is_some() {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate station code {code}"),
                });
            }
        }
        Ok(Self { by_code })
    }

    pub fn from_json_str(raw: &str, origin: &str) -> Result<Self> {
        let stations: Vec<Station> = serde_json::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::new(stations)?)
    }

    pub fn from_json_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json_str(&raw, &path.display().to_string())
    }

    pub fn get(&self, station_code: &str) -> Option<&Station> {
        self.by_code.get(station_code)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}
