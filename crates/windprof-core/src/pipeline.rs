//! Period orchestration. One run holds the validated registry, the station
//! roster, a profile source and the configuration; `run_period` walks the
//! stations of one aggregation period and `run_batch` walks consecutive
//! periods, never letting one poisoned period or station stop the rest.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregate::{aggregate, derive_wind_fields};
use crate::assemble::{assemble, HarmonisedDataset, StationWindows};
use crate::config::HarmoniseConfig;
use crate::error::{ConfigError, Result, SourceError};
use crate::profile::ProfileSet;
use crate::qc::{qc_for, run_sample_qc};
use crate::regrid::harmonise_to_grid;
use crate::registry::{DeploymentRegistry, StationIndex};
use crate::types::{Deployment, TimeWindow};
use crate::vardefs::catalog;

/// Decoded profiles for one deployment and window, tagged with the format
/// version the decoder produced them under.
#[derive(Debug, Clone)]
pub struct SourceData {
    pub profiles: ProfileSet,
    pub source_version: String,
}

/// Provider of decoded instrument data. Implementations own file discovery
/// and raw-format decoding; `Ok(None)` means no input exists for the
/// deployment and window.
pub trait ProfileSource {
    fn load(
        &self,
        deployment: &Deployment,
        window: &TimeWindow,
    ) -> std::result::Result<Option<SourceData>, SourceError>;
}

/// Consumer of finished datasets. Implementations own persistence.
pub trait DatasetSink {
    fn write(&mut self, dataset: &HarmonisedDataset) -> anyhow::Result<()>;
}

/// Outcome of a batch run over consecutive periods.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub periods_written: usize,
    pub periods_empty: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PeriodFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodFailure {
    pub period: TimeWindow,
    pub error: String,
}

/// One processing run over fixed inputs.
pub struct Pipeline<'a> {
    registry: &'a DeploymentRegistry,
    stations: &'a StationIndex,
    source: &'a dyn ProfileSource,
    config: &'a HarmoniseConfig,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        registry: &'a DeploymentRegistry,
        stations: &'a StationIndex,
        source: &'a dyn ProfileSource,
        config: &'a HarmoniseConfig,
    ) -> Self {
        Self {
            registry,
            stations,
            source,
            config,
        }
    }

    /// Process one aggregation period across every station in the registry,
    /// in station-code order. A failing station is logged and skipped; the
    /// period carries on with the rest. `Ok(None)` means nothing
    /// contributed and there is nothing to write.
    pub fn run_period(&self, period: &TimeWindow) -> Result<Option<HarmonisedDataset>> {
        let mut contributions: Vec<StationWindows> = Vec::new();
        for code in self.registry.station_codes() {
            match self.run_station(code, period) {
                Ok(Some(contribution)) => contributions.push(contribution),
                Ok(None) => {}
                Err(error) => {
                    warn!(
                        station = code,
                        period = %period,
                        %error,
                        "station failed, continuing with the remaining stations"
                    );
                }
            }
        }
        Ok(assemble(&contributions, period, self.config, catalog())?)
    }

    /// Walk `periods` consecutive periods of the configured width from
    /// `start`, writing each finished dataset to the sink. Failed periods
    /// land in the summary instead of aborting the batch.
    pub fn run_batch(
        &self,
        start: DateTime<Utc>,
        periods: usize,
        sink: &mut dyn DatasetSink,
    ) -> BatchSummary {
        let mut summary = BatchSummary {
            periods_written: 0,
            periods_empty: 0,
            failures: Vec::new(),
        };
        let width = Duration::seconds(self.config.period_s);
        for k in 0..periods {
            let period = TimeWindow::new(
                start + width * k as i32,
                start + width * (k as i32 + 1),
            );
            match self.run_period(&period) {
                Ok(Some(dataset)) => match sink.write(&dataset) {
                    Ok(()) => summary.periods_written += 1,
                    Err(error) => {
                        warn!(period = %period, %error, "sink rejected the period");
                        summary.failures.push(PeriodFailure {
                            period,
                            error: error.to_string(),
                        });
                    }
                },
                Ok(None) => {
                    info!(period = %period, "no contributing stations");
                    summary.periods_empty += 1;
                }
                Err(error) => {
                    warn!(period = %period, %error, "period failed");
                    summary.failures.push(PeriodFailure {
                        period,
                        error: error.to_string(),
                    });
                }
            }
        }
        info!(
            written = summary.periods_written,
            empty = summary.periods_empty,
            failed = summary.failures.len(),
            "batch finished"
        );
        summary
    }

    /// One station's full chain for a period: resolve, load, slice, sample
    /// QC on the native axis, harmonise, aggregate, window QC, derive.
    fn run_station(&self, code: &str, period: &TimeWindow) -> Result<Option<StationWindows>> {
        let Some(deployment) = self.registry.resolve(code, period)? else {
            debug!(station = code, period = %period, "not instrumented, skipping");
            return Ok(None);
        };
        let serial = deployment.instrument_serial.as_str();

        let Some(station) = self.stations.get(code) else {
            return Err(ConfigError::Invalid {
                message: format!("station {code} has deployments but no site metadata"),
            }
            .into());
        };

        let Some(source_data) = self.source.load(deployment, period)? else {
            info!(station = code, serial, period = %period, "no source data");
            return Ok(None);
        };
        self.check_version(deployment, &source_data)?;

        let Some(mut set) = source_data.profiles.slice_window(period) else {
            warn!(station = code, serial, period = %period, "source data does not intersect period");
            return Ok(None);
        };

        // Sample QC runs on the native axis so range-based tests see slant
        // ranges, then diagnostics are dropped and the set is regridded.
        let qc = qc_for(deployment.model);
        run_sample_qc(&mut set, qc.as_ref(), &self.config.qc)?;
        retain_aggregatable(&mut set);
        let set = harmonise_to_grid(set, deployment, &self.config.grid)?;

        let mut windows = aggregate(&set, period, self.config.aggregation_window_s, catalog())?;
        qc.finalise_window(&mut windows, &self.config.qc)?;
        derive_wind_fields(&mut windows)?;

        info!(station = code, serial, period = %period, "station harmonised");
        Ok(Some(StationWindows {
            station: station.clone(),
            system_id: deployment.instrument_serial.clone(),
            windows,
        }))
    }

    fn check_version(&self, deployment: &Deployment, data: &SourceData) -> Result<()> {
        let Some(expected) = self.config.expected_version(deployment.model) else {
            return Ok(());
        };
        if data.source_version != expected {
            return Err(SourceError::VersionMismatch {
                station_code: deployment.station_code.clone(),
                instrument_serial: deployment.instrument_serial.clone(),
                expected: expected.to_string(),
                found: data.source_version.clone(),
            }
            .into());
        }
        Ok(())
    }
}

/// Drop decoder diagnostics the aggregator has no reduction for. Sample QC
/// has already consumed them; flag layers always survive.
fn retain_aggregatable(set: &mut ProfileSet) {
    let dropped_gates: Vec<String> = set
        .gate_var_names()
        .filter(|name| catalog().aggregation_for(name).is_none())
        .map(str::to_string)
        .collect();
    for name in &dropped_gates {
        set.remove_gate_var(name);
    }
    let dropped_scalars: Vec<String> = set
        .scalar_var_names()
        .filter(|name| catalog().aggregation_for(name).is_none())
        .map(str::to_string)
        .collect();
    for name in &dropped_scalars {
        set.remove_scalar_var(name);
    }
    if !dropped_gates.is_empty() || !dropped_scalars.is_empty() {
        debug!(?dropped_gates, ?dropped_scalars, "dropped non-aggregatable variables");
    }
}
