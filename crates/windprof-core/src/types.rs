use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// The three Doppler lidar families handled by the pipeline. Each family has
/// its own native vertical coordinate and its own quality-control rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentModel {
    /// Pulsed scanning lidar retrieving winds from VAD scans.
    PulsedLidar,
    /// Vertically staring continuous-wave lidar.
    ContinuousWave,
    /// Scanning Doppler system running a fixed-elevation DBS sequence.
    ScanningDoppler,
}

impl InstrumentModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentModel::PulsedLidar => "pulsed_lidar",
            InstrumentModel::ContinuousWave => "continuous_wave",
            InstrumentModel::ScanningDoppler => "scanning_doppler",
        }
    }

    /// Whether raw gates are slant ranges along the beam (needing projection
    /// through the scan elevation) rather than heights above the instrument.
    pub fn is_range_native(&self) -> bool {
        match self {
            InstrumentModel::PulsedLidar | InstrumentModel::ScanningDoppler => true,
            InstrumentModel::ContinuousWave => false,
        }
    }
}

impl std::fmt::Display for InstrumentModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    /// Deployment-overlap test: closed on both deployment bounds, matching
    /// how the roster metadata records instrument swap-over days.
    pub fn intersects_inclusive(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= end && self.end >= start
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// One time-bounded assignment of an instrument to a station, loaded from the
/// static deployment metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub station_code: String,
    pub instrument_serial: String,
    #[serde(rename = "instrument_type")]
    pub model: InstrumentModel,
    pub start_datetime: DateTime<Utc>,
    pub end_datetime: DateTime<Utc>,
    pub above_sea_level_m: f64,
    /// Elevation angle of the wind scan, degrees from horizontal. Required
    /// for range-native models, meaningless for vertical-stare systems.
    #[serde(default)]
    pub scan_elevation_deg: Option<f64>,
    /// Correction added to the instrument azimuth by the decoder when the
    /// system was installed rotated from true north.
    #[serde(default)]
    pub azimuth_offset_deg: Option<f64>,
}

impl Deployment {
    pub fn interval(&self) -> TimeWindow {
        TimeWindow::new(self.start_datetime, self.end_datetime)
    }

    pub fn covers(&self, window: &TimeWindow) -> bool {
        window.intersects_inclusive(self.start_datetime, self.end_datetime)
    }
}

/// Static per-station site metadata, loaded once and merged into the output
/// along the station dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub station_code: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Canonical variable names shared between the decoders, the QC engine and
/// the output catalog.
pub mod var {
    pub const TIME: &str = "time";
    pub const HEIGHT: &str = "height";
    pub const STATION_CODE: &str = "station_code";

    pub const U: &str = "u";
    pub const V: &str = "v";
    pub const W: &str = "w";
    pub const WS: &str = "ws";
    pub const WD: &str = "wd";
    pub const WIND_MEAN_INTENSITY: &str = "wind_mean_intensity";
    pub const WIND_RMSE: &str = "wind_rmse";
    pub const WIND_STATUS: &str = "wind_status";
    pub const DATA_AVAILABILITY: &str = "data_availability";
    pub const N_RAYS_VALID: &str = "n_rays_valid";
    pub const N_RAYS_IN_SCAN: &str = "n_rays_in_scan";
    pub const N_PULSES: &str = "n_pulses";
    pub const RAW_GATE_LENGTH: &str = "raw_gate_length";
    pub const SYSTEM_ID: &str = "system_id";

    pub const FLAG_PREFIX: &str = "flag_";
    pub const FLAG_LOW_SIGNAL_WARN: &str = "flag_low_signal_warn";
    pub const FLAG_LOW_SIGNAL_REMOVED: &str = "flag_low_signal_removed";
    pub const FLAG_SUSPECT_RETRIEVAL_WARN: &str = "flag_suspect_retrieval_warn";
    pub const FLAG_SUSPECT_RETRIEVAL_REMOVED: &str = "flag_suspect_retrieval_removed";
    pub const FLAG_WS_OUT_OF_RANGE: &str = "flag_ws_out_of_range";
    /// Internal to the scanning-Doppler family; dropped before assembly.
    pub const FLAG_WIND_STATUS_INVALID: &str = "flag_wind_status_invalid";

    pub fn is_flag(name: &str) -> bool {
        name.starts_with(FLAG_PREFIX)
    }
}
