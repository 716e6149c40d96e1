use thiserror::Error;

use crate::types::TimeWindow;

/// Errors raised while building or querying the deployment registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("deployment {station_code}/{instrument_serial} has end <= start ({window})")]
    InvalidInterval {
        station_code: String,
        instrument_serial: String,
        window: TimeWindow,
    },

    #[error(
        "station {station_code} has overlapping deployments {first_serial} and {second_serial}"
    )]
    OverlappingDeployments {
        station_code: String,
        first_serial: String,
        second_serial: String,
    },

    #[error(
        "deployment {station_code}/{instrument_serial} is range-native but has no scan elevation"
    )]
    MissingElevation {
        station_code: String,
        instrument_serial: String,
    },

    #[error(
        "station {station_code} has {count} concurrent deployments for window {window}: {serials:?}"
    )]
    ConcurrentDeployments {
        station_code: String,
        window: TimeWindow,
        count: usize,
        serials: Vec<String>,
    },
}

/// Errors from axis construction and grid-shape bookkeeping.
#[derive(Debug, Error)]
pub enum AxisError {
    #[error("expected a {expected} axis, got {actual}")]
    WrongKind {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{axis} axis must be strictly increasing (index {index})")]
    NotIncreasing { axis: &'static str, index: usize },

    #[error("variable {variable} has length {actual}, expected {expected}")]
    LengthMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },

    #[error("variable {variable} has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        variable: String,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Errors from regridding onto the harmonised height axis.
#[derive(Debug, Error)]
pub enum RegridError {
    #[error("gate spacing is not uniform: found spacings {spacings:?}")]
    NonUniformGateSpacing { spacings: Vec<f64> },

    #[error("scan elevation {elevation_deg} deg cannot project slant ranges (expected 0 < e <= 90)")]
    InvalidElevation { elevation_deg: f64 },

    #[error("regridding requires a height-ASL axis, got {actual}")]
    WrongAxisKind { actual: &'static str },

    #[error(
        "native axis [{native_min}, {native_max}] does not overlap target grid [{grid_min}, {grid_max})"
    )]
    EmptyOverlap {
        native_min: f64,
        native_max: f64,
        grid_min: f64,
        grid_max: f64,
    },

    #[error(transparent)]
    Axis(#[from] AxisError),
}

/// Errors from the quality-control engine.
#[derive(Debug, Error)]
pub enum QcError {
    #[error("{rule} requires variable {variable}, which is missing")]
    MissingVariable { rule: &'static str, variable: String },

    #[error("{rule} produced a layer of shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        rule: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Errors from temporal aggregation.
#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("variable {variable} is not in the catalog; cannot choose an aggregation")]
    UnknownVariable { variable: String },

    #[error(
        "aggregation window {window_s} s does not divide the period of {period_s} s evenly"
    )]
    WindowMismatch { window_s: i64, period_s: i64 },

    #[error("aggregation period {window} is empty or inverted")]
    EmptySpan { window: TimeWindow },

    #[error("cannot derive wind speed/direction without {variable}")]
    MissingComponent { variable: String },
}

/// Errors from assembling the merged multi-station dataset.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("no attribute definition for variable {variable} at level {level}")]
    AttributeLookup { variable: String, level: String },

    #[error("duplicate attribute definition for variable {variable} at level {level}")]
    DuplicateAttribute { variable: String, level: String },

    #[error("building the output frame failed: {source}")]
    Frame {
        #[from]
        source: polars::error::PolarsError,
    },
}

/// Errors from a profile source implementation (decoders live behind the
/// trait; this carries whatever they need to report).
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O while loading {station_code}/{instrument_serial}: {source}")]
    Io {
        station_code: String,
        instrument_serial: String,
        #[source]
        source: std::io::Error,
    },

    #[error("decoding {station_code}/{instrument_serial} failed: {message}")]
    Decode {
        station_code: String,
        instrument_serial: String,
        message: String,
    },

    #[error(
        "{station_code}/{instrument_serial} declares source version {found}, expected {expected}"
    )]
    VersionMismatch {
        station_code: String,
        instrument_serial: String,
        expected: String,
        found: String,
    },
}

/// Errors from loading or validating configuration and metadata files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {message}")]
    Invalid { message: String },
}

/// Top-level error for the harmonisation pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("deployment registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("vertical axis error: {0}")]
    Axis(#[from] AxisError),

    #[error("regrid error: {0}")]
    Regrid(#[from] RegridError),

    #[error("quality control error: {0}")]
    Qc(#[from] QcError),

    #[error("aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("assembly error: {0}")]
    Assemble(#[from] AssembleError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars operation failed: {0}")]
    Polars(#[from] polars::error::PolarsError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
