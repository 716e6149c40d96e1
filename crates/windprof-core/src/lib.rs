//! Wind-profiler harmonisation: load -> sample QC -> regrid -> aggregate ->
//! window QC -> merge, one aggregation period at a time across a roster of
//! Doppler-lidar stations.

pub mod aggregate;
pub mod assemble;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod profile;
pub mod qc;
pub mod registry;
pub mod regrid;
pub mod types;
pub mod vardefs;
pub mod wind;

pub use aggregate::{aggregate, derive_wind_fields, AggregatedSet};
pub use assemble::{assemble, DatasetAttrs, HarmonisedDataset, StationWindows};
pub use config::{GridSpec, HarmoniseConfig, QcConfig};
pub use error::{PipelineError, Result};
pub use pipeline::{
    BatchSummary, DatasetSink, PeriodFailure, Pipeline, ProfileSource, SourceData,
};
pub use profile::{AxisKind, ProfileSet, VerticalAxis};
pub use registry::{DeploymentRegistry, StationIndex};
pub use types::{Deployment, InstrumentModel, Station, TimeWindow};
pub use vardefs::{catalog, VariableCatalog};
