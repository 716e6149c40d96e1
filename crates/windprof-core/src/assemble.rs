//! Assembly of the per-station window sets into one long-format dataset.
//! Every station block carries the full catalog schema, with variables a
//! family never produces present as null columns, so the merged frame has
//! one stable shape regardless of which instruments contributed.

use std::collections::BTreeMap;

use polars::prelude::{Column, DataFrame, DataType, NamedFrom, Series, TimeUnit};
use serde::Serialize;
use tracing::info;

use crate::aggregate::AggregatedSet;
use crate::config::HarmoniseConfig;
use crate::error::AssembleError;
use crate::types::{var, InstrumentModel, Station, TimeWindow};
use crate::vardefs::{VariableAttrs, VariableCatalog};

/// One station's aggregated contribution to a processing period.
#[derive(Debug, Clone)]
pub struct StationWindows {
    pub station: Station,
    /// Serial of the instrument deployed over the period.
    pub system_id: String,
    pub windows: AggregatedSet,
}

/// Dataset-level provenance recorded alongside the merged frame.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetAttrs {
    pub processing_name: String,
    pub processing_version: String,
    pub source_versions: BTreeMap<InstrumentModel, String>,
    pub start_time_utc: String,
    pub end_time_utc: String,
    pub aggregation_time_s: i64,
}

/// The merged output for one period: the frame, its dataset attributes and
/// the attribute map of every column the catalog defines.
#[derive(Debug, Clone)]
pub struct HarmonisedDataset {
    pub frame: DataFrame,
    pub attrs: DatasetAttrs,
    pub variable_attrs: BTreeMap<String, VariableAttrs>,
}

/// Stack the contributing stations into one frame and attach provenance.
/// Returns `None` when no station contributed, so callers write nothing.
pub fn assemble(
    stations: &[StationWindows],
    period: &TimeWindow,
    config: &HarmoniseConfig,
    catalog: &VariableCatalog,
) -> Result<Option<HarmonisedDataset>, AssembleError> {
    let mut frames: Vec<DataFrame> = Vec::new();
    for entry in stations {
        frames.push(station_frame(entry, catalog)?);
    }

    let mut iter = frames.into_iter();
    let Some(mut frame) = iter.next() else {
        return Ok(None);
    };
    for other in iter {
        frame.vstack_mut(&other)?;
    }

    let window_s = config.aggregation_window_s;
    let mut variable_attrs = BTreeMap::new();
    for def in catalog.output_defs() {
        let mut attrs = def.attrs();
        attrs.comment = attrs.comment.replace("{time_window_s}", &window_s.to_string());
        variable_attrs.insert(def.name.to_string(), attrs);
    }

    let attrs = DatasetAttrs {
        processing_name: config.processing_name.clone(),
        processing_version: config.processing_version.clone(),
        source_versions: config.expected_source_versions.clone(),
        start_time_utc: period.start.to_rfc3339(),
        end_time_utc: period.end.to_rfc3339(),
        aggregation_time_s: window_s,
    };

    info!(
        stations = stations.len(),
        rows = frame.height(),
        period = %period,
        "assembled harmonised dataset"
    );
    Ok(Some(HarmonisedDataset {
        frame,
        attrs,
        variable_attrs,
    }))
}

/// One station's long-format block: a row per (window end, height level).
fn station_frame(
    entry: &StationWindows,
    catalog: &VariableCatalog,
) -> Result<DataFrame, AssembleError> {
    let windows = &entry.windows;
    let n_gates = windows.n_gates();
    let rows = windows.n_windows() * n_gates;

    let mut time_us: Vec<i64> = Vec::with_capacity(rows);
    let mut heights: Vec<f64> = Vec::with_capacity(rows);
    for label in windows.labels() {
        let micros = label.timestamp_micros();
        for &height in windows.axis().values() {
            time_us.push(micros);
            heights.push(height);
        }
    }

    let mut columns: Vec<Column> = Vec::new();
    columns.push(
        Series::new(var::TIME.into(), time_us)
            .cast(&DataType::Datetime(
                TimeUnit::Microseconds,
                Some(polars::prelude::TimeZone::UTC),
            ))?
            .into(),
    );
    columns.push(Series::new(var::HEIGHT.into(), heights).into());
    columns.push(
        Series::new(
            var::STATION_CODE.into(),
            vec![entry.station.station_code.as_str(); rows],
        )
        .into(),
    );
    columns.push(
        Series::new("station_name".into(), vec![entry.station.name.as_str(); rows]).into(),
    );
    columns.push(Series::new("latitude".into(), vec![entry.station.latitude; rows]).into());
    columns.push(Series::new("longitude".into(), vec![entry.station.longitude; rows]).into());

    for def in catalog.output_variables() {
        if def.name == var::SYSTEM_ID {
            columns.push(
                Series::new(var::SYSTEM_ID.into(), vec![entry.system_id.as_str(); rows]).into(),
            );
            continue;
        }
        columns.push(Series::new(def.name.into(), flatten_variable(windows, def.name, rows)).into());
    }

    Ok(DataFrame::new(columns)?)
}

/// Flatten one variable window-major, missing values as nulls. Per-time
/// variables repeat down the height levels; variables the family never
/// produced become a null column.
fn flatten_variable(windows: &AggregatedSet, name: &str, rows: usize) -> Vec<Option<f64>> {
    let n_gates = windows.n_gates();
    if let Some(grid) = windows.gate_var(name) {
        let mut out = Vec::with_capacity(rows);
        for k in 0..windows.n_windows() {
            for g in 0..n_gates {
                let value = grid[[k, g]];
                out.push((!value.is_nan()).then_some(value));
            }
        }
        return out;
    }
    if let Some(values) = windows.scalar_var(name) {
        let mut out = Vec::with_capacity(rows);
        for &value in values {
            for _ in 0..n_gates {
                out.push((!value.is_nan()).then_some(value));
            }
        }
        return out;
    }
    vec![None; rows]
}
