//! Quality control. Each instrument family contributes an ordered list of
//! sample-level rules producing flag layers; the engine merges the layers
//! into the profile set, masks the wind components under removed-severity
//! flags, and always finishes with the shared wind-speed ceiling. Families
//! that decide on aggregated windows implement `finalise_window`.

mod continuous;
mod pulsed;
mod scanning;

pub use continuous::ContinuousWaveQc;
pub use pulsed::PulsedLidarQc;
pub use scanning::ScanningDopplerQc;

use ndarray::{Array2, Zip};
use tracing::debug;

use crate::aggregate::AggregatedSet;
use crate::config::QcConfig;
use crate::error::QcError;
use crate::profile::ProfileSet;
use crate::types::{var, InstrumentModel};

/// How a raised flag affects the data it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Advisory only; the flagged values stay in the dataset.
    Warn,
    /// The flagged wind components are masked out.
    Removed,
}

/// One named flag grid produced by a rule: 1.0 where the test fired, 0.0
/// where it passed, NaN where it could not run.
#[derive(Debug, Clone)]
pub struct FlagLayer {
    pub name: &'static str,
    pub severity: Severity,
    pub values: Array2<f64>,
}

impl FlagLayer {
    pub fn new(name: &'static str, severity: Severity, values: Array2<f64>) -> Self {
        Self {
            name,
            severity,
            values,
        }
    }
}

/// A single sample-level quality test.
pub trait QcRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluate against the current state of the set. Rules run in declared
    /// order, so later rules see the masking applied by earlier ones.
    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError>;
}

/// The full QC behavior of one instrument family.
pub trait InstrumentQc: Send + Sync {
    fn model(&self) -> InstrumentModel;

    /// Sample-level rules in the order they must run.
    fn sample_rules(&self) -> Vec<Box<dyn QcRule>>;

    /// Window-level decision after aggregation. Most families have none.
    fn finalise_window(
        &self,
        _aggregated: &mut AggregatedSet,
        _config: &QcConfig,
    ) -> Result<(), QcError> {
        Ok(())
    }
}

/// The QC implementation for a family.
pub fn qc_for(model: InstrumentModel) -> Box<dyn InstrumentQc> {
    match model {
        InstrumentModel::PulsedLidar => Box::new(PulsedLidarQc),
        InstrumentModel::ContinuousWave => Box::new(ContinuousWaveQc),
        InstrumentModel::ScanningDoppler => Box::new(ScanningDopplerQc),
    }
}

/// Run a family's sample rules and then the shared wind-speed ceiling,
/// merging every layer into the set and masking u/v under removed flags.
pub fn run_sample_qc(
    set: &mut ProfileSet,
    family: &dyn InstrumentQc,
    config: &QcConfig,
) -> Result<(), QcError> {
    for rule in family.sample_rules() {
        apply_rule(set, rule.as_ref(), config)?;
    }
    // The ceiling runs last for every family so no rule ever re-admits an
    // unphysical speed.
    apply_rule(set, &WindSpeedCeiling, config)?;
    Ok(())
}

fn apply_rule(set: &mut ProfileSet, rule: &dyn QcRule, config: &QcConfig) -> Result<(), QcError> {
    let layers = rule.evaluate(set, config)?;
    for layer in layers {
        let expected = (set.n_times(), set.n_gates());
        if layer.values.dim() != expected {
            return Err(QcError::ShapeMismatch {
                rule: rule.name(),
                expected,
                actual: layer.values.dim(),
            });
        }
        let fired = layer.values.iter().filter(|v| **v == 1.0).count();
        debug!(rule = rule.name(), flag = layer.name, fired, "qc rule evaluated");
        if layer.severity == Severity::Removed {
            mask_components(set, &layer.values);
        }
        merge_flag(set, layer);
    }
    Ok(())
}

/// OR a layer into any flag of the same name already on the set. Missing
/// (NaN) cells never override a 0/1 result from the other side. The caller
/// has already checked the layer shape.
fn merge_flag(set: &mut ProfileSet, layer: FlagLayer) {
    match set.gate_var_mut(layer.name) {
        Some(existing) => {
            Zip::from(existing).and(&layer.values).for_each(|a, &b| {
                *a = match (a.is_nan(), b.is_nan()) {
                    (true, true) => f64::NAN,
                    (true, false) => b,
                    (false, true) => *a,
                    (false, false) => a.max(b),
                };
            });
        }
        None => set.insert_gate_var_unchecked(layer.name.to_string(), layer.values),
    }
}

/// NaN out u and v wherever the mask is 1.0.
fn mask_components(set: &mut ProfileSet, mask: &Array2<f64>) {
    for component in [var::U, var::V] {
        if let Some(values) = set.gate_var_mut(component) {
            Zip::from(values).and(mask).for_each(|v, &m| {
                if m == 1.0 {
                    *v = f64::NAN;
                }
            });
        }
    }
}

/// Fetch a gate variable a rule depends on, or fail with the rule's name.
pub(crate) fn require_gate_var<'a>(
    set: &'a ProfileSet,
    rule: &'static str,
    name: &str,
) -> Result<&'a Array2<f64>, QcError> {
    set.gate_var(name).ok_or_else(|| QcError::MissingVariable {
        rule,
        variable: name.to_string(),
    })
}

/// Fetch a per-time variable a rule depends on, or fail with the rule's name.
pub(crate) fn require_scalar_var<'a>(
    set: &'a ProfileSet,
    rule: &'static str,
    name: &str,
) -> Result<&'a [f64], QcError> {
    set.scalar_var(name).ok_or_else(|| QcError::MissingVariable {
        rule,
        variable: name.to_string(),
    })
}

/// Status-code validity shared by the status-reporting families: anything
/// but an exact 1 is invalid, missing status included.
pub(crate) fn status_invalid_flag(status: &Array2<f64>) -> Array2<f64> {
    status.mapv(|s| if s == 1.0 { 0.0 } else { 1.0 })
}

/// Median ignoring NaN; NaN when nothing is left.
pub(crate) fn nan_median(values: &[f64]) -> f64 {
    let mut kept: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = kept.len() / 2;
    if kept.len() % 2 == 1 {
        kept[mid]
    } else {
        (kept[mid - 1] + kept[mid]) / 2.0
    }
}

/// Shared physical ceiling: wind speeds above the configured maximum are
/// unphysical for every system and are removed.
struct WindSpeedCeiling;

impl QcRule for WindSpeedCeiling {
    fn name(&self) -> &'static str {
        "wind_speed_ceiling"
    }

    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let u = require_gate_var(set, self.name(), var::U)?;
        let v = require_gate_var(set, self.name(), var::V)?;
        let ceiling = config.max_wind_speed_m_s.0;
        let mut flag = Array2::from_elem(u.dim(), f64::NAN);
        Zip::from(&mut flag).and(u).and(v).for_each(|f, &u, &v| {
            let speed = u.hypot(v);
            if !speed.is_nan() {
                *f = if speed > ceiling { 1.0 } else { 0.0 };
            }
        });
        Ok(vec![FlagLayer::new(
            var::FLAG_WS_OUT_OF_RANGE,
            Severity::Removed,
            flag,
        )])
    }
}
