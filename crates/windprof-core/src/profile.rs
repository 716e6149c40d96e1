use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ndarray::{s, Array2};

use crate::error::AxisError;
use crate::types::TimeWindow;

/// Unit/datum state of a vertical axis. The harmonizer only accepts the
/// state it expects, so slant ranges can never silently masquerade as
/// heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    /// Distance along the beam from the instrument.
    SlantRange,
    /// Vertical distance above the instrument.
    HeightAboveInstrument,
    /// Vertical distance above mean sea level.
    HeightAsl,
}

impl AxisKind {
    pub fn name(&self) -> &'static str {
        match self {
            AxisKind::SlantRange => "slant-range",
            AxisKind::HeightAboveInstrument => "height-above-instrument",
            AxisKind::HeightAsl => "height-ASL",
        }
    }
}

/// Gate centers in metres, strictly increasing, tagged with their unit
/// state.
#[derive(Debug, Clone, PartialEq)]
pub struct VerticalAxis {
    kind: AxisKind,
    values: Vec<f64>,
}

impl VerticalAxis {
    pub fn new(kind: AxisKind, values: Vec<f64>) -> Result<Self, AxisError> {
        for (i, pair) in values.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(AxisError::NotIncreasing {
                    axis: "vertical",
                    index: i + 1,
                });
            }
        }
        Ok(Self { kind, values })
    }

    pub fn slant_range(values: Vec<f64>) -> Result<Self, AxisError> {
        Self::new(AxisKind::SlantRange, values)
    }

    pub fn height_above_instrument(values: Vec<f64>) -> Result<Self, AxisError> {
        Self::new(AxisKind::HeightAboveInstrument, values)
    }

    pub fn height_asl(values: Vec<f64>) -> Result<Self, AxisError> {
        Self::new(AxisKind::HeightAsl, values)
    }

    pub fn kind(&self) -> AxisKind {
        self.kind
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn expect_kind(&self, expected: AxisKind) -> Result<(), AxisError> {
        if self.kind != expected {
            return Err(AxisError::WrongKind {
                expected: expected.name(),
                actual: self.kind.name(),
            });
        }
        Ok(())
    }
}

/// One instrument's profiles over a period: a shared time axis, one vertical
/// axis, (time x gate) variables and per-time variables. Missing values are
/// NaN throughout; QC flag layers are 0.0/1.0 gate variables so they move
/// through regridding and aggregation like any other field.
#[derive(Debug, Clone)]
pub struct ProfileSet {
    times: Vec<DateTime<Utc>>,
    axis: VerticalAxis,
    gate_vars: BTreeMap<String, Array2<f64>>,
    scalar_vars: BTreeMap<String, Vec<f64>>,
}

impl ProfileSet {
    pub fn new(times: Vec<DateTime<Utc>>, axis: VerticalAxis) -> Result<Self, AxisError> {
        for (i, pair) in times.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                return Err(AxisError::NotIncreasing {
                    axis: "time",
                    index: i + 1,
                });
            }
        }
        Ok(Self {
            times,
            axis,
            gate_vars: BTreeMap::new(),
            scalar_vars: BTreeMap::new(),
        })
    }

    pub fn n_times(&self) -> usize {
        self.times.len()
    }

    pub fn n_gates(&self) -> usize {
        self.axis.len()
    }

    pub fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    pub fn axis(&self) -> &VerticalAxis {
        &self.axis
    }

    pub fn insert_gate_var(
        &mut self,
        name: impl Into<String>,
        values: Array2<f64>,
    ) -> Result<(), AxisError> {
        let name = name.into();
        let expected = (self.n_times(), self.n_gates());
        if values.dim() != expected {
            return Err(AxisError::ShapeMismatch {
                variable: name,
                expected,
                actual: values.dim(),
            });
        }
        self.gate_vars.insert(name, values);
        Ok(())
    }

    pub fn insert_scalar_var(
        &mut self,
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Result<(), AxisError> {
        let name = name.into();
        if values.len() != self.n_times() {
            return Err(AxisError::LengthMismatch {
                variable: name,
                expected: self.n_times(),
                actual: values.len(),
            });
        }
        self.scalar_vars.insert(name, values);
        Ok(())
    }

    /// Insert without the shape check, for callers that validated the grid
    /// themselves.
    pub(crate) fn insert_gate_var_unchecked(&mut self, name: String, values: Array2<f64>) {
        self.gate_vars.insert(name, values);
    }

    pub fn gate_var(&self, name: &str) -> Option<&Array2<f64>> {
        self.gate_vars.get(name)
    }

    pub fn gate_var_mut(&mut self, name: &str) -> Option<&mut Array2<f64>> {
        self.gate_vars.get_mut(name)
    }

    pub fn scalar_var(&self, name: &str) -> Option<&[f64]> {
        self.scalar_vars.get(name).map(|v| v.as_slice())
    }

    pub fn gate_var_names(&self) -> impl Iterator<Item = &str> {
        self.gate_vars.keys().map(|k| k.as_str())
    }

    pub fn scalar_var_names(&self) -> impl Iterator<Item = &str> {
        self.scalar_vars.keys().map(|k| k.as_str())
    }

    pub fn gate_vars(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.gate_vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn scalar_vars(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.scalar_vars.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn remove_gate_var(&mut self, name: &str) -> Option<Array2<f64>> {
        self.gate_vars.remove(name)
    }

    pub fn remove_scalar_var(&mut self, name: &str) -> Option<Vec<f64>> {
        self.scalar_vars.remove(name)
    }

    /// Swap in a new vertical axis of the same length, after a unit or datum
    /// change that did not move any gates.
    pub fn replace_axis(&mut self, axis: VerticalAxis) -> Result<(), AxisError> {
        if axis.len() != self.axis.len() {
            return Err(AxisError::LengthMismatch {
                variable: "vertical axis".to_string(),
                expected: self.axis.len(),
                actual: axis.len(),
            });
        }
        self.axis = axis;
        Ok(())
    }

    /// Rebuild the set on a new vertical axis with regridded gate variables.
    /// Scalar variables carry over untouched.
    pub(crate) fn with_regridded(
        &self,
        axis: VerticalAxis,
        gate_vars: BTreeMap<String, Array2<f64>>,
    ) -> Self {
        Self {
            times: self.times.clone(),
            axis,
            gate_vars,
            scalar_vars: self.scalar_vars.clone(),
        }
    }

    /// Rows whose timestamps fall inside `window`. `None` when the
    /// intersection is empty.
    pub fn slice_window(&self, window: &TimeWindow) -> Option<ProfileSet> {
        let lo = self.times.partition_point(|t| *t < window.start);
        let hi = self.times.partition_point(|t| *t < window.end);
        if lo >= hi {
            return None;
        }
        let gate_vars = self
            .gate_vars
            .iter()
            .map(|(k, v)| (k.clone(), v.slice(s![lo..hi, ..]).to_owned()))
            .collect();
        let scalar_vars = self
            .scalar_vars
            .iter()
            .map(|(k, v)| (k.clone(), v[lo..hi].to_vec()))
            .collect();
        Some(ProfileSet {
            times: self.times[lo..hi].to_vec(),
            axis: self.axis.clone(),
            gate_vars,
            scalar_vars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn times(n: usize) -> Vec<DateTime<Utc>> {
        (0..n)
            .map(|i| {
                Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::seconds(60 * i as i64)
            })
            .collect()
    }

    #[test]
    fn axis_rejects_non_increasing_values() {
        let err = VerticalAxis::slant_range(vec![50.0, 75.0, 75.0]).unwrap_err();
        assert!(matches!(err, AxisError::NotIncreasing { index: 2, .. }));
    }

    #[test]
    fn insert_rejects_wrong_shape() {
        let axis = VerticalAxis::height_asl(vec![0.0, 25.0, 50.0]).unwrap();
        let mut set = ProfileSet::new(times(4), axis).unwrap();
        let err = set
            .insert_gate_var("u", Array2::zeros((4, 2)))
            .unwrap_err();
        assert!(matches!(err, AxisError::ShapeMismatch { .. }));
        set.insert_gate_var("u", Array2::zeros((4, 3))).unwrap();
    }

    #[test]
    fn slice_window_is_half_open() {
        let axis = VerticalAxis::height_asl(vec![0.0, 25.0]).unwrap();
        let all = times(10);
        let mut set = ProfileSet::new(all.clone(), axis).unwrap();
        set.insert_gate_var("u", Array2::from_elem((10, 2), 1.0))
            .unwrap();
        let window = TimeWindow::new(all[2], all[5]);
        let sliced = set.slice_window(&window).unwrap();
        assert_eq!(sliced.n_times(), 3);
        assert_eq!(sliced.times()[0], all[2]);
        assert_eq!(sliced.gate_var("u").unwrap().dim(), (3, 2));

        let empty = TimeWindow::new(
            all[9] + chrono::Duration::hours(1),
            all[9] + chrono::Duration::hours(2),
        );
        assert!(set.slice_window(&empty).is_none());
    }

    #[test]
    fn expect_kind_names_both_sides() {
        let axis = VerticalAxis::slant_range(vec![50.0, 75.0]).unwrap();
        let err = axis.expect_kind(AxisKind::HeightAsl).unwrap_err();
        assert_eq!(
            err.to_string(),
            "expected a height-ASL axis, got slant-range"
        );
    }
}
