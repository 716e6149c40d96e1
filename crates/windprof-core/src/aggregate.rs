//! Temporal aggregation onto fixed windows. Continuous variables average
//! over their valid samples; flag layers turn into the percentage of the
//! window's raw samples that carried the flag. Wind speed and direction are
//! derived from the aggregated components afterwards, never averaged
//! directly.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use ndarray::Array2;
use tracing::debug;

use crate::error::AggregateError;
use crate::profile::{ProfileSet, VerticalAxis};
use crate::types::{var, TimeWindow};
use crate::vardefs::{AggregationKind, VariableCatalog, OUTPUT_LEVEL};
use crate::wind::derive_ws_wd_grids;

/// Window-aggregated profiles. Rows are aggregation windows labeled by their
/// end; flag variables hold percentages of the window's raw samples.
#[derive(Debug, Clone)]
pub struct AggregatedSet {
    labels: Vec<DateTime<Utc>>,
    n_raw: Vec<usize>,
    axis: VerticalAxis,
    gate_vars: BTreeMap<String, Array2<f64>>,
    scalar_vars: BTreeMap<String, Vec<f64>>,
}

impl AggregatedSet {
    pub fn n_windows(&self) -> usize {
        self.labels.len()
    }

    pub fn n_gates(&self) -> usize {
        self.axis.len()
    }

    /// Window-end labels.
    pub fn labels(&self) -> &[DateTime<Utc>] {
        &self.labels
    }

    /// Raw samples that fell into each window.
    pub fn raw_counts(&self) -> &[usize] {
        &self.n_raw
    }

    pub fn axis(&self) -> &VerticalAxis {
        &self.axis
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

    pub fn gate_vars(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.gate_vars.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn scalar_vars(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.scalar_vars.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn remove_gate_var(&mut self, name: &str) -> Option<Array2<f64>> {
        self.gate_vars.remove(name)
    }

    pub(crate) fn insert_gate_var_unchecked(&mut self, name: String, values: Array2<f64>) {
        self.gate_vars.insert(name, values);
    }

    /// NaN out the aggregated wind components wherever the mask is 1.0.
    pub fn mask_components(&mut self, mask: &Array2<f64>) {
        for component in [var::U, var::V] {
            if let Some(values) = self.gate_vars.get_mut(component) {
                ndarray::Zip::from(values).and(mask).for_each(|v, &m| {
                    if m == 1.0 {
                        *v = f64::NAN;
                    }
                });
            }
        }
    }
}

/// Aggregate a profile set over `period` in windows of `window_s` seconds.
///
/// Every window of the period appears in the output, sample-free windows
/// as all-NaN rows. Variables the catalog does not know are an error;
/// variables the catalog knows but does not aggregate (the derived fields)
/// are dropped here and recomputed downstream.
pub fn aggregate(
    set: &ProfileSet,
    period: &TimeWindow,
    window_s: i64,
    catalog: &VariableCatalog,
) -> Result<AggregatedSet, AggregateError> {
    if period.end <= period.start {
        return Err(AggregateError::EmptySpan { window: *period });
    }
    let period_s = period.duration().num_seconds();
    if window_s <= 0 || period_s % window_s != 0 {
        return Err(AggregateError::WindowMismatch { window_s, period_s });
    }
    let n_windows = (period_s / window_s) as usize;

    let labels: Vec<DateTime<Utc>> = (0..n_windows)
        .map(|k| period.start + Duration::seconds(window_s * (k + 1) as i64))
        .collect();

    // Row ranges per window; times are sorted so each window is contiguous.
    let mut rows: Vec<Vec<usize>> = vec![Vec::new(); n_windows];
    for (i, t) in set.times().iter().enumerate() {
        let offset = (*t - period.start).num_seconds();
        if offset < 0 || offset >= period_s {
            continue;
        }
        rows[(offset / window_s) as usize].push(i);
    }
    let n_raw: Vec<usize> = rows.iter().map(Vec::len).collect();

    let mut gate_vars = BTreeMap::new();
    for (name, values) in set.gate_vars() {
        let Some(kind) = aggregation_kind(catalog, name)? else {
            continue;
        };
        let mut out = Array2::from_elem((n_windows, set.n_gates()), f64::NAN);
        for (k, window_rows) in rows.iter().enumerate() {
            for g in 0..set.n_gates() {
                out[[k, g]] = reduce(
                    window_rows.iter().map(|&t| values[[t, g]]),
                    kind,
                    n_raw[k],
                );
            }
        }
        gate_vars.insert(name.to_string(), out);
    }

    let mut scalar_vars = BTreeMap::new();
    for (name, values) in set.scalar_vars() {
        let Some(kind) = aggregation_kind(catalog, name)? else {
            continue;
        };
        let out: Vec<f64> = rows
            .iter()
            .enumerate()
            .map(|(k, window_rows)| {
                reduce(window_rows.iter().map(|&t| values[t]), kind, n_raw[k])
            })
            .collect();
        scalar_vars.insert(name.to_string(), out);
    }

    debug!(
        windows = n_windows,
        window_s,
        samples = set.n_times(),
        "aggregated profile set"
    );
    Ok(AggregatedSet {
        labels,
        n_raw,
        axis: set.axis().clone(),
        gate_vars,
        scalar_vars,
    })
}

/// Compute ws/wd from the aggregated mean components. Runs after any
/// window-level masking so derived fields never resurrect removed winds.
pub fn derive_wind_fields(aggregated: &mut AggregatedSet) -> Result<(), AggregateError> {
    let u = aggregated
        .gate_var(var::U)
        .ok_or_else(|| AggregateError::MissingComponent {
            variable: var::U.to_string(),
        })?;
    let v = aggregated
        .gate_var(var::V)
        .ok_or_else(|| AggregateError::MissingComponent {
            variable: var::V.to_string(),
        })?;
    let (ws, wd) = derive_ws_wd_grids(u, v);
    aggregated.insert_gate_var_unchecked(var::WS.to_string(), ws);
    aggregated.insert_gate_var_unchecked(var::WD.to_string(), wd);
    Ok(())
}

fn aggregation_kind(
    catalog: &VariableCatalog,
    name: &str,
) -> Result<Option<AggregationKind>, AggregateError> {
    match catalog.aggregation_for(name) {
        Some(kind) => Ok(Some(kind)),
        None if catalog.def(name, OUTPUT_LEVEL).is_some() => Ok(None),
        None => Err(AggregateError::UnknownVariable {
            variable: name.to_string(),
        }),
    }
}

fn reduce(values: impl Iterator<Item = f64>, kind: AggregationKind, n_raw: usize) -> f64 {
    if n_raw == 0 {
        return f64::NAN;
    }
    let mut sum = 0.0;
    let mut valid = 0usize;
    for value in values {
        if !value.is_nan() {
            sum += value;
            valid += 1;
        }
    }
    match kind {
        AggregationKind::Mean => {
            if valid == 0 {
                f64::NAN
            } else {
                sum / valid as f64
            }
        }
        AggregationKind::FlagPercent => 100.0 * sum / n_raw as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vardefs::catalog;
    use chrono::TimeZone;

    fn utc_m(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 6, 1, 0, minute, 0).unwrap()
    }

    fn hour_period() -> TimeWindow {
        TimeWindow::new(
            Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 6, 1, 1, 0, 0).unwrap(),
        )
    }

    /// Four samples in the first 10-minute window, nothing afterwards.
    fn four_sample_set() -> ProfileSet {
        let axis = VerticalAxis::height_asl(vec![50.0, 75.0]).unwrap();
        let times = vec![utc_m(0), utc_m(2), utc_m(4), utc_m(6)];
        let mut set = ProfileSet::new(times, axis).unwrap();
        set.insert_gate_var(
            var::U,
            ndarray::arr2(&[[f64::NAN, 1.0], [8.0, 1.0], [10.0, 1.0], [12.0, 1.0]]),
        )
        .unwrap();
        set.insert_gate_var(
            var::V,
            ndarray::arr2(&[[f64::NAN, 0.0], [0.0, 0.0], [0.0, 0.0], [0.0, 0.0]]),
        )
        .unwrap();
        set.insert_gate_var(
            var::FLAG_SUSPECT_RETRIEVAL_REMOVED,
            ndarray::arr2(&[[1.0, 0.0], [0.0, 0.0], [0.0, 0.0], [0.0, 0.0]]),
        )
        .unwrap();
        set
    }

    #[test]
    fn means_skip_missing_and_flags_use_raw_counts() {
        let agg = aggregate(&four_sample_set(), &hour_period(), 600, catalog()).unwrap();
        let u = agg.gate_var(var::U).unwrap();
        assert!((u[[0, 0]] - 10.0).abs() < 1e-9, "mean of 8, 10, 12");
        // one flagged sample out of four raw samples, missing one included
        let flag = agg.gate_var(var::FLAG_SUSPECT_RETRIEVAL_REMOVED).unwrap();
        assert!((flag[[0, 0]] - 25.0).abs() < 1e-9);
        assert_eq!(agg.raw_counts()[0], 4);
    }

    #[test]
    fn labels_are_window_ends_and_cover_the_period() {
        let agg = aggregate(&four_sample_set(), &hour_period(), 600, catalog()).unwrap();
        assert_eq!(agg.n_windows(), 6);
        assert_eq!(agg.labels()[0], utc_m(10));
        assert_eq!(
            *agg.labels().last().unwrap(),
            Utc.with_ymd_and_hms(2023, 6, 1, 1, 0, 0).unwrap()
        );
    }

    #[test]
    fn empty_windows_are_all_nan() {
        let agg = aggregate(&four_sample_set(), &hour_period(), 600, catalog()).unwrap();
        let u = agg.gate_var(var::U).unwrap();
        let flag = agg.gate_var(var::FLAG_SUSPECT_RETRIEVAL_REMOVED).unwrap();
        for k in 1..6 {
            assert!(u[[k, 0]].is_nan());
            assert!(flag[[k, 0]].is_nan());
            assert_eq!(agg.raw_counts()[k], 0);
        }
    }

    #[test]
    fn fractional_flags_enter_the_numerator() {
        let axis = VerticalAxis::height_asl(vec![50.0]).unwrap();
        let times = vec![utc_m(0), utc_m(2), utc_m(4), utc_m(6)];
        let mut set = ProfileSet::new(times, axis).unwrap();
        set.insert_gate_var(var::U, ndarray::arr2(&[[1.0], [1.0], [1.0], [1.0]]))
            .unwrap();
        set.insert_gate_var(
            var::FLAG_SUSPECT_RETRIEVAL_WARN,
            ndarray::arr2(&[[0.5], [f64::NAN], [1.0], [0.0]]),
        )
        .unwrap();
        let agg = aggregate(&set, &hour_period(), 600, catalog()).unwrap();
        let flag = agg.gate_var(var::FLAG_SUSPECT_RETRIEVAL_WARN).unwrap();
        assert!((flag[[0, 0]] - 37.5).abs() < 1e-9);
    }

    #[test]
    fn uneven_window_and_inverted_period_are_errors() {
        let set = four_sample_set();
        assert!(matches!(
            aggregate(&set, &hour_period(), 700, catalog()),
            Err(AggregateError::WindowMismatch { .. })
        ));
        let inverted = TimeWindow::new(
            Utc.with_ymd_and_hms(2023, 6, 1, 1, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
        );
        assert!(matches!(
            aggregate(&set, &inverted, 600, catalog()),
            Err(AggregateError::EmptySpan { .. })
        ));
    }

    #[test]
    fn unknown_variables_are_loud_and_derived_inputs_are_dropped() {
        let mut set = four_sample_set();
        set.insert_gate_var("mystery_var", Array2::zeros((4, 2)))
            .unwrap();
        assert!(matches!(
            aggregate(&set, &hour_period(), 600, catalog()),
            Err(AggregateError::UnknownVariable { .. })
        ));

        let mut set = four_sample_set();
        // a decoder may ship a native ws; it is catalog-known but derived
        // after aggregation, so the input copy is dropped
        set.insert_gate_var(var::WS, Array2::zeros((4, 2))).unwrap();
        let agg = aggregate(&set, &hour_period(), 600, catalog()).unwrap();
        assert!(agg.gate_var(var::WS).is_none());
    }

    #[test]
    fn scalar_variables_average_per_window() {
        let mut set = four_sample_set();
        set.insert_scalar_var(var::N_RAYS_IN_SCAN, vec![10.0, 20.0, f64::NAN, 30.0])
            .unwrap();
        let agg = aggregate(&set, &hour_period(), 600, catalog()).unwrap();
        let rays = agg.scalar_var(var::N_RAYS_IN_SCAN).unwrap();
        assert!((rays[0] - 20.0).abs() < 1e-9);
        assert!(rays[1].is_nan());
    }

    #[test]
    fn wind_fields_derive_from_aggregated_components() {
        let mut agg = aggregate(&four_sample_set(), &hour_period(), 600, catalog()).unwrap();
        derive_wind_fields(&mut agg).unwrap();
        let ws = agg.gate_var(var::WS).unwrap();
        let wd = agg.gate_var(var::WD).unwrap();
        // mean u = 10, v = 0: westerly 10 m/s
        assert!((ws[[0, 0]] - 10.0).abs() < 1e-9);
        assert!((wd[[0, 0]] - 270.0).abs() < 1e-9);
        // gate 1: mean u = 1, v = 0
        assert!((wd[[0, 1]] - 270.0).abs() < 1e-9);
        assert!(ws[[1, 0]].is_nan());
    }
}
