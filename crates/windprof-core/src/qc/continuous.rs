//! Continuous-wave lidar rules. The instrument stares vertically and
//! reports a per-gate retrieval status and data availability; beyond the
//! per-sample tests, a tumbling-window median screen rejects whole spans
//! where the retrieved speeds sit above the physical ceiling.

use ndarray::Array2;

use crate::config::QcConfig;
use crate::error::QcError;
use crate::profile::ProfileSet;
use crate::types::{var, InstrumentModel};

use super::{
    nan_median, require_gate_var, status_invalid_flag, FlagLayer, InstrumentQc, QcRule, Severity,
};

pub struct ContinuousWaveQc;

impl InstrumentQc for ContinuousWaveQc {
    fn model(&self) -> InstrumentModel {
        InstrumentModel::ContinuousWave
    }

    fn sample_rules(&self) -> Vec<Box<dyn QcRule>> {
        vec![
            Box::new(StatusValidity),
            Box::new(MedianSpeedWindow),
            Box::new(Availability),
            Box::new(ElevatedRetrieval),
        ]
    }
}

/// Samples whose retrieval status is anything but 1 are invalid.
struct StatusValidity;

impl QcRule for StatusValidity {
    fn name(&self) -> &'static str {
        "status_validity"
    }

    fn evaluate(&self, set: &ProfileSet, _config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let status = require_gate_var(set, self.name(), var::WIND_STATUS)?;
        Ok(vec![FlagLayer::new(
            var::FLAG_SUSPECT_RETRIEVAL_REMOVED,
            Severity::Removed,
            status_invalid_flag(status),
        )])
    }
}

/// Per tumbling sub-window and gate, the median u/v give a median speed; a
/// sub-window where too many gates sit above the ceiling is rejected whole.
struct MedianSpeedWindow;

impl QcRule for MedianSpeedWindow {
    fn name(&self) -> &'static str {
        "median_speed_window"
    }

    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let cfg = &config.continuous;
        let u = require_gate_var(set, self.name(), var::U)?;
        let v = require_gate_var(set, self.name(), var::V)?;
        let ceiling = config.max_wind_speed_m_s.0;

        let mut flag = Array2::zeros((set.n_times(), set.n_gates()));
        let mut column = Vec::with_capacity(set.n_times());
        for rows in wall_clock_windows(set, cfg.median_window_s) {
            let mut exceeding = 0usize;
            let mut populated = 0usize;
            for g in 0..set.n_gates() {
                column.clear();
                column.extend(rows.clone().map(|t| u[[t, g]]));
                let median_u = nan_median(&column);
                column.clear();
                column.extend(rows.clone().map(|t| v[[t, g]]));
                let median_v = nan_median(&column);
                if median_u.is_nan() {
                    continue;
                }
                populated += 1;
                if median_u.hypot(median_v) > ceiling {
                    exceeding += 1;
                }
            }
            if populated == 0 {
                continue;
            }
            if exceeding as f64 / populated as f64 > cfg.max_ceiling_gate_fraction {
                for t in rows {
                    for g in 0..set.n_gates() {
                        flag[[t, g]] = 1.0;
                    }
                }
            }
        }
        Ok(vec![FlagLayer::new(
            var::FLAG_SUSPECT_RETRIEVAL_REMOVED,
            Severity::Removed,
            flag,
        )])
    }
}

/// Low reported data availability: a warning band over a removal floor.
struct Availability;

impl QcRule for Availability {
    fn name(&self) -> &'static str {
        "availability"
    }

    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let cfg = &config.continuous;
        let avail = require_gate_var(set, self.name(), var::DATA_AVAILABILITY)?;
        let removed = avail.mapv(|a| {
            if a < cfg.availability_removed_pct {
                1.0
            } else {
                0.0
            }
        });
        // the warn band is closed on both ends
        let warn = avail.mapv(|a| {
            if a <= cfg.availability_warn_pct && a >= cfg.availability_removed_pct {
                1.0
            } else {
                0.0
            }
        });
        Ok(vec![
            FlagLayer::new(var::FLAG_SUSPECT_RETRIEVAL_REMOVED, Severity::Removed, removed),
            FlagLayer::new(var::FLAG_SUSPECT_RETRIEVAL_WARN, Severity::Warn, warn),
        ])
    }
}

/// Strong descending air with a weak zonal component high up is a known
/// spurious-retrieval signature for these systems. Only runs when the
/// vertical wind was retrieved.
struct ElevatedRetrieval;

impl QcRule for ElevatedRetrieval {
    fn name(&self) -> &'static str {
        "elevated_retrieval"
    }

    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let Some(w) = set.gate_var(var::W) else {
            return Ok(Vec::new());
        };
        let cfg = &config.continuous;
        let u = require_gate_var(set, self.name(), var::U)?;
        let heights = set.axis().values();

        let mut flag = Array2::zeros((set.n_times(), set.n_gates()));
        for ((t, g), cell) in flag.indexed_iter_mut() {
            if w[[t, g]] < cfg.elevated_w_below
                && u[[t, g]] < cfg.elevated_u_below
                && heights[g] > cfg.elevated_height_above_m
            {
                *cell = 1.0;
            }
        }
        Ok(vec![FlagLayer::new(
            var::FLAG_SUSPECT_RETRIEVAL_REMOVED,
            Severity::Removed,
            flag,
        )])
    }
}

/// Contiguous row ranges grouped into wall-clock-aligned sub-windows.
fn wall_clock_windows(set: &ProfileSet, window_s: i64) -> Vec<std::ops::Range<usize>> {
    let mut out = Vec::new();
    let times = set.times();
    let mut start = 0;
    while start < times.len() {
        let bucket = times[start].timestamp().div_euclid(window_s);
        let mut end = start + 1;
        while end < times.len() && times[end].timestamp().div_euclid(window_s) == bucket {
            end += 1;
        }
        out.push(start..end);
        start = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::VerticalAxis;
    use crate::qc::test_support::sample_times;
    use crate::qc::run_sample_qc;

    /// Ten one-minute samples over three gates, everything healthy.
    fn healthy_set() -> ProfileSet {
        let axis = VerticalAxis::height_above_instrument(vec![100.0, 500.0, 900.0]).unwrap();
        let mut set = ProfileSet::new(sample_times(10, 60), axis).unwrap();
        for name in [var::U, var::V] {
            set.insert_gate_var(name, Array2::from_elem((10, 3), 5.0))
                .unwrap();
        }
        set.insert_gate_var(var::WIND_STATUS, Array2::from_elem((10, 3), 1.0))
            .unwrap();
        set.insert_gate_var(var::DATA_AVAILABILITY, Array2::from_elem((10, 3), 100.0))
            .unwrap();
        set
    }

    #[test]
    fn bad_or_missing_status_is_removed() {
        let mut set = healthy_set();
        set.gate_var_mut(var::WIND_STATUS).unwrap()[[2, 1]] = 0.0;
        set.gate_var_mut(var::WIND_STATUS).unwrap()[[3, 1]] = f64::NAN;
        run_sample_qc(&mut set, &ContinuousWaveQc, &QcConfig::default()).unwrap();

        let flag = set.gate_var(var::FLAG_SUSPECT_RETRIEVAL_REMOVED).unwrap();
        assert_eq!(flag[[2, 1]], 1.0);
        assert_eq!(flag[[3, 1]], 1.0);
        assert_eq!(flag[[2, 0]], 0.0);
        assert!(set.gate_var(var::U).unwrap()[[2, 1]].is_nan());
        assert!(set.gate_var(var::U).unwrap()[[3, 1]].is_nan());
        assert_eq!(set.gate_var(var::U).unwrap()[[2, 0]], 5.0);
    }

    #[test]
    fn runaway_median_window_is_rejected_whole() {
        let mut set = healthy_set();
        {
            // first 300 s sub-window (rows 0..5): speeds far above the
            // ceiling at every gate
            let u = set.gate_var_mut(var::U).unwrap();
            for t in 0..5 {
                for g in 0..3 {
                    u[[t, g]] = 50.0;
                }
            }
        }
        {
            let v = set.gate_var_mut(var::V).unwrap();
            for t in 0..5 {
                for g in 0..3 {
                    v[[t, g]] = 50.0;
                }
            }
        }
        run_sample_qc(&mut set, &ContinuousWaveQc, &QcConfig::default()).unwrap();

        let flag = set.gate_var(var::FLAG_SUSPECT_RETRIEVAL_REMOVED).unwrap();
        for t in 0..5 {
            for g in 0..3 {
                assert_eq!(flag[[t, g]], 1.0, "row {t} gate {g}");
                assert!(set.gate_var(var::U).unwrap()[[t, g]].is_nan());
            }
        }
        // the second sub-window is healthy and untouched
        assert_eq!(flag[[7, 0]], 0.0);
        assert_eq!(set.gate_var(var::U).unwrap()[[7, 0]], 5.0);
        // the ceiling rule ran after masking, so those cells were untestable
        assert!(set.gate_var(var::FLAG_WS_OUT_OF_RANGE).unwrap()[[0, 0]].is_nan());
        assert_eq!(set.gate_var(var::FLAG_WS_OUT_OF_RANGE).unwrap()[[7, 0]], 0.0);
    }

    #[test]
    fn availability_bands_are_inclusive() {
        let mut set = healthy_set();
        {
            let avail = set.gate_var_mut(var::DATA_AVAILABILITY).unwrap();
            avail[[0, 0]] = 5.0; // under the floor
            avail[[1, 0]] = 10.0; // exactly the floor: warn, not removed
            avail[[2, 0]] = 50.0; // inside the warn band
            avail[[3, 0]] = 75.0; // exactly the warn ceiling: still warned
            avail[[4, 0]] = 80.0; // healthy
        }
        run_sample_qc(&mut set, &ContinuousWaveQc, &QcConfig::default()).unwrap();

        let removed = set.gate_var(var::FLAG_SUSPECT_RETRIEVAL_REMOVED).unwrap();
        let warn = set.gate_var(var::FLAG_SUSPECT_RETRIEVAL_WARN).unwrap();
        assert_eq!(removed[[0, 0]], 1.0);
        assert_eq!(warn[[0, 0]], 0.0);
        assert_eq!(removed[[1, 0]], 0.0);
        assert_eq!(warn[[1, 0]], 1.0);
        assert_eq!(warn[[2, 0]], 1.0);
        assert_eq!(warn[[3, 0]], 1.0);
        assert_eq!(removed[[4, 0]], 0.0);
        assert_eq!(warn[[4, 0]], 0.0);
        assert!(set.gate_var(var::U).unwrap()[[0, 0]].is_nan());
        assert_eq!(set.gate_var(var::U).unwrap()[[1, 0]], 5.0);
    }

    #[test]
    fn elevated_retrieval_needs_all_three_conditions() {
        let mut set = healthy_set();
        let w = Array2::from_elem((10, 3), 0.0);
        set.insert_gate_var(var::W, w).unwrap();
        {
            let w = set.gate_var_mut(var::W).unwrap();
            w[[0, 2]] = -3.0; // 900 m, strong descent
            w[[1, 1]] = -3.0; // 500 m, too low for the test
        }
        set.gate_var_mut(var::U).unwrap()[[0, 2]] = 0.5;
        set.gate_var_mut(var::U).unwrap()[[1, 1]] = 0.5;
        // descent alone is not enough when u is strong
        {
            let w = set.gate_var_mut(var::W).unwrap();
            w[[2, 2]] = -3.0;
        }
        run_sample_qc(&mut set, &ContinuousWaveQc, &QcConfig::default()).unwrap();

        let flag = set.gate_var(var::FLAG_SUSPECT_RETRIEVAL_REMOVED).unwrap();
        assert_eq!(flag[[0, 2]], 1.0);
        assert_eq!(flag[[1, 1]], 0.0);
        assert_eq!(flag[[2, 2]], 0.0);
        assert!(set.gate_var(var::U).unwrap()[[0, 2]].is_nan());
    }

    #[test]
    fn no_vertical_wind_skips_the_elevated_test() {
        let mut set = healthy_set();
        run_sample_qc(&mut set, &ContinuousWaveQc, &QcConfig::default()).unwrap();
        // all clean: the removed flag exists (status rule) and is all zero
        let flag = set.gate_var(var::FLAG_SUSPECT_RETRIEVAL_REMOVED).unwrap();
        assert!(flag.iter().all(|&v| v == 0.0));
    }
}
