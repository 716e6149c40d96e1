//! Pulsed scanning lidar rules. Retrievals come from VAD fits, so the tests
//! lean on the fit diagnostics: ray counts, fit RMSE and mean backscatter
//! intensity. Gates inside the optical blind range are unconditionally
//! rejected.

use ndarray::Array2;

use crate::config::QcConfig;
use crate::error::QcError;
use crate::profile::ProfileSet;
use crate::types::{var, InstrumentModel};

use super::{
    nan_median, require_gate_var, require_scalar_var, FlagLayer, InstrumentQc, QcRule, Severity,
};

pub struct PulsedLidarQc;

impl InstrumentQc for PulsedLidarQc {
    fn model(&self) -> InstrumentModel {
        InstrumentModel::PulsedLidar
    }

    fn sample_rules(&self) -> Vec<Box<dyn QcRule>> {
        vec![
            Box::new(SuspectRetrievalRemoved),
            Box::new(LowSignalRemoved),
            Box::new(LowSignalWarn),
            Box::new(SuspectRetrievalWarn),
        ]
    }
}

/// Blind-range gates, starved ray counts and bad fits are all unusable.
struct SuspectRetrievalRemoved;

impl QcRule for SuspectRetrievalRemoved {
    fn name(&self) -> &'static str {
        "suspect_retrieval_removed"
    }

    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let cfg = &config.pulsed;
        let rmse = require_gate_var(set, self.name(), var::WIND_RMSE)?;
        let nrays_valid = require_gate_var(set, self.name(), var::N_RAYS_VALID)?;
        let nrays_in_scan = require_scalar_var(set, self.name(), var::N_RAYS_IN_SCAN)?;
        let median_rays = nan_median(nrays_in_scan);
        let gates = set.axis().values();

        let mut flag = Array2::zeros((set.n_times(), set.n_gates()));
        for ((t, g), cell) in flag.indexed_iter_mut() {
            let ray_pct = nrays_valid[[t, g]] / median_rays * 100.0;
            // NaN diagnostics fail no test; the blind range needs no data
            if gates[g] < cfg.blind_range_m
                || ray_pct < cfg.min_valid_ray_pct
                || rmse[[t, g]] > cfg.rmse_removed
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

struct LowSignalRemoved;

impl QcRule for LowSignalRemoved {
    fn name(&self) -> &'static str {
        "low_signal_removed"
    }

    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let intensity = require_gate_var(set, self.name(), var::WIND_MEAN_INTENSITY)?;
        let flag = intensity.mapv(|i| {
            if i < config.pulsed.intensity_removed {
                1.0
            } else {
                0.0
            }
        });
        Ok(vec![FlagLayer::new(
            var::FLAG_LOW_SIGNAL_REMOVED,
            Severity::Removed,
            flag,
        )])
    }
}

struct LowSignalWarn;

impl QcRule for LowSignalWarn {
    fn name(&self) -> &'static str {
        "low_signal_warn"
    }

    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let cfg = &config.pulsed;
        let intensity = require_gate_var(set, self.name(), var::WIND_MEAN_INTENSITY)?;
        let flag = intensity.mapv(|i| {
            if i < cfg.intensity_warn && i > cfg.intensity_removed {
                1.0
            } else {
                0.0
            }
        });
        Ok(vec![FlagLayer::new(
            var::FLAG_LOW_SIGNAL_WARN,
            Severity::Warn,
            flag,
        )])
    }
}

/// Despeckle plus the advisory RMSE band. The despeckle runs on u validity
/// after the removal rules have masked, so it sees the surviving data.
struct SuspectRetrievalWarn;

impl QcRule for SuspectRetrievalWarn {
    fn name(&self) -> &'static str {
        "suspect_retrieval_warn"
    }

    fn evaluate(&self, set: &ProfileSet, config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let cfg = &config.pulsed;
        let u = require_gate_var(set, self.name(), var::U)?;
        let rmse = require_gate_var(set, self.name(), var::WIND_RMSE)?;
        let gates = set.axis().values();
        let window = cfg.despeckle_window_gates;
        let half = window / 2;
        let n_gates = set.n_gates();
        let spacing = if n_gates > 1 { gates[1] - gates[0] } else { 0.0 };
        // the low gates have their own removal rule; keep the despeckle away
        // from them
        let guard_height = cfg.blind_range_m + spacing * (window as f64 / 2.0);

        let mut flag = Array2::zeros((set.n_times(), n_gates));
        for ((t, g), cell) in flag.indexed_iter_mut() {
            let mut speckle = false;
            if g >= half && g + window - half <= n_gates && g >= window && gates[g] >= guard_height
            {
                let start = g - half;
                let valid = (start..start + window)
                    .filter(|&k| !u[[t, k]].is_nan())
                    .count();
                speckle = valid > 0 && valid < window;
            }
            if speckle || rmse[[t, g]] > cfg.rmse_warn {
                *cell = 1.0;
            }
        }
        Ok(vec![FlagLayer::new(
            var::FLAG_SUSPECT_RETRIEVAL_WARN,
            Severity::Warn,
            flag,
        )])
    }
}
