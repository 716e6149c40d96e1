//! Scanning-Doppler family. The DBS retrieval reports a per-gate status
//! code; samples failing it are masked immediately, but the harmonised
//! warn/removed flags are only decided per aggregation window, from the
//! percentage of status-invalid and over-ceiling samples the window saw.

use ndarray::{Array2, Zip};
use tracing::debug;

use crate::aggregate::AggregatedSet;
use crate::config::QcConfig;
use crate::error::QcError;
use crate::profile::ProfileSet;
use crate::types::{var, InstrumentModel};

use super::{require_gate_var, status_invalid_flag, FlagLayer, InstrumentQc, QcRule, Severity};

pub struct ScanningDopplerQc;

impl InstrumentQc for ScanningDopplerQc {
    fn model(&self) -> InstrumentModel {
        InstrumentModel::ScanningDoppler
    }

    fn sample_rules(&self) -> Vec<Box<dyn QcRule>> {
        vec![Box::new(StatusValidity)]
    }

    /// Turn the aggregated status-invalid and ceiling percentages into the
    /// harmonised warn/removed layers and mask the window means under the
    /// removed cells. Empty windows stay missing throughout.
    fn finalise_window(
        &self,
        aggregated: &mut AggregatedSet,
        config: &QcConfig,
    ) -> Result<(), QcError> {
        let warn_above = config.scanning.warn_above_pct;
        let removed_at = config.scanning.removed_at_pct;

        let (removed, warn, mask) = {
            let status_pc = window_percentages(aggregated, var::FLAG_WIND_STATUS_INVALID)?;
            let ceiling_pc = window_percentages(aggregated, var::FLAG_WS_OUT_OF_RANGE)?;

            let shape = status_pc.dim();
            let mut removed = Array2::from_elem(shape, f64::NAN);
            let mut warn = Array2::from_elem(shape, f64::NAN);
            let mut mask = Array2::zeros(shape);
            Zip::from(&mut removed)
                .and(&mut warn)
                .and(&mut mask)
                .and(status_pc)
                .and(ceiling_pc)
                .for_each(|r, w, m, &s, &c| {
                    let worst = match (s.is_nan(), c.is_nan()) {
                        (true, true) => return,
                        (true, false) => c,
                        (false, true) => s,
                        (false, false) => s.max(c),
                    };
                    if worst >= removed_at {
                        *r = 100.0;
                        *w = 0.0;
                        *m = 1.0;
                    } else if worst > warn_above {
                        *r = 0.0;
                        *w = 100.0;
                    } else {
                        *r = 0.0;
                        *w = 0.0;
                    }
                });
            (removed, warn, mask)
        };

        let masked = mask.iter().filter(|m| **m == 1.0).count();
        debug!(masked, "scanning window decision applied");

        aggregated.mask_components(&mask);
        aggregated
            .insert_gate_var_unchecked(var::FLAG_SUSPECT_RETRIEVAL_REMOVED.to_string(), removed);
        aggregated.insert_gate_var_unchecked(var::FLAG_SUSPECT_RETRIEVAL_WARN.to_string(), warn);
        Ok(())
    }
}

fn window_percentages<'a>(
    aggregated: &'a AggregatedSet,
    name: &str,
) -> Result<&'a Array2<f64>, QcError> {
    aggregated
        .gate_var(name)
        .ok_or_else(|| QcError::MissingVariable {
            rule: "window_status_decision",
            variable: name.to_string(),
        })
}

/// DBS wind status must be exactly 1; anything else, missing included,
/// invalidates the sample. The layer stays internal to this family.
struct StatusValidity;

impl QcRule for StatusValidity {
    fn name(&self) -> &'static str {
        "wind_status_validity"
    }

    fn evaluate(&self, set: &ProfileSet, _config: &QcConfig) -> Result<Vec<FlagLayer>, QcError> {
        let status = require_gate_var(set, self.name(), var::WIND_STATUS)?;
        Ok(vec![FlagLayer::new(
            var::FLAG_WIND_STATUS_INVALID,
            Severity::Removed,
            status_invalid_flag(status),
        )])
    }
}
