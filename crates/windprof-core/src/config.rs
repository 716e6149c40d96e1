use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::InstrumentModel;

/// Target vertical grid for the harmonised height axis, metres above sea
/// level. The final axis is `min, min + resolution, ..` up to but excluding
/// `max`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub min_height_m: f64,
    pub max_height_m: f64,
    pub resolution_m: f64,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            min_height_m: 0.0,
            max_height_m: 6500.0,
            resolution_m: 25.0,
        }
    }
}

impl GridSpec {
    pub fn n_levels(&self) -> usize {
        ((self.max_height_m - self.min_height_m) / self.resolution_m).ceil() as usize
    }

    /// Gate centers of the target axis, `[min, max)` stepped by the
    /// resolution.
    pub fn levels(&self) -> Vec<f64> {
        (0..self.n_levels())
            .map(|i| self.min_height_m + i as f64 * self.resolution_m)
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution_m <= 0.0 {
            return Err(ConfigError::Invalid {
                message: format!("grid resolution must be positive, got {}", self.resolution_m),
            });
        }
        if self.max_height_m <= self.min_height_m {
            return Err(ConfigError::Invalid {
                message: format!(
                    "grid max {} must exceed min {}",
                    self.max_height_m, self.min_height_m
                ),
            });
        }
        Ok(())
    }
}

/// Thresholds for the pulsed-lidar QC rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PulsedQc {
    /// Gates below this height above the instrument are inside the optical
    /// blind range and unusable.
    pub blind_range_m: f64,
    /// Centered window length, in gates, for the isolated-gate despeckle.
    pub despeckle_window_gates: usize,
    pub rmse_warn: f64,
    pub rmse_removed: f64,
    /// Minimum percentage of rays in a scan that must carry a valid radial
    /// velocity for the retrieval to be trusted.
    pub min_valid_ray_pct: f64,
    pub intensity_warn: f64,
    pub intensity_removed: f64,
}

impl Default for PulsedQc {
    fn default() -> Self {
        Self {
            blind_range_m: 45.0,
            despeckle_window_gates: 3,
            rmse_warn: 2.0,
            rmse_removed: 3.0,
            min_valid_ray_pct: 75.0,
            intensity_warn: 1.007585,
            intensity_removed: 1.0055,
        }
    }
}

/// Thresholds for the continuous-wave lidar QC rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuousQc {
    /// Length of the rolling sub-window for the median speed test, seconds.
    pub median_window_s: i64,
    /// A sub-window is rejected when more than this fraction of gates has a
    /// median speed above the ceiling.
    pub max_ceiling_gate_fraction: f64,
    /// Samples with availability below this percentage are removed.
    pub availability_removed_pct: f64,
    /// Samples with availability between the removed floor and this value
    /// get a warning.
    pub availability_warn_pct: f64,
    pub elevated_w_below: f64,
    pub elevated_u_below: f64,
    pub elevated_height_above_m: f64,
}

impl Default for ContinuousQc {
    fn default() -> Self {
        Self {
            median_window_s: 300,
            max_ceiling_gate_fraction: 0.01,
            availability_removed_pct: 10.0,
            availability_warn_pct: 75.0,
            elevated_w_below: -2.5,
            elevated_u_below: 1.0,
            elevated_height_above_m: 750.0,
        }
    }
}

/// Post-aggregation percentage thresholds for the scanning-Doppler family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningQc {
    /// Windows whose flagged percentage exceeds this (strictly) are warned.
    pub warn_above_pct: f64,
    /// Windows whose flagged percentage reaches this are removed.
    pub removed_at_pct: f64,
}

impl Default for ScanningQc {
    fn default() -> Self {
        Self {
            warn_above_pct: 0.0,
            removed_at_pct: 100.0,
        }
    }
}

/// All QC thresholds, one section per family plus the shared ceiling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QcConfig {
    pub max_wind_speed_m_s: MaxWindSpeed,
    pub pulsed: PulsedQc,
    pub continuous: ContinuousQc,
    pub scanning: ScanningQc,
}

/// Physical wind-speed ceiling shared by every family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaxWindSpeed(pub f64);

impl Default for MaxWindSpeed {
    fn default() -> Self {
        Self(60.0)
    }
}

impl QcConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_wind_speed_m_s.0 <= 0.0 {
            return Err(ConfigError::Invalid {
                message: "wind speed ceiling must be positive".to_string(),
            });
        }
        if self.pulsed.rmse_warn > self.pulsed.rmse_removed {
            return Err(ConfigError::Invalid {
                message: format!(
                    "pulsed RMSE warn threshold {} exceeds removed threshold {}",
                    self.pulsed.rmse_warn, self.pulsed.rmse_removed
                ),
            });
        }
        if self.continuous.availability_removed_pct > self.continuous.availability_warn_pct {
            return Err(ConfigError::Invalid {
                message: format!(
                    "continuous availability removed floor {} exceeds warn ceiling {}",
                    self.continuous.availability_removed_pct, self.continuous.availability_warn_pct
                ),
            });
        }
        if self.scanning.warn_above_pct >= self.scanning.removed_at_pct {
            return Err(ConfigError::Invalid {
                message: format!(
                    "scanning warn threshold {} must be below removed threshold {}",
                    self.scanning.warn_above_pct, self.scanning.removed_at_pct
                ),
            });
        }
        Ok(())
    }
}

/// Full pipeline configuration: grid, QC thresholds, aggregation window and
/// provenance strings. Loaded once from TOML and passed by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarmoniseConfig {
    pub grid: GridSpec,
    pub qc: QcConfig,
    /// Width of the temporal aggregation windows, seconds.
    pub aggregation_window_s: i64,
    /// Length of one processing period, seconds. Must divide evenly by the
    /// aggregation window.
    pub period_s: i64,
    pub processing_name: String,
    pub processing_version: String,
    /// Expected source data version per instrument family. A station whose
    /// input declares a different version is skipped for the period.
    pub expected_source_versions: BTreeMap<InstrumentModel, String>,
}

impl Default for HarmoniseConfig {
    fn default() -> Self {
        let mut expected_source_versions = BTreeMap::new();
        expected_source_versions.insert(InstrumentModel::PulsedLidar, "1.0".to_string());
        expected_source_versions.insert(InstrumentModel::ContinuousWave, "1.0".to_string());
        expected_source_versions.insert(InstrumentModel::ScanningDoppler, "1.0".to_string());
        Self {
            grid: GridSpec::default(),
            qc: QcConfig::default(),
            aggregation_window_s: 600,
            period_s: 86_400,
            processing_name: "windprof".to_string(),
            processing_version: "0.1.0".to_string(),
            expected_source_versions,
        }
    }
}

impl HarmoniseConfig {
    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&raw, &path.display().to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        self.qc.validate()?;
        if self.aggregation_window_s <= 0 {
            return Err(ConfigError::Invalid {
                message: "aggregation window must be positive".to_string(),
            });
        }
        if self.period_s <= 0 || self.period_s % self.aggregation_window_s != 0 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "period of {} s does not divide evenly into {} s windows",
                    self.period_s, self.aggregation_window_s
                ),
            });
        }
        Ok(())
    }

    pub fn expected_version(&self, model: InstrumentModel) -> Option<&str> {
        self.expected_source_versions.get(&model).map(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        HarmoniseConfig::default().validate().unwrap();
    }

    #[test]
    fn default_grid_matches_production_axis() {
        let grid = GridSpec::default();
        let levels = grid.levels();
        assert_eq!(levels.len(), 260);
        assert_eq!(levels[0], 0.0);
        assert_eq!(levels[1], 25.0);
        assert_eq!(*levels.last().unwrap(), 6475.0);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let raw = r#"
            aggregation_window_s = 300
            period_s = 3600

            [grid]
            max_height_m = 3000.0
        "#;
        let config = HarmoniseConfig::from_toml_str(raw, "inline").unwrap();
        assert_eq!(config.aggregation_window_s, 300);
        assert_eq!(config.grid.max_height_m, 3000.0);
        assert_eq!(config.grid.resolution_m, 25.0);
        assert_eq!(config.qc.pulsed.blind_range_m, 45.0);
    }

    #[test]
    fn uneven_window_rejected() {
        let raw = r#"
            aggregation_window_s = 700
            period_s = 86400
        "#;
        let err = HarmoniseConfig::from_toml_str(raw, "inline").unwrap_err();
        assert!(err.to_string().contains("does not divide evenly"));
    }

    #[test]
    fn inverted_warn_band_rejected() {
        let mut config = HarmoniseConfig::default();
        config.qc.continuous.availability_removed_pct = 80.0;
        assert!(config.validate().is_err());
    }
}
