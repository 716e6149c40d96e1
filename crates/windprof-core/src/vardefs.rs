//! The canonical variable catalog: every variable and dimension the merged
//! dataset may carry, with its aggregation behavior and output attributes.
//! The aggregator consults the catalog to pick mean vs flag-percentage, and
//! the assembler resolves output attributes through it.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::error::AssembleError;
use crate::types::var;

pub const OUTPUT_LEVEL: u8 = 3;

const WS_UNITS: &str = "m.s^-1";
const UNITLESS: &str = "unitless";

/// How the temporal aggregator reduces a variable over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationKind {
    /// Arithmetic mean of the non-missing samples.
    Mean,
    /// Percentage of the window's raw samples carrying the flag.
    FlagPercent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Dimension,
    Variable,
}

#[derive(Debug, Clone)]
pub struct VariableDef {
    pub name: &'static str,
    pub level: u8,
    pub def_kind: DefKind,
    /// `None` for dimensions and for variables derived after aggregation.
    pub aggregation: Option<AggregationKind>,
    pub standard_name: Option<&'static str>,
    pub long_name: Option<&'static str>,
    pub units: Option<&'static str>,
    pub comment: &'static str,
}

/// Output attributes of one variable, rendered from its definition.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VariableAttrs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub standard_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    pub comment: String,
}

impl VariableDef {
    pub fn attrs(&self) -> VariableAttrs {
        VariableAttrs {
            standard_name: self.standard_name.map(str::to_string),
            long_name: self.long_name.map(str::to_string),
            units: self.units.map(str::to_string),
            comment: self.comment.to_string(),
        }
    }
}

static VARIABLE_DEFINITIONS: Lazy<Vec<VariableDef>> = Lazy::new(|| {
    vec![
        VariableDef {
            name: var::U,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::Mean),
            standard_name: Some("eastward_wind"),
            long_name: None,
            units: Some(WS_UNITS),
            comment: "Averaged eastward wind component. Averaged over all valid samples \
                      within the time aggregation interval.",
        },
        VariableDef {
            name: var::V,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::Mean),
            standard_name: Some("northward_wind"),
            long_name: None,
            units: Some(WS_UNITS),
            comment: "Averaged northward wind component. Averaged over all valid samples \
                      within the time aggregation interval.",
        },
        VariableDef {
            name: var::FLAG_LOW_SIGNAL_WARN,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::FlagPercent),
            standard_name: None,
            long_name: Some("flag_low_signal_warn"),
            units: Some("%"),
            comment: "The scan has a signal intensity below a threshold required for a \
                      non-suspect retrieval. Use retrieval with caution.",
        },
        VariableDef {
            name: var::FLAG_LOW_SIGNAL_REMOVED,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::FlagPercent),
            standard_name: None,
            long_name: Some("flag_low_signal_removed"),
            units: Some("%"),
            comment: "The scan has a signal intensity below a threshold required for a \
                      valid retrieval. Retrieval rejected.",
        },
        VariableDef {
            name: var::FLAG_SUSPECT_RETRIEVAL_WARN,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::FlagPercent),
            standard_name: None,
            long_name: Some("flag_suspect_retrieval_warn"),
            units: Some("%"),
            comment: "The scan is suspect based on tests unique to each system model. \
                      Use retrieval with caution. Missing values indicate no test.",
        },
        VariableDef {
            name: var::FLAG_SUSPECT_RETRIEVAL_REMOVED,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::FlagPercent),
            standard_name: None,
            long_name: Some("flag_suspect_retrieval_removed"),
            units: Some("%"),
            comment: "The scan is suspect based on system model specific tests. \
                      Retrieval rejected.",
        },
        VariableDef {
            name: var::FLAG_WS_OUT_OF_RANGE,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::FlagPercent),
            standard_name: None,
            long_name: Some("flag_ws_out_of_range"),
            units: Some("%"),
            comment: "The retrieval exceeds the horizontal wind speed ceiling. \
                      Retrieval rejected.",
        },
        VariableDef {
            name: var::N_RAYS_IN_SCAN,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::Mean),
            standard_name: None,
            long_name: Some("number_of_rays_in_scan"),
            units: Some(UNITLESS),
            comment: "The number of rays in a given 'scan_type' scan.",
        },
        VariableDef {
            name: var::RAW_GATE_LENGTH,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::Mean),
            standard_name: None,
            long_name: Some("raw_gate_length"),
            units: Some("m"),
            comment: "The gate length of the raw data prior to aggregation.",
        },
        VariableDef {
            name: var::N_PULSES,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: Some(AggregationKind::Mean),
            standard_name: None,
            long_name: Some("number_of_pulses_in_ray"),
            units: Some(UNITLESS),
            comment: "The number of pulses in a given ray. The more pulses the higher \
                      the integration time. Available for pulsed scanning models.",
        },
        VariableDef {
            name: var::WS,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: None,
            standard_name: Some("wind_speed"),
            long_name: None,
            units: Some(WS_UNITS),
            comment: "Calculated from the aggregated u and v wind components.",
        },
        VariableDef {
            name: var::WD,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: None,
            standard_name: Some("wind_from_direction"),
            long_name: None,
            units: Some("degree"),
            comment: "Calculated from the aggregated u and v wind components.",
        },
        VariableDef {
            name: var::SYSTEM_ID,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Variable,
            aggregation: None,
            standard_name: None,
            long_name: Some("system_unique_id"),
            units: Some(UNITLESS),
            comment: "The specific system (instrument) deployed at the station.",
        },
        VariableDef {
            name: var::TIME,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Dimension,
            aggregation: None,
            standard_name: Some("time"),
            long_name: None,
            units: None,
            comment: "Label represents end of {time_window_s} s interval.",
        },
        VariableDef {
            name: var::HEIGHT,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Dimension,
            aggregation: None,
            standard_name: None,
            long_name: Some("height"),
            units: Some("m"),
            comment: "Distance from sea level to center of range gate.",
        },
        VariableDef {
            name: var::STATION_CODE,
            level: OUTPUT_LEVEL,
            def_kind: DefKind::Dimension,
            aggregation: None,
            standard_name: None,
            long_name: Some("station_code"),
            units: Some(UNITLESS),
            comment: "Unique identifier for the measurement station.",
        },
    ]
});

pub fn canonical_variable_definitions() -> &'static [VariableDef] {
    VARIABLE_DEFINITIONS.as_slice()
}

static CATALOG: Lazy<VariableCatalog> =
    Lazy::new(|| VariableCatalog::from_defs(canonical_variable_definitions().to_vec()));

/// The canonical catalog. A unit test guards its (name, level) uniqueness.
pub fn catalog() -> &'static VariableCatalog {
    &CATALOG
}

#[derive(Debug, Clone)]
pub struct VariableCatalog {
    by_key: BTreeMap<(String, u8), VariableDef>,
}

impl VariableCatalog {
    /// Build a catalog, rejecting duplicate (name, level) definitions.
    pub fn new(defs: Vec<VariableDef>) -> Result<Self, AssembleError> {
        let mut by_key = BTreeMap::new();
        for def in defs {
            let key = (def.name.to_string(), def.level);
            if by_key.insert(key, def.clone()).is_some() {
                return Err(AssembleError::DuplicateAttribute {
                    variable: def.name.to_string(),
                    level: def.level.to_string(),
                });
            }
        }
        Ok(Self { by_key })
    }

    fn from_defs(defs: Vec<VariableDef>) -> Self {
        let by_key = defs
            .into_iter()
            .map(|def| ((def.name.to_string(), def.level), def))
            .collect();
        Self { by_key }
    }

    pub fn def(&self, name: &str, level: u8) -> Option<&VariableDef> {
        self.by_key.get(&(name.to_string(), level))
    }

    /// Resolve output attributes; absence is loud because it means the
    /// output contract and the data disagree.
    pub fn lookup(&self, name: &str, level: u8) -> Result<&VariableDef, AssembleError> {
        self.def(name, level).ok_or_else(|| AssembleError::AttributeLookup {
            variable: name.to_string(),
            level: level.to_string(),
        })
    }

    /// Aggregation for a variable at the output level. Flag layers always
    /// aggregate to percentages, catalog entry or not, so family-internal
    /// flags survive until their window decision.
    pub fn aggregation_for(&self, name: &str) -> Option<AggregationKind> {
        if var::is_flag(name) {
            return Some(AggregationKind::FlagPercent);
        }
        self.def(name, OUTPUT_LEVEL).and_then(|d| d.aggregation)
    }

    /// Whether a variable belongs in the merged output.
    pub fn is_output_variable(&self, name: &str) -> bool {
        matches!(
            self.def(name, OUTPUT_LEVEL),
            Some(VariableDef {
                def_kind: DefKind::Variable,
                ..
            })
        )
    }

    pub fn output_variables(&self) -> impl Iterator<Item = &VariableDef> {
        self.by_key
            .values()
            .filter(|d| d.level == OUTPUT_LEVEL && d.def_kind == DefKind::Variable)
    }

    /// Every definition at the output level, dimensions included.
    pub fn output_defs(&self) -> impl Iterator<Item = &VariableDef> {
        self.by_key.values().filter(|d| d.level == OUTPUT_LEVEL)
    }
}
