//! Vertical coordinate harmonisation: project slant ranges to heights, shift
//! to the sea-level datum, then regrid every instrument onto one common
//! height axis so profiles from different systems can sit in one dataset.

use std::collections::BTreeMap;

use ndarray::Array2;
use tracing::debug;

use crate::config::GridSpec;
use crate::error::RegridError;
use crate::profile::{AxisKind, ProfileSet, VerticalAxis};
use crate::types::Deployment;

/// Gate spacings closer than this are considered equal.
const SPACING_TOLERANCE_M: f64 = 1e-6;

/// A native gate must sit within this distance of a metre-grid point to be
/// sampled onto it.
const SNAP_TOLERANCE_M: f64 = 0.5;

/// Convert slant ranges along the beam into heights above the instrument by
/// projecting through the scan elevation.
pub fn project_to_height(set: &mut ProfileSet, elevation_deg: f64) -> Result<(), RegridError> {
    set.axis().expect_kind(AxisKind::SlantRange)?;
    if !(elevation_deg > 0.0 && elevation_deg <= 90.0) {
        return Err(RegridError::InvalidElevation { elevation_deg });
    }
    let sin_e = elevation_deg.to_radians().sin();
    let heights: Vec<f64> = set.axis().values().iter().map(|r| r * sin_e).collect();
    set.replace_axis(VerticalAxis::height_above_instrument(heights)?)?;
    Ok(())
}

/// Shift heights above the instrument to heights above mean sea level.
pub fn adjust_to_sea_level(set: &mut ProfileSet, above_sea_level_m: f64) -> Result<(), RegridError> {
    set.axis().expect_kind(AxisKind::HeightAboveInstrument)?;
    let heights: Vec<f64> = set
        .axis()
        .values()
        .iter()
        .map(|h| h + above_sea_level_m)
        .collect();
    set.replace_axis(VerticalAxis::height_asl(heights)?)?;
    Ok(())
}

/// Resample a height-ASL profile set onto the target grid.
///
/// The native axis must be uniformly spaced. Gates are restricted to one
/// native resolution beyond the grid bounds, sampled onto a dense one-metre
/// grid by nearest neighbor, NaN runs whose bracketing valid points sit no
/// further apart than twice the native resolution are filled linearly, and
/// the dense grid is then subsampled at the target resolution. Flag layers
/// regrid like any other variable, so fractional flag values appear next to
/// interpolated data.
pub fn regrid_to(set: &ProfileSet, grid: &GridSpec) -> Result<ProfileSet, RegridError> {
    set.axis().expect_kind(AxisKind::HeightAsl)?;
    let native = set.axis().values();
    let native_res = uniform_spacing(native)?;

    // Keep one native gate beyond each grid edge so edge cells can still
    // interpolate.
    let keep_lo = grid.min_height_m - native_res;
    let keep_hi = grid.max_height_m + native_res;
    let lo = native.partition_point(|h| *h < keep_lo);
    let hi = native.partition_point(|h| *h <= keep_hi);
    if lo >= hi {
        return Err(RegridError::EmptyOverlap {
            native_min: native.first().copied().unwrap_or(f64::NAN),
            native_max: native.last().copied().unwrap_or(f64::NAN),
            grid_min: grid.min_height_m,
            grid_max: grid.max_height_m,
        });
    }
    let native = &native[lo..hi];

    // Nearest native gate for each dense metre point, where one is close
    // enough. Shared across variables and time steps.
    let n_dense = (grid.max_height_m - grid.min_height_m).ceil() as usize;
    let dense_pos: Vec<f64> = (0..n_dense)
        .map(|j| grid.min_height_m + j as f64)
        .collect();
    let snap: Vec<Option<usize>> = dense_pos
        .iter()
        .map(|&h| nearest_within(native, h, SNAP_TOLERANCE_M))
        .collect();

    let max_gap = 2.0 * native_res + SPACING_TOLERANCE_M;
    let target = grid.levels();
    let stride = grid.resolution_m;

    let mut regridded: BTreeMap<String, Array2<f64>> = BTreeMap::new();
    for (name, values) in set.gate_vars() {
        let mut out = Array2::from_elem((set.n_times(), target.len()), f64::NAN);
        let mut dense_row = vec![f64::NAN; n_dense];
        for (t, mut out_row) in out.outer_iter_mut().enumerate() {
            for (j, cell) in dense_row.iter_mut().enumerate() {
                *cell = match snap[j] {
                    Some(g) => values[[t, lo + g]],
                    None => f64::NAN,
                };
            }
            fill_short_gaps(&mut dense_row, &dense_pos, max_gap);
            for (k, out_cell) in out_row.iter_mut().enumerate() {
                let j = (k as f64 * stride).round() as usize;
                *out_cell = dense_row[j];
            }
        }
        regridded.insert(name.to_string(), out);
    }

    debug!(
        native_gates = native.len(),
        native_res, levels = target.len(),
        "regridded onto target axis"
    );
    let axis = VerticalAxis::height_asl(target)?;
    Ok(set.with_regridded(axis, regridded))
}

/// Project, datum-shift and regrid one instrument's profiles according to
/// its deployment record. Vertical-stare systems skip the projection.
pub fn harmonise_to_grid(
    mut set: ProfileSet,
    deployment: &Deployment,
    grid: &GridSpec,
) -> Result<ProfileSet, RegridError> {
    if deployment.model.is_range_native() {
        let elevation = deployment.scan_elevation_deg.unwrap_or(f64::NAN);
        project_to_height(&mut set, elevation)?;
    }
    adjust_to_sea_level(&mut set, deployment.above_sea_level_m)?;
    regrid_to(&set, grid)
}

/// The single gate spacing of a uniform axis, or the distinct spacings found.
fn uniform_spacing(axis: &[f64]) -> Result<f64, RegridError> {
    let mut spacings: Vec<f64> = Vec::new();
    for pair in axis.windows(2) {
        let d = pair[1] - pair[0];
        if !spacings
            .iter()
            .any(|s| (s - d).abs() <= SPACING_TOLERANCE_M)
        {
            spacings.push(d);
        }
    }
    match spacings.len() {
        0 | 1 => Ok(spacings.first().copied().unwrap_or(0.0)),
        _ => {
            spacings.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            Err(RegridError::NonUniformGateSpacing { spacings })
        }
    }
}

/// Index of the axis value nearest to `target`, if within `tolerance`.
/// Ties go to the lower gate.
fn nearest_within(axis: &[f64], target: f64, tolerance: f64) -> Option<usize> {
    let right = axis.partition_point(|h| *h < target);
    let mut best: Option<usize> = None;
    if right > 0 {
        best = Some(right - 1);
    }
    if right < axis.len() {
        best = match best {
            Some(left) if (axis[left] - target).abs() <= (axis[right] - target).abs() => Some(left),
            _ => Some(right),
        };
    }
    best.filter(|&i| (axis[i] - target).abs() <= tolerance)
}

/// Linearly fill interior NaN runs whose bracketing valid points are within
/// `max_gap` of each other. Runs touching either boundary stay missing.
fn fill_short_gaps(row: &mut [f64], pos: &[f64], max_gap: f64) {
    let mut left: Option<usize> = None;
    let mut j = 0;
    while j < row.len() {
        if !row[j].is_nan() {
            left = Some(j);
            j += 1;
            continue;
        }
        let run_start = j;
        while j < row.len() && row[j].is_nan() {
            j += 1;
        }
        let (Some(l), true) = (left, j < row.len()) else {
            continue;
        };
        let r = j;
        if pos[r] - pos[l] > max_gap {
            continue;
        }
        let (vl, vr) = (row[l], row[r]);
        let span = pos[r] - pos[l];
        for k in run_start..r {
            row[k] = vl + (vr - vl) * (pos[k] - pos[l]) / span;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use ndarray::arr2;

    fn times(n: usize) -> Vec<DateTime<Utc>> {
        (0..n)
            .map(|i| {
                Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::seconds(60 * i as i64)
            })
            .collect()
    }

    fn set_with_u(axis: VerticalAxis, u: Array2<f64>) -> ProfileSet {
        let mut set = ProfileSet::new(times(u.nrows()), axis).unwrap();
        set.insert_gate_var("u", u).unwrap();
        set
    }

    fn grid(min: f64, max: f64, res: f64) -> GridSpec {
        GridSpec {
            min_height_m: min,
            max_height_m: max,
            resolution_m: res,
        }
    }

    #[test]
    fn projection_scales_by_sin_elevation() {
        let axis = VerticalAxis::slant_range(vec![100.0, 200.0]).unwrap();
        let mut set = set_with_u(axis, arr2(&[[1.0, 2.0]]));
        project_to_height(&mut set, 30.0).unwrap();
        assert_eq!(set.axis().kind(), AxisKind::HeightAboveInstrument);
        assert!((set.axis().values()[0] - 50.0).abs() < 1e-9);
        assert!((set.axis().values()[1] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn projection_rejects_height_axes_and_bad_elevations() {
        let axis = VerticalAxis::height_asl(vec![100.0, 200.0]).unwrap();
        let mut set = set_with_u(axis, arr2(&[[1.0, 2.0]]));
        assert!(matches!(
            project_to_height(&mut set, 75.0),
            Err(RegridError::Axis(_))
        ));

        let axis = VerticalAxis::slant_range(vec![100.0, 200.0]).unwrap();
        let mut set = set_with_u(axis, arr2(&[[1.0, 2.0]]));
        assert!(matches!(
            project_to_height(&mut set, 0.0),
            Err(RegridError::InvalidElevation { .. })
        ));
        assert!(matches!(
            project_to_height(&mut set, f64::NAN),
            Err(RegridError::InvalidElevation { .. })
        ));
    }

    #[test]
    fn datum_shift_requires_instrument_heights() {
        let axis = VerticalAxis::height_above_instrument(vec![40.0, 65.0]).unwrap();
        let mut set = set_with_u(axis, arr2(&[[1.0, 2.0]]));
        adjust_to_sea_level(&mut set, 10.0).unwrap();
        assert_eq!(set.axis().kind(), AxisKind::HeightAsl);
        assert_eq!(set.axis().values(), &[50.0, 75.0]);

        let axis = VerticalAxis::slant_range(vec![40.0, 65.0]).unwrap();
        let mut set = set_with_u(axis, arr2(&[[1.0, 2.0]]));
        assert!(adjust_to_sea_level(&mut set, 10.0).is_err());
    }

    #[test]
    fn non_uniform_spacing_is_rejected_with_the_spacings() {
        let axis = VerticalAxis::height_asl(vec![0.0, 25.0, 75.0]).unwrap();
        let set = set_with_u(axis, arr2(&[[1.0, 2.0, 3.0]]));
        match regrid_to(&set, &grid(0.0, 100.0, 25.0)).unwrap_err() {
            RegridError::NonUniformGateSpacing { spacings } => {
                assert_eq!(spacings, vec![25.0, 50.0]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn aligned_gates_pass_through_and_axis_excludes_max() {
        let axis =
            VerticalAxis::height_asl(vec![0.0, 25.0, 50.0, 75.0, 100.0, 125.0, 150.0]).unwrap();
        let u = arr2(&[[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]]);
        let set = set_with_u(axis, u);
        let out = regrid_to(&set, &grid(0.0, 150.0, 25.0)).unwrap();
        // final axis is [min, max): 150 itself is excluded
        assert_eq!(out.axis().values(), &[0.0, 25.0, 50.0, 75.0, 100.0, 125.0]);
        let u = out.gate_var("u").unwrap();
        for (k, expected) in [0.0, 1.0, 2.0, 3.0, 4.0, 5.0].iter().enumerate() {
            assert!((u[[0, k]] - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn single_missing_gate_fills_two_stay_missing() {
        let axis =
            VerticalAxis::height_asl(vec![0.0, 25.0, 50.0, 75.0, 100.0, 125.0, 150.0, 175.0])
                .unwrap();
        let u = arr2(&[
            // one missing interior gate: bracketing points 50 apart
            [0.0, 1.0, 2.0, f64::NAN, 4.0, 5.0, 6.0, 7.0],
            // two consecutive missing gates: bracketing points 75 apart
            [0.0, 1.0, 2.0, f64::NAN, f64::NAN, 5.0, 6.0, 7.0],
        ]);
        let set = set_with_u(axis, u);
        let out = regrid_to(&set, &grid(0.0, 175.0, 25.0)).unwrap();
        let u = out.gate_var("u").unwrap();
        assert!((u[[0, 3]] - 3.0).abs() < 1e-9, "single gap interpolates");
        assert!(u[[1, 3]].is_nan(), "double gap stays missing");
        assert!(u[[1, 4]].is_nan(), "double gap stays missing");
        assert!((u[[1, 5]] - 5.0).abs() < 1e-9);
    }

    #[test]
    fn offset_gates_interpolate_onto_the_grid() {
        // native gates off the metre grid by 0.5: still snap, then the
        // subsampled points are linear blends of the neighboring gates
        let axis = VerticalAxis::height_asl(vec![10.5, 35.5, 60.5, 85.5, 110.5]).unwrap();
        let u = arr2(&[[1.0, 2.0, 3.0, 4.0, 5.0]]);
        let set = set_with_u(axis, u);
        let out = regrid_to(&set, &grid(0.0, 125.0, 25.0)).unwrap();
        let u = out.gate_var("u").unwrap();
        assert!(u[[0, 0]].is_nan(), "below the first gate stays missing");
        assert!((u[[0, 1]] - (1.0 + 14.0 / 24.0)).abs() < 1e-9);
        assert!((u[[0, 2]] - (2.0 + 14.0 / 24.0)).abs() < 1e-9);
        assert!((u[[0, 4]] - (4.0 + 14.0 / 24.0)).abs() < 1e-9);
    }

    #[test]
    fn disjoint_axis_is_an_empty_overlap() {
        let axis = VerticalAxis::height_asl(vec![8000.0, 8025.0, 8050.0]).unwrap();
        let set = set_with_u(axis, arr2(&[[1.0, 2.0, 3.0]]));
        assert!(matches!(
            regrid_to(&set, &grid(0.0, 6500.0, 25.0)),
            Err(RegridError::EmptyOverlap { .. })
        ));
    }

    #[test]
    fn harmonise_runs_the_full_chain_per_model() {
        use crate::types::InstrumentModel;
        let deployment = Deployment {
            station_code: "STNA".to_string(),
            instrument_serial: "146".to_string(),
            model: InstrumentModel::PulsedLidar,
            start_datetime: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            end_datetime: Utc.with_ymd_and_hms(2023, 12, 31, 0, 0, 0).unwrap(),
            above_sea_level_m: 10.0,
            scan_elevation_deg: Some(90.0),
            azimuth_offset_deg: None,
        };
        // ranges at 90 deg become heights 40..240, +10 ASL = 50..250
        let axis = VerticalAxis::slant_range(vec![40.0, 65.0, 90.0, 115.0, 140.0]).unwrap();
        let set = set_with_u(axis, arr2(&[[1.0, 2.0, 3.0, 4.0, 5.0]]));
        let out = harmonise_to_grid(set, &deployment, &grid(0.0, 200.0, 25.0)).unwrap();
        assert_eq!(out.axis().kind(), AxisKind::HeightAsl);
        let u = out.gate_var("u").unwrap();
        assert!(u[[0, 0]].is_nan()); // 0 m, below the blind range
        assert!((u[[0, 2]] - 1.0).abs() < 1e-9); // 50 m ASL = first gate
        assert!((u[[0, 6]] - 5.0).abs() < 1e-9); // 150 m ASL = last gate
    }
}
