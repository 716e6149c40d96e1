//! Conversions between zonal/meridional wind components and the
//! meteorological speed/direction convention (direction is where the wind
//! blows FROM, degrees clockwise from north).

use ndarray::{Array2, Zip};

/// Speed and from-direction to (u, v) components.
pub fn ws_wd_to_vector(speed: f64, direction_deg: f64) -> (f64, f64) {
    let rad = direction_deg.to_radians();
    (-speed * rad.sin(), -speed * rad.cos())
}

/// (u, v) components to speed and from-direction in [0, 360). A negative
/// angle wraps up by 360; an exact 360 folds back to 0 so north is always
/// reported as 0. NaN inputs yield NaN outputs.
pub fn vector_to_ws_wd(u: f64, v: f64) -> (f64, f64) {
    let speed = u.hypot(v);
    let mut direction = (-u).atan2(-v).to_degrees();
    if direction < 0.0 {
        direction += 360.0;
    }
    if direction >= 360.0 {
        direction -= 360.0;
    }
    (speed, direction)
}

/// Element-wise [`vector_to_ws_wd`] over a pair of (time x gate) grids.
pub fn derive_ws_wd_grids(u: &Array2<f64>, v: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let mut ws = Array2::from_elem(u.dim(), f64::NAN);
    let mut wd = Array2::from_elem(u.dim(), f64::NAN);
    Zip::from(&mut ws)
        .and(&mut wd)
        .and(u)
        .and(v)
        .for_each(|ws, wd, &u, &v| {
            let (s, d) = vector_to_ws_wd(u, v);
            *ws = s;
            *wd = d;
        });
    (ws, wd)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn cardinal_directions() {
        // northerly: wind from the north blows toward the south
        let (ws, wd) = vector_to_ws_wd(0.0, -5.0);
        assert!((ws - 5.0).abs() < TOL);
        assert!(wd.abs() < TOL);

        let (_, wd) = vector_to_ws_wd(-5.0, 0.0);
        assert!((wd - 90.0).abs() < TOL);

        let (_, wd) = vector_to_ws_wd(0.0, 5.0);
        assert!((wd - 180.0).abs() < TOL);

        let (_, wd) = vector_to_ws_wd(5.0, 0.0);
        assert!((wd - 270.0).abs() < TOL);
    }

    #[test]
    fn direction_stays_in_range() {
        for i in 0..720 {
            let deg = i as f64 * 0.5;
            let (u, v) = ws_wd_to_vector(10.0, deg);
            let (_, wd) = vector_to_ws_wd(u, v);
            assert!((0.0..360.0).contains(&wd), "wd {wd} out of range for {deg}");
        }
    }

    #[test]
    fn round_trip_recovers_speed_and_direction() {
        let (u, v) = ws_wd_to_vector(12.3, 234.0);
        let (ws, wd) = vector_to_ws_wd(u, v);
        assert!((ws - 12.3).abs() < 1e-9);
        assert!((wd - 234.0).abs() < 1e-9);
    }

    #[test]
    fn nan_components_propagate() {
        let (ws, wd) = vector_to_ws_wd(f64::NAN, 3.0);
        assert!(ws.is_nan());
        assert!(wd.is_nan());
    }

    #[test]
    fn grid_helper_matches_scalar() {
        let u = ndarray::arr2(&[[0.0, -5.0], [f64::NAN, 3.0]]);
        let v = ndarray::arr2(&[[-5.0, 0.0], [1.0, 4.0]]);
        let (ws, wd) = derive_ws_wd_grids(&u, &v);
        assert!((ws[[0, 0]] - 5.0).abs() < TOL);
        assert!(wd[[0, 0]].abs() < TOL);
        assert!((wd[[0, 1]] - 90.0).abs() < TOL);
        assert!(ws[[1, 0]].is_nan());
        assert!((ws[[1, 1]] - 5.0).abs() < TOL);
    }
}
