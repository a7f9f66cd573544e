// Distance and bearing calculations on a spherical Earth.
//
// Everything here operates at canal scale (metres to a few kilometres), so
// the spherical approximation is well inside the error budget.

use std::f64::consts::PI;

/// Degrees to radians conversion factor
const DTOR: f64 = PI / 180.0;

/// Radians to degrees conversion factor
const RTOD: f64 = 180.0 / PI;

/// Mean Earth radius in kilometres
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres between two lat/lon points (Haversine).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1 * DTOR;
    let lat2_rad = lat2 * DTOR;
    let dlat = (lat2 - lat1) * DTOR;
    let dlon = (lon2 - lon1) * DTOR;

    let a = (dlat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Initial great-circle bearing from point 1 to point 2, degrees in [0, 360).
/// 0 = north, 90 = east.
pub fn bearing_deg(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1 * DTOR;
    let lat2_rad = lat2 * DTOR;
    let dlon_rad = (lon2 - lon1) * DTOR;

    let x = dlon_rad.sin() * lat2_rad.cos();
    let y = lat1_rad.cos() * lat2_rad.sin() - lat1_rad.sin() * lat2_rad.cos() * dlon_rad.cos();

    (x.atan2(y) * RTOD + 360.0) % 360.0
}

/// Absolute difference between two angles, degrees in [0, 180].
/// Handles wraparound: 350 and 10 differ by 20, not 340.
pub fn angle_difference(angle1: f64, angle2: f64) -> f64 {
    let diff = (angle1 - angle2).abs() % 360.0;
    if diff > 180.0 {
        360.0 - diff
    } else {
        diff
    }
}

/// Fast flat-Earth displacement in metres, adequate for the 10 m
/// movement threshold. Longitude scale assumes ~45 degrees latitude.
pub fn displacement_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).abs() * 111_320.0;
    let dlon = (lon2 - lon1).abs() * 78_710.0;
    (dlat * dlat + dlon * dlon).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_known_distance() {
        // Carlton St. bridge to Queenston St. bridge, roughly 3 km apart
        let d = haversine_km(43.19186, -79.20101, 43.16582, -79.19493);
        assert!((2.5..3.5).contains(&d), "distance: {d} km");
    }

    #[test]
    fn test_haversine_same_point() {
        let d = haversine_km(43.19, -79.20, 43.19, -79.20);
        assert!(d.abs() < 1e-9);
    }

    #[test]
    fn test_bearing_north() {
        let b = bearing_deg(43.0, -79.2, 43.1, -79.2);
        assert!(b < 1.0 || b > 359.0, "bearing: {b}");
    }

    #[test]
    fn test_bearing_east() {
        let b = bearing_deg(43.0, -79.2, 43.0, -79.1);
        assert!((b - 90.0).abs() < 1.0, "bearing: {b}");
    }

    #[test]
    fn test_angle_difference_wraparound() {
        assert!((angle_difference(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((angle_difference(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert!((angle_difference(0.0, 180.0) - 180.0).abs() < 1e-9);
        assert!(angle_difference(90.0, 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_displacement_threshold() {
        // ~0.0001 degrees of latitude is ~11 m
        let d = displacement_m(43.19000, -79.20000, 43.19010, -79.20000);
        assert!((10.0..13.0).contains(&d), "displacement: {d} m");

        // Identical position moves nothing
        assert!(displacement_m(43.19, -79.2, 43.19, -79.2) < 1e-9);
    }
}
