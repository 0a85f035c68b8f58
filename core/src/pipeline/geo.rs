//! Great-circle distance and the odometer glitch guard.

const EARTH_RADIUS_KM: f64 = 6371.0088; // WGS-84 mean radius

/// Distance in meters between two lat/lon points via the haversine formula.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (lat1.to_radians(), lon1.to_radians(), lat2.to_radians(), lon2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c * 1000.0
}

/// A jump is a GPS glitch, not real travel, if it implies more than 500km
/// covered in under 5 minutes — no vehicle legitimately does that.
pub fn is_glitch(distance_m: f64, elapsed_secs: f64) -> bool {
    const GLITCH_DISTANCE_M: f64 = 500_000.0;
    const GLITCH_WINDOW_SECS: f64 = 5.0 * 60.0;
    distance_m > GLITCH_DISTANCE_M && elapsed_secs < GLITCH_WINDOW_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_of_identical_points_is_zero() {
        assert!(haversine_m(45.0, 14.0, 45.0, 14.0) < 1e-6);
    }

    #[test]
    fn haversine_one_degree_latitude_is_about_111km() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.0).abs() < 500.0);
    }

    #[test]
    fn glitch_guard_flags_impossible_jump() {
        assert!(is_glitch(600_000.0, 60.0));
        assert!(!is_glitch(600_000.0, 3600.0));
        assert!(!is_glitch(1_000.0, 1.0));
    }
}
