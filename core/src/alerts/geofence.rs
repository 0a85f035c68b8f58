//! Point-in-polygon and distance-to-polyline tests for geofence membership.

use crate::db::geofences::LatLon;
use crate::pipeline::geo::haversine_m;

/// Ray casting: count crossings of a horizontal ray from the point to +lon
/// infinity through the polygon's edges. Odd crossing count means inside.
/// Treats `polygon` as an implicitly-closed ring (last vertex connects back
/// to the first).
pub fn point_in_polygon(lat: f64, lon: f64, polygon: &[LatLon]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let vi = &polygon[i];
        let vj = &polygon[j];
        let straddles = (vi.lat > lat) != (vj.lat > lat);
        if straddles {
            let x_at_lat = vj.lon + (lat - vj.lat) / (vi.lat - vj.lat) * (vi.lon - vj.lon);
            if lon < x_at_lat {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Shortest distance in metres from `(lat, lon)` to the polyline formed by
/// consecutive vertices of `path`. Each segment is treated as flat over the
/// short distances a corridor check cares about: project the point onto the
/// segment in an equirectangular approximation, clamp to the segment's
/// extent, then measure the real haversine distance to that projection.
pub fn distance_to_polyline_m(lat: f64, lon: f64, path: &[LatLon]) -> f64 {
    if path.is_empty() {
        return f64::INFINITY;
    }
    if path.len() == 1 {
        return haversine_m(lat, lon, path[0].lat, path[0].lon);
    }
    let lat_rad = lat.to_radians();
    let to_xy = |p: &LatLon| (p.lon * lat_rad.cos(), p.lat);

    let mut best = f64::INFINITY;
    for pair in path.windows(2) {
        let (ax, ay) = to_xy(&pair[0]);
        let (bx, by) = to_xy(&pair[1]);
        let (px, py) = to_xy(&LatLon { lat, lon });

        let (dx, dy) = (bx - ax, by - ay);
        let len_sq = dx * dx + dy * dy;
        let t = if len_sq > 0.0 { ((px - ax) * dx + (py - ay) * dy) / len_sq } else { 0.0 };
        let t = t.clamp(0.0, 1.0);

        let closest = LatLon { lat: pair[0].lat + t * (pair[1].lat - pair[0].lat), lon: pair[0].lon + t * (pair[1].lon - pair[0].lon) };
        let distance = haversine_m(lat, lon, closest.lat, closest.lon);
        best = best.min(distance);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<LatLon> {
        vec![
            LatLon { lat: 0.0, lon: 0.0 },
            LatLon { lat: 0.0, lon: 1.0 },
            LatLon { lat: 1.0, lon: 1.0 },
            LatLon { lat: 1.0, lon: 0.0 },
        ]
    }

    #[test]
    fn point_inside_square_is_inside() {
        assert!(point_in_polygon(0.5, 0.5, &square()));
    }

    #[test]
    fn point_outside_square_is_outside() {
        assert!(!point_in_polygon(2.0, 2.0, &square()));
    }

    #[test]
    fn degenerate_polygon_is_never_inside() {
        assert!(!point_in_polygon(0.0, 0.0, &[LatLon { lat: 0.0, lon: 0.0 }]));
    }
}
