//! Coordinate primitives: great-circle distance and jurisdiction containment.

use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Whether both components are finite numbers.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Great-circle (haversine) distance between two points, in kilometres.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Ray-casting point-in-polygon test over a closed ring of vertices.
///
/// The ring does not need to repeat its first vertex. Points exactly on an
/// edge may land on either side; jurisdiction scoring treats that as noise.
pub fn point_in_polygon(point: GeoPoint, ring: &[GeoPoint]) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (pi, pj) = (ring[i], ring[j]);
        let crosses = (pi.lat > point.lat) != (pj.lat > point.lat)
            && point.lng
                < (pj.lng - pi.lng) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lng;
        if crosses {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<GeoPoint> {
        vec![
            GeoPoint::new(0.0, 0.0),
            GeoPoint::new(0.0, 10.0),
            GeoPoint::new(10.0, 10.0),
            GeoPoint::new(10.0, 0.0),
        ]
    }

    #[test]
    fn test_haversine_zero_for_same_point() {
        let p = GeoPoint::new(9.0, 38.7);
        assert!(haversine_km(p, p) < 1e-9);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of longitude at the equator is ~111.19 km.
        let d = haversine_km(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0));
        assert!((d - 111.19).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_point_inside_square() {
        assert!(point_in_polygon(GeoPoint::new(5.0, 5.0), &square()));
    }

    #[test]
    fn test_point_outside_square() {
        assert!(!point_in_polygon(GeoPoint::new(15.0, 5.0), &square()));
        assert!(!point_in_polygon(GeoPoint::new(5.0, -1.0), &square()));
    }

    #[test]
    fn test_degenerate_ring_is_never_inside() {
        let line = vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(1.0, 1.0)];
        assert!(!point_in_polygon(GeoPoint::new(0.5, 0.5), &line));
    }
}
