//! Single geodesic utility module. Per spec §9 ("distance duplication
//! across files" redesign flag), every component calls these functions
//! rather than reimplementing haversine or point-in-polygon locally.

use crate::geo_types::{GeofenceGeometry, Point};
use geo::{Contains, LineString, Polygon};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance between two points, in meters.
pub fn haversine_distance_m(a: Point, b: Point) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlon = (b.lon - a.lon).to_radians();

    let sin_dlat = (dlat / 2.0).sin();
    let sin_dlon = (dlon / 2.0).sin();
    let h = sin_dlat * sin_dlat + lat1.cos() * lat2.cos() * sin_dlon * sin_dlon;
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

fn to_geo_polygon(ring: &[Point]) -> Polygon<f64> {
    let coords: Vec<(f64, f64)> = ring.iter().map(|p| (p.lon, p.lat)).collect();
    Polygon::new(LineString::from(coords), vec![])
}

/// Exact containment test for a single geofence geometry, per spec §4.1:
/// circle uses haversine distance ≤ radius (boundary counts as inside);
/// polygon uses ray-casting (vertices/edges count as inside).
pub fn contains(geometry: &GeofenceGeometry, point: Point) -> bool {
    match geometry {
        GeofenceGeometry::Circle { center, radius_m } => {
            haversine_distance_m(*center, point) <= *radius_m
        }
        GeofenceGeometry::Polygon { ring } => {
            let polygon = to_geo_polygon(ring);
            let candidate = geo::Point::new(point.lon, point.lat);
            polygon.contains(&candidate) || on_boundary(ring, point)
        }
    }
}

/// `geo::Contains` treats boundary points as outside for some polygon
/// configurations; spec §4.1 and §8 require vertices/edges to count as
/// inside, so we explicitly check proximity to each edge.
fn on_boundary(ring: &[Point], point: Point) -> bool {
    const EPSILON_M: f64 = 0.05;
    ring.windows(2).any(|pair| {
        let (a, b) = (pair[0], pair[1]);
        distance_to_segment_m(point, a, b) <= EPSILON_M
    })
}

fn distance_to_segment_m(p: Point, a: Point, b: Point) -> f64 {
    // Flat-earth approximation is adequate at the sub-meter scale needed
    // only to classify "on the edge".
    let (px, py) = (p.lon, p.lat);
    let (ax, ay) = (a.lon, a.lat);
    let (bx, by) = (b.lon, b.lat);
    let (dx, dy) = (bx - ax, by - ay);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq > 0.0 {
        (((px - ax) * dx + (py - ay) * dy) / len_sq).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    haversine_distance_m(p, Point::new(cy, cx))
}

/// Uniform-random point within a polygon via rejection sampling against
/// its bounding box, per spec §4.2.
pub fn random_point_in_polygon(ring: &[Point], rng: &mut impl rand::Rng) -> Point {
    let bbox = crate::geo_types::BoundingBox::of_points(ring);
    loop {
        let lat = rng.random_range(bbox.min_lat..=bbox.max_lat);
        let lon = rng.random_range(bbox.min_lon..=bbox.max_lon);
        let candidate = Point::new(lat, lon);
        if contains(&GeofenceGeometry::Polygon { ring: ring.to_vec() }, candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_zero_for_identical_points() {
        let p = Point::new(45.0, -73.0);
        assert!(haversine_distance_m(p, p) < 1e-6);
    }

    #[test]
    fn haversine_one_degree_latitude_is_about_111km() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(1.0, 0.0);
        let d = haversine_distance_m(a, b);
        assert!((d - 111_195.0).abs() < 1_000.0);
    }

    #[test]
    fn circle_boundary_point_is_inside() {
        let geometry = GeofenceGeometry::Circle {
            center: Point::new(0.0, 0.0),
            radius_m: 1000.0,
        };
        // ~1000m north of the center along the meridian.
        let edge = Point::new(1000.0 / 111_320.0, 0.0);
        assert!(contains(&geometry, edge));
    }

    #[test]
    fn polygon_vertex_is_inside() {
        let ring = vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 0.0),
        ];
        let geometry = GeofenceGeometry::Polygon { ring: ring.clone() };
        assert!(contains(&geometry, ring[1]));
    }

    #[test]
    fn polygon_center_is_inside() {
        let ring = vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 0.0),
        ];
        let geometry = GeofenceGeometry::Polygon { ring };
        assert!(contains(&geometry, Point::new(0.5, 0.5)));
        assert!(!contains(&geometry, Point::new(5.0, 5.0)));
    }
}
