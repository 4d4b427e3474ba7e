//! Scenario F: a regular polygon approximation of a circle must agree
//! with the exact circle test for at least 99% of sampled points.

use commuter_core::geo_types::{GeofenceGeometry, Point};
use commuter_core::geometry::contains;
use rand::Rng;

const SAMPLE_COUNT: usize = 1000;
const AGREEMENT_THRESHOLD: f64 = 0.99;

/// A regular `sides`-gon inscribed in the circle of `radius_m` around
/// `center`, approximated with an equirectangular meters-per-degree
/// conversion good enough at these small radii (~100 m).
fn polygon_approximating_circle(center: Point, radius_m: f64, sides: usize) -> Vec<Point> {
    const METERS_PER_DEGREE_LAT: f64 = 111_320.0;
    let meters_per_degree_lon = METERS_PER_DEGREE_LAT * center.lat.to_radians().cos();

    let mut ring: Vec<Point> = (0..sides)
        .map(|i| {
            let theta = 2.0 * std::f64::consts::PI * (i as f64) / (sides as f64);
            let dlat = (radius_m * theta.sin()) / METERS_PER_DEGREE_LAT;
            let dlon = (radius_m * theta.cos()) / meters_per_degree_lon;
            Point::new(center.lat + dlat, center.lon + dlon)
        })
        .collect();
    ring.push(ring[0]);
    ring
}

#[test]
fn thirty_two_gon_agrees_with_circle_on_at_least_99_percent_of_points() {
    let center = Point::new(37.7749, -122.4194);
    let radius_m = 100.0;
    let circle = GeofenceGeometry::Circle { center, radius_m };
    let polygon = GeofenceGeometry::Polygon {
        ring: polygon_approximating_circle(center, radius_m, 32),
    };

    let mut rng = rand::rng();
    let mut agreements = 0usize;
    // Sample within a square slightly larger than the circle's bounding
    // box so points both inside and outside the boundary are exercised.
    let span_degrees = (radius_m * 1.5) / 111_320.0;

    for _ in 0..SAMPLE_COUNT {
        let lat = center.lat + rng.random_range(-span_degrees..=span_degrees);
        let lon = center.lon + rng.random_range(-span_degrees..=span_degrees);
        let point = Point::new(lat, lon);

        if contains(&circle, point) == contains(&polygon, point) {
            agreements += 1;
        }
    }

    let agreement_rate = agreements as f64 / SAMPLE_COUNT as f64;
    assert!(
        agreement_rate >= AGREEMENT_THRESHOLD,
        "polygon/circle agreement rate {agreement_rate} below threshold {AGREEMENT_THRESHOLD}"
    );
}
