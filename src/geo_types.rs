//! Shared geographic data types loaded from the CMS by `GeoCache` and
//! consumed by `LocationService`, `DemandGenerator`, and the reservoirs.
//!
//! These mirror the CMS collections in spec §6 (Landuse zones, POIs,
//! Routes, Depots, Geofences) closely enough that `cms_client` can
//! deserialize a response directly into them.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Latitude/longitude pair. Longitude, then latitude order is a classic
/// source of bugs, so fields are named rather than a bare tuple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Point {
    pub lat: f64,
    pub lon: f64,
}

impl Point {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Residential,
    Commercial,
    Industrial,
    School,
    Hospital,
    Other,
}

/// A landuse polygon with a demand-generation weight, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Zone {
    pub id: String,
    #[ts(rename = "type")]
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    /// Closed ring, first point repeated as last.
    pub polygon: Vec<Point>,
    pub base_population_density: f64,
    pub spawn_weight: f64,
}

impl Zone {
    pub fn bbox(&self) -> BoundingBox {
        BoundingBox::of_points(&self.polygon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PoiType {
    TransitStop,
    Shopping,
    Employment,
    Recreation,
    Civic,
    Other,
}

/// A point of interest with an activity level used as a destination
/// weight, per spec §3/§4.2.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Poi {
    pub id: String,
    #[ts(rename = "type")]
    #[serde(rename = "type")]
    pub poi_type: PoiType,
    pub point: Point,
    pub activity_level: f64,
}

/// A named place (settlement, neighborhood, landmark) from the CMS's
/// `Places` collection, per spec §6. Unlike a `Poi` it carries no
/// activity level — it exists purely so `LocationService` can report
/// "nearest place" alongside nearest stop/POI.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Place {
    pub id: String,
    pub name: String,
    pub point: Point,
}

/// Direction convention on a route: whether a passenger's destination is
/// closer to the inbound terminus. See spec §3, §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outbound,
    Inbound,
}

/// An ordered polyline a vehicle travels, per spec §3.
///
/// `inbound_terminus` must be declared by the CMS; per the open question
/// in spec §9, a route with no declared terminus is valid to *load* but
/// `DemandGenerator` must refuse to spawn ROUTE-kind passengers onto it.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Route {
    pub id: String,
    pub coordinates: Vec<Point>,
    pub inbound_terminus: Option<Point>,
}

impl Route {
    pub fn has_declared_direction(&self) -> bool {
        self.inbound_terminus.is_some()
    }

    /// Nearest coordinate on this route to `origin`, with its distance in
    /// meters. Used for route assignment (spec §4.2) and conductor
    /// waypoint scanning (spec §4.6).
    pub fn nearest_coordinate(&self, origin: Point) -> Option<(usize, f64)> {
        self.coordinates
            .iter()
            .enumerate()
            .map(|(idx, p)| (idx, crate::geometry::haversine_distance_m(origin, *p)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// A fixed boarding location with a capacity-bounded FIFO of waiting
/// outbound passengers, per spec §3/§4.3.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Depot {
    pub id: String,
    pub point: Point,
    pub assigned_routes: Vec<String>,
    pub max_queue_capacity: usize,
}

/// A vehicle as declared by the CMS, per spec §6 (`Vehicles (id, route_id,
/// capacity)`). Authoritative source of `capacity` the conductor reads
/// from, per spec §9's open question: no hardcoded default is acceptable
/// at runtime, and a vehicle's own record is the only place capacity
/// lives. Position/engine state are not part of this record — those are
/// observed live over `vehicle:position` and driver engine events.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VehicleRecord {
    pub id: String,
    pub route_id: String,
    pub capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceKind {
    Depot,
    BoardingZone,
    Restricted,
    Proximity,
    Custom,
}

/// Circle or polygon geofence geometry, per spec §3/§4.1.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "geometry_type", rename_all = "snake_case")]
pub enum GeofenceGeometry {
    Circle { center: Point, radius_m: f64 },
    Polygon { ring: Vec<Point> },
}

/// A named region used for containment and enter/exit events, per spec
/// §3/§4.1.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Geofence {
    pub id: String,
    pub kind: GeofenceKind,
    pub geometry: GeofenceGeometry,
    pub enabled: bool,
}

impl Geofence {
    pub fn bbox(&self) -> BoundingBox {
        match &self.geometry {
            GeofenceGeometry::Circle { center, radius_m } => {
                BoundingBox::around_circle(*center, *radius_m)
            }
            GeofenceGeometry::Polygon { ring } => BoundingBox::of_points(ring),
        }
    }

    /// Validates the invariant that a polygon ring is closed and has at
    /// least 3 distinct points, per spec §4.1 failure semantics.
    pub fn validate(&self) -> Result<(), crate::errors::CoreError> {
        match &self.geometry {
            GeofenceGeometry::Polygon { ring } => {
                if ring.len() < 4 {
                    return Err(crate::errors::CoreError::validation(format!(
                        "geofence {} polygon has fewer than 3 distinct points",
                        self.id
                    )));
                }
                let first = ring.first().unwrap();
                let last = ring.last().unwrap();
                if (first.lat - last.lat).abs() > f64::EPSILON
                    || (first.lon - last.lon).abs() > f64::EPSILON
                {
                    return Err(crate::errors::CoreError::validation(format!(
                        "geofence {} polygon ring is not closed",
                        self.id
                    )));
                }
                Ok(())
            }
            GeofenceGeometry::Circle { radius_m, .. } => {
                if !radius_m.is_finite() || *radius_m <= 0.0 {
                    return Err(crate::errors::CoreError::validation(format!(
                        "geofence {} has non-positive radius",
                        self.id
                    )));
                }
                Ok(())
            }
        }
    }
}

/// Axis-aligned bounding box in degrees, used as a fast pre-filter
/// ahead of exact containment tests (spec §4.1, invariant 5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn of_points(points: &[Point]) -> Self {
        let mut min_lat = f64::INFINITY;
        let mut min_lon = f64::INFINITY;
        let mut max_lat = f64::NEG_INFINITY;
        let mut max_lon = f64::NEG_INFINITY;
        for p in points {
            min_lat = min_lat.min(p.lat);
            min_lon = min_lon.min(p.lon);
            max_lat = max_lat.max(p.lat);
            max_lon = max_lon.max(p.lon);
        }
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Conservative box around a circle: 1 degree of latitude is
    /// ~111,320 m; longitude is scaled by cos(latitude).
    pub fn around_circle(center: Point, radius_m: f64) -> Self {
        let lat_delta = radius_m / 111_320.0;
        let lon_scale = center.lat.to_radians().cos().max(0.01);
        let lon_delta = radius_m / (111_320.0 * lon_scale);
        Self {
            min_lat: center.lat - lat_delta,
            min_lon: center.lon - lon_delta,
            max_lat: center.lat + lat_delta,
            max_lon: center.lon + lon_delta,
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.lat >= self.min_lat && p.lat <= self.max_lat && p.lon >= self.min_lon && p.lon <= self.max_lon
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lat <= other.max_lat
            && self.max_lat >= other.min_lat
            && self.min_lon <= other.max_lon
            && self.max_lon >= other.min_lon
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_polygon_with_three_points_validates() {
        let g = Geofence {
            id: "g1".into(),
            kind: GeofenceKind::Restricted,
            geometry: GeofenceGeometry::Polygon {
                ring: vec![
                    Point::new(0.0, 0.0),
                    Point::new(0.0, 1.0),
                    Point::new(1.0, 1.0),
                    Point::new(0.0, 0.0),
                ],
            },
            enabled: true,
        };
        assert!(g.validate().is_ok());
    }

    #[test]
    fn unclosed_polygon_is_rejected() {
        let g = Geofence {
            id: "g2".into(),
            kind: GeofenceKind::Restricted,
            geometry: GeofenceGeometry::Polygon {
                ring: vec![Point::new(0.0, 0.0), Point::new(0.0, 1.0), Point::new(1.0, 1.0)],
            },
            enabled: true,
        };
        assert!(g.validate().is_err());
    }

    #[test]
    fn non_positive_radius_is_rejected() {
        let g = Geofence {
            id: "g3".into(),
            kind: GeofenceKind::Depot,
            geometry: GeofenceGeometry::Circle {
                center: Point::new(0.0, 0.0),
                radius_m: 0.0,
            },
            enabled: true,
        };
        assert!(g.validate().is_err());
    }

    #[test]
    fn bbox_around_circle_contains_center() {
        let bbox = BoundingBox::around_circle(Point::new(45.0, -73.0), 500.0);
        assert!(bbox.contains(Point::new(45.0, -73.0)));
    }
}
