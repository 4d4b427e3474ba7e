//! Immutable spatial index backing `LocationService`: geofences keyed by
//! id, plus an R-tree per entity kind for nearest-neighbor lookups.
//!
//! Grounded on the R-tree wrapper in `spatio`'s `rtree.rs` — a 2D point
//! type implementing `rstar::Point`, an envelope-pruned nearest-neighbor
//! iterator, and exact haversine distance computed only for the surviving
//! candidates.

use crate::geo_types::{Depot, Geofence, Place, Point, Poi};
use rstar::{PointDistance, RTree, RTreeObject, AABB};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct IndexedPoint {
    lon: f64,
    lat: f64,
    id: String,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lon, self.lat])
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.lon - point[0];
        let dy = self.lat - point[1];
        dx * dx + dy * dy
    }
}

#[derive(Clone, Default)]
pub struct LocationIndex {
    pub geofences: HashMap<String, Geofence>,
    stops: RTree<IndexedPoint>,
    pois: RTree<IndexedPoint>,
    places: RTree<IndexedPoint>,
}

impl LocationIndex {
    pub fn build<'a>(
        geofences: impl Iterator<Item = Geofence>,
        depots: impl Iterator<Item = &'a Depot>,
        pois: impl Iterator<Item = &'a Poi>,
        places: impl Iterator<Item = &'a Place>,
    ) -> Self {
        let geofences = geofences.map(|g| (g.id.clone(), g)).collect();
        let stops = RTree::bulk_load(
            depots
                .map(|d| IndexedPoint {
                    lon: d.point.lon,
                    lat: d.point.lat,
                    id: d.id.clone(),
                })
                .collect(),
        );
        let pois = RTree::bulk_load(
            pois.map(|p| IndexedPoint {
                lon: p.point.lon,
                lat: p.point.lat,
                id: p.id.clone(),
            })
            .collect(),
        );
        let places = RTree::bulk_load(
            places
                .map(|p| IndexedPoint {
                    lon: p.point.lon,
                    lat: p.point.lat,
                    id: p.id.clone(),
                })
                .collect(),
        );
        Self { geofences, stops, pois, places }
    }

    pub fn upsert_geofence(&mut self, g: Geofence) {
        self.geofences.insert(g.id.clone(), g);
    }

    pub fn remove_geofence(&mut self, id: &str) -> Option<Geofence> {
        self.geofences.remove(id)
    }

    pub fn nearest_stop(&self, position: Point) -> Option<(String, f64)> {
        nearest(&self.stops, position)
    }

    pub fn nearest_poi(&self, position: Point) -> Option<(String, f64)> {
        nearest(&self.pois, position)
    }

    pub fn nearest_place(&self, position: Point) -> Option<(String, f64)> {
        nearest(&self.places, position)
    }

    pub fn nearby_stops(&self, position: Point, limit: usize) -> Vec<(String, f64)> {
        nearby(&self.stops, position, limit)
    }

    pub fn nearby_pois(&self, position: Point, limit: usize) -> Vec<(String, f64)> {
        nearby(&self.pois, position, limit)
    }
}

fn nearest(tree: &RTree<IndexedPoint>, position: Point) -> Option<(String, f64)> {
    let query = [position.lon, position.lat];
    tree.nearest_neighbor(&query).map(|p| {
        let distance = crate::geometry::haversine_distance_m(position, Point::new(p.lat, p.lon));
        (p.id.clone(), distance)
    })
}

fn nearby(tree: &RTree<IndexedPoint>, position: Point, limit: usize) -> Vec<(String, f64)> {
    let query = [position.lon, position.lat];
    let mut results: Vec<(String, f64)> = tree
        .nearest_neighbor_iter(&query)
        .take(limit)
        .map(|p| {
            let distance = crate::geometry::haversine_distance_m(position, Point::new(p.lat, p.lon));
            (p.id.clone(), distance)
        })
        .collect();
    results.sort_by(|a, b| a.1.total_cmp(&b.1));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_types::PoiType;

    #[test]
    fn nearest_poi_picks_closest() {
        let pois = vec![
            Poi {
                id: "far".into(),
                poi_type: PoiType::Shopping,
                point: Point::new(10.0, 10.0),
                activity_level: 0.5,
            },
            Poi {
                id: "near".into(),
                poi_type: PoiType::Shopping,
                point: Point::new(0.001, 0.001),
                activity_level: 0.5,
            },
        ];
        let index = LocationIndex::build(
            std::iter::empty(),
            std::iter::empty(),
            pois.iter(),
            std::iter::empty(),
        );
        let (id, _) = index.nearest_poi(Point::new(0.0, 0.0)).unwrap();
        assert_eq!(id, "near");
    }

    #[test]
    fn empty_index_returns_no_nearest() {
        let index = LocationIndex::default();
        assert!(index.nearest_stop(Point::new(0.0, 0.0)).is_none());
    }
}
