//! `RouteReservoir` — grid-indexed, per-route, per-direction index of
//! passengers spawned along a route path, per spec §4.4.
//!
//! Grid cell size `Δ` is configurable (default ≈0.01°, ≈1.1 km at the
//! equator, per `config::defaults::GRID_CELL_SIZE_DEGREES`). Cell key is
//! `(floor(lat/Δ), floor(lon/Δ))`, the same integer-bucket idiom the
//! pack's R-tree helpers use degrees-as-distance before the exact
//! haversine pass. Cells containing zero passengers are elided by simply
//! never being inserted into the map.

use crate::errors::CoreError;
use crate::geo_types::{Direction, Point};
use crate::passenger::{Passenger, PassengerStatus, SpawnKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

pub type GridCell = (i64, i64);

pub fn cell_for(point: Point, cell_size_degrees: f64) -> GridCell {
    (
        (point.lat / cell_size_degrees).floor() as i64,
        (point.lon / cell_size_degrees).floor() as i64,
    )
}

#[derive(Default)]
struct CellBucket {
    outbound: Mutex<Vec<Passenger>>,
    inbound: Mutex<Vec<Passenger>>,
}

impl CellBucket {
    fn list_for(&self, direction: Direction) -> &Mutex<Vec<Passenger>> {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }
}

#[derive(Debug, Default)]
struct RouteStats {
    spawned: AtomicU64,
    picked_up: AtomicU64,
    expired: AtomicU64,
}

/// Grid-indexed reservoir of WAITING passengers spawned along routes.
#[derive(Default)]
pub struct RouteReservoir {
    cell_size_degrees: f64,
    /// route_id -> grid_cell -> bucket
    cells: DashMap<(String, GridCell), CellBucket>,
    /// passenger_id -> (route_id, cell, direction)
    index: DashMap<Uuid, (String, GridCell, Direction)>,
    stats: DashMap<String, RouteStats>,
}

impl RouteReservoir {
    pub fn new(cell_size_degrees: f64) -> Self {
        Self {
            cell_size_degrees,
            cells: DashMap::new(),
            index: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Appends a ROUTE-kind passenger to the cell its origin falls in.
    /// Direction is immutable once spawned, per spec §4.4.
    pub async fn spawn(&self, passenger: Passenger) -> Result<(), CoreError> {
        if passenger.kind != SpawnKind::Route {
            return Err(CoreError::validation("RouteReservoir::spawn requires SpawnKind::Route"));
        }
        if self.index.contains_key(&passenger.id) {
            warn!(passenger_id = %passenger.id, "duplicate route spawn ignored");
            return Ok(());
        }

        let cell = cell_for(passenger.origin, self.cell_size_degrees);
        let key = (passenger.route_id.clone(), cell);
        let direction = passenger.direction;
        let bucket = self.cells.entry(key.clone()).or_default();
        bucket.list_for(direction).lock().await.push(passenger.clone());
        drop(bucket);

        self.index.insert(passenger.id, (key.0, key.1, direction));
        self.stats
            .entry(passenger.route_id.clone())
            .or_default()
            .spawned
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Enumerates cells whose bbox intersects the query circle, filters by
    /// direction, sorts by haversine distance ascending (ties: higher
    /// priority, then earlier spawn_time), and returns the top
    /// `max_count`.
    pub async fn query(
        &self,
        route_id: &str,
        vehicle_position: Point,
        direction: Direction,
        max_distance_m: f64,
        max_count: usize,
    ) -> Vec<Passenger> {
        let query_bbox = crate::geo_types::BoundingBox::around_circle(vehicle_position, max_distance_m);
        let mut candidates: Vec<Passenger> = Vec::new();

        for entry in self.cells.iter() {
            let (r, cell) = entry.key();
            if r != route_id {
                continue;
            }
            if !cell_bbox_intersects(*cell, self.cell_size_degrees, &query_bbox) {
                continue;
            }
            let list = entry.value().list_for(direction).lock().await;
            for passenger in list.iter() {
                let distance = crate::geometry::haversine_distance_m(vehicle_position, passenger.origin);
                if distance <= max_distance_m {
                    candidates.push(passenger.clone());
                }
            }
        }

        candidates.sort_by(|a, b| {
            let da = crate::geometry::haversine_distance_m(vehicle_position, a.origin);
            let db = crate::geometry::haversine_distance_m(vehicle_position, b.origin);
            da.total_cmp(&db)
                .then_with(|| b.priority.total_cmp(&a.priority))
                .then_with(|| a.spawn_time.cmp(&b.spawn_time))
        });
        candidates.truncate(max_count);
        candidates
    }

    pub async fn mark_picked_up(
        &self,
        passenger_id: Uuid,
        vehicle_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Passenger, CoreError> {
        let Some(entry) = self.index.get(&passenger_id).map(|e| e.clone()) else {
            return Err(CoreError::not_found(format!("passenger {passenger_id}")));
        };
        let (route_id, cell, direction) = entry;
        let Some(bucket) = self.cells.get(&(route_id.clone(), cell)) else {
            return Err(CoreError::not_found(format!("passenger {passenger_id}")));
        };
        let mut list = bucket.list_for(direction).lock().await;
        let position = list
            .iter()
            .position(|p| p.id == passenger_id)
            .ok_or_else(|| CoreError::state(format!("passenger {passenger_id} not waiting in cell")))?;
        let mut passenger = list.remove(position);
        drop(list);
        drop(bucket);

        self.index.remove(&passenger_id);
        passenger.status = PassengerStatus::Onboard;
        passenger.assigned_vehicle = Some(vehicle_id.to_string());
        passenger.updated_at = now;
        self.stats.entry(route_id).or_default().picked_up.fetch_add(1, Ordering::Relaxed);
        Ok(passenger)
    }

    pub async fn expire_pass(&self, now: DateTime<Utc>) -> Vec<Passenger> {
        let mut expired = Vec::new();
        for entry in self.cells.iter() {
            let (route_id, _cell) = entry.key().clone();
            let bucket = entry.value();
            for direction in [Direction::Outbound, Direction::Inbound] {
                let mut list = bucket.list_for(direction).lock().await;
                let mut i = 0;
                while i < list.len() {
                    if list[i].is_expired_at(now) {
                        let mut p = list.remove(i);
                        p.status = PassengerStatus::Expired;
                        p.updated_at = now;
                        self.stats.entry(route_id.clone()).or_default().expired.fetch_add(1, Ordering::Relaxed);
                        expired.push(p);
                    } else {
                        i += 1;
                    }
                }
            }
        }
        for p in &expired {
            self.index.remove(&p.id);
        }
        expired
    }
}

fn cell_bbox_intersects(cell: GridCell, cell_size_degrees: f64, query: &crate::geo_types::BoundingBox) -> bool {
    let min_lat = cell.0 as f64 * cell_size_degrees;
    let min_lon = cell.1 as f64 * cell_size_degrees;
    let cell_bbox = crate::geo_types::BoundingBox {
        min_lat,
        min_lon,
        max_lat: min_lat + cell_size_degrees,
        max_lon: min_lon + cell_size_degrees,
    };
    cell_bbox.intersects(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_passenger(route_id: &str, direction: Direction, origin: Point) -> Passenger {
        let now = Utc::now();
        Passenger {
            id: Uuid::new_v4(),
            origin,
            destination: Point::new(1.0, 1.0),
            route_id: route_id.to_string(),
            direction,
            priority: 0.5,
            spawn_time: now,
            expiry_time: now + chrono::Duration::minutes(20),
            status: PassengerStatus::Waiting,
            assigned_vehicle: None,
            depot_id: None,
            kind: SpawnKind::Route,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn scenario_b_route_direction_filter() {
        let reservoir = RouteReservoir::new(0.01);
        let pa = route_passenger("R2", Direction::Outbound, Point::new(0.000, 0.000));
        let pb = route_passenger("R2", Direction::Inbound, Point::new(0.000, 0.001));
        let id_a = pa.id;
        reservoir.spawn(pa).await.unwrap();
        reservoir.spawn(pb).await.unwrap();

        let results = reservoir
            .query("R2", Point::new(0.000, 0.000), Direction::Outbound, 200.0, 10)
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id_a);
    }

    #[tokio::test]
    async fn query_outside_radius_returns_empty() {
        let reservoir = RouteReservoir::new(0.01);
        let p = route_passenger("R1", Direction::Outbound, Point::new(10.0, 10.0));
        reservoir.spawn(p).await.unwrap();
        let results = reservoir
            .query("R1", Point::new(0.0, 0.0), Direction::Outbound, 200.0, 10)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn ties_broken_by_priority_then_spawn_time() {
        let reservoir = RouteReservoir::new(0.01);
        let origin = Point::new(0.0, 0.0);
        let mut low_priority_earlier = route_passenger("R1", Direction::Outbound, origin);
        low_priority_earlier.priority = 0.2;
        let mut high_priority_later = route_passenger("R1", Direction::Outbound, origin);
        high_priority_later.priority = 0.9;
        high_priority_later.spawn_time = low_priority_earlier.spawn_time + chrono::Duration::seconds(5);
        let high_id = high_priority_later.id;

        reservoir.spawn(low_priority_earlier).await.unwrap();
        reservoir.spawn(high_priority_later).await.unwrap();

        let results = reservoir.query("R1", origin, Direction::Outbound, 50.0, 10).await;
        assert_eq!(results[0].id, high_id);
    }
}
