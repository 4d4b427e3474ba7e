//! `DepotReservoir` — FIFO queue per `(depot_id, route_id)`, per spec §4.3.
//!
//! One `DashMap` entry per queue gives each `(depot_id, route_id)` pair its
//! own lock, the same per-key concurrency shape `AircraftLocksMap` gives
//! each aircraft in the teacher's flight tracker. Queue creation is the
//! `DashMap::entry` get-or-insert, which stands in for the spec's "global
//! RW-lock guards queue creation" — `DashMap` already shards its internal
//! locking so a creation in one queue never blocks a mutation in another.
//!
//! Reservoirs do not hold a hub handle (spec §9, "break the cycle with an
//! explicit hub boundary"): `spawn`/`mark_picked_up`/`expire_pass` return
//! the passengers affected, and the caller is responsible for publishing
//! the corresponding `passenger:*` event to the `MessageHub`.

use crate::errors::CoreError;
use crate::geo_types::Point;
use crate::passenger::{Passenger, PassengerStatus, SpawnKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

type QueueKey = (String, String);

#[derive(Debug, Default)]
pub struct QueueStats {
    pub spawned: AtomicU64,
    pub picked_up: AtomicU64,
    pub expired: AtomicU64,
}

struct Queue {
    passengers: Mutex<VecDeque<Passenger>>,
    stats: QueueStats,
}

/// FIFO reservoir of WAITING passengers spawned at depots.
#[derive(Default)]
pub struct DepotReservoir {
    queues: DashMap<QueueKey, Arc<Queue>>,
    index: DashMap<Uuid, QueueKey>,
}

impl DepotReservoir {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_for(&self, key: &QueueKey) -> Arc<Queue> {
        self.queues
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(Queue {
                    passengers: Mutex::new(VecDeque::new()),
                    stats: QueueStats::default(),
                })
            })
            .clone()
    }

    /// Appends `passenger` to the FIFO for `(depot_id, route_id)`. On
    /// overflow past `max_queue_capacity`, force-expires the oldest WAITING
    /// passenger and returns it so the caller can emit `passenger:expired`.
    ///
    /// A duplicate id is an idempotent no-op (spec §4.3 failure semantics).
    pub async fn spawn(
        &self,
        passenger: Passenger,
        max_queue_capacity: usize,
    ) -> Result<Option<Passenger>, CoreError> {
        if passenger.kind != SpawnKind::Depot {
            return Err(CoreError::validation("DepotReservoir::spawn requires SpawnKind::Depot"));
        }
        let Some(depot_id) = passenger.depot_id.clone() else {
            return Err(CoreError::validation("depot passenger missing depot_id"));
        };
        if self.index.contains_key(&passenger.id) {
            warn!(passenger_id = %passenger.id, "duplicate depot spawn ignored");
            return Ok(None);
        }

        let key = (depot_id, passenger.route_id.clone());
        let queue = self.queue_for(&key);
        let mut guard = queue.passengers.lock().await;

        let mut overflowed = None;
        if guard.len() >= max_queue_capacity {
            if let Some(mut oldest) = guard.pop_front() {
                self.index.remove(&oldest.id);
                oldest.status = PassengerStatus::Expired;
                queue.stats.expired.fetch_add(1, Ordering::Relaxed);
                overflowed = Some(oldest);
            }
        }

        guard.push_back(passenger.clone());
        drop(guard);

        self.index.insert(passenger.id, key);
        queue.stats.spawned.fetch_add(1, Ordering::Relaxed);
        Ok(overflowed)
    }

    /// Up to `max_count` passengers from the head of the queue within
    /// `max_distance_m` of `vehicle_position`. Depot queues are
    /// effectively co-located so this filter is typically trivial, but
    /// it's still applied per spec §4.3.
    pub async fn query(
        &self,
        depot_id: &str,
        route_id: &str,
        vehicle_position: Point,
        max_distance_m: f64,
        max_count: usize,
    ) -> Vec<Passenger> {
        let key = (depot_id.to_string(), route_id.to_string());
        let Some(queue) = self.queues.get(&key) else {
            return Vec::new();
        };
        let guard = queue.passengers.lock().await;
        guard
            .iter()
            .filter(|p| crate::geometry::haversine_distance_m(vehicle_position, p.origin) <= max_distance_m)
            .take(max_count)
            .cloned()
            .collect()
    }

    /// Removes `passenger_id` from its queue and transitions it to
    /// ONBOARD. Errors with `NotFound` if the passenger isn't WAITING in
    /// any depot queue known to this reservoir.
    pub async fn mark_picked_up(
        &self,
        passenger_id: Uuid,
        vehicle_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Passenger, CoreError> {
        let Some(key) = self.index.get(&passenger_id).map(|entry| entry.clone()) else {
            return Err(CoreError::not_found(format!("passenger {passenger_id}")));
        };
        let queue = self.queue_for(&key);
        let mut guard = queue.passengers.lock().await;
        let position = guard
            .iter()
            .position(|p| p.id == passenger_id)
            .ok_or_else(|| CoreError::state(format!("passenger {passenger_id} not waiting in queue")))?;
        let mut passenger = guard.remove(position).expect("position just located");
        drop(guard);

        self.index.remove(&passenger_id);
        passenger.status = PassengerStatus::Onboard;
        passenger.assigned_vehicle = Some(vehicle_id.to_string());
        passenger.updated_at = now;
        queue.stats.picked_up.fetch_add(1, Ordering::Relaxed);
        Ok(passenger)
    }

    /// Sweeps every queue, removing and returning WAITING passengers whose
    /// `expiry_time` has passed.
    pub async fn expire_pass(&self, now: DateTime<Utc>) -> Vec<Passenger> {
        let mut expired = Vec::new();
        for entry in self.queues.iter() {
            let queue = entry.value().clone();
            let mut guard = queue.passengers.lock().await;
            let mut i = 0;
            while i < guard.len() {
                if guard[i].is_expired_at(now) {
                    let mut p = guard.remove(i).expect("index within bounds");
                    p.status = PassengerStatus::Expired;
                    p.updated_at = now;
                    queue.stats.expired.fetch_add(1, Ordering::Relaxed);
                    expired.push(p);
                } else {
                    i += 1;
                }
            }
        }
        for p in &expired {
            self.index.remove(&p.id);
        }
        expired
    }

    pub fn queue_len(&self, depot_id: &str, route_id: &str) -> usize {
        self.queues
            .get(&(depot_id.to_string(), route_id.to_string()))
            .map(|q| q.passengers.try_lock().map(|g| g.len()).unwrap_or(0))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_types::Direction;

    fn waiting_passenger(depot_id: &str, route_id: &str, spawn_offset_secs: i64) -> Passenger {
        let now = Utc::now();
        Passenger {
            id: Uuid::new_v4(),
            origin: Point::new(0.0, 0.0),
            destination: Point::new(0.0, 1.0),
            route_id: route_id.to_string(),
            direction: Direction::Outbound,
            priority: 0.5,
            spawn_time: now + chrono::Duration::seconds(spawn_offset_secs),
            expiry_time: now + chrono::Duration::minutes(20),
            status: PassengerStatus::Waiting,
            assigned_vehicle: None,
            depot_id: Some(depot_id.to_string()),
            kind: SpawnKind::Depot,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn scenario_a_depot_fifo_capacity_two() {
        let reservoir = DepotReservoir::new();
        let p1 = waiting_passenger("D1", "R1", 0);
        let p2 = waiting_passenger("D1", "R1", 1);
        let p3 = waiting_passenger("D1", "R1", 2);
        let (id1, id2, id3) = (p1.id, p2.id, p3.id);

        reservoir.spawn(p1, 50).await.unwrap();
        reservoir.spawn(p2, 50).await.unwrap();
        reservoir.spawn(p3, 50).await.unwrap();

        let candidates = reservoir.query("D1", "R1", Point::new(0.0, 0.0), 1000.0, 2).await;
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].id, id1);
        assert_eq!(candidates[1].id, id2);

        for candidate in &candidates {
            reservoir.mark_picked_up(candidate.id, "V1", Utc::now()).await.unwrap();
        }

        let remaining = reservoir.query("D1", "R1", Point::new(0.0, 0.0), 1000.0, 10).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, id3);
    }

    #[tokio::test]
    async fn duplicate_spawn_is_idempotent() {
        let reservoir = DepotReservoir::new();
        let p = waiting_passenger("D1", "R1", 0);
        let p_clone = p.clone();
        assert!(reservoir.spawn(p, 50).await.unwrap().is_none());
        assert!(reservoir.spawn(p_clone, 50).await.unwrap().is_none());
        assert_eq!(reservoir.queue_len("D1", "R1"), 1);
    }

    #[tokio::test]
    async fn overflow_force_expires_oldest() {
        let reservoir = DepotReservoir::new();
        let p1 = waiting_passenger("D1", "R1", 0);
        let p2 = waiting_passenger("D1", "R1", 1);
        let id1 = p1.id;
        reservoir.spawn(p1, 1).await.unwrap();
        let overflowed = reservoir.spawn(p2, 1).await.unwrap();
        assert_eq!(overflowed.map(|p| p.id), Some(id1));
        assert_eq!(reservoir.queue_len("D1", "R1"), 1);
    }

    #[tokio::test]
    async fn mark_picked_up_unknown_id_is_not_found() {
        let reservoir = DepotReservoir::new();
        let err = reservoir.mark_picked_up(Uuid::new_v4(), "V1", Utc::now()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn expire_pass_removes_past_expiry_waiting_passengers() {
        let reservoir = DepotReservoir::new();
        let mut p = waiting_passenger("D1", "R1", 0);
        p.expiry_time = Utc::now() - chrono::Duration::seconds(1);
        let id = p.id;
        reservoir.spawn(p, 50).await.unwrap();

        let expired = reservoir.expire_pass(Utc::now()).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, id);
        assert_eq!(reservoir.queue_len("D1", "R1"), 0);
    }
}
