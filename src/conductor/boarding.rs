//! Atomic boarding/alighting for the BOARDING state of spec §4.6.
//!
//! `board_candidates` enforces capacity by stopping the moment
//! `vehicle.has_room()` is false — Scenario C's "book what fits; leftovers
//! stay in reservoir" — and `alight_eligible` sweeps onboard passengers
//! whose destination has come within `alight_radius_m`.

use crate::geo_types::Point;
use crate::passenger::{Passenger, PassengerStatus, SpawnKind};
use crate::reservoir::{DepotReservoir, RouteReservoir};
use crate::vehicle::Vehicle;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

/// Attempts to board each candidate in order, stopping as soon as the
/// vehicle is full. Already-picked-up passengers are appended to
/// `onboard_passengers` so a later `alight_eligible` call can test their
/// destination.
pub async fn board_candidates(
    vehicle: &mut Vehicle,
    onboard_passengers: &mut HashMap<Uuid, Passenger>,
    candidates: Vec<Passenger>,
    depot_reservoir: &DepotReservoir,
    route_reservoir: &RouteReservoir,
    now: DateTime<Utc>,
) -> Vec<Passenger> {
    let mut boarded = Vec::new();
    for candidate in candidates {
        if !vehicle.has_room() {
            break;
        }
        let picked_up = match candidate.kind {
            SpawnKind::Depot => depot_reservoir.mark_picked_up(candidate.id, &vehicle.id, now).await,
            SpawnKind::Route => route_reservoir.mark_picked_up(candidate.id, &vehicle.id, now).await,
        };
        match picked_up {
            Ok(passenger) => match vehicle.board(passenger.id) {
                Ok(()) => {
                    onboard_passengers.insert(passenger.id, passenger.clone());
                    boarded.push(passenger);
                }
                Err(e) => warn!(passenger_id = %passenger.id, error = %e, "board rejected after pickup, vehicle reported full"),
            },
            Err(e) => {
                warn!(passenger_id = %candidate.id, error = %e, "candidate no longer available for pickup");
            }
        }
    }
    boarded
}

/// Removes every onboard passenger whose destination is within
/// `alight_radius_m` of `vehicle_position`, marking them ALIGHTED.
pub fn alight_eligible(
    vehicle: &mut Vehicle,
    onboard_passengers: &mut HashMap<Uuid, Passenger>,
    vehicle_position: Point,
    alight_radius_m: f64,
    now: DateTime<Utc>,
) -> Vec<Passenger> {
    let due: Vec<Uuid> = onboard_passengers
        .iter()
        .filter(|(_, p)| crate::geometry::haversine_distance_m(vehicle_position, p.destination) <= alight_radius_m)
        .map(|(id, _)| *id)
        .collect();

    let mut alighted = Vec::with_capacity(due.len());
    for id in due {
        vehicle.alight(id);
        if let Some(mut passenger) = onboard_passengers.remove(&id) {
            passenger.status = PassengerStatus::Alighted;
            passenger.updated_at = now;
            alighted.push(passenger);
        }
    }
    alighted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_types::Direction;

    fn waiting_passenger(origin: Point, destination: Point, kind: SpawnKind) -> Passenger {
        let now = Utc::now();
        Passenger {
            id: Uuid::new_v4(),
            origin,
            destination,
            route_id: "route-1".into(),
            direction: Direction::Outbound,
            priority: 0.5,
            spawn_time: now,
            expiry_time: now + chrono::Duration::minutes(20),
            status: PassengerStatus::Waiting,
            assigned_vehicle: None,
            depot_id: None,
            kind,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn scenario_c_capacity_exhaustion_boards_exactly_capacity() {
        let route_reservoir = RouteReservoir::new(0.01);
        let depot_reservoir = DepotReservoir::default();
        let origin = Point::new(0.0, 0.0);
        let mut candidates = Vec::new();
        for _ in 0..5 {
            let p = waiting_passenger(origin, Point::new(1.0, 1.0), SpawnKind::Route);
            route_reservoir.spawn(p.clone()).await.unwrap();
            candidates.push(p);
        }

        let mut vehicle = Vehicle::new("v1", "route-1", Direction::Outbound, 3, origin);
        let mut onboard_passengers = HashMap::new();
        let boarded = board_candidates(
            &mut vehicle,
            &mut onboard_passengers,
            candidates,
            &depot_reservoir,
            &route_reservoir,
            Utc::now(),
        )
        .await;

        assert_eq!(boarded.len(), 3);
        assert_eq!(vehicle.onboard.len(), 3);
        assert!(!vehicle.has_room());

        let remaining = route_reservoir
            .query("route-1", origin, Direction::Outbound, 100.0, 10)
            .await;
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn alight_eligible_removes_only_passengers_within_radius() {
        let mut vehicle = Vehicle::new("v1", "route-1", Direction::Outbound, 4, Point::new(0.0, 0.0));
        let mut onboard_passengers = HashMap::new();
        let near = waiting_passenger(Point::new(0.0, 0.0), Point::new(0.0005, 0.0005), SpawnKind::Route);
        let far = waiting_passenger(Point::new(0.0, 0.0), Point::new(5.0, 5.0), SpawnKind::Route);
        vehicle.board(near.id).unwrap();
        vehicle.board(far.id).unwrap();
        onboard_passengers.insert(near.id, near.clone());
        onboard_passengers.insert(far.id, far.clone());

        let alighted = alight_eligible(&mut vehicle, &mut onboard_passengers, Point::new(0.0, 0.0), 100.0, Utc::now());

        assert_eq!(alighted.len(), 1);
        assert_eq!(alighted[0].id, near.id);
        assert_eq!(vehicle.onboard, vec![far.id]);
        assert!(onboard_passengers.contains_key(&far.id));
        assert!(!onboard_passengers.contains_key(&near.id));
    }
}
