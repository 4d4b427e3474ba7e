//! The `Passenger` entity and its lifecycle, per spec §3.
//!
//! A passenger is created by `DemandGenerator` as a `SpawnRequest`, owned by
//! exactly one reservoir while `WAITING` (invariant 1), transferred to a
//! vehicle's onboard set when picked up, and finally logged as `ALIGHTED` or
//! `EXPIRED` in `PassengerStore`. Per spec §9's open question, `ONBOARD`
//! passengers are not subject to `expiry_time` — only `WAITING` ones are.

use crate::geo_types::{Direction, Point};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Lifecycle status of a passenger, per spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PassengerStatus {
    Waiting,
    Onboard,
    Alighted,
    Expired,
}

/// Whether a spawn request originates at a depot (FIFO reservoir) or along a
/// route path (grid reservoir), per spec §4.2/§4.3/§4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SpawnKind {
    Depot,
    Route,
}

/// A single passenger, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Passenger {
    pub id: Uuid,
    pub origin: Point,
    pub destination: Point,
    pub route_id: String,
    pub direction: Direction,
    /// In `[0, 1]`. Used as a tie-break in `RouteReservoir::query`, per spec §4.4.
    pub priority: f64,
    pub spawn_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub status: PassengerStatus,
    pub assigned_vehicle: Option<String>,
    pub depot_id: Option<String>,
    pub kind: SpawnKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Passenger {
    pub fn is_waiting(&self) -> bool {
        self.status == PassengerStatus::Waiting
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.is_waiting() && now >= self.expiry_time
    }
}

/// Output of `DemandGenerator::tick`, per spec §4.2. Not yet a `Passenger` —
/// the reservoir that accepts it assigns `id`/`spawn_time`/`expiry_time` and
/// produces the persisted entity.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SpawnRequest {
    pub origin: Point,
    pub destination: Point,
    pub route_id: String,
    pub direction: Direction,
    pub priority: f64,
    pub kind: SpawnKind,
    pub depot_id: Option<String>,
    /// Reported for downstream accounting, per spec §4.2.
    pub peak_hour: bool,
}

impl SpawnRequest {
    /// Materialize a `Passenger` with a fresh id and the given wait window.
    pub fn into_passenger(self, now: DateTime<Utc>, max_wait: chrono::Duration) -> Passenger {
        Passenger {
            id: Uuid::new_v4(),
            origin: self.origin,
            destination: self.destination,
            route_id: self.route_id,
            direction: self.direction,
            priority: self.priority,
            spawn_time: now,
            expiry_time: now + max_wait,
            status: PassengerStatus::Waiting,
            assigned_vehicle: None,
            depot_id: self.depot_id,
            kind: self.kind,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passenger(status: PassengerStatus, expiry_offset_secs: i64) -> Passenger {
        let now = Utc::now();
        Passenger {
            id: Uuid::new_v4(),
            origin: Point::new(0.0, 0.0),
            destination: Point::new(0.0, 1.0),
            route_id: "route-1".into(),
            direction: Direction::Outbound,
            priority: 0.5,
            spawn_time: now,
            expiry_time: now + chrono::Duration::seconds(expiry_offset_secs),
            status,
            assigned_vehicle: None,
            depot_id: None,
            kind: SpawnKind::Route,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn waiting_passenger_past_expiry_is_expired() {
        let p = passenger(PassengerStatus::Waiting, -1);
        assert!(p.is_expired_at(Utc::now()));
    }

    #[test]
    fn onboard_passenger_is_never_expired() {
        let p = passenger(PassengerStatus::Onboard, -1);
        assert!(!p.is_expired_at(Utc::now()));
    }

    #[test]
    fn spawn_request_materializes_waiting_passenger() {
        let req = SpawnRequest {
            origin: Point::new(0.0, 0.0),
            destination: Point::new(0.0, 1.0),
            route_id: "route-1".into(),
            direction: Direction::Outbound,
            priority: 0.7,
            kind: SpawnKind::Route,
            depot_id: None,
            peak_hour: true,
        };
        let now = Utc::now();
        let p = req.into_passenger(now, chrono::Duration::minutes(20));
        assert_eq!(p.status, PassengerStatus::Waiting);
        assert_eq!(p.expiry_time, now + chrono::Duration::minutes(20));
    }
}
