//! `Vehicle` — the authoritative, externally-managed record a `Conductor`
//! reads capacity and position from.
//!
//! Per spec §9's open question, conflicting hardcoded capacities (11, 30,
//! 40) existed across layers in the source; here capacity lives on exactly
//! one record and nowhere else. The core never originates a `Vehicle` — it
//! is observed through `vehicle:position` updates on the hub and mutated
//! only by `mark_picked_up`/alighting inside the conductor's per-vehicle
//! lock (spec §5, "Vehicle onboard set and capacity checks").

use crate::geo_types::{Direction, Point};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    On,
    Off,
}

/// A vehicle as observed by the core, per spec §3.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Vehicle {
    pub id: String,
    pub route_id: String,
    pub direction: Direction,
    pub capacity: usize,
    pub current_position: Point,
    pub engine_state: EngineState,
    pub onboard: Vec<Uuid>,
}

impl Vehicle {
    pub fn new(id: impl Into<String>, route_id: impl Into<String>, direction: Direction, capacity: usize, position: Point) -> Self {
        Self {
            id: id.into(),
            route_id: route_id.into(),
            direction,
            capacity,
            current_position: position,
            engine_state: EngineState::Off,
            onboard: Vec::new(),
        }
    }

    pub fn has_room(&self) -> bool {
        self.onboard.len() < self.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.onboard.len())
    }

    /// Adds a passenger to the onboard set, enforcing invariant 2 from spec
    /// §3: `onboard.size <= capacity` must never be exceeded.
    pub fn board(&mut self, passenger_id: Uuid) -> Result<(), crate::errors::CoreError> {
        if !self.has_room() {
            return Err(crate::errors::CoreError::CapacityExceeded(format!(
                "vehicle {} is at capacity {}",
                self.id, self.capacity
            )));
        }
        self.onboard.push(passenger_id);
        Ok(())
    }

    pub fn alight(&mut self, passenger_id: Uuid) -> bool {
        let before = self.onboard.len();
        self.onboard.retain(|id| *id != passenger_id);
        self.onboard.len() != before
    }

    pub fn update_position(&mut self, position: Point) {
        self.current_position = position;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boarding_respects_capacity() {
        let mut v = Vehicle::new("v1", "route-1", Direction::Outbound, 1, Point::new(0.0, 0.0));
        assert!(v.board(Uuid::new_v4()).is_ok());
        assert!(v.board(Uuid::new_v4()).is_err());
    }

    #[test]
    fn zero_capacity_vehicle_never_has_room() {
        let v = Vehicle::new("v1", "route-1", Direction::Outbound, 0, Point::new(0.0, 0.0));
        assert!(!v.has_room());
    }

    #[test]
    fn alight_removes_passenger() {
        let mut v = Vehicle::new("v1", "route-1", Direction::Outbound, 4, Point::new(0.0, 0.0));
        let pid = Uuid::new_v4();
        v.board(pid).unwrap();
        assert!(v.alight(pid));
        assert!(!v.alight(pid));
    }
}
