//! Pure predicates and transition math for the per-vehicle conductor loop,
//! per spec §4.6.
//!
//! Grounded on `state_transitions.rs`'s `should_be_active(fix) -> bool`
//! shape: small, side-effect-free functions the stateful loop in `mod.rs`
//! calls rather than inlining the logic.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use ts_rs::TS;

/// The four states of spec §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum ConductorMode {
    Cruising,
    StopRequested,
    Boarding,
    ReadyToDepart,
}

/// True when CRUISING should transition to STOP_REQUESTED: candidates were
/// found and the vehicle isn't already full.
pub fn should_request_stop(candidates_available: bool, onboard: usize, capacity: usize) -> bool {
    candidates_available && onboard < capacity
}

/// `stop_duration = clamp(base + boarding_time*boarding_count +
/// alighting_time*alighting_count, min_stop, max_stop)`.
pub fn compute_stop_duration(
    base: Duration,
    per_passenger_boarding: Duration,
    per_passenger_alighting: Duration,
    boarding_count: usize,
    alighting_count: usize,
    min_stop: Duration,
    max_stop: Duration,
) -> Duration {
    let total = base
        + per_passenger_boarding.saturating_mul(boarding_count as u32)
        + per_passenger_alighting.saturating_mul(alighting_count as u32);
    total.clamp(min_stop, max_stop)
}

/// True once boarding has filled the vehicle, per spec §4.6's "stop
/// boarding immediately" early-exit.
pub fn boarding_is_full(onboard: usize, capacity: usize) -> bool {
    onboard >= capacity
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_duration_clamps_to_minimum() {
        let d = compute_stop_duration(
            Duration::from_secs(0),
            Duration::from_secs(4),
            Duration::from_secs(3),
            0,
            0,
            Duration::from_secs(10),
            Duration::from_secs(90),
        );
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn stop_duration_clamps_to_maximum() {
        let d = compute_stop_duration(
            Duration::from_secs(0),
            Duration::from_secs(4),
            Duration::from_secs(3),
            50,
            50,
            Duration::from_secs(10),
            Duration::from_secs(90),
        );
        assert_eq!(d, Duration::from_secs(90));
    }

    #[test]
    fn stop_duration_within_bounds_is_exact() {
        let d = compute_stop_duration(
            Duration::from_secs(5),
            Duration::from_secs(4),
            Duration::from_secs(3),
            2,
            1,
            Duration::from_secs(10),
            Duration::from_secs(90),
        );
        assert_eq!(d, Duration::from_secs(5 + 8 + 3));
    }

    #[test]
    fn stop_is_requested_only_with_room() {
        assert!(should_request_stop(true, 2, 4));
        assert!(!should_request_stop(true, 4, 4));
        assert!(!should_request_stop(false, 0, 4));
    }

    #[test]
    fn zero_capacity_vehicle_is_always_full() {
        assert!(boarding_is_full(0, 0));
    }
}
