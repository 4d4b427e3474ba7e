//! commuter_core — the coordination backbone of a public-transit
//! simulator: demand synthesis, capacity-bounded reservoirs, spatial
//! awareness, and the per-vehicle conductor state machine.
//!
//! This crate is a library only; it has no opinion on how a process wires
//! these pieces together beyond the `init_tracing` / `init_metrics` helpers
//! below. See `DESIGN.md` for how each module grounds in the stack this
//! crate was built from.

pub mod cms_client;
pub mod conductor;
pub mod config;
pub mod demand;
pub mod errors;
pub mod expiration;
pub mod geo_cache;
pub mod geo_types;
pub mod geometry;
pub mod hub;
pub mod location;
pub mod log_format;
pub mod metrics;
pub mod passenger;
pub mod passenger_store;
pub mod reservoir;
pub mod schema;
pub mod telemetry_client;
pub mod vehicle;
pub mod web;

pub use cms_client::{CmsClient, HttpCmsClient};
pub use conductor::ConductorRegistry;
pub use config::ConfigurationService;
pub use demand::DemandGenerator;
pub use errors::CoreError;
pub use geo_cache::GeoCache;
pub use hub::MessageHub;
pub use location::LocationService;
pub use passenger::Passenger;
pub use passenger_store::PassengerStore;
pub use reservoir::{DepotReservoir, RouteReservoir};
pub use vehicle::Vehicle;

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber using `TargetFirstFormat`, reading the
/// filter from `RUST_LOG` (defaulting to `info`). Call once at process
/// startup; a second call is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(log_format::TargetFirstFormat)
        .try_init();
}
