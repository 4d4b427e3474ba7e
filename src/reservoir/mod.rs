//! In-memory WAITING-passenger containers, per spec §4.3/§4.4.
//!
//! A passenger lives in exactly one of these at a time (spec §3 invariant
//! 1): `DepotReservoir` for DEPOT-kind spawns, `RouteReservoir` for
//! ROUTE-kind. Both return the passengers they admit/evict/pick up rather
//! than publishing hub events themselves; the composition root forwards
//! those to the `MessageHub`.

pub mod depot;
pub mod route;

pub use depot::DepotReservoir;
pub use route::RouteReservoir;
