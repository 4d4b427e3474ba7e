//! Expiration sweeper — the long-lived task named in spec §5's concurrency
//! model ("one per reservoir expiration sweeper"), wiring the reservoirs'
//! in-memory `expire_pass` to the durable record and the message fabric.
//!
//! Reservoirs return the passengers an `expire_pass` removed rather than
//! publishing anything themselves (spec §9, "break the cycle with an
//! explicit hub boundary"); this module is the caller that does the
//! publishing, modeled on `GeoCache::spawn_refresh_loop`'s
//! `tokio::select!` shape for a periodic task raced against shutdown.
//!
//! `PassengerStore::delete_expired` is swept on the same tick: per spec
//! §4.8 a restart loses all in-memory reservoir state, so any `WAITING`
//! row left behind by a crashed process is only caught here, not by a
//! reservoir that no longer exists.

use crate::hub::{Envelope, MessageHub, Namespace, envelope::events};
use crate::passenger::{Passenger, PassengerStatus};
use crate::passenger_store::PassengerStore;
use crate::reservoir::depot::DepotReservoir;
use crate::reservoir::route::RouteReservoir;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn expired_envelope(passenger: &Passenger) -> Envelope {
    Envelope::new(
        events::PASSENGER_EXPIRED,
        "expiration-sweeper",
        json!({
            "passenger_id": passenger.id,
            "route_id": passenger.route_id,
            "depot_id": passenger.depot_id,
            "expiry_time": passenger.expiry_time,
        }),
    )
}

/// Runs one expiration pass: drains both reservoirs, publishes
/// `passenger:expired` for each removed passenger, and writes their final
/// status to `store` if one is configured. Returns the number of
/// passengers expired this pass.
pub async fn run_once(
    depot_reservoir: &DepotReservoir,
    route_reservoir: &RouteReservoir,
    hub: &MessageHub,
    store: Option<&PassengerStore>,
) -> usize {
    let now = Utc::now();
    let mut expired = depot_reservoir.expire_pass(now).await;
    expired.extend(route_reservoir.expire_pass(now).await);

    for passenger in &expired {
        hub.publish(Namespace::System, expired_envelope(passenger)).await;
        metrics::counter!("commuter.reservoir.passengers_expired_total").increment(1);

        if let Some(store) = store
            && let Err(e) = store.mark(passenger.id, PassengerStatus::Expired, now).await
        {
            warn!(
                passenger_id = %passenger.id,
                error = %e,
                "failed to persist expired passenger status"
            );
        }
    }

    // Restart-recovery: catch any WAITING row orphaned by a process that
    // crashed with live reservoirs it will never rebuild.
    if let Some(store) = store
        && let Err(e) = store.delete_expired(now).await
    {
        warn!(error = %e, "passenger store expiration sweep failed");
    }

    if !expired.is_empty() {
        info!(count = expired.len(), "expiration sweep removed passengers");
    }
    expired.len()
}

/// Spawn the periodic expiration sweeper. Runs until `shutdown` fires.
/// `interval` is typically `config::defaults::EXPIRATION_CHECK_INTERVAL_SECONDS`.
pub fn spawn_sweeper(
    depot_reservoir: Arc<DepotReservoir>,
    route_reservoir: Arc<RouteReservoir>,
    hub: MessageHub,
    store: Option<PassengerStore>,
    interval: Duration,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("expiration sweeper shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    run_once(&depot_reservoir, &route_reservoir, &hub, store.as_ref()).await;
                }
            }
        }
    })
}
