//! `GeoCache` — loads zones, POIs, routes, depots, and geofences from the
//! CMS and serves them as an immutable snapshot, refreshed on an interval.
//!
//! The snapshot-swap idiom (build the new value fully, then publish it
//! behind a single `ArcSwap`-style pointer) is the same one the teacher
//! stack uses for in-memory reference data that's cheap to rebuild and
//! expensive to lock on every read.

use crate::cms_client::CmsClient;
use crate::geo_types::{Depot, Geofence, Place, Poi, Route, VehicleRecord, Zone};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// A fully-loaded, immutable view of geographic reference data.
#[derive(Debug, Default)]
pub struct GeoCacheSnapshot {
    pub zones: HashMap<String, Zone>,
    pub pois: HashMap<String, Poi>,
    pub places: HashMap<String, Place>,
    pub routes: HashMap<String, Route>,
    pub depots: HashMap<String, Depot>,
    pub geofences: HashMap<String, Geofence>,
    pub vehicles: HashMap<String, VehicleRecord>,
}

impl GeoCacheSnapshot {
    fn from_loaded(
        zones: Vec<Zone>,
        pois: Vec<Poi>,
        places: Vec<Place>,
        routes: Vec<Route>,
        depots: Vec<Depot>,
        geofences: Vec<Geofence>,
        vehicles: Vec<VehicleRecord>,
    ) -> Self {
        let mut valid_geofences = HashMap::with_capacity(geofences.len());
        for g in geofences {
            match g.validate() {
                Ok(()) => {
                    valid_geofences.insert(g.id.clone(), g);
                }
                Err(e) => warn!(geofence_id = %g.id, error = %e, "dropping invalid geofence"),
            }
        }
        Self {
            zones: zones.into_iter().map(|z| (z.id.clone(), z)).collect(),
            pois: pois.into_iter().map(|p| (p.id.clone(), p)).collect(),
            places: places.into_iter().map(|p| (p.id.clone(), p)).collect(),
            routes: routes.into_iter().map(|r| (r.id.clone(), r)).collect(),
            depots: depots.into_iter().map(|d| (d.id.clone(), d)).collect(),
            geofences: valid_geofences,
            vehicles: vehicles.into_iter().map(|v| (v.id.clone(), v)).collect(),
        }
    }

    /// Authoritative capacity for a vehicle, per spec §9: the vehicle's
    /// own CMS record is the only place capacity lives, no hardcoded
    /// default is acceptable at runtime.
    pub fn vehicle(&self, vehicle_id: &str) -> Option<&VehicleRecord> {
        self.vehicles.get(vehicle_id)
    }
}

/// Cheap to clone: the interior snapshot is behind `Arc<RwLock<..>>`, and
/// every refresh builds a whole new `GeoCacheSnapshot` rather than
/// mutating the current one in place.
#[derive(Clone)]
pub struct GeoCache {
    cms: Arc<dyn CmsClient>,
    snapshot: Arc<RwLock<Arc<GeoCacheSnapshot>>>,
}

impl GeoCache {
    pub fn new(cms: Arc<dyn CmsClient>) -> Self {
        Self {
            cms,
            snapshot: Arc::new(RwLock::new(Arc::new(GeoCacheSnapshot::default()))),
        }
    }

    /// Current snapshot. Read-only, lock-free after the `Arc` clone.
    pub async fn snapshot(&self) -> Arc<GeoCacheSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Fetch all six collections from the CMS and atomically publish a
    /// new snapshot. A partial failure aborts the refresh and keeps
    /// serving the previous snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let zones = self.cms.list_zones().await?;
        let pois = self.cms.list_pois().await?;
        let places = self.cms.list_places().await?;
        let routes = self.cms.list_routes().await?;
        let depots = self.cms.list_depots().await?;
        let geofences = self.cms.list_geofences().await?;
        let vehicles = self.cms.list_vehicles().await?;

        let zone_count = zones.len();
        let poi_count = pois.len();
        let place_count = places.len();
        let route_count = routes.len();
        let depot_count = depots.len();
        let geofence_count = geofences.len();
        let vehicle_count = vehicles.len();

        let new_snapshot = GeoCacheSnapshot::from_loaded(
            zones, pois, places, routes, depots, geofences, vehicles,
        );
        let mut guard = self.snapshot.write().await;
        *guard = Arc::new(new_snapshot);

        info!(
            zone_count,
            poi_count, place_count, route_count, depot_count, geofence_count, vehicle_count,
            "geo cache refreshed"
        );
        Ok(())
    }

    /// Spawn the periodic CMS refresh loop. Runs until `shutdown` fires.
    pub fn spawn_refresh_loop(
        &self,
        interval: std::time::Duration,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("geo cache refresh loop shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = this.refresh().await {
                            warn!(error = %e, "geo cache refresh failed, serving stale snapshot");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms_client::MockCmsClient;

    #[tokio::test]
    async fn snapshot_starts_empty() {
        let cache = GeoCache::new(Arc::new(MockCmsClient::empty()));
        let snapshot = cache.snapshot().await;
        assert!(snapshot.zones.is_empty());
    }

    #[tokio::test]
    async fn refresh_populates_snapshot() {
        let mock = MockCmsClient::with_fixture();
        let cache = GeoCache::new(Arc::new(mock));
        cache.refresh().await.unwrap();
        let snapshot = cache.snapshot().await;
        assert!(!snapshot.zones.is_empty());
        assert!(!snapshot.routes.is_empty());
    }

    #[tokio::test]
    async fn refresh_drops_invalid_geofences() {
        let mut mock = MockCmsClient::with_fixture();
        mock.inject_invalid_geofence();
        let cache = GeoCache::new(Arc::new(mock));
        cache.refresh().await.unwrap();
        let snapshot = cache.snapshot().await;
        assert!(!snapshot.geofences.contains_key("invalid-geofence"));
    }
}
