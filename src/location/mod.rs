//! `LocationService` — the unified point-awareness engine of spec §4.1.
//!
//! Supersedes the deprecated "reservoir geofence" design noted in spec §9:
//! geofences are evaluated here, and only here, for both the conductor's
//! depot/stop detection and the demand model's zone membership.
//!
//! Containment is a bbox pre-filter followed by an exact test, the same
//! two-stage shape `geofence_detector.rs` uses for altitude-layer
//! filtering before a haversine check. Nearest-neighbor lookups are backed
//! by an R-tree per entity kind, rebuilt wholesale on `refresh_from_cache`
//! and published behind the same snapshot-swap idiom as `GeoCache`.

mod index;

use crate::errors::CoreError;
use crate::geo_cache::GeoCache;
use crate::geo_types::{Geofence, GeofenceKind, Point};
use index::LocationIndex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Result of a single `get_location_context` call, per spec §4.1.
#[derive(Debug, Clone, Default)]
pub struct LocationContext {
    pub containing_geofence_ids: Vec<String>,
    pub enter_events: Vec<String>,
    pub exit_events: Vec<String>,
    pub nearest_stop: Option<(String, f64)>,
    pub nearest_poi: Option<(String, f64)>,
    pub nearest_place: Option<(String, f64)>,
    pub nearby_stops: Option<Vec<(String, f64)>>,
    pub nearby_pois: Option<Vec<(String, f64)>>,
}

/// How many nearby candidates `include_nearby` returns.
const NEARBY_LIMIT: usize = 10;

/// Cheap to clone: index lives behind `Arc<RwLock<Arc<LocationIndex>>>`,
/// per-entity transition state behind a `DashMap`.
#[derive(Clone)]
pub struct LocationService {
    geo_cache: GeoCache,
    index: Arc<RwLock<Arc<LocationIndex>>>,
    /// entity_id -> previously observed containing-geofence set, per spec
    /// §4.1's stateful transition detection.
    transitions: Arc<dashmap::DashMap<String, HashSet<String>>>,
}

impl LocationService {
    pub fn new(geo_cache: GeoCache) -> Self {
        Self {
            geo_cache,
            index: Arc::new(RwLock::new(Arc::new(LocationIndex::default()))),
            transitions: Arc::new(dashmap::DashMap::new()),
        }
    }

    /// Rebuild the spatial index from the current `GeoCache` snapshot.
    /// Runtime-added geofences not present in the CMS are dropped, the
    /// same way any other cached collection is rebuilt wholesale.
    pub async fn refresh_from_cache(&self) {
        let snapshot = self.geo_cache.snapshot().await;
        let new_index = LocationIndex::build(
            snapshot.geofences.values().cloned(),
            snapshot.depots.values(),
            snapshot.pois.values(),
            snapshot.places.values(),
        );
        let mut guard = self.index.write().await;
        *guard = Arc::new(new_index);
        info!("location index rebuilt from geo cache");
    }

    /// Insert or replace a geofence at runtime without disturbing
    /// concurrent readers: build a whole new index and swap it in.
    pub async fn add_geofence(&self, geofence: Geofence) -> Result<(), CoreError> {
        geofence.validate()?;
        let mut guard = self.index.write().await;
        let mut next = (**guard).clone();
        next.upsert_geofence(geofence);
        *guard = Arc::new(next);
        Ok(())
    }

    pub async fn update_geofence(&self, geofence: Geofence) -> Result<(), CoreError> {
        self.add_geofence(geofence).await
    }

    pub async fn remove_geofence(&self, id: &str) -> Result<(), CoreError> {
        let mut guard = self.index.write().await;
        let mut next = (**guard).clone();
        if next.remove_geofence(id).is_none() {
            return Err(CoreError::not_found(format!("geofence {id}")));
        }
        *guard = Arc::new(next);
        Ok(())
    }

    /// The full context query of spec §4.1.
    pub async fn get_location_context(
        &self,
        position: Point,
        entity_id: Option<&str>,
        detect_transitions: bool,
        include_nearby: bool,
    ) -> LocationContext {
        let index = self.index.read().await.clone();

        let containing: HashSet<String> = index
            .geofences
            .values()
            .filter(|g| g.enabled)
            .filter(|g| g.bbox().contains(position))
            .filter(|g| crate::geometry::contains(&g.geometry, position))
            .map(|g| g.id.clone())
            .collect();

        let (enter_events, exit_events) = match entity_id {
            None => (Vec::new(), Vec::new()),
            Some(_) if !detect_transitions => (Vec::new(), Vec::new()),
            Some(id) => {
                let previous = self
                    .transitions
                    .get(id)
                    .map(|set| set.clone())
                    .unwrap_or_default();
                let enters: Vec<String> = containing.difference(&previous).cloned().collect();
                let exits: Vec<String> = previous.difference(&containing).cloned().collect();
                self.transitions.insert(id.to_string(), containing.clone());
                (enters, exits)
            }
        };

        let mut containing_geofence_ids: Vec<String> = containing.into_iter().collect();
        containing_geofence_ids.sort();

        let nearest_stop = index.nearest_stop(position);
        let nearest_poi = index.nearest_poi(position);
        let nearest_place = index.nearest_place(position);
        let (nearby_stops, nearby_pois) = if include_nearby {
            (
                Some(index.nearby_stops(position, NEARBY_LIMIT)),
                Some(index.nearby_pois(position, NEARBY_LIMIT)),
            )
        } else {
            (None, None)
        };

        LocationContext {
            containing_geofence_ids,
            enter_events,
            exit_events,
            nearest_stop,
            nearest_poi,
            nearest_place,
            nearby_stops,
            nearby_pois,
        }
    }

    /// True if `position` lies inside any enabled `GeofenceKind::Depot`
    /// geofence, the containment check the conductor's CRUISING state uses
    /// to decide between `DepotReservoir` and `RouteReservoir`, per spec
    /// §4.6.
    pub async fn is_at_depot(&self, position: Point) -> bool {
        let index = self.index.read().await;
        index.geofences.values().any(|g| {
            g.enabled
                && g.kind == GeofenceKind::Depot
                && g.bbox().contains(position)
                && crate::geometry::contains(&g.geometry, position)
        })
    }

    /// True if `position` lies inside any enabled geofence of the given id
    /// set's kind, used by callers that already know which geofences to
    /// check.
    pub async fn is_inside_any(&self, position: Point, geofence_ids: &[String]) -> bool {
        let index = self.index.read().await;
        geofence_ids.iter().any(|id| {
            index
                .geofences
                .get(id)
                .filter(|g| g.enabled)
                .is_some_and(|g| g.bbox().contains(position) && crate::geometry::contains(&g.geometry, position))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms_client::MockCmsClient;
    use crate::geo_types::{GeofenceGeometry, GeofenceKind};

    async fn service_with_fixture() -> LocationService {
        let mock = MockCmsClient::with_fixture();
        let cache = GeoCache::new(Arc::new(mock));
        cache.refresh().await.unwrap();
        let service = LocationService::new(cache);
        service.refresh_from_cache().await;
        service
    }

    #[tokio::test]
    async fn containment_detects_depot_fixture_geofence() {
        let service = service_with_fixture().await;
        let ctx = service
            .get_location_context(Point::new(0.0, 0.0), None, false, false)
            .await;
        assert!(ctx.containing_geofence_ids.contains(&"depot-1-fence".to_string()));
    }

    #[tokio::test]
    async fn first_observation_reports_enter_with_no_exit() {
        let service = service_with_fixture().await;
        let ctx = service
            .get_location_context(Point::new(0.0, 0.0), Some("vehicle-1"), true, false)
            .await;
        assert_eq!(ctx.enter_events, vec!["depot-1-fence".to_string()]);
        assert!(ctx.exit_events.is_empty());
    }

    #[tokio::test]
    async fn leaving_geofence_reports_exit() {
        let service = service_with_fixture().await;
        service
            .get_location_context(Point::new(0.0, 0.0), Some("vehicle-1"), true, false)
            .await;
        // Far outside the 100m fixture geofence.
        let ctx = service
            .get_location_context(Point::new(10.0, 10.0), Some("vehicle-1"), true, false)
            .await;
        assert_eq!(ctx.exit_events, vec!["depot-1-fence".to_string()]);
        assert!(ctx.enter_events.is_empty());
    }

    #[tokio::test]
    async fn no_transitions_without_entity_id() {
        let service = service_with_fixture().await;
        let ctx = service
            .get_location_context(Point::new(0.0, 0.0), None, true, false)
            .await;
        assert!(ctx.enter_events.is_empty());
        assert!(ctx.exit_events.is_empty());
    }

    #[tokio::test]
    async fn add_geofence_is_visible_to_subsequent_queries() {
        let service = service_with_fixture().await;
        service
            .add_geofence(Geofence {
                id: "custom-1".into(),
                kind: GeofenceKind::Custom,
                geometry: GeofenceGeometry::Circle {
                    center: Point::new(5.0, 5.0),
                    radius_m: 50.0,
                },
                enabled: true,
            })
            .await
            .unwrap();
        let ctx = service
            .get_location_context(Point::new(5.0, 5.0), None, false, false)
            .await;
        assert!(ctx.containing_geofence_ids.contains(&"custom-1".to_string()));
    }

    #[tokio::test]
    async fn remove_geofence_of_unknown_id_errors() {
        let service = service_with_fixture().await;
        assert!(service.remove_geofence("does-not-exist").await.is_err());
    }

    #[tokio::test]
    async fn is_at_depot_true_inside_depot_geofence() {
        let service = service_with_fixture().await;
        assert!(service.is_at_depot(Point::new(0.0, 0.0)).await);
        assert!(!service.is_at_depot(Point::new(10.0, 10.0)).await);
    }

    #[tokio::test]
    async fn nearest_poi_returns_fixture_poi() {
        let service = service_with_fixture().await;
        let ctx = service
            .get_location_context(Point::new(0.5, 0.5), None, false, false)
            .await;
        assert_eq!(ctx.nearest_poi.as_ref().map(|(id, _)| id.as_str()), Some("poi-1"));
    }

    #[tokio::test]
    async fn nearest_place_returns_fixture_place() {
        let service = service_with_fixture().await;
        let ctx = service
            .get_location_context(Point::new(0.4, 0.4), None, false, false)
            .await;
        assert_eq!(ctx.nearest_place.as_ref().map(|(id, _)| id.as_str()), Some("place-1"));
    }
}
