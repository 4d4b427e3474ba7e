//! CMS client: the core's only outbound HTTP dependency, per spec §6.
//!
//! Reads the five reference collections (zones, POIs, routes, depots,
//! geofences) and the operational configuration collection. Writes are
//! not required for the core to function. Modeled on the pagination and
//! error-context idiom of `openaip_client.rs`.

use crate::geo_types::{Depot, Geofence, Place, Poi, Route, VehicleRecord, Zone};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_PAGE_SIZE: u32 = 500;

#[async_trait]
pub trait CmsClient: Send + Sync {
    async fn list_zones(&self) -> Result<Vec<Zone>>;
    async fn list_pois(&self) -> Result<Vec<Poi>>;
    async fn list_places(&self) -> Result<Vec<Place>>;
    async fn list_routes(&self) -> Result<Vec<Route>>;
    async fn list_depots(&self) -> Result<Vec<Depot>>;
    async fn list_geofences(&self) -> Result<Vec<Geofence>>;
    async fn list_vehicles(&self) -> Result<Vec<VehicleRecord>>;
    async fn fetch_operational_configuration(&self) -> Result<HashMap<String, String>>;
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    items: Vec<T>,
    #[serde(rename = "totalCount")]
    total_count: u32,
}

#[derive(Debug, Deserialize)]
struct OperationalConfigEntry {
    section: String,
    key: String,
    value: String,
}

/// HTTP/JSON-backed `CmsClient`, per spec §6.
pub struct HttpCmsClient {
    client: Client,
    base_url: String,
}

impl HttpCmsClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build CMS HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn list_all<T: for<'de> Deserialize<'de>>(&self, collection: &str) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let url = format!("{}/{}", self.base_url, collection);
            let response = self
                .client
                .get(&url)
                .query(&[("page", page.to_string()), ("limit", DEFAULT_PAGE_SIZE.to_string())])
                .send()
                .await
                .with_context(|| format!("failed to request CMS collection {collection}"))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("CMS error fetching {collection} page {page}: {status}: {body}");
            }

            let parsed: Page<T> = response
                .json()
                .await
                .with_context(|| format!("failed to parse CMS collection {collection}"))?;
            let fetched = parsed.items.len();
            items.extend(parsed.items);

            debug!(collection, page, fetched, total = parsed.total_count, "fetched CMS page");

            if fetched < DEFAULT_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }
        info!(collection, count = items.len(), "loaded CMS collection");
        Ok(items)
    }
}

#[async_trait]
impl CmsClient for HttpCmsClient {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.list_all("landuse_zones").await
    }

    async fn list_pois(&self) -> Result<Vec<Poi>> {
        self.list_all("pois").await
    }

    async fn list_places(&self) -> Result<Vec<Place>> {
        self.list_all("places").await
    }

    async fn list_routes(&self) -> Result<Vec<Route>> {
        self.list_all("routes").await
    }

    async fn list_depots(&self) -> Result<Vec<Depot>> {
        self.list_all("depots").await
    }

    async fn list_geofences(&self) -> Result<Vec<Geofence>> {
        self.list_all("geofences").await
    }

    async fn list_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        self.list_all("vehicles").await
    }

    async fn fetch_operational_configuration(&self) -> Result<HashMap<String, String>> {
        let entries: Vec<OperationalConfigEntry> =
            self.list_all("operational_configuration").await?;
        Ok(entries
            .into_iter()
            .map(|e| (format!("{}.{}", e.section, e.key), e.value))
            .collect())
    }
}

/// In-memory stand-in for tests, grounded on the same trait boundary the
/// production client satisfies.
#[cfg(test)]
pub struct MockCmsClient {
    zones: Vec<Zone>,
    pois: Vec<Poi>,
    places: Vec<Place>,
    routes: Vec<Route>,
    depots: Vec<Depot>,
    geofences: Vec<Geofence>,
    vehicles: Vec<VehicleRecord>,
}

#[cfg(test)]
impl MockCmsClient {
    pub fn empty() -> Self {
        Self {
            zones: Vec::new(),
            pois: Vec::new(),
            places: Vec::new(),
            routes: Vec::new(),
            depots: Vec::new(),
            geofences: Vec::new(),
            vehicles: Vec::new(),
        }
    }

    pub fn with_fixture() -> Self {
        use crate::geo_types::{GeofenceGeometry, GeofenceKind, Point, PoiType, ZoneType};

        Self {
            places: vec![Place {
                id: "place-1".into(),
                name: "Riverside".into(),
                point: Point::new(0.4, 0.4),
            }],
            vehicles: vec![VehicleRecord {
                id: "v1".into(),
                route_id: "route-1".into(),
                capacity: 2,
            }],
            zones: vec![Zone {
                id: "zone-1".into(),
                zone_type: ZoneType::Residential,
                polygon: vec![
                    Point::new(0.0, 0.0),
                    Point::new(0.0, 1.0),
                    Point::new(1.0, 1.0),
                    Point::new(1.0, 0.0),
                    Point::new(0.0, 0.0),
                ],
                base_population_density: 100.0,
                spawn_weight: 1.0,
            }],
            pois: vec![Poi {
                id: "poi-1".into(),
                poi_type: PoiType::Shopping,
                point: Point::new(0.5, 0.5),
                activity_level: 0.8,
            }],
            routes: vec![Route {
                id: "route-1".into(),
                coordinates: vec![Point::new(0.0, 0.0), Point::new(0.0, 1.0)],
                inbound_terminus: Some(Point::new(0.0, 0.0)),
            }],
            depots: vec![Depot {
                id: "depot-1".into(),
                point: Point::new(0.0, 0.0),
                assigned_routes: vec!["route-1".into()],
                max_queue_capacity: 50,
            }],
            geofences: vec![Geofence {
                id: "depot-1-fence".into(),
                kind: GeofenceKind::Depot,
                geometry: GeofenceGeometry::Circle {
                    center: Point::new(0.0, 0.0),
                    radius_m: 100.0,
                },
                enabled: true,
            }],
        }
    }

    pub fn inject_invalid_geofence(&mut self) {
        use crate::geo_types::{GeofenceGeometry, GeofenceKind, Point};
        self.geofences.push(Geofence {
            id: "invalid-geofence".into(),
            kind: GeofenceKind::Custom,
            geometry: GeofenceGeometry::Circle {
                center: Point::new(0.0, 0.0),
                radius_m: -1.0,
            },
            enabled: true,
        });
    }
}

#[cfg(test)]
#[async_trait]
impl CmsClient for MockCmsClient {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        Ok(self.zones.clone())
    }

    async fn list_pois(&self) -> Result<Vec<Poi>> {
        Ok(self.pois.clone())
    }

    async fn list_places(&self) -> Result<Vec<Place>> {
        Ok(self.places.clone())
    }

    async fn list_routes(&self) -> Result<Vec<Route>> {
        Ok(self.routes.clone())
    }

    async fn list_depots(&self) -> Result<Vec<Depot>> {
        Ok(self.depots.clone())
    }

    async fn list_geofences(&self) -> Result<Vec<Geofence>> {
        Ok(self.geofences.clone())
    }

    async fn list_vehicles(&self) -> Result<Vec<VehicleRecord>> {
        Ok(self.vehicles.clone())
    }

    async fn fetch_operational_configuration(&self) -> Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}
