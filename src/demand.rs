//! `DemandGenerator` — Poisson-per-zone-per-tick passenger spawn model,
//! per spec §4.2.
//!
//! Grounded on `flight_tracker`'s per-tick sweep shape: one pass over a
//! snapshot of reference data, no shared mutable state beyond
//! `ConfigurationService` and `GeoCache`, so ticks can run back-to-back
//! without locking against each other.

use crate::config::ConfigurationService;
use crate::geo_cache::{GeoCache, GeoCacheSnapshot};
use crate::geo_types::{Direction, Point, Poi, Route, Zone, ZoneType};
use crate::passenger::{SpawnKind, SpawnRequest};
use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::Rng;
use rand_distr::{Distribution, Poisson};
use tracing::warn;

const DESTINATION_RESAMPLE_ATTEMPTS: usize = 5;

/// Stateless aside from its handles to shared reference data; cheap to
/// clone, same as `GeoCache`/`LocationService`.
#[derive(Clone)]
pub struct DemandGenerator {
    geo_cache: GeoCache,
    config: ConfigurationService,
}

impl DemandGenerator {
    pub fn new(geo_cache: GeoCache, config: ConfigurationService) -> Self {
        Self { geo_cache, config }
    }

    /// One simulation tick of length `tick_minutes`. Draws a Poisson
    /// passenger count per zone and materializes that many spawn
    /// requests. Zones with zero weight or an empty GeoCache yield no
    /// output, per spec §4.2 edge cases.
    pub async fn tick(
        &self,
        now: DateTime<Utc>,
        tick_minutes: f64,
        rng: &mut impl Rng,
    ) -> Vec<SpawnRequest> {
        let snapshot = self.geo_cache.snapshot().await;
        if snapshot.zones.is_empty() {
            return Vec::new();
        }

        let mut requests = Vec::new();
        for zone in snapshot.zones.values() {
            if zone.spawn_weight <= 0.0 {
                continue;
            }
            let rate = self.rate_for_zone(zone, now, tick_minutes).await;
            if rate <= 0.0 {
                continue;
            }
            let Ok(poisson) = Poisson::new(rate) else {
                warn!(zone_id = %zone.id, rate, "invalid poisson rate, skipping zone this tick");
                continue;
            };
            let count = poisson.sample(rng) as u64;
            for _ in 0..count {
                if let Some(request) = self.spawn_one(zone, &snapshot, now, rng).await {
                    requests.push(request);
                }
            }
        }
        requests
    }

    async fn rate_for_zone(&self, zone: &Zone, now: DateTime<Utc>, tick_minutes: f64) -> f64 {
        let base = self.base_density(zone.zone_type).await;
        let tod = self.time_of_day_multiplier(zone.zone_type, now.hour()).await;
        let dow = self.day_of_week_multiplier(now.weekday().num_days_from_sunday()).await;
        base * zone.spawn_weight * tod * dow * (tick_minutes / 60.0)
    }

    async fn base_density(&self, zone_type: ZoneType) -> f64 {
        let key = format!("passenger_spawning.rates.base_density.{}", zone_type_key(zone_type));
        self.config.get(&key, default_base_density(zone_type)).await
    }

    async fn time_of_day_multiplier(&self, zone_type: ZoneType, hour: u32) -> f64 {
        let key = format!(
            "passenger_spawning.rates.time_of_day.{}.{:02}",
            zone_type_key(zone_type),
            hour
        );
        let default = default_time_of_day_multiplier(zone_type, hour);
        sanitize_multiplier(&key, self.config.get(&key, default).await)
    }

    async fn day_of_week_multiplier(&self, day: u32) -> f64 {
        let key = format!("passenger_spawning.rates.day_of_week.{day}");
        let default = default_day_of_week_multiplier(day);
        sanitize_multiplier(&key, self.config.get(&key, default).await)
    }

    fn is_peak_hour(hour: u32) -> bool {
        matches!(hour, 7 | 8 | 9 | 17 | 18 | 19)
    }

    async fn spawn_one(
        &self,
        zone: &Zone,
        snapshot: &GeoCacheSnapshot,
        now: DateTime<Utc>,
        rng: &mut impl Rng,
    ) -> Option<SpawnRequest> {
        let origin = crate::geometry::random_point_in_polygon(&zone.polygon, rng);
        let destination = self.select_destination(origin, snapshot, rng).await?;
        let priority = rng.random_range(0.0..=1.0);
        let peak_hour = Self::is_peak_hour(now.hour());

        let depot_threshold_m: f64 = self
            .config
            .get(
                "passenger_spawning.geographic.depot_proximity_meters",
                crate::config::defaults::SPAWN_RADIUS_METERS,
            )
            .await;

        let nearest_depot = snapshot
            .depots
            .values()
            .filter(|d| !d.assigned_routes.is_empty())
            .map(|d| (d, crate::geometry::haversine_distance_m(origin, d.point)))
            .min_by(|a, b| a.1.total_cmp(&b.1));

        if let Some((depot, distance)) = nearest_depot
            && distance <= depot_threshold_m
        {
            return Some(SpawnRequest {
                origin,
                destination,
                route_id: depot.assigned_routes[0].clone(),
                direction: Direction::Outbound,
                priority,
                kind: SpawnKind::Depot,
                depot_id: Some(depot.id.clone()),
                peak_hour,
            });
        }

        let route = nearest_route(snapshot, origin)?;
        if !route.has_declared_direction() {
            warn!(route_id = %route.id, "route has no declared inbound terminus, refusing route-kind spawn");
            return None;
        }
        let terminus = route.inbound_terminus.unwrap();
        let direction = if crate::geometry::haversine_distance_m(destination, terminus)
            < crate::geometry::haversine_distance_m(origin, terminus)
        {
            Direction::Inbound
        } else {
            Direction::Outbound
        };

        Some(SpawnRequest {
            origin,
            destination,
            route_id: route.id.clone(),
            direction,
            priority,
            kind: SpawnKind::Route,
            depot_id: None,
            peak_hour,
        })
    }

    /// Weighted draw over POIs by `activity_level` with an inverse-distance
    /// bias; resamples up to `DESTINATION_RESAMPLE_ATTEMPTS` times if the
    /// draw lands farther than the configured maximum.
    async fn select_destination(
        &self,
        origin: Point,
        snapshot: &GeoCacheSnapshot,
        rng: &mut impl Rng,
    ) -> Option<Point> {
        if snapshot.pois.is_empty() {
            return None;
        }
        let max_distance_m: f64 = self
            .config
            .get("passenger_spawning.geographic.max_destination_distance_meters", 8_000.0)
            .await;

        let pois: Vec<&Poi> = snapshot.pois.values().collect();
        let weights: Vec<f64> = pois
            .iter()
            .map(|poi| {
                let distance = crate::geometry::haversine_distance_m(origin, poi.point);
                poi.activity_level.max(0.0001) / (1.0 + distance / 1000.0)
            })
            .collect();
        let Ok(dist) = rand::distr::weighted::WeightedIndex::new(&weights) else {
            return None;
        };

        for _ in 0..DESTINATION_RESAMPLE_ATTEMPTS {
            let choice = pois[dist.sample(rng)];
            if crate::geometry::haversine_distance_m(origin, choice.point) <= max_distance_m {
                return Some(choice.point);
            }
        }
        None
    }
}

fn nearest_route(snapshot: &GeoCacheSnapshot, origin: Point) -> Option<&Route> {
    snapshot
        .routes
        .values()
        .filter_map(|route| route.nearest_coordinate(origin).map(|(_, distance)| (route, distance)))
        .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.id.cmp(&b.0.id)))
        .map(|(route, _)| route)
}

fn sanitize_multiplier(key: &str, value: f64) -> f64 {
    if !value.is_finite() || value < 0.0 {
        warn!(key, value, "negative or NaN demand multiplier treated as zero");
        0.0
    } else {
        value
    }
}

fn zone_type_key(zone_type: ZoneType) -> &'static str {
    match zone_type {
        ZoneType::Residential => "residential",
        ZoneType::Commercial => "commercial",
        ZoneType::Industrial => "industrial",
        ZoneType::School => "school",
        ZoneType::Hospital => "hospital",
        ZoneType::Other => "other",
    }
}

fn default_base_density(zone_type: ZoneType) -> f64 {
    match zone_type {
        ZoneType::Residential => 18.0,
        ZoneType::Commercial => 22.0,
        ZoneType::Industrial => 6.0,
        ZoneType::School => 14.0,
        ZoneType::Hospital => 10.0,
        ZoneType::Other => 4.0,
    }
}

/// Morning-rush residential lifts to ~2.5x-3x baseline, evening
/// commercial mirrors, late-night falls to ~0.1x-0.2x, per spec §4.2.
fn default_time_of_day_multiplier(zone_type: ZoneType, hour: u32) -> f64 {
    match zone_type {
        ZoneType::Residential => match hour {
            0..=4 => 0.1,
            5 | 6 => 0.6,
            7 | 8 => 2.8,
            9 => 1.8,
            17 | 18 | 19 => 1.5,
            20..=22 => 1.1,
            _ => 1.0,
        },
        ZoneType::Commercial => match hour {
            0..=4 => 0.15,
            5 | 6 => 0.4,
            7 | 8 => 1.3,
            17 | 18 => 2.7,
            19 => 1.9,
            _ => 1.0,
        },
        ZoneType::School => match hour {
            0..=5 => 0.1,
            7 | 8 => 2.5,
            14 | 15 => 2.3,
            9..=13 => 0.3,
            _ => 0.2,
        },
        ZoneType::Hospital => match hour {
            0..=5 => 0.5,
            _ => 1.0,
        },
        ZoneType::Industrial | ZoneType::Other => match hour {
            0..=5 => 0.2,
            6..=8 => 1.4,
            _ => 1.0,
        },
    }
}

fn default_day_of_week_multiplier(day: u32) -> f64 {
    match day {
        0 | 6 => 0.6,
        _ => 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms_client::MockCmsClient;
    use crate::geo_types::Route;
    use std::sync::Arc;

    fn weekday_noon() -> DateTime<Utc> {
        "2026-07-29T12:00:00Z".parse().unwrap() // a Wednesday
    }

    fn generator(cache: GeoCache) -> DemandGenerator {
        DemandGenerator::new(cache, ConfigurationService::new())
    }

    #[tokio::test]
    async fn empty_geo_cache_yields_no_spawns() {
        let cache = GeoCache::new(Arc::new(MockCmsClient::empty()));
        let mut rng = rand::rng();
        let requests = generator(cache).tick(weekday_noon(), 1.0, &mut rng).await;
        assert!(requests.is_empty());
    }

    #[tokio::test]
    async fn zero_weight_zone_contributes_no_rate() {
        let cache = GeoCache::new(Arc::new(MockCmsClient::empty()));
        let zone = Zone {
            id: "z1".into(),
            zone_type: ZoneType::Residential,
            polygon: vec![
                Point::new(0.0, 0.0),
                Point::new(0.0, 1.0),
                Point::new(1.0, 1.0),
                Point::new(0.0, 0.0),
            ],
            base_population_density: 10.0,
            spawn_weight: 0.0,
        };
        let rate = generator(cache).rate_for_zone(&zone, weekday_noon(), 10.0).await;
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn negative_multiplier_is_sanitized_to_zero() {
        assert_eq!(sanitize_multiplier("x", -1.0), 0.0);
        assert_eq!(sanitize_multiplier("x", f64::NAN), 0.0);
        assert_eq!(sanitize_multiplier("x", 1.5), 1.5);
    }

    #[test]
    fn route_without_terminus_has_no_declared_direction() {
        let route = Route {
            id: "r1".into(),
            coordinates: vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)],
            inbound_terminus: None,
        };
        assert!(!route.has_declared_direction());
    }

    #[tokio::test]
    async fn refresh_populated_cache_produces_spawns_over_many_ticks() {
        let mock = MockCmsClient::with_fixture();
        let cache = GeoCache::new(Arc::new(mock));
        cache.refresh().await.unwrap();
        let generator = DemandGenerator::new(cache, ConfigurationService::new());
        let mut rng = rand::rng();

        let mut total = 0usize;
        for _ in 0..50 {
            total += generator.tick(weekday_noon(), 15.0, &mut rng).await.len();
        }
        assert!(total > 0, "expected at least one spawn across 50 ticks");
    }
}
