//! `ConfigurationService` — a strongly-typed live view of tunable
//! parameters, refreshed periodically from the CMS (spec §4.7).
//!
//! Values are stored as strings keyed by `section.key` (mirroring how the
//! CMS's `OperationalConfiguration` collection models them, per spec §6)
//! and parsed on demand per the caller's declared type. An unknown or
//! unparsable value falls back to the caller's default and emits a
//! warning, exactly as spec §4.7 requires.
//!
//! Local startup defaults are loaded from a TOML file the same way
//! `ingest_config.rs` loads `ingest.toml`: environment variable override,
//! then a production/staging path, then a development-local path.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// A single configuration change, broadcast to subscribers after a refresh.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
    pub old_value: Option<String>,
    pub new_value: String,
}

#[derive(Debug, Clone, Default)]
struct ConfigSnapshot {
    values: HashMap<String, String>,
}

/// Live, typed view of tunable parameters.
///
/// Cheap to clone: internally holds `Arc<RwLock<..>>` state and a
/// broadcast sender, the same sharing idiom `GeoCache` and `LocationService`
/// use for their snapshots.
#[derive(Clone)]
pub struct ConfigurationService {
    snapshot: Arc<RwLock<ConfigSnapshot>>,
    changes: broadcast::Sender<ConfigChange>,
}

impl ConfigurationService {
    /// Build an empty service (no values loaded yet). Call `refresh` or
    /// `load_defaults_file` before relying on `get`.
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(256);
        Self {
            snapshot: Arc::new(RwLock::new(ConfigSnapshot::default())),
            changes,
        }
    }

    /// Subscribe to change notifications. Dropped receivers are pruned
    /// lazily by `broadcast` itself.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.changes.subscribe()
    }

    /// Resolve the local defaults file path.
    ///
    /// Priority:
    /// 1. `COMMUTER_CONFIG` env var
    /// 2. `/etc/commuter/config.toml` (production/staging)
    /// 3. `./config.toml` (development)
    pub fn defaults_path() -> PathBuf {
        if let Ok(path) = std::env::var("COMMUTER_CONFIG") {
            return PathBuf::from(path);
        }
        match std::env::var("COMMUTER_ENV").as_deref() {
            Ok("production") | Ok("staging") => PathBuf::from("/etc/commuter/config.toml"),
            _ => PathBuf::from("./config.toml"),
        }
    }

    /// Load a flat `section.key = "value"` TOML file as the initial
    /// snapshot, e.g. for tests or first boot before the CMS is reachable.
    pub async fn load_defaults_file(&self, path: &std::path::Path) -> Result<()> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {path:?}"))?;
        let parsed: HashMap<String, String> =
            toml::from_str(&contents).with_context(|| format!("failed to parse {path:?}"))?;
        let mut snapshot = self.snapshot.write().await;
        snapshot.values = parsed;
        Ok(())
    }

    /// Replace the snapshot wholesale, e.g. after a CMS poll, broadcasting
    /// a `ConfigChange` for every key whose value actually moved.
    pub async fn apply_remote_snapshot(&self, new_values: HashMap<String, String>) {
        let mut snapshot = self.snapshot.write().await;
        for (key, new_value) in &new_values {
            let old_value = snapshot.values.get(key).cloned();
            if old_value.as_deref() != Some(new_value.as_str()) {
                let _ = self.changes.send(ConfigChange {
                    key: key.clone(),
                    old_value,
                    new_value: new_value.clone(),
                });
            }
        }
        snapshot.values = new_values;
    }

    /// Typed accessor. Falls back to `default` (with a warning) when the
    /// key is absent or fails to parse as `T`.
    pub async fn get<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Clone,
    {
        let snapshot = self.snapshot.read().await;
        match snapshot.values.get(key) {
            Some(raw) => match raw.parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    warn!(key, raw, "config value failed to parse, using default");
                    default
                }
            },
            None => default,
        }
    }

    /// All keys under `prefix.` (prefix without trailing dot), e.g.
    /// `get_section("conductor.proximity")`.
    pub async fn get_section(&self, prefix: &str) -> HashMap<String, String> {
        let full_prefix = format!("{prefix}.");
        let snapshot = self.snapshot.read().await;
        snapshot
            .values
            .iter()
            .filter(|(k, _)| k.starts_with(&full_prefix))
            .map(|(k, v)| (k[full_prefix.len()..].to_string(), v.clone()))
            .collect()
    }

    /// Spawn the periodic CMS refresh loop. Runs until `shutdown` fires.
    pub fn spawn_refresh_loop(
        &self,
        cms: Arc<dyn crate::cms_client::CmsClient>,
        interval: std::time::Duration,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("configuration refresh loop shutting down");
                        return;
                    }
                    _ = ticker.tick() => {
                        match cms.fetch_operational_configuration().await {
                            Ok(values) => this.apply_remote_snapshot(values).await,
                            Err(e) => warn!(error = %e, "failed to refresh configuration from CMS"),
                        }
                    }
                }
            }
        })
    }
}

impl Default for ConfigurationService {
    fn default() -> Self {
        Self::new()
    }
}

/// Defaults for the `conductor.*` sections named in spec §6, used when the
/// CMS/local file doesn't supply a value.
pub mod defaults {
    pub const PICKUP_RADIUS_KM: f64 = 0.3;
    pub const BOARDING_TIME_WINDOW_MINUTES: f64 = 2.0;
    pub const STOP_MIN_SECONDS: u64 = 10;
    pub const STOP_MAX_SECONDS: u64 = 90;
    pub const PER_PASSENGER_BOARDING_SECONDS: u64 = 4;
    pub const PER_PASSENGER_DISEMBARKING_SECONDS: u64 = 3;
    pub const MONITORING_INTERVAL_SECONDS: u64 = 5;
    pub const GPS_PRECISION_METERS: f64 = 5.0;
    pub const DRIVER_RESPONSE_TIMEOUT_SECONDS: u64 = 15;
    pub const WAYPOINT_PROXIMITY_THRESHOLD_KM: f64 = 0.5;
    pub const WAYPOINT_BROADCAST_INTERVAL_SECONDS: u64 = 10;
    pub const AVERAGE_PASSENGERS_PER_HOUR: f64 = 20.0;
    pub const SPAWN_RADIUS_METERS: f64 = 400.0;
    pub const MAX_WAIT_TIME_MINUTES: f64 = 20.0;
    pub const EXPIRATION_CHECK_INTERVAL_SECONDS: u64 = 10;
    pub const GRID_CELL_SIZE_DEGREES: f64 = 0.01;
    pub const DEFAULT_SEARCH_RADIUS_KM: f64 = 0.5;
    pub const MAX_COMMUTERS_PER_QUERY: usize = 50;
    pub const DEFAULT_PICKUP_DISTANCE_METERS: f64 = 50.0;
    pub const GEOCACHE_REFRESH_INTERVAL_SECONDS: u64 = 300;
    pub const HUB_REQUEST_TIMEOUT_SECONDS: u64 = 5;
    pub const CMS_REQUEST_TIMEOUT_SECONDS: u64 = 30;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_falls_back_to_default_when_missing() {
        let config = ConfigurationService::new();
        let radius: f64 = config.get("conductor.proximity.pickup_radius_km", 0.3).await;
        assert_eq!(radius, 0.3);
    }

    #[tokio::test]
    async fn get_falls_back_on_parse_failure_and_warns() {
        let config = ConfigurationService::new();
        let mut values = HashMap::new();
        values.insert(
            "conductor.proximity.pickup_radius_km".to_string(),
            "not-a-number".to_string(),
        );
        config.apply_remote_snapshot(values).await;
        let radius: f64 = config.get("conductor.proximity.pickup_radius_km", 0.3).await;
        assert_eq!(radius, 0.3);
    }

    #[tokio::test]
    async fn apply_remote_snapshot_broadcasts_changes() {
        let config = ConfigurationService::new();
        let mut rx = config.subscribe();

        let mut values = HashMap::new();
        values.insert("conductor.operational.monitoring_interval_seconds".to_string(), "5".to_string());
        config.apply_remote_snapshot(values).await;

        let change = rx.try_recv().expect("expected a change notification");
        assert_eq!(change.key, "conductor.operational.monitoring_interval_seconds");
        assert_eq!(change.new_value, "5");
        assert_eq!(change.old_value, None);
    }

    #[tokio::test]
    async fn get_section_strips_prefix() {
        let config = ConfigurationService::new();
        let mut values = HashMap::new();
        values.insert("reservoir.grid_cell_size_degrees".to_string(), "0.01".to_string());
        values.insert("reservoir.max_commuters_per_query".to_string(), "50".to_string());
        values.insert("conductor.operational.monitoring_interval_seconds".to_string(), "5".to_string());
        config.apply_remote_snapshot(values).await;

        let section = config.get_section("reservoir").await;
        assert_eq!(section.len(), 2);
        assert_eq!(section.get("grid_cell_size_degrees").unwrap(), "0.01");
    }
}
