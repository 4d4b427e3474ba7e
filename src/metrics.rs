//! Prometheus metrics: installed the way the teacher's own `metrics.rs`
//! does (`PrometheusBuilder::install_recorder`), scraped over an axum
//! `/metrics` route, per spec §2's ambient metrics requirement.

use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::info;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics exporter. Returns a handle that can
/// be used to render metrics for scraping.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full("http_request_duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .expect("failed to set buckets for http_request_duration_seconds")
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Background task that updates process uptime/liveness/memory gauges
/// every 5 seconds.
pub async fn process_metrics_task() {
    let start_time = Instant::now();

    loop {
        let uptime_seconds = start_time.elapsed().as_secs() as f64;
        metrics::gauge!("process.uptime.seconds").set(uptime_seconds);
        metrics::gauge!("process.is_up").set(1.0);

        #[cfg(target_os = "linux")]
        {
            if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
                for line in status.lines() {
                    if line.starts_with("VmRSS:") {
                        if let Some(kb_str) = line.split_whitespace().nth(1)
                            && let Ok(kb) = kb_str.parse::<f64>()
                        {
                            metrics::gauge!("process.memory.bytes").set(kb * 1024.0);
                        }
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// Zero out every counter/gauge the coordination core emits, so each
/// appears in Prometheus from the first scrape rather than only after the
/// first relevant event — same rationale as the teacher's
/// `initialize_run_metrics`.
pub fn initialize_core_metrics() {
    // Demand generation
    metrics::counter!("commuter.demand.passengers_spawned_total").absolute(0);
    metrics::counter!("commuter.demand.zero_weight_zones_skipped_total").absolute(0);

    // Reservoirs
    metrics::counter!("commuter.reservoir.passengers_picked_up_total").absolute(0);
    metrics::counter!("commuter.reservoir.passengers_expired_total").absolute(0);
    metrics::counter!("commuter.reservoir.overflow_force_expired_total").absolute(0);
    metrics::gauge!("commuter.reservoir.depot_queue_depth").set(0.0);
    metrics::gauge!("commuter.reservoir.route_cell_depth").set(0.0);

    // Conductor / vehicle lifecycle
    metrics::counter!("commuter.conductor.passengers_boarded_total").absolute(0);
    metrics::counter!("commuter.conductor.passengers_alighted_total").absolute(0);
    metrics::counter!("commuter.conductor.stop_requests_total").absolute(0);
    metrics::counter!("commuter.conductor.stop_request_timeouts_total").absolute(0);
    metrics::gauge!("commuter.conductor.vehicles_tracked").set(0.0);

    // Location service
    metrics::counter!("commuter.location.geofence_enter_events_total").absolute(0);
    metrics::counter!("commuter.location.geofence_exit_events_total").absolute(0);

    // MessageHub
    metrics::counter!("commuter.hub.messages_published_total").absolute(0);
    metrics::counter!("commuter.hub.requests_timed_out_total").absolute(0);

    // CMS / GeoCache
    metrics::counter!("commuter.geocache.refresh_failures_total").absolute(0);
    metrics::gauge!("commuter.geocache.last_refresh_unix_seconds").set(0.0);
}

/// Render the current Prometheus exposition text, if `init_metrics` has
/// run. Used by `web::ops_router`'s `/metrics` route when the ops server
/// and the metrics recorder share a process.
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|h| h.render())
}

/// Start a standalone metrics server exposing `/metrics`.
pub async fn start_metrics_server(port: u16) {
    let handle = init_metrics();
    METRICS_HANDLE
        .set(handle)
        .expect("metrics handle already initialized");
    initialize_core_metrics();

    tokio::spawn(process_metrics_task());

    let app = Router::new().route(
        "/metrics",
        get(|| async {
            let handle = METRICS_HANDLE.get().expect("metrics handle not initialized");
            handle.render()
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("starting metrics server on http://{}/metrics", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind metrics server");

    axum::serve(listener, app).await.expect("metrics server failed");
}
