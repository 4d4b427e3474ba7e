//! Minimal operations HTTP surface: liveness/readiness and a Prometheus
//! scrape endpoint. The admin dashboard and its data/auth/user-management
//! API are out of scope per spec §1 (an external collaborator, not this
//! crate's concern) — this module carries only the ambient ops surface
//! every teacher service exposes, trimmed of anything dashboard-specific.
//!
//! Request logging middleware is carried over from the teacher's
//! `request_logging_middleware`, correlation-id-per-request included.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::geo_cache::GeoCache;

/// Shared state for the ops router: enough to answer `/readyz` honestly.
#[derive(Clone)]
pub struct AppState {
    pub geo_cache: Arc<GeoCache>,
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Ready once the `GeoCache` has loaded at least one snapshot; a cold
/// cache means the process can't yet serve demand generation or conductor
/// queries meaningfully.
async fn readyz(axum::extract::State(state): axum::extract::State<AppState>) -> impl IntoResponse {
    let snapshot = state.geo_cache.snapshot().await;
    if snapshot.zones.is_empty() && snapshot.routes.is_empty() && snapshot.depots.is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "geo cache not yet populated")
    } else {
        (StatusCode::OK, "ready")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    match crate::metrics::render() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

/// Request logging middleware with a short correlation id per request,
/// carried over from the teacher's `request_logging_middleware`.
async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string()[..8].to_string();
    let start_time = Instant::now();

    info!("started {} {} [{}]", method, path, request_id);
    let response = next.run(request).await;
    let duration = start_time.elapsed();

    info!(
        "completed {} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        response.status().as_u16(),
        duration.as_secs_f64() * 1000.0
    );

    response
}

/// Build the ops router: `/healthz`, `/readyz`, `/metrics`.
pub fn ops_router(geo_cache: Arc<GeoCache>) -> Router {
    let state = AppState { geo_cache };
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
}

/// Start the ops HTTP server on `interface:port`. Runs until the listener
/// is dropped; callers typically race this against a `CancellationToken`.
pub async fn start_ops_server(interface: &str, port: u16, geo_cache: Arc<GeoCache>) -> anyhow::Result<()> {
    let app = ops_router(geo_cache);
    let listener = tokio::net::TcpListener::bind(format!("{interface}:{port}")).await?;
    info!("ops server listening on http://{}:{}", interface, port);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms_client::MockCmsClient;

    #[tokio::test]
    async fn healthz_is_always_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reports_unavailable_before_first_refresh() {
        let cache = Arc::new(GeoCache::new(Arc::new(MockCmsClient::empty())));
        let state = AppState { geo_cache: cache };
        let response = readyz(axum::extract::State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn readyz_reports_ok_after_refresh() {
        let mock = MockCmsClient::with_fixture();
        let cache = Arc::new(GeoCache::new(Arc::new(mock)));
        cache.refresh().await.unwrap();
        let state = AppState { geo_cache: cache };
        let response = readyz(axum::extract::State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
