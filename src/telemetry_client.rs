//! GPS telemetry client: the core's inbound vehicle-position feed, per
//! spec §6. The telemetry server is an external collaborator (the vehicle
//! kinematics simulator/GPS relay) this crate only consumes from.
//!
//! Modeled on `socket_client.rs`'s connect/reconnect-with-backoff shape,
//! mirrored for a read side instead of a write side: `VehiclePositionStream`
//! is the consumer-facing trait, and `ReconnectingTelemetryClient` wraps any
//! `TelemetryTransport` with that same reconnect policy so a caller can wire
//! one into `ConductorRegistry::observe_position`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ts_rs::TS;
use tracing::{info, warn};

/// A single GPS fix reported for a vehicle, per spec §6:
/// `{vehicle_id, lat, lon, speed, heading, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct VehiclePositionReport {
    pub vehicle_id: String,
    pub lat: f64,
    pub lon: f64,
    pub speed_mps: f64,
    pub heading_degrees: f64,
    pub timestamp: DateTime<Utc>,
}

/// Source of live vehicle position reports. The core only ever reads from
/// this; it never pushes positions back (that's `MessageHub`'s job, over
/// `driver:engine:on`/`driver:stop_ack`).
#[async_trait]
pub trait VehiclePositionStream: Send + Sync {
    /// Block until the next report is available, or the stream ends.
    async fn next_report(&mut self) -> Result<Option<VehiclePositionReport>>;
}

/// Transport hook a concrete telemetry client dials to (re)establish its
/// connection. Kept separate from `VehiclePositionStream` so the
/// reconnect/backoff policy below is reusable across transports (a raw
/// TCP socket, a WebSocket, an MQTT subscription) without this crate
/// depending on any one of their client libraries.
#[async_trait]
pub trait TelemetryTransport: Send {
    async fn connect(&mut self) -> Result<()>;
    async fn recv(&mut self) -> Result<Option<VehiclePositionReport>>;
    fn is_connected(&self) -> bool;
}

/// Generic `VehiclePositionStream` over any `TelemetryTransport`.
/// Reconnects with exponential backoff on a dropped connection, the same
/// policy as `SocketClient::reconnect`.
pub struct ReconnectingTelemetryClient<T: TelemetryTransport> {
    transport: T,
}

impl<T: TelemetryTransport> ReconnectingTelemetryClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        let mut delay = Duration::from_secs(1);
        let max_delay = Duration::from_secs(60);
        loop {
            match self.transport.connect().await {
                Ok(()) => {
                    info!("connected to GPS telemetry server");
                    metrics::gauge!("telemetry.client.connected").set(1.0);
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, delay_secs = delay.as_secs(), "telemetry connection failed, retrying");
                    metrics::counter!("telemetry.client.reconnect_failures_total").increment(1);
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, max_delay);
                }
            }
        }
    }
}

#[async_trait]
impl<T: TelemetryTransport> VehiclePositionStream for ReconnectingTelemetryClient<T> {
    async fn next_report(&mut self) -> Result<Option<VehiclePositionReport>> {
        self.ensure_connected()
            .await
            .context("failed to connect to GPS telemetry server")?;
        match self.transport.recv().await {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!(error = %e, "telemetry transport dropped, will reconnect");
                metrics::counter!("telemetry.client.disconnects_total").increment(1);
                Err(e)
            }
        }
    }
}

/// In-memory stand-in for tests: replays a fixed sequence of reports.
#[cfg(test)]
pub struct FixtureTelemetryStream {
    reports: std::collections::VecDeque<VehiclePositionReport>,
}

#[cfg(test)]
impl FixtureTelemetryStream {
    pub fn new(reports: Vec<VehiclePositionReport>) -> Self {
        Self {
            reports: reports.into(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl VehiclePositionStream for FixtureTelemetryStream {
    async fn next_report(&mut self) -> Result<Option<VehiclePositionReport>> {
        Ok(self.reports.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_stream_replays_reports_in_order_then_ends() {
        let now = Utc::now();
        let mut stream = FixtureTelemetryStream::new(vec![
            VehiclePositionReport {
                vehicle_id: "v1".into(),
                lat: 0.0,
                lon: 0.0,
                speed_mps: 5.0,
                heading_degrees: 90.0,
                timestamp: now,
            },
            VehiclePositionReport {
                vehicle_id: "v1".into(),
                lat: 0.001,
                lon: 0.0,
                speed_mps: 5.0,
                heading_degrees: 90.0,
                timestamp: now,
            },
        ]);

        let first = stream.next_report().await.unwrap().unwrap();
        assert_eq!(first.lat, 0.0);
        let second = stream.next_report().await.unwrap().unwrap();
        assert_eq!(second.lat, 0.001);
        assert!(stream.next_report().await.unwrap().is_none());
    }
}
