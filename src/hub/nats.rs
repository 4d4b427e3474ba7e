//! NATS-backed `HubTransport`, feature-gated behind `nats-transport`.
//!
//! Grounded on the subject-per-entity publish shape of `nats_publisher.rs`
//! (`"aprs.aircraft.{registration}"`): here the subject is
//! `"commuter.{namespace}.{event_type}"`, letting external subscribers
//! filter with NATS wildcard subjects (`commuter.vehicle.>`) the way the
//! teacher's consumers filter on `aprs.aircraft.*`.

use super::{Envelope, HubTransport, Namespace};
use anyhow::{Context, Result};
use async_nats::Client;
use tracing::debug;

pub struct NatsHubTransport {
    client: Client,
}

impl NatsHubTransport {
    pub async fn connect(nats_url: &str) -> Result<Self> {
        let client = async_nats::connect(nats_url)
            .await
            .with_context(|| format!("failed to connect to NATS at {nats_url}"))?;
        Ok(Self { client })
    }

    fn subject(namespace: Namespace, event_type: &str) -> String {
        let namespace = match namespace {
            Namespace::Depot => "depot",
            Namespace::Route => "route",
            Namespace::Vehicle => "vehicle",
            Namespace::System => "system",
        };
        format!("commuter.{namespace}.{event_type}")
    }
}

#[async_trait::async_trait]
impl HubTransport for NatsHubTransport {
    async fn publish(&self, namespace: Namespace, envelope: &Envelope) -> Result<()> {
        let subject = Self::subject(namespace, &envelope.event_type);
        let payload = serde_json::to_vec(envelope)?;
        self.client.publish(subject.clone(), payload.into()).await?;
        debug!(subject, envelope_id = %envelope.id, "published envelope to NATS");
        Ok(())
    }
}
