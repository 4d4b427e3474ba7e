//! The canonical message envelope, per spec §4.5/§6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use ts_rs::TS;
use uuid::Uuid;

/// `{id, type, timestamp, source, data, target?, correlation_id?, metadata?}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Envelope {
    pub id: Uuid,
    #[serde(rename = "type")]
    #[ts(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub data: Value,
    pub target: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub metadata: Option<HashMap<String, String>>,
    /// Marks this envelope as the *response* half of a request/response
    /// round trip. Only response envelopes are routed to a waiting
    /// `MessageHub::request` caller; an outgoing request carries the same
    /// `correlation_id` but must still fan out to subscribers.
    #[serde(default)]
    pub is_response: bool,
}

impl Envelope {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: source.into(),
            data,
            target: None,
            correlation_id: None,
            metadata: None,
            is_response: false,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Tags this envelope as the reply to `correlation_id`, per spec §4.5's
    /// request/response pattern. Use this (not a bare `correlation_id`
    /// assignment) when answering a `MessageHub::request` — only envelopes
    /// built this way are routed to the waiting requester.
    pub fn with_response_to(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self.is_response = true;
        self
    }
}

/// Canonical event type names, per spec §6.
pub mod events {
    pub const COMMUTER_SPAWNED: &str = "commuter:spawned";
    pub const PASSENGER_BOARDED: &str = "passenger:boarded";
    pub const PASSENGER_ALIGHTED: &str = "passenger:alighted";
    pub const PASSENGER_EXPIRED: &str = "passenger:expired";
    pub const CONDUCTOR_REQUEST_STOP: &str = "conductor:request:stop";
    pub const CONDUCTOR_READY_DEPART: &str = "conductor:ready:depart";
    pub const SYSTEM_SERVICE_CONNECTED: &str = "system:service_connected";
    pub const SYSTEM_SERVICE_DISCONNECTED: &str = "system:service_disconnected";
    pub const SYSTEM_HEALTH: &str = "system:health";
    pub const VEHICLE_POSITION: &str = "vehicle:position";
    pub const VEHICLE_QUERY_COMMUTERS: &str = "vehicle:query:commuters";
    pub const DRIVER_ENGINE_ON: &str = "driver:engine:on";
    pub const DRIVER_ENGINE_OFF: &str = "driver:engine:off";
    pub const DRIVER_STOP_ACK: &str = "driver:stop_ack";
}
