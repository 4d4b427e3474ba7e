//! `MessageHub` — single-process pub/sub fabric with four namespaces,
//! per spec §4.5.
//!
//! Grounded on the trait-based processor idiom of `message_processors.rs`
//! (subscribers are handles, not direct references between components —
//! spec §9's "break the cycle with an explicit hub boundary") and the
//! subject-keyed publish shape of `nats_publisher.rs` for the optional
//! NATS-backed transport in `hub::nats`.
//!
//! Request/response uses a `correlation_id` and a `oneshot` channel
//! registered before publish, the same shape a CMS HTTP round trip takes
//! but in-process; a response envelope carrying a known `correlation_id`
//! is routed straight to the waiting oneshot instead of fanned out to
//! subscribers.

pub mod envelope;
#[cfg(feature = "nats-transport")]
pub mod nats;

pub use envelope::Envelope;

use crate::errors::CoreError;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;
use uuid::Uuid;

/// The four logical namespaces of spec §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Depot,
    Route,
    Vehicle,
    System,
}

/// Optional outbound transport for the hub, e.g. a NATS-backed one for
/// multi-process deployments. In-process delivery (the default) never
/// needs this.
#[async_trait::async_trait]
pub trait HubTransport: Send + Sync {
    async fn publish(&self, namespace: Namespace, envelope: &Envelope) -> anyhow::Result<()>;
}

struct Subscriber {
    id: String,
    /// `"*"` matches every event type in the namespace.
    event_type: String,
    sender: mpsc::UnboundedSender<Envelope>,
}

/// Cheap to clone: subscriber lists and pending requests live behind
/// `DashMap`s, the same per-key concurrency shape the reservoirs use.
#[derive(Clone)]
pub struct MessageHub {
    subscribers: Arc<DashMap<Namespace, Vec<Subscriber>>>,
    pending_requests: Arc<DashMap<Uuid, oneshot::Sender<Envelope>>>,
    transport: Option<Arc<dyn HubTransport>>,
}

impl MessageHub {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            pending_requests: Arc::new(DashMap::new()),
            transport: None,
        }
    }

    pub fn with_transport(transport: Arc<dyn HubTransport>) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            pending_requests: Arc::new(DashMap::new()),
            transport: Some(transport),
        }
    }

    /// Register for messages of `event_type` ("*" for all) in `namespace`.
    pub fn subscribe(
        &self,
        namespace: Namespace,
        subscriber_id: impl Into<String>,
        event_type: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<Envelope> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.entry(namespace).or_default().push(Subscriber {
            id: subscriber_id.into(),
            event_type: event_type.into(),
            sender,
        });
        receiver
    }

    pub fn unsubscribe(&self, namespace: Namespace, subscriber_id: &str) {
        if let Some(mut subs) = self.subscribers.get_mut(&namespace) {
            subs.retain(|s| s.id != subscriber_id);
        }
    }

    /// Fan out `envelope` to every matching subscriber in `namespace`, or
    /// to the single subscriber named by `envelope.target` if set. If
    /// `envelope.is_response` is set and its `correlation_id` matches a
    /// pending `request`, routes directly to that waiter instead of
    /// fanning out. An outgoing request carries the same `correlation_id`
    /// but `is_response == false`, so it always reaches subscribers.
    pub async fn publish(&self, namespace: Namespace, envelope: Envelope) {
        if envelope.is_response
            && let Some(correlation_id) = envelope.correlation_id
            && let Some((_, waiter)) = self.pending_requests.remove(&correlation_id)
        {
            let _ = waiter.send(envelope);
            return;
        }

        if let Some(transport) = &self.transport
            && let Err(e) = transport.publish(namespace, &envelope).await
        {
            warn!(error = %e, ?namespace, "hub transport publish failed");
        }

        let Some(subs) = self.subscribers.get(&namespace) else {
            return;
        };
        for sub in subs.iter() {
            if let Some(target) = &envelope.target
                && &sub.id != target
            {
                continue;
            }
            if sub.event_type != "*" && sub.event_type != envelope.event_type {
                continue;
            }
            let _ = sub.sender.send(envelope.clone());
        }
    }

    /// Send `envelope` with a fresh `correlation_id` and await the first
    /// matching response, per spec §4.5/§6 (default timeout 5 s).
    pub async fn request(
        &self,
        namespace: Namespace,
        mut envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope, CoreError> {
        let correlation_id = Uuid::new_v4();
        envelope.correlation_id = Some(correlation_id);
        let (tx, rx) = oneshot::channel();
        self.pending_requests.insert(correlation_id, tx);

        self.publish(namespace, envelope).await;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                self.pending_requests.remove(&correlation_id);
                Err(CoreError::Unavailable("hub request channel closed before reply".into()))
            }
            Err(_) => {
                self.pending_requests.remove(&correlation_id);
                Err(CoreError::Timeout(timeout))
            }
        }
    }

    /// Reply to a request whose `correlation_id` is still pending. A thin
    /// wrapper over `publish` that tags `envelope` as a response so it is
    /// routed to the waiting requester instead of fanned out.
    pub async fn respond(&self, namespace: Namespace, envelope: Envelope, correlation_id: Uuid) {
        self.publish(namespace, envelope.with_response_to(correlation_id)).await;
    }
}

impl Default for MessageHub {
    fn default() -> Self {
        Self::new()
    }
}
