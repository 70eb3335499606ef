//! Status Model and Event Bus
//!
//! Everything the UI layer sees goes through here: per-request health and
//! tool status results plus a generic completion record for every HTTP
//! request.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Channel capacity for the connector event bus.
const CHANNEL_CAPACITY: usize = 64;

/// Result of a single health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub message: String,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self { ok: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { ok: false, message: message.into() }
    }
}

/// Result of a tool/model discovery query.
///
/// When `ok` is false the other fields carry no information; read `error`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub ok: bool,
    pub installed: bool,
    pub running: bool,
    pub models: Vec<String>,
    pub error: String,
}

impl ToolStatus {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }

    /// `installed`, only when the status itself is trustworthy
    pub fn installed(&self) -> Option<bool> {
        self.ok.then_some(self.installed)
    }

    /// `running`, only when the status itself is trustworthy
    pub fn running(&self) -> Option<bool> {
        self.ok.then_some(self.running)
    }
}

/// Generic record published for every completed transport request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCompletion {
    pub url: String,
    pub ok: bool,
    pub body: String,
    pub error: String,
}

/// Events consumed by the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectorEvent {
    Health(HealthStatus),
    ToolStatus(ToolStatus),
    RequestFinished(RequestCompletion),
    Started { ok: bool, message: String },
    Restarted { ok: bool },
}

/// Pub/sub bus for connector events backed by `tokio::sync::broadcast`.
///
/// Subscribers that fall behind the capacity skip missed events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConnectorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn emit(&self, event: ConnectorEvent) {
        log::debug!("[Connector] event: {:?}", event);
        // Ignore error if no subscribers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectorEvent> {
        self.tx.subscribe()
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_tool_status_hides_fields() {
        let status = ToolStatus::failed("boom");
        assert!(!status.ok);
        assert_eq!(status.installed(), None);
        assert_eq!(status.running(), None);
        assert!(status.models.is_empty());
        assert_eq!(status.error, "boom");
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ConnectorEvent::Health(HealthStatus::healthy("OK"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "health");
        assert_eq!(json["ok"], true);
        assert_eq!(json["message"], "OK");

        let json = serde_json::to_value(ConnectorEvent::Restarted { ok: false }).unwrap();
        assert_eq!(json["type"], "restarted");
    }

    #[tokio::test]
    async fn every_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(ConnectorEvent::Restarted { ok: true });

        assert_eq!(a.recv().await.unwrap(), ConnectorEvent::Restarted { ok: true });
        assert_eq!(b.recv().await.unwrap(), ConnectorEvent::Restarted { ok: true });
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        EventBus::new().emit(ConnectorEvent::Health(HealthStatus::failed("down")));
    }
}
