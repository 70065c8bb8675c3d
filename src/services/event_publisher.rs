//! Delivery lifecycle events, published on a tokio broadcast channel for
//! downstream observability collaborators.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A lifecycle event emitted by the delivery engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryEvent {
    /// A delivery reached its destination.
    Delivered {
        delivery_id: Uuid,
        webhook_id: Uuid,
        organization_id: Uuid,
        event_type: String,
        status_code: u16,
        attempt_number: u32,
        latency_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A failed attempt was queued for redelivery.
    RetryScheduled {
        delivery_id: Uuid,
        webhook_id: Uuid,
        attempt_number: u32,
        error: String,
        next_retry_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },
    /// A delivery failed terminally and was dead-lettered.
    MovedToDlq {
        delivery_id: Uuid,
        entry_id: Uuid,
        webhook_id: Uuid,
        organization_id: Uuid,
        reason: String,
        attempt_count: u32,
        timestamp: DateTime<Utc>,
    },
    /// Expired dead letter entries were purged.
    DlqPurged {
        entry_ids: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },
}

/// Publisher that fans delivery events out to subscribers.
#[derive(Clone)]
pub struct EventPublisher {
    sender: tokio::sync::broadcast::Sender<DeliveryEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers. Fire-and-forget: absent or
    /// lagging subscribers never block delivery.
    pub fn publish(&self, event: DeliveryEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!(
                target: "webhook_delivery",
                "No active subscribers to receive delivery event"
            );
        }
    }

    /// Get a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DeliveryEvent> {
        self.sender.subscribe()
    }
}
