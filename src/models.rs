//! Core data model for webhook delivery: payloads, attempts, deliveries,
//! and dead letter entries.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An event payload to be delivered to an external HTTP endpoint.
///
/// Created once by the caller and never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub id: Uuid,
    /// The registered webhook this payload belongs to.
    pub webhook_id: Uuid,
    pub organization_id: Uuid,
    /// Destination URL.
    pub url: String,
    /// HTTP method used for the delivery request.
    pub method: String,
    /// Caller-supplied headers, applied on top of the injected ones.
    pub headers: HashMap<String, String>,
    /// Request body, serialized as JSON on the wire.
    pub body: serde_json::Value,
    pub event_type: String,
    /// Receivers deduplicate on this; delivery is at-least-once.
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Precomputed signature; when absent the transport signs with the
    /// configured secret.
    pub signature: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl WebhookPayload {
    /// Create a payload for an event with default method (POST) and no
    /// extra headers.
    #[must_use]
    pub fn new(
        webhook_id: Uuid,
        organization_id: Uuid,
        url: impl Into<String>,
        event_type: impl Into<String>,
        body: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            webhook_id,
            organization_id,
            url: url.into(),
            method: "POST".to_string(),
            headers: HashMap::new(),
            body,
            event_type: event_type.into(),
            event_id: Uuid::new_v4(),
            created_at: Utc::now(),
            signature: None,
            metadata: None,
        }
    }

    /// Override the HTTP method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Add a caller-supplied header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Attach free-form metadata (e.g. ordering keys for downstream
    /// reconciliation).
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
    Timeout,
    Dlq,
}

impl AttemptStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Dlq => "dlq",
        }
    }
}

/// One concrete HTTP request/response (or fault) within a delivery.
///
/// Attempt numbers within a delivery are strictly increasing from 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAttempt {
    pub id: Uuid,
    pub payload_id: Uuid,
    pub attempt_number: u32,
    pub status: AttemptStatus,
    pub status_code: Option<u16>,
    pub response_body: Option<String>,
    pub error: Option<String>,
    pub latency_ms: Option<u64>,
    pub executed_at: DateTime<Utc>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl WebhookAttempt {
    /// Record a successful attempt.
    #[must_use]
    pub fn success(
        payload_id: Uuid,
        attempt_number: u32,
        status_code: u16,
        response_body: Option<String>,
        latency_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload_id,
            attempt_number,
            status: AttemptStatus::Success,
            status_code: Some(status_code),
            response_body,
            error: None,
            latency_ms: Some(latency_ms),
            executed_at: Utc::now(),
            next_retry_at: None,
        }
    }

    /// Record a failed attempt. `status` distinguishes timeouts from other
    /// failures; `status_code` is present for HTTP-level failures only.
    #[must_use]
    pub fn failure(
        payload_id: Uuid,
        attempt_number: u32,
        status: AttemptStatus,
        status_code: Option<u16>,
        response_body: Option<String>,
        error: impl Into<String>,
        latency_ms: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload_id,
            attempt_number,
            status,
            status_code,
            response_body,
            error: Some(error.into()),
            latency_ms,
            executed_at: Utc::now(),
            next_retry_at: None,
        }
    }
}

/// Lifecycle state of a delivery.
///
/// Transitions are monotone: `Pending` moves to `Delivered` or `Dlq` and
/// never back. Re-driving a dead-lettered payload creates a new delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    /// Terminal failure that could not be dead-lettered (the DLQ store
    /// rejected the entry). The attempt history is preserved on the
    /// delivery itself.
    Failed,
    Dlq,
}

impl DeliveryStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Dlq => "dlq",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One logical delivery of a payload, encompassing one or more attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub payload: WebhookPayload,
    pub attempts: Vec<WebhookAttempt>,
    pub status: DeliveryStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub dlq_at: Option<DateTime<Utc>>,
    pub dlq_reason: Option<String>,
}

impl WebhookDelivery {
    /// Create a fresh pending delivery for a payload.
    #[must_use]
    pub fn new(payload: WebhookPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            attempts: Vec::new(),
            status: DeliveryStatus::Pending,
            created_at: Utc::now(),
            delivered_at: None,
            failed_at: None,
            dlq_at: None,
            dlq_reason: None,
        }
    }

    #[must_use]
    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    #[must_use]
    pub fn latest_attempt(&self) -> Option<&WebhookAttempt> {
        self.attempts.last()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A delivery that exhausted its retries or failed non-retryably, held for
/// manual or bulk re-drive until it expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub delivery_id: Uuid,
    pub payload: WebhookPayload,
    pub attempts: Vec<WebhookAttempt>,
    pub reason: String,
    /// Unique error strings across the attempt history, in first-seen order.
    pub error_summary: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub can_retry: bool,
    /// Re-drive attempts consumed so far; `can_retry` is forced false once
    /// the budget is spent.
    pub retry_count: u32,
}

impl DeadLetterEntry {
    /// Build an entry from a terminally failed delivery.
    #[must_use]
    pub fn from_delivery(
        delivery: &WebhookDelivery,
        reason: impl Into<String>,
        ttl: chrono::Duration,
    ) -> Self {
        let mut error_summary: Vec<String> = Vec::new();
        for attempt in &delivery.attempts {
            if let Some(err) = &attempt.error {
                if !error_summary.iter().any(|e| e == err) {
                    error_summary.push(err.clone());
                }
            }
        }

        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            delivery_id: delivery.id,
            payload: delivery.payload.clone(),
            attempts: delivery.attempts.clone(),
            reason: reason.into(),
            error_summary,
            created_at: now,
            expires_at: now + ttl,
            can_retry: true,
            retry_count: 0,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
