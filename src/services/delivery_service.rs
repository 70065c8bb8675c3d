//! Webhook delivery execution service.
//!
//! Orchestrates a delivery's lifecycle: creates the delivery record,
//! executes the first attempt synchronously on submission, classifies
//! failures as retryable or terminal, schedules redeliveries, and moves
//! exhausted deliveries to the dead letter store.
//!
//! Integrates with:
//! - Circuit breakers to protect against failing destination hosts
//! - The retry queue drained by the background processor
//! - The dead letter store for deliveries that exhaust all retries

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreakerRegistry, FailureRecord};
use crate::config::EngineConfig;
use crate::error::WebhookError;
use crate::models::{
    AttemptStatus, DeadLetterEntry, DeliveryStatus, WebhookAttempt, WebhookDelivery,
    WebhookPayload,
};
use crate::retry::{RetryPolicy, RetryQueue};
use crate::services::event_publisher::{DeliveryEvent, EventPublisher};
use crate::store::{DeliveryRepository, DlqRepository};
use crate::transport::{Transport, TransportError};
use crate::validation;

/// DLQ reason when the hard attempt ceiling was hit before execution.
pub const REASON_MAX_RETRIES: &str = "max retries exceeded";
/// DLQ reason when a retryable failure spent its retry budget.
pub const REASON_DLQ_THRESHOLD: &str = "DLQ threshold reached";
/// DLQ reason for client faults that get no retry.
pub const REASON_NON_RETRYABLE: &str = "non-retryable error";

/// How one attempt failed, for classification and record keeping.
#[derive(Debug)]
enum AttemptFailure {
    Timeout,
    Connection(String),
    Request(String),
    Status { code: u16, body: String },
    CircuitOpen,
}

impl AttemptFailure {
    fn message(&self) -> String {
        match self {
            Self::Timeout => "Request timeout".to_string(),
            Self::Connection(msg) => format!("Connection failed: {msg}"),
            Self::Request(msg) => format!("Request error: {msg}"),
            Self::Status { code, .. } => format!("HTTP {code}"),
            Self::CircuitOpen => {
                "Circuit breaker open - destination temporarily unavailable".to_string()
            }
        }
    }

    fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    fn response_body(&self) -> Option<String> {
        match self {
            Self::Status { body, .. } if !body.is_empty() => Some(body.clone()),
            _ => None,
        }
    }

    fn attempt_status(&self) -> AttemptStatus {
        match self {
            Self::Timeout => AttemptStatus::Timeout,
            _ => AttemptStatus::Failed,
        }
    }
}

/// Service for webhook delivery operations.
#[derive(Clone)]
pub struct DeliveryService {
    deliveries: Arc<dyn DeliveryRepository>,
    dlq_entries: Arc<dyn DlqRepository>,
    transport: Transport,
    breakers: CircuitBreakerRegistry,
    retry_queue: Arc<RetryQueue>,
    retry_policy: RetryPolicy,
    publisher: EventPublisher,
    max_attempts: u32,
    dlq_after_attempts: u32,
    retry_on_status: HashSet<u16>,
    batch_size: usize,
    dlq_ttl: chrono::Duration,
    allow_http: bool,
    allow_internal_hosts: bool,
}

impl DeliveryService {
    /// Create a new delivery service with a shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(
        config: &EngineConfig,
        deliveries: Arc<dyn DeliveryRepository>,
        dlq_entries: Arc<dyn DlqRepository>,
        breakers: CircuitBreakerRegistry,
        retry_queue: Arc<RetryQueue>,
        publisher: EventPublisher,
    ) -> Result<Self, WebhookError> {
        Ok(Self {
            deliveries,
            dlq_entries,
            transport: Transport::new(config)?,
            breakers,
            retry_queue,
            retry_policy: config.retry_policy.clone(),
            publisher,
            max_attempts: config.max_attempts,
            dlq_after_attempts: config.dlq_after_attempts,
            retry_on_status: config.retry_on_status.clone(),
            batch_size: config.batch_size.max(1),
            dlq_ttl: config.dlq_ttl,
            allow_http: config.allow_http,
            allow_internal_hosts: config.allow_internal_hosts,
        })
    }

    /// Submit a payload for delivery.
    ///
    /// Validates the payload, creates the delivery, and executes the first
    /// attempt synchronously. Downstream delivery failures never surface
    /// here; the returned delivery carries the attempt outcome, and the
    /// terminal state is observed via [`get_delivery`](Self::get_delivery)
    /// or emitted events. Only invalid input fails the call.
    pub async fn submit(&self, payload: WebhookPayload) -> Result<WebhookDelivery, WebhookError> {
        validation::validate_payload(&payload, self.allow_http, self.allow_internal_hosts)?;

        let delivery = WebhookDelivery::new(payload);
        let delivery_id = delivery.id;

        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery_id,
            webhook_id = %delivery.payload.webhook_id,
            organization_id = %delivery.payload.organization_id,
            event_type = %delivery.payload.event_type,
            event_id = %delivery.payload.event_id,
            "Delivery submitted"
        );

        self.deliveries.insert(delivery).await?;
        self.execute_attempt(delivery_id).await?;

        self.deliveries
            .get(delivery_id)
            .await?
            .ok_or(WebhookError::DeliveryNotFound)
    }

    /// Submit a batch of payloads.
    ///
    /// Payloads are processed in batches of the configured size, bounding
    /// concurrent in-flight transport calls. Fails fast on the first
    /// invalid payload; deliveries already created stand.
    pub async fn submit_bulk(
        &self,
        payloads: Vec<WebhookPayload>,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        let mut deliveries = Vec::with_capacity(payloads.len());

        for batch in payloads.chunks(self.batch_size) {
            let results =
                futures::future::join_all(batch.iter().cloned().map(|p| self.submit(p))).await;
            for result in results {
                deliveries.push(result?);
            }
        }

        Ok(deliveries)
    }

    /// Look up a delivery by id.
    pub async fn get_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        self.deliveries.get(delivery_id).await
    }

    /// Execute the next attempt for a delivery.
    ///
    /// Invoked synchronously on submission and again by the background
    /// processor for each scheduled redelivery.
    pub async fn execute_attempt(&self, delivery_id: Uuid) -> Result<(), WebhookError> {
        let Some(mut delivery) = self.deliveries.get(delivery_id).await? else {
            return Err(WebhookError::DeliveryNotFound);
        };

        if delivery.is_terminal() {
            return Ok(());
        }

        let attempt_number = delivery.attempt_count() + 1;
        if attempt_number > self.max_attempts {
            return self.move_to_dlq(&mut delivery, REASON_MAX_RETRIES).await;
        }

        let host = validation::host_key(&delivery.payload.url)?;

        if !self.breakers.try_acquire(&host).await {
            // Rejected without any transport call; still a failed attempt
            // eligible for retry scheduling
            tracing::warn!(
                target: "webhook_delivery",
                delivery_id = %delivery.id,
                host = %host,
                attempt_number,
                "Delivery rejected - circuit breaker is open"
            );
            return self
                .handle_failure(delivery, attempt_number, &host, AttemptFailure::CircuitOpen, None)
                .await;
        }

        match self.transport.execute(&delivery.payload, delivery.id).await {
            Ok(response) if response.is_success() => {
                self.handle_success(
                    delivery,
                    attempt_number,
                    &host,
                    response.status,
                    response.body,
                    response.latency_ms,
                )
                .await
            }
            Ok(response) => {
                let latency = response.latency_ms;
                let failure = AttemptFailure::Status {
                    code: response.status,
                    body: response.body,
                };
                self.handle_failure(delivery, attempt_number, &host, failure, Some(latency))
                    .await
            }
            Err(TransportError::Timeout) => {
                self.handle_failure(delivery, attempt_number, &host, AttemptFailure::Timeout, None)
                    .await
            }
            Err(TransportError::Connection(msg)) => {
                self.handle_failure(
                    delivery,
                    attempt_number,
                    &host,
                    AttemptFailure::Connection(msg),
                    None,
                )
                .await
            }
            Err(TransportError::Request(msg)) => {
                self.handle_failure(
                    delivery,
                    attempt_number,
                    &host,
                    AttemptFailure::Request(msg),
                    None,
                )
                .await
            }
        }
    }

    /// Drain the retry queue and re-execute every due delivery.
    ///
    /// Returns the number of deliveries drained.
    pub async fn process_due_retries(&self, now: DateTime<Utc>) -> usize {
        let due = self.retry_queue.pop_due(now);
        let count = due.len();

        for delivery_id in due {
            if let Err(e) = self.execute_attempt(delivery_id).await {
                tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery_id,
                    error = %e,
                    "Failed to process scheduled retry"
                );
            }
        }

        count
    }

    /// Number of redeliveries currently waiting in the retry queue.
    #[must_use]
    pub fn pending_retries(&self) -> usize {
        self.retry_queue.len()
    }

    async fn handle_success(
        &self,
        mut delivery: WebhookDelivery,
        attempt_number: u32,
        host: &str,
        status_code: u16,
        response_body: String,
        latency_ms: u64,
    ) -> Result<(), WebhookError> {
        tracing::info!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            webhook_id = %delivery.payload.webhook_id,
            organization_id = %delivery.payload.organization_id,
            event_type = %delivery.payload.event_type,
            status_code,
            latency_ms,
            attempt_number,
            "Webhook delivery succeeded"
        );

        let body = (!response_body.is_empty()).then_some(response_body);
        delivery.attempts.push(WebhookAttempt::success(
            delivery.payload.id,
            attempt_number,
            status_code,
            body,
            latency_ms,
        ));
        delivery.status = DeliveryStatus::Delivered;
        delivery.delivered_at = Some(Utc::now());

        self.deliveries.update(delivery.clone()).await?;
        self.breakers.record_success(host).await;

        self.publisher.publish(DeliveryEvent::Delivered {
            delivery_id: delivery.id,
            webhook_id: delivery.payload.webhook_id,
            organization_id: delivery.payload.organization_id,
            event_type: delivery.payload.event_type.clone(),
            status_code,
            attempt_number,
            latency_ms,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    async fn handle_failure(
        &self,
        mut delivery: WebhookDelivery,
        attempt_number: u32,
        host: &str,
        failure: AttemptFailure,
        latency_ms: Option<u64>,
    ) -> Result<(), WebhookError> {
        let error_message = failure.message();
        let retryable = self.is_retryable(&failure);
        let will_retry = retryable && attempt_number < self.dlq_after_attempts;

        tracing::warn!(
            target: "webhook_delivery",
            delivery_id = %delivery.id,
            webhook_id = %delivery.payload.webhook_id,
            organization_id = %delivery.payload.organization_id,
            event_type = %delivery.payload.event_type,
            error = %error_message,
            attempt_number,
            retryable,
            will_retry,
            "Webhook delivery failed"
        );

        // Circuit-open rejections are synthetic; only real outcomes feed
        // the breaker
        if !matches!(failure, AttemptFailure::CircuitOpen) {
            self.breakers
                .record_failure(
                    host,
                    FailureRecord::new(error_message.clone(), failure.status_code(), latency_ms),
                )
                .await;
        }

        let mut attempt = WebhookAttempt::failure(
            delivery.payload.id,
            attempt_number,
            failure.attempt_status(),
            failure.status_code(),
            failure.response_body(),
            error_message.clone(),
            latency_ms,
        );

        if will_retry {
            let next_retry_at = self.retry_policy.next_retry_at(attempt_number, Utc::now());
            attempt.next_retry_at = Some(next_retry_at);
            delivery.attempts.push(attempt);
            self.deliveries.update(delivery.clone()).await?;

            self.retry_queue.schedule(delivery.id, next_retry_at);
            self.publisher.publish(DeliveryEvent::RetryScheduled {
                delivery_id: delivery.id,
                webhook_id: delivery.payload.webhook_id,
                attempt_number,
                error: error_message,
                next_retry_at,
                timestamp: Utc::now(),
            });

            return Ok(());
        }

        delivery.attempts.push(attempt);
        let reason = if retryable {
            REASON_DLQ_THRESHOLD
        } else {
            REASON_NON_RETRYABLE
        };
        self.move_to_dlq(&mut delivery, reason).await
    }

    /// Move a delivery to the dead letter store, terminally.
    async fn move_to_dlq(
        &self,
        delivery: &mut WebhookDelivery,
        reason: &str,
    ) -> Result<(), WebhookError> {
        let entry = DeadLetterEntry::from_delivery(delivery, reason, self.dlq_ttl);
        let now = Utc::now();

        match self.dlq_entries.insert(entry.clone()).await {
            Ok(()) => {
                delivery.status = DeliveryStatus::Dlq;
                delivery.dlq_at = Some(now);
                delivery.dlq_reason = Some(reason.to_string());
                self.deliveries.update(delivery.clone()).await?;

                tracing::warn!(
                    target: "dlq",
                    dlq_id = %entry.id,
                    delivery_id = %delivery.id,
                    webhook_id = %delivery.payload.webhook_id,
                    organization_id = %delivery.payload.organization_id,
                    event_id = %delivery.payload.event_id,
                    reason = %reason,
                    attempt_count = delivery.attempt_count(),
                    "Webhook moved to dead letter queue"
                );

                self.publisher.publish(DeliveryEvent::MovedToDlq {
                    delivery_id: delivery.id,
                    entry_id: entry.id,
                    webhook_id: delivery.payload.webhook_id,
                    organization_id: delivery.payload.organization_id,
                    reason: reason.to_string(),
                    attempt_count: delivery.attempt_count(),
                    timestamp: now,
                });
            }
            Err(e) => {
                // The attempt history stays on the delivery itself; no
                // silent loss
                delivery.status = DeliveryStatus::Failed;
                delivery.failed_at = Some(now);
                delivery.dlq_reason = Some(reason.to_string());
                self.deliveries.update(delivery.clone()).await?;

                tracing::error!(
                    target: "dlq",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to dead-letter delivery"
                );
            }
        }

        Ok(())
    }

    /// Classify a failure as retryable or terminal.
    ///
    /// Transport faults and circuit-open rejections always retry; HTTP
    /// failures retry when the status is configured retryable or >= 500.
    fn is_retryable(&self, failure: &AttemptFailure) -> bool {
        match failure {
            AttemptFailure::Timeout
            | AttemptFailure::Connection(_)
            | AttemptFailure::Request(_)
            | AttemptFailure::CircuitOpen => true,
            AttemptFailure::Status { code, .. } => {
                self.retry_on_status.contains(code) || *code >= 500
            }
        }
    }
}
