//! The engine facade: wires the dispatcher, circuit breakers, retry
//! scheduler, dead letter store, metrics, and background processor behind
//! one entry point.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitBreakerStatus};
use crate::config::EngineConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::{DeadLetterEntry, WebhookDelivery, WebhookPayload};
use crate::retry::RetryQueue;
use crate::services::delivery_service::DeliveryService;
use crate::services::dlq_service::{BulkRetryOutcome, DlqFilter, DlqService};
use crate::services::event_publisher::{DeliveryEvent, EventPublisher};
use crate::services::metrics_service::{MetricsService, MetricsSnapshot};
use crate::store::{
    DeliveryRepository, DlqRepository, InMemoryDeliveryRepository, InMemoryDlqRepository,
};
use crate::worker::{BackgroundProcessor, WorkerHandle};

/// Broadcast capacity for delivery lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// The webhook delivery engine.
///
/// Cheap to clone via the shared services; every operation may run
/// concurrently with the background processor and with other callers.
#[derive(Clone)]
pub struct WebhookEngine {
    config: EngineConfig,
    delivery: Arc<DeliveryService>,
    dlq: Arc<DlqService>,
    metrics: MetricsService,
    breakers: CircuitBreakerRegistry,
    publisher: EventPublisher,
}

impl WebhookEngine {
    /// Create an engine backed by the in-memory stores.
    pub fn new(config: EngineConfig) -> Result<Self, WebhookError> {
        Self::with_repositories(
            config,
            Arc::new(InMemoryDeliveryRepository::new()),
            Arc::new(InMemoryDlqRepository::new()),
        )
    }

    /// Create an engine against caller-supplied stores (e.g. a durable
    /// backend implementing the repository traits).
    pub fn with_repositories(
        config: EngineConfig,
        deliveries: Arc<dyn DeliveryRepository>,
        dlq_entries: Arc<dyn DlqRepository>,
    ) -> Result<Self, WebhookError> {
        let publisher = EventPublisher::new(EVENT_CHANNEL_CAPACITY);
        let breakers = CircuitBreakerRegistry::new(config.breaker.clone());
        let retry_queue = Arc::new(RetryQueue::new());

        let delivery = Arc::new(DeliveryService::new(
            &config,
            deliveries.clone(),
            dlq_entries.clone(),
            breakers.clone(),
            retry_queue,
            publisher.clone(),
        )?);

        let dlq = Arc::new(DlqService::new(
            dlq_entries.clone(),
            delivery.clone(),
            publisher.clone(),
        ));

        let metrics = MetricsService::new(deliveries, dlq_entries);

        Ok(Self {
            config,
            delivery,
            dlq,
            metrics,
            breakers,
            publisher,
        })
    }

    /// Submit a payload for delivery; the first attempt runs before this
    /// returns. Fails only on invalid input.
    pub async fn submit(&self, payload: WebhookPayload) -> Result<WebhookDelivery, WebhookError> {
        self.delivery.submit(payload).await
    }

    /// Submit a batch of payloads, processed in bounded-concurrency
    /// batches.
    pub async fn submit_bulk(
        &self,
        payloads: Vec<WebhookPayload>,
    ) -> Result<Vec<WebhookDelivery>, WebhookError> {
        self.delivery.submit_bulk(payloads).await
    }

    /// Look up a delivery and its attempt history.
    pub async fn get_delivery(
        &self,
        delivery_id: Uuid,
    ) -> Result<Option<WebhookDelivery>, WebhookError> {
        self.delivery.get_delivery(delivery_id).await
    }

    /// List dead letter entries matching the filter, newest first.
    pub async fn list_dlq(&self, filter: &DlqFilter) -> Result<Vec<DeadLetterEntry>, WebhookError> {
        self.dlq.list(filter).await
    }

    /// Look up a single dead letter entry.
    pub async fn get_dlq_entry(
        &self,
        entry_id: Uuid,
    ) -> Result<Option<DeadLetterEntry>, WebhookError> {
        self.dlq.get(entry_id).await
    }

    /// Re-drive one dead letter entry as a new delivery.
    pub async fn retry_dlq(&self, entry_id: Uuid) -> Result<WebhookDelivery, WebhookError> {
        self.dlq.retry(entry_id).await
    }

    /// Re-drive all retryable entries matching the filter.
    pub async fn bulk_retry_dlq(
        &self,
        filter: &DlqFilter,
    ) -> Result<BulkRetryOutcome, WebhookError> {
        self.dlq.bulk_retry(filter).await
    }

    /// Delete expired dead letter entries now, independent of the
    /// background sweep.
    pub async fn purge_expired_dlq(&self) -> Result<usize, WebhookError> {
        self.dlq.purge_expired().await
    }

    /// Metrics snapshot, optionally filtered to one organization.
    pub async fn get_metrics(
        &self,
        organization_id: Option<Uuid>,
    ) -> Result<MetricsSnapshot, WebhookError> {
        self.metrics.snapshot(organization_id).await
    }

    /// Verify an inbound webhook signature. Offered for receivers
    /// elsewhere in the platform to validate deliveries.
    #[must_use]
    pub fn verify_signature(signature: &str, body: &serde_json::Value, secret: &str) -> bool {
        crypto::verify_signature(signature, body, secret)
    }

    /// Subscribe to delivery lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<DeliveryEvent> {
        self.publisher.subscribe()
    }

    /// Drain due retries once, as the background processor would.
    /// Useful for embedders that pump the engine manually.
    pub async fn process_due_retries(&self) -> usize {
        self.delivery.process_due_retries(Utc::now()).await
    }

    /// Drain retries due at an explicit instant.
    pub async fn process_due_retries_at(&self, now: DateTime<Utc>) -> usize {
        self.delivery.process_due_retries(now).await
    }

    /// Number of redeliveries currently waiting in the retry queue.
    #[must_use]
    pub fn pending_retries(&self) -> usize {
        self.delivery.pending_retries()
    }

    /// Circuit breaker status for one destination host.
    pub async fn circuit_status(&self, host: &str) -> Option<CircuitBreakerStatus> {
        self.breakers.status(host).await
    }

    /// Circuit breaker status for every known destination host.
    pub async fn circuit_statuses(&self) -> Vec<CircuitBreakerStatus> {
        self.breakers.all_status().await
    }

    /// Start the background processor for this engine.
    #[must_use]
    pub fn start_background(&self) -> WorkerHandle {
        BackgroundProcessor::new(
            self.delivery.clone(),
            self.dlq.clone(),
            self.config.tick_interval,
        )
        .start()
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
