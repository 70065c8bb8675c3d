//! Reliable webhook delivery engine.
//!
//! Provides at-least-once delivery of event payloads to external HTTP
//! endpoints with HMAC-SHA256 signing, exponential backoff retries,
//! per-host circuit breaking, and a dead letter store with re-drive.

pub mod circuit_breaker;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod models;
pub mod retry;
pub mod services;
pub mod store;
pub mod transport;
pub mod validation;
pub mod worker;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitBreakerStatus,
    CircuitState, FailureRecord,
};
pub use config::EngineConfig;
pub use engine::WebhookEngine;
pub use error::WebhookError;
pub use models::{
    AttemptStatus, DeadLetterEntry, DeliveryStatus, WebhookAttempt, WebhookDelivery,
    WebhookPayload,
};
pub use retry::{RetryPolicy, RetryQueue};
pub use services::delivery_service::DeliveryService;
pub use services::dlq_service::{BulkRetryOutcome, DlqFilter, DlqService};
pub use services::event_publisher::{DeliveryEvent, EventPublisher};
pub use services::metrics_service::{MetricsService, MetricsSnapshot};
pub use store::{
    DeliveryRepository, DlqRepository, InMemoryDeliveryRepository, InMemoryDlqRepository,
};
pub use worker::{BackgroundProcessor, WorkerHandle};
