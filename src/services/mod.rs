//! Engine services: dispatch, dead letter queue, metrics, and events.

pub mod delivery_service;
pub mod dlq_service;
pub mod event_publisher;
pub mod metrics_service;
