//! Error types for the webhook delivery engine.

/// Webhook engine error variants.
///
/// Delivery failures are never surfaced through this type; they are
/// recorded on the delivery's attempt history and reported via events.
/// Errors here cover invalid input and storage faults only.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("SSRF protection: {0}")]
    SsrfDetected(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Delivery not found")]
    DeliveryNotFound,

    #[error("DLQ entry not found")]
    DlqEntryNotFound,

    #[error("DLQ entry has exhausted its retry budget")]
    DlqEntryNotRetryable,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
