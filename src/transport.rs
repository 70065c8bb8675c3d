//! HTTP transport for delivery attempts.
//!
//! Executes exactly one attempt per call, bounded by the per-attempt
//! timeout. Responses of any status are returned to the dispatcher for
//! classification; only network-level faults surface as errors. Retry
//! policy lives entirely in the dispatcher.

use std::collections::HashMap;
use std::time::Instant;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::crypto;
use crate::error::WebhookError;
use crate::models::WebhookPayload;

/// Response bodies recorded on attempts are capped to this many chars.
const MAX_RESPONSE_BODY_CHARS: usize = 4096;

/// A network-level transport fault. HTTP error statuses are not faults;
/// they come back as [`TransportResponse`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl TransportError {
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Result of one completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    /// Response body, truncated to a bounded length.
    pub body: String,
    pub latency_ms: u64,
    /// Headers that were sent, recorded for operator triage.
    pub request_headers: HashMap<String, String>,
}

impl TransportResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes single delivery attempts over a shared HTTP client.
#[derive(Clone)]
pub struct Transport {
    client: Client,
    signing_secret: Option<String>,
    signature_header: String,
}

impl Transport {
    /// Build a transport from the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns `WebhookError::Internal` if the HTTP client cannot be built.
    pub fn new(config: &EngineConfig) -> Result<Self, WebhookError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent("janua-webhooks/1.0")
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            signing_secret: config.signing_secret.clone(),
            signature_header: config.signature_header.clone(),
        })
    }

    /// Execute one HTTP attempt for a payload.
    ///
    /// Injects the identification headers (`X-Webhook-ID`,
    /// `X-Webhook-Event`, `X-Webhook-Timestamp`) and the signature header,
    /// then applies the payload's own headers on top.
    pub async fn execute(
        &self,
        payload: &WebhookPayload,
        delivery_id: Uuid,
    ) -> Result<TransportResponse, TransportError> {
        let method = Method::from_bytes(payload.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| TransportError::Request(format!("Invalid HTTP method: {e}")))?;

        let body_bytes = payload.body.to_string().into_bytes();
        let timestamp = Utc::now().timestamp();

        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "Content-Type", "application/json");
        insert_header(&mut headers, "X-Webhook-ID", &delivery_id.to_string());
        insert_header(&mut headers, "X-Webhook-Event", &payload.event_type);
        insert_header(&mut headers, "X-Webhook-Timestamp", &timestamp.to_string());

        // Caller-provided signature wins over one computed here
        let signature = payload.signature.clone().or_else(|| {
            self.signing_secret
                .as_ref()
                .map(|secret| crypto::sign_payload_at(secret, &payload.body, timestamp))
        });
        if let Some(signature) = signature {
            insert_header(&mut headers, &self.signature_header, &signature);
        }

        for (name, value) in &payload.headers {
            insert_header(&mut headers, name, value);
        }

        let request_headers = headers_to_map(&headers);

        let start = Instant::now();
        let result = self
            .client
            .request(method, &payload.url)
            .headers(headers)
            .body(body_bytes)
            .send()
            .await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_RESPONSE_BODY_CHARS)
                    .collect::<String>();

                Ok(TransportResponse {
                    status,
                    body,
                    latency_ms,
                    request_headers,
                })
            }
            Err(e) => {
                if e.is_timeout() {
                    Err(TransportError::Timeout)
                } else if e.is_connect() {
                    Err(TransportError::Connection(e.to_string()))
                } else {
                    Err(TransportError::Request(e.to_string()))
                }
            }
        }
    }
}

/// Insert a header, skipping values that cannot be represented.
fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    } else {
        tracing::warn!(
            target: "webhook_delivery",
            header = %name,
            "Skipping header that cannot be represented on the wire"
        );
    }
}

/// Convert a HeaderMap to a plain string map for attempt records.
fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}
