//! Engine configuration.

use std::collections::HashSet;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;

/// Default signature header name.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Configuration for the webhook delivery engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Shared secret for HMAC signing. When absent, deliveries are sent
    /// unsigned unless the payload carries a precomputed signature.
    pub signing_secret: Option<String>,
    /// Header carrying the signature.
    pub signature_header: String,
    /// Hard timeout for a single transport attempt.
    pub request_timeout: Duration,
    /// Hard ceiling on attempts per delivery, enforced before any
    /// transport call.
    pub max_attempts: u32,
    /// Retryable failures dead-letter once this many attempts have run.
    /// Effectively the operative bound for 5xx/429 errors, below
    /// `max_attempts`; both knobs are intentionally kept.
    pub dlq_after_attempts: u32,
    /// Response status codes treated as retryable in addition to the
    /// blanket >= 500 rule.
    pub retry_on_status: HashSet<u16>,
    pub retry_policy: RetryPolicy,
    pub breaker: CircuitBreakerConfig,
    /// How long dead letter entries are kept before the purge sweep
    /// deletes them.
    pub dlq_ttl: chrono::Duration,
    /// Bulk submission batch size, bounding concurrent in-flight
    /// transport calls.
    pub batch_size: usize,
    /// Background processor tick interval.
    pub tick_interval: Duration,
    /// Permit plain-HTTP destinations (dev/test).
    pub allow_http: bool,
    /// Permit private/internal destination hosts (dev/test).
    pub allow_internal_hosts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            request_timeout: Duration::from_secs(30),
            max_attempts: 5,
            dlq_after_attempts: 3,
            retry_on_status: [429, 500, 502, 503, 504].into_iter().collect(),
            retry_policy: RetryPolicy::default(),
            breaker: CircuitBreakerConfig::default(),
            dlq_ttl: chrono::Duration::days(30),
            batch_size: 10,
            tick_interval: Duration::from_secs(5),
            allow_http: false,
            allow_internal_hosts: false,
        }
    }
}

impl EngineConfig {
    /// Set the HMAC signing secret.
    #[must_use]
    pub fn with_signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into());
        self
    }

    /// Override the signature header name.
    #[must_use]
    pub fn with_signature_header(mut self, header: impl Into<String>) -> Self {
        self.signature_header = header.into();
        self
    }

    /// Set the per-attempt transport timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the hard attempt ceiling.
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the DLQ threshold for retryable failures.
    #[must_use]
    pub fn with_dlq_after_attempts(mut self, attempts: u32) -> Self {
        self.dlq_after_attempts = attempts;
        self
    }

    /// Replace the retryable status code set.
    #[must_use]
    pub fn with_retry_on_status(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on_status = statuses.into_iter().collect();
        self
    }

    /// Replace the retry delay policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Replace the circuit breaker configuration.
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    /// Set the dead letter entry TTL.
    #[must_use]
    pub fn with_dlq_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.dlq_ttl = ttl;
        self
    }

    /// Set the bulk submission batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Set the background processor tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Permit plain-HTTP destinations (dev/test).
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    /// Permit private/internal destination hosts (dev/test).
    #[must_use]
    pub fn with_allow_internal_hosts(mut self, allow: bool) -> Self {
        self.allow_internal_hosts = allow;
        self
    }
}
