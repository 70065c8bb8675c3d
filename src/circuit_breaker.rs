//! Circuit breaker pattern implementation for webhook delivery.
//!
//! One independent breaker exists per destination host, so sustained
//! failures against one receiver never block or mislead deliveries to
//! another. Admission checks and state transitions happen under the
//! registry lock, keeping the half-open probe budget exact under
//! concurrent callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - deliveries proceed.
    #[default]
    Closed,
    /// Circuit tripped - deliveries rejected immediately.
    Open,
    /// Testing recovery - a bounded number of probe requests pass through.
    HalfOpen,
}

impl CircuitState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Cool-down before an open circuit admits a probe.
    pub timeout: Duration,
    /// Consecutive successes in half-open required to close.
    pub success_threshold: u32,
    /// Probe requests admitted while half-open before forcing back open.
    pub half_open_max_attempts: u32,
    /// Maximum number of recent failures kept for diagnostics.
    pub max_failure_history: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
            success_threshold: 3,
            half_open_max_attempts: 5,
            max_failure_history: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with custom failure threshold.
    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Create a new configuration with custom cool-down.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create a new configuration with custom success threshold.
    #[must_use]
    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Create a new configuration with custom half-open probe budget.
    #[must_use]
    pub fn with_half_open_max_attempts(mut self, attempts: u32) -> Self {
        self.half_open_max_attempts = attempts;
        self
    }

    /// Create a new configuration with custom failure history size.
    #[must_use]
    pub fn with_max_failure_history(mut self, size: usize) -> Self {
        self.max_failure_history = size;
        self
    }
}

/// Record of a single delivery failure for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    pub status_code: Option<u16>,
    pub latency_ms: Option<u64>,
}

impl FailureRecord {
    /// Create a new failure record.
    #[must_use]
    pub fn new(error: String, status_code: Option<u16>, latency_ms: Option<u64>) -> Self {
        Self {
            timestamp: Utc::now(),
            error,
            status_code,
            latency_ms,
        }
    }
}

/// Circuit breaker for a single destination host.
#[derive(Debug)]
pub struct CircuitBreaker {
    host: String,
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    /// Consecutive successes, meaningful only while half-open.
    success_count: u32,
    /// Probes admitted during the current half-open window.
    half_open_attempts: u32,
    recent_failures: Vec<FailureRecord>,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with default closed state.
    #[must_use]
    pub fn new(host: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            host: host.into(),
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_attempts: 0,
            recent_failures: Vec::new(),
            last_failure_at: None,
            last_success_at: None,
            opened_at: None,
        }
    }

    /// Get the destination host this circuit breaker guards.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the current circuit state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Get the current consecutive failure count.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Get recent failure records.
    #[must_use]
    pub fn recent_failures(&self) -> &[FailureRecord] {
        &self.recent_failures
    }

    /// Get the last failure timestamp.
    #[must_use]
    pub fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at
    }

    /// Get the last success timestamp.
    #[must_use]
    pub fn last_success_at(&self) -> Option<DateTime<Utc>> {
        self.last_success_at
    }

    /// Get the timestamp when the circuit was opened.
    #[must_use]
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.opened_at
    }

    /// Check whether a delivery attempt may proceed, consuming a probe slot
    /// when half-open.
    ///
    /// Handles the automatic Open -> HalfOpen transition once the cool-down
    /// has elapsed, and forces HalfOpen -> Open when the probe budget is
    /// spent without the circuit closing.
    pub fn try_acquire(&mut self) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.cooldown_elapsed() {
                    self.state = CircuitState::HalfOpen;
                    self.success_count = 0;
                    self.half_open_attempts = 1;
                    tracing::info!(
                        target: "circuit_breaker",
                        host = %self.host,
                        "Circuit breaker transitioning to half-open for probe"
                    );
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_attempts >= self.config.half_open_max_attempts {
                    // Probe budget spent without closing
                    self.reopen();
                    tracing::warn!(
                        target: "circuit_breaker",
                        host = %self.host,
                        probes = self.config.half_open_max_attempts,
                        "Circuit breaker reopened after probe budget exhausted"
                    );
                    false
                } else {
                    self.half_open_attempts += 1;
                    true
                }
            }
        }
    }

    /// Record a successful delivery.
    ///
    /// Resets the failure count; closes the circuit after enough
    /// consecutive half-open successes.
    pub fn record_success(&mut self) {
        self.last_success_at = Some(Utc::now());

        match self.state {
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.half_open_attempts = 0;
                    self.recent_failures.clear();
                    self.opened_at = None;
                    tracing::info!(
                        target: "circuit_breaker",
                        host = %self.host,
                        "Circuit breaker closed after successful probes"
                    );
                }
            }
            CircuitState::Closed => {
                self.failure_count = 0;
            }
            CircuitState::Open => {
                tracing::warn!(
                    target: "circuit_breaker",
                    host = %self.host,
                    "Unexpected success recorded while circuit is open"
                );
            }
        }
    }

    /// Record a delivery failure.
    ///
    /// Increments the failure count and opens the circuit at the threshold;
    /// any failure while half-open reopens immediately.
    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.last_failure_at = Some(Utc::now());
        self.failure_count += 1;

        self.recent_failures.push(failure);
        while self.recent_failures.len() > self.config.max_failure_history {
            self.recent_failures.remove(0);
        }

        match self.state {
            CircuitState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    self.reopen();
                    tracing::warn!(
                        target: "circuit_breaker",
                        host = %self.host,
                        failure_count = self.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opened due to consecutive failures"
                    );
                }
            }
            CircuitState::HalfOpen => {
                self.reopen();
                tracing::warn!(
                    target: "circuit_breaker",
                    host = %self.host,
                    "Circuit breaker reopened after failed probe"
                );
            }
            CircuitState::Open => {
                // Already open - just track the failure
            }
        }
    }

    fn reopen(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Utc::now());
        self.success_count = 0;
        self.half_open_attempts = 0;
    }

    /// Whether the cool-down since the last failure (or forced reopen) has
    /// elapsed.
    fn cooldown_elapsed(&self) -> bool {
        let reference = match (self.last_failure_at, self.opened_at) {
            (Some(f), Some(o)) => Some(f.max(o)),
            (a, b) => a.or(b),
        };
        let Some(reference) = reference else {
            return true;
        };
        let elapsed = Utc::now().signed_duration_since(reference);
        elapsed.to_std().map(|e| e >= self.config.timeout).unwrap_or(false)
    }
}

/// Status information for a circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub host: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub recent_failures: Vec<FailureRecord>,
}

impl From<&CircuitBreaker> for CircuitBreakerStatus {
    fn from(cb: &CircuitBreaker) -> Self {
        Self {
            host: cb.host.clone(),
            state: cb.state,
            failure_count: cb.failure_count,
            last_failure_at: cb.last_failure_at,
            last_success_at: cb.last_success_at,
            opened_at: cb.opened_at,
            recent_failures: cb.recent_failures.clone(),
        }
    }
}

/// Registry managing one circuit breaker per destination host.
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    /// Create a new registry with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Check whether a delivery to `host` may proceed, creating the breaker
    /// on first use. The check-and-transition runs under the registry write
    /// lock so concurrent callers cannot oversubscribe the probe budget.
    pub async fn try_acquire(&self, host: &str) -> bool {
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(host.to_string())
            .or_insert_with(|| CircuitBreaker::new(host, self.config.clone()))
            .try_acquire()
    }

    /// Record a successful delivery for `host`.
    pub async fn record_success(&self, host: &str) {
        let mut breakers = self.breakers.write().await;
        if let Some(cb) = breakers.get_mut(host) {
            cb.record_success();
        }
    }

    /// Record a delivery failure for `host`.
    pub async fn record_failure(&self, host: &str, failure: FailureRecord) {
        let mut breakers = self.breakers.write().await;
        breakers
            .entry(host.to_string())
            .or_insert_with(|| CircuitBreaker::new(host, self.config.clone()))
            .record_failure(failure);
    }

    /// Get status for a specific host's circuit breaker.
    pub async fn status(&self, host: &str) -> Option<CircuitBreakerStatus> {
        let breakers = self.breakers.read().await;
        breakers.get(host).map(CircuitBreakerStatus::from)
    }

    /// Get status for all known circuit breakers.
    pub async fn all_status(&self) -> Vec<CircuitBreakerStatus> {
        let breakers = self.breakers.read().await;
        breakers.values().map(CircuitBreakerStatus::from).collect()
    }

    /// Remove a host's circuit breaker from the registry.
    pub async fn remove(&self, host: &str) {
        let mut breakers = self.breakers.write().await;
        breakers.remove(host);
    }
}
