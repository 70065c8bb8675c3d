//! Integration tests for retry scheduling and backoff behavior.

mod common;

use common::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

use janua_webhooks::{DeliveryStatus, RetryPolicy, WebhookEngine};

/// Backoff without jitter follows `min(initial * mult^(n-1), max)` and is
/// non-decreasing.
#[test]
fn backoff_delays_follow_policy() {
    let policy = RetryPolicy::default().with_jitter(false);

    let expected = [1_000u64, 2_000, 4_000, 8_000, 16_000, 32_000, 60_000, 60_000];
    let mut last = 0;
    for (i, want) in expected.iter().enumerate() {
        let got = policy.delay_for_attempt(i as u32 + 1).as_millis() as u64;
        assert_eq!(got, *want, "attempt {}", i + 1);
        assert!(got >= last);
        last = got;
    }
}

/// Jittered delays stay within [0.5, 1.0] of the computed delay.
#[test]
fn backoff_jitter_bounds() {
    let policy = RetryPolicy::default()
        .with_initial_delay_ms(8_000)
        .with_jitter(true);

    for _ in 0..200 {
        let ms = policy.delay_for_attempt(2).as_millis() as u64;
        // attempt 2 -> 16000ms before jitter
        assert!((8_000..=16_000).contains(&ms), "delay {ms}ms out of bounds");
    }
}

/// A 5xx failure schedules a retry; the redelivery goes through the same
/// attempt path and can succeed.
#[tokio::test]
async fn retry_scheduled_after_5xx_and_succeeds() {
    let mock_server = MockServer::start().await;
    let failing = FailingResponder::fail_times(1);

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(failing.clone())
        .mount(&mock_server)
        .await;

    let engine = fast_engine();
    let payload = user_created_payload(&format!("{}/webhook", mock_server.uri()));

    let delivery = engine.submit(payload).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Pending);
    assert_eq!(engine.pending_retries(), 1);

    drain_retries(&engine).await;

    let delivery = engine.get_delivery(delivery.id).await.unwrap().unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Delivered);
    assert_eq!(delivery.attempts.len(), 2);
    assert_eq!(failing.attempt_count(), 2);
}

/// Retries are not drained before their execute_at instant.
#[tokio::test]
async fn retries_wait_for_their_scheduled_time() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(CountingResponder::with_status(503))
        .mount(&mock_server)
        .await;

    let config = fast_config().with_retry_policy(
        RetryPolicy::default()
            .with_initial_delay_ms(60_000)
            .with_jitter(false),
    );
    let engine = WebhookEngine::new(config).unwrap();
    let payload = user_created_payload(&format!("{}/webhook", mock_server.uri()));

    engine.submit(payload).await.unwrap();
    assert_eq!(engine.pending_retries(), 1);

    // Draining at the current instant is a no-op: the entry is a minute out
    let drained = engine.process_due_retries().await;
    assert_eq!(drained, 0);
    assert_eq!(engine.pending_retries(), 1);

    // Draining past the scheduled time executes it
    let drained = engine
        .process_due_retries_at(chrono::Utc::now() + chrono::Duration::seconds(120))
        .await;
    assert_eq!(drained, 1);
}

/// Each failing delivery consumes its own retry budget independently.
#[tokio::test]
async fn retries_are_per_delivery() {
    let mock_server = MockServer::start().await;
    let counter = CountingResponder::with_status(500);

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(counter.clone())
        .mount(&mock_server)
        .await;

    // High breaker threshold so both deliveries run all their attempts
    let config = fast_config().with_breaker(
        janua_webhooks::CircuitBreakerConfig::default().with_failure_threshold(100),
    );
    let engine = WebhookEngine::new(config).unwrap();
    let url = format!("{}/webhook", mock_server.uri());

    let d1 = engine.submit(user_created_payload(&url)).await.unwrap();
    let d2 = engine.submit(user_created_payload(&url)).await.unwrap();
    drain_retries(&engine).await;

    for id in [d1.id, d2.id] {
        let delivery = engine.get_delivery(id).await.unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Dlq);
        assert_eq!(delivery.attempts.len(), 3);
    }
    // 3 attempts each
    assert_eq!(counter.count(), 6);
}
