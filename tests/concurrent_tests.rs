//! Integration tests for concurrent submission and bulk batching.

mod common;

use common::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

use janua_webhooks::{DeliveryStatus, WebhookEngine};

/// Bulk submission delivers every payload and returns them in order.
#[tokio::test]
async fn bulk_submission_delivers_all() {
    let mock_server = MockServer::start().await;
    let counter = CountingResponder::new();

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(counter.clone())
        .mount(&mock_server)
        .await;

    let config = fast_config().with_batch_size(5);
    let engine = WebhookEngine::new(config).unwrap();
    let url = format!("{}/webhook", mock_server.uri());

    let payloads: Vec<_> = (0..20)
        .map(|i| custom_payload(&url, ORG_A, "burst.event", serde_json::json!({"index": i})))
        .collect();
    let expected_ids: Vec<_> = payloads.iter().map(|p| p.id).collect();

    let deliveries = engine.submit_bulk(payloads).await.unwrap();

    assert_eq!(deliveries.len(), 20);
    assert_eq!(counter.count(), 20);
    for (delivery, expected) in deliveries.iter().zip(expected_ids) {
        assert_eq!(delivery.payload.id, expected);
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
    }
}

/// Bulk submission fails fast on invalid input.
#[tokio::test]
async fn bulk_submission_rejects_invalid_payload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(CaptureResponder::new())
        .mount(&mock_server)
        .await;

    let engine = fast_engine();
    let url = format!("{}/webhook", mock_server.uri());

    let payloads = vec![
        user_created_payload(&url),
        user_created_payload("not-a-url"),
    ];

    assert!(engine.submit_bulk(payloads).await.is_err());
}

/// Concurrent submissions from separate tasks all complete independently.
#[tokio::test]
async fn concurrent_submissions_complete_independently() {
    let mock_server = MockServer::start().await;
    let capture = CaptureResponder::new();

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(capture.clone())
        .mount(&mock_server)
        .await;

    let engine = fast_engine();
    let url = format!("{}/webhook", mock_server.uri());

    let handles: Vec<_> = (0..10)
        .map(|i| {
            let engine = engine.clone();
            let payload =
                custom_payload(&url, ORG_A, "test.event", serde_json::json!({"index": i}));
            tokio::spawn(async move { engine.submit(payload).await })
        })
        .collect();

    for handle in handles {
        let delivery = handle.await.unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Delivered);
    }

    assert_eq!(capture.request_count(), 10);

    // Every delivery kept its own event id
    let requests = capture.requests();
    let mut event_ids: Vec<String> = requests
        .iter()
        .map(|r| r.header("x-webhook-id").unwrap().to_string())
        .collect();
    event_ids.sort();
    event_ids.dedup();
    assert_eq!(event_ids.len(), 10);
}

/// A slow endpoint does not block deliveries to a fast one.
#[tokio::test]
async fn slow_endpoint_does_not_block_others() {
    let slow_server = MockServer::start().await;
    let fast_server = MockServer::start().await;
    let fast_capture = CaptureResponder::new();

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(DelayedResponder::new(300))
        .mount(&slow_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(fast_capture.clone())
        .mount(&fast_server)
        .await;

    let engine = fast_engine();

    let slow_handle = {
        let engine = engine.clone();
        let payload = user_created_payload(&format!("{}/webhook", slow_server.uri()));
        tokio::spawn(async move { engine.submit(payload).await })
    };

    let start = std::time::Instant::now();
    let fast_delivery = engine
        .submit(user_created_payload(&format!("{}/webhook", fast_server.uri())))
        .await
        .unwrap();
    let fast_elapsed = start.elapsed();

    assert_eq!(fast_delivery.status, DeliveryStatus::Delivered);
    assert!(
        fast_elapsed.as_millis() < 250,
        "fast delivery took {}ms",
        fast_elapsed.as_millis()
    );

    let slow_delivery = slow_handle.await.unwrap().unwrap();
    assert_eq!(slow_delivery.status, DeliveryStatus::Delivered);
    assert_eq!(fast_capture.request_count(), 1);
}

/// Concurrent bulk batches respect per-delivery isolation: mixed outcomes
/// land on the right deliveries.
#[tokio::test]
async fn bulk_submission_tracks_mixed_outcomes() {
    let ok_server = MockServer::start().await;
    let dead_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(CaptureResponder::new())
        .mount(&ok_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(CountingResponder::with_status(404))
        .mount(&dead_server)
        .await;

    let engine = fast_engine();
    let payloads = vec![
        user_created_payload(&format!("{}/webhook", ok_server.uri())),
        user_created_payload(&format!("{}/webhook", dead_server.uri())),
        user_created_payload(&format!("{}/webhook", ok_server.uri())),
    ];

    let deliveries = engine.submit_bulk(payloads).await.unwrap();

    assert_eq!(deliveries[0].status, DeliveryStatus::Delivered);
    assert_eq!(deliveries[1].status, DeliveryStatus::Dlq);
    assert_eq!(deliveries[2].status, DeliveryStatus::Delivered);
}
