//! # In-Memory Transport Tests
//!
//! Ordering, acknowledgement accounting and dead-letter requeue.

use std::sync::Arc;

use arnavon_core::messaging::{
    DeliveryHandler, DeliveryMetadata, MemoryTransport, PushOptions, QueueTransport,
    RequeueOptions, RequeueStatus, TransportError,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;

fn recording_handler(seen: Arc<Mutex<Vec<Value>>>) -> Arc<dyn DeliveryHandler> {
    Arc::new(move |message: Value, _delivery: DeliveryMetadata| {
        let seen = seen.clone();
        async move {
            seen.lock().await.push(message);
            Ok::<(), anyhow::Error>(())
        }
    })
}

#[tokio::test]
async fn test_consume_is_sequential_and_ordered() {
    let transport = MemoryTransport::new();
    transport.connect().await.unwrap();
    for n in 0..5 {
        transport
            .push("numbers", &json!({ "n": n }), &PushOptions::new())
            .await
            .unwrap();
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    transport
        .consume("numbers", recording_handler(seen.clone()))
        .await
        .unwrap();

    let seen = seen.lock().await;
    let order: Vec<i64> = seen.iter().map(|m| m["n"].as_i64().unwrap()).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4]);
    assert_eq!(transport.acked_count(), 5);
    assert_eq!(transport.queue_length("numbers").await, 0);
}

#[tokio::test]
async fn test_handler_failure_rejects_message() {
    let transport = MemoryTransport::new();
    transport.push("jobs", &json!({"fail": true}), &PushOptions::new()).await.unwrap();
    transport.push("jobs", &json!({"fail": false}), &PushOptions::new()).await.unwrap();

    let handler: Arc<dyn DeliveryHandler> =
        Arc::new(|message: Value, _delivery: DeliveryMetadata| async move {
            if message["fail"] == json!(true) {
                anyhow::bail!("boom");
            }
            Ok(())
        });
    transport.consume("jobs", handler).await.unwrap();

    assert_eq!(transport.acked_count(), 1);
    assert_eq!(transport.rejected_count(), 1);
}

#[tokio::test]
async fn test_poison_message_skips_handler() {
    let transport = MemoryTransport::new();
    transport.push_raw("jobs", "jobs", "{not json").await;
    transport.push("jobs", &json!({"ok": 1}), &PushOptions::new()).await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    transport.consume("jobs", recording_handler(seen.clone())).await.unwrap();

    assert_eq!(seen.lock().await.as_slice(), &[json!({"ok": 1})]);
    assert_eq!(transport.rejected_count(), 1);
    assert_eq!(transport.acked_count(), 1);
}

#[tokio::test]
async fn test_exchange_override_and_reserved_headers() {
    let transport = MemoryTransport::new();
    let options = PushOptions::new()
        .with_exchange("audit")
        .with_header("x-arnavon-internal", json!("hidden"))
        .with_header("tenant", json!("acme"));
    transport.push("send-email", &json!({}), &options).await.unwrap();

    assert_eq!(transport.queue_length("send-email").await, 0);
    assert_eq!(transport.queue_keys("audit").await, vec!["send-email"]);
    let headers = transport.queue_headers("audit").await;
    assert_eq!(headers[0].get("tenant"), Some(&json!("acme")));
    assert!(!headers[0].contains_key("x-arnavon-internal"));
}

#[tokio::test]
async fn test_requeue_moves_fifo_with_count() {
    let transport = MemoryTransport::new();
    for n in 0..3 {
        transport
            .push("send-email", &json!({ "n": n }), &PushOptions::new().with_exchange("dead-letters"))
            .await
            .unwrap();
    }

    let result = transport
        .requeue("dead-letters", RequeueOptions::to("send-email").with_count(2))
        .await
        .unwrap();

    assert_eq!(result.status, RequeueStatus::Completed);
    assert_eq!(result.requeued, 2);
    assert_eq!(transport.queue_length("dead-letters").await, 1);
    assert_eq!(
        transport.peek_messages("send-email").await,
        vec![json!({"n": 0}), json!({"n": 1})]
    );
    assert_eq!(transport.queue_keys("send-email").await, vec!["send-email", "send-email"]);

    let rest = transport
        .requeue("dead-letters", RequeueOptions::to("send-email"))
        .await
        .unwrap();
    assert_eq!(rest.requeued, 1);
    assert_eq!(transport.queue_length("dead-letters").await, 0);
}

#[tokio::test]
async fn test_requeue_rejects_zero_count() {
    let transport = MemoryTransport::new();
    let err = transport
        .requeue("dead-letters", RequeueOptions::to("send-email").with_count(0))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Requeue(_)));
}

#[tokio::test]
async fn test_queue_info_reports_lengths() {
    let transport = MemoryTransport::new();
    transport.push("a", &json!(1), &PushOptions::new()).await.unwrap();

    let infos = transport
        .get_queues_info(&["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(infos[0].messages, 1);
    assert_eq!(infos[1].messages, 0);
    assert!(infos.iter().all(|info| info.state == "running" && info.consumers == 0));
}
