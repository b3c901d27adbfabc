//! Event bus dispatch, persistence ordering and fan-out.

#![allow(clippy::unwrap_used, clippy::panic)]

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use meshwork::events::{
    BrokerMessage, EventBus, EventBusConfig, InMemoryBroker, InMemoryPubSub, MessageBroker,
    PubSub, PubSubMessage, handler_fn, middleware_fn,
};
use meshwork_core::{Event, EventPriority, EventStatus, EventStore, MeshError};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

struct FailingBroker;

#[async_trait]
impl MessageBroker for FailingBroker {
    async fn publish(&self, _message: BrokerMessage) -> Result<(), MeshError> {
        Err(MeshError::TransportError("broker down".to_string()))
    }
}

/// Pub/sub whose subscriptions end immediately.
struct ClosedPubSub;

#[async_trait]
impl PubSub for ClosedPubSub {
    async fn publish(&self, _channel: &str, _payload: Vec<u8>) -> Result<(), MeshError> {
        Ok(())
    }

    async fn psubscribe(
        &self,
        _pattern: &str,
    ) -> Result<BoxStream<'static, PubSubMessage>, MeshError> {
        Ok(stream::empty().boxed())
    }
}

fn bus() -> EventBus {
    EventBus::default()
}

#[tokio::test]
async fn event_is_stored_before_handlers_run() {
    let store = Arc::new(EventStore::in_memory());
    let bus = EventBus::new(Arc::clone(&store), EventBusConfig::default());

    let seen = Arc::clone(&store);
    bus.subscribe(
        "user.created",
        handler_fn("checker", move |event: Event| {
            let store = Arc::clone(&seen);
            async move {
                let stored = store.get_event(&event.id).is_some();
                Ok(json!({ "stored": stored }))
            }
        }),
    )
    .await;

    let id = bus
        .publish("user.created", json!({"id": 1}), "users", EventPriority::Normal, None)
        .await
        .unwrap();

    let results = bus.get_results(&id);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].result, Some(json!({ "stored": true })));
}

#[tokio::test]
async fn all_results_stored_before_publish_returns() {
    let bus = bus();
    for name in ["a", "b", "c"] {
        bus.subscribe(
            "order.placed",
            handler_fn(name, |_event: Event| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!("done"))
            }),
        )
        .await;
    }
    bus.subscribe_all(handler_fn("audit", |_event: Event| async move {
        Ok(json!(null))
    }))
    .await;

    let id = bus
        .publish("order.placed", json!({}), "orders", EventPriority::High, None)
        .await
        .unwrap();

    let results = bus.get_results(&id);
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.status == EventStatus::Completed));
    assert_eq!(bus.stats().processed, 4);
}

#[tokio::test]
async fn failing_handler_only_fails_its_own_result() {
    let bus = bus();
    bus.subscribe(
        "job",
        handler_fn("ok", |_event: Event| async move { Ok(json!(1)) }),
    )
    .await;
    bus.subscribe(
        "job",
        handler_fn("err", |_event: Event| async move {
            Err(MeshError::InvalidRequest("bad job".to_string()))
        }),
    )
    .await;
    bus.subscribe(
        "job",
        handler_fn("panics", |event: Event| async move {
            if event.data.is_object() {
                panic!("boom");
            }
            Ok(json!(0))
        }),
    )
    .await;

    let id = bus
        .publish("job", json!({}), "scheduler", EventPriority::Normal, None)
        .await
        .unwrap();

    let results = bus.get_results(&id);
    assert_eq!(results.len(), 3);
    let by_handler = |name: &str| results.iter().find(|r| r.handler == name).unwrap();
    assert_eq!(by_handler("ok").status, EventStatus::Completed);
    assert_eq!(by_handler("err").status, EventStatus::Failed);
    assert!(by_handler("err").error.as_deref().unwrap().contains("bad job"));
    assert_eq!(by_handler("panics").status, EventStatus::Failed);
    assert_eq!(bus.stats().failed, 2);
}

#[tokio::test]
async fn slow_handler_times_out() {
    let bus = bus();
    bus.subscribe(
        "slow",
        handler_fn("sleeper", |_event: Event| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!(null))
        }),
    )
    .await;

    let event = Event::new("slow", json!({}), "test").with_timeout(Duration::from_millis(50));
    let id = bus.publish_event(event).await.unwrap();

    let results = bus.get_results(&id);
    assert_eq!(results[0].status, EventStatus::Failed);
}

#[tokio::test]
async fn broker_failure_is_swallowed() {
    let bus = bus().with_broker(Arc::new(FailingBroker));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    bus.subscribe(
        "x",
        handler_fn("count", move |_event: Event| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        }),
    )
    .await;

    let id = bus
        .publish("x", json!({}), "test", EventPriority::Normal, None)
        .await
        .unwrap();

    assert!(bus.get_event(&id).is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn broker_receives_routing_key_and_priority() {
    let broker = Arc::new(InMemoryBroker::new());
    let mut rx = broker.subscribe();
    let bus = bus().with_broker(broker);

    bus.publish("user.deleted", json!({}), "users", EventPriority::Critical, None)
        .await
        .unwrap();

    let message = rx.recv().await.unwrap();
    assert_eq!(message.exchange, "meshwork.events");
    assert_eq!(message.routing_key, "user.deleted");
    assert_eq!(message.headers.get("priority").map(String::as_str), Some("4"));
    let event: Event = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(event.event_type, "user.deleted");
}

#[tokio::test]
async fn pubsub_channel_uses_prefix() {
    let pubsub = Arc::new(InMemoryPubSub::new());
    let mut stream = pubsub.psubscribe("events:*").await.unwrap();
    let bus = bus().with_pubsub(pubsub);

    bus.publish("metrics.tick", json!({}), "timer", EventPriority::Low, None)
        .await
        .unwrap();

    let message = stream.next().await.unwrap();
    assert_eq!(message.channel, "events:metrics.tick");
}

#[tokio::test]
async fn pattern_subscription_receives_matching_events() {
    let pubsub = Arc::new(InMemoryPubSub::new());
    let bus = bus().with_pubsub(pubsub);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    bus.subscribe_to_pattern(
        "events:user.*",
        handler_fn("pattern", move |event: Event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(event.event_type.clone());
                Ok(json!(null))
            }
        }),
    )
    .await
    .unwrap();

    bus.publish("order.created", json!({}), "t", EventPriority::Normal, None)
        .await
        .unwrap();
    bus.publish("user.created", json!({}), "t", EventPriority::Normal, None)
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, "user.created");
    bus.stop();
}

#[tokio::test]
async fn pattern_subscription_needs_pubsub() {
    let err = bus()
        .subscribe_to_pattern("events:*", handler_fn("h", |_e: Event| async move { Ok(json!(null)) }))
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::ConfigError(_)));
}

#[tokio::test]
async fn middleware_can_transform_and_drop() {
    let bus = bus();
    bus.add_middleware(middleware_fn(|mut event: Event| {
        if event.event_type == "noise" {
            return None;
        }
        event.metadata.insert("tagged".to_string(), json!(true));
        Some(event)
    }))
    .await;

    let dropped = bus
        .publish("noise", json!({}), "t", EventPriority::Normal, None)
        .await
        .unwrap();
    assert!(bus.get_event(&dropped).is_none());

    let kept = bus
        .publish("signal", json!({}), "t", EventPriority::Normal, None)
        .await
        .unwrap();
    let stored = bus.get_event(&kept).unwrap();
    assert_eq!(stored.metadata.get("tagged"), Some(&json!(true)));
    assert_eq!(bus.stats().published, 1);
}

#[tokio::test]
async fn replay_and_causation_queries() {
    let bus = bus();
    let root = Event::new("order.placed", json!({}), "orders").with_correlation_id("c-1");
    let root_id = bus.publish_event(root.clone()).await.unwrap();
    let child = Event::new("payment.requested", json!({}), "payments").caused_by(&root);
    bus.publish_event(child).await.unwrap();

    assert_eq!(bus.replay_events(None).len(), 2);
    assert_eq!(bus.replay_events(Some("order.placed")).len(), 1);
    assert_eq!(bus.get_events_by_source("payments").len(), 1);
    assert_eq!(bus.get_events_by_type("payment.requested").len(), 1);

    let children = bus.get_caused_by(&root_id);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].correlation_id.as_deref(), Some("c-1"));
}

#[tokio::test]
async fn persisted_events_survive_restart() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = Arc::new(EventStore::with_dir(dir.path()).unwrap());
        let bus = EventBus::new(store, EventBusConfig::default());
        bus.subscribe(
            "saved",
            handler_fn("persist/check", |_e: Event| async move { Ok(json!("ok")) }),
        )
        .await;
        bus.publish("saved", json!({"n": 1}), "t", EventPriority::Normal, None)
            .await
            .unwrap()
    };

    let store = Arc::new(EventStore::with_dir(dir.path()).unwrap());
    let bus = EventBus::new(store, EventBusConfig::default());
    let event = bus.get_event(&id).unwrap();
    assert_eq!(event.data, json!({"n": 1}));
    assert_eq!(bus.get_results(&id).len(), 1);
}

#[tokio::test]
async fn invalid_event_is_rejected() {
    let err = bus()
        .publish("", json!({}), "t", EventPriority::Normal, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::InvalidRequest(_)));
}

#[tokio::test]
async fn result_storage_failure_still_counts_and_fans_out() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(EventStore::with_dir(dir.path()).unwrap());
    let broker = Arc::new(InMemoryBroker::new());
    let mut rx = broker.subscribe();
    let bus = EventBus::new(store, EventBusConfig::default()).with_broker(broker);
    for name in ["first", "second"] {
        bus.subscribe(
            "job",
            handler_fn(name, |_event: Event| async move { Ok(json!(null)) }),
        )
        .await;
    }
    std::fs::remove_dir_all(dir.path().join("results")).unwrap();

    let err = bus
        .publish("job", json!({}), "t", EventPriority::Normal, None)
        .await
        .unwrap_err();

    assert!(matches!(err, MeshError::IoError(_)));
    assert_eq!(bus.stats().processed, 2);
    let message = rx.recv().await.unwrap();
    assert_eq!(message.routing_key, "job");
}

#[tokio::test]
async fn ended_pattern_listener_marks_bus_unhealthy() {
    let bus = bus().with_pubsub(Arc::new(ClosedPubSub));
    assert!(bus.is_healthy());

    bus.subscribe_to_pattern(
        "events:*",
        handler_fn("h", |_e: Event| async move { Ok(json!(null)) }),
    )
    .await
    .unwrap();

    for _ in 0..100 {
        if !bus.is_healthy() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!bus.is_healthy());
}
