use super::*;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio_test::assert_ok;

fn recorder(bus: &EventBus, pattern: &str, id: &str) -> Arc<Mutex<Vec<Event>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    bus.subscribe_fn(pattern, Some(id.to_string()), move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(event);
            Ok(())
        }
    });
    received
}

#[tokio::test]
async fn test_basic_pub_sub() {
    let bus = EventBus::default();
    let received = recorder(&bus, "test.topic", "test-sub");
    bus.start().await;

    bus.publish(Event::new("test.topic").with_entry("data", json!("hello")))
        .await;
    bus.stop().await;

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload["data"], json!("hello"));
}

#[tokio::test]
async fn test_wildcard_subscription() {
    let bus = EventBus::default();
    let received = recorder(&bus, "task.*", "wild-sub");
    bus.start().await;

    bus.publish(Event::new("task.created")).await;
    bus.publish(Event::new("task.completed")).await;
    bus.publish(Event::new("task.sub.deep")).await;
    bus.publish(Event::new("other.topic")).await;
    bus.stop().await;

    assert_eq!(received.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_wildcard_pattern_is_not_a_topic() {
    let bus = EventBus::default();
    let received = recorder(&bus, "a.*", "wild-sub");
    bus.start().await;

    // A literal publish to the pattern string itself must not match.
    bus.publish(Event::new("a.*")).await;
    assert!(received.lock().unwrap().is_empty());

    bus.publish(Event::new("a.b")).await;
    bus.stop().await;
    assert_eq!(received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_global_subscription() {
    let bus = EventBus::default();
    let received = recorder(&bus, "*", "global-sub");
    bus.start().await;

    bus.publish(Event::new("foo")).await;
    bus.publish(Event::new("bar.baz")).await;
    bus.stop().await;

    assert_eq!(received.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unsubscribe() {
    let bus = EventBus::default();
    let received = recorder(&bus, "test", "unsub-test");
    assert_eq!(bus.unsubscribe("unsub-test"), 1);

    bus.start().await;
    bus.publish(Event::new("test")).await;
    bus.stop().await;

    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_handler_error_isolation() {
    let bus = EventBus::default();
    bus.subscribe_fn("test", Some("bad".to_string()), |_event| async {
        anyhow::bail!("handler error")
    });
    let received = recorder(&bus, "test", "good");
    bus.start().await;

    bus.publish(Event::new("test")).await;
    bus.stop().await;

    assert_eq!(received.lock().unwrap().len(), 1);
    assert_eq!(bus.stats().errors, 1);
}

#[tokio::test]
async fn test_priority_invocation_order() {
    let bus = EventBus::default();
    let order = Arc::new(Mutex::new(Vec::new()));

    for (label, priority) in [
        ("low", EventPriority::Low),
        ("critical", EventPriority::Critical),
        ("normal", EventPriority::Normal),
    ] {
        let order = order.clone();
        bus.subscribe(
            "test",
            Arc::new(move |_event| {
                order.lock().unwrap().push(label);
                Box::pin(async { Ok(()) })
            }),
            Some(label.to_string()),
            priority,
        );
    }

    bus.start().await;
    bus.publish(Event::new("test")).await;
    bus.stop().await;

    assert_eq!(*order.lock().unwrap(), vec!["critical", "normal", "low"]);
}

#[tokio::test]
async fn test_stats() {
    let bus = EventBus::default();
    let _received = recorder(&bus, "test", "stats-sub");
    bus.start().await;

    bus.publish(Event::new("test")).await;
    bus.publish(Event::new("test")).await;
    bus.stop().await;

    let stats = bus.stats();
    assert_eq!(stats.published, 2);
    assert_eq!(stats.dispatched, 2);
    assert_eq!(stats.errors, 0);
}

#[test]
fn test_subscription_count() {
    let bus = EventBus::default();
    assert_eq!(bus.subscription_count(), 0);

    bus.subscribe_fn("a", Some("s1".to_string()), |_| async { Ok(()) });
    bus.subscribe_fn("b.*", Some("s2".to_string()), |_| async { Ok(()) });
    bus.subscribe_fn("*", Some("s3".to_string()), |_| async { Ok(()) });
    assert_eq!(bus.subscription_count(), 3);

    // Re-subscribing the same id to the same pattern replaces, not appends.
    bus.subscribe_fn("a", Some("s1".to_string()), |_| async { Ok(()) });
    assert_eq!(bus.subscription_count(), 3);
}

#[tokio::test]
async fn test_history_ring_is_bounded() {
    let bus = EventBus::new(BusConfig::new().with_max_history(5));
    bus.start().await;

    for n in 0..8 {
        bus.publish(Event::new(format!("topic.{n}"))).await;
    }
    bus.stop().await;

    let recent = bus.recent_events(100);
    assert_eq!(recent.len(), 5);
    assert_eq!(recent[0].topic, "topic.3");
    assert_eq!(bus.recent_events(2).len(), 2);
}

#[tokio::test]
async fn test_publish_nowait_queue_full() {
    let bus = EventBus::new(BusConfig::new().with_queue_capacity(1));

    assert_ok!(bus.publish_nowait(Event::new("one")));
    let err = bus.publish_nowait(Event::new("two")).unwrap_err();
    assert!(matches!(err, crate::error::Error::QueueFull { capacity: 1 }));
}

#[test]
fn test_event_serialization() {
    let event = Event::new("task.created")
        .with_source("scheduler")
        .with_priority(EventPriority::High)
        .with_entry("name", json!("build"));
    let encoded = serde_json::to_string(&event).unwrap();
    assert!(encoded.contains("\"topic\":\"task.created\""));
    assert!(encoded.contains("\"priority\":\"high\""));
}
