use super::*;
use crate::bus::{Event, EventBus};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn setup() -> (EventBus, TaskScheduler, Arc<Mutex<Vec<Event>>>) {
    let bus = EventBus::default();
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let sink = dispatched.clone();
    bus.subscribe_fn("task.created", Some("capture".to_string()), move |event| {
        let sink = sink.clone();
        async move {
            sink.lock().unwrap().push(event);
            Ok(())
        }
    });
    bus.start().await;
    let scheduler = TaskScheduler::new(bus.clone());
    scheduler.start();
    (bus, scheduler, dispatched)
}

fn completed_event(task_id: &str) -> Event {
    Event::new(TOPIC_TASK_COMPLETED)
        .with_entry("task_id", json!(task_id))
        .with_entry("result", json!("done"))
}

fn failed_event(task_id: &str, error: &str) -> Event {
    Event::new(TOPIC_TASK_FAILED)
        .with_entry("task_id", json!(task_id))
        .with_entry("error", json!(error))
}

#[tokio::test]
async fn test_submit_dispatches_immediately() {
    let (bus, scheduler, dispatched) = setup().await;

    let mut payload = serde_json::Map::new();
    payload.insert("content".to_string(), json!("summarize the report"));
    let task_id = scheduler
        .submit(Task::new("summarize").with_payload(payload))
        .await;

    assert_eq!(scheduler.get_status(&task_id).await, Some(TaskStatus::Running));

    let events = dispatched.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["task_id"], json!(task_id));
    assert_eq!(events[0].payload["content"], json!("summarize the report"));
    assert_eq!(events[0].source, "scheduler");
    drop(events);

    bus.stop().await;
}

#[tokio::test]
async fn test_dependency_gating() {
    let (bus, scheduler, _dispatched) = setup().await;

    scheduler.submit(Task::new("first").with_id("t1")).await;
    scheduler
        .submit(Task::new("second").with_id("t2").with_depends_on(["t1"]))
        .await;

    assert_eq!(scheduler.get_status("t1").await, Some(TaskStatus::Running));
    assert_eq!(scheduler.get_status("t2").await, Some(TaskStatus::Pending));

    bus.publish(completed_event("t1")).await;

    assert_eq!(scheduler.get_status("t1").await, Some(TaskStatus::Completed));
    assert_eq!(scheduler.get_status("t2").await, Some(TaskStatus::Running));

    let t1 = scheduler.get_task("t1").await.unwrap();
    assert_eq!(t1.result, Some(Value::String("done".to_string())));

    bus.stop().await;
}

#[tokio::test]
async fn test_multiple_dependencies_wait_for_all() {
    let (bus, scheduler, _dispatched) = setup().await;

    scheduler.submit(Task::new("a").with_id("a")).await;
    scheduler.submit(Task::new("b").with_id("b")).await;
    scheduler
        .submit(Task::new("join").with_id("join").with_depends_on(["a", "b"]))
        .await;

    bus.publish(completed_event("a")).await;
    assert_eq!(scheduler.get_status("join").await, Some(TaskStatus::Pending));

    bus.publish(completed_event("b")).await;
    assert_eq!(scheduler.get_status("join").await, Some(TaskStatus::Running));

    bus.stop().await;
}

#[tokio::test]
async fn test_cancel_pending_task() {
    let (bus, scheduler, _dispatched) = setup().await;

    scheduler
        .submit(
            Task::new("blocked")
                .with_id("blocked")
                .with_depends_on(["nonexistent"]),
        )
        .await;
    assert_eq!(
        scheduler.get_status("blocked").await,
        Some(TaskStatus::Pending)
    );

    assert!(scheduler.cancel("blocked").await);
    assert_eq!(
        scheduler.get_status("blocked").await,
        Some(TaskStatus::Cancelled)
    );
    // Already terminal; a second cancel is a no-op.
    assert!(!scheduler.cancel("blocked").await);

    bus.stop().await;
}

#[tokio::test]
async fn test_cannot_cancel_running_task() {
    let (bus, scheduler, _dispatched) = setup().await;

    let task_id = scheduler.submit(Task::new("quick")).await;
    assert_eq!(scheduler.get_status(&task_id).await, Some(TaskStatus::Running));
    assert!(!scheduler.cancel(&task_id).await);

    bus.stop().await;
}

#[tokio::test]
async fn test_failure_without_budget_is_terminal() {
    let (bus, scheduler, _dispatched) = setup().await;

    scheduler.submit(Task::new("doomed").with_id("doomed")).await;
    bus.publish(failed_event("doomed", "something broke")).await;

    let task = scheduler.get_task("doomed").await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("something broke"));
    assert!(task.completed_at.is_some());

    bus.stop().await;
}

#[tokio::test]
async fn test_retry_budget_consumed_exactly() {
    let (bus, scheduler, dispatched) = setup().await;

    scheduler
        .submit(Task::new("flaky").with_id("flaky").with_max_retries(2))
        .await;
    assert_eq!(dispatched.lock().unwrap().len(), 1);

    // First two failures re-dispatch immediately; the third is terminal.
    bus.publish(failed_event("flaky", "attempt 1")).await;
    assert_eq!(scheduler.get_status("flaky").await, Some(TaskStatus::Running));
    assert_eq!(dispatched.lock().unwrap().len(), 2);

    bus.publish(failed_event("flaky", "attempt 2")).await;
    assert_eq!(dispatched.lock().unwrap().len(), 3);

    bus.publish(failed_event("flaky", "attempt 3")).await;
    let task = scheduler.get_task("flaky").await.unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.error.as_deref(), Some("attempt 3"));
    assert_eq!(dispatched.lock().unwrap().len(), 3);

    bus.stop().await;
}

#[tokio::test]
async fn test_delayed_dispatch() {
    let (bus, scheduler, dispatched) = setup().await;

    scheduler
        .submit(Task::new("later").with_id("later").with_delay_ms(50))
        .await;
    assert_eq!(
        scheduler.get_status("later").await,
        Some(TaskStatus::Scheduled)
    );
    assert!(dispatched.lock().unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(scheduler.get_status("later").await, Some(TaskStatus::Running));
    assert_eq!(dispatched.lock().unwrap().len(), 1);

    bus.stop().await;
}

#[tokio::test]
async fn test_cancel_wins_over_delayed_dispatch() {
    let (bus, scheduler, dispatched) = setup().await;

    scheduler
        .submit(Task::new("later").with_id("later").with_delay_ms(50))
        .await;
    assert!(scheduler.cancel("later").await);

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        scheduler.get_status("later").await,
        Some(TaskStatus::Cancelled)
    );
    assert!(dispatched.lock().unwrap().is_empty());

    bus.stop().await;
}

#[tokio::test]
async fn test_submit_many_and_counts() {
    let (bus, scheduler, _dispatched) = setup().await;

    let ids = scheduler
        .submit_many(vec![
            Task::new("a").with_id("a"),
            Task::new("b").with_id("b").with_depends_on(["a"]),
            Task::new("c").with_id("c").with_depends_on(["b"]),
        ])
        .await;
    assert_eq!(ids, vec!["a", "b", "c"]);

    assert_eq!(scheduler.running_count().await, 1);
    assert_eq!(scheduler.pending_count().await, 2);

    // Completing "a" wakes "b" but not "c".
    bus.publish(completed_event("a")).await;
    assert_eq!(scheduler.get_status("b").await, Some(TaskStatus::Running));
    assert_eq!(scheduler.get_status("c").await, Some(TaskStatus::Pending));

    assert_eq!(scheduler.all_tasks().await.len(), 3);
    scheduler.stop().await;
    bus.stop().await;
}
