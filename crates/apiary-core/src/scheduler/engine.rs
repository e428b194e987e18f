//! Dependency-gated task dispatch.
//!
//! The scheduler holds a task until every declared dependency has
//! completed, then publishes it on its target topic. Completion and
//! failure signals arrive back over the bus (`task.completed`,
//! `task.failed`, payload `task_id` plus `result`/`error`), so workers
//! never call the scheduler directly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::types::{Task, TaskStatus};
use crate::bus::{Event, EventBus};

/// Topic the scheduler listens on for completion signals.
pub const TOPIC_TASK_COMPLETED: &str = "task.completed";
/// Topic the scheduler listens on for failure signals.
pub const TOPIC_TASK_FAILED: &str = "task.failed";

const SUBSCRIBER_ID: &str = "scheduler";

/// Async task scheduler.
///
/// Responsibilities:
///   - accept tasks and track them for their whole lifetime
///   - gate dispatch on declared dependencies
///   - publish ready tasks as events (optionally delayed)
///   - re-dispatch failures while retry budget remains
///
/// Failed tasks are retried immediately with no backoff: a task dispatch
/// is a cheap re-publish, and pacing is left to whoever reports the
/// failure.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    bus: EventBus,
    tasks: RwLock<HashMap<String, Task>>,
    running: AtomicBool,
}

impl TaskScheduler {
    /// Create a scheduler bound to a bus and register its completion and
    /// failure subscribers.
    #[must_use]
    pub fn new(bus: EventBus) -> Self {
        let inner = Arc::new(SchedulerInner {
            bus: bus.clone(),
            tasks: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        });

        // The bus holds these handlers for its own lifetime; a weak
        // reference keeps dropped schedulers collectable.
        let weak: Weak<SchedulerInner> = Arc::downgrade(&inner);
        bus.subscribe_fn(
            TOPIC_TASK_COMPLETED,
            Some(SUBSCRIBER_ID.to_string()),
            move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        SchedulerInner::on_task_completed(&inner, event).await;
                    }
                    Ok(())
                }
            },
        );
        let weak = Arc::downgrade(&inner);
        bus.subscribe_fn(
            TOPIC_TASK_FAILED,
            Some(SUBSCRIBER_ID.to_string()),
            move |event| {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        SchedulerInner::on_task_failed(&inner, event).await;
                    }
                    Ok(())
                }
            },
        );

        Self { inner }
    }

    // ── Submission ──────────────────────────────────────────────────

    /// Submit a task. Returns its id.
    ///
    /// Dispatches immediately when every dependency is already completed;
    /// otherwise the task stays pending until a completion event for the
    /// last outstanding dependency arrives.
    pub async fn submit(&self, task: Task) -> String {
        let task_id = task.id.clone();
        let ready = {
            let mut tasks = self.inner.tasks.write().await;
            let ready = can_schedule(&tasks, &task);
            tasks.insert(task_id.clone(), task);
            ready
        };
        info!(task_id = %task_id, ready, "task submitted");

        if ready {
            SchedulerInner::dispatch(&self.inner, &task_id).await;
        }
        task_id
    }

    /// Submit several tasks in order. Returns their ids.
    pub async fn submit_many(&self, tasks: Vec<Task>) -> Vec<String> {
        let mut ids = Vec::with_capacity(tasks.len());
        for task in tasks {
            ids.push(self.submit(task).await);
        }
        ids
    }

    // ── Management ──────────────────────────────────────────────────

    /// Retrieve a snapshot of a task by id.
    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.tasks.read().await.get(task_id).cloned()
    }

    /// Current status of a task.
    pub async fn get_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.inner.tasks.read().await.get(task_id).map(|t| t.status)
    }

    /// Cancel a task. Succeeds only before dispatch (pending/scheduled).
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.inner.tasks.write().await;
        let Some(task) = tasks.get_mut(task_id) else {
            return false;
        };
        match task.status {
            TaskStatus::Pending | TaskStatus::Scheduled => {
                task.status = TaskStatus::Cancelled;
                info!(task_id = %task_id, "task cancelled");
                true
            }
            status => {
                warn!(task_id = %task_id, ?status, "cannot cancel task in this state");
                false
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Mark the scheduler running.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        info!("task scheduler started");
    }

    /// Mark the scheduler stopped and log a lifetime summary.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let tasks = self.inner.tasks.read().await;
        let completed = count(&tasks, TaskStatus::Completed);
        let failed = count(&tasks, TaskStatus::Failed);
        info!(
            total = tasks.len(),
            completed, failed, "task scheduler stopped"
        );
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Number of tasks waiting on dependencies.
    pub async fn pending_count(&self) -> usize {
        count(&*self.inner.tasks.read().await, TaskStatus::Pending)
    }

    /// Number of dispatched, not yet completed tasks.
    pub async fn running_count(&self) -> usize {
        count(&*self.inner.tasks.read().await, TaskStatus::Running)
    }

    /// Snapshot of every tracked task.
    pub async fn all_tasks(&self) -> HashMap<String, Task> {
        self.inner.tasks.read().await.clone()
    }
}

impl SchedulerInner {
    /// Dispatch a task: delayed tasks flip to `Scheduled` and wait off the
    /// caller's path; everything else publishes right away.
    async fn dispatch(inner: &Arc<Self>, task_id: &str) {
        let delay_ms = {
            let mut tasks = inner.tasks.write().await;
            let Some(task) = tasks.get_mut(task_id) else {
                return;
            };
            if task.status == TaskStatus::Cancelled {
                return;
            }
            if task.delay_ms > 0 {
                task.status = TaskStatus::Scheduled;
            }
            task.delay_ms
        };

        if delay_ms > 0 {
            let inner = inner.clone();
            let task_id = task_id.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                SchedulerInner::fire(&inner, &task_id).await;
            });
        } else {
            SchedulerInner::fire(inner, task_id).await;
        }
    }

    /// Flip a task to `Running` and publish it on its target topic.
    async fn fire(inner: &Arc<Self>, task_id: &str) {
        let event = {
            let mut tasks = inner.tasks.write().await;
            let Some(task) = tasks.get_mut(task_id) else {
                return;
            };
            if task.status == TaskStatus::Cancelled {
                debug!(task_id = %task_id, "skipping dispatch of cancelled task");
                return;
            }
            task.status = TaskStatus::Running;
            task.started_at = Some(chrono::Utc::now());

            let mut payload = Map::new();
            payload.insert("task_id".to_string(), Value::String(task.id.clone()));
            payload.insert("name".to_string(), Value::String(task.name.clone()));
            payload.insert(
                "description".to_string(),
                Value::String(task.description.clone()),
            );
            payload.insert(
                "content".to_string(),
                task.payload
                    .get("content")
                    .cloned()
                    .unwrap_or_else(|| Value::String(task.description.clone())),
            );
            // Caller-supplied payload entries win over the defaults.
            for (key, value) in &task.payload {
                payload.insert(key.clone(), value.clone());
            }

            Event::new(task.target_topic.clone())
                .with_payload(payload)
                .with_source(SUBSCRIBER_ID)
                .with_priority(task.priority)
                .with_meta("task_id", Value::String(task.id.clone()))
        };

        inner.bus.publish(event).await;
        info!(task_id = %task_id, "task dispatched");
    }

    async fn on_task_completed(inner: &Arc<Self>, event: Event) {
        let Some(task_id) = payload_str(&event, "task_id") else {
            return;
        };

        let dependents = {
            let mut tasks = inner.tasks.write().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            task.status = TaskStatus::Completed;
            task.completed_at = Some(chrono::Utc::now());
            task.result = event.payload.get("result").cloned();
            info!(task_id = %task_id, "task completed");

            // Any pending task whose last outstanding dependency was this
            // one is ready now.
            tasks
                .values()
                .filter(|t| {
                    t.status == TaskStatus::Pending
                        && t.depends_on.iter().any(|dep| *dep == task_id)
                        && can_schedule(&tasks, t)
                })
                .map(|t| t.id.clone())
                .collect::<Vec<_>>()
        };

        for dependent_id in dependents {
            SchedulerInner::dispatch(inner, &dependent_id).await;
        }
    }

    async fn on_task_failed(inner: &Arc<Self>, event: Event) {
        let Some(task_id) = payload_str(&event, "task_id") else {
            return;
        };

        let retry = {
            let mut tasks = inner.tasks.write().await;
            let Some(task) = tasks.get_mut(&task_id) else {
                return;
            };
            if task.retry_count < task.max_retries {
                task.retry_count += 1;
                task.status = TaskStatus::Pending;
                warn!(
                    task_id = %task_id,
                    attempt = task.retry_count,
                    max_retries = task.max_retries,
                    "task failed, retrying"
                );
                true
            } else {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(chrono::Utc::now());
                task.error = Some(
                    payload_str(&event, "error").unwrap_or_else(|| "unknown error".to_string()),
                );
                error!(task_id = %task_id, error = ?task.error, "task failed permanently");
                false
            }
        };

        if retry {
            SchedulerInner::dispatch(inner, &task_id).await;
        }
    }
}

/// Whether every dependency of `task` is completed.
fn can_schedule(tasks: &HashMap<String, Task>, task: &Task) -> bool {
    task.depends_on.iter().all(|dep_id| {
        tasks
            .get(dep_id)
            .is_some_and(|dep| dep.status == TaskStatus::Completed)
    })
}

fn count(tasks: &HashMap<String, Task>, status: TaskStatus) -> usize {
    tasks.values().filter(|t| t.status == status).count()
}

fn payload_str(event: &Event, key: &str) -> Option<String> {
    event
        .payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}
