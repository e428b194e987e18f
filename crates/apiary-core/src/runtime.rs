//! Runtime façade wiring the bus, scheduler, and workflow orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::info;

use crate::bus::{BusStats, Event, EventBus};
use crate::scheduler::{Task, TaskScheduler};
use crate::workflow::{AgentExecutor, WorkflowOrchestrator};

/// Top-level coordinator for one orchestration process.
///
/// Owns an [`EventBus`] and a [`TaskScheduler`] built on it, and — once an
/// executor is supplied — a [`WorkflowOrchestrator`] that shares the bus
/// for lifecycle events. Agents stay outside: they subscribe to the bus
/// and are reached only through events or the executor seam.
pub struct Runtime {
    bus: EventBus,
    scheduler: TaskScheduler,
    workflows: Option<Arc<WorkflowOrchestrator>>,
    running: AtomicBool,
}

/// Point-in-time summary of the runtime's subsystems.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    /// Whether `start` has been called (and `stop` has not).
    pub running: bool,
    /// Bus delivery counters.
    pub bus: BusStats,
    /// Tasks waiting on dependencies.
    pub pending_tasks: usize,
    /// Dispatched, not yet completed tasks.
    pub running_tasks: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with a fresh bus.
    #[must_use]
    pub fn new() -> Self {
        Self::with_bus(EventBus::default())
    }

    /// Create a runtime on an existing bus.
    #[must_use]
    pub fn with_bus(bus: EventBus) -> Self {
        let scheduler = TaskScheduler::new(bus.clone());
        Self {
            bus,
            scheduler,
            workflows: None,
            running: AtomicBool::new(false),
        }
    }

    /// Attach an agent executor, enabling workflow orchestration.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn AgentExecutor>) -> Self {
        self.workflows = Some(Arc::new(
            WorkflowOrchestrator::new(executor).with_bus(self.bus.clone()),
        ));
        self
    }

    /// The shared event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// The task scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// The workflow orchestrator, when an executor was attached.
    #[must_use]
    pub fn workflows(&self) -> Option<&Arc<WorkflowOrchestrator>> {
        self.workflows.as_ref()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start the bus, then the scheduler. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.bus.start().await;
        self.scheduler.start();
        info!("runtime started");
    }

    /// Stop the scheduler, then the bus (final drain). Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.scheduler.stop().await;
        self.bus.stop().await;
        info!("runtime stopped");
    }

    /// Whether the runtime is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Work submission ─────────────────────────────────────────────

    /// Submit a plain-content task, the primary way to hand work to the
    /// swarm. Returns the task id for tracking.
    pub async fn submit_task(&self, content: impl Into<String>) -> String {
        let content = content.into();
        let name: String = content.chars().take(50).collect();
        let mut payload = Map::new();
        payload.insert("content".to_string(), Value::String(content.clone()));

        self.scheduler
            .submit(
                Task::new(name)
                    .with_description(content)
                    .with_payload(payload),
            )
            .await
    }

    /// Publish an event directly on the bus.
    pub async fn broadcast(&self, topic: impl Into<String>, payload: Map<String, Value>) {
        self.bus
            .publish(Event::new(topic).with_payload(payload).with_source("runtime"))
            .await;
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Snapshot the runtime's current state.
    pub async fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            running: self.is_running(),
            bus: self.bus.stats(),
            pending_tasks: self.scheduler.pending_count().await,
            running_tasks: self.scheduler.running_count().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let runtime = Runtime::new();
        assert!(!runtime.is_running());

        runtime.start().await;
        runtime.start().await;
        assert!(runtime.is_running());

        runtime.stop().await;
        runtime.stop().await;
        assert!(!runtime.is_running());
    }

    #[tokio::test]
    async fn test_submit_task_flows_through_bus() {
        let runtime = Runtime::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        runtime
            .bus()
            .subscribe_fn("task.created", Some("worker".to_string()), move |event| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(event);
                    Ok(())
                }
            });

        runtime.start().await;
        let task_id = runtime.submit_task("summarize the quarterly report").await;
        runtime.stop().await;

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].payload["task_id"], json!(task_id));
        assert_eq!(
            received[0].payload["content"],
            json!("summarize the quarterly report")
        );
    }

    #[tokio::test]
    async fn test_broadcast_and_status() {
        let runtime = Runtime::new();
        runtime.start().await;

        let mut payload = Map::new();
        payload.insert("note".to_string(), json!("hello"));
        runtime.broadcast("announce", payload).await;

        let status = runtime.status().await;
        assert!(status.running);
        assert_eq!(status.bus.published, 1);
        assert_eq!(status.pending_tasks, 0);

        runtime.stop().await;
    }
}
