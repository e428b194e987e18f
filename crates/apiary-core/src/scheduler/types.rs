//! Scheduler task types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bus::types::short_id;
use crate::bus::EventPriority;

/// Task lifecycle states.
///
/// Transitions are forward-only: `Pending → (Scheduled) → Running →
/// Completed | Failed`, except that a failure with retry budget remaining
/// loops back to `Pending`. `Cancelled` is reachable only from `Pending`
/// or `Scheduled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting on dependencies (or on a retry re-dispatch).
    Pending,
    /// Dependencies met, delayed dispatch in progress.
    Scheduled,
    /// Published to the target topic; a worker owns it now.
    Running,
    /// A `task.completed` event was observed for this task.
    Completed,
    /// Failed with no retry budget remaining.
    Failed,
    /// Cancelled before dispatch.
    Cancelled,
}

/// A unit of work to be dispatched to agents over the bus.
///
/// The scheduler owns a task for its whole lifetime and is the only
/// mutator; workers learn about tasks from the published event and report
/// back by publishing `task.completed` / `task.failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Free-form description, also the default `content` payload field.
    pub description: String,
    /// Topic the task is published under once dependencies clear.
    pub target_topic: String,
    /// Arbitrary payload merged into the dispatched event.
    pub payload: Map<String, Value>,
    /// Dispatch priority on the bus.
    pub priority: EventPriority,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Ids of tasks that must complete before this one dispatches.
    pub depends_on: Vec<String>,
    /// Submission timestamp.
    pub created_at: DateTime<Utc>,
    /// When the task flipped to `Running`.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Result carried by the `task.completed` event.
    pub result: Option<Value>,
    /// Error carried by the final `task.failed` event.
    pub error: Option<String>,
    /// Delay between dependency satisfaction and dispatch.
    pub delay_ms: u64,
    /// Retry budget for failures.
    pub max_retries: u32,
    /// Retries consumed so far.
    pub retry_count: u32,
}

impl Task {
    /// Create a pending task with a generated id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: short_id(10),
            name: name.into(),
            description: String::new(),
            target_topic: "task.created".to_string(),
            payload: Map::new(),
            priority: EventPriority::Normal,
            status: TaskStatus::Pending,
            depends_on: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            delay_ms: 0,
            max_retries: 0,
            retry_count: 0,
        }
    }

    /// Override the generated id (useful for declarative task graphs).
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the topic the task is dispatched on.
    #[must_use]
    pub fn with_target_topic(mut self, topic: impl Into<String>) -> Self {
        self.target_topic = topic.into();
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Set the dispatch priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Declare dependencies by task id.
    #[must_use]
    pub fn with_depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Delay dispatch by the given number of milliseconds.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}
