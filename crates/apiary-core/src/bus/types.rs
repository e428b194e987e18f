//! Event bus data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Priority levels for event processing ordering.
///
/// Priority determines the order in which matching handlers are *invoked*
/// for a single event. Handlers still run concurrently, so completion order
/// is unconstrained.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    /// Background work, invoked last.
    Low,
    /// Default priority.
    #[default]
    Normal,
    /// Invoked before normal subscribers.
    High,
    /// Invoked first (control-plane signals).
    Critical,
}

/// An immutable event flowing through the bus.
///
/// Events are the only communication primitive between components: agents
/// never call each other directly, they publish and subscribe to topics.
/// Topics are dot-segmented strings (`"task.created"`); subscriptions may
/// use a trailing wildcard (`"task.*"`) or the global pattern (`"*"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Topic the event is published under.
    pub topic: String,
    /// Arbitrary data attached to the event.
    pub payload: Map<String, Value>,
    /// Identifier of the producer (agent id, "scheduler", "runtime", ...).
    pub source: String,
    /// Unique id for tracing and deduplication.
    pub id: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
    /// Processing priority.
    pub priority: EventPriority,
    /// Optional metadata for routing and tracing.
    pub metadata: Map<String, Value>,
}

impl Event {
    /// Create an event on a topic with an empty payload.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: Map::new(),
            source: String::new(),
            id: short_id(12),
            timestamp: Utc::now(),
            priority: EventPriority::Normal,
            metadata: Map::new(),
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    /// Set a single payload entry.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Set the producer identifier.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the processing priority.
    #[must_use]
    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Future returned by an event handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Callback invoked for every event matching a subscription.
///
/// A handler error is caught, logged, and counted by the bus; it never
/// propagates to the publisher or to other handlers of the same event.
pub type EventHandler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Internal subscription record.
#[derive(Clone)]
pub(super) struct Subscription {
    pub handler: EventHandler,
    pub subscriber_id: String,
    pub topic_pattern: String,
    pub priority: EventPriority,
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Maximum queued events before `publish` applies backpressure.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Number of dispatched events retained for introspection.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Fallback drain interval in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_max_history() -> usize {
    1000
}

fn default_tick_interval_ms() -> u64 {
    100
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_history: default_max_history(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl BusConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue capacity.
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the history ring size.
    #[must_use]
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = max;
        self
    }

    /// Set the fallback drain interval.
    #[must_use]
    pub fn with_tick_interval_ms(mut self, millis: u64) -> Self {
        self.tick_interval_ms = millis;
        self
    }
}

/// Snapshot of bus delivery counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BusStats {
    /// Events accepted by `publish`.
    pub published: u64,
    /// Events fully dispatched to their matching handlers.
    pub dispatched: u64,
    /// Handler invocations that returned an error.
    pub errors: u64,
}

/// Generate a short hex id for tracing (events, subscribers, tasks).
pub(crate) fn short_id(len: usize) -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(len);
    id
}
