//! Topic-pattern publish/subscribe router.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{short_id, BusConfig, BusStats, Event, EventHandler, EventPriority, Subscription};
use crate::error::{Error, Result};

/// Central async event bus.
///
/// Supports topic-based pub/sub with wildcard matching:
///   - `"task.created"` — exact match
///   - `"task.*"`       — any topic under the `task.` prefix
///   - `"*"`            — every topic
///
/// Dispatch is best-effort and at-most-once per handler per event: queued
/// events are lost if the process stops between enqueue and drain. Handlers
/// for one event are invoked in priority order but run concurrently, and an
/// error in one handler never stops delivery to the others.
///
/// The bus is cheap to clone; clones share the same subscription table,
/// queue, and counters.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    config: BusConfig,
    /// Exact-topic subscriptions, keyed by topic.
    topics: RwLock<HashMap<String, Vec<Subscription>>>,
    /// Trailing-wildcard subscriptions, keyed by the full `prefix.*` pattern.
    wildcards: RwLock<HashMap<String, Vec<Subscription>>>,
    /// Global `*` subscriptions.
    globals: RwLock<Vec<Subscription>>,
    queue_tx: mpsc::Sender<Event>,
    queue_rx: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    history: Mutex<VecDeque<Event>>,
    running: AtomicBool,
    tick: Mutex<Option<TickTask>>,
    published: AtomicU64,
    dispatched: AtomicU64,
    errors: AtomicU64,
}

struct TickTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl EventBus {
    /// Create a bus with the given configuration.
    #[must_use]
    pub fn new(config: BusConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            inner: Arc::new(BusInner {
                config,
                topics: RwLock::new(HashMap::new()),
                wildcards: RwLock::new(HashMap::new()),
                globals: RwLock::new(Vec::new()),
                queue_tx,
                queue_rx: tokio::sync::Mutex::new(queue_rx),
                history: Mutex::new(VecDeque::new()),
                running: AtomicBool::new(false),
                tick: Mutex::new(None),
                published: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                errors: AtomicU64::new(0),
            }),
        }
    }

    // ── Subscription management ─────────────────────────────────────

    /// Subscribe a handler to a topic pattern.
    ///
    /// Returns the subscriber id (generated when not provided). Subscribing
    /// the same id to the same pattern again replaces the existing handler
    /// instead of adding a duplicate; distinct ids may share a pattern.
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: EventHandler,
        subscriber_id: Option<String>,
        priority: EventPriority,
    ) -> String {
        let pattern = pattern.into();
        let subscriber_id = subscriber_id.unwrap_or_else(|| short_id(8));
        let sub = Subscription {
            handler,
            subscriber_id: subscriber_id.clone(),
            topic_pattern: pattern.clone(),
            priority,
        };

        if pattern == "*" {
            let mut globals = self.inner.globals.write().unwrap();
            upsert(&mut globals, sub);
        } else if pattern.ends_with(".*") {
            let mut wildcards = self.inner.wildcards.write().unwrap();
            upsert(wildcards.entry(pattern.clone()).or_default(), sub);
        } else {
            let mut topics = self.inner.topics.write().unwrap();
            upsert(topics.entry(pattern.clone()).or_default(), sub);
        }

        debug!(subscriber_id = %subscriber_id, pattern = %pattern, "subscription added");
        subscriber_id
    }

    /// Subscribe an async closure at normal priority.
    pub fn subscribe_fn<F, Fut>(
        &self,
        pattern: impl Into<String>,
        subscriber_id: Option<String>,
        handler: F,
    ) -> String
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.subscribe(
            pattern,
            Arc::new(move |event| Box::pin(handler(event))),
            subscriber_id,
            EventPriority::Normal,
        )
    }

    /// Remove every subscription held by a subscriber. Returns the count removed.
    pub fn unsubscribe(&self, subscriber_id: &str) -> usize {
        let mut removed = 0;

        {
            let mut topics = self.inner.topics.write().unwrap();
            for subs in topics.values_mut() {
                let before = subs.len();
                subs.retain(|s| s.subscriber_id != subscriber_id);
                removed += before - subs.len();
            }
            topics.retain(|_, subs| !subs.is_empty());
        }
        {
            let mut wildcards = self.inner.wildcards.write().unwrap();
            for subs in wildcards.values_mut() {
                let before = subs.len();
                subs.retain(|s| s.subscriber_id != subscriber_id);
                removed += before - subs.len();
            }
            wildcards.retain(|_, subs| !subs.is_empty());
        }
        {
            let mut globals = self.inner.globals.write().unwrap();
            let before = globals.len();
            globals.retain(|s| s.subscriber_id != subscriber_id);
            removed += before - globals.len();
        }

        if removed > 0 {
            debug!(subscriber_id = %subscriber_id, removed, "unsubscribed");
        }
        removed
    }

    // ── Publishing ──────────────────────────────────────────────────

    /// Enqueue an event for dispatch.
    ///
    /// Applies backpressure when the queue is at capacity. If the bus is
    /// running and no drain is in progress, the queue is drained
    /// immediately; otherwise the event waits for the periodic tick.
    pub async fn publish(&self, event: Event) {
        debug!(id = %event.id, topic = %event.topic, source = %event.source, "event published");
        if self.inner.queue_tx.send(event).await.is_err() {
            // Receiver lives as long as the bus; this is unreachable in practice.
            warn!("event queue closed, event dropped");
            return;
        }
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        if self.inner.running.load(Ordering::SeqCst) {
            self.drain().await;
        }
    }

    /// Enqueue an event without waiting for queue capacity.
    ///
    /// The synchronous edge for non-async call sites. The event is picked
    /// up by the next drain tick.
    pub fn publish_nowait(&self, event: Event) -> Result<()> {
        self.inner.queue_tx.try_send(event).map_err(|_| Error::QueueFull {
            capacity: self.inner.config.queue_capacity,
        })?;
        self.inner.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Start the periodic drain tick.
    ///
    /// Publishing already triggers an immediate drain; the tick guarantees
    /// queued events are eventually flushed even with no new publishes.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let bus = self.clone();
        let tick = Duration::from_millis(self.inner.config.tick_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(tick) => bus.drain().await,
                    _ = child.cancelled() => break,
                }
            }
        });

        {
            let mut slot = self.inner.tick.lock().unwrap();
            *slot = Some(TickTask { token, handle });
        }
        info!("event bus started");
    }

    /// Stop the tick, then perform one final drain of the queue.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let tick = {
            let mut slot = self.inner.tick.lock().unwrap();
            slot.take()
        };
        if let Some(tick) = tick {
            tick.token.cancel();
            let _ = tick.handle.await;
        }

        self.drain().await;
        let stats = self.stats();
        info!(
            published = stats.published,
            dispatched = stats.dispatched,
            errors = stats.errors,
            "event bus stopped"
        );
    }

    /// Whether the drain tick is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Drain the queue, dispatching each event in turn.
    ///
    /// A no-op when another drain holds the receiver: the active drainer
    /// keeps pulling until the queue is empty, so nothing is stranded.
    pub async fn drain(&self) {
        let Ok(mut queue_rx) = self.inner.queue_rx.try_lock() else {
            return;
        };
        while let Ok(event) = queue_rx.try_recv() {
            self.dispatch_event(event).await;
        }
    }

    async fn dispatch_event(&self, event: Event) {
        {
            let mut history = self.inner.history.lock().unwrap();
            history.push_back(event.clone());
            while history.len() > self.inner.config.max_history {
                history.pop_front();
            }
        }

        let mut matched = self.matching_subscriptions(&event.topic);
        // Stable sort: equal priorities keep subscription order.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        if !matched.is_empty() {
            let calls: Vec<_> = matched
                .into_iter()
                .map(|sub| {
                    let event = event.clone();
                    async move {
                        let topic = event.topic.clone();
                        if let Err(error) = (sub.handler)(event).await {
                            warn!(
                                subscriber_id = %sub.subscriber_id,
                                topic = %topic,
                                error = %error,
                                "event handler failed"
                            );
                            self.inner.errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
                .collect();
            futures::future::join_all(calls).await;
        }

        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Collect subscriptions matching a topic: exact, `prefix.*`, then global.
    fn matching_subscriptions(&self, topic: &str) -> Vec<Subscription> {
        let mut matched = Vec::new();

        {
            let topics = self.inner.topics.read().unwrap();
            if let Some(subs) = topics.get(topic) {
                matched.extend(subs.iter().cloned());
            }
        }
        {
            let wildcards = self.inner.wildcards.read().unwrap();
            for (pattern, subs) in wildcards.iter() {
                // "task.*" matches "task.created" and "task.sub.deep",
                // but not a literal publish to "task.*" itself.
                let prefix = &pattern[..pattern.len() - 1];
                if topic != pattern.as_str() && topic.starts_with(prefix) {
                    matched.extend(subs.iter().cloned());
                }
            }
        }
        {
            let globals = self.inner.globals.read().unwrap();
            matched.extend(globals.iter().cloned());
        }

        matched
    }

    // ── Introspection ───────────────────────────────────────────────

    /// Snapshot of the delivery counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        BusStats {
            published: self.inner.published.load(Ordering::Relaxed),
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
        }
    }

    /// Total number of active subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        let topics: usize = {
            let topics = self.inner.topics.read().unwrap();
            topics.values().map(Vec::len).sum()
        };
        let wildcards: usize = {
            let wildcards = self.inner.wildcards.read().unwrap();
            wildcards.values().map(Vec::len).sum()
        };
        let globals = self.inner.globals.read().unwrap().len();
        topics + wildcards + globals
    }

    /// The most recently dispatched events, oldest first.
    #[must_use]
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        let history = self.inner.history.lock().unwrap();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

/// Insert a subscription, replacing an existing one with the same id and
/// pattern so re-subscription stays idempotent.
fn upsert(subs: &mut Vec<Subscription>, sub: Subscription) {
    if let Some(existing) = subs
        .iter_mut()
        .find(|s| s.subscriber_id == sub.subscriber_id && s.topic_pattern == sub.topic_pattern)
    {
        *existing = sub;
    } else {
        subs.push(sub);
    }
}
