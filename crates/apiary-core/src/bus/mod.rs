//! EventBus — topic-pattern publish/subscribe routing.
//!
//! The central nervous system of the runtime: components subscribe to
//! dot-segmented topics (with trailing-wildcard and global patterns),
//! publish events, and the bus fans them out without any direct coupling
//! between producers and consumers.

/// Core bus implementation (queue, drain loop, wildcard dispatch).
pub mod bus;
/// Event and subscription type definitions.
pub mod types;

pub use bus::EventBus;
pub use types::{BusConfig, BusStats, Event, EventHandler, EventPriority, HandlerFuture};

#[cfg(test)]
mod tests;
