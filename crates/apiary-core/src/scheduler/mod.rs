//! TaskScheduler — dependency-gated dispatch over the event bus.
//!
//! Tasks declare what they depend on; the scheduler publishes each task as
//! an event once its dependencies have completed, listens for
//! `task.completed` / `task.failed` signals, and drives bounded retry.
//! All state lives in process memory for the lifetime of a run.

mod engine;
mod types;

pub use engine::{TaskScheduler, TOPIC_TASK_COMPLETED, TOPIC_TASK_FAILED};
pub use types::{Task, TaskStatus};

#[cfg(test)]
mod tests;
