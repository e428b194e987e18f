//! Apiary Core — multi-agent orchestration substrate
//!
//! This crate provides the execution core of the Apiary agent runtime:
//! - Bus: topic-pattern publish/subscribe event routing
//! - Scheduler: dependency-gated task dispatch with bounded retry
//! - Workflow: DAG execution with parallel groups, conditions, and a
//!   shared blackboard
//! - Runtime: a façade wiring the three together for embedding
//!
//! Agents themselves — the things that turn a prompt into text — stay
//! outside this crate, reached only through the [`AgentExecutor`] seam
//! and bus subscriptions. All state lives in one process's memory for
//! the lifetime of a run: delivery is at-most-once and nothing here
//! persists to durable storage.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod error;
pub mod runtime;
pub mod scheduler;
pub mod workflow;

pub use bus::{BusConfig, BusStats, Event, EventBus, EventHandler, EventPriority, HandlerFuture};
pub use error::{Error, Result};
pub use runtime::{Runtime, RuntimeStatus};
pub use scheduler::{Task, TaskScheduler, TaskStatus, TOPIC_TASK_COMPLETED, TOPIC_TASK_FAILED};
pub use workflow::{
    fan_out_fan_in, pipeline, AgentExecutor, Blackboard, FieldType, ParallelGroup, RunStatus,
    StepResult, StepSpec, StepStatus, WorkflowConfig, WorkflowDefinition, WorkflowOrchestrator,
    WorkflowRun, WorkflowStep, TOPIC_STEP_COMPLETED, TOPIC_STEP_FAILED, TOPIC_WORKFLOW_COMPLETED,
    TOPIC_WORKFLOW_STARTED,
};
