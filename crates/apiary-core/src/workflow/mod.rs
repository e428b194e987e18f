//! Workflow orchestration — declarative DAGs of agent steps.
//!
//! A [`WorkflowDefinition`] declares steps with dependencies, parallel
//! groups, runtime conditions, retry budgets, and timeouts. The
//! [`WorkflowOrchestrator`] executes the DAG against a caller-supplied
//! [`AgentExecutor`], writing step outputs into a run-scoped
//! [`Blackboard`] that later steps read through `{{blackboard.key}}`
//! input templates.

/// Run-scoped shared scratchpad.
pub mod blackboard;
/// Pipeline and fan-out/fan-in definition builders.
pub mod builders;
/// The readiness loop and step execution.
pub mod runner;
/// Definition, result, and config types.
pub mod types;

pub use blackboard::Blackboard;
pub use builders::{fan_out_fan_in, pipeline, StepSpec};
pub use runner::{
    WorkflowOrchestrator, TOPIC_STEP_COMPLETED, TOPIC_STEP_FAILED, TOPIC_WORKFLOW_COMPLETED,
    TOPIC_WORKFLOW_STARTED,
};
pub use types::{
    AgentExecutor, FieldType, ParallelGroup, RunStatus, StepResult, StepStatus, WorkflowConfig,
    WorkflowDefinition, WorkflowRun, WorkflowStep,
};
