//! Workflow definition and result types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::blackboard::Blackboard;

/// The unit of work execution, supplied by the caller.
///
/// "Run this agent on this prompt and give me text back." Any error is
/// treated as a retryable step failure; the orchestrator never inspects
/// how the work is done.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Execute the named agent against a resolved input.
    async fn execute(&self, agent: &str, input: &str) -> anyhow::Result<String>;
}

/// Runtime condition evaluated against the blackboard before a step runs.
pub type StepCondition = Arc<dyn Fn(&Blackboard) -> bool + Send + Sync>;

/// Primitive types checked by an output schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// JSON string.
    String,
    /// JSON number (integer or float).
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON array.
    Array,
}

impl FieldType {
    pub(super) fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
        }
    }

    pub(super) fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
        }
    }
}

/// Lifecycle states of a single step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet eligible to run.
    Pending,
    /// Skipped by a false condition; satisfies downstream dependencies.
    Skipped,
    /// Finished successfully.
    Done,
    /// Failed after exhausting its retry budget.
    Failed,
}

impl StepStatus {
    /// Whether the step can no longer change state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether downstream dependents may proceed.
    pub fn satisfies_dependents(self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }
}

/// One declarative step of a workflow DAG.
///
/// Steps are immutable once a run starts; only their [`StepResult`]
/// changes. The input is a template: `{{blackboard.key}}` substrings are
/// replaced with the current blackboard value at execution time.
#[derive(Clone)]
pub struct WorkflowStep {
    /// Unique id within the definition.
    pub id: String,
    /// Agent name handed to the executor.
    pub agent: String,
    /// Input template.
    pub input: String,
    /// Ids of steps that must be done (or skipped) first.
    pub depends_on: Vec<String>,
    /// Optional runtime gate; a false result skips the step.
    pub condition: Option<StepCondition>,
    /// Blackboard key the output lands under (defaults to the step id).
    pub output_key: Option<String>,
    /// Retry budget for failures.
    pub retries: u32,
    /// Per-attempt timeout; falls back to the orchestrator default.
    pub timeout: Option<Duration>,
    /// Expected keys and primitive types of a JSON output.
    pub output_schema: Option<BTreeMap<String, FieldType>>,
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowStep")
            .field("id", &self.id)
            .field("agent", &self.agent)
            .field("depends_on", &self.depends_on)
            .field("has_condition", &self.condition.is_some())
            .field("retries", &self.retries)
            .finish_non_exhaustive()
    }
}

impl WorkflowStep {
    /// Create a step with no dependencies and no retries.
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            input: input.into(),
            depends_on: Vec::new(),
            condition: None,
            output_key: None,
            retries: 0,
            timeout: None,
            output_schema: None,
        }
    }

    /// Declare dependencies by step id.
    #[must_use]
    pub fn with_depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Gate the step on a blackboard condition.
    #[must_use]
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&Blackboard) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }

    /// Store the output under a custom blackboard key.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Require the output to be JSON with the given keys and types.
    #[must_use]
    pub fn with_output_schema<I, S>(mut self, schema: I) -> Self
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: Into<String>,
    {
        self.output_schema = Some(
            schema
                .into_iter()
                .map(|(key, field)| (key.into(), field))
                .collect(),
        );
        self
    }
}

/// A named set of step ids that execute concurrently when simultaneously
/// ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelGroup {
    /// Group name (for logs and events).
    pub name: String,
    /// Member step ids.
    pub steps: Vec<String>,
}

impl ParallelGroup {
    /// Create a group from step ids.
    pub fn new<I, S>(name: impl Into<String>, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }
}

/// A declarative DAG of steps.
#[derive(Debug, Clone, Default)]
pub struct WorkflowDefinition {
    /// Workflow name (for logs, events, and run records).
    pub name: String,
    /// Steps in declaration order; order breaks ties for sequential
    /// execution within one scheduling iteration.
    pub steps: Vec<WorkflowStep>,
    /// Groups of steps that run concurrently.
    pub parallel_groups: Vec<ParallelGroup>,
    /// Whole-run deadline; falls back to the orchestrator default.
    pub run_timeout: Option<Duration>,
}

impl WorkflowDefinition {
    /// Create an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Append a step.
    #[must_use]
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a parallel group.
    #[must_use]
    pub fn with_parallel_group(mut self, group: ParallelGroup) -> Self {
        self.parallel_groups.push(group);
        self
    }

    /// Set the whole-run deadline.
    #[must_use]
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }
}

/// Outcome of one executed step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    /// Step id.
    pub step_id: String,
    /// Agent that ran it.
    pub agent: String,
    /// `Done` or `Failed`.
    pub status: StepStatus,
    /// Raw executor output (empty on failure).
    pub output: String,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the final attempt settled.
    pub completed_at: DateTime<Utc>,
    /// Wall-clock duration across all attempts.
    pub duration_ms: u64,
    /// Retries consumed.
    pub retry_count: u32,
    /// Last error, for failed steps.
    pub error: Option<String>,
}

/// Lifecycle states of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The readiness loop is executing steps.
    Running,
    /// Every step finished or was skipped.
    Completed,
    /// A step failed permanently, the graph deadlocked, or the deadline
    /// elapsed.
    Failed,
    /// Cancelled by the caller.
    Cancelled,
}

/// Record of one workflow execution.
///
/// Never mutated after a terminal status is set.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRun {
    /// Run id.
    pub id: String,
    /// Name of the executed definition.
    pub workflow_name: String,
    /// Final (or current) status.
    pub status: RunStatus,
    /// The run's blackboard.
    pub blackboard: Blackboard,
    /// Per-step result ledger, keyed by step id.
    pub results: HashMap<String, StepResult>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Run-level failure description (deadlock, timeout, step failure).
    pub error: Option<String>,
}

/// Workflow orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Default per-attempt step timeout in milliseconds.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,
    /// Default whole-run deadline in milliseconds.
    #[serde(default = "default_run_timeout_ms")]
    pub default_run_timeout_ms: u64,
    /// Base retry backoff in milliseconds; attempt N waits N times this.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_step_timeout_ms() -> u64 {
    120_000
}

fn default_run_timeout_ms() -> u64 {
    300_000
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            default_run_timeout_ms: default_run_timeout_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl WorkflowConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default per-attempt step timeout.
    #[must_use]
    pub fn with_default_step_timeout_ms(mut self, millis: u64) -> Self {
        self.default_step_timeout_ms = millis;
        self
    }

    /// Set the default whole-run deadline.
    #[must_use]
    pub fn with_default_run_timeout_ms(mut self, millis: u64) -> Self {
        self.default_run_timeout_ms = millis;
        self
    }

    /// Set the base retry backoff.
    #[must_use]
    pub fn with_retry_backoff_ms(mut self, millis: u64) -> Self {
        self.retry_backoff_ms = millis;
        self
    }
}
