//! Workflow execution: the readiness loop and per-step machinery.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::blackboard::Blackboard;
use super::types::{
    AgentExecutor, RunStatus, StepResult, StepStatus, WorkflowConfig, WorkflowDefinition,
    WorkflowRun, WorkflowStep,
};
use crate::bus::types::short_id;
use crate::bus::{Event, EventBus};
use crate::error::{Error, Result};

/// Published when a run starts.
pub const TOPIC_WORKFLOW_STARTED: &str = "workflow.started";
/// Published when a run reaches a terminal status.
pub const TOPIC_WORKFLOW_COMPLETED: &str = "workflow.completed";
/// Published for every step that finishes successfully.
pub const TOPIC_STEP_COMPLETED: &str = "workflow.step.completed";
/// Published for every step that fails permanently.
pub const TOPIC_STEP_FAILED: &str = "workflow.step.failed";

/// Executes workflow definitions against an externally supplied executor.
///
/// The orchestrator drives the DAG itself: it computes ready steps from
/// dependency statuses, runs parallel-group members concurrently with an
/// all-complete join, applies conditions, retries failures with linear
/// backoff, and enforces per-step and whole-run deadlines. Structural
/// failures (deadlock, deadline) terminate the run but still produce a
/// normal [`WorkflowRun`] with `status: Failed` — callers get a uniform
/// success-path API with failure encoded in data.
///
/// Lifecycle events are published when a bus is attached; they are
/// observability only and the orchestrator never depends on anyone
/// receiving them.
pub struct WorkflowOrchestrator {
    executor: Arc<dyn AgentExecutor>,
    bus: Option<EventBus>,
    config: WorkflowConfig,
    runs: DashMap<String, WorkflowRun>,
    /// Cancellation tokens of in-flight runs.
    active: DashMap<String, CancellationToken>,
}

/// Mutable bookkeeping of one run, owned by the readiness loop.
struct RunState {
    statuses: HashMap<String, StepStatus>,
    results: HashMap<String, StepResult>,
    blackboard: Blackboard,
    error: Option<String>,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator with the default configuration.
    #[must_use]
    pub fn new(executor: Arc<dyn AgentExecutor>) -> Self {
        Self {
            executor,
            bus: None,
            config: WorkflowConfig::default(),
            runs: DashMap::new(),
            active: DashMap::new(),
        }
    }

    /// Override the configuration.
    #[must_use]
    pub fn with_config(mut self, config: WorkflowConfig) -> Self {
        self.config = config;
        self
    }

    /// Attach a bus for lifecycle events.
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Execute a workflow to completion and return its run record.
    ///
    /// Returns an error only for a structurally invalid definition
    /// (duplicate step ids, unknown dependency or group members); every
    /// runtime outcome — including deadlock and deadline — is encoded in
    /// the returned run's status.
    pub async fn run(
        &self,
        definition: WorkflowDefinition,
        initial_context: Option<HashMap<String, Value>>,
    ) -> Result<WorkflowRun> {
        validate_definition(&definition)?;

        let run_id = short_id(12);
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = definition
            .run_timeout
            .unwrap_or(Duration::from_millis(self.config.default_run_timeout_ms));

        let token = CancellationToken::new();
        self.active.insert(run_id.clone(), token.clone());

        let mut state = RunState {
            statuses: definition
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepStatus::Pending))
                .collect(),
            results: HashMap::new(),
            blackboard: Blackboard::seeded(initial_context.unwrap_or_default()),
            error: None,
        };

        self.runs.insert(
            run_id.clone(),
            WorkflowRun {
                id: run_id.clone(),
                workflow_name: definition.name.clone(),
                status: RunStatus::Running,
                blackboard: state.blackboard.clone(),
                results: HashMap::new(),
                started_at,
                completed_at: None,
                error: None,
            },
        );

        info!(run_id = %run_id, workflow = %definition.name, steps = definition.steps.len(), "workflow started");
        self.emit(
            TOPIC_WORKFLOW_STARTED,
            lifecycle_payload(&run_id, &definition.name, None),
        )
        .await;

        let steps_by_id: HashMap<&str, &WorkflowStep> = definition
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s))
            .collect();
        let parallel_ids: HashSet<&str> = definition
            .parallel_groups
            .iter()
            .flat_map(|g| g.steps.iter().map(String::as_str))
            .collect();

        let outcome = loop {
            // Readiness: pending steps whose dependencies are all done or
            // skipped.
            let ready_ids: Vec<String> = definition
                .steps
                .iter()
                .filter(|step| {
                    state.statuses[&step.id] == StepStatus::Pending
                        && step.depends_on.iter().all(|dep| {
                            state
                                .statuses
                                .get(dep)
                                .is_some_and(|status| status.satisfies_dependents())
                        })
                })
                .map(|step| step.id.clone())
                .collect();

            if ready_ids.is_empty() {
                if state.statuses.values().all(|s| s.is_terminal()) {
                    if state.statuses.values().any(|s| *s == StepStatus::Failed) {
                        break RunStatus::Failed;
                    }
                    break RunStatus::Completed;
                }
                if state.statuses.values().any(|s| *s == StepStatus::Failed) {
                    // Remaining pending steps sit behind a failed
                    // dependency and can never run.
                    break RunStatus::Failed;
                }
                state.error = Some(
                    "dependency graph deadlocked: no step is ready and none is running"
                        .to_string(),
                );
                warn!(run_id = %run_id, "workflow deadlocked");
                break RunStatus::Failed;
            }

            if token.is_cancelled() {
                info!(run_id = %run_id, "workflow cancelled");
                break RunStatus::Cancelled;
            }
            if start.elapsed() >= deadline {
                state.error = Some(format!(
                    "workflow timed out after {}ms",
                    deadline.as_millis()
                ));
                warn!(run_id = %run_id, "workflow timed out");
                break RunStatus::Failed;
            }

            // Conditions gate ready steps before any execution.
            let mut to_run: Vec<&WorkflowStep> = Vec::new();
            for id in &ready_ids {
                let step = steps_by_id[id.as_str()];
                if let Some(condition) = &step.condition {
                    if !condition(&state.blackboard) {
                        info!(run_id = %run_id, step_id = %step.id, "step skipped by condition");
                        state.statuses.insert(step.id.clone(), StepStatus::Skipped);
                        continue;
                    }
                }
                to_run.push(step);
            }
            if to_run.is_empty() {
                // Skips may have unblocked other steps; rescan.
                continue;
            }

            let (batch, sequential): (Vec<&WorkflowStep>, Vec<&WorkflowStep>) = to_run
                .into_iter()
                .partition(|step| parallel_ids.contains(step.id.as_str()));

            // Parallel-group members fan out together and fan in on an
            // all-complete join; one failure never cancels its siblings.
            if !batch.is_empty() {
                debug!(run_id = %run_id, count = batch.len(), "executing parallel batch");
                let calls: Vec<_> = batch
                    .iter()
                    .map(|step| {
                        let input = state.blackboard.resolve(&step.input);
                        self.execute_step(&run_id, step, input)
                    })
                    .collect();
                let outcomes = join_all(calls).await;
                for (step, result) in batch.iter().zip(outcomes) {
                    self.record_result(&run_id, &definition.name, step, result, &mut state)
                        .await;
                }
            }

            // Remaining ready steps run one at a time in declaration
            // order; a failure halts the rest of this iteration.
            for step in sequential {
                if token.is_cancelled() {
                    break;
                }
                let input = state.blackboard.resolve(&step.input);
                let result = self.execute_step(&run_id, step, input).await;
                let failed = result.status == StepStatus::Failed;
                self.record_result(&run_id, &definition.name, step, result, &mut state)
                    .await;
                if failed {
                    warn!(run_id = %run_id, step_id = %step.id, "sequential step failed, halting iteration");
                    break;
                }
            }
        };

        self.active.remove(&run_id);
        let run = WorkflowRun {
            id: run_id.clone(),
            workflow_name: definition.name.clone(),
            status: outcome,
            blackboard: state.blackboard,
            results: state.results,
            started_at,
            completed_at: Some(Utc::now()),
            error: state.error,
        };
        self.runs.insert(run_id.clone(), run.clone());

        info!(run_id = %run_id, status = ?outcome, "workflow finished");
        self.emit(
            TOPIC_WORKFLOW_COMPLETED,
            lifecycle_payload(&run_id, &definition.name, Some(outcome)),
        )
        .await;

        Ok(run)
    }

    /// Execute one step: race the executor against the step timeout, check
    /// the output schema, and retry with linear backoff while budget
    /// remains. The input arrives already resolved against the blackboard.
    async fn execute_step(&self, run_id: &str, step: &WorkflowStep, input: String) -> StepResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let timeout = step
            .timeout
            .unwrap_or(Duration::from_millis(self.config.default_step_timeout_ms));

        let mut attempt: u32 = 0;
        let error = loop {
            attempt += 1;
            debug!(run_id = %run_id, step_id = %step.id, agent = %step.agent, attempt, "executing step");

            let failure =
                match tokio::time::timeout(timeout, self.executor.execute(&step.agent, &input))
                    .await
                {
                    Ok(Ok(output)) => match check_schema(step, &output) {
                        Ok(()) => {
                            info!(
                                run_id = %run_id,
                                step_id = %step.id,
                                duration_ms = start.elapsed().as_millis() as u64,
                                "step done"
                            );
                            return StepResult {
                                step_id: step.id.clone(),
                                agent: step.agent.clone(),
                                status: StepStatus::Done,
                                output,
                                started_at,
                                completed_at: Utc::now(),
                                duration_ms: start.elapsed().as_millis() as u64,
                                retry_count: attempt - 1,
                                error: None,
                            };
                        }
                        Err(message) => message,
                    },
                    Ok(Err(error)) => error.to_string(),
                    Err(_) => format!("step timed out after {}ms", timeout.as_millis()),
                };

            if attempt > step.retries {
                break failure;
            }
            let backoff = Duration::from_millis(self.config.retry_backoff_ms * u64::from(attempt));
            warn!(
                run_id = %run_id,
                step_id = %step.id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %failure,
                "step failed, retrying"
            );
            tokio::time::sleep(backoff).await;
        };

        warn!(run_id = %run_id, step_id = %step.id, error = %error, "step failed permanently");
        StepResult {
            step_id: step.id.clone(),
            agent: step.agent.clone(),
            status: StepStatus::Failed,
            output: String::new(),
            started_at,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            retry_count: attempt - 1,
            error: Some(error),
        }
    }

    /// Apply a settled step to the run state and publish its event.
    async fn record_result(
        &self,
        run_id: &str,
        workflow: &str,
        step: &WorkflowStep,
        result: StepResult,
        state: &mut RunState,
    ) {
        state.statuses.insert(step.id.clone(), result.status);

        if result.status == StepStatus::Done {
            let key = step.output_key.clone().unwrap_or_else(|| step.id.clone());
            state
                .blackboard
                .set(key, Value::String(result.output.clone()));

            let mut payload = lifecycle_payload(run_id, workflow, None);
            payload.insert("step_id".to_string(), Value::String(step.id.clone()));
            payload.insert("agent".to_string(), Value::String(step.agent.clone()));
            payload.insert("duration_ms".to_string(), result.duration_ms.into());
            payload.insert("retry_count".to_string(), result.retry_count.into());
            self.emit(TOPIC_STEP_COMPLETED, payload).await;
        } else {
            if state.error.is_none() {
                state.error = Some(format!(
                    "step '{}' failed: {}",
                    step.id,
                    result.error.as_deref().unwrap_or("unknown error")
                ));
            }
            let mut payload = lifecycle_payload(run_id, workflow, None);
            payload.insert("step_id".to_string(), Value::String(step.id.clone()));
            payload.insert(
                "error".to_string(),
                Value::String(result.error.clone().unwrap_or_default()),
            );
            self.emit(TOPIC_STEP_FAILED, payload).await;
        }

        state.results.insert(step.id.clone(), result);
    }

    async fn emit(&self, topic: &str, payload: Map<String, Value>) {
        if let Some(bus) = &self.bus {
            bus.publish(
                Event::new(topic)
                    .with_payload(payload)
                    .with_source("workflow"),
            )
            .await;
        }
    }

    // ── Run management ──────────────────────────────────────────────

    /// Retrieve a run record by id.
    #[must_use]
    pub fn get_run(&self, run_id: &str) -> Option<WorkflowRun> {
        self.runs.get(run_id).map(|entry| entry.value().clone())
    }

    /// Cancel a run.
    ///
    /// Cooperative: flips the run's token so the readiness loop stops
    /// accepting new steps; an in-flight executor call is bounded only by
    /// its own step timeout. Returns `Ok(false)` when the run already
    /// finished, `Err` when the id was never seen.
    pub fn cancel(&self, run_id: &str) -> Result<bool> {
        if let Some(token) = self.active.get(run_id) {
            token.cancel();
            info!(run_id = %run_id, "workflow cancellation requested");
            return Ok(true);
        }
        if self.runs.contains_key(run_id) {
            return Ok(false);
        }
        Err(Error::RunNotFound(run_id.to_string()))
    }

    /// Snapshot of every known run.
    #[must_use]
    pub fn all_runs(&self) -> Vec<WorkflowRun> {
        self.runs.iter().map(|entry| entry.value().clone()).collect()
    }
}

/// Reject definitions with duplicate ids or references to unknown steps.
/// Cycles pass validation and surface at runtime as a deadlock.
fn validate_definition(definition: &WorkflowDefinition) -> Result<()> {
    let mut ids: HashSet<&str> = HashSet::new();
    for step in &definition.steps {
        if !ids.insert(step.id.as_str()) {
            return Err(Error::InvalidDefinition(format!(
                "duplicate step id '{}'",
                step.id
            )));
        }
    }
    for step in &definition.steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(Error::InvalidDefinition(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.id, dep
                )));
            }
        }
    }
    for group in &definition.parallel_groups {
        for member in &group.steps {
            if !ids.contains(member.as_str()) {
                return Err(Error::InvalidDefinition(format!(
                    "parallel group '{}' references unknown step '{}'",
                    group.name, member
                )));
            }
        }
    }
    Ok(())
}

fn check_schema(step: &WorkflowStep, output: &str) -> std::result::Result<(), String> {
    let Some(schema) = &step.output_schema else {
        return Ok(());
    };
    let value: Value =
        serde_json::from_str(output).map_err(|e| format!("output is not valid JSON: {e}"))?;
    let Some(object) = value.as_object() else {
        return Err("output is not a JSON object".to_string());
    };
    for (key, field) in schema {
        match object.get(key) {
            None => return Err(format!("output missing key '{key}'")),
            Some(found) if !field.matches(found) => {
                return Err(format!("output key '{key}' is not a {}", field.name()));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn lifecycle_payload(run_id: &str, workflow: &str, status: Option<RunStatus>) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("run_id".to_string(), Value::String(run_id.to_string()));
    payload.insert("workflow".to_string(), Value::String(workflow.to_string()));
    if let Some(status) = status {
        payload.insert(
            "status".to_string(),
            serde_json::to_value(status).unwrap_or_default(),
        );
    }
    payload
}
