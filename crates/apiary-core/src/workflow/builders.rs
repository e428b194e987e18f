//! Convenience constructors for common workflow shapes.
//!
//! Pure data builders; they only assemble a [`WorkflowDefinition`] and
//! take no part in execution.

use super::types::{ParallelGroup, WorkflowDefinition, WorkflowStep};

/// Minimal description of one step for the shape builders.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Step id (also its default blackboard key).
    pub id: String,
    /// Agent name handed to the executor.
    pub agent: String,
    /// Base prompt; builders may append templated context.
    pub prompt: String,
}

impl StepSpec {
    /// Create a step spec.
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            prompt: prompt.into(),
        }
    }
}

/// Chain steps linearly: each depends on its predecessor and templates
/// the predecessor's output into its prompt.
pub fn pipeline(name: impl Into<String>, stages: Vec<StepSpec>) -> WorkflowDefinition {
    let mut definition = WorkflowDefinition::new(name);
    let mut previous: Option<String> = None;

    for stage in stages {
        let input = match &previous {
            None => stage.prompt,
            Some(prev_id) => format!(
                "{}\n\nContext from previous step:\n{{{{blackboard.{prev_id}}}}}",
                stage.prompt
            ),
        };
        let mut step = WorkflowStep::new(stage.id.clone(), stage.agent, input);
        if let Some(prev_id) = previous {
            step = step.with_depends_on([prev_id]);
        }
        previous = Some(stage.id);
        definition = definition.with_step(step);
    }

    definition
}

/// Fan N independent workers out into one parallel group and fan their
/// outputs back into a single merging step.
pub fn fan_out_fan_in(
    name: impl Into<String>,
    workers: Vec<StepSpec>,
    merge: StepSpec,
) -> WorkflowDefinition {
    let worker_ids: Vec<String> = workers.iter().map(|w| w.id.clone()).collect();

    let mut definition = WorkflowDefinition::new(name);
    for worker in workers {
        definition =
            definition.with_step(WorkflowStep::new(worker.id, worker.agent, worker.prompt));
    }

    let mut merge_input = format!("{}\n\nWorker results:", merge.prompt);
    for id in &worker_ids {
        merge_input.push_str(&format!("\n- {id}: {{{{blackboard.{id}}}}}"));
    }
    definition = definition
        .with_step(
            WorkflowStep::new(merge.id, merge.agent, merge_input)
                .with_depends_on(worker_ids.clone()),
        )
        .with_parallel_group(ParallelGroup::new("fan_out", worker_ids));

    definition
}
