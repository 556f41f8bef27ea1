//! Deterministic workflow engine
//!
//! Each iteration asks the selector for a proposal, then the sequencer guard
//! accepts it only if it names a ready step. Anything else is recorded as a
//! correction and the first ready step runs instead.
//!
//! Completed steps are checkpointed insert-if-absent and never re-executed,
//! so `resume` picks up exactly where a failed run stopped. A resume must win
//! the store's claim on the failed run first, so only one driver owns a run.

use super::definition::WorkflowDefinition;
use super::selector::{Proposal, SelectionView, StepSelector};
use crate::error::OrchestrationError;
use crate::models::{
    Checkpoint, Correction, CorrectionKind, ExecutionStatus, Observation, RunStatus, Task,
    ToolInput, ToolOutput, WorkflowRun,
};
use crate::retry::{retry_classified, RetryOutcome};
use crate::state::CheckpointStore;
use crate::tools::{ToolContext, ToolRegistry, ToolServices};
use crate::Result;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything one `start`/`resume` call produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: WorkflowRun,
    pub definition: WorkflowDefinition,
    /// All checkpoints of the run, including ones from earlier attempts.
    pub checkpoints: Vec<Checkpoint>,
    /// Observations of this call only.
    pub observations: Vec<Observation>,
    pub corrections: Vec<Correction>,
    pub trace: Vec<String>,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        self.run.status == RunStatus::Completed
    }

    pub fn checkpoint(&self, step: &str) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.step == step)
    }
}

/// The step the guard lets through, plus the correction when it overrode
/// the selector.
struct Decision {
    step: String,
    input: Value,
    correction: Option<Correction>,
}

pub struct WorkflowEngine {
    registry: Arc<ToolRegistry>,
    services: ToolServices,
    store: Arc<dyn CheckpointStore>,
    selector: Arc<dyn StepSelector>,
    max_iterations: u32,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<ToolRegistry>,
        services: ToolServices,
        store: Arc<dyn CheckpointStore>,
        selector: Arc<dyn StepSelector>,
    ) -> Self {
        let max_iterations = services.settings.max_iterations;
        Self {
            registry,
            services,
            store,
            selector,
            max_iterations,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Create a new run for `task` and drive it.
    pub async fn start(&self, definition: WorkflowDefinition, task: &Task) -> Result<RunOutcome> {
        definition.validate()?;
        self.registry.ensure_covers(&definition)?;

        let run = WorkflowRun::new(task, definition.agent);
        self.store.persist_run(&run).await?;

        info!(
            run_id = %run.run_id,
            agent = %definition.agent,
            selector = self.selector.name(),
            "Workflow run started"
        );

        self.drive(definition, run, task).await
    }

    /// Continue a run from its checkpoints. A completed run is returned as is.
    pub async fn resume(&self, run_id: Uuid, task: &Task) -> Result<RunOutcome> {
        let run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(OrchestrationError::UnknownRun(run_id))?;
        let definition = WorkflowDefinition::for_agent(run.agent);
        self.resume_run(definition, run, task).await
    }

    /// Resume against an explicit definition instead of the agent's canonical one.
    pub async fn resume_with(
        &self,
        definition: WorkflowDefinition,
        run_id: Uuid,
        task: &Task,
    ) -> Result<RunOutcome> {
        let run = self
            .store
            .load_run(run_id)
            .await?
            .ok_or(OrchestrationError::UnknownRun(run_id))?;
        self.resume_run(definition, run, task).await
    }

    async fn resume_run(
        &self,
        definition: WorkflowDefinition,
        run: WorkflowRun,
        task: &Task,
    ) -> Result<RunOutcome> {
        definition.validate()?;
        self.registry.ensure_covers(&definition)?;
        let run_id = run.run_id;

        let run = match run.status {
            RunStatus::Completed => {
                info!(run_id = %run_id, "Run already completed, nothing to resume");
                let checkpoints = self.store.load_checkpoints(run_id).await?;
                return Ok(RunOutcome {
                    run,
                    definition,
                    checkpoints,
                    observations: Vec::new(),
                    corrections: Vec::new(),
                    trace: vec!["Run already completed".to_string()],
                });
            }
            // A driver still owns this run.
            RunStatus::Running => {
                warn!(run_id = %run_id, "Run is still executing, refusing to resume");
                return Err(OrchestrationError::InvalidRunTransition {
                    from: RunStatus::Running.to_string(),
                    to: RunStatus::Running.to_string(),
                });
            }
            RunStatus::Failed => match self.store.claim_run(run_id, RunStatus::Failed).await? {
                Some(claimed) => claimed,
                None => {
                    let current = self
                        .store
                        .load_run(run_id)
                        .await?
                        .map(|r| r.status.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    warn!(run_id = %run_id, status = %current, "Resume lost the claim on run");
                    return Err(OrchestrationError::InvalidRunTransition {
                        from: current,
                        to: RunStatus::Running.to_string(),
                    });
                }
            },
        };

        info!(run_id = %run_id, agent = %run.agent, "Workflow run resumed");
        self.drive(definition, run, task).await
    }

    async fn drive(
        &self,
        definition: WorkflowDefinition,
        mut run: WorkflowRun,
        task: &Task,
    ) -> Result<RunOutcome> {
        let mut completed: HashSet<String> = self
            .store
            .load_checkpoints(run.run_id)
            .await?
            .into_iter()
            .map(|c| c.step)
            .collect();

        let mut observations = Vec::new();
        let mut corrections = Vec::new();
        let mut trace = Vec::new();
        let mut iteration = 0;

        while !definition.is_complete(&completed) {
            if iteration >= self.max_iterations {
                let reason = OrchestrationError::MaxIterationsExceeded(self.max_iterations);
                warn!(run_id = %run.run_id, error = %reason, "Halting run");
                trace.push(reason.to_string());
                self.transition(&mut run, RunStatus::Failed, Some(reason.to_string()))
                    .await?;
                break;
            }
            iteration += 1;

            let mut decision = self
                .decide(&definition, &completed, task, &trace, iteration)
                .await;
            if let Some(correction) = &decision.correction {
                warn!(
                    run_id = %run.run_id,
                    iteration,
                    kind = ?correction.kind,
                    proposed = %correction.proposed,
                    enforced = %correction.enforced,
                    "Selector proposal overridden"
                );
                trace.push(format!(
                    "Iteration {}: selector proposed `{}` ({:?}), running {}",
                    iteration, correction.proposed, correction.kind, correction.enforced
                ));
                corrections.push(correction.clone());
            }

            // Another writer may have finished the step since we loaded.
            if self
                .store
                .load_checkpoint(run.run_id, &decision.step)
                .await?
                .is_some()
            {
                debug!(run_id = %run.run_id, step = %decision.step, "Checkpoint exists, skipping");
                let observation = self.observe(
                    &run,
                    &decision,
                    0,
                    json!({"skipped": "checkpoint exists"}),
                    0,
                    ExecutionStatus::Skipped,
                );
                self.store.persist_observation(observation.clone()).await?;
                observations.push(observation);
                completed.insert(decision.step);
                continue;
            }

            let started = Instant::now();
            let mut outcome = self.execute_step(&run, &decision, task).await;

            // Selector-supplied input the tool rejects: run the step once more with defaults.
            let rejected = match &outcome.result {
                Err(OrchestrationError::InvalidToolInput(message)) if !decision.input.is_null() => {
                    Some(message.clone())
                }
                _ => None,
            };
            if let Some(message) = rejected {
                let correction = Correction {
                    iteration,
                    kind: CorrectionKind::RejectedInput,
                    proposed: format!("{} {}", decision.step, decision.input),
                    enforced: decision.step.clone(),
                };
                warn!(
                    run_id = %run.run_id,
                    step = %decision.step,
                    input = %decision.input,
                    error = %message,
                    "Tool rejected selector input, retrying without it"
                );
                trace.push(format!(
                    "Iteration {}: {} rejected input ({}), running without it",
                    iteration, decision.step, message
                ));
                corrections.push(correction.clone());

                let first_attempts = outcome.attempts;
                decision.input = Value::Null;
                decision.correction = Some(correction);
                outcome = self.execute_step(&run, &decision, task).await;
                outcome.attempts += first_attempts;
            }
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match outcome.result {
                Ok(output) => {
                    let checkpoint = Checkpoint {
                        run_id: run.run_id,
                        step: decision.step.clone(),
                        output: output.data.clone(),
                        message: output.message.clone(),
                        attempts: outcome.attempts,
                        completed_at: Utc::now(),
                    };
                    if !self.store.save_checkpoint(&checkpoint).await? {
                        debug!(run_id = %run.run_id, step = %decision.step, "Checkpoint already stored");
                    }

                    info!(
                        run_id = %run.run_id,
                        step = %decision.step,
                        attempts = outcome.attempts,
                        elapsed_ms,
                        "Step completed"
                    );
                    trace.push(format!(
                        "Iteration {}: {} -> {}",
                        iteration, decision.step, output.message
                    ));

                    let observation = self.observe(
                        &run,
                        &decision,
                        outcome.attempts,
                        output.data,
                        elapsed_ms,
                        ExecutionStatus::Success,
                    );
                    self.store.persist_observation(observation.clone()).await?;
                    observations.push(observation);
                    completed.insert(decision.step);
                }
                Err(e) => {
                    warn!(
                        run_id = %run.run_id,
                        step = %decision.step,
                        attempts = outcome.attempts,
                        error = %e,
                        "Step failed, halting run"
                    );
                    trace.push(format!(
                        "Iteration {}: {} failed: {}",
                        iteration, decision.step, e
                    ));

                    let observation = self.observe(
                        &run,
                        &decision,
                        outcome.attempts,
                        json!({"error": e.to_string(), "failure_class": e.failure_class()}),
                        elapsed_ms,
                        ExecutionStatus::Failed,
                    );
                    self.store.persist_observation(observation.clone()).await?;
                    observations.push(observation);

                    let reason = format!("step {} failed: {}", decision.step, e);
                    self.transition(&mut run, RunStatus::Failed, Some(reason))
                        .await?;
                    break;
                }
            }
        }

        if run.status == RunStatus::Running {
            self.transition(&mut run, RunStatus::Completed, None).await?;
            info!(
                run_id = %run.run_id,
                iterations = iteration,
                corrections = corrections.len(),
                "Workflow run completed"
            );
        }

        let checkpoints = self.store.load_checkpoints(run.run_id).await?;
        Ok(RunOutcome {
            run,
            definition,
            checkpoints,
            observations,
            corrections,
            trace,
        })
    }

    /// Ask the selector, then let only a ready step through.
    async fn decide(
        &self,
        definition: &WorkflowDefinition,
        completed: &HashSet<String>,
        task: &Task,
        history: &[String],
        iteration: u32,
    ) -> Decision {
        let ready: Vec<String> = definition
            .ready_steps(completed)
            .iter()
            .map(|s| s.name.clone())
            .collect();
        // A validated graph always has a ready step while incomplete.
        let first_ready = ready.first().cloned().unwrap_or_default();

        let view = SelectionView {
            task,
            definition,
            completed,
            tools: &self.registry,
            history,
        };

        let (kind, proposed) = match self.selector.propose(&view).await {
            Ok(Proposal::Call { tool, input }) if ready.contains(&tool) => {
                return Decision {
                    step: tool,
                    input,
                    correction: None,
                };
            }
            Ok(Proposal::Call { tool, .. }) => {
                let kind = if completed.contains(&tool) {
                    CorrectionKind::RepeatedStep
                } else if definition.step(&tool).is_some() {
                    CorrectionKind::SkippedAhead
                } else {
                    CorrectionKind::UnknownTool
                };
                (kind, tool)
            }
            Ok(Proposal::Finish(answer)) => (
                CorrectionKind::PrematureFinish,
                format!("Final Answer: {}", answer),
            ),
            Err(e) => (CorrectionKind::SelectorFailed, e.to_string()),
        };

        Decision {
            step: first_ready.clone(),
            input: Value::Null,
            correction: Some(Correction {
                iteration,
                kind,
                proposed,
                enforced: first_ready,
            }),
        }
    }

    async fn execute_step(
        &self,
        run: &WorkflowRun,
        decision: &Decision,
        task: &Task,
    ) -> RetryOutcome<ToolOutput> {
        let Some(tool) = self.registry.get(&decision.step) else {
            return RetryOutcome {
                result: Err(OrchestrationError::ToolNotFound(decision.step.clone())),
                attempts: 0,
            };
        };

        let ctx = ToolContext {
            run_id: run.run_id,
            step: &decision.step,
            task,
            store: self.store.as_ref(),
            services: &self.services,
        };
        let input = ToolInput {
            tool_name: decision.step.clone(),
            parameters: decision.input.clone(),
        };

        debug!(run_id = %run.run_id, step = %decision.step, "Executing step");
        retry_classified(&self.services.retry, || tool.execute(&ctx, &input)).await
    }

    fn observe(
        &self,
        run: &WorkflowRun,
        decision: &Decision,
        attempts: u32,
        tool_output: Value,
        execution_time_ms: u64,
        status: ExecutionStatus,
    ) -> Observation {
        Observation {
            observation_id: Uuid::new_v4(),
            run_id: run.run_id,
            step: decision.step.clone(),
            attempts,
            tool_input: decision.input.clone(),
            tool_output,
            execution_time_ms,
            created_at: Utc::now(),
            status,
            correction: decision.correction.clone(),
        }
    }

    async fn transition(
        &self,
        run: &mut WorkflowRun,
        next: RunStatus,
        reason: Option<String>,
    ) -> Result<()> {
        if !run.status.can_transition_to(next) {
            return Err(OrchestrationError::InvalidRunTransition {
                from: run.status.to_string(),
                to: next.to_string(),
            });
        }

        run.status = next;
        run.failure_reason = reason;
        run.updated_at = Utc::now();
        self.store.persist_run(run).await
    }
}
