//! Workflow state persistence
//!
//! Runs, per-step checkpoints and observations. Checkpoints are written
//! insert-if-absent so a step's result can never be overwritten.

pub mod postgres;

pub use postgres::PostgresCheckpointStore;

use crate::config::Settings;
use crate::models::{Checkpoint, Observation, RunStatus, WorkflowRun};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Trait for workflow state persistence
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn persist_run(&self, run: &WorkflowRun) -> Result<()>;
    async fn load_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>>;

    /// Atomically move a run from `expected` back to `Running`. Returns the
    /// claimed run, or None when the stored status was something else, so
    /// only one caller can ever win the same claim.
    async fn claim_run(&self, run_id: Uuid, expected: RunStatus) -> Result<Option<WorkflowRun>>;

    /// Returns false when a checkpoint for (run, step) already existed.
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool>;
    async fn load_checkpoint(&self, run_id: Uuid, step: &str) -> Result<Option<Checkpoint>>;
    /// Ordered by completion time.
    async fn load_checkpoints(&self, run_id: Uuid) -> Result<Vec<Checkpoint>>;

    async fn persist_observation(&self, obs: Observation) -> Result<()>;
    async fn load_observations(&self, run_id: Uuid) -> Result<Vec<Observation>>;
}

/// In-memory checkpoint store for development and tests
pub struct InMemoryCheckpointStore {
    runs: Arc<RwLock<HashMap<Uuid, WorkflowRun>>>,
    checkpoints: Arc<RwLock<HashMap<Uuid, Vec<Checkpoint>>>>,
    observations_by_run: Arc<RwLock<HashMap<Uuid, Vec<Observation>>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
            observations_by_run: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn persist_run(&self, run: &WorkflowRun) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<WorkflowRun>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn claim_run(&self, run_id: Uuid, expected: RunStatus) -> Result<Option<WorkflowRun>> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run_id) {
            Some(run) if run.status == expected && expected.can_transition_to(RunStatus::Running) => {
                run.status = RunStatus::Running;
                run.failure_reason = None;
                run.updated_at = Utc::now();
                Ok(Some(run.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<bool> {
        let mut checkpoints = self.checkpoints.write().await;
        let steps = checkpoints.entry(checkpoint.run_id).or_default();

        if steps.iter().any(|c| c.step == checkpoint.step) {
            return Ok(false);
        }
        steps.push(checkpoint.clone());
        Ok(true)
    }

    async fn load_checkpoint(&self, run_id: Uuid, step: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints
            .get(&run_id)
            .and_then(|steps| steps.iter().find(|c| c.step == step))
            .cloned())
    }

    async fn load_checkpoints(&self, run_id: Uuid) -> Result<Vec<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        let mut steps = checkpoints.get(&run_id).cloned().unwrap_or_default();
        steps.sort_by_key(|c| c.completed_at);
        Ok(steps)
    }

    async fn persist_observation(&self, obs: Observation) -> Result<()> {
        let mut observations = self.observations_by_run.write().await;
        observations.entry(obs.run_id).or_insert_with(Vec::new).push(obs);
        Ok(())
    }

    async fn load_observations(&self, run_id: Uuid) -> Result<Vec<Observation>> {
        let observations = self.observations_by_run.read().await;
        Ok(observations.get(&run_id).cloned().unwrap_or_default())
    }
}

/// Postgres when a database URL is configured, in-memory otherwise.
pub fn build_checkpoint_store(settings: &Settings) -> Arc<dyn CheckpointStore> {
    if let Some(url) = &settings.database_url {
        match PostgresCheckpointStore::connect_lazy(url) {
            Ok(store) => {
                info!("Checkpoint store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres checkpoint store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Checkpoint store backend: in-memory");
    Arc::new(InMemoryCheckpointStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AgentKind, ExecutionStatus, Task};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn checkpoint(run_id: Uuid, step: &str, offset_secs: i64) -> Checkpoint {
        Checkpoint {
            run_id,
            step: step.to_string(),
            output: json!({"step": step}),
            message: format!("{} done", step),
            attempts: 1,
            completed_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn test_checkpoint_insert_if_absent() {
        let store = InMemoryCheckpointStore::new();
        let run_id = Uuid::new_v4();

        assert!(store.save_checkpoint(&checkpoint(run_id, "FetchPayrollData", 0)).await.unwrap());

        let mut replacement = checkpoint(run_id, "FetchPayrollData", 5);
        replacement.output = json!({"overwritten": true});
        assert!(!store.save_checkpoint(&replacement).await.unwrap());

        let stored = store
            .load_checkpoint(run_id, "FetchPayrollData")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.output, json!({"step": "FetchPayrollData"}));
    }

    #[tokio::test]
    async fn test_checkpoints_ordered_by_completion() {
        let store = InMemoryCheckpointStore::new();
        let run_id = Uuid::new_v4();

        store.save_checkpoint(&checkpoint(run_id, "B", 10)).await.unwrap();
        store.save_checkpoint(&checkpoint(run_id, "A", 0)).await.unwrap();
        store.save_checkpoint(&checkpoint(Uuid::new_v4(), "C", 0)).await.unwrap();

        let steps: Vec<String> = store
            .load_checkpoints(run_id)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.step)
            .collect();
        assert_eq!(steps, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_runs_and_observations_round_trip() {
        let store = InMemoryCheckpointStore::new();
        let run = WorkflowRun::new(&Task::new("Process payroll"), AgentKind::Payroll);
        store.persist_run(&run).await.unwrap();

        store
            .persist_observation(Observation {
                observation_id: Uuid::new_v4(),
                run_id: run.run_id,
                step: "FetchPayrollData".to_string(),
                attempts: 1,
                tool_input: json!({}),
                tool_output: json!({}),
                execution_time_ms: 3,
                created_at: Utc::now(),
                status: ExecutionStatus::Success,
                correction: None,
            })
            .await
            .unwrap();

        let loaded = store.load_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.agent, AgentKind::Payroll);
        assert_eq!(store.load_observations(run.run_id).await.unwrap().len(), 1);
        assert!(store.load_run(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_run_is_won_once() {
        let store = InMemoryCheckpointStore::new();
        let mut run = WorkflowRun::new(&Task::new("Send invoices"), AgentKind::Invoice);
        run.status = RunStatus::Failed;
        run.failure_reason = Some("sheet down".to_string());
        store.persist_run(&run).await.unwrap();

        let claimed = store
            .claim_run(run.run_id, RunStatus::Failed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status, RunStatus::Running);
        assert!(claimed.failure_reason.is_none());

        assert!(store.claim_run(run.run_id, RunStatus::Failed).await.unwrap().is_none());
        assert!(store.claim_run(run.run_id, RunStatus::Running).await.unwrap().is_none());
        assert!(store.claim_run(Uuid::new_v4(), RunStatus::Failed).await.unwrap().is_none());
        let stored = store.load_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Running);
    }

    #[test]
    fn test_build_without_database_url_is_in_memory() {
        // Only checks that construction does not panic or touch the network.
        let _store = build_checkpoint_store(&Settings::default());
    }
}
