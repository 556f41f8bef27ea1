//! Main orchestrator
//!
//! INPUT → ROUTE → EXECUTE → VERIFY → RESUME? → AUDIT → COMPLETE

use crate::audit::{compute_task_hash, AuditLog};
use crate::classifier::TaskRouter;
use crate::config::{SelectorKind, Settings};
use crate::error::OrchestrationError;
use crate::integrations::{
    GmailMailer, GoogleSheetsClient, InMemorySheets, Mailer, MarkdownRenderer, Outbox, SheetClient,
};
use crate::llm::{build_llm_client, DisabledLlm, LlmClient};
use crate::models::{
    Checkpoint, Correction, ExecutionRecord, Observation, OrchestrationResult, RouteDecision,
    RunStatus, Task, VerificationResult, WorkflowRun,
};
use crate::retry::RetryPolicies;
use crate::state::build_checkpoint_store;
use crate::tools::{create_default_registry, SystemClock, ToolServices};
use crate::verification::{create_default_verification_engine, VerificationEngine};
use crate::workflow::{
    DeterministicSelector, LlmStepSelector, RunOutcome, StepSelector, WorkflowDefinition,
    WorkflowEngine,
};
use crate::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Stored state of a run, as reported by `run_status`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run: WorkflowRun,
    pub checkpoints: Vec<Checkpoint>,
    pub observations: Vec<Observation>,
}

/// Main orchestrator that coordinates the entire workflow
pub struct Orchestrator {
    router: TaskRouter,
    engine: WorkflowEngine,
    verification_engine: VerificationEngine,
    audit_log: AuditLog,
    max_resume_attempts: u32,
}

impl Orchestrator {
    pub fn new(
        router: TaskRouter,
        engine: WorkflowEngine,
        verification_engine: VerificationEngine,
        audit_log: AuditLog,
        max_resume_attempts: u32,
    ) -> Self {
        Self {
            router,
            engine,
            verification_engine,
            audit_log,
            max_resume_attempts,
        }
    }

    /// Wire real collaborators where credentials are configured and
    /// in-memory ones elsewhere.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let llm = build_llm_client(&settings)?;
        let policies = RetryPolicies::default();

        let sheets: Arc<dyn SheetClient> =
            match (&settings.spreadsheet_id, &settings.sheets_access_token) {
                (Some(id), Some(token)) => {
                    info!("Sheets backend: google");
                    Arc::new(GoogleSheetsClient::new(
                        &settings.sheets_api_base_url,
                        id.clone(),
                        token.clone(),
                    )?)
                }
                _ => {
                    warn!("SPREADSHEET_ID or SHEETS_ACCESS_TOKEN not set, using in-memory sheets");
                    Arc::new(InMemorySheets::new())
                }
            };

        let mailer: Arc<dyn Mailer> = match &settings.gmail_access_token {
            Some(token) => {
                info!("Mail backend: gmail");
                Arc::new(GmailMailer::new(
                    &settings.gmail_api_base_url,
                    token.clone(),
                    settings.sender_email.clone(),
                )?)
            }
            None => {
                warn!("GMAIL_ACCESS_TOKEN not set, mail goes to an in-memory outbox");
                Arc::new(Outbox::new())
            }
        };

        let selector: Arc<dyn StepSelector> = match (settings.step_selector, &llm) {
            (SelectorKind::Llm, Some(client)) => {
                Arc::new(LlmStepSelector::new(client.clone(), policies.clone()))
            }
            (SelectorKind::Llm, None) => {
                warn!("STEP_SELECTOR=llm but no LLM is configured, using deterministic selector");
                Arc::new(DeterministicSelector)
            }
            (SelectorKind::Deterministic, _) => Arc::new(DeterministicSelector),
        };

        let tool_llm: Arc<dyn LlmClient> = match &llm {
            Some(client) => client.clone(),
            None => Arc::new(DisabledLlm),
        };

        let store = build_checkpoint_store(&settings);
        let max_resume_attempts = settings.max_resume_attempts;
        let documents = Arc::new(MarkdownRenderer::new(settings.output_dir.clone()));

        let services = ToolServices {
            settings: Arc::new(settings),
            sheets,
            mailer,
            documents,
            llm: tool_llm,
            retry: policies.clone(),
            clock: Arc::new(SystemClock),
        };

        let engine = WorkflowEngine::new(
            Arc::new(create_default_registry()),
            services,
            store,
            selector,
        );

        Ok(Self::new(
            TaskRouter::new(llm, policies),
            engine,
            create_default_verification_engine(),
            AuditLog::new(),
            max_resume_attempts,
        ))
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit_log
    }

    pub async fn route(&self, task: &Task) -> RouteDecision {
        self.router.route(task).await
    }

    /// Route the task, run its workflow to completion and report.
    pub async fn execute_task(&self, task: Task) -> Result<OrchestrationResult> {
        let start_time = Instant::now();
        let mut reasoning_trace = vec!["INPUT: Task received".to_string()];

        info!(
            task_id = %task.task_id,
            description = %task.description,
            "Orchestrator: starting execution"
        );

        let decision = self.route(&task).await;
        let agent = decision
            .agent
            .ok_or_else(|| OrchestrationError::RoutingError(decision.detail.clone()))?;
        reasoning_trace.push(format!(
            "ROUTE: {} agent ({:?}: {})",
            agent, decision.source, decision.detail
        ));

        let definition = WorkflowDefinition::for_agent(agent);
        reasoning_trace.push(format!("EXECUTE: {} steps", definition.steps.len()));

        let outcome = self.engine.start(definition, &task).await?;
        self.finish(task, outcome, reasoning_trace, start_time).await
    }

    /// Continue a stored run from its checkpoints.
    pub async fn resume(&self, run_id: Uuid) -> Result<OrchestrationResult> {
        let start_time = Instant::now();
        let run = self
            .engine
            .store()
            .load_run(run_id)
            .await?
            .ok_or(OrchestrationError::UnknownRun(run_id))?;
        let task = task_of(&run);

        let mut reasoning_trace = vec![format!("INPUT: Resume of {} run", run.agent)];
        reasoning_trace.push("RESUME: Continuing from checkpoints".to_string());

        let outcome = self.engine.resume(run_id, &task).await?;
        self.finish(task, outcome, reasoning_trace, start_time).await
    }

    pub async fn run_status(&self, run_id: Uuid) -> Result<RunSnapshot> {
        let store = self.engine.store();
        let run = store
            .load_run(run_id)
            .await?
            .ok_or(OrchestrationError::UnknownRun(run_id))?;

        Ok(RunSnapshot {
            run,
            checkpoints: store.load_checkpoints(run_id).await?,
            observations: store.load_observations(run_id).await?,
        })
    }

    /// Verify, resume a failed run while attempts remain, then audit.
    async fn finish(
        &self,
        task: Task,
        mut outcome: RunOutcome,
        mut reasoning_trace: Vec<String>,
        start_time: Instant,
    ) -> Result<OrchestrationResult> {
        let mut observations = outcome.observations.clone();
        let mut corrections = outcome.corrections.clone();
        reasoning_trace.extend(outcome.trace.iter().cloned());

        let mut verification = self.verify(&outcome, &mut reasoning_trace)?;
        let mut resumes = 0;

        while !verification.verified
            && outcome.run.status == RunStatus::Failed
            && resumes < self.max_resume_attempts
        {
            resumes += 1;
            warn!(
                run_id = %outcome.run.run_id,
                issues = ?verification.issues,
                attempt = resumes,
                "Verification failed - resuming run"
            );
            reasoning_trace.push(format!("RESUME: Verification failed - attempt {}", resumes));

            outcome = self.engine.resume(outcome.run.run_id, &task).await?;
            observations.extend(outcome.observations.iter().cloned());
            corrections.extend(outcome.corrections.iter().cloned());
            reasoning_trace.extend(outcome.trace.iter().cloned());

            verification = self.verify(&outcome, &mut reasoning_trace)?;
        }

        let completed = outcome.run.status == RunStatus::Completed && verification.verified;
        reasoning_trace.push(if completed {
            "COMPLETE: Verification passed".to_string()
        } else {
            format!(
                "FAILED: {}",
                outcome
                    .run
                    .failure_reason
                    .as_deref()
                    .unwrap_or("verification failed")
            )
        });

        let output = run_output(&outcome);
        let summary = summarize(&outcome);

        let execution_record = ExecutionRecord {
            audit_id: Uuid::new_v4(),
            run_id: outcome.run.run_id,
            agent: outcome.run.agent,
            task_hash: compute_task_hash(&task),
            task: Arc::new(task),
            observations: Arc::new(observations),
            corrections: Arc::new(corrections.clone()),
            verification_result: Arc::new(verification.clone()),
            final_output: output.clone(),
            reasoning_trace: Arc::new(reasoning_trace.clone()),
            created_at: Utc::now(),
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        };
        let audit_id = self.audit_log.record(execution_record).await?;

        info!(
            run_id = %outcome.run.run_id,
            status = %outcome.run.status,
            audit_id = %audit_id,
            "Orchestrator: execution finished"
        );

        let passed = verification
            .compliance_checks
            .iter()
            .filter(|c| c.passed)
            .count();

        Ok(OrchestrationResult {
            agent: outcome.run.agent,
            run_id: outcome.run.run_id,
            status: outcome.run.status,
            output,
            summary,
            risk_summary: format!("{:?}", verification.risk_level),
            compliance_statement: format!(
                "{} / {} checks passed",
                passed,
                verification.compliance_checks.len()
            ),
            audit_id,
            corrections,
            reasoning_trace,
        })
    }

    fn verify(
        &self,
        outcome: &RunOutcome,
        reasoning_trace: &mut Vec<String>,
    ) -> Result<VerificationResult> {
        debug!(run_id = %outcome.run.run_id, "Running verification");
        let verification = self.verification_engine.verify(outcome)?;

        reasoning_trace.push(format!(
            "VERIFY: {} / {} rules passed",
            verification
                .compliance_checks
                .iter()
                .filter(|c| c.passed)
                .count(),
            verification.compliance_checks.len()
        ));
        Ok(verification)
    }
}

/// The task a stored run was started for.
fn task_of(run: &WorkflowRun) -> Task {
    Task {
        task_id: run.task_id,
        description: run.description.clone(),
        requested_by: None,
        created_at: run.started_at,
    }
}

fn run_output(outcome: &RunOutcome) -> Value {
    let steps: Vec<Value> = outcome
        .checkpoints
        .iter()
        .map(|c| json!({"step": c.step, "message": c.message, "attempts": c.attempts}))
        .collect();
    let result = outcome
        .definition
        .terminal_step()
        .and_then(|t| outcome.checkpoint(&t.name))
        .map(|c| c.output.clone())
        .unwrap_or(Value::Null);

    json!({
        "status": outcome.run.status,
        "steps": steps,
        "result": result,
        "failure_reason": outcome.run.failure_reason,
    })
}

fn summarize(outcome: &RunOutcome) -> String {
    let agent = outcome.run.agent;
    match outcome.run.status {
        RunStatus::Completed => {
            let last = outcome
                .definition
                .terminal_step()
                .and_then(|t| outcome.checkpoint(&t.name))
                .map(|c| c.message.as_str())
                .unwrap_or("");
            format!(
                "{} agent completed {} steps. {}",
                agent,
                outcome.checkpoints.len(),
                last
            )
            .trim_end()
            .to_string()
        }
        _ => format!(
            "{} agent stopped after {} of {} steps: {}",
            agent,
            outcome.checkpoints.len(),
            outcome.definition.steps.len(),
            outcome
                .run
                .failure_reason
                .as_deref()
                .unwrap_or("unknown reason")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;
    use crate::models::AgentKind;
    use crate::state::{CheckpointStore, InMemoryCheckpointStore};
    use crate::tools::FixedClock;
    use chrono::NaiveDate;

    struct Fixture {
        orchestrator: Orchestrator,
        sheets: InMemorySheets,
        outbox: Outbox,
        _dir: tempfile::TempDir,
    }

    async fn fixture(max_resume_attempts: u32) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let sheets = InMemorySheets::new()
            .with_sheet(
                "Invoices",
                vec![
                    json!({"invoice_id": 7, "customer_name": "Acme", "customer_email": "ap@acme.test", "date": "2025-05-01", "due_date": "2025-05-31", "amount": 250, "status": "unpaid"}),
                    json!({"invoice_id": 8, "customer_name": "Globex", "customer_email": "ap@globex.test", "date": "2025-06-01", "due_date": "2025-07-01", "amount": 90, "status": "paid"}),
                ],
            )
            .await;
        let outbox = Outbox::new();

        let services = ToolServices {
            settings: Arc::new(Settings {
                output_dir: dir.path().to_path_buf(),
                ..Settings::default()
            }),
            sheets: Arc::new(sheets.clone()),
            mailer: Arc::new(outbox.clone()),
            documents: Arc::new(MarkdownRenderer::new(dir.path())),
            llm: Arc::new(ScriptedLlm::new("")),
            retry: RetryPolicies::immediate(),
            clock: Arc::new(FixedClock(
                NaiveDate::from_ymd_opt(2025, 6, 15)
                    .and_then(|d| d.and_hms_opt(9, 30, 0))
                    .unwrap(),
            )),
        };
        let store: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let engine = WorkflowEngine::new(
            Arc::new(create_default_registry()),
            services,
            store,
            Arc::new(DeterministicSelector),
        );

        Fixture {
            orchestrator: Orchestrator::new(
                TaskRouter::keywords_only(),
                engine,
                create_default_verification_engine(),
                AuditLog::new(),
                max_resume_attempts,
            ),
            sheets,
            outbox,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_invoice_task_end_to_end() {
        let f = fixture(1).await;

        let result = f
            .orchestrator
            .execute_task(Task::new("Send invoices and remind overdue customers"))
            .await
            .unwrap();

        assert_eq!(result.agent, AgentKind::Invoice);
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.risk_summary, "Low");
        assert_eq!(result.compliance_statement, "4 / 4 checks passed");
        assert!(result.summary.starts_with("Invoice agent completed 4 steps."));
        assert_eq!(result.output["result"]["paid"], json!(["Globex (ID: 8)"]));
        assert!(result
            .reasoning_trace
            .iter()
            .any(|l| l.starts_with("ROUTE: Invoice agent")));

        // two invoices + one reminder
        assert_eq!(f.outbox.sent().await.len(), 3);
        assert!(f
            .orchestrator
            .audit_log()
            .verify_integrity(result.audit_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failed_run_is_resumed_automatically() {
        let f = fixture(1).await;
        // one call plus three retries
        f.sheets.fail_next("Invoices", 4).await;

        let result = f
            .orchestrator
            .execute_task(Task::new("Create invoices for billing"))
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert!(result
            .reasoning_trace
            .iter()
            .any(|l| l == "RESUME: Verification failed - attempt 1"));

        let audit_ids = f
            .orchestrator
            .audit_log()
            .list_for_run(result.run_id)
            .await
            .unwrap();
        assert_eq!(audit_ids, vec![result.audit_id]);
        let record = f.orchestrator.audit_log().get(result.audit_id).await.unwrap().unwrap();
        assert_eq!(record.observations.len(), 5);
    }

    #[tokio::test]
    async fn test_manual_resume_after_failure() {
        let f = fixture(0).await;
        f.sheets.fail_next("Invoices", 4).await;

        let failed = f
            .orchestrator
            .execute_task(Task::new("Create invoices for billing"))
            .await
            .unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.risk_summary, "Critical");
        assert!(failed.summary.contains("stopped after 0 of 4 steps"));

        let snapshot = f.orchestrator.run_status(failed.run_id).await.unwrap();
        assert_eq!(snapshot.run.status, RunStatus::Failed);
        assert_eq!(snapshot.observations.len(), 1);

        let resumed = f.orchestrator.resume(failed.run_id).await.unwrap();
        assert_eq!(resumed.status, RunStatus::Completed);
        assert_eq!(resumed.run_id, failed.run_id);
        assert_ne!(resumed.audit_id, failed.audit_id);

        // resuming a completed run changes nothing
        let again = f.orchestrator.resume(failed.run_id).await.unwrap();
        assert_eq!(again.status, RunStatus::Completed);
        assert_eq!(f.outbox.sent().await.len(), 3);
    }

    #[tokio::test]
    async fn test_unroutable_task_and_unknown_run() {
        let f = fixture(1).await;

        let err = f
            .orchestrator
            .execute_task(Task::new("what's the weather"))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::RoutingError(_)));

        let err = f.orchestrator.run_status(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::UnknownRun(_)));
    }
}
