//! Tool trait, registry and the per-agent tool sets
//!
//! A tool does one unit of work for one step of a run. It reads the
//! checkpoints of earlier steps through `ToolContext::require` and talks to
//! sheets, mail, documents and the LLM with the class retry policy applied.

pub mod invoice;
pub mod payroll;
pub mod procurement;
pub mod report;

use crate::config::Settings;
use crate::error::{FailureClass, OrchestrationError};
use crate::finance::lenient::from_records;
use crate::integrations::{Attachment, Document, DocumentRenderer, Mailer, OutgoingEmail, Record, SheetClient};
use crate::llm::{generate_with_retry, LlmClient};
use crate::models::{AgentKind, Task, ToolInput, ToolOutput};
use crate::retry::{retry_classified, RetryPolicies};
use crate::state::CheckpointStore;
use crate::workflow::WorkflowDefinition;
use crate::Result;
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Trait for a single workflow step
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn execute(&self, ctx: &ToolContext<'_>, input: &ToolInput) -> Result<ToolOutput>;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Every step of `definition` must have a registered tool.
    pub fn ensure_covers(&self, definition: &WorkflowDefinition) -> Result<()> {
        let missing: Vec<&str> = definition
            .steps
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| !self.tools.contains_key(*name))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(OrchestrationError::InvalidWorkflow(format!(
                "{} workflow has steps without tools: {}",
                definition.agent,
                missing.join(", ")
            )))
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The tool set an agent exposes.
pub fn registry_for(agent: AgentKind) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    match agent {
        AgentKind::Payroll => payroll::register(&mut registry),
        AgentKind::Invoice => invoice::register(&mut registry),
        AgentKind::Report => report::register(&mut registry),
        AgentKind::Procurement => procurement::register(&mut registry),
    }
    registry
}

/// Every agent's tools in one registry. Tool names are unique across agents.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    payroll::register(&mut registry);
    invoice::register(&mut registry);
    report::register(&mut registry);
    procurement::register(&mut registry);
    registry
}

//
// ================= Clock =================
//

pub trait Clock: Send + Sync {
    /// Local wall-clock time; used for periods, file names and due dates.
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

//
// ================= Services & Context =================
//

/// External collaborators shared by every tool of a run.
#[derive(Clone)]
pub struct ToolServices {
    pub settings: Arc<Settings>,
    pub sheets: Arc<dyn SheetClient>,
    pub mailer: Arc<dyn Mailer>,
    pub documents: Arc<dyn DocumentRenderer>,
    pub llm: Arc<dyn LlmClient>,
    pub retry: RetryPolicies,
    pub clock: Arc<dyn Clock>,
}

pub struct ToolContext<'a> {
    pub run_id: Uuid,
    /// The step being executed.
    pub step: &'a str,
    pub task: &'a Task,
    pub store: &'a dyn CheckpointStore,
    pub services: &'a ToolServices,
}

impl<'a> ToolContext<'a> {
    pub fn settings(&self) -> &Settings {
        &self.services.settings
    }

    /// Typed output of an earlier step of this run.
    pub async fn require<T: DeserializeOwned>(&self, step: &str) -> Result<T> {
        let checkpoint = self
            .store
            .load_checkpoint(self.run_id, step)
            .await?
            .ok_or_else(|| OrchestrationError::StepPrecondition {
                step: self.step.to_string(),
                missing: vec![step.to_string()],
            })?;

        Ok(serde_json::from_value(checkpoint.output)?)
    }

    pub async fn records(&self, worksheet: &str) -> Result<Vec<Record>> {
        let sheets = self.services.sheets.as_ref();
        retry_classified(&self.services.retry, || sheets.get_all_records(worksheet))
            .await
            .into_result()
    }

    pub async fn rows<T: DeserializeOwned>(&self, worksheet: &str) -> Result<Vec<T>> {
        let records = self.records(worksheet).await?;
        from_records(worksheet, &records)
    }

    pub async fn append_row(&self, worksheet: &str, cells: Vec<Value>) -> Result<()> {
        let sheets = self.services.sheets.as_ref();
        retry_classified(&self.services.retry, || {
            sheets.append_row(worksheet, cells.clone())
        })
        .await
        .into_result()
    }

    pub async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        generate_with_retry(self.services.llm.as_ref(), &self.services.retry, system, prompt)
            .await
            .into_result()
    }

    /// LLM prose with a fixed fallback when the provider keeps failing.
    pub async fn generate_or(&self, system: &str, prompt: &str, fallback: &str) -> String {
        match self.generate(system, prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(run_id = %self.run_id, step = %self.step, error = %e, "LLM text unavailable, using fallback");
                fallback.to_string()
            }
        }
    }

    pub async fn send(&self, email: &OutgoingEmail) -> Result<()> {
        let mailer = self.services.mailer.as_ref();
        retry_classified(&self.services.retry, || mailer.send(email))
            .await
            .into_result()
    }

    pub async fn render(&self, document: &Document, relative_path: &str) -> Result<PathBuf> {
        self.services.documents.render(document, relative_path).await
    }

    pub fn resolve(&self, relative_path: &str) -> PathBuf {
        self.services.documents.resolve(relative_path)
    }

    pub async fn attachment(&self, path: &Path) -> Result<Attachment> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            OrchestrationError::DocumentError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());

        Ok(Attachment {
            filename,
            content_type: "text/markdown".to_string(),
            bytes,
        })
    }

    pub fn now(&self) -> NaiveDateTime {
        self.services.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

//
// ================= Delivery =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeliveryFailure {
    pub recipient: String,
    pub error: String,
}

/// Outcome of a batch of emails. Mail failures are recorded, not raised.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeliveryReport {
    pub sent: Vec<String>,
    pub failed: Vec<DeliveryFailure>,
    pub skipped: Vec<String>,
}

impl DeliveryReport {
    /// Mail errors land in `failed`; anything else is returned.
    pub fn record(&mut self, recipient: impl Into<String>, result: Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                self.sent.push(recipient.into());
                Ok(())
            }
            Err(e) if e.failure_class() == FailureClass::MailApi => {
                let recipient = recipient.into();
                warn!(recipient = %recipient, error = %e, "Email delivery failed");
                self.failed.push(DeliveryFailure {
                    recipient,
                    error: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn skip(&mut self, label: impl Into<String>) {
        self.skipped.push(label.into());
    }

    pub fn message(&self, what: &str) -> String {
        let mut out = format!("Sent {} {}", self.sent.len(), what);
        if !self.failed.is_empty() {
            out.push_str(&format!(", {} failed", self.failed.len()));
        }
        if !self.skipped.is_empty() {
            out.push_str(&format!(", {} skipped", self.skipped.len()));
        }
        out
    }
}

/// Serialize a typed step output into a successful `ToolOutput`.
pub(crate) fn typed_output<T: Serialize>(message: impl Into<String>, data: &T) -> Result<ToolOutput> {
    Ok(ToolOutput::ok(message, serde_json::to_value(data)?))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use super::report;
    use crate::finance::statements;
    use crate::integrations::{InMemorySheets, MarkdownRenderer, Outbox};
    use crate::llm::ScriptedLlm;
    use crate::models::Checkpoint;
    use crate::state::InMemoryCheckpointStore;
    use chrono::{NaiveDate, Utc};
    use serde_json::json;

    /// Everything a tool test needs, backed by in-memory doubles.
    pub struct Harness {
        pub sheets: InMemorySheets,
        pub outbox: Outbox,
        pub store: InMemoryCheckpointStore,
        pub services: ToolServices,
        pub task: Task,
        pub run_id: Uuid,
        pub dir: tempfile::TempDir,
    }

    pub fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 15)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .unwrap()
    }

    /// Two fiscal years of statements plus stakeholders, matching `Harness` settings.
    pub async fn statement_sheets() -> InMemorySheets {
        InMemorySheets::new()
            .with_sheet(
                statements::INCOME_SHEET,
                vec![
                    json!({"Metric": "Revenue", "2024 (PKR)": "1,000,000", "2025 (PKR)": 1_200_000}),
                    json!({"Metric": "COGS", "2024 (PKR)": 400_000, "2025 (PKR)": 450_000}),
                    json!({"Metric": "Operating Expenses", "2024 (PKR)": 200_000, "2025 (PKR)": 250_000}),
                    json!({"Metric": "Other Expenses", "2024 (PKR)": 100_000, "2025 (PKR)": ""}),
                ],
            )
            .await
            .with_sheet(
                statements::BALANCE_SHEET,
                vec![
                    json!({"Metric": "Cash", "2024 (PKR)": 300_000, "2025 (PKR)": 350_000}),
                    json!({"Metric": "Inventory", "2024 (PKR)": 100_000, "2025 (PKR)": 120_000}),
                    json!({"Metric": "Equipment", "2024 (PKR)": 100_000, "2025 (PKR)": 130_000}),
                    json!({"Metric": "Loans", "2024 (PKR)": 150_000, "2025 (PKR)": 100_000}),
                    json!({"Metric": "Accounts Payable", "2024 (PKR)": 50_000, "2025 (PKR)": 100_000}),
                ],
            )
            .await
            .with_sheet(
                statements::CASH_FLOW_SHEET,
                vec![
                    json!({"Category": "Starting Balance", "2024 (PKR)": 200_000, "2025 (PKR)": 300_000}),
                    json!({"Category": "Net Operating Cash Flow", "2024 (PKR)": 150_000, "2025 (PKR)": 100_000}),
                    json!({"Category": "Net Investing Cash Flow", "2024 (PKR)": -30_000, "2025 (PKR)": -20_000}),
                    json!({"Category": "Net Financing Cash Flow", "2024 (PKR)": -20_000, "2025 (PKR)": -30_000}),
                ],
            )
            .await
            .with_sheet(
                report::STAKEHOLDER_SHEET,
                vec![
                    json!({"stakeholders_email": "board@example.com"}),
                    json!({"stakeholders_email": ""}),
                    json!({"stakeholders_email": "cfo@example.com"}),
                ],
            )
            .await
    }

    impl Harness {
        pub fn new(sheets: InMemorySheets, llm: ScriptedLlm) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let outbox = Outbox::new();
            let services = ToolServices {
                settings: Arc::new(Settings {
                    output_dir: dir.path().to_path_buf(),
                    fiscal_years: vec!["2024 (PKR)".to_string(), "2025 (PKR)".to_string()],
                    ..Settings::default()
                }),
                sheets: Arc::new(sheets.clone()),
                mailer: Arc::new(outbox.clone()),
                documents: Arc::new(MarkdownRenderer::new(dir.path())),
                llm: Arc::new(llm),
                retry: RetryPolicies::immediate(),
                clock: Arc::new(FixedClock(fixed_now())),
            };

            Self {
                sheets,
                outbox,
                store: InMemoryCheckpointStore::new(),
                services,
                task: Task::new("test task"),
                run_id: Uuid::new_v4(),
                dir,
            }
        }

        pub fn ctx<'a>(&'a self, step: &'a str) -> ToolContext<'a> {
            ToolContext {
                run_id: self.run_id,
                step,
                task: &self.task,
                store: &self.store,
                services: &self.services,
            }
        }

        /// Execute `tool` and checkpoint its output like the engine does.
        pub async fn run(&self, tool: &dyn Tool) -> Result<ToolOutput> {
            self.run_with(tool, Value::Null).await
        }

        pub async fn run_with(&self, tool: &dyn Tool, parameters: Value) -> Result<ToolOutput> {
            let input = ToolInput {
                tool_name: tool.name().to_string(),
                parameters,
            };
            let output = tool.execute(&self.ctx(tool.name()), &input).await?;
            self.store
                .save_checkpoint(&Checkpoint {
                    run_id: self.run_id,
                    step: tool.name().to_string(),
                    output: output.data.clone(),
                    message: output.message.clone(),
                    attempts: 1,
                    completed_at: Utc::now(),
                })
                .await?;
            Ok(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use crate::integrations::InMemorySheets;
    use crate::llm::ScriptedLlm;
    use serde_json::json;

    #[test]
    fn test_every_agent_registry_covers_its_workflow() {
        for agent in AgentKind::ALL {
            let registry = registry_for(agent);
            let definition = WorkflowDefinition::for_agent(agent);
            tokio_test::assert_ok!(registry.ensure_covers(&definition));
            assert_eq!(registry.list().len(), definition.steps.len());
        }

        let all = create_default_registry();
        assert_eq!(all.list().len(), 24);
    }

    #[tokio::test]
    async fn test_require_missing_step_is_precondition_error() {
        let h = Harness::new(InMemorySheets::new(), ScriptedLlm::new(""));
        let ctx = h.ctx("CalculateSalaries");

        let err = ctx.require::<Value>("FetchPayrollData").await.unwrap_err();
        match err {
            OrchestrationError::StepPrecondition { step, missing } => {
                assert_eq!(step, "CalculateSalaries");
                assert_eq!(missing, vec!["FetchPayrollData".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_records_retry_transient_sheet_failures() {
        let sheets = InMemorySheets::new()
            .with_sheet("Employees", vec![json!({"employee_id": "E1"})])
            .await;
        sheets.fail_next("Employees", 2).await;
        let h = Harness::new(sheets, ScriptedLlm::new(""));

        let records = h.ctx("FetchPayrollData").records("Employees").await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_delivery_report_records_only_mail_failures() {
        let mut report = DeliveryReport::default();
        report.record("a@example.com", Ok(())).unwrap();
        report
            .record(
                "b@example.com",
                Err(OrchestrationError::MailError {
                    message: "rejected".to_string(),
                    retryable: false,
                }),
            )
            .unwrap();
        report.skip("c@example.com");

        let err = report.record(
            "d@example.com",
            Err(OrchestrationError::DocumentError("missing".to_string())),
        );
        assert!(err.is_err());

        assert_eq!(report.sent, vec!["a@example.com"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.message("emails"), "Sent 1 emails, 1 failed, 1 skipped");
    }
}
