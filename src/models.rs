//! Core data models for the finance automation agents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

//
// ================= Enums =================
//

/// The specialised agents a task can be routed to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Payroll,
    Invoice,
    Report,
    Procurement,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Payroll,
        AgentKind::Invoice,
        AgentKind::Report,
        AgentKind::Procurement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Payroll => "payroll",
            AgentKind::Invoice => "invoice",
            AgentKind::Report => "report",
            AgentKind::Procurement => "procurement",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        AgentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == label.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RouteSource {
    Llm,
    Keywords,
    Unrouted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Running -> Completed | Failed, and Failed -> Running on resume.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Completed)
                | (RunStatus::Running, RunStatus::Failed)
                | (RunStatus::Failed, RunStatus::Running)
        )
    }
}

//
// ================= Task =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub description: String,
    #[serde(default)]
    pub requested_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            description: description.into(),
            requested_by: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub agent: Option<AgentKind>,
    pub source: RouteSource,
    pub detail: String,
}

//
// ================= Workflow Run =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: Uuid,
    pub task_id: Uuid,
    pub agent: AgentKind,
    pub description: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl WorkflowRun {
    pub fn new(task: &Task, agent: AgentKind) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            task_id: task.task_id,
            agent,
            description: task.description.clone(),
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
            failure_reason: None,
        }
    }
}

/// Persisted result of one completed step of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: Uuid,
    pub step: String,
    pub output: serde_json::Value,
    pub message: String,
    pub attempts: u32,
    pub completed_at: DateTime<Utc>,
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    RepeatedStep,
    SkippedAhead,
    UnknownTool,
    PrematureFinish,
    SelectorFailed,
    /// The step was right but the tool rejected its input; ran again without it.
    RejectedInput,
}

/// Recorded whenever the sequencer overrides the selector's proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub iteration: u32,
    pub kind: CorrectionKind,
    pub proposed: String,
    pub enforced: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub observation_id: Uuid,
    pub run_id: Uuid,
    pub step: String,
    pub attempts: u32,
    pub tool_input: serde_json::Value,
    pub tool_output: serde_json::Value,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub correction: Option<Correction>,
}

//
// ================= Verification =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub risk_level: RiskLevel,
    pub compliance_checks: Vec<ComplianceCheck>,
    pub issues: Vec<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceCheck {
    pub rule_name: String,
    pub passed: bool,
    pub details: String,
}

//
// ================= Execution Record =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub audit_id: Uuid,
    pub run_id: Uuid,
    pub agent: AgentKind,

    pub task: Arc<Task>,
    pub task_hash: String,
    pub observations: Arc<Vec<Observation>>,
    pub corrections: Arc<Vec<Correction>>,
    pub verification_result: Arc<VerificationResult>,

    pub final_output: serde_json::Value,
    pub reasoning_trace: Arc<Vec<String>>,

    pub created_at: DateTime<Utc>,
    pub execution_time_ms: u64,
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInput {
    pub tool_name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub data: serde_json::Value,
    /// Human readable result, the text the agent would have seen.
    pub message: String,
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            data,
            message: message.into(),
            error: None,
        }
    }
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub agent: AgentKind,
    pub run_id: Uuid,
    pub status: RunStatus,
    pub output: serde_json::Value,
    pub summary: String,
    pub risk_summary: String,
    pub compliance_statement: String,
    pub audit_id: Uuid,
    pub corrections: Vec<Correction>,
    pub reasoning_trace: Vec<String>,
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentKind::Payroll => "Payroll",
            AgentKind::Invoice => "Invoice",
            AgentKind::Report => "Report",
            AgentKind::Procurement => "Procurement",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_transitions() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Completed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Failed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn test_agent_kind_parse() {
        assert_eq!(AgentKind::parse(" Invoice "), Some(AgentKind::Invoice));
        assert_eq!(AgentKind::parse("procurement"), Some(AgentKind::Procurement));
        assert_eq!(AgentKind::parse("weather"), None);
    }
}
