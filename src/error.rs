//! Error types for the finance automation agents

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Coarse failure class used to pick a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    SheetApi,
    MailApi,
    LlmApi,
    Document,
    Storage,
    Validation,
    Internal,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureClass::SheetApi => "sheet_api",
            FailureClass::MailApi => "mail_api",
            FailureClass::LlmApi => "llm_api",
            FailureClass::Document => "document",
            FailureClass::Storage => "storage",
            FailureClass::Validation => "validation",
            FailureClass::Internal => "internal",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // External Dependencies
    // =============================

    #[error("Sheet API error: {message}")]
    SheetError { message: String, retryable: bool },

    #[error("Mail API error: {message}")]
    MailError { message: String, retryable: bool },

    #[error("LLM error: {message}")]
    LlmError { message: String, retryable: bool },

    #[error("Document error: {0}")]
    DocumentError(String),

    #[error("Invalid record in worksheet `{worksheet}` row {row}: {message}")]
    InvalidRecord {
        worksheet: String,
        row: usize,
        message: String,
    },

    // =============================
    // Workflow Errors
    // =============================

    #[error("Step `{step}` cannot run before: {}", .missing.join(", "))]
    StepPrecondition { step: String, missing: Vec<String> },

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool input: {0}")]
    InvalidToolInput(String),

    #[error("Routing error: {0}")]
    RoutingError(String),

    #[error("Workflow run `{0}` not found")]
    UnknownRun(uuid::Uuid),

    #[error("Run state transition `{from}` -> `{to}` is invalid")]
    InvalidRunTransition { from: String, to: String },

    #[error("Workflow exceeded max iterations ({0})")]
    MaxIterationsExceeded(u32),

    #[error("Workflow run `{run_id}` incomplete: {reason}")]
    WorkflowIncomplete { run_id: uuid::Uuid, reason: String },

    #[error("{class} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        class: FailureClass,
        attempts: u32,
        last_error: String,
    },

    #[error("Verification error: {0}")]
    VerificationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl OrchestrationError {
    pub fn failure_class(&self) -> FailureClass {
        match self {
            OrchestrationError::SheetError { .. } | OrchestrationError::InvalidRecord { .. } => {
                FailureClass::SheetApi
            }
            OrchestrationError::MailError { .. } => FailureClass::MailApi,
            OrchestrationError::LlmError { .. } => FailureClass::LlmApi,
            OrchestrationError::DocumentError(_) | OrchestrationError::IoError(_) => {
                FailureClass::Document
            }
            OrchestrationError::DatabaseError(_) => FailureClass::Storage,
            OrchestrationError::RetriesExhausted { class, .. } => *class,
            OrchestrationError::StepPrecondition { .. }
            | OrchestrationError::InvalidWorkflow(_)
            | OrchestrationError::ToolNotFound(_)
            | OrchestrationError::InvalidToolInput(_)
            | OrchestrationError::RoutingError(_)
            | OrchestrationError::ConfigError(_)
            | OrchestrationError::SerializationError(_)
            | OrchestrationError::UuidError(_) => FailureClass::Validation,
            _ => FailureClass::Internal,
        }
    }

    /// Only transient failures of external services are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            OrchestrationError::SheetError { retryable, .. }
            | OrchestrationError::MailError { retryable, .. }
            | OrchestrationError::LlmError { retryable, .. } => *retryable,
            OrchestrationError::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// HTTP statuses that indicate a transient upstream condition.
pub fn is_transient_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_only_for_transient_external_failures() {
        let sheet = OrchestrationError::SheetError {
            message: "503".to_string(),
            retryable: true,
        };
        assert!(sheet.is_retryable());
        assert_eq!(sheet.failure_class(), FailureClass::SheetApi);

        let precondition = OrchestrationError::StepPrecondition {
            step: "CalculateSalaries".to_string(),
            missing: vec!["FetchPayrollData".to_string()],
        };
        assert!(!precondition.is_retryable());
        assert_eq!(precondition.failure_class(), FailureClass::Validation);

        let exhausted = OrchestrationError::RetriesExhausted {
            class: FailureClass::MailApi,
            attempts: 3,
            last_error: "timeout".to_string(),
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(exhausted.failure_class(), FailureClass::MailApi);
    }

    #[test]
    fn test_precondition_message_lists_missing_steps() {
        let err = OrchestrationError::StepPrecondition {
            step: "BudgetSummary".to_string(),
            missing: vec!["FetchProcurementData".to_string(), "BudgetProcessor".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Step `BudgetSummary` cannot run before: FetchProcurementData, BudgetProcessor"
        );
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_transient_status(reqwest::StatusCode::UNAUTHORIZED));
        assert!(!is_transient_status(reqwest::StatusCode::NOT_FOUND));
    }
}
