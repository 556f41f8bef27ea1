//! Finance Automation Agents
//!
//! Four back-office agents (payroll, invoicing, financial reporting and
//! procurement) behind a single task router:
//! - Routes free-text tasks by LLM with a keyword fallback
//! - Runs each agent as a fixed step graph, one checkpoint per step
//! - Retries failures by class and resumes interrupted runs
//! - Verifies postconditions and audits every run
//!
//! UNIFIED LOOP:
//! INPUT → ROUTE → SELECT → EXECUTE → CHECKPOINT → VERIFY → RESUME? → COMPLETE

pub mod agent;
pub mod api;
pub mod audit;
pub mod classifier;
pub mod config;
pub mod error;
pub mod finance;
pub mod integrations;
pub mod llm;
pub mod models;
pub mod retry;
pub mod state;
pub mod tools;
pub mod verification;
pub mod workflow;

pub use error::Result;

// Re-export common types
pub use classifier::TaskRouter;
pub use models::*;
