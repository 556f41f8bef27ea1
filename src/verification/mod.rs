//! Postcondition checks over a finished run
//!
//! Rules-based verification before the result is reported.
//! Deterministic enforcement.

use crate::models::{ComplianceCheck, RiskLevel, VerificationResult};
use crate::workflow::RunOutcome;
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use tracing::info;

/// Trait for verification rules
pub trait VerificationRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Risk severity if this rule fails
    fn risk_level(&self) -> RiskLevel;

    /// Advisory rules raise the risk level without failing verification.
    fn blocking(&self) -> bool {
        true
    }

    fn verify(&self, outcome: &RunOutcome) -> VerificationCheckResult;
}

pub struct VerificationCheckResult {
    pub passed: bool,
    pub details: String,
}

/// Verification engine that enforces rules
pub struct VerificationEngine {
    rules: Vec<Box<dyn VerificationRule>>,
}

impl VerificationEngine {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn VerificationRule>) {
        self.rules.push(rule);
    }

    pub fn verify(&self, outcome: &RunOutcome) -> Result<VerificationResult> {
        let mut compliance_checks = Vec::with_capacity(self.rules.len());
        let mut issues = Vec::new();
        let mut max_risk = RiskLevel::Low;
        let mut verified = true;

        for rule in &self.rules {
            let result = rule.verify(outcome);

            if !result.passed {
                issues.push(format!("{}: {}", rule.name(), result.details));
                max_risk = max_risk.max(rule.risk_level());
                if rule.blocking() {
                    verified = false;
                }
            }

            compliance_checks.push(ComplianceCheck {
                rule_name: rule.name().to_string(),
                passed: result.passed,
                details: result.details,
            });
        }

        info!(
            run_id = %outcome.run.run_id,
            rule_count = self.rules.len(),
            verified,
            risk_level = ?max_risk,
            "Verification completed"
        );

        Ok(VerificationResult {
            verified,
            risk_level: max_risk,
            compliance_checks,
            issues,
            verified_at: Utc::now(),
        })
    }
}

impl Default for VerificationEngine {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Rules =================
//

/// Rule: every step of the definition has a checkpoint
pub struct AllStepsCheckpointedRule;

impl VerificationRule for AllStepsCheckpointedRule {
    fn name(&self) -> &'static str {
        "all_steps_checkpointed"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Critical
    }

    fn verify(&self, outcome: &RunOutcome) -> VerificationCheckResult {
        let missing: Vec<&str> = outcome
            .definition
            .steps
            .iter()
            .map(|s| s.name.as_str())
            .filter(|name| outcome.checkpoint(name).is_none())
            .collect();
        let total = outcome.definition.steps.len();

        VerificationCheckResult {
            passed: missing.is_empty(),
            details: if missing.is_empty() {
                format!("Checkpointed {}/{} steps", total, total)
            } else {
                format!(
                    "Checkpointed {}/{} steps; missing: {}",
                    total - missing.len(),
                    total,
                    missing.join(", ")
                )
            },
        }
    }
}

/// Rule: no step completed before one of its prerequisites
pub struct PrerequisiteOrderRule;

impl VerificationRule for PrerequisiteOrderRule {
    fn name(&self) -> &'static str {
        "prerequisite_order"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn verify(&self, outcome: &RunOutcome) -> VerificationCheckResult {
        let completed_at: HashMap<&str, _> = outcome
            .checkpoints
            .iter()
            .map(|c| (c.step.as_str(), c.completed_at))
            .collect();

        let mut violations = Vec::new();
        for checkpoint in &outcome.checkpoints {
            let Some(spec) = outcome.definition.step(&checkpoint.step) else {
                continue;
            };
            for required in &spec.requires {
                match completed_at.get(required.as_str()) {
                    Some(at) if *at <= checkpoint.completed_at => {}
                    Some(_) => violations.push(format!("{} before {}", checkpoint.step, required)),
                    None => violations.push(format!("{} without {}", checkpoint.step, required)),
                }
            }
        }

        VerificationCheckResult {
            passed: violations.is_empty(),
            details: if violations.is_empty() {
                "All steps ran after their prerequisites".to_string()
            } else {
                violations.join("; ")
            },
        }
    }
}

/// Rule: the terminal step ran, and ran last
pub struct TerminalStepRule;

impl VerificationRule for TerminalStepRule {
    fn name(&self) -> &'static str {
        "terminal_step_reached"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::High
    }

    fn verify(&self, outcome: &RunOutcome) -> VerificationCheckResult {
        let Some(terminal) = outcome.definition.terminal_step() else {
            return VerificationCheckResult {
                passed: false,
                details: "Workflow has no terminal step".to_string(),
            };
        };

        let (passed, details) = match outcome.checkpoint(&terminal.name) {
            None => (false, format!("Terminal step {} not reached", terminal.name)),
            Some(last) => match outcome
                .checkpoints
                .iter()
                .find(|c| c.completed_at > last.completed_at)
            {
                Some(later) => (
                    false,
                    format!("{} completed after terminal step {}", later.step, terminal.name),
                ),
                None => (true, format!("Terminal step {} completed last", terminal.name)),
            },
        };

        VerificationCheckResult { passed, details }
    }
}

/// Rule: no recipient left undelivered (advisory)
pub struct DeliveryFailuresRule;

impl VerificationRule for DeliveryFailuresRule {
    fn name(&self) -> &'static str {
        "delivery_failures"
    }

    fn risk_level(&self) -> RiskLevel {
        RiskLevel::Medium
    }

    fn blocking(&self) -> bool {
        false
    }

    fn verify(&self, outcome: &RunOutcome) -> VerificationCheckResult {
        let failed: Vec<String> = outcome
            .checkpoints
            .iter()
            .flat_map(|c| {
                c.output
                    .get("failed")
                    .and_then(|f| f.as_array())
                    .into_iter()
                    .flatten()
                    .map(move |f| {
                        let recipient = f
                            .get("recipient")
                            .and_then(|r| r.as_str())
                            .unwrap_or("unknown");
                        format!("{} ({})", recipient, c.step)
                    })
            })
            .collect();

        VerificationCheckResult {
            passed: failed.is_empty(),
            details: if failed.is_empty() {
                "All deliveries succeeded".to_string()
            } else {
                format!("Undelivered: {}", failed.join(", "))
            },
        }
    }
}

/// Create a default verification engine with standard rules
pub fn create_default_verification_engine() -> VerificationEngine {
    let mut engine = VerificationEngine::new();
    engine.add_rule(Box::new(AllStepsCheckpointedRule));
    engine.add_rule(Box::new(PrerequisiteOrderRule));
    engine.add_rule(Box::new(TerminalStepRule));
    engine.add_rule(Box::new(DeliveryFailuresRule));
    engine
}

//
// ================= Tests =================
//
