//! Step graphs for each agent
//!
//! A step becomes ready once every step it requires has a checkpoint. The
//! graph has exactly one terminal step, which nothing else depends on.

use crate::error::OrchestrationError;
use crate::models::AgentKind;
use crate::tools::{invoice, payroll, procurement, report};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepSpec {
    pub name: String,
    pub requires: Vec<String>,
    #[serde(default)]
    pub terminal: bool,
}

impl StepSpec {
    pub fn new(name: &str, requires: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            requires: requires.iter().map(|s| s.to_string()).collect(),
            terminal: false,
        }
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub agent: AgentKind,
    /// Declaration order breaks ties between ready steps.
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    pub fn new(agent: AgentKind, steps: Vec<StepSpec>) -> Self {
        Self { agent, steps }
    }

    /// The canonical step graph of an agent.
    pub fn for_agent(agent: AgentKind) -> Self {
        let steps = match agent {
            AgentKind::Payroll => vec![
                StepSpec::new(payroll::FETCH, &[]),
                StepSpec::new(payroll::CALCULATE, &[payroll::FETCH]),
                StepSpec::new(payroll::GENERATE, &[payroll::CALCULATE]),
                StepSpec::new(payroll::SEND, &[payroll::GENERATE]).terminal(),
            ],
            AgentKind::Invoice => vec![
                StepSpec::new(invoice::CREATE, &[]),
                StepSpec::new(invoice::SEND, &[invoice::CREATE]),
                StepSpec::new(invoice::REMIND, &[invoice::SEND]),
                StepSpec::new(invoice::MARK_PAID, &[invoice::REMIND]).terminal(),
            ],
            AgentKind::Report => vec![
                StepSpec::new(report::FETCH, &[]),
                StepSpec::new(report::METRICS, &[report::FETCH]),
                StepSpec::new(report::CHARTS, &[report::FETCH]),
                StepSpec::new(report::SUMMARY, &[report::METRICS]),
                StepSpec::new(report::GENERATE, &[report::METRICS, report::CHARTS, report::SUMMARY]),
                StepSpec::new(report::SEND, &[report::FETCH, report::GENERATE]).terminal(),
            ],
            AgentKind::Procurement => vec![
                StepSpec::new(procurement::FETCH, &[]),
                StepSpec::new(procurement::BUDGET, &[procurement::FETCH]),
                StepSpec::new(procurement::BUDGET_SUMMARY, &[procurement::BUDGET]),
                StepSpec::new(procurement::INVENTORY, &[procurement::FETCH]),
                StepSpec::new(procurement::INVENTORY_SUMMARY, &[procurement::INVENTORY]),
                StepSpec::new(procurement::APPROVAL, &[procurement::FETCH, procurement::BUDGET]),
                StepSpec::new(procurement::APPROVAL_SUMMARY, &[procurement::APPROVAL]),
                StepSpec::new(procurement::NOTIFIER, &[procurement::APPROVAL]),
                StepSpec::new(
                    procurement::GENERATE,
                    &[
                        procurement::BUDGET_SUMMARY,
                        procurement::INVENTORY_SUMMARY,
                        procurement::APPROVAL_SUMMARY,
                        procurement::NOTIFIER,
                    ],
                ),
                StepSpec::new(procurement::SEND, &[procurement::GENERATE]).terminal(),
            ],
        };
        Self::new(agent, steps)
    }

    pub fn step(&self, name: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn terminal_step(&self) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.terminal)
    }

    /// Structural checks: unique names, known prerequisites, no cycles and a
    /// single terminal step that every other step leads to.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| {
            Err(OrchestrationError::InvalidWorkflow(format!(
                "{} workflow: {}",
                self.agent, reason
            )))
        };

        if self.steps.is_empty() {
            return invalid("no steps".to_string());
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if !names.insert(step.name.as_str()) {
                return invalid(format!("duplicate step `{}`", step.name));
            }
        }

        for step in &self.steps {
            if let Some(unknown) = step.requires.iter().find(|r| !names.contains(r.as_str())) {
                return invalid(format!("`{}` requires unknown step `{}`", step.name, unknown));
            }
        }

        if self.topological_order().len() != self.steps.len() {
            return invalid("step graph has a cycle".to_string());
        }

        let terminals: Vec<&StepSpec> = self.steps.iter().filter(|s| s.terminal).collect();
        let terminal = match terminals.as_slice() {
            [only] => *only,
            [] => return invalid("no terminal step".to_string()),
            _ => return invalid(format!("{} terminal steps", terminals.len())),
        };

        if let Some(dependent) = self
            .steps
            .iter()
            .find(|s| s.requires.iter().any(|r| *r == terminal.name))
        {
            return invalid(format!(
                "terminal step `{}` is required by `{}`",
                terminal.name, dependent.name
            ));
        }

        let upstream = self.ancestors(&terminal.name);
        if let Some(stray) = self
            .steps
            .iter()
            .find(|s| s.name != terminal.name && !upstream.contains(s.name.as_str()))
        {
            return invalid(format!(
                "step `{}` does not lead to terminal step `{}`",
                stray.name, terminal.name
            ));
        }

        Ok(())
    }

    /// Steps not yet completed whose prerequisites all are, in declaration order.
    pub fn ready_steps(&self, completed: &HashSet<String>) -> Vec<&StepSpec> {
        self.steps
            .iter()
            .filter(|s| !completed.contains(&s.name))
            .filter(|s| s.requires.iter().all(|r| completed.contains(r)))
            .collect()
    }

    /// Prerequisites of `step` that have not completed.
    pub fn missing_prerequisites(&self, step: &str, completed: &HashSet<String>) -> Vec<String> {
        self.step(step)
            .map(|s| {
                s.requires
                    .iter()
                    .filter(|r| !completed.contains(*r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_complete(&self, completed: &HashSet<String>) -> bool {
        self.steps.iter().all(|s| completed.contains(&s.name))
    }

    /// Kahn's algorithm, ties broken by declaration order. Steps on a cycle
    /// are left out.
    pub fn topological_order(&self) -> Vec<&str> {
        let mut indegree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.requires.len()))
            .collect();
        let mut order = Vec::with_capacity(self.steps.len());

        loop {
            let next = self
                .steps
                .iter()
                .map(|s| s.name.as_str())
                .find(|name| indegree.get(name) == Some(&0));

            let Some(name) = next else { break };
            indegree.remove(name);
            order.push(name);

            for step in &self.steps {
                let hits = step.requires.iter().filter(|r| r.as_str() == name).count();
                if let Some(degree) = indegree.get_mut(step.name.as_str()) {
                    *degree = degree.saturating_sub(hits);
                }
            }
        }

        order
    }

    fn ancestors(&self, name: &str) -> HashSet<&str> {
        let mut seen = HashSet::new();
        let mut stack = vec![name];

        while let Some(current) = stack.pop() {
            if let Some(step) = self.step(current) {
                for required in &step.requires {
                    if seen.insert(required.as_str()) {
                        stack.push(required.as_str());
                    }
                }
            }
        }
        seen
    }
}
