//! Task router
//!
//! Maps a free-text task to one of the specialised agents:
//! - LLM classification first (reads the `AGENT:` label)
//! - keyword fallback when the LLM is absent, fails, or answers nonsense
//! - `Unrouted` otherwise

use crate::llm::{generate_with_retry, LlmClient};
use crate::models::{AgentKind, RouteDecision, RouteSource, Task};
use crate::retry::RetryPolicies;
use std::sync::Arc;
use tracing::{info, warn};

/// Static keyword lists, checked in this order.
const INVOICE_KEYWORDS: &[&str] = &["invoice", "customer", "billing", "overdue", "payment"];
const PAYROLL_KEYWORDS: &[&str] = &["payroll", "salary", "payslip", "employee"];
const PROCUREMENT_KEYWORDS: &[&str] = &[
    "purchase order",
    "inventory",
    "vendor",
    "procurement",
    "stock",
];
const REPORT_KEYWORDS: &[&str] = &[
    "report",
    "summary",
    "net profit",
    "income",
    "balance",
    "cash flow",
];

const KEYWORD_TABLE: &[(AgentKind, &[&str])] = &[
    (AgentKind::Invoice, INVOICE_KEYWORDS),
    (AgentKind::Payroll, PAYROLL_KEYWORDS),
    (AgentKind::Procurement, PROCUREMENT_KEYWORDS),
    (AgentKind::Report, REPORT_KEYWORDS),
];

/// Order in which agent names are searched for in a free-form LLM reply.
const REPLY_SCAN_ORDER: [AgentKind; 4] = [
    AgentKind::Payroll,
    AgentKind::Invoice,
    AgentKind::Procurement,
    AgentKind::Report,
];

const ROUTER_SYSTEM_PROMPT: &str =
    "You are an intelligent task router for financial automation. Answer with a short analysis followed by a final line `AGENT: <PAYROLL|INVOICE|REPORT|PROCUREMENT>`.";

pub struct TaskRouter {
    llm: Option<Arc<dyn LlmClient>>,
    policies: RetryPolicies,
}

impl TaskRouter {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, policies: RetryPolicies) -> Self {
        Self { llm, policies }
    }

    /// Keyword-only router.
    pub fn keywords_only() -> Self {
        Self::new(None, RetryPolicies::default())
    }

    pub async fn route(&self, task: &Task) -> RouteDecision {
        if let Some(llm) = &self.llm {
            let prompt = router_prompt(&task.description);
            let outcome =
                generate_with_retry(llm.as_ref(), &self.policies, ROUTER_SYSTEM_PROMPT, &prompt)
                    .await;

            match outcome.result {
                Ok(reply) => {
                    if let Some(agent) = parse_llm_reply(&reply) {
                        info!(agent = %agent, "Task routed by LLM");
                        return RouteDecision {
                            agent: Some(agent),
                            source: RouteSource::Llm,
                            detail: reply.trim().to_string(),
                        };
                    }
                    warn!("Router reply named no agent, falling back to keywords");
                }
                Err(e) => {
                    warn!(error = %e, "Router LLM failed, falling back to keywords");
                }
            }
        }

        match route_by_keywords(&task.description) {
            Some((agent, keyword)) => {
                info!(agent = %agent, keyword, "Task routed by keywords");
                RouteDecision {
                    agent: Some(agent),
                    source: RouteSource::Keywords,
                    detail: format!("matched keyword `{}`", keyword),
                }
            }
            None => RouteDecision {
                agent: None,
                source: RouteSource::Unrouted,
                detail: "no agent matched the task".to_string(),
            },
        }
    }
}

fn router_prompt(task: &str) -> String {
    format!(
        "AGENT SPECIALIZATIONS:\n\
         1. PAYROLL: employee salaries, payslips, attendance, deductions, bonuses\n\
         2. INVOICE: customer invoices, billing, payments, overdue reminders\n\
         3. REPORT: financial summaries, statements, charts, profit, equity, cash flow\n\
         4. PROCUREMENT: inventory, purchase orders, budget status, approvals, vendors\n\n\
         Now analyze the following task:\n\
         Task: \"{}\"\n\
         Analysis:",
        task
    )
}

/// Read the `AGENT:` label if present, otherwise scan the whole reply.
pub fn parse_llm_reply(reply: &str) -> Option<AgentKind> {
    let normalised = reply.trim().to_lowercase();

    if let Some(label) = normalised
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("agent:"))
    {
        if let Some(agent) = scan_for_agent(label) {
            return Some(agent);
        }
    }

    scan_for_agent(&normalised)
}

fn scan_for_agent(text: &str) -> Option<AgentKind> {
    REPLY_SCAN_ORDER
        .into_iter()
        .find(|agent| text.contains(agent.as_str()))
}

/// First matching keyword table wins.
pub fn route_by_keywords(task: &str) -> Option<(AgentKind, &'static str)> {
    let lowered = task.to_lowercase();
    KEYWORD_TABLE.iter().find_map(|(agent, keywords)| {
        keywords
            .iter()
            .find(|kw| lowered.contains(**kw))
            .map(|kw| (*agent, *kw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlm;

    #[test]
    fn test_keyword_routing() {
        let cases = vec![
            ("Send late payment reminders to clients", AgentKind::Invoice),
            ("Generate May salary slips", AgentKind::Payroll),
            ("Check inventory status and notify vendor", AgentKind::Procurement),
            ("Analyze cash flow and generate summary", AgentKind::Report),
        ];

        for (task, expected) in cases {
            assert_eq!(route_by_keywords(task).map(|(a, _)| a), Some(expected), "{}", task);
        }
    }

    #[test]
    fn test_keyword_order_prefers_invoice() {
        // "customer" (invoice) and "report" (report) both match
        let (agent, keyword) = route_by_keywords("Report on customer billing").unwrap();
        assert_eq!(agent, AgentKind::Invoice);
        assert_eq!(keyword, "customer");
    }

    #[test]
    fn test_reply_label_beats_analysis_text() {
        let reply = "Analysis: mentions a payroll report but concerns invoices\nAGENT: INVOICE";
        assert_eq!(parse_llm_reply(reply), Some(AgentKind::Invoice));
    }

    #[test]
    fn test_reply_without_label_is_scanned_in_order() {
        assert_eq!(
            parse_llm_reply("This is a procurement report"),
            Some(AgentKind::Procurement)
        );
        assert_eq!(parse_llm_reply("no idea"), None);
    }

    #[tokio::test]
    async fn test_llm_route_used_when_available() {
        let llm = Arc::new(ScriptedLlm::new("AGENT: PROCUREMENT"));
        let router = TaskRouter::new(Some(llm), RetryPolicies::immediate());

        let decision = router.route(&Task::new("please handle the monthly run")).await;
        assert_eq!(decision.agent, Some(AgentKind::Procurement));
        assert_eq!(decision.source, RouteSource::Llm);
    }

    #[tokio::test]
    async fn test_llm_failure_falls_back_to_keywords() {
        let llm = Arc::new(ScriptedLlm::always_failing());
        let router = TaskRouter::new(Some(llm), RetryPolicies::immediate());

        let decision = router.route(&Task::new("Process payroll for June")).await;
        assert_eq!(decision.agent, Some(AgentKind::Payroll));
        assert_eq!(decision.source, RouteSource::Keywords);
    }

    #[tokio::test]
    async fn test_unrecognised_task_is_unrouted() {
        let router = TaskRouter::keywords_only();
        let decision = router.route(&Task::new("what's the weather")).await;

        assert_eq!(decision.agent, None);
        assert_eq!(decision.source, RouteSource::Unrouted);
    }
}
