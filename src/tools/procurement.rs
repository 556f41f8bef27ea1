//! Procurement tools
//!
//! Budget checks, inventory health and approvals are computed once, stored
//! as checkpoints and read back by the summary, notifier and report steps.

use super::report::{stakeholder_emails, ReportFile, STAKEHOLDER_SHEET};
use super::{typed_output, DeliveryReport, Tool, ToolContext, ToolRegistry};
use crate::error::OrchestrationError;
use crate::finance::format_money;
use crate::finance::procurement::{
    budget_by_category, category_trends, check_budgets, check_inventory, classify_approvals,
    latest_orders, vendor_aggregates, ApprovalResult, BudgetCheck, BudgetOverview, InventoryCheck,
    InventoryOverview, ProcurementData, PurchaseOrder, BUDGET_SHEET, INVENTORY_SHEET, PO_SHEET,
    SPEND_SHEET,
};
use crate::integrations::{clean_markdown, rich_text_blocks, Block, Document, OutgoingEmail, Section};
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const FETCH: &str = "FetchProcurementData";
pub const BUDGET: &str = "BudgetProcessor";
pub const BUDGET_SUMMARY: &str = "BudgetSummary";
pub const INVENTORY: &str = "InventoryProcessor";
pub const INVENTORY_SUMMARY: &str = "InventorySummary";
pub const APPROVAL: &str = "ApprovalProcessor";
pub const APPROVAL_SUMMARY: &str = "ApprovalSummary";
pub const NOTIFIER: &str = "Notifier";
pub const GENERATE: &str = "GenerateProcurementReport";
pub const SEND: &str = "SendProcurementReport";

const REPORT_PO_LIMIT: usize = 50;
const ANALYSIS_FALLBACK: &str = "Analysis not available.";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(FetchProcurementData));
    registry.register(Arc::new(BudgetProcessor));
    registry.register(Arc::new(BudgetSummary));
    registry.register(Arc::new(InventoryProcessor));
    registry.register(Arc::new(InventorySummary));
    registry.register(Arc::new(ApprovalProcessor));
    registry.register(Arc::new(ApprovalSummary));
    registry.register(Arc::new(Notifier));
    registry.register(Arc::new(GenerateProcurementReport));
    registry.register(Arc::new(SendProcurementReport));
}

pub struct FetchProcurementData;

#[async_trait::async_trait]
impl Tool for FetchProcurementData {
    fn name(&self) -> &'static str {
        FETCH
    }

    fn description(&self) -> &'static str {
        "Fetch purchase orders, budgets, spend and inventory. Must be done first."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data = ProcurementData {
            purchase_orders: ctx.rows(PO_SHEET).await?,
            budgets: ctx.rows(BUDGET_SHEET).await?,
            spend: ctx.rows(SPEND_SHEET).await?,
            inventory: ctx.rows(INVENTORY_SHEET).await?,
        };

        typed_output(
            format!(
                "Fetched {} POs, {} budgets and {} inventory items",
                data.purchase_orders.len(),
                data.budgets.len(),
                data.inventory.len()
            ),
            &data,
        )
    }
}

pub struct BudgetProcessor;

#[async_trait::async_trait]
impl Tool for BudgetProcessor {
    fn name(&self) -> &'static str {
        BUDGET
    }

    fn description(&self) -> &'static str {
        "Check every PO against the remaining budget of its category."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data: ProcurementData = ctx.require(FETCH).await?;
        let checks = check_budgets(
            &data.purchase_orders,
            &data.budgets,
            &data.spend,
            ctx.settings().batch_size,
        );

        typed_output(
            format!("Budget processing ready ({} POs analyzed)", checks.len()),
            &checks,
        )
    }
}

pub struct BudgetSummary;

#[async_trait::async_trait]
impl Tool for BudgetSummary {
    fn name(&self) -> &'static str {
        BUDGET_SUMMARY
    }

    fn description(&self) -> &'static str {
        "Summarise how many POs are within or over budget."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let checks: Vec<BudgetCheck> = ctx.require(BUDGET).await?;
        let overview = BudgetOverview::from_checks(&checks);
        typed_output(overview.message(), &overview)
    }
}

pub struct InventoryProcessor;

#[async_trait::async_trait]
impl Tool for InventoryProcessor {
    fn name(&self) -> &'static str {
        INVENTORY
    }

    fn description(&self) -> &'static str {
        "Compare current stock with the reorder level of every inventory item."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data: ProcurementData = ctx.require(FETCH).await?;
        let checks = check_inventory(&data.inventory, ctx.settings().batch_size);

        typed_output(
            format!("Inventory processing ready ({} items)", checks.len()),
            &checks,
        )
    }
}

pub struct InventorySummary;

#[async_trait::async_trait]
impl Tool for InventorySummary {
    fn name(&self) -> &'static str {
        INVENTORY_SUMMARY
    }

    fn description(&self) -> &'static str {
        "Summarise how many items have sufficient or low stock."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let checks: Vec<InventoryCheck> = ctx.require(INVENTORY).await?;
        let overview = InventoryOverview::from_checks(&checks);
        typed_output(overview.message(), &overview)
    }
}

pub struct ApprovalProcessor;

#[async_trait::async_trait]
impl Tool for ApprovalProcessor {
    fn name(&self) -> &'static str {
        APPROVAL
    }

    fn description(&self) -> &'static str {
        "Auto-approve POs within budget and queue the rest for manual approval."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data: ProcurementData = ctx.require(FETCH).await?;
        let checks: Vec<BudgetCheck> = ctx.require(BUDGET).await?;
        let approvals = classify_approvals(&data.purchase_orders, &checks);

        typed_output(
            format!(
                "Approval processing complete ({} auto-approved, {} need review)",
                approvals.auto_approved.len(),
                approvals.needs_approval.len()
            ),
            &approvals,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalOverview {
    pub auto_approved: usize,
    pub needs_approval: usize,
    pub pending_value: f64,
    pub summary: String,
}

pub struct ApprovalSummary;

#[async_trait::async_trait]
impl Tool for ApprovalSummary {
    fn name(&self) -> &'static str {
        APPROVAL_SUMMARY
    }

    fn description(&self) -> &'static str {
        "Summarise approvals and list the most expensive POs awaiting review."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let approvals: ApprovalResult = ctx.require(APPROVAL).await?;
        let overview = ApprovalOverview {
            auto_approved: approvals.auto_approved.len(),
            needs_approval: approvals.needs_approval.len(),
            pending_value: approvals.pending_value(),
            summary: approvals.summary(),
        };
        typed_output(overview.summary.clone(), &overview)
    }
}

fn suggestion_prompt(po: &PurchaseOrder) -> String {
    format!(
        "Suggest solutions for approving this PO:\n\nItem: {}\nVendor: {}\nQuantity: {}\nPrice: PKR {}\nTotal: PKR {}\nCategory: {}\n\nProvide 3 specific, numbered recommendations:",
        po.item,
        po.vendor,
        po.qty,
        po.price,
        format_money(po.cost()),
        po.category
    )
}

pub struct Notifier;

#[async_trait::async_trait]
impl Tool for Notifier {
    fn name(&self) -> &'static str {
        NOTIFIER
    }

    fn description(&self) -> &'static str {
        "Email the approver about every PO that needs review, with suggested actions."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let approvals: ApprovalResult = ctx.require(APPROVAL).await?;
        let approver = ctx.settings().approver_email.clone();
        let mut report = DeliveryReport::default();

        for po in &approvals.needs_approval {
            let suggestion = match ctx.generate("", &suggestion_prompt(po)).await {
                Ok(text) => clean_markdown(&text),
                Err(e) => format!("Could not generate suggestion: {}", e),
            };
            let body = format!(
                "PO DETAILS:\nVendor: {}\nAmount: PKR {}\nCategory: {}\n\nSUGGESTED ACTIONS:\n{}",
                po.vendor,
                format_money(po.cost()),
                po.category,
                suggestion
            );
            let email = OutgoingEmail::plain(
                approver.clone(),
                format!("APPROVAL REQUIRED: {}", po.item),
                body,
            );

            report.record(po.item.clone(), ctx.send(&email).await)?;
        }

        typed_output(report.message("approval requests"), &report)
    }
}

fn executive_summary_prompt(
    budget: &BudgetOverview,
    inventory: &InventoryOverview,
    approvals: &ApprovalResult,
) -> String {
    format!(
        "Create a detailed executive summary for a procurement report covering these aspects:\n\n\
**Budget Status**:\n- Total POs processed: {}\n- Within budget: {}\n- Exceeded budget: {}\n- Largest budget overage: {}\n\n\
**Inventory Status**:\n- Total items tracked: {}\n- Items with sufficient stock: {}\n- Items below reorder level: {}\n\n\
**Approval Status**:\n- Auto-approved POs: {}\n- POs needing manual approval: {}\n- Total value requiring approval: {}\n\n\
Provide 3-4 paragraphs highlighting key findings, risks, and opportunities in professional business language.",
        budget.total,
        budget.within,
        budget.exceeded,
        format_money(budget.largest_overage),
        inventory.total,
        inventory.sufficient,
        inventory.low,
        approvals.auto_approved.len(),
        approvals.needs_approval.len(),
        format_money(approvals.pending_value()),
    )
}

fn table(headers: &[&str], rows: Vec<Vec<String>>) -> Block {
    Block::Table {
        headers: headers.iter().map(|h| h.to_string()).collect(),
        rows,
    }
}

fn rows_text(block: &Block) -> String {
    match block {
        Block::Table { headers, rows } => {
            let mut out = headers.join("\t");
            for row in rows {
                out.push('\n');
                out.push_str(&row.join("\t"));
            }
            out
        }
        _ => String::new(),
    }
}

pub struct GenerateProcurementReport;

#[async_trait::async_trait]
impl Tool for GenerateProcurementReport {
    fn name(&self) -> &'static str {
        GENERATE
    }

    fn description(&self) -> &'static str {
        "Write the procurement analytics report covering budget, inventory, approvals, vendors and trends."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data: ProcurementData = ctx.require(FETCH).await?;
        let budget_checks: Vec<BudgetCheck> = ctx.require(BUDGET).await?;
        let inventory_checks: Vec<InventoryCheck> = ctx.require(INVENTORY).await?;
        let approvals: ApprovalResult = ctx.require(APPROVAL).await?;

        let budget = BudgetOverview::from_checks(&budget_checks);
        let inventory = InventoryOverview::from_checks(&inventory_checks);
        let now = ctx.now();

        let budget_table = table(
            &["Category", "PO Cost", "Remaining Budget"],
            budget_by_category(&budget_checks)
                .into_iter()
                .map(|c| vec![c.category, format_money(c.cost), format_money(c.remaining_budget)])
                .collect(),
        );
        let vendor_table = table(
            &["Vendor", "Orders", "Mean Price", "Total Price", "Total Qty"],
            vendor_aggregates(&data.purchase_orders)
                .into_iter()
                .map(|v| {
                    vec![
                        v.vendor,
                        v.orders.to_string(),
                        format_money(v.mean_price),
                        format_money(v.total_price),
                        v.total_qty.to_string(),
                    ]
                })
                .collect(),
        );
        let trend_table = table(
            &["Category", "Date", "Total Price", "Total Qty"],
            category_trends(&data.purchase_orders)
                .into_iter()
                .map(|t| vec![t.category, t.date, format_money(t.total_price), t.total_qty.to_string()])
                .collect(),
        );
        let po_table = table(
            &["Date", "Item", "Vendor", "Qty", "Price", "Total"],
            latest_orders(&data.purchase_orders, REPORT_PO_LIMIT)
                .into_iter()
                .map(|po| {
                    vec![
                        po.date.clone(),
                        po.item.chars().take(30).collect(),
                        po.vendor.chars().take(20).collect(),
                        po.qty.to_string(),
                        format_money(po.price),
                        format_money(po.cost()),
                    ]
                })
                .collect(),
        );
        let pending_table = table(
            &["Item", "Vendor", "Category", "Qty", "Price", "Total"],
            approvals
                .needs_approval
                .iter()
                .map(|po| {
                    vec![
                        po.item.clone(),
                        po.vendor.clone(),
                        po.category.clone(),
                        po.qty.to_string(),
                        format_money(po.price),
                        format_money(po.cost()),
                    ]
                })
                .collect(),
        );

        let executive = ctx
            .generate_or("", &executive_summary_prompt(&budget, &inventory, &approvals), ANALYSIS_FALLBACK)
            .await;
        let budget_text = ctx
            .generate_or(
                "",
                &format!(
                    "You are generating a clean, professional budget analysis for a report. Use bolded, numbered headings like **1. Top 3 Categories by Spending** and simple `-` bullets.\n\nNow analyze this budget data:\n\n{}\n\nCover the following:\n1. Top 3 Categories by Spending\n2. Categories with Highest Budget Utilization\n3. Warning Signs for Potential Overspending\n4. Recommendations for Budget Adjustments",
                    rows_text(&budget_table)
                ),
                ANALYSIS_FALLBACK,
            )
            .await;
        let inventory_text = ctx
            .generate_or(
                "",
                &format!(
                    "Analyze this inventory data:\n- Total items: {}\n- Low stock items: {}\n- Critical items (stock < 50% of reorder level): {}\n\nProvide:\n1. List of top 5 most critical inventory items\n2. Supplier performance analysis\n3. Recommendations for inventory optimization",
                    inventory.total, inventory.low, inventory.critical
                ),
                ANALYSIS_FALLBACK,
            )
            .await;
        let approval_text = ctx
            .generate_or(
                "",
                &format!(
                    "Analyze these POs requiring approval:\n{}\n\nProvide:\n1. Priority ranking of approvals needed\n2. Alternative solutions for high-cost items\n3. Negotiation strategies with vendors\n4. Process improvement suggestions",
                    rows_text(&pending_table)
                ),
                ANALYSIS_FALLBACK,
            )
            .await;
        let vendor_text = ctx
            .generate_or(
                "",
                &format!(
                    "Analyze vendor performance from this data. Use **bold** to highlight top vendors, spend amounts, and metrics:\n{}\n\nProvide:\n1. **Top performing vendors**\n2. **Vendors needing performance review**\n3. **Recommendations for vendor consolidation**\n4. **Suggested negotiation points**",
                    rows_text(&vendor_table)
                ),
                ANALYSIS_FALLBACK,
            )
            .await;
        let trend_text = ctx
            .generate_or(
                "",
                &format!(
                    "Analyze spending trends by category:\n{}\n\nProvide:\n1. Seasonal spending patterns\n2. Unexpected spikes/drops\n3. Category growth trends\n4. Forecasting for next quarter",
                    rows_text(&trend_table)
                ),
                ANALYSIS_FALLBACK,
            )
            .await;

        let document = Document::new("Procurement Analytics Report")
            .subtitle(format!("Generated: {}", now.format("%B %d, %Y %H:%M")))
            .section(Section::new("1. Executive Summary").block(rich_text_blocks(&executive)))
            .section(
                Section::new("2. Budget Analysis")
                    .block(budget_table)
                    .block(rich_text_blocks(&budget_text)),
            )
            .section(
                Section::new("3. Inventory Status")
                    .block(Block::Paragraph(inventory.message()))
                    .block(rich_text_blocks(&inventory_text)),
            )
            .section(
                Section::new("4. Approval Recommendations")
                    .block(pending_table)
                    .block(rich_text_blocks(&approval_text)),
            )
            .section(
                Section::new("5. Vendor Performance")
                    .block(vendor_table)
                    .block(rich_text_blocks(&vendor_text)),
            )
            .section(
                Section::new("6. Category Spending Trends")
                    .block(trend_table)
                    .block(rich_text_blocks(&trend_text)),
            )
            .section(Section::new("7. Detailed PO Records").block(po_table))
            .footer(format!(
                "Generated by Procurement Analytics Bot on {}",
                now.format("%Y-%m-%d")
            ));

        let relative = format!("reports/procurement_report_{}.md", now.format("%Y%m%d_%H%M%S"));
        let path = ctx.render(&document, &relative).await?;
        info!(run_id = %ctx.run_id, path = %path.display(), "Procurement report written");

        typed_output(
            format!("Procurement report generated at {}", path.display()),
            &ReportFile { path },
        )
    }
}

pub struct SendProcurementReport;

#[async_trait::async_trait]
impl Tool for SendProcurementReport {
    fn name(&self) -> &'static str {
        SEND
    }

    fn description(&self) -> &'static str {
        "Email the procurement report to every stakeholder. This is the final step."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let report: ReportFile = ctx.require(GENERATE).await?;
        let data: ProcurementData = ctx.require(FETCH).await?;
        let approvals: ApprovalResult = ctx.require(APPROVAL).await?;
        let inventory: Vec<InventoryCheck> = ctx.require(INVENTORY).await?;

        let stakeholders = stakeholder_emails(&ctx.records(STAKEHOLDER_SHEET).await?);
        if stakeholders.is_empty() {
            return Err(OrchestrationError::InvalidToolInput(
                "No valid emails found in Stakeholders sheet".to_string(),
            ));
        }

        let now = ctx.now();
        let body = format!(
            "Dear Stakeholders,\n\nAttached is the latest procurement report generated on {}.\n\nKey Highlights:\n- Generated report with {} purchase orders analyzed\n- {} items require approval\n- {} inventory items below threshold\n\nPlease review and let us know if you need any clarification.\n\nBest regards,\nProcurement Automation System\n",
            now.format("%d %B %Y"),
            data.purchase_orders.len(),
            approvals.needs_approval.len(),
            InventoryOverview::from_checks(&inventory).low,
        );

        let sender = ctx.settings().sender_email.clone();
        let email = OutgoingEmail::plain(
            sender.clone(),
            format!("Procurement Report - {}", now.format("%d %b %Y")),
            body,
        )
        .with_bcc(stakeholders.clone())
        .attach(ctx.attachment(&report.path).await?);

        let mut delivery = DeliveryReport::default();
        delivery.record(sender, ctx.send(&email).await)?;

        let message = if delivery.failed.is_empty() {
            format!("Report sent to {} stakeholders", stakeholders.len())
        } else {
            delivery.message("reports")
        };
        typed_output(message, &delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::InMemorySheets;
    use crate::llm::ScriptedLlm;
    use crate::tools::testing::Harness;
    use serde_json::json;

    async fn procurement_sheets() -> InMemorySheets {
        InMemorySheets::new()
            .with_sheet(
                PO_SHEET,
                vec![
                    json!({"Item": "Laptop", "Category": "IT", "Qty": 2, "Price": "1,500", "Vendor": "Dell", "Date": "2025-06-01"}),
                    json!({"Item": "Server", "Category": "IT", "Qty": 1, "Price": 9000, "Vendor": "HP", "Date": "2025-06-03"}),
                    json!({"Item": "Paper", "Category": "Office", "Qty": 10, "Price": 5, "Vendor": "Staples", "Date": "2025-05-20"}),
                ],
            )
            .await
            .with_sheet(
                BUDGET_SHEET,
                vec![
                    json!({"Category": "IT", "Budget Amount": 10000}),
                    json!({"Category": "Office", "Budget Amount": 500}),
                ],
            )
            .await
            .with_sheet(
                SPEND_SHEET,
                vec![
                    json!({"Category": "IT", "Amount Spent": 4000}),
                    json!({"Category": "Office", "Amount Spent": 100}),
                ],
            )
            .await
            .with_sheet(
                INVENTORY_SHEET,
                vec![
                    json!({"Item": "Toner", "Category": "Office", "Current Stock": 2, "Reorder Level": 10, "Supplier": "Staples"}),
                    json!({"Item": "Cables", "Category": "IT", "Current Stock": 50, "Reorder Level": 10, "Supplier": "Dell"}),
                ],
            )
            .await
            .with_sheet(
                STAKEHOLDER_SHEET,
                vec![json!({"stakeholders_email": "ops@example.com"})],
            )
            .await
    }

    async fn run_all(h: &Harness) {
        let tools: [&dyn Tool; 10] = [
            &FetchProcurementData,
            &BudgetProcessor,
            &BudgetSummary,
            &InventoryProcessor,
            &InventorySummary,
            &ApprovalProcessor,
            &ApprovalSummary,
            &Notifier,
            &GenerateProcurementReport,
            &SendProcurementReport,
        ];
        for tool in tools {
            h.run(tool).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_budget_inventory_and_approval_checkpoints() {
        let h = Harness::new(procurement_sheets().await, ScriptedLlm::new("**Advice**\n1. Negotiate"));
        h.run(&FetchProcurementData).await.unwrap();

        h.run(&BudgetProcessor).await.unwrap();
        let summary = h.run(&BudgetSummary).await.unwrap();
        // IT remaining 6000: laptop 3000 within, server 9000 exceeded; office within
        assert_eq!(summary.message, "Budget Overview: 2 within, 1 exceeded");

        h.run(&InventoryProcessor).await.unwrap();
        let inventory = h.run(&InventorySummary).await.unwrap();
        assert_eq!(inventory.message, "Inventory Status: 1 sufficient, 1 low");
        assert_eq!(inventory.data["critical"], json!(1));

        h.run(&ApprovalProcessor).await.unwrap();
        let approvals = h.run(&ApprovalSummary).await.unwrap();
        assert_eq!(approvals.data["needs_approval"], json!(1));
        assert!(approvals.message.contains("- Server (PKR 9,000.00)"));
    }

    #[tokio::test]
    async fn test_notifier_and_report_delivery() {
        let llm = ScriptedLlm::new("Procurement looks healthy.")
            .reply_when("Suggest solutions", "**Negotiate** with HP\\n2. Split the order");
        let h = Harness::new(procurement_sheets().await, llm);
        run_all(&h).await;

        let approvals = h.outbox.sent_to("approvals@example.com").await;
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].subject, "APPROVAL REQUIRED: Server");
        assert!(approvals[0].body.contains("Amount: PKR 9,000.00"));
        assert!(approvals[0].body.contains("Negotiate with HP\n2. Split the order"));

        let report_mail = h.outbox.sent_to("finance@example.com").await;
        assert_eq!(report_mail.len(), 1);
        assert_eq!(report_mail[0].subject, "Procurement Report - 15 Jun 2025");
        assert_eq!(report_mail[0].bcc, vec!["ops@example.com"]);
        assert!(report_mail[0].body.contains("1 inventory items below threshold"));

        let report = h.dir.path().join("reports/procurement_report_20250615_093000.md");
        let text = tokio::fs::read_to_string(report).await.unwrap();
        for heading in [
            "## 1. Executive Summary",
            "## 2. Budget Analysis",
            "## 3. Inventory Status",
            "## 4. Approval Recommendations",
            "## 5. Vendor Performance",
            "## 6. Category Spending Trends",
            "## 7. Detailed PO Records",
        ] {
            assert!(text.contains(heading), "missing {heading}");
        }
        // Latest PO first
        let server = text.find("| 2025-06-03 | Server").unwrap();
        let paper = text.find("| 2025-05-20 | Paper").unwrap();
        assert!(server < paper);
    }

    #[tokio::test]
    async fn test_notifier_falls_back_when_llm_fails() {
        let h = Harness::new(procurement_sheets().await, ScriptedLlm::always_failing());
        let tools: [&dyn Tool; 4] = [
            &FetchProcurementData,
            &BudgetProcessor,
            &ApprovalProcessor,
            &Notifier,
        ];
        for tool in tools {
            h.run(tool).await.unwrap();
        }

        let mails = h.outbox.sent().await;
        assert_eq!(mails.len(), 1);
        assert!(mails[0].body.contains("Could not generate suggestion"));
    }

    #[tokio::test]
    async fn test_approval_requires_budget_checkpoint() {
        let h = Harness::new(procurement_sheets().await, ScriptedLlm::new(""));
        h.run(&FetchProcurementData).await.unwrap();

        let err = h.run(&ApprovalProcessor).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::StepPrecondition { .. }));
    }
}
