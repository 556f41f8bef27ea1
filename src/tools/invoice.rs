//! Invoice tools: create, send, remind overdue, report paid status

use super::{typed_output, DeliveryReport, Tool, ToolContext, ToolRegistry};
use crate::finance::invoices::{partition_by_status, pay_now_link, Invoice};
use crate::integrations::{Block, Document, OutgoingEmail, Section};
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const CREATE: &str = "CreateInvoices";
pub const SEND: &str = "SendInvoices";
pub const REMIND: &str = "RemindOverdueInvoices";
pub const MARK_PAID: &str = "MarkPaidInvoices";

const INVOICE_SHEET: &str = "Invoices";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(CreateInvoices));
    registry.register(Arc::new(SendInvoices));
    registry.register(Arc::new(RemindOverdueInvoices));
    registry.register(Arc::new(MarkPaidInvoices));
}

fn invoice_document(invoice: &Invoice) -> Document {
    let or_na = |s: &str| {
        if s.is_empty() {
            "N/A".to_string()
        } else {
            s.to_string()
        }
    };
    let amount = format!("${:.2}", invoice.amount);

    Document::new("INVOICE")
        .section(Section::new("Customer Details").block(Block::Fields(vec![
            ("Name".to_string(), or_na(&invoice.customer_name)),
            ("Email".to_string(), or_na(&invoice.customer_email)),
            ("Invoice Date".to_string(), or_na(&invoice.date)),
            ("Due Date".to_string(), or_na(&invoice.due_date)),
        ])))
        .section(Section::new("Charges").block(Block::Table {
            headers: vec!["Description".to_string(), "Amount".to_string()],
            rows: vec![
                vec!["Services Rendered".to_string(), amount.clone()],
                vec!["Total".to_string(), amount],
            ],
        }))
        .footer("Thank you for your business!")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceBatch {
    pub invoices: Vec<Invoice>,
    /// Relative document paths, one per invoice.
    pub documents: Vec<String>,
}

pub struct CreateInvoices;

#[async_trait::async_trait]
impl Tool for CreateInvoices {
    fn name(&self) -> &'static str {
        CREATE
    }

    fn description(&self) -> &'static str {
        "Read the Invoices sheet and write one invoice document per customer."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let invoices: Vec<Invoice> = ctx.rows(INVOICE_SHEET).await?;
        let mut documents = Vec::with_capacity(invoices.len());

        for invoice in &invoices {
            let relative = invoice.document_path();
            ctx.render(&invoice_document(invoice), &relative).await?;
            documents.push(relative);
        }

        let message = if invoices.is_empty() {
            "No invoice data found.".to_string()
        } else {
            format!("Created {} invoice documents", invoices.len())
        };
        typed_output(message, &InvoiceBatch { invoices, documents })
    }
}

pub struct SendInvoices;

#[async_trait::async_trait]
impl Tool for SendInvoices {
    fn name(&self) -> &'static str {
        SEND
    }

    fn description(&self) -> &'static str {
        "Email each customer their invoice document."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let batch: InvoiceBatch = ctx.require(CREATE).await?;
        let mut report = DeliveryReport::default();

        for invoice in &batch.invoices {
            let path = ctx.resolve(&invoice.document_path());
            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                report.skip(invoice.customer_name.clone());
                continue;
            }

            let email = OutgoingEmail::plain(
                invoice.customer_email.clone(),
                "Your Invoice from Our Company",
                "Hello, please find your invoice attached.",
            )
            .attach(ctx.attachment(&path).await?);

            report.record(invoice.customer_email.clone(), ctx.send(&email).await)?;
        }

        typed_output(report.message("invoices"), &report)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReminderReport {
    pub overdue: Vec<String>,
    #[serde(flatten)]
    pub delivery: DeliveryReport,
}

fn reminder_html(invoice: &Invoice, link: &str) -> String {
    format!(
        r##"<p>Dear {name},</p>
<p>This is a reminder that your invoice dated <b>{date}</b> is overdue.</p>
<p>Amount Due: <b>${amount:.2}</b></p>
<p>Please click the button below to mark your invoice as paid:</p>
<a href="{link}" style="background-color:#28a745;color:white;padding:10px 15px;text-decoration:none;border-radius:5px;">Pay Now</a>
<p>Thank you!</p>"##,
        name = invoice.customer_name,
        date = invoice.date,
        amount = invoice.amount,
        link = link,
    )
}

pub struct RemindOverdueInvoices;

#[async_trait::async_trait]
impl Tool for RemindOverdueInvoices {
    fn name(&self) -> &'static str {
        REMIND
    }

    fn description(&self) -> &'static str {
        "Send a payment reminder with a pay-now link for every unpaid invoice past its due date."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let batch: InvoiceBatch = ctx.require(CREATE).await?;
        let today = ctx.today();
        let mut report = ReminderReport::default();

        for invoice in batch.invoices.iter().filter(|i| i.is_overdue(today)) {
            report.overdue.push(invoice.label());

            let path = ctx
                .render(&invoice_document(invoice), &invoice.reminder_path())
                .await?;
            let link = pay_now_link(&ctx.settings().payment_link_base, &invoice.invoice_id);

            let email = OutgoingEmail::plain(
                invoice.customer_email.clone(),
                "Payment Reminder - Invoice Overdue",
                reminder_html(invoice, &link),
            )
            .html()
            .attach(ctx.attachment(&path).await?);

            report
                .delivery
                .record(invoice.customer_email.clone(), ctx.send(&email).await)?;
        }

        let message = if report.overdue.is_empty() {
            "No overdue invoices.".to_string()
        } else {
            report.delivery.message("reminders")
        };
        typed_output(message, &report)
    }
}

pub struct MarkPaidInvoices;

#[async_trait::async_trait]
impl Tool for MarkPaidInvoices {
    fn name(&self) -> &'static str {
        MARK_PAID
    }

    fn description(&self) -> &'static str {
        "Re-read the Invoices sheet and report which invoices are paid and which are not."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let invoices: Vec<Invoice> = ctx.rows(INVOICE_SHEET).await?;
        let status = partition_by_status(&invoices);

        let message = if invoices.is_empty() {
            "No invoice data found.".to_string()
        } else {
            status.message()
        };
        typed_output(message, &status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finance::invoices::StatusReport;
    use crate::integrations::InMemorySheets;
    use crate::llm::ScriptedLlm;
    use crate::tools::testing::Harness;
    use serde_json::json;

    async fn invoice_sheets() -> InMemorySheets {
        InMemorySheets::new()
            .with_sheet(
                INVOICE_SHEET,
                vec![
                    json!({"invoice_id": 101, "customer_name": "Acme Corp", "customer_email": "billing@acme.test", "date": "2025-05-01", "due_date": "2025-05-31", "amount": "1,200.50", "status": "unpaid"}),
                    json!({"invoice_id": 102, "customer_name": "Globex", "customer_email": "ap@globex.test", "date": "2025-06-01", "due_date": "2025-07-01", "amount": 800, "status": "unpaid"}),
                    json!({"invoice_id": 103, "customer_name": "Initech", "customer_email": "pay@initech.test", "date": "2025-04-01", "due_date": "2025-04-30", "amount": 300, "status": "Paid"}),
                ],
            )
            .await
    }

    #[tokio::test]
    async fn test_create_and_send_invoices() {
        let h = Harness::new(invoice_sheets().await, ScriptedLlm::new(""));

        let created = h.run(&CreateInvoices).await.unwrap();
        assert_eq!(created.message, "Created 3 invoice documents");
        assert!(h.dir.path().join("invoices/invoice_Acme_Corp.md").exists());

        // A missing document is skipped rather than sent without attachment.
        tokio::fs::remove_file(h.dir.path().join("invoices/invoice_Globex.md"))
            .await
            .unwrap();

        let sent = h.run(&SendInvoices).await.unwrap();
        let report: DeliveryReport = serde_json::from_value(sent.data).unwrap();
        assert_eq!(report.sent.len(), 2);
        assert_eq!(report.skipped, vec!["Globex"]);

        let mails = h.outbox.sent_to("billing@acme.test").await;
        assert_eq!(mails[0].subject, "Your Invoice from Our Company");
        assert!(!mails[0].html);
    }

    #[tokio::test]
    async fn test_reminders_only_for_overdue_unpaid() {
        let h = Harness::new(invoice_sheets().await, ScriptedLlm::new(""));
        h.run(&CreateInvoices).await.unwrap();

        let out = h.run(&RemindOverdueInvoices).await.unwrap();
        let report: ReminderReport = serde_json::from_value(out.data.clone()).unwrap();
        assert_eq!(report.overdue, vec!["Acme Corp (ID: 101)"]);
        assert!(out.data.get("failed").is_some());

        let mails = h.outbox.sent().await;
        assert_eq!(mails.len(), 1);
        assert!(mails[0].html);
        assert_eq!(mails[0].subject, "Payment Reminder - Invoice Overdue");
        assert!(mails[0].body.contains("invoice_id=101"));
        assert!(mails[0].body.contains("$1200.50"));
        assert!(h.dir.path().join("invoices/Acme_Corp_reminder.md").exists());
    }

    #[tokio::test]
    async fn test_no_overdue_message() {
        let sheets = InMemorySheets::new()
            .with_sheet(
                INVOICE_SHEET,
                vec![json!({"invoice_id": 1, "customer_name": "A", "customer_email": "a@x.test", "due_date": "2099-01-01", "amount": 1, "status": "unpaid"})],
            )
            .await;
        let h = Harness::new(sheets, ScriptedLlm::new(""));
        h.run(&CreateInvoices).await.unwrap();

        let out = h.run(&RemindOverdueInvoices).await.unwrap();
        assert_eq!(out.message, "No overdue invoices.");
    }

    #[tokio::test]
    async fn test_mark_paid_reads_fresh_status() {
        let h = Harness::new(invoice_sheets().await, ScriptedLlm::new(""));
        h.run(&CreateInvoices).await.unwrap();

        h.sheets
            .set_sheet(
                INVOICE_SHEET,
                vec![
                    json!({"invoice_id": 101, "customer_name": "Acme Corp", "amount": 1, "status": "paid"}),
                    json!({"invoice_id": 102, "customer_name": "Globex", "amount": 1, "status": "unpaid"}),
                ],
            )
            .await;

        let out = h.run(&MarkPaidInvoices).await.unwrap();
        let status: StatusReport = serde_json::from_value(out.data).unwrap();
        assert_eq!(status.paid, vec!["Acme Corp (ID: 101)"]);
        assert_eq!(status.unpaid, vec!["Globex (ID: 102)"]);
    }
}
