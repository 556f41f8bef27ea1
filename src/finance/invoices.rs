//! Invoice rules

use super::lenient;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(deserialize_with = "lenient::text")]
    pub invoice_id: String,
    #[serde(deserialize_with = "lenient::text")]
    pub customer_name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub customer_email: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub date: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub due_date: String,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub amount: f64,
    #[serde(default, deserialize_with = "lenient::text")]
    pub status: String,
}

impl Invoice {
    pub fn is_paid(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("paid")
    }

    pub fn is_unpaid(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case("unpaid")
    }

    /// Unpaid and due strictly before `today`.
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        if !self.is_unpaid() {
            return false;
        }
        match NaiveDate::parse_from_str(self.due_date.trim(), "%Y-%m-%d") {
            Ok(due) => due < today,
            // Unparseable dates compare as ISO strings.
            Err(_) => self.due_date.trim() < today.format("%Y-%m-%d").to_string().as_str(),
        }
    }

    /// Customer name with spaces replaced, used for document file names.
    pub fn file_stem(&self) -> String {
        self.customer_name.replace(' ', "_")
    }

    pub fn document_path(&self) -> String {
        format!("invoices/invoice_{}.md", self.file_stem())
    }

    pub fn reminder_path(&self) -> String {
        format!("invoices/{}_reminder.md", self.file_stem())
    }

    pub fn label(&self) -> String {
        format!("{} (ID: {})", self.customer_name, self.invoice_id)
    }
}

pub fn pay_now_link(base: &str, invoice_id: &str) -> String {
    format!("{}?invoice_id={}", base.trim_end_matches('?'), invoice_id)
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StatusReport {
    pub paid: Vec<String>,
    pub unpaid: Vec<String>,
}

impl StatusReport {
    pub fn message(&self) -> String {
        let paid = if self.paid.is_empty() {
            "No invoices are marked as paid.".to_string()
        } else {
            format!("Paid invoices: {}", self.paid.join(", "))
        };
        let unpaid = if self.unpaid.is_empty() {
            "All invoices are paid.".to_string()
        } else {
            format!("Unpaid invoices: {}", self.unpaid.join(", "))
        };
        format!("{}\n{}", paid, unpaid)
    }
}

/// Statuses other than paid/unpaid are left out of both lists.
pub fn partition_by_status(invoices: &[Invoice]) -> StatusReport {
    let mut report = StatusReport::default();
    for invoice in invoices {
        if invoice.is_paid() {
            report.paid.push(invoice.label());
        } else if invoice.is_unpaid() {
            report.unpaid.push(invoice.label());
        }
    }
    report
}
