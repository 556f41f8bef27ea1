//! Payroll tools: fetch, calculate, generate payslips, send payslips

use super::{typed_output, DeliveryReport, Tool, ToolContext, ToolRegistry};
use crate::finance::format_thousands;
use crate::finance::payroll::{
    compute_salaries, payslip_recorded, Attendance, Employee, PayrollComputation, PolicyRule,
    SalaryPolicy, SalaryRecord,
};
use crate::integrations::{Block, Document, OutgoingEmail, Section};
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const FETCH: &str = "FetchPayrollData";
pub const CALCULATE: &str = "CalculateSalaries";
pub const GENERATE: &str = "GeneratePayslips";
pub const SEND: &str = "SendPayslips";

const PAYSLIP_SHEET: &str = "Payslips";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(FetchPayrollData));
    registry.register(Arc::new(CalculateSalaries));
    registry.register(Arc::new(GeneratePayslips));
    registry.register(Arc::new(SendPayslips));
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayrollData {
    pub employees: Vec<Employee>,
    pub attendance: Vec<Attendance>,
    pub policy: SalaryPolicy,
}

pub struct FetchPayrollData;

#[async_trait::async_trait]
impl Tool for FetchPayrollData {
    fn name(&self) -> &'static str {
        FETCH
    }

    fn description(&self) -> &'static str {
        "Fetch employees, attendance and salary policy from the spreadsheet."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let employees: Vec<Employee> = ctx.rows("Employees").await?;
        let attendance: Vec<Attendance> = ctx.rows("Attendance").await?;
        let rules: Vec<PolicyRule> = ctx.rows("SalaryPolicy").await?;

        let data = PayrollData {
            employees,
            attendance,
            policy: SalaryPolicy::from_rules(&rules),
        };
        typed_output(
            format!(
                "Fetched {} employees and {} attendance rows",
                data.employees.len(),
                data.attendance.len()
            ),
            &data,
        )
    }
}

pub struct CalculateSalaries;

#[async_trait::async_trait]
impl Tool for CalculateSalaries {
    fn name(&self) -> &'static str {
        CALCULATE
    }

    fn description(&self) -> &'static str {
        "Calculate deductions, overtime bonus and net salary for every employee."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data: PayrollData = ctx.require(FETCH).await?;
        let computation = compute_salaries(&data.employees, &data.attendance, &data.policy);

        let mut message = format!("Calculated salaries for {} employees", computation.records.len());
        if !computation.skipped.is_empty() {
            message.push_str(&format!(
                " (no attendance for: {})",
                computation.skipped.join(", ")
            ));
        }
        typed_output(message, &computation)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payslip {
    pub employee_id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayslipBatch {
    /// `YYYY-MM`, the key used in the Payslips sheet.
    pub month: String,
    /// e.g. "June 2025"
    pub period: String,
    pub payslips: Vec<Payslip>,
    pub recorded: Vec<String>,
    pub already_recorded: Vec<String>,
}

fn payslip_document(record: &SalaryRecord, period: &str) -> Document {
    Document::new("MONTHLY PAYSLIP")
        .section(Section::new("Employee Information").block(Block::Fields(vec![
            ("Name".to_string(), record.name.clone()),
            ("Employee ID".to_string(), record.employee_id.clone()),
            ("Department".to_string(), record.department.clone()),
            ("Period".to_string(), period.to_string()),
        ])))
        .section(Section::new("Salary Breakdown").block(Block::Table {
            headers: vec!["Item".to_string(), "Amount".to_string()],
            rows: vec![
                vec!["Base Salary".to_string(), format!("${}", format_thousands(record.base_salary))],
                vec!["Deductions".to_string(), format!("${}", format_thousands(record.deductions))],
                vec!["Bonus".to_string(), format!("${}", format_thousands(record.bonus))],
                vec!["Net Salary".to_string(), format!("${}", format_thousands(record.net_salary))],
            ],
        }))
        .footer("This payslip is system generated. For queries, contact HR.")
}

pub struct GeneratePayslips;

#[async_trait::async_trait]
impl Tool for GeneratePayslips {
    fn name(&self) -> &'static str {
        GENERATE
    }

    fn description(&self) -> &'static str {
        "Write a payslip per employee and record it in the Payslips sheet once per month."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let computation: PayrollComputation = ctx.require(CALCULATE).await?;
        let now = ctx.now();
        let month = now.format("%Y-%m").to_string();
        let period = now.format("%B %Y").to_string();

        let existing = ctx.records(PAYSLIP_SHEET).await?;
        let mut batch = PayslipBatch {
            month: month.clone(),
            period: period.clone(),
            payslips: Vec::with_capacity(computation.records.len()),
            recorded: Vec::new(),
            already_recorded: Vec::new(),
        };

        for record in &computation.records {
            let path = ctx
                .render(
                    &payslip_document(record, &period),
                    &format!("payslips/payslip_{}.md", record.employee_id),
                )
                .await?;

            if payslip_recorded(&existing, &record.employee_id, &month) {
                batch.already_recorded.push(record.name.clone());
            } else {
                ctx.append_row(
                    PAYSLIP_SHEET,
                    vec![
                        json!(record.employee_id),
                        json!(record.name),
                        json!(record.net_salary),
                        json!(month),
                    ],
                )
                .await?;
                batch.recorded.push(record.name.clone());
            }

            batch.payslips.push(Payslip {
                employee_id: record.employee_id.clone(),
                name: record.name.clone(),
                email: record.email.clone(),
                department: record.department.clone(),
                path,
            });
        }

        info!(
            run_id = %ctx.run_id,
            payslips = batch.payslips.len(),
            recorded = batch.recorded.len(),
            "Payslips generated"
        );
        typed_output(
            format!(
                "Payslips ready for {} ({} recorded, {} already recorded)",
                period,
                batch.recorded.len(),
                batch.already_recorded.len()
            ),
            &batch,
        )
    }
}

pub struct SendPayslips;

#[async_trait::async_trait]
impl Tool for SendPayslips {
    fn name(&self) -> &'static str {
        SEND
    }

    fn description(&self) -> &'static str {
        "Email every generated payslip to its employee."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let batch: PayslipBatch = ctx.require(GENERATE).await?;
        let mut report = DeliveryReport::default();

        for payslip in &batch.payslips {
            if payslip.email.is_empty() || !tokio::fs::try_exists(&payslip.path).await.unwrap_or(false) {
                report.skip(payslip.name.clone());
                continue;
            }

            let body = format!(
                "Dear {},\nPlease find attached your payslip for {}.\n\nDetails:\n* Employee ID: {}\n* Department: {}\n\nIf you have any questions, please contact HR.\n\nBest regards,\nPayroll Department\n",
                payslip.name, batch.period, payslip.employee_id, payslip.department
            );
            let email = OutgoingEmail::plain(
                payslip.email.clone(),
                format!("Your Payslip - {}", batch.period),
                body,
            )
            .attach(ctx.attachment(&payslip.path).await?);

            report.record(payslip.email.clone(), ctx.send(&email).await)?;
        }

        typed_output(report.message("payslips"), &report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::InMemorySheets;
    use crate::llm::ScriptedLlm;
    use crate::tools::testing::Harness;
    use serde_json::{json, Value};

    async fn payroll_sheets() -> InMemorySheets {
        InMemorySheets::new()
            .with_sheet(
                "Employees",
                vec![
                    json!({"employee_id": "E1", "name": "Ali Khan", "email": "ali@example.com", "base_salary": "50,000", "department": "Finance"}),
                    json!({"employee_id": "E2", "name": "Sara Ahmed", "email": "sara@example.com", "base_salary": 40000, "department": ""}),
                    json!({"employee_id": "E3", "name": "No Attendance", "email": "na@example.com", "base_salary": 1000}),
                ],
            )
            .await
            .with_sheet(
                "Attendance",
                vec![
                    json!({"employee_id": "E1", "leaves_taken": 4, "allowed_leaves": 2, "late_arrivals": 1, "overtime_hours": 30}),
                    json!({"employee_id": "E2", "leaves_taken": 0, "allowed_leaves": 2, "late_arrivals": 0, "overtime_hours": 5}),
                ],
            )
            .await
            .with_sheet(
                "SalaryPolicy",
                vec![
                    json!({"rule_name": "leave_penalty", "value": 1000}),
                    json!({"rule_name": "late_penalty", "value": 200}),
                    json!({"rule_name": "overtime_rate", "value": 100}),
                ],
            )
            .await
            .with_headers(PAYSLIP_SHEET, &["employee_id", "name", "net_salary", "month"])
            .await
    }

    #[tokio::test]
    async fn test_full_payroll_chain() {
        let h = Harness::new(payroll_sheets().await, ScriptedLlm::new(""));

        h.run(&FetchPayrollData).await.unwrap();
        let calc = h.run(&CalculateSalaries).await.unwrap();
        let computation: PayrollComputation = serde_json::from_value(calc.data).unwrap();
        assert_eq!(computation.records.len(), 2);
        assert_eq!(computation.skipped, vec!["E3"]);
        // 50000 - (2 * 1000 + 200) + 20 * 100
        assert_eq!(computation.records[0].net_salary, 49_800);
        assert_eq!(computation.records[1].department, "Unassigned");

        let generated = h.run(&GeneratePayslips).await.unwrap();
        let batch: PayslipBatch = serde_json::from_value(generated.data).unwrap();
        assert_eq!(batch.month, "2025-06");
        assert_eq!(batch.period, "June 2025");
        assert_eq!(batch.recorded.len(), 2);

        let rows = h.sheets.appended_rows(PAYSLIP_SHEET).await;
        assert_eq!(rows[0], vec![json!("E1"), json!("Ali Khan"), json!(49_800), json!("2025-06")]);

        let doc = tokio::fs::read_to_string(h.dir.path().join("payslips/payslip_E1.md"))
            .await
            .unwrap();
        assert!(doc.contains("MONTHLY PAYSLIP"));
        assert!(doc.contains("$49,800"));

        let sent = h.run(&SendPayslips).await.unwrap();
        let report: DeliveryReport = serde_json::from_value(sent.data).unwrap();
        assert_eq!(report.sent.len(), 2);

        let mails = h.outbox.sent_to("ali@example.com").await;
        assert_eq!(mails[0].subject, "Your Payslip - June 2025");
        assert_eq!(mails[0].attachments[0].filename, "payslip_E1.md");
    }

    #[tokio::test]
    async fn test_payslip_row_not_duplicated_for_same_month() {
        let sheets = payroll_sheets().await;
        sheets
            .set_sheet(
                PAYSLIP_SHEET,
                vec![json!({"employee_id": "E1", "name": "Ali Khan", "net_salary": 49800, "month": "2025-06"})],
            )
            .await;
        let h = Harness::new(sheets, ScriptedLlm::new(""));

        h.run(&FetchPayrollData).await.unwrap();
        h.run(&CalculateSalaries).await.unwrap();
        let out = h.run(&GeneratePayslips).await.unwrap();

        assert_eq!(out.data["already_recorded"], json!(["Ali Khan"]));
        let rows = h.sheets.appended_rows(PAYSLIP_SHEET).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], Value::from("E2"));
    }

    #[tokio::test]
    async fn test_mail_failure_is_recorded_not_raised() {
        let h = Harness::new(payroll_sheets().await, ScriptedLlm::new(""));
        h.outbox.fail_for("sara@example.com", false).await;

        h.run(&FetchPayrollData).await.unwrap();
        h.run(&CalculateSalaries).await.unwrap();
        h.run(&GeneratePayslips).await.unwrap();
        let out = h.run(&SendPayslips).await.unwrap();

        let report: DeliveryReport = serde_json::from_value(out.data).unwrap();
        assert_eq!(report.sent, vec!["ali@example.com"]);
        assert_eq!(report.failed[0].recipient, "sara@example.com");
    }

    #[tokio::test]
    async fn test_calculate_without_fetch_fails_precondition() {
        let h = Harness::new(payroll_sheets().await, ScriptedLlm::new(""));
        let err = h.run(&CalculateSalaries).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::OrchestrationError::StepPrecondition { .. }
        ));
    }
}
