//! Payroll rules

use super::lenient;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MAX_OVERTIME: i64 = 20;

fn unassigned() -> String {
    "Unassigned".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Employee {
    #[serde(deserialize_with = "lenient::text")]
    pub employee_id: String,
    #[serde(deserialize_with = "lenient::text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub email: String,
    #[serde(deserialize_with = "lenient::count")]
    pub base_salary: i64,
    #[serde(default = "unassigned", deserialize_with = "department")]
    pub department: String,
}

fn department<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(lenient::optional_text(deserializer)?.unwrap_or_else(unassigned))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendance {
    #[serde(deserialize_with = "lenient::text")]
    pub employee_id: String,
    #[serde(default, deserialize_with = "lenient::count")]
    pub leaves_taken: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub allowed_leaves: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub late_arrivals: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub overtime_hours: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(deserialize_with = "lenient::text")]
    pub rule_name: String,
    #[serde(deserialize_with = "lenient::count")]
    pub value: i64,
}

/// Salary policy resolved from `SalaryPolicy` rows. Unknown rules are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalaryPolicy {
    pub leave_penalty: i64,
    pub late_penalty: i64,
    pub overtime_rate: i64,
    pub max_overtime_allowed: i64,
}

impl SalaryPolicy {
    pub fn from_rules(rules: &[PolicyRule]) -> Self {
        let map: HashMap<&str, i64> = rules
            .iter()
            .map(|r| (r.rule_name.as_str(), r.value))
            .collect();

        Self {
            leave_penalty: map.get("leave_penalty").copied().unwrap_or(0),
            late_penalty: map.get("late_penalty").copied().unwrap_or(0),
            overtime_rate: map.get("overtime_rate").copied().unwrap_or(0),
            max_overtime_allowed: map
                .get("max_overtime_allowed")
                .copied()
                .unwrap_or(DEFAULT_MAX_OVERTIME),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalaryRecord {
    pub employee_id: String,
    pub name: String,
    pub email: String,
    pub department: String,
    pub base_salary: i64,
    pub deductions: i64,
    pub bonus: i64,
    pub net_salary: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PayrollComputation {
    pub records: Vec<SalaryRecord>,
    /// Employees without an attendance row.
    pub skipped: Vec<String>,
}

pub fn compute_salary(employee: &Employee, attendance: &Attendance, policy: &SalaryPolicy) -> SalaryRecord {
    let extra_leaves = (attendance.leaves_taken - attendance.allowed_leaves).max(0);
    let deductions =
        extra_leaves * policy.leave_penalty + attendance.late_arrivals * policy.late_penalty;
    let bonus = attendance.overtime_hours.min(policy.max_overtime_allowed) * policy.overtime_rate;

    SalaryRecord {
        employee_id: employee.employee_id.clone(),
        name: employee.name.clone(),
        email: employee.email.clone(),
        department: employee.department.clone(),
        base_salary: employee.base_salary,
        deductions,
        bonus,
        net_salary: employee.base_salary - deductions + bonus,
    }
}

pub fn compute_salaries(
    employees: &[Employee],
    attendance: &[Attendance],
    policy: &SalaryPolicy,
) -> PayrollComputation {
    let mut out = PayrollComputation::default();

    for employee in employees {
        match attendance
            .iter()
            .find(|a| a.employee_id == employee.employee_id)
        {
            Some(att) => out.records.push(compute_salary(employee, att, policy)),
            None => out.skipped.push(employee.employee_id.clone()),
        }
    }
    out
}

/// True when a Payslips row already exists for this employee and `YYYY-MM`.
pub fn payslip_recorded(existing: &[crate::integrations::Record], employee_id: &str, month: &str) -> bool {
    existing.iter().any(|row| {
        let id_matches = match row.get("employee_id") {
            Some(serde_json::Value::String(s)) => s == employee_id,
            Some(serde_json::Value::Number(n)) => n.to_string() == employee_id,
            _ => false,
        };
        let month_matches = row
            .get("month")
            .and_then(|m| m.as_str())
            .map(|m| m.starts_with(month))
            .unwrap_or(false);
        id_matches && month_matches
    })
}
