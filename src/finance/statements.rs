//! Financial statement metrics and chart data
//!
//! Each statement sheet has one label column (`Metric` or `Category`) and one
//! column per fiscal year, e.g. `2024 (PKR)`.

use super::{format_thousands, lenient};
use crate::error::OrchestrationError;
use crate::integrations::Record;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const INCOME_SHEET: &str = "Income_Statement";
pub const BALANCE_SHEET: &str = "Balance_Sheet";
pub const CASH_FLOW_SHEET: &str = "Cash_Flow";

/// A statement sheet indexed by its label column.
#[derive(Debug, Clone)]
pub struct StatementTable {
    worksheet: String,
    rows: HashMap<String, Record>,
}

impl StatementTable {
    pub fn new(worksheet: &str, index_column: &str, records: &[Record]) -> Result<Self> {
        let mut rows = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            let label = match record.get(index_column) {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Number(n)) => n.to_string(),
                _ => {
                    return Err(OrchestrationError::InvalidRecord {
                        worksheet: worksheet.to_string(),
                        row: i + 2,
                        message: format!("missing `{}` label", index_column),
                    })
                }
            };
            rows.insert(label, record.clone());
        }

        Ok(Self {
            worksheet: worksheet.to_string(),
            rows,
        })
    }

    pub fn income(records: &[Record]) -> Result<Self> {
        Self::new(INCOME_SHEET, "Metric", records)
    }

    pub fn balance(records: &[Record]) -> Result<Self> {
        Self::new(BALANCE_SHEET, "Metric", records)
    }

    pub fn cash_flow(records: &[Record]) -> Result<Self> {
        Self::new(CASH_FLOW_SHEET, "Category", records)
    }

    /// Value of `metric` for `year`; an empty cell counts as zero.
    pub fn value(&self, metric: &str, year: &str) -> Result<f64> {
        let row = self.rows.get(metric).ok_or_else(|| self.invalid(format!("missing metric row `{}`", metric)))?;
        let cell = row
            .get(year)
            .ok_or_else(|| self.invalid(format!("missing year column `{}`", year)))?;

        match cell {
            Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => lenient::parse_amount(s)
                .map_err(|e| self.invalid(format!("`{}` / `{}`: {}", metric, year, e))),
            Value::Null => Ok(0.0),
            other => Err(self.invalid(format!("`{}` / `{}` is not a number: {}", metric, year, other))),
        }
    }

    fn sum(&self, metrics: &[&str], year: &str) -> Result<f64> {
        metrics.iter().map(|m| self.value(m, year)).sum()
    }

    fn invalid(&self, message: String) -> OrchestrationError {
        OrchestrationError::InvalidRecord {
            worksheet: self.worksheet.clone(),
            row: 0,
            message,
        }
    }
}

const ASSET_ROWS: &[&str] = &["Cash", "Inventory", "Equipment"];
const LIABILITY_ROWS: &[&str] = &["Loans", "Accounts Payable"];
const EXPENSE_ROWS: &[&str] = &["COGS", "Operating Expenses", "Other Expenses"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct YearMetrics {
    pub year: String,
    pub net_profit: i64,
    pub total_assets: i64,
    pub total_liabilities: i64,
    pub equity: i64,
    pub starting_cash: i64,
    pub net_cash_flow: i64,
    pub ending_cash: i64,
}

impl YearMetrics {
    /// One sentence per year, used as LLM input.
    pub fn describe(&self) -> String {
        format!(
            "In {}, the net profit was PKR {}, total assets were PKR {}, liabilities PKR {}, equity PKR {}, net cash flow PKR {} and ending cash PKR {}.",
            self.year,
            format_thousands(self.net_profit),
            format_thousands(self.total_assets),
            format_thousands(self.total_liabilities),
            format_thousands(self.equity),
            format_thousands(self.net_cash_flow),
            format_thousands(self.ending_cash),
        )
    }
}

pub fn compute_metrics(
    income: &StatementTable,
    balance: &StatementTable,
    cash: &StatementTable,
    years: &[String],
) -> Result<Vec<YearMetrics>> {
    years
        .iter()
        .map(|year| {
            let net_profit = income.value("Revenue", year)? - income.sum(EXPENSE_ROWS, year)?;
            let total_assets = balance.sum(ASSET_ROWS, year)?;
            let total_liabilities = balance.sum(LIABILITY_ROWS, year)?;

            let starting = cash.value("Starting Balance", year)?;
            let net_cash_flow = cash.value("Net Operating Cash Flow", year)?
                + cash.value("Net Investing Cash Flow", year)?
                + cash.value("Net Financing Cash Flow", year)?;

            Ok(YearMetrics {
                year: year.clone(),
                net_profit: net_profit.round() as i64,
                total_assets: total_assets.round() as i64,
                total_liabilities: total_liabilities.round() as i64,
                equity: (total_assets - total_liabilities).round() as i64,
                starting_cash: starting.round() as i64,
                net_cash_flow: net_cash_flow.round() as i64,
                ending_cash: (starting + net_cash_flow).round() as i64,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Income,
    Balance,
    Cashflow,
}

impl ChartKind {
    pub const ALL: [ChartKind; 3] = [ChartKind::Income, ChartKind::Balance, ChartKind::Cashflow];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "income" => Some(ChartKind::Income),
            "balance" => Some(ChartKind::Balance),
            "cashflow" | "cash_flow" | "cash flow" => Some(ChartKind::Cashflow),
            _ => None,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            ChartKind::Income => "Income Statement",
            ChartKind::Balance => "Balance Sheet",
            ChartKind::Cashflow => "Cash Flow",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartValue {
    pub label: String,
    pub value: f64,
}

/// Data behind one chart. Rendering the chart itself is out of scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartData {
    pub kind: ChartKind,
    pub period: String,
    pub values: Vec<ChartValue>,
}

impl ChartData {
    pub fn values_text(&self) -> String {
        self.values
            .iter()
            .map(|v| format!("{}: {}", v.label, v.value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn percentages(parts: Vec<(&str, f64)>) -> Vec<ChartValue> {
    let total: f64 = parts.iter().map(|(_, v)| v).sum();
    parts
        .into_iter()
        .map(|(label, v)| ChartValue {
            label: label.to_string(),
            value: if total == 0.0 { 0.0 } else { round1(v / total * 100.0) },
        })
        .collect()
}

/// Expense breakdown per year, as percentages of total expenses.
pub fn income_breakdown(income: &StatementTable, years: &[String]) -> Result<Vec<ChartData>> {
    years
        .iter()
        .map(|year| {
            let parts = EXPENSE_ROWS
                .iter()
                .map(|m| income.value(m, year).map(|v| (*m, v)))
                .collect::<Result<Vec<_>>>()?;
            Ok(ChartData {
                kind: ChartKind::Income,
                period: year.clone(),
                values: percentages(parts),
            })
        })
        .collect()
}

/// Assets vs liabilities per year, as percentages of their sum.
pub fn assets_vs_liabilities(balance: &StatementTable, years: &[String]) -> Result<Vec<ChartData>> {
    years
        .iter()
        .map(|year| {
            let assets = balance.sum(ASSET_ROWS, year)?;
            let liabilities = balance.sum(LIABILITY_ROWS, year)?;
            Ok(ChartData {
                kind: ChartKind::Balance,
                period: year.clone(),
                values: percentages(vec![("Assets", assets), ("Liabilities", liabilities)]),
            })
        })
        .collect()
}

/// Operating, investing and financing flows across all years in one chart.
pub fn cash_flow_comparison(cash: &StatementTable, years: &[String]) -> Result<ChartData> {
    let mut values = Vec::with_capacity(years.len() * 3);
    for year in years {
        let short = year.split_whitespace().next().unwrap_or(year);
        for (label, row) in [
            ("Operating", "Net Operating Cash Flow"),
            ("Investing", "Net Investing Cash Flow"),
            ("Financing", "Net Financing Cash Flow"),
        ] {
            values.push(ChartValue {
                label: format!("{} {}", short, label),
                value: cash.value(row, year)?,
            });
        }
    }

    Ok(ChartData {
        kind: ChartKind::Cashflow,
        period: year_span(years),
        values,
    })
}

/// "2023 (PKR)".."2025 (PKR)" -> "2023-2025".
pub fn year_span(years: &[String]) -> String {
    let short = |y: &String| y.split_whitespace().next().unwrap_or(y).to_string();
    match (years.first(), years.last()) {
        (Some(first), Some(last)) if first != last => format!("{}-{}", short(first), short(last)),
        (Some(only), _) => short(only),
        _ => String::new(),
    }
}

pub fn charts_for(
    kind: ChartKind,
    income: &StatementTable,
    balance: &StatementTable,
    cash: &StatementTable,
    years: &[String],
) -> Result<Vec<ChartData>> {
    match kind {
        ChartKind::Income => income_breakdown(income, years),
        ChartKind::Balance => assets_vs_liabilities(balance, years),
        ChartKind::Cashflow => Ok(vec![cash_flow_comparison(cash, years)?]),
    }
}
