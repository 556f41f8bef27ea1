//! Annual financial report tools

use super::{typed_output, DeliveryReport, Tool, ToolContext, ToolRegistry};
use crate::error::OrchestrationError;
use crate::finance::format_thousands;
use crate::finance::statements::{
    charts_for, compute_metrics, ChartData, ChartKind, StatementTable, YearMetrics,
    BALANCE_SHEET, CASH_FLOW_SHEET, INCOME_SHEET,
};
use crate::integrations::{rich_text_blocks, Block, Document, OutgoingEmail, Record, Section};
use crate::models::{ToolInput, ToolOutput};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

pub const FETCH: &str = "FetchFinancialData";
pub const METRICS: &str = "CalculateFinancialMetrics";
pub const CHARTS: &str = "GenerateChartInsight";
pub const SUMMARY: &str = "GenerateFinancialSummary";
pub const GENERATE: &str = "GenerateFinancialReport";
pub const SEND: &str = "SendFinancialReport";

pub(crate) const STAKEHOLDER_SHEET: &str = "Stakeholders";
pub(crate) const STAKEHOLDER_COLUMN: &str = "stakeholders_email";

const SUMMARY_FALLBACK: &str = "Summary not available.";

pub fn register(registry: &mut ToolRegistry) {
    registry.register(Arc::new(FetchFinancialData));
    registry.register(Arc::new(CalculateFinancialMetrics));
    registry.register(Arc::new(GenerateChartInsight));
    registry.register(Arc::new(GenerateFinancialSummary));
    registry.register(Arc::new(GenerateFinancialReport));
    registry.register(Arc::new(SendFinancialReport));
}

/// Non-empty `stakeholders_email` cells.
pub(crate) fn stakeholder_emails(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.get(STAKEHOLDER_COLUMN))
        .filter_map(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialData {
    pub income_statement: Vec<Record>,
    pub balance_sheet: Vec<Record>,
    pub cash_flow: Vec<Record>,
    pub stakeholders: Vec<String>,
}

impl FinancialData {
    fn tables(&self) -> Result<(StatementTable, StatementTable, StatementTable)> {
        Ok((
            StatementTable::income(&self.income_statement)?,
            StatementTable::balance(&self.balance_sheet)?,
            StatementTable::cash_flow(&self.cash_flow)?,
        ))
    }
}

pub struct FetchFinancialData;

#[async_trait::async_trait]
impl Tool for FetchFinancialData {
    fn name(&self) -> &'static str {
        FETCH
    }

    fn description(&self) -> &'static str {
        "Fetch the income statement, balance sheet, cash flow and stakeholder emails."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data = FinancialData {
            income_statement: ctx.records(INCOME_SHEET).await?,
            balance_sheet: ctx.records(BALANCE_SHEET).await?,
            cash_flow: ctx.records(CASH_FLOW_SHEET).await?,
            stakeholders: stakeholder_emails(&ctx.records(STAKEHOLDER_SHEET).await?),
        };
        // Fail on malformed statements here rather than halfway through the report.
        data.tables()?;

        typed_output(
            format!(
                "Fetched financial statements and {} stakeholder emails",
                data.stakeholders.len()
            ),
            &data,
        )
    }
}

pub struct CalculateFinancialMetrics;

#[async_trait::async_trait]
impl Tool for CalculateFinancialMetrics {
    fn name(&self) -> &'static str {
        METRICS
    }

    fn description(&self) -> &'static str {
        "Calculate net profit, equity and cash flow for each fiscal year."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data: FinancialData = ctx.require(FETCH).await?;
        let (income, balance, cash) = data.tables()?;
        let metrics = compute_metrics(&income, &balance, &cash, &ctx.settings().fiscal_years)?;

        let message = metrics
            .iter()
            .map(YearMetrics::describe)
            .collect::<Vec<_>>()
            .join("\n");
        typed_output(message, &metrics)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartInsight {
    pub chart: ChartData,
    pub insight: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChartInsights {
    pub charts: Vec<ChartInsight>,
}

impl ChartInsights {
    fn of_kind(&self, kind: ChartKind) -> impl Iterator<Item = &ChartInsight> {
        self.charts.iter().filter(move |c| c.chart.kind == kind)
    }
}

/// `chart_types` may be a single name or a list; absent means every kind.
fn requested_kinds(parameters: &Value) -> Result<Vec<ChartKind>> {
    let raw: Vec<String> = match parameters.get("chart_types").or_else(|| parameters.get("chart_type")) {
        None | Some(Value::Null) => return Ok(ChartKind::ALL.to_vec()),
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| OrchestrationError::InvalidToolInput("chart_types must be strings".to_string()))?,
        Some(other) => {
            return Err(OrchestrationError::InvalidToolInput(format!(
                "chart_types must be a string or list, got {}",
                other
            )))
        }
    };

    raw.iter()
        .map(|name| {
            ChartKind::parse(name).ok_or_else(|| {
                OrchestrationError::InvalidToolInput(format!("Invalid chart type `{}`", name))
            })
        })
        .collect()
}

/// First line of the reply, without surrounding quotes.
fn first_insight_line(reply: &str) -> String {
    reply
        .trim()
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_string()
}

pub struct GenerateChartInsight;

#[async_trait::async_trait]
impl Tool for GenerateChartInsight {
    fn name(&self) -> &'static str {
        CHARTS
    }

    fn description(&self) -> &'static str {
        "Build chart data for income, balance and cash flow and write a one-line insight for each chart."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, input: &ToolInput) -> Result<ToolOutput> {
        let kinds = requested_kinds(&input.parameters)?;
        let data: FinancialData = ctx.require(FETCH).await?;
        let (income, balance, cash) = data.tables()?;
        let years = &ctx.settings().fiscal_years;

        let mut insights = ChartInsights::default();
        for kind in kinds {
            for chart in charts_for(kind, &income, &balance, &cash, years)? {
                let prompt = format!(
                    "Given the chart data:\n\nChart Type: {}\nYear: {}\nPercentage Breakdown: {}\n\nWrite a short insight (2-3 lines).",
                    kind.title(),
                    chart.period,
                    chart.values_text()
                );
                let fallback = format!("Insight not available for {} {}.", kind.title(), chart.period);
                let reply = ctx
                    .generate_or(
                        "You are a financial analyst. Return ONLY the raw insight text with NO additional formatting, quotes, or JSON.",
                        &prompt,
                        &fallback,
                    )
                    .await;

                let line = first_insight_line(&reply);
                insights.charts.push(ChartInsight {
                    chart,
                    insight: if line.is_empty() { fallback } else { line },
                });
            }
        }

        typed_output(format!("Generated {} chart insights", insights.charts.len()), &insights)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialSummary {
    pub summary: String,
    /// False when the fallback text was used.
    pub generated: bool,
}

pub struct GenerateFinancialSummary;

#[async_trait::async_trait]
impl Tool for GenerateFinancialSummary {
    fn name(&self) -> &'static str {
        SUMMARY
    }

    fn description(&self) -> &'static str {
        "Ask the LLM for a narrative performance summary of the yearly metrics."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let metrics: Vec<YearMetrics> = ctx.require(METRICS).await?;
        let summary_input = metrics
            .iter()
            .map(YearMetrics::describe)
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Given the following financial metrics:\n\n{}\n\nWrite a detailed financial performance summary. Use headings (e.g., **headings**) and paragraphs.",
            summary_input
        );

        let summary = ctx
            .generate_or("You are a financial analyst generating summaries.", &prompt, SUMMARY_FALLBACK)
            .await;
        let generated = summary != SUMMARY_FALLBACK;

        typed_output(
            if generated { "Financial summary generated" } else { SUMMARY_FALLBACK },
            &FinancialSummary { summary, generated },
        )
    }
}

/// A written document, referenced by later steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportFile {
    pub path: PathBuf,
}

fn year_fields(m: &YearMetrics) -> Block {
    let pkr = |v: i64| format!("PKR {}", format_thousands(v));
    Block::Fields(vec![
        ("Net Profit".to_string(), pkr(m.net_profit)),
        ("Total Assets".to_string(), pkr(m.total_assets)),
        ("Total Liabilities".to_string(), pkr(m.total_liabilities)),
        ("Equity".to_string(), pkr(m.equity)),
        ("Net Cash Flow".to_string(), pkr(m.net_cash_flow)),
        ("Ending Cash Balance".to_string(), pkr(m.ending_cash)),
    ])
}

fn chart_section(title: &str, items: Vec<&ChartInsight>) -> Section {
    let mut section = Section::new(title);
    for item in items {
        section = section
            .block(Block::Paragraph(format!("**Chart for {}**", item.chart.period)))
            .block(Block::Table {
                headers: vec!["Label".to_string(), "Value".to_string()],
                rows: item
                    .chart
                    .values
                    .iter()
                    .map(|v| vec![v.label.clone(), v.value.to_string()])
                    .collect(),
            })
            .block(Block::Paragraph(format!("Insight: {}", item.insight)));
    }
    section
}

pub struct GenerateFinancialReport;

#[async_trait::async_trait]
impl Tool for GenerateFinancialReport {
    fn name(&self) -> &'static str {
        GENERATE
    }

    fn description(&self) -> &'static str {
        "Write the annual financial report with metrics, chart insights and the summary."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let metrics: Vec<YearMetrics> = ctx.require(METRICS).await?;
        let charts: ChartInsights = ctx.require(CHARTS).await?;
        let summary: FinancialSummary = ctx.require(SUMMARY).await?;

        let mut document = Document::new("ANNUAL FINANCIAL REPORT");
        for m in &metrics {
            document = document.section(Section::new(format!("Year: {}", m.year)).block(year_fields(m)));
        }
        document = document
            .section(chart_section("INCOME STATEMENT CHARTS", charts.of_kind(ChartKind::Income).collect()))
            .section(chart_section("BALANCE SHEET CHARTS", charts.of_kind(ChartKind::Balance).collect()))
            .section(chart_section("CASH FLOW ANALYSIS", charts.of_kind(ChartKind::Cashflow).collect()))
            .section(Section::new("SUMMARY & ANALYSIS").block(rich_text_blocks(&summary.summary)));

        let relative = format!("reports/financial_report_{}.md", ctx.today().format("%Y-%m-%d"));
        let path = ctx.render(&document, &relative).await?;

        typed_output(format!("Report generated: {}", path.display()), &ReportFile { path })
    }
}

pub struct SendFinancialReport;

#[async_trait::async_trait]
impl Tool for SendFinancialReport {
    fn name(&self) -> &'static str {
        SEND
    }

    fn description(&self) -> &'static str {
        "Email the annual report to the sender with every stakeholder in Bcc."
    }

    async fn execute(&self, ctx: &ToolContext<'_>, _input: &ToolInput) -> Result<ToolOutput> {
        let data: FinancialData = ctx.require(FETCH).await?;
        let report: ReportFile = ctx.require(GENERATE).await?;

        if data.stakeholders.is_empty() {
            return Err(OrchestrationError::InvalidToolInput(
                "No valid stakeholder emails found".to_string(),
            ));
        }

        let sender = ctx.settings().sender_email.clone();
        let email = OutgoingEmail::plain(
            sender.clone(),
            format!("Annual Financial Report - {}", ctx.now().format("%Y")),
            "Dear Stakeholder,\nPlease find attached the annual financial report for your review.\nBest regards,\nFinance Team",
        )
        .with_bcc(data.stakeholders.clone())
        .attach(ctx.attachment(&report.path).await?);

        let mut delivery = DeliveryReport::default();
        delivery.record(sender, ctx.send(&email).await)?;

        let message = if delivery.failed.is_empty() {
            format!("Report sent to {} stakeholders", data.stakeholders.len())
        } else {
            delivery.message("reports")
        };
        typed_output(message, &delivery)
    }
}
