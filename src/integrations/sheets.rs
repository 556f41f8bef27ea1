//! Spreadsheet access
//!
//! Records are header-keyed rows. Numeric-looking cells are turned into JSON
//! numbers on read so business code sees the same shapes for both backends.

use crate::error::{is_transient_status, OrchestrationError};
use crate::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error};

pub type Record = Map<String, Value>;

#[async_trait::async_trait]
pub trait SheetClient: Send + Sync {
    async fn get_all_records(&self, worksheet: &str) -> Result<Vec<Record>>;
    async fn append_row(&self, worksheet: &str, cells: Vec<Value>) -> Result<()>;
}

/// Google Sheets v4 values API with a caller-supplied bearer token.
pub struct GoogleSheetsClient {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    access_token: String,
}

impl GoogleSheetsClient {
    pub fn new(base_url: &str, spreadsheet_id: String, access_token: String) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id,
            access_token,
        })
    }

    fn values_url(&self, worksheet: &str, suffix: &str) -> String {
        format!(
            "{}/{}/values/{}{}",
            self.base_url,
            self.spreadsheet_id,
            encode_range(worksheet),
            suffix
        )
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[async_trait::async_trait]
impl SheetClient for GoogleSheetsClient {
    async fn get_all_records(&self, worksheet: &str) -> Result<Vec<Record>> {
        let url = self.values_url(worksheet, "");
        debug!(worksheet, "Reading worksheet");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|e| transport_error(worksheet, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(worksheet, status = %status, "Sheets API error: {}", body);
            return Err(OrchestrationError::SheetError {
                message: format!("reading `{}` returned {}: {}", worksheet, status, body),
                retryable: is_transient_status(status),
            });
        }

        let range: ValueRange = response.json().await.map_err(|e| OrchestrationError::SheetError {
            message: format!("invalid response for `{}`: {}", worksheet, e),
            retryable: false,
        })?;

        Ok(rows_to_records(range.values))
    }

    async fn append_row(&self, worksheet: &str, cells: Vec<Value>) -> Result<()> {
        let url = self.values_url(worksheet, ":append?valueInputOption=USER_ENTERED");
        let body = serde_json::json!({ "values": [cells] });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(worksheet, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrchestrationError::SheetError {
                message: format!("appending to `{}` returned {}: {}", worksheet, status, body),
                retryable: is_transient_status(status),
            });
        }
        Ok(())
    }
}

fn transport_error(worksheet: &str, e: reqwest::Error) -> OrchestrationError {
    OrchestrationError::SheetError {
        message: format!("request for `{}` failed: {}", worksheet, e),
        retryable: e.is_timeout() || e.is_connect(),
    }
}

/// Quote the sheet name as an A1 range and percent-encode it for the URL path.
fn encode_range(worksheet: &str) -> String {
    urlencoding::encode(&format!("'{}'", worksheet.replace('\'', "''"))).into_owned()
}

/// First row is the header; short rows are padded with empty strings.
pub fn rows_to_records(rows: Vec<Vec<Value>>) -> Vec<Record> {
    let mut iter = rows.into_iter();
    let headers: Vec<String> = match iter.next() {
        Some(h) => h.iter().map(cell_to_string).collect(),
        None => return Vec::new(),
    };

    iter.map(|row| {
        headers
            .iter()
            .enumerate()
            .map(|(i, header)| {
                let cell = row.get(i).cloned().unwrap_or(Value::String(String::new()));
                (header.clone(), numericise(cell))
            })
            .collect()
    })
    .collect()
}

fn cell_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// "42" -> 42, "3.5" -> 3.5; anything else is kept as-is.
pub fn numericise(value: Value) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return value;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    value
}

/// In-memory spreadsheet used for development and tests.
#[derive(Clone, Default)]
pub struct InMemorySheets {
    sheets: Arc<RwLock<HashMap<String, Vec<Record>>>>,
    headers: Arc<RwLock<HashMap<String, Vec<String>>>>,
    appended: Arc<RwLock<HashMap<String, Vec<Vec<Value>>>>>,
    failures: Arc<RwLock<HashMap<String, u32>>>,
}

impl InMemorySheets {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_sheet(self, worksheet: &str, records: Vec<Value>) -> Self {
        self.set_sheet(worksheet, records).await;
        self
    }

    /// Replace a worksheet. Non-object values are ignored.
    pub async fn set_sheet(&self, worksheet: &str, records: Vec<Value>) {
        let rows = records
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self.sheets.write().await.insert(worksheet.to_string(), rows);
    }

    /// Declare the column order of a worksheet so appended rows become
    /// readable records. Creates the worksheet when missing.
    pub async fn with_headers(self, worksheet: &str, headers: &[&str]) -> Self {
        self.headers.write().await.insert(
            worksheet.to_string(),
            headers.iter().map(|h| h.to_string()).collect(),
        );
        self.sheets
            .write()
            .await
            .entry(worksheet.to_string())
            .or_default();
        self
    }

    /// The next `n` calls touching `worksheet` fail with a transient error.
    pub async fn fail_next(&self, worksheet: &str, n: u32) {
        self.failures.write().await.insert(worksheet.to_string(), n);
    }

    pub async fn appended_rows(&self, worksheet: &str) -> Vec<Vec<Value>> {
        self.appended
            .read()
            .await
            .get(worksheet)
            .cloned()
            .unwrap_or_default()
    }

    async fn maybe_fail(&self, worksheet: &str) -> Result<()> {
        let mut failures = self.failures.write().await;
        if let Some(left) = failures.get_mut(worksheet) {
            if *left > 0 {
                *left -= 1;
                return Err(OrchestrationError::SheetError {
                    message: format!("injected failure for `{}`", worksheet),
                    retryable: true,
                });
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SheetClient for InMemorySheets {
    async fn get_all_records(&self, worksheet: &str) -> Result<Vec<Record>> {
        self.maybe_fail(worksheet).await?;
        self.sheets
            .read()
            .await
            .get(worksheet)
            .cloned()
            .ok_or_else(|| OrchestrationError::SheetError {
                message: format!("worksheet `{}` not found", worksheet),
                retryable: false,
            })
    }

    async fn append_row(&self, worksheet: &str, cells: Vec<Value>) -> Result<()> {
        self.maybe_fail(worksheet).await?;

        if let Some(headers) = self.headers.read().await.get(worksheet) {
            let record: Record = headers.iter().cloned().zip(cells.iter().cloned()).collect();
            self.sheets
                .write()
                .await
                .entry(worksheet.to_string())
                .or_default()
                .push(record);
        }

        self.appended
            .write()
            .await
            .entry(worksheet.to_string())
            .or_default()
            .push(cells);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rows_to_records_numericises_and_pads() {
        let rows = vec![
            vec![json!("employee_id"), json!("name"), json!("base_salary")],
            vec![json!("E1"), json!("Ali"), json!("50000")],
            vec![json!("E2"), json!("Sara")],
        ];
        let records = rows_to_records(rows);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["base_salary"], json!(50000));
        assert_eq!(records[1]["base_salary"], json!(""));
    }

    #[test]
    fn test_numericise_keeps_text() {
        assert_eq!(numericise(json!("12.5")), json!(12.5));
        assert_eq!(numericise(json!("1,200")), json!("1,200"));
        assert_eq!(numericise(json!("2025-01-31")), json!("2025-01-31"));
    }

    #[test]
    fn test_encode_range_quotes_sheet_name() {
        assert_eq!(encode_range("PO's"), "%27PO%27%27s%27");
        assert_eq!(encode_range("Cash_Flow"), "%27Cash_Flow%27");
    }

    #[tokio::test]
    async fn test_in_memory_failure_injection() {
        let sheets = InMemorySheets::new()
            .with_sheet("Invoices", vec![json!({"invoice_id": 1})])
            .await;
        sheets.fail_next("Invoices", 1).await;

        let first = sheets.get_all_records("Invoices").await;
        assert!(matches!(first, Err(ref e) if e.is_retryable()));
        assert_eq!(sheets.get_all_records("Invoices").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_row_is_readable() {
        let sheets = InMemorySheets::new()
            .with_headers("Payslips", &["employee_id", "name", "net_salary", "month"])
            .await;
        sheets
            .append_row("Payslips", vec![json!("E1"), json!("Ali"), json!(100), json!("2025-06")])
            .await
            .unwrap();

        let records = sheets.get_all_records("Payslips").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["month"], json!("2025-06"));
        assert_eq!(sheets.appended_rows("Payslips").await.len(), 1);
    }
}
