//! Lenient cell deserializers
//!
//! Sheet cells arrive as numbers, as strings with thousands separators, or
//! empty. These helpers accept all three.

use crate::error::OrchestrationError;
use crate::integrations::Record;
use crate::Result;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// "1,250.50" -> 1250.5, "" -> 0.
pub fn parse_amount(raw: &str) -> std::result::Result<f64, String> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();
    let cleaned = cleaned.trim_start_matches("PKR");
    if cleaned.is_empty() {
        return Ok(0.0);
    }
    cleaned.parse::<f64>().map_err(|e| e.to_string())
}

fn value_to_amount<E: serde::de::Error>(value: Value, kind: &str) -> std::result::Result<f64, E> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| E::custom(format!("invalid {kind} `{n}`"))),
        Value::String(s) => {
            parse_amount(&s).map_err(|err| E::custom(format!("invalid {kind} `{s}`: {err}")))
        }
        Value::Null => Ok(0.0),
        other => Err(E::custom(format!("invalid {kind} `{other}`"))),
    }
}

pub fn amount<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    value_to_amount(Value::deserialize(deserializer)?, "amount")
}

/// Whole counts (leaves, hours, quantities). Fractions are truncated.
pub fn count<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = value_to_amount::<D::Error>(Value::deserialize(deserializer)?, "count")?;
    Ok(value.trunc() as i64)
}

/// Identifiers and labels, which sheets may hand back as numbers.
pub fn text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!("invalid text `{other}`"))),
    }
}

/// Like `text`, but an empty cell becomes `None`.
pub fn optional_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = text(deserializer)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

/// Decode every record; errors name the worksheet and the 1-based sheet row.
pub fn from_records<T: DeserializeOwned>(worksheet: &str, records: &[Record]) -> Result<Vec<T>> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            serde_json::from_value(Value::Object(record.clone())).map_err(|e| {
                OrchestrationError::InvalidRecord {
                    worksheet: worksheet.to_string(),
                    // row 1 is the header
                    row: i + 2,
                    message: e.to_string(),
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Row {
        #[serde(deserialize_with = "text")]
        id: String,
        #[serde(deserialize_with = "amount")]
        value: f64,
        #[serde(default, deserialize_with = "count")]
        qty: i64,
    }

    fn records(values: Vec<Value>) -> Vec<Record> {
        values
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect()
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("1,250.50"), Ok(1250.5));
        assert_eq!(parse_amount(" $3,000 "), Ok(3000.0));
        assert_eq!(parse_amount(""), Ok(0.0));
        assert!(parse_amount("n/a").is_err());
    }

    #[test]
    fn test_from_records_accepts_mixed_cells() {
        let rows: Vec<Row> = from_records(
            "Budgets",
            &records(vec![
                json!({"id": 101, "value": "12,000", "qty": "3"}),
                json!({"id": "E2", "value": 7.5, "qty": ""}),
                json!({"id": "E3", "value": ""}),
            ]),
        )
        .unwrap();

        assert_eq!(rows[0].id, "101");
        assert_eq!(rows[0].value, 12000.0);
        assert_eq!(rows[0].qty, 3);
        assert_eq!(rows[1].qty, 0);
        assert_eq!(rows[2].value, 0.0);
    }

    #[test]
    fn test_bad_cell_names_sheet_and_row() {
        let err = from_records::<Row>(
            "Spend",
            &records(vec![
                json!({"id": "A", "value": 1}),
                json!({"id": "B", "value": "lots"}),
            ]),
        )
        .unwrap_err();

        match err {
            OrchestrationError::InvalidRecord { worksheet, row, .. } => {
                assert_eq!(worksheet, "Spend");
                assert_eq!(row, 3);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
