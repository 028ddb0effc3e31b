//! Query results returned by `POST /api/dataset` and `POST /api/card/{id}/query`.

use crate::error::ServerError;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub base_type: Option<String>,
}

/// Tabular query result, capped at a row limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetResult {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// More rows existed than were returned.
    pub truncated: bool,
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    status: Option<String>,
    error: Option<Value>,
    row_count: Option<usize>,
    data: Option<RawData>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    #[serde(default)]
    cols: Vec<Column>,
    #[serde(default)]
    rows: Vec<Vec<Value>>,
    rows_truncated: Option<usize>,
}

impl DatasetResult {
    /// Parse a Metabase dataset response and keep at most `row_limit` rows.
    ///
    /// Metabase reports query failures as a 2xx body with `status: "failed"`;
    /// those become a 400 upstream error carrying the database's message.
    pub fn from_response(raw: Value, row_limit: usize) -> Result<Self, ServerError> {
        let parsed: RawDataset = serde_json::from_value(raw.clone()).map_err(|e| {
            ServerError::internal(format!("Unexpected dataset response shape: {e}"))
        })?;

        if parsed.status.as_deref() == Some("failed") {
            let message = match &parsed.error {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "Query failed".to_string(),
            };
            return Err(ServerError::upstream_with_data(400, message, Some(raw)));
        }

        let data = parsed
            .data
            .ok_or_else(|| ServerError::internal("Dataset response has no 'data' block"))?;

        let mut rows = data.rows;
        let reported = parsed.row_count.unwrap_or(rows.len()).max(rows.len());
        let upstream_truncated = data.rows_truncated.is_some_and(|n| n > 0);
        let truncated = rows.len() > row_limit || reported > row_limit || upstream_truncated;
        rows.truncate(row_limit);

        Ok(Self {
            columns: data.cols,
            row_count: rows.len(),
            rows,
            truncated,
        })
    }

    /// Format as CSV with a header row of column names.
    pub fn to_csv(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }

        let mut output = String::new();
        let headers: Vec<String> = self.columns.iter().map(|c| escape_csv(&c.name)).collect();
        output.push_str(&headers.join(","));
        output.push('\n');

        for row in &self.rows {
            let values: Vec<String> = (0..self.columns.len())
                .map(|i| escape_csv(&cell_text(row.get(i))))
                .collect();
            output.push_str(&values.join(","));
            output.push('\n');
        }

        output
    }

    /// Rows as an array of objects keyed by column name.
    pub fn to_records(&self) -> Value {
        let records = self
            .rows
            .iter()
            .map(|row| {
                let mut record = Map::new();
                for (i, column) in self.columns.iter().enumerate() {
                    record.insert(
                        column.name.clone(),
                        row.get(i).cloned().unwrap_or(Value::Null),
                    );
                }
                Value::Object(record)
            })
            .collect();
        Value::Array(records)
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Export output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
    Xlsx,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => write!(f, "csv"),
            ExportFormat::Json => write!(f, "json"),
            ExportFormat::Xlsx => write!(f, "xlsx"),
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            _ => Err(format!(
                "Invalid export format '{}'. Valid formats: csv, json, xlsx",
                s
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(rows: usize) -> Value {
        json!({
            "status": "completed",
            "row_count": rows,
            "data": {
                "cols": [
                    {"name": "id", "display_name": "ID", "base_type": "type/Integer", "fingerprint": null},
                    {"name": "note", "display_name": "Note", "base_type": "type/Text"}
                ],
                "rows": (0..rows).map(|i| json!([i, format!("row {i}")])).collect::<Vec<_>>(),
                "native_form": {"query": "SELECT ..."}
            }
        })
    }

    #[test]
    fn test_parse_dataset() {
        let result = DatasetResult::from_response(response(3), 10).unwrap();
        assert_eq!(result.column_names(), vec!["id", "note"]);
        assert_eq!(result.row_count, 3);
        assert!(!result.truncated);
    }

    #[test]
    fn test_client_side_truncation() {
        let result = DatasetResult::from_response(response(30), 10).unwrap();
        assert_eq!(result.row_count, 10);
        assert_eq!(result.rows.len(), 10);
        assert!(result.truncated);
    }

    #[test]
    fn test_failed_status_is_an_upstream_error() {
        let err = DatasetResult::from_response(
            json!({"status": "failed", "error": "Table \"NOPE\" not found", "data": {"rows": [], "cols": []}}),
            10,
        )
        .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("NOPE"));
    }

    #[test]
    fn test_missing_data_block() {
        assert!(DatasetResult::from_response(json!({"status": "completed"}), 10).is_err());
    }

    #[test]
    fn test_csv_output() {
        let result = DatasetResult::from_response(
            json!({
                "data": {
                    "cols": [{"name": "id"}, {"name": "name"}],
                    "rows": [[1, "value, with comma"], [2, null], [3, "say \"hi\""]]
                }
            }),
            10,
        )
        .unwrap();

        let csv = result.to_csv();
        assert!(csv.starts_with("id,name\n"));
        assert!(csv.contains("\"value, with comma\""));
        assert!(csv.contains("2,\n"));
        assert!(csv.contains("\"say \"\"hi\"\"\""));
    }

    #[test]
    fn test_records_output() {
        let result = DatasetResult::from_response(response(1), 10).unwrap();
        assert_eq!(result.to_records(), json!([{"id": 0, "note": "row 0"}]));
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert_eq!("excel".parse::<ExportFormat>(), Ok(ExportFormat::Xlsx));
        assert!("parquet".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Json.to_string(), "json");
    }
}
