//! Error payload construction shared by the two output formats.

use serde::Serialize;
use serde_json::{Map, Value};

use super::error::ExportError;
use super::Context;

/// Characters kept from each error message in a minimal JSON payload.
pub const JSON_TRUNCATE_AT: usize = 200;
/// Characters kept from each error message in a minimal parquet payload.
pub const PARQUET_TRUNCATE_AT: usize = 100;

/// The structured (level 1) payload for the record-oriented format.  The
/// caller's context rides along as a nested object.
pub fn error_object(
    error: &ExportError,
    database: &str,
    context: Option<&Context>,
) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("error".to_string(), Value::String(error.to_string()));
    payload.insert(
        "error_type".to_string(),
        Value::String(error.kind().to_string()),
    );
    payload.insert("database".to_string(), Value::String(database.to_string()));
    payload.insert("status".to_string(), Value::String("error".to_string()));
    if let Some(context) = context {
        payload.insert("context".to_string(), Value::Object(context.clone()));
    }
    payload
}

/// The structured (level 1) payload for the columnar format: one string
/// column per field, context flattened to `context_{key}` columns.
pub fn error_columns(
    error: &ExportError,
    database: &str,
    context: Option<&Context>,
) -> Vec<(String, String)> {
    let mut columns = vec![
        ("error".to_string(), error.to_string()),
        ("error_type".to_string(), error.kind().to_string()),
        ("database".to_string(), database.to_string()),
    ];
    if let Some(context) = context {
        for (key, value) in context {
            columns.push((format!("context_{}", key), stringify(value)));
        }
    }
    columns
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Degraded (level 2) payload, used when building the structured payload
/// failed as well.  Fixed shape, truncated messages.
#[derive(Debug, Serialize)]
pub struct MinimalErrorPayload {
    pub status: &'static str,
    pub original_error: String,
    pub nested_error: String,
}

impl MinimalErrorPayload {
    pub fn json(original: &ExportError, nested: &ExportError) -> MinimalErrorPayload {
        MinimalErrorPayload {
            status: "error",
            original_error: truncate(&original.to_string(), JSON_TRUNCATE_AT),
            nested_error: truncate(&nested.to_string(), JSON_TRUNCATE_AT),
        }
    }

    pub fn columnar(original: &ExportError, nested: &ExportError) -> MinimalErrorPayload {
        MinimalErrorPayload {
            status: "Error occurred",
            original_error: truncate(&original.to_string(), PARQUET_TRUNCATE_AT),
            nested_error: truncate(&nested.to_string(), PARQUET_TRUNCATE_AT),
        }
    }

    pub fn columns(&self) -> Vec<(String, String)> {
        vec![
            ("status".to_string(), self.status.to_string()),
            ("original_error".to_string(), self.original_error.clone()),
            ("nested_error".to_string(), self.nested_error.clone()),
        ]
    }
}

/// Cap `s` at `max` characters, not bytes, to stay on UTF-8 boundaries.
pub fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
