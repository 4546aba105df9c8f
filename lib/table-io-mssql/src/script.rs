//! Running multi-batch T-SQL scripts.
//!
//! Batches are separated by `GO` on a line of its own, optionally followed by
//! a `--` comment. Each batch runs on its own; a failing batch is reported in
//! the output and does not stop the ones after it.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Number, Value as JsonValue};
use table_io::{SqlExecutor, SqlRow, StorageError, Value, validate_identifier};
use tracing::{debug, warn};

#[allow(clippy::expect_used)]
static BATCH_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*GO\s*(?:--.*)?$").expect("batch separator pattern is valid")
});

/// Split a script into trimmed, non-empty batches.
pub fn split_batches(script: &str) -> Vec<String> {
    BATCH_SEPARATOR
        .split(script)
        .map(str::trim)
        .filter(|batch| !batch.is_empty())
        .map(str::to_string)
        .collect()
}

/// JSON form of a native value.
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Int(n) => JsonValue::Number(Number::from(*n)),
        Value::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Null => JsonValue::Null,
    }
}

/// A result row as a JSON object keyed by column name.
pub fn row_to_json(row: &SqlRow) -> JsonValue {
    JsonValue::Object(
        row.iter()
            .map(|(name, value)| (name.clone(), value_to_json(value)))
            .collect(),
    )
}

/// Run `script` in the context of `database`.
///
/// The session is opened for the script and closed afterwards. Unless the
/// first batch switches to `master`, `USE [database]` runs first. Returns
/// every result row as JSON text and every batch failure as its message.
pub async fn run_script<E: SqlExecutor + ?Sized>(
    executor: &mut E,
    script: &str,
    database: &str,
) -> Result<Vec<String>, StorageError> {
    validate_identifier(database)?;

    let batches = split_batches(script);
    let Some(first) = batches.first() else {
        return Ok(Vec::new());
    };

    executor.connect().await?;

    if !first.starts_with("USE master") {
        executor.execute(&format!("USE [{database}];"), &[]).await?;
    }

    let mut output = Vec::new();
    for (idx, batch) in batches.iter().enumerate() {
        match executor.execute(batch, &[]).await {
            Ok(rows) => {
                debug!(batch = idx, rows = rows.len(), "Script batch done");
                output.extend(rows.iter().map(|row| row_to_json(row).to_string()));
            }
            Err(e) => {
                warn!(batch = idx, database, error = %e, "Script batch failed");
                output.push(e.to_string());
            }
        }
    }

    executor.close().await?;
    Ok(output)
}

/// JSON objects among the output of [`run_script`]; failure messages are
/// skipped.
pub fn output_rows(output: &[String]) -> Vec<serde_json::Map<String, JsonValue>> {
    output
        .iter()
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(JsonValue::Object(row)) => Some(row),
            _ => None,
        })
        .collect()
}
