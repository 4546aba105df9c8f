//! Row codec: abstract rows to positional parameters and result rows back.
//!
//! JSON-like columns travel as JSON text, booleans as `1`/`0`. Decoding keys
//! native rows by physical column name and omits null columns from the
//! decoded row instead of setting them to null.

use serde_json::{Number, Value as JsonValue};
use table_io::{JsonValueType, NameMapping, Row, SqlRow, StorageError, TableCfg, Value};

fn unsupported_value(cfg: &TableCfg, column: &str, expected: JsonValueType) -> StorageError {
    StorageError::UnsupportedValueType {
        table: cfg.key.clone(),
        column: column.to_string(),
        expected: expected.to_string(),
    }
}

fn unsupported_column(cfg: &TableCfg, column: &str, column_type: JsonValueType) -> StorageError {
    StorageError::UnsupportedColumnType {
        table: cfg.key.clone(),
        column: column.to_string(),
        column_type: column_type.to_string(),
    }
}

/// Native parameter for one JSON value of a column of `column_type`.
pub fn encode_value(column_type: JsonValueType, value: &JsonValue) -> Result<Value, StorageError> {
    // jsonValue is stored as JSON text whatever its shape, so strings keep
    // their quotes and decode back unchanged
    if column_type == JsonValueType::JsonValue {
        return match value {
            JsonValue::Null => Ok(Value::Null),
            other => Ok(Value::String(serde_json::to_string(other)?)),
        };
    }

    Ok(match value {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Int(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => Value::String(serde_json::to_string(value)?),
    })
}

/// Check every key of `row` is a column of `cfg` and every value matches
/// its column's declared type. Nulls match any type.
pub fn check_row(cfg: &TableCfg, row: &Row) -> Result<(), StorageError> {
    for (key, value) in row {
        let column = cfg.column(key).ok_or_else(|| {
            StorageError::NotFound(format!("column {} in table {}", key, cfg.key))
        })?;
        if !value.is_null() && !column.column_type.accepts(value) {
            return Err(unsupported_value(cfg, key, column.column_type));
        }
    }
    Ok(())
}

/// Positional parameters for the insert statement of `cfg`.
///
/// One value per schema column in schema order; missing keys become null.
/// Number columns are FLOAT on the server, so an integral float such as
/// `3.0` reads back from [`parse_row`] as the integer `3`.
pub fn serialize_row(row: &Row, cfg: &TableCfg) -> Result<Vec<Value>, StorageError> {
    cfg.columns
        .iter()
        .map(|column| match row.get(&column.key) {
            None => Ok(Value::Null),
            Some(value) => {
                if !value.is_null() && !column.column_type.accepts(value) {
                    return Err(unsupported_value(cfg, &column.key, column.column_type));
                }
                encode_value(column.column_type, value)
            }
        })
        .collect()
}

/// Integral floats decode to integer numbers so `3` reads back as `3`.
fn number(f: f64) -> Option<JsonValue> {
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        Some(JsonValue::Number(Number::from(f as i64)))
    } else {
        Number::from_f64(f).map(JsonValue::Number)
    }
}

fn decode_value(
    cfg: &TableCfg,
    key: &str,
    column_type: JsonValueType,
    value: &Value,
) -> Result<JsonValue, StorageError> {
    let mismatch = || unsupported_column(cfg, key, column_type);

    match column_type {
        JsonValueType::Boolean => value.as_bool().map(JsonValue::Bool).ok_or_else(mismatch),
        JsonValueType::Number => match value {
            Value::Int(i) => Ok(JsonValue::Number(Number::from(*i))),
            Value::Float(f) => number(*f).ok_or_else(mismatch),
            Value::Bool(b) => Ok(JsonValue::Number(Number::from(i64::from(*b)))),
            _ => Err(mismatch()),
        },
        JsonValueType::String => match value {
            Value::String(s) => Ok(JsonValue::String(s.clone())),
            _ => Err(mismatch()),
        },
        JsonValueType::Json | JsonValueType::JsonArray | JsonValueType::JsonValue => {
            let text = value.as_str().ok_or_else(mismatch)?;
            Ok(serde_json::from_str(text)?)
        }
    }
}

/// Decode one native row keyed by physical column names.
///
/// NULL columns are omitted. Integral FLOAT values decode to integer
/// numbers whatever they were written as.
pub fn parse_row(row: &SqlRow, cfg: &TableCfg) -> Result<Row, StorageError> {
    let mut decoded = Row::new();
    for column in &cfg.columns {
        let physical = NameMapping::add_column_suffix(&column.key);
        let value = match row.get(&physical) {
            None | Some(Value::Null) => continue,
            Some(value) => value,
        };
        decoded.insert(
            column.key.clone(),
            decode_value(cfg, &column.key, column.column_type, value)?,
        );
    }
    Ok(decoded)
}

/// Decode native rows against the schema of their table.
pub fn parse_data(rows: &[SqlRow], cfg: &TableCfg) -> Result<Vec<Row>, StorageError> {
    rows.iter().map(|row| parse_row(row, cfg)).collect()
}

/// Predicate over abstract column keys, checked against `cfg` and ready for
/// [`table_io::StatementBuilder::where_clause`].
///
/// `jsonValue` columns compare against their JSON text.
pub fn predicate_pairs(
    cfg: &TableCfg,
    predicate: &Row,
) -> Result<Vec<(String, JsonValue)>, StorageError> {
    check_row(cfg, predicate)?;
    predicate
        .iter()
        .map(|(key, value)| {
            let is_json_value = cfg
                .column(key)
                .is_some_and(|c| c.column_type == JsonValueType::JsonValue);
            if is_json_value && !value.is_null() {
                Ok((key.clone(), JsonValue::String(serde_json::to_string(value)?)))
            } else {
                Ok((key.clone(), value.clone()))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use table_io::ContentType;

    fn all_types() -> TableCfg {
        TableCfg::new("things", ContentType::Components)
            .with_column("name", JsonValueType::String)
            .with_column("count", JsonValueType::Number)
            .with_column("active", JsonValueType::Boolean)
            .with_column("meta", JsonValueType::Json)
            .with_column("tags", JsonValueType::JsonArray)
            .with_column("extra", JsonValueType::JsonValue)
    }

    fn row(value: JsonValue) -> Row {
        value.as_object().unwrap().clone()
    }

    /// What a server hands back for the parameters of an insert.
    fn as_native(params: Vec<Value>, cfg: &TableCfg) -> SqlRow {
        cfg.columns
            .iter()
            .map(|c| NameMapping::add_column_suffix(&c.key))
            .zip(params)
            .collect()
    }

    #[test]
    fn serialize_follows_schema_order() {
        let cfg = all_types();
        let params = serialize_row(
            &row(json!({
                "active": true,
                "name": "Ann",
                "meta": {"a": 1},
                "_hash": "h1",
            })),
            &cfg,
        )
        .unwrap();

        assert_eq!(params.len(), cfg.columns.len());
        assert_eq!(
            params,
            vec![
                Value::String("h1".into()),
                Value::String("Ann".into()),
                Value::Null,
                Value::Int(1),
                Value::String(r#"{"a":1}"#.into()),
                Value::Null,
                Value::Null,
            ]
        );
    }

    #[test]
    fn serialize_rejects_mistyped_value() {
        let err = serialize_row(&row(json!({"count": {"x": 1}})), &all_types()).unwrap_err();
        assert!(matches!(
            err,
            StorageError::UnsupportedValueType { ref column, .. } if column == "count"
        ));
    }

    #[test]
    fn round_trip_every_type() {
        let cfg = all_types();
        let original = row(json!({
            "_hash": "h1",
            "name": "Ann",
            "count": 3,
            "active": true,
            "meta": {"nested": {"deep": [1, 2]}},
            "tags": ["a", "b"],
            "extra": "just a string",
        }));

        let native = as_native(serialize_row(&original, &cfg).unwrap(), &cfg);
        let decoded = parse_data(&[native], &cfg).unwrap();
        assert_eq!(decoded, vec![original]);
    }

    #[test]
    fn round_trip_fractional_number() {
        let cfg = all_types();
        let original = row(json!({"_hash": "h", "count": 2.5, "active": false}));
        let native = as_native(serialize_row(&original, &cfg).unwrap(), &cfg);
        assert_eq!(parse_row(&native, &cfg).unwrap(), original);
    }

    #[test]
    fn integral_float_reads_back_as_integer() {
        let cfg = all_types();
        let written = row(json!({"_hash": "h", "count": 3.0}));
        let params = serialize_row(&written, &cfg).unwrap();
        assert_eq!(params[2], Value::Float(3.0));

        let decoded = parse_row(&as_native(params, &cfg), &cfg).unwrap();
        assert_eq!(decoded, row(json!({"_hash": "h", "count": 3})));
        assert_ne!(decoded, written);
    }

    #[test]
    fn nulls_are_omitted() {
        let cfg = all_types();
        let native: SqlRow = [
            ("_hash_col".to_string(), Value::String("h".into())),
            ("name_col".to_string(), Value::Null),
        ]
        .into_iter()
        .collect();

        let decoded = parse_row(&native, &cfg).unwrap();
        assert_eq!(decoded, row(json!({"_hash": "h"})));
        assert!(!decoded.contains_key("name"));
    }

    #[test]
    fn bit_and_float_decode() {
        let cfg = all_types();
        let native: SqlRow = [
            ("active_col".to_string(), Value::Bool(true)),
            ("count_col".to_string(), Value::Float(7.0)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            parse_row(&native, &cfg).unwrap(),
            row(json!({"count": 7, "active": true}))
        );
    }

    #[test]
    fn mismatched_native_value_fails() {
        let cfg = all_types();
        let native: SqlRow = [("active_col".to_string(), Value::String("yes".into()))]
            .into_iter()
            .collect();
        assert!(matches!(
            parse_row(&native, &cfg),
            Err(StorageError::UnsupportedColumnType { .. })
        ));
    }

    #[test]
    fn check_row_unknown_column() {
        let err = check_row(&all_types(), &row(json!({"nope": 1}))).unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn predicate_encodes_json_value_columns() {
        let pairs = predicate_pairs(
            &all_types(),
            &row(json!({"extra": "x", "name": "Ann", "tags": null})),
        )
        .unwrap();
        assert_eq!(
            pairs,
            vec![
                ("extra".to_string(), json!("\"x\"")),
                ("name".to_string(), json!("Ann")),
                ("tags".to_string(), JsonValue::Null),
            ]
        );
    }
}
