//! Mapping between abstract type tags and SQL Server column types.

use table_io::{JsonValueType, StorageError};

/// Unbounded text, used for every JSON-like type.
pub const TEXT: &str = "NVARCHAR(MAX)";
/// Bounded text for key columns; `NVARCHAR(MAX)` cannot be indexed.
pub const KEY_TEXT: &str = "NVARCHAR(256)";
pub const NUMBER: &str = "FLOAT";
pub const BOOLEAN: &str = "BIT";

/// SQL Server column type for an abstract type tag.
pub fn json_to_sql_type(column_type: JsonValueType) -> &'static str {
    match column_type {
        JsonValueType::String
        | JsonValueType::Json
        | JsonValueType::JsonArray
        | JsonValueType::JsonValue => TEXT,
        JsonValueType::Number => NUMBER,
        JsonValueType::Boolean => BOOLEAN,
    }
}

/// [`json_to_sql_type`] for a textual tag, failing on anything but the six
/// known tags.
pub fn json_tag_to_sql_type(tag: &str) -> Result<&'static str, StorageError> {
    Ok(json_to_sql_type(tag.parse()?))
}

/// Decode an `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE` name back to a type tag.
///
/// Every text column decodes to `string`: the JSON flavour is only known to
/// the schema registry.
pub fn sql_to_json_type(data_type: &str) -> Result<JsonValueType, StorageError> {
    match data_type.to_ascii_lowercase().as_str() {
        "nvarchar" | "varchar" | "nchar" | "char" | "ntext" | "text" => Ok(JsonValueType::String),
        "float" | "real" | "int" | "bigint" | "smallint" | "tinyint" | "decimal" | "numeric" => {
            Ok(JsonValueType::Number)
        }
        "bit" => Ok(JsonValueType::Boolean),
        _ => Err(StorageError::UnknownType(data_type.to_string())),
    }
}
