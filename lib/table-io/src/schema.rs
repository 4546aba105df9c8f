//! Engine-independent table schemas.
//!
//! A [`TableCfg`] describes a table by key and an ordered list of
//! [`ColumnCfg`]s. Column order is append-only across versions: a schema may
//! only grow by adding columns at the end.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{NameMapping, StorageError, validate_identifier};

/// A row as seen by callers: column key to JSON value. Absent columns are
/// simply missing from the map.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Abstract column type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JsonValueType {
    String,
    Number,
    Boolean,
    Json,
    JsonArray,
    JsonValue,
}

impl JsonValueType {
    pub const ALL: [JsonValueType; 6] = [
        JsonValueType::String,
        JsonValueType::Number,
        JsonValueType::Boolean,
        JsonValueType::Json,
        JsonValueType::JsonArray,
        JsonValueType::JsonValue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonValueType::String => "string",
            JsonValueType::Number => "number",
            JsonValueType::Boolean => "boolean",
            JsonValueType::Json => "json",
            JsonValueType::JsonArray => "jsonArray",
            JsonValueType::JsonValue => "jsonValue",
        }
    }

    /// Whether a non-null JSON value may be stored in a column of this type.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        match self {
            JsonValueType::String => value.is_string(),
            JsonValueType::Number => value.is_number(),
            JsonValueType::Boolean => value.is_boolean(),
            JsonValueType::Json => value.is_object(),
            JsonValueType::JsonArray => value.is_array(),
            JsonValueType::JsonValue => true,
        }
    }
}

impl FromStr for JsonValueType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonValueType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StorageError::UnknownType(s.to_string()))
    }
}

impl fmt::Display for JsonValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of data a table holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContentType {
    Buffets,
    Cakes,
    #[default]
    Components,
    Ingredients,
    Layers,
    Revisions,
    SliceIds,
    TableCfgs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCfg {
    pub key: String,
    #[serde(rename = "type")]
    pub column_type: JsonValueType,
}

impl ColumnCfg {
    pub fn new(key: impl Into<String>, column_type: JsonValueType) -> Self {
        Self {
            key: key.into(),
            column_type,
        }
    }

    pub fn is_reference(&self) -> bool {
        NameMapping::is_reference(&self.key)
    }
}

/// Abstract schema of one table version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableCfg {
    pub key: String,
    #[serde(rename = "type", default)]
    pub content_type: ContentType,
    pub columns: Vec<ColumnCfg>,
    #[serde(default)]
    pub is_head: bool,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(rename = "_hash", default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl TableCfg {
    /// A table with only the `_hash` column.
    pub fn new(key: impl Into<String>, content_type: ContentType) -> Self {
        Self {
            key: key.into(),
            content_type,
            columns: vec![ColumnCfg::new(
                NameMapping::PRIMARY_KEY_COLUMN,
                JsonValueType::String,
            )],
            is_head: false,
            is_root: false,
            is_shared: true,
            hash: None,
        }
    }

    /// Append a column (builder style).
    pub fn with_column(mut self, key: impl Into<String>, column_type: JsonValueType) -> Self {
        self.columns.push(ColumnCfg::new(key, column_type));
        self
    }

    pub fn column(&self, key: &str) -> Option<&ColumnCfg> {
        self.columns.iter().find(|c| c.key == key)
    }

    pub fn column_keys(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.key.as_str())
    }

    pub fn reference_columns(&self) -> impl Iterator<Item = &ColumnCfg> {
        self.columns.iter().filter(|c| c.is_reference())
    }

    /// Check that this schema can be turned into DDL.
    pub fn validate(&self) -> Result<(), StorageError> {
        validate_identifier(&self.key)?;

        if self.columns.is_empty() {
            return Err(StorageError::InvalidSchema {
                table: self.key.clone(),
                reason: "no columns".to_string(),
            });
        }

        // `a` and `a_col` share the physical name `a_col`
        let mut seen = HashSet::new();
        for column in &self.columns {
            validate_identifier(&column.key)?;
            if !seen.insert(NameMapping::add_column_suffix(&column.key)) {
                return Err(StorageError::InvalidSchema {
                    table: self.key.clone(),
                    reason: format!("duplicate column {}", column.key),
                });
            }
        }

        if self.column(NameMapping::PRIMARY_KEY_COLUMN).is_none() {
            return Err(StorageError::MissingHashColumn(self.key.clone()));
        }

        Ok(())
    }

    /// The schema of the registry table itself.
    pub fn table_cfgs() -> Self {
        let mut cfg = TableCfg::new(NameMapping::TABLE_CFGS, ContentType::TableCfgs)
            .with_column("key", JsonValueType::String)
            .with_column("type", JsonValueType::String)
            .with_column("isHead", JsonValueType::Boolean)
            .with_column("isRoot", JsonValueType::Boolean)
            .with_column("isShared", JsonValueType::Boolean)
            .with_column("columns", JsonValueType::JsonArray);
        cfg.is_shared = false;
        cfg
    }
}
