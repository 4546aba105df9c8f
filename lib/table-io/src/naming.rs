//! Mapping between abstract table/column keys and physical SQL names.
//!
//! Every table key gets the `_tbl` suffix and every column key the `_col`
//! suffix before it reaches SQL text. Suffixing keeps abstract keys clear of
//! reserved words and keeps the table and column namespaces apart. Both
//! directions are idempotent so names may pass through the pipeline twice.

use crate::StorageError;

/// Naming conventions shared by every SQL backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameMapping;

impl NameMapping {
    pub const TABLE_SUFFIX: &'static str = "_tbl";
    pub const COLUMN_SUFFIX: &'static str = "_col";
    /// Column keys ending in this suffix reference another table's hash.
    pub const REF_SUFFIX: &'static str = "Ref";

    /// The content-hash column, primary key of every table.
    pub const PRIMARY_KEY_COLUMN: &'static str = "_hash";
    /// Key of the schema registry table.
    pub const TABLE_CFGS: &'static str = "tableCfgs";

    pub fn add_table_suffix(key: &str) -> String {
        add_fix(key, Self::TABLE_SUFFIX)
    }

    pub fn add_column_suffix(key: &str) -> String {
        add_fix(key, Self::COLUMN_SUFFIX)
    }

    pub fn remove_table_suffix(name: &str) -> String {
        remove_fix(name, Self::TABLE_SUFFIX)
    }

    pub fn remove_column_suffix(name: &str) -> String {
        remove_fix(name, Self::COLUMN_SUFFIX)
    }

    /// True for `fooRef`-style keys that declare a foreign key.
    pub fn is_reference(column_key: &str) -> bool {
        column_key.len() > Self::REF_SUFFIX.len() && column_key.ends_with(Self::REF_SUFFIX)
    }

    /// Key of the table a reference column points at (`carRef` -> `car`).
    pub fn referenced_table(column_key: &str) -> Option<&str> {
        if Self::is_reference(column_key) {
            column_key.strip_suffix(Self::REF_SUFFIX)
        } else {
            None
        }
    }
}

/// Append `suffix` unless `name` already ends with it.
pub fn add_fix(name: &str, suffix: &str) -> String {
    if name.ends_with(suffix) {
        name.to_string()
    } else {
        format!("{name}{suffix}")
    }
}

/// Strip `suffix` if present; otherwise return `name` unchanged.
pub fn remove_fix(name: &str, suffix: &str) -> String {
    name.strip_suffix(suffix).unwrap_or(name).to_string()
}

/// Reject anything that is not a plain `[A-Za-z_][A-Za-z0-9_]*` identifier.
///
/// Table keys, column keys and schema names are interpolated into SQL text
/// (they cannot be bound as parameters), so they must pass this check first.
pub fn validate_identifier(name: &str) -> Result<(), StorageError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidIdentifier(name.to_string()))
    }
}
