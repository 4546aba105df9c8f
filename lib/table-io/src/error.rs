use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Unknown JsonValueType: {0}")]
    UnknownType(String),

    #[error("Table {0} has no _hash column")]
    MissingHashColumn(String),

    #[error("Invalid schema for table {table}: {reason}")]
    InvalidSchema { table: String, reason: String },

    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Unsupported column type {column_type} for column {column} in table {table}")]
    UnsupportedColumnType {
        table: String,
        column: String,
        column_type: String,
    },

    #[error("Unsupported value type for column {column} in table {table}: expected {expected}")]
    UnsupportedValueType {
        table: String,
        column: String,
        expected: String,
    },

    #[error("Connection is not open")]
    ConnectionNotOpen,

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Writing {} row(s) failed: {}", .0.len(), RowFailures(.0))]
    BatchWrite(Vec<RowFailure>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    StorageError(String),
}

/// A single rejected row of a batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub table: String,
    pub hash: String,
    pub reason: String,
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.table, self.hash, self.reason)
    }
}

struct RowFailures<'a>(&'a [RowFailure]);

impl fmt::Display for RowFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_write_names_every_row() {
        let err = StorageError::BatchWrite(vec![
            RowFailure {
                table: "cars".into(),
                hash: "h1".into(),
                reason: "boom".into(),
            },
            RowFailure {
                table: "wheels".into(),
                hash: "h2".into(),
                reason: "bang".into(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Writing 2 row(s) failed: cars/h1: boom; wheels/h2: bang"
        );
    }
}
