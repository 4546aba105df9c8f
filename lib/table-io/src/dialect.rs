//! Statement generation interface.
//!
//! One implementation exists per SQL dialect. Identifiers (schema, table and
//! column keys) are validated and interpolated; every caller-supplied value
//! travels as a bound parameter.

use serde_json::Value as JsonValue;

use crate::{ColumnCfg, JsonValueType, Statement, StorageError, TableCfg, WhereClause};

pub trait StatementBuilder: Send + Sync {
    /// Native column type for an abstract type tag.
    fn json_to_sql_type(&self, column_type: JsonValueType) -> &'static str;

    /// Guarded CREATE TABLE; re-running it against an existing table is a no-op.
    fn create_table(&self, cfg: &TableCfg) -> Result<String, StorageError>;

    /// One additive ALTER per added column, in the given order.
    fn alter_table(
        &self,
        table_key: &str,
        added_columns: &[ColumnCfg],
    ) -> Result<Vec<String>, StorageError>;

    /// INSERT with one positional placeholder per column, in schema order.
    fn insert(&self, cfg: &TableCfg) -> Result<String, StorageError>;

    /// Conjunction of equality / `IS NULL` predicates over abstract column keys.
    fn where_clause(&self, predicate: &[(String, JsonValue)]) -> Result<WhereClause, StorageError>;

    /// SELECT of `columns` (all when `None`) filtered by `where_clause`.
    fn selection(
        &self,
        table_key: &str,
        columns: Option<&[String]>,
        where_clause: WhereClause,
    ) -> Result<Statement, StorageError>;

    /// Full table scan.
    fn all_data(&self, table_key: &str, columns: Option<&[String]>)
    -> Result<Statement, StorageError>;

    /// Returns one row with a boolean `tableExists` column.
    fn table_exists(&self, table_key: &str) -> Result<Statement, StorageError>;

    /// Returns one `tableKey` row (physical name) per table in the schema.
    fn table_keys(&self) -> Statement;

    /// Returns `columnKey` / `dataType` rows in ordinal order.
    fn column_keys(&self, table_key: &str) -> Result<Statement, StorageError>;

    /// Returns one row with an integer `totalCount` column.
    fn row_count(&self, table_key: &str) -> Result<Statement, StorageError>;

    /// Every row of the schema registry.
    fn table_cfgs(&self) -> Statement;

    /// Registry rows for one table key.
    fn table_cfgs_for_key(&self, table_key: &str) -> Statement;
}
