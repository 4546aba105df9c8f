//! SQL Server statement generation.
//!
//! All table references are schema-qualified and bracket-quoted
//! (`[schema].[key_tbl]`). Keys are checked with [`validate_identifier`]
//! before they are interpolated; values are always bound as `@P1..@Pn`.

use serde_json::Value as JsonValue;
use table_io::{
    ColumnCfg, JsonValueType, NameMapping, Statement, StatementBuilder, StorageError, TableCfg,
    Value, WhereClause, validate_identifier,
};

use crate::types::{self, KEY_TEXT, TEXT};

/// Statement builder for one SQL Server schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsSqlStatements {
    schema_name: String,
}

/// Bracket-quote an identifier that already passed [`validate_identifier`].
pub fn quote(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Positional placeholder, 1-based.
pub fn placeholder(index: usize) -> String {
    format!("@P{index}")
}

impl MsSqlStatements {
    pub fn new(schema_name: impl Into<String>) -> Result<Self, StorageError> {
        let schema_name = schema_name.into();
        validate_identifier(&schema_name)?;
        Ok(Self { schema_name })
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    /// `[schema].[key_tbl]` for a table key.
    pub fn table_name(&self, table_key: &str) -> Result<String, StorageError> {
        validate_identifier(table_key)?;
        Ok(format!(
            "{}.{}",
            quote(&self.schema_name),
            quote(&NameMapping::add_table_suffix(table_key))
        ))
    }

    /// `[key_col]` for a column key.
    pub fn column_name(&self, column_key: &str) -> Result<String, StorageError> {
        validate_identifier(column_key)?;
        Ok(quote(&NameMapping::add_column_suffix(column_key)))
    }

    /// Native type of a column, bounded when the column takes part in a key.
    pub fn column_type(&self, column: &ColumnCfg) -> &'static str {
        let sql_type = types::json_to_sql_type(column.column_type);
        let is_key = column.key == NameMapping::PRIMARY_KEY_COLUMN || column.is_reference();
        if is_key && sql_type == TEXT {
            KEY_TEXT
        } else {
            sql_type
        }
    }

    /// One FOREIGN KEY constraint per reference column of `cfg`.
    pub fn foreign_keys(&self, cfg: &TableCfg) -> Result<Vec<String>, StorageError> {
        cfg.reference_columns()
            .filter_map(|column| {
                NameMapping::referenced_table(&column.key).map(|target| (column, target))
            })
            .map(|(column, target)| {
                let physical = NameMapping::add_column_suffix(&column.key);
                Ok(format!(
                    "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
                    quote(&format!("FK_{}_{}", cfg.key, physical)),
                    quote(&physical),
                    self.table_name(target)?,
                    quote(&NameMapping::add_column_suffix(
                        NameMapping::PRIMARY_KEY_COLUMN
                    )),
                ))
            })
            .collect()
    }

    fn column_list(&self, columns: Option<&[String]>) -> Result<String, StorageError> {
        match columns {
            None => Ok("*".to_string()),
            Some([]) => Ok("*".to_string()),
            Some(columns) => Ok(columns
                .iter()
                .map(|c| self.column_name(c))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")),
        }
    }
}

impl StatementBuilder for MsSqlStatements {
    fn json_to_sql_type(&self, column_type: JsonValueType) -> &'static str {
        types::json_to_sql_type(column_type)
    }

    fn create_table(&self, cfg: &TableCfg) -> Result<String, StorageError> {
        cfg.validate()?;

        let mut definitions = cfg
            .columns
            .iter()
            .map(|column| {
                format!(
                    "{} {}",
                    quote(&NameMapping::add_column_suffix(&column.key)),
                    self.column_type(column)
                )
            })
            .collect::<Vec<_>>();

        // standard primary key
        definitions.push(format!(
            "CONSTRAINT {} PRIMARY KEY ({})",
            quote(&format!("PK_{}", cfg.key)),
            quote(&NameMapping::add_column_suffix(
                NameMapping::PRIMARY_KEY_COLUMN
            ))
        ));
        definitions.extend(self.foreign_keys(cfg)?);

        Ok(format!(
            "IF NOT EXISTS (SELECT * FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = '{}' AND TABLE_SCHEMA = '{}')\nBEGIN\n  CREATE TABLE {} ({})\nEND",
            NameMapping::add_table_suffix(&cfg.key),
            self.schema_name,
            self.table_name(&cfg.key)?,
            definitions.join(", ")
        ))
    }

    fn alter_table(
        &self,
        table_key: &str,
        added_columns: &[ColumnCfg],
    ) -> Result<Vec<String>, StorageError> {
        let table = self.table_name(table_key)?;
        added_columns
            .iter()
            .map(|column| {
                let name = self.column_name(&column.key)?;
                Ok(format!(
                    "IF COL_LENGTH('{}.{}', '{}') IS NULL ALTER TABLE {} ADD {} {};",
                    self.schema_name,
                    NameMapping::add_table_suffix(table_key),
                    NameMapping::add_column_suffix(&column.key),
                    table,
                    name,
                    self.column_type(column)
                ))
            })
            .collect()
    }

    fn insert(&self, cfg: &TableCfg) -> Result<String, StorageError> {
        let columns = cfg
            .columns
            .iter()
            .map(|c| self.column_name(&c.key))
            .collect::<Result<Vec<_>, _>>()?;
        let placeholders: Vec<String> = (1..=columns.len()).map(placeholder).collect();

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_name(&cfg.key)?,
            columns.join(", "),
            placeholders.join(", ")
        ))
    }

    fn where_clause(&self, predicate: &[(String, JsonValue)]) -> Result<WhereClause, StorageError> {
        let mut clauses = Vec::with_capacity(predicate.len());
        let mut params = Vec::new();

        for (column, value) in predicate {
            let name = self.column_name(column)?;
            let param = match value {
                JsonValue::Null => {
                    clauses.push(format!("{name} IS NULL"));
                    continue;
                }
                JsonValue::String(s) => Value::String(s.clone()),
                JsonValue::Number(n) => match n.as_f64() {
                    Some(f) => Value::Float(f),
                    None => {
                        return Err(StorageError::UnsupportedValueType {
                            table: String::new(),
                            column: column.clone(),
                            expected: "finite number".to_string(),
                        });
                    }
                },
                JsonValue::Bool(b) => Value::Int(i64::from(*b)),
                JsonValue::Array(_) | JsonValue::Object(_) => {
                    Value::String(serde_json::to_string(value)?)
                }
            };
            params.push(param);
            clauses.push(format!("{name} = {}", placeholder(params.len())));
        }

        Ok(WhereClause {
            sql: clauses.join(" AND "),
            params,
        })
    }

    fn selection(
        &self,
        table_key: &str,
        columns: Option<&[String]>,
        where_clause: WhereClause,
    ) -> Result<Statement, StorageError> {
        let mut sql = format!(
            "SELECT {} FROM {}",
            self.column_list(columns)?,
            self.table_name(table_key)?
        );
        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause.sql);
        }
        Ok(Statement::with_params(sql, where_clause.params))
    }

    fn all_data(
        &self,
        table_key: &str,
        columns: Option<&[String]>,
    ) -> Result<Statement, StorageError> {
        self.selection(table_key, columns, WhereClause::default())
    }

    fn table_exists(&self, table_key: &str) -> Result<Statement, StorageError> {
        validate_identifier(table_key)?;
        Ok(Statement::with_params(
            format!(
                "SELECT CASE WHEN EXISTS (SELECT 1 FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = @P1 AND TABLE_SCHEMA = '{}') THEN CAST(1 AS BIT) ELSE CAST(0 AS BIT) END AS tableExists",
                self.schema_name
            ),
            vec![Value::String(NameMapping::add_table_suffix(table_key))],
        ))
    }

    fn table_keys(&self) -> Statement {
        Statement::new(format!(
            "SELECT TABLE_NAME AS tableKey FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_SCHEMA = '{}'",
            self.schema_name
        ))
    }

    fn column_keys(&self, table_key: &str) -> Result<Statement, StorageError> {
        validate_identifier(table_key)?;
        Ok(Statement::with_params(
            format!(
                "SELECT COLUMN_NAME AS columnKey, DATA_TYPE AS dataType FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = @P1 AND TABLE_SCHEMA = '{}' ORDER BY ORDINAL_POSITION",
                self.schema_name
            ),
            vec![Value::String(NameMapping::add_table_suffix(table_key))],
        ))
    }

    fn row_count(&self, table_key: &str) -> Result<Statement, StorageError> {
        Ok(Statement::new(format!(
            "SELECT COUNT(*) AS totalCount FROM {}",
            self.table_name(table_key)?
        )))
    }

    fn table_cfgs(&self) -> Statement {
        Statement::new(format!(
            "SELECT * FROM {}.{}",
            quote(&self.schema_name),
            quote(&NameMapping::add_table_suffix(NameMapping::TABLE_CFGS))
        ))
    }

    fn table_cfgs_for_key(&self, table_key: &str) -> Statement {
        let mut statement = self.table_cfgs();
        statement.sql.push_str(&format!(
            " WHERE {} = @P1",
            quote(&NameMapping::add_column_suffix("key"))
        ));
        statement.params.push(Value::String(table_key.to_string()));
        statement
    }
}
