//! In-memory SQL Server stand-in.
//!
//! Interprets exactly the statement shapes `MsSqlStatements` emits and keeps
//! tables in a shared [`MemoryDb`], so tests can inspect what was executed.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use regex::Regex;
use table_io_mssql::{SqlExecutor, SqlRow, StorageError, Value};

#[derive(Debug, Default)]
pub struct Table {
    /// Physical column name and `DATA_TYPE`, in ordinal order.
    pub columns: Vec<(String, String)>,
    /// Physical column name and referenced physical table name.
    pub foreign_keys: Vec<(String, String)>,
    pub rows: Vec<SqlRow>,
}

#[derive(Debug, Default)]
pub struct State {
    pub tables: BTreeMap<String, Table>,
    /// Every statement received, in order.
    pub log: Vec<String>,
    /// Inserts binding this string fail with a server error.
    pub poison: Option<String>,
}

impl State {
    /// Statements in the log starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.log.iter().filter(|sql| sql.starts_with(prefix)).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryDb(Arc<Mutex<State>>);

impl MemoryDb {
    pub fn executor(&self) -> MemoryExecutor {
        MemoryExecutor {
            db: self.clone(),
            connected: false,
        }
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.0.lock().unwrap()
    }

    pub fn rows(&self, table: &str) -> usize {
        self.state()
            .tables
            .get(table)
            .map(|t| t.rows.len())
            .unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct MemoryExecutor {
    db: MemoryDb,
    connected: bool,
}

fn server_error(message: impl Into<String>) -> StorageError {
    StorageError::StorageError(message.into())
}

fn data_type(native: &str) -> String {
    native
        .split('(')
        .next()
        .unwrap()
        .to_ascii_lowercase()
}

fn param<'a>(params: &'a [Value], marker: &str) -> &'a Value {
    let index: usize = marker.trim_start_matches("@P").parse().unwrap();
    &params[index - 1]
}

fn equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Null, _) | (_, Value::Null) => false,
        _ => match (to_f64(left), to_f64(right)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn row(entries: Vec<(&str, Value)>) -> SqlRow {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

impl State {
    fn table(&self, name: &str) -> Result<&Table, StorageError> {
        self.tables
            .get(name)
            .ok_or_else(|| server_error(format!("Invalid object name '{name}'")))
    }

    fn run(&mut self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>, StorageError> {
        let create = Regex::new(r"(?s)CREATE TABLE \[\w+\]\.\[(\w+)\] \((.*)\)\nEND$").unwrap();
        let column_def = Regex::new(r"\[(\w+)\] (NVARCHAR\(\w+\)|FLOAT|BIT)").unwrap();
        let foreign_key = Regex::new(
            r"CONSTRAINT \[\w+\] FOREIGN KEY \(\[(\w+)\]\) REFERENCES \[\w+\]\.\[(\w+)\] \(\[_hash_col\]\)",
        )
        .unwrap();
        let alter =
            Regex::new(r"ALTER TABLE \[\w+\]\.\[(\w+)\] ADD \[(\w+)\] (NVARCHAR\(\w+\)|FLOAT|BIT);$")
                .unwrap();
        let insert =
            Regex::new(r"^INSERT INTO \[\w+\]\.\[(\w+)\] \((.*)\) VALUES \((.*)\)$").unwrap();
        let select = Regex::new(r"^SELECT \* FROM \[\w+\]\.\[(\w+)\](?: WHERE (.*))?$").unwrap();
        let count = Regex::new(r"^SELECT COUNT\(\*\) AS totalCount FROM \[\w+\]\.\[(\w+)\]$").unwrap();
        let condition = Regex::new(r"^\[(\w+)\] (?:= (@P\d+)|IS NULL)$").unwrap();

        if sql.starts_with("USE ") {
            return Ok(Vec::new());
        }

        if let Some(caps) = create.captures(sql) {
            let name = caps[1].to_string();
            if !self.tables.contains_key(&name) {
                let columns = column_def
                    .captures_iter(&caps[2])
                    .map(|c| (c[1].to_string(), data_type(&c[2])))
                    .collect();
                let foreign_keys = foreign_key
                    .captures_iter(&caps[2])
                    .map(|c| (c[1].to_string(), c[2].to_string()))
                    .collect();
                self.tables.insert(
                    name,
                    Table {
                        columns,
                        foreign_keys,
                        rows: Vec::new(),
                    },
                );
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = alter.captures(sql) {
            let table = self
                .tables
                .get_mut(&caps[1])
                .ok_or_else(|| server_error("Cannot find the object"))?;
            if !table.columns.iter().any(|(name, _)| name == &caps[2]) {
                table.columns.push((caps[2].to_string(), data_type(&caps[3])));
            }
            return Ok(Vec::new());
        }

        if let Some(caps) = insert.captures(sql) {
            if let Some(poison) = &self.poison {
                if params.iter().any(|p| p.as_str() == Some(poison.as_str())) {
                    return Err(server_error("Conversion failed"));
                }
            }
            let name = caps[1].to_string();
            let names: Vec<String> = caps[2]
                .split(", ")
                .map(|c| c.trim_matches(['[', ']']).to_string())
                .collect();
            let markers: Vec<&str> = caps[3].split(", ").collect();
            let table = self.table(&name)?;

            let mut new_row = SqlRow::new();
            for (column, marker) in names.iter().zip(&markers) {
                if !table.columns.iter().any(|(c, _)| c == column) {
                    return Err(server_error(format!("Invalid column name '{column}'")));
                }
                new_row.insert(column.clone(), param(params, marker).clone());
            }

            for (column, target) in &table.foreign_keys {
                let value = new_row.get(column).unwrap_or(&Value::Null);
                if value.is_null() {
                    continue;
                }
                let self_reference = *target == name
                    && new_row.get("_hash_col").is_some_and(|h| equal(h, value));
                let stored = self.table(target)?.rows.iter().any(|r| {
                    r.get("_hash_col").is_some_and(|h| equal(h, value))
                });
                if !stored && !self_reference {
                    return Err(server_error(format!(
                        "The INSERT statement conflicted with the FOREIGN KEY constraint on {column}"
                    )));
                }
            }

            let table = self.tables.get_mut(&name).unwrap();
            let key = new_row.get("_hash_col").cloned().unwrap_or(Value::Null);
            if table
                .rows
                .iter()
                .any(|r| r.get("_hash_col").is_some_and(|h| equal(h, &key)))
            {
                return Err(StorageError::DuplicateKey(format!(
                    "Violation of PRIMARY KEY constraint in {name}"
                )));
            }
            table.rows.push(new_row);
            return Ok(Vec::new());
        }

        if let Some(caps) = count.captures(sql) {
            let total = self.table(&caps[1])?.rows.len() as i64;
            return Ok(vec![row(vec![("totalCount", Value::Int(total))])]);
        }

        if let Some(caps) = select.captures(sql) {
            let table = self.table(&caps[1])?;
            let conditions: Vec<(String, Option<Value>)> = match caps.get(2) {
                None => Vec::new(),
                Some(clause) => clause
                    .as_str()
                    .split(" AND ")
                    .map(|part| {
                        let c = condition.captures(part).expect("condition shape");
                        (
                            c[1].to_string(),
                            c.get(2).map(|m| param(params, m.as_str()).clone()),
                        )
                    })
                    .collect(),
            };

            return Ok(table
                .rows
                .iter()
                .filter(|r| {
                    conditions.iter().all(|(column, expected)| {
                        let actual = r.get(column).unwrap_or(&Value::Null);
                        match expected {
                            None => actual.is_null(),
                            Some(expected) => equal(actual, expected),
                        }
                    })
                })
                .map(|r| {
                    // columns added later read as NULL
                    table
                        .columns
                        .iter()
                        .map(|(c, _)| (c.clone(), r.get(c).cloned().unwrap_or(Value::Null)))
                        .collect()
                })
                .collect());
        }

        if sql.contains("AS tableExists") {
            let name = param(params, "@P1").as_str().unwrap();
            return Ok(vec![row(vec![(
                "tableExists",
                Value::Bool(self.tables.contains_key(name)),
            )])]);
        }

        if sql.contains("AS tableKey") {
            return Ok(self
                .tables
                .keys()
                .map(|name| row(vec![("tableKey", Value::String(name.clone()))]))
                .collect());
        }

        if sql.contains("AS columnKey") {
            let name = param(params, "@P1").as_str().unwrap();
            return Ok(self
                .tables
                .get(name)
                .map(|t| {
                    t.columns
                        .iter()
                        .map(|(c, dt)| {
                            row(vec![
                                ("columnKey", Value::String(c.clone())),
                                ("dataType", Value::String(dt.clone())),
                            ])
                        })
                        .collect()
                })
                .unwrap_or_default());
        }

        Err(server_error(format!("Unsupported statement: {sql}")))
    }
}

#[async_trait]
impl SqlExecutor for MemoryExecutor {
    async fn connect(&mut self) -> Result<(), StorageError> {
        self.connected = true;
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>, StorageError> {
        if !self.connected {
            return Err(StorageError::ConnectionNotOpen);
        }
        let mut state = self.db.state();
        state.log.push(sql.to_string());
        state.run(sql, params)
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        self.connected = false;
        Ok(())
    }
}
