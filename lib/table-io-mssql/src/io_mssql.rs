//! SQL Server implementation of Io.

use std::collections::BTreeMap;

use async_trait::async_trait;
use table_io::{
    ColumnCfg, Dump, Io, NameMapping, Row, RowFailure, SqlExecutor, SqlRow, Statement,
    StatementBuilder, StorageError, TableCfg, TableDump, Value, WriteBatch, hash_row,
    validate_identifier,
};
use tracing::{debug, info, warn};

use crate::evolution::{self, EvolutionPlan};
use crate::{MsSqlConfig, MsSqlExecutor, MsSqlStatements, codec, types};

/// Lifecycle of an [`IoMssql`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Ready,
    /// Terminal.
    Closed,
}

/// Content-addressed tables in one SQL Server schema.
///
/// Runs every statement on a single session, one at a time.
#[derive(Debug)]
pub struct IoMssql<E: SqlExecutor, S: StatementBuilder = MsSqlStatements> {
    executor: E,
    statements: S,
    state: ConnectionState,
}

impl IoMssql<MsSqlExecutor> {
    /// A SQL Server session for `config`, storing tables in `schema_name`.
    pub fn from_config(config: MsSqlConfig, schema_name: &str) -> Result<Self, StorageError> {
        Self::new(MsSqlExecutor::new(config), schema_name)
    }
}

impl<E: SqlExecutor> IoMssql<E> {
    pub fn new(executor: E, schema_name: &str) -> Result<Self, StorageError> {
        Ok(Self::with_statements(executor, MsSqlStatements::new(schema_name)?))
    }
}

impl<E: SqlExecutor, S: StatementBuilder> IoMssql<E, S> {
    pub fn with_statements(executor: E, statements: S) -> Self {
        Self {
            executor,
            statements,
            state: ConnectionState::Unconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn statements(&self) -> &S {
        &self.statements
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    fn ready(&self) -> Result<(), StorageError> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            _ => Err(StorageError::ConnectionNotOpen),
        }
    }

    async fn run(&mut self, statement: &Statement) -> Result<Vec<SqlRow>, StorageError> {
        debug!(sql = %statement.sql, params = statement.params.len(), "Executing statement");
        self.executor
            .execute(&statement.sql, &statement.params)
            .await
    }

    /// Insert one schema version into the registry. Returns `false` when
    /// that exact version was already registered.
    async fn register(&mut self, cfg: &TableCfg) -> Result<bool, StorageError> {
        let registry = TableCfg::table_cfgs();
        let row = evolution::registry_row(cfg)?;
        let statement = Statement::with_params(
            self.statements.insert(&registry)?,
            codec::serialize_row(&row, &registry)?,
        );

        match self.run(&statement).await {
            Ok(_) => Ok(true),
            Err(StorageError::DuplicateKey(_)) => {
                debug!(table = %cfg.key, "Schema version already registered");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn registered_versions(
        &mut self,
        table_key: Option<&str>,
    ) -> Result<Vec<TableCfg>, StorageError> {
        let statement = match table_key {
            Some(key) => self.statements.table_cfgs_for_key(key),
            None => self.statements.table_cfgs(),
        };
        self.run(&statement)
            .await?
            .iter()
            .map(evolution::decode_registry_row)
            .collect()
    }

    /// Current schema of `table_key`, if registered.
    pub async fn table_cfg(&mut self, table_key: &str) -> Result<Option<TableCfg>, StorageError> {
        self.ready()?;
        validate_identifier(table_key)?;
        let versions = self.registered_versions(Some(table_key)).await?;
        Ok(evolution::current_table_cfg(&versions).cloned())
    }

    async fn require_table_cfg(&mut self, table_key: &str) -> Result<TableCfg, StorageError> {
        self.table_cfg(table_key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("table {table_key}")))
    }

    /// Abstract keys of the tables physically present in the schema.
    pub async fn table_keys(&mut self) -> Result<Vec<String>, StorageError> {
        self.ready()?;
        let statement = self.statements.table_keys();
        Ok(self
            .run(&statement)
            .await?
            .iter()
            .filter_map(|row| row.get("tableKey").and_then(Value::as_str))
            .map(NameMapping::remove_table_suffix)
            .collect())
    }

    /// Live columns of a table as reported by the server.
    ///
    /// JSON flavours are not visible to the server, so every text column
    /// comes back as `string`.
    pub async fn describe_table(
        &mut self,
        table_key: &str,
    ) -> Result<Vec<ColumnCfg>, StorageError> {
        self.ready()?;
        let statement = self.statements.column_keys(table_key)?;
        let rows = self.run(&statement).await?;
        if rows.is_empty() {
            return Err(StorageError::NotFound(format!("table {table_key}")));
        }

        rows.iter()
            .map(|row| {
                let name = row.get("columnKey").and_then(Value::as_str).unwrap_or_default();
                let data_type = row.get("dataType").and_then(Value::as_str).unwrap_or_default();
                Ok(ColumnCfg::new(
                    NameMapping::remove_column_suffix(name),
                    types::sql_to_json_type(data_type)?,
                ))
            })
            .collect()
    }

    async fn check_references(&mut self, cfg: &TableCfg) -> Result<(), StorageError> {
        for column in cfg.reference_columns() {
            let Some(target) = NameMapping::referenced_table(&column.key) else {
                continue;
            };
            if target != cfg.key && self.table_cfg(target).await?.is_none() {
                return Err(StorageError::NotFound(format!(
                    "table {target} referenced by {}.{}",
                    cfg.key, column.key
                )));
            }
        }
        Ok(())
    }

    async fn dump_cfg(&mut self, cfg: &TableCfg) -> Result<TableDump, StorageError> {
        let statement = self.statements.all_data(&cfg.key, None)?;
        let rows = self.run(&statement).await?;
        Ok(TableDump {
            content_type: cfg.content_type,
            data: codec::parse_data(&rows, cfg)?,
        })
    }
}

#[async_trait]
impl<E: SqlExecutor, S: StatementBuilder> Io for IoMssql<E, S> {
    async fn init(&mut self) -> Result<(), StorageError> {
        match self.state {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Closed => return Err(StorageError::ConnectionNotOpen),
            ConnectionState::Unconnected => {}
        }

        self.executor.connect().await?;

        let registry = TableCfg::table_cfgs();
        let create = Statement::new(self.statements.create_table(&registry)?);
        self.run(&create).await?;
        self.register(&registry).await?;

        self.state = ConnectionState::Ready;
        info!("Table storage ready");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if self.state == ConnectionState::Ready {
            self.executor.close().await?;
            info!("Table storage closed");
        }
        self.state = ConnectionState::Closed;
        Ok(())
    }

    fn is_ready(&self) -> Result<(), StorageError> {
        self.ready()
    }

    async fn create_or_extend_table(&mut self, cfg: &TableCfg) -> Result<(), StorageError> {
        self.ready()?;
        cfg.validate()?;

        let current = self.table_cfg(&cfg.key).await?;
        match evolution::plan(&self.statements, current.as_ref(), cfg)? {
            EvolutionPlan::Create { sql, registry } => {
                self.check_references(cfg).await?;
                self.run(&Statement::new(sql)).await?;
                self.register(&registry).await?;
                info!(table = %cfg.key, columns = cfg.columns.len(), "Created table");
            }
            EvolutionPlan::Extend {
                added,
                statements,
                registry,
            } => {
                self.check_references(cfg).await?;
                // register last; the ALTERs are guarded and re-run on retry
                for sql in statements {
                    self.run(&Statement::new(sql)).await?;
                }
                self.register(&registry).await?;
                info!(
                    table = %cfg.key,
                    added = ?added.iter().map(|c| c.key.as_str()).collect::<Vec<_>>(),
                    "Extended table"
                );
            }
            EvolutionPlan::Unchanged => {}
        }
        Ok(())
    }

    async fn write(&mut self, batch: &WriteBatch) -> Result<(), StorageError> {
        self.ready()?;

        let versions = self.registered_versions(None).await?;
        let cfgs: BTreeMap<String, TableCfg> = evolution::current_table_cfgs(&versions)
            .into_iter()
            .map(|cfg| (cfg.key.clone(), cfg))
            .collect();

        // validate everything before the first insert
        let tables: Vec<&str> = batch.keys().map(String::as_str).collect();
        let mut inserts = Vec::new();
        for table in evolution::insert_order(&tables, &cfgs) {
            let cfg = cfgs
                .get(table)
                .ok_or_else(|| StorageError::NotFound(format!("table {table}")))?;
            let rows = batch.get(table).map(Vec::as_slice).unwrap_or_default();
            let sql = self.statements.insert(cfg)?;
            for row in rows {
                codec::check_row(cfg, row)?;
                let mut row = row.clone();
                let hash = hash_row(&mut row)?;
                let params = codec::serialize_row(&row, cfg)?;
                inserts.push((table, hash, Statement::with_params(sql.clone(), params)));
            }
        }

        let mut failures = Vec::new();
        let mut inserted = 0usize;
        let mut skipped = 0usize;
        for (table, hash, statement) in inserts {
            match self.run(&statement).await {
                Ok(_) => inserted += 1,
                Err(StorageError::DuplicateKey(_)) => {
                    debug!(table, hash = %hash, "Row already stored");
                    skipped += 1;
                }
                Err(e) => {
                    warn!(table, hash = %hash, error = %e, "Row write failed");
                    failures.push(RowFailure {
                        table: table.to_string(),
                        hash,
                        reason: e.to_string(),
                    });
                }
            }
        }

        debug!(inserted, skipped, failed = failures.len(), "Batch written");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(StorageError::BatchWrite(failures))
        }
    }

    async fn read_rows(&mut self, table: &str, predicate: &Row) -> Result<Vec<Row>, StorageError> {
        let cfg = self.require_table_cfg(table).await?;
        let pairs = codec::predicate_pairs(&cfg, predicate)?;
        let where_clause = self.statements.where_clause(&pairs)?;
        let statement = self.statements.selection(table, None, where_clause)?;
        let rows = self.run(&statement).await?;
        codec::parse_data(&rows, &cfg)
    }

    async fn dump(&mut self) -> Result<Dump, StorageError> {
        let mut dump = Dump::new();
        for cfg in self.table_cfgs().await? {
            let table = self.dump_cfg(&cfg).await?;
            dump.insert(cfg.key.clone(), table);
        }
        Ok(dump)
    }

    async fn dump_table(&mut self, table: &str) -> Result<TableDump, StorageError> {
        let cfg = self.require_table_cfg(table).await?;
        self.dump_cfg(&cfg).await
    }

    async fn table_exists(&mut self, table: &str) -> Result<bool, StorageError> {
        self.ready()?;
        let statement = self.statements.table_exists(table)?;
        let rows = self.run(&statement).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("tableExists"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn row_count(&mut self, table: &str) -> Result<u64, StorageError> {
        self.require_table_cfg(table).await?;
        let statement = self.statements.row_count(table)?;
        let rows = self.run(&statement).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("totalCount"))
            .and_then(Value::as_i64)
            .ok_or_else(|| StorageError::StorageError(format!("no row count for {table}")))?;
        u64::try_from(count).map_err(|e| StorageError::StorageError(e.to_string()))
    }

    async fn table_cfgs(&mut self) -> Result<Vec<TableCfg>, StorageError> {
        let versions = self.raw_table_cfgs().await?;
        Ok(evolution::current_table_cfgs(&versions))
    }

    async fn raw_table_cfgs(&mut self) -> Result<Vec<TableCfg>, StorageError> {
        self.ready()?;
        self.registered_versions(None).await
    }
}
