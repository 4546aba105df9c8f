//! tiberius implementation of SqlExecutor.

use async_trait::async_trait;
use table_io::{SqlExecutor, SqlRow, StorageError, Value};
use tiberius::error::Error as TdsError;
use tiberius::{Client, ColumnData, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::MsSqlConfig;

/// Violation of a PRIMARY KEY constraint.
const PRIMARY_KEY_VIOLATION: u32 = 2627;
/// Duplicate key in a unique index.
const UNIQUE_INDEX_VIOLATION: u32 = 2601;

type TdsClient = Client<Compat<TcpStream>>;

/// One SQL Server session over TCP.
pub struct MsSqlExecutor {
    config: MsSqlConfig,
    client: Option<TdsClient>,
}

impl MsSqlExecutor {
    pub fn new(config: MsSqlConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn config(&self) -> &MsSqlConfig {
        &self.config
    }

    fn client(&mut self) -> Result<&mut TdsClient, StorageError> {
        self.client.as_mut().ok_or(StorageError::ConnectionNotOpen)
    }
}

impl std::fmt::Debug for MsSqlExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsSqlExecutor")
            .field("config", &self.config)
            .field("connected", &self.client.is_some())
            .finish()
    }
}

fn map_error(e: TdsError) -> StorageError {
    match &e {
        TdsError::Server(token)
            if token.code() == PRIMARY_KEY_VIOLATION || token.code() == UNIQUE_INDEX_VIOLATION =>
        {
            StorageError::DuplicateKey(token.message().to_string())
        }
        _ => StorageError::StorageError(e.to_string()),
    }
}

fn bind_value(query: &mut Query<'_>, value: &Value) {
    match value {
        Value::String(s) => query.bind(s.clone()),
        Value::Int(n) => query.bind(*n),
        Value::Float(n) => query.bind(*n),
        Value::Bool(b) => query.bind(*b),
        Value::Null => query.bind(Option::<String>::None),
    }
}

fn column_value(data: ColumnData<'static>) -> Result<Value, StorageError> {
    let value = match data {
        ColumnData::U8(v) => v.map(|n| Value::Int(i64::from(n))),
        ColumnData::I16(v) => v.map(|n| Value::Int(i64::from(n))),
        ColumnData::I32(v) => v.map(|n| Value::Int(i64::from(n))),
        ColumnData::I64(v) => v.map(Value::Int),
        ColumnData::F32(v) => v.map(|n| Value::Float(f64::from(n))),
        ColumnData::F64(v) => v.map(Value::Float),
        ColumnData::Bit(v) => v.map(Value::Bool),
        ColumnData::String(v) => v.map(|s| Value::String(s.into_owned())),
        ColumnData::Guid(v) => v.map(|g| Value::String(g.to_string())),
        ColumnData::Numeric(v) => match v {
            Some(n) => Some(Value::Float(n.to_string().parse::<f64>().map_err(|e| {
                StorageError::StorageError(format!("Invalid numeric {n}: {e}"))
            })?)),
            None => None,
        },
        other => {
            return Err(StorageError::StorageError(format!(
                "Unsupported column data: {other:?}"
            )));
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn sql_row(row: Row) -> Result<SqlRow, StorageError> {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| Ok((name, column_value(data)?)))
        .collect()
}

#[async_trait]
impl SqlExecutor for MsSqlExecutor {
    async fn connect(&mut self) -> Result<(), StorageError> {
        if self.client.is_some() {
            return Ok(());
        }

        let config = self.config.to_tiberius()?;
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| StorageError::StorageError(e.to_string()))?;
        tcp.set_nodelay(true)
            .map_err(|e| StorageError::StorageError(e.to_string()))?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(map_error)?;
        debug!(database = ?self.config.database(), "Connected to SQL Server");
        self.client = Some(client);
        Ok(())
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>, StorageError> {
        let client = self.client()?;

        // Unparameterized batches run as plain SQL so `USE` sticks to the session
        let rows = if params.is_empty() {
            client
                .simple_query(sql)
                .await
                .map_err(map_error)?
                .into_first_result()
                .await
                .map_err(map_error)?
        } else {
            let mut query = Query::new(sql);
            for value in params {
                bind_value(&mut query, value);
            }
            query
                .query(client)
                .await
                .map_err(map_error)?
                .into_first_result()
                .await
                .map_err(map_error)?
        };

        rows.into_iter().map(sql_row).collect()
    }

    async fn close(&mut self) -> Result<(), StorageError> {
        if let Some(client) = self.client.take() {
            client
                .close()
                .await
                .map_err(|e| StorageError::StorageError(e.to_string()))?;
            debug!("Closed SQL Server connection");
        }
        Ok(())
    }
}
