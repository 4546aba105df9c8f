//! The generic table-storage interface and its connection configuration.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ContentType, Row, StorageError, TableCfg};

/// Connection configuration for database backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionConfig {
    /// Connect using a connection string.
    Url(String),
    /// Connect using discrete settings.
    Credentials(Credentials),
}

impl From<&str> for ConnectionConfig {
    fn from(url: &str) -> Self {
        ConnectionConfig::Url(url.to_string())
    }
}

impl From<String> for ConnectionConfig {
    fn from(url: String) -> Self {
        ConnectionConfig::Url(url)
    }
}

impl From<&String> for ConnectionConfig {
    fn from(url: &String) -> Self {
        ConnectionConfig::Url(url.clone())
    }
}

impl From<Credentials> for ConnectionConfig {
    fn from(credentials: Credentials) -> Self {
        ConnectionConfig::Credentials(credentials)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub trust_server_certificate: bool,
}

fn default_port() -> u16 {
    1433
}

fn default_database() -> String {
    "master".to_string()
}

/// Contents of one table as returned by [`Io::dump_table`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDump {
    #[serde(rename = "_type")]
    pub content_type: ContentType,
    #[serde(rename = "_data")]
    pub data: Vec<Row>,
}

/// Table key to table contents.
pub type Dump = BTreeMap<String, TableDump>;

/// Rows to write, grouped by table key.
pub type WriteBatch = BTreeMap<String, Vec<Row>>;

/// Engine-agnostic storage of content-addressed tables.
///
/// Lifecycle: unconnected, then [`init`](Io::init) makes it ready, then
/// [`close`](Io::close) ends it for good. Every other operation fails with
/// [`StorageError::ConnectionNotOpen`] unless the instance is ready.
#[async_trait]
pub trait Io: Send {
    /// Connect and make sure the schema registry exists.
    async fn init(&mut self) -> Result<(), StorageError>;

    async fn close(&mut self) -> Result<(), StorageError>;

    /// `Ok` when ready, [`StorageError::ConnectionNotOpen`] otherwise.
    fn is_ready(&self) -> Result<(), StorageError>;

    fn is_open(&self) -> bool {
        self.is_ready().is_ok()
    }

    /// Create a table, or add the columns `cfg` appends to its current schema.
    async fn create_or_extend_table(&mut self, cfg: &TableCfg) -> Result<(), StorageError>;

    /// Insert rows. Rows whose hash already exists are skipped silently.
    async fn write(&mut self, batch: &WriteBatch) -> Result<(), StorageError>;

    /// Rows of `table` whose columns equal every entry of `predicate`.
    async fn read_rows(&mut self, table: &str, predicate: &Row) -> Result<Vec<Row>, StorageError>;

    /// Every table, registry included.
    async fn dump(&mut self) -> Result<Dump, StorageError>;

    async fn dump_table(&mut self, table: &str) -> Result<TableDump, StorageError>;

    async fn table_exists(&mut self, table: &str) -> Result<bool, StorageError>;

    async fn row_count(&mut self, table: &str) -> Result<u64, StorageError>;

    /// Current schema of every table.
    async fn table_cfgs(&mut self) -> Result<Vec<TableCfg>, StorageError>;

    /// Every schema version ever registered.
    async fn raw_table_cfgs(&mut self) -> Result<Vec<TableCfg>, StorageError>;
}
