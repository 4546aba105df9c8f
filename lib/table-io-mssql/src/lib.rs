//! SQL Server implementation for table-io.
//!
//! [`IoMssql`] stores content-addressed tables in one SQL Server schema. It
//! builds statements with [`MsSqlStatements`], runs them through any
//! [`SqlExecutor`] (normally [`MsSqlExecutor`], a tiberius session) and
//! decodes result rows with the [`codec`].
//!
//! # Usage
//!
//! ```text
//! use table_io_mssql::{IoMssql, MsSqlConfig, Io, TableCfg, ContentType, JsonValueType};
//!
//! let mut io = IoMssql::from_config(MsSqlConfig::new(credentials), "app")?;
//! io.init().await?;
//! io.create_or_extend_table(
//!     &TableCfg::new("cars", ContentType::Components)
//!         .with_column("brand", JsonValueType::String),
//! )
//! .await?;
//! ```
//!
//! Provisioning (databases, schemas, logins, users) lives in [`admin`].

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

pub mod admin;
pub mod codec;
mod config;
pub mod evolution;
mod executor;
mod io_mssql;
pub mod script;
mod statements;
pub mod types;

pub use admin::DbAdmin;
pub use config::{ADMIN_PORT, MsSqlConfig, admin_config, admin_credentials};
pub use evolution::EvolutionPlan;
pub use executor::MsSqlExecutor;
pub use io_mssql::{ConnectionState, IoMssql};
pub use script::run_script;
pub use statements::{MsSqlStatements, placeholder, quote};

// Re-export core types for convenience
pub use table_io::{
    ColumnCfg, ConnectionConfig, ContentType, Credentials, Dump, Io, JsonValueType, NameMapping,
    Row, RowFailure, SqlExecutor, SqlRow, Statement, StatementBuilder, StorageError, TableCfg,
    TableDump, Value, WhereClause, WriteBatch, compute_hash, hash_row, hash_table_cfg,
};
