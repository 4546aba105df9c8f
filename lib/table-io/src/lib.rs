//! Table IO - Core traits for content-addressed table storage.
//!
//! This crate describes tables of typed rows, identified by content hashes,
//! independently of the database that stores them. Backends translate the
//! abstract operations into their SQL dialect.
//!
//! # Core Concepts
//!
//! - **TableCfg**: Engine-independent schema: a table key plus an ordered,
//!   append-only list of typed columns. The `_hash` column is the primary key.
//! - **Content hash**: A stable identifier computed from a row's content,
//!   making writes idempotent.
//! - **Schema registry**: The `tableCfgs` table keeps every schema version
//!   ever created; the version with the most columns is current.
//! - **Physical names**: Table and column keys are suffixed (`_tbl`, `_col`)
//!   before they reach SQL.
//!
//! # Traits
//!
//! - [`Io`]: The storage interface backends implement
//! - [`StatementBuilder`]: Dialect-specific SQL generation
//! - [`SqlExecutor`]: A single SQL session executing statements

#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::unwrap_in_result,
        clippy::panic
    )
)]

mod dialect;
mod error;
mod executor;
mod hash;
mod io;
mod naming;
mod schema;
mod value;

pub use dialect::StatementBuilder;
pub use error::{RowFailure, StorageError};
pub use executor::SqlExecutor;
pub use hash::{compute_hash, hash_row, hash_table_cfg};
pub use io::{ConnectionConfig, Credentials, Dump, Io, TableDump, WriteBatch};
pub use naming::{NameMapping, add_fix, remove_fix, validate_identifier};
pub use schema::{ColumnCfg, ContentType, JsonValueType, Row, TableCfg};
pub use value::{SqlRow, Statement, Value, WhereClause};
