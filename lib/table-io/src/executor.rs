use async_trait::async_trait;

use crate::{SqlRow, StorageError, Value};

/// A single SQL session.
///
/// Statements run strictly one after another on one session, hence `&mut
/// self`. Implementations own retries and timeouts (if any); the adapter
/// only propagates their errors. A primary-key violation must surface as
/// [`StorageError::DuplicateKey`].
#[async_trait]
pub trait SqlExecutor: Send {
    /// Open the session.
    async fn connect(&mut self) -> Result<(), StorageError>;

    /// Run one statement with positional parameters and return its first
    /// result set (empty for statements that return no rows).
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Vec<SqlRow>, StorageError>;

    /// Close the session. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), StorageError>;
}
