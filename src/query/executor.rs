use crate::error::AppError;
use crate::query::{Record, Row, SelectQuery, WriteStep};
use async_trait::async_trait;

/// Query execution facility. Implementations own connections and SQL.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn fetch(&self, query: &SelectQuery<'_>) -> Result<Vec<Row>, AppError>;

    /// Rows matching the query's joins and filters, ignoring order/limit/offset.
    async fn count(&self, query: &SelectQuery<'_>) -> Result<u64, AppError>;

    /// Run every step atomically, in order. Returns the row each step wrote (or deleted);
    /// `None` when an update/delete matched nothing.
    async fn write(&self, steps: &[WriteStep<'_>]) -> Result<Vec<Option<Record>>, AppError>;
}
