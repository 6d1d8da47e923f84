//! Database collaborator
//!
//! SQL rendering and connectivity live outside the compiler. A database
//! turns a relational query into dialect SQL and runs it; rows are pulled one
//! at a time from a cursor that owns its connection and releases it when
//! dropped.

use crate::calculus::{RelationalQuery, Row, VarId};
use thiserror::Error;

/// Database errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatabaseError {
    /// The query cannot be expressed in the dialect
    #[error("SQL generation failed: {0}")]
    Generation(String),

    /// Connecting or running the statement failed
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Reading a row failed
    #[error("Row read failed: {0}")]
    Read(String),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Pull-based row iterator over one statement's results
pub trait RowCursor {
    /// Next row keyed by the requested columns; `None` at the end
    fn next_row(&mut self) -> DatabaseResult<Option<Row>>;
}

/// SQL dialect and connectivity
pub trait Database: Send + Sync {
    /// Render a relational query as SQL text
    fn generate_sql(&self, query: &RelationalQuery) -> DatabaseResult<String>;

    /// Run SQL whose result columns are, in order, the aliases of `columns`
    fn execute(&self, sql: &str, columns: &[VarId]) -> DatabaseResult<Box<dyn RowCursor + '_>>;
}
