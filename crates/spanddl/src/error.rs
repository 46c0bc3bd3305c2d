use std::time::Duration;

use spanddl_schema::SchemaError;
use thiserror::Error;

use crate::solver::SolverError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("unexpected catalog data: {0}")]
    Catalog(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),

    /// The database only supports unique indexes, never UNIQUE constraints.
    #[error(
        "unique constraints are not supported on {table}.{column}, declare a unique index instead"
    )]
    UniqueConstraintNotSupported { table: String, column: String },

    #[error("foreign keys form a dependency cycle between tables: {}", .tables.join(" -> "))]
    DependencyCycle { tables: Vec<String> },

    #[error("action list cannot be applied: {0}")]
    Unorderable(#[from] SolverError),

    #[error("index {index} is not declared on table {table}")]
    IndexNotDeclared { table: String, index: String },

    #[error("statement rejected: {message}\n  statement: {statement}")]
    Execution { statement: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("schema reconciliation was cancelled")]
    Cancelled,

    #[error("schema reconciliation did not finish within {0:?}")]
    Timeout(Duration),
}
