//! Schema reconciliation for databases whose DDL runs as administrative
//! operations.
//!
//! Given a desired [`Schema`], spanddl reads the live schema from the
//! catalog, computes the actions that close the gap, renders them in the
//! GoogleSQL or PostgreSQL dialect and sends them as one DDL batch.
//!
//! ```ignore
//! use spanddl::{Config, Dialect, Migrator};
//! use spanddl_schema::{ColumnDescriptor, LogicalType, Schema, TableDescriptor};
//!
//! let singers = TableDescriptor::new("singers")
//!     .column(ColumnDescriptor::new("id", LogicalType::Int64).not_null().auto_increment())
//!     .column(ColumnDescriptor::new("name", LogicalType::String).length(200))
//!     .primary_key(&["id"]);
//! let desired = Schema::from_tables([singers])?;
//!
//! let mut migrator = Migrator::from_pool(&pool, Config::new(Dialect::PostgreSql)).await?;
//! let plan = migrator.auto_migrate(&desired).await?;
//! println!("{plan}");
//! ```
//!
//! # Batches
//!
//! By default every statement of a plan goes into one `START BATCH DDL` /
//! `RUN BATCH` pair, so the change applies as a single operation. A batch
//! that is not committed is aborted, including on error, timeout and
//! cancellation. With [`Config::disable_batching`] statements are sent one
//! at a time and a failure leaves the earlier ones applied.
//!
//! # Re-running
//!
//! Reconciling against a database that already matches gives an empty plan
//! and sends nothing.

mod catalog;
mod config;
mod diff;
mod error;
mod executor;
#[cfg(test)]
mod fake;
mod introspect;
mod mapper;
mod migrator;
mod render;
mod session;
mod solver;
mod traced;

pub use catalog::{
    CatalogRows, CatalogSource, ColumnRecord, ForeignKeyRecord, IndexColumnRecord,
    SequenceRecord, TableRecord, fetch_rows,
};
pub use config::{Config, Dialect, GENERATED_ID_COLUMN};
pub use diff::{ColumnDefault, MigrationAction, Plan, normalize_desired, plan, plan_drop};
pub use error::Error;
pub use executor::{DdlConnection, ExecutionMode, execute, stop_signal};
pub use introspect::{LiveSchema, assemble, introspect, sequence_from_default};
pub use mapper::{
    defaults_equivalent, logical_type, normalize_default, physical_type,
    reject_unique_constraints, types_equivalent,
};
pub use migrator::Migrator;
pub use render::{DdlDialect, GoogleSqlDialect, PostgresDialect, Statement, for_config};
pub use session::PgSession;
pub use solver::{SolverError, VirtualSchema, apply_actions, order_tables};
pub use traced::{BoxFuture, Connection, ConnectionExt, TracedConn};

// Re-export descriptor types for convenience
pub use spanddl_schema::{
    ColumnDescriptor, ForeignKeyDescriptor, GeneratedColumn, IndexColumn, IndexDescriptor,
    Interleave, LogicalType, PRIMARY_KEY_INDEX, Schema, SchemaError, SequenceDescriptor,
    SequenceKind, SortOrder, TableDescriptor,
};

pub type Result<T> = std::result::Result<T, Error>;
