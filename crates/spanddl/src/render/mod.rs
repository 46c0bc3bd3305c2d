//! DDL statement builders, one per dialect.
//!
//! Both builders render the same [`MigrationAction`]s; they differ only in
//! quoting, type names and a few clause spellings.

use indexmap::IndexMap;

use crate::Result;
use crate::config::{Config, Dialect};
use crate::diff::MigrationAction;

mod googlesql;
mod postgres;

pub use googlesql::GoogleSqlDialect;
pub use postgres::PostgresDialect;

/// One statement ready to send.
///
/// Administrative DDL takes no bind parameters, so `params` is always
/// empty; it is kept so callers can treat DDL like any other statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub params: IndexMap<String, String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: IndexMap::new(),
        }
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Renders actions as DDL text.
pub trait DdlDialect: Send + Sync {
    /// Which dialect this builder writes.
    fn dialect(&self) -> Dialect;

    /// Render one action as one statement.
    fn render(&self, action: &MigrationAction) -> Result<Statement>;
}

/// The statement builder selected by `config.dialect`.
pub fn for_config(config: &Config) -> Box<dyn DdlDialect> {
    match config.dialect {
        Dialect::GoogleSql => Box::new(GoogleSqlDialect::new(config.database.clone())),
        Dialect::PostgreSql => Box::new(PostgresDialect::new(config.database.clone())),
    }
}
