//! Reconciliation settings.
//!
//! A [`Config`] is passed explicitly to the migrator; nothing is read from
//! global state once it is built.

use std::time::Duration;

use spanddl_schema::SequenceKind;

use crate::Error;

/// Which DDL dialect statements are rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Backtick-quoted identifiers, `STRING(MAX)`, `PRIMARY KEY` after the column list
    #[default]
    GoogleSql,
    /// Double-quoted identifiers, PostgreSQL type names
    PostgreSql,
}

impl Dialect {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "googlesql" | "google_standard_sql" | "gsql" => Some(Dialect::GoogleSql),
            "postgresql" | "postgres" | "pg" => Some(Dialect::PostgreSql),
            _ => None,
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::GoogleSql => write!(f, "googlesql"),
            Dialect::PostgreSql => write!(f, "postgresql"),
        }
    }
}

/// Name of the primary key column added by [`Config::auto_add_primary_key`].
pub const GENERATED_ID_COLUMN: &str = "spanddl_generated_id";

/// Reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// DDL dialect of the target database.
    pub dialect: Dialect,
    /// Run every statement as its own administrative operation instead of
    /// one batch. A failure midway leaves the schema partially migrated.
    pub disable_batching: bool,
    /// Give tables declared without a primary key an auto-increment
    /// `spanddl_generated_id` key column.
    pub auto_add_primary_key: bool,
    /// Kind of the sequences created for auto-increment columns.
    pub sequence_kind: SequenceKind,
    /// Database-wide default sequence kind to set when the database has
    /// none yet. An existing setting is never overwritten.
    pub default_sequence_kind: Option<SequenceKind>,
    /// Database name, used when altering database options.
    pub database: String,
    /// Catalog schema holding the tables.
    pub schema: String,
    /// Column whose presence makes a table soft-deletable. Such tables get
    /// an `idx_<table>_<column>` index owned by the engine.
    pub soft_delete_column: Option<String>,
    /// Give up on DDL that has not finished after this long.
    pub ddl_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            disable_batching: false,
            auto_add_primary_key: false,
            sequence_kind: SequenceKind::BitReversedPositive,
            default_sequence_kind: Some(SequenceKind::BitReversedPositive),
            database: "db".to_string(),
            schema: String::new(),
            soft_delete_column: Some("deleted_at".to_string()),
            ddl_timeout: None,
        }
    }
}

impl Config {
    /// Default settings for a dialect.
    ///
    /// The catalog schema is `public` for PostgreSQL and the unnamed default
    /// schema for GoogleSQL.
    pub fn new(dialect: Dialect) -> Self {
        let schema = match dialect {
            Dialect::GoogleSql => String::new(),
            Dialect::PostgreSql => "public".to_string(),
        };
        Self {
            dialect,
            schema,
            ..Self::default()
        }
    }

    pub fn disable_batching(mut self, disable: bool) -> Self {
        self.disable_batching = disable;
        self
    }

    pub fn auto_add_primary_key(mut self, enabled: bool) -> Self {
        self.auto_add_primary_key = enabled;
        self
    }

    pub fn sequence_kind(mut self, kind: SequenceKind) -> Self {
        self.sequence_kind = kind;
        self
    }

    pub fn default_sequence_kind(mut self, kind: Option<SequenceKind>) -> Self {
        self.default_sequence_kind = kind;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn soft_delete_column(mut self, column: Option<String>) -> Self {
        self.soft_delete_column = column;
        self
    }

    pub fn ddl_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.ddl_timeout = timeout;
        self
    }

    /// Build a config from `SPANDDL_*` environment variables, loading a
    /// `.env` file first when one exists.
    ///
    /// Recognized variables: `SPANDDL_DIALECT`, `SPANDDL_DISABLE_BATCHING`,
    /// `SPANDDL_AUTO_ADD_PRIMARY_KEY`, `SPANDDL_DATABASE`, `SPANDDL_SCHEMA`,
    /// `SPANDDL_DDL_TIMEOUT_SECS`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, Error> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Config::default();

        if let Some(value) = lookup("SPANDDL_DIALECT") {
            let dialect = Dialect::parse(&value)
                .ok_or_else(|| Error::Config(format!("unknown dialect {:?}", value)))?;
            config = Config::new(dialect);
        }
        if let Some(value) = lookup("SPANDDL_DISABLE_BATCHING") {
            config.disable_batching = parse_flag("SPANDDL_DISABLE_BATCHING", &value)?;
        }
        if let Some(value) = lookup("SPANDDL_AUTO_ADD_PRIMARY_KEY") {
            config.auto_add_primary_key = parse_flag("SPANDDL_AUTO_ADD_PRIMARY_KEY", &value)?;
        }
        if let Some(value) = lookup("SPANDDL_DATABASE") {
            config.database = value;
        }
        if let Some(value) = lookup("SPANDDL_SCHEMA") {
            config.schema = value;
        }
        if let Some(value) = lookup("SPANDDL_DDL_TIMEOUT_SECS") {
            let secs: u64 = value.trim().parse().map_err(|_| {
                Error::Config(format!("SPANDDL_DDL_TIMEOUT_SECS is not a number: {:?}", value))
            })?;
            config.ddl_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{} is not a boolean: {:?}", key, value))),
    }
}
