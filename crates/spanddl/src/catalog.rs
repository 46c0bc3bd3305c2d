//! Raw catalog records and the queries that read them.
//!
//! [`CatalogSource`] is the read side of a connection: it returns typed
//! rows from the metadata catalog and nothing else. Turning those rows into
//! descriptors is the introspector's job.

use tokio_postgres::Row;

use crate::traced::BoxFuture;
use crate::{Error, Result};

/// A base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRecord {
    pub name: String,
    /// Parent table when the table is interleaved
    pub parent: Option<String>,
    /// `CASCADE` or `NO ACTION` for interleaved tables
    pub on_delete: Option<String>,
}

/// A column of a base table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRecord {
    pub table: String,
    pub name: String,
    pub ordinal: i64,
    pub nullable: bool,
    /// Physical type, as the catalog spells it
    pub spanner_type: String,
    pub default: Option<String>,
    pub generation_expression: Option<String>,
    pub is_identity: bool,
}

/// One key column of an index, one row per (index, column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexColumnRecord {
    pub table: String,
    pub index: String,
    pub primary_key: bool,
    pub unique: bool,
    pub column: String,
    pub ordinal: i64,
    /// `ASC` or `DESC`
    pub ordering: Option<String>,
}

/// One column of a foreign key, one row per (constraint, column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRecord {
    pub name: String,
    pub table: String,
    pub column: String,
    pub ordinal: i64,
    pub references_table: String,
    pub references_column: String,
}

/// A sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub name: String,
    /// `sequence_kind` option value, when the catalog reports it
    pub kind: Option<String>,
}

/// Rows read from the catalog in one introspection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogRows {
    pub tables: Vec<TableRecord>,
    pub columns: Vec<ColumnRecord>,
    pub index_columns: Vec<IndexColumnRecord>,
    pub foreign_keys: Vec<ForeignKeyRecord>,
    pub sequences: Vec<SequenceRecord>,
    pub default_sequence_kind: Option<String>,
}

/// Read access to the metadata catalog.
///
/// Every method is scoped by `schema`; when `table` is given, rows of other
/// tables must not be returned.
pub trait CatalogSource: Send + Sync {
    fn tables<'a>(
        &'a self,
        schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<TableRecord>>>;

    fn columns<'a>(
        &'a self,
        schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<ColumnRecord>>>;

    fn index_columns<'a>(
        &'a self,
        schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<IndexColumnRecord>>>;

    /// Foreign keys declared on `table` (the child side), or all of them.
    fn foreign_keys<'a>(
        &'a self,
        schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<ForeignKeyRecord>>>;

    fn sequences<'a>(&'a self, schema: &'a str) -> BoxFuture<'a, Result<Vec<SequenceRecord>>>;

    /// Names of every constraint on `table`: primary key, foreign keys and
    /// check constraints alike.
    fn constraint_names<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>>;

    /// Value of a database option, `None` when it is not set.
    fn database_option<'a>(
        &'a self,
        schema: &'a str,
        option: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>>;
}

/// Read everything the planner needs, for one table or the whole schema.
pub async fn fetch_rows<S: CatalogSource + ?Sized>(
    source: &S,
    schema: &str,
    table: Option<&str>,
) -> Result<CatalogRows> {
    Ok(CatalogRows {
        tables: source.tables(schema, table).await?,
        columns: source.columns(schema, table).await?,
        index_columns: source.index_columns(schema, table).await?,
        foreign_keys: source.foreign_keys(schema, table).await?,
        sequences: source.sequences(schema).await?,
        default_sequence_kind: source
            .database_option(schema, "default_sequence_kind")
            .await?,
    })
}

// Queries against the PostgreSQL-dialect information schema. Each takes the
// schema as $1; `scoped` adds the table name as $2 and the ordering.

pub(crate) const TABLES_SQL: &str = "\
SELECT table_name, parent_table_name, on_delete_action
FROM information_schema.tables
WHERE table_schema = $1 AND table_type = 'BASE TABLE'";

pub(crate) const COLUMNS_SQL: &str = "\
SELECT table_name, column_name, ordinal_position, is_nullable = 'YES' AS nullable,
       spanner_type, column_default, generation_expression,
       coalesce(is_identity, 'NO') = 'YES' AS is_identity
FROM information_schema.columns
WHERE table_schema = $1";

pub(crate) const INDEX_COLUMNS_SQL: &str = "\
SELECT i.table_name, i.index_name,
       case when i.index_type = 'PRIMARY_KEY' then true else false end AS primary_key,
       case when i.is_unique = 'YES' then true else false end AS is_unique,
       ic.column_name, ic.ordinal_position, ic.column_ordering
FROM information_schema.indexes i
INNER JOIN information_schema.index_columns ic
    USING (table_catalog, table_schema, table_name, index_name)
WHERE i.table_schema = $1
  AND ic.ordinal_position IS NOT NULL
  AND i.spanner_is_managed = 'NO'";

pub(crate) const FOREIGN_KEYS_SQL: &str = "\
SELECT tc.constraint_name, tc.table_name, kcu.column_name, kcu.ordinal_position,
       pk.table_name AS references_table, pk.column_name AS references_column
FROM information_schema.table_constraints tc
INNER JOIN information_schema.key_column_usage kcu
    ON kcu.constraint_schema = tc.constraint_schema
   AND kcu.constraint_name = tc.constraint_name
INNER JOIN information_schema.referential_constraints rc
    ON rc.constraint_schema = tc.constraint_schema
   AND rc.constraint_name = tc.constraint_name
INNER JOIN information_schema.key_column_usage pk
    ON pk.constraint_schema = rc.unique_constraint_schema
   AND pk.constraint_name = rc.unique_constraint_name
   AND pk.ordinal_position = kcu.position_in_unique_constraint
WHERE tc.constraint_type = 'FOREIGN KEY' AND tc.table_schema = $1";

pub(crate) const CONSTRAINT_NAMES_SQL: &str = "\
SELECT constraint_name
FROM information_schema.table_constraints
WHERE table_schema = $1";

pub(crate) const SEQUENCES_SQL: &str = "\
SELECT sequence_name
FROM information_schema.sequences
WHERE sequence_schema = $1
ORDER BY sequence_name";

pub(crate) const DATABASE_OPTION_SQL: &str = "\
SELECT option_value
FROM information_schema.database_options
WHERE schema_name = $1 AND option_name = $2";

/// Append the table filter and ordering to one of the queries above.
pub(crate) fn scoped(base: &str, table_column: &str, table: Option<&str>, order_by: &str) -> String {
    let mut sql = base.to_string();
    if table.is_some() {
        sql.push_str(&format!("\n  AND {} = $2", table_column));
    }
    sql.push_str("\nORDER BY ");
    sql.push_str(order_by);
    sql
}

pub(crate) fn table_record(row: &Row) -> Result<TableRecord> {
    Ok(TableRecord {
        name: row.try_get(0)?,
        parent: row.try_get(1)?,
        on_delete: row.try_get(2)?,
    })
}

pub(crate) fn column_record(row: &Row) -> Result<ColumnRecord> {
    Ok(ColumnRecord {
        table: row.try_get(0)?,
        name: row.try_get(1)?,
        ordinal: row.try_get(2)?,
        nullable: row.try_get(3)?,
        spanner_type: row.try_get(4)?,
        default: row.try_get(5)?,
        generation_expression: row.try_get(6)?,
        is_identity: row.try_get(7)?,
    })
}

pub(crate) fn index_column_record(row: &Row) -> Result<IndexColumnRecord> {
    Ok(IndexColumnRecord {
        table: row.try_get(0)?,
        index: row.try_get(1)?,
        primary_key: row.try_get(2)?,
        unique: row.try_get(3)?,
        column: row.try_get(4)?,
        ordinal: row.try_get(5)?,
        ordering: row.try_get(6)?,
    })
}

pub(crate) fn foreign_key_record(row: &Row) -> Result<ForeignKeyRecord> {
    Ok(ForeignKeyRecord {
        name: row.try_get(0)?,
        table: row.try_get(1)?,
        column: row.try_get(2)?,
        ordinal: row.try_get(3)?,
        references_table: row.try_get(4)?,
        references_column: row.try_get(5)?,
    })
}

pub(crate) fn constraint_name(row: &Row) -> Result<String> {
    Ok(row.try_get(0)?)
}

pub(crate) fn sequence_record(row: &Row) -> Result<SequenceRecord> {
    Ok(SequenceRecord {
        name: row.try_get(0)?,
        kind: None,
    })
}

/// Convert every row, failing on the first one that does not fit.
pub(crate) fn convert_rows<T>(rows: &[Row], convert: fn(&Row) -> Result<T>) -> Result<Vec<T>> {
    rows.iter().map(convert).collect()
}

/// Reject catalog rows the introspector cannot make sense of.
pub(crate) fn check_ordinal(table: &str, what: &str, ordinal: i64) -> Result<()> {
    if ordinal < 1 {
        return Err(Error::Catalog(format!(
            "{} of table {} has ordinal position {}",
            what, table, ordinal
        )));
    }
    Ok(())
}
