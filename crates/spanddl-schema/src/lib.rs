//! Schema descriptor types for spanddl.
//!
//! The same types describe both the schema an application wants (the
//! desired schema) and the schema observed in the database catalog (the
//! live schema). Descriptors are plain values: the engine builds a fresh
//! pair of snapshots on every reconciliation call.

use indexmap::IndexMap;
use spanddl_sql::{foreign_key_name, sequence_name};
use std::fmt;

/// Name the database gives every table's primary key index.
pub const PRIMARY_KEY_INDEX: &str = "PRIMARY_KEY";

/// Logical column types, independent of the DDL dialect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogicalType {
    /// Boolean
    Bool,
    /// 32-bit integer
    Int32,
    /// 64-bit integer
    Int64,
    /// 32-bit floating point
    Float32,
    /// 64-bit floating point
    Float64,
    /// Arbitrary precision decimal
    Numeric,
    /// Character string (length on the column, unsized when absent)
    String,
    /// Byte string (length on the column, unsized when absent)
    Bytes,
    /// Calendar date
    Date,
    /// Timestamp with time zone
    Timestamp,
    /// JSON document
    Json,
    /// Array of another logical type
    Array(Box<LogicalType>),
    /// A physical type spelled out verbatim by the caller or the catalog
    Custom(String),
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::Bool => write!(f, "bool"),
            LogicalType::Int32 => write!(f, "int32"),
            LogicalType::Int64 => write!(f, "int64"),
            LogicalType::Float32 => write!(f, "float32"),
            LogicalType::Float64 => write!(f, "float64"),
            LogicalType::Numeric => write!(f, "numeric"),
            LogicalType::String => write!(f, "string"),
            LogicalType::Bytes => write!(f, "bytes"),
            LogicalType::Date => write!(f, "date"),
            LogicalType::Timestamp => write!(f, "timestamp"),
            LogicalType::Json => write!(f, "json"),
            LogicalType::Array(inner) => write!(f, "array<{}>", inner),
            LogicalType::Custom(ty) => write!(f, "{}", ty),
        }
    }
}

/// A generation expression for a computed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedColumn {
    /// The SQL expression, without the surrounding parentheses
    pub expression: String,
    /// Whether the value is stored (the only form the database supports today)
    pub stored: bool,
}

/// A column descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Logical type
    pub data_type: LogicalType,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Default value expression (if any)
    pub default: Option<String>,
    /// Generation expression (if any)
    pub generated: Option<GeneratedColumn>,
    /// Whether values come from the table's backing sequence
    pub auto_increment: bool,
    /// Maximum length for strings and bytes
    pub length: Option<u32>,
    /// Numeric precision
    pub precision: Option<u32>,
    /// Numeric scale
    pub scale: Option<u32>,
    /// Whether a UNIQUE column constraint was requested (desired) or a
    /// single-column unique index covers the column (live)
    pub unique: bool,
    /// Whether the column is part of the primary key
    pub primary_key: bool,
    /// Physical type as reported by the catalog, e.g. `STRING(MAX)`
    pub physical_type: Option<String>,
}

impl ColumnDescriptor {
    /// Create a nullable column with no default.
    pub fn new(name: impl Into<String>, data_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            default: None,
            generated: None,
            auto_increment: false,
            length: None,
            precision: None,
            scale: None,
            unique: false,
            primary_key: false,
            physical_type: None,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Set a default value expression.
    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    /// Make this a stored generated column.
    pub fn generated(mut self, expression: impl Into<String>) -> Self {
        self.generated = Some(GeneratedColumn {
            expression: expression.into(),
            stored: true,
        });
        self
    }

    /// Take values from the table's backing sequence.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Request a UNIQUE column constraint.
    ///
    /// The database has no such constraint; planning rejects it. Declare a
    /// unique index instead.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set the maximum length.
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Set numeric precision and scale.
    pub fn precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = Some(precision);
        self.scale = Some(scale);
        self
    }

    /// Whether this column is computed by the database.
    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }
}

/// Sort order for index columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum SortOrder {
    /// Ascending order (default)
    #[default]
    Asc,
    /// Descending order
    Desc,
}

impl SortOrder {
    /// Returns the SQL keyword for this sort order, or empty string for ASC (default).
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "",
            SortOrder::Desc => " DESC",
        }
    }
}

/// A column in an index with optional sort order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexColumn {
    /// Column name
    pub name: String,
    /// Sort order (ASC or DESC)
    pub order: SortOrder,
}

impl IndexColumn {
    /// Create a new index column with default (ASC) ordering.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Asc,
        }
    }

    /// Create a new index column with DESC ordering.
    pub fn desc(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            order: SortOrder::Desc,
        }
    }

    /// Returns the SQL fragment for this column (name + order).
    pub fn to_sql(&self, quote_ident: impl Fn(&str) -> String) -> String {
        format!("{}{}", quote_ident(&self.name), self.order.to_sql())
    }

    /// Parse a column specification like "col_name", "col_name DESC" or "\"Col\" ASC".
    pub fn parse(spec: &str) -> Self {
        let trimmed = spec.trim();
        let upper = trimmed.to_uppercase();

        let (name, order) = if upper.ends_with(" DESC") {
            (&trimmed[..trimmed.len() - 5], SortOrder::Desc)
        } else if upper.ends_with(" ASC") {
            (&trimmed[..trimmed.len() - 4], SortOrder::Asc)
        } else {
            (trimmed, SortOrder::Asc)
        };

        Self {
            name: spanddl_sql::unquote_ident(name),
            order,
        }
    }
}

/// An index descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    /// Index name (unique across the schema)
    pub name: String,
    /// Owning table
    pub table: String,
    /// Indexed columns in key order
    pub columns: Vec<IndexColumn>,
    /// Whether this is a unique index
    pub unique: bool,
    /// Whether this is the table's primary key
    pub primary_key: bool,
}

impl IndexDescriptor {
    /// Create a non-unique index.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns
                .into_iter()
                .map(|c| IndexColumn::new(c.into()))
                .collect(),
            unique: false,
            primary_key: false,
        }
    }

    /// Mark the index unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Column names in key order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Whether two indexes would be built the same way (names aside).
    pub fn same_definition(&self, other: &IndexDescriptor) -> bool {
        self.table == other.table
            && self.columns == other.columns
            && self.unique == other.unique
            && self.primary_key == other.primary_key
    }
}

/// A foreign key descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForeignKeyDescriptor {
    /// Constraint name
    pub name: String,
    /// Child table
    pub table: String,
    /// Column(s) in the child table
    pub columns: Vec<String>,
    /// Referenced (parent) table
    pub references_table: String,
    /// Referenced column(s)
    pub references_columns: Vec<String>,
}

impl ForeignKeyDescriptor {
    /// Create a foreign key named `fk_<parent>_<child>`.
    pub fn new(
        table: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
        references_table: impl Into<String>,
        references_columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let table = table.into();
        let references_table = references_table.into();
        Self {
            name: foreign_key_name(&references_table, &table),
            table,
            columns: columns.into_iter().map(Into::into).collect(),
            references_table,
            references_columns: references_columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Override the constraint name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Whether two foreign keys enforce the same relation (names aside).
    pub fn same_definition(&self, other: &ForeignKeyDescriptor) -> bool {
        self.table == other.table
            && self.columns == other.columns
            && self.references_table == other.references_table
            && self.references_columns == other.references_columns
    }

    /// Whether this is a self-reference.
    pub fn is_self_reference(&self) -> bool {
        self.table == self.references_table
    }
}

/// How a sequence generates values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum SequenceKind {
    /// Bit-reversed positive values, spreading writes across key ranges
    #[default]
    BitReversedPositive,
    /// Plain increasing values, using the database's default sequence kind
    Monotonic,
}

impl SequenceKind {
    /// The option value the catalog reports for this kind, if any.
    pub fn option_value(&self) -> Option<&'static str> {
        match self {
            SequenceKind::BitReversedPositive => Some("bit_reversed_positive"),
            SequenceKind::Monotonic => None,
        }
    }

    /// Parse a catalog option value.
    pub fn from_option_value(value: &str) -> Option<Self> {
        match value.trim().trim_matches(['\'', '"']).to_ascii_lowercase().as_str() {
            "bit_reversed_positive" => Some(SequenceKind::BitReversedPositive),
            "" | "default" | "monotonic" => Some(SequenceKind::Monotonic),
            _ => None,
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceKind::BitReversedPositive => write!(f, "bit_reversed_positive"),
            SequenceKind::Monotonic => write!(f, "monotonic"),
        }
    }
}

/// A sequence backing a table's auto-increment column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceDescriptor {
    /// Sequence name, `<table>_seq` unless given otherwise
    pub name: String,
    /// Generation policy; `None` when the catalog did not report one
    pub kind: Option<SequenceKind>,
    /// Whether the sequence exists in the database
    pub exists: bool,
}

impl SequenceDescriptor {
    /// A sequence for `table` with the conventional name.
    pub fn for_table(table: &str, kind: SequenceKind) -> Self {
        Self {
            name: sequence_name(table),
            kind: Some(kind),
            exists: false,
        }
    }
}

/// The interleaving relation of a child table to its parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interleave {
    /// Parent table
    pub parent: String,
    /// Whether deleting a parent row deletes its children
    pub on_delete_cascade: bool,
}

/// A table descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDescriptor {
    /// Table name
    pub name: String,
    /// Columns, in declaration order
    pub columns: Vec<ColumnDescriptor>,
    /// Indexes, including the primary key index
    pub indexes: Vec<IndexDescriptor>,
    /// Foreign keys declared on this table
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
    /// Parent table when interleaved
    pub interleave: Option<Interleave>,
    /// Sequence backing the auto-increment column
    pub sequence: Option<SequenceDescriptor>,
}

impl TableDescriptor {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            interleave: None,
            sequence: None,
        }
    }

    /// Add a column.
    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Set the primary key columns.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.indexes.retain(|i| !i.primary_key);
        for col in &mut self.columns {
            col.primary_key = columns.contains(&col.name.as_str());
        }
        let mut pk = IndexDescriptor::new(PRIMARY_KEY_INDEX, self.name.clone(), columns.iter().copied());
        pk.unique = true;
        pk.primary_key = true;
        self.indexes.insert(0, pk);
        self
    }

    /// Add a secondary index on this table.
    pub fn index(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        let idx = IndexDescriptor::new(name, self.name.clone(), columns.iter().copied());
        self.indexes.push(idx);
        self
    }

    /// Add a unique secondary index on this table.
    pub fn unique_index(mut self, name: impl Into<String>, columns: &[&str]) -> Self {
        let idx = IndexDescriptor::new(name, self.name.clone(), columns.iter().copied()).unique();
        self.indexes.push(idx);
        self
    }

    /// Add a foreign key `columns -> references_table(references_columns)`.
    pub fn foreign_key(
        mut self,
        columns: &[&str],
        references_table: &str,
        references_columns: &[&str],
    ) -> Self {
        let fk = ForeignKeyDescriptor::new(
            self.name.clone(),
            columns.iter().copied(),
            references_table,
            references_columns.iter().copied(),
        );
        self.foreign_keys.push(fk);
        self
    }

    /// Interleave this table in `parent`.
    pub fn interleave_in(mut self, parent: impl Into<String>, on_delete_cascade: bool) -> Self {
        self.interleave = Some(Interleave {
            parent: parent.into(),
            on_delete_cascade,
        });
        self
    }

    /// Get a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get an index by name.
    pub fn get_index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// The primary key index, if any.
    pub fn primary_key_index(&self) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|i| i.primary_key)
    }

    /// Primary key column names in key order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.primary_key_index()
            .map(|pk| pk.column_names())
            .unwrap_or_default()
    }

    /// Whether `column` is part of the primary key.
    pub fn is_primary_key_column(&self, column: &str) -> bool {
        self.primary_key_columns().contains(&column)
    }

    /// Secondary indexes (everything but the primary key).
    pub fn secondary_indexes(&self) -> impl Iterator<Item = &IndexDescriptor> {
        self.indexes.iter().filter(|i| !i.primary_key)
    }

    /// The auto-increment column, if any.
    pub fn auto_increment_column(&self) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    /// Tables this table depends on: foreign key parents and the interleave
    /// parent. Self-references are skipped.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        if let Some(interleave) = &self.interleave
            && interleave.parent != self.name
        {
            deps.push(&interleave.parent);
        }
        for fk in &self.foreign_keys {
            if !fk.is_self_reference() && !deps.contains(&fk.references_table.as_str()) {
                deps.push(&fk.references_table);
            }
        }
        deps
    }

    /// Check the per-table invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
            if col.default.is_some() && col.generated.is_some() {
                return Err(SchemaError::DefaultOnGeneratedColumn {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
        }

        if self.indexes.iter().filter(|i| i.primary_key).count() > 1 {
            return Err(SchemaError::MultiplePrimaryKeys {
                table: self.name.clone(),
            });
        }

        if self.columns.iter().filter(|c| c.auto_increment).count() > 1 {
            return Err(SchemaError::MultipleAutoIncrement {
                table: self.name.clone(),
            });
        }

        for idx in &self.indexes {
            for col in &idx.columns {
                if self.get_column(&col.name).is_none() {
                    return Err(SchemaError::UnknownColumn {
                        table: self.name.clone(),
                        column: col.name.clone(),
                        context: format!("index {}", idx.name),
                    });
                }
            }
        }

        for fk in &self.foreign_keys {
            for col in &fk.columns {
                if self.get_column(col).is_none() {
                    return Err(SchemaError::UnknownColumn {
                        table: self.name.clone(),
                        column: col.clone(),
                        context: format!("foreign key {}", fk.name),
                    });
                }
            }
        }

        Ok(())
    }
}

/// A complete schema snapshot, tables keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// Tables in the schema, in insertion order
    pub tables: IndexMap<String, TableDescriptor>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from tables, rejecting invalid ones.
    ///
    /// Index names are global to the schema, so they are checked across
    /// tables here rather than in [`TableDescriptor::validate`].
    pub fn from_tables(
        tables: impl IntoIterator<Item = TableDescriptor>,
    ) -> Result<Self, SchemaError> {
        let mut schema = Schema::new();
        let mut index_owner: IndexMap<String, String> = IndexMap::new();

        for table in tables {
            table.validate()?;
            if schema.tables.contains_key(&table.name) {
                return Err(SchemaError::DuplicateTable(table.name));
            }
            for idx in table.secondary_indexes() {
                if let Some(owner) = index_owner.insert(idx.name.clone(), table.name.clone()) {
                    return Err(SchemaError::DuplicateIndex {
                        index: idx.name.clone(),
                        first: owner,
                        second: table.name.clone(),
                    });
                }
            }
            schema.tables.insert(table.name.clone(), table);
        }

        Ok(schema)
    }

    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    /// Iterate over all tables.
    pub fn iter_tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.tables.values()
    }

    /// Insert or replace a table.
    pub fn insert(&mut self, table: TableDescriptor) {
        self.tables.insert(table.name.clone(), table);
    }

    /// Whether the schema has a table with this name.
    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Find the table owning an index.
    pub fn find_index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.iter_tables().find_map(|t| t.get_index(name))
    }

    /// Foreign keys on any table that reference `table`.
    pub fn foreign_keys_referencing<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = &'a ForeignKeyDescriptor> + 'a {
        self.iter_tables()
            .flat_map(|t| t.foreign_keys.iter())
            .filter(move |fk| fk.references_table == table)
    }
}

/// A structurally invalid schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("table {0} is declared more than once")]
    DuplicateTable(String),

    #[error("column {table}.{column} is declared more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("index {index} is declared on both {first} and {second}")]
    DuplicateIndex {
        index: String,
        first: String,
        second: String,
    },

    #[error("table {table} declares more than one primary key")]
    MultiplePrimaryKeys { table: String },

    #[error("table {table} declares more than one auto-increment column")]
    MultipleAutoIncrement { table: String },

    #[error("{context} on {table} names unknown column {column}")]
    UnknownColumn {
        table: String,
        column: String,
        context: String,
    },

    #[error("column {table}.{column} has both a default and a generation expression")]
    DefaultOnGeneratedColumn { table: String, column: String },
}
