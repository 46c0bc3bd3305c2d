//! Schema diffing: compare a desired schema against the live one.
//!
//! [`plan`] produces the ordered list of [`MigrationAction`]s that turns the
//! live schema into the desired one. Planning is pure: the same inputs
//! always give the same actions, and planning again against the schema the
//! actions produce gives an empty plan.
//!
//! ## Ownership
//!
//! The engine only removes objects it would have created itself. A live
//! index missing from the desired schema is dropped when its name follows
//! one of the engine's conventions (`idx_<table>_<columns>`,
//! `uq_<table>_<columns>`, the soft-delete index); other indexes were made
//! by hand and are left alone. Foreign keys follow the same rule with
//! `fk_<parent>_<child>`. An index a remaining foreign key relies on is
//! never dropped.
//!
//! ```text
//! Changes detected:
//!
//!   + sequence singers_seq (bit_reversed_positive)
//!   + table singers
//!   + index idx_singers_deleted_at on singers (deleted_at)
//!   ~ albums.title: STRING(64) -> STRING(MAX)
//! ```

use spanddl_schema::{
    ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, LogicalType, Schema,
    SequenceDescriptor, SequenceKind, TableDescriptor,
};
use spanddl_sql::{foreign_key_name, index_name, soft_delete_index_name, unique_index_name};

use crate::Result;
use crate::config::{Config, Dialect, GENERATED_ID_COLUMN};
use crate::introspect::LiveSchema;
use crate::mapper::{defaults_equivalent, physical_type, reject_unique_constraints, types_equivalent};
use crate::render::{DdlDialect, Statement};
use crate::solver::{apply_actions, order_tables};

/// Where a column's default value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnDefault {
    /// No default
    None,
    /// A SQL expression
    Expr(String),
    /// The next value of a sequence
    Sequence(String),
}

impl std::fmt::Display for ColumnDefault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnDefault::None => write!(f, "(none)"),
            ColumnDefault::Expr(expr) => write!(f, "{}", expr),
            ColumnDefault::Sequence(seq) => write!(f, "nextval({})", seq),
        }
    }
}

/// A single schema change.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationAction {
    /// Set the database-wide default sequence kind.
    SetDefaultSequenceKind(SequenceKind),
    /// Create a sequence.
    CreateSequence(SequenceDescriptor),
    /// Drop a sequence.
    DropSequence(String),
    /// Create a table with its columns, primary key and foreign keys.
    CreateTable(TableDescriptor),
    /// Drop a table.
    DropTable(String),
    /// Add a column to an existing table.
    AddColumn {
        table: String,
        column: ColumnDescriptor,
        /// Sequence backing the column when it is auto-increment
        sequence: Option<String>,
    },
    /// Change a column's type.
    AlterColumnType {
        table: String,
        column: ColumnDescriptor,
        from: String,
        sequence: Option<String>,
    },
    /// Change a column's nullability.
    AlterColumnNullability {
        table: String,
        column: ColumnDescriptor,
        sequence: Option<String>,
    },
    /// Change a column's default value.
    AlterColumnDefault {
        table: String,
        column: String,
        default: ColumnDefault,
    },
    /// Create a secondary index.
    CreateIndex(IndexDescriptor),
    /// Drop a secondary index.
    DropIndex(IndexDescriptor),
    /// Add a foreign key to an existing table.
    AddForeignKey(ForeignKeyDescriptor),
    /// Drop a foreign key.
    DropForeignKey(ForeignKeyDescriptor),
}

impl MigrationAction {
    /// The table this action touches, if it touches one.
    pub fn table(&self) -> Option<&str> {
        match self {
            MigrationAction::SetDefaultSequenceKind(_)
            | MigrationAction::CreateSequence(_)
            | MigrationAction::DropSequence(_) => None,
            MigrationAction::CreateTable(t) => Some(&t.name),
            MigrationAction::DropTable(name) => Some(name),
            MigrationAction::AddColumn { table, .. }
            | MigrationAction::AlterColumnType { table, .. }
            | MigrationAction::AlterColumnNullability { table, .. }
            | MigrationAction::AlterColumnDefault { table, .. } => Some(table),
            MigrationAction::CreateIndex(idx) | MigrationAction::DropIndex(idx) => Some(&idx.table),
            MigrationAction::AddForeignKey(fk) | MigrationAction::DropForeignKey(fk) => {
                Some(&fk.table)
            }
        }
    }
}

impl std::fmt::Display for MigrationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationAction::SetDefaultSequenceKind(kind) => {
                write!(f, "~ default_sequence_kind -> {}", kind)
            }
            MigrationAction::CreateSequence(seq) => match seq.kind {
                Some(kind) => write!(f, "+ sequence {} ({})", seq.name, kind),
                None => write!(f, "+ sequence {}", seq.name),
            },
            MigrationAction::DropSequence(name) => write!(f, "- sequence {}", name),
            MigrationAction::CreateTable(t) => write!(f, "+ table {}", t.name),
            MigrationAction::DropTable(name) => write!(f, "- table {}", name),
            MigrationAction::AddColumn { table, column, .. } => {
                let nullable = if column.nullable { " (nullable)" } else { "" };
                write!(f, "+ {}.{}: {}{}", table, column.name, column.data_type, nullable)
            }
            MigrationAction::AlterColumnType {
                table,
                column,
                from,
                ..
            } => {
                let to = column
                    .physical_type
                    .clone()
                    .unwrap_or_else(|| column.data_type.to_string());
                write!(f, "~ {}.{}: {} -> {}", table, column.name, from, to)
            }
            MigrationAction::AlterColumnNullability { table, column, .. } => {
                let (from, to) = if column.nullable {
                    ("not null", "nullable")
                } else {
                    ("nullable", "not null")
                };
                write!(f, "~ {}.{}: {} -> {}", table, column.name, from, to)
            }
            MigrationAction::AlterColumnDefault {
                table,
                column,
                default,
            } => write!(f, "~ {}.{} default -> {}", table, column, default),
            MigrationAction::CreateIndex(idx) => {
                let unique = if idx.unique { "unique " } else { "" };
                write!(
                    f,
                    "+ {}index {} on {} ({})",
                    unique,
                    idx.name,
                    idx.table,
                    idx.column_names().join(", ")
                )
            }
            MigrationAction::DropIndex(idx) => write!(f, "- index {} on {}", idx.name, idx.table),
            MigrationAction::AddForeignKey(fk) => write!(
                f,
                "+ {}: FOREIGN KEY {}({}) -> {}({})",
                fk.name,
                fk.table,
                fk.columns.join(", "),
                fk.references_table,
                fk.references_columns.join(", ")
            ),
            MigrationAction::DropForeignKey(fk) => {
                write!(f, "- {}: FOREIGN KEY on {}", fk.name, fk.table)
            }
        }
    }
}

/// An ordered list of actions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub actions: Vec<MigrationAction>,
}

impl Plan {
    /// Returns true if there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Render every action, in order.
    pub fn statements(&self, dialect: &dyn DdlDialect) -> Result<Vec<Statement>> {
        self.actions.iter().map(|a| dialect.render(a)).collect()
    }

    /// The rendered plan as one SQL script, for logs and review.
    pub fn to_sql(&self, dialect: &dyn DdlDialect) -> Result<String> {
        let mut sql = String::new();
        for stmt in self.statements(dialect)? {
            sql.push_str(&stmt.sql);
            sql.push_str(";\n");
        }
        Ok(sql)
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            writeln!(f, "No changes detected.")?;
        } else {
            writeln!(f, "Changes detected:\n")?;
            for action in &self.actions {
                writeln!(f, "  {}", action)?;
            }
        }
        Ok(())
    }
}

/// Compute the actions that bring `live` to `desired`.
///
/// Tables present in `live` but absent from `desired` are left untouched;
/// see [`plan_drop`] for removing tables. The database's default sequence
/// kind is only set when the database has none.
pub fn plan(live: &LiveSchema, desired: &Schema, config: &Config) -> Result<Plan> {
    let desired = normalize_desired(desired, config)?;
    let mut actions = Vec::new();

    if let Some(kind) = config.default_sequence_kind
        && kind.option_value().is_some()
    {
        match live.default_sequence_kind.as_deref() {
            None => actions.push(MigrationAction::SetDefaultSequenceKind(kind)),
            Some(current) if SequenceKind::from_option_value(current) != Some(kind) => {
                tracing::warn!(
                    live = %current,
                    configured = %kind,
                    "database already has another default sequence kind; leaving it"
                );
            }
            Some(_) => {}
        }
    }

    let tables: Vec<&TableDescriptor> = desired.iter_tables().collect();
    let tables = order_tables(&tables)?;

    // Foreign key drops go first, so that nothing dropped later is still
    // needed by one of them.
    for table in &tables {
        if let Some(current) = live.get_table(&table.name) {
            diff_foreign_keys_dropped(table, current, &mut actions);
        }
    }
    let surviving: Vec<&ForeignKeyDescriptor> = live
        .schema
        .iter_tables()
        .flat_map(|t| &t.foreign_keys)
        .filter(|fk| !actions.contains(&MigrationAction::DropForeignKey((*fk).clone())))
        .collect();

    for table in tables {
        match live.get_table(&table.name) {
            None => create_table(table, live, &mut actions),
            Some(current) => diff_table(table, current, live, config, &surviving, &mut actions),
        }
    }

    for action in &actions {
        tracing::debug!(%action, "planned");
    }
    tracing::info!(
        actions = actions.len(),
        dialect = %config.dialect,
        "planned schema reconciliation"
    );

    apply_actions(live, &actions)?;
    Ok(Plan { actions })
}

/// Compute the actions that drop `tables`, children before parents.
///
/// For each table: foreign keys on other tables that reference it, then its
/// secondary indexes, the table itself and its backing sequence. Tables
/// that do not exist are skipped.
pub fn plan_drop(live: &LiveSchema, tables: &[&str]) -> Result<Plan> {
    let present: Vec<&TableDescriptor> = tables
        .iter()
        .filter_map(|name| live.get_table(name))
        .collect();
    let mut order = order_tables(&present)?;
    order.reverse();

    let mut actions = Vec::new();
    let mut dropped: Vec<&str> = Vec::new();
    for table in order {
        for fk in live.schema.foreign_keys_referencing(&table.name) {
            if fk.is_self_reference() || dropped.contains(&fk.table.as_str()) {
                continue;
            }
            let action = MigrationAction::DropForeignKey(fk.clone());
            if !actions.contains(&action) {
                actions.push(action);
            }
        }
        for idx in table.secondary_indexes() {
            actions.push(MigrationAction::DropIndex(idx.clone()));
        }
        actions.push(MigrationAction::DropTable(table.name.clone()));
        if let Some(seq) = &table.sequence
            && seq.exists
        {
            actions.push(MigrationAction::DropSequence(seq.name.clone()));
        }
        dropped.push(&table.name);
    }

    apply_actions(live, &actions)?;
    Ok(Plan { actions })
}

/// Apply the engine's conventions to a desired schema and validate it.
///
/// Tables without a primary key get `spanddl_generated_id` when configured, tables
/// with the soft-delete column get its index, and auto-increment tables get
/// a sequence descriptor. Unique column constraints are rejected here,
/// before anything is compared, so the same input always fails the same
/// way.
pub fn normalize_desired(desired: &Schema, config: &Config) -> Result<Schema> {
    let mut tables = Vec::with_capacity(desired.tables.len());
    for table in desired.iter_tables() {
        table.validate()?;
        reject_unique_constraints(&table.name, &table.columns)?;

        let mut table = table.clone();
        if config.auto_add_primary_key && table.primary_key_index().is_none() {
            if table.get_column(GENERATED_ID_COLUMN).is_none() {
                table.columns.insert(
                    0,
                    ColumnDescriptor::new(GENERATED_ID_COLUMN, LogicalType::Int64)
                        .not_null()
                        .auto_increment(),
                );
            }
            table = table.primary_key(&[GENERATED_ID_COLUMN]);
        }

        if let Some(column) = &config.soft_delete_column
            && table.get_column(column).is_some()
            && !table
                .indexes
                .iter()
                .any(|idx| idx.column_names() == [column.as_str()])
        {
            let idx = IndexDescriptor::new(
                soft_delete_index_name(&table.name, column),
                table.name.clone(),
                [column.clone()],
            );
            table.indexes.push(idx);
        }

        if table.auto_increment_column().is_some() {
            let seq = table
                .sequence
                .take()
                .unwrap_or_else(|| SequenceDescriptor::for_table(&table.name, config.sequence_kind));
            table.sequence = Some(SequenceDescriptor {
                kind: seq.kind.or(Some(config.sequence_kind)),
                ..seq
            });
        } else {
            table.sequence = None;
        }

        tables.push(table);
    }
    Ok(Schema::from_tables(tables)?)
}

fn create_table(table: &TableDescriptor, live: &LiveSchema, actions: &mut Vec<MigrationAction>) {
    if let Some(seq) = &table.sequence
        && !live.has_sequence(&seq.name)
    {
        actions.push(MigrationAction::CreateSequence(seq.clone()));
    }
    actions.push(MigrationAction::CreateTable(table.clone()));
    for idx in table.secondary_indexes() {
        actions.push(MigrationAction::CreateIndex(idx.clone()));
    }
}

/// Diff two tables with the same name.
fn diff_table(
    desired: &TableDescriptor,
    current: &TableDescriptor,
    live: &LiveSchema,
    config: &Config,
    surviving: &[&ForeignKeyDescriptor],
    actions: &mut Vec<MigrationAction>,
) {
    let desired_pk = desired.primary_key_columns();
    let current_pk = current.primary_key_columns();
    if desired_pk != current_pk {
        tracing::warn!(
            table = %desired.name,
            desired = ?desired_pk,
            live = ?current_pk,
            "primary key differs from the declared one; primary keys cannot be altered"
        );
    }

    let recreated = diff_indexes_dropped(desired, current, config, surviving, actions);
    diff_columns(desired, current, live, config.dialect, actions);

    for idx in desired.secondary_indexes() {
        if current.get_index(&idx.name).is_none() || recreated.contains(&idx.name) {
            actions.push(MigrationAction::CreateIndex(idx.clone()));
        }
    }

    for fk in &desired.foreign_keys {
        let exists = current
            .foreign_keys
            .iter()
            .any(|c| c.name == fk.name && c.same_definition(fk));
        if !exists {
            actions.push(MigrationAction::AddForeignKey(fk.clone()));
        }
    }
}

/// Drop foreign keys the desired table no longer declares.
fn diff_foreign_keys_dropped(
    desired: &TableDescriptor,
    current: &TableDescriptor,
    actions: &mut Vec<MigrationAction>,
) {
    for fk in &current.foreign_keys {
        let kept = desired
            .foreign_keys
            .iter()
            .any(|d| d.name == fk.name && d.same_definition(fk));
        if kept {
            continue;
        }
        let name_claimed = desired.foreign_keys.iter().any(|d| d.name == fk.name);
        let owned = fk.name == foreign_key_name(&fk.references_table, &fk.table);
        if owned || name_claimed {
            actions.push(MigrationAction::DropForeignKey(fk.clone()));
        } else {
            tracing::debug!(table = %current.name, fk = %fk.name, "leaving foreign key not created by spanddl");
        }
    }
}

/// Drop engine-owned indexes that are gone, and indexes whose definition
/// changed under the same name. Returns the names that must be recreated.
///
/// An index a surviving foreign key relies on is kept, whatever the desired
/// schema says.
fn diff_indexes_dropped(
    desired: &TableDescriptor,
    current: &TableDescriptor,
    config: &Config,
    surviving: &[&ForeignKeyDescriptor],
    actions: &mut Vec<MigrationAction>,
) -> Vec<String> {
    let mut recreated = Vec::new();
    for idx in current.secondary_indexes() {
        let recreate = match desired.get_index(&idx.name) {
            Some(wanted) if wanted.same_definition(idx) => continue,
            Some(_) => true,
            None if is_owned_index(idx, config) => false,
            None => {
                tracing::debug!(table = %current.name, index = %idx.name, "leaving index not created by spanddl");
                continue;
            }
        };
        if let Some(fk) = surviving.iter().find(|fk| backs_foreign_key(idx, fk)) {
            tracing::warn!(
                table = %current.name,
                index = %idx.name,
                fk = %fk.name,
                "index is still used by a foreign key; not dropping it"
            );
            continue;
        }
        actions.push(MigrationAction::DropIndex(idx.clone()));
        if recreate {
            recreated.push(idx.name.clone());
        }
    }
    recreated
}

/// Whether `fk` relies on `idx`: on the child side an index leading with
/// the key columns, on the parent side a unique index over the referenced
/// columns.
fn backs_foreign_key(idx: &IndexDescriptor, fk: &ForeignKeyDescriptor) -> bool {
    let columns = idx.column_names();
    let child_side = idx.table == fk.table
        && columns.len() >= fk.columns.len()
        && fk.columns.iter().zip(&columns).all(|(a, b)| a == b);
    let parent_side = idx.table == fk.references_table
        && idx.unique
        && columns.len() == fk.references_columns.len()
        && fk.references_columns.iter().all(|c| columns.contains(&c.as_str()));
    child_side || parent_side
}

/// Whether an index carries one of the names the engine gives indexes.
fn is_owned_index(idx: &IndexDescriptor, config: &Config) -> bool {
    let columns = idx.column_names();
    if idx.name == index_name(&idx.table, &columns) || idx.name == unique_index_name(&idx.table, &columns) {
        return true;
    }
    match &config.soft_delete_column {
        Some(column) => idx.name == soft_delete_index_name(&idx.table, column),
        None => false,
    }
}

fn diff_columns(
    desired: &TableDescriptor,
    current: &TableDescriptor,
    live: &LiveSchema,
    dialect: Dialect,
    actions: &mut Vec<MigrationAction>,
) {
    let table = &desired.name;
    let sequence = desired.sequence.as_ref().map(|s| s.name.clone());

    for col in &desired.columns {
        let Some(existing) = current.get_column(&col.name) else {
            if col.auto_increment
                && let Some(seq) = &desired.sequence
                && !live.has_sequence(&seq.name)
            {
                actions.push(MigrationAction::CreateSequence(seq.clone()));
            }
            actions.push(MigrationAction::AddColumn {
                table: table.clone(),
                column: col.clone(),
                sequence: col.auto_increment.then(|| sequence.clone()).flatten(),
            });
            continue;
        };

        if col.is_generated() || existing.is_generated() {
            tracing::debug!(table = %table, column = %col.name, "generated column left as is");
            continue;
        }

        let col_sequence = col.auto_increment.then(|| sequence.clone()).flatten();
        let key_column = desired.is_primary_key_column(&col.name) || existing.primary_key;

        let live_type = existing
            .physical_type
            .clone()
            .unwrap_or_else(|| physical_type(dialect, existing));
        let desired_type = physical_type(dialect, col);
        if !types_equivalent(&live_type, &desired_type) {
            if key_column {
                tracing::warn!(table = %table, column = %col.name, live = %live_type, desired = %desired_type, "key column type cannot be altered");
            } else {
                let mut column = col.clone();
                column.physical_type = Some(desired_type);
                actions.push(MigrationAction::AlterColumnType {
                    table: table.clone(),
                    column,
                    from: live_type,
                    sequence: col_sequence.clone(),
                });
            }
        }

        if col.nullable != existing.nullable {
            if key_column {
                tracing::debug!(table = %table, column = %col.name, "key column nullability left as is");
            } else {
                actions.push(MigrationAction::AlterColumnNullability {
                    table: table.clone(),
                    column: col.clone(),
                    sequence: col_sequence.clone(),
                });
            }
        }

        diff_column_default(desired, current, col, existing, live, actions);
    }
}

/// Default changes, including auto-increment transitions.
fn diff_column_default(
    desired: &TableDescriptor,
    current: &TableDescriptor,
    col: &ColumnDescriptor,
    existing: &ColumnDescriptor,
    live: &LiveSchema,
    actions: &mut Vec<MigrationAction>,
) {
    let set_default = |default: ColumnDefault| MigrationAction::AlterColumnDefault {
        table: desired.name.clone(),
        column: col.name.clone(),
        default,
    };
    let expr_default = || match &col.default {
        Some(expr) => ColumnDefault::Expr(expr.clone()),
        None => ColumnDefault::None,
    };

    match (existing.auto_increment, col.auto_increment) {
        (false, false) => {
            if !defaults_equivalent(existing.default.as_deref(), col.default.as_deref()) {
                actions.push(set_default(expr_default()));
            }
        }
        (false, true) => {
            let Some(seq) = &desired.sequence else { return };
            if !live.has_sequence(&seq.name) {
                actions.push(MigrationAction::CreateSequence(seq.clone()));
            }
            actions.push(set_default(ColumnDefault::Sequence(seq.name.clone())));
        }
        (true, false) => {
            actions.push(set_default(expr_default()));
            if let Some(seq) = &current.sequence
                && seq.exists
            {
                actions.push(MigrationAction::DropSequence(seq.name.clone()));
            }
        }
        (true, true) => {
            let (Some(have), Some(want)) = (&current.sequence, &desired.sequence) else {
                // Identity column, or no sequence to compare against
                return;
            };
            if have.name != want.name || !have.exists {
                if !live.has_sequence(&want.name) {
                    actions.push(MigrationAction::CreateSequence(want.clone()));
                }
                actions.push(set_default(ColumnDefault::Sequence(want.name.clone())));
            } else if let (Some(have_kind), Some(want_kind)) = (have.kind, want.kind)
                && have_kind != want_kind
            {
                // Sequence kinds cannot be altered in place
                actions.push(set_default(ColumnDefault::None));
                actions.push(MigrationAction::DropSequence(have.name.clone()));
                actions.push(MigrationAction::CreateSequence(want.clone()));
                actions.push(set_default(ColumnDefault::Sequence(want.name.clone())));
            }
        }
    }
}
