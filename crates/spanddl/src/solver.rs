//! Dependency ordering and plan validation.
//!
//! Two jobs:
//! 1. Order tables so that a parent (foreign key target or interleave
//!    parent) is always created before its children, and dropped after them.
//! 2. Simulate a plan against a virtual copy of the live schema, so a plan
//!    that could not apply in order is rejected before anything is sent.
//!
//! ## Example Problem
//!
//! ```text
//! -- This fails:
//! CREATE TABLE albums (..., CONSTRAINT fk_singers_albums FOREIGN KEY (singer_id) REFERENCES singers(id));
//! CREATE TABLE singers (...);
//!
//! -- This works:
//! CREATE TABLE singers (...);
//! CREATE TABLE albums (..., CONSTRAINT fk_singers_albums FOREIGN KEY (singer_id) REFERENCES singers(id));
//! ```

use std::collections::HashSet;

use indexmap::IndexMap;
use spanddl_schema::{ColumnDescriptor, SequenceDescriptor, TableDescriptor};

use crate::diff::{ColumnDefault, MigrationAction};
use crate::introspect::LiveSchema;
use crate::{Error, Result};

/// Order tables parents first.
///
/// Dependencies on tables outside `tables` are ignored: they either exist
/// already or the plan check reports them. Among tables whose parents are
/// all placed, declaration order is kept, so the result is deterministic.
pub fn order_tables<'a>(tables: &[&'a TableDescriptor]) -> Result<Vec<&'a TableDescriptor>> {
    let names: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::new();
    let mut ordered: Vec<&'a TableDescriptor> = Vec::with_capacity(tables.len());

    while ordered.len() < tables.len() {
        let mut made_progress = false;

        for table in tables {
            if placed.contains(table.name.as_str()) {
                continue;
            }
            let ready = table
                .dependencies()
                .iter()
                .all(|dep| !names.contains(dep) || placed.contains(dep));
            if ready {
                placed.insert(table.name.as_str());
                ordered.push(*table);
                made_progress = true;
            }
        }

        if !made_progress {
            let tables = find_cycle(tables, &placed);
            return Err(Error::DependencyCycle { tables });
        }
    }

    Ok(ordered)
}

/// Walk dependencies among the unplaced tables until one repeats.
///
/// Every unplaced table has at least one unplaced dependency, otherwise it
/// would have been placed, so the walk always closes a loop.
fn find_cycle(tables: &[&TableDescriptor], placed: &HashSet<&str>) -> Vec<String> {
    let pending: IndexMap<&str, &TableDescriptor> = tables
        .iter()
        .filter(|t| !placed.contains(t.name.as_str()))
        .map(|t| (t.name.as_str(), *t))
        .collect();

    let Some(mut current) = pending.keys().next().copied() else {
        return Vec::new();
    };
    let mut path: Vec<&str> = Vec::new();
    loop {
        if let Some(pos) = path.iter().position(|n| *n == current) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|n| n.to_string()).collect();
            cycle.push(current.to_string());
            return cycle;
        }
        path.push(current);
        let next = pending
            .get(current)
            .and_then(|t| t.dependencies().into_iter().find(|d| pending.contains_key(d)));
        match next {
            Some(dep) => current = dep,
            None => return path.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// Error when a plan cannot be applied in the order given.
#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// An action requires a table that doesn't exist.
    TableNotFound { action: String, table: String },
    /// An action requires a table to NOT exist, but it does.
    TableAlreadyExists { action: String, table: String },
    /// A table would be dropped while another table still depends on it.
    TableStillReferenced {
        action: String,
        table: String,
        by: String,
    },
    /// An action requires a column that doesn't exist.
    ColumnNotFound {
        action: String,
        table: String,
        column: String,
    },
    /// An action requires a column to NOT exist, but it does.
    ColumnAlreadyExists {
        action: String,
        table: String,
        column: String,
    },
    /// An action requires an index that doesn't exist.
    IndexNotFound { action: String, index: String },
    /// Index names are schema-global; this one is taken.
    IndexAlreadyExists { action: String, index: String },
    /// An action requires a foreign key that doesn't exist.
    ForeignKeyNotFound { action: String, name: String },
    /// A foreign key with this name already exists on the table.
    ForeignKeyAlreadyExists { action: String, name: String },
    /// A foreign key references a table that doesn't exist.
    ForeignKeyTargetNotFound {
        action: String,
        source_table: String,
        target_table: String,
    },
    /// An action requires a sequence that doesn't exist.
    SequenceNotFound { action: String, sequence: String },
    /// An action requires a sequence to NOT exist, but it does.
    SequenceAlreadyExists { action: String, sequence: String },
    /// A sequence would be dropped while a column default still uses it.
    SequenceInUse {
        action: String,
        sequence: String,
        table: String,
    },
}

impl std::fmt::Display for SolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolverError::TableNotFound { action, table } => {
                write!(f, "{}: table '{}' does not exist", action, table)
            }
            SolverError::TableAlreadyExists { action, table } => {
                write!(f, "{}: table '{}' already exists", action, table)
            }
            SolverError::TableStillReferenced { action, table, by } => {
                write!(f, "{}: table '{}' is still referenced by '{}'", action, table, by)
            }
            SolverError::ColumnNotFound {
                action,
                table,
                column,
            } => write!(f, "{}: column '{}.{}' does not exist", action, table, column),
            SolverError::ColumnAlreadyExists {
                action,
                table,
                column,
            } => write!(f, "{}: column '{}.{}' already exists", action, table, column),
            SolverError::IndexNotFound { action, index } => {
                write!(f, "{}: index '{}' does not exist", action, index)
            }
            SolverError::IndexAlreadyExists { action, index } => {
                write!(f, "{}: index '{}' already exists", action, index)
            }
            SolverError::ForeignKeyNotFound { action, name } => {
                write!(f, "{}: foreign key '{}' does not exist", action, name)
            }
            SolverError::ForeignKeyAlreadyExists { action, name } => {
                write!(f, "{}: foreign key '{}' already exists", action, name)
            }
            SolverError::ForeignKeyTargetNotFound {
                action,
                source_table,
                target_table,
            } => write!(
                f,
                "{}: foreign key from '{}' references non-existent table '{}'",
                action, source_table, target_table
            ),
            SolverError::SequenceNotFound { action, sequence } => {
                write!(f, "{}: sequence '{}' does not exist", action, sequence)
            }
            SolverError::SequenceAlreadyExists { action, sequence } => {
                write!(f, "{}: sequence '{}' already exists", action, sequence)
            }
            SolverError::SequenceInUse {
                action,
                sequence,
                table,
            } => write!(
                f,
                "{}: sequence '{}' is still the default of a column in '{}'",
                action, sequence, table
            ),
        }
    }
}

impl std::error::Error for SolverError {}

/// Virtual schema state for simulating a plan.
///
/// Applying an action leaves the schema the way introspection would report
/// it after the statement ran.
#[derive(Debug, Clone)]
pub struct VirtualSchema {
    live: LiveSchema,
}

impl VirtualSchema {
    /// Start from a live snapshot.
    pub fn new(live: &LiveSchema) -> Self {
        Self { live: live.clone() }
    }

    /// The simulated schema.
    pub fn into_live(self) -> LiveSchema {
        self.live
    }

    /// Check if a table exists.
    pub fn table_exists(&self, name: &str) -> bool {
        self.live.schema.has_table(name)
    }

    /// Check if a column exists in a table.
    pub fn column_exists(&self, table: &str, column: &str) -> bool {
        self.live
            .get_table(table)
            .is_some_and(|t| t.get_column(column).is_some())
    }

    fn table_mut(&mut self, action: &str, name: &str) -> std::result::Result<&mut TableDescriptor, SolverError> {
        self.live
            .schema
            .tables
            .get_mut(name)
            .ok_or_else(|| SolverError::TableNotFound {
                action: action.to_string(),
                table: name.to_string(),
            })
    }

    fn sequence(&self, action: &str, name: &str) -> std::result::Result<SequenceDescriptor, SolverError> {
        self.live
            .sequences
            .get(name)
            .cloned()
            .ok_or_else(|| SolverError::SequenceNotFound {
                action: action.to_string(),
                sequence: name.to_string(),
            })
    }

    /// Apply an action to the virtual schema, validating preconditions.
    pub fn apply(&mut self, action: &MigrationAction) -> std::result::Result<(), SolverError> {
        let desc = action.to_string();

        match action {
            MigrationAction::SetDefaultSequenceKind(kind) => {
                self.live.default_sequence_kind = kind.option_value().map(str::to_string);
            }

            MigrationAction::CreateSequence(seq) => {
                if self.live.has_sequence(&seq.name) {
                    return Err(SolverError::SequenceAlreadyExists {
                        action: desc,
                        sequence: seq.name.clone(),
                    });
                }
                self.live.sequences.insert(
                    seq.name.clone(),
                    SequenceDescriptor {
                        exists: true,
                        ..seq.clone()
                    },
                );
            }

            MigrationAction::DropSequence(name) => {
                self.sequence(&desc, name)?;
                let user = self.live.schema.iter_tables().find(|t| {
                    t.auto_increment_column().is_some()
                        && t.sequence.as_ref().is_some_and(|s| &s.name == name)
                });
                if let Some(user) = user {
                    return Err(SolverError::SequenceInUse {
                        action: desc,
                        sequence: name.clone(),
                        table: user.name.clone(),
                    });
                }
                self.live.sequences.shift_remove(name);
            }

            MigrationAction::CreateTable(t) => {
                if self.table_exists(&t.name) {
                    return Err(SolverError::TableAlreadyExists {
                        action: desc,
                        table: t.name.clone(),
                    });
                }
                for parent in t.dependencies() {
                    if !self.table_exists(parent) {
                        return Err(SolverError::ForeignKeyTargetNotFound {
                            action: desc,
                            source_table: t.name.clone(),
                            target_table: parent.to_string(),
                        });
                    }
                }
                for idx in t.secondary_indexes() {
                    if self.live.schema.find_index(&idx.name).is_some() {
                        return Err(SolverError::IndexAlreadyExists {
                            action: desc,
                            index: idx.name.clone(),
                        });
                    }
                }
                let mut table = t.clone();
                table.sequence = match &t.sequence {
                    Some(seq) => Some(self.sequence(&desc, &seq.name)?),
                    None => None,
                };
                // Secondary indexes arrive through their own CreateIndex actions
                table.indexes.retain(|i| i.primary_key);
                self.live.schema.insert(table);
            }

            MigrationAction::DropTable(name) => {
                if !self.table_exists(name) {
                    return Err(SolverError::TableNotFound {
                        action: desc,
                        table: name.clone(),
                    });
                }
                let dependent = self.live.schema.iter_tables().find(|t| {
                    &t.name != name
                        && (t.foreign_keys.iter().any(|fk| &fk.references_table == name)
                            || t.interleave.as_ref().is_some_and(|i| &i.parent == name))
                });
                if let Some(dependent) = dependent {
                    return Err(SolverError::TableStillReferenced {
                        action: desc,
                        table: name.clone(),
                        by: dependent.name.clone(),
                    });
                }
                self.live.schema.tables.shift_remove(name);
            }

            MigrationAction::AddColumn {
                table,
                column,
                sequence,
            } => {
                let seq = match sequence {
                    Some(name) => Some(self.sequence(&desc, name)?),
                    None => None,
                };
                let t = self.table_mut(&desc, table)?;
                if t.get_column(&column.name).is_some() {
                    return Err(SolverError::ColumnAlreadyExists {
                        action: desc,
                        table: table.clone(),
                        column: column.name.clone(),
                    });
                }
                t.columns.push(column.clone());
                if seq.is_some() {
                    t.sequence = seq;
                }
            }

            MigrationAction::AlterColumnType { table, column, .. } => {
                let t = self.table_mut(&desc, table)?;
                let col = find_column(t, &desc, &column.name)?;
                col.data_type = column.data_type.clone();
                col.length = column.length;
                col.physical_type = column.physical_type.clone();
            }

            MigrationAction::AlterColumnNullability { table, column, .. } => {
                let t = self.table_mut(&desc, table)?;
                let col = find_column(t, &desc, &column.name)?;
                col.nullable = column.nullable;
            }

            MigrationAction::AlterColumnDefault {
                table,
                column,
                default,
            } => {
                let seq = match default {
                    ColumnDefault::Sequence(name) => Some(self.sequence(&desc, name)?),
                    _ => None,
                };
                let t = self.table_mut(&desc, table)?;
                let col = find_column(t, &desc, column)?;
                let was_auto_increment = col.auto_increment;
                col.auto_increment = seq.is_some();
                col.default = match default {
                    ColumnDefault::Expr(expr) => Some(expr.clone()),
                    _ => None,
                };
                if seq.is_some() {
                    t.sequence = seq;
                } else if was_auto_increment {
                    t.sequence = None;
                }
            }

            MigrationAction::CreateIndex(idx) => {
                if self.live.schema.find_index(&idx.name).is_some() {
                    return Err(SolverError::IndexAlreadyExists {
                        action: desc,
                        index: idx.name.clone(),
                    });
                }
                let t = self.table_mut(&desc, &idx.table)?;
                for c in &idx.columns {
                    find_column(t, &desc, &c.name)?;
                }
                if idx.unique && idx.columns.len() == 1 {
                    find_column(t, &desc, &idx.columns[0].name)?.unique = true;
                }
                t.indexes.push(idx.clone());
                t.indexes
                    .sort_by(|a, b| b.primary_key.cmp(&a.primary_key).then(a.name.cmp(&b.name)));
            }

            MigrationAction::DropIndex(idx) => {
                let t = self.table_mut(&desc, &idx.table)?;
                let Some(pos) = t.indexes.iter().position(|i| i.name == idx.name) else {
                    return Err(SolverError::IndexNotFound {
                        action: desc,
                        index: idx.name.clone(),
                    });
                };
                let removed = t.indexes.remove(pos);
                if removed.unique && removed.columns.len() == 1 {
                    let name = &removed.columns[0].name;
                    let still_unique = t.indexes.iter().any(|i| {
                        i.unique && !i.primary_key && i.columns.len() == 1 && &i.columns[0].name == name
                    });
                    if !still_unique && let Some(col) = t.columns.iter_mut().find(|c| &c.name == name) {
                        col.unique = false;
                    }
                }
            }

            MigrationAction::AddForeignKey(fk) => {
                if !self.table_exists(&fk.references_table) {
                    return Err(SolverError::ForeignKeyTargetNotFound {
                        action: desc,
                        source_table: fk.table.clone(),
                        target_table: fk.references_table.clone(),
                    });
                }
                let t = self.table_mut(&desc, &fk.table)?;
                if t.foreign_keys.iter().any(|f| f.name == fk.name) {
                    return Err(SolverError::ForeignKeyAlreadyExists {
                        action: desc,
                        name: fk.name.clone(),
                    });
                }
                for c in &fk.columns {
                    find_column(t, &desc, c)?;
                }
                t.foreign_keys.push(fk.clone());
            }

            MigrationAction::DropForeignKey(fk) => {
                let t = self.table_mut(&desc, &fk.table)?;
                let before = t.foreign_keys.len();
                t.foreign_keys.retain(|f| f.name != fk.name);
                if t.foreign_keys.len() == before {
                    return Err(SolverError::ForeignKeyNotFound {
                        action: desc,
                        name: fk.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

fn find_column<'t>(
    table: &'t mut TableDescriptor,
    action: &str,
    column: &str,
) -> std::result::Result<&'t mut ColumnDescriptor, SolverError> {
    let name = table.name.clone();
    table
        .columns
        .iter_mut()
        .find(|c| c.name == column)
        .ok_or_else(|| SolverError::ColumnNotFound {
            action: action.to_string(),
            table: name,
            column: column.to_string(),
        })
}

/// Apply `actions` in order to a copy of `live` and return the result.
///
/// Fails on the first action whose preconditions do not hold at that point.
pub fn apply_actions(
    live: &LiveSchema,
    actions: &[MigrationAction],
) -> std::result::Result<LiveSchema, SolverError> {
    let mut schema = VirtualSchema::new(live);
    for action in actions {
        schema.apply(action)?;
    }
    Ok(schema.into_live())
}
