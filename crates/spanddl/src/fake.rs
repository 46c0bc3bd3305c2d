//! In-memory database for driving the migrator in tests.
//!
//! The catalog side serves rows generated from a [`LiveSchema`]; the DDL
//! side records every call. Statements are not parsed: tests apply a plan
//! to the catalog explicitly with [`FakeDatabase::apply`].

use std::sync::{Arc, Mutex, MutexGuard};

use spanddl_schema::{SortOrder, TableDescriptor};

use crate::catalog::{
    CatalogSource, ColumnRecord, ForeignKeyRecord, IndexColumnRecord, SequenceRecord, TableRecord,
};
use crate::config::Dialect;
use crate::diff::Plan;
use crate::executor::DdlConnection;
use crate::introspect::LiveSchema;
use crate::mapper::physical_type;
use crate::solver::apply_actions;
use crate::traced::BoxFuture;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlCall {
    Statement(String),
    StartBatch,
    RunBatch,
    AbortBatch,
}

#[derive(Debug, Default)]
struct FakeState {
    live: LiveSchema,
    calls: Vec<DdlCall>,
    fail_on: Option<String>,
    hang_on: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FakeDatabase {
    state: Arc<Mutex<FakeState>>,
    dialect: Dialect,
}

impl FakeDatabase {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            state: Arc::default(),
            dialect,
        }
    }

    pub fn with_live(dialect: Dialect, live: LiveSchema) -> Self {
        let db = Self::new(dialect);
        db.lock().live = live;
        db
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Reject statements containing `needle`.
    pub fn fail_on(&self, needle: &str) {
        self.lock().fail_on = Some(needle.to_string());
    }

    /// Never answer statements containing `needle`.
    pub fn hang_on(&self, needle: &str) {
        self.lock().hang_on = Some(needle.to_string());
    }

    /// Make the catalog reflect `plan` as if its statements had run.
    pub fn apply(&self, plan: &Plan) {
        let mut state = self.lock();
        let live = apply_actions(&state.live, &plan.actions).unwrap();
        state.live = live;
    }

    pub fn live(&self) -> LiveSchema {
        self.lock().live.clone()
    }

    pub fn calls(&self) -> Vec<DdlCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Statements sent, in order, batch control excluded.
    pub fn statements(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DdlCall::Statement(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// Base tables matching the filter, sorted by name like the catalog query.
    fn tables_matching(&self, table: Option<&str>) -> Vec<TableDescriptor> {
        let state = self.lock();
        let mut tables: Vec<TableDescriptor> = state
            .live
            .schema
            .iter_tables()
            .filter(|t| table.is_none_or(|name| t.name == name))
            .cloned()
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// A type as the catalog reports it, which is not always how it was
    /// written in DDL.
    fn catalog_spelling(&self, ty: &str) -> String {
        match self.dialect {
            Dialect::GoogleSql => ty.to_string(),
            Dialect::PostgreSql => postgres_spelling(ty),
        }
    }

    fn sequence_default(&self, sequence: &str) -> String {
        match self.dialect {
            Dialect::GoogleSql => format!("GET_NEXT_SEQUENCE_VALUE(SEQUENCE {})", sequence),
            Dialect::PostgreSql => format!("nextval('{}'::regclass)", sequence),
        }
    }
}

fn postgres_spelling(ty: &str) -> String {
    if let Some(inner) = ty.strip_suffix("[]") {
        return format!("{}[]", postgres_spelling(inner));
    }
    if let Some(size) = ty.strip_prefix("varchar") {
        return format!("character varying{}", size);
    }
    match ty {
        "text" => "character varying".to_string(),
        "timestamptz" => "timestamp with time zone".to_string(),
        "int" => "bigint".to_string(),
        _ => ty.to_string(),
    }
}

fn ready<'a, T: Send + 'a>(value: T) -> BoxFuture<'a, Result<T>> {
    Box::pin(std::future::ready(Ok(value)))
}

impl CatalogSource for FakeDatabase {
    fn tables<'a>(
        &'a self,
        _schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<TableRecord>>> {
        let records = self
            .tables_matching(table)
            .into_iter()
            .map(|t| TableRecord {
                parent: t.interleave.as_ref().map(|i| i.parent.clone()),
                on_delete: t.interleave.as_ref().map(|i| {
                    if i.on_delete_cascade { "CASCADE" } else { "NO ACTION" }.to_string()
                }),
                name: t.name,
            })
            .collect();
        ready(records)
    }

    fn columns<'a>(
        &'a self,
        _schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<ColumnRecord>>> {
        let mut records = Vec::new();
        for t in self.tables_matching(table) {
            let sequence = t.sequence.as_ref().map(|s| s.name.clone());
            for (i, col) in t.columns.iter().enumerate() {
                let default = match (&sequence, col.auto_increment) {
                    (Some(seq), true) => Some(self.sequence_default(seq)),
                    _ => col.default.clone(),
                };
                records.push(ColumnRecord {
                    table: t.name.clone(),
                    name: col.name.clone(),
                    ordinal: i as i64 + 1,
                    nullable: col.nullable,
                    spanner_type: self.catalog_spelling(
                        col.physical_type
                            .as_deref()
                            .unwrap_or(&physical_type(self.dialect, col)),
                    ),
                    default,
                    generation_expression: col
                        .generated
                        .as_ref()
                        .map(|g| format!("({})", g.expression)),
                    is_identity: col.auto_increment && sequence.is_none(),
                });
            }
        }
        ready(records)
    }

    fn index_columns<'a>(
        &'a self,
        _schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<IndexColumnRecord>>> {
        let mut records = Vec::new();
        for t in self.tables_matching(table) {
            for idx in &t.indexes {
                for (i, col) in idx.columns.iter().enumerate() {
                    records.push(IndexColumnRecord {
                        table: t.name.clone(),
                        index: idx.name.clone(),
                        primary_key: idx.primary_key,
                        unique: idx.unique,
                        column: col.name.clone(),
                        ordinal: i as i64 + 1,
                        ordering: Some(match col.order {
                            SortOrder::Asc => "ASC".to_string(),
                            SortOrder::Desc => "DESC".to_string(),
                        }),
                    });
                }
            }
        }
        ready(records)
    }

    fn foreign_keys<'a>(
        &'a self,
        _schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<ForeignKeyRecord>>> {
        let mut records = Vec::new();
        for t in self.tables_matching(table) {
            for fk in &t.foreign_keys {
                for (i, (column, references)) in
                    fk.columns.iter().zip(&fk.references_columns).enumerate()
                {
                    records.push(ForeignKeyRecord {
                        name: fk.name.clone(),
                        table: t.name.clone(),
                        column: column.clone(),
                        ordinal: i as i64 + 1,
                        references_table: fk.references_table.clone(),
                        references_column: references.clone(),
                    });
                }
            }
        }
        ready(records)
    }

    fn constraint_names<'a>(
        &'a self,
        _schema: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        let mut names = Vec::new();
        for t in self.tables_matching(Some(table)) {
            if t.primary_key_index().is_some() {
                names.push(format!("PK_{}", t.name));
            }
            names.extend(t.foreign_keys.iter().map(|fk| fk.name.clone()));
        }
        names.sort();
        ready(names)
    }

    fn sequences<'a>(&'a self, _schema: &'a str) -> BoxFuture<'a, Result<Vec<SequenceRecord>>> {
        let records = self
            .lock()
            .live
            .sequences
            .values()
            .map(|s| SequenceRecord {
                name: s.name.clone(),
                kind: s.kind.and_then(|k| k.option_value()).map(str::to_string),
            })
            .collect();
        ready(records)
    }

    fn database_option<'a>(
        &'a self,
        _schema: &'a str,
        option: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        let value = match option {
            "default_sequence_kind" => self.lock().live.default_sequence_kind.clone(),
            _ => None,
        };
        ready(value)
    }
}

impl DdlConnection for FakeDatabase {
    fn execute_ddl<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        let mut state = self.lock();
        let call = match sql {
            "START BATCH DDL" => DdlCall::StartBatch,
            "RUN BATCH" => DdlCall::RunBatch,
            "ABORT BATCH" => DdlCall::AbortBatch,
            _ => DdlCall::Statement(sql.to_string()),
        };
        state.calls.push(call);

        if state.hang_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
            return Box::pin(std::future::pending());
        }
        if state.fail_on.as_deref().is_some_and(|needle| sql.contains(needle)) {
            return Box::pin(std::future::ready(Err(Error::Execution {
                statement: sql.to_string(),
                message: "rejected by fake database".to_string(),
            })));
        }
        ready(())
    }
}
