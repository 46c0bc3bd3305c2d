use spanddl_schema::{ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, LogicalType, TableDescriptor};
use spanddl_sql::{Ident, Lit, quote_ident};

use super::{DdlDialect, Statement};
use crate::Result;
use crate::config::Dialect;
use crate::diff::{ColumnDefault, MigrationAction};
use crate::mapper::{physical_type, reject_unique_constraints};

/// PostgreSQL-interface statement builder.
///
/// Spanner-specific clauses (`INTERLEAVE IN PARENT`, bit-reversed sequences)
/// use the spellings the PostgreSQL interface accepts.
#[derive(Debug, Clone)]
pub struct PostgresDialect {
    database: String,
}

impl PostgresDialect {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

fn sequence_default(sequence: &str) -> String {
    format!("nextval({})", Lit(sequence))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(",")
}

fn column_definition(table: &str, col: &ColumnDescriptor, sequence: Option<&str>) -> Result<String> {
    reject_unique_constraints(table, [col])?;

    let mut def = format!("{} {}", Ident(&col.name), physical_type(Dialect::PostgreSql, col));
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(generated) = &col.generated {
        def.push_str(&format!(" GENERATED ALWAYS AS ({})", generated.expression));
        if generated.stored {
            def.push_str(" STORED");
        }
    } else if let (true, Some(seq)) = (col.auto_increment, sequence) {
        def.push_str(&format!(" DEFAULT {}", sequence_default(seq)));
    } else if let Some(expr) = &col.default {
        def.push_str(&format!(" DEFAULT {}", expr));
    }
    Ok(def)
}

fn foreign_key_clause(fk: &ForeignKeyDescriptor) -> String {
    format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
        Ident(&fk.name),
        column_list(&fk.columns),
        Ident(&fk.references_table),
        column_list(&fk.references_columns)
    )
}

fn create_table(table: &TableDescriptor) -> Result<String> {
    let sequence = table.sequence.as_ref().map(|s| s.name.as_str());
    let mut parts = Vec::with_capacity(table.columns.len() + table.foreign_keys.len() + 1);
    for col in &table.columns {
        parts.push(column_definition(&table.name, col, sequence)?);
    }
    if let Some(pk) = table.primary_key_index() {
        let key = pk
            .columns
            .iter()
            .map(|c| c.to_sql(quote_ident))
            .collect::<Vec<_>>()
            .join(",");
        parts.push(format!("PRIMARY KEY ({})", key));
    }
    for fk in &table.foreign_keys {
        parts.push(foreign_key_clause(fk));
    }

    let mut sql = format!("CREATE TABLE {} ({})", Ident(&table.name), parts.join(","));
    if let Some(interleave) = &table.interleave {
        let on_delete = if interleave.on_delete_cascade {
            "CASCADE"
        } else {
            "NO ACTION"
        };
        sql.push_str(&format!(
            " INTERLEAVE IN PARENT {} ON DELETE {}",
            Ident(&interleave.parent),
            on_delete
        ));
    }
    Ok(sql)
}

fn create_index(idx: &IndexDescriptor) -> String {
    let unique = if idx.unique { "UNIQUE " } else { "" };
    let columns = idx
        .columns
        .iter()
        .map(|c| c.to_sql(quote_ident))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        unique,
        Ident(&idx.name),
        Ident(&idx.table),
        columns
    )
}

fn alter_column(table: &str, column: &str, change: &str) -> String {
    format!("ALTER TABLE {} ALTER COLUMN {} {}", Ident(table), Ident(column), change)
}

impl DdlDialect for PostgresDialect {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    fn render(&self, action: &MigrationAction) -> Result<Statement> {
        let sql = match action {
            MigrationAction::SetDefaultSequenceKind(kind) => format!(
                "alter database {} set spanner.default_sequence_kind = {}",
                Ident(&self.database),
                Lit(kind.to_string())
            ),
            MigrationAction::CreateSequence(seq) => {
                let mut sql = format!("CREATE SEQUENCE IF NOT EXISTS {}", Ident(&seq.name));
                if let Some(kind) = seq.kind.and_then(|k| k.option_value()) {
                    sql.push(' ');
                    sql.push_str(&kind.to_ascii_uppercase());
                }
                sql
            }
            MigrationAction::DropSequence(name) => {
                format!("DROP SEQUENCE IF EXISTS {}", Ident(name))
            }
            MigrationAction::CreateTable(table) => create_table(table)?,
            MigrationAction::DropTable(name) => format!("DROP TABLE IF EXISTS {}", Ident(name)),
            MigrationAction::AddColumn {
                table,
                column,
                sequence,
            } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                Ident(table),
                column_definition(table, column, sequence.as_deref())?
            ),
            MigrationAction::AlterColumnType { table, column, .. } => {
                let mut change = format!("TYPE {}", physical_type(Dialect::PostgreSql, column));
                // No implicit cast from the integer and text columns this usually replaces
                if column.data_type == LogicalType::Bool {
                    change.push_str(&format!(" USING {}::boolean", Ident(&column.name)));
                }
                alter_column(table, &column.name, &change)
            }
            MigrationAction::AlterColumnNullability { table, column, .. } => {
                let change = if column.nullable {
                    "DROP NOT NULL"
                } else {
                    "SET NOT NULL"
                };
                alter_column(table, &column.name, change)
            }
            MigrationAction::AlterColumnDefault {
                table,
                column,
                default,
            } => {
                let change = match default {
                    ColumnDefault::None => "DROP DEFAULT".to_string(),
                    ColumnDefault::Expr(expr) => format!("SET DEFAULT {}", expr),
                    ColumnDefault::Sequence(seq) => format!("SET DEFAULT {}", sequence_default(seq)),
                };
                alter_column(table, column, &change)
            }
            MigrationAction::CreateIndex(idx) => create_index(idx),
            MigrationAction::DropIndex(idx) => format!("DROP INDEX IF EXISTS {}", Ident(&idx.name)),
            MigrationAction::AddForeignKey(fk) => format!(
                "ALTER TABLE {} ADD {}",
                Ident(&fk.table),
                foreign_key_clause(fk)
            ),
            MigrationAction::DropForeignKey(fk) => format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                Ident(&fk.table),
                Ident(&fk.name)
            ),
        };
        Ok(Statement::new(sql))
    }
}
