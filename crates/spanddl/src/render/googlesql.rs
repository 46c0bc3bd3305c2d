use spanddl_schema::{ColumnDescriptor, ForeignKeyDescriptor, IndexDescriptor, TableDescriptor};
use spanddl_sql::{Backticked, googlesql_ident};

use super::{DdlDialect, Statement};
use crate::Result;
use crate::config::Dialect;
use crate::diff::{ColumnDefault, MigrationAction};
use crate::mapper::{physical_type, reject_unique_constraints};

/// GoogleSQL statement builder: backtick-quoted identifiers, `PRIMARY KEY`
/// after the column list, defaults and generation expressions in
/// parentheses.
#[derive(Debug, Clone)]
pub struct GoogleSqlDialect {
    database: String,
}

impl GoogleSqlDialect {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

fn sequence_default(sequence: &str) -> String {
    format!("GET_NEXT_SEQUENCE_VALUE(Sequence {})", googlesql_ident(sequence))
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| Backticked(c).to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn column_definition(table: &str, col: &ColumnDescriptor, sequence: Option<&str>) -> Result<String> {
    reject_unique_constraints(table, [col])?;

    let mut def = format!(
        "{} {}",
        Backticked(&col.name),
        physical_type(Dialect::GoogleSql, col)
    );
    if !col.nullable {
        def.push_str(" NOT NULL");
    }
    if let Some(generated) = &col.generated {
        def.push_str(&format!(" AS ({})", generated.expression));
        if generated.stored {
            def.push_str(" STORED");
        }
    } else if let (true, Some(seq)) = (col.auto_increment, sequence) {
        def.push_str(&format!(" DEFAULT ({})", sequence_default(seq)));
    } else if let Some(expr) = &col.default {
        def.push_str(&format!(" DEFAULT ({})", expr));
    }
    Ok(def)
}

fn foreign_key_clause(fk: &ForeignKeyDescriptor) -> String {
    format!(
        "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}({})",
        Backticked(&fk.name),
        column_list(&fk.columns),
        Backticked(&fk.references_table),
        column_list(&fk.references_columns)
    )
}

fn create_table(table: &TableDescriptor) -> Result<String> {
    let sequence = table.sequence.as_ref().map(|s| s.name.as_str());
    let mut parts = Vec::with_capacity(table.columns.len() + table.foreign_keys.len());
    for col in &table.columns {
        parts.push(column_definition(&table.name, col, sequence)?);
    }
    for fk in &table.foreign_keys {
        parts.push(foreign_key_clause(fk));
    }

    let key = table
        .primary_key_index()
        .map(|pk| {
            pk.columns
                .iter()
                .map(|c| c.to_sql(|name| Backticked(name).to_string()))
                .collect::<Vec<_>>()
                .join(",")
        })
        .unwrap_or_default();

    let mut sql = format!(
        "CREATE TABLE {} ({}) PRIMARY KEY ({})",
        Backticked(&table.name),
        parts.join(","),
        key
    );
    if let Some(interleave) = &table.interleave {
        let on_delete = if interleave.on_delete_cascade {
            "CASCADE"
        } else {
            "NO ACTION"
        };
        sql.push_str(&format!(
            ", INTERLEAVE IN PARENT {} ON DELETE {}",
            Backticked(&interleave.parent),
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
        .map(|c| c.to_sql(|name| Backticked(name).to_string()))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "CREATE {}INDEX {} ON {}({})",
        unique,
        Backticked(&idx.name),
        Backticked(&idx.table),
        columns
    )
}

impl DdlDialect for GoogleSqlDialect {
    fn dialect(&self) -> Dialect {
        Dialect::GoogleSql
    }

    fn render(&self, action: &MigrationAction) -> Result<Statement> {
        let sql = match action {
            MigrationAction::SetDefaultSequenceKind(kind) => format!(
                "ALTER DATABASE {} SET OPTIONS (default_sequence_kind = '{}')",
                googlesql_ident(&self.database),
                kind
            ),
            MigrationAction::CreateSequence(seq) => {
                let mut sql = format!("CREATE SEQUENCE IF NOT EXISTS {}", googlesql_ident(&seq.name));
                if let Some(kind) = seq.kind.and_then(|k| k.option_value()) {
                    sql.push_str(&format!(
                        " OPTIONS (sequence_kind = {})",
                        spanddl_sql::escape_googlesql_string(kind)
                    ));
                }
                sql
            }
            MigrationAction::DropSequence(name) => {
                format!("DROP SEQUENCE IF EXISTS {}", googlesql_ident(name))
            }
            MigrationAction::CreateTable(table) => create_table(table)?,
            MigrationAction::DropTable(name) => format!("DROP TABLE {}", Backticked(name)),
            MigrationAction::AddColumn {
                table,
                column,
                sequence,
            } => format!(
                "ALTER TABLE {} ADD COLUMN {}",
                Backticked(table),
                column_definition(table, column, sequence.as_deref())?
            ),
            // Both alterations restate the whole column definition
            MigrationAction::AlterColumnType {
                table,
                column,
                sequence,
                ..
            }
            | MigrationAction::AlterColumnNullability {
                table,
                column,
                sequence,
            } => format!(
                "ALTER TABLE {} ALTER COLUMN {}",
                Backticked(table),
                column_definition(table, column, sequence.as_deref())?
            ),
            MigrationAction::AlterColumnDefault {
                table,
                column,
                default,
            } => {
                let change = match default {
                    ColumnDefault::None => "DROP DEFAULT".to_string(),
                    ColumnDefault::Expr(expr) => format!("SET DEFAULT ({})", expr),
                    ColumnDefault::Sequence(seq) => {
                        format!("SET DEFAULT ({})", sequence_default(seq))
                    }
                };
                format!(
                    "ALTER TABLE {} ALTER COLUMN {} {}",
                    Backticked(table),
                    Backticked(column),
                    change
                )
            }
            MigrationAction::CreateIndex(idx) => create_index(idx),
            MigrationAction::DropIndex(idx) => format!("DROP INDEX {}", Backticked(&idx.name)),
            MigrationAction::AddForeignKey(fk) => format!(
                "ALTER TABLE {} ADD {}",
                Backticked(&fk.table),
                foreign_key_clause(fk)
            ),
            MigrationAction::DropForeignKey(fk) => format!(
                "ALTER TABLE {} DROP CONSTRAINT {}",
                Backticked(&fk.table),
                Backticked(&fk.name)
            ),
        };
        Ok(Statement::new(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fixtures::{albums, singers, tracks};
    use crate::Error;
    use spanddl_schema::{LogicalType, SequenceDescriptor, SequenceKind};

    fn render_all(actions: &[MigrationAction]) -> String {
        let dialect = GoogleSqlDialect::new("music");
        actions
            .iter()
            .map(|a| dialect.render(a).unwrap().sql)
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn snapshot_create_music_schema() {
        let singers = singers();
        let actions = vec![
            MigrationAction::CreateSequence(singers.sequence.clone().unwrap()),
            MigrationAction::CreateTable(singers),
            MigrationAction::CreateTable(albums()),
            MigrationAction::CreateTable(tracks()),
            MigrationAction::CreateIndex(
                IndexDescriptor::new("idx_albums_title", "albums", ["title"]).unique(),
            ),
        ];
        insta::assert_snapshot!(render_all(&actions), @r#"
        CREATE SEQUENCE IF NOT EXISTS singers_seq OPTIONS (sequence_kind = "bit_reversed_positive")
        CREATE TABLE `singers` (`id` INT64 NOT NULL DEFAULT (GET_NEXT_SEQUENCE_VALUE(Sequence singers_seq)),`first_name` STRING(200),`last_name` STRING(MAX) NOT NULL,`full_name` STRING(MAX) AS (first_name || ' ' || last_name) STORED,`active` BOOL DEFAULT (true)) PRIMARY KEY (`id`)
        CREATE TABLE `albums` (`id` INT64 NOT NULL,`singer_id` INT64 NOT NULL,`title` STRING(MAX),`cover` BYTES(MAX),`tags` ARRAY<STRING(MAX)>,CONSTRAINT `fk_singers_albums` FOREIGN KEY (`singer_id`) REFERENCES `singers`(`id`)) PRIMARY KEY (`id`)
        CREATE TABLE `tracks` (`id` INT64 NOT NULL,`track_number` INT64 NOT NULL,`sample_rate` FLOAT64) PRIMARY KEY (`id`,`track_number`), INTERLEAVE IN PARENT `albums` ON DELETE CASCADE
        CREATE UNIQUE INDEX `idx_albums_title` ON `albums`(`title`)
        "#);
    }

    #[test]
    fn snapshot_alterations() {
        let title = ColumnDescriptor::new("title", LogicalType::String).length(64).not_null();
        let actions = vec![
            MigrationAction::AddColumn {
                table: "albums".into(),
                column: ColumnDescriptor::new("released", LogicalType::Date),
                sequence: None,
            },
            MigrationAction::AlterColumnType {
                table: "albums".into(),
                column: title.clone(),
                from: "STRING(MAX)".into(),
                sequence: None,
            },
            MigrationAction::AlterColumnNullability {
                table: "albums".into(),
                column: title,
                sequence: None,
            },
            MigrationAction::AlterColumnDefault {
                table: "singers".into(),
                column: "active".into(),
                default: ColumnDefault::None,
            },
            MigrationAction::AlterColumnDefault {
                table: "singers".into(),
                column: "id".into(),
                default: ColumnDefault::Sequence("singers_seq".into()),
            },
            MigrationAction::AddForeignKey(albums().foreign_keys[0].clone()),
            MigrationAction::DropForeignKey(albums().foreign_keys[0].clone()),
            MigrationAction::DropIndex(IndexDescriptor::new(
                "idx_albums_deleted_at",
                "albums",
                ["deleted_at"],
            )),
            MigrationAction::DropTable("albums".into()),
            MigrationAction::DropSequence("singers_seq".into()),
            MigrationAction::SetDefaultSequenceKind(SequenceKind::BitReversedPositive),
        ];
        insta::assert_snapshot!(render_all(&actions), @r"
        ALTER TABLE `albums` ADD COLUMN `released` DATE
        ALTER TABLE `albums` ALTER COLUMN `title` STRING(64) NOT NULL
        ALTER TABLE `albums` ALTER COLUMN `title` STRING(64) NOT NULL
        ALTER TABLE `singers` ALTER COLUMN `active` DROP DEFAULT
        ALTER TABLE `singers` ALTER COLUMN `id` SET DEFAULT (GET_NEXT_SEQUENCE_VALUE(Sequence singers_seq))
        ALTER TABLE `albums` ADD CONSTRAINT `fk_singers_albums` FOREIGN KEY (`singer_id`) REFERENCES `singers`(`id`)
        ALTER TABLE `albums` DROP CONSTRAINT `fk_singers_albums`
        DROP INDEX `idx_albums_deleted_at`
        DROP TABLE `albums`
        DROP SEQUENCE IF EXISTS singers_seq
        ALTER DATABASE music SET OPTIONS (default_sequence_kind = 'bit_reversed_positive')
        ");
    }

    #[test]
    fn test_reserved_names_are_quoted() {
        let seq = SequenceDescriptor::for_table("order", SequenceKind::Monotonic);
        assert_eq!(seq.name, "order_seq");
        let actions = vec![
            MigrationAction::CreateSequence(SequenceDescriptor {
                name: "select".into(),
                kind: Some(SequenceKind::Monotonic),
                exists: false,
            }),
            MigrationAction::DropTable("order".into()),
        ];
        assert_eq!(
            render_all(&actions),
            "CREATE SEQUENCE IF NOT EXISTS `select`\nDROP TABLE `order`"
        );
    }

    #[test]
    fn test_unique_column_rejected() {
        let table = TableDescriptor::new("bs")
            .column(ColumnDescriptor::new("sha256", LogicalType::String).unique());
        let err = GoogleSqlDialect::new("db")
            .render(&MigrationAction::CreateTable(table))
            .unwrap_err();
        assert!(matches!(err, Error::UniqueConstraintNotSupported { .. }));
    }
}
