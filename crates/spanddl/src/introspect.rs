//! Build a live schema snapshot from catalog rows.
//!
//! Every fact is attached to the table named on its own row. Nothing is
//! looked up by column name alone, so a unique index on `bs.sha256` can
//! never make `as.sha256` look unique.

use indexmap::IndexMap;
use spanddl_schema::{
    ColumnDescriptor, ForeignKeyDescriptor, GeneratedColumn, IndexColumn, IndexDescriptor,
    Interleave, PRIMARY_KEY_INDEX, Schema, SequenceDescriptor, SequenceKind, SortOrder,
    TableDescriptor,
};
use spanddl_sql::unquote_ident;

use crate::Result;
use crate::catalog::{
    CatalogRows, CatalogSource, ColumnRecord, ForeignKeyRecord, IndexColumnRecord,
    check_ordinal, fetch_rows,
};
use crate::mapper::{logical_type, strip_cast, strip_outer_parens};

/// The schema as observed in the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveSchema {
    /// Base tables
    pub schema: Schema,
    /// Every sequence in the schema, attached to a table or not
    pub sequences: IndexMap<String, SequenceDescriptor>,
    /// Raw value of the `default_sequence_kind` database option
    pub default_sequence_kind: Option<String>,
}

impl LiveSchema {
    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&TableDescriptor> {
        self.schema.get_table(name)
    }

    /// Whether a sequence with this name exists.
    pub fn has_sequence(&self, name: &str) -> bool {
        self.sequences.contains_key(name)
    }
}

/// Introspect one table, or every table when `table` is `None`.
///
/// A missing table is simply absent from the result.
pub async fn introspect<S: CatalogSource + ?Sized>(
    source: &S,
    schema: &str,
    table: Option<&str>,
) -> Result<LiveSchema> {
    let rows = fetch_rows(source, schema, table).await?;
    let live = assemble(rows)?;
    tracing::debug!(
        tables = live.schema.tables.len(),
        sequences = live.sequences.len(),
        "introspected live schema"
    );
    Ok(live)
}

/// Turn raw catalog rows into descriptors.
///
/// Rows naming a table that is not a base table (views, or tables filtered
/// out of the table list) are ignored.
pub fn assemble(rows: CatalogRows) -> Result<LiveSchema> {
    let sequences: IndexMap<String, SequenceDescriptor> = rows
        .sequences
        .into_iter()
        .map(|record| {
            let descriptor = SequenceDescriptor {
                name: record.name.clone(),
                kind: record
                    .kind
                    .as_deref()
                    .and_then(SequenceKind::from_option_value),
                exists: true,
            };
            (record.name, descriptor)
        })
        .collect();

    let mut tables: IndexMap<String, TableDescriptor> = IndexMap::new();
    for record in rows.tables {
        let mut table = TableDescriptor::new(record.name.clone());
        table.interleave = record.parent.map(|parent| Interleave {
            parent,
            on_delete_cascade: record
                .on_delete
                .as_deref()
                .is_some_and(|action| action.eq_ignore_ascii_case("CASCADE")),
        });
        tables.insert(record.name, table);
    }

    let mut columns = rows.columns;
    columns.sort_by(|a, b| a.table.cmp(&b.table).then(a.ordinal.cmp(&b.ordinal)));
    for record in columns {
        check_ordinal(&record.table, &format!("column {}", record.name), record.ordinal)?;
        let Some(table) = tables.get_mut(&record.table) else {
            continue;
        };
        let sequence = live_column(table, record);
        if let Some(name) = sequence {
            let existing = sequences.get(&name).cloned();
            table.sequence = Some(existing.unwrap_or(SequenceDescriptor {
                name,
                kind: None,
                exists: false,
            }));
        }
    }

    for index in group_indexes(rows.index_columns)? {
        if let Some(table) = tables.get_mut(&index.table) {
            attach_index(table, index);
        }
    }
    for table in tables.values_mut() {
        // Primary key first, secondary indexes by name
        table
            .indexes
            .sort_by(|a, b| b.primary_key.cmp(&a.primary_key).then(a.name.cmp(&b.name)));
    }

    for fk in group_foreign_keys(rows.foreign_keys)? {
        if let Some(table) = tables.get_mut(&fk.table) {
            table.foreign_keys.push(fk);
        }
    }

    Ok(LiveSchema {
        schema: Schema { tables },
        sequences,
        default_sequence_kind: rows.default_sequence_kind,
    })
}

/// Add a catalog column to its table. Returns the backing sequence name
/// when the column draws its values from one.
fn live_column(table: &mut TableDescriptor, record: ColumnRecord) -> Option<String> {
    let (data_type, length) = logical_type(&record.spanner_type);
    let mut col = ColumnDescriptor::new(record.name, data_type);
    col.nullable = record.nullable;
    col.length = length;
    col.physical_type = Some(record.spanner_type);
    col.generated = record.generation_expression.map(|expression| GeneratedColumn {
        expression: strip_outer_parens(expression.trim())
            .unwrap_or(expression.trim())
            .to_string(),
        stored: true,
    });

    let sequence = record.default.as_deref().and_then(sequence_from_default);
    if sequence.is_some() || record.is_identity {
        col.auto_increment = true;
    } else {
        col.default = record.default;
    }

    table.columns.push(col);
    sequence
}

/// Name of the sequence a column default draws from, if it does.
///
/// Recognizes `nextval('<seq>'::regclass)` and
/// `GET_NEXT_SEQUENCE_VALUE(SEQUENCE <seq>)`, with any letter case and
/// optional surrounding parentheses.
pub fn sequence_from_default(default: &str) -> Option<String> {
    let mut expr = default.trim();
    while let Some(inner) = strip_outer_parens(expr) {
        expr = inner.trim();
    }

    let open = expr.find('(')?;
    let function = expr[..open].trim();
    let args = expr[open + 1..].strip_suffix(')')?.trim();

    if function.eq_ignore_ascii_case("nextval") {
        let arg = strip_cast(args).trim();
        let arg = arg.strip_prefix('\'')?.strip_suffix('\'')?;
        return non_empty(unquote_ident(arg));
    }

    if function.eq_ignore_ascii_case("get_next_sequence_value") {
        let (keyword, name) = args.split_once(char::is_whitespace)?;
        if !keyword.eq_ignore_ascii_case("sequence") {
            return None;
        }
        return non_empty(unquote_ident(name.trim()));
    }

    None
}

fn non_empty(name: String) -> Option<String> {
    (!name.is_empty()).then_some(name)
}

/// Group index column rows into descriptors, columns in key order.
fn group_indexes(records: Vec<IndexColumnRecord>) -> Result<Vec<IndexDescriptor>> {
    let mut grouped: IndexMap<(String, String), (IndexDescriptor, Vec<(i64, IndexColumn)>)> =
        IndexMap::new();

    for record in records {
        check_ordinal(
            &record.table,
            &format!("index {} column {}", record.index, record.column),
            record.ordinal,
        )?;
        let order = match record.ordering.as_deref() {
            Some(o) if o.eq_ignore_ascii_case("DESC") => SortOrder::Desc,
            _ => SortOrder::Asc,
        };
        let entry = grouped
            .entry((record.table.clone(), record.index.clone()))
            .or_insert_with(|| {
                let name = if record.primary_key {
                    PRIMARY_KEY_INDEX.to_string()
                } else {
                    record.index.clone()
                };
                let mut index = IndexDescriptor::new(name, record.table.clone(), Vec::<String>::new());
                index.unique = record.unique || record.primary_key;
                index.primary_key = record.primary_key;
                (index, Vec::new())
            });
        entry.1.push((
            record.ordinal,
            IndexColumn {
                name: record.column,
                order,
            },
        ));
    }

    Ok(grouped
        .into_values()
        .map(|(mut index, mut columns)| {
            columns.sort_by_key(|(ordinal, _)| *ordinal);
            index.columns = columns.into_iter().map(|(_, c)| c).collect();
            index
        })
        .collect())
}

/// Record an index on its table and mirror it onto the column flags.
fn attach_index(table: &mut TableDescriptor, index: IndexDescriptor) {
    if index.primary_key {
        for col in &mut table.columns {
            if index.columns.iter().any(|c| c.name == col.name) {
                col.primary_key = true;
            }
        }
    } else if index.unique && index.columns.len() == 1 {
        let only = &index.columns[0].name;
        if let Some(col) = table.columns.iter_mut().find(|c| &c.name == only) {
            col.unique = true;
        }
    }
    table.indexes.push(index);
}

fn group_foreign_keys(records: Vec<ForeignKeyRecord>) -> Result<Vec<ForeignKeyDescriptor>> {
    let mut grouped: IndexMap<(String, String), Vec<ForeignKeyRecord>> = IndexMap::new();
    for record in records {
        check_ordinal(
            &record.table,
            &format!("foreign key {} column {}", record.name, record.column),
            record.ordinal,
        )?;
        grouped
            .entry((record.table.clone(), record.name.clone()))
            .or_default()
            .push(record);
    }

    Ok(grouped
        .into_iter()
        .filter_map(|((table, name), mut records)| {
            records.sort_by_key(|r| r.ordinal);
            let references_table = records.first()?.references_table.clone();
            Some(ForeignKeyDescriptor {
                name,
                table,
                columns: records.iter().map(|r| r.column.clone()).collect(),
                references_table,
                references_columns: records.iter().map(|r| r.references_column.clone()).collect(),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{SequenceRecord, TableRecord};

    fn table(name: &str) -> TableRecord {
        TableRecord {
            name: name.to_string(),
            parent: None,
            on_delete: None,
        }
    }

    fn column(table: &str, name: &str, ordinal: i64, ty: &str) -> ColumnRecord {
        ColumnRecord {
            table: table.to_string(),
            name: name.to_string(),
            ordinal,
            nullable: true,
            spanner_type: ty.to_string(),
            default: None,
            generation_expression: None,
            is_identity: false,
        }
    }

    fn index_column(
        table: &str,
        index: &str,
        column: &str,
        ordinal: i64,
        unique: bool,
    ) -> IndexColumnRecord {
        IndexColumnRecord {
            table: table.to_string(),
            index: index.to_string(),
            primary_key: index == PRIMARY_KEY_INDEX,
            unique,
            column: column.to_string(),
            ordinal,
            ordering: Some("ASC".to_string()),
        }
    }

    #[test]
    fn test_unique_index_does_not_leak_across_tables() {
        let rows = CatalogRows {
            tables: vec![table("as"), table("bs")],
            columns: vec![
                column("as", "id", 1, "bigint"),
                column("as", "sha256", 2, "character varying"),
                column("bs", "id", 1, "bigint"),
                column("bs", "sha256", 2, "character varying"),
            ],
            index_columns: vec![
                index_column("as", PRIMARY_KEY_INDEX, "id", 1, true),
                index_column("bs", PRIMARY_KEY_INDEX, "id", 1, true),
                index_column("bs", "uq_bs_sha256", "sha256", 1, true),
            ],
            ..Default::default()
        };
        let live = assemble(rows).unwrap();

        let a = live.get_table("as").unwrap();
        assert!(!a.get_column("sha256").unwrap().unique);
        assert_eq!(a.indexes.len(), 1);

        let b = live.get_table("bs").unwrap();
        assert!(b.get_column("sha256").unwrap().unique);
        assert_eq!(b.indexes[0].name, PRIMARY_KEY_INDEX);
        assert_eq!(b.indexes[1].name, "uq_bs_sha256");
    }

    #[test]
    fn test_columns_follow_ordinal_position() {
        let rows = CatalogRows {
            tables: vec![table("singers")],
            columns: vec![
                column("singers", "last_name", 3, "STRING(MAX)"),
                column("singers", "id", 1, "INT64"),
                column("singers", "first_name", 2, "STRING(1024)"),
                column("singers_view", "x", 1, "INT64"),
            ],
            ..Default::default()
        };
        let live = assemble(rows).unwrap();
        let singers = live.get_table("singers").unwrap();
        let names: Vec<_> = singers.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "first_name", "last_name"]);
        assert_eq!(singers.columns[1].length, Some(1024));
        assert_eq!(
            singers.columns[2].physical_type.as_deref(),
            Some("STRING(MAX)")
        );
        assert!(live.get_table("singers_view").is_none());
    }

    #[test]
    fn test_sequence_backed_default_is_auto_increment() {
        let mut id = column("singers", "id", 1, "bigint");
        id.default = Some("nextval('singers_seq'::regclass)".to_string());
        id.nullable = false;
        let rows = CatalogRows {
            tables: vec![table("singers")],
            columns: vec![id],
            sequences: vec![SequenceRecord {
                name: "singers_seq".to_string(),
                kind: Some("bit_reversed_positive".to_string()),
            }],
            ..Default::default()
        };
        let live = assemble(rows).unwrap();
        let singers = live.get_table("singers").unwrap();
        let id = singers.get_column("id").unwrap();
        assert!(id.auto_increment);
        assert_eq!(id.default, None);
        let seq = singers.sequence.as_ref().unwrap();
        assert_eq!(seq.name, "singers_seq");
        assert_eq!(seq.kind, Some(SequenceKind::BitReversedPositive));
        assert!(seq.exists);
    }

    #[test]
    fn test_sequence_from_default() {
        assert_eq!(
            sequence_from_default("nextval('singers_seq'::regclass)").as_deref(),
            Some("singers_seq")
        );
        assert_eq!(
            sequence_from_default("nextval('\"Singers_seq\"')").as_deref(),
            Some("Singers_seq")
        );
        assert_eq!(
            sequence_from_default("(GET_NEXT_SEQUENCE_VALUE(Sequence albums_seq))").as_deref(),
            Some("albums_seq")
        );
        assert_eq!(
            sequence_from_default("get_next_sequence_value(SEQUENCE `tracks_seq`)").as_deref(),
            Some("tracks_seq")
        );
        assert_eq!(sequence_from_default("0"), None);
        assert_eq!(sequence_from_default("CURRENT_TIMESTAMP()"), None);
        assert_eq!(sequence_from_default("upper('x')"), None);
    }

    #[test]
    fn test_interleave_and_foreign_keys() {
        let mut albums = table("albums");
        albums.parent = Some("singers".to_string());
        albums.on_delete = Some("CASCADE".to_string());
        let fk = |column: &str, ordinal: i64, references: &str| ForeignKeyRecord {
            name: "fk_venues_concerts".to_string(),
            table: "concerts".to_string(),
            column: column.to_string(),
            ordinal,
            references_table: "venues".to_string(),
            references_column: references.to_string(),
        };
        let rows = CatalogRows {
            tables: vec![table("singers"), albums, table("venues"), table("concerts")],
            foreign_keys: vec![fk("venue_city", 2, "city"), fk("venue_id", 1, "id")],
            ..Default::default()
        };
        let live = assemble(rows).unwrap();

        let interleave = live.get_table("albums").unwrap().interleave.as_ref().unwrap();
        assert_eq!(interleave.parent, "singers");
        assert!(interleave.on_delete_cascade);

        let concerts = live.get_table("concerts").unwrap();
        assert_eq!(concerts.foreign_keys.len(), 1);
        assert_eq!(concerts.foreign_keys[0].columns, vec!["venue_id", "venue_city"]);
        assert_eq!(concerts.foreign_keys[0].references_columns, vec!["id", "city"]);
    }
}
