//! Catalog reads and DDL over a PostgreSQL wire connection.

use tokio_postgres::Row;

use crate::catalog::{
    self, CatalogSource, ColumnRecord, ForeignKeyRecord, IndexColumnRecord, SequenceRecord,
    TableRecord, convert_rows, scoped,
};
use crate::executor::DdlConnection;
use crate::traced::{BoxFuture, Connection, ConnectionExt};
use crate::Result;

/// A wire connection used both to read the catalog and to send DDL.
///
/// Batches are connection-scoped, so one session is used for the whole of a
/// reconciliation.
pub struct PgSession<C: Connection> {
    conn: C,
}

impl<C: Connection> PgSession<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn get_ref(&self) -> &C {
        &self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    async fn query_scoped(&self, sql: &str, schema: &str, table: Option<&str>) -> Result<Vec<Row>> {
        let traced = self.conn.traced();
        let rows = match table {
            Some(table) => traced.query(sql, &[&schema, &table]).await?,
            None => traced.query(sql, &[&schema]).await?,
        };
        Ok(rows)
    }
}

impl<C: Connection> CatalogSource for PgSession<C> {
    fn tables<'a>(
        &'a self,
        schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<TableRecord>>> {
        Box::pin(async move {
            let sql = scoped(catalog::TABLES_SQL, "table_name", table, "table_name");
            let rows = self.query_scoped(&sql, schema, table).await?;
            convert_rows(&rows, catalog::table_record)
        })
    }

    fn columns<'a>(
        &'a self,
        schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<ColumnRecord>>> {
        Box::pin(async move {
            let sql = scoped(
                catalog::COLUMNS_SQL,
                "table_name",
                table,
                "table_name, ordinal_position",
            );
            let rows = self.query_scoped(&sql, schema, table).await?;
            convert_rows(&rows, catalog::column_record)
        })
    }

    fn index_columns<'a>(
        &'a self,
        schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<IndexColumnRecord>>> {
        Box::pin(async move {
            let sql = scoped(
                catalog::INDEX_COLUMNS_SQL,
                "i.table_name",
                table,
                "i.table_name, i.index_name, ic.ordinal_position",
            );
            let rows = self.query_scoped(&sql, schema, table).await?;
            convert_rows(&rows, catalog::index_column_record)
        })
    }

    fn foreign_keys<'a>(
        &'a self,
        schema: &'a str,
        table: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<ForeignKeyRecord>>> {
        Box::pin(async move {
            let sql = scoped(
                catalog::FOREIGN_KEYS_SQL,
                "tc.table_name",
                table,
                "tc.table_name, tc.constraint_name, kcu.ordinal_position",
            );
            let rows = self.query_scoped(&sql, schema, table).await?;
            convert_rows(&rows, catalog::foreign_key_record)
        })
    }

    fn constraint_names<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>>> {
        Box::pin(async move {
            let sql = scoped(
                catalog::CONSTRAINT_NAMES_SQL,
                "table_name",
                Some(table),
                "constraint_name",
            );
            let rows = self.query_scoped(&sql, schema, Some(table)).await?;
            convert_rows(&rows, catalog::constraint_name)
        })
    }

    fn sequences<'a>(&'a self, schema: &'a str) -> BoxFuture<'a, Result<Vec<SequenceRecord>>> {
        Box::pin(async move {
            let rows = self.query_scoped(catalog::SEQUENCES_SQL, schema, None).await?;
            convert_rows(&rows, catalog::sequence_record)
        })
    }

    fn database_option<'a>(
        &'a self,
        schema: &'a str,
        option: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .traced()
                .query(catalog::DATABASE_OPTION_SQL, &[&schema, &option])
                .await?;
            match rows.first() {
                Some(row) => Ok(row.try_get(0)?),
                None => Ok(None),
            }
        })
    }
}

impl<C: Connection> DdlConnection for PgSession<C> {
    fn execute_ddl<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Err(err) = self.conn.traced().batch_execute(sql).await {
                tracing::error!(statement = %sql, error = %err, "statement rejected");
                return Err(err.into());
            }
            Ok(())
        })
    }
}
