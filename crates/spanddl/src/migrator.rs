//! The reconciliation entry point.
//!
//! ```ignore
//! let config = Config::from_env()?;
//! let mut migrator = Migrator::from_pool(&pool, config).await?;
//! let plan = migrator.auto_migrate(&desired).await?;
//! println!("{plan}");
//! ```

use std::future::Future;
use std::time::Instant;

use spanddl_schema::{ColumnDescriptor, IndexDescriptor, Schema, TableDescriptor};
use tracing::Instrument;

use crate::catalog::CatalogSource;
use crate::config::{Config, GENERATED_ID_COLUMN};
use crate::diff::{self, MigrationAction, Plan, normalize_desired};
use crate::executor::{DdlConnection, ExecutionMode, execute, stop_signal};
use crate::introspect::{LiveSchema, introspect};
use crate::render::{self, DdlDialect, Statement};
use crate::session::PgSession;
use crate::{Error, Result};

/// Reconciles a database schema with a desired one over a single
/// connection.
///
/// Methods that send DDL take `&mut self`: a batch belongs to the connection
/// and two reconciliations must never share one.
pub struct Migrator<C> {
    conn: C,
    config: Config,
    dialect: Box<dyn DdlDialect>,
}

impl Migrator<PgSession<deadpool_postgres::Object>> {
    /// Take a connection out of `pool` for the lifetime of the migrator.
    pub async fn from_pool(pool: &deadpool_postgres::Pool, config: Config) -> Result<Self> {
        let conn = pool.get().await?;
        Ok(Self::new(PgSession::new(conn), config))
    }
}

impl<C: CatalogSource + DdlConnection> Migrator<C> {
    pub fn new(conn: C, config: Config) -> Self {
        let dialect = render::for_config(&config);
        Self {
            conn,
            config,
            dialect,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    fn mode(&self) -> ExecutionMode {
        if self.config.disable_batching {
            ExecutionMode::Unbatched
        } else {
            ExecutionMode::Batched
        }
    }

    /// Snapshot of one table, or of the whole schema.
    pub async fn live_schema(&self, table: Option<&str>) -> Result<LiveSchema> {
        introspect(&self.conn, &self.config.schema, table).await
    }

    /// Compute the actions that bring the database to `desired` without
    /// running them.
    pub async fn plan(&self, desired: &Schema) -> Result<Plan> {
        let live = self.live_schema(None).await?;
        diff::plan(&live, desired, &self.config)
    }

    /// Render a plan in the configured dialect.
    pub fn statements(&self, plan: &Plan) -> Result<Vec<Statement>> {
        plan.statements(self.dialect.as_ref())
    }

    /// Run a previously computed plan.
    pub async fn execute(&mut self, plan: &Plan) -> Result<()> {
        let statements = self.statements(plan)?;
        let stop = stop_signal(std::future::pending(), self.config.ddl_timeout);
        execute(&self.conn, &statements, self.mode(), stop).await
    }

    /// Bring the database to `desired` and return what was done.
    pub async fn auto_migrate(&mut self, desired: &Schema) -> Result<Plan> {
        self.auto_migrate_with_cancel(desired, std::future::pending())
            .await
    }

    /// Like [`auto_migrate`](Self::auto_migrate), giving up with
    /// [`Error::Cancelled`] when `cancel` resolves first. An open batch is
    /// aborted before returning.
    ///
    /// `ddl_timeout` counts from the start of the call.
    pub async fn auto_migrate_with_cancel(
        &mut self,
        desired: &Schema,
        cancel: impl Future<Output = ()>,
    ) -> Result<Plan> {
        let span = tracing::info_span!(
            "spanddl.auto_migrate",
            tables = desired.tables.len(),
            dialect = %self.config.dialect,
        );
        async move {
            let start = Instant::now();
            let mut stop = std::pin::pin!(stop_signal(cancel, self.config.ddl_timeout));

            let plan = tokio::select! {
                biased;
                err = &mut stop => return Err(err),
                plan = self.plan(desired) => plan?,
            };
            if plan.is_empty() {
                tracing::info!("schema is up to date");
                return Ok(plan);
            }

            let statements = self.statements(&plan)?;
            execute(&self.conn, &statements, self.mode(), stop).await?;
            tracing::info!(
                statements = statements.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "schema reconciled"
            );
            Ok(plan)
        }
        .instrument(span)
        .await
    }

    /// The statements [`auto_migrate`](Self::auto_migrate) would run.
    ///
    /// They are sent inside a batch that is always aborted, so the database
    /// checks them without anything being applied.
    pub async fn auto_migrate_dry_run(&mut self, desired: &Schema) -> Result<Vec<Statement>> {
        let span = tracing::info_span!("spanddl.dry_run", tables = desired.tables.len());
        async move {
            let plan = self.plan(desired).await?;
            let statements = self.statements(&plan)?;
            let stop = stop_signal(std::future::pending(), self.config.ddl_timeout);
            execute(&self.conn, &statements, ExecutionMode::DryRun, stop).await?;
            Ok(statements)
        }
        .instrument(span)
        .await
    }

    async fn run(&mut self, actions: Vec<MigrationAction>) -> Result<()> {
        self.execute(&Plan { actions }).await
    }

    pub async fn has_table(&self, table: &str) -> Result<bool> {
        let tables = self.conn.tables(&self.config.schema, Some(table)).await?;
        Ok(!tables.is_empty())
    }

    pub async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let live = self.live_schema(Some(table)).await?;
        Ok(live
            .get_table(table)
            .is_some_and(|t| t.get_column(column).is_some()))
    }

    pub async fn has_index(&self, table: &str, index: &str) -> Result<bool> {
        let live = self.live_schema(Some(table)).await?;
        Ok(live
            .get_table(table)
            .is_some_and(|t| t.get_index(index).is_some()))
    }

    /// Whether `table` has a constraint named `name`, of any kind.
    pub async fn has_constraint(&self, table: &str, name: &str) -> Result<bool> {
        let names = self.conn.constraint_names(&self.config.schema, table).await?;
        Ok(names.iter().any(|n| n == name))
    }

    /// Create an index declared on `table`, unless it already exists.
    pub async fn create_index(&mut self, table: &TableDescriptor, name: &str) -> Result<()> {
        let desired = normalize_desired(&Schema::from_tables([table.clone()])?, &self.config)?;
        let Some(index) = desired
            .get_table(&table.name)
            .and_then(|t| t.get_index(name))
            .filter(|idx| !idx.primary_key)
            .cloned()
        else {
            return Err(Error::IndexNotDeclared {
                table: table.name.clone(),
                index: name.to_string(),
            });
        };

        if self.has_index(&table.name, name).await? {
            tracing::debug!(table = %table.name, index = %name, "index already exists");
            return Ok(());
        }
        self.run(vec![MigrationAction::CreateIndex(index)]).await
    }

    /// Drop a secondary index if it exists.
    pub async fn drop_index(&mut self, table: &str, name: &str) -> Result<()> {
        let live = self.live_schema(Some(table)).await?;
        match live.get_table(table).and_then(|t| t.get_index(name)) {
            Some(index) if !index.primary_key => {
                let action = MigrationAction::DropIndex(index.clone());
                self.run(vec![action]).await
            }
            _ => {
                tracing::debug!(table, index = %name, "no secondary index to drop");
                Ok(())
            }
        }
    }

    /// Indexes of `table`, primary key first, then by name.
    pub async fn get_indexes(&self, table: &str) -> Result<Vec<IndexDescriptor>> {
        let live = self.live_schema(Some(table)).await?;
        Ok(live
            .get_table(table)
            .map(|t| t.indexes.clone())
            .unwrap_or_default())
    }

    /// Columns of `table` with their physical types.
    pub async fn column_types(&self, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let live = self.live_schema(Some(table)).await?;
        let Some(t) = live.get_table(table) else {
            return Ok(Vec::new());
        };
        Ok(t.columns
            .iter()
            .filter(|c| !(self.config.auto_add_primary_key && c.name == GENERATED_ID_COLUMN))
            .cloned()
            .collect())
    }

    /// Names of every base table in the schema.
    pub async fn get_tables(&self) -> Result<Vec<String>> {
        let tables = self.conn.tables(&self.config.schema, None).await?;
        Ok(tables.into_iter().map(|t| t.name).collect())
    }

    /// Drop `tables`, children first, with the foreign keys pointing at them
    /// and their backing sequences.
    pub async fn drop_tables(&mut self, tables: &[&str]) -> Result<Plan> {
        let live = self.live_schema(None).await?;
        let plan = diff::plan_drop(&live, tables)?;
        self.execute(&plan).await?;
        Ok(plan)
    }
}
