//! Sending rendered statements to the database.
//!
//! Statements go out in the order given. In batched mode they are grouped
//! into one administrative DDL batch and committed together. A batch that
//! was opened and never sent for commit is always aborted before returning;
//! a failed commit has already closed it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::Instrument;

use crate::render::Statement;
use crate::traced::BoxFuture;
use crate::{Error, Result};

/// The write side of a connection: administrative DDL and batch control.
///
/// Batches are scoped to the connection, so a connection must not be shared
/// between two reconciliations while a batch is open.
pub trait DdlConnection: Send + Sync {
    /// Send one DDL statement. Inside a batch this only buffers it.
    fn execute_ddl<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, Result<()>>;

    fn start_batch_ddl(&self) -> BoxFuture<'_, Result<()>> {
        self.execute_ddl("START BATCH DDL")
    }

    /// Commit the open batch as one administrative operation.
    fn run_batch(&self) -> BoxFuture<'_, Result<()>> {
        self.execute_ddl("RUN BATCH")
    }

    fn abort_batch(&self) -> BoxFuture<'_, Result<()>> {
        self.execute_ddl("ABORT BATCH")
    }
}

/// How statements are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One batch, committed at the end
    Batched,
    /// One administrative operation per statement. A failure leaves the
    /// statements before it applied.
    Unbatched,
    /// One batch, always aborted
    DryRun,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Batched => write!(f, "batched"),
            ExecutionMode::Unbatched => write!(f, "unbatched"),
            ExecutionMode::DryRun => write!(f, "dry-run"),
        }
    }
}

/// A future resolving to the error to stop with: [`Error::Cancelled`] when
/// `cancel` resolves, [`Error::Timeout`] once `timeout` has elapsed.
pub fn stop_signal(
    cancel: impl Future<Output = ()>,
    timeout: Option<Duration>,
) -> impl Future<Output = Error> {
    async move {
        let deadline = async {
            match timeout {
                Some(duration) => {
                    tokio::time::sleep(duration).await;
                    Error::Timeout(duration)
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            () = cancel => Error::Cancelled,
            err = deadline => err,
        }
    }
}

/// Send `statements` over `conn`, stopping early when `stop` resolves.
pub async fn execute<C, F>(
    conn: &C,
    statements: &[Statement],
    mode: ExecutionMode,
    stop: F,
) -> Result<()>
where
    C: DdlConnection + ?Sized,
    F: Future<Output = Error>,
{
    if statements.is_empty() {
        tracing::debug!("nothing to execute");
        return Ok(());
    }

    let span = tracing::info_span!("ddl.execute", %mode, statements = statements.len());
    async move {
        let mut stop = std::pin::pin!(stop);
        match mode {
            ExecutionMode::Unbatched => run_unbatched(conn, statements, stop.as_mut()).await,
            ExecutionMode::Batched => run_batched(conn, statements, true, stop.as_mut()).await,
            ExecutionMode::DryRun => run_batched(conn, statements, false, stop.as_mut()).await,
        }
    }
    .instrument(span)
    .await
}

async fn run_unbatched<C, F>(conn: &C, statements: &[Statement], mut stop: Pin<&mut F>) -> Result<()>
where
    C: DdlConnection + ?Sized,
    F: Future<Output = Error>,
{
    for (i, stmt) in statements.iter().enumerate() {
        tokio::select! {
            biased;
            err = &mut stop => {
                tracing::warn!(applied = i, remaining = statements.len() - i, "stopped before finishing");
                return Err(err);
            }
            result = conn.execute_ddl(&stmt.sql) => {
                if let Err(err) = result {
                    tracing::error!(applied = i, statement = %stmt.sql, "statement failed; earlier statements stay applied");
                    return Err(err);
                }
            }
        }
    }
    tracing::info!(statements = statements.len(), "applied statements one by one");
    Ok(())
}

async fn run_batched<C, F>(
    conn: &C,
    statements: &[Statement],
    commit: bool,
    stop: Pin<&mut F>,
) -> Result<()>
where
    C: DdlConnection + ?Sized,
    F: Future<Output = Error>,
{
    conn.start_batch_ddl().await?;

    // Once RUN BATCH is sent the batch is closed, whether it succeeds or not.
    let run_sent = AtomicBool::new(false);
    let send = async {
        for stmt in statements {
            conn.execute_ddl(&stmt.sql).await?;
        }
        if commit {
            run_sent.store(true, Ordering::Relaxed);
            conn.run_batch().await?;
        }
        Ok::<(), Error>(())
    };
    let outcome = tokio::select! {
        biased;
        err = stop => Err(err),
        result = send => result,
    };

    match outcome {
        Ok(()) if commit => {
            tracing::info!(statements = statements.len(), "batch committed");
            Ok(())
        }
        Ok(()) => {
            conn.abort_batch().await?;
            tracing::info!(statements = statements.len(), "dry run, batch aborted");
            Ok(())
        }
        Err(err) if run_sent.load(Ordering::Relaxed) => {
            tracing::debug!(error = %err, "batch failed on commit, nothing to abort");
            Err(err)
        }
        Err(err) => {
            if let Err(abort_err) = conn.abort_batch().await {
                tracing::warn!(error = %abort_err, "could not abort batch");
            }
            Err(err)
        }
    }
}
