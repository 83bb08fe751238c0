use std::fmt;
use std::future::poll_fn;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures_util::Stream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::connection::DbConnection;
use crate::driver::{RawConnection, RowCursor};
use crate::error::SqlMapperError;
use crate::identity::TypeMarker;
use crate::mapping::FromRow;
use crate::plan::{CachedPlan, PlanCache};
use crate::results::RowRef;

use super::cancel::attribute_failure;
use super::materialize::{finish_cursor, resolve_deserializer};
use super::scope::{ExecutionScope, setup_command};
use super::task::{TaskHandle, run_in_task};
use super::{CallSpec, ParamSet, resolve_plan};

type RowSender<T> = mpsc::Sender<Result<T, SqlMapperError>>;
type ReadySender = oneshot::Sender<Result<(), SqlMapperError>>;

/// Lazily produced rows of a streamed query.
///
/// A worker holds the connection and the live cursor and hands rows over one
/// at a time, so at most `stream_buffer` rows are materialized ahead of the
/// consumer. The connection stays locked (and, if the call opened it, open)
/// until the stream is read to the end, closed, or dropped.
///
/// The cancellation token is checked before every element; once it has fired
/// the stream yields [`SqlMapperError::Cancelled`] and then ends.
pub struct RowStream<T> {
    rows: mpsc::Receiver<Result<T, SqlMapperError>>,
    worker: Option<TaskHandle<()>>,
    token: Option<CancellationToken>,
    finished: bool,
}

impl<T> Unpin for RowStream<T> {}

impl<T: Send + 'static> RowStream<T> {
    fn new(
        rows: mpsc::Receiver<Result<T, SqlMapperError>>,
        worker: TaskHandle<()>,
        token: Option<CancellationToken>,
    ) -> Self {
        Self {
            rows,
            worker: Some(worker),
            token,
            finished: false,
        }
    }

    /// Next row, or `None` once the result is exhausted.
    pub async fn next(&mut self) -> Option<Result<T, SqlMapperError>> {
        poll_fn(|cx| self.poll_row(cx)).await
    }

    /// Stop reading and wait until the cursor is finalized and the
    /// connection released.
    ///
    /// # Errors
    /// Returns an error if the worker panicked or could not be scheduled.
    pub async fn close(mut self) -> Result<(), SqlMapperError> {
        self.finished = true;
        self.rows.close();
        match self.worker.take() {
            Some(worker) => worker.await,
            None => Ok(()),
        }
    }

    /// Read every remaining row into a `Vec`, then close the stream.
    ///
    /// # Errors
    /// Returns the first row error, or the close error.
    pub async fn try_collect(mut self) -> Result<Vec<T>, SqlMapperError> {
        let mut out = Vec::new();
        while let Some(row) = self.next().await {
            match row {
                Ok(row) => out.push(row),
                Err(err) => {
                    self.close().await?;
                    return Err(err);
                }
            }
        }
        self.close().await?;
        Ok(out)
    }

    fn poll_row(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<T, SqlMapperError>>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            self.finished = true;
            self.rows.close();
            return Poll::Ready(Some(Err(SqlMapperError::Cancelled)));
        }
        match ready!(self.rows.poll_recv(cx)) {
            Some(Ok(row)) => Poll::Ready(Some(Ok(row))),
            Some(Err(err)) => {
                self.finished = true;
                self.rows.close();
                Poll::Ready(Some(Err(err)))
            }
            None => {
                self.finished = true;
                Poll::Ready(None)
            }
        }
    }
}

impl<T: Send + 'static> Stream for RowStream<T> {
    type Item = Result<T, SqlMapperError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_row(cx)
    }
}

impl<T> fmt::Debug for RowStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Execute the command and return once the cursor is open (or the call failed).
///
/// Failures up to and including the first deserializer derivation surface
/// here; later failures arrive as stream elements.
pub(crate) async fn open_stream<C: RawConnection, T: FromRow>(
    conn: &DbConnection<C>,
    spec: CallSpec,
    params: Option<ParamSet>,
) -> Result<RowStream<T>, SqlMapperError> {
    let raw = Arc::clone(conn.raw());
    let cache = Arc::clone(conn.plan_cache());
    let provider = conn.provider();
    let token = spec.token.clone();
    let (ready_tx, ready_rx) = oneshot::channel();
    let (rows_tx, rows_rx) = mpsc::channel(conn.options().stream_buffer.max(1));

    let worker = run_in_task(token.as_ref(), move || {
        let mut ready = Some(ready_tx);
        let outcome = pump_rows::<C, T>(&raw, &cache, provider, &spec, params, &mut ready, &rows_tx)
            .map_err(|err| attribute_failure(err, spec.token()));
        match (ready.take(), outcome) {
            (Some(ready), outcome) => {
                let _ = ready.send(outcome);
            }
            (None, Err(err)) => {
                let _ = rows_tx.blocking_send(Err(err));
            }
            (None, Ok(())) => {}
        }
        Ok(())
    });

    match ready_rx.await {
        Ok(Ok(())) => Ok(RowStream::new(rows_rx, worker, token)),
        Ok(Err(err)) => {
            worker.await?;
            Err(err)
        }
        Err(_) => {
            worker.await?;
            Err(SqlMapperError::Other(
                "stream worker exited before opening a cursor".into(),
            ))
        }
    }
}

fn pump_rows<C: RawConnection, T: FromRow>(
    raw: &Mutex<C>,
    cache: &PlanCache,
    provider: &'static str,
    spec: &CallSpec,
    params: Option<ParamSet>,
    ready: &mut Option<ReadySender>,
    rows: &RowSender<T>,
) -> Result<(), SqlMapperError> {
    let (shape, values) = match params {
        Some(params) => (Some(params.shape), Some(params.values)),
        None => (None, None),
    };
    let plan = resolve_plan(cache, spec, provider, Some(TypeMarker::of::<T>()), shape)?;
    let mut guard = raw.blocking_lock();
    let mut scope = ExecutionScope::enter(&mut *guard, spec.token())?;
    let command = setup_command(spec, plan.binder(), values)?;
    let canceller = scope.canceller().cloned();
    scope.conn().query(&command, |cursor| {
        let outcome = forward_rows(cursor, cache, &plan, spec, ready, rows);
        finish_cursor(cursor, canceller.as_ref());
        outcome
    })
}

fn forward_rows<T: FromRow>(
    cursor: &mut dyn RowCursor,
    cache: &PlanCache,
    plan: &CachedPlan,
    spec: &CallSpec,
    ready: &mut Option<ReadySender>,
    rows: &RowSender<T>,
) -> Result<(), SqlMapperError> {
    let columns = cursor.columns().clone();
    let deserializer = resolve_deserializer::<T>(cache, plan, &columns)?;
    if let Some(ready) = ready.take() {
        let _ = ready.send(Ok(()));
    }

    loop {
        if spec.token().is_some_and(CancellationToken::is_cancelled) {
            return Err(SqlMapperError::Cancelled);
        }
        let Some(values) = cursor.advance()? else {
            return Ok(());
        };
        let item = deserializer.deserialize(&RowRef::new(&columns, values));
        let failed = item.is_err();
        if rows.blocking_send(item).is_err() {
            tracing::debug!("row stream released before end of data");
            return Ok(());
        }
        if failed {
            return Ok(());
        }
    }
}
