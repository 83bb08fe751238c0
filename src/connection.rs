use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;

use crate::driver::RawConnection;
use crate::error::SqlMapperError;
use crate::executor::run_in_task;
use crate::plan::PlanCache;
use crate::query_builder::StatementBuilder;
use crate::types::TxId;

const DEFAULT_STREAM_BUFFER: usize = 1;

/// Engine-level options for one connection handle.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Cache the connection's plans are stored in. Defaults to the process-wide cache.
    pub plan_cache: Arc<PlanCache>,
    /// Rows a streamed query may materialize ahead of its consumer (minimum 1).
    pub stream_buffer: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            plan_cache: PlanCache::global(),
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl ConnectionOptions {
    #[must_use]
    pub fn with_plan_cache(mut self, plan_cache: Arc<PlanCache>) -> Self {
        self.plan_cache = plan_cache;
        self
    }

    #[must_use]
    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer.max(1);
        self
    }
}

/// Async handle over a blocking [`RawConnection`].
///
/// Cloning is cheap; clones share the connection, which serves one call at a
/// time. Calls open a closed connection for their own duration and close it
/// again afterwards; a connection opened with [`DbConnection::open`] stays open.
pub struct DbConnection<C> {
    raw: Arc<Mutex<C>>,
    provider: &'static str,
    options: ConnectionOptions,
}

impl<C> Clone for DbConnection<C> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            provider: self.provider,
            options: self.options.clone(),
        }
    }
}

impl<C: RawConnection> DbConnection<C> {
    #[must_use]
    pub fn new(raw: C) -> Self {
        Self::with_options(raw, ConnectionOptions::default())
    }

    #[must_use]
    pub fn with_options(raw: C, options: ConnectionOptions) -> Self {
        Self {
            provider: raw.provider(),
            raw: Arc::new(Mutex::new(raw)),
            options,
        }
    }

    /// Start a statement on this connection.
    #[must_use]
    pub fn sql<'a>(&'a self, sql: &'a str) -> StatementBuilder<'a, C> {
        StatementBuilder::new(self, sql)
    }

    #[must_use]
    pub fn provider(&self) -> &'static str {
        self.provider
    }

    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    #[must_use]
    pub fn plan_cache(&self) -> &Arc<PlanCache> {
        &self.options.plan_cache
    }

    pub(crate) fn raw(&self) -> &Arc<Mutex<C>> {
        &self.raw
    }

    pub(crate) fn shares_raw(&self, other: &DbConnection<C>) -> bool {
        Arc::ptr_eq(&self.raw, &other.raw)
    }

    /// Run `func` against the raw connection on the blocking pool.
    ///
    /// # Errors
    /// Returns whatever `func` returns, or a scheduling/panic error.
    pub async fn with_raw<F, R>(&self, func: F) -> Result<R, SqlMapperError>
    where
        F: FnOnce(&mut C) -> Result<R, SqlMapperError> + Send + 'static,
        R: Send + 'static,
    {
        let raw = Arc::clone(&self.raw);
        run_in_task(None, move || {
            let mut guard = raw.blocking_lock();
            func(&mut guard)
        })
        .await
    }

    /// Open the connection and keep it open across calls.
    ///
    /// # Errors
    /// Returns the driver error if the connection cannot be opened.
    pub async fn open(&self) -> Result<(), SqlMapperError> {
        self.with_raw(|conn| conn.open()).await
    }

    /// # Errors
    /// Returns the driver error if closing fails.
    pub async fn close(&self) -> Result<(), SqlMapperError> {
        self.with_raw(|conn| conn.close()).await
    }

    /// Whether the connection is open. Waits until any in-flight call or live
    /// stream releases the connection.
    ///
    /// # Errors
    /// Returns a scheduling error if no runtime is available.
    pub async fn is_open(&self) -> Result<bool, SqlMapperError> {
        self.with_raw(|conn| Ok(conn.is_open())).await
    }

    /// Run a parameterless multi-statement script (DDL, fixtures).
    ///
    /// # Errors
    /// Propagates driver failures.
    pub async fn execute_script(&self, script: &str) -> Result<(), SqlMapperError> {
        let script = script.to_owned();
        self.with_raw(move |conn| {
            let was_closed = !conn.is_open();
            if was_closed {
                conn.open()?;
            }
            let outcome = conn.execute_script(&script);
            if was_closed && let Err(err) = conn.close() {
                tracing::warn!("failed to close connection after script: {err}");
            }
            outcome
        })
        .await
    }

    /// Begin a transaction. The connection must already be open.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::ConnectionError`] on a closed connection, or
    /// the driver error if a transaction is already active.
    pub async fn begin(&self) -> Result<DbTransaction<C>, SqlMapperError> {
        let id = self
            .with_raw(|conn| {
                if !conn.is_open() {
                    return Err(SqlMapperError::ConnectionError(
                        "open the connection before beginning a transaction".into(),
                    ));
                }
                conn.begin()
            })
            .await?;
        tracing::debug!(provider = self.provider, tx = id, "transaction started");
        Ok(DbTransaction {
            conn: self.clone(),
            id,
            finished: false,
        })
    }
}

impl<C> fmt::Debug for DbConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("provider", &self.provider)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// An open transaction on a [`DbConnection`].
///
/// Statements join it via [`StatementBuilder::transaction`] or
/// [`DbTransaction::sql`]. Dropping it without committing rolls it back in
/// the background.
pub struct DbTransaction<C: RawConnection> {
    conn: DbConnection<C>,
    id: TxId,
    finished: bool,
}

impl<C: RawConnection> DbTransaction<C> {
    #[must_use]
    pub fn id(&self) -> TxId {
        self.id
    }

    #[must_use]
    pub fn connection(&self) -> &DbConnection<C> {
        &self.conn
    }

    /// Start a statement that runs inside this transaction.
    #[must_use]
    pub fn sql<'a>(&'a self, sql: &'a str) -> StatementBuilder<'a, C> {
        self.conn.sql(sql).transaction(self)
    }

    /// # Errors
    /// Returns the driver error if the commit fails; the transaction is then
    /// no longer active.
    pub async fn commit(mut self) -> Result<(), SqlMapperError> {
        self.finished = true;
        let id = self.id;
        self.conn.with_raw(move |conn| conn.commit(id)).await
    }

    /// # Errors
    /// Returns the driver error if the rollback fails.
    pub async fn rollback(mut self) -> Result<(), SqlMapperError> {
        self.finished = true;
        let id = self.id;
        self.conn.with_raw(move |conn| conn.rollback(id)).await
    }
}

impl<C: RawConnection> Drop for DbTransaction<C> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let id = self.id;
        if Handle::try_current().is_err() {
            tracing::warn!(
                tx = id,
                "transaction dropped without commit outside a runtime; rollback skipped"
            );
            return;
        }
        tracing::warn!(tx = id, "transaction dropped without commit; rolling back");
        let raw = Arc::clone(&self.conn.raw);
        let handle = run_in_task(None, move || {
            let outcome = raw.blocking_lock().rollback(id);
            match &outcome {
                Ok(()) => tracing::debug!(tx = id, "dropped transaction rolled back"),
                Err(err) => tracing::warn!(tx = id, "rollback of dropped transaction failed: {err}"),
            }
            outcome
        });
        // detached; the rollback runs even though nobody awaits it
        drop(handle);
    }
}

impl<C: RawConnection> fmt::Debug for DbTransaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbTransaction")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}
