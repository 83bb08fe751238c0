use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::connection::{DbConnection, DbTransaction};
use crate::driver::RawConnection;
use crate::error::SqlMapperError;
use crate::executor::{CallSpec, ParamSet};
use crate::params::{NoParams, SqlParams};
use crate::types::{CommandKind, TxId};

mod dml;
mod select;

pub use select::Rows;

/// The parameter argument of a statement.
///
/// `Many` is only accepted by [`StatementBuilder::execute`], which runs the
/// statement once per element.
pub enum ParamArg<'a, P> {
    None,
    Single(&'a P),
    Many(&'a [P]),
}

impl<P> Clone for ParamArg<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for ParamArg<'_, P> {}

/// Fluent builder for one call: statement text, parameters and per-call options.
pub struct StatementBuilder<'a, C: RawConnection, P = NoParams> {
    pub(crate) conn: &'a DbConnection<C>,
    pub(crate) sql: &'a str,
    pub(crate) kind: CommandKind,
    pub(crate) timeout: Option<Duration>,
    pub(crate) transaction: Option<TxId>,
    pub(crate) token: Option<CancellationToken>,
    pub(crate) buffered: bool,
    pub(crate) params: ParamArg<'a, P>,
    pub(crate) invalid: Option<SqlMapperError>,
}

impl<'a, C: RawConnection> StatementBuilder<'a, C> {
    pub(crate) fn new(conn: &'a DbConnection<C>, sql: &'a str) -> Self {
        Self {
            conn,
            sql,
            kind: CommandKind::Text,
            timeout: None,
            transaction: None,
            token: None,
            buffered: true,
            params: ParamArg::None,
            invalid: None,
        }
    }
}

impl<'a, C: RawConnection, P: SqlParams> StatementBuilder<'a, C, P> {
    /// Bind one parameter object.
    #[must_use]
    pub fn bind<Q: SqlParams>(self, params: &'a Q) -> StatementBuilder<'a, C, Q> {
        self.params(ParamArg::Single(params))
    }

    /// Bind a sequence of parameter objects; `execute` runs the statement once per element.
    #[must_use]
    pub fn bind_each<Q: SqlParams>(self, params: &'a [Q]) -> StatementBuilder<'a, C, Q> {
        self.params(ParamArg::Many(params))
    }

    #[must_use]
    pub fn params<Q: SqlParams>(self, params: ParamArg<'a, Q>) -> StatementBuilder<'a, C, Q> {
        StatementBuilder {
            conn: self.conn,
            sql: self.sql,
            kind: self.kind,
            timeout: self.timeout,
            transaction: self.transaction,
            token: self.token,
            buffered: self.buffered,
            params,
            invalid: self.invalid,
        }
    }

    #[must_use]
    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    /// Treat the text as a stored procedure name.
    #[must_use]
    pub fn stored_procedure(self) -> Self {
        self.kind(CommandKind::StoredProcedure)
    }

    /// Command timeout handed to the driver.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Run inside `tx`, which must belong to this connection.
    #[must_use]
    pub fn transaction(mut self, tx: &DbTransaction<C>) -> Self {
        if self.conn.shares_raw(tx.connection()) {
            self.transaction = Some(tx.id());
        } else {
            self.invalid = Some(SqlMapperError::ConnectionError(format!(
                "transaction {} belongs to a different connection",
                tx.id()
            )));
        }
        self
    }

    /// Cancel the call (and abort its in-flight command) when `token` fires.
    #[must_use]
    pub fn cancellation(mut self, token: &CancellationToken) -> Self {
        self.token = Some(token.clone());
        self
    }

    /// Choose whether [`StatementBuilder::query_rows`] buffers (default) or streams.
    #[must_use]
    pub fn buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }

    pub(crate) fn call_spec(&self) -> CallSpec {
        CallSpec {
            sql: Arc::from(self.sql),
            kind: self.kind,
            timeout: self.timeout,
            transaction: self.transaction,
            token: self.token.clone(),
        }
    }

    /// Parameters for a single execution; a sequence is refused.
    pub(crate) fn single_params(&self) -> Result<Option<ParamSet>, SqlMapperError> {
        match self.params {
            ParamArg::None => Ok(None),
            ParamArg::Single(params) => Ok(Some(ParamSet::of(params))),
            ParamArg::Many(_) => Err(SqlMapperError::ParameterError(
                "a sequence of parameter objects can only be executed, not queried".into(),
            )),
        }
    }
}
