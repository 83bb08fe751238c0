//! Blocking driver seam.
//!
//! A [`RawConnection`] is the stateful, blocking I/O primitive the engine drives.
//! Its methods are only ever called from a worker-pool thread while the engine
//! holds exclusive access to the connection.

use std::sync::Arc;
use std::time::Duration;

use crate::error::SqlMapperError;
use crate::results::ColumnSet;
use crate::types::{CommandKind, RowValues, TxId};

/// One named parameter bound onto a command.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParam {
    /// Placeholder token as it appears in the command text, e.g. `:id`
    pub placeholder: String,
    pub value: RowValues,
}

/// A ready-to-execute statement: text, kind, timeout, transaction and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    text: String,
    kind: CommandKind,
    timeout: Option<Duration>,
    transaction: Option<TxId>,
    params: Vec<BoundParam>,
}

impl Command {
    #[must_use]
    pub fn new(text: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            text: text.into(),
            kind,
            timeout: None,
            transaction: None,
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_transaction(mut self, transaction: Option<TxId>) -> Self {
        self.transaction = transaction;
        self
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: String) {
        self.text = text;
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[must_use]
    pub fn transaction(&self) -> Option<TxId> {
        self.transaction
    }

    #[must_use]
    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }

    pub fn push_param(&mut self, placeholder: String, value: RowValues) {
        self.params.push(BoundParam { placeholder, value });
    }

    pub fn clear_params(&mut self) {
        self.params.clear();
    }
}

/// Aborts whatever command is running on the connection it was taken from.
///
/// Called from a thread other than the one executing the command.
pub trait CommandCanceller: Send + Sync {
    /// # Errors
    /// Drivers may refuse to cancel (e.g. nothing is running); callers ignore the error.
    fn cancel(&self) -> Result<(), SqlMapperError>;
}

/// Forward-only, single-pass view over a statement's result rows.
pub trait RowCursor {
    /// Column metadata of the active result.
    fn columns(&self) -> &ColumnSet;

    /// Move to the next row and return its values, or `None` at end of data.
    ///
    /// # Errors
    /// Propagates driver failures (including interruption by a canceller).
    fn advance(&mut self) -> Result<Option<&[RowValues]>, SqlMapperError>;

    /// True once `advance` has reported end of data.
    fn is_exhausted(&self) -> bool;
}

/// A blocking database connection with an explicit open/closed state.
pub trait RawConnection: Send + 'static {
    /// Opaque marker for the provider, folded into statement identities.
    fn provider(&self) -> &'static str;

    fn is_open(&self) -> bool;

    /// # Errors
    /// Returns a driver or connection error if the connection cannot be opened.
    fn open(&mut self) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns a driver error if closing fails; the connection is treated as closed anyway.
    fn close(&mut self) -> Result<(), SqlMapperError>;

    /// Handle that aborts the command currently running on this connection.
    fn canceller(&self) -> Option<Arc<dyn CommandCanceller>>;

    /// Run a non-query command and return the number of affected rows.
    ///
    /// # Errors
    /// Propagates driver failures.
    fn execute(&mut self, command: &Command) -> Result<usize, SqlMapperError>;

    /// Run a row-producing command and hand its cursor to `consume`.
    ///
    /// The cursor is finalized when `consume` returns, whether or not it was
    /// read to the end.
    ///
    /// # Errors
    /// Propagates driver failures and whatever `consume` returns.
    fn query<R, F>(&mut self, command: &Command, consume: F) -> Result<R, SqlMapperError>
    where
        F: FnOnce(&mut dyn RowCursor) -> Result<R, SqlMapperError>;

    /// Run a multi-statement script without parameters.
    ///
    /// # Errors
    /// Propagates driver failures.
    fn execute_script(&mut self, script: &str) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an error if a transaction is already active or the driver refuses.
    fn begin(&mut self) -> Result<TxId, SqlMapperError>;

    /// # Errors
    /// Returns an error if `tx` is not the active transaction or the driver refuses.
    fn commit(&mut self, tx: TxId) -> Result<(), SqlMapperError>;

    /// # Errors
    /// Returns an error if `tx` is not the active transaction or the driver refuses.
    fn rollback(&mut self, tx: TxId) -> Result<(), SqlMapperError>;
}
