use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::driver::{Command, CommandCanceller, RawConnection};
use crate::error::SqlMapperError;
use crate::params::{ParamBinder, ParamValue};

use super::CallSpec;
use super::cancel::CancelRegistration;

/// Connection state for the span of one engine call.
///
/// Entering opens the connection if it was closed and arms the cancellation
/// bridge. Dropping the scope releases the bridge first and then closes the
/// connection, but only if this scope was the one that opened it. A close
/// failure is logged and never replaces the call's own outcome.
pub(crate) struct ExecutionScope<'c, C: RawConnection> {
    conn: &'c mut C,
    close_on_exit: bool,
    canceller: Option<Arc<dyn CommandCanceller>>,
    registration: Option<CancelRegistration>,
}

impl<'c, C: RawConnection> ExecutionScope<'c, C> {
    pub(crate) fn enter(
        conn: &'c mut C,
        token: Option<&CancellationToken>,
    ) -> Result<Self, SqlMapperError> {
        // The caller may have waited on the connection lock after its last check.
        if fired(token) {
            return Err(SqlMapperError::Cancelled);
        }
        let was_closed = !conn.is_open();
        if was_closed {
            conn.open()?;
            tracing::debug!(provider = conn.provider(), "opened connection for call");
        }
        let canceller = conn.canceller();
        let registration = CancelRegistration::register(token, canceller.clone());
        let scope = Self {
            conn,
            close_on_exit: was_closed,
            canceller,
            registration: Some(registration),
        };
        // A trigger that landed before the bridge was armed never reached the canceller.
        if fired(token) {
            return Err(SqlMapperError::Cancelled);
        }
        Ok(scope)
    }

    pub(crate) fn conn(&mut self) -> &mut C {
        self.conn
    }

    pub(crate) fn canceller(&self) -> Option<&Arc<dyn CommandCanceller>> {
        self.canceller.as_ref()
    }
}

impl<C: RawConnection> Drop for ExecutionScope<'_, C> {
    fn drop(&mut self) {
        drop(self.registration.take());
        if self.close_on_exit
            && let Err(err) = self.conn.close()
        {
            tracing::warn!(
                provider = self.conn.provider(),
                "failed to close connection after call: {err}"
            );
        }
    }
}

fn fired(token: Option<&CancellationToken>) -> bool {
    token.is_some_and(CancellationToken::is_cancelled)
}

/// Build the command for one call and bind `values` through `binder`.
pub(crate) fn setup_command(
    spec: &CallSpec,
    binder: Option<&ParamBinder>,
    values: Option<Vec<ParamValue>>,
) -> Result<Command, SqlMapperError> {
    let mut command = spec.command();
    match (binder, values) {
        (Some(binder), Some(values)) => binder.bind(&mut command, values)?,
        (None, None) => {}
        (None, Some(_)) => {
            return Err(SqlMapperError::ParameterError(
                "parameters supplied without a binder".into(),
            ));
        }
        (Some(binder), None) => {
            return Err(SqlMapperError::ParameterError(format!(
                "statement expects parameters of type {}",
                binder.shape().marker().name()
            )));
        }
    }
    Ok(command)
}
