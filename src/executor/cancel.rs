use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::driver::CommandCanceller;
use crate::error::SqlMapperError;

type CancellerSlot = Arc<Mutex<Option<Arc<dyn CommandCanceller>>>>;

/// Bridges a cancellation token to a driver canceller for the duration of one command.
///
/// Triggering the token aborts the in-flight command. Dropping the
/// registration detaches the token, so a later trigger touches nothing. The
/// watcher cancels while holding the slot, and dropping takes the slot, so a
/// cancel already in progress finishes before the drop returns and can never
/// land on the connection's next command.
pub(crate) struct CancelRegistration {
    slot: CancellerSlot,
    watcher: Option<JoinHandle<()>>,
}

impl CancelRegistration {
    pub(crate) fn register(
        token: Option<&CancellationToken>,
        canceller: Option<Arc<dyn CommandCanceller>>,
    ) -> Self {
        let slot: CancellerSlot = Arc::new(Mutex::new(None));
        let (Some(token), Some(canceller)) = (token, canceller) else {
            return Self {
                slot,
                watcher: None,
            };
        };
        let Ok(runtime) = Handle::try_current() else {
            tracing::debug!("no runtime to watch the cancellation token; checks stay cooperative");
            return Self {
                slot,
                watcher: None,
            };
        };

        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(canceller);
        let token = token.clone();
        let watched = Arc::clone(&slot);
        let watcher = runtime.spawn(async move {
            token.cancelled().await;
            let guard = watched.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(canceller) = guard.as_ref() {
                cancel_ignore_failure(canceller.as_ref());
            }
        });
        Self {
            slot,
            watcher: Some(watcher),
        }
    }

    #[cfg(test)]
    fn is_armed(&self) -> bool {
        self.watcher.is_some()
    }
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        // blocks while the watcher is inside cancel()
        let released = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(released);
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Ask the driver to abort the running command, swallowing any refusal.
pub(crate) fn cancel_ignore_failure(canceller: &dyn CommandCanceller) {
    if let Err(err) = canceller.cancel() {
        tracing::debug!("command cancel request failed: {err}");
    }
}

/// Report a failure as cancellation when, and only when, the caller's token fired.
pub(crate) fn attribute_failure(
    err: SqlMapperError,
    token: Option<&CancellationToken>,
) -> SqlMapperError {
    if token.is_some_and(CancellationToken::is_cancelled) {
        SqlMapperError::Cancelled
    } else {
        err
    }
}
