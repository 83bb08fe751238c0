use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SqlMapperError;

/// Pending outcome of a unit of blocking work handed to the worker pool.
///
/// Resolves exactly once, to the work's value, its fault, or
/// [`SqlMapperError::Cancelled`]. Dropping the handle detaches the work; it
/// still runs to completion and releases its resources.
#[must_use = "the work runs regardless, but its outcome is lost unless awaited"]
pub struct TaskHandle<T> {
    state: TaskState<T>,
}

enum TaskState<T> {
    Done(Option<Result<T, SqlMapperError>>),
    Running(JoinHandle<Result<T, SqlMapperError>>),
}

impl<T> TaskHandle<T> {
    /// A handle that is already resolved; nothing is scheduled.
    pub(crate) fn ready(outcome: Result<T, SqlMapperError>) -> Self {
        Self {
            state: TaskState::Done(Some(outcome)),
        }
    }

    fn running(handle: JoinHandle<Result<T, SqlMapperError>>) -> Self {
        Self {
            state: TaskState::Running(handle),
        }
    }

    /// True once awaiting would not suspend.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            TaskState::Done(_) => true,
            TaskState::Running(handle) => handle.is_finished(),
        }
    }
}

impl<T> Unpin for TaskHandle<T> {}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, SqlMapperError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            TaskState::Done(outcome) => Poll::Ready(outcome.take().unwrap_or_else(|| {
                Err(SqlMapperError::Other(
                    "task handle polled after completion".into(),
                ))
            })),
            TaskState::Running(handle) => Pin::new(handle)
                .poll(cx)
                .map(|joined| joined.unwrap_or_else(|err| Err(err.into()))),
        }
    }
}

/// Schedule `work` on the blocking worker pool.
///
/// A token that is already cancelled resolves the handle to
/// [`SqlMapperError::Cancelled`] without scheduling anything. Without a
/// running tokio runtime the handle resolves to
/// [`SqlMapperError::SchedulingError`]; nothing is ever raised on the calling
/// thread. The token is checked again when a worker picks the work up.
pub fn run_in_task<T, F>(token: Option<&CancellationToken>, work: F) -> TaskHandle<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SqlMapperError> + Send + 'static,
{
    if token.is_some_and(CancellationToken::is_cancelled) {
        return TaskHandle::ready(Err(SqlMapperError::Cancelled));
    }
    let runtime = match Handle::try_current() {
        Ok(runtime) => runtime,
        Err(err) => return TaskHandle::ready(Err(SqlMapperError::SchedulingError(err.to_string()))),
    };

    let token = token.cloned();
    TaskHandle::running(runtime.spawn_blocking(move || {
        if token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Err(SqlMapperError::Cancelled);
        }
        work()
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn value_is_delivered() {
        let outcome = run_in_task(None, || Ok(40 + 2)).await;
        assert_eq!(outcome.unwrap(), 42);
    }

    #[tokio::test]
    async fn fault_is_delivered() {
        let outcome: Result<(), _> =
            run_in_task(None, || Err(SqlMapperError::ExecutionError("boom".into()))).await;
        assert!(matches!(outcome, Err(SqlMapperError::ExecutionError(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn cancelled_token_never_schedules() {
        let token = CancellationToken::new();
        token.cancel();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = run_in_task(Some(&token), move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });
        assert!(handle.is_finished());
        assert!(handle.await.unwrap_err().is_cancelled());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn panics_become_faults() {
        let outcome: Result<(), _> = run_in_task(None, || panic!("worker blew up")).await;
        assert!(matches!(outcome, Err(SqlMapperError::WorkerPanicked(_))));
    }

    #[test]
    fn no_runtime_is_a_scheduling_fault() {
        let handle = run_in_task(None, || Ok(()));
        assert!(handle.is_finished());
        let outcome = futures_util::FutureExt::now_or_never(handle);
        assert!(matches!(outcome, Some(Err(SqlMapperError::SchedulingError(_)))));
    }
}
