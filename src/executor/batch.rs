use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::connection::DbConnection;
use crate::driver::RawConnection;
use crate::error::SqlMapperError;
use crate::plan::PlanCache;

use super::cancel::attribute_failure;
use super::scope::ExecutionScope;
use super::task::{TaskHandle, run_in_task};
use super::{CallSpec, ParamBatch, resolve_plan};

/// Run one command once per parameter object, resolving to the summed
/// affected-row count.
///
/// Elements run strictly in order. The token is checked before each element,
/// so cancellation stops the batch between elements (earlier elements stay
/// applied unless the caller's transaction is rolled back). A token that has
/// already fired wins over the empty-batch shortcut.
pub(crate) fn execute_batch<C: RawConnection>(
    conn: &DbConnection<C>,
    spec: CallSpec,
    batch: ParamBatch,
) -> TaskHandle<usize> {
    if spec.token().is_some_and(CancellationToken::is_cancelled) {
        return TaskHandle::ready(Err(SqlMapperError::Cancelled));
    }
    if batch.rows.is_empty() {
        return TaskHandle::ready(Ok(0));
    }
    let raw = Arc::clone(conn.raw());
    let cache = Arc::clone(conn.plan_cache());
    let provider = conn.provider();
    let token = spec.token.clone();

    run_in_task(token.as_ref(), move || {
        let mut guard = raw.blocking_lock();
        run_batch(&mut *guard, &cache, provider, &spec, batch)
            .map_err(|err| attribute_failure(err, spec.token()))
    })
}

fn run_batch<C: RawConnection>(
    conn: &mut C,
    cache: &PlanCache,
    provider: &'static str,
    spec: &CallSpec,
    batch: ParamBatch,
) -> Result<usize, SqlMapperError> {
    let mut scope = ExecutionScope::enter(conn, spec.token())?;
    let plan = resolve_plan(cache, spec, provider, None, Some(batch.shape))?;
    let binder = plan.binder().ok_or_else(|| {
        SqlMapperError::ParameterError("batch plan was built without a binder".into())
    })?;

    let mut command = spec.command();
    // Text as it was before any binding; list expansion rewrites it per element.
    let unbound_text = command.text().to_owned();
    let iterations = batch.rows.len();
    let mut total = 0usize;
    for (index, values) in batch.rows.into_iter().enumerate() {
        if spec.token().is_some_and(|token| token.is_cancelled()) {
            tracing::debug!(completed = index, "batch cancelled between elements");
            return Err(SqlMapperError::Cancelled);
        }
        if index > 0 {
            command.set_text(unbound_text.clone());
            command.clear_params();
        }
        binder.bind(&mut command, values)?;
        total += scope.conn().execute(&command)?;
    }
    tracing::debug!(
        sql = plan.identity().sql(),
        iterations,
        affected = total,
        "batch finished"
    );
    Ok(total)
}
