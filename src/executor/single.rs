use std::sync::Arc;

use crate::connection::DbConnection;
use crate::driver::RawConnection;
use crate::error::SqlMapperError;
use crate::identity::TypeMarker;
use crate::mapping::FromRow;
use crate::params::ParamValue;
use crate::plan::{CachedPlan, PlanCache};

use super::cancel::attribute_failure;
use super::materialize::{finish_cursor, read_rows, resolve_deserializer};
use super::scope::{ExecutionScope, setup_command};
use super::task::{TaskHandle, run_in_task};
use super::{CallSpec, ParamSet, resolve_plan};

/// Run a non-query command and resolve to its affected-row count.
///
/// Without parameters the plan cache is not consulted at all.
pub(crate) fn execute<C: RawConnection>(
    conn: &DbConnection<C>,
    spec: CallSpec,
    params: Option<ParamSet>,
) -> TaskHandle<usize> {
    let raw = Arc::clone(conn.raw());
    let cache = Arc::clone(conn.plan_cache());
    let provider = conn.provider();
    let token = spec.token.clone();

    run_in_task(token.as_ref(), move || {
        let plan = params
            .as_ref()
            .map(|params| resolve_plan(&cache, &spec, provider, None, Some(params.shape)))
            .transpose()?;
        let mut guard = raw.blocking_lock();
        run_execute(
            &mut *guard,
            &spec,
            plan.as_deref(),
            params.map(|params| params.values),
        )
        .map_err(|err| attribute_failure(err, spec.token()))
    })
}

fn run_execute<C: RawConnection>(
    conn: &mut C,
    spec: &CallSpec,
    plan: Option<&CachedPlan>,
    values: Option<Vec<ParamValue>>,
) -> Result<usize, SqlMapperError> {
    let mut scope = ExecutionScope::enter(conn, spec.token())?;
    let command = setup_command(spec, plan.and_then(CachedPlan::binder), values)?;
    scope.conn().execute(&command)
}

/// Run a row-producing command and materialize every row before resolving.
pub(crate) fn query<C: RawConnection, T: FromRow>(
    conn: &DbConnection<C>,
    spec: CallSpec,
    params: Option<ParamSet>,
) -> TaskHandle<Vec<T>> {
    let token = spec.token.clone();
    run_in_task(token.as_ref(), fetch_work(conn, spec, params, None))
}

/// Like [`query`], but reads at most one row and abandons the rest of the result.
pub(crate) fn query_first<C: RawConnection, T: FromRow>(
    conn: &DbConnection<C>,
    spec: CallSpec,
    params: Option<ParamSet>,
) -> TaskHandle<Option<T>> {
    let token = spec.token.clone();
    let fetch = fetch_work::<C, T>(conn, spec, params, Some(1));
    run_in_task(token.as_ref(), move || Ok(fetch()?.into_iter().next()))
}

fn fetch_work<C: RawConnection, T: FromRow>(
    conn: &DbConnection<C>,
    spec: CallSpec,
    params: Option<ParamSet>,
    limit: Option<usize>,
) -> impl FnOnce() -> Result<Vec<T>, SqlMapperError> + Send + 'static {
    let raw = Arc::clone(conn.raw());
    let cache = Arc::clone(conn.plan_cache());
    let provider = conn.provider();

    move || {
        let (shape, values) = match params {
            Some(params) => (Some(params.shape), Some(params.values)),
            None => (None, None),
        };
        let plan = resolve_plan(&cache, &spec, provider, Some(TypeMarker::of::<T>()), shape)?;
        let mut guard = raw.blocking_lock();
        run_fetch(&mut *guard, &spec, &cache, &plan, values, limit)
            .map_err(|err| attribute_failure(err, spec.token()))
    }
}

fn run_fetch<C: RawConnection, T: FromRow>(
    conn: &mut C,
    spec: &CallSpec,
    cache: &PlanCache,
    plan: &CachedPlan,
    values: Option<Vec<ParamValue>>,
    limit: Option<usize>,
) -> Result<Vec<T>, SqlMapperError> {
    let mut scope = ExecutionScope::enter(conn, spec.token())?;
    let command = setup_command(spec, plan.binder(), values)?;
    let canceller = scope.canceller().cloned();
    scope.conn().query(&command, |cursor| {
        let rows = resolve_deserializer::<T>(cache, plan, cursor.columns())
            .and_then(|deserializer| read_rows(&mut *cursor, &deserializer, spec.token(), limit));
        finish_cursor(cursor, canceller.as_ref());
        rows
    })
}
