//! The asynchronous execution engine.
//!
//! Every call is split into a blocking unit of work that runs on tokio's
//! blocking pool ([`run_in_task`]) and an awaitable [`TaskHandle`]. The work
//! resolves its [`CachedPlan`], enters an execution scope on the connection
//! (open-if-closed, cancellation bridge armed) and runs the command.

mod batch;
mod cancel;
mod materialize;
mod scope;
mod single;
mod stream;
mod task;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::driver::Command;
use crate::error::SqlMapperError;
use crate::identity::{StatementIdentity, TypeMarker};
use crate::params::{ParamBinder, ParamShape, ParamValue, SqlParams};
use crate::plan::{CachedPlan, PlanCache};
use crate::types::{CommandKind, TxId};

pub(crate) use batch::execute_batch;
pub(crate) use single::{execute, query, query_first};
pub(crate) use stream::open_stream;
pub use stream::RowStream;
pub use task::{TaskHandle, run_in_task};

/// Per-call inputs shared by every executor.
#[derive(Debug, Clone)]
pub(crate) struct CallSpec {
    pub(crate) sql: Arc<str>,
    pub(crate) kind: CommandKind,
    pub(crate) timeout: Option<Duration>,
    pub(crate) transaction: Option<TxId>,
    pub(crate) token: Option<CancellationToken>,
}

impl CallSpec {
    pub(crate) fn token(&self) -> Option<&CancellationToken> {
        self.token.as_ref()
    }

    /// A fresh command carrying this call's text, kind, timeout and transaction.
    pub(crate) fn command(&self) -> Command {
        Command::new(self.sql.as_ref(), self.kind)
            .with_timeout(self.timeout)
            .with_transaction(self.transaction)
    }
}

/// A parameter object flattened into owned values, ready to cross into a worker.
#[derive(Debug, Clone)]
pub(crate) struct ParamSet {
    pub(crate) shape: ParamShape,
    pub(crate) values: Vec<ParamValue>,
}

impl ParamSet {
    pub(crate) fn of<P: SqlParams>(params: &P) -> Self {
        Self {
            shape: ParamShape::of::<P>(),
            values: params.param_values(),
        }
    }
}

/// A sequence of parameter objects of one type, bound one execution at a time.
#[derive(Debug, Clone)]
pub(crate) struct ParamBatch {
    pub(crate) shape: ParamShape,
    pub(crate) rows: Vec<Vec<ParamValue>>,
}

impl ParamBatch {
    pub(crate) fn of<P: SqlParams>(items: &[P]) -> Self {
        Self {
            shape: ParamShape::of::<P>(),
            rows: items.iter().map(SqlParams::param_values).collect(),
        }
    }
}

/// Fetch or build the plan for this call's identity.
pub(crate) fn resolve_plan(
    cache: &PlanCache,
    spec: &CallSpec,
    provider: &'static str,
    result: Option<TypeMarker>,
    params: Option<ParamShape>,
) -> Result<Arc<CachedPlan>, SqlMapperError> {
    let mut identity = StatementIdentity::new(Arc::clone(&spec.sql), spec.kind, provider);
    if let Some(result) = result {
        identity = identity.with_result_type(result);
    }
    if let Some(shape) = params {
        identity = identity.with_param_type(shape.marker());
    }
    cache.get_or_create(identity, |identity| {
        let binder = params
            .map(|shape| ParamBinder::derive(identity.sql(), identity.kind(), shape))
            .transpose()?;
        Ok(CachedPlan::new(identity.clone(), binder))
    })
}
