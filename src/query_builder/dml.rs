use crate::driver::RawConnection;
use crate::executor::{self, ParamBatch, ParamSet, TaskHandle};
use crate::params::SqlParams;

use super::{ParamArg, StatementBuilder};

impl<C: RawConnection, P: SqlParams> StatementBuilder<'_, C, P> {
    /// Execute a non-query statement and resolve to the affected-row count.
    ///
    /// With [`StatementBuilder::bind_each`] the statement runs once per element
    /// and the counts are summed. The returned handle never fails on the
    /// calling thread; faults and cancellation arrive when it is awaited.
    pub fn execute(mut self) -> TaskHandle<usize> {
        if let Some(err) = self.invalid.take() {
            return TaskHandle::ready(Err(err));
        }
        let spec = self.call_spec();
        match self.params {
            ParamArg::None => executor::execute(self.conn, spec, None),
            ParamArg::Single(params) => executor::execute(self.conn, spec, Some(ParamSet::of(params))),
            ParamArg::Many(items) => executor::execute_batch(self.conn, spec, ParamBatch::of(items)),
        }
    }
}
