//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types, traits and macros
//! to make it easier to get started with the library.

pub use crate::connection::{ConnectionOptions, DbConnection, DbTransaction};
pub use crate::driver::RawConnection;
pub use crate::error::SqlMapperError;
pub use crate::executor::{RowStream, TaskHandle};
pub use crate::mapping::{FromRow, FromValue, RowDeserializer};
pub use crate::params::{NoParams, ParamValue, SqlParams, ToParamValue};
pub use crate::plan::PlanCache;
pub use crate::query_builder::{ParamArg, Rows, StatementBuilder};
pub use crate::results::{ColumnSet, CustomDbRow, RowRef};
pub use crate::types::{CommandKind, RowValues};
pub use crate::{impl_from_row, impl_sql_params};
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteOptions, SqliteOptionsBuilder, SqliteRawConnection};
