//! Async execution and row materialization over blocking database connections.
//!
//! Each call is described by a [`StatementBuilder`](query_builder::StatementBuilder),
//! runs on tokio's blocking pool, and reuses a per-statement [`CachedPlan`](plan::CachedPlan)
//! holding the parameter binder and row deserializer derived on first use.

pub mod connection;
pub mod driver;
pub mod error;
pub mod executor;
pub mod identity;
pub mod mapping;
pub mod params;
pub mod plan;
pub mod prelude;
pub mod query_builder;
pub mod results;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod types;

pub use connection::{ConnectionOptions, DbConnection, DbTransaction};
pub use error::SqlMapperError;
pub use executor::{RowStream, TaskHandle, run_in_task};
pub use plan::{PlanCache, PlanCacheStats};
pub use query_builder::{ParamArg, Rows, StatementBuilder};
pub use tokio_util::sync::CancellationToken;
