//! Execution plans: the cached per-statement binding and deserialization shape.

mod cache;
mod fingerprint;

pub use cache::{CachedPlan, PlanCache, PlanCacheStats};
pub use fingerprint::fingerprint;
