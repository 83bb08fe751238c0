use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::SqlMapperError;
use crate::identity::StatementIdentity;
use crate::mapping::RowDeserializer;
use crate::params::ParamBinder;

static GLOBAL_CACHE: LazyLock<Arc<PlanCache>> = LazyLock::new(|| Arc::new(PlanCache::new()));

#[derive(Clone)]
struct DeserializerState {
    fingerprint: u64,
    func: Arc<dyn Any + Send + Sync>,
}

/// Cached binder and deserializer slot for one [`StatementIdentity`].
pub struct CachedPlan {
    identity: StatementIdentity,
    binder: Option<ParamBinder>,
    deserializer: RwLock<Option<DeserializerState>>,
    derivations: AtomicU64,
}

impl CachedPlan {
    #[must_use]
    pub fn new(identity: StatementIdentity, binder: Option<ParamBinder>) -> Self {
        Self {
            identity,
            binder,
            deserializer: RwLock::new(None),
            derivations: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &StatementIdentity {
        &self.identity
    }

    #[must_use]
    pub fn binder(&self) -> Option<&ParamBinder> {
        self.binder.as_ref()
    }

    /// Number of times a deserializer has been stored into this plan.
    #[must_use]
    pub fn derivations(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    /// Fingerprint of the result shape the cached deserializer was derived for.
    #[must_use]
    pub fn deserializer_fingerprint(&self) -> Option<u64> {
        self.deserializer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|state| state.fingerprint)
    }

    /// The cached deserializer, if it was derived for exactly this fingerprint and type.
    #[must_use]
    pub fn deserializer<T: 'static>(&self, fingerprint: u64) -> Option<Arc<RowDeserializer<T>>> {
        let slot = self
            .deserializer
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let state = slot.as_ref().filter(|s| s.fingerprint == fingerprint)?;
        Arc::clone(&state.func).downcast::<RowDeserializer<T>>().ok()
    }

    /// Replace the deserializer slot. The slot always holds a matching pair.
    pub fn store_deserializer<T: Send + 'static>(
        &self,
        fingerprint: u64,
        deserializer: Arc<RowDeserializer<T>>,
    ) {
        let mut slot = self
            .deserializer
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(DeserializerState {
            fingerprint,
            func: deserializer,
        });
        self.derivations.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for CachedPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedPlan")
            .field("identity", &self.identity)
            .field("binder", &self.binder)
            .field("fingerprint", &self.deserializer_fingerprint())
            .field("derivations", &self.derivations())
            .finish()
    }
}

/// Snapshot of cache activity counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanCacheStats {
    pub lookups: u64,
    pub hits: u64,
    pub plans_created: u64,
    pub deserializers_derived: u64,
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicU64,
    hits: AtomicU64,
    plans_created: AtomicU64,
    deserializers_derived: AtomicU64,
}

/// Concurrent map from statement identity to execution plan.
///
/// Readers of distinct identities never contend on a global lock. Concurrent
/// first calls for the same identity may each build a plan; the first insert
/// wins and every caller receives that plan.
#[derive(Debug, Default)]
pub struct PlanCache {
    plans: DashMap<StatementIdentity, Arc<CachedPlan>>,
    counters: Counters,
}

impl PlanCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache used by connections that don't supply their own.
    #[must_use]
    pub fn global() -> Arc<PlanCache> {
        Arc::clone(&GLOBAL_CACHE)
    }

    #[must_use]
    pub fn get(&self, identity: &StatementIdentity) -> Option<Arc<CachedPlan>> {
        self.plans.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    /// Fetch the plan for `identity`, building it with `build` on a miss.
    ///
    /// `build` runs outside any map lock, so racing callers may each build a
    /// plan; only the first one inserted is kept and returned to all of them.
    ///
    /// # Errors
    /// Propagates the error from `build`; nothing is cached in that case.
    pub fn get_or_create<F>(
        &self,
        identity: StatementIdentity,
        build: F,
    ) -> Result<Arc<CachedPlan>, SqlMapperError>
    where
        F: FnOnce(&StatementIdentity) -> Result<CachedPlan, SqlMapperError>,
    {
        self.counters.lookups.fetch_add(1, Ordering::Relaxed);
        if let Some(plan) = self.get(&identity) {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(plan);
        }

        let built = Arc::new(build(&identity)?);
        let plan = match self.plans.entry(identity) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                self.counters.plans_created.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(identity = ?slot.key(), "created execution plan");
                Arc::clone(slot.insert(built).value())
            }
        };
        Ok(plan)
    }

    /// Insert or replace the plan stored under its own identity.
    pub fn set(&self, plan: Arc<CachedPlan>) {
        self.plans.insert(plan.identity().clone(), plan);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Drop every cached plan. Counters are kept.
    pub fn purge(&self) {
        self.plans.clear();
    }

    #[must_use]
    pub fn stats(&self) -> PlanCacheStats {
        PlanCacheStats {
            lookups: self.counters.lookups.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            plans_created: self.counters.plans_created.load(Ordering::Relaxed),
            deserializers_derived: self.counters.deserializers_derived.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_derivation(&self) {
        self.counters
            .deserializers_derived
            .fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::types::CommandKind;

    fn identity(sql: &str) -> StatementIdentity {
        StatementIdentity::new(sql, CommandKind::Text, "test").with_result::<i64>()
    }

    #[test]
    fn second_lookup_hits() {
        let cache = PlanCache::new();
        let first = cache
            .get_or_create(identity("select 1"), |id| Ok(CachedPlan::new(id.clone(), None)))
            .unwrap();
        let second = cache
            .get_or_create(identity("select 1"), |_| {
                panic!("plan should have been cached")
            })
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            cache.stats(),
            PlanCacheStats {
                lookups: 2,
                hits: 1,
                plans_created: 1,
                deserializers_derived: 0
            }
        );
    }

    #[test]
    fn failed_build_caches_nothing() {
        let cache = PlanCache::new();
        let err = cache
            .get_or_create(identity("bad"), |_| {
                Err(SqlMapperError::ParameterError("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, SqlMapperError::ParameterError(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn racing_builders_converge_on_one_plan() {
        let cache = Arc::new(PlanCache::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_create(identity("select race"), |id| {
                            Ok(CachedPlan::new(id.clone(), None))
                        })
                        .unwrap()
                })
            })
            .collect();
        let plans: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(plans.iter().all(|p| Arc::ptr_eq(p, &plans[0])));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().plans_created, 1);
    }

    #[test]
    fn deserializer_slot_is_keyed_by_fingerprint_and_type() {
        let plan = CachedPlan::new(identity("select 1"), None);
        assert!(plan.deserializer::<i64>(7).is_none());

        plan.store_deserializer(7, Arc::new(RowDeserializer::<i64>::new(|row| row.value(0))));
        assert!(plan.deserializer::<i64>(7).is_some());
        assert!(plan.deserializer::<i64>(8).is_none());
        assert!(plan.deserializer::<String>(7).is_none());
        assert_eq!(plan.deserializer_fingerprint(), Some(7));
        assert_eq!(plan.derivations(), 1);
    }

    #[test]
    fn purge_and_set() {
        let cache = PlanCache::new();
        let plan = Arc::new(CachedPlan::new(identity("a"), None));
        cache.set(Arc::clone(&plan));
        assert!(cache.get(&identity("a")).is_some());
        assert!(cache.get(&identity("b")).is_none());
        cache.purge();
        assert!(cache.is_empty());
    }
}
