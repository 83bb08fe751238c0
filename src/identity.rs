//! Cache keys for execution plans.
//!
//! Two calls that bind parameters identically and deserialize rows identically
//! must produce equal identities, so every input that changes either behavior
//! (SQL text, statement kind, provider, result type, parameter shape) is part
//! of the key. Extra inequality only costs a cache miss.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::types::CommandKind;

/// Runtime identity of a Rust type, compared by `TypeId`.
#[derive(Clone, Copy)]
pub struct TypeMarker {
    id: TypeId,
    name: &'static str,
}

impl TypeMarker {
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeMarker {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeMarker {}

impl Hash for TypeMarker {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Immutable cache key for one statement invocation shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatementIdentity {
    sql: Arc<str>,
    kind: CommandKind,
    provider: &'static str,
    result_type: Option<TypeMarker>,
    param_type: Option<TypeMarker>,
}

impl StatementIdentity {
    #[must_use]
    pub fn new(sql: impl Into<Arc<str>>, kind: CommandKind, provider: &'static str) -> Self {
        Self {
            sql: sql.into(),
            kind,
            provider,
            result_type: None,
            param_type: None,
        }
    }

    /// Key the identity on the record type rows are deserialized into.
    #[must_use]
    pub fn with_result<T: 'static>(self) -> Self {
        self.with_result_type(TypeMarker::of::<T>())
    }

    #[must_use]
    pub fn with_result_type(mut self, marker: TypeMarker) -> Self {
        self.result_type = Some(marker);
        self
    }

    /// Key the identity on the shape of the parameter object.
    #[must_use]
    pub fn with_params<P: 'static>(self) -> Self {
        self.with_param_type(TypeMarker::of::<P>())
    }

    #[must_use]
    pub fn with_param_type(mut self, marker: TypeMarker) -> Self {
        self.param_type = Some(marker);
        self
    }

    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    #[must_use]
    pub fn provider(&self) -> &'static str {
        self.provider
    }

    #[must_use]
    pub fn result_type(&self) -> Option<TypeMarker> {
        self.result_type
    }

    #[must_use]
    pub fn param_type(&self) -> Option<TypeMarker> {
        self.param_type
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    struct A;
    struct B;

    #[test]
    fn every_factor_participates_in_equality() {
        let base = StatementIdentity::new("select 1", CommandKind::Text, "sqlite")
            .with_result::<A>()
            .with_params::<B>();
        let same = StatementIdentity::new("select 1", CommandKind::Text, "sqlite")
            .with_result::<A>()
            .with_params::<B>();
        assert_eq!(base, same);

        let variants = [
            StatementIdentity::new("select 2", CommandKind::Text, "sqlite")
                .with_result::<A>()
                .with_params::<B>(),
            StatementIdentity::new("select 1", CommandKind::StoredProcedure, "sqlite")
                .with_result::<A>()
                .with_params::<B>(),
            StatementIdentity::new("select 1", CommandKind::Text, "other")
                .with_result::<A>()
                .with_params::<B>(),
            StatementIdentity::new("select 1", CommandKind::Text, "sqlite")
                .with_result::<B>()
                .with_params::<B>(),
            StatementIdentity::new("select 1", CommandKind::Text, "sqlite")
                .with_result::<A>()
                .with_params::<A>(),
            StatementIdentity::new("select 1", CommandKind::Text, "sqlite").with_result::<A>(),
        ];
        let mut seen = HashSet::new();
        seen.insert(base.clone());
        for variant in variants {
            assert_ne!(base, variant);
            assert!(seen.insert(variant));
        }
    }

    #[test]
    fn result_and_param_slots_are_not_interchangeable() {
        let as_result = StatementIdentity::new("q", CommandKind::Text, "p").with_result::<A>();
        let as_param = StatementIdentity::new("q", CommandKind::Text, "p").with_params::<A>();
        assert_ne!(as_result, as_param);
    }
}
