use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::driver::{CommandCanceller, RowCursor};
use crate::error::SqlMapperError;
use crate::mapping::{FromRow, RowDeserializer};
use crate::plan::{CachedPlan, PlanCache, fingerprint};
use crate::results::{ColumnSet, RowRef};

use super::cancel::cancel_ignore_failure;

/// Deserializer for `columns`, reused from `plan` when the column shape is unchanged.
///
/// A new shape derives a fresh deserializer and replaces the cached one.
pub(crate) fn resolve_deserializer<T: FromRow>(
    cache: &PlanCache,
    plan: &CachedPlan,
    columns: &ColumnSet,
) -> Result<Arc<RowDeserializer<T>>, SqlMapperError> {
    let shape = fingerprint(columns);
    if let Some(deserializer) = plan.deserializer::<T>(shape) {
        return Ok(deserializer);
    }

    let previous = plan.deserializer_fingerprint();
    let deserializer = Arc::new(T::deserializer(columns)?);
    plan.store_deserializer(shape, Arc::clone(&deserializer));
    cache.record_derivation();
    tracing::debug!(
        sql = plan.identity().sql(),
        columns = columns.len(),
        previous = ?previous,
        fingerprint = shape,
        "derived row deserializer"
    );
    Ok(deserializer)
}

/// Read up to `limit` rows (all rows when `None`) into memory.
///
/// The token is checked before each row; once it has fired no further row is read.
pub(crate) fn read_rows<T>(
    cursor: &mut dyn RowCursor,
    deserializer: &RowDeserializer<T>,
    token: Option<&CancellationToken>,
    limit: Option<usize>,
) -> Result<Vec<T>, SqlMapperError> {
    let columns = cursor.columns().clone();
    let mut rows = Vec::new();
    while limit.is_none_or(|max| rows.len() < max) {
        if token.is_some_and(CancellationToken::is_cancelled) {
            return Err(SqlMapperError::Cancelled);
        }
        let Some(values) = cursor.advance()? else {
            break;
        };
        rows.push(deserializer.deserialize(&RowRef::new(&columns, values))?);
    }
    Ok(rows)
}

/// Abort the command behind a cursor that was not read to the end.
pub(crate) fn finish_cursor(cursor: &dyn RowCursor, canceller: Option<&Arc<dyn CommandCanceller>>) {
    if cursor.is_exhausted() {
        return;
    }
    if let Some(canceller) = canceller {
        tracing::debug!("cursor closed before end of data; cancelling command");
        cancel_ignore_failure(canceller.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StatementIdentity;
    use crate::types::{CommandKind, RowValues};

    struct VecCursor {
        columns: ColumnSet,
        rows: Vec<Vec<RowValues>>,
        at: usize,
        exhausted: bool,
    }

    impl VecCursor {
        fn new(names: &[&str], rows: Vec<Vec<RowValues>>) -> Self {
            Self {
                columns: ColumnSet::from_names(names.iter().copied()),
                rows,
                at: 0,
                exhausted: false,
            }
        }
    }

    impl RowCursor for VecCursor {
        fn columns(&self) -> &ColumnSet {
            &self.columns
        }

        fn advance(&mut self) -> Result<Option<&[RowValues]>, SqlMapperError> {
            if self.at >= self.rows.len() {
                self.exhausted = true;
                return Ok(None);
            }
            self.at += 1;
            Ok(Some(&self.rows[self.at - 1]))
        }

        fn is_exhausted(&self) -> bool {
            self.exhausted
        }
    }

    fn plan() -> CachedPlan {
        CachedPlan::new(
            StatementIdentity::new("select id", CommandKind::Text, "test").with_result::<i64>(),
            None,
        )
    }

    #[test]
    fn deserializer_is_derived_once_per_shape() {
        let cache = PlanCache::new();
        let plan = plan();
        let first = ColumnSet::from_names(["id"]);

        let a = resolve_deserializer::<i64>(&cache, &plan, &first).unwrap();
        let b = resolve_deserializer::<i64>(&cache, &plan, &first).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.stats().deserializers_derived, 1);

        let second = ColumnSet::from_names(["id", "extra"]);
        let c = resolve_deserializer::<i64>(&cache, &plan, &second).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.stats().deserializers_derived, 2);
        assert_eq!(plan.deserializer_fingerprint(), Some(fingerprint(&second)));
    }

    #[test]
    fn limit_stops_early_and_leaves_cursor_open() {
        let cache = PlanCache::new();
        let plan = plan();
        let mut cursor = VecCursor::new(
            &["id"],
            vec![vec![RowValues::Int(1)], vec![RowValues::Int(2)]],
        );
        let de = resolve_deserializer::<i64>(&cache, &plan, cursor.columns()).unwrap();

        let rows = read_rows(&mut cursor, &de, None, Some(1)).unwrap();
        assert_eq!(rows, vec![1]);
        assert!(!cursor.is_exhausted());

        let rest = read_rows(&mut cursor, &de, None, None).unwrap();
        assert_eq!(rest, vec![2]);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn fired_token_stops_reading() {
        let cache = PlanCache::new();
        let plan = plan();
        let mut cursor = VecCursor::new(&["id"], vec![vec![RowValues::Int(1)]]);
        let de = resolve_deserializer::<i64>(&cache, &plan, cursor.columns()).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = read_rows(&mut cursor, &de, Some(&token), None).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(cursor.at, 0);
    }
}
