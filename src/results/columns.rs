use std::collections::HashMap;
use std::sync::Arc;

use crate::error::SqlMapperError;
use crate::mapping::FromValue;
use crate::types::RowValues;

/// Metadata for one result column as reported by the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnInfo {
    /// Column name (or alias) as reported by the driver
    pub name: String,
    /// Declared type, when the driver knows it
    pub decl_type: Option<String>,
}

impl ColumnInfo {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decl_type: None,
        }
    }

    #[must_use]
    pub fn with_decl_type(mut self, decl_type: impl Into<String>) -> Self {
        self.decl_type = Some(decl_type.into());
        self
    }
}

/// Ordered column metadata for the active result of a cursor.
///
/// Cheap to clone; the name list and lookup index are shared by every row
/// materialized from the same result.
#[derive(Debug, Clone, Default)]
pub struct ColumnSet {
    columns: Arc<Vec<ColumnInfo>>,
    names: Arc<Vec<String>>,
    index: Arc<HashMap<String, usize>>,
}

impl ColumnSet {
    #[must_use]
    pub fn new(columns: Vec<ColumnInfo>) -> Self {
        let names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();
        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            // first occurrence wins for duplicate names
            index.entry(name.clone()).or_insert(i);
        }
        Self {
            columns: Arc::new(columns),
            names: Arc::new(names),
            index: Arc::new(index),
        }
    }

    /// Build a column set from names alone (no declared types).
    #[must_use]
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(names.into_iter().map(ColumnInfo::new).collect())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnInfo> {
        self.columns.iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ColumnInfo> {
        self.columns.get(index)
    }

    #[must_use]
    pub fn names(&self) -> &Arc<Vec<String>> {
        &self.names
    }

    pub(crate) fn name_index(&self) -> &Arc<HashMap<String, usize>> {
        &self.index
    }

    /// Position of a column by name: exact match first, then ASCII case-insensitive.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        if let Some(&idx) = self.index.get(name) {
            return Some(idx);
        }
        self.names
            .iter()
            .position(|col| col.eq_ignore_ascii_case(name))
    }

    /// Like [`ColumnSet::index_of`], but a missing column is a deserialization error.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::DeserializeError`] if no column matches `name`.
    pub fn require(&self, name: &str) -> Result<usize, SqlMapperError> {
        self.index_of(name).ok_or_else(|| {
            SqlMapperError::DeserializeError(format!(
                "column `{name}` not present in result (columns: {})",
                self.names.join(", ")
            ))
        })
    }
}

/// Borrowed view of the cursor's current row.
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    columns: &'a ColumnSet,
    values: &'a [RowValues],
}

impl<'a> RowRef<'a> {
    #[must_use]
    pub fn new(columns: &'a ColumnSet, values: &'a [RowValues]) -> Self {
        Self { columns, values }
    }

    #[must_use]
    pub fn columns(&self) -> &'a ColumnSet {
        self.columns
    }

    #[must_use]
    pub fn values(&self) -> &'a [RowValues] {
        self.values
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&'a RowValues> {
        self.values.get(index)
    }

    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&'a RowValues> {
        self.columns.index_of(name).and_then(|idx| self.values.get(idx))
    }

    /// Convert the value at `index` into `T`.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::DeserializeError`] if the index is out of range or the
    /// value cannot be converted.
    pub fn value<T: FromValue>(&self, index: usize) -> Result<T, SqlMapperError> {
        let raw = self.values.get(index).ok_or_else(|| {
            SqlMapperError::DeserializeError(format!(
                "column index {index} out of range for row of width {}",
                self.values.len()
            ))
        })?;
        T::from_value(raw).map_err(|err| match err {
            SqlMapperError::DeserializeError(msg) => {
                let name = self.columns.get(index).map_or("?", |c| c.name.as_str());
                SqlMapperError::DeserializeError(format!("column `{name}`: {msg}"))
            }
            other => other,
        })
    }
}
