use rusqlite::Rows;
use rusqlite::types::Value;

use crate::driver::RowCursor;
use crate::error::SqlMapperError;
use crate::results::ColumnSet;
use crate::types::RowValues;

/// Extract a `RowValues` from a `SQLite` row.
///
/// # Errors
///
/// Returns `SqlMapperError` if the value cannot be read.
pub fn sqlite_extract_value_sync(
    row: &rusqlite::Row,
    idx: usize,
) -> Result<RowValues, SqlMapperError> {
    let value: Value = row.get(idx).map_err(SqlMapperError::SqliteError)?;
    match value {
        Value::Null => Ok(RowValues::Null),
        Value::Integer(i) => Ok(RowValues::Int(i)),
        Value::Real(f) => Ok(RowValues::Float(f)),
        Value::Text(s) => Ok(RowValues::Text(s)),
        Value::Blob(b) => Ok(RowValues::Blob(b)),
    }
}

/// Forward-only cursor over a running rusqlite statement.
pub(crate) struct SqliteCursor<'stmt> {
    rows: Rows<'stmt>,
    columns: ColumnSet,
    current: Vec<RowValues>,
    exhausted: bool,
}

impl<'stmt> SqliteCursor<'stmt> {
    pub(crate) fn new(rows: Rows<'stmt>, columns: ColumnSet) -> Self {
        let width = columns.len();
        Self {
            rows,
            columns,
            current: Vec::with_capacity(width),
            exhausted: false,
        }
    }
}

impl RowCursor for SqliteCursor<'_> {
    fn columns(&self) -> &ColumnSet {
        &self.columns
    }

    fn advance(&mut self) -> Result<Option<&[RowValues]>, SqlMapperError> {
        if self.exhausted {
            return Ok(None);
        }
        match self.rows.next()? {
            Some(row) => {
                self.current.clear();
                for idx in 0..self.columns.len() {
                    self.current.push(sqlite_extract_value_sync(row, idx)?);
                }
                Ok(Some(&self.current))
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
