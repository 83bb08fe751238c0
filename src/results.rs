//! Result-shape metadata and the dynamic row type.

mod columns;
mod row;

pub use columns::{ColumnInfo, ColumnSet, RowRef};
pub use row::CustomDbRow;
