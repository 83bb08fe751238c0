//! Row deserialization: turning the cursor's current row into a record.
//!
//! A [`FromRow`] type derives a [`RowDeserializer`] from the column layout of a
//! result. Derivation resolves column positions once; the resulting
//! deserializer is cached in the statement's plan and reused for every row of
//! every later execution with the same result shape.

use std::fmt;

use chrono::NaiveDateTime;
use serde_json::{Map, Value as JsonValue};

use crate::error::SqlMapperError;
use crate::results::{ColumnSet, CustomDbRow, RowRef};
use crate::types::RowValues;

/// Conversion from one column value.
pub trait FromValue: Sized {
    /// # Errors
    /// Returns [`SqlMapperError::DeserializeError`] when the value has an incompatible type.
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError>;
}

fn mismatch(expected: &str, value: &RowValues) -> SqlMapperError {
    if value.is_null() {
        SqlMapperError::DeserializeError(format!("unexpected NULL, expected {expected}"))
    } else {
        SqlMapperError::DeserializeError(format!(
            "cannot convert {} into {expected}",
            value.kind_name()
        ))
    }
}

impl FromValue for i64 {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        match value {
            RowValues::Int(i) => Ok(*i),
            RowValues::Bool(b) => Ok(i64::from(*b)),
            other => Err(mismatch("i64", other)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        let wide = i64::from_value(value).map_err(|_| mismatch("i32", value))?;
        i32::try_from(wide).map_err(|_| {
            SqlMapperError::DeserializeError(format!("integer {wide} out of range for i32"))
        })
    }
}

impl FromValue for f64 {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        value.as_float().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromValue for bool {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        value.as_bool().copied().ok_or_else(|| mismatch("bool", value))
    }
}

impl FromValue for String {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        value
            .as_text()
            .map(str::to_owned)
            .ok_or_else(|| mismatch("String", value))
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        match value {
            RowValues::Blob(bytes) => Ok(bytes.clone()),
            RowValues::Text(s) => Ok(s.clone().into_bytes()),
            other => Err(mismatch("bytes", other)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        value
            .as_timestamp()
            .ok_or_else(|| mismatch("NaiveDateTime", value))
    }
}

impl FromValue for JsonValue {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        match value {
            RowValues::JSON(json) => Ok(json.clone()),
            RowValues::Text(s) => serde_json::from_str(s).map_err(|err| {
                SqlMapperError::DeserializeError(format!("invalid JSON text: {err}"))
            }),
            other => Ok(other.to_json()),
        }
    }
}

impl FromValue for RowValues {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &RowValues) -> Result<Self, SqlMapperError> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_value(value).map(Some)
        }
    }
}

type DeserializeFn<T> = dyn Fn(&RowRef<'_>) -> Result<T, SqlMapperError> + Send + Sync;

/// Converts the cursor's current row into one `T`, for one specific column layout.
pub struct RowDeserializer<T> {
    func: Box<DeserializeFn<T>>,
}

impl<T> RowDeserializer<T> {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&RowRef<'_>) -> Result<T, SqlMapperError> + Send + Sync + 'static,
    {
        Self {
            func: Box::new(func),
        }
    }

    /// # Errors
    /// Propagates whatever conversion error the deserializer reports for this row.
    pub fn deserialize(&self, row: &RowRef<'_>) -> Result<T, SqlMapperError> {
        (self.func)(row)
    }
}

impl<T> fmt::Debug for RowDeserializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowDeserializer")
            .field("target", &std::any::type_name::<T>())
            .finish()
    }
}

/// A record type rows can be materialized into.
pub trait FromRow: Sized + Send + 'static {
    /// Derive a deserializer for the given column layout.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::DeserializeError`] when the layout cannot produce `Self`
    /// (for example a required column is missing).
    fn deserializer(columns: &ColumnSet) -> Result<RowDeserializer<Self>, SqlMapperError>;
}

macro_rules! impl_scalar_from_row {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromRow for $ty {
                fn deserializer(
                    columns: &ColumnSet,
                ) -> Result<RowDeserializer<Self>, SqlMapperError> {
                    first_column(columns)?;
                    Ok(RowDeserializer::new(|row| row.value::<$ty>(0)))
                }
            }

            impl FromRow for Option<$ty> {
                fn deserializer(
                    columns: &ColumnSet,
                ) -> Result<RowDeserializer<Self>, SqlMapperError> {
                    first_column(columns)?;
                    Ok(RowDeserializer::new(|row| row.value::<Option<$ty>>(0)))
                }
            }
        )*
    };
}

fn first_column(columns: &ColumnSet) -> Result<(), SqlMapperError> {
    if columns.is_empty() {
        return Err(SqlMapperError::DeserializeError(
            "scalar result requires at least one column".into(),
        ));
    }
    Ok(())
}

impl_scalar_from_row!(i64, i32, f64, bool, String, Vec<u8>, NaiveDateTime, RowValues);

impl FromRow for CustomDbRow {
    fn deserializer(_columns: &ColumnSet) -> Result<RowDeserializer<Self>, SqlMapperError> {
        Ok(RowDeserializer::new(|row| Ok(CustomDbRow::from_row_ref(row))))
    }
}

/// A whole row as a JSON object keyed by column name. Duplicate names keep the last value.
impl FromRow for JsonValue {
    fn deserializer(columns: &ColumnSet) -> Result<RowDeserializer<Self>, SqlMapperError> {
        let width = columns.len();
        Ok(RowDeserializer::new(move |row| {
            let mut object = Map::with_capacity(width);
            for (name, value) in row.columns().names().iter().zip(row.values()) {
                object.insert(name.clone(), value.to_json());
            }
            Ok(JsonValue::Object(object))
        }))
    }
}

/// Implement [`FromRow`] for a plain struct by matching field names to column names.
///
/// Column lookup happens once per result shape; a missing column fails derivation.
///
/// ```rust
/// use sql_mapper::impl_from_row;
///
/// struct Widget {
///     id: i64,
///     name: String,
///     weight: Option<f64>,
/// }
///
/// impl_from_row!(Widget { id, name, weight });
/// ```
#[macro_export]
macro_rules! impl_from_row {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $crate::mapping::FromRow for $ty {
            fn deserializer(
                columns: &$crate::results::ColumnSet,
            ) -> ::std::result::Result<$crate::mapping::RowDeserializer<Self>, $crate::SqlMapperError> {
                struct Layout {
                    $($field: usize,)*
                }
                let layout = Layout {
                    $($field: columns.require(stringify!($field))?,)*
                };
                Ok($crate::mapping::RowDeserializer::new(move |row| {
                    Ok($ty {
                        $($field: row.value(layout.$field)?,)*
                    })
                }))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Person {
        id: i64,
        name: String,
        nick: Option<String>,
    }

    crate::impl_from_row!(Person { id, name, nick });

    #[test]
    fn struct_mapping_resolves_columns_by_name() {
        let cols = ColumnSet::from_names(["NAME", "nick", "ID"]);
        let de = Person::deserializer(&cols).unwrap();
        let values = vec![
            RowValues::Text("x".into()),
            RowValues::Null,
            RowValues::Int(5),
        ];
        let person = de.deserialize(&RowRef::new(&cols, &values)).unwrap();
        assert_eq!(
            person,
            Person {
                id: 5,
                name: "x".into(),
                nick: None
            }
        );
    }

    #[test]
    fn struct_mapping_fails_derivation_on_missing_column() {
        let cols = ColumnSet::from_names(["id", "name"]);
        let err = Person::deserializer(&cols).unwrap_err();
        assert!(matches!(err, SqlMapperError::DeserializeError(_)));
    }

    #[test]
    fn scalars_read_first_column() {
        let cols = ColumnSet::from_names(["count", "ignored"]);
        let values = vec![RowValues::Int(3), RowValues::Text("z".into())];
        let row = RowRef::new(&cols, &values);
        assert_eq!(i64::deserializer(&cols).unwrap().deserialize(&row).unwrap(), 3);
        assert_eq!(
            Option::<i64>::deserializer(&cols)
                .unwrap()
                .deserialize(&row)
                .unwrap(),
            Some(3)
        );
        assert!(String::deserializer(&cols).unwrap().deserialize(&row).is_err());
        assert!(i64::deserializer(&ColumnSet::default()).is_err());
    }

    #[test]
    fn null_into_non_optional_is_an_error() {
        let err = i64::from_value(&RowValues::Null).unwrap_err();
        assert!(err.to_string().contains("NULL"));
        assert_eq!(Option::<i64>::from_value(&RowValues::Null).unwrap(), None);
    }

    #[test]
    fn json_row_is_keyed_by_column() {
        let cols = ColumnSet::from_names(["id", "tag"]);
        let values = vec![RowValues::Int(1), RowValues::Text("a".into())];
        let json = JsonValue::deserializer(&cols)
            .unwrap()
            .deserialize(&RowRef::new(&cols, &values))
            .unwrap();
        assert_eq!(json, serde_json::json!({ "id": 1, "tag": "a" }));
    }
}
