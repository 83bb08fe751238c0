//! Parameter objects and the binder derived from their static shape.

mod binder;

pub use binder::ParamBinder;

use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

use crate::identity::TypeMarker;
use crate::types::RowValues;

/// One field of a parameter object, as handed to the binder.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Bound as a single placeholder
    Single(RowValues),
    /// Expanded into one placeholder per element, e.g. for `IN (...)`
    List(Vec<RowValues>),
}

/// Conversion of a parameter-object field into a [`ParamValue`].
pub trait ToParamValue {
    fn to_param_value(&self) -> ParamValue;
}

macro_rules! impl_to_param_value {
    ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
        $(
            impl ToParamValue for $ty {
                fn to_param_value(&self) -> ParamValue {
                    let $v = self;
                    ParamValue::Single($conv)
                }
            }
        )*
    };
}

impl_to_param_value!(
    i64 => |v| RowValues::Int(*v),
    i32 => |v| RowValues::Int(i64::from(*v)),
    f64 => |v| RowValues::Float(*v),
    bool => |v| RowValues::Bool(*v),
    String => |v| RowValues::Text(v.clone()),
    &str => |v| RowValues::Text((*v).to_owned()),
    NaiveDateTime => |v| RowValues::Timestamp(*v),
    JsonValue => |v| RowValues::JSON(v.clone()),
    Vec<u8> => |v| RowValues::Blob(v.clone()),
    RowValues => |v| v.clone(),
);

macro_rules! impl_list_param_value {
    ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
        $(
            impl ToParamValue for Vec<$ty> {
                fn to_param_value(&self) -> ParamValue {
                    ParamValue::List(self.iter().map(|$v| $conv).collect())
                }
            }
        )*
    };
}

impl_list_param_value!(
    i64 => |v| RowValues::Int(*v),
    i32 => |v| RowValues::Int(i64::from(*v)),
    f64 => |v| RowValues::Float(*v),
    String => |v| RowValues::Text(v.clone()),
    RowValues => |v| v.clone(),
);

impl<T: ToParamValue> ToParamValue for Option<T> {
    fn to_param_value(&self) -> ParamValue {
        match self {
            Some(value) => value.to_param_value(),
            None => ParamValue::Single(RowValues::Null),
        }
    }
}

/// A parameter object with a statically known field list.
///
/// Usually implemented with [`impl_sql_params!`](crate::impl_sql_params).
pub trait SqlParams: Send + Sync + 'static {
    /// Field names in declaration order.
    fn field_names() -> &'static [&'static str];

    /// Field values, positionally matching [`SqlParams::field_names`].
    fn param_values(&self) -> Vec<ParamValue>;
}

/// Parameter type of statements that bind nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoParams;

impl SqlParams for NoParams {
    fn field_names() -> &'static [&'static str] {
        &[]
    }

    fn param_values(&self) -> Vec<ParamValue> {
        Vec::new()
    }
}

/// Static shape descriptor of a parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamShape {
    marker: TypeMarker,
    fields: &'static [&'static str],
}

impl ParamShape {
    #[must_use]
    pub fn of<P: SqlParams>() -> Self {
        Self {
            marker: TypeMarker::of::<P>(),
            fields: P::field_names(),
        }
    }

    #[must_use]
    pub fn marker(&self) -> TypeMarker {
        self.marker
    }

    #[must_use]
    pub fn fields(&self) -> &'static [&'static str] {
        self.fields
    }
}

/// Implement [`SqlParams`] for a plain struct, one placeholder per named field.
///
/// ```rust
/// use sql_mapper::impl_sql_params;
///
/// struct ById {
///     id: i64,
///     tags: Vec<String>,
/// }
///
/// impl_sql_params!(ById { id, tags });
/// ```
#[macro_export]
macro_rules! impl_sql_params {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $crate::params::SqlParams for $ty {
            fn field_names() -> &'static [&'static str] {
                &[$(stringify!($field)),*]
            }

            fn param_values(&self) -> ::std::vec::Vec<$crate::params::ParamValue> {
                ::std::vec![$($crate::params::ToParamValue::to_param_value(&self.$field)),*]
            }
        }
    };
}
