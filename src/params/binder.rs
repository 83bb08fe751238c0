use regex::{NoExpand, Regex};

use super::{ParamShape, ParamValue};
use crate::driver::Command;
use crate::error::SqlMapperError;
use crate::types::{CommandKind, RowValues};

const EMPTY_LIST: &str = "(SELECT NULL WHERE 1 = 0)";

#[derive(Debug, Clone)]
struct Binding {
    field: usize,
    placeholder: String,
    // Matches the placeholder as a whole token; `None` for stored procedures
    token: Option<Regex>,
}

/// Binds a parameter object onto a [`Command`].
///
/// Derived once per (statement, parameter shape): only fields whose placeholder
/// (`:name`, `@name` or `$name`) occurs in the statement text are bound.
/// List-valued fields rewrite the command text, so a command must have its text
/// restored before the binder is applied a second time.
#[derive(Debug, Clone)]
pub struct ParamBinder {
    shape: ParamShape,
    bindings: Vec<Binding>,
}

impl ParamBinder {
    /// # Errors
    /// Returns [`SqlMapperError::ParameterError`] if a placeholder pattern cannot be compiled.
    pub fn derive(sql: &str, kind: CommandKind, shape: ParamShape) -> Result<Self, SqlMapperError> {
        let mut bindings = Vec::with_capacity(shape.fields().len());
        for (field, name) in shape.fields().iter().enumerate() {
            if kind == CommandKind::StoredProcedure {
                bindings.push(Binding {
                    field,
                    placeholder: format!("@{name}"),
                    token: None,
                });
                continue;
            }

            let finder = compile(&format!(r"[:@$]{}\b", regex::escape(name)))?;
            let Some(found) = finder.find(sql) else {
                continue;
            };
            let placeholder = found.as_str().to_owned();
            let token = compile(&format!(r"{}\b", regex::escape(&placeholder)))?;
            bindings.push(Binding {
                field,
                placeholder,
                token: Some(token),
            });
        }
        Ok(Self { shape, bindings })
    }

    #[must_use]
    pub fn shape(&self) -> ParamShape {
        self.shape
    }

    /// Placeholders this binder will populate, in binding order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|b| b.placeholder.as_str())
    }

    /// Append the bound parameters to `command`, expanding list values in its text.
    ///
    /// # Errors
    /// Returns [`SqlMapperError::ParameterError`] if `values` doesn't match the shape, or a
    /// list is bound to a stored procedure.
    pub fn bind(&self, command: &mut Command, values: Vec<ParamValue>) -> Result<(), SqlMapperError> {
        if values.len() != self.shape.fields().len() {
            return Err(SqlMapperError::ParameterError(format!(
                "{} produced {} values for {} fields",
                self.shape.marker().name(),
                values.len(),
                self.shape.fields().len()
            )));
        }
        let mut values: Vec<Option<ParamValue>> = values.into_iter().map(Some).collect();

        for binding in &self.bindings {
            let value = values[binding.field].take().ok_or_else(|| {
                SqlMapperError::ParameterError(format!(
                    "field {} bound twice",
                    binding.placeholder
                ))
            })?;
            match value {
                ParamValue::Single(value) => command.push_param(binding.placeholder.clone(), value),
                ParamValue::List(items) => expand_list(command, binding, items)?,
            }
        }
        Ok(())
    }
}

fn expand_list(
    command: &mut Command,
    binding: &Binding,
    items: Vec<RowValues>,
) -> Result<(), SqlMapperError> {
    let Some(token) = &binding.token else {
        return Err(SqlMapperError::ParameterError(format!(
            "list value for {} cannot be bound to a stored procedure",
            binding.placeholder
        )));
    };

    let names: Vec<String> = (1..=items.len())
        .map(|i| format!("{}_{i}", binding.placeholder))
        .collect();
    let replacement = if names.is_empty() {
        EMPTY_LIST.to_owned()
    } else {
        format!("({})", names.join(", "))
    };
    let rewritten = token
        .replace_all(command.text(), NoExpand(&replacement))
        .into_owned();
    command.set_text(rewritten);

    for (name, value) in names.into_iter().zip(items) {
        command.push_param(name, value);
    }
    Ok(())
}

fn compile(pattern: &str) -> Result<Regex, SqlMapperError> {
    Regex::new(pattern)
        .map_err(|err| SqlMapperError::ParameterError(format!("bad placeholder pattern: {err}")))
}
