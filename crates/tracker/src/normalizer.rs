//! Field normalizer.
//!
//! The tracker describes every issue and every history entry as a list of
//! fields with one of three shapes:
//! - reference fields: a `value` list, optionally with a parallel `valueId` list
//! - change fields: `oldValue` / `newValue` lists
//! - scalar fields: a plain `value`
//!
//! [`normalize`] flattens such a list into a name → value mapping and records
//! which fields a history entry changed.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use trackwatch_common::error::{AppError, AppResult};
use trackwatch_common::types::FieldChange;

/// A field exactly as the tracker sends it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawField {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, rename = "valueId")]
    pub value_id: Option<Value>,
    #[serde(default, rename = "oldValue")]
    pub old_value: Option<Value>,
    #[serde(default, rename = "newValue")]
    pub new_value: Option<Value>,
}

/// A normalized attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Scalar(Value),
    Change(FieldChange),
}

/// Flat view of a field list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedFields {
    pub attributes: BTreeMap<String, FieldValue>,
    /// Names of change fields, in payload order, without duplicates.
    pub changed_fields: Vec<String>,
}

impl NormalizedFields {
    pub fn scalar(&self, name: &str) -> Option<&Value> {
        match self.attributes.get(name)? {
            FieldValue::Scalar(value) => Some(value),
            FieldValue::Change(_) => None,
        }
    }

    /// A scalar attribute rendered as text; `None` when absent or not textual.
    pub fn text(&self, name: &str) -> Option<String> {
        self.scalar(name).and_then(scalar_text)
    }

    pub fn change(&self, name: &str) -> Option<&FieldChange> {
        match self.attributes.get(name)? {
            FieldValue::Change(change) => Some(change),
            FieldValue::Scalar(_) => None,
        }
    }
}

/// Normalize a raw field list.
///
/// Fails with [`AppError::MalformedPayload`] when a field violates its shape,
/// e.g. a reference list whose first element is a bare scalar.
pub fn normalize(fields: &[RawField]) -> AppResult<NormalizedFields> {
    let mut out = NormalizedFields::default();

    for field in fields {
        let value = match (&field.value, &field.old_value, &field.new_value) {
            (Some(Value::Array(values)), _, _) => {
                FieldValue::Scalar(reference_value(field, values)?)
            }
            (_, Some(old), Some(new)) => {
                if !out.changed_fields.contains(&field.name) {
                    out.changed_fields.push(field.name.clone());
                }
                FieldValue::Change(change_value(&field.name, old, new)?)
            }
            (value, _, _) => FieldValue::Scalar(value.clone().unwrap_or(Value::Null)),
        };

        out.attributes.insert(field.name.clone(), value);
    }

    Ok(out)
}

fn reference_value(field: &RawField, values: &[Value]) -> AppResult<Value> {
    let Some(first) = values.first() else {
        return Ok(Value::Null);
    };

    match &field.value_id {
        Some(Value::Array(ids)) => {
            let label = match first {
                Value::Object(map) => map
                    .get("label")
                    .or_else(|| map.get("value"))
                    .and_then(scalar_text),
                other => scalar_text(other),
            }
            .ok_or_else(|| {
                AppError::MalformedPayload(format!("field {}: reference has no label", field.name))
            })?;

            match ids.first() {
                Some(id) => {
                    let id = scalar_text(id).ok_or_else(|| {
                        AppError::MalformedPayload(format!(
                            "field {}: valueId is not a scalar",
                            field.name
                        ))
                    })?;
                    Ok(Value::String(format!("{label} [{id}]")))
                }
                None => Ok(Value::String(label)),
            }
        }
        _ => match first {
            Value::Object(map) => map.get("value").cloned().ok_or_else(|| {
                AppError::MalformedPayload(format!(
                    "field {}: reference element has no value member",
                    field.name
                ))
            }),
            other => Err(AppError::MalformedPayload(format!(
                "field {}: expected an object in the value list, got {other}",
                field.name
            ))),
        },
    }
}

fn change_value(name: &str, old: &Value, new: &Value) -> AppResult<FieldChange> {
    let mut old_value = first_of(name, old)?;
    let mut new_value = first_of(name, new)?;

    if name.eq_ignore_ascii_case("sprint") {
        old_value = flatten_reference(old_value);
        new_value = flatten_reference(new_value);
    }

    Ok(FieldChange {
        old_value,
        new_value,
    })
}

fn first_of(name: &str, list: &Value) -> AppResult<Value> {
    match list {
        Value::Array(values) => Ok(values.first().cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(AppError::MalformedPayload(format!(
            "field {name}: expected a list of values, got {other}"
        ))),
    }
}

/// `{"id": "S1", ...}` becomes `"S1"`.
fn flatten_reference(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("id") => {
            map.remove("id").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Text of a string, number or boolean.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
