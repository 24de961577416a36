//! Write-body checking against the static schema.

use serde_json::{Map, Value};

use super::{Entity, FieldDescriptor, FieldKind, Model, ScalarType};
use crate::error::ValidationErrors;
use crate::query::coerce::{format_timestamp, parse_datetime};

/// Checks a create or update body for `entity` and returns the normalised
/// document fields.
///
/// Every key must be a writable field: not managed, not hidden and not a
/// relation. Values must match the declared type; timestamps are
/// normalised to their stored form. `null` clears a field.
pub fn validate_document(entity: Entity, body: &Map<String, Value>) -> Result<Map<String, Value>, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let out = check_object(Model::Entity(entity), body, "", &mut errors);
    errors.into_result(out)
}

fn check_object(
    model: Model,
    body: &Map<String, Value>,
    prefix: &str,
    errors: &mut ValidationErrors,
) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in body {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let Some(field) = model.field(key) else {
            errors.push(path, "unknown field");
            continue;
        };
        if field.managed || field.hidden {
            errors.push(path, "field is not writable");
            continue;
        }
        if matches!(field.kind, FieldKind::Relation(_)) {
            errors.push(path, "relations are written through their id fields");
            continue;
        }
        if let Some(normalised) = check_value(field, value, &path, errors) {
            out.insert(key.clone(), normalised);
        }
    }
    out
}

fn check_value(field: &FieldDescriptor, value: &Value, path: &str, errors: &mut ValidationErrors) -> Option<Value> {
    if value.is_null() {
        return Some(Value::Null);
    }
    if field.is_list {
        let Value::Array(items) = value else {
            errors.push(path, "expected an array");
            return None;
        };
        let before = errors.errors().len();
        let checked: Vec<Value> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| check_single(field, item, &format!("{path}[{i}]"), errors))
            .collect();
        return (errors.errors().len() == before).then_some(Value::Array(checked));
    }
    check_single(field, value, path, errors)
}

fn check_single(field: &FieldDescriptor, value: &Value, path: &str, errors: &mut ValidationErrors) -> Option<Value> {
    match field.kind {
        FieldKind::Scalar(ty) => match (ty, value) {
            (ScalarType::String, Value::String(_))
            | (ScalarType::Boolean, Value::Bool(_))
            | (ScalarType::Float, Value::Number(_))
            | (ScalarType::Json, _) => Some(value.clone()),
            (ScalarType::Int, Value::Number(n)) if n.is_i64() || n.is_u64() => Some(value.clone()),
            (ScalarType::DateTime, Value::String(s)) => match parse_datetime(s) {
                Some(dt) => Some(Value::String(format_timestamp(dt))),
                None => {
                    errors.push(path, "expected an RFC 3339 date-time");
                    None
                }
            },
            _ => {
                errors.push(path, format!("expected {}", scalar_name(ty)));
                None
            }
        },
        FieldKind::Enum(ty) => match value.as_str() {
            Some(s) if ty.variants().contains(&s) => Some(value.clone()),
            _ => {
                errors.push(
                    path,
                    format!("expected one of {}", ty.variants().join(", ")),
                );
                None
            }
        },
        FieldKind::Composite(ty) => match value {
            Value::Object(map) => Some(Value::Object(check_object(
                Model::Composite(ty),
                map,
                path,
                errors,
            ))),
            _ => {
                errors.push(path, format!("expected a {} object", ty.name()));
                None
            }
        },
        FieldKind::Relation(_) => None,
    }
}

fn scalar_name(ty: ScalarType) -> &'static str {
    match ty {
        ScalarType::String => "a string",
        ScalarType::Int => "an integer",
        ScalarType::Float => "a number",
        ScalarType::Boolean => "a boolean",
        ScalarType::DateTime => "a date-time string",
        ScalarType::Json => "JSON",
    }
}
