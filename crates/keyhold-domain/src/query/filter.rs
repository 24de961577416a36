//! Filter Compiler.
//!
//! Every filter form is first normalised to ordered `(key, value)` pairs.
//! Pairs are grouped by key in first-appearance order; a group holding more
//! than one value becomes an OR, and groups are ANDed together.
//!
//! Each key is a dotted path resolved against the static schema. Relation
//! segments wrap the leaf in a relation match, composite segments in an
//! embedded-value match. Paths that do not resolve, that end on something
//! other than a scalar or enum, or whose value fails to coerce are dropped
//! from the condition and reported as [`FilterDiagnostic`]s instead of
//! failing the request.

use std::fmt;

use serde_json::{Map, Value};

use crate::query::coerce::coerce;
use crate::query::condition::{Condition, Operator};
use crate::query::params::FilterInput;
use crate::schema::{resolve_path, Entity, FieldKind};

/// Why part of a filter was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDiagnostic {
    /// A flat segment without a `key:value` separator.
    MalformedPair { segment: String },
    /// Some segment of the path is not a field of its model.
    UnresolvedPath { path: String },
    /// The path ends on a relation or composite, or on a hidden field.
    UnsupportedTerminal { path: String },
    /// The value does not parse as the field's declared type.
    InvalidValue {
        path: String,
        value: String,
        expected: &'static str,
    },
}

impl fmt::Display for FilterDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterDiagnostic::MalformedPair { segment } => {
                write!(f, "ignored filter segment '{segment}': expected key:value")
            }
            FilterDiagnostic::UnresolvedPath { path } => {
                write!(f, "ignored filter on unknown path '{path}'")
            }
            FilterDiagnostic::UnsupportedTerminal { path } => {
                write!(f, "ignored filter on '{path}': not a filterable field")
            }
            FilterDiagnostic::InvalidValue {
                path,
                value,
                expected,
            } => write!(f, "ignored filter '{path}:{value}': expected {expected}"),
        }
    }
}

/// A compiled condition plus everything dropped along the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub condition: Condition,
    pub diagnostics: Vec<FilterDiagnostic>,
}

/// Compiles any accepted filter form for `entity`.
pub fn compile_filter(entity: Entity, input: &FilterInput) -> CompiledFilter {
    let mut diagnostics = Vec::new();
    let pairs = match input {
        FilterInput::Flat(text) => parse_flat(text, &mut diagnostics),
        FilterInput::Entries(entries) => entries.iter().flat_map(entry_pairs).collect(),
    };

    let mut compiled = compile_pairs(entity, pairs);
    diagnostics.append(&mut compiled.diagnostics);
    compiled.diagnostics = diagnostics;
    compiled
}

/// Compiles already-normalised `(path, value)` pairs.
pub fn compile_pairs<K, V>(entity: Entity, pairs: impl IntoIterator<Item = (K, V)>) -> CompiledFilter
where
    K: Into<String>,
    V: Into<String>,
{
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for (key, value) in pairs {
        let (key, value) = (key.into(), value.into());
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => groups.push((key, vec![value])),
        }
    }

    let mut diagnostics = Vec::new();
    let mut clauses = Vec::with_capacity(groups.len());

    for (path, values) in groups {
        let mut leaves: Vec<Condition> = values
            .iter()
            .filter_map(|value| match compile_leaf(entity, &path, value) {
                Ok(leaf) => Some(leaf),
                Err(diagnostic) => {
                    diagnostics.push(diagnostic);
                    None
                }
            })
            .collect();

        match leaves.len() {
            0 => {}
            1 => clauses.extend(leaves.pop()),
            _ => clauses.push(Condition::Any(leaves)),
        }
    }

    CompiledFilter {
        condition: Condition::All(clauses),
        diagnostics,
    }
}

/// Compiles one `path:value` leaf, wrapped for every relation and composite
/// segment along the path.
pub fn compile_leaf(entity: Entity, path: &str, raw: &str) -> Result<Condition, FilterDiagnostic> {
    let chain = resolve_path(entity, path).ok_or_else(|| FilterDiagnostic::UnresolvedPath {
        path: path.to_string(),
    })?;

    let Some(leaf) = chain.last() else {
        return Err(FilterDiagnostic::UnresolvedPath {
            path: path.to_string(),
        });
    };
    if !leaf.is_terminal() || chain.iter().any(|f| f.hidden) {
        return Err(FilterDiagnostic::UnsupportedTerminal {
            path: path.to_string(),
        });
    }

    let value = match leaf.kind {
        FieldKind::Scalar(ty) => coerce(ty, raw).map_err(|e| FilterDiagnostic::InvalidValue {
            path: path.to_string(),
            value: e.value,
            expected: e.expected,
        })?,
        FieldKind::Enum(_) => Value::String(raw.to_string()),
        FieldKind::Relation(_) | FieldKind::Composite(_) => {
            return Err(FilterDiagnostic::UnsupportedTerminal {
                path: path.to_string(),
            })
        }
    };

    let op = if leaf.is_list { Operator::Has } else { Operator::Equals };
    let condition = Condition::Field {
        field: leaf.name,
        op,
        value,
    };
    Ok(Condition::along(&chain, condition))
}

/// Splits `k:v,k:v`. The value keeps everything after the first `:` so
/// timestamps survive.
fn parse_flat(text: &str, diagnostics: &mut Vec<FilterDiagnostic>) -> Vec<(String, String)> {
    text.split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| match segment.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => {
                Some((key.trim().to_string(), value.trim().to_string()))
            }
            _ => {
                diagnostics.push(FilterDiagnostic::MalformedPair {
                    segment: segment.to_string(),
                });
                None
            }
        })
        .collect()
}

/// Pairs from one JSON filter object: either `{key, value}` or a map of
/// dotted paths. Array values expand into one pair per element.
fn entry_pairs(entry: &Map<String, Value>) -> Vec<(String, String)> {
    if entry.len() == 2 {
        if let (Some(Value::String(key)), Some(value)) = (entry.get("key"), entry.get("value")) {
            return expand(key, value);
        }
    }
    entry.iter().flat_map(|(key, value)| expand(key, value)).collect()
}

fn expand(key: &str, value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Array(items) => items.iter().map(|v| (key.to_string(), stringify(v))).collect(),
        other => vec![(key.to_string(), stringify(other))],
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flat(entity: Entity, text: &str) -> CompiledFilter {
        compile_filter(entity, &FilterInput::Flat(text.to_string()))
    }

    #[test]
    fn test_repeated_enum_key_becomes_or() {
        let compiled = flat(Entity::User, "status:active,status:pending");
        assert_eq!(
            compiled.condition.to_json(),
            json!({ "OR": [{ "status": "active" }, { "status": "pending" }] })
        );
        assert!(compiled.diagnostics.is_empty());
    }

    #[test]
    fn test_distinct_keys_are_anded() {
        let compiled = flat(Entity::User, "status:active,isVerified:yes");
        assert_eq!(
            compiled.condition.to_json(),
            json!({ "AND": [{ "status": "active" }, { "isVerified": true }] })
        );
    }

    #[test]
    fn test_relation_and_composite_paths() {
        let compiled = flat(Entity::User, "person.firstName:Ada,person.address.geo.lat:38.7");
        assert_eq!(
            compiled.condition.to_json(),
            json!({ "AND": [
                { "person": { "is": { "firstName": "Ada" } } },
                { "person": { "is": { "address": { "is": { "geo": { "is": { "lat": 38.7 } } } } } } }
            ]})
        );
    }

    #[test]
    fn test_list_fields_use_has() {
        let compiled = flat(Entity::User, "tags:vip");
        assert_eq!(compiled.condition.to_json(), json!({ "tags": { "has": "vip" } }));

        let compiled = flat(Entity::Permission, "rolePermissions.actions:read");
        assert_eq!(
            compiled.condition.to_json(),
            json!({ "rolePermissions": { "some": { "actions": { "has": "read" } } } })
        );
    }

    #[test]
    fn test_to_many_relation_uses_some() {
        let compiled = flat(Entity::Organization, "apps.name:Billing");
        assert_eq!(
            compiled.condition.to_json(),
            json!({ "apps": { "some": { "name": "Billing" } } })
        );
    }

    #[test]
    fn test_unresolvable_and_non_terminal_paths_are_dropped() {
        let compiled = flat(Entity::User, "nickname:x,person:y,status:active,password:secret");
        assert_eq!(compiled.condition.to_json(), json!({ "status": "active" }));
        assert_eq!(
            compiled.diagnostics,
            vec![
                FilterDiagnostic::UnresolvedPath { path: "nickname".into() },
                FilterDiagnostic::UnsupportedTerminal { path: "person".into() },
                FilterDiagnostic::UnsupportedTerminal { path: "password".into() },
            ]
        );
    }

    #[test]
    fn test_invalid_values_are_dropped() {
        let compiled = flat(Entity::User, "createdAt:soon");
        assert!(compiled.condition.is_empty());
        assert!(matches!(
            compiled.diagnostics.as_slice(),
            [FilterDiagnostic::InvalidValue { expected: "date", .. }]
        ));
    }

    #[test]
    fn test_malformed_segments_are_reported() {
        let compiled = flat(Entity::User, "status,status:active");
        assert_eq!(compiled.condition.to_json(), json!({ "status": "active" }));
        assert_eq!(
            compiled.diagnostics,
            vec![FilterDiagnostic::MalformedPair { segment: "status".into() }]
        );
    }

    #[test]
    fn test_value_keeps_colons() {
        let compiled = flat(Entity::User, "lastLoginAt:2024-01-01T10:00:00Z");
        assert_eq!(
            compiled.condition.to_json(),
            json!({ "lastLoginAt": "2024-01-01T10:00:00.000Z" })
        );
    }

    #[test]
    fn test_json_entries_match_flat_form() {
        let entries = vec![
            json!({ "status": "active" }),
            json!({ "key": "status", "value": "pending" }),
            json!({ "isVerified": true }),
        ]
        .into_iter()
        .map(|v| match v {
            Value::Object(map) => map,
            _ => unreachable!(),
        })
        .collect();

        let from_json = compile_filter(Entity::User, &FilterInput::Entries(entries));
        let from_flat = flat(Entity::User, "status:active,status:pending,isVerified:true");
        assert_eq!(from_json.condition, from_flat.condition);
    }

    #[test]
    fn test_json_array_value_expands_to_or() {
        let entry = match json!({ "status": ["active", "suspended"] }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let compiled = compile_filter(Entity::User, &FilterInput::Entries(vec![entry]));
        assert_eq!(
            compiled.condition.to_json(),
            json!({ "OR": [{ "status": "active" }, { "status": "suspended" }] })
        );
    }

    #[test]
    fn test_compiling_twice_is_identical() {
        let text = "status:active,person.lastName:Lovelace,status:pending,tags:a";
        assert_eq!(flat(Entity::User, text), flat(Entity::User, text));
    }
}
