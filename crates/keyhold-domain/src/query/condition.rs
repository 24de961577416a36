//! Storage-neutral boolean conditions.
//!
//! A [`Condition`] is the output of the filter compiler and the search
//! builder, and the input of every storage backend. Leaves compare one field
//! of the current scope; wrappers move the scope into a related entity
//! ([`Condition::Relation`]) or into an embedded value
//! ([`Condition::Composite`]).
//!
//! # Rendering
//!
//! [`Condition::to_json`] renders the tree in the nested `AND`/`OR`/`some`/`is`
//! form used in logs and tests:
//!
//! ```text
//! {"OR": [{"status": "active"}, {"status": "pending"}]}
//! {"person": {"is": {"firstName": "Ada"}}}
//! {"tags": {"has": "admin"}}
//! ```

use serde_json::{json, Map, Value};

use crate::schema::{FieldDescriptor, FieldKind, Relation};

/// Leaf comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Field equals the value.
    Equals,
    /// List field contains the value as an element.
    Has,
    /// Case-insensitive substring match on a string field.
    Contains,
    /// Field value is one of the values in the given array.
    In,
}

/// A boolean condition over documents of one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Every child matches. An empty list matches everything.
    All(Vec<Condition>),
    /// At least one child matches. An empty list matches nothing.
    Any(Vec<Condition>),
    /// Compare a field of the current scope.
    Field {
        field: &'static str,
        op: Operator,
        value: Value,
    },
    /// Some related document (to-many) or the single related document
    /// (to-one) matches.
    Relation {
        field: &'static str,
        relation: Relation,
        to_many: bool,
        condition: Box<Condition>,
    },
    /// The embedded value (or, for lists, some element) matches.
    Composite {
        field: &'static str,
        to_many: bool,
        condition: Box<Condition>,
    },
}

impl Default for Condition {
    fn default() -> Self {
        Condition::all()
    }
}

impl Condition {
    /// The empty condition; matches every document.
    pub fn all() -> Self {
        Condition::All(Vec::new())
    }

    pub fn equals(field: &'static str, value: impl Into<Value>) -> Self {
        Condition::Field {
            field,
            op: Operator::Equals,
            value: value.into(),
        }
    }

    pub fn has(field: &'static str, value: impl Into<Value>) -> Self {
        Condition::Field {
            field,
            op: Operator::Has,
            value: value.into(),
        }
    }

    pub fn contains(field: &'static str, needle: impl Into<String>) -> Self {
        Condition::Field {
            field,
            op: Operator::Contains,
            value: Value::String(needle.into()),
        }
    }

    pub fn one_of<I, V>(field: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Condition::Field {
            field,
            op: Operator::In,
            value: Value::Array(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Wraps a leaf condition so it applies at the end of a resolved path.
    ///
    /// `chain` is the descriptor chain returned by
    /// [`resolve_path`](crate::schema::resolve_path); every descriptor except
    /// the last must be a relation or a composite.
    pub fn along(chain: &[&'static FieldDescriptor], leaf: Condition) -> Self {
        let Some((_, parents)) = chain.split_last() else {
            return leaf;
        };

        parents.iter().rev().fold(leaf, |inner, field| match field.kind {
            FieldKind::Relation(relation) => Condition::Relation {
                field: field.name,
                relation,
                to_many: field.is_list,
                condition: Box::new(inner),
            },
            FieldKind::Composite(_) => Condition::Composite {
                field: field.name,
                to_many: field.is_list,
                condition: Box::new(inner),
            },
            // resolve_path never yields a scalar in a parent position
            FieldKind::Scalar(_) | FieldKind::Enum(_) => inner,
        })
    }

    /// True for the empty `All`, which constrains nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Condition::All(children) if children.is_empty())
    }

    /// Conjunction that flattens nested `All` nodes and drops empty ones.
    pub fn and(self, other: Condition) -> Condition {
        let mut children = Vec::new();
        for c in [self, other] {
            match c {
                Condition::All(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        match children.len() {
            1 => children.pop().unwrap_or_default(),
            _ => Condition::All(children),
        }
    }

    /// Renders the condition as a nested JSON query descriptor.
    pub fn to_json(&self) -> Value {
        match self {
            Condition::All(children) => match children.as_slice() {
                [] => Value::Object(Map::new()),
                [only] => only.to_json(),
                _ => json!({ "AND": children.iter().map(Condition::to_json).collect::<Vec<_>>() }),
            },
            Condition::Any(children) => {
                json!({ "OR": children.iter().map(Condition::to_json).collect::<Vec<_>>() })
            }
            Condition::Field { field, op, value } => {
                let rendered = match op {
                    Operator::Equals => value.clone(),
                    Operator::Has => json!({ "has": value }),
                    Operator::Contains => json!({ "contains": value, "mode": "insensitive" }),
                    Operator::In => json!({ "in": value }),
                };
                single(field, rendered)
            }
            Condition::Relation {
                field,
                to_many,
                condition,
                ..
            }
            | Condition::Composite {
                field,
                to_many,
                condition,
            } => {
                let quantifier = if *to_many { "some" } else { "is" };
                single(field, single(quantifier, condition.to_json()))
            }
        }
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::with_capacity(1);
    map.insert(key.to_string(), value);
    Value::Object(map)
}
