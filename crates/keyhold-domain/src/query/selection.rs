//! Field-Selection Builder and post-fetch projection.
//!
//! `fields=username,person.firstName,person.address.city` becomes a
//! [`SelectionTree`]. Relations nest (`{select: {...}}`); scalars and enums
//! are leaves. A composite cannot be partially selected by storage, so it is
//! a leaf in the storage-level tree and carries the requested sub-paths as a
//! [`Prune`] that [`SelectionTree::project`] applies to the fetched value.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::schema::{is_identifier, resolve_path, Entity, FieldDescriptor, FieldKind};

/// Which parts of a fetched composite value to keep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prune {
    /// Keep the whole value.
    Whole,
    /// Keep only these keys, each pruned further.
    Keys(BTreeMap<String, Prune>),
}

impl Prune {
    fn merge_path(&mut self, path: &[&str]) {
        let Some((head, rest)) = path.split_first() else {
            *self = Prune::Whole;
            return;
        };
        if let Prune::Keys(keys) = self {
            let child = keys
                .entry((*head).to_string())
                .or_insert_with(|| Prune::Keys(BTreeMap::new()));
            child.merge_path(rest);
        }
    }

    /// Applies the prune to a composite value or a list of them.
    pub fn apply(&self, value: &Value) -> Value {
        match (self, value) {
            (Prune::Whole, v) => v.clone(),
            (Prune::Keys(keys), Value::Object(map)) => {
                let mut out = Map::new();
                for (key, prune) in keys {
                    if let Some(v) = map.get(key) {
                        out.insert(key.clone(), prune.apply(v));
                    }
                }
                Value::Object(out)
            }
            (prune @ Prune::Keys(_), Value::Array(items)) => {
                Value::Array(items.iter().map(|item| prune.apply(item)).collect())
            }
            (Prune::Keys(_), other) => other.clone(),
        }
    }
}

/// One node of a selection tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionNode {
    /// A scalar or enum field.
    Field,
    /// An embedded value, fetched whole and pruned afterwards.
    Composite(Prune),
    /// A related entity; `None` includes it whole.
    Relation {
        target: Entity,
        select: Option<SelectionTree>,
    },
}

/// Nested field selection rooted at one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionTree {
    nodes: BTreeMap<String, SelectionNode>,
}

impl SelectionTree {
    /// Builds the tree for a comma-separated field list. The root always
    /// selects `id`. Entries that are not identifiers, do not resolve or name
    /// a hidden field are skipped.
    pub fn build(entity: Entity, fields: &str) -> Self {
        let mut tree = SelectionTree::default();
        tree.nodes.insert("id".to_string(), SelectionNode::Field);

        for entry in fields.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let segments: Vec<&str> = entry.split('.').collect();
            if !segments.iter().all(|s| is_identifier(s)) {
                debug!(entity = %entity, field = entry, "skipping invalid field name");
                continue;
            }
            let Some(chain) = resolve_path(entity, entry) else {
                debug!(entity = %entity, field = entry, "skipping unknown field");
                continue;
            };
            if chain.iter().any(|f| f.hidden) {
                debug!(entity = %entity, field = entry, "skipping hidden field");
                continue;
            }
            tree.insert(&chain, &segments);
        }
        tree
    }

    fn insert(&mut self, chain: &[&'static FieldDescriptor], segments: &[&str]) {
        let Some((field, rest)) = chain.split_first() else {
            return;
        };
        let name = field.name.to_string();

        match field.kind {
            FieldKind::Scalar(_) | FieldKind::Enum(_) => {
                self.nodes.insert(name, SelectionNode::Field);
            }
            FieldKind::Composite(_) => {
                let sub_path = &segments[segments.len() - rest.len()..];
                let node = self
                    .nodes
                    .entry(name)
                    .or_insert_with(|| SelectionNode::Composite(Prune::Keys(BTreeMap::new())));
                if let SelectionNode::Composite(prune) = node {
                    prune.merge_path(sub_path);
                }
            }
            FieldKind::Relation(relation) => {
                let node = self.nodes.entry(name).or_insert_with(|| SelectionNode::Relation {
                    target: relation.target,
                    select: Some(SelectionTree::default()),
                });
                if let SelectionNode::Relation { select, .. } = node {
                    if rest.is_empty() {
                        *select = None;
                    } else if let Some(sub) = select {
                        sub.insert(rest, &segments[segments.len() - rest.len()..]);
                    }
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&SelectionNode> {
        self.nodes.get(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, &SelectionNode)> {
        self.nodes.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Relation nodes, which the caller must load before projecting.
    pub fn relations(&self) -> impl Iterator<Item = (&str, Entity, Option<&SelectionTree>)> {
        self.nodes.iter().filter_map(|(name, node)| match node {
            SelectionNode::Relation { target, select } => Some((name.as_str(), *target, select.as_ref())),
            _ => None,
        })
    }

    /// Storage-level descriptor: leaves are `true`, relations nest under
    /// `select`, composites are fetched whole.
    pub fn to_json(&self) -> Value {
        let map = self
            .nodes
            .iter()
            .map(|(name, node)| {
                let value = match node {
                    SelectionNode::Field
                    | SelectionNode::Composite(_)
                    | SelectionNode::Relation { select: None, .. } => Value::Bool(true),
                    SelectionNode::Relation {
                        select: Some(sub), ..
                    } => serde_json::json!({ "select": sub.to_json() }),
                };
                (name.clone(), value)
            })
            .collect();
        Value::Object(map)
    }

    /// Projects a fetched record (with relations already nested) down to the
    /// selection, pruning composites.
    pub fn project(&self, record: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();
        for (name, node) in &self.nodes {
            let Some(value) = record.get(name) else {
                continue;
            };
            let projected = match node {
                SelectionNode::Field => value.clone(),
                SelectionNode::Composite(prune) => prune.apply(value),
                SelectionNode::Relation { target, select } => project_related(*target, select.as_ref(), value),
            };
            out.insert(name.clone(), projected);
        }
        out
    }
}

fn project_related(target: Entity, select: Option<&SelectionTree>, value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(match select {
            Some(tree) => tree.project(map),
            None => strip_hidden(target, map),
        }),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| project_related(target, select, item))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Copies a record without the fields its entity marks hidden.
pub fn strip_hidden(entity: Entity, record: &Map<String, Value>) -> Map<String, Value> {
    record
        .iter()
        .filter(|(key, _)| !entity.field(key).is_some_and(|f| f.hidden))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_nested_relation_selection() {
        let tree = SelectionTree::build(Entity::User, "username,person.firstName,person.lastName");
        assert_eq!(
            tree.to_json(),
            json!({
                "id": true,
                "username": true,
                "person": { "select": { "firstName": true, "lastName": true } }
            })
        );
    }

    #[test]
    fn test_invalid_unknown_and_hidden_fields_are_skipped() {
        let tree = SelectionTree::build(Entity::User, "username,pass-word,nickname,password, ,1abc");
        assert_eq!(tree.to_json(), json!({ "id": true, "username": true }));
    }

    #[test]
    fn test_composite_is_a_storage_leaf() {
        let tree = SelectionTree::build(Entity::Person, "address.city,address.geo.lat");
        assert_eq!(tree.to_json(), json!({ "id": true, "address": true }));
    }

    #[test]
    fn test_composite_pruning_keeps_requested_sub_paths() {
        let tree = SelectionTree::build(Entity::Person, "firstName,address.city,address.geo.lat");
        let record = object(json!({
            "id": "p1",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "address": {
                "street": "1 Main St",
                "city": "London",
                "geo": { "lat": 51.5, "lng": -0.12 }
            }
        }));

        assert_eq!(
            Value::Object(tree.project(&record)),
            json!({
                "id": "p1",
                "firstName": "Ada",
                "address": { "city": "London", "geo": { "lat": 51.5 } }
            })
        );
    }

    #[test]
    fn test_whole_composite_request_wins() {
        let tree = SelectionTree::build(Entity::Person, "address.city,address");
        let record = object(json!({ "id": "p1", "address": { "city": "Paris", "street": "Rue" } }));
        assert_eq!(
            Value::Object(tree.project(&record)),
            json!({ "id": "p1", "address": { "city": "Paris", "street": "Rue" } })
        );
    }

    #[test]
    fn test_composite_list_pruning() {
        let tree = SelectionTree::build(Entity::Permission, "rolePermissions.resource");
        let record = object(json!({
            "id": "perm1",
            "roleId": "r1",
            "rolePermissions": [
                { "resource": "user", "actions": ["read"] },
                { "resource": "app", "actions": ["create", "delete"] }
            ]
        }));
        assert_eq!(
            Value::Object(tree.project(&record)),
            json!({
                "id": "perm1",
                "rolePermissions": [{ "resource": "user" }, { "resource": "app" }]
            })
        );
    }

    #[test]
    fn test_relation_through_composite_projection() {
        let tree = SelectionTree::build(Entity::User, "person.address.country");
        let record = object(json!({
            "id": "u1",
            "username": "ada",
            "person": { "id": "p1", "firstName": "Ada", "address": { "country": "UK", "city": "London" } }
        }));
        assert_eq!(
            Value::Object(tree.project(&record)),
            json!({ "id": "u1", "person": { "address": { "country": "UK" } } })
        );
    }

    #[test]
    fn test_whole_relation_strips_hidden_fields() {
        let tree = SelectionTree::build(Entity::UserRole, "user");
        let record = object(json!({
            "id": "ur1",
            "user": { "id": "u1", "username": "ada", "password": "$argon2id$..." }
        }));
        assert_eq!(
            Value::Object(tree.project(&record)),
            json!({ "id": "ur1", "user": { "id": "u1", "username": "ada" } })
        );
        assert_eq!(tree.relations().count(), 1);
    }

    #[test]
    fn test_to_many_relation_projects_each_item() {
        let tree = SelectionTree::build(Entity::Organization, "name,apps.name");
        let record = object(json!({
            "id": "o1",
            "name": "Acme",
            "apps": [{ "id": "a1", "name": "Billing", "url": "x" }, { "id": "a2", "name": "CRM" }]
        }));
        assert_eq!(
            Value::Object(tree.project(&record)),
            json!({ "id": "o1", "name": "Acme", "apps": [{ "name": "Billing" }, { "name": "CRM" }] })
        );
    }

    #[test]
    fn test_missing_to_one_relation_stays_null() {
        let tree = SelectionTree::build(Entity::User, "organization.name");
        let record = object(json!({ "id": "u1", "organization": null }));
        assert_eq!(
            Value::Object(tree.project(&record)),
            json!({ "id": "u1", "organization": null })
        );
    }

    #[test]
    fn test_round_trip_law() {
        // "a,b.c,b.d" with a = username, b = person
        let tree = SelectionTree::build(Entity::User, "username,person.firstName,person.phone");
        assert_eq!(
            tree.to_json(),
            json!({ "id": true, "username": true, "person": { "select": { "firstName": true, "phone": true } } })
        );
    }
}
