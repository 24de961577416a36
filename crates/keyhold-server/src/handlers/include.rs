//! Relation inclusion for list results.
//!
//! Each relation node of a [`SelectionTree`] is loaded with one storage
//! read per level: the link keys of every parent are collected, the related
//! documents are fetched in a single `find_many`, then nested back under the
//! relation name (object or `null` for to-one, array for to-many).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tracing::debug;

use keyhold_domain::query::{Condition, SelectionTree};
use keyhold_domain::schema::{FieldKind, Link};
use keyhold_domain::Entity;
use keyhold_storage::{DataStore, Document, FindQuery};

use crate::error::ServiceResult;

/// Loads and nests every relation `tree` selects, recursively.
pub(crate) fn include_relations<'a, S: DataStore>(
    storage: &'a Arc<S>,
    entity: Entity,
    tree: &'a SelectionTree,
    docs: &'a mut [Document],
) -> BoxFuture<'a, ServiceResult<()>> {
    async move {
        if docs.is_empty() {
            return Ok(());
        }
        for (name, target, select) in tree.relations() {
            let Some(field) = entity.field(name) else {
                continue;
            };
            let FieldKind::Relation(relation) = field.kind else {
                continue;
            };

            let parent_keys = link_keys(relation.link, docs);
            if parent_keys.is_empty() {
                attach(docs, name, field.is_list, relation.link, &[]);
                continue;
            }

            let condition = match relation.link {
                Link::LocalId(_) | Link::LocalIds(_) => Condition::one_of("id", parent_keys),
                Link::Foreign(child_field) => Condition::one_of(child_field, parent_keys),
                Link::ForeignIds(child_field) => Condition::Any(
                    parent_keys
                        .into_iter()
                        .map(|id| Condition::has(child_field, id))
                        .collect(),
                ),
            };
            let mut related = storage.find_many(target, &FindQuery::new(condition)).await?;
            debug!(
                entity = %entity,
                relation = name,
                loaded = related.len(),
                "included relation"
            );

            if let Some(sub) = select {
                include_relations(storage, target, sub, &mut related).await?;
            }
            attach(docs, name, field.is_list, relation.link, &related);
        }
        Ok(())
    }
    .boxed()
}

/// Keys the related documents are looked up by, deduplicated in first-seen
/// order.
fn link_keys(link: Link, docs: &[Document]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    let mut push = |key: &str| {
        if seen.insert(key.to_string()) {
            keys.push(key.to_string());
        }
    };

    for doc in docs {
        match link {
            Link::LocalId(field) => {
                if let Some(id) = doc.get(field).and_then(Value::as_str) {
                    push(id);
                }
            }
            Link::LocalIds(field) => {
                for id in string_items(doc.get(field)) {
                    push(id);
                }
            }
            Link::Foreign(_) | Link::ForeignIds(_) => {
                if let Some(id) = doc.get("id").and_then(Value::as_str) {
                    push(id);
                }
            }
        }
    }
    keys
}

fn string_items(value: Option<&Value>) -> impl Iterator<Item = &str> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

/// Nests `related` under `name` on every parent.
fn attach(docs: &mut [Document], name: &str, to_many: bool, link: Link, related: &[Document]) {
    let by_id: HashMap<&str, &Document> = related
        .iter()
        .filter_map(|d| d.get("id").and_then(Value::as_str).map(|id| (id, d)))
        .collect();

    for doc in docs.iter_mut() {
        let matches: Vec<Value> = match link {
            Link::LocalId(field) => doc
                .get(field)
                .and_then(Value::as_str)
                .and_then(|id| by_id.get(id))
                .map(|d| Value::Object((*d).clone()))
                .into_iter()
                .collect(),
            Link::LocalIds(field) => string_items(doc.get(field))
                .filter_map(|id| by_id.get(id))
                .map(|d| Value::Object((*d).clone()))
                .collect(),
            Link::Foreign(child_field) => {
                let parent_id = doc.get("id").and_then(Value::as_str);
                related
                    .iter()
                    .filter(|d| parent_id.is_some() && d.get(child_field).and_then(Value::as_str) == parent_id)
                    .map(|d| Value::Object(d.clone()))
                    .collect()
            }
            Link::ForeignIds(child_field) => {
                let parent_id = doc.get("id").and_then(Value::as_str);
                related
                    .iter()
                    .filter(|d| {
                        parent_id.is_some_and(|pid| string_items(d.get(child_field)).any(|id| id == pid))
                    })
                    .map(|d| Value::Object(d.clone()))
                    .collect()
            }
        };

        let value = if to_many {
            Value::Array(matches)
        } else {
            matches.into_iter().next().unwrap_or(Value::Null)
        };
        doc.insert(name.to_string(), value);
    }
}
