//! In-memory storage implementation.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use keyhold_domain::query::{Condition, Operator, SortKey, SortOrder};
use keyhold_domain::schema::Link;
use keyhold_domain::Entity;

use crate::document::{apply_patch, id_of, is_live, mark_deleted, stamp_new, unique_values};
use crate::error::{HealthStatus, StorageError, StorageResult};
use crate::traits::{DataStore, Document, FindQuery, WriteOp};

type Collections = HashMap<Entity, BTreeMap<String, Document>>;

/// In-memory implementation of DataStore.
///
/// # Performance Characteristics
///
/// - **Reads**: O(N) scan of the entity's documents, plus a scan of the
///   related collection for each relation condition evaluated
/// - **Writes**: O(total documents); a transaction stages a copy of every
///   collection and swaps it in only when all steps succeed
///
/// A single `RwLock` guards all collections, so readers never observe a
/// half-applied transaction.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    collections: RwLock<Collections>,
}

impl MemoryDataStore {
    /// Creates a new in-memory data store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new in-memory data store wrapped in Arc.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn select(collections: &Collections, entity: Entity, query: &FindQuery) -> Vec<Document> {
        let Some(docs) = collections.get(&entity) else {
            return Vec::new();
        };
        let eval = Evaluator { collections };
        docs.values()
            .filter(|doc| query.include_deleted || is_live(doc))
            .filter(|doc| eval.matches(entity, doc, &query.condition))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    #[instrument(skip(self, query), fields(entity = %entity))]
    async fn find_many(&self, entity: Entity, query: &FindQuery) -> StorageResult<Vec<Document>> {
        let collections = self.collections.read().await;
        let mut docs = Self::select(&collections, entity, query);
        sort_documents(&mut docs, &query.order_by);

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let take = query
            .take
            .map_or(usize::MAX, |t| usize::try_from(t).unwrap_or(usize::MAX));
        Ok(docs.into_iter().skip(skip).take(take).collect())
    }

    #[instrument(skip(self, query), fields(entity = %entity))]
    async fn count(&self, entity: Entity, query: &FindQuery) -> StorageResult<u64> {
        let collections = self.collections.read().await;
        Ok(Self::select(&collections, entity, query).len() as u64)
    }

    async fn find_by_id(&self, entity: Entity, id: &str) -> StorageResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&entity)
            .and_then(|docs| docs.get(id))
            .filter(|doc| is_live(doc))
            .cloned())
    }

    #[instrument(skip(self, ops), fields(steps = ops.len()))]
    async fn transaction(&self, ops: Vec<WriteOp>) -> StorageResult<Vec<Document>> {
        let mut guard = self.collections.write().await;
        let mut staged = guard.clone();
        let now = chrono::Utc::now();
        let mut written = Vec::with_capacity(ops.len());

        for op in ops {
            let (entity, doc) = match op {
                WriteOp::Insert { entity, id, data } => {
                    if staged.get(&entity).is_some_and(|docs| docs.contains_key(&id)) {
                        return Err(StorageError::DuplicateId { entity, id });
                    }
                    (entity, stamp_new(&id, data, now))
                }
                WriteOp::Update { entity, id, patch } => {
                    let current = live_document(&staged, entity, &id)?;
                    (entity, apply_patch(current, patch, now))
                }
                WriteOp::SoftDelete { entity, id } => {
                    let current = live_document(&staged, entity, &id)?;
                    (entity, mark_deleted(current, now))
                }
            };

            if is_live(&doc) {
                check_unique(&staged, entity, &doc)?;
            }
            let id = id_of(&doc).unwrap_or_default().to_string();
            staged.entry(entity).or_default().insert(id, doc.clone());
            written.push(doc);
        }

        *guard = staged;
        debug!(written = written.len(), "transaction committed");
        Ok(written)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        // In-memory storage is always healthy - no external dependencies
        Ok(HealthStatus {
            healthy: true,
            latency: std::time::Duration::ZERO,
            pool_stats: None,
            message: Some("in-memory storage".to_string()),
        })
    }
}

fn live_document<'a>(collections: &'a Collections, entity: Entity, id: &str) -> StorageResult<&'a Document> {
    collections
        .get(&entity)
        .and_then(|docs| docs.get(id))
        .filter(|doc| is_live(doc))
        .ok_or_else(|| StorageError::NotFound {
            entity,
            id: id.to_string(),
        })
}

fn check_unique(collections: &Collections, entity: Entity, doc: &Document) -> StorageResult<()> {
    let Some(docs) = collections.get(&entity) else {
        return Ok(());
    };
    let own_id = id_of(doc);

    for (fields, values) in unique_values(entity, doc) {
        let clash = docs.values().filter(|other| is_live(other) && id_of(other) != own_id).any(|other| {
            fields
                .iter()
                .zip(&values)
                .all(|(f, v)| other.get(*f).is_some_and(|o| json_eq(o, v)))
        });
        if clash {
            return Err(StorageError::UniqueViolation {
                entity,
                fields: fields.join(", "),
            });
        }
    }
    Ok(())
}

/// Evaluates conditions against documents, following relations into the
/// other collections.
struct Evaluator<'a> {
    collections: &'a Collections,
}

impl Evaluator<'_> {
    fn matches(&self, entity: Entity, doc: &Document, condition: &Condition) -> bool {
        match condition {
            Condition::All(children) => children.iter().all(|c| self.matches(entity, doc, c)),
            Condition::Any(children) => children.iter().any(|c| self.matches(entity, doc, c)),
            Condition::Field { field, op, value } => {
                field_matches(doc.get(*field).unwrap_or(&Value::Null), *op, value)
            }
            Condition::Relation {
                relation, condition, ..
            } => self
                .related(doc, relation.target, relation.link)
                .any(|related| self.matches(relation.target, related, condition)),
            Condition::Composite {
                field,
                to_many,
                condition,
            } => match (doc.get(*field), to_many) {
                (Some(Value::Array(items)), true) => items.iter().any(|item| {
                    item.as_object()
                        .is_some_and(|obj| self.matches(entity, obj, condition))
                }),
                (Some(Value::Object(obj)), false) => self.matches(entity, obj, condition),
                _ => false,
            },
        }
    }

    /// Live documents of `target` joined to `doc` through `link`.
    fn related<'s>(&'s self, doc: &'s Document, target: Entity, link: Link) -> Box<dyn Iterator<Item = &'s Document> + 's> {
        let Some(docs) = self.collections.get(&target) else {
            return Box::new(std::iter::empty());
        };
        let live = docs.values().filter(|d| is_live(d));

        match link {
            Link::LocalId(field) => {
                let id = doc.get(field).and_then(Value::as_str);
                Box::new(id.and_then(|id| docs.get(id)).filter(|d| is_live(d)).into_iter())
            }
            Link::LocalIds(field) => {
                let ids: Vec<&str> = doc
                    .get(field)
                    .and_then(Value::as_array)
                    .map(|ids| ids.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                Box::new(live.filter(move |d| id_of(d).is_some_and(|id| ids.contains(&id))))
            }
            Link::Foreign(field) => {
                let own = id_of(doc);
                Box::new(live.filter(move |d| own.is_some() && d.get(field).and_then(Value::as_str) == own))
            }
            Link::ForeignIds(field) => {
                let own = id_of(doc).map(|id| Value::String(id.to_string()));
                Box::new(live.filter(move |d| {
                    match (&own, d.get(field).and_then(Value::as_array)) {
                        (Some(own), Some(ids)) => ids.contains(own),
                        _ => false,
                    }
                }))
            }
        }
    }
}

fn field_matches(actual: &Value, op: Operator, expected: &Value) -> bool {
    match op {
        Operator::Equals => json_eq(actual, expected),
        Operator::Has => actual
            .as_array()
            .is_some_and(|items| items.iter().any(|item| json_eq(item, expected))),
        Operator::Contains => match (actual.as_str(), expected.as_str()) {
            (Some(haystack), Some(needle)) => haystack.to_lowercase().contains(&needle.to_lowercase()),
            _ => false,
        },
        Operator::In => expected
            .as_array()
            .is_some_and(|options| options.iter().any(|option| json_eq(actual, option))),
    }
}

/// JSON equality where numbers compare by value (`1 == 1.0`).
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        keys.iter()
            .map(|key| {
                let ord = compare_values(
                    a.get(key.field).unwrap_or(&Value::Null),
                    b.get(key.field).unwrap_or(&Value::Null),
                );
                match key.order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

/// Null sorts first; values of different kinds order by kind.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::String(_) => 1,
            Value::Number(_) => 2,
            Value::Bool(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
