//! DataStore trait definition.

use async_trait::async_trait;
use serde_json::{Map, Value};

use keyhold_domain::query::{Condition, SortKey};
use keyhold_domain::Entity;

use crate::error::{HealthStatus, StorageError, StorageResult};

/// A stored document. Always carries `id`, `createdAt`, `updatedAt` and
/// `deletedAt`.
pub type Document = Map<String, Value>;

/// A read over one entity's documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub condition: Condition,
    pub order_by: Vec<SortKey>,
    pub skip: u64,
    /// `None` returns every match.
    pub take: Option<u64>,
    /// Also match soft-deleted documents.
    pub include_deleted: bool,
}

impl FindQuery {
    pub fn new(condition: Condition) -> Self {
        Self {
            condition,
            ..Default::default()
        }
    }

    pub fn order_by(mut self, keys: Vec<SortKey>) -> Self {
        self.order_by = keys;
        self
    }

    pub fn page(mut self, skip: u64, take: u64) -> Self {
        self.skip = skip;
        self.take = Some(take);
        self
    }

    pub fn including_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }
}

/// One step of an atomic write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create a document; timestamps are stamped by the store.
    Insert {
        entity: Entity,
        id: String,
        data: Document,
    },
    /// Merge `patch` into a live document.
    Update {
        entity: Entity,
        id: String,
        patch: Document,
    },
    /// Stamp `deletedAt` on a live document.
    SoftDelete { entity: Entity, id: String },
}

/// Abstract storage interface for entity documents.
///
/// Implementations must be thread-safe (Send + Sync) and support
/// async operations. Every read excludes soft-deleted documents unless the
/// query asks otherwise, and every write enforces the entity's unique keys
/// among live documents.
#[async_trait]
pub trait DataStore: Send + Sync + 'static {
    /// Documents matching the query, ordered and paged.
    async fn find_many(&self, entity: Entity, query: &FindQuery) -> StorageResult<Vec<Document>>;

    /// Number of documents matching the query, ignoring paging.
    async fn count(&self, entity: Entity, query: &FindQuery) -> StorageResult<u64>;

    /// A live document by id.
    async fn find_by_id(&self, entity: Entity, id: &str) -> StorageResult<Option<Document>>;

    /// Applies every write or none of them, returning the written documents
    /// in order.
    async fn transaction(&self, ops: Vec<WriteOp>) -> StorageResult<Vec<Document>>;

    /// Checks that the backend is reachable.
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// First document matching the query.
    async fn find_first(&self, entity: Entity, query: &FindQuery) -> StorageResult<Option<Document>> {
        let mut query = query.clone();
        query.take = Some(1);
        Ok(self.find_many(entity, &query).await?.into_iter().next())
    }

    async fn insert(&self, entity: Entity, id: String, data: Document) -> StorageResult<Document> {
        single(self.transaction(vec![WriteOp::Insert { entity, id, data }]).await?)
    }

    async fn update(&self, entity: Entity, id: String, patch: Document) -> StorageResult<Document> {
        single(self.transaction(vec![WriteOp::Update { entity, id, patch }]).await?)
    }

    async fn soft_delete(&self, entity: Entity, id: String) -> StorageResult<Document> {
        single(self.transaction(vec![WriteOp::SoftDelete { entity, id }]).await?)
    }
}

fn single(mut written: Vec<Document>) -> StorageResult<Document> {
    written.pop().ok_or_else(|| StorageError::InternalError {
        message: "write returned no document".to_string(),
    })
}
