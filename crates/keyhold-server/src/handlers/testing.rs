//! Test doubles shared by the handler tests.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use keyhold_domain::Entity;
use keyhold_storage::{
    DataStore, Document, FindQuery, HealthStatus, MemoryDataStore, StorageResult, WriteOp,
};

pub(crate) fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

/// In-memory store that counts reads and writes.
#[derive(Default)]
pub(crate) struct CountingStore {
    inner: MemoryDataStore,
    find_many: AtomicUsize,
    count: AtomicUsize,
    transactions: AtomicUsize,
}

impl CountingStore {
    pub fn find_many_calls(&self) -> usize {
        self.find_many.load(Ordering::SeqCst)
    }

    pub fn count_calls(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn transaction_calls(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataStore for CountingStore {
    async fn find_many(&self, entity: Entity, query: &FindQuery) -> StorageResult<Vec<Document>> {
        self.find_many.fetch_add(1, Ordering::SeqCst);
        self.inner.find_many(entity, query).await
    }

    async fn count(&self, entity: Entity, query: &FindQuery) -> StorageResult<u64> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.inner.count(entity, query).await
    }

    async fn find_by_id(&self, entity: Entity, id: &str) -> StorageResult<Option<Document>> {
        self.inner.find_by_id(entity, id).await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> StorageResult<Vec<Document>> {
        self.transactions.fetch_add(1, Ordering::SeqCst);
        self.inner.transaction(ops).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }
}
