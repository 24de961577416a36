//! Single-document reads and writes for every collection.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, instrument};

use keyhold_domain::query::strip_hidden;
use keyhold_domain::schema::validate_document;
use keyhold_domain::{Entity, ValidationErrors};
use keyhold_storage::document::id_of;
use keyhold_storage::{DataStore, Document};

use super::auth::{account_taken, accounts_holding, canonical_handle};
use crate::error::{ServiceError, ServiceResult};

/// Generates a new document id.
pub fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

/// Handler for get, create, update and soft delete by id.
pub struct EntityHandler<S: DataStore> {
    storage: Arc<S>,
}

impl<S: DataStore> EntityHandler<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// A live document, hidden fields removed.
    pub async fn get(&self, entity: Entity, id: &str) -> ServiceResult<Document> {
        self.storage
            .find_by_id(entity, id)
            .await?
            .map(|doc| strip_hidden(entity, &doc))
            .ok_or_else(|| ServiceError::NotFound {
                entity,
                id: id.to_string(),
            })
    }

    /// Creates a document from a request body.
    ///
    /// Users are created only through registration.
    #[instrument(skip(self, body), fields(entity = %entity))]
    pub async fn create(&self, entity: Entity, body: &Map<String, Value>) -> ServiceResult<Document> {
        if entity == Entity::User {
            return Err(ServiceError::validation(
                "entity",
                "users are created through registration",
            ));
        }
        let data = validate_document(entity, body)?;
        let id = new_id();
        let created = self.storage.insert(entity, id.clone(), data).await?;
        info!(entity = %entity, id = %id, "document created");
        Ok(strip_hidden(entity, &created))
    }

    /// Merges a partial body into a live document.
    #[instrument(skip(self, body), fields(entity = %entity))]
    pub async fn update(&self, entity: Entity, id: &str, body: &Map<String, Value>) -> ServiceResult<Document> {
        if entity == Entity::User && body.contains_key("password") {
            return Err(ServiceError::validation(
                "password",
                "passwords are changed through the password endpoint",
            ));
        }
        let mut patch = validate_document(entity, body)?;
        if entity == Entity::User {
            self.claim_handles(id, &mut patch).await?;
        }
        let updated = self.storage.update(entity, id.to_string(), patch).await?;
        Ok(strip_hidden(entity, &updated))
    }

    /// Normalises a user patch's `username` and `email` and rejects handles
    /// another account, soft-deleted or not, already holds.
    async fn claim_handles(&self, id: &str, patch: &mut Map<String, Value>) -> ServiceResult<()> {
        let mut errors = ValidationErrors::new();
        for key in ["username", "email"] {
            match patch.get_mut(key) {
                Some(Value::String(handle)) => {
                    *handle = canonical_handle(handle);
                    if handle.is_empty() {
                        errors.push(key, format!("{key} is required"));
                    }
                }
                Some(_) => errors.push(key, format!("{key} is required")),
                None => {}
            }
        }
        errors.into_result(())?;

        let username = patch.get("username").and_then(Value::as_str);
        let email = patch.get("email").and_then(Value::as_str);
        if username.is_none() && email.is_none() {
            return Ok(());
        }
        let holders = self
            .storage
            .find_many(Entity::User, &accounts_holding(username, email))
            .await?;
        if holders.iter().any(|user| id_of(user) != Some(id)) {
            info!(id = %id, "user update rejected: handle already taken");
            return Err(account_taken());
        }
        Ok(())
    }

    /// Stamps `deletedAt`; the document disappears from every read.
    #[instrument(skip(self), fields(entity = %entity))]
    pub async fn delete(&self, entity: Entity, id: &str) -> ServiceResult<Document> {
        let deleted = self.storage.soft_delete(entity, id.to_string()).await?;
        info!(entity = %entity, id = %id, "document soft-deleted");
        Ok(strip_hidden(entity, &deleted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{doc, CountingStore};
    use serde_json::json;

    fn handler() -> EntityHandler<CountingStore> {
        EntityHandler::new(Arc::new(CountingStore::default()))
    }

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let handler = handler();
        let created = handler
            .create(Entity::Role, &doc(json!({ "name": "auditor", "isSystem": false })))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(id.len(), 26);
        assert_eq!(created["deletedAt"], Value::Null);

        let updated = handler
            .update(Entity::Role, &id, &doc(json!({ "description": "read-only" })))
            .await
            .unwrap();
        assert_eq!(updated["name"], json!("auditor"));
        assert_eq!(updated["description"], json!("read-only"));

        handler.delete(Entity::Role, &id).await.unwrap();
        let err = handler.get(Entity::Role, &id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));

        let err = handler.delete(Entity::Role, &id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_unique_key_conflicts() {
        let handler = handler();
        let body = doc(json!({ "name": "admin" }));
        handler.create(Entity::Role, &body).await.unwrap();

        let err = handler.create(Entity::Role, &body).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_invalid_body_is_rejected_before_storage() {
        let store = Arc::new(CountingStore::default());
        let handler = EntityHandler::new(Arc::clone(&store));

        let err = handler
            .create(Entity::App, &doc(json!({ "name": "crm", "isActive": "sometimes" })))
            .await
            .unwrap_err();

        let ServiceError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("isActive"));
        assert_eq!(store.transaction_calls(), 0);
    }

    #[tokio::test]
    async fn test_users_are_not_created_directly() {
        let err = handler()
            .create(Entity::User, &doc(json!({ "username": "ada" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn test_user_handles_are_normalised_and_unique() {
        let store = Arc::new(CountingStore::default());
        for (id, username, email) in [("u1", "ada", "ada@example.com"), ("u2", "grace", "grace@example.com")] {
            store
                .insert(Entity::User, id.into(), doc(json!({ "username": username, "email": email })))
                .await
                .unwrap();
        }
        let handler = EntityHandler::new(Arc::clone(&store));

        let err = handler
            .update(Entity::User, "u2", &doc(json!({ "email": "ADA@example.com" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { .. }));

        let err = handler
            .update(Entity::User, "u2", &doc(json!({ "username": "  " })))
            .await
            .unwrap_err();
        let ServiceError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("username"));

        let updated = handler
            .update(Entity::User, "u1", &doc(json!({ "username": "Ada", "email": "Ada@Example.com" })))
            .await
            .unwrap();
        assert_eq!(updated["username"], json!("ada"));
        assert_eq!(updated["email"], json!("ada@example.com"));
    }

    #[tokio::test]
    async fn test_user_password_cannot_be_patched() {
        let err = handler()
            .update(Entity::User, "u1", &doc(json!({ "password": "plaintext" })))
            .await
            .unwrap_err();
        let ServiceError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("password"));
    }
}
