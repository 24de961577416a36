//! Permission create and checks.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use keyhold_domain::auth::SessionClaims;
use keyhold_domain::permission::{is_allowed, parse_role_permissions, Action, Resource, RolePermission};
use keyhold_domain::query::{strip_hidden, Condition};
use keyhold_domain::schema::validate_document;
use keyhold_domain::{Entity, ValidationErrors};
use keyhold_storage::{DataStore, Document, FindQuery, StorageError};

use super::entity::new_id;
use crate::error::{ServiceError, ServiceResult};

/// Result of an idempotent create.
#[derive(Debug, Clone, PartialEq)]
pub enum Created {
    New(Document),
    /// The (accessPolicyId, roleId) pair was already granted.
    Existing(Document),
}

impl Created {
    pub fn is_new(&self) -> bool {
        matches!(self, Created::New(_))
    }

    pub fn into_document(self) -> Document {
        match self {
            Created::New(doc) | Created::Existing(doc) => doc,
        }
    }
}

/// Handler for Permission rows and role checks.
pub struct PermissionHandler<S: DataStore> {
    storage: Arc<S>,
}

impl<S: DataStore> PermissionHandler<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// Creates a Permission, or returns the live row that already holds the
    /// same (accessPolicyId, roleId) pair.
    #[instrument(skip(self, body))]
    pub async fn create(&self, body: &Map<String, Value>) -> ServiceResult<Created> {
        let data = validate_document(Entity::Permission, body)?;
        let (policy_id, role_id) = pair(&data)?;

        if let Some(existing) = self.find_pair(&policy_id, &role_id).await? {
            debug!(%policy_id, %role_id, "permission already exists");
            return Ok(Created::Existing(strip_hidden(Entity::Permission, &existing)));
        }

        match self.storage.insert(Entity::Permission, new_id(), data).await {
            Ok(created) => {
                info!(%policy_id, %role_id, "permission created");
                Ok(Created::New(strip_hidden(Entity::Permission, &created)))
            }
            // a concurrent create won the unique index
            Err(StorageError::UniqueViolation { .. }) => self
                .find_pair(&policy_id, &role_id)
                .await?
                .map(|doc| Created::Existing(strip_hidden(Entity::Permission, &doc)))
                .ok_or_else(|| ServiceError::Conflict {
                    message: "Permission already exists".to_string(),
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// True when any Permission row of `role_id` grants `action` on
    /// `resource`.
    pub async fn check(&self, role_id: &str, resource: Resource, action: Action) -> ServiceResult<bool> {
        let rows = self
            .grants(Condition::equals("roleId", role_id.to_string()))
            .await?;
        Ok(is_allowed(rows.iter().map(Vec::as_slice), resource, action))
    }

    /// True when any of the session's roles grants `action` on `resource`.
    pub async fn authorize(&self, claims: &SessionClaims, resource: Resource, action: Action) -> ServiceResult<bool> {
        if claims.roles.is_empty() {
            return Ok(false);
        }
        let roles = self
            .storage
            .find_many(
                Entity::Role,
                &FindQuery::new(Condition::one_of("name", claims.roles.clone())),
            )
            .await?;
        let role_ids: Vec<Value> = roles.iter().filter_map(|r| r.get("id").cloned()).collect();
        if role_ids.is_empty() {
            return Ok(false);
        }
        let rows = self.grants(Condition::one_of("roleId", role_ids)).await?;
        let allowed = is_allowed(rows.iter().map(Vec::as_slice), resource, action);
        debug!(user_id = %claims.user_id, %resource, %action, allowed, "authorization decided");
        Ok(allowed)
    }

    async fn find_pair(&self, policy_id: &str, role_id: &str) -> ServiceResult<Option<Document>> {
        let query = FindQuery::new(Condition::All(vec![
            Condition::equals("accessPolicyId", policy_id.to_string()),
            Condition::equals("roleId", role_id.to_string()),
        ]));
        Ok(self.storage.find_first(Entity::Permission, &query).await?)
    }

    async fn grants(&self, condition: Condition) -> ServiceResult<Vec<Vec<RolePermission>>> {
        let rows = self
            .storage
            .find_many(Entity::Permission, &FindQuery::new(condition))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| match parse_role_permissions(row.get("rolePermissions")) {
                Ok(grants) => Some(grants),
                Err(errors) => {
                    warn!(id = ?row.get("id"), %errors, "skipping unreadable permission row");
                    None
                }
            })
            .collect())
    }
}

fn pair(data: &Document) -> ServiceResult<(String, String)> {
    let mut errors = ValidationErrors::new();
    let policy_id = data.get("accessPolicyId").and_then(Value::as_str);
    let role_id = data.get("roleId").and_then(Value::as_str);
    if policy_id.is_none() {
        errors.push("accessPolicyId", "accessPolicyId is required");
    }
    if role_id.is_none() {
        errors.push("roleId", "roleId is required");
    }
    match (policy_id, role_id) {
        (Some(p), Some(r)) => Ok((p.to_string(), r.to_string())),
        _ => Err(errors.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{doc, CountingStore};
    use keyhold_domain::auth::AuthType;
    use serde_json::json;

    fn grant_body() -> Map<String, Value> {
        doc(json!({
            "accessPolicyId": "policy-1",
            "roleId": "role-1",
            "rolePermissions": [
                { "resource": "user", "actions": ["read", "update"] },
                { "resource": "app", "actions": ["read"] }
            ]
        }))
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_pair() {
        let store = Arc::new(CountingStore::default());
        let handler = PermissionHandler::new(Arc::clone(&store));

        let first = handler.create(&grant_body()).await.unwrap();
        assert!(first.is_new());
        let second = handler.create(&grant_body()).await.unwrap();
        assert!(!second.is_new());
        assert_eq!(first.into_document()["id"], second.into_document()["id"]);

        let total = store
            .count(Entity::Permission, &FindQuery::new(Condition::all()))
            .await
            .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_create_requires_the_pair() {
        let handler = PermissionHandler::new(Arc::new(CountingStore::default()));
        let err = handler
            .create(&doc(json!({ "roleId": "role-1" })))
            .await
            .unwrap_err();
        let ServiceError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("accessPolicyId"));
    }

    #[tokio::test]
    async fn test_check_matches_resource_and_action() {
        let handler = PermissionHandler::new(Arc::new(CountingStore::default()));
        handler.create(&grant_body()).await.unwrap();

        assert!(handler.check("role-1", Resource::User, Action::Update).await.unwrap());
        assert!(!handler.check("role-1", Resource::User, Action::Delete).await.unwrap());
        assert!(!handler.check("role-1", Resource::Role, Action::Read).await.unwrap());
        assert!(!handler.check("role-2", Resource::App, Action::Read).await.unwrap());
    }

    #[tokio::test]
    async fn test_authorize_resolves_role_names() {
        let store = Arc::new(CountingStore::default());
        store
            .insert(Entity::Role, "role-1".into(), doc(json!({ "name": "editor" })))
            .await
            .unwrap();
        let handler = PermissionHandler::new(Arc::clone(&store));
        handler.create(&grant_body()).await.unwrap();

        let mut claims = SessionClaims {
            user_id: "u1".into(),
            roles: vec!["editor".into()],
            first_name: None,
            last_name: None,
            organization_id: None,
            auth_type: AuthType::Standard,
            iat: 0,
            exp: None,
        };
        assert!(handler.authorize(&claims, Resource::App, Action::Read).await.unwrap());
        assert!(!handler.authorize(&claims, Resource::App, Action::Delete).await.unwrap());

        claims.roles = vec!["viewer".into()];
        assert!(!handler.authorize(&claims, Resource::App, Action::Read).await.unwrap());
    }
}
