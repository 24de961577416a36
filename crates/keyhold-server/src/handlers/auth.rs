//! Registration, login, password change and session verification.

use std::sync::Arc;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, instrument, warn};

use keyhold_domain::auth::{AuthType, IssuedToken, PasswordService, SessionClaims, SessionSubject, TokenService};
use keyhold_domain::query::coerce::format_timestamp;
use keyhold_domain::query::{strip_hidden, Condition};
use keyhold_domain::Entity;
use keyhold_storage::{DataStore, Document, FindQuery, WriteOp};

use super::entity::new_id;
use crate::error::{ServiceError, ServiceResult};

/// Account and profile fields collected at registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: SecretString,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub auth_type: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

/// Username or email plus password.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub identifier: String,
    pub password: SecretString,
    /// Overrides the account's stored session class for this login.
    #[serde(default)]
    pub auth_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub current_password: SecretString,
    pub new_password: SecretString,
}

/// A successful login.
#[derive(Debug)]
pub struct LoginOutcome {
    pub token: IssuedToken,
    pub auth_type: AuthType,
    /// The account without its password, with `person` and `roles` nested.
    pub profile: Value,
}

/// Handler for the auth endpoints.
pub struct AuthHandler<S: DataStore> {
    storage: Arc<S>,
    passwords: PasswordService,
    tokens: TokenService,
}

impl<S: DataStore> AuthHandler<S> {
    pub fn new(storage: Arc<S>, passwords: PasswordService, tokens: TokenService) -> Self {
        Self {
            storage,
            passwords,
            tokens,
        }
    }

    /// Creates the Person, User and UserRole rows in one transaction.
    ///
    /// An existing account with the same username or email, soft-deleted or
    /// not, is a conflict and nothing is written.
    #[instrument(skip(self, request), fields(username = %request.username))]
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<Document> {
        let username = canonical_handle(&request.username);
        let email = canonical_handle(&request.email);
        check_required(&username, &email, &request.password)?;

        let taken = accounts_holding(Some(&username), Some(&email));
        if self.storage.find_first(Entity::User, &taken).await?.is_some() {
            info!("registration rejected: account already exists");
            return Err(account_taken());
        }

        for (i, role_id) in request.role_ids.iter().enumerate() {
            if self.storage.find_by_id(Entity::Role, role_id).await?.is_none() {
                return Err(ServiceError::validation(
                    format!("roleIds[{i}]"),
                    format!("role {role_id} does not exist"),
                ));
            }
        }

        let hash = self.hash(request.password).await?;
        let auth_type = AuthType::normalize(request.auth_type.as_deref());
        let person_id = new_id();
        let user_id = new_id();

        let mut person = Map::new();
        insert_opt(&mut person, "firstName", request.first_name);
        insert_opt(&mut person, "lastName", request.last_name);
        insert_opt(&mut person, "phone", request.phone);

        let mut user = Map::new();
        user.insert("username".into(), json!(username));
        user.insert("email".into(), json!(email));
        user.insert("password".into(), json!(hash));
        user.insert("status".into(), json!("active"));
        user.insert("authType".into(), json!(auth_type.as_str()));
        user.insert("isVerified".into(), json!(false));
        user.insert("personId".into(), json!(person_id));
        insert_opt(&mut user, "organizationId", request.organization_id);

        let mut ops = vec![
            WriteOp::Insert {
                entity: Entity::Person,
                id: person_id,
                data: person,
            },
            WriteOp::Insert {
                entity: Entity::User,
                id: user_id.clone(),
                data: user,
            },
        ];
        ops.extend(request.role_ids.into_iter().map(|role_id| WriteOp::Insert {
            entity: Entity::UserRole,
            id: new_id(),
            data: Map::from_iter([
                ("userId".to_string(), json!(user_id)),
                ("roleId".to_string(), json!(role_id)),
            ]),
        }));

        let written = self.storage.transaction(ops).await?;
        info!(user_id = %user_id, "account registered");

        let mut account = written
            .get(1)
            .map(|doc| strip_hidden(Entity::User, doc))
            .ok_or_else(|| ServiceError::Internal {
                message: "registration wrote no user".to_string(),
            })?;
        if let Some(person) = written.first() {
            account.insert("person".into(), Value::Object(person.clone()));
        }
        Ok(account)
    }

    /// Verifies credentials and issues a session token.
    ///
    /// Unknown identifier, missing hash and wrong password all fail with
    /// the same generic error.
    #[instrument(skip(self, request))]
    pub async fn login(&self, request: LoginRequest) -> ServiceResult<LoginOutcome> {
        let identifier = canonical_handle(&request.identifier);
        let lookup = FindQuery::new(Condition::Any(vec![
            Condition::equals("username", identifier.clone()),
            Condition::equals("email", identifier),
        ]));
        let Some(user) = self.storage.find_first(Entity::User, &lookup).await? else {
            info!("login rejected");
            return Err(ServiceError::invalid_credentials());
        };
        let Some(stored) = user.get("password").and_then(Value::as_str) else {
            info!("login rejected");
            return Err(ServiceError::invalid_credentials());
        };
        if !self.verify(request.password, stored.to_string()).await? {
            info!("login rejected");
            return Err(ServiceError::invalid_credentials());
        }

        let user_id = string_field(&user, "id").unwrap_or_default();
        let roles = self.role_documents(&user_id).await?;
        let person = match string_field(&user, "personId") {
            Some(person_id) => self.storage.find_by_id(Entity::Person, &person_id).await?,
            None => None,
        };

        let now = Utc::now();
        let mut stamp = Map::new();
        stamp.insert("lastLoginAt".into(), json!(format_timestamp(now)));
        let user = self.storage.update(Entity::User, user_id.clone(), stamp).await?;

        let raw_auth_type = request
            .auth_type
            .or_else(|| string_field(&user, "authType"));
        let subject = SessionSubject {
            user_id: user_id.clone(),
            roles: roles.iter().filter_map(|r| string_field(r, "name")).collect(),
            first_name: person.as_ref().and_then(|p| string_field(p, "firstName")),
            last_name: person.as_ref().and_then(|p| string_field(p, "lastName")),
            organization_id: string_field(&user, "organizationId"),
            auth_type: raw_auth_type,
        };
        let token = self.tokens.issue(subject, now)?;
        let auth_type = token.claims.auth_type;
        info!(user_id = %user_id, auth_type = %auth_type, "login succeeded");

        let mut profile = strip_hidden(Entity::User, &user);
        profile.insert(
            "person".into(),
            person.map(Value::Object).unwrap_or(Value::Null),
        );
        profile.insert(
            "roles".into(),
            Value::Array(roles.into_iter().map(Value::Object).collect()),
        );

        Ok(LoginOutcome {
            token,
            auth_type,
            profile: Value::Object(profile),
        })
    }

    /// Replaces the password once the current one verifies.
    #[instrument(skip(self, request))]
    pub async fn update_password(&self, user_id: &str, request: UpdatePasswordRequest) -> ServiceResult<()> {
        if request.new_password.expose_secret().is_empty() {
            return Err(ServiceError::validation("newPassword", "newPassword is required"));
        }
        let Some(user) = self.storage.find_by_id(Entity::User, user_id).await? else {
            return Err(ServiceError::Unauthorized {
                message: "Invalid or expired session".to_string(),
            });
        };
        let current_ok = match user.get("password").and_then(Value::as_str) {
            Some(stored) => self.verify(request.current_password, stored.to_string()).await?,
            None => false,
        };
        if !current_ok {
            return Err(ServiceError::Unauthorized {
                message: "Current password is incorrect".to_string(),
            });
        }

        let hash = self.hash(request.new_password).await?;
        let mut patch = Map::new();
        patch.insert("password".into(), json!(hash));
        self.storage.update(Entity::User, user_id.to_string(), patch).await?;
        info!(user_id = %user_id, "password updated");
        Ok(())
    }

    /// Claims of a valid session token.
    pub fn session(&self, token: &str) -> ServiceResult<SessionClaims> {
        self.tokens.verify(token).map_err(|e| {
            warn!(error = %e, "session token rejected");
            ServiceError::from(e)
        })
    }

    async fn role_documents(&self, user_id: &str) -> ServiceResult<Vec<Document>> {
        let links = self
            .storage
            .find_many(
                Entity::UserRole,
                &FindQuery::new(Condition::equals("userId", user_id.to_string())),
            )
            .await?;
        let role_ids: Vec<String> = links.iter().filter_map(|l| string_field(l, "roleId")).collect();
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .storage
            .find_many(Entity::Role, &FindQuery::new(Condition::one_of("id", role_ids)))
            .await?)
    }

    // Argon2 is memory-hard; keep it off the async workers.
    async fn hash(&self, password: SecretString) -> ServiceResult<String> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.hash(password.expose_secret()))
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("password hashing task failed: {e}"),
            })?
            .map_err(ServiceError::from)
    }

    async fn verify(&self, password: SecretString, stored: String) -> ServiceResult<bool> {
        let passwords = self.passwords.clone();
        tokio::task::spawn_blocking(move || passwords.verify(password.expose_secret(), &stored))
            .await
            .map_err(|e| ServiceError::Internal {
                message: format!("password verification task failed: {e}"),
            })
    }
}

/// Usernames and emails compare case-insensitively and are stored in this
/// form.
pub(crate) fn canonical_handle(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Users, soft-deleted ones included, holding either handle.
pub(crate) fn accounts_holding(username: Option<&str>, email: Option<&str>) -> FindQuery {
    let mut holders = Vec::new();
    if let Some(username) = username {
        holders.push(Condition::equals("username", username.to_string()));
    }
    if let Some(email) = email {
        holders.push(Condition::equals("email", email.to_string()));
    }
    FindQuery::new(Condition::Any(holders)).including_deleted()
}

pub(crate) fn account_taken() -> ServiceError {
    ServiceError::Conflict {
        message: "An account with this username or email already exists".to_string(),
    }
}

fn check_required(username: &str, email: &str, password: &SecretString) -> ServiceResult<()> {
    let mut errors = keyhold_domain::ValidationErrors::new();
    if username.is_empty() {
        errors.push("username", "username is required");
    }
    if email.is_empty() {
        errors.push("email", "email is required");
    }
    if password.expose_secret().is_empty() {
        errors.push("password", "password is required");
    }
    errors.into_result(()).map_err(ServiceError::from)
}

fn insert_opt(map: &mut Map<String, Value>, key: &str, value: Option<String>) {
    if let Some(value) = value {
        map.insert(key.to_string(), Value::String(value));
    }
}

fn string_field(doc: &Document, key: &str) -> Option<String> {
    doc.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::INVALID_CREDENTIALS;
    use crate::handlers::testing::{doc, CountingStore};
    use crate::handlers::EntityHandler;
    use keyhold_domain::auth::HashParams;

    fn handler(store: &Arc<CountingStore>) -> AuthHandler<CountingStore> {
        let passwords = PasswordService::new(HashParams {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        })
        .unwrap();
        let tokens = TokenService::new(&SecretString::from("test-secret".to_string()));
        AuthHandler::new(Arc::clone(store), passwords, tokens)
    }

    fn registration(username: &str, email: &str) -> RegisterRequest {
        serde_json::from_value(json!({
            "username": username,
            "email": email,
            "password": "correct horse",
            "firstName": "Ada",
            "lastName": "Lovelace"
        }))
        .unwrap()
    }

    fn login(identifier: &str, password: &str) -> LoginRequest {
        serde_json::from_value(json!({ "identifier": identifier, "password": password })).unwrap()
    }

    #[tokio::test]
    async fn test_register_writes_person_user_and_roles_atomically() {
        let store = Arc::new(CountingStore::default());
        store
            .insert(Entity::Role, "r1".into(), doc(json!({ "name": "admin" })))
            .await
            .unwrap();
        let mut request = registration("ada", "Ada@Example.com");
        request.role_ids = vec!["r1".into()];

        let account = handler(&store).register(request).await.unwrap();

        assert_eq!(account["username"], json!("ada"));
        assert_eq!(account["email"], json!("ada@example.com"));
        assert!(account.get("password").is_none());
        assert_eq!(account["person"]["firstName"], json!("Ada"));
        let user_id = account["id"].as_str().unwrap();
        let links = store
            .find_many(
                Entity::UserRole,
                &FindQuery::new(Condition::equals("userId", user_id.to_string())),
            )
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
    }

    #[tokio::test]
    async fn test_register_duplicate_email_conflicts_even_when_deleted() {
        let store = Arc::new(CountingStore::default());
        let handler = handler(&store);
        let account = handler.register(registration("ada", "ada@example.com")).await.unwrap();
        store
            .soft_delete(Entity::User, account["id"].as_str().unwrap().to_string())
            .await
            .unwrap();
        let writes_before = store.transaction_calls();

        let err = handler
            .register(registration("someone-else", "ada@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Conflict { .. }));
        assert_eq!(store.transaction_calls(), writes_before);
    }

    #[tokio::test]
    async fn test_register_username_differing_only_in_case_conflicts() {
        let store = Arc::new(CountingStore::default());
        let handler = handler(&store);
        let account = handler.register(registration("Ada", "a@example.com")).await.unwrap();
        assert_eq!(account["username"], json!("ada"));
        let writes_before = store.transaction_calls();

        let err = handler
            .register(registration("ada", "b@example.com"))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Conflict { .. }));
        assert_eq!(store.transaction_calls(), writes_before);
        assert!(handler.login(login("ADA", "correct horse")).await.is_ok());
    }

    #[tokio::test]
    async fn test_patched_email_still_blocks_registration() {
        let store = Arc::new(CountingStore::default());
        let handler = handler(&store);
        let account = handler.register(registration("bob", "bob@example.com")).await.unwrap();
        let user_id = account["id"].as_str().unwrap();

        let patched = EntityHandler::new(Arc::clone(&store))
            .update(Entity::User, user_id, &doc(json!({ "email": " Carol@Example.COM " })))
            .await
            .unwrap();
        assert_eq!(patched["email"], json!("carol@example.com"));

        let err = handler
            .register(registration("carol", "carol@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { .. }));
        assert!(handler.login(login("Carol@example.com", "correct horse")).await.is_ok());
    }

    #[tokio::test]
    async fn test_register_unknown_role_is_rejected() {
        let store = Arc::new(CountingStore::default());
        let mut request = registration("ada", "ada@example.com");
        request.role_ids = vec!["missing".into()];

        let err = handler(&store).register(request).await.unwrap_err();

        let ServiceError::Validation(errors) = err else {
            panic!("expected validation error");
        };
        assert!(errors.has_field("roleIds[0]"));
        assert_eq!(store.transaction_calls(), 0);
    }

    #[tokio::test]
    async fn test_login_issues_claims_and_stamps_last_login() {
        let store = Arc::new(CountingStore::default());
        store
            .insert(Entity::Role, "r1".into(), doc(json!({ "name": "admin" })))
            .await
            .unwrap();
        let handler = handler(&store);
        let mut request = registration("ada", "ada@example.com");
        request.role_ids = vec!["r1".into()];
        request.auth_type = Some("temporary".into());
        handler.register(request).await.unwrap();

        let outcome = handler.login(login("ada@example.com", "correct horse")).await.unwrap();

        assert_eq!(outcome.auth_type, AuthType::Temporary);
        assert_eq!(outcome.token.claims.roles, vec!["admin".to_string()]);
        assert_eq!(outcome.token.claims.first_name.as_deref(), Some("Ada"));
        assert!(outcome.token.claims.exp.is_some());
        assert!(outcome.profile["lastLoginAt"].is_string());
        assert!(outcome.profile.get("password").is_none());

        let claims = handler.session(outcome.token.token.expose_secret()).unwrap();
        assert_eq!(claims, outcome.token.claims);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let store = Arc::new(CountingStore::default());
        let handler = handler(&store);
        handler.register(registration("ada", "ada@example.com")).await.unwrap();
        store
            .insert(Entity::User, "no-hash".into(), doc(json!({ "username": "grace" })))
            .await
            .unwrap();

        for (identifier, password) in [("ada", "wrong"), ("nobody", "correct horse"), ("grace", "x")] {
            let err = handler.login(login(identifier, password)).await.unwrap_err();
            let ServiceError::Unauthorized { message } = err else {
                panic!("expected unauthorized for {identifier}");
            };
            assert_eq!(message, INVALID_CREDENTIALS);
        }
    }

    #[tokio::test]
    async fn test_update_password_requires_current_password() {
        let store = Arc::new(CountingStore::default());
        let handler = handler(&store);
        let account = handler.register(registration("ada", "ada@example.com")).await.unwrap();
        let user_id = account["id"].as_str().unwrap();

        let wrong: UpdatePasswordRequest =
            serde_json::from_value(json!({ "currentPassword": "nope", "newPassword": "n3w" })).unwrap();
        let err = handler.update_password(user_id, wrong).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized { .. }));

        let right: UpdatePasswordRequest =
            serde_json::from_value(json!({ "currentPassword": "correct horse", "newPassword": "n3w" }))
                .unwrap();
        handler.update_password(user_id, right).await.unwrap();

        assert!(handler.login(login("ada", "correct horse")).await.is_err());
        assert!(handler.login(login("ada", "n3w")).await.is_ok());
    }

    #[test]
    fn test_session_rejects_garbage() {
        let store = Arc::new(CountingStore::default());
        let err = handler(&store).session("not-a-token").unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized { .. }));
    }
}
