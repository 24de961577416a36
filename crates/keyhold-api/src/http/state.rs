//! Shared state for the HTTP handlers.

use std::sync::Arc;

use keyhold_domain::auth::{CookiePolicy, PasswordService, TokenService};
use keyhold_domain::DomainResult;
use keyhold_server::handlers::{AuthHandler, EntityHandler, ListHandler, PermissionHandler};
use keyhold_server::ServerConfig;
use keyhold_storage::DataStore;

/// Handlers and settings shared by every route, generic over the storage
/// backend.
pub struct AppState<S: DataStore> {
    pub storage: Arc<S>,
    pub list: ListHandler<S>,
    pub entities: EntityHandler<S>,
    pub auth: AuthHandler<S>,
    pub permissions: PermissionHandler<S>,
    pub cookies: CookiePolicy,
}

impl<S: DataStore> AppState<S> {
    /// Wires the handlers from `config`. Fails only when the configured
    /// password hashing parameters are rejected.
    pub fn from_config(storage: Arc<S>, config: &ServerConfig) -> DomainResult<Self> {
        let passwords = PasswordService::new(config.auth.hashing)?;
        let tokens = TokenService::new(&config.jwt_secret());

        Ok(Self {
            list: ListHandler::new(
                Arc::clone(&storage),
                config.query_defaults(),
                config.server.is_production(),
            ),
            entities: EntityHandler::new(Arc::clone(&storage)),
            auth: AuthHandler::new(Arc::clone(&storage), passwords, tokens),
            permissions: PermissionHandler::new(Arc::clone(&storage)),
            cookies: config.cookie_policy(),
            storage,
        })
    }
}
