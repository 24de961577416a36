//! HTTP route definitions and handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header::SET_COOKIE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Extension, Json, Router,
};
use chrono::DateTime;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, warn};

use keyhold_domain::permission::{Action, Resource};
use keyhold_domain::query::coerce::format_timestamp;
use keyhold_domain::Entity;
use keyhold_server::handlers::{LoginRequest, RegisterRequest, UpdatePasswordRequest};
use keyhold_server::ServiceError;
use keyhold_storage::DataStore;

use super::envelope::{ApiError, ApiResult, Envelope, Success};
use super::extract::{JsonBadRequest, ListParams, Session};
use super::state::AppState;
use crate::observability::{metrics_handler, record_login, MetricsState};

/// Default request body size limit (1MB).
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// URL segment of each entity's collection.
pub fn collection_path(entity: Entity) -> &'static str {
    match entity {
        Entity::User => "users",
        Entity::Person => "persons",
        Entity::Organization => "organizations",
        Entity::Role => "roles",
        Entity::UserRole => "user-roles",
        Entity::AccessPolicy => "access-policies",
        Entity::Permission => "permissions",
        Entity::App => "apps",
    }
}

/// `GET|POST /` and `GET|PATCH|DELETE /:id` for one entity. The entity
/// reaches the handlers as a request extension.
fn collection_routes<S: DataStore>(entity: Entity) -> Router<Arc<AppState<S>>> {
    let root = match entity {
        Entity::User => get(list_documents::<S>),
        Entity::Permission => get(list_documents::<S>).post(create_permission::<S>),
        _ => get(list_documents::<S>).post(create_document::<S>),
    };

    let mut router = Router::new();
    if entity == Entity::Permission {
        router = router.route("/check", get(check_permission::<S>));
    }
    router
        .route("/", root)
        .route(
            "/:id",
            get(get_document::<S>)
                .patch(update_document::<S>)
                .delete(delete_document::<S>),
        )
        .layer(Extension(entity))
}

fn api_routes<S: DataStore>() -> Router<Arc<AppState<S>>> {
    let auth = Router::new()
        .route("/register", post(register::<S>))
        .route("/login", post(login::<S>))
        .route("/logout", post(logout::<S>))
        .route("/password", patch(update_password::<S>))
        .route("/session", get(session::<S>));

    Entity::ALL
        .into_iter()
        .fold(Router::new().nest("/auth", auth), |router, entity| {
            router.nest(
                &format!("/{}", collection_path(entity)),
                collection_routes::<S>(entity),
            )
        })
}

pub fn create_router<S: DataStore>(state: AppState<S>) -> Router {
    create_router_with_body_limit(state, DEFAULT_BODY_LIMIT)
}

pub fn create_router_with_body_limit<S: DataStore>(state: AppState<S>, body_limit: usize) -> Router {
    api_routes::<S>()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check::<S>))
        .fallback(route_not_found)
        .with_state(Arc::new(state))
        .layer(RequestBodyLimitLayer::new(body_limit))
}

/// The API plus the Prometheus endpoint at `metrics_path`.
pub fn create_router_with_observability<S: DataStore>(
    state: AppState<S>,
    metrics_state: MetricsState,
    metrics_path: &str,
    body_limit: usize,
) -> Router {
    let metrics_router = Router::new()
        .route(metrics_path, get(metrics_handler))
        .with_state(metrics_state);

    create_router_with_body_limit(state, body_limit).merge(metrics_router)
}

// ============================================================
// Health
// ============================================================

async fn health_check() -> Success {
    Success::ok("Service is healthy", Some(json!({ "status": "ok" })))
}

/// 200 when the storage backend answers its health check, 503 otherwise.
/// Failure details are logged, not returned.
async fn readiness_check<S: DataStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    match state.storage.health_check().await {
        Ok(status) if status.healthy => Success::ok(
            "Service is ready",
            Some(json!({
                "status": "ready",
                "checks": { "storage": "ok" },
                "latencyMs": status.latency.as_millis() as u64,
            })),
        )
        .into_response(),
        Ok(status) => {
            warn!(message = ?status.message, "readiness check failed: storage unhealthy");
            not_ready()
        }
        Err(e) => {
            error!(error = %e, "readiness check failed: storage unavailable");
            not_ready()
        }
    }
}

fn not_ready() -> Response {
    let status = StatusCode::SERVICE_UNAVAILABLE;
    (status, Json(Envelope::error(status, "Service not ready", None))).into_response()
}

async fn route_not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

// ============================================================
// Collections
// ============================================================

async fn list_documents<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(entity): Extension<Entity>,
    ListParams(raw): ListParams,
) -> ApiResult<Success> {
    let response = state.list.list(entity, &raw).await?;
    Ok(Success::ok(response.message, response.data))
}

async fn get_document<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(entity): Extension<Entity>,
    Path(id): Path<String>,
) -> ApiResult<Success> {
    let doc = state.entities.get(entity, &id).await?;
    Ok(Success::ok(
        format!("{} retrieved successfully", entity.name()),
        Some(Value::Object(doc)),
    ))
}

async fn create_document<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(entity): Extension<Entity>,
    JsonBadRequest(body): JsonBadRequest<Map<String, Value>>,
) -> ApiResult<Success> {
    let doc = state.entities.create(entity, &body).await?;
    Ok(Success::created(
        format!("{} created successfully", entity.name()),
        Some(Value::Object(doc)),
    ))
}

async fn update_document<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(entity): Extension<Entity>,
    Path(id): Path<String>,
    JsonBadRequest(body): JsonBadRequest<Map<String, Value>>,
) -> ApiResult<Success> {
    let doc = state.entities.update(entity, &id, &body).await?;
    Ok(Success::ok(
        format!("{} updated successfully", entity.name()),
        Some(Value::Object(doc)),
    ))
}

async fn delete_document<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    Extension(entity): Extension<Entity>,
    Path(id): Path<String>,
) -> ApiResult<Success> {
    let doc = state.entities.delete(entity, &id).await?;
    Ok(Success::ok(
        format!("{} deleted successfully", entity.name()),
        Some(Value::Object(doc)),
    ))
}

// ============================================================
// Permissions
// ============================================================

/// 201 with the new row, or 200 with the row that already grants the same
/// (accessPolicyId, roleId) pair.
async fn create_permission<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    JsonBadRequest(body): JsonBadRequest<Map<String, Value>>,
) -> ApiResult<Success> {
    let created = state.permissions.create(&body).await?;
    let response = if created.is_new() {
        Success::created(
            "Permission created successfully",
            Some(Value::Object(created.into_document())),
        )
    } else {
        Success::ok(
            "Permission already exists",
            Some(Value::Object(created.into_document())),
        )
    };
    Ok(response)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckParams {
    pub role_id: String,
    pub resource: String,
    pub action: String,
}

async fn check_permission<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    params: Result<Query<CheckParams>, QueryRejection>,
) -> ApiResult<Success> {
    let Query(params) = params.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let resource: Resource = params.resource.parse().map_err(ServiceError::from)?;
    let action: Action = params.action.parse().map_err(ServiceError::from)?;

    let allowed = state.permissions.check(&params.role_id, resource, action).await?;
    Ok(Success::ok(
        "Permission checked successfully",
        Some(json!({
            "roleId": params.role_id,
            "resource": resource.to_string(),
            "action": action.to_string(),
            "allowed": allowed,
        })),
    ))
}

// ============================================================
// Auth
// ============================================================

async fn register<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    JsonBadRequest(request): JsonBadRequest<RegisterRequest>,
) -> ApiResult<Success> {
    let account = state.auth.register(request).await?;
    Ok(Success::created(
        "Account registered successfully",
        Some(Value::Object(account)),
    ))
}

/// Sets the session cookie. The token itself is not echoed in the body.
async fn login<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    JsonBadRequest(request): JsonBadRequest<LoginRequest>,
) -> ApiResult<Response> {
    let outcome = match state.auth.login(request).await {
        Ok(outcome) => {
            record_login("success");
            outcome
        }
        Err(e) => {
            record_login(match e {
                ServiceError::Unauthorized { .. } => "rejected",
                _ => "error",
            });
            return Err(e.into());
        }
    };

    let cookie = state
        .cookies
        .session(outcome.token.token.expose_secret(), outcome.auth_type);
    let expires_at = outcome
        .token
        .claims
        .exp
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
        .map(format_timestamp);

    let body = Success::ok(
        "Login successful",
        Some(json!({
            "user": outcome.profile,
            "authType": outcome.auth_type,
            "expiresAt": expires_at,
        })),
    );
    Ok(([(SET_COOKIE, cookie)], body).into_response())
}

/// Clears the session cookie. Tokens are not revoked server-side.
async fn logout<S: DataStore>(State(state): State<Arc<AppState<S>>>) -> Response {
    (
        [(SET_COOKIE, state.cookies.cleared())],
        Success::ok("Logout successful", None),
    )
        .into_response()
}

async fn update_password<S: DataStore>(
    State(state): State<Arc<AppState<S>>>,
    Session(claims): Session,
    JsonBadRequest(request): JsonBadRequest<UpdatePasswordRequest>,
) -> ApiResult<Success> {
    state.auth.update_password(&claims.user_id, request).await?;
    Ok(Success::ok("Password updated successfully", None))
}

async fn session<S: DataStore>(Session(claims): Session) -> ApiResult<Success> {
    let data = serde_json::to_value(&claims).map_err(|e| {
        error!(error = %e, "failed to serialize session claims");
        ApiError::internal()
    })?;
    Ok(Success::ok("Session is valid", Some(data)))
}
