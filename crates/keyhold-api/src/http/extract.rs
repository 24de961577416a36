//! Request extractors that reject with the error envelope.

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Query, Request},
    http::{
        header::{AUTHORIZATION, COOKIE},
        request::Parts,
        StatusCode,
    },
    Json,
};
use serde::de::DeserializeOwned;

use keyhold_domain::auth::SessionClaims;
use keyhold_domain::query::RawQuery;
use keyhold_storage::DataStore;

use super::envelope::ApiError;
use super::state::AppState;

/// JSON body extractor answering 400 instead of axum's 415/422. Oversized
/// bodies keep their 413.
pub struct JsonBadRequest<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBadRequest<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(JsonBadRequest(value)),
            Err(rejection) => {
                let too_large = matches!(rejection, JsonRejection::BytesRejection(_))
                    && rejection.status() == StatusCode::PAYLOAD_TOO_LARGE;
                if too_large {
                    Err(ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large"))
                } else {
                    Err(ApiError::bad_request(rejection.body_text()))
                }
            }
        }
    }
}

/// List parameters as decoded query-string pairs. Repeated keys are kept.
pub struct ListParams(pub RawQuery);

#[async_trait]
impl<S> FromRequestParts<S> for ListParams
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri)
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        Ok(ListParams(RawQuery::from_pairs(pairs)))
    }
}

/// Verified session claims.
///
/// The token is read from the session cookie; an `Authorization: Bearer`
/// header is accepted when no cookie is present.
pub struct Session(pub SessionClaims);

fn bearer(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl<S: DataStore> FromRequestParts<Arc<AppState<S>>> for Session {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let from_cookie = parts
            .headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(|header| state.cookies.extract(header));

        let token = from_cookie
            .or_else(|| bearer(parts))
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

        let claims = state.auth.session(token)?;
        Ok(Session(claims))
    }
}
