//! Signed session tokens.
//!
//! Tokens are HS256 JWTs signed with a server-held secret. The claims carry
//! the user id, role names, profile names, an optional organization and the
//! [`AuthType`]; `exp` is present only for expiring classes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::AuthType;
use crate::error::{DomainError, DomainResult};

/// Claims embedded in a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub auth_type: AuthType,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Who a token is being issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSubject {
    pub user_id: String,
    pub roles: Vec<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub organization_id: Option<String>,
    /// Raw stored value; normalised before use.
    pub auth_type: Option<String>,
}

/// A freshly signed token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: SecretString,
    pub claims: SessionClaims,
}

/// Issues and verifies session tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        // persistent tokens carry no exp
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;

        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
        }
    }

    /// Signs a token for `subject` at time `now`.
    pub fn issue(&self, subject: SessionSubject, now: DateTime<Utc>) -> DomainResult<IssuedToken> {
        let auth_type = AuthType::normalize(subject.auth_type.as_deref());
        let claims = SessionClaims {
            user_id: subject.user_id,
            roles: subject.roles,
            first_name: subject.first_name,
            last_name: subject.last_name,
            organization_id: subject.organization_id,
            auth_type,
            iat: now.timestamp(),
            exp: auth_type.token_ttl().map(|ttl| (now + ttl).timestamp()),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| DomainError::TokenSigning {
                message: e.to_string(),
            })?;

        Ok(IssuedToken {
            token: SecretString::from(token),
            claims,
        })
    }

    /// Verifies the signature and expiry of `token`.
    pub fn verify(&self, token: &str) -> DomainResult<SessionClaims> {
        jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| DomainError::InvalidToken {
                reason: e.to_string(),
            })
    }
}
