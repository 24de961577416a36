//! Credential & Token Service.
//!
//! - [`password`]: Argon2id hashing and verification.
//! - [`token`]: signed session claims with an expiry chosen by [`AuthType`].
//! - [`cookie`]: the `Set-Cookie` values carrying the token.

pub mod cookie;
pub mod password;
pub mod token;

pub use cookie::CookiePolicy;
pub use password::{HashParams, PasswordService};
pub use token::{IssuedToken, SessionClaims, SessionSubject, TokenService};

use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Session persistence class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    Standard,
    Temporary,
    Persistent,
}

impl AuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthType::Standard => "standard",
            AuthType::Temporary => "temporary",
            AuthType::Persistent => "persistent",
        }
    }

    /// Parses a stored or requested value. Anything outside the allowed set,
    /// including a missing value, becomes [`AuthType::Standard`].
    pub fn normalize(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("temporary") => AuthType::Temporary,
            Some("persistent") => AuthType::Persistent,
            _ => AuthType::Standard,
        }
    }

    /// Token lifetime; persistent tokens do not expire.
    pub fn token_ttl(self) -> Option<Duration> {
        match self {
            AuthType::Temporary => Some(Duration::hours(1)),
            AuthType::Standard => Some(Duration::days(1)),
            AuthType::Persistent => None,
        }
    }

    /// Cookie `Max-Age` in seconds.
    pub fn cookie_max_age(self) -> i64 {
        match self {
            AuthType::Temporary => 3_600,
            AuthType::Standard => 86_400,
            // 400 days, the longest lifetime browsers honour
            AuthType::Persistent => 34_560_000,
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_auth_type_normalises_to_standard() {
        assert_eq!(AuthType::normalize(Some("temporary")), AuthType::Temporary);
        assert_eq!(AuthType::normalize(Some("persistent")), AuthType::Persistent);
        assert_eq!(AuthType::normalize(Some("standard")), AuthType::Standard);
        assert_eq!(AuthType::normalize(Some("forever")), AuthType::Standard);
        assert_eq!(AuthType::normalize(Some("")), AuthType::Standard);
        assert_eq!(AuthType::normalize(None), AuthType::Standard);
    }

    #[test]
    fn test_ttl_per_class() {
        assert_eq!(AuthType::Temporary.token_ttl(), Some(Duration::hours(1)));
        assert_eq!(AuthType::Standard.token_ttl(), Some(Duration::hours(24)));
        assert_eq!(AuthType::Persistent.token_ttl(), None);
    }
}
