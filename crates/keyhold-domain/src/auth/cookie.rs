//! Session cookie formatting.

use super::AuthType;

/// Default session cookie name.
pub const DEFAULT_COOKIE_NAME: &str = "access_token";

/// How the session cookie is written and read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookiePolicy {
    pub name: String,
    /// Production adds `Secure` and uses `SameSite=Strict`.
    pub production: bool,
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.to_string(),
            production: false,
        }
    }
}

impl CookiePolicy {
    pub fn new(name: impl Into<String>, production: bool) -> Self {
        Self {
            name: name.into(),
            production,
        }
    }

    /// `Set-Cookie` value carrying a session token.
    pub fn session(&self, token: &str, auth_type: AuthType) -> String {
        self.format(token, auth_type.cookie_max_age())
    }

    /// `Set-Cookie` value that clears the session.
    pub fn cleared(&self) -> String {
        self.format("", 0)
    }

    fn format(&self, value: &str, max_age: i64) -> String {
        let same_site = if self.production { "Strict" } else { "Lax" };
        let mut cookie = format!(
            "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite={}",
            self.name, value, max_age, same_site
        );
        if self.production {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// Finds this policy's cookie in a `Cookie` request header.
    pub fn extract<'a>(&self, header: &'a str) -> Option<&'a str> {
        header
            .split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, value)| value)
            .filter(|value| !value.is_empty())
    }
}
