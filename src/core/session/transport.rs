// src/core/session/transport.rs

//! Carrying the session identifier over HTTP: a bearer token or a cookie.

use std::collections::HashMap;

/// Name of the session cookie. The `__Host-` prefix locks it to the issuing
/// host: no `Domain`, `Path=/` and `Secure` are mandatory.
pub const SESSION_COOKIE_NAME: &str = "__Host-session_token";

/// Read access to the parts of a request that may carry a session identifier.
pub trait CredentialSource {
    /// The raw `Authorization` header value, if present.
    fn authorization(&self) -> Option<&str>;

    /// The value of the named cookie, if present.
    fn cookie(&self, name: &str) -> Option<&str>;
}

/// Extracts the session identifier: a bearer token first, then the cookie.
pub fn session_identifier<S: CredentialSource + ?Sized>(source: &S) -> Option<String> {
    if let Some(token) = source.authorization().and_then(bearer_token) {
        return Some(token.to_string());
    }
    source
        .cookie(SESSION_COOKIE_NAME)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parses `Bearer <token>`. Any other shape is ignored.
fn bearer_token(header: &str) -> Option<&str> {
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) => Some(token),
        _ => None,
    }
}

/// Credentials captured from request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    authorization: Option<String>,
    cookies: HashMap<String, String>,
}

impl RequestCredentials {
    /// Collects the `Authorization` header and every `Cookie` header.
    /// Header names are matched case-insensitively.
    pub fn from_headers<'a, I>(headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut credentials = Self::default();
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("authorization") {
                credentials.authorization = Some(value.trim().to_string());
            } else if name.eq_ignore_ascii_case("cookie") {
                for pair in value.split(';') {
                    if let Some((key, val)) = pair.trim().split_once('=') {
                        credentials
                            .cookies
                            .entry(key.trim().to_string())
                            .or_insert_with(|| val.trim().trim_matches('"').to_string());
                    }
                }
            }
        }
        credentials
    }

    pub fn with_bearer(token: &str) -> Self {
        Self {
            authorization: Some(format!("Bearer {token}")),
            cookies: HashMap::new(),
        }
    }

    pub fn with_cookie(value: &str) -> Self {
        Self {
            authorization: None,
            cookies: HashMap::from([(SESSION_COOKIE_NAME.to_string(), value.to_string())]),
        }
    }
}

impl CredentialSource for RequestCredentials {
    fn authorization(&self) -> Option<&str> {
        self.authorization.as_deref()
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }
}

/// What the HTTP boundary must do with the session cookie after a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCookie {
    Set(String),
    Clear,
}

impl SessionCookie {
    /// Renders the `Set-Cookie` header value.
    pub fn to_set_cookie_header(&self) -> String {
        const ATTRIBUTES: &str = "HttpOnly; Path=/; SameSite=Strict; Secure";
        match self {
            SessionCookie::Set(identity) => {
                format!("{SESSION_COOKIE_NAME}={identity}; {ATTRIBUTES}")
            }
            SessionCookie::Clear => format!(
                "{SESSION_COOKIE_NAME}=\"\"; expires=Thu, 01 Jan 1970 00:00:00 GMT; Max-Age=0; {ATTRIBUTES}"
            ),
        }
    }
}
