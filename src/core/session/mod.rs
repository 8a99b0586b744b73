// src/core/session/mod.rs

//! Session storage on top of the shared cache.
//!
//! A session lives as a map under `moonship:session:<id>`. The map always holds a
//! `created` field (seconds since the Unix epoch) next to the session data.
//! With an idle expiry configured, every successful load pushes the key's
//! expiry forward, so a session dies only after a full idle period.

use crate::core::MoonshipError;
use crate::core::cache::SharedCache;
use rand::RngCore;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

pub mod transport;

pub use transport::{
    CredentialSource, RequestCredentials, SESSION_COOKIE_NAME, SessionCookie, session_identifier,
};

const STORAGE_PREFIX: &str = "moonship:session:";
const CREATED_FIELD: &str = "created";

/// Store key of the session with identifier `identity`.
pub fn storage_key(identity: &str) -> String {
    format!("{STORAGE_PREFIX}{identity}")
}

fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Per-session key/value data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    identity: Option<String>,
    new: bool,
    created: i64,
    data: HashMap<String, String>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// A fresh session with no identity and no server-side record.
    pub fn new() -> Self {
        Self {
            identity: None,
            new: true,
            created: now_secs(),
            data: HashMap::new(),
        }
    }

    fn restored(identity: String, created: i64, data: HashMap<String, String>) -> Self {
        Self {
            identity: Some(identity),
            new: false,
            created,
            data,
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// True until the session has been loaded from a stored record.
    pub fn is_new(&self) -> bool {
        self.new
    }

    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.data.get(field).map(String::as_str)
    }

    /// Sets a data field. `created` is reserved for the record's creation time.
    pub fn insert(
        &mut self,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), MoonshipError> {
        let field = field.into();
        if field == CREATED_FIELD {
            return Err(MoonshipError::InvalidState(format!(
                "'{CREATED_FIELD}' is a reserved session field"
            )));
        }
        self.data.insert(field, value.into());
        Ok(())
    }

    pub fn remove(&mut self, field: &str) -> Option<String> {
        self.data.remove(field)
    }

    pub fn data(&self) -> &HashMap<String, String> {
        &self.data
    }

    /// Drops all data. Saving an invalidated session deletes its record.
    pub fn invalidate(&mut self) {
        self.data.clear();
    }

    /// Assigns the identifier of a freshly logged-in session.
    pub fn set_new_identity(&mut self, identity: impl Into<String>) -> Result<(), MoonshipError> {
        if !self.new {
            return Err(MoonshipError::InvalidState(
                "cannot change the identity of an existing session".into(),
            ));
        }
        self.identity = Some(identity.into());
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Loads and saves sessions through a dedicated shared cache.
pub struct SessionStore {
    cache: Box<dyn SharedCache>,
    idle_expiry: Option<Duration>,
}

impl SessionStore {
    pub fn new(cache: Box<dyn SharedCache>, idle_expiry: Option<Duration>) -> Self {
        Self { cache, idle_expiry }
    }

    /// A new random session identifier: 128 bits as lowercase hex.
    pub fn generate_identity() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }

    pub fn idle_expiry(&self) -> Option<Duration> {
        self.idle_expiry
    }

    pub async fn open(&self) -> Result<(), MoonshipError> {
        self.cache.open().await
    }

    pub async fn close(&self) -> Result<(), MoonshipError> {
        self.cache.close().await
    }

    fn idle_expiry_ms(&self) -> Option<u64> {
        self.idle_expiry
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    /// Loads the session identified by the request credentials. No identifier,
    /// or no stored record, yields a new empty session.
    pub async fn load<S: CredentialSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<Session, MoonshipError> {
        match session_identifier(source) {
            Some(identity) => self.load_by_id(&identity).await,
            None => Ok(Session::new()),
        }
    }

    pub async fn load_by_id(&self, identity: &str) -> Result<Session, MoonshipError> {
        let key = storage_key(identity);
        let mut record = self.cache.map_get_entries(&key).await?;
        if record.is_empty() {
            debug!("No stored session for the presented identifier.");
            return Ok(Session::new());
        }
        if let Some(ttl_ms) = self.idle_expiry_ms() {
            self.cache.expire(&key, ttl_ms).await?;
        }
        let created = match record.remove(CREATED_FIELD).map(|v| v.parse::<i64>()) {
            Some(Ok(created)) => created,
            _ => {
                warn!("Stored session has a missing or invalid creation time; using now.");
                now_secs()
            }
        };
        Ok(Session::restored(identity.to_string(), created, record))
    }

    /// Persists the session and returns the cookie action for the response.
    ///
    /// An empty session deletes its record and clears the cookie. Otherwise the
    /// record is replaced in one transactional commit, with the original
    /// creation time and, if configured, a fresh idle expiry.
    pub async fn save(&self, session: &Session) -> Result<SessionCookie, MoonshipError> {
        if session.is_empty() {
            if let Some(identity) = session.identity() {
                self.cache.delete(&storage_key(identity)).await?;
            }
            return Ok(SessionCookie::Clear);
        }

        let identity = session.identity().ok_or_else(|| {
            MoonshipError::InvalidState("cannot save a session without an identity".into())
        })?;
        let key = storage_key(identity);
        let mut record = session.data.clone();
        record.insert(CREATED_FIELD.to_string(), session.created.to_string());

        let mut bulk = self.cache.start_bulk(true).delete(&key).map_put(&key, &record);
        if let Some(ttl_ms) = self.idle_expiry_ms() {
            bulk = bulk.expire(&key, ttl_ms);
        }
        bulk.execute().await?;
        Ok(SessionCookie::Set(identity.to_string()))
    }
}
