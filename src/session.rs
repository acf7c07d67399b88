//! Session token lifecycle.
//!
//! The session lives in the key-value store under `userToken`,
//! `tokenExpiresAt` and `userData`. Validity is fail-closed: a token without
//! a recorded (and parsable) expiry is expired, and so is any session whose
//! storage cannot be read.

use crate::api::types::{Client, LoginData};
use crate::cache;
use crate::error::{PortalError, Result};
use crate::storage::KeyValueStore;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::Arc;

pub const TOKEN_KEY: &str = "userToken";
pub const EXPIRES_AT_KEY: &str = "tokenExpiresAt";
pub const USER_DATA_KEY: &str = "userData";
pub const REMEMBER_ME_KEY: &str = "remember_me";
pub const IDENTIFIER_KEY: &str = "user_identifier";

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Parse an expiry as sent by the backend.
///
/// Accepts RFC 3339 (`2125-01-01T00:00:00+07:00`) and the bare
/// `YYYY-MM-DD HH:MM:SS` form some endpoints use, read as UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn with_system_clock(store: Arc<dyn KeyValueStore>) -> Self {
        Self::new(store, Arc::new(SystemClock))
    }

    /// Store the token and its expiry in one write.
    /// Without an expiry any previously stored one is dropped.
    pub fn set_token(&self, token: &str, expires_at: Option<DateTime<Utc>>) -> Result<()> {
        match expires_at {
            Some(at) => {
                let at = at.to_rfc3339();
                self.store
                    .update(&[(TOKEN_KEY, token), (EXPIRES_AT_KEY, at.as_str())], &[])
            }
            None => self.store.update(&[(TOKEN_KEY, token)], &[EXPIRES_AT_KEY]),
        }
    }

    pub fn get_token(&self) -> Option<String> {
        match self.store.get(TOKEN_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(err) => {
                tracing::error!(error = %err, "failed to read session token");
                None
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.get_token().is_some()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self.store.get(EXPIRES_AT_KEY) {
            Ok(raw) => {
                let raw = raw?;
                let parsed = parse_instant(&raw);
                if parsed.is_none() {
                    tracing::warn!(value = %raw, "unparsable token expiry");
                }
                parsed
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to read token expiry");
                None
            }
        }
    }

    pub fn is_expired(&self) -> bool {
        if !self.is_active() {
            return true;
        }
        match self.expires_at() {
            Some(at) => self.clock.now() >= at,
            None => true,
        }
    }

    /// Token for an authenticated request, checked locally first
    pub fn require_valid(&self) -> Result<String> {
        let token = self.get_token().ok_or(PortalError::NotAuthenticated)?;
        if self.is_expired() {
            return Err(PortalError::SessionExpired);
        }
        Ok(token)
    }

    /// Persist a successful login: token, expiry and client profile
    pub fn establish(&self, login: &LoginData) -> Result<()> {
        let expires_at = match login.expires_at.as_deref() {
            Some(raw) => {
                let parsed = parse_instant(raw);
                if parsed.is_none() {
                    tracing::warn!(value = %raw, "login returned an unparsable expiry");
                }
                parsed
            }
            None => None,
        };
        if expires_at.is_none() {
            tracing::warn!("login returned no expiry; session will read as expired");
        }

        self.set_token(&login.token, expires_at)?;
        if let Some(client) = &login.client {
            self.set_user_data(client)?;
        }
        Ok(())
    }

    pub fn set_user_data(&self, client: &Client) -> Result<()> {
        let encoded = serde_json::to_string(client)?;
        self.store.set(USER_DATA_KEY, &encoded)
    }

    pub fn user_data(&self) -> Option<Client> {
        let raw = match self.store.get(USER_DATA_KEY) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::error!(error = %err, "failed to read user data");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(error = %err, "discarding malformed user data");
                None
            }
        }
    }

    /// Remove the token, expiry, profile and cached responses. Idempotent.
    pub fn clear(&self) -> Result<()> {
        let mut keys = vec![TOKEN_KEY, EXPIRES_AT_KEY, USER_DATA_KEY];
        keys.extend_from_slice(cache::CACHE_KEYS);
        self.store.remove_all(&keys)
    }

    pub fn remember_identifier(&self, identifier: &str) -> Result<()> {
        self.store
            .update(&[(REMEMBER_ME_KEY, "true"), (IDENTIFIER_KEY, identifier)], &[])
    }

    pub fn remembered_identifier(&self) -> Option<String> {
        self.store.get(IDENTIFIER_KEY).ok().flatten()
    }

    /// Clear the session; saved identifier survives only with "remember me"
    pub fn logout(&self) -> Result<()> {
        self.clear()?;
        let remember = self.store.get(REMEMBER_ME_KEY).ok().flatten();
        if remember.as_deref() != Some("true") {
            self.store.remove_all(&[IDENTIFIER_KEY, REMEMBER_ME_KEY])?;
        }
        Ok(())
    }
}
