//! Short-lived response cache and payment resume fields.

use crate::session::Clock;
use crate::storage::KeyValueStore;
use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const INVOICE_DATA_KEY: &str = "invoiceData";
pub const CACHE_TIMESTAMP_KEY: &str = "cacheTimestamp";
pub const LAST_LOGIN_KEY: &str = "lastLogin";
pub const CURRENT_INVOICE_KEY: &str = "currentInvoice";
pub const SELECTED_GATEWAY_KEY: &str = "selectedGateway";

/// Everything the cache owns; cleared with the session
pub const CACHE_KEYS: &[&str] = &[
    INVOICE_DATA_KEY,
    CACHE_TIMESTAMP_KEY,
    LAST_LOGIN_KEY,
    CURRENT_INVOICE_KEY,
    SELECTED_GATEWAY_KEY,
];

pub const DEFAULT_CACHE_DURATION_SECS: u64 = 300;
/// Longest window accepted from config: one day
pub const MAX_CACHE_DURATION_SECS: u64 = 86_400;

pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    duration: Duration,
}

fn window(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| {
            tracing::warn!(secs, "cache duration out of range, using default");
            Duration::seconds(DEFAULT_CACHE_DURATION_SECS as i64)
        })
}

impl Cache {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>, duration_secs: u64) -> Self {
        Self {
            store,
            clock,
            duration: window(duration_secs),
        }
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(crate::error::PortalError::from)
            .and_then(|encoded| self.store.set(key, &encoded));
        if let Err(err) = result {
            tracing::warn!(key, error = %err, "failed to save to cache");
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(raw) => raw?,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to read from cache");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "discarding malformed cache entry");
                None
            }
        }
    }

    fn millis(&self, key: &str) -> Option<i64> {
        self.store.get(key).ok().flatten()?.trim().parse().ok()
    }

    fn stamp(&self, key: &str) {
        let now = self.clock.now().timestamp_millis().to_string();
        if let Err(err) = self.store.set(key, &now) {
            tracing::warn!(key, error = %err, "failed to write cache timestamp");
        }
    }

    /// Valid when filled within the cache window and not older than the last login
    pub fn is_valid(&self) -> bool {
        let (Some(cached_at), Some(login_at)) =
            (self.millis(CACHE_TIMESTAMP_KEY), self.millis(LAST_LOGIN_KEY))
        else {
            return false;
        };
        let now = self.clock.now().timestamp_millis();
        now - cached_at < self.duration.num_milliseconds() && login_at >= cached_at
    }

    /// Mark cached data as fresh
    pub fn touch(&self) {
        self.stamp(CACHE_TIMESTAMP_KEY);
    }

    pub fn mark_login(&self) {
        self.stamp(LAST_LOGIN_KEY);
    }

    /// Remember which invoice and gateway the user was paying with
    pub fn remember_payment(&self, invoice_id: &str, gateway: &str) {
        self.save(CURRENT_INVOICE_KEY, &invoice_id);
        self.save(SELECTED_GATEWAY_KEY, &gateway);
    }

    pub fn resume_payment(&self) -> Option<(String, String)> {
        let invoice: String = self.get(CURRENT_INVOICE_KEY)?;
        let gateway: String = self.get(SELECTED_GATEWAY_KEY)?;
        Some((invoice, gateway))
    }

    pub fn clear(&self) {
        if let Err(err) = self.store.remove_all(CACHE_KEYS) {
            tracing::warn!(error = %err, "failed to clear cache");
        }
    }
}
