//! Single-use CSRF/replay guard for `state` values.
//!
//! Tokens are keyed by value under a `csrf:` prefix in the injected store.
//! Validation always consumes the entry, so a replayed value fails even
//! when the first validation succeeded. Nonces stay out of this namespace:
//! they are checked against the id_token claim, never against the echoed
//! state.

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use flowlab_storage::{Entry, KeyValueStore, now_ms};

use crate::{Result, pkce::generate_state};

const CSRF_PREFIX: &str = "csrf:";

/// Default token lifetime: 30 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

/// Active/expired token counts, for diagnostics only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CsrfStats {
    pub active: usize,
    pub expired: usize,
}

/// Generates and validates single-use anti-forgery tokens.
#[derive(Clone)]
pub struct CsrfGuard {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl CsrfGuard {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL)
    }

    pub fn with_ttl(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Mint a new token and register it for one future validation.
    pub fn generate(&self) -> Result<String> {
        let token = generate_state();
        self.register(&token)?;
        Ok(token)
    }

    /// Register an externally generated token for one future validation.
    pub fn register(&self, token: &str) -> Result<()> {
        let key = format!("{CSRF_PREFIX}{token}");
        self.store
            .set(&key, Entry::expiring(serde_json::Value::Null, self.ttl))?;
        debug!(ttl_secs = self.ttl.as_secs(), "registered csrf token");
        Ok(())
    }

    /// Validate and consume `candidate`.
    ///
    /// True only when the exact value exists, is unexpired, and was never
    /// consumed before. The entry is deleted regardless of outcome, and
    /// failures never raise: a storage error is logged and reported as
    /// invalid, which callers treat as flow-fatal.
    pub fn validate(&self, candidate: &str) -> bool {
        let key = format!("{CSRF_PREFIX}{candidate}");
        match self.store.delete(&key) {
            Ok(Some(entry)) if !entry.is_expired() => true,
            Ok(Some(_)) => {
                debug!("csrf token expired");
                false
            },
            Ok(None) => {
                debug!("csrf token unknown or already consumed");
                false
            },
            Err(e) => {
                warn!(error = %e, "csrf store unavailable, rejecting token");
                false
            },
        }
    }

    /// Count active and expired tokens currently registered.
    pub fn stats(&self) -> Result<CsrfStats> {
        let now = now_ms();
        let mut stats = CsrfStats::default();
        for key in self.store.keys(CSRF_PREFIX)? {
            if let Some(entry) = self.store.get(&key)? {
                if entry.is_expired_at(now) {
                    stats.expired += 1;
                } else {
                    stats.active += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Drop expired tokens, returning how many were removed.
    pub fn prune(&self) -> Result<usize> {
        let now = now_ms();
        let mut removed = 0;
        for key in self.store.keys(CSRF_PREFIX)? {
            if let Some(entry) = self.store.get(&key)?
                && entry.is_expired_at(now)
            {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard").field("ttl", &self.ttl).finish()
    }
}
