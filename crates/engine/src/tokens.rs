//! Token persistence and lifecycle.
//!
//! Token sets are stored per flow key under `{flow}:tokens`, so concurrent
//! flows never overwrite each other. Validity is computed from the locally
//! recorded issue time; a set whose freshness cannot be determined is never
//! handed out as valid.

use std::sync::Arc;

use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use flowlab_metrics::{counter, tokens as token_metrics};

use flowlab_storage::{Entry, KeyValueStore, flow_key, now_ms};

use crate::{
    Result,
    types::{Freshness, TokenSet},
};

const TOKENS_FIELD: &str = "tokens";

/// Informational usage counters; these never gate correctness.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TokenStats {
    /// Token sets currently in storage.
    pub stored: usize,
    /// Of those, how many are expired.
    pub expired: usize,
    /// Mean provider-reported lifetime in seconds, where known.
    pub average_lifetime_secs: Option<f64>,
}

/// Owns token storage after the exchange step.
#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn KeyValueStore>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Persist a token set for a flow, replacing any previous set.
    pub fn store(&self, flow: &str, tokens: &TokenSet) -> Result<()> {
        let value = serde_json::to_value(tokens).map_err(flowlab_storage::Error::from)?;
        self.store
            .set(&flow_key(flow, TOKENS_FIELD), Entry::persistent(value))?;
        #[cfg(feature = "metrics")]
        counter!(token_metrics::STORED_TOTAL).increment(1);
        debug!(flow, "token set stored");
        Ok(())
    }

    /// The stored token set regardless of freshness, if readable.
    ///
    /// Unreadable or corrupt entries are treated as absent: stale state
    /// forces a fresh flow instead of an error.
    #[must_use]
    pub fn get(&self, flow: &str) -> Option<TokenSet> {
        let entry = match self.store.get(&flow_key(flow, TOKENS_FIELD)) {
            Ok(e) => e?,
            Err(e) => {
                warn!(flow, error = %e, "token store read failed");
                return None;
            },
        };
        match serde_json::from_value(entry.value) {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!(flow, error = %e, "stored token set is corrupt, ignoring");
                None
            },
        }
    }

    /// The stored token set, only when positively fresh.
    ///
    /// Missing, expired, and unknown-freshness sets all come back as
    /// `None`.
    #[must_use]
    pub fn get_valid(&self, flow: &str) -> Option<TokenSet> {
        let tokens = self.get(flow)?;
        match tokens.freshness() {
            Freshness::Fresh => Some(tokens),
            Freshness::Expired => {
                debug!(flow, "stored token set has expired");
                None
            },
            Freshness::Unknown => {
                debug!(flow, "stored token set has no recorded issue time");
                None
            },
        }
    }

    /// True when the set's expiry is known and has passed.
    #[must_use]
    pub fn is_expired(tokens: &TokenSet) -> bool {
        tokens.is_expired()
    }

    /// Remove the stored token set for a flow.
    pub fn clear(&self, flow: &str) -> Result<()> {
        self.store.delete(&flow_key(flow, TOKENS_FIELD))?;
        debug!(flow, "token set cleared");
        Ok(())
    }

    /// Delete every expired token set, returning how many were removed.
    pub fn prune(&self) -> Result<usize> {
        let mut removed = 0;
        for key in self.token_keys()? {
            let Some(entry) = self.store.get(&key)? else {
                continue;
            };
            let expired = serde_json::from_value::<TokenSet>(entry.value)
                .map(|t| t.is_expired())
                // Undecodable entries are dead weight, drop them too.
                .unwrap_or(true);
            if expired {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        #[cfg(feature = "metrics")]
        counter!(token_metrics::PRUNED_TOTAL).increment(removed as u64);
        Ok(removed)
    }

    /// Usage stats across all flows sharing this store.
    pub fn stats(&self) -> Result<TokenStats> {
        let now = now_ms();
        let mut stats = TokenStats::default();
        let mut lifetimes = Vec::new();

        for key in self.token_keys()? {
            let Some(entry) = self.store.get(&key)? else {
                continue;
            };
            let Ok(tokens) = serde_json::from_value::<TokenSet>(entry.value) else {
                continue;
            };
            stats.stored += 1;
            if tokens.freshness_at(now) == Freshness::Expired {
                stats.expired += 1;
            }
            if let Some(lifetime) = tokens.expires_in {
                lifetimes.push(lifetime as f64);
            }
        }

        if !lifetimes.is_empty() {
            stats.average_lifetime_secs =
                Some(lifetimes.iter().sum::<f64>() / lifetimes.len() as f64);
        }
        Ok(stats)
    }

    fn token_keys(&self) -> Result<Vec<String>> {
        let suffix = format!(":{TOKENS_FIELD}");
        Ok(self
            .store
            .keys("")?
            .into_iter()
            .filter(|k| k.ends_with(&suffix))
            .collect())
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager").finish()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {flowlab_storage::MemoryStore, secrecy::Secret};

    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new(Arc::new(MemoryStore::new()))
    }

    fn token_set(issued_at_ms: Option<u64>, expires_in: Option<u64>) -> TokenSet {
        TokenSet {
            access_token: Some(Secret::new("AT".into())),
            id_token: None,
            refresh_token: None,
            token_type: Some("Bearer".into()),
            expires_in,
            scope: Some("openid".into()),
            issued_at_ms,
        }
    }

    #[test]
    fn fresh_tokens_round_trip() {
        let manager = manager();
        manager
            .store("f1", &token_set(Some(now_ms()), Some(3600)))
            .unwrap();

        let loaded = manager.get_valid("f1").expect("should be valid");
        assert_eq!(loaded.expires_in, Some(3600));
    }

    #[test]
    fn missing_flow_returns_none() {
        assert!(manager().get_valid("nope").is_none());
    }

    #[test]
    fn expired_tokens_are_not_valid() {
        let manager = manager();
        // Issued an hour and a second ago with a one-hour lifetime.
        let issued = now_ms().saturating_sub(3_601_000);
        manager.store("f1", &token_set(Some(issued), Some(3600))).unwrap();

        assert!(manager.get_valid("f1").is_none());
        // Still readable for inspection.
        assert!(manager.get("f1").is_some());
    }

    #[test]
    fn unknown_freshness_is_not_valid() {
        let manager = manager();
        manager.store("f1", &token_set(None, Some(3600))).unwrap();
        assert!(manager.get_valid("f1").is_none());
    }

    #[test]
    fn flows_are_isolated() {
        let manager = manager();
        manager
            .store("f1", &token_set(Some(now_ms()), Some(100)))
            .unwrap();
        manager
            .store("f2", &token_set(Some(now_ms()), Some(200)))
            .unwrap();

        assert_eq!(manager.get_valid("f1").unwrap().expires_in, Some(100));
        assert_eq!(manager.get_valid("f2").unwrap().expires_in, Some(200));

        manager.clear("f1").unwrap();
        assert!(manager.get("f1").is_none());
        assert!(manager.get("f2").is_some());
    }

    #[test]
    fn prune_drops_expired_sets_only() {
        let manager = manager();
        let stale = now_ms().saturating_sub(10_000_000);
        manager.store("old", &token_set(Some(stale), Some(60))).unwrap();
        manager
            .store("new", &token_set(Some(now_ms()), Some(3600)))
            .unwrap();

        assert_eq!(manager.prune().unwrap(), 1);
        assert!(manager.get("old").is_none());
        assert!(manager.get("new").is_some());
    }

    #[test]
    fn stats_count_stored_and_expired() {
        let manager = manager();
        let stale = now_ms().saturating_sub(10_000_000);
        manager.store("a", &token_set(Some(stale), Some(60))).unwrap();
        manager
            .store("b", &token_set(Some(now_ms()), Some(120)))
            .unwrap();

        let stats = manager.stats().unwrap();
        assert_eq!(stats.stored, 2);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.average_lifetime_secs, Some(90.0));
    }
}
