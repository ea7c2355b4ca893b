use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A stored value plus its lifecycle timestamps.
///
/// `expires_at_ms` is `None` for values that only go away when explicitly
/// deleted (issued tokens carry their own expiry inside the value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub value: serde_json::Value,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl Entry {
    /// An entry with no storage-level expiry.
    #[must_use]
    pub fn persistent(value: serde_json::Value) -> Self {
        Self {
            value,
            created_at_ms: now_ms(),
            expires_at_ms: None,
        }
    }

    /// An entry that expires `ttl` after creation.
    #[must_use]
    pub fn expiring(value: serde_json::Value, ttl: std::time::Duration) -> Self {
        let created = now_ms();
        Self {
            value,
            created_at_ms: created,
            expires_at_ms: Some(created.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))),
        }
    }

    /// Expired exactly at the boundary: `now >= expires_at`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_ms())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistent_entry_never_expires() {
        let entry = Entry::persistent(serde_json::json!("v"));
        assert!(!entry.is_expired_at(u64::MAX - 1));
    }

    #[test]
    fn expiring_entry_boundary_is_expired() {
        let entry = Entry::expiring(serde_json::json!("v"), std::time::Duration::from_secs(60));
        let expires_at = entry.expires_at_ms.unwrap();
        assert!(!entry.is_expired_at(expires_at - 1));
        assert!(entry.is_expired_at(expires_at));
        assert!(entry.is_expired_at(expires_at + 1));
    }

    #[test]
    fn entry_roundtrips_through_json() {
        let entry = Entry::expiring(
            serde_json::json!({"state": "abc"}),
            std::time::Duration::from_secs(1800),
        );
        let raw = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.value["state"], "abc");
        assert_eq!(back.expires_at_ms, entry.expires_at_ms);
    }
}
