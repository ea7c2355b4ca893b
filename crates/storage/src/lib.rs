//! Keyed storage for in-flight authorization state and issued tokens.
//!
//! Every value the flow engine persists (pending `state`/`nonce` values,
//! PKCE verifiers, issued token sets) goes through the [`KeyValueStore`]
//! trait, so the engine never touches a concrete backend directly. Keys are
//! scoped per flow via [`flow_key`], which is what keeps two concurrent
//! flows from clobbering each other's context.

mod entry;
pub mod error;
mod file;
mod memory;

pub use {
    entry::{Entry, now_ms},
    file::FileStore,
    memory::MemoryStore,
};

pub use error::{Error, Result};

/// Abstract key-value backend with explicit lifecycle.
///
/// Implementations must treat unreadable or corrupt persisted state as
/// absent rather than failing: a store that cannot decode what it finds on
/// disk reports the key as missing, forcing callers into a fresh flow.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the entry stored under `key`, expired entries included.
    fn get(&self, key: &str) -> Result<Option<Entry>>;

    /// Store `entry` under `key`, replacing any previous value.
    fn set(&self, key: &str, entry: Entry) -> Result<()>;

    /// Remove and return the entry under `key`.
    fn delete(&self, key: &str) -> Result<Option<Entry>>;

    /// All keys starting with `prefix` (empty prefix lists everything).
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove every key starting with `prefix`, returning how many went.
    fn clear(&self, prefix: &str) -> Result<usize>;
}

/// Build the storage key for a flow-scoped field, e.g. `"{flow}:state"`.
#[must_use]
pub fn flow_key(flow: &str, field: &str) -> String {
    format!("{flow}:{field}")
}
