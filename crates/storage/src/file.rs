use std::{collections::HashMap, path::PathBuf};

use tracing::{debug, warn};

use crate::{Entry, KeyValueStore, Result};

/// File-based backend: a single JSON map on disk.
///
/// Read failures and corrupt content are logged and treated as an empty
/// store, so a damaged state file forces a fresh flow instead of wedging
/// the engine.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read_map(&self) -> HashMap<String, Entry> {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "state file not found");
                return HashMap::new();
            },
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file read failed");
                return HashMap::new();
            },
        };

        match serde_json::from_str(&data) {
            Ok(m) => m,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file parse failed, starting fresh");
                HashMap::new()
            },
        }
    }

    fn write_map(&self, map: &HashMap<String, Entry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = serde_json::to_string_pretty(map)?;
        std::fs::write(&self.path, &data)?;

        // Entries can hold token material, keep the file private on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Entry>> {
        Ok(self.read_map().get(key).cloned())
    }

    fn set(&self, key: &str, entry: Entry) -> Result<()> {
        let mut map = self.read_map();
        map.insert(key.to_string(), entry);
        self.write_map(&map)
    }

    fn delete(&self, key: &str) -> Result<Option<Entry>> {
        let mut map = self.read_map();
        let removed = map.remove(key);
        if removed.is_some() {
            self.write_map(&map)?;
        }
        Ok(removed)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .read_map()
            .into_keys()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    fn clear(&self, prefix: &str) -> Result<usize> {
        let mut map = self.read_map();
        let doomed: Vec<String> = map.keys().filter(|k| k.starts_with(prefix)).cloned().collect();
        for key in &doomed {
            map.remove(key);
        }
        if !doomed.is_empty() {
            self.write_map(&map)?;
        }
        Ok(doomed.len())
    }
}
