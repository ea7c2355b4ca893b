use std::path::PathBuf;

/// Returns the flowlab config directory.
///
/// Resolution order:
/// 1. `FLOWLAB_CONFIG_DIR`
/// 2. the platform config dir (`~/.config/flowlab` on Linux)
/// 3. `.config/flowlab` relative to the working directory
pub fn flowlab_config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLOWLAB_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    directories::ProjectDirs::from("", "", "flowlab")
        .map(|d| d.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".config/flowlab"))
}
