//! Configuration file lookup, loading and command line overrides.

use super::{ConfigError, ConfigFile};
use std::path::{Path, PathBuf};

/// Configuration file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "pisync.toml";

/// Get the per-user configuration directory.
pub fn get_config_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "providenceit", "pisync")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Get the per-user configuration file path.
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("config.toml")
}

/// Pick the configuration file: an explicit path always wins, then
/// `./pisync.toml`, then the per-user file. `None` means run on defaults.
pub fn find_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }

    let user = get_config_path();
    user.exists().then_some(user)
}

/// Read and parse one configuration file.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse(format!("{}: {}", path.display(), e)))
}

/// Load the configuration, falling back to defaults when no file exists.
pub fn load_config(explicit: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    match find_config_path(explicit) {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            load_config_file(&path)
        }
        None => {
            tracing::info!("No configuration file found, using defaults");
            Ok(ConfigFile::default())
        }
    }
}

/// Write a configuration file, creating its directory if needed.
pub fn save_config(config: &ConfigFile, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io(e.to_string()))?;
    }

    let content = to_toml(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::Io(e.to_string()))?;

    Ok(())
}

/// Render a configuration as TOML.
pub fn to_toml(config: &ConfigFile) -> Result<String, ConfigError> {
    toml::to_string_pretty(config).map_err(|e| ConfigError::Serialize(e.to_string()))
}

/// Command line values that override the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub role: Option<String>,
    pub media_file: Option<PathBuf>,
    /// Bounded run with this many cycles
    pub repeat_count: Option<u32>,
    pub loop_forever: bool,
    pub windowed: bool,
    pub simulate: bool,
    pub follower_mode: Option<String>,
}

impl Overrides {
    /// Apply to the raw file before validation.
    pub fn apply(&self, file: &mut ConfigFile) {
        if let Some(role) = &self.role {
            file.role = role.clone();
        }
        if let Some(media) = &self.media_file {
            file.playback.media_file = Some(media.clone());
        }
        if let Some(count) = self.repeat_count {
            file.playback.repeat_count = count;
            file.playback.loop_forever = false;
        }
        if self.loop_forever {
            file.playback.loop_forever = true;
        }
        if self.windowed {
            file.playback.fullscreen = false;
        }
        if self.simulate {
            file.gpio.simulate = true;
        }
        if let Some(mode) = &self.follower_mode {
            file.follower.mode = mode.clone();
        }
    }
}
