//! Configuration management for symdex
//!
//! Supports loading configuration from TOML files with programmatic
//! overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,
}

/// Project/indexing-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Directory holding the persistent tables and the file-id registry.
    /// Defaults to a per-project directory under the user data dir.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Idle delay before buffered index results are synced (milliseconds)
    #[serde(default = "default_sync_timeout_ms")]
    pub sync_timeout_ms: u64,

    /// Number of buffered index results that forces an immediate sync
    #[serde(default = "default_sync_threshold")]
    pub sync_threshold: usize,

    /// Whether a file id may keep sources under several build roots
    #[serde(default = "default_true")]
    pub allow_multiple_sources: bool,

    /// Attempts for the best-effort registry save
    #[serde(default = "default_registry_save_retries")]
    pub registry_save_retries: u32,

    /// Back-off between registry save attempts (milliseconds)
    #[serde(default = "default_registry_save_backoff_ms")]
    pub registry_save_backoff_ms: u64,
}

/// File-watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Whether modification events drive re-indexing
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Coalescing window for modification events (milliseconds)
    #[serde(default = "default_dirty_timeout_ms")]
    pub dirty_timeout_ms: u64,

    /// Watch directories under the system paths as well
    #[serde(default)]
    pub watch_system_paths: bool,

    /// Path prefixes considered system paths
    #[serde(default = "default_system_paths")]
    pub system_paths: Vec<PathBuf>,
}

fn default_sync_timeout_ms() -> u64 {
    500
}

fn default_dirty_timeout_ms() -> u64 {
    100
}

fn default_sync_threshold() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_registry_save_retries() -> u32 {
    3
}

fn default_registry_save_backoff_ms() -> u64 {
    50
}

fn default_system_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/include"),
        PathBuf::from("/usr/local/include"),
        PathBuf::from("/usr/lib"),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            watcher: WatcherConfig::default(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            sync_timeout_ms: default_sync_timeout_ms(),
            sync_threshold: default_sync_threshold(),
            allow_multiple_sources: true,
            registry_save_retries: default_registry_save_retries(),
            registry_save_backoff_ms: default_registry_save_backoff_ms(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dirty_timeout_ms: default_dirty_timeout_ms(),
            watch_system_paths: false,
            system_paths: default_system_paths(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from default locations
    ///
    /// Search order:
    /// 1. SYMDEX_CONFIG environment variable
    /// 2. ./symdex.toml (current directory)
    /// 3. ~/.config/symdex/config.toml (user config)
    pub fn from_default_locations() -> Result<Option<(Self, PathBuf)>> {
        if let Ok(env_path) = std::env::var("SYMDEX_CONFIG") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                let config = Self::from_file(&path)?;
                return Ok(Some((config, path)));
            }
        }

        let local_path = PathBuf::from("symdex.toml");
        if local_path.exists() {
            let config = Self::from_file(&local_path)?;
            return Ok(Some((config, local_path)));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_path = config_dir.join("symdex").join("config.toml");
            if user_path.exists() {
                let config = Self::from_file(&user_path)?;
                return Ok(Some((config, user_path)));
            }
        }

        Ok(None)
    }

    /// Resolved data directory for a project rooted at `project_root`.
    pub fn data_dir_for(&self, project_root: &Path) -> PathBuf {
        if let Some(ref dir) = self.project.data_dir {
            return dir.clone();
        }
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        // Flatten the project root into a single directory component.
        let encoded: String = project_root
            .to_string_lossy()
            .chars()
            .map(|c| {
                if c == '/' || c == '\\' || c == ':' {
                    '_'
                } else {
                    c
                }
            })
            .collect();
        base.join("symdex").join(encoded)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.project.sync_timeout_ms)
    }

    pub fn dirty_timeout(&self) -> Duration {
        Duration::from_millis(self.watcher.dirty_timeout_ms)
    }

    pub fn registry_save_backoff(&self) -> Duration {
        Duration::from_millis(self.project.registry_save_backoff_ms)
    }

    /// Whether `path` falls under a configured system path prefix.
    pub fn is_system_path(&self, path: &Path) -> bool {
        self.watcher
            .system_paths
            .iter()
            .any(|prefix| path.starts_with(prefix))
    }

    /// Generate a template configuration file
    pub fn generate_template() -> String {
        r#"# symdex configuration
# Generated template - customize as needed

[project]
# Directory for persistent tables (default: per-project under the user data dir)
# data_dir = "/var/lib/symdex/my-project"

# Idle delay before buffered index results are synced (milliseconds)
sync_timeout_ms = 500

# Buffered results that force an immediate sync
sync_threshold = 10

# Keep one source per file across build roots when false
allow_multiple_sources = true

[watcher]
# React to filesystem modification events
enabled = true

# Coalescing window for modification events (milliseconds)
dirty_timeout_ms = 100

# Watch directories under system paths too
watch_system_paths = false
system_paths = ["/usr/include", "/usr/local/include", "/usr/lib"]
"#
        .to_string()
    }

    /// Write template config to the specified path
    pub fn write_template(path: &Path) -> Result<()> {
        let template = Self::generate_template();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, template)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Merge programmatic overrides into the configuration
    pub fn with_overrides(mut self, data_dir: Option<PathBuf>, watch: Option<bool>) -> Self {
        if data_dir.is_some() {
            self.project.data_dir = data_dir;
        }
        if let Some(enabled) = watch {
            self.watcher.enabled = enabled;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.project.sync_timeout_ms, 500);
        assert_eq!(config.watcher.dirty_timeout_ms, 100);
        assert!(config.watcher.enabled);
        assert!(!config.watcher.watch_system_paths);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[project]
sync_threshold = 3

[watcher]
enabled = false
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.project.sync_threshold, 3);
        assert!(!config.watcher.enabled);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.project.sync_timeout_ms, 500);
    }

    #[test]
    fn test_generate_template_parses() {
        let template = Config::generate_template();
        let config: Config = toml::from_str(&template).unwrap();
        assert_eq!(config.project.sync_timeout_ms, 500);
    }

    #[test]
    fn test_is_system_path() {
        let config = Config::default();
        assert!(config.is_system_path(Path::new("/usr/include/stdio.h")));
        assert!(!config.is_system_path(Path::new("/home/dev/project/a.h")));
    }

    #[test]
    fn test_data_dir_override() {
        let config = Config::default().with_overrides(Some(PathBuf::from("/tmp/sd-data")), None);
        assert_eq!(
            config.data_dir_for(Path::new("/home/dev/p")),
            PathBuf::from("/tmp/sd-data")
        );
    }
}
