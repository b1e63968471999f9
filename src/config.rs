// Configuration for the profiler subsystem
//
// Configuration is loaded in order of precedence:
// 1. Values passed explicitly to `Database::open_with_config` (highest priority)
// 2. Config file (`[profiler]` table)
// 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Profiler subsystem configuration
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Directory where the built-in JSON Lines backend writes profile output
    pub data_dir: PathBuf,

    /// Backend plugin used when `START_SESSION` names none
    pub default_plugin: String,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_plugin: "default".to_string(),
        }
    }
}

/// Default profile-output directory: `<platform data dir>/dbspy/profiles`,
/// falling back to a relative path when the platform dir is unavailable.
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("dbspy").join("profiles"))
        .unwrap_or_else(|| PathBuf::from("./profiles"))
}

/// On-disk representation of the config file
///
/// All fields are optional; missing fields fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub profiler: Option<ProfilerFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilerFileConfig {
    pub data_dir: Option<PathBuf>,
    pub default_plugin: Option<String>,
}

impl ProfilerConfig {
    /// Parse a TOML config string, filling gaps with defaults.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        let file: FileConfig = toml::from_str(text)?;
        let mut config = Self::default();

        if let Some(profiler) = file.profiler {
            if let Some(data_dir) = profiler.data_dir {
                config.data_dir = data_dir;
            }
            if let Some(default_plugin) = profiler.default_plugin {
                config.default_plugin = default_plugin;
            }
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProfilerConfig::default();
        assert_eq!(config.default_plugin, "default");
        assert!(config.data_dir.ends_with("profiles"));
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = ProfilerConfig::from_toml_str("").unwrap();
        assert_eq!(config.default_plugin, "default");
    }

    #[test]
    fn test_partial_file_overrides() {
        let config = ProfilerConfig::from_toml_str(
            r#"
            [profiler]
            default_plugin = "trace"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_plugin, "trace");
        assert!(config.data_dir.ends_with("profiles"));
    }

    #[test]
    fn test_full_file() {
        let config = ProfilerConfig::from_toml_str(
            r#"
            [profiler]
            data_dir = "/tmp/profiles"
            default_plugin = "jsonl"
            "#,
        )
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/profiles"));
        assert_eq!(config.default_plugin, "jsonl");
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        assert!(ProfilerConfig::from_toml_str("profiler = 3").is_err());
    }
}
