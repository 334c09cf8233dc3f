//! TOML configuration for the `vidmode-xrandr` binary.
//!
//! Read from `$XDG_CONFIG_HOME/vidmode/config.toml` (or
//! `~/.config/vidmode/config.toml`), or from a path given on the command
//! line.  A missing file is not an error: every field has a default.
//!
//! ```toml
//! hold_seconds = 5
//!
//! [engine]
//! device_name = "screen0"
//! instance_id = 0
//! log_level = "debug"
//!
//! [modeline]
//! pclock = 6700000
//! hactive = 320
//! hbegin = 336
//! hend = 367
//! htotal = 426
//! vactive = 240
//! vbegin = 244
//! vend = 247
//! vtotal = 262
//! vfreq = 60.02
//! ```
//!
//! Fields annotated with `#[serde(default = "some_fn")]` take `some_fn()`
//! when absent, so older or partial files keep working.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vidmode_core::ModelineRequest;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Mode to register and switch to; the binary only lists modes when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modeline: Option<ModelineRequest>,
    /// How long to keep the mode before restoring the desktop.
    #[serde(default = "default_hold_seconds")]
    pub hold_seconds: u64,
}

/// Engine construction settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// `"auto"`, a connector name, or `"screenN"`.
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Namespaces the names of modes this process registers.
    #[serde(default)]
    pub instance_id: u32,
    /// `tracing` log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_device_name() -> String {
    "auto".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_hold_seconds() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            modeline: None,
            hold_seconds: default_hold_seconds(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            instance_id: 0,
            log_level: default_log_level(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when neither
/// `XDG_CONFIG_HOME` nor `HOME` is set.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    let base = config_base(
        std::env::var_os("XDG_CONFIG_HOME"),
        std::env::var_os("HOME"),
    )
    .ok_or(ConfigError::NoPlatformConfigDir)?;
    Ok(base.join("vidmode").join("config.toml"))
}

/// `XDG_CONFIG_HOME`, or `$HOME/.config` when it is unset, empty or
/// relative.
fn config_base(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    xdg_config_home
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(|| {
            home.filter(|h| !h.is_empty())
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

/// Loads the default config file, returning `AppConfig::default()` if it
/// does not exist.
///
/// # Errors
///
/// See [`load_config_from`].
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads `path`, returning `AppConfig::default()` if it does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("vidmode_{tag}_{}_{nanos}", std::process::id()))
    }

    #[test]
    fn test_config_base_prefers_absolute_xdg_config_home() {
        let base = config_base(Some("/etc/xdg-user".into()), Some("/home/u".into()));
        assert_eq!(base, Some(PathBuf::from("/etc/xdg-user")));
    }

    #[test]
    fn test_config_base_ignores_empty_xdg_config_home() {
        let base = config_base(Some(OsString::new()), Some("/home/u".into()));
        assert_eq!(base, Some(PathBuf::from("/home/u/.config")));
    }

    #[test]
    fn test_config_base_ignores_relative_xdg_config_home() {
        let base = config_base(Some("cfg".into()), Some("/home/u".into()));
        assert_eq!(base, Some(PathBuf::from("/home/u/.config")));
    }

    #[test]
    fn test_config_base_without_any_home_is_none() {
        assert_eq!(config_base(Some(OsString::new()), Some(OsString::new())), None);
        assert_eq!(config_base(None, None), None);
    }

    #[test]
    fn test_app_config_default_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.engine.device_name, "auto");
        assert_eq!(cfg.engine.instance_id, 0);
        assert_eq!(cfg.engine.log_level, "info");
        assert_eq!(cfg.hold_seconds, 5);
        assert!(cfg.modeline.is_none());
    }

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_engine_overrides_defaults() {
        // Arrange
        let toml_str = r#"
[engine]
device_name = "screen1"
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");

        // Assert
        assert_eq!(cfg.engine.device_name, "screen1");
        assert_eq!(cfg.engine.log_level, "info");
    }

    #[test]
    fn test_deserialize_modeline_section() {
        let toml_str = r#"
hold_seconds = 2

[modeline]
pclock = 6700000
hactive = 320
hbegin = 336
hend = 367
htotal = 426
vactive = 240
vbegin = 244
vend = 247
vtotal = 262
vfreq = 60.02
"#;

        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize modeline");

        let modeline = cfg.modeline.expect("modeline present");
        assert_eq!(modeline.hactive, 320);
        assert!(modeline.platform_handle.is_none());
        assert!(modeline.validate().is_ok());
        assert_eq!(cfg.hold_seconds, 2);
    }

    #[test]
    fn test_deserialize_invalid_toml_returns_parse_error() {
        let result: Result<AppConfig, toml::de::Error> = toml::from_str("[[[ not valid toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_from_missing_file_is_default() {
        let path = scratch_dir("missing").join("config.toml");
        let cfg = load_config_from(&path).expect("missing file is not an error");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_save_and_load_config_round_trip() {
        // Arrange
        let dir = scratch_dir("roundtrip");
        let path = dir.join("nested").join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.engine.device_name = "DP-2".to_string();
        cfg.engine.log_level = "debug".to_string();

        // Act
        save_config_to(&path, &cfg).expect("save");
        let loaded = load_config_from(&path).expect("load");

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_config_file_path_ends_with_vidmode_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(path.ends_with("vidmode/config.toml"), "got {path:?}");
        }
    }
}
