//! Runtime configuration for the frontend binary.
//!
//! Resolution order:
//!
//! 1. Config file: `$XI_FRONTEND_CONFIG`, else `<config dir>/xi-frontend/config.json`
//!    (`~/.config` on Linux, `~/Library/Application Support` on macOS).
//!    A missing file means defaults.
//! 2. `XI_CORE_PATH` overrides `core_path`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Name of the engine executable.
const CORE_EXECUTABLE: &str = "xi-core";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Engine executable.
    pub core_path: PathBuf,
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Number of lines the CLI fills and prints.
    pub window_lines: usize,
    /// How long the CLI waits for engine traffic before giving up.
    pub idle_timeout_ms: u64,
    /// File the config was read from; `None` means built-in defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core_path: default_core_path(),
            log_filter: "xi_frontend=info".to_string(),
            window_lines: 40,
            idle_timeout_ms: 5_000,
            source: None,
        }
    }
}

/// `xi-core` next to the running executable if present, otherwise the bare
/// name so it resolves through `PATH`.
fn default_core_path() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(CORE_EXECUTABLE)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(CORE_EXECUTABLE))
}

/// Default config file location.
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("XI_FRONTEND_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("xi-frontend").join("config.json"))
}

impl Config {
    /// Load from the default location and apply environment overrides.
    ///
    /// Runs before logging is set up (the log filter is part of the
    /// config), so nothing is logged here; see `source`.
    pub fn load() -> Result<Self> {
        let mut config = match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        if let Some(core_path) = std::env::var_os("XI_CORE_PATH") {
            config.core_path = PathBuf::from(core_path);
        }
        Ok(config)
    }

    /// Parse a JSON config file. Absent keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
