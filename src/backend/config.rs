//! Backend Configuration
//!
//! Handles portable mode detection, settings, and path resolution.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::endpoint::{BackendEndpoint, DEFAULT_BASE_URL};
use super::error::ConfigError;

/// Explicit settings file location
pub const SETTINGS_PATH_ENV: &str = "DESK_BACKEND_SETTINGS";
/// Overrides `backend.base_url`
pub const BASE_URL_ENV: &str = "DESK_BACKEND_URL";
/// Overrides `backend.executable`
pub const EXECUTABLE_ENV: &str = "DESK_BACKEND_EXE";
/// Overrides `backend.strategy`
pub const STRATEGY_ENV: &str = "DESK_BACKEND_STRATEGY";
/// Runtime environment root or runtime binary for the embedded strategy
pub const RUNTIME_HOME_ENV: &str = "DESK_RUNTIME_HOME";

/// How the backend is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Separate executable reached over HTTP
    #[default]
    Process,
    /// Backend module loaded into this process
    Embedded,
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "process" | "http" => Ok(StrategyKind::Process),
            "embedded" | "python" => Ok(StrategyKind::Embedded),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// `backend` section of settings.json
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub strategy: StrategyKind,
    pub base_url: String,
    pub executable: Option<PathBuf>,
    /// Extra command line arguments for the executable
    pub args: Vec<String>,
    pub health_path: String,
    pub status_path: String,
    pub request_timeout_ms: u64,
    pub start_grace_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Process,
            base_url: DEFAULT_BASE_URL.to_string(),
            executable: None,
            args: Vec::new(),
            health_path: "/health".to_string(),
            status_path: "/status".to_string(),
            request_timeout_ms: 5000,
            start_grace_ms: 250,
            stop_timeout_ms: 1000,
        }
    }
}

impl BackendSettings {
    pub fn endpoint(&self) -> Result<BackendEndpoint, ConfigError> {
        BackendEndpoint::parse(&self.base_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// `runtime` section of settings.json (embedded strategy)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Environment root or runtime binary
    pub home: Option<PathBuf>,
    /// Backend module to import
    pub module: String,
    pub health_entry: String,
    pub status_entry: String,
    /// How many parent directories to search for an environment
    pub search_depth: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            home: None,
            module: "main".to_string(),
            health_entry: "health_check".to_string(),
            status_entry: "ollama_status".to_string(),
            search_depth: 3,
        }
    }
}

/// Settings file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub runtime: RuntimeSettings,
}

impl Settings {
    /// Load settings from the default location, then apply environment overrides.
    ///
    /// A missing file gives defaults; a broken one is logged and ignored.
    pub fn load() -> Self {
        let path = get_settings_path(detect_portable_mode().as_ref());
        let mut settings = match Self::load_from(&path) {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(e) => {
                log::warn!("[Backend] {}", e);
                Settings::default()
            }
        };
        settings.apply_env();
        settings
    }

    /// Read one settings file. `Ok(None)` when it does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("[Backend] Loaded settings from {:?}", path);
        Ok(Some(settings))
    }

    /// Apply `DESK_*` environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| env::var(key).ok().filter(|v| !v.trim().is_empty()));
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(BASE_URL_ENV) {
            self.backend.base_url = url;
        }
        if let Some(exe) = var(EXECUTABLE_ENV) {
            self.backend.executable = Some(PathBuf::from(exe));
        }
        if let Some(strategy) = var(STRATEGY_ENV) {
            match strategy.parse() {
                Ok(kind) => self.backend.strategy = kind,
                Err(e) => log::warn!("[Backend] Ignoring {}: {}", STRATEGY_ENV, e),
            }
        }
        if let Some(home) = var(RUNTIME_HOME_ENV) {
            self.runtime.home = Some(PathBuf::from(home));
        }
    }
}

/// Directory containing the running executable
pub fn app_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Detect if running in portable mode
///
/// Portable mode is enabled by a `.portable` marker file next to the
/// executable. Returns the portable data directory or None.
pub fn detect_portable_mode() -> Option<PathBuf> {
    portable_data_dir(&app_dir())
}

fn portable_data_dir(app_dir: &Path) -> Option<PathBuf> {
    if !app_dir.join(".portable").exists() {
        return None;
    }

    let data = app_dir.join("data");
    if !data.exists() {
        if let Err(e) = fs::create_dir_all(&data) {
            log::error!("[Backend] Failed to create portable data dir: {}", e);
            return None;
        }
    }

    log::info!("[Backend] Portable mode enabled, data: {:?}", data);
    Some(data)
}

/// Data directory for settings
pub fn get_data_dir(portable_data_dir: Option<&PathBuf>) -> PathBuf {
    if let Some(dir) = portable_data_dir {
        return dir.clone();
    }

    dirs::config_dir()
        .map(|d| d.join("desk-backend"))
        .or_else(|| dirs::home_dir().map(|h| h.join(".desk-backend")))
        .unwrap_or_else(|| PathBuf::from(".desk-backend"))
}

/// Get settings.json path
pub fn get_settings_path(portable_data_dir: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = env::var_os(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    get_data_dir(portable_data_dir).join("settings.json")
}
