//! File-based config loader (`cameo-pilot.json`) with env-var fallback.
//!
//! Every field resolves as: JSON field → env var → built-in default. The
//! store credential is required for live runs but the loader itself never
//! fails; preflight reports what is missing.

use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CONFIG_PATH: &str = "CAMEO_PILOT_CONFIG";
pub const ENV_STORE_URL: &str = "CAMEO_STORE_URL";
pub const ENV_STORE_KEY: &str = "CAMEO_STORE_KEY";
pub const ENV_STORE_TABLE: &str = "CAMEO_STORE_TABLE";
pub const ENV_HEADLESS: &str = "CAMEO_HEADLESS";
pub const ENV_PROFILE_DIR: &str = "CAMEO_PROFILE_DIR";
pub const ENV_DEBUG_DIR: &str = "CAMEO_DEBUG_DIR";
pub const ENV_HTTP_TIMEOUT_SECS: &str = "CAMEO_HTTP_TIMEOUT_SECS";
pub const ENV_PROCESSING_TIMEOUT_SECS: &str = "CAMEO_PROCESSING_TIMEOUT_SECS";
pub const ENV_LOGIN_POLL_SECS: &str = "CAMEO_LOGIN_POLL_SECS";
pub const ENV_SETTLE_MS: &str = "CAMEO_SETTLE_MS";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

const DEFAULT_TABLE: &str = "character_tasks";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROCESSING_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LOGIN_POLL_SECS: u64 = 5;
const DEFAULT_SETTLE_MS: u64 = 1200;

/// Raw shape of `cameo-pilot.json`. All fields optional; `Config::resolve`
/// applies env-var fallbacks and defaults.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct FileConfig {
    /// Base URL of the task store, e.g. `https://xyz.supabase.co`.
    pub store_url: Option<String>,
    /// Bearer credential for the store. Never logged.
    pub store_key: Option<String>,
    /// Task table name. Default: `character_tasks`.
    pub store_table: Option<String>,
    /// Run the browser headless. Default: false, since a visible browser is
    /// required the first time so a human can complete login.
    pub headless: Option<bool>,
    /// Persistent browser profile directory (preserves login state across
    /// runs). Default: `~/.cameo-pilot/profile`.
    pub profile_dir: Option<String>,
    /// Where diagnostic screenshots/markup dumps land. Default:
    /// `~/.cameo-pilot/debug`.
    pub debug_dir: Option<String>,
    pub http_timeout_secs: Option<u64>,
    /// Upper bound on the external service's own processing phase.
    pub processing_timeout_secs: Option<u64>,
    /// Interval of the indefinite manual-login poll.
    pub login_poll_secs: Option<u64>,
    /// UI-settle delay after navigation/clicks.
    pub settle_ms: Option<u64>,
}

/// Fully-resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub store_url: Option<String>,
    pub store_key: Option<String>,
    pub store_table: String,
    pub headless: bool,
    pub profile_dir: PathBuf,
    pub debug_dir: PathBuf,
    pub http_timeout: Duration,
    pub processing_timeout: Duration,
    pub login_poll_interval: Duration,
    pub settle: Duration,
}

impl Config {
    /// Load `cameo-pilot.json` and resolve every field.
    ///
    /// Search order (first found wins):
    /// 1. explicit `--config` path
    /// 2. `CAMEO_PILOT_CONFIG` env var path
    /// 3. `./cameo-pilot.json`
    ///
    /// Missing file → all env-var fallbacks apply. Parse error → warning,
    /// defaults.
    pub fn load(explicit: Option<&Path>) -> Config {
        Config::resolve(load_file_config(explicit))
    }

    pub fn resolve(file: FileConfig) -> Config {
        let home_base = || {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".cameo-pilot")
        };

        let store_url = file
            .store_url
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string(ENV_STORE_URL));
        let store_key = file
            .store_key
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string(ENV_STORE_KEY));
        let store_table = file
            .store_table
            .filter(|v| !v.trim().is_empty())
            .or_else(|| env_string(ENV_STORE_TABLE))
            .unwrap_or_else(|| DEFAULT_TABLE.to_string());

        let headless = file.headless.unwrap_or_else(|| env_flag(ENV_HEADLESS));

        let profile_dir = file
            .profile_dir
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| env_string(ENV_PROFILE_DIR).map(PathBuf::from))
            .unwrap_or_else(|| home_base().join("profile"));
        let debug_dir = file
            .debug_dir
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| env_string(ENV_DEBUG_DIR).map(PathBuf::from))
            .unwrap_or_else(|| home_base().join("debug"));

        Config {
            store_url,
            store_key,
            store_table,
            headless,
            profile_dir,
            debug_dir,
            http_timeout: Duration::from_secs(resolve_u64(
                file.http_timeout_secs,
                ENV_HTTP_TIMEOUT_SECS,
                DEFAULT_HTTP_TIMEOUT_SECS,
            )),
            processing_timeout: Duration::from_secs(resolve_u64(
                file.processing_timeout_secs,
                ENV_PROCESSING_TIMEOUT_SECS,
                DEFAULT_PROCESSING_TIMEOUT_SECS,
            )),
            login_poll_interval: Duration::from_secs(resolve_u64(
                file.login_poll_secs,
                ENV_LOGIN_POLL_SECS,
                DEFAULT_LOGIN_POLL_SECS,
            )),
            settle: Duration::from_millis(resolve_u64(
                file.settle_ms,
                ENV_SETTLE_MS,
                DEFAULT_SETTLE_MS,
            )),
        }
    }
}

fn load_file_config(explicit: Option<&Path>) -> FileConfig {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(p) = explicit {
        candidates.push(p.to_path_buf());
    }
    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        candidates.push(PathBuf::from(env_path));
    }
    candidates.push(PathBuf::from("cameo-pilot.json"));

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<FileConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("cameo-pilot.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "cameo-pilot.json parse error at {}: {} (using defaults)",
                        path.display(),
                        e
                    );
                    return FileConfig::default();
                }
            },
            Err(_) => continue, // not found at this path, try next
        }
    }

    FileConfig::default()
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| {
            matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

fn resolve_u64(file_value: Option<u64>, env_key: &str, default: u64) -> u64 {
    if let Some(n) = file_value {
        return n;
    }
    std::env::var(env_key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Optional override for the Chromium-family browser executable.
///
/// Default behavior is auto-discovery (see `browser::find_chrome_executable`).
/// Only returns a value when `CHROME_EXECUTABLE` points at an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}
