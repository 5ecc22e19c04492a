//! Browser session management.
//!
//! One persistent-profile Chromium session per run, acquired before the
//! first task and released on every exit path. The profile directory
//! preserves login state across runs; an exclusive lock file guards it
//! because two live processes sharing one Chromium profile is undefined
//! behavior, so we refuse instead of corrupting.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Browser;
use fs2::FileExt;
use futures::StreamExt;
use tracing::{info, warn};

use crate::automation::driver::CdpDriver;
use crate::automation::AutomationError;
use crate::core::config::{self, Config};

pub const VIEWPORT_WIDTH: u32 = 1280;
pub const VIEWPORT_HEIGHT: u32 = 800;

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH lookup of the usual binary names
/// 3. OS-specific well-known install paths
pub fn find_chrome_executable() -> Option<String> {
    if let Some(p) = config::chrome_executable_override() {
        return Some(p);
    }

    let candidates = [
        "google-chrome",
        "chromium",
        "chromium-browser",
        "chrome",
        "brave-browser",
        "brave",
    ];
    for name in candidates {
        if let Ok(path) = which::which(name) {
            return Some(path.to_string_lossy().to_string());
        }
    }

    #[cfg(target_os = "macos")]
    {
        let known = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ];
        for c in known {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let known = [
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/brave-browser",
        ];
        for c in known {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let known = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ];
        for c in known {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Exclusive advisory lock on the profile directory for the lifetime of
/// the session. Released when the file handle drops.
struct ProfileLock {
    _file: std::fs::File,
}

impl ProfileLock {
    fn acquire(profile_dir: &Path) -> Result<Self> {
        let path = profile_dir.join(".cameo-pilot.lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("creating profile lock at {}", path.display()))?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow!(
                "profile directory {} is in use by another cameo-pilot process",
                profile_dir.display()
            )
        })?;
        Ok(Self { _file: file })
    }
}

/// Whether the profile lock is currently free. Preflight-only probe; the
/// lock is dropped immediately.
pub fn profile_lock_available(profile_dir: &Path) -> bool {
    ProfileLock::acquire(profile_dir).is_ok()
}

fn build_browser_config(exe: &str, cfg: &Config) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .user_data_dir(&cfg.profile_dir)
        .viewport(Viewport {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .arg("--disable-dev-shm-usage")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-crash-reporter")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--disable-infobars")
        // Hide the navigator.webdriver automation flag.
        .arg("--disable-blink-features=AutomationControlled");

    if !cfg.headless {
        // Visible browser so a human can complete login.
        builder = builder.with_head();
    }

    builder
        .build()
        .map_err(|e| anyhow!("failed to build browser config: {e}"))
}

/// The run's single browser instance plus its CDP event pump.
pub struct BrowserSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
    _profile_lock: ProfileLock,
}

impl BrowserSession {
    pub async fn launch(cfg: &Config) -> Result<Self> {
        let exe = find_chrome_executable().ok_or_else(|| {
            anyhow!("no browser executable found; install Chrome/Chromium or set CHROME_EXECUTABLE")
        })?;

        std::fs::create_dir_all(&cfg.profile_dir)
            .with_context(|| format!("creating profile dir {}", cfg.profile_dir.display()))?;
        let profile_lock = ProfileLock::acquire(&cfg.profile_dir)?;

        info!(
            "🚀 launching browser ({}, {})",
            exe,
            if cfg.headless { "headless" } else { "headed" }
        );
        let config = build_browser_config(&exe, cfg)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("browser launch failed ({exe}): {e}"))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
            _profile_lock: profile_lock,
        })
    }

    /// Open a fresh page for one task. Pages are cheap; the session stays
    /// authenticated through the shared profile.
    pub async fn new_driver(&self) -> Result<CdpDriver, AutomationError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(AutomationError::driver)?;
        Ok(CdpDriver::new(page))
    }

    /// Close the browser and join the event pump. Called on every exit
    /// path of the run.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("browser close error (non-fatal): {}", e);
        }
        self.handler_task.abort();
        info!("🛑 browser session closed");
    }
}
