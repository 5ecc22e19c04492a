//! Startup checklist.
//!
//! Runs non-interactively before every run and standalone via `--check`.
//! Each item is independent; the report prints everything rather than
//! stopping at the first failure, so an operator fixes one pass, not N.

use std::path::Path;

use crate::browser;
use crate::core::config::Config;

#[derive(Debug)]
pub struct CheckItem {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Default)]
pub struct CheckReport {
    pub items: Vec<CheckItem>,
}

impl CheckReport {
    fn push(&mut self, name: &'static str, ok: bool, detail: impl Into<String>) {
        self.items.push(CheckItem {
            name,
            ok,
            detail: detail.into(),
        });
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|i| !i.ok)
    }

    /// One-line form for startup logs.
    pub fn summarize_for_logs(&self) -> String {
        let failed: Vec<&str> = self
            .items
            .iter()
            .filter(|i| !i.ok)
            .map(|i| i.name)
            .collect();
        if failed.is_empty() {
            format!("preflight: {} checks passed", self.items.len())
        } else {
            format!(
                "preflight: {}/{} checks passed (failing: {})",
                self.items.len() - failed.len(),
                self.items.len(),
                failed.join(", ")
            )
        }
    }
}

impl std::fmt::Display for CheckReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "cameo-pilot preflight")?;
        for item in &self.items {
            let glyph = if item.ok { "✅" } else { "❌" };
            writeln!(f, "  {} {:<18} {}", glyph, item.name, item.detail)?;
        }
        Ok(())
    }
}

pub fn check_all(cfg: &Config) -> CheckReport {
    let mut report = CheckReport::default();

    match browser::find_chrome_executable() {
        Some(exe) => report.push("browser", true, exe),
        None => report.push(
            "browser",
            false,
            "no Chrome/Chromium found; install one or set CHROME_EXECUTABLE",
        ),
    }

    match cfg.store_url.as_deref() {
        Some(raw) => match url::Url::parse(raw) {
            Ok(_) => report.push("store url", true, raw),
            Err(e) => report.push("store url", false, format!("{raw}: {e}")),
        },
        None => report.push(
            "store url",
            false,
            "not configured (store_url / CAMEO_STORE_URL)",
        ),
    }

    // Never echo the credential itself.
    match &cfg.store_key {
        Some(_) => report.push("store key", true, "configured"),
        None => report.push(
            "store key",
            false,
            "not configured (store_key / CAMEO_STORE_KEY)",
        ),
    }

    check_dir(&mut report, "profile dir", &cfg.profile_dir);
    let profile_dir_ok = report.items.last().map(|i| i.ok).unwrap_or(false);
    if profile_dir_ok {
        if browser::profile_lock_available(&cfg.profile_dir) {
            report.push("profile lock", true, "free");
        } else {
            report.push(
                "profile lock",
                false,
                format!(
                    "{} is in use by another cameo-pilot process",
                    cfg.profile_dir.display()
                ),
            );
        }
    }

    check_dir(&mut report, "debug dir", &cfg.debug_dir);

    report
}

fn check_dir(report: &mut CheckReport, name: &'static str, dir: &Path) {
    match std::fs::create_dir_all(dir) {
        Ok(()) => report.push(name, true, dir.display().to_string()),
        Err(e) => report.push(name, false, format!("{}: {}", dir.display(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::FileConfig;

    #[test]
    fn test_unconfigured_store_fails_check() {
        let dir = std::env::temp_dir().join(format!(
            "cameo-preflight-{}",
            uuid::Uuid::new_v4().simple()
        ));
        let cfg = Config::resolve(FileConfig {
            store_url: None,
            store_key: None,
            profile_dir: Some(dir.join("profile").display().to_string()),
            debug_dir: Some(dir.join("debug").display().to_string()),
            ..Default::default()
        });
        // Ambient env could still provide the store settings; only assert
        // when it does not.
        if cfg.store_url.is_none() {
            let report = check_all(&cfg);
            assert!(report.has_failures());
            assert!(report
                .items
                .iter()
                .any(|i| i.name == "store url" && !i.ok));
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bad_store_url_is_reported() {
        let dir = std::env::temp_dir().join(format!(
            "cameo-preflight-{}",
            uuid::Uuid::new_v4().simple()
        ));
        let cfg = Config::resolve(FileConfig {
            store_url: Some("not a url".into()),
            store_key: Some("k".into()),
            profile_dir: Some(dir.join("profile").display().to_string()),
            debug_dir: Some(dir.join("debug").display().to_string()),
            ..Default::default()
        });
        let report = check_all(&cfg);
        assert!(report
            .items
            .iter()
            .any(|i| i.name == "store url" && !i.ok));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
