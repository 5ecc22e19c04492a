//! Failure diagnostics: screenshot + markup capture for offline triage.
//!
//! Taken once per failed task, at the moment of the fatal stage failure.
//! Paths are echoed into the task's progress log so whoever reviews the
//! failed row can find the artifacts without shell access to this machine.
//! Capture itself is best-effort: a broken page must not mask the original
//! failure.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::core::progress::ProgressLog;

use super::ui::UiDriver;

/// Artifacts written for one failed task. Either may be absent when the
/// page was too far gone to capture.
#[derive(Debug, Default)]
pub struct DiagnosticCapture {
    pub screenshot: Option<PathBuf>,
    pub markup: Option<PathBuf>,
}

/// Capture a full-page screenshot and the serialized markup into
/// `debug_dir`, creating it on demand. Every outcome is logged.
pub async fn capture_failure(
    driver: &dyn UiDriver,
    debug_dir: &Path,
    task_id: &str,
    stage: &str,
    log: &mut ProgressLog,
) -> DiagnosticCapture {
    let mut capture = DiagnosticCapture::default();

    if let Err(e) = tokio::fs::create_dir_all(debug_dir).await {
        log.warn(format!(
            "diagnostics: could not create {}: {}",
            debug_dir.display(),
            e
        ))
        .await;
        return capture;
    }

    // Short random suffix keeps repeated failures of one task distinct.
    let suffix = Uuid::new_v4().simple().to_string();
    let base = format!("{}-{}-{}", task_id, stage, &suffix[..8]);

    let shot_path = debug_dir.join(format!("{base}.png"));
    match driver.screenshot(&shot_path).await {
        Ok(()) => {
            log.info(format!("📸 diagnostic screenshot: {}", shot_path.display()))
                .await;
            capture.screenshot = Some(shot_path);
        }
        Err(e) => {
            log.warn(format!("diagnostics: screenshot failed: {e}")).await;
        }
    }

    let html_path = debug_dir.join(format!("{base}.html"));
    match driver.page_html().await {
        Ok(html) => match tokio::fs::write(&html_path, html).await {
            Ok(()) => {
                log.info(format!("📄 diagnostic markup: {}", html_path.display()))
                    .await;
                capture.markup = Some(html_path);
            }
            Err(e) => {
                log.warn(format!("diagnostics: markup write failed: {e}")).await;
            }
        },
        Err(e) => {
            log.warn(format!("diagnostics: markup capture failed: {e}"))
                .await;
        }
    }

    capture
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::ProgressLog;
    use crate::testkit::{FakeUi, InMemoryStore};

    #[tokio::test]
    async fn test_capture_writes_artifacts_and_logs_paths() {
        let store = InMemoryStore::seeded("t1");
        let ui = FakeUi::new("https://example.test/p/abc", (1280.0, 800.0));
        ui.set_html("<html><body>stuck wizard</body></html>");
        let dir = std::env::temp_dir().join(format!("cameo-diag-{}", Uuid::new_v4().simple()));
        let mut log = ProgressLog::new("t1", Vec::new(), store);

        let capture = capture_failure(ui.as_ref(), &dir, "t1", "open_menu", &mut log).await;

        let shot = capture.screenshot.expect("screenshot path");
        let markup = capture.markup.expect("markup path");
        assert!(shot.exists());
        assert!(markup.exists());
        assert!(log
            .entries()
            .iter()
            .any(|e| e.message.contains("diagnostic screenshot")));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
