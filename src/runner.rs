//! Run-to-completion batch driver.
//!
//! Tasks are fetched once at start-up and processed strictly one at a
//! time: the target page is stateful per-tab and not built for concurrent
//! automated sessions, so serializing avoids cross-task interference. A
//! task failure never aborts the run; the loop records it and moves on.
//! The browser session is acquired once and released after the loop on
//! every path.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::automation::diagnostics;
use crate::automation::extractor;
use crate::automation::heuristics::PageHeuristics;
use crate::automation::stages::{StageExecutor, StageTiming};
use crate::automation::ui::UiDriver;
use crate::automation::AutomationError;
use crate::browser::BrowserSession;
use crate::core::config::Config;
use crate::core::progress::ProgressLog;
use crate::core::types::{RunSummary, Task, TaskPatch, TaskStatus};
use crate::store::{RestTaskStore, TaskStore};

/// Source of one fresh page per task.
#[async_trait]
pub trait PageProvider: Send + Sync {
    async fn page(&self) -> Result<Box<dyn UiDriver>, AutomationError>;
}

#[async_trait]
impl PageProvider for BrowserSession {
    async fn page(&self) -> Result<Box<dyn UiDriver>, AutomationError> {
        Ok(Box::new(self.new_driver().await?))
    }
}

/// Fetch the queue, drive every task, release the browser. The returned
/// summary reflects per-task outcomes; only run-level setup (store,
/// browser launch) can error out.
pub async fn run(cfg: &Config) -> Result<RunSummary> {
    let store: Arc<dyn TaskStore> =
        Arc::new(RestTaskStore::from_config(cfg).map_err(|e| anyhow!(e.to_string()))?);

    // Fetched exactly once; the queue is never re-polled within a run.
    let tasks = store
        .fetch_pending()
        .await
        .map_err(|e| anyhow!("fetching pending tasks: {e}"))?;
    info!("📥 {} pending task(s)", tasks.len());
    if tasks.is_empty() {
        return Ok(RunSummary::default());
    }

    let session = BrowserSession::launch(cfg).await?;
    let heuristics = PageHeuristics::v1();
    let timing = StageTiming::from_config(cfg);

    // process_queue contains every per-task failure, so nothing between
    // launch and shutdown can skip the release.
    let summary =
        process_queue(&session, store, &heuristics, &timing, &cfg.debug_dir, tasks).await;
    session.shutdown().await;

    info!(
        "🏁 run finished: {} task(s), {} completed, {} failed",
        summary.fetched, summary.completed, summary.failed
    );
    Ok(summary)
}

/// Drive every fetched task exactly once, oldest first.
pub async fn process_queue(
    pages: &dyn PageProvider,
    store: Arc<dyn TaskStore>,
    heuristics: &PageHeuristics,
    timing: &StageTiming,
    debug_dir: &Path,
    tasks: Vec<Task>,
) -> RunSummary {
    let mut summary = RunSummary {
        fetched: tasks.len(),
        ..Default::default()
    };
    for task in tasks {
        let outcome =
            process_task(pages, store.clone(), heuristics, timing, debug_dir, &task).await;
        match outcome {
            TaskStatus::Completed => summary.completed += 1,
            _ => summary.failed += 1,
        }
    }
    summary
}

async fn process_task(
    pages: &dyn PageProvider,
    store: Arc<dyn TaskStore>,
    heuristics: &PageHeuristics,
    timing: &StageTiming,
    debug_dir: &Path,
    task: &Task,
) -> TaskStatus {
    info!(
        "▶️ task {} ({})",
        task.id,
        task.source_video_url.as_deref().unwrap_or("<no source>")
    );

    if let Err(e) = store
        .update(&task.id, &TaskPatch::status(TaskStatus::Processing))
        .await
    {
        warn!("task {}: could not mark processing: {}", task.id, e);
    }

    let mut log = ProgressLog::new(task.id.clone(), task.logs.clone(), store.clone());
    log.info(format!(
        "automation run started (heuristics {})",
        heuristics.version
    ))
    .await;

    let driver = match pages.page().await {
        Ok(d) => d,
        Err(e) => {
            log.error(format!("browser page unavailable: {e}")).await;
            let patch = TaskPatch::status(TaskStatus::Failed)
                .with_error(format!("browser page unavailable: {e}"))
                .with_logs(log.entries().to_vec());
            if let Err(e) = store.update(&task.id, &patch).await {
                warn!("task {}: final update failed: {}", task.id, e);
            }
            return TaskStatus::Failed;
        }
    };
    let driver: &dyn UiDriver = driver.as_ref();

    let executor = StageExecutor::new(driver, heuristics, timing);
    match executor.run(task, &mut log).await {
        Ok(()) => {
            let profile = extractor::extract_profile(driver, &heuristics.extraction, &mut log).await;
            log.success("task completed").await;
            let patch = TaskPatch {
                status: Some(TaskStatus::Completed),
                logs: Some(log.entries().to_vec()),
                remote_id: profile.remote_id,
                profile_url: profile.profile_url,
                display_name: profile.display_name,
                avatar_url: profile.avatar_url,
                error_message: None,
            };
            if let Err(e) = store.update(&task.id, &patch).await {
                warn!("task {}: final update failed: {}", task.id, e);
            }
            TaskStatus::Completed
        }
        Err(failure) => {
            // Stage failures and unexpected driver errors are reported the
            // same way: capture diagnostics, persist, move on.
            diagnostics::capture_failure(driver, debug_dir, &task.id, failure.stage, &mut log)
                .await;
            let message = failure.to_string();
            log.error(&message).await;
            let patch = TaskPatch::status(TaskStatus::Failed)
                .with_error(message)
                .with_logs(log.entries().to_vec());
            if let Err(e) = store.update(&task.id, &patch).await {
                warn!("task {}: final update failed: {}", task.id, e);
            }
            TaskStatus::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::ui::Rect;
    use crate::testkit::{node_with, pending_task, Click, FakeUi, InMemoryStore, PageModel};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider(Arc<FakeUi>);

    #[async_trait]
    impl PageProvider for FakeProvider {
        async fn page(&self) -> Result<Box<dyn UiDriver>, AutomationError> {
            Ok(Box::new(self.0.clone()))
        }
    }

    fn small_btn(x: f64, y: f64) -> Rect {
        Rect {
            x,
            y,
            width: 36.0,
            height: 36.0,
        }
    }

    fn wide_btn(x: f64, y: f64) -> Rect {
        Rect {
            x,
            y,
            width: 120.0,
            height: 44.0,
        }
    }

    fn create_menuitem() -> crate::automation::ui::UiNode {
        node_with(
            "div",
            "Create character",
            &[("role", "menuitem")],
            wide_btn(900.0, 200.0),
        )
    }

    /// Wizard chain from the create menu item onward: dialog → trim →
    /// processing → three confirmation screens → visibility → save →
    /// result page.
    fn create_item_rule() -> impl Fn(&mut PageModel) + Send + Sync + 'static {
        |page| {
            page.add(node_with(
                "div",
                "Trim your clip",
                &[("role", "dialog")],
                Rect {
                    x: 200.0,
                    y: 100.0,
                    width: 880.0,
                    height: 600.0,
                },
            ));
            page.add_with_rule(
                node_with("button", "", &[("aria-label", "Next")], small_btn(1024.0, 650.0)),
                trim_rule(),
            );
        }
    }

    fn trim_rule() -> impl Fn(&mut PageModel) + Send + Sync + 'static {
        |page| {
            page.add(node_with(
                "div",
                "",
                &[("role", "progressbar")],
                wide_btn(400.0, 400.0),
            ));
            let screens = AtomicUsize::new(0);
            page.add_with_rule(
                node_with("button", "Next", &[], wide_btn(1000.0, 680.0)),
                move |page| {
                    if screens.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                        page.add_with_rule(
                            node_with("div", "Only me", &[("role", "radio")], wide_btn(400.0, 500.0)),
                            |page| {
                                page.add(node_with(
                                    "div",
                                    "Only me",
                                    &[("role", "radio"), ("aria-checked", "true")],
                                    wide_btn(400.0, 500.0),
                                ));
                            },
                        );
                        page.add_with_rule(
                            node_with("button", "Save", &[], wide_btn(1000.0, 680.0)),
                            |page| {
                                page.remove_matching("[role=\"dialog\"]");
                                page.set_url("https://example.test/characters/luna_9x");
                                page.add(node_with(
                                    "h1",
                                    "Luna the Fox",
                                    &[],
                                    wide_btn(200.0, 120.0),
                                ));
                                page.add(node_with(
                                    "img",
                                    "",
                                    &[("src", "https://cdn.example.test/avatars/luna.png")],
                                    Rect {
                                        x: 60.0,
                                        y: 80.0,
                                        width: 128.0,
                                        height: 128.0,
                                    },
                                ));
                            },
                        );
                    }
                },
            );
        }
    }

    fn run_fixture(
        ui: &Arc<FakeUi>,
        store: &Arc<InMemoryStore>,
        tasks: Vec<Task>,
    ) -> (
        FakeProvider,
        Arc<dyn TaskStore>,
        PageHeuristics,
        StageTiming,
        std::path::PathBuf,
        Vec<Task>,
    ) {
        let store_dyn: Arc<dyn TaskStore> = store.clone();
        (
            FakeProvider(ui.clone()),
            store_dyn,
            PageHeuristics::v1(),
            StageTiming::default(),
            std::env::temp_dir().join(format!(
                "cameo-run-{}",
                uuid::Uuid::new_v4().simple()
            )),
            tasks,
        )
    }

    /// Arrange the full happy wizard: a semantic menu button whose click
    /// chain runs all the way to the result page.
    fn script_happy_wizard(ui: &FakeUi) {
        let menu_btn = ui.add_node(node_with(
            "button",
            "",
            &[("aria-label", "More options")],
            small_btn(1200.0, 80.0),
        ));
        ui.on_node_click(menu_btn, |page| {
            page.add_with_rule(create_menuitem(), create_item_rule());
        });
    }

    /// Scenario A: login already present, the overflow menu resolves via
    /// the first semantic query, and the pipeline runs to completion.
    #[tokio::test(start_paused = true)]
    async fn test_scenario_a_semantic_path_completes() {
        let store = Arc::new(InMemoryStore::with_tasks(vec![pending_task(
            "t1",
            "https://example.test/p/abc",
        )]));
        let ui = FakeUi::new("about:blank", (1280.0, 800.0));
        script_happy_wizard(&ui);

        let (provider, dyn_store, heuristics, timing, debug_dir, tasks) =
            run_fixture(&ui, &store, store.fetch_pending().await.unwrap());
        let summary =
            process_queue(&provider, dyn_store, &heuristics, &timing, &debug_dir, tasks).await;

        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 0);

        let task = store.task("t1");
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.remote_id.as_deref(), Some("luna_9x"));
        assert_eq!(task.display_name.as_deref(), Some("Luna the Fox"));
        assert!(task.error_message.is_none());

        // The menu was resolved by the semantic strategy, no fallback.
        assert!(task
            .logs
            .iter()
            .any(|e| e.message.contains("overflow menu button: resolved via semantic query")));
        let _ = std::fs::remove_dir_all(&debug_dir);
    }

    /// Scenario B: semantic and geometry both miss the menu; the fixed
    /// coordinates are tried in listed order and the second offset works.
    /// The log must record exactly that.
    #[tokio::test(start_paused = true)]
    async fn test_scenario_b_coordinate_fallback_second_offset() {
        let store = Arc::new(InMemoryStore::with_tasks(vec![pending_task(
            "t1",
            "https://example.test/p/abc",
        )]));
        let ui = FakeUi::new("about:blank", (1280.0, 800.0));
        // No menu button anywhere. Only the second listed coordinate of
        // the overflow-menu target opens the menu.
        ui.on_point_click((1156.0, 128.0), |page| {
            page.add_with_rule(create_menuitem(), create_item_rule());
        });

        let (provider, dyn_store, heuristics, timing, debug_dir, tasks) =
            run_fixture(&ui, &store, store.fetch_pending().await.unwrap());
        let summary =
            process_queue(&provider, dyn_store, &heuristics, &timing, &debug_dir, tasks).await;
        assert_eq!(summary.completed, 1);

        let task = store.task("t1");
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.logs.iter().any(|e| {
            e.message.contains("overflow menu button: resolved via fixed coordinate")
                && e.message.contains("#2")
        }));

        // Both offsets were attempted, in order.
        let points: Vec<(f64, f64)> = ui
            .clicks()
            .iter()
            .filter_map(|c| match c {
                Click::Point { x, y } => Some((*x, *y)),
                _ => None,
            })
            .collect();
        let first = points.iter().position(|p| *p == (1180.0, 96.0)).unwrap();
        let second = points.iter().position(|p| *p == (1156.0, 128.0)).unwrap();
        assert!(first < second);
        let _ = std::fs::remove_dir_all(&debug_dir);
    }

    /// Scenario C: the backend-processing wait exceeds its deadline. The
    /// task fails with the stage name in the error and a diagnostic
    /// screenshot path in the log.
    #[tokio::test(start_paused = true)]
    async fn test_scenario_c_processing_timeout_fails_task() {
        let store = Arc::new(InMemoryStore::with_tasks(vec![pending_task(
            "t1",
            "https://example.test/p/abc",
        )]));
        let ui = FakeUi::new("about:blank", (1280.0, 800.0));
        let menu_btn = ui.add_node(node_with(
            "button",
            "",
            &[("aria-label", "More options")],
            small_btn(1200.0, 80.0),
        ));
        // The wizard opens and trims, but processing never finishes: the
        // progressbar appears and no proceed control ever does.
        ui.on_node_click(menu_btn, |page| {
            page.add_with_rule(create_menuitem(), |page| {
                page.add(node_with(
                    "div",
                    "Trim your clip",
                    &[("role", "dialog")],
                    Rect {
                        x: 200.0,
                        y: 100.0,
                        width: 880.0,
                        height: 600.0,
                    },
                ));
                page.add_with_rule(
                    node_with("button", "", &[("aria-label", "Next")], small_btn(1024.0, 650.0)),
                    |page| {
                        page.add(node_with(
                            "div",
                            "",
                            &[("role", "progressbar")],
                            wide_btn(400.0, 400.0),
                        ));
                    },
                );
            });
        });

        let (provider, dyn_store, heuristics, timing, debug_dir, tasks) =
            run_fixture(&ui, &store, store.fetch_pending().await.unwrap());
        let summary =
            process_queue(&provider, dyn_store, &heuristics, &timing, &debug_dir, tasks).await;
        assert_eq!(summary.failed, 1);

        let task = store.task("t1");
        assert_eq!(task.status, TaskStatus::Failed);
        let error = task.error_message.expect("error message populated");
        assert!(error.contains("await_processing"), "error was: {error}");
        assert!(task
            .logs
            .iter()
            .any(|e| e.message.contains("diagnostic screenshot")));
        let _ = std::fs::remove_dir_all(&debug_dir);
    }

    /// Logging idempotence: one entry per stage transition (in progress /
    /// terminal), one per attempted click, ids strictly increasing, and
    /// the persisted order identical to the in-memory order.
    #[tokio::test(start_paused = true)]
    async fn test_logging_is_exactly_once_and_ordered() {
        let store = Arc::new(InMemoryStore::with_tasks(vec![pending_task(
            "t1",
            "https://example.test/p/abc",
        )]));
        let ui = FakeUi::new("about:blank", (1280.0, 800.0));
        script_happy_wizard(&ui);

        let (provider, dyn_store, heuristics, timing, debug_dir, tasks) =
            run_fixture(&ui, &store, store.fetch_pending().await.unwrap());
        process_queue(&provider, dyn_store, &heuristics, &timing, &debug_dir, tasks).await;

        let logs = store.task("t1").logs;

        // Exactly one begin and one terminal entry per stage.
        use crate::automation::stages::stage;
        for name in [
            stage::NAVIGATE_SOURCE,
            stage::AWAIT_LOGIN,
            stage::OPEN_MENU,
            stage::START_CREATION,
            stage::CONFIRM_TRIM,
            stage::AWAIT_PROCESSING,
            stage::ACCEPT_DEFAULTS,
            stage::SET_VISIBILITY,
            stage::SAVE_CHARACTER,
            stage::AWAIT_RESULT,
        ] {
            let begins = logs
                .iter()
                .filter(|e| e.message == format!("stage {name}: in progress"))
                .count();
            let ends = logs
                .iter()
                .filter(|e| e.message == format!("stage {name}: succeeded"))
                .count();
            assert_eq!(begins, 1, "stage {name} begin entries");
            assert_eq!(ends, 1, "stage {name} terminal entries");
        }

        // Exactly one log entry per attempted click.
        let click_entries = logs
            .iter()
            .filter(|e| e.message.contains(": clicked "))
            .count();
        assert_eq!(click_entries, ui.clicks().len());

        // Ids are strictly increasing, so read-back order is insertion
        // order.
        for pair in logs.windows(2) {
            assert!(pair[0].id < pair[1].id);
        }
        let _ = std::fs::remove_dir_all(&debug_dir);
    }

    /// Every fetched pending task is processed exactly once before the
    /// queue drains: one `processing` claim and one terminal status each,
    /// and a failure never stops the tasks behind it.
    #[tokio::test(start_paused = true)]
    async fn test_each_pending_task_processed_exactly_once() {
        let store = Arc::new(InMemoryStore::with_tasks(vec![
            pending_task("t1", "https://example.test/p/a"),
            pending_task("t2", "https://example.test/p/b"),
        ]));
        // Empty page: every task fails at the open-menu stage.
        let ui = FakeUi::new("about:blank", (1280.0, 800.0));

        let (provider, dyn_store, heuristics, timing, debug_dir, tasks) =
            run_fixture(&ui, &store, store.fetch_pending().await.unwrap());
        let summary =
            process_queue(&provider, dyn_store, &heuristics, &timing, &debug_dir, tasks).await;

        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.completed + summary.failed, 2);
        assert_eq!(store.fetch_calls(), 1, "the queue is pulled once, never re-polled");
        for id in ["t1", "t2"] {
            let statuses = store.status_updates(id);
            assert_eq!(
                statuses,
                vec![TaskStatus::Processing, TaskStatus::Failed],
                "task {id} must be claimed once and terminated once"
            );
        }
        let _ = std::fs::remove_dir_all(&debug_dir);
    }
}
