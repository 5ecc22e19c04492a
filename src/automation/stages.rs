//! The fixed wizard pipeline, run once per task.
//!
//! Stages execute strictly in order; the first failure aborts the rest of
//! the pipeline for that task. There is no cross-stage rollback; a stage
//! that already mutated the external service (a partially-created
//! character) leaves that state behind. This is a best-effort automation
//! tool, not a transactional system.
//!
//! Waits come in three flavors: fixed settle delays after navigation,
//! bounded waits for the service's own processing phase, and the one
//! unbounded block in the system, the interactive-login poll, which only
//! a human can satisfy.

use std::time::Duration;

use crate::core::progress::ProgressLog;
use crate::core::types::Task;

use super::heuristics::PageHeuristics;
use super::resolver::{self, Target};
use super::ui::{Probe, UiDriver};
use super::waits::{self, WaitError, WaitPolicy};
use super::AutomationError;

/// Stage names as they appear in logs and failure messages.
pub mod stage {
    pub const NAVIGATE_SOURCE: &str = "navigate_source";
    pub const AWAIT_LOGIN: &str = "await_login";
    pub const OPEN_MENU: &str = "open_menu";
    pub const START_CREATION: &str = "start_creation";
    pub const CONFIRM_TRIM: &str = "confirm_trim";
    pub const AWAIT_PROCESSING: &str = "await_processing";
    pub const ACCEPT_DEFAULTS: &str = "accept_defaults";
    pub const SET_VISIBILITY: &str = "set_visibility";
    pub const SAVE_CHARACTER: &str = "save_character";
    pub const AWAIT_RESULT: &str = "await_result";
}

/// Run-level timing knobs, resolved from config.
#[derive(Debug, Clone)]
pub struct StageTiming {
    /// Deadline for the external service's processing phase.
    pub processing_timeout: Duration,
    pub processing_poll: Duration,
    /// Interval of the indefinite login poll.
    pub login_poll: Duration,
    /// UI-settle delay after navigation and between wizard screens.
    pub settle: Duration,
    /// Deadline for the post-save navigation to the result page.
    pub result_timeout: Duration,
    pub result_poll: Duration,
}

impl Default for StageTiming {
    fn default() -> Self {
        Self {
            processing_timeout: Duration::from_secs(120),
            processing_poll: Duration::from_secs(2),
            login_poll: Duration::from_secs(5),
            settle: Duration::from_millis(1200),
            result_timeout: Duration::from_secs(30),
            result_poll: Duration::from_millis(500),
        }
    }
}

impl StageTiming {
    pub fn from_config(cfg: &crate::core::config::Config) -> Self {
        Self {
            processing_timeout: cfg.processing_timeout,
            login_poll: cfg.login_poll_interval,
            settle: cfg.settle,
            ..Default::default()
        }
    }
}

/// The stage that killed a task, with its triggering error.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: &'static str,
    pub error: AutomationError,
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage '{}' failed: {}", self.stage, self.error)
    }
}

pub struct StageExecutor<'a> {
    driver: &'a dyn UiDriver,
    heuristics: &'a PageHeuristics,
    timing: &'a StageTiming,
}

impl<'a> StageExecutor<'a> {
    pub fn new(
        driver: &'a dyn UiDriver,
        heuristics: &'a PageHeuristics,
        timing: &'a StageTiming,
    ) -> Self {
        Self {
            driver,
            heuristics,
            timing,
        }
    }

    /// Drive the full pipeline for one task. On the first stage failure
    /// the remaining stages are skipped and the failure is returned for
    /// the caller to persist; the browser state is left as-is for the
    /// diagnostic capture.
    pub async fn run(&self, task: &Task, log: &mut ProgressLog) -> Result<(), StageFailure> {
        let source_url = task.source_video_url.as_deref().unwrap_or_default();

        self.begin(log, stage::NAVIGATE_SOURCE).await;
        let r = self.navigate_source(source_url).await;
        self.end(log, stage::NAVIGATE_SOURCE, r).await?;

        self.begin(log, stage::AWAIT_LOGIN).await;
        let r = self.await_login(log).await;
        self.end(log, stage::AWAIT_LOGIN, r).await?;

        self.begin(log, stage::OPEN_MENU).await;
        let r = self.resolve_target(log, &self.heuristics.overflow_menu).await;
        self.end(log, stage::OPEN_MENU, r).await?;

        self.begin(log, stage::START_CREATION).await;
        let r = self.resolve_target(log, &self.heuristics.create_item).await;
        self.end(log, stage::START_CREATION, r).await?;

        self.begin(log, stage::CONFIRM_TRIM).await;
        let r = self.resolve_target(log, &self.heuristics.trim_confirm).await;
        self.end(log, stage::CONFIRM_TRIM, r).await?;

        self.begin(log, stage::AWAIT_PROCESSING).await;
        let r = self.await_processing(log).await;
        self.end(log, stage::AWAIT_PROCESSING, r).await?;

        self.begin(log, stage::ACCEPT_DEFAULTS).await;
        let r = self.accept_defaults(log).await;
        self.end(log, stage::ACCEPT_DEFAULTS, r).await?;

        self.begin(log, stage::SET_VISIBILITY).await;
        let r = self
            .resolve_target(log, &self.heuristics.visibility_option)
            .await;
        self.end(log, stage::SET_VISIBILITY, r).await?;

        self.begin(log, stage::SAVE_CHARACTER).await;
        let r = self.resolve_target(log, &self.heuristics.save).await;
        self.end(log, stage::SAVE_CHARACTER, r).await?;

        self.begin(log, stage::AWAIT_RESULT).await;
        let r = self.await_result(log).await;
        self.end(log, stage::AWAIT_RESULT, r).await?;

        Ok(())
    }

    async fn begin(&self, log: &mut ProgressLog, stage: &'static str) {
        log.info(format!("stage {stage}: in progress")).await;
    }

    async fn end(
        &self,
        log: &mut ProgressLog,
        stage: &'static str,
        result: Result<(), AutomationError>,
    ) -> Result<(), StageFailure> {
        match result {
            Ok(()) => {
                log.success(format!("stage {stage}: succeeded")).await;
                Ok(())
            }
            Err(error) => {
                log.error(format!("stage {stage}: failed: {error}")).await;
                Err(StageFailure { stage, error })
            }
        }
    }

    async fn navigate_source(&self, url: &str) -> Result<(), AutomationError> {
        if url.is_empty() {
            return Err(AutomationError::Driver(
                "task has no source media reference".into(),
            ));
        }
        self.driver.goto(url).await?;
        waits::settle(self.timing.settle).await;
        Ok(())
    }

    /// The one unbounded block in the pipeline: poll the login-presence
    /// check forever. A human completing login in the visible browser is
    /// the only completion signal, so no timeout applies by design.
    async fn await_login(&self, log: &mut ProgressLog) -> Result<(), AutomationError> {
        if self.heuristics.login.is_logged_in(self.driver).await? {
            log.info("login already present").await;
            return Ok(());
        }
        log.warn("not logged in; waiting for manual login in the browser window")
            .await;
        let waited = waits::wait_until(
            WaitPolicy::Manual {
                interval: self.timing.login_poll,
            },
            || self.heuristics.login.is_logged_in(self.driver),
        )
        .await
        .map_err(|e| match e {
            WaitError::Probe(e) => e,
            // Unreachable for Manual policy; keep the conversion total.
            WaitError::TimedOut { waited } => AutomationError::StageTimeout {
                stage: stage::AWAIT_LOGIN.into(),
                waited_secs: waited.as_secs(),
            },
        })?;
        log.success(format!("login detected after {}s", waited.as_secs()))
            .await;
        Ok(())
    }

    async fn resolve_target(
        &self,
        log: &mut ProgressLog,
        target: &Target,
    ) -> Result<(), AutomationError> {
        resolver::resolve(self.driver, log, target).await?;
        waits::settle(self.timing.settle).await;
        Ok(())
    }

    async fn await_processing(&self, log: &mut ProgressLog) -> Result<(), AutomationError> {
        self.bounded_wait(
            log,
            stage::AWAIT_PROCESSING,
            &self.heuristics.processing_done,
            self.timing.processing_timeout,
            self.timing.processing_poll,
            "backend processing finished",
        )
        .await
    }

    async fn accept_defaults(&self, log: &mut ProgressLog) -> Result<(), AutomationError> {
        let total = self.heuristics.accept_screens.len();
        for (i, screen) in self.heuristics.accept_screens.iter().enumerate() {
            log.info(format!("confirmation screen {}/{}", i + 1, total))
                .await;
            resolver::resolve(self.driver, log, screen).await?;
            waits::settle(self.timing.settle).await;
        }
        Ok(())
    }

    async fn await_result(&self, log: &mut ProgressLog) -> Result<(), AutomationError> {
        let probe = Probe::url_matches(self.heuristics.result_url_pattern.clone());
        self.bounded_wait(
            log,
            stage::AWAIT_RESULT,
            &probe,
            self.timing.result_timeout,
            self.timing.result_poll,
            "result page reached",
        )
        .await
    }

    async fn bounded_wait(
        &self,
        log: &mut ProgressLog,
        stage: &'static str,
        probe: &Probe,
        timeout: Duration,
        interval: Duration,
        done_message: &str,
    ) -> Result<(), AutomationError> {
        let result = waits::wait_until(
            WaitPolicy::Bounded { timeout, interval },
            || probe.check(self.driver),
        )
        .await;
        match result {
            Ok(waited) => {
                log.info(format!("{done_message} after {}s", waited.as_secs()))
                    .await;
                Ok(())
            }
            Err(WaitError::TimedOut { waited }) => Err(AutomationError::StageTimeout {
                stage: stage.into(),
                waited_secs: waited.as_secs(),
            }),
            Err(WaitError::Probe(e)) => Err(e),
        }
    }
}
