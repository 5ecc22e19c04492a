//! Guided browser-automation core.
//!
//! One run drives a fixed wizard pipeline against an externally-owned page
//! with no stable selectors. The pieces:
//!
//! * [`ui`]: the driver seam ([`ui::UiDriver`]) the rest of the core is
//!   written against, so everything below runs identically over CDP or an
//!   in-memory fake.
//! * [`resolver`]: layered element resolution (semantic query, geometry
//!   scan → fixed coordinates), post-condition verified.
//! * [`stages`]: the sequential wizard state machine.
//! * [`waits`]: the two suspension flavors, bounded-automatic and
//!   unbounded-manual (human login).
//! * [`extractor`]: tolerant result-page scraping.
//! * [`heuristics`]: the versioned, page-specific selector/geometry data
//!   everything above is parameterized by.
//! * [`diagnostics`]: screenshot + markup capture on failure.

pub mod diagnostics;
pub mod driver;
pub mod extractor;
pub mod heuristics;
pub mod resolver;
pub mod stages;
pub mod ui;
pub mod waits;

use thiserror::Error;

/// Failures of the automation core. `ElementNotFound` and `StageTimeout`
/// are fatal to the current task only; the run continues with the next
/// queued task.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// Every resolution strategy for a target was exhausted.
    #[error("no strategy resolved target '{target}'")]
    ElementNotFound { target: String },

    /// A bounded wait exceeded its deadline.
    #[error("stage '{stage}' timed out after {waited_secs}s")]
    StageTimeout { stage: String, waited_secs: u64 },

    /// The underlying browser driver failed (navigation, script, capture).
    #[error("browser driver error: {0}")]
    Driver(String),
}

impl AutomationError {
    pub fn driver(e: impl std::fmt::Display) -> Self {
        AutomationError::Driver(e.to_string())
    }
}
