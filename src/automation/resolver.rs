//! Layered element resolution.
//!
//! The target page has no stable automation-friendly selectors, so every
//! interactive step resolves its element through an ordered cascade:
//! semantic DOM queries first, then a geometry-scored scan of visible
//! clickable elements, then fixed coordinates as a last resort. A click
//! only counts when its post-condition (the observable follow-on UI
//! state) appears within a short window; otherwise the next candidate or
//! strategy is tried. Ordering strategies from most- to least-semantic
//! keeps false positives down while guaranteeing eventual progress.
//!
//! Strategies are data. Adding or reordering one is a change to a
//! [`super::heuristics::PageHeuristics`] value, not to this loop.

use std::time::Duration;

use crate::core::progress::ProgressLog;

use super::ui::{Probe, UiDriver, UiNode};
use super::waits::{self, WaitError, WaitPolicy};
use super::AutomationError;

/// One attribute- or text-based DOM lookup.
#[derive(Debug, Clone)]
pub struct SemanticQuery {
    pub selector: String,
    /// Case-insensitive substring the node's text must contain.
    pub text_contains: Option<String>,
}

impl SemanticQuery {
    pub fn selector(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text_contains: None,
        }
    }

    pub fn with_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            text_contains: Some(text.into()),
        }
    }

    fn matches(&self, node: &UiNode) -> bool {
        match &self.text_contains {
            None => true,
            Some(needle) => node.text.to_lowercase().contains(&needle.to_lowercase()),
        }
    }
}

/// Geometry expectations for the visual heuristic scan, in viewport
/// fractions. Candidates inside the window score by closeness to its
/// center.
#[derive(Debug, Clone)]
pub struct GeometryScan {
    pub min_area: f64,
    pub max_area: f64,
    /// Acceptable width/height band.
    pub aspect: (f64, f64),
    /// Window the element's center must fall in, as viewport fractions.
    pub region_x: (f64, f64),
    pub region_y: (f64, f64),
    /// Best-scored candidates to actually try clicking.
    pub max_candidates: usize,
}

impl GeometryScan {
    pub fn score(&self, node: &UiNode, viewport: (f64, f64)) -> Option<f64> {
        let (vw, vh) = viewport;
        if vw <= 0.0 || vh <= 0.0 {
            return None;
        }
        let area = node.rect.area();
        if area < self.min_area || area > self.max_area {
            return None;
        }
        let aspect = node.rect.aspect();
        if aspect < self.aspect.0 || aspect > self.aspect.1 {
            return None;
        }
        let (cx, cy) = node.rect.center();
        let (fx, fy) = (cx / vw, cy / vh);
        if fx < self.region_x.0 || fx > self.region_x.1 {
            return None;
        }
        if fy < self.region_y.0 || fy > self.region_y.1 {
            return None;
        }
        let rcx = (self.region_x.0 + self.region_x.1) / 2.0;
        let rcy = (self.region_y.0 + self.region_y.1) / 2.0;
        let dist = ((fx - rcx).powi(2) + (fy - rcy).powi(2)).sqrt();
        Some(1.0 / (1.0 + dist))
    }
}

/// One method of locating a UI element, tried in listed order.
#[derive(Debug, Clone)]
pub enum Strategy {
    Semantic(Vec<SemanticQuery>),
    Geometry(GeometryScan),
    /// Hard-coded viewport positions, page-resolution-dependent, tried in
    /// listed order.
    Coordinates(Vec<(f64, f64)>),
}

impl Strategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Semantic(_) => StrategyKind::Semantic,
            Strategy::Geometry(_) => StrategyKind::Geometry,
            Strategy::Coordinates(_) => StrategyKind::Coordinate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Semantic,
    Geometry,
    Coordinate,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StrategyKind::Semantic => "semantic query",
            StrategyKind::Geometry => "geometry scan",
            StrategyKind::Coordinate => "fixed coordinate",
        })
    }
}

/// The observable UI change that confirms a click had its intended effect.
#[derive(Debug, Clone)]
pub struct PostCondition {
    pub probe: Probe,
    pub timeout: Duration,
    pub interval: Duration,
}

impl PostCondition {
    pub fn new(probe: Probe) -> Self {
        Self {
            probe,
            timeout: Duration::from_secs(8),
            interval: Duration::from_millis(250),
        }
    }

    pub fn within(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A semantic UI target plus everything needed to find and verify it. The
/// name is for logging only; no query ever sees it.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub strategies: Vec<Strategy>,
    pub post: PostCondition,
}

/// How a target was resolved, for logging/telemetry.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Zero-based index into the target's strategy list.
    pub strategy_index: usize,
    pub kind: StrategyKind,
    /// Description of the candidate that worked.
    pub candidate: String,
}

enum Candidate {
    Node(UiNode),
    Point { index: usize, x: f64, y: f64 },
}

impl Candidate {
    fn describe(&self) -> String {
        match self {
            Candidate::Node(n) => n.describe(),
            Candidate::Point { index, x, y } => {
                format!("fixed point #{} ({:.0},{:.0})", index + 1, x, y)
            }
        }
    }
}

/// Try every strategy in order until one candidate's click makes the
/// post-condition pass. Each attempted click is logged; nothing is cached
/// between invocations. All strategies exhausted → `ElementNotFound`.
pub async fn resolve(
    driver: &dyn UiDriver,
    log: &mut ProgressLog,
    target: &Target,
) -> Result<Resolution, AutomationError> {
    let total = target.strategies.len();
    for (index, strategy) in target.strategies.iter().enumerate() {
        let kind = strategy.kind();
        let candidates = collect_candidates(driver, strategy).await?;
        log.info(format!(
            "{}: {} strategy {}/{}: {} candidate(s)",
            target.name,
            kind,
            index + 1,
            total,
            candidates.len()
        ))
        .await;

        for candidate in candidates {
            let desc = candidate.describe();
            match &candidate {
                Candidate::Node(node) => driver.click_node(node).await?,
                Candidate::Point { x, y, .. } => driver.click_at(*x, *y).await?,
            }
            log.info(format!("{}: clicked {} [{}]", target.name, desc, kind))
                .await;

            if post_condition_met(driver, &target.post).await? {
                log.success(format!(
                    "{}: resolved via {} strategy ({})",
                    target.name, kind, desc
                ))
                .await;
                return Ok(Resolution {
                    strategy_index: index,
                    kind,
                    candidate: desc,
                });
            }
        }
    }

    log.error(format!(
        "{}: all {} strategies exhausted",
        target.name, total
    ))
    .await;
    Err(AutomationError::ElementNotFound {
        target: target.name.clone(),
    })
}

async fn collect_candidates(
    driver: &dyn UiDriver,
    strategy: &Strategy,
) -> Result<Vec<Candidate>, AutomationError> {
    match strategy {
        Strategy::Semantic(queries) => {
            let mut out: Vec<Candidate> = Vec::new();
            let mut seen = std::collections::HashSet::new();
            for query in queries {
                for node in driver.query(&query.selector).await? {
                    if query.matches(&node) && seen.insert(node.id) {
                        out.push(Candidate::Node(node));
                    }
                }
            }
            Ok(out)
        }
        Strategy::Geometry(scan) => {
            let viewport = driver.viewport().await?;
            let mut scored: Vec<(f64, UiNode)> = driver
                .interactive_nodes()
                .await?
                .into_iter()
                .filter_map(|n| scan.score(&n, viewport).map(|s| (s, n)))
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(scan.max_candidates);
            Ok(scored
                .into_iter()
                .map(|(_, n)| Candidate::Node(n))
                .collect())
        }
        Strategy::Coordinates(points) => Ok(points
            .iter()
            .enumerate()
            .map(|(index, &(x, y))| Candidate::Point { index, x, y })
            .collect()),
    }
}

async fn post_condition_met(
    driver: &dyn UiDriver,
    post: &PostCondition,
) -> Result<bool, AutomationError> {
    let policy = WaitPolicy::Bounded {
        timeout: post.timeout,
        interval: post.interval,
    };
    match waits::wait_until(policy, || post.probe.check(driver)).await {
        Ok(_) => Ok(true),
        Err(WaitError::TimedOut { .. }) => Ok(false),
        Err(WaitError::Probe(e)) => Err(e),
    }
}
