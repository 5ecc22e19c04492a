//! The driver seam between the automation core and the browser.
//!
//! Everything above this trait treats the page as a queryable set of
//! visible nodes plus a handful of verbs. Nodes are ephemeral: the page is
//! not under this system's control and can change between stages, so a
//! [`UiNode`] is looked up fresh every time and never cached.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;

use super::AutomationError;

/// Viewport-space bounding box of a visible element.
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// Width over height; tall elements score below 1.0.
    pub fn aspect(&self) -> f64 {
        if self.height <= 0.0 {
            0.0
        } else {
            self.width / self.height
        }
    }

    pub fn min_side(&self) -> f64 {
        self.width.min(self.height)
    }
}

/// One visible element on the current page, as seen at query time.
#[derive(Debug, Clone)]
pub struct UiNode {
    /// Driver-scoped handle, valid only until the page mutates.
    pub id: u64,
    pub tag: String,
    /// Rendered text, trimmed, capped by the driver.
    pub text: String,
    /// Subset of attributes useful for matching/logging (id, class, src,
    /// alt, href, role, aria-label, data-testid).
    pub attrs: BTreeMap<String, String>,
    pub rect: Rect,
}

impl UiNode {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Short human-readable description for progress-log entries.
    pub fn describe(&self) -> String {
        let label = self
            .attr("aria-label")
            .or_else(|| self.attr("data-testid"))
            .or_else(|| self.attr("alt"))
            .map(str::to_string)
            .unwrap_or_else(|| {
                let t = self.text.trim();
                if t.is_empty() {
                    String::from("∅")
                } else {
                    t.chars().take(40).collect()
                }
            });
        let (cx, cy) = self.rect.center();
        format!("<{} \"{}\"> @ ({:.0},{:.0})", self.tag, label, cx, cy)
    }
}

/// Verbs the automation core needs from a browser page.
///
/// Implemented over CDP for live runs and by an in-memory fake in tests;
/// the resolver, stage executor, and extractor only ever see this trait.
#[async_trait]
pub trait UiDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), AutomationError>;

    /// Address of the page after any client-side redirects.
    async fn current_url(&self) -> Result<String, AutomationError>;

    /// Visible elements matching a CSS selector, document order.
    async fn query(&self, selector: &str) -> Result<Vec<UiNode>, AutomationError>;

    /// Visible clickable elements (buttons, links, menu items, anything
    /// with a click affordance) for the geometry scan.
    async fn interactive_nodes(&self) -> Result<Vec<UiNode>, AutomationError>;

    /// Click a previously-queried node. Dispatched as a forced click:
    /// overlay hit-testing is bypassed on purpose.
    async fn click_node(&self, node: &UiNode) -> Result<(), AutomationError>;

    /// Click a fixed viewport coordinate. Last-resort dispatch.
    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError>;

    /// Viewport size in CSS pixels.
    async fn viewport(&self) -> Result<(f64, f64), AutomationError>;

    /// Serialized markup of the current document.
    async fn page_html(&self) -> Result<String, AutomationError>;

    /// Full-page screenshot written to `path`.
    async fn screenshot(&self, path: &Path) -> Result<(), AutomationError>;
}

/// One observable UI condition, polled to confirm a click had its intended
/// effect or a wait's subject has arrived. Data, not code, so it can be
/// logged and exercised without a browser.
#[derive(Debug, Clone)]
pub enum Probe {
    /// At least one visible node matches `selector` (and contains
    /// `text_contains`, case-insensitive, when set).
    Visible {
        selector: String,
        text_contains: Option<String>,
    },
    /// No visible node matches.
    Absent {
        selector: String,
        text_contains: Option<String>,
    },
    /// The page address matches a regex pattern.
    UrlMatches { pattern: String },
}

impl Probe {
    pub fn visible(selector: impl Into<String>) -> Self {
        Probe::Visible {
            selector: selector.into(),
            text_contains: None,
        }
    }

    pub fn visible_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Probe::Visible {
            selector: selector.into(),
            text_contains: Some(text.into()),
        }
    }

    pub fn absent(selector: impl Into<String>) -> Self {
        Probe::Absent {
            selector: selector.into(),
            text_contains: None,
        }
    }

    pub fn absent_text(selector: impl Into<String>, text: impl Into<String>) -> Self {
        Probe::Absent {
            selector: selector.into(),
            text_contains: Some(text.into()),
        }
    }

    pub fn url_matches(pattern: impl Into<String>) -> Self {
        Probe::UrlMatches {
            pattern: pattern.into(),
        }
    }

    pub async fn check(&self, driver: &dyn UiDriver) -> Result<bool, AutomationError> {
        match self {
            Probe::Visible {
                selector,
                text_contains,
            } => Ok(any_match(
                &driver.query(selector).await?,
                text_contains.as_deref(),
            )),
            Probe::Absent {
                selector,
                text_contains,
            } => Ok(!any_match(
                &driver.query(selector).await?,
                text_contains.as_deref(),
            )),
            Probe::UrlMatches { pattern } => {
                let url = driver.current_url().await?;
                let re = regex::Regex::new(pattern)
                    .map_err(|e| AutomationError::Driver(format!("bad url pattern: {e}")))?;
                Ok(re.is_match(&url))
            }
        }
    }
}

impl std::fmt::Display for Probe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Probe::Visible {
                selector,
                text_contains: Some(t),
            } => write!(f, "visible {selector} ~ \"{t}\""),
            Probe::Visible { selector, .. } => write!(f, "visible {selector}"),
            Probe::Absent {
                selector,
                text_contains: Some(t),
            } => write!(f, "absent {selector} ~ \"{t}\""),
            Probe::Absent { selector, .. } => write!(f, "absent {selector}"),
            Probe::UrlMatches { pattern } => write!(f, "url ~ /{pattern}/"),
        }
    }
}

fn any_match(nodes: &[UiNode], text_contains: Option<&str>) -> bool {
    match text_contains {
        None => !nodes.is_empty(),
        Some(needle) => {
            let needle = needle.to_lowercase();
            nodes.iter().any(|n| n.text.to_lowercase().contains(&needle))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(tag: &str, text: &str) -> UiNode {
        UiNode {
            id: 1,
            tag: tag.into(),
            text: text.into(),
            attrs: BTreeMap::new(),
            rect: Rect {
                x: 10.0,
                y: 20.0,
                width: 40.0,
                height: 40.0,
            },
        }
    }

    #[test]
    fn test_text_filter_is_case_insensitive() {
        let nodes = vec![node("button", "Create Character")];
        assert!(any_match(&nodes, Some("create char")));
        assert!(!any_match(&nodes, Some("delete")));
    }

    #[test]
    fn test_describe_prefers_aria_label() {
        let mut n = node("button", "⋯");
        n.attrs.insert("aria-label".into(), "More options".into());
        let desc = n.describe();
        assert!(desc.contains("More options"));
        assert!(desc.contains("(30,40)"));
    }

    #[test]
    fn test_rect_helpers() {
        let r = Rect {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 50.0,
        };
        assert_eq!(r.center(), (50.0, 25.0));
        assert_eq!(r.area(), 5000.0);
        assert_eq!(r.aspect(), 2.0);
        assert_eq!(r.min_side(), 50.0);
    }
}
