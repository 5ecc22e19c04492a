//! In-memory fakes shared by the unit tests: a scripted task store and a
//! scriptable page model behind [`UiDriver`]. No browser, no network, no
//! wall clock; time-sensitive tests run under paused tokio time.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::automation::resolver::PostCondition;
use crate::automation::ui::{Rect, UiDriver, UiNode};
use crate::automation::AutomationError;
use crate::core::types::{Task, TaskPatch, TaskStatus};
use crate::store::{StoreError, TaskStore};

// ─── task store ──────────────────────────────────────────────────────────

pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
    fetch_calls: AtomicUsize,
}

struct StoreInner {
    tasks: Vec<Task>,
    fail_updates: bool,
    updates: Vec<(String, TaskPatch)>,
}

impl InMemoryStore {
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                tasks,
                fail_updates: false,
                updates: Vec::new(),
            }),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// One pending task with a source reference, the common fixture.
    pub fn seeded(id: &str) -> Arc<Self> {
        Arc::new(Self::with_tasks(vec![pending_task(
            id,
            "https://example.test/p/abc",
        )]))
    }

    pub fn task(&self, id: &str) -> Task {
        self.inner
            .lock()
            .unwrap()
            .tasks
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .unwrap_or_else(|| panic!("no task {id} in fake store"))
    }

    pub fn fail_updates(&self, fail: bool) {
        self.inner.lock().unwrap().fail_updates = fail;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Status values written for one task, in order.
    pub fn status_updates(&self, id: &str) -> Vec<TaskStatus> {
        self.inner
            .lock()
            .unwrap()
            .updates
            .iter()
            .filter(|(tid, patch)| tid == id && patch.status.is_some())
            .map(|(_, patch)| patch.status.unwrap())
            .collect()
    }
}

pub fn pending_task(id: &str, source_url: &str) -> Task {
    Task {
        id: id.into(),
        source_video_url: Some(source_url.into()),
        character_id: None,
        status: TaskStatus::Pending,
        logs: Vec::new(),
        remote_id: None,
        profile_url: None,
        display_name: None,
        avatar_url: None,
        error_message: None,
        created_at: None,
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn fetch_pending(&self) -> Result<Vec<Task>, StoreError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && t.source_video_url.is_some())
            .cloned()
            .collect())
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_updates {
            return Err(StoreError::Transport("fake store offline".into()));
        }
        inner.updates.push((id.to_string(), patch.clone()));
        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| StoreError::Http {
                status: 404,
                body: format!("no task {id}"),
            })?;
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(logs) = &patch.logs {
            task.logs = logs.clone();
        }
        if let Some(v) = &patch.remote_id {
            task.remote_id = Some(v.clone());
        }
        if let Some(v) = &patch.profile_url {
            task.profile_url = Some(v.clone());
        }
        if let Some(v) = &patch.display_name {
            task.display_name = Some(v.clone());
        }
        if let Some(v) = &patch.avatar_url {
            task.avatar_url = Some(v.clone());
        }
        if let Some(v) = &patch.error_message {
            task.error_message = Some(v.clone());
        }
        Ok(())
    }
}

// ─── fake page ───────────────────────────────────────────────────────────

type Mutation = Box<dyn Fn(&mut PageModel) + Send + Sync>;

/// The fake's mutable page state. Click rules receive it and may mutate
/// nodes, the address, and even attach rules for nodes they reveal; that
/// is how multi-screen wizard chains are scripted.
pub struct PageModel {
    url: String,
    html: String,
    nodes: Vec<UiNode>,
    next_id: u64,
    node_rules: HashMap<u64, Mutation>,
    point_rules: Vec<(f64, f64, Mutation)>,
}

impl PageModel {
    pub fn add(&mut self, mut node: UiNode) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        node.id = id;
        self.nodes.push(node);
        id
    }

    pub fn add_with_rule(
        &mut self,
        node: UiNode,
        rule: impl Fn(&mut PageModel) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.add(node);
        self.node_rules.insert(id, Box::new(rule));
        id
    }

    pub fn on_node_click(&mut self, id: u64, rule: impl Fn(&mut PageModel) + Send + Sync + 'static) {
        self.node_rules.insert(id, Box::new(rule));
    }

    pub fn on_point_click(
        &mut self,
        point: (f64, f64),
        rule: impl Fn(&mut PageModel) + Send + Sync + 'static,
    ) {
        self.point_rules.push((point.0, point.1, Box::new(rule)));
    }

    pub fn remove_matching(&mut self, selector: &str) {
        self.nodes.retain(|n| !selector_matches(selector, n));
    }

    pub fn set_url(&mut self, url: &str) {
        self.url = url.to_string();
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Click {
    Node { id: u64 },
    Point { x: f64, y: f64 },
}

struct FakeState {
    page: PageModel,
    viewport: (f64, f64),
    clicks: Vec<Click>,
}

/// Scriptable [`UiDriver`]: tests arrange nodes and attach click rules
/// that mutate the page the way the real wizard would.
pub struct FakeUi {
    state: Mutex<FakeState>,
}

impl FakeUi {
    pub fn new(url: &str, viewport: (f64, f64)) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                page: PageModel {
                    url: url.into(),
                    html: String::new(),
                    nodes: Vec::new(),
                    next_id: 1,
                    node_rules: HashMap::new(),
                    point_rules: Vec::new(),
                },
                viewport,
                clicks: Vec::new(),
            }),
        })
    }

    pub fn add_node(&self, node: UiNode) -> u64 {
        self.state.lock().unwrap().page.add(node)
    }

    pub fn set_html(&self, html: &str) {
        self.state.lock().unwrap().page.html = html.to_string();
    }

    pub fn on_node_click(&self, id: u64, rule: impl Fn(&mut PageModel) + Send + Sync + 'static) {
        self.state.lock().unwrap().page.on_node_click(id, rule);
    }

    pub fn on_point_click(
        &self,
        point: (f64, f64),
        rule: impl Fn(&mut PageModel) + Send + Sync + 'static,
    ) {
        self.state.lock().unwrap().page.on_point_click(point, rule);
    }

    /// Convenience: clicking the node reveals one new element matching a
    /// simple selector, with the given text.
    pub fn reveal_on_node_click(&self, id: u64, selector: &str, text: &str) {
        let node = node_from_selector(selector, text);
        self.on_node_click(id, move |page| {
            page.add(node.clone());
        });
    }

    /// Convenience: clicking exactly this point reveals one new element.
    pub fn reveal_on_point_click(&self, point: (f64, f64), selector: &str, text: &str) {
        let node = node_from_selector(selector, text);
        self.on_point_click(point, move |page| {
            page.add(node.clone());
        });
    }

    pub fn clicks(&self) -> Vec<Click> {
        self.state.lock().unwrap().clicks.clone()
    }
}

#[async_trait]
impl UiDriver for FakeUi {
    async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        self.state.lock().unwrap().page.url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        Ok(self.state.lock().unwrap().page.url.clone())
    }

    async fn query(&self, selector: &str) -> Result<Vec<UiNode>, AutomationError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .page
            .nodes
            .iter()
            .filter(|n| selector_matches(selector, n))
            .cloned()
            .collect())
    }

    async fn interactive_nodes(&self) -> Result<Vec<UiNode>, AutomationError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .page
            .nodes
            .iter()
            .filter(|n| {
                matches!(n.tag.as_str(), "button" | "a")
                    || matches!(
                        n.attrs.get("role").map(String::as_str),
                        Some("button") | Some("menuitem")
                    )
                    || n.attrs.contains_key("onclick")
            })
            .cloned()
            .collect())
    }

    async fn click_node(&self, node: &UiNode) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(Click::Node { id: node.id });
        if let Some(rule) = state.page.node_rules.remove(&node.id) {
            rule(&mut state.page);
            state.page.node_rules.entry(node.id).or_insert(rule);
        }
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.clicks.push(Click::Point { x, y });
        let hit = state
            .page
            .point_rules
            .iter()
            .position(|(px, py, _)| (px - x).abs() < 1.0 && (py - y).abs() < 1.0);
        if let Some(i) = hit {
            let (px, py, rule) = state.page.point_rules.remove(i);
            rule(&mut state.page);
            state.page.point_rules.push((px, py, rule));
        }
        Ok(())
    }

    async fn viewport(&self) -> Result<(f64, f64), AutomationError> {
        Ok(self.state.lock().unwrap().viewport)
    }

    async fn page_html(&self) -> Result<String, AutomationError> {
        Ok(self.state.lock().unwrap().page.html.clone())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), AutomationError> {
        std::fs::write(path, b"\x89PNG\r\n\x1a\nfake").map_err(AutomationError::driver)
    }
}

#[async_trait]
impl UiDriver for Arc<FakeUi> {
    async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        UiDriver::goto(&**self, url).await
    }
    async fn current_url(&self) -> Result<String, AutomationError> {
        UiDriver::current_url(&**self).await
    }
    async fn query(&self, selector: &str) -> Result<Vec<UiNode>, AutomationError> {
        UiDriver::query(&**self, selector).await
    }
    async fn interactive_nodes(&self) -> Result<Vec<UiNode>, AutomationError> {
        UiDriver::interactive_nodes(&**self).await
    }
    async fn click_node(&self, node: &UiNode) -> Result<(), AutomationError> {
        UiDriver::click_node(&**self, node).await
    }
    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        UiDriver::click_at(&**self, x, y).await
    }
    async fn viewport(&self) -> Result<(f64, f64), AutomationError> {
        UiDriver::viewport(&**self).await
    }
    async fn page_html(&self) -> Result<String, AutomationError> {
        UiDriver::page_html(&**self).await
    }
    async fn screenshot(&self, path: &Path) -> Result<(), AutomationError> {
        UiDriver::screenshot(&**self, path).await
    }
}

// ─── helpers ─────────────────────────────────────────────────────────────

pub fn node_with(tag: &str, text: &str, attrs: &[(&str, &str)], rect: Rect) -> UiNode {
    UiNode {
        id: 0,
        tag: tag.into(),
        text: text.into(),
        attrs: attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        rect,
    }
}

/// Build a node that satisfies a simple selector (`tag`, `[attr="v"]`,
/// `tag[attr*="v"]`), for reveal-style click rules.
pub fn node_from_selector(selector: &str, text: &str) -> UiNode {
    let first = selector.split(',').next().unwrap_or(selector).trim();
    let mut tag = "div".to_string();
    let mut attrs = BTreeMap::new();

    let tag_end = first
        .find(|c| c == '[' || c == '.' || c == '#')
        .unwrap_or(first.len());
    if tag_end > 0 {
        tag = first[..tag_end].to_string();
    }
    let mut rest = &first[tag_end..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else { break };
        let body = &stripped[..close];
        rest = &stripped[close + 1..];
        let (name, value) = if let Some(i) = body.find("*=") {
            (&body[..i], &body[i + 2..])
        } else if let Some(i) = body.find('=') {
            (&body[..i], &body[i + 1..])
        } else {
            (body, "")
        };
        attrs.insert(
            name.trim().to_string(),
            value.trim().trim_matches('"').trim_matches('\'').to_string(),
        );
    }

    UiNode {
        id: 0,
        tag,
        text: text.into(),
        attrs,
        rect: Rect {
            x: 700.0,
            y: 240.0,
            width: 200.0,
            height: 40.0,
        },
    }
}

/// Post-condition with test-scale timings.
pub fn quick_post(probe: crate::automation::ui::Probe) -> PostCondition {
    PostCondition {
        probe,
        timeout: std::time::Duration::from_millis(50),
        interval: std::time::Duration::from_millis(10),
    }
}

/// Tiny CSS-subset matcher for the fake: `tag`, `[attr]`, `[attr="v"]`,
/// `[attr*="v"]`, `.class`, `#id`, compounds of those, comma unions.
pub fn selector_matches(selector: &str, node: &UiNode) -> bool {
    selector
        .split(',')
        .any(|part| compound_matches(part.trim(), node))
}

fn compound_matches(part: &str, node: &UiNode) -> bool {
    if part.is_empty() {
        return false;
    }
    let tag_end = part
        .find(|c| c == '[' || c == '.' || c == '#')
        .unwrap_or(part.len());
    let tag = &part[..tag_end];
    if !tag.is_empty() && tag != "*" && !node.tag.eq_ignore_ascii_case(tag) {
        return false;
    }

    let mut rest = &part[tag_end..];
    while !rest.is_empty() {
        if let Some(stripped) = rest.strip_prefix('[') {
            let Some(close) = stripped.find(']') else {
                return false;
            };
            let body = &stripped[..close];
            rest = &stripped[close + 1..];
            if !attr_matches(body, node) {
                return false;
            }
        } else if let Some(stripped) = rest.strip_prefix('.') {
            let end = stripped
                .find(|c| c == '[' || c == '.' || c == '#')
                .unwrap_or(stripped.len());
            let class = &stripped[..end];
            rest = &stripped[end..];
            let has = node
                .attrs
                .get("class")
                .map(|c| c.split_whitespace().any(|w| w == class))
                .unwrap_or(false);
            if !has {
                return false;
            }
        } else if let Some(stripped) = rest.strip_prefix('#') {
            let end = stripped
                .find(|c| c == '[' || c == '.' || c == '#')
                .unwrap_or(stripped.len());
            let id = &stripped[..end];
            rest = &stripped[end..];
            if node.attrs.get("id").map(String::as_str) != Some(id) {
                return false;
            }
        } else {
            return false;
        }
    }
    true
}

fn attr_matches(body: &str, node: &UiNode) -> bool {
    let (name, op, value) = if let Some(i) = body.find("*=") {
        (&body[..i], "*=", &body[i + 2..])
    } else if let Some(i) = body.find('=') {
        (&body[..i], "=", &body[i + 1..])
    } else {
        (body, "", "")
    };
    let name = name.trim();
    let value = value.trim().trim_matches('"').trim_matches('\'');
    let Some(actual) = node.attrs.get(name) else {
        return false;
    };
    match op {
        "" => true,
        "=" => actual.eq_ignore_ascii_case(value),
        "*=" => actual.to_lowercase().contains(&value.to_lowercase()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_matcher_subset() {
        let node = node_with(
            "button",
            "Next",
            &[
                ("aria-label", "Next step"),
                ("class", "btn primary"),
                ("id", "go"),
            ],
            Rect {
                x: 0.0,
                y: 0.0,
                width: 40.0,
                height: 40.0,
            },
        );
        assert!(selector_matches("button", &node));
        assert!(selector_matches("button[aria-label*=\"Next\"]", &node));
        assert!(selector_matches("[aria-label=\"next step\"]", &node));
        assert!(selector_matches(".primary", &node));
        assert!(selector_matches("#go", &node));
        assert!(selector_matches("a, button.btn", &node));
        assert!(!selector_matches("a", &node));
        assert!(!selector_matches("button[aria-label*=\"Back\"]", &node));
        assert!(!selector_matches(".secondary", &node));
    }

    #[test]
    fn test_node_from_selector_round_trips_through_matcher() {
        let node = node_from_selector("[role=\"menuitem\"]", "Create character");
        assert!(selector_matches("[role=\"menuitem\"]", &node));
        assert_eq!(node.text, "Create character");
    }
}
