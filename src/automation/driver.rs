//! Live [`UiDriver`] over a CDP page.
//!
//! Node enumeration runs a collection script in the page: each visible
//! match is tagged with a `data-pilot-nid` attribute and reported with its
//! geometry and an attribute subset. Clicks go back through the page as
//! forced DOM clicks (`el.click()` / `elementFromPoint().click()`), which
//! bypass overlay hit-testing on purpose: the wizard stacks transient
//! layers we must click through.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use chromiumoxide::Page;

use super::ui::{Rect, UiDriver, UiNode};
use super::AutomationError;

/// Attributes worth carrying back for matching and log descriptions.
const COLLECT_SCRIPT: &str = r#"
(() => {
  const sel = __SELECTOR__;
  window.__pilotNid = window.__pilotNid || 1;
  const out = [];
  document.querySelectorAll(sel).forEach((el) => {
    const r = el.getBoundingClientRect();
    if (r.width <= 0 || r.height <= 0) return;
    const st = window.getComputedStyle(el);
    if (st.visibility === 'hidden' || st.display === 'none' || st.opacity === '0') return;
    if (!el.dataset.pilotNid) { el.dataset.pilotNid = String(window.__pilotNid++); }
    const attrs = {};
    for (const name of ['id', 'class', 'role', 'aria-label', 'aria-checked',
                        'aria-haspopup', 'data-testid', 'alt', 'src', 'href', 'type']) {
      const v = el.getAttribute(name);
      if (v !== null) attrs[name] = v;
    }
    out.push({
      id: Number(el.dataset.pilotNid),
      tag: el.tagName.toLowerCase(),
      text: (el.innerText || el.textContent || '').trim().slice(0, 200),
      attrs: attrs,
      rect: { x: r.x, y: r.y, width: r.width, height: r.height },
    });
  });
  return out;
})()
"#;

/// Clickables for the geometry scan: anything with a native or declared
/// click affordance.
const INTERACTIVE_SELECTOR: &str =
    "button, a[href], [role=\"button\"], [role=\"menuitem\"], [onclick], input[type=\"submit\"]";

const CLICK_NODE_SCRIPT: &str = r#"
(() => {
  const el = document.querySelector('[data-pilot-nid="__NID__"]');
  if (!el) return false;
  el.scrollIntoView({ block: 'center', inline: 'center' });
  el.click();
  return true;
})()
"#;

const CLICK_POINT_SCRIPT: &str = r#"
(() => {
  const el = document.elementFromPoint(__X__, __Y__);
  if (!el) return false;
  el.click();
  return true;
})()
"#;

#[derive(serde::Deserialize)]
struct RawNode {
    id: u64,
    tag: String,
    text: String,
    #[serde(default)]
    attrs: BTreeMap<String, String>,
    rect: Rect,
}

impl From<RawNode> for UiNode {
    fn from(raw: RawNode) -> Self {
        UiNode {
            id: raw.id,
            tag: raw.tag,
            text: raw.text,
            attrs: raw.attrs,
            rect: raw.rect,
        }
    }
}

pub struct CdpDriver {
    page: Page,
}

impl CdpDriver {
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    async fn collect(&self, selector: &str) -> Result<Vec<UiNode>, AutomationError> {
        let sel_json =
            serde_json::to_string(selector).map_err(AutomationError::driver)?;
        let script = COLLECT_SCRIPT.replace("__SELECTOR__", &sel_json);
        let raw: Vec<RawNode> = self
            .page
            .evaluate(script)
            .await
            .map_err(AutomationError::driver)?
            .into_value()
            .map_err(AutomationError::driver)?;
        Ok(raw.into_iter().map(UiNode::from).collect())
    }
}

#[async_trait]
impl UiDriver for CdpDriver {
    async fn goto(&self, url: &str) -> Result<(), AutomationError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| AutomationError::Driver(format!("goto({url}) failed: {e}")))?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AutomationError> {
        self.page
            .evaluate("location.href")
            .await
            .map_err(AutomationError::driver)?
            .into_value::<String>()
            .map_err(AutomationError::driver)
    }

    async fn query(&self, selector: &str) -> Result<Vec<UiNode>, AutomationError> {
        self.collect(selector).await
    }

    async fn interactive_nodes(&self) -> Result<Vec<UiNode>, AutomationError> {
        self.collect(INTERACTIVE_SELECTOR).await
    }

    async fn click_node(&self, node: &UiNode) -> Result<(), AutomationError> {
        let script = CLICK_NODE_SCRIPT.replace("__NID__", &node.id.to_string());
        // A vanished node is not an error here: the click simply has no
        // effect and the post-condition decides what happens next.
        self.page
            .evaluate(script)
            .await
            .map_err(AutomationError::driver)?;
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<(), AutomationError> {
        let script = CLICK_POINT_SCRIPT
            .replace("__X__", &format!("{x:.0}"))
            .replace("__Y__", &format!("{y:.0}"));
        self.page
            .evaluate(script)
            .await
            .map_err(AutomationError::driver)?;
        Ok(())
    }

    async fn viewport(&self) -> Result<(f64, f64), AutomationError> {
        self.page
            .evaluate("[window.innerWidth, window.innerHeight]")
            .await
            .map_err(AutomationError::driver)?
            .into_value::<(f64, f64)>()
            .map_err(AutomationError::driver)
    }

    async fn page_html(&self) -> Result<String, AutomationError> {
        self.page
            .content()
            .await
            .map_err(AutomationError::driver)
    }

    async fn screenshot(&self, path: &Path) -> Result<(), AutomationError> {
        use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
        use chromiumoxide::page::ScreenshotParams;

        let bytes = self
            .page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .full_page(true)
                    .build(),
            )
            .await
            .map_err(AutomationError::driver)?;
        tokio::fs::write(path, bytes)
            .await
            .map_err(AutomationError::driver)
    }
}
