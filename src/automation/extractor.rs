//! Result extraction: tolerant scraping of the finished profile page.
//!
//! Three independent heuristics: identifier from the address, display name
//! from heading-like elements, avatar from image scans. Each may come up
//! empty without failing the task; gaps are logged as warnings and the
//! task still completes. Only pipeline-stage failures fail a task.

use aho_corasick::AhoCorasick;
use regex::Regex;
use scraper::Html;

use crate::core::progress::ProgressLog;
use crate::core::types::CharacterProfile;

use super::heuristics::ExtractionHeuristics;
use super::ui::UiDriver;

/// Scrape the current page for the three optional result fields. Never
/// raises past this stage; a driver error on one field just leaves that
/// field empty.
pub async fn extract_profile(
    driver: &dyn UiDriver,
    heuristics: &ExtractionHeuristics,
    log: &mut ProgressLog,
) -> CharacterProfile {
    let profile_url = driver.current_url().await.ok();

    let remote_id = profile_url
        .as_deref()
        .and_then(|url| extract_remote_id(url, heuristics));

    let display_name = match extract_display_name(driver, heuristics, remote_id.as_deref()).await {
        Ok(name) => name,
        Err(e) => {
            log.warn(format!("extraction: name scan errored: {e}")).await;
            None
        }
    };

    let avatar_url = match extract_avatar_url(driver, heuristics).await {
        Ok(url) => url,
        Err(e) => {
            log.warn(format!("extraction: avatar scan errored: {e}")).await;
            None
        }
    };

    let profile = CharacterProfile {
        remote_id,
        profile_url,
        display_name,
        avatar_url,
    };

    for gap in profile.gaps() {
        log.warn(format!("extraction: {gap} not found on result page"))
            .await;
    }
    if let Some(name) = &profile.display_name {
        log.success(format!("extracted character \"{name}\"")).await;
    }

    profile
}

fn extract_remote_id(url: &str, heuristics: &ExtractionHeuristics) -> Option<String> {
    let re = Regex::new(&heuristics.profile_id_pattern).ok()?;
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

async fn extract_display_name(
    driver: &dyn UiDriver,
    heuristics: &ExtractionHeuristics,
    remote_id: Option<&str>,
) -> Result<Option<String>, super::AutomationError> {
    let skip = phrase_matcher(&heuristics.name_skip_phrases);

    // Prioritized live-DOM scan; first plausible candidate wins.
    for selector in &heuristics.name_selectors {
        for node in driver.query(selector).await? {
            let text = node.text.trim();
            if plausible_name(text, remote_id, heuristics, skip.as_ref()) {
                return Ok(Some(text.to_string()));
            }
        }
    }

    // Fallback: the page usually renders "<name> Character by <author>";
    // anchor on the boilerplate and take what precedes it.
    let html = driver.page_html().await?;
    let doc = Html::parse_document(&html);
    let text: String = doc
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ");
    if let Ok(re) = Regex::new(&heuristics.name_anchor_pattern) {
        if let Some(caps) = re.captures(&text) {
            let candidate = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            if plausible_name(&candidate, remote_id, heuristics, skip.as_ref()) {
                return Ok(Some(candidate));
            }
        }
    }

    Ok(None)
}

fn plausible_name(
    text: &str,
    remote_id: Option<&str>,
    heuristics: &ExtractionHeuristics,
    skip: Option<&AhoCorasick>,
) -> bool {
    let len = text.chars().count();
    if len < heuristics.name_len.0 || len > heuristics.name_len.1 {
        return false;
    }
    if let Some(id) = remote_id {
        if text.eq_ignore_ascii_case(id) {
            return false;
        }
    }
    if let Some(skip) = skip {
        if skip.is_match(&text.to_lowercase()) {
            return false;
        }
    }
    true
}

async fn extract_avatar_url(
    driver: &dyn UiDriver,
    heuristics: &ExtractionHeuristics,
) -> Result<Option<String>, super::AutomationError> {
    // First pass: specific selectors, strict size floor.
    for selector in &heuristics.avatar_selectors {
        for node in driver.query(selector).await? {
            if node.rect.min_side() >= heuristics.avatar_min_px {
                if let Some(src) = node.attr("src") {
                    return Ok(Some(src.to_string()));
                }
            }
        }
    }

    // Fallback sweep: any image of at least icon size, in the upper page
    // region, not named like an icon or logo.
    let icons = phrase_matcher(&heuristics.icon_url_patterns);
    let (_, vh) = driver.viewport().await?;
    let y_limit = vh * heuristics.avatar_region_y_frac;
    for node in driver.query("img").await? {
        if node.rect.min_side() < heuristics.avatar_fallback_min_px {
            continue;
        }
        if node.rect.y > y_limit {
            continue;
        }
        let Some(src) = node.attr("src") else { continue };
        let haystack = format!(
            "{} {}",
            src.to_lowercase(),
            node.attr("alt").unwrap_or_default().to_lowercase()
        );
        if let Some(icons) = &icons {
            if icons.is_match(&haystack) {
                continue;
            }
        }
        return Ok(Some(src.to_string()));
    }

    Ok(None)
}

fn phrase_matcher(phrases: &[String]) -> Option<AhoCorasick> {
    if phrases.is_empty() {
        return None;
    }
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(phrases)
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::heuristics::PageHeuristics;
    use crate::automation::ui::Rect;
    use crate::testkit::{node_with, FakeUi, InMemoryStore};

    fn heuristics() -> ExtractionHeuristics {
        PageHeuristics::v1().extraction
    }

    #[tokio::test]
    async fn test_full_extraction_from_live_dom() {
        let store = InMemoryStore::seeded("t1");
        let ui = FakeUi::new("https://example.test/characters/luna_9x", (1280.0, 800.0));
        ui.add_node(node_with(
            "h1",
            "Luna the Fox",
            &[],
            Rect {
                x: 100.0,
                y: 120.0,
                width: 300.0,
                height: 40.0,
            },
        ));
        ui.add_node(node_with(
            "img",
            "",
            &[("src", "https://cdn.example.test/avatars/luna.png")],
            Rect {
                x: 40.0,
                y: 60.0,
                width: 128.0,
                height: 128.0,
            },
        ));

        let mut log = ProgressLog::new("t1", Vec::new(), store);
        let profile = extract_profile(ui.as_ref(), &heuristics(), &mut log).await;
        assert_eq!(profile.remote_id.as_deref(), Some("luna_9x"));
        assert_eq!(profile.display_name.as_deref(), Some("Luna the Fox"));
        assert_eq!(
            profile.avatar_url.as_deref(),
            Some("https://cdn.example.test/avatars/luna.png")
        );
    }

    #[tokio::test]
    async fn test_identifier_only_page_yields_partial_profile() {
        // Recognizable address, but nothing matches the name or image
        // heuristics. Extraction must still return, with null fields.
        let store = InMemoryStore::seeded("t1");
        let ui = FakeUi::new("https://example.test/characters/abc123", (1280.0, 800.0));

        let mut log = ProgressLog::new("t1", Vec::new(), store);
        let profile = extract_profile(ui.as_ref(), &heuristics(), &mut log).await;
        assert_eq!(profile.remote_id.as_deref(), Some("abc123"));
        assert!(profile.display_name.is_none());
        assert!(profile.avatar_url.is_none());
        assert_eq!(
            log.entries()
                .iter()
                .filter(|e| e.message.contains("not found on result page"))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_name_skips_identifier_and_boilerplate() {
        let store = InMemoryStore::seeded("t1");
        let ui = FakeUi::new("https://example.test/characters/luna_9x", (1280.0, 800.0));
        // Headings that must all be rejected: the raw identifier, the
        // boilerplate attribution, a one-character fragment.
        for text in ["luna_9x", "Character by someone", "•"] {
            ui.add_node(node_with(
                "h1",
                text,
                &[],
                Rect {
                    x: 100.0,
                    y: 120.0,
                    width: 300.0,
                    height: 40.0,
                },
            ));
        }

        let mut log = ProgressLog::new("t1", Vec::new(), store);
        let profile = extract_profile(ui.as_ref(), &heuristics(), &mut log).await;
        assert!(profile.display_name.is_none());
    }

    #[tokio::test]
    async fn test_name_fallback_parses_markup_before_anchor() {
        let store = InMemoryStore::seeded("t1");
        let ui = FakeUi::new("https://example.test/characters/luna_9x", (1280.0, 800.0));
        ui.set_html(
            "<html><body><div>Luna the Fox</div><div>Character by someone</div></body></html>",
        );

        let mut log = ProgressLog::new("t1", Vec::new(), store);
        let profile = extract_profile(ui.as_ref(), &heuristics(), &mut log).await;
        assert_eq!(profile.display_name.as_deref(), Some("Luna the Fox"));
    }

    #[tokio::test]
    async fn test_avatar_fallback_rejects_icons() {
        let store = InMemoryStore::seeded("t1");
        let ui = FakeUi::new("https://example.test/characters/luna_9x", (1280.0, 800.0));
        // Icon-named image is skipped even though it is big enough; the
        // unnamed one in the upper region wins.
        ui.add_node(node_with(
            "img",
            "",
            &[("src", "https://example.test/static/logo-large.png")],
            Rect {
                x: 10.0,
                y: 10.0,
                width: 64.0,
                height: 64.0,
            },
        ));
        ui.add_node(node_with(
            "img",
            "",
            &[("src", "https://example.test/media/u/luna.webp")],
            Rect {
                x: 40.0,
                y: 100.0,
                width: 64.0,
                height: 64.0,
            },
        ));

        let mut log = ProgressLog::new("t1", Vec::new(), store);
        let profile = extract_profile(ui.as_ref(), &heuristics(), &mut log).await;
        assert_eq!(
            profile.avatar_url.as_deref(),
            Some("https://example.test/media/u/luna.webp")
        );
    }
}
