//! Versioned page heuristics.
//!
//! Everything here is trial-and-error knowledge about one third-party
//! page's current markup: selector lists, geometry windows, fallback
//! coordinates, boilerplate phrases. The upstream page can change layout
//! without notice and silently break any of it, so it all lives in one
//! replaceable value instead of being spread through the pipeline. Bump
//! the version when retuning; the pipeline itself never changes for that.

use std::time::Duration;

use super::resolver::{GeometryScan, PostCondition, SemanticQuery, Strategy, Target};
use super::ui::{Probe, UiDriver};
use super::AutomationError;

/// The full heuristic set one pipeline run is parameterized by.
#[derive(Debug, Clone)]
pub struct PageHeuristics {
    pub version: &'static str,
    pub login: LoginHeuristics,
    pub overflow_menu: Target,
    pub create_item: Target,
    pub trim_confirm: Target,
    /// The external service's processing phase is done when this passes.
    pub processing_done: Probe,
    /// The accept-defaults confirmation screens, in wizard order.
    pub accept_screens: Vec<Target>,
    pub visibility_option: Target,
    pub save: Target,
    /// The result page's address shape.
    pub result_url_pattern: String,
    pub extraction: ExtractionHeuristics,
}

/// Login is detected by absence: as long as any logged-out marker is
/// visible, a human still has work to do.
#[derive(Debug, Clone)]
pub struct LoginHeuristics {
    pub logged_out_markers: Vec<SemanticQuery>,
}

impl LoginHeuristics {
    pub async fn is_logged_in(&self, driver: &dyn UiDriver) -> Result<bool, AutomationError> {
        for marker in &self.logged_out_markers {
            let nodes = driver.query(&marker.selector).await?;
            let needle = marker.text_contains.as_deref().map(str::to_lowercase);
            let hit = nodes.iter().any(|n| match &needle {
                None => true,
                Some(t) => n.text.to_lowercase().contains(t),
            });
            if hit {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Result-page extraction knowledge. All three fields are independent and
/// tolerant; see `automation::extractor`.
#[derive(Debug, Clone)]
pub struct ExtractionHeuristics {
    /// Capture group 1 is the external identifier.
    pub profile_id_pattern: String,
    /// Heading-like and name-labeled elements, most specific first.
    pub name_selectors: Vec<String>,
    /// Boilerplate a candidate name must not contain.
    pub name_skip_phrases: Vec<String>,
    /// Plausible display-name length, inclusive.
    pub name_len: (usize, usize),
    /// Fallback: the text preceding this anchor in the page markup.
    pub name_anchor_pattern: String,
    /// Image selectors, most specific first.
    pub avatar_selectors: Vec<String>,
    /// Minimum rendered side for a first-pass avatar match.
    pub avatar_min_px: f64,
    /// Looser floor for the catch-all image sweep.
    pub avatar_fallback_min_px: f64,
    /// The avatar sits in the upper part of the page; fallback candidates
    /// below this viewport fraction are ignored.
    pub avatar_region_y_frac: f64,
    /// URL/alt substrings that mark an image as an icon or logo.
    pub icon_url_patterns: Vec<String>,
}

impl PageHeuristics {
    /// Current tuning for the character-creation wizard.
    pub fn v1() -> Self {
        let bottom_right_button = GeometryScan {
            min_area: 900.0,
            max_area: 16_000.0,
            aspect: (0.7, 4.0),
            region_x: (0.45, 1.0),
            region_y: (0.55, 1.0),
            max_candidates: 3,
        };

        PageHeuristics {
            version: "v1",
            login: LoginHeuristics {
                logged_out_markers: vec![
                    SemanticQuery::with_text("button", "log in"),
                    SemanticQuery::with_text("a", "log in"),
                    SemanticQuery::with_text("button", "sign up"),
                ],
            },
            overflow_menu: Target {
                name: "overflow menu button".into(),
                strategies: vec![
                    Strategy::Semantic(vec![
                        SemanticQuery::selector("button[aria-label*=\"More\"]"),
                        SemanticQuery::selector("button[aria-haspopup=\"menu\"]"),
                        SemanticQuery::selector("[data-testid=\"video-options\"]"),
                    ]),
                    // Small square control in the upper-right of the media
                    // card.
                    Strategy::Geometry(GeometryScan {
                        min_area: 300.0,
                        max_area: 6_400.0,
                        aspect: (0.6, 1.6),
                        region_x: (0.55, 1.0),
                        region_y: (0.0, 0.45),
                        max_candidates: 4,
                    }),
                    Strategy::Coordinates(vec![(1180.0, 96.0), (1156.0, 128.0), (640.0, 96.0)]),
                ],
                post: PostCondition::new(Probe::visible_text("[role=\"menuitem\"]", "create")),
            },
            create_item: Target {
                name: "create-character menu item".into(),
                strategies: vec![
                    Strategy::Semantic(vec![
                        SemanticQuery::with_text("[role=\"menuitem\"]", "create character"),
                        SemanticQuery::with_text("[role=\"menuitem\"]", "character"),
                        SemanticQuery::with_text("button", "create character"),
                    ]),
                    // Open menus render as a narrow column of rows on the
                    // right half of the viewport.
                    Strategy::Geometry(GeometryScan {
                        min_area: 2_000.0,
                        max_area: 30_000.0,
                        aspect: (2.0, 20.0),
                        region_x: (0.4, 1.0),
                        region_y: (0.0, 0.7),
                        max_candidates: 4,
                    }),
                ],
                post: PostCondition::new(Probe::visible("[role=\"dialog\"]")),
            },
            trim_confirm: Target {
                name: "trim confirm arrow".into(),
                strategies: vec![
                    Strategy::Semantic(vec![
                        SemanticQuery::selector("button[aria-label*=\"Next\"]"),
                        SemanticQuery::selector("button[aria-label*=\"Continue\"]"),
                        SemanticQuery::selector("button[aria-label*=\"Done\"]"),
                    ]),
                    Strategy::Geometry(GeometryScan {
                        min_area: 900.0,
                        max_area: 10_000.0,
                        aspect: (0.8, 1.25),
                        region_x: (0.5, 1.0),
                        region_y: (0.5, 1.0),
                        max_candidates: 3,
                    }),
                    Strategy::Coordinates(vec![(1024.0, 672.0), (960.0, 640.0)]),
                ],
                post: PostCondition::new(Probe::visible(
                    "[role=\"progressbar\"], [aria-busy=\"true\"]",
                ))
                .within(Duration::from_secs(12)),
            },
            processing_done: Probe::visible_text("button", "next"),
            accept_screens: vec![
                Target {
                    name: "confirmation screen 1".into(),
                    strategies: vec![
                        Strategy::Semantic(vec![
                            SemanticQuery::with_text("button", "next"),
                            SemanticQuery::selector("button[aria-label*=\"Next\"]"),
                        ]),
                        Strategy::Geometry(bottom_right_button.clone()),
                    ],
                    post: PostCondition::new(Probe::visible_text("button", "next")),
                },
                Target {
                    name: "confirmation screen 2".into(),
                    strategies: vec![
                        Strategy::Semantic(vec![
                            SemanticQuery::with_text("button", "next"),
                            SemanticQuery::selector("button[aria-label*=\"Next\"]"),
                        ]),
                        Strategy::Geometry(bottom_right_button.clone()),
                    ],
                    post: PostCondition::new(Probe::visible_text("button", "next")),
                },
                Target {
                    name: "confirmation screen 3".into(),
                    strategies: vec![
                        Strategy::Semantic(vec![
                            SemanticQuery::with_text("button", "next"),
                            SemanticQuery::selector("button[aria-label*=\"Next\"]"),
                        ]),
                        Strategy::Geometry(bottom_right_button.clone()),
                    ],
                    // The visibility chooser marks the end of the
                    // accept-defaults run.
                    post: PostCondition::new(Probe::visible(
                        "[role=\"radio\"], [role=\"radiogroup\"]",
                    )),
                },
            ],
            visibility_option: Target {
                name: "visibility option".into(),
                strategies: vec![Strategy::Semantic(vec![
                    SemanticQuery::with_text("[role=\"radio\"]", "only me"),
                    SemanticQuery::selector("[role=\"radio\"]"),
                    SemanticQuery::selector("input[type=\"radio\"]"),
                ])],
                post: PostCondition::new(Probe::visible("[aria-checked=\"true\"]")),
            },
            save: Target {
                name: "save button".into(),
                strategies: vec![
                    Strategy::Semantic(vec![
                        SemanticQuery::with_text("button", "save"),
                        SemanticQuery::with_text("button", "create"),
                        SemanticQuery::selector("button[aria-label*=\"Save\"]"),
                    ]),
                    Strategy::Geometry(bottom_right_button),
                ],
                post: PostCondition::new(Probe::absent("[role=\"dialog\"]"))
                    .within(Duration::from_secs(12)),
            },
            result_url_pattern: r"/characters/[A-Za-z0-9_-]+".into(),
            extraction: ExtractionHeuristics {
                profile_id_pattern: r"/characters/([A-Za-z0-9_-]+)".into(),
                name_selectors: vec![
                    "[data-testid*=\"name\"]".into(),
                    "[class*=\"character-name\"]".into(),
                    "[class*=\"profile-name\"]".into(),
                    "h1".into(),
                    "h2".into(),
                ],
                name_skip_phrases: vec![
                    "character by".into(),
                    "untitled".into(),
                    "log in".into(),
                    "sign up".into(),
                    "create".into(),
                ],
                name_len: (2, 80),
                name_anchor_pattern: r"([A-Za-z0-9][\w'’. -]{0,78}?)\s*Character by".into(),
                avatar_selectors: vec![
                    "img[src*=\"avatar\"]".into(),
                    "img[alt*=\"avatar\"]".into(),
                    "img[class*=\"avatar\"]".into(),
                    "img[src*=\"profile\"]".into(),
                    "img[src*=\"cdn\"]".into(),
                ],
                avatar_min_px: 96.0,
                avatar_fallback_min_px: 48.0,
                avatar_region_y_frac: 0.6,
                icon_url_patterns: vec![
                    "icon".into(),
                    "logo".into(),
                    "sprite".into(),
                    "favicon".into(),
                    "emoji".into(),
                    "badge".into(),
                ],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1_patterns_compile() {
        let h = PageHeuristics::v1();
        assert!(regex::Regex::new(&h.result_url_pattern).is_ok());
        assert!(regex::Regex::new(&h.extraction.profile_id_pattern).is_ok());
        assert!(regex::Regex::new(&h.extraction.name_anchor_pattern).is_ok());
    }

    #[test]
    fn test_v1_strategy_ordering_is_most_semantic_first() {
        let h = PageHeuristics::v1();
        for target in [&h.overflow_menu, &h.trim_confirm] {
            assert!(
                matches!(target.strategies[0], Strategy::Semantic(_)),
                "{} must try semantic queries first",
                target.name
            );
            assert!(
                matches!(target.strategies.last(), Some(Strategy::Coordinates(_))),
                "{} keeps coordinates as the last resort",
                target.name
            );
        }
    }

    #[test]
    fn test_v1_id_pattern_extracts_identifier() {
        let h = PageHeuristics::v1();
        let re = regex::Regex::new(&h.extraction.profile_id_pattern).unwrap();
        let caps = re
            .captures("https://example.test/characters/luna_9x")
            .unwrap();
        assert_eq!(&caps[1], "luna_9x");
    }

    #[test]
    fn test_v1_name_anchor_pattern() {
        let h = PageHeuristics::v1();
        let re = regex::Regex::new(&h.extraction.name_anchor_pattern).unwrap();
        let caps = re.captures("Luna the Fox Character by someone").unwrap();
        assert_eq!(caps[1].trim(), "Luna the Fox");
    }
}
