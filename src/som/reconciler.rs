//! Target reconciliation
//!
//! Between annotation and execution the page may re-render and clone a marked
//! node. The reconciler re-queries every live node carrying a marker and, when
//! there are several, scores each against the descriptor captured at
//! annotation time.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::browser::PageDriver;
use crate::core::{BoundingBox, Result, SightlineError};
use crate::som::descriptor::ElementDescriptor;
use crate::som::scripts;

/// Point values used when scoring duplicate candidates
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub tag: i32,
    pub full_class_overlap: i32,
    pub partial_class_overlap: i32,
    pub exact_text: i32,
    pub text_containment: i32,
    pub accessible_name: i32,
    pub tight_size: i32,
    pub loose_size: i32,
    /// Size tolerance in px for the tight bonus
    pub tight_tolerance: f64,
    pub loose_tolerance: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            tag: 5,
            full_class_overlap: 5,
            partial_class_overlap: 3,
            exact_text: 4,
            text_containment: 2,
            accessible_name: 2,
            tight_size: 2,
            loose_size: 1,
            tight_tolerance: 2.0,
            loose_tolerance: 6.0,
        }
    }
}

/// A live node carrying the marker attribute
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveCandidate {
    pub tag: String,
    pub classes: Vec<String>,
    pub text: String,
    pub accessible_name: Option<String>,
    pub bbox: BoundingBox,
}

/// A candidate and its similarity to the original descriptor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub index: usize,
    pub score: i32,
    pub candidate: LiveCandidate,
}

/// Which live node a marker resolves to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResolution {
    /// Index among the live matches, `None` when nothing carries the marker
    pub index: Option<usize>,
    pub duplicate_count: usize,
    /// Scores, only filled when duplicates had to be ranked
    pub candidates: Vec<ScoredCandidate>,
}

impl TargetResolution {
    pub fn has_duplicates(&self) -> bool {
        self.duplicate_count > 1
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Similarity of a live node to the descriptor captured at annotation time
pub fn score_candidate(
    descriptor: &ElementDescriptor,
    candidate: &LiveCandidate,
    weights: &ScoreWeights,
) -> i32 {
    let mut score = 0;

    if candidate.tag.eq_ignore_ascii_case(&descriptor.tag) {
        score += weights.tag;
    }

    if !descriptor.class_tokens.is_empty() {
        let shared = descriptor
            .class_tokens
            .iter()
            .filter(|c| candidate.classes.contains(c))
            .count();
        if shared == descriptor.class_tokens.len() {
            score += weights.full_class_overlap;
        } else if shared > 0 {
            score += weights.partial_class_overlap;
        }
    }

    let expected = normalize(&descriptor.text);
    let actual = normalize(&candidate.text);
    if !expected.is_empty() && !actual.is_empty() {
        if expected == actual {
            score += weights.exact_text;
        } else if actual.contains(&expected) || expected.contains(&actual) {
            score += weights.text_containment;
        }
    }

    if let (Some(expected), Some(actual)) = (&descriptor.accessible_name, &candidate.accessible_name) {
        if !expected.is_empty() && normalize(expected) == normalize(actual) {
            score += weights.accessible_name;
        }
    }

    if descriptor.bbox.has_area() {
        let dw = (descriptor.bbox.width - candidate.bbox.width).abs();
        let dh = (descriptor.bbox.height - candidate.bbox.height).abs();
        if dw <= weights.tight_tolerance && dh <= weights.tight_tolerance {
            score += weights.tight_size;
        } else if dw <= weights.loose_tolerance && dh <= weights.loose_tolerance {
            score += weights.loose_size;
        }
    }

    score
}

/// Pick among live candidates. Errors with [`SightlineError::StaleTarget`]
/// when no candidate resembles the descriptor.
pub fn pick_candidate(
    som_id: &str,
    descriptor: &ElementDescriptor,
    live: Vec<LiveCandidate>,
    weights: &ScoreWeights,
) -> Result<TargetResolution> {
    let duplicate_count = live.len();
    match duplicate_count {
        0 => {
            return Ok(TargetResolution {
                index: None,
                duplicate_count,
                candidates: Vec::new(),
            })
        }
        1 => {
            // Re-stamped ids can land on another element after a refresh
            let tag = &live[0].tag;
            let index = if tag.is_empty() || tag.eq_ignore_ascii_case(&descriptor.tag) {
                Some(0)
            } else {
                debug!(marker = som_id, expected = %descriptor.tag, found = %tag, "marker now on a different element");
                None
            };
            return Ok(TargetResolution {
                index,
                duplicate_count,
                candidates: Vec::new(),
            });
        }
        _ => {}
    }

    let scored: Vec<ScoredCandidate> = live
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| ScoredCandidate {
            index,
            score: score_candidate(descriptor, &candidate, weights),
            candidate,
        })
        .collect();

    // Highest score wins; ties go to the lowest index
    let best = scored
        .iter()
        .fold(None::<&ScoredCandidate>, |best, c| match best {
            Some(b) if b.score >= c.score => Some(b),
            _ => Some(c),
        });

    match best {
        Some(best) if best.score > 0 => {
            debug!(
                marker = som_id,
                duplicates = duplicate_count,
                index = best.index,
                score = best.score,
                "duplicate marker resolved"
            );
            Ok(TargetResolution {
                index: Some(best.index),
                duplicate_count,
                candidates: scored,
            })
        }
        _ => Err(SightlineError::StaleTarget {
            marker: som_id.to_string(),
            duplicates: duplicate_count,
        }),
    }
}

/// Re-queries the page for a marker and resolves duplicates
pub struct TargetReconciler<'a> {
    driver: &'a dyn PageDriver,
    weights: ScoreWeights,
}

impl<'a> TargetReconciler<'a> {
    pub fn new(driver: &'a dyn PageDriver) -> Self {
        Self {
            driver,
            weights: ScoreWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub async fn resolve(&self, som_id: &str, descriptor: &ElementDescriptor) -> Result<TargetResolution> {
        let live = match self
            .driver
            .evaluate(scripts::RESOLVE, json!({ "somId": som_id }))
            .await
        {
            Ok(value) => serde_json::from_value::<Vec<LiveCandidate>>(value).unwrap_or_else(|e| {
                warn!(marker = som_id, error = %e, "unreadable marker lookup");
                Vec::new()
            }),
            Err(e) if e.is_navigation() => return Err(e.into()),
            Err(e) => {
                warn!(marker = som_id, error = %e, "marker lookup failed");
                Vec::new()
            }
        };
        pick_candidate(som_id, descriptor, live, &self.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ElementDescriptor {
        ElementDescriptor {
            som_id: "3".into(),
            tag: "button".into(),
            text: "Add to cart".into(),
            class_tokens: vec!["btn".into(), "btn-primary".into()],
            bbox: BoundingBox::new(100.0, 200.0, 120.0, 36.0),
            ..Default::default()
        }
    }

    fn live(tag: &str, classes: &[&str], text: &str, width: f64) -> LiveCandidate {
        LiveCandidate {
            tag: tag.into(),
            classes: classes.iter().map(|c| c.to_string()).collect(),
            text: text.into(),
            accessible_name: None,
            bbox: BoundingBox::new(0.0, 0.0, width, 36.0),
        }
    }

    #[test]
    fn test_full_match_outscores_tag_only() {
        let weights = ScoreWeights::default();
        let full = live("button", &["btn", "btn-primary"], "Add to cart", 500.0);
        let tag_only = live("button", &["link"], "Remove", 500.0);
        assert!(
            score_candidate(&descriptor(), &full, &weights)
                > score_candidate(&descriptor(), &tag_only, &weights)
        );
        assert_eq!(score_candidate(&descriptor(), &full, &weights), 14);
        assert_eq!(score_candidate(&descriptor(), &tag_only, &weights), 5);
    }

    #[test]
    fn test_partial_scores() {
        let weights = ScoreWeights::default();
        let partial = live("a", &["btn"], "add to cart now", 124.0);
        // partial class 3 + containment 2 + loose size 1
        assert_eq!(score_candidate(&descriptor(), &partial, &weights), 6);
    }

    #[test]
    fn test_unique_and_missing_markers() {
        let weights = ScoreWeights::default();
        let unique = pick_candidate("3", &descriptor(), vec![live("button", &[], "", 1.0)], &weights)
            .unwrap();
        assert_eq!(unique.index, Some(0));
        assert_eq!(unique.duplicate_count, 1);
        assert!(unique.candidates.is_empty());

        let moved = pick_candidate("3", &descriptor(), vec![live("div", &[], "", 1.0)], &weights)
            .unwrap();
        assert_eq!(moved.index, None);
        assert_eq!(moved.duplicate_count, 1);

        let gone = pick_candidate("3", &descriptor(), vec![], &weights).unwrap();
        assert_eq!(gone.index, None);
    }

    #[test]
    fn test_duplicates_pick_best_then_lowest_index() {
        let weights = ScoreWeights::default();
        let resolution = pick_candidate(
            "3",
            &descriptor(),
            vec![
                live("button", &["link"], "Remove", 10.0),
                live("button", &["btn", "btn-primary"], "Add to cart", 120.0),
                live("button", &["btn", "btn-primary"], "Add to cart", 120.0),
            ],
            &weights,
        )
        .unwrap();
        assert_eq!(resolution.index, Some(1));
        assert_eq!(resolution.duplicate_count, 3);
        assert_eq!(resolution.candidates.len(), 3);
    }

    #[test]
    fn test_no_resemblance_requires_reannotation() {
        let weights = ScoreWeights::default();
        let err = pick_candidate(
            "3",
            &descriptor(),
            vec![live("div", &[], "x", 10.0), live("span", &[], "y", 10.0)],
            &weights,
        )
        .unwrap_err();
        assert!(matches!(err, SightlineError::StaleTarget { duplicates: 2, .. }));
        assert!(err.is_round_recoverable());
    }
}
