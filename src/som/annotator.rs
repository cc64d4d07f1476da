//! Set-of-Marks annotator
//!
//! One annotation round: clear the previous round's markers, scan the live
//! DOM, decide which nodes get a marker, stamp the marker attribute and paint
//! the overlay. The filtering pipeline is a pure function over the scan so it
//! can be exercised without a browser.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::core::BoundingBox;
use crate::som::descriptor::{ElementDescriptor, MarkerMap, ParentSummary};
use crate::som::scan::{RawNode, RawScan};
use crate::som::scripts;

/// Overlay colours, cycled by discovery index
pub const PALETTE: [&str; 20] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff", "#9a6324", "#fffac8", "#800000", "#aaffc3",
    "#808000", "#ffd8b1", "#000075", "#808080",
];

/// Height of the numeric label drawn next to each box
pub const LABEL_HEIGHT: f64 = 16.0;

const TEXT_LIMIT: usize = 100;
const PARENT_TEXT_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotateOptions {
    /// Keep elements below the fold (they skip the occlusion test)
    pub include_offscreen: bool,
    pub include_disabled: bool,
}

/// Colour for a 1-based marker
pub fn marker_color(marker: usize) -> &'static str {
    PALETTE[marker.saturating_sub(1) % PALETTE.len()]
}

/// Top edge of the label: above the box, or below it when that would clip
pub fn label_top(bbox: &BoundingBox) -> f64 {
    if bbox.y - LABEL_HEIGHT < 0.0 {
        bbox.y + bbox.height
    } else {
        bbox.y - LABEL_HEIGHT
    }
}

/// A node chosen for marking, with its descriptor
#[derive(Debug, Clone)]
pub struct Selection {
    pub node_id: u32,
    pub descriptor: ElementDescriptor,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkPayload<'a> {
    node_id: u32,
    som_id: &'a str,
    #[serde(rename = "box")]
    bbox: BoundingBox,
    color: &'static str,
    label_top: f64,
}

fn truncate(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect::<String>().trim().to_string()
}

/// Occluded unless some sample point hits the node itself, a descendant or an ancestor
fn is_unoccluded(node: &RawNode) -> bool {
    node.hit_samples.iter().flatten().any(|chain| {
        chain.contains(&node.node_id)
            || chain
                .first()
                .is_some_and(|top| node.ancestors.contains(top))
    })
}

fn passes_visibility(node: &RawNode) -> bool {
    if node.style.display == "none" {
        return false;
    }
    if !node.rect.has_area() {
        return false;
    }
    !node.is_visually_hidden() || node.is_pseudo_rendered()
}

fn describe(node: &RawNode, som_id: String) -> ElementDescriptor {
    let pseudo_rendered = node.is_pseudo_rendered();
    let text = if pseudo_rendered {
        node.pseudo_content.clone().unwrap_or_default()
    } else {
        node.text.clone()
    };

    ElementDescriptor {
        som_id,
        tag: node.tag.clone(),
        role: node.effective_role(),
        text: truncate(&text, TEXT_LIMIT),
        accessible_name: node.accessible_name(),
        label_text: node
            .label_text
            .as_deref()
            .map(|t| truncate(t, TEXT_LIMIT))
            .filter(|t| !t.is_empty()),
        placeholder: node.attr("placeholder").map(str::to_string),
        name: node.attr("name").map(str::to_string),
        input_type: node.input_type(),
        id: node.attr("id").map(str::to_string),
        class_tokens: node.classes.clone(),
        bbox: node.rect,
        pseudo_rendered,
        disabled: node.disabled,
        parent: node.parent.as_ref().map(|p| ParentSummary {
            tag: p.tag.clone(),
            role: p.role.clone(),
            classes: p.classes.clone(),
            text: truncate(&p.text, PARENT_TEXT_LIMIT),
        }),
    }
}

/// Decide which scanned nodes get a marker, in discovery order
pub fn select_markers(scan: &RawScan, opts: &AnnotateOptions) -> Vec<Selection> {
    // Dedupe while keeping discovery order
    let mut seen = HashSet::new();
    let nodes: Vec<&RawNode> = scan
        .nodes
        .iter()
        .filter(|n| seen.insert(n.node_id))
        .collect();
    let by_id: HashMap<u32, &RawNode> = nodes.iter().map(|n| (n.node_id, *n)).collect();

    let mut candidates: Vec<u32> = nodes
        .iter()
        .filter(|n| n.allow_listed || n.has_pseudo_signal())
        .map(|n| n.node_id)
        .collect();
    // Promoted nodes stand in for something else and are never suppressed
    let mut promoted: HashSet<u32> = HashSet::new();

    // Containers hand their marker to the first clickable descendant
    let mut dropped: HashSet<u32> = HashSet::new();
    for &id in &candidates {
        let node = by_id[&id];
        if !node.is_container() {
            continue;
        }
        let descendant = candidates.iter().find(|&&other| {
            let other = by_id[&other];
            other.ancestors.contains(&id) && other.is_clickable() && !other.is_container()
        });
        if let Some(&descendant) = descendant {
            debug!(container = id, descendant, "promoting container to descendant");
            dropped.insert(id);
            promoted.insert(descendant);
        }
    }

    // Hidden checkboxes and radios are marked through their label
    for &id in &candidates {
        let node = by_id[&id];
        if !node.is_hidden_toggle() {
            continue;
        }
        if let Some(label) = node.label_node_id.filter(|l| by_id.contains_key(l)) {
            dropped.insert(id);
            promoted.insert(label);
        }
    }
    for &label in &promoted {
        if !candidates.contains(&label) && by_id.contains_key(&label) {
            candidates.push(label);
        }
    }
    candidates.retain(|id| !dropped.contains(id));
    candidates.sort_by_key(|id| nodes.iter().position(|n| n.node_id == *id));

    // Suppress inner nodes of native interactive elements
    let candidate_set: HashSet<u32> = candidates.iter().copied().collect();
    candidates.retain(|id| {
        if promoted.contains(id) {
            return true;
        }
        let node = by_id[id];
        let nearest = node
            .ancestors
            .iter()
            .find(|a| candidate_set.contains(*a))
            .map(|a| by_id[a]);
        !nearest.is_some_and(RawNode::is_true_interactive)
    });

    let mut selections = Vec::new();
    for id in candidates {
        let node = by_id[&id];
        if !passes_visibility(node) {
            continue;
        }
        if node.disabled && !opts.include_disabled {
            continue;
        }
        if node.in_viewport {
            if !is_unoccluded(node) {
                debug!(node = id, tag = %node.tag, "occluded");
                continue;
            }
        } else if !opts.include_offscreen {
            continue;
        }

        let som_id = (selections.len() + 1).to_string();
        selections.push(Selection {
            node_id: id,
            descriptor: describe(node, som_id),
        });
    }
    selections
}

/// Builds a fresh [`MarkerMap`] for the current page each round
pub struct Annotator<'a> {
    driver: &'a dyn PageDriver,
    draw_overlay: bool,
}

impl<'a> Annotator<'a> {
    pub fn new(driver: &'a dyn PageDriver) -> Self {
        Self {
            driver,
            draw_overlay: true,
        }
    }

    pub fn without_overlay(mut self) -> Self {
        self.draw_overlay = false;
        self
    }

    /// Remove every marker and overlay from the page
    pub async fn clear(&self) {
        if let Err(e) = self.driver.evaluate(scripts::CLEAR, json!(null)).await {
            debug!(error = %e, "clearing previous markers failed");
        }
    }

    /// Run one annotation round. A page that cannot be scanned yields an
    /// empty map rather than an error.
    pub async fn annotate(&self, opts: AnnotateOptions) -> MarkerMap {
        self.clear().await;

        let raw = match self
            .driver
            .evaluate(
                scripts::SCAN,
                json!({
                    "includeOffscreen": opts.include_offscreen,
                    "includeDisabled": opts.include_disabled,
                }),
            )
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "page scan failed, no markers this round");
                return MarkerMap::default();
            }
        };
        let scan: RawScan = match serde_json::from_value(raw) {
            Ok(scan) => scan,
            Err(e) => {
                warn!(error = %e, "unreadable page scan, no markers this round");
                return MarkerMap::default();
            }
        };

        let selections = select_markers(&scan, &opts);
        let marks: Vec<MarkPayload<'_>> = selections
            .iter()
            .enumerate()
            .map(|(i, s)| MarkPayload {
                node_id: s.node_id,
                som_id: &s.descriptor.som_id,
                bbox: s.descriptor.bbox,
                color: marker_color(i + 1),
                label_top: label_top(&s.descriptor.bbox),
            })
            .collect();

        match self
            .driver
            .evaluate(
                scripts::MARK,
                json!({ "markers": marks, "draw": self.draw_overlay }),
            )
            .await
        {
            Ok(stamped) => debug!(%stamped, "markers stamped"),
            Err(e) => warn!(error = %e, "drawing markers failed"),
        }

        info!(
            scanned = scan.nodes.len(),
            marked = selections.len(),
            "annotation round complete"
        );
        MarkerMap::new(selections.into_iter().map(|s| s.descriptor).collect())
    }
}
