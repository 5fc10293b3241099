//! # Layout Engine
//!
//! Flow and arrange layouts share one two-phase driver:
//!
//! ```text
//! phase A   organizers, deepest first (not wagons, not collapsed, non-empty)
//!           members -> placement -> refit organizer around members + padding
//! phase B   top-level units: fitted organizers and free constructs
//!           (construct units are wagon-aware footprints)
//!           edges remapped onto units, deduplicated, self-loops dropped
//! de-overlap  top-level organizers that sat phase B out are nudged along
//!             the perpendicular axis until clear (bounded attempts)
//! ```
//!
//! Everything is computed in page-absolute coordinates on a working copy
//! and converted back to parent-relative positions once, at write time.
//! Pin-constraint resolution ([`pin`]) moves organizers only and does not use
//! the driver.

pub mod arrange;
pub mod flow;
pub mod pin;

use crate::document::{DocWrite, NodeIndex};
use crate::model::{Edge, Node, Values};
use carta_common::{bounding_box, Position, Rect, Size};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

pub use arrange::{
    Alignment, Anchor, ArrangeConstraint, ArrangeOptions, ArrangeStrategy, Selector,
};
pub use flow::{FlowDirection, FlowOptions, FlowResult};
pub use pin::PinLayoutResult;

const EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
}

impl Axis {
    pub fn other(self) -> Axis {
        match self {
            Axis::X => Axis::Y,
            Axis::Y => Axis::X,
        }
    }
}

/// Coordinate of a rect's leading edge along `axis`
pub(crate) fn start_of(rect: &Rect, axis: Axis) -> f64 {
    match axis {
        Axis::X => rect.x,
        Axis::Y => rect.y,
    }
}

pub(crate) fn extent_of(rect: &Rect, axis: Axis) -> f64 {
    match axis {
        Axis::X => rect.width,
        Axis::Y => rect.height,
    }
}

pub(crate) fn with_start(rect: &Rect, axis: Axis, value: f64) -> Rect {
    match axis {
        Axis::X => Rect::new(value, rect.y, rect.width, rect.height),
        Axis::Y => Rect::new(rect.x, value, rect.width, rect.height),
    }
}

/// One unit handed to a placement, in absolute coordinates
#[derive(Debug, Clone)]
pub struct LayoutItem {
    pub node_id: String,
    /// Semantic id for constructs, node id for organizers
    pub key: String,
    pub construct_type: Option<String>,
    pub values: Values,
    pub rect: Rect,
    pub is_organizer: bool,
}

/// A layout algorithm as seen by the driver
pub(crate) trait Placement {
    /// Edges the algorithm cares about
    fn accepts_edge(&self, _edge: &Edge) -> bool {
        true
    }

    /// Whether `item` is positioned by the algorithm. Items that are not stay
    /// where they are (inside organizers) or go through de-overlap (top level).
    fn participates(&self, item: &LayoutItem, has_edges: bool) -> bool;

    /// New top-left corner for each item, same order as `items`.
    /// `edges` index into `items`.
    fn place(&mut self, items: &[LayoutItem], edges: &[(usize, usize)]) -> Vec<Position>;

    /// Axis along which de-overlap nudges left-out organizers
    fn nudge_axis(&self) -> Axis {
        Axis::X
    }
}

/// What a driver run changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutOutcome {
    /// Nodes whose stored position or size was rewritten
    pub updated: usize,
    pub warnings: Vec<String>,
}

/// Working copy of absolute geometry for one page
struct Frame<'a> {
    index: &'a NodeIndex,
    abs: HashMap<String, Position>,
    sizes: HashMap<String, Size>,
    construct_size: Size,
}

impl<'a> Frame<'a> {
    fn new(index: &'a NodeIndex, construct_size: Size) -> Self {
        let mut abs = HashMap::new();
        let mut sizes = HashMap::new();
        for node in index.nodes() {
            abs.insert(node.id().to_string(), index.absolute_position(node));
            sizes.insert(node.id().to_string(), node.size(construct_size));
        }
        Self {
            index,
            abs,
            sizes,
            construct_size,
        }
    }

    fn rect(&self, id: &str) -> Rect {
        let position = self.abs.get(id).copied().unwrap_or_default();
        let size = self.sizes.get(id).copied().unwrap_or(self.construct_size);
        Rect::from_position(position, size)
    }

    /// Own rect, grown over attached wagons for constructs
    fn footprint(&self, node: &Node) -> Rect {
        let own = self.rect(node.id());
        match node.semantic_id() {
            Some(sid) => self
                .index
                .wagons_of(sid)
                .map(|w| self.rect(w.id()))
                .fold(own, |acc, r| acc.union(&r)),
            None => own,
        }
    }

    /// Move a node and everything nested under it
    fn shift(&mut self, id: &str, dx: f64, dy: f64) {
        if dx.abs() < EPSILON && dy.abs() < EPSILON {
            return;
        }
        for member in self.index.descendants(id) {
            if let Some(p) = self.abs.get_mut(&member) {
                *p = p.offset(dx, dy);
            }
        }
    }

    fn item(&self, node: &Node) -> LayoutItem {
        let (construct_type, values) = match node {
            Node::Construct(c) => (Some(c.data.construct_type.clone()), c.data.values.clone()),
            _ => (None, Values::new()),
        };
        LayoutItem {
            node_id: node.id().to_string(),
            key: node
                .semantic_id()
                .map(str::to_string)
                .unwrap_or_else(|| node.id().to_string()),
            construct_type,
            values,
            rect: self.footprint(node),
            is_organizer: node.as_organizer().is_some(),
        }
    }
}

fn depth(index: &NodeIndex, node: &Node) -> usize {
    let mut depth = 0;
    let mut seen = HashSet::new();
    let mut parent = node.parent_id();
    while let Some(pid) = parent {
        if !seen.insert(pid) {
            break;
        }
        depth += 1;
        parent = index.get(pid).and_then(Node::parent_id);
    }
    depth
}

/// Ancestor of `node_id` (or itself) whose parent is `container`
fn member_under<'i>(index: &'i NodeIndex, node_id: &str, container: Option<&str>) -> Option<&'i str> {
    let mut current = index.get(node_id)?;
    let mut seen = HashSet::new();
    loop {
        if current.parent_id() == container {
            return Some(current.id());
        }
        let pid = current.parent_id()?;
        if !seen.insert(pid) {
            return None;
        }
        current = index.get(pid)?;
    }
}

/// Edges between distinct members of `container`, as item index pairs
fn scoped_edges(
    index: &NodeIndex,
    edges: &[Edge],
    container: Option<&str>,
    slot: &HashMap<&str, usize>,
) -> Vec<(usize, usize)> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for edge in edges {
        let (Some(a), Some(b)) = (
            member_under(index, &edge.source, container),
            member_under(index, &edge.target, container),
        ) else {
            continue;
        };
        let (Some(&i), Some(&j)) = (slot.get(a), slot.get(b)) else {
            continue;
        };
        if i != j && seen.insert((i, j)) {
            out.push((i, j));
        }
    }
    out
}

/// Place a group of items through `placement`, moving the nodes in `frame`.
/// Returns the ids of items that did not participate.
fn place_group(
    frame: &mut Frame<'_>,
    placement: &mut dyn Placement,
    members: &[&Node],
    edges: &[Edge],
    container: Option<&str>,
) -> Vec<String> {
    let items: Vec<LayoutItem> = members.iter().map(|m| frame.item(m)).collect();
    let slot: HashMap<&str, usize> = items
        .iter()
        .enumerate()
        .map(|(i, item)| (item.node_id.as_str(), i))
        .collect();
    let all_edges = scoped_edges(frame.index, edges, container, &slot);

    let mut connected = HashSet::new();
    for &(a, b) in &all_edges {
        connected.insert(a);
        connected.insert(b);
    }

    let chosen: Vec<usize> = (0..items.len())
        .filter(|i| placement.participates(&items[*i], connected.contains(i)))
        .collect();
    let left_out: Vec<String> = (0..items.len())
        .filter(|i| !chosen.contains(i))
        .map(|i| items[i].node_id.clone())
        .collect();
    if chosen.is_empty() {
        return left_out;
    }

    let renumber: HashMap<usize, usize> = chosen.iter().enumerate().map(|(n, &i)| (i, n)).collect();
    let subset: Vec<LayoutItem> = chosen.iter().map(|&i| items[i].clone()).collect();
    let sub_edges: Vec<(usize, usize)> = all_edges
        .iter()
        .filter_map(|(a, b)| Some((*renumber.get(a)?, *renumber.get(b)?)))
        .collect();

    let placed = placement.place(&subset, &sub_edges);
    for (item, target) in subset.iter().zip(placed) {
        let dx = target.x - item.rect.x;
        let dy = target.y - item.rect.y;
        frame.shift(&item.node_id, dx, dy);
    }
    left_out
}

/// Nudge `rect` along `axis` until it clears every rect in `placed`
fn nudge_clear(rect: Rect, placed: &[Rect], axis: Axis, gap: f64, max_attempts: usize) -> (Rect, bool) {
    let mut current = rect;
    for _ in 0..max_attempts {
        let Some(blocker) = placed.iter().find(|p| p.overlaps(&current)) else {
            return (current, true);
        };
        let next = start_of(blocker, axis) + extent_of(blocker, axis) + gap;
        current = with_start(&current, axis, next);
    }
    let clear = !placed.iter().any(|p| p.overlaps(&current));
    (current, clear)
}

impl<'doc> DocWrite<'doc> {
    /// Run `placement` over a page through both phases and write the result
    pub(crate) fn run_layout(&mut self, page_id: &str, placement: &mut dyn Placement) -> LayoutOutcome {
        let index = self.node_index(page_id);
        let layout = self.config().layout.clone();
        let edges: Vec<Edge> = self
            .edges(page_id)
            .into_iter()
            .filter(|e| placement.accepts_edge(e))
            .collect();
        let mut frame = Frame::new(&index, self.construct_size());
        let mut outcome = LayoutOutcome::default();

        // Phase A
        let mut containers: Vec<&Node> = index
            .nodes()
            .iter()
            .filter(|n| match n {
                Node::Organizer(o) => !o.data.collapsed && index.children(&o.id).next().is_some(),
                _ => false,
            })
            .collect();
        containers.sort_by_key(|n| std::cmp::Reverse(depth(&index, n)));

        for container in containers {
            let members: Vec<&Node> = index
                .children(container.id())
                .filter(|m| !m.is_wagon())
                .collect();
            if members.is_empty() {
                continue;
            }
            place_group(&mut frame, placement, &members, &edges, Some(container.id()));

            let rects: Vec<Rect> = members.iter().map(|m| frame.footprint(m)).collect();
            if let Some(bounds) = bounding_box(&rects) {
                let fitted = bounds.inflate(layout.organizer_padding);
                frame.abs.insert(container.id().to_string(), fitted.origin());
                frame.sizes.insert(container.id().to_string(), fitted.size());
            }
        }

        // Phase B
        let top: Vec<&Node> = index
            .nodes()
            .iter()
            .filter(|n| n.parent_id().is_none() && !n.is_wagon())
            .collect();
        let left_out = place_group(&mut frame, placement, &top, &edges, None);

        // De-overlap
        let left_out: HashSet<String> = left_out.into_iter().collect();
        let mut placed: Vec<Rect> = top
            .iter()
            .filter(|n| !left_out.contains(n.id()))
            .map(|n| frame.footprint(n))
            .collect();
        for node in top.iter().filter(|n| left_out.contains(n.id())) {
            let rect = frame.footprint(node);
            if node.as_organizer().is_none() {
                placed.push(rect);
                continue;
            }
            let (cleared, ok) = nudge_clear(
                rect,
                &placed,
                placement.nudge_axis(),
                layout.node_gap,
                layout.max_nudge_attempts,
            );
            if !ok {
                outcome.warnings.push(format!(
                    "Organizer {} still overlaps after {} attempts",
                    node.id(),
                    layout.max_nudge_attempts
                ));
            }
            frame.shift(node.id(), cleared.x - rect.x, cleared.y - rect.y);
            placed.push(cleared);
        }

        outcome.updated = self.commit_frame(page_id, &frame);
        debug!(page_id, updated = outcome.updated, "Layout written");
        outcome
    }

    /// Write back every node whose relative position or size changed
    fn commit_frame(&mut self, page_id: &str, frame: &Frame<'_>) -> usize {
        let mut updated = 0;
        for node in frame.index.nodes() {
            let abs = frame.abs.get(node.id()).copied().unwrap_or_default();
            let origin = node
                .parent_id()
                .filter(|pid| frame.index.contains(pid))
                .and_then(|pid| frame.abs.get(pid).copied())
                .unwrap_or(Position::ORIGIN);
            let relative = abs.sub(origin);
            let old = node.position();
            let mut touched = false;
            if (relative.x - old.x).abs() > EPSILON || (relative.y - old.y).abs() > EPSILON {
                self.set_node_position(page_id, node.id(), relative);
                touched = true;
            }
            if let Some(org) = node.as_organizer() {
                if let Some(size) = frame.sizes.get(node.id()) {
                    if (size.width - org.size.width).abs() > EPSILON
                        || (size.height - org.size.height).abs() > EPSILON
                    {
                        self.set_organizer_size(page_id, node.id(), *size);
                        touched = true;
                    }
                }
            }
            if touched {
                updated += 1;
            }
        }
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nudge_clears_blockers() {
        let placed = vec![Rect::new(0.0, 0.0, 100.0, 100.0), Rect::new(150.0, 0.0, 100.0, 100.0)];
        let (rect, ok) = nudge_clear(Rect::new(50.0, 10.0, 80.0, 80.0), &placed, Axis::X, 10.0, 100);
        assert!(ok);
        assert_eq!(rect.x, 260.0);
        assert_eq!(rect.y, 10.0);
    }

    #[test]
    fn test_nudge_is_bounded() {
        let placed = vec![Rect::new(0.0, 0.0, 100.0, 100.0)];
        let (_, ok) = nudge_clear(Rect::new(0.0, 0.0, 10.0, 10.0), &placed, Axis::Y, 0.0, 0);
        assert!(!ok);
    }
}
