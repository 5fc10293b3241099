//! Declarative arrangement.
//!
//! Constraints run in array order over the units each one selects:
//!
//! | constraint   | effect |
//! |--------------|--------|
//! | `align`      | leading edges (`start`), trailing edges (`end`) or centres (`center`) lined up on `axis`, at the min / max / mean of the selection |
//! | `order`      | sorted by `by` (`semanticId`, `type` or a field name), then packed along `axis` from the selection's leading edge with `gap` clear space |
//! | `spacing`    | current order along `axis` kept, packed with exactly `gap` between neighbours |
//! | `group`      | partitioned by `by`; each group packed along the cross axis, groups side by side along `axis` |
//! | `distribute` | first and last unit fixed, centres evenly spaced between them (needs three units) |
//! | `position`   | selection translated so its bounding-box `anchor` lands on `at` |
//! | `flow`       | flow layering restricted to the selection and the edges between it |
//!
//! The `grid` strategy packs every unit into a square-ish grid before the
//! constraints run, `preserve` starts from current positions, and `force`
//! relaxes the result afterwards with edge springs and overlap repulsion.

use super::flow::{layered_positions, FlowDirection};
use super::{extent_of, start_of, with_start, Axis, LayoutItem, LayoutOutcome, Placement};
use crate::document::{DiagramDocument, DocWrite};
use carta_common::{bounding_box, Position, Rect};
use serde::Deserialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

const SPRING: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrangeStrategy {
    Grid,
    #[default]
    Preserve,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    #[default]
    Start,
    Center,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    #[default]
    TopLeft,
    Top,
    TopRight,
    Left,
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

impl Anchor {
    /// Fractions of width and height where the anchor sits
    fn fractions(self) -> (f64, f64) {
        match self {
            Anchor::TopLeft => (0.0, 0.0),
            Anchor::Top => (0.5, 0.0),
            Anchor::TopRight => (1.0, 0.0),
            Anchor::Left => (0.0, 0.5),
            Anchor::Center => (0.5, 0.5),
            Anchor::Right => (1.0, 0.5),
            Anchor::BottomLeft => (0.0, 1.0),
            Anchor::Bottom => (0.5, 1.0),
            Anchor::BottomRight => (1.0, 1.0),
        }
    }
}

/// Which units a constraint applies to. Empty selects everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Selector {
    pub construct_types: Option<Vec<String>>,
    pub semantic_ids: Option<Vec<String>>,
}

impl Selector {
    pub fn matches(&self, item: &LayoutItem) -> bool {
        let by_type = self.construct_types.as_ref().map_or(true, |types| {
            item.construct_type
                .as_ref()
                .is_some_and(|t| types.contains(t))
        });
        let by_id = self
            .semantic_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(&item.key));
        by_type && by_id
    }
}

fn default_axis() -> Axis {
    Axis::X
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ArrangeConstraint {
    Align {
        #[serde(default)]
        select: Selector,
        #[serde(default = "default_axis")]
        axis: Axis,
        #[serde(default)]
        alignment: Alignment,
    },
    Order {
        #[serde(default)]
        select: Selector,
        by: String,
        #[serde(default = "default_axis")]
        axis: Axis,
        #[serde(default)]
        descending: bool,
        #[serde(default)]
        gap: Option<f64>,
    },
    Spacing {
        #[serde(default)]
        select: Selector,
        #[serde(default = "default_axis")]
        axis: Axis,
        gap: f64,
    },
    Group {
        #[serde(default)]
        select: Selector,
        by: String,
        #[serde(default = "default_axis")]
        axis: Axis,
        #[serde(default)]
        gap: Option<f64>,
    },
    Distribute {
        #[serde(default)]
        select: Selector,
        #[serde(default = "default_axis")]
        axis: Axis,
    },
    Position {
        #[serde(default)]
        select: Selector,
        #[serde(default)]
        anchor: Anchor,
        at: Position,
    },
    Flow {
        #[serde(default)]
        select: Selector,
        #[serde(default)]
        direction: FlowDirection,
    },
}

impl ArrangeConstraint {
    pub fn selector(&self) -> &Selector {
        match self {
            ArrangeConstraint::Align { select, .. }
            | ArrangeConstraint::Order { select, .. }
            | ArrangeConstraint::Spacing { select, .. }
            | ArrangeConstraint::Group { select, .. }
            | ArrangeConstraint::Distribute { select, .. }
            | ArrangeConstraint::Position { select, .. }
            | ArrangeConstraint::Flow { select, .. } => select,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArrangeConstraint::Align { .. } => "align",
            ArrangeConstraint::Order { .. } => "order",
            ArrangeConstraint::Spacing { .. } => "spacing",
            ArrangeConstraint::Group { .. } => "group",
            ArrangeConstraint::Distribute { .. } => "distribute",
            ArrangeConstraint::Position { .. } => "position",
            ArrangeConstraint::Flow { .. } => "flow",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArrangeOptions {
    pub strategy: ArrangeStrategy,
    pub constraints: Vec<ArrangeConstraint>,
    /// Overrides the configured relaxation budget for `force`
    pub force_iterations: Option<usize>,
}

/// Sort key pulled from a unit
#[derive(Debug, Clone, PartialEq)]
enum Key {
    Number(f64),
    Text(String),
    Missing,
}

impl Key {
    fn of(item: &LayoutItem, by: &str) -> Key {
        match by {
            "semanticId" => Key::Text(item.key.clone()),
            "type" => item
                .construct_type
                .clone()
                .map_or(Key::Missing, Key::Text),
            field => match item.values.get(field) {
                Some(Value::Number(n)) => n.as_f64().map_or(Key::Missing, Key::Number),
                Some(Value::String(s)) => Key::Text(s.clone()),
                Some(Value::Bool(b)) => Key::Text(b.to_string()),
                _ => Key::Missing,
            },
        }
    }

    fn label(&self) -> String {
        match self {
            Key::Number(n) => n.to_string(),
            Key::Text(s) => s.clone(),
            Key::Missing => String::new(),
        }
    }

    /// Numbers before text, missing last
    fn compare(&self, other: &Key) -> Ordering {
        match (self, other) {
            (Key::Number(a), Key::Number(b)) => a.total_cmp(b),
            (Key::Text(a), Key::Text(b)) => a.cmp(b),
            (Key::Missing, Key::Missing) => Ordering::Equal,
            (Key::Number(_), _) | (Key::Text(_), Key::Missing) => Ordering::Less,
            _ => Ordering::Greater,
        }
    }
}

/// Lay `chosen` end to end along `axis` from `start`
fn pack(rects: &mut [Rect], chosen: &[usize], axis: Axis, start: f64, gap: f64) {
    let mut cursor = start;
    for &i in chosen {
        rects[i] = with_start(&rects[i], axis, cursor);
        cursor += extent_of(&rects[i], axis) + gap;
    }
}

fn leading_edge(rects: &[Rect], chosen: &[usize], axis: Axis) -> f64 {
    chosen
        .iter()
        .map(|&i| start_of(&rects[i], axis))
        .fold(f64::INFINITY, f64::min)
}

fn by_position(rects: &[Rect], chosen: &[usize], axis: Axis) -> Vec<usize> {
    let mut sorted = chosen.to_vec();
    sorted.sort_by(|&a, &b| start_of(&rects[a], axis).total_cmp(&start_of(&rects[b], axis)));
    sorted
}

fn center_of(rect: &Rect, axis: Axis) -> f64 {
    start_of(rect, axis) + extent_of(rect, axis) / 2.0
}

/// Square-ish grid from the top-left of the current bounds
fn grid_pack(rects: &mut [Rect], gap: f64) {
    let Some(bounds) = bounding_box(rects.iter()) else {
        return;
    };
    let columns = (rects.len() as f64).sqrt().ceil().max(1.0) as usize;
    let cell_w = rects.iter().map(|r| r.width).fold(0.0, f64::max) + gap;
    let cell_h = rects.iter().map(|r| r.height).fold(0.0, f64::max) + gap;
    for (i, rect) in rects.iter_mut().enumerate() {
        let col = (i % columns) as f64;
        let row = (i / columns) as f64;
        *rect = rect.with_origin(Position::new(bounds.x + col * cell_w, bounds.y + row * cell_h));
    }
}

/// Deterministic spring relaxation
fn relax(rects: &mut [Rect], edges: &[(usize, usize)], iterations: usize, gap: f64, ideal: f64) {
    let n = rects.len();
    for _ in 0..iterations {
        let mut moves = vec![(0.0f64, 0.0f64); n];

        for &(a, b) in edges {
            let ca = rects[a].center();
            let cb = rects[b].center();
            let (dx, dy) = (cb.x - ca.x, cb.y - ca.y);
            let dist = (dx * dx + dy * dy).sqrt();
            if dist < f64::EPSILON {
                continue;
            }
            let pull = (dist - ideal) * SPRING / dist;
            moves[a].0 += dx * pull;
            moves[a].1 += dy * pull;
            moves[b].0 -= dx * pull;
            moves[b].1 -= dy * pull;
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let a = rects[i].inflate(gap / 2.0);
                let b = rects[j].inflate(gap / 2.0);
                if !a.overlaps(&b) {
                    continue;
                }
                let ox = a.right().min(b.right()) - a.x.max(b.x);
                let oy = a.bottom().min(b.bottom()) - a.y.max(b.y);
                if ox <= oy {
                    let sign = if a.center().x <= b.center().x { -1.0 } else { 1.0 };
                    moves[i].0 += sign * ox / 2.0;
                    moves[j].0 -= sign * ox / 2.0;
                } else {
                    let sign = if a.center().y <= b.center().y { -1.0 } else { 1.0 };
                    moves[i].1 += sign * oy / 2.0;
                    moves[j].1 -= sign * oy / 2.0;
                }
            }
        }

        let mut still = true;
        for (rect, (dx, dy)) in rects.iter_mut().zip(moves) {
            if dx.abs() > f64::EPSILON || dy.abs() > f64::EPSILON {
                still = false;
                *rect = rect.translate(dx, dy);
            }
        }
        if still {
            break;
        }
    }
}

struct Gaps {
    node: f64,
    layer: f64,
}

fn apply_constraint(
    constraint: &ArrangeConstraint,
    items: &[LayoutItem],
    chosen: &[usize],
    edges: &[(usize, usize)],
    rects: &mut [Rect],
    gaps: &Gaps,
) {
    match constraint {
        ArrangeConstraint::Align {
            axis, alignment, ..
        } => {
            let axis = *axis;
            match alignment {
                Alignment::Start => {
                    let line = leading_edge(rects, chosen, axis);
                    for &i in chosen {
                        rects[i] = with_start(&rects[i], axis, line);
                    }
                }
                Alignment::End => {
                    let line = chosen
                        .iter()
                        .map(|&i| start_of(&rects[i], axis) + extent_of(&rects[i], axis))
                        .fold(f64::NEG_INFINITY, f64::max);
                    for &i in chosen {
                        let start = line - extent_of(&rects[i], axis);
                        rects[i] = with_start(&rects[i], axis, start);
                    }
                }
                Alignment::Center => {
                    let line = chosen.iter().map(|&i| center_of(&rects[i], axis)).sum::<f64>()
                        / chosen.len() as f64;
                    for &i in chosen {
                        let start = line - extent_of(&rects[i], axis) / 2.0;
                        rects[i] = with_start(&rects[i], axis, start);
                    }
                }
            }
        }
        ArrangeConstraint::Order {
            by,
            axis,
            descending,
            gap,
            ..
        } => {
            let start = leading_edge(rects, chosen, *axis);
            let mut sorted = chosen.to_vec();
            sorted.sort_by(|&a, &b| Key::of(&items[a], by).compare(&Key::of(&items[b], by)));
            if *descending {
                sorted.reverse();
            }
            pack(rects, &sorted, *axis, start, gap.unwrap_or(gaps.node));
        }
        ArrangeConstraint::Spacing { axis, gap, .. } => {
            let sorted = by_position(rects, chosen, *axis);
            let start = leading_edge(rects, chosen, *axis);
            pack(rects, &sorted, *axis, start, *gap);
        }
        ArrangeConstraint::Group { by, axis, gap, .. } => {
            let gap = gap.unwrap_or(gaps.node);
            let cross = axis.other();
            let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for &i in chosen {
                groups.entry(Key::of(&items[i], by).label()).or_default().push(i);
            }
            let mut cursor = leading_edge(rects, chosen, *axis);
            let cross_start = leading_edge(rects, chosen, cross);
            for members in groups.values() {
                pack(rects, members, cross, cross_start, gap);
                let thickness = members
                    .iter()
                    .map(|&i| extent_of(&rects[i], *axis))
                    .fold(0.0, f64::max);
                for &i in members {
                    rects[i] = with_start(&rects[i], *axis, cursor);
                }
                cursor += thickness + gap;
            }
        }
        ArrangeConstraint::Distribute { axis, .. } => {
            if chosen.len() < 3 {
                return;
            }
            let sorted = by_position(rects, chosen, *axis);
            let (Some(&first), Some(&last)) = (sorted.first(), sorted.last()) else {
                return;
            };
            let from = center_of(&rects[first], *axis);
            let to = center_of(&rects[last], *axis);
            let step = (to - from) / (sorted.len() - 1) as f64;
            for (k, &i) in sorted.iter().enumerate() {
                let centre = from + step * k as f64;
                let start = centre - extent_of(&rects[i], *axis) / 2.0;
                rects[i] = with_start(&rects[i], *axis, start);
            }
        }
        ArrangeConstraint::Position { anchor, at, .. } => {
            let Some(bounds) = bounding_box(chosen.iter().map(|&i| &rects[i])) else {
                return;
            };
            let (fx, fy) = anchor.fractions();
            let dx = at.x - (bounds.x + bounds.width * fx);
            let dy = at.y - (bounds.y + bounds.height * fy);
            for &i in chosen {
                rects[i] = rects[i].translate(dx, dy);
            }
        }
        ArrangeConstraint::Flow { direction, .. } => {
            let slot: BTreeMap<usize, usize> = chosen.iter().enumerate().map(|(n, &i)| (i, n)).collect();
            let subset: Vec<LayoutItem> = chosen
                .iter()
                .map(|&i| LayoutItem {
                    rect: rects[i],
                    ..items[i].clone()
                })
                .collect();
            let sub_edges: Vec<(usize, usize)> = edges
                .iter()
                .filter_map(|(a, b)| Some((*slot.get(a)?, *slot.get(b)?)))
                .collect();
            let (_, positions) =
                layered_positions(&subset, &sub_edges, *direction, gaps.layer, gaps.node);
            for (&i, p) in chosen.iter().zip(positions) {
                rects[i] = rects[i].with_origin(p);
            }
        }
    }
}

pub(crate) struct ArrangePlacement {
    options: ArrangeOptions,
    gaps: Gaps,
    iterations: usize,
    /// Units matched per constraint, summed over every scope
    hits: Vec<usize>,
}

impl Placement for ArrangePlacement {
    fn participates(&self, item: &LayoutItem, _has_edges: bool) -> bool {
        self.options.constraints.is_empty()
            || self
                .options
                .constraints
                .iter()
                .any(|c| c.selector().matches(item))
    }

    fn place(&mut self, items: &[LayoutItem], edges: &[(usize, usize)]) -> Vec<Position> {
        let mut rects: Vec<Rect> = items.iter().map(|i| i.rect).collect();
        if self.options.strategy == ArrangeStrategy::Grid {
            grid_pack(&mut rects, self.gaps.node);
        }

        for (n, constraint) in self.options.constraints.iter().enumerate() {
            let chosen: Vec<usize> = (0..items.len())
                .filter(|&i| constraint.selector().matches(&items[i]))
                .collect();
            self.hits[n] += chosen.len();
            if !chosen.is_empty() {
                apply_constraint(constraint, items, &chosen, edges, &mut rects, &self.gaps);
            }
        }

        if self.options.strategy == ArrangeStrategy::Force {
            relax(&mut rects, edges, self.iterations, self.gaps.node, self.gaps.layer);
        }
        rects.iter().map(Rect::origin).collect()
    }
}

impl<'doc> DocWrite<'doc> {
    #[instrument(skip(self, options), fields(strategy = ?options.strategy, constraints = options.constraints.len()))]
    pub fn arrange_layout(&mut self, page_id: &str, options: ArrangeOptions) -> LayoutOutcome {
        let defaults = &self.config().layout;
        let mut placement = ArrangePlacement {
            gaps: Gaps {
                node: defaults.node_gap,
                layer: defaults.layer_gap,
            },
            iterations: options.force_iterations.unwrap_or(defaults.force_iterations),
            hits: vec![0; options.constraints.len()],
            options,
        };
        let mut outcome = self.run_layout(page_id, &mut placement);

        for (constraint, hits) in placement.options.constraints.iter().zip(&placement.hits) {
            if *hits == 0 {
                let message = format!("Constraint '{}' matched no nodes", constraint.name());
                warn!(page_id, constraint = constraint.name(), "{}", message);
                outcome.warnings.push(message);
            }
        }
        info!(page_id, updated = outcome.updated, "Arrange layout applied");
        outcome
    }
}

impl DiagramDocument {
    pub fn arrange_layout(&self, page_id: &str, options: ArrangeOptions) -> LayoutOutcome {
        self.write(|tx| tx.arrange_layout(page_id, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Values;
    use serde_json::json;

    fn item(key: &str, construct_type: &str, rect: Rect, values: Value) -> LayoutItem {
        LayoutItem {
            node_id: key.into(),
            key: key.into(),
            construct_type: Some(construct_type.into()),
            values: match values {
                Value::Object(map) => map,
                _ => Values::new(),
            },
            rect,
            is_organizer: false,
        }
    }

    fn gaps() -> Gaps {
        Gaps {
            node: 10.0,
            layer: 50.0,
        }
    }

    #[test]
    fn test_constraints_deserialize() {
        let options: ArrangeOptions = serde_json::from_value(json!({
            "strategy": "grid",
            "constraints": [
                { "type": "align", "axis": "y", "alignment": "center" },
                { "type": "order", "by": "name", "select": { "constructTypes": ["service"] } },
                { "type": "position", "anchor": "bottom-right", "at": { "x": 0, "y": 0 } }
            ]
        }))
        .unwrap();
        assert_eq!(options.strategy, ArrangeStrategy::Grid);
        assert_eq!(options.constraints.len(), 3);
        assert_eq!(options.constraints[1].name(), "order");
    }

    #[test]
    fn test_align_start_and_end() {
        let items = vec![
            item("a", "t", Rect::new(10.0, 0.0, 100.0, 50.0), Value::Null),
            item("b", "t", Rect::new(40.0, 100.0, 50.0, 50.0), Value::Null),
        ];
        let mut rects: Vec<Rect> = items.iter().map(|i| i.rect).collect();
        let align = ArrangeConstraint::Align {
            select: Selector::default(),
            axis: Axis::X,
            alignment: Alignment::End,
        };
        apply_constraint(&align, &items, &[0, 1], &[], &mut rects, &gaps());
        assert_eq!(rects[0].right(), 110.0);
        assert_eq!(rects[1].right(), 110.0);
        assert_eq!(rects[1].y, 100.0);
    }

    #[test]
    fn test_order_by_field() {
        let items = vec![
            item("a", "t", Rect::new(0.0, 0.0, 100.0, 50.0), json!({ "rank": 3 })),
            item("b", "t", Rect::new(200.0, 0.0, 100.0, 50.0), json!({ "rank": 1 })),
            item("c", "t", Rect::new(400.0, 0.0, 100.0, 50.0), json!({})),
        ];
        let mut rects: Vec<Rect> = items.iter().map(|i| i.rect).collect();
        let order = ArrangeConstraint::Order {
            select: Selector::default(),
            by: "rank".into(),
            axis: Axis::X,
            descending: false,
            gap: None,
        };
        apply_constraint(&order, &items, &[0, 1, 2], &[], &mut rects, &gaps());
        assert_eq!(rects[1].x, 0.0);
        assert_eq!(rects[0].x, 110.0);
        assert_eq!(rects[2].x, 220.0);
    }

    #[test]
    fn test_group_by_type() {
        let items = vec![
            item("a", "db", Rect::new(0.0, 0.0, 100.0, 50.0), Value::Null),
            item("b", "api", Rect::new(0.0, 0.0, 100.0, 50.0), Value::Null),
            item("c", "db", Rect::new(0.0, 0.0, 100.0, 50.0), Value::Null),
        ];
        let mut rects: Vec<Rect> = items.iter().map(|i| i.rect).collect();
        let group = ArrangeConstraint::Group {
            select: Selector::default(),
            by: "type".into(),
            axis: Axis::X,
            gap: None,
        };
        apply_constraint(&group, &items, &[0, 1, 2], &[], &mut rects, &gaps());
        // "api" column first, "db" column stacked vertically
        assert_eq!((rects[1].x, rects[1].y), (0.0, 0.0));
        assert_eq!((rects[0].x, rects[0].y), (110.0, 0.0));
        assert_eq!((rects[2].x, rects[2].y), (110.0, 60.0));
    }

    #[test]
    fn test_distribute_evens_centres() {
        let items = vec![
            item("a", "t", Rect::new(0.0, 0.0, 20.0, 20.0), Value::Null),
            item("b", "t", Rect::new(30.0, 0.0, 20.0, 20.0), Value::Null),
            item("c", "t", Rect::new(200.0, 0.0, 20.0, 20.0), Value::Null),
        ];
        let mut rects: Vec<Rect> = items.iter().map(|i| i.rect).collect();
        let distribute = ArrangeConstraint::Distribute {
            select: Selector::default(),
            axis: Axis::X,
        };
        apply_constraint(&distribute, &items, &[0, 1, 2], &[], &mut rects, &gaps());
        assert_eq!(rects[0].x, 0.0);
        assert_eq!(rects[1].x, 100.0);
        assert_eq!(rects[2].x, 200.0);
    }

    #[test]
    fn test_position_anchor() {
        let items = vec![
            item("a", "t", Rect::new(0.0, 0.0, 20.0, 20.0), Value::Null),
            item("b", "t", Rect::new(80.0, 30.0, 20.0, 20.0), Value::Null),
        ];
        let mut rects: Vec<Rect> = items.iter().map(|i| i.rect).collect();
        let position = ArrangeConstraint::Position {
            select: Selector::default(),
            anchor: Anchor::Center,
            at: Position::new(500.0, 500.0),
        };
        apply_constraint(&position, &items, &[0, 1], &[], &mut rects, &gaps());
        assert_eq!(rects[0].origin(), Position::new(450.0, 475.0));
        assert_eq!(rects[1].origin(), Position::new(530.0, 505.0));
    }

    #[test]
    fn test_selector_by_type_and_id() {
        let a = item("a", "db", Rect::new(0.0, 0.0, 1.0, 1.0), Value::Null);
        let select = Selector {
            construct_types: Some(vec!["db".into()]),
            semantic_ids: Some(vec!["b".into()]),
        };
        assert!(!select.matches(&a));
        assert!(Selector::default().matches(&a));
    }

    #[test]
    fn test_relax_separates_overlaps() {
        let mut rects = vec![Rect::new(0.0, 0.0, 100.0, 100.0), Rect::new(10.0, 0.0, 100.0, 100.0)];
        relax(&mut rects, &[], 50, 10.0, 200.0);
        assert!(!rects[0].inflate(4.0).overlaps(&rects[1].inflate(4.0)));
    }
}
