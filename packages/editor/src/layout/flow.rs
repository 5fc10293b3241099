//! Topological flow layout.
//!
//! Layers are longest-path distances from nodes with no incoming flow edge.
//! Nodes caught in a cycle are placed after the fact, in input order, one
//! layer past their deepest already-placed predecessor. Layers stack along
//! the flow axis with `layer_gap` clear space; nodes within a layer keep
//! input order and sit `node_gap` apart, centred on the layer axis. The
//! result is translated so the laid-out set keeps its original centroid.

use super::{Axis, LayoutItem, LayoutOutcome, Placement};
use crate::document::{DiagramDocument, DocWrite};
use crate::model::Edge;
use carta_common::{Position, Rect};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FlowDirection {
    #[default]
    TB,
    BT,
    LR,
    RL,
}

impl FlowDirection {
    /// Axis the layers advance along
    pub fn axis(self) -> Axis {
        match self {
            FlowDirection::TB | FlowDirection::BT => Axis::Y,
            FlowDirection::LR | FlowDirection::RL => Axis::X,
        }
    }

    fn reversed(self) -> bool {
        matches!(self, FlowDirection::BT | FlowDirection::RL)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlowOptions {
    pub direction: FlowDirection,
    /// Port id an edge must leave from to count as flow
    pub source_port: String,
    /// Port id an edge must arrive at to count as flow
    pub sink_port: String,
    pub layer_gap: Option<f64>,
    pub node_gap: Option<f64>,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            direction: FlowDirection::TB,
            source_port: "flow-out".to_string(),
            sink_port: "flow-in".to_string(),
            layer_gap: None,
            node_gap: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowResult {
    /// Layer per laid-out unit, keyed by semantic id (constructs) or
    /// organizer id. Layers are local to the scope the unit was laid out in.
    pub layers: BTreeMap<String, usize>,
    pub updated: usize,
    pub warnings: Vec<String>,
}

/// Longest-path layering over `n` nodes; cyclic leftovers per module docs
pub fn assign_layers(n: usize, edges: &[(usize, usize)]) -> Vec<usize> {
    let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
    for i in 0..n {
        graph.add_node(i);
    }
    for &(a, b) in edges {
        graph.add_edge(a, b, ());
    }

    let mut indegree: Vec<usize> = (0..n)
        .map(|i| graph.neighbors_directed(i, Direction::Incoming).count())
        .collect();
    let mut layer: Vec<Option<usize>> = vec![None; n];
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    for &i in &queue {
        layer[i] = Some(0);
    }

    while let Some(u) = queue.pop_front() {
        let next = layer[u].unwrap_or(0) + 1;
        let mut successors: Vec<usize> = graph.neighbors_directed(u, Direction::Outgoing).collect();
        successors.sort_unstable();
        for v in successors {
            layer[v] = Some(layer[v].map_or(next, |l| l.max(next)));
            indegree[v] -= 1;
            if indegree[v] == 0 {
                queue.push_back(v);
            }
        }
    }

    // Cycle members never reached indegree zero
    for v in 0..n {
        if indegree[v] == 0 {
            continue;
        }
        let deepest = graph
            .neighbors_directed(v, Direction::Incoming)
            .filter(|&u| u != v && indegree[u] == 0)
            .filter_map(|u| layer[u])
            .max();
        layer[v] = Some(deepest.map_or(0, |l| l + 1));
        indegree[v] = 0;
    }

    layer.into_iter().map(|l| l.unwrap_or(0)).collect()
}

/// Positions for items already assigned to layers, before centroid
/// correction. Works in a (cross, primary) frame mapped onto x/y at the end.
fn stack_layers(
    items: &[LayoutItem],
    layers: &[usize],
    direction: FlowDirection,
    layer_gap: f64,
    node_gap: f64,
) -> Vec<Position> {
    let primary = direction.axis();
    let cross = primary.other();
    let extent = |r: &Rect, axis: Axis| match axis {
        Axis::X => r.width,
        Axis::Y => r.height,
    };

    let depth = layers.iter().copied().max().map_or(0, |m| m + 1);
    let mut by_layer: Vec<Vec<usize>> = vec![Vec::new(); depth];
    for (i, &l) in layers.iter().enumerate() {
        by_layer[l].push(i);
    }

    let mut out = vec![Position::ORIGIN; items.len()];
    let mut layer_start = 0.0;
    for members in &by_layer {
        let thickness = members
            .iter()
            .map(|&i| extent(&items[i].rect, primary))
            .fold(0.0, f64::max);
        let span: f64 = members.iter().map(|&i| extent(&items[i].rect, cross)).sum::<f64>()
            + node_gap * members.len().saturating_sub(1) as f64;

        let mut cursor = -span / 2.0;
        for &i in members {
            let rect = &items[i].rect;
            let p = if direction.reversed() {
                -layer_start - extent(rect, primary)
            } else {
                layer_start
            };
            out[i] = match primary {
                Axis::Y => Position::new(cursor, p),
                Axis::X => Position::new(p, cursor),
            };
            cursor += extent(rect, cross) + node_gap;
        }
        if !members.is_empty() {
            layer_start += thickness + layer_gap;
        }
    }
    out
}

fn centroid(rects: impl Iterator<Item = Rect>) -> Position {
    let mut sum = Position::ORIGIN;
    let mut count = 0.0;
    for r in rects {
        sum = sum.add(r.center());
        count += 1.0;
    }
    if count == 0.0 {
        return Position::ORIGIN;
    }
    Position::new(sum.x / count, sum.y / count)
}

/// Lay `items` out in layers and keep their centroid
pub(crate) fn layered_positions(
    items: &[LayoutItem],
    edges: &[(usize, usize)],
    direction: FlowDirection,
    layer_gap: f64,
    node_gap: f64,
) -> (Vec<usize>, Vec<Position>) {
    let layers = assign_layers(items.len(), edges);
    let raw = stack_layers(items, &layers, direction, layer_gap, node_gap);

    let before = centroid(items.iter().map(|i| i.rect));
    let after = centroid(
        items
            .iter()
            .zip(&raw)
            .map(|(item, p)| item.rect.with_origin(*p)),
    );
    let shift = before.sub(after);
    let positions = raw.into_iter().map(|p| p.add(shift)).collect();
    (layers, positions)
}

pub(crate) struct FlowPlacement {
    options: FlowOptions,
    layer_gap: f64,
    node_gap: f64,
    layers: BTreeMap<String, usize>,
}

impl Placement for FlowPlacement {
    fn accepts_edge(&self, edge: &Edge) -> bool {
        edge.source_handle == self.options.source_port && edge.target_handle == self.options.sink_port
    }

    fn participates(&self, item: &LayoutItem, has_edges: bool) -> bool {
        !item.is_organizer || has_edges
    }

    fn place(&mut self, items: &[LayoutItem], edges: &[(usize, usize)]) -> Vec<Position> {
        let (layers, positions) =
            layered_positions(items, edges, self.options.direction, self.layer_gap, self.node_gap);
        for (item, layer) in items.iter().zip(layers) {
            self.layers.insert(item.key.clone(), layer);
        }
        positions
    }

    fn nudge_axis(&self) -> Axis {
        self.options.direction.axis().other()
    }
}

impl<'doc> DocWrite<'doc> {
    #[instrument(skip(self, options), fields(direction = ?options.direction))]
    pub fn flow_layout(&mut self, page_id: &str, options: FlowOptions) -> FlowResult {
        let defaults = &self.config().layout;
        let mut placement = FlowPlacement {
            layer_gap: options.layer_gap.unwrap_or(defaults.layer_gap),
            node_gap: options.node_gap.unwrap_or(defaults.node_gap),
            options,
            layers: BTreeMap::new(),
        };
        let LayoutOutcome { updated, warnings } = self.run_layout(page_id, &mut placement);
        info!(page_id, updated, units = placement.layers.len(), "Flow layout applied");
        FlowResult {
            layers: placement.layers,
            updated,
            warnings,
        }
    }
}

impl DiagramDocument {
    pub fn flow_layout(&self, page_id: &str, options: FlowOptions) -> FlowResult {
        self.write(|tx| tx.flow_layout(page_id, options))
    }
}
