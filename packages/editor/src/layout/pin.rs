//! Pin constraints: directional placement of one organizer next to another.
//!
//! A constraint `source --dir(gap)--> target` puts `source` on the `dir` side
//! of `target`, `gap` apart, centred on the other axis when `dir` is a
//! cardinal direction. Resolution walks targets before sources; organizers
//! that are never the source of a constraint stay put, and when a source has
//! several constraints the last one wins.

use crate::document::{DiagramDocument, DocWrite};
use crate::model::{Node, PinConstraint, PinDirection};
use carta_common::{CartaError, CartaResult, EntityKind, Position, Rect, Size};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PinLayoutResult {
    pub updated: usize,
    pub warnings: Vec<String>,
}

/// Where `source` goes when pinned to `target`
pub fn pinned_origin(source: Size, target: &Rect, direction: PinDirection, gap: f64) -> Position {
    let (sx, sy) = direction.signs();
    let x = match sx {
        1 => target.right() + gap,
        -1 => target.x - source.width - gap,
        _ => target.x + (target.width - source.width) / 2.0,
    };
    let y = match sy {
        1 => target.bottom() + gap,
        -1 => target.y - source.height - gap,
        _ => target.y + (target.height - source.height) / 2.0,
    };
    Position::new(x, y)
}

impl<'doc> DocWrite<'doc> {
    /// Pin `source` next to `target`, replacing any constraint on the same
    /// ordered pair
    pub fn add_pin_constraint(
        &mut self,
        page_id: &str,
        source_organizer_id: &str,
        target_organizer_id: &str,
        direction: PinDirection,
        gap: Option<f64>,
    ) -> CartaResult<PinConstraint> {
        self.require_page(page_id)?;
        if source_organizer_id == target_organizer_id {
            return Err(CartaError::InvalidReference(format!(
                "Organizer {} cannot be pinned to itself",
                source_organizer_id
            )));
        }
        let index = self.node_index(page_id);
        for id in [source_organizer_id, target_organizer_id] {
            if index.get(id).and_then(Node::as_organizer).is_none() {
                return Err(CartaError::not_found(EntityKind::Organizer, id));
            }
        }

        let replaced = self.retain_pin_constraints(page_id, |c| {
            c.source_organizer_id != source_organizer_id || c.target_organizer_id != target_organizer_id
        });
        let constraint = PinConstraint {
            id: self.ids().new_id("pin"),
            source_organizer_id: source_organizer_id.to_string(),
            target_organizer_id: target_organizer_id.to_string(),
            direction,
            gap,
        };
        self.push_pin_constraint(page_id, &constraint);
        info!(
            page_id,
            constraint_id = %constraint.id,
            source = source_organizer_id,
            target = target_organizer_id,
            replaced,
            "Added pin constraint"
        );
        Ok(constraint)
    }

    pub fn remove_pin_constraint(&mut self, page_id: &str, constraint_id: &str) -> bool {
        let removed = self.retain_pin_constraints(page_id, |c| c.id != constraint_id);
        debug!(page_id, constraint_id, removed, "Removed pin constraint");
        removed > 0
    }

    #[instrument(skip(self))]
    pub fn apply_pin_layout(&mut self, page_id: &str) -> PinLayoutResult {
        let mut result = PinLayoutResult::default();
        let constraints = self.pin_constraints(page_id);
        if constraints.is_empty() {
            return result;
        }
        let index = self.node_index(page_id);
        let default_gap = self.config().layout.pin_gap;

        let mut usable: Vec<&PinConstraint> = Vec::new();
        for constraint in &constraints {
            let mut ok = true;
            for id in [&constraint.source_organizer_id, &constraint.target_organizer_id] {
                if index.get(id).and_then(Node::as_organizer).is_none() {
                    let message = format!("Pin constraint {} references missing organizer {}", constraint.id, id);
                    warn!(page_id, "{}", message);
                    result.warnings.push(message);
                    ok = false;
                }
            }
            if ok {
                usable.push(constraint);
            }
        }

        // target -> source: targets resolve first
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
        for c in &usable {
            graph.add_edge(c.target_organizer_id.as_str(), c.source_organizer_id.as_str(), ());
        }
        for component in tarjan_scc(&graph) {
            if component.len() > 1 {
                let mut ids: Vec<&str> = component.clone();
                ids.sort_unstable();
                let message = format!("Cycle detected among organizers: {}", ids.join(", "));
                warn!(page_id, "{}", message);
                result.warnings.push(message);
            }
        }

        let mut rects: HashMap<&str, Rect> = HashMap::new();
        for id in graph.nodes() {
            if let Some(node) = index.get(id) {
                rects.insert(id, index.absolute_rect(node, self.construct_size()));
            }
        }

        let mut pending: HashMap<&str, usize> = graph
            .nodes()
            .map(|id| (id, graph.neighbors_directed(id, Direction::Incoming).count()))
            .collect();
        let mut queue: VecDeque<&str> = graph.nodes().filter(|id| pending[id] == 0).collect();
        let mut moved: HashSet<&str> = HashSet::new();

        while let Some(target) = queue.pop_front() {
            for source in graph.neighbors_directed(target, Direction::Outgoing) {
                let Some(count) = pending.get_mut(source) else {
                    continue;
                };
                *count -= 1;
                if *count > 0 {
                    continue;
                }
                for c in usable.iter().filter(|c| c.source_organizer_id == source) {
                    let (Some(anchor), Some(own)) = (
                        rects.get(c.target_organizer_id.as_str()).copied(),
                        rects.get(source).copied(),
                    ) else {
                        continue;
                    };
                    let origin = pinned_origin(
                        own.size(),
                        &anchor,
                        c.direction,
                        c.gap.unwrap_or(default_gap),
                    );
                    rects.insert(source, own.with_origin(origin));
                }
                moved.insert(source);
                queue.push_back(source);
            }
        }

        for id in moved {
            let (Some(node), Some(rect)) = (index.get(id), rects.get(id)) else {
                continue;
            };
            let relative = rect.origin().sub(index.container_origin(node.parent_id()));
            if relative != node.position() {
                self.set_node_position(page_id, id, relative);
                result.updated += 1;
            }
        }
        info!(page_id, updated = result.updated, warnings = result.warnings.len(), "Pin layout applied");
        result
    }
}

impl DiagramDocument {
    pub fn add_pin_constraint(
        &self,
        page_id: &str,
        source_organizer_id: &str,
        target_organizer_id: &str,
        direction: PinDirection,
        gap: Option<f64>,
    ) -> CartaResult<PinConstraint> {
        self.write(|tx| {
            tx.add_pin_constraint(page_id, source_organizer_id, target_organizer_id, direction, gap)
        })
    }

    pub fn remove_pin_constraint(&self, page_id: &str, constraint_id: &str) -> bool {
        self.write(|tx| tx.remove_pin_constraint(page_id, constraint_id))
    }

    pub fn list_pin_constraints(&self, page_id: &str) -> Vec<PinConstraint> {
        self.read(|tx| tx.pin_constraints(page_id))
    }

    pub fn apply_pin_layout(&self, page_id: &str) -> PinLayoutResult {
        self.write(|tx| tx.apply_pin_layout(page_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizers::NewOrganizer;
    use crate::testing::seeded_document;

    fn organizer(doc: &DiagramDocument, page: &str, name: &str, x: f64, y: f64) -> String {
        let spec = NewOrganizer {
            name: name.into(),
            position: Some(Position::new(x, y)),
            width: Some(300.0),
            height: Some(200.0),
            ..Default::default()
        };
        doc.create_organizer(page, spec).unwrap().id().to_string()
    }

    #[test]
    fn test_pinned_origin_directions() {
        let target = Rect::new(100.0, 100.0, 200.0, 100.0);
        assert_eq!(
            pinned_origin(Size::new(100.0, 50.0), &target, PinDirection::E, 10.0),
            Position::new(310.0, 125.0)
        );
        assert_eq!(
            pinned_origin(Size::new(100.0, 50.0), &target, PinDirection::NW, 10.0),
            Position::new(-10.0, 40.0)
        );
        assert_eq!(
            pinned_origin(Size::new(100.0, 50.0), &target, PinDirection::S, 0.0),
            Position::new(150.0, 200.0)
        );
    }

    #[test]
    fn test_add_pin_validates_organizers() {
        let (doc, page) = seeded_document();
        let a = organizer(&doc, &page, "A", 0.0, 0.0);
        assert!(matches!(
            doc.add_pin_constraint(&page, &a, &a, PinDirection::S, None),
            Err(CartaError::InvalidReference(_))
        ));
        assert!(doc
            .add_pin_constraint(&page, "missing", &a, PinDirection::S, None)
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_same_pair_is_replaced() {
        let (doc, page) = seeded_document();
        let a = organizer(&doc, &page, "A", 0.0, 0.0);
        let b = organizer(&doc, &page, "B", 500.0, 0.0);
        doc.add_pin_constraint(&page, &b, &a, PinDirection::S, None).unwrap();
        let second = doc.add_pin_constraint(&page, &b, &a, PinDirection::E, Some(5.0)).unwrap();

        let constraints = doc.list_pin_constraints(&page);
        assert_eq!(constraints, vec![second.clone()]);
        assert!(doc.remove_pin_constraint(&page, &second.id));
        assert!(doc.list_pin_constraints(&page).is_empty());
    }

    #[test]
    fn test_chain_resolves_in_order() {
        let (doc, page) = seeded_document();
        let a = organizer(&doc, &page, "A", 0.0, 0.0);
        let b = organizer(&doc, &page, "B", 900.0, 900.0);
        let c = organizer(&doc, &page, "C", -900.0, 0.0);
        // c east of b, b south of a
        doc.add_pin_constraint(&page, &c, &b, PinDirection::E, Some(10.0)).unwrap();
        doc.add_pin_constraint(&page, &b, &a, PinDirection::S, Some(10.0)).unwrap();

        let result = doc.apply_pin_layout(&page);
        assert!(result.warnings.is_empty());
        assert_eq!(result.updated, 2);
        let b_pos = doc.get_organizer(&page, &b).unwrap().position();
        let c_pos = doc.get_organizer(&page, &c).unwrap().position();
        assert_eq!(b_pos, Position::new(0.0, 210.0));
        assert_eq!(c_pos, Position::new(310.0, 210.0));
    }

    #[test]
    fn test_missing_organizer_warns() {
        let (doc, page) = seeded_document();
        let a = organizer(&doc, &page, "A", 0.0, 0.0);
        let b = organizer(&doc, &page, "B", 500.0, 0.0);
        let dangling = PinConstraint {
            id: "pin-dangling".into(),
            source_organizer_id: b.clone(),
            target_organizer_id: "org-gone".into(),
            direction: PinDirection::S,
            gap: None,
        };
        doc.write(|tx| tx.push_pin_constraint(&page, &dangling));
        doc.add_pin_constraint(&page, &b, &a, PinDirection::S, None).unwrap();

        let result = doc.apply_pin_layout(&page);
        assert_eq!(result.updated, 1);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("org-gone"));
    }
}
