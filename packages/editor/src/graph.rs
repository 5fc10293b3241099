//! Page-scoped read access over constructs, organizers and edges.

use crate::document::{DiagramDocument, DocTxn, NodeIndex};
use crate::model::{Connection, ConstructNode, Edge, Node, WagonNode};
use carta_common::{Rect, Size};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use yrs::ReadTxn;

/// Counts describing one page
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub page_id: String,
    pub constructs: usize,
    pub organizers: usize,
    pub wagons: usize,
    pub edges: usize,
    pub pin_constraints: usize,
    /// Construct count per `constructType`
    pub by_type: BTreeMap<String, usize>,
}

impl NodeIndex {
    /// Absolute rect of a node grown to cover its attached wagons.
    ///
    /// Wagons hang off their owner construct, so a construct placed as a
    /// layout unit has to reserve their space too.
    pub fn footprint(&self, node: &Node, construct_default: Size) -> Rect {
        let own = self.absolute_rect(node, construct_default);
        let Some(sid) = node.semantic_id() else {
            return own;
        };
        self.wagons_of(sid)
            .map(|w| self.absolute_rect(w, construct_default))
            .fold(own, |acc, r| acc.union(&r))
    }

    /// Ids of `node_id` and every node nested beneath it
    pub fn descendants(&self, node_id: &str) -> HashSet<String> {
        let mut found = HashSet::new();
        let mut stack = vec![node_id.to_string()];
        while let Some(id) = stack.pop() {
            if !found.insert(id.clone()) {
                continue;
            }
            stack.extend(self.children(&id).map(|c| c.id().to_string()));
        }
        found
    }

    /// Whether `ancestor_id` sits on `node_id`'s parent chain
    pub fn is_ancestor(&self, ancestor_id: &str, node_id: &str) -> bool {
        let mut seen = HashSet::new();
        let mut current = self.get(node_id).and_then(Node::parent_id);
        while let Some(pid) = current {
            if pid == ancestor_id {
                return true;
            }
            if !seen.insert(pid) {
                break;
            }
            current = self.get(pid).and_then(Node::parent_id);
        }
        false
    }
}

impl<'doc, T: ReadTxn> DocTxn<'doc, T> {
    pub fn constructs(&self, page_id: &str) -> Vec<ConstructNode> {
        self.nodes(page_id)
            .into_iter()
            .filter_map(|n| match n {
                Node::Construct(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    /// Free-standing organizers and wagons
    pub fn organizers(&self, page_id: &str) -> Vec<Node> {
        self.nodes(page_id)
            .into_iter()
            .filter(|n| n.as_organizer().is_some())
            .collect()
    }

    pub fn organizer(&self, page_id: &str, organizer_id: &str) -> Option<Node> {
        self.node(page_id, organizer_id)
            .filter(|n| n.as_organizer().is_some())
    }

    pub fn organizer_members(&self, page_id: &str, organizer_id: &str) -> Vec<Node> {
        let index = self.node_index(page_id);
        index.children(organizer_id).cloned().collect()
    }

    pub fn wagons(&self, page_id: &str, semantic_id: &str) -> Vec<WagonNode> {
        self.nodes(page_id)
            .into_iter()
            .filter_map(|n| match n {
                Node::Wagon(w) if w.attached_to_semantic_id == semantic_id => Some(w),
                _ => None,
            })
            .collect()
    }

    pub fn connections(&self, page_id: &str, semantic_id: &str) -> Vec<Connection> {
        self.construct(page_id, semantic_id)
            .map(|c| c.data.connections)
            .unwrap_or_default()
    }

    /// Edges that touch the node with internal id `node_id`
    pub fn incident_edges(&self, page_id: &str, node_id: &str) -> Vec<Edge> {
        self.edges(page_id)
            .into_iter()
            .filter(|e| e.source == node_id || e.target == node_id)
            .collect()
    }

    pub fn page_summary(&self, page_id: &str) -> PageSummary {
        let mut summary = PageSummary {
            page_id: page_id.to_string(),
            ..Default::default()
        };
        for node in self.nodes(page_id) {
            match node {
                Node::Construct(c) => {
                    summary.constructs += 1;
                    *summary.by_type.entry(c.data.construct_type).or_default() += 1;
                }
                Node::Organizer(_) => summary.organizers += 1,
                Node::Wagon(_) => summary.wagons += 1,
            }
        }
        summary.edges = self.edges(page_id).len();
        summary.pin_constraints = self.pin_constraints(page_id).len();
        summary
    }
}

impl DiagramDocument {
    pub fn list_constructs(&self, page_id: &str) -> Vec<ConstructNode> {
        self.read(|tx| tx.constructs(page_id))
    }

    pub fn list_organizers(&self, page_id: &str) -> Vec<Node> {
        self.read(|tx| tx.organizers(page_id))
    }

    pub fn list_edges(&self, page_id: &str) -> Vec<Edge> {
        self.read(|tx| tx.edges(page_id))
    }

    pub fn get_construct(&self, page_id: &str, semantic_id: &str) -> Option<ConstructNode> {
        self.read(|tx| tx.construct(page_id, semantic_id))
    }

    pub fn get_organizer(&self, page_id: &str, organizer_id: &str) -> Option<Node> {
        self.read(|tx| tx.organizer(page_id, organizer_id))
    }

    pub fn get_node(&self, page_id: &str, node_id: &str) -> Option<Node> {
        self.read(|tx| tx.node(page_id, node_id))
    }

    pub fn organizer_members(&self, page_id: &str, organizer_id: &str) -> Vec<Node> {
        self.read(|tx| tx.organizer_members(page_id, organizer_id))
    }

    pub fn wagons_of(&self, page_id: &str, semantic_id: &str) -> Vec<WagonNode> {
        self.read(|tx| tx.wagons(page_id, semantic_id))
    }

    pub fn connections_of(&self, page_id: &str, semantic_id: &str) -> Vec<Connection> {
        self.read(|tx| tx.connections(page_id, semantic_id))
    }

    pub fn page_summary(&self, page_id: &str) -> PageSummary {
        self.read(|tx| tx.page_summary(page_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstructData, OrganizerData, OrganizerNode};
    use carta_common::Position;

    const DEFAULT: Size = Size {
        width: 200.0,
        height: 100.0,
    };

    fn construct(id: &str, sid: &str, x: f64, y: f64) -> Node {
        Node::Construct(ConstructNode {
            id: id.into(),
            position: Position::new(x, y),
            parent_id: None,
            size: None,
            data: ConstructData {
                construct_type: "service".into(),
                semantic_id: sid.into(),
                values: Default::default(),
                connections: vec![],
                instance_color: None,
            },
        })
    }

    fn wagon(id: &str, owner_id: &str, owner_sid: &str, y: f64) -> Node {
        Node::Wagon(WagonNode {
            organizer: OrganizerNode {
                id: id.into(),
                position: Position::new(0.0, y),
                parent_id: Some(owner_id.into()),
                size: Size::new(300.0, 150.0),
                data: OrganizerData::named("Details"),
            },
            attached_to_semantic_id: owner_sid.into(),
        })
    }

    #[test]
    fn test_footprint_covers_wagons() {
        let index = NodeIndex::new(vec![
            construct("n-1", "svc-a", 100.0, 100.0),
            wagon("w-1", "n-1", "svc-a", 120.0),
        ]);
        let rect = index.footprint(index.get("n-1").unwrap(), DEFAULT);
        assert_eq!(rect, Rect::new(100.0, 100.0, 300.0, 270.0));
    }

    #[test]
    fn test_descendants_and_ancestry() {
        let index = NodeIndex::new(vec![
            construct("n-1", "svc-a", 0.0, 0.0),
            wagon("w-1", "n-1", "svc-a", 120.0),
        ]);
        let below = index.descendants("n-1");
        assert!(below.contains("w-1"));
        assert!(index.is_ancestor("n-1", "w-1"));
        assert!(!index.is_ancestor("w-1", "n-1"));
    }
}
