//! # Consistency Repair
//!
//! Concurrent merges can leave a page with edges to deleted nodes, children
//! of vanished organizers, wagons whose construct is gone, nested maps
//! decayed to plain values, or edges and connections that no longer mirror
//! each other. [`DocTxn::find_orphans`] reports these without writing;
//! [`DocWrite::repair_connections`] restores the edge/connection pairing;
//! [`DocWrite::rebuild_page`] rewrites the whole page from a cleaned
//! snapshot and then restores the pairing.

use crate::document::{DiagramDocument, DocTxn, DocWrite, NodeIndex};
use crate::model::{Connection, Edge, Node};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{info, instrument, warn};
use yrs::ReadTxn;

/// Problems found on a page, by id
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrphanReport {
    /// Edges whose source or target node does not exist
    pub edges_to_missing_nodes: Vec<String>,
    /// `semanticId -> targetSemanticId` for connections to missing constructs
    pub connections_to_missing_targets: Vec<String>,
    pub edges_without_connection: Vec<String>,
    /// `semanticId:portId -> targetSemanticId:targetPortId`
    pub connections_without_edge: Vec<String>,
    /// Nodes whose `parentId` does not exist
    pub dangling_parents: Vec<String>,
    /// Wagons whose construct does not exist
    pub dangling_attachments: Vec<String>,
}

impl OrphanReport {
    pub fn is_clean(&self) -> bool {
        self.edges_to_missing_nodes.is_empty()
            && self.connections_to_missing_targets.is_empty()
            && self.edges_without_connection.is_empty()
            && self.connections_without_edge.is_empty()
            && self.dangling_parents.is_empty()
            && self.dangling_attachments.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairResult {
    pub nodes: usize,
    pub nodes_dropped: usize,
    pub edges: usize,
    pub edges_removed: usize,
    pub edges_added: usize,
    pub connections_added: usize,
    pub connections_pruned: usize,
    pub parents_cleared: usize,
    pub attachments_cleared: usize,
    pub warnings: Vec<String>,
}

impl RepairResult {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Whether `edge` (already known to leave the connection's owner) carries `c`
fn mirrors(edge: &Edge, c: &Connection, target_id: &str) -> bool {
    edge.target == target_id && edge.source_handle == c.port_id && edge.target_handle == c.target_port_id
}

fn describe(sid: &str, c: &Connection) -> String {
    format!("{}:{} -> {}:{}", sid, c.port_id, c.target_semantic_id, c.target_port_id)
}

impl<'doc, T: ReadTxn> DocTxn<'doc, T> {
    pub fn find_orphans(&self, page_id: &str) -> OrphanReport {
        let index = self.node_index(page_id);
        let edges = self.edges(page_id);
        let mut report = OrphanReport::default();

        for edge in &edges {
            if !index.contains(&edge.source) || !index.contains(&edge.target) {
                report.edges_to_missing_nodes.push(edge.id.clone());
                continue;
            }
            let (Some(source), Some(target)) = (
                index.get(&edge.source).and_then(Node::as_construct),
                index.get(&edge.target).and_then(Node::as_construct),
            ) else {
                continue;
            };
            let paired = source.data.connections.iter().any(|c| {
                c.target_semantic_id == target.semantic_id()
                    && c.port_id == edge.source_handle
                    && c.target_port_id == edge.target_handle
            });
            if !paired {
                report.edges_without_connection.push(edge.id.clone());
            }
        }

        for node in index.nodes() {
            if let Some(pid) = node.parent_id() {
                if !index.contains(pid) {
                    report.dangling_parents.push(node.id().to_string());
                }
            }
            match node {
                Node::Wagon(w) if index.by_semantic_id(&w.attached_to_semantic_id).is_none() => {
                    report.dangling_attachments.push(w.organizer.id.clone());
                }
                Node::Construct(c) => {
                    for conn in &c.data.connections {
                        match index.by_semantic_id(&conn.target_semantic_id) {
                            None => report
                                .connections_to_missing_targets
                                .push(format!("{} -> {}", c.semantic_id(), conn.target_semantic_id)),
                            Some(target) => {
                                let has_edge = edges
                                    .iter()
                                    .any(|e| e.source == c.id && mirrors(e, conn, &target.id));
                                if !has_edge {
                                    report.connections_without_edge.push(describe(c.semantic_id(), conn));
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        report
    }
}

impl<'doc> DocWrite<'doc> {
    /// Make every edge and connection mirror exactly one of the other.
    ///
    /// Edges to missing nodes and duplicate edges are removed, edges without
    /// a connection get one, connections to missing constructs and duplicate
    /// connections are pruned, and connections without an edge get one.
    #[instrument(skip(self))]
    pub fn repair_connections(&mut self, page_id: &str) -> RepairResult {
        let mut result = RepairResult::default();
        let index = self.node_index(page_id);
        self.restore_duality(page_id, &index, &mut result);
        info!(
            page_id,
            edges_added = result.edges_added,
            connections_added = result.connections_added,
            connections_pruned = result.connections_pruned,
            edges_removed = result.edges_removed,
            "Repaired connections"
        );
        result
    }

    fn restore_duality(&mut self, page_id: &str, index: &NodeIndex, result: &mut RepairResult) {
        let mut seen_edges = HashSet::new();
        let mut kept_edges = Vec::new();
        for edge in self.edges(page_id) {
            let endpoints = (index.get(&edge.source), index.get(&edge.target));
            let (Some(_), Some(_)) = endpoints else {
                self.remove_edge(page_id, &edge.id);
                result.edges_removed += 1;
                result.warn(format!("Removed edge {} to a missing node", edge.id));
                continue;
            };
            let key = (
                edge.source.clone(),
                edge.target.clone(),
                edge.source_handle.clone(),
                edge.target_handle.clone(),
            );
            if !seen_edges.insert(key) {
                self.remove_edge(page_id, &edge.id);
                result.edges_removed += 1;
                continue;
            }
            kept_edges.push(edge);
        }

        for construct in index.nodes().iter().filter_map(Node::as_construct) {
            let sid = construct.semantic_id();

            // Prune first so the additions below see the surviving entries
            let mut seen = HashSet::new();
            let mut present: Vec<Connection> = Vec::new();
            let mut pruned_missing = Vec::new();
            let pruned = self.retain_connections(page_id, &construct.id, |c| match c {
                Some(c) if index.by_semantic_id(&c.target_semantic_id).is_none() => {
                    pruned_missing.push(c.target_semantic_id.clone());
                    false
                }
                Some(c) => {
                    let fresh = seen.insert(c.clone());
                    if fresh {
                        present.push(c.clone());
                    }
                    fresh
                }
                None => false,
            });
            result.connections_pruned += pruned;
            for target in pruned_missing {
                result.warn(format!("Pruned connection {} -> {}: target does not exist", sid, target));
            }

            for edge in kept_edges.iter().filter(|e| e.source == construct.id) {
                let Some(target) = index.get(&edge.target).and_then(Node::as_construct) else {
                    continue;
                };
                let connection = Connection {
                    port_id: edge.source_handle.clone(),
                    target_semantic_id: target.semantic_id().to_string(),
                    target_port_id: edge.target_handle.clone(),
                };
                if seen.insert(connection.clone()) {
                    self.push_connection(page_id, &construct.id, &connection);
                    present.push(connection);
                    result.connections_added += 1;
                }
            }

            for connection in &present {
                let Some(target) = index.by_semantic_id(&connection.target_semantic_id) else {
                    continue;
                };
                let has_edge = kept_edges
                    .iter()
                    .any(|e| e.source == construct.id && mirrors(e, connection, &target.id));
                if !has_edge {
                    let edge = Edge {
                        id: self.ids().new_id("e"),
                        source: construct.id.clone(),
                        target: target.id.clone(),
                        source_handle: connection.port_id.clone(),
                        target_handle: connection.target_port_id.clone(),
                    };
                    self.insert_edge(page_id, &edge);
                    kept_edges.push(edge);
                    result.edges_added += 1;
                }
            }
        }
    }

    /// Rewrite a page from a cleaned snapshot of itself, then restore the
    /// edge/connection pairing. Also re-materializes any nested map that
    /// decayed into a plain value.
    #[instrument(skip(self))]
    pub fn rebuild_page(&mut self, page_id: &str) -> RepairResult {
        let mut result = RepairResult::default();
        let raw = self.node_values(page_id);
        let index = self.node_index(page_id);
        result.nodes_dropped = raw.len() - index.nodes().len();
        if result.nodes_dropped > 0 {
            result.warn(format!("Dropped {} unreadable node(s)", result.nodes_dropped));
        }

        let mut nodes: Vec<Node> = Vec::with_capacity(index.nodes().len());
        for node in index.nodes() {
            let mut node = node.clone();
            if let Node::Wagon(w) = &node {
                if index.by_semantic_id(&w.attached_to_semantic_id).is_none() {
                    let mut organizer = w.organizer.clone();
                    organizer.position = index.absolute_position(&node);
                    organizer.parent_id = None;
                    result.attachments_cleared += 1;
                    result.warn(format!(
                        "Cleared attachment of wagon {} to missing construct {}",
                        organizer.id, w.attached_to_semantic_id
                    ));
                    node = Node::Organizer(organizer);
                }
            }

            let dangling = node.parent_id().filter(|pid| !index.contains(pid)).map(str::to_string);
            if let Some(pid) = dangling {
                match &mut node {
                    Node::Construct(c) => c.parent_id = None,
                    Node::Organizer(o) => o.parent_id = None,
                    Node::Wagon(w) => w.organizer.parent_id = None,
                }
                result.parents_cleared += 1;
                result.warn(format!("Cleared parent {} of node {}: parent does not exist", pid, node.id()));
            }
            nodes.push(node);
        }

        let mut edges = Vec::new();
        for edge in self.edges(page_id) {
            if index.contains(&edge.source) && index.contains(&edge.target) {
                edges.push(edge);
            } else {
                result.edges_removed += 1;
                result.warn(format!("Dropped edge {} to a missing node", edge.id));
            }
        }

        self.replace_page_contents(page_id, &nodes, &edges);
        let rebuilt = NodeIndex::new(nodes);
        self.restore_duality(page_id, &rebuilt, &mut result);
        result.nodes = rebuilt.nodes().len();
        result.edges = self.edges(page_id).len();
        info!(
            page_id,
            nodes = result.nodes,
            edges = result.edges,
            warnings = result.warnings.len(),
            "Rebuilt page"
        );
        result
    }
}

impl DiagramDocument {
    pub fn find_orphans(&self, page_id: &str) -> OrphanReport {
        self.read(|tx| tx.find_orphans(page_id))
    }

    pub fn repair_connections(&self, page_id: &str) -> RepairResult {
        self.write(|tx| tx.repair_connections(page_id))
    }

    pub fn rebuild_page(&self, page_id: &str) -> RepairResult {
        self.write(|tx| tx.rebuild_page(page_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Values;
    use crate::testing::seeded_document;
    use crate::crdt::json_to_any;
    use carta_common::Position;
    use serde_json::json;
    use yrs::{Map, Out};

    #[test]
    fn test_clean_page_has_no_orphans() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        doc.connect(&page, a.semantic_id(), "flow-out", b.semantic_id(), "flow-in")
            .unwrap();
        assert!(doc.find_orphans(&page).is_clean());
    }

    #[test]
    fn test_repair_restores_both_directions() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let c = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();

        doc.write(|tx| {
            // edge a -> b without its connection
            tx.insert_edge(
                &page,
                &Edge {
                    id: "e-manual".into(),
                    source: a.id.clone(),
                    target: b.id.clone(),
                    source_handle: "flow-out".into(),
                    target_handle: "flow-in".into(),
                },
            );
            // connection b -> c without its edge, and one to nowhere
            tx.push_connection(
                &page,
                &b.id,
                &Connection {
                    port_id: "flow-out".into(),
                    target_semantic_id: c.semantic_id().into(),
                    target_port_id: "flow-in".into(),
                },
            );
            tx.push_connection(
                &page,
                &b.id,
                &Connection {
                    port_id: "flow-out".into(),
                    target_semantic_id: "ghost-000000".into(),
                    target_port_id: "flow-in".into(),
                },
            );
        });

        let report = doc.find_orphans(&page);
        assert_eq!(report.edges_without_connection, vec!["e-manual".to_string()]);
        assert_eq!(report.connections_without_edge.len(), 1);
        assert_eq!(report.connections_to_missing_targets.len(), 1);

        let result = doc.repair_connections(&page);
        assert_eq!(result.connections_added, 1);
        assert_eq!(result.edges_added, 1);
        assert_eq!(result.connections_pruned, 1);
        assert!(doc.find_orphans(&page).is_clean());
    }

    #[test]
    fn test_rebuild_clears_dangling_references() {
        let (doc, page) = seeded_document();
        let a = doc
            .create_construct(&page, "task", Values::new(), Some(Position::new(5.0, 5.0)), None)
            .unwrap();
        doc.write(|tx| {
            tx.set_node_parent(&page, &a.id, Some("org-gone"));
            tx.insert_edge(
                &page,
                &Edge {
                    id: "e-dangling".into(),
                    source: a.id.clone(),
                    target: "n-gone".into(),
                    source_handle: "flow-out".into(),
                    target_handle: "flow-in".into(),
                },
            );
        });

        let result = doc.rebuild_page(&page);
        assert_eq!(result.parents_cleared, 1);
        assert_eq!(result.edges_removed, 1);
        assert_eq!(result.edges, 0);
        let a = doc.get_construct(&page, a.semantic_id()).unwrap();
        assert_eq!(a.parent_id, None);
        assert_eq!(a.position, Position::new(5.0, 5.0));
    }

    #[test]
    fn test_rebuild_rematerializes_decayed_data() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "task", Values::new(), None, None).unwrap();
        let data_is_live = |doc: &DiagramDocument| {
            doc.write(|tx| {
                let node = tx.node_map(&page, &a.id).unwrap();
                matches!(node.get(&tx.txn, "data"), Some(Out::YMap(_)))
            })
        };

        // A plain value where the live data map should be, as a bad merge leaves it
        doc.write(|tx| {
            let node = tx.node_map(&page, &a.id).unwrap();
            let data = json!({
                "constructType": "task",
                "semanticId": a.semantic_id(),
                "values": { "title": "kept" },
                "connections": []
            });
            node.insert(&mut tx.txn, "data", json_to_any(&data));
        });
        assert!(!data_is_live(&doc));

        doc.rebuild_page(&page);
        assert!(data_is_live(&doc));
        let a = doc.get_construct(&page, a.semantic_id()).unwrap();
        assert_eq!(a.data.values.get("title"), Some(&json!("kept")));
    }
}
