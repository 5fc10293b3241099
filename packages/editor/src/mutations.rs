//! # Construct Mutations
//!
//! Single-target operations on constructs and their edges.
//!
//! ## Semantics
//!
//! ### Create
//! - Schema for the type must exist
//! - Fresh internal id and page-unique semantic id
//! - Field defaults fill values the caller omitted
//!
//! ### Delete
//! - Wagons attached to the construct go first: their members are detached
//!   to absolute coordinates, then the wagon is removed
//! - Incident edges are removed
//! - Connections on other constructs that target it are pruned
//!
//! ### Connect / Disconnect
//! - Edge and source-side connection are always written together
//! - Failures are reported as [`ConnectError`], never thrown
//!
//! Lookups miss quietly: `update`/`delete`/`move` return `None`/`false`
//! when the semantic id is absent.

use crate::document::{DiagramDocument, DocWrite, NodeIndex};
use crate::errors::ConnectError;
use crate::model::{Connection, ConstructData, ConstructNode, Edge, Node, Values};
use carta_common::{to_relative_position, CartaError, CartaResult, Position};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

impl<'doc> DocWrite<'doc> {
    /// Semantic id for a new `construct_type` instance, unique on the page
    pub(crate) fn fresh_semantic_id(&self, index: &NodeIndex, construct_type: &str) -> String {
        let taken = index.semantic_ids();
        loop {
            let candidate = self.ids().new_semantic_id(construct_type);
            if !taken.contains(candidate.as_str()) {
                return candidate;
            }
        }
    }

    /// Parent id must name an organizer (free-standing or wagon) on the page
    pub(crate) fn check_container(&self, index: &NodeIndex, parent_id: &str) -> CartaResult<()> {
        match index.get(parent_id) {
            Some(node) if node.as_organizer().is_some() => Ok(()),
            Some(_) => Err(CartaError::InvalidReference(format!(
                "'{}' is not an organizer",
                parent_id
            ))),
            None => Err(CartaError::InvalidReference(format!(
                "Parent organizer not found: {}",
                parent_id
            ))),
        }
    }

    pub fn create_construct(
        &mut self,
        page_id: &str,
        construct_type: &str,
        values: Values,
        position: Option<Position>,
        parent_id: Option<&str>,
    ) -> CartaResult<ConstructNode> {
        self.require_page(page_id)?;
        let schema = self.require_schema(construct_type)?;
        let index = self.node_index(page_id);
        if let Some(pid) = parent_id {
            self.check_container(&index, pid)?;
        }

        let mut values = values;
        for field in &schema.fields {
            if let Some(default) = &field.default {
                values
                    .entry(field.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }

        let position = match (position, parent_id) {
            (Some(p), _) => p,
            (None, Some(_)) => {
                let pad = self.config().layout.organizer_padding;
                Position::new(pad, pad)
            }
            (None, None) => self
                .grid_positions(page_id, 1)
                .pop()
                .unwrap_or(self.config().grid.origin),
        };

        let construct = ConstructNode {
            id: self.ids().new_id("n"),
            position,
            parent_id: parent_id.map(str::to_string),
            size: None,
            data: ConstructData {
                construct_type: construct_type.to_string(),
                semantic_id: self.fresh_semantic_id(&index, construct_type),
                values,
                connections: Vec::new(),
                instance_color: None,
            },
        };
        self.insert_node(page_id, &Node::Construct(construct.clone()));
        debug!(page_id, semantic_id = %construct.data.semantic_id, construct_type, "Created construct");
        Ok(construct)
    }

    /// Merge `values` field by field (`null` removes a field) and optionally
    /// set or clear the instance color.
    pub fn update_construct(
        &mut self,
        page_id: &str,
        semantic_id: &str,
        values: Option<&Values>,
        instance_color: Option<Option<&str>>,
    ) -> Option<ConstructNode> {
        let node_id = self.construct(page_id, semantic_id)?.id;

        if let Some(values) = values {
            for (field, value) in values {
                if value.is_null() {
                    self.remove_value(page_id, &node_id, field);
                } else {
                    self.set_value(page_id, &node_id, field, value);
                }
            }
        }

        match instance_color {
            Some(Some(color)) => {
                let color = Value::String(color.to_string());
                self.set_data_field(page_id, &node_id, "instanceColor", Some(&color));
            }
            Some(None) => self.set_data_field(page_id, &node_id, "instanceColor", None),
            None => {}
        }

        self.construct(page_id, semantic_id)
    }

    pub fn delete_construct(&mut self, page_id: &str, semantic_id: &str) -> bool {
        self.delete_construct_with(page_id, semantic_id, &HashSet::new())
    }

    /// Delete with cascade. Wagon members whose semantic id is in `doomed`
    /// are left in place since the caller deletes them next.
    pub(crate) fn delete_construct_with(
        &mut self,
        page_id: &str,
        semantic_id: &str,
        doomed: &HashSet<String>,
    ) -> bool {
        let index = self.node_index(page_id);
        let Some(target) = index.by_semantic_id(semantic_id).cloned() else {
            return false;
        };

        let wagon_ids: Vec<String> = index
            .wagons_of(semantic_id)
            .map(|w| w.id().to_string())
            .collect();
        for wagon_id in &wagon_ids {
            self.detach_members(page_id, &index, wagon_id, doomed);
            self.remove_edges_touching(page_id, wagon_id);
            self.retain_pin_constraints(page_id, |c| {
                c.source_organizer_id != *wagon_id && c.target_organizer_id != *wagon_id
            });
            self.remove_node(page_id, wagon_id);
        }

        // Anything else parented directly to the construct
        self.detach_members(page_id, &index, &target.id, doomed);

        let edges_removed = self.remove_edges_touching(page_id, &target.id);

        let mut pruned = 0;
        for node in index.nodes() {
            let Node::Construct(other) = node else { continue };
            if other.id == target.id
                || !other
                    .data
                    .connections
                    .iter()
                    .any(|c| c.target_semantic_id == semantic_id)
            {
                continue;
            }
            pruned += self.retain_connections(page_id, &other.id, |c| {
                c.map_or(true, |c| c.target_semantic_id != semantic_id)
            });
        }

        self.remove_node(page_id, &target.id);
        info!(
            page_id,
            semantic_id,
            wagons = wagon_ids.len(),
            edges_removed,
            connections_pruned = pruned,
            "Deleted construct"
        );
        true
    }

    /// Move the direct children of `container_id` out to page-absolute
    /// coordinates with no parent.
    pub(crate) fn detach_members(
        &mut self,
        page_id: &str,
        index: &NodeIndex,
        container_id: &str,
        doomed: &HashSet<String>,
    ) -> usize {
        let members: Vec<(String, Position)> = index
            .children(container_id)
            .filter(|m| !m.is_wagon())
            .filter(|m| m.semantic_id().map_or(true, |sid| !doomed.contains(sid)))
            .map(|m| (m.id().to_string(), index.absolute_position(m)))
            .collect();
        for (member_id, absolute) in &members {
            self.set_node_position(page_id, member_id, *absolute);
            self.set_node_parent(page_id, member_id, None);
        }
        members.len()
    }

    pub(crate) fn remove_edges_touching(&mut self, page_id: &str, node_id: &str) -> usize {
        let doomed: Vec<String> = self
            .edges(page_id)
            .into_iter()
            .filter(|e| e.source == node_id || e.target == node_id)
            .map(|e| e.id)
            .collect();
        for edge_id in &doomed {
            self.remove_edge(page_id, edge_id);
        }
        doomed.len()
    }

    /// Re-parent a node, converting its position between container frames.
    /// An explicit `position` wins over the converted one.
    pub(crate) fn reparent(
        &mut self,
        page_id: &str,
        index: &NodeIndex,
        node_id: &str,
        target_parent: Option<&str>,
        position: Option<Position>,
    ) -> CartaResult<()> {
        let node = index
            .get(node_id)
            .ok_or_else(|| CartaError::InvalidReference(format!("Node not found: {}", node_id)))?;

        if let Some(pid) = target_parent {
            self.check_container(index, pid)?;
            if pid == node_id || index.is_ancestor(node_id, pid) {
                return Err(CartaError::InvalidReference(format!(
                    "Moving '{}' into '{}' would nest it inside itself",
                    node_id, pid
                )));
            }
        }

        let next = match position {
            Some(p) => p,
            None if node.parent_id() == target_parent => node.position(),
            None => to_relative_position(
                index.absolute_position(node),
                index.container_origin(target_parent),
            ),
        };

        self.set_node_position(page_id, node_id, next);
        if node.parent_id() != target_parent {
            self.set_node_parent(page_id, node_id, target_parent);
        }
        Ok(())
    }

    /// Move into an organizer, out to the page, or between organizers.
    /// `Ok(None)` when the construct does not exist.
    pub fn move_construct(
        &mut self,
        page_id: &str,
        semantic_id: &str,
        target_parent: Option<&str>,
        position: Option<Position>,
    ) -> CartaResult<Option<ConstructNode>> {
        let index = self.node_index(page_id);
        let Some(node_id) = index.by_semantic_id(semantic_id).map(|c| c.id.clone()) else {
            return Ok(None);
        };
        self.reparent(page_id, &index, &node_id, target_parent, position)?;
        Ok(self.construct(page_id, semantic_id))
    }

    /// Create the edge `source.source_port -> target.target_port` and its
    /// mirroring connection. Re-connecting an existing pair is a no-op that
    /// returns the existing edge, completing a half-written pair if needed.
    pub fn connect(
        &mut self,
        page_id: &str,
        source_semantic_id: &str,
        source_port: &str,
        target_semantic_id: &str,
        target_port: &str,
    ) -> Result<Edge, ConnectError> {
        let index = self.node_index(page_id);
        let source = index
            .by_semantic_id(source_semantic_id)
            .ok_or_else(|| ConnectError::NodeNotFound {
                semantic_id: source_semantic_id.to_string(),
            })?;
        let target = index
            .by_semantic_id(target_semantic_id)
            .ok_or_else(|| ConnectError::NodeNotFound {
                semantic_id: target_semantic_id.to_string(),
            })?;

        let source_type = self
            .port_type_of(source.construct_type(), source_port)
            .ok_or_else(|| ConnectError::PortNotFound {
                semantic_id: source_semantic_id.to_string(),
                port_id: source_port.to_string(),
            })?;
        let target_type = self
            .port_type_of(target.construct_type(), target_port)
            .ok_or_else(|| ConnectError::PortNotFound {
                semantic_id: target_semantic_id.to_string(),
                port_id: target_port.to_string(),
            })?;
        if !self.can_connect_port_types(&source_type, &target_type) {
            return Err(ConnectError::IncompatiblePorts {
                source_type,
                target_type,
            });
        }

        let connection = Connection {
            port_id: source_port.to_string(),
            target_semantic_id: target_semantic_id.to_string(),
            target_port_id: target_port.to_string(),
        };
        let existing_edge = self.edges(page_id).into_iter().find(|e| {
            e.source == source.id
                && e.target == target.id
                && e.source_handle == source_port
                && e.target_handle == target_port
        });
        if !source.data.connections.contains(&connection) {
            self.push_connection(page_id, &source.id, &connection);
        }
        if let Some(edge) = existing_edge {
            return Ok(edge);
        }

        let edge = Edge {
            id: self.ids().new_id("e"),
            source: source.id.clone(),
            target: target.id.clone(),
            source_handle: source_port.to_string(),
            target_handle: target_port.to_string(),
        };
        self.insert_edge(page_id, &edge);
        debug!(page_id, source = source_semantic_id, target = target_semantic_id, "Connected");
        Ok(edge)
    }

    /// Remove the first connection matching `(source_port, target)` and every
    /// edge `source.source_port -> target`. `false` when nothing matched.
    pub fn disconnect(
        &mut self,
        page_id: &str,
        source_semantic_id: &str,
        source_port: &str,
        target_semantic_id: &str,
    ) -> bool {
        let index = self.node_index(page_id);
        let Some(source_id) = index.by_semantic_id(source_semantic_id).map(|c| c.id.clone()) else {
            return false;
        };
        let target_id = index
            .by_semantic_id(target_semantic_id)
            .map(|c| c.id.clone());

        let mut matched = false;
        self.retain_connections(page_id, &source_id, |c| match c {
            Some(c)
                if !matched
                    && c.port_id == source_port
                    && c.target_semantic_id == target_semantic_id =>
            {
                matched = true;
                false
            }
            _ => true,
        });

        let mut edges_removed = 0;
        if let Some(target_id) = target_id {
            let doomed: Vec<String> = self
                .edges(page_id)
                .into_iter()
                .filter(|e| {
                    e.source == source_id && e.source_handle == source_port && e.target == target_id
                })
                .map(|e| e.id)
                .collect();
            for edge_id in &doomed {
                self.remove_edge(page_id, edge_id);
            }
            edges_removed = doomed.len();
        }

        matched || edges_removed > 0
    }
}

impl DiagramDocument {
    pub fn create_construct(
        &self,
        page_id: &str,
        construct_type: &str,
        values: Values,
        position: Option<Position>,
        parent_id: Option<&str>,
    ) -> CartaResult<ConstructNode> {
        self.write(|tx| tx.create_construct(page_id, construct_type, values, position, parent_id))
    }

    pub fn update_construct(
        &self,
        page_id: &str,
        semantic_id: &str,
        values: Option<&Values>,
        instance_color: Option<Option<&str>>,
    ) -> Option<ConstructNode> {
        self.write(|tx| tx.update_construct(page_id, semantic_id, values, instance_color))
    }

    pub fn delete_construct(&self, page_id: &str, semantic_id: &str) -> bool {
        self.write(|tx| tx.delete_construct(page_id, semantic_id))
    }

    pub fn move_construct(
        &self,
        page_id: &str,
        semantic_id: &str,
        target_parent: Option<&str>,
        position: Option<Position>,
    ) -> CartaResult<Option<ConstructNode>> {
        self.write(|tx| tx.move_construct(page_id, semantic_id, target_parent, position))
    }

    pub fn connect(
        &self,
        page_id: &str,
        source_semantic_id: &str,
        source_port: &str,
        target_semantic_id: &str,
        target_port: &str,
    ) -> Result<Edge, ConnectError> {
        self.write(|tx| {
            tx.connect(page_id, source_semantic_id, source_port, target_semantic_id, target_port)
        })
    }

    pub fn disconnect(
        &self,
        page_id: &str,
        source_semantic_id: &str,
        source_port: &str,
        target_semantic_id: &str,
    ) -> bool {
        self.write(|tx| tx.disconnect(page_id, source_semantic_id, source_port, target_semantic_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organizers::NewOrganizer;
    use crate::testing::seeded_document;
    use serde_json::json;

    fn values(v: Value) -> Values {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_create_applies_field_defaults() {
        let (doc, page) = seeded_document();
        let c = doc
            .create_construct(&page, "service", values(json!({ "name": "api" })), None, None)
            .unwrap();

        assert!(c.data.semantic_id.starts_with("service-"));
        assert_eq!(c.data.values["name"], json!("api"));
        assert_eq!(c.data.values["replicas"], json!(1));
        assert!(c.data.connections.is_empty());
    }

    #[test]
    fn test_create_unknown_schema() {
        let (doc, page) = seeded_document();
        let err = doc
            .create_construct(&page, "nope", Values::new(), None, None)
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_update_merges_values() {
        let (doc, page) = seeded_document();
        let c = doc
            .create_construct(&page, "service", values(json!({ "name": "api", "tier": "gold" })), None, None)
            .unwrap();

        let updated = doc
            .update_construct(
                &page,
                &c.data.semantic_id,
                Some(&values(json!({ "name": "gateway", "tier": null }))),
                Some(Some("#ff0000")),
            )
            .unwrap();
        assert_eq!(updated.data.values["name"], json!("gateway"));
        assert!(!updated.data.values.contains_key("tier"));
        assert_eq!(updated.data.values["replicas"], json!(1));
        assert_eq!(updated.data.instance_color.as_deref(), Some("#ff0000"));

        let cleared = doc
            .update_construct(&page, &c.data.semantic_id, None, Some(None))
            .unwrap();
        assert_eq!(cleared.data.instance_color, None);
        assert!(doc.update_construct(&page, "missing", None, None).is_none());
    }

    #[test]
    fn test_connect_and_disconnect_keep_duality() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let (a, b) = (a.data.semantic_id, b.data.semantic_id);

        let edge = doc.connect(&page, &a, "flow-out", &b, "flow-in").unwrap();
        let again = doc.connect(&page, &a, "flow-out", &b, "flow-in").unwrap();
        assert_eq!(edge.id, again.id);
        assert_eq!(doc.list_edges(&page).len(), 1);
        assert_eq!(doc.connections_of(&page, &a).len(), 1);

        assert!(doc.disconnect(&page, &a, "flow-out", &b));
        assert!(doc.list_edges(&page).is_empty());
        assert!(doc.connections_of(&page, &a).is_empty());
        assert!(!doc.disconnect(&page, &a, "flow-out", &b));
    }

    #[test]
    fn test_connect_errors() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let (a, b) = (a.data.semantic_id, b.data.semantic_id);

        assert!(matches!(
            doc.connect(&page, &a, "flow-out", "ghost", "flow-in"),
            Err(ConnectError::NodeNotFound { .. })
        ));
        assert!(matches!(
            doc.connect(&page, &a, "nope", &b, "flow-in"),
            Err(ConnectError::PortNotFound { .. })
        ));
        assert!(matches!(
            doc.connect(&page, &a, "flow-in", &b, "flow-out"),
            Err(ConnectError::IncompatiblePorts { .. })
        ));
        assert!(doc.list_edges(&page).is_empty());
    }

    #[test]
    fn test_delete_prunes_edges_and_connections() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let (a, b) = (a.data.semantic_id, b.data.semantic_id);
        doc.connect(&page, &a, "flow-out", &b, "flow-in").unwrap();

        assert!(doc.delete_construct(&page, &b));
        assert!(doc.list_edges(&page).is_empty());
        assert!(doc.connections_of(&page, &a).is_empty());
        assert!(!doc.delete_construct(&page, &b));
    }

    #[test]
    fn test_move_between_frames() {
        let (doc, page) = seeded_document();
        let group = doc
            .create_organizer(
                &page,
                NewOrganizer {
                    name: "Group".into(),
                    position: Some(Position::new(300.0, 200.0)),
                    ..Default::default()
                },
            )
            .unwrap();
        let c = doc
            .create_construct(&page, "task", Values::new(), Some(Position::new(350.0, 260.0)), None)
            .unwrap();
        let sid = c.data.semantic_id;

        let inside = doc
            .move_construct(&page, &sid, Some(group.id()), None)
            .unwrap()
            .unwrap();
        assert_eq!(inside.position, Position::new(50.0, 60.0));
        assert_eq!(inside.parent_id.as_deref(), Some(group.id()));

        let outside = doc.move_construct(&page, &sid, None, None).unwrap().unwrap();
        assert_eq!(outside.position, Position::new(350.0, 260.0));
        assert_eq!(outside.parent_id, None);

        let pinned = doc
            .move_construct(&page, &sid, None, Some(Position::new(1.0, 2.0)))
            .unwrap()
            .unwrap();
        assert_eq!(pinned.position, Position::new(1.0, 2.0));

        assert!(doc.move_construct(&page, &sid, Some("ghost"), None).is_err());
        assert_eq!(doc.move_construct(&page, "ghost", None, None).unwrap(), None);
    }
}
