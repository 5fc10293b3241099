//! Organizer CRUD and wagon binding.
//!
//! An organizer is a sized container; its members are nodes whose
//! `parentId` is the organizer's id, positioned relative to it. A wagon is an
//! organizer parented to one construct and tagged with that construct's
//! semantic id, so it follows the construct around and dies with it.

use crate::document::{DiagramDocument, DocWrite};
use crate::model::{Node, OrganizerData, OrganizerNode, WagonNode};
use carta_common::{to_relative_position, CartaError, CartaResult, EntityKind, Position, Size};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewOrganizer {
    pub name: String,
    pub color: Option<String>,
    pub layout: Option<String>,
    pub description: Option<String>,
    pub collapsed: bool,
    pub position: Option<Position>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub parent_id: Option<String>,
    /// Create as a wagon of this construct
    pub attached_to_semantic_id: Option<String>,
}

/// Partial update; absent fields are left alone
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OrganizerPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub layout: Option<String>,
    pub collapsed: Option<bool>,
    /// Empty string clears the description
    pub description: Option<String>,
    pub position: Option<Position>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl<'doc> DocWrite<'doc> {
    pub fn create_organizer(&mut self, page_id: &str, spec: NewOrganizer) -> CartaResult<Node> {
        self.require_page(page_id)?;
        let index = self.node_index(page_id);
        let default_size = self.config().organizer_size;
        let size = Size::new(
            spec.width.unwrap_or(default_size.width),
            spec.height.unwrap_or(default_size.height),
        );

        let mut data = OrganizerData::named(spec.name);
        if let Some(color) = spec.color {
            data.color = color;
        }
        if let Some(layout) = spec.layout {
            data.layout = layout;
        }
        data.description = spec.description;
        data.collapsed = spec.collapsed;

        let id = self.ids().new_id("org");
        let node = match spec.attached_to_semantic_id {
            Some(sid) => {
                let owner = index.by_semantic_id(&sid).ok_or_else(|| {
                    CartaError::InvalidReference(format!("Wagon owner not found: {}", sid))
                })?;
                let below_owner = owner.size.unwrap_or(self.construct_size()).height
                    + self.config().layout.organizer_padding;
                Node::Wagon(WagonNode {
                    organizer: OrganizerNode {
                        id,
                        position: spec.position.unwrap_or(Position::new(0.0, below_owner)),
                        parent_id: Some(owner.id.clone()),
                        size,
                        data,
                    },
                    attached_to_semantic_id: sid,
                })
            }
            None => {
                if let Some(pid) = &spec.parent_id {
                    self.check_container(&index, pid)?;
                }
                let position = match (spec.position, &spec.parent_id) {
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
                Node::Organizer(OrganizerNode {
                    id,
                    position,
                    parent_id: spec.parent_id,
                    size,
                    data,
                })
            }
        };

        self.insert_node(page_id, &node);
        debug!(page_id, organizer_id = node.id(), wagon = node.is_wagon(), "Created organizer");
        Ok(node)
    }

    pub fn update_organizer(
        &mut self,
        page_id: &str,
        organizer_id: &str,
        patch: &OrganizerPatch,
    ) -> Option<Node> {
        let current = self.organizer(page_id, organizer_id)?;
        let current_size = current.size(self.construct_size());

        let mut fields: Vec<(&str, Option<Value>)> = Vec::new();
        if let Some(name) = &patch.name {
            fields.push(("name", Some(Value::String(name.clone()))));
        }
        if let Some(color) = &patch.color {
            fields.push(("color", Some(Value::String(color.clone()))));
        }
        if let Some(layout) = &patch.layout {
            fields.push(("layout", Some(Value::String(layout.clone()))));
        }
        if let Some(collapsed) = patch.collapsed {
            fields.push(("collapsed", Some(Value::Bool(collapsed))));
        }
        match patch.description.as_deref() {
            Some("") => fields.push(("description", None)),
            Some(text) => fields.push(("description", Some(Value::String(text.to_string())))),
            None => {}
        }
        for (key, value) in fields {
            self.set_data_field(page_id, organizer_id, key, value.as_ref());
        }

        if let Some(position) = patch.position {
            self.set_node_position(page_id, organizer_id, position);
        }
        if patch.width.is_some() || patch.height.is_some() {
            let size = Size::new(
                patch.width.unwrap_or(current_size.width),
                patch.height.unwrap_or(current_size.height),
            );
            self.set_organizer_size(page_id, organizer_id, size);
        }

        self.organizer(page_id, organizer_id)
    }

    /// Re-parent an organizer like [`DocWrite::move_construct`] does
    pub fn move_organizer(
        &mut self,
        page_id: &str,
        organizer_id: &str,
        target_parent: Option<&str>,
        position: Option<Position>,
    ) -> CartaResult<Option<Node>> {
        let index = self.node_index(page_id);
        match index.get(organizer_id) {
            Some(Node::Organizer(_)) => {}
            Some(Node::Wagon(_)) => {
                return Err(CartaError::Forbidden(
                    "Wagons move with their construct; detach first".into(),
                ))
            }
            _ => return Ok(None),
        }
        self.reparent(page_id, &index, organizer_id, target_parent, position)?;
        Ok(self.organizer(page_id, organizer_id))
    }

    /// Delete an organizer. Members are deleted with it when
    /// `delete_members`, otherwise detached to absolute coordinates.
    pub fn delete_organizer(&mut self, page_id: &str, organizer_id: &str, delete_members: bool) -> bool {
        let index = self.node_index(page_id);
        if !index.get(organizer_id).is_some_and(|n| n.as_organizer().is_some()) {
            return false;
        }

        let members: Vec<Node> = index.children(organizer_id).cloned().collect();
        if delete_members {
            let doomed: HashSet<String> = members
                .iter()
                .filter_map(|m| m.semantic_id().map(str::to_string))
                .collect();
            for member in &members {
                match member {
                    Node::Construct(c) => {
                        self.delete_construct_with(page_id, c.semantic_id(), &doomed);
                    }
                    _ => {
                        self.delete_organizer(page_id, member.id(), true);
                    }
                }
            }
        } else {
            for member in &members {
                self.set_node_position(page_id, member.id(), index.absolute_position(member));
                self.set_node_parent(page_id, member.id(), None);
            }
        }

        self.remove_edges_touching(page_id, organizer_id);
        self.retain_pin_constraints(page_id, |c| {
            c.source_organizer_id != organizer_id && c.target_organizer_id != organizer_id
        });
        self.remove_node(page_id, organizer_id);
        info!(page_id, organizer_id, members = members.len(), delete_members, "Deleted organizer");
        true
    }

    /// Turn a free-standing organizer into a wagon of `semantic_id`
    pub fn attach_wagon(
        &mut self,
        page_id: &str,
        organizer_id: &str,
        semantic_id: &str,
    ) -> CartaResult<Node> {
        let index = self.node_index(page_id);
        let organizer = match index.get(organizer_id) {
            Some(node @ Node::Organizer(_)) => node,
            Some(Node::Wagon(w)) => {
                return Err(CartaError::InvalidReference(format!(
                    "'{}' is already attached to {}",
                    organizer_id, w.attached_to_semantic_id
                )))
            }
            _ => return Err(CartaError::not_found(EntityKind::Organizer, organizer_id)),
        };
        let owner = index
            .by_semantic_id(semantic_id)
            .ok_or_else(|| CartaError::not_found(EntityKind::Construct, semantic_id))?;
        if index.is_ancestor(organizer_id, &owner.id) {
            return Err(CartaError::InvalidReference(format!(
                "'{}' contains '{}' and cannot be its wagon",
                organizer_id, semantic_id
            )));
        }

        let owner_node = index
            .get(&owner.id)
            .ok_or_else(|| CartaError::not_found(EntityKind::Construct, semantic_id))?;
        let relative = to_relative_position(
            index.absolute_position(organizer),
            index.absolute_position(owner_node),
        );
        self.set_node_position(page_id, organizer_id, relative);
        self.set_node_parent(page_id, organizer_id, Some(owner.id.as_str()));
        let tag = Value::String(semantic_id.to_string());
        self.set_data_field(page_id, organizer_id, "attachedToSemanticId", Some(&tag));

        self.organizer(page_id, organizer_id)
            .ok_or_else(|| CartaError::not_found(EntityKind::Organizer, organizer_id))
    }

    /// Release a wagon back to a free-standing organizer at its current
    /// absolute position
    pub fn detach_wagon(&mut self, page_id: &str, organizer_id: &str) -> CartaResult<Node> {
        let index = self.node_index(page_id);
        let wagon = match index.get(organizer_id) {
            Some(node @ Node::Wagon(_)) => node,
            Some(_) => {
                return Err(CartaError::InvalidReference(format!(
                    "'{}' is not a wagon",
                    organizer_id
                )))
            }
            None => return Err(CartaError::not_found(EntityKind::Organizer, organizer_id)),
        };

        self.set_node_position(page_id, organizer_id, index.absolute_position(wagon));
        self.set_node_parent(page_id, organizer_id, None);
        self.set_data_field(page_id, organizer_id, "attachedToSemanticId", None);

        self.organizer(page_id, organizer_id)
            .ok_or_else(|| CartaError::not_found(EntityKind::Organizer, organizer_id))
    }
}

impl DiagramDocument {
    pub fn create_organizer(&self, page_id: &str, spec: NewOrganizer) -> CartaResult<Node> {
        self.write(|tx| tx.create_organizer(page_id, spec))
    }

    pub fn update_organizer(&self, page_id: &str, organizer_id: &str, patch: &OrganizerPatch) -> Option<Node> {
        self.write(|tx| tx.update_organizer(page_id, organizer_id, patch))
    }

    pub fn move_organizer(
        &self,
        page_id: &str,
        organizer_id: &str,
        target_parent: Option<&str>,
        position: Option<Position>,
    ) -> CartaResult<Option<Node>> {
        self.write(|tx| tx.move_organizer(page_id, organizer_id, target_parent, position))
    }

    pub fn delete_organizer(&self, page_id: &str, organizer_id: &str, delete_members: bool) -> bool {
        self.write(|tx| tx.delete_organizer(page_id, organizer_id, delete_members))
    }

    pub fn attach_wagon(&self, page_id: &str, organizer_id: &str, semantic_id: &str) -> CartaResult<Node> {
        self.write(|tx| tx.attach_wagon(page_id, organizer_id, semantic_id))
    }

    pub fn detach_wagon(&self, page_id: &str, organizer_id: &str) -> CartaResult<Node> {
        self.write(|tx| tx.detach_wagon(page_id, organizer_id))
    }
}
