//! Page lifecycle. A document always keeps at least one page once it has one.

use crate::document::{DiagramDocument, DocWrite};
use crate::model::{Edge, Node, Page, PinConstraint};
use carta_common::{CartaError, CartaResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

pub const DEFAULT_PAGE_NAME: &str = "Page 1";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PagePatch {
    pub name: Option<String>,
    /// Empty string clears
    pub description: Option<String>,
    pub order: Option<i64>,
    /// Empty string clears
    pub group: Option<String>,
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

impl<'doc> DocWrite<'doc> {
    pub fn create_page(&mut self, name: &str, description: Option<&str>) -> Page {
        let order = self.pages().iter().map(|p| p.order + 1).max().unwrap_or(0);
        let page = Page {
            id: self.ids().new_id("page"),
            name: name.to_string(),
            description: description.map(str::to_string),
            order,
            group: None,
        };
        self.put_page(&page);
        if self.active_page_id().map_or(true, |id| !self.page_exists(&id)) {
            self.set_meta("activePageId", Value::String(page.id.clone()));
        }
        info!(page_id = %page.id, name, "Created page");
        page
    }

    /// Active page, creating a first page when the document has none
    pub fn ensure_page(&mut self) -> Page {
        if let Some(page) = self.active_page_id().and_then(|id| self.page(&id)) {
            return page;
        }
        match self.pages().into_iter().next() {
            Some(page) => {
                self.set_meta("activePageId", Value::String(page.id.clone()));
                page
            }
            None => self.create_page(DEFAULT_PAGE_NAME, None),
        }
    }

    pub fn update_page(&mut self, page_id: &str, patch: &PagePatch) -> Option<Page> {
        let mut page = self.page(page_id)?;
        if let Some(name) = &patch.name {
            page.name = name.clone();
        }
        if let Some(description) = &patch.description {
            page.description = non_empty(description.clone());
        }
        if let Some(order) = patch.order {
            page.order = order;
        }
        if let Some(group) = &patch.group {
            page.group = non_empty(group.clone());
        }
        self.put_page(&page);
        Some(page)
    }

    /// Remove a page with its nodes, edges and pin constraints. The last page
    /// cannot be deleted.
    pub fn delete_page(&mut self, page_id: &str) -> CartaResult<()> {
        self.require_page(page_id)?;
        if self.pages().len() <= 1 {
            return Err(CartaError::Forbidden("Cannot delete the last page".into()));
        }
        self.remove_page_entry(page_id);

        if self.active_page_id().as_deref() == Some(page_id) {
            if let Some(next) = self.pages().into_iter().next() {
                self.set_meta("activePageId", Value::String(next.id));
            }
        }
        info!(page_id, "Deleted page");
        Ok(())
    }

    pub fn set_active_page(&mut self, page_id: &str) -> CartaResult<()> {
        self.require_page(page_id)?;
        self.set_meta("activePageId", Value::String(page_id.to_string()));
        Ok(())
    }

    /// Deep copy of a page. Internal ids are fresh; semantic ids are kept
    /// since they only need to be unique per page.
    pub fn duplicate_page(&mut self, page_id: &str, name: Option<&str>) -> CartaResult<Page> {
        let source = self.require_page(page_id)?;
        let nodes = self.nodes(page_id);
        let edges = self.edges(page_id);
        let pins = self.pin_constraints(page_id);

        let copy_name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} (copy)", source.name));
        let mut page = self.create_page(&copy_name, source.description.as_deref());
        if source.group.is_some() {
            page.group = source.group.clone();
            self.put_page(&page);
        }

        let remap: HashMap<String, String> = nodes
            .iter()
            .map(|n| (n.id().to_string(), self.ids().new_id("n")))
            .collect();
        let lookup = |id: &str| remap.get(id).cloned().unwrap_or_else(|| id.to_string());

        let nodes: Vec<Node> = nodes
            .into_iter()
            .map(|mut node| {
                let (id, parent) = match &mut node {
                    Node::Construct(c) => (&mut c.id, &mut c.parent_id),
                    Node::Organizer(o) => (&mut o.id, &mut o.parent_id),
                    Node::Wagon(w) => (&mut w.organizer.id, &mut w.organizer.parent_id),
                };
                *id = lookup(id.as_str());
                if let Some(pid) = parent.as_mut() {
                    *pid = lookup(pid.as_str());
                }
                node
            })
            .collect();
        let edges: Vec<Edge> = edges
            .into_iter()
            .map(|e| Edge {
                id: self.ids().new_id("e"),
                source: lookup(&e.source),
                target: lookup(&e.target),
                ..e
            })
            .collect();
        let pins: Vec<PinConstraint> = pins
            .into_iter()
            .map(|c| PinConstraint {
                id: self.ids().new_id("pin"),
                source_organizer_id: lookup(&c.source_organizer_id),
                target_organizer_id: lookup(&c.target_organizer_id),
                ..c
            })
            .collect();

        self.replace_page_contents(&page.id, &nodes, &edges);
        if !pins.is_empty() {
            self.set_pin_constraints(&page.id, &pins);
        }
        info!(source = page_id, page_id = %page.id, nodes = nodes.len(), "Duplicated page");
        Ok(page)
    }
}

impl DiagramDocument {
    pub fn create_page(&self, name: &str, description: Option<&str>) -> Page {
        self.write(|tx| tx.create_page(name, description))
    }

    pub fn ensure_page(&self) -> Page {
        self.write(|tx| tx.ensure_page())
    }

    pub fn list_pages(&self) -> Vec<Page> {
        self.read(|tx| tx.pages())
    }

    pub fn get_page(&self, page_id: &str) -> Option<Page> {
        self.read(|tx| tx.page(page_id))
    }

    pub fn active_page_id(&self) -> Option<String> {
        self.read(|tx| tx.active_page_id())
    }

    pub fn update_page(&self, page_id: &str, patch: &PagePatch) -> Option<Page> {
        self.write(|tx| tx.update_page(page_id, patch))
    }

    pub fn delete_page(&self, page_id: &str) -> CartaResult<()> {
        self.write(|tx| tx.delete_page(page_id))
    }

    pub fn set_active_page(&self, page_id: &str) -> CartaResult<()> {
        self.write(|tx| tx.set_active_page(page_id))
    }

    pub fn duplicate_page(&self, page_id: &str, name: Option<&str>) -> CartaResult<Page> {
        self.write(|tx| tx.duplicate_page(page_id, name))
    }

    /// Title stored in document metadata
    pub fn title(&self) -> String {
        self.read(|tx| tx.title())
    }

    pub fn set_title(&self, title: &str) {
        self.write(|tx| tx.set_meta("title", Value::String(title.to_string())))
    }
}
