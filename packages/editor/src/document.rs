//! # Document Handle
//!
//! A `DiagramDocument` owns one replicated `yrs::Doc` plus the root
//! containers the engine works against:
//!
//! ```text
//! meta            Map   title / activePageId / formatVersion
//! pages           Map   pageId -> Page (plain)
//! nodes           Map   pageId -> Map(nodeId -> Map node)
//! edges           Map   pageId -> Map(edgeId -> Map edge)
//! schemas         Map   type   -> ConstructSchema (plain)
//! portSchemas     Map   id     -> PortSchema (plain)
//! schemaGroups    Map   id     -> SchemaGroup (plain)
//! schemaPackages  Map   id     -> SchemaPackage (plain)
//! pinConstraints  Map   pageId -> Array(PinConstraint)
//! ```
//!
//! All access goes through a [`DocTxn`]. [`DiagramDocument::write`] opens
//! exactly one `TransactionMut` tagged with the handle's origin, so every
//! engine operation is observed by remote peers as a single change-set.

use crate::config::EngineConfig;
use crate::crdt::{
    self, array_to_json, ensure_array, ensure_map, get_json, json_to_any, set_json,
};
use crate::model::{
    Connection, ConstructNode, ConstructSchema, Edge, Node, Page, PinConstraint, PortSchema,
    SchemaGroup, SchemaPackage,
};
use carta_common::{
    to_absolute_position, CartaError, CartaResult, IdGenerator, Position, Rect, Size,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use yrs::updates::decoder::Decode;
use yrs::{
    Array, ArrayRef, Doc, Map, MapRef, Out, ReadTxn, StateVector, Transact, Transaction,
    TransactionMut, Update,
};

/// Root containers, created once when the handle is built
#[derive(Debug, Clone)]
pub(crate) struct Roots {
    pub meta: MapRef,
    pub pages: MapRef,
    pub nodes: MapRef,
    pub edges: MapRef,
    pub schemas: MapRef,
    pub port_schemas: MapRef,
    pub schema_groups: MapRef,
    pub schema_packages: MapRef,
    pub pin_constraints: MapRef,
}

impl Roots {
    fn new(doc: &Doc) -> Self {
        Self {
            meta: doc.get_or_insert_map("meta"),
            pages: doc.get_or_insert_map("pages"),
            nodes: doc.get_or_insert_map("nodes"),
            edges: doc.get_or_insert_map("edges"),
            schemas: doc.get_or_insert_map("schemas"),
            port_schemas: doc.get_or_insert_map("portSchemas"),
            schema_groups: doc.get_or_insert_map("schemaGroups"),
            schema_packages: doc.get_or_insert_map("schemaPackages"),
            pin_constraints: doc.get_or_insert_map("pinConstraints"),
        }
    }
}

/// Shared collaborative diagram document
#[derive(Debug)]
pub struct DiagramDocument {
    doc: Doc,
    roots: Roots,
    config: EngineConfig,
    origin: String,
    ids: IdGenerator,
}

impl DiagramDocument {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::from_doc(Doc::new(), config)
    }

    /// Wrap an existing replica (e.g. one already synced from peers)
    pub fn from_doc(doc: Doc, config: EngineConfig) -> Self {
        let roots = Roots::new(&doc);
        let ids = IdGenerator::new(doc.client_id());
        Self {
            origin: config.origin.clone(),
            doc,
            roots,
            config,
            ids,
        }
    }

    /// Same document, different transaction origin (one handle per editor)
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// Underlying replica, for sync plumbing
    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// Run `f` inside one origin-tagged write transaction.
    pub fn write<R>(&self, f: impl FnOnce(&mut DocWrite<'_>) -> R) -> R {
        let txn = self.doc.transact_mut_with(self.origin.as_str());
        let mut tx = DocTxn { txn, doc: self };
        f(&mut tx)
    }

    /// Run `f` against a read-only snapshot.
    pub fn read<R>(&self, f: impl FnOnce(&DocRead<'_>) -> R) -> R {
        let txn = self.doc.transact();
        let tx = DocTxn { txn, doc: self };
        f(&tx)
    }

    /// Encode the full document state.
    pub fn encode_state(&self) -> Vec<u8> {
        let txn = self.doc.transact();
        txn.encode_state_as_update_v1(&StateVector::default())
    }

    /// Apply an update from a peer.
    pub fn apply_update(&self, update: &[u8]) -> CartaResult<()> {
        let update = Update::decode_v1(update)
            .map_err(|e| CartaError::ValidationFailure(format!("Failed to decode: {}", e)))?;
        let mut txn = self.doc.transact_mut();
        txn.apply_update(update)
            .map_err(|e| CartaError::ValidationFailure(format!("Failed to apply update: {}", e)))?;
        Ok(())
    }
}

impl Default for DiagramDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction-scoped view of the document
pub struct DocTxn<'doc, T> {
    pub(crate) txn: T,
    pub(crate) doc: &'doc DiagramDocument,
}

pub type DocRead<'doc> = DocTxn<'doc, Transaction<'doc>>;
pub type DocWrite<'doc> = DocTxn<'doc, TransactionMut<'doc>>;

/// Lookup tables over one page's nodes
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    nodes: Vec<Node>,
    by_id: HashMap<String, usize>,
    by_semantic_id: HashMap<String, usize>,
}

impl NodeIndex {
    pub fn new(nodes: Vec<Node>) -> Self {
        let mut by_id = HashMap::new();
        let mut by_semantic_id = HashMap::new();
        for (i, node) in nodes.iter().enumerate() {
            by_id.insert(node.id().to_string(), i);
            if let Some(sid) = node.semantic_id() {
                by_semantic_id.entry(sid.to_string()).or_insert(i);
            }
        }
        Self {
            nodes,
            by_id,
            by_semantic_id,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.by_id.get(id).map(|&i| &self.nodes[i])
    }

    pub fn by_semantic_id(&self, semantic_id: &str) -> Option<&ConstructNode> {
        self.by_semantic_id
            .get(semantic_id)
            .and_then(|&i| self.nodes[i].as_construct())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn semantic_ids(&self) -> HashSet<&str> {
        self.by_semantic_id.keys().map(String::as_str).collect()
    }

    /// Direct children of `parent_id`
    pub fn children<'a>(&'a self, parent_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.parent_id() == Some(parent_id))
    }

    /// Wagons attached to the construct with `semantic_id`
    pub fn wagons_of<'a>(&'a self, semantic_id: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |n| match n {
            Node::Wagon(w) => w.attached_to_semantic_id == semantic_id,
            _ => false,
        })
    }

    /// Page-absolute position, composing every container on the parent chain.
    /// A dangling or cyclic chain stops at the last resolvable ancestor.
    pub fn absolute_position(&self, node: &Node) -> Position {
        let mut position = node.position();
        let mut seen = HashSet::new();
        let mut parent = node.parent_id();
        while let Some(pid) = parent {
            if !seen.insert(pid) {
                break;
            }
            match self.get(pid) {
                Some(p) => {
                    position = to_absolute_position(position, p.position());
                    parent = p.parent_id();
                }
                None => break,
            }
        }
        position
    }

    /// Origin of the frame a child of `parent_id` is expressed in
    pub fn container_origin(&self, parent_id: Option<&str>) -> Position {
        parent_id
            .and_then(|pid| self.get(pid))
            .map(|p| self.absolute_position(p))
            .unwrap_or(Position::ORIGIN)
    }

    pub fn absolute_rect(&self, node: &Node, construct_default: Size) -> Rect {
        Rect::from_position(self.absolute_position(node), node.size(construct_default))
    }

    /// Root-most ancestor on the parent chain (the node itself when top-level)
    pub fn top_level_ancestor<'a>(&'a self, node: &'a Node) -> &'a Node {
        let mut current = node;
        let mut seen = HashSet::new();
        while let Some(pid) = current.parent_id() {
            if !seen.insert(pid.to_string()) {
                break;
            }
            match self.get(pid) {
                Some(p) => current = p,
                None => break,
            }
        }
        current
    }
}

fn decode_all<T: DeserializeOwned, R: ReadTxn>(txn: &R, map: &MapRef) -> Vec<T> {
    map.iter(txn)
        .filter_map(|(_, out)| serde_json::from_value(crdt::out_to_json(txn, out)).ok())
        .collect()
}

fn decode_one<T: DeserializeOwned, R: ReadTxn>(txn: &R, map: &MapRef, key: &str) -> Option<T> {
    get_json(txn, map, key).and_then(|v| serde_json::from_value(v).ok())
}

/// Numeric-aware id ordering so `n-x-2` sorts before `n-x-10`.
pub fn natural_id_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    fn split(s: &str) -> (&str, Option<u64>) {
        match s.rfind('-') {
            Some(i) => match s[i + 1..].parse::<u64>() {
                Ok(n) => (&s[..i], Some(n)),
                Err(_) => (s, None),
            },
            None => (s, None),
        }
    }
    let (pa, na) = split(a);
    let (pb, nb) = split(b);
    pa.cmp(pb).then(na.cmp(&nb)).then(a.cmp(b))
}

impl<'doc, T: ReadTxn> DocTxn<'doc, T> {
    pub(crate) fn roots(&self) -> &'doc Roots {
        &self.doc.roots
    }

    pub fn config(&self) -> &'doc EngineConfig {
        &self.doc.config
    }

    pub fn construct_size(&self) -> Size {
        self.doc.config.construct_size
    }

    pub fn meta(&self, key: &str) -> Option<Value> {
        get_json(&self.txn, &self.roots().meta, key)
    }

    pub fn active_page_id(&self) -> Option<String> {
        self.meta("activePageId")
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn title(&self) -> String {
        self.meta("title")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn page(&self, page_id: &str) -> Option<Page> {
        decode_one(&self.txn, &self.roots().pages, page_id)
    }

    pub fn page_exists(&self, page_id: &str) -> bool {
        self.roots().pages.contains_key(&self.txn, page_id)
    }

    /// Pages sorted by `order`, then id
    pub fn pages(&self) -> Vec<Page> {
        let mut pages: Vec<Page> = decode_all(&self.txn, &self.roots().pages);
        pages.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| natural_id_cmp(&a.id, &b.id)));
        pages
    }

    pub fn require_page(&self, page_id: &str) -> CartaResult<Page> {
        self.page(page_id)
            .ok_or_else(|| CartaError::not_found(carta_common::EntityKind::Page, page_id))
    }

    fn page_container(&self, root: &MapRef, page_id: &str) -> Option<MapRef> {
        match root.get(&self.txn, page_id) {
            Some(Out::YMap(map)) => Some(map),
            _ => None,
        }
    }

    /// Raw JSON snapshots of a page's nodes, in stable id order
    pub fn node_values(&self, page_id: &str) -> Vec<Value> {
        let mut values: Vec<(String, Value)> = match self.roots().nodes.get(&self.txn, page_id) {
            Some(Out::YMap(map)) => map
                .iter(&self.txn)
                .map(|(id, out)| (id.to_string(), crdt::out_to_json(&self.txn, out)))
                .collect(),
            Some(other) => match crdt::out_to_json(&self.txn, other) {
                Value::Object(entries) => entries.into_iter().collect(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        values.sort_by(|a, b| natural_id_cmp(&a.0, &b.0));
        values.into_iter().map(|(_, v)| v).collect()
    }

    /// Classified nodes of a page; unclassifiable snapshots are skipped
    pub fn nodes(&self, page_id: &str) -> Vec<Node> {
        let organizer_size = self.doc.config.organizer_size;
        self.node_values(page_id)
            .iter()
            .filter_map(|v| Node::from_value(v, organizer_size))
            .collect()
    }

    pub fn node_index(&self, page_id: &str) -> NodeIndex {
        NodeIndex::new(self.nodes(page_id))
    }

    pub fn node(&self, page_id: &str, node_id: &str) -> Option<Node> {
        let map = self.page_container(&self.roots().nodes, page_id)?;
        let value = get_json(&self.txn, &map, node_id)?;
        Node::from_value(&value, self.doc.config.organizer_size)
    }

    /// Lookup by semantic id, the external addressing scheme
    pub fn construct(&self, page_id: &str, semantic_id: &str) -> Option<ConstructNode> {
        self.nodes(page_id).into_iter().find_map(|n| match n {
            Node::Construct(c) if c.data.semantic_id == semantic_id => Some(c),
            _ => None,
        })
    }

    /// Raw edge snapshots (edges that fail to decode are reported by repair)
    pub fn edge_values(&self, page_id: &str) -> Vec<Value> {
        let mut values: Vec<(String, Value)> = match self.roots().edges.get(&self.txn, page_id) {
            Some(Out::YMap(map)) => map
                .iter(&self.txn)
                .map(|(id, out)| (id.to_string(), crdt::out_to_json(&self.txn, out)))
                .collect(),
            Some(other) => match crdt::out_to_json(&self.txn, other) {
                Value::Object(entries) => entries.into_iter().collect(),
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        values.sort_by(|a, b| natural_id_cmp(&a.0, &b.0));
        values.into_iter().map(|(_, v)| v).collect()
    }

    pub fn edges(&self, page_id: &str) -> Vec<Edge> {
        self.edge_values(page_id)
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect()
    }

    pub fn schema(&self, schema_type: &str) -> Option<ConstructSchema> {
        decode_one(&self.txn, &self.roots().schemas, schema_type)
    }

    pub fn require_schema(&self, schema_type: &str) -> CartaResult<ConstructSchema> {
        self.schema(schema_type)
            .ok_or_else(|| CartaError::not_found(carta_common::EntityKind::Schema, schema_type))
    }

    pub fn schemas(&self) -> Vec<ConstructSchema> {
        let mut schemas: Vec<ConstructSchema> = decode_all(&self.txn, &self.roots().schemas);
        schemas.sort_by(|a, b| a.schema_type.cmp(&b.schema_type));
        schemas
    }

    pub fn port_schema(&self, id: &str) -> Option<PortSchema> {
        decode_one(&self.txn, &self.roots().port_schemas, id)
    }

    pub fn port_schemas(&self) -> Vec<PortSchema> {
        let mut ports: Vec<PortSchema> = decode_all(&self.txn, &self.roots().port_schemas);
        ports.sort_by(|a, b| a.id.cmp(&b.id));
        ports
    }

    pub fn schema_groups(&self) -> Vec<SchemaGroup> {
        let mut groups: Vec<SchemaGroup> = decode_all(&self.txn, &self.roots().schema_groups);
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        groups
    }

    pub fn schema_packages(&self) -> Vec<SchemaPackage> {
        let mut packages: Vec<SchemaPackage> = decode_all(&self.txn, &self.roots().schema_packages);
        packages.sort_by(|a, b| a.id.cmp(&b.id));
        packages
    }

    pub fn pin_constraints(&self, page_id: &str) -> Vec<PinConstraint> {
        let raw = match self.roots().pin_constraints.get(&self.txn, page_id) {
            Some(Out::YArray(array)) => array_to_json(&self.txn, &array),
            Some(other) => crdt::out_to_json(&self.txn, other),
            None => Value::Null,
        };
        raw.as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Page ids that currently hold any node container
    pub fn node_page_ids(&self) -> Vec<String> {
        let mut ids: HashSet<String> = self
            .roots()
            .nodes
            .keys(&self.txn)
            .map(|k| k.to_string())
            .collect();
        ids.extend(self.pages().into_iter().map(|p| p.id));
        let mut ids: Vec<String> = ids.into_iter().collect();
        ids.sort_by(|a, b| natural_id_cmp(a, b));
        ids
    }
}

impl<'doc> DocTxn<'doc, TransactionMut<'doc>> {
    pub fn ids(&self) -> &'doc IdGenerator {
        &self.doc.ids
    }

    pub fn set_meta(&mut self, key: &str, value: Value) {
        let meta = self.doc.roots.meta.clone();
        set_json(&mut self.txn, &meta, key, &value);
    }

    pub fn put_page(&mut self, page: &Page) {
        let value = to_value(page);
        let pages = self.doc.roots.pages.clone();
        set_json(&mut self.txn, &pages, &page.id, &value);
    }

    pub fn remove_page_entry(&mut self, page_id: &str) {
        let roots = &self.doc.roots;
        roots.pages.remove(&mut self.txn, page_id);
        roots.nodes.remove(&mut self.txn, page_id);
        roots.edges.remove(&mut self.txn, page_id);
        roots.pin_constraints.remove(&mut self.txn, page_id);
    }

    /// Live node container of a page
    pub fn page_nodes_map(&mut self, page_id: &str) -> MapRef {
        let nodes = self.doc.roots.nodes.clone();
        ensure_map(&mut self.txn, &nodes, page_id)
    }

    /// Live edge container of a page
    pub fn page_edges_map(&mut self, page_id: &str) -> MapRef {
        let edges = self.doc.roots.edges.clone();
        ensure_map(&mut self.txn, &edges, page_id)
    }

    /// Live map of one node, re-materialized if it decayed; `None` if absent
    pub fn node_map(&mut self, page_id: &str, node_id: &str) -> Option<MapRef> {
        let nodes = self.page_nodes_map(page_id);
        if !nodes.contains_key(&self.txn, node_id) {
            return None;
        }
        Some(ensure_map(&mut self.txn, &nodes, node_id))
    }

    /// Live `data` map of a node
    pub fn data_map(&mut self, page_id: &str, node_id: &str) -> Option<MapRef> {
        let node = self.node_map(page_id, node_id)?;
        Some(ensure_map(&mut self.txn, &node, "data"))
    }

    /// Live `data.values` map of a construct
    pub fn values_map(&mut self, page_id: &str, node_id: &str) -> Option<MapRef> {
        let data = self.data_map(page_id, node_id)?;
        Some(ensure_map(&mut self.txn, &data, "values"))
    }

    /// Live `data.connections` array of a construct
    pub fn connections_array(&mut self, page_id: &str, node_id: &str) -> Option<ArrayRef> {
        let data = self.data_map(page_id, node_id)?;
        Some(ensure_array(&mut self.txn, &data, "connections"))
    }

    /// Write a full node: top-level leaves plain, `data` live with live
    /// `values` and `connections`.
    pub fn insert_node(&mut self, page_id: &str, node: &Node) {
        self.insert_node_value(page_id, node.id(), &node.to_value());
    }

    /// Write a raw node snapshot as-is, keys the model does not know included
    pub fn insert_node_value(&mut self, page_id: &str, node_id: &str, value: &Value) {
        let nodes = self.page_nodes_map(page_id);
        let map = nodes.insert(&mut self.txn, node_id, yrs::MapPrelim::default());
        if let Value::Object(entries) = value {
            for (key, v) in entries {
                if key == "data" {
                    self.write_node_data(&map, v);
                } else {
                    map.insert(&mut self.txn, key.as_str(), json_to_any(v));
                }
            }
        }
    }

    fn write_node_data(&mut self, node_map: &MapRef, data: &Value) {
        let data_map = node_map.insert(&mut self.txn, "data", yrs::MapPrelim::default());
        if let Value::Object(entries) = data {
            for (key, v) in entries {
                match (key.as_str(), v) {
                    ("values", Value::Object(values)) => {
                        crdt::write_live_map(&mut self.txn, &data_map, "values", values);
                    }
                    ("connections", Value::Array(items)) => {
                        crdt::write_live_array(&mut self.txn, &data_map, "connections", items);
                    }
                    _ => {
                        data_map.insert(&mut self.txn, key.as_str(), json_to_any(v));
                    }
                }
            }
        }
    }

    pub fn remove_node(&mut self, page_id: &str, node_id: &str) -> bool {
        let nodes = self.page_nodes_map(page_id);
        nodes.remove(&mut self.txn, node_id).is_some()
    }

    pub fn set_node_position(&mut self, page_id: &str, node_id: &str, position: Position) {
        if let Some(map) = self.node_map(page_id, node_id) {
            set_json(&mut self.txn, &map, "position", &to_value(&position));
        }
    }

    pub fn set_node_parent(&mut self, page_id: &str, node_id: &str, parent_id: Option<&str>) {
        if let Some(map) = self.node_map(page_id, node_id) {
            match parent_id {
                Some(pid) => {
                    map.insert(&mut self.txn, "parentId", pid);
                }
                None => {
                    map.remove(&mut self.txn, "parentId");
                }
            }
        }
    }

    pub fn set_organizer_size(&mut self, page_id: &str, node_id: &str, size: Size) {
        if let Some(map) = self.node_map(page_id, node_id) {
            let style = ensure_map(&mut self.txn, &map, "style");
            style.insert(&mut self.txn, "width", size.width);
            style.insert(&mut self.txn, "height", size.height);
        }
    }

    /// Set (or with `None`, remove) a key inside a node's `data`
    pub fn set_data_field(&mut self, page_id: &str, node_id: &str, key: &str, value: Option<&Value>) {
        if let Some(data) = self.data_map(page_id, node_id) {
            match value {
                Some(v) => set_json(&mut self.txn, &data, key, v),
                None => {
                    data.remove(&mut self.txn, key);
                }
            }
        }
    }

    pub fn set_value(&mut self, page_id: &str, node_id: &str, field: &str, value: &Value) {
        if let Some(values) = self.values_map(page_id, node_id) {
            set_json(&mut self.txn, &values, field, value);
        }
    }

    pub fn remove_value(&mut self, page_id: &str, node_id: &str, field: &str) -> bool {
        match self.values_map(page_id, node_id) {
            Some(values) => values.remove(&mut self.txn, field).is_some(),
            None => false,
        }
    }

    pub fn push_connection(&mut self, page_id: &str, node_id: &str, connection: &Connection) {
        if let Some(array) = self.connections_array(page_id, node_id) {
            array.push_back(&mut self.txn, json_to_any(&to_value(connection)));
        }
    }

    /// Drop connections for which `keep` is false. Unparseable entries are
    /// passed to `keep` as `None`.
    pub fn retain_connections(
        &mut self,
        page_id: &str,
        node_id: &str,
        mut keep: impl FnMut(Option<&Connection>) -> bool,
    ) -> usize {
        match self.connections_array(page_id, node_id) {
            Some(array) => crdt::retain_array(&mut self.txn, &array, |v| {
                let parsed: Option<Connection> = serde_json::from_value(v.clone()).ok();
                keep(parsed.as_ref())
            }),
            None => 0,
        }
    }

    /// Rewrite connections in place; `f` returns the replacement for an entry
    pub fn rewrite_connections(
        &mut self,
        page_id: &str,
        node_id: &str,
        mut f: impl FnMut(&Connection) -> Option<Connection>,
    ) -> usize {
        match self.connections_array(page_id, node_id) {
            Some(array) => crdt::rewrite_array(&mut self.txn, &array, |v| {
                let parsed: Connection = serde_json::from_value(v.clone()).ok()?;
                f(&parsed).map(|c| to_value(&c))
            }),
            None => 0,
        }
    }

    pub fn insert_edge(&mut self, page_id: &str, edge: &Edge) {
        let edges = self.page_edges_map(page_id);
        set_json(&mut self.txn, &edges, &edge.id, &to_value(edge));
    }

    pub fn remove_edge(&mut self, page_id: &str, edge_id: &str) -> bool {
        let edges = self.page_edges_map(page_id);
        edges.remove(&mut self.txn, edge_id).is_some()
    }

    /// Replace a page's node and edge containers wholesale
    pub fn replace_page_contents(&mut self, page_id: &str, nodes: &[Node], edges: &[Edge]) {
        let nodes_map = self.page_nodes_map(page_id);
        nodes_map.clear(&mut self.txn);
        let edges_map = self.page_edges_map(page_id);
        edges_map.clear(&mut self.txn);
        for node in nodes {
            self.insert_node(page_id, node);
        }
        for edge in edges {
            self.insert_edge(page_id, edge);
        }
        debug!(page_id, nodes = nodes.len(), edges = edges.len(), "Rewrote page contents");
    }

    /// Like [`DocWrite::replace_page_contents`] but from raw node snapshots,
    /// each keyed by its `id`
    pub fn replace_page_values(&mut self, page_id: &str, nodes: &[Value], edges: &[Edge]) {
        let nodes_map = self.page_nodes_map(page_id);
        nodes_map.clear(&mut self.txn);
        let edges_map = self.page_edges_map(page_id);
        edges_map.clear(&mut self.txn);
        for value in nodes {
            if let Some(id) = value.get("id").and_then(Value::as_str) {
                self.insert_node_value(page_id, id, value);
            }
        }
        for edge in edges {
            self.insert_edge(page_id, edge);
        }
        debug!(page_id, nodes = nodes.len(), edges = edges.len(), "Rewrote page contents");
    }

    pub fn put_schema(&mut self, schema: &ConstructSchema) {
        let schemas = self.doc.roots.schemas.clone();
        set_json(&mut self.txn, &schemas, &schema.schema_type, &to_value(schema));
    }

    pub fn remove_schema(&mut self, schema_type: &str) -> bool {
        let schemas = self.doc.roots.schemas.clone();
        schemas.remove(&mut self.txn, schema_type).is_some()
    }

    pub fn put_port_schema(&mut self, port: &PortSchema) {
        let ports = self.doc.roots.port_schemas.clone();
        set_json(&mut self.txn, &ports, &port.id, &to_value(port));
    }

    pub fn remove_port_schema(&mut self, id: &str) -> bool {
        let ports = self.doc.roots.port_schemas.clone();
        ports.remove(&mut self.txn, id).is_some()
    }

    pub fn put_schema_group(&mut self, group: &SchemaGroup) {
        let groups = self.doc.roots.schema_groups.clone();
        set_json(&mut self.txn, &groups, &group.id, &to_value(group));
    }

    pub fn remove_schema_group(&mut self, id: &str) -> bool {
        let groups = self.doc.roots.schema_groups.clone();
        groups.remove(&mut self.txn, id).is_some()
    }

    pub fn put_schema_package(&mut self, package: &SchemaPackage) {
        let packages = self.doc.roots.schema_packages.clone();
        set_json(&mut self.txn, &packages, &package.id, &to_value(package));
    }

    pub fn remove_schema_package(&mut self, id: &str) -> bool {
        let packages = self.doc.roots.schema_packages.clone();
        packages.remove(&mut self.txn, id).is_some()
    }

    /// Replace a page's pin constraint sequence
    pub fn set_pin_constraints(&mut self, page_id: &str, constraints: &[PinConstraint]) {
        let root = self.doc.roots.pin_constraints.clone();
        let items: Vec<Value> = constraints.iter().map(to_value).collect();
        crdt::write_live_array(&mut self.txn, &root, page_id, &items);
    }

    pub fn push_pin_constraint(&mut self, page_id: &str, constraint: &PinConstraint) {
        let root = self.doc.roots.pin_constraints.clone();
        let array = ensure_array(&mut self.txn, &root, page_id);
        array.push_back(&mut self.txn, json_to_any(&to_value(constraint)));
    }

    pub fn retain_pin_constraints(
        &mut self,
        page_id: &str,
        mut keep: impl FnMut(&PinConstraint) -> bool,
    ) -> usize {
        let root = self.doc.roots.pin_constraints.clone();
        let array = ensure_array(&mut self.txn, &root, page_id);
        crdt::retain_array(&mut self.txn, &array, |v| {
            match serde_json::from_value::<PinConstraint>(v.clone()) {
                Ok(c) => keep(&c),
                Err(_) => false,
            }
        })
    }

    /// Remove every entry from every root (hydrate starts from here)
    pub fn clear_all(&mut self) {
        let roots = self.doc.roots.clone();
        for root in [
            &roots.meta,
            &roots.pages,
            &roots.nodes,
            &roots.edges,
            &roots.schemas,
            &roots.port_schemas,
            &roots.schema_groups,
            &roots.schema_packages,
            &roots.pin_constraints,
        ] {
            root.clear(&mut self.txn);
        }
    }
}

fn to_value<S: Serialize>(value: &S) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConstructData;
    use serde_json::json;

    fn construct(id: &str, sid: &str, parent: Option<&str>, x: f64, y: f64) -> Node {
        Node::Construct(ConstructNode {
            id: id.to_string(),
            position: Position::new(x, y),
            parent_id: parent.map(str::to_string),
            size: None,
            data: ConstructData {
                construct_type: "service".to_string(),
                semantic_id: sid.to_string(),
                values: Default::default(),
                connections: vec![],
                instance_color: None,
            },
        })
    }

    #[test]
    fn test_write_then_read_node() {
        let doc = DiagramDocument::new();
        doc.write(|tx| tx.insert_node("p1", &construct("n-1", "svc-1", None, 5.0, 6.0)));

        let node = doc.read(|tx| tx.construct("p1", "svc-1")).unwrap();
        assert_eq!(node.id, "n-1");
        assert_eq!(node.position, Position::new(5.0, 6.0));
    }

    #[test]
    fn test_values_write_survives_decayed_data() {
        let doc = DiagramDocument::new();
        doc.write(|tx| {
            let nodes = tx.page_nodes_map("p1");
            let node = nodes.insert(&mut tx.txn, "n-1", yrs::MapPrelim::default());
            // data stored as a plain value instead of a live map
            set_json(
                &mut tx.txn,
                &node,
                "data",
                &json!({ "constructType": "service", "semanticId": "svc-1", "values": { "a": 1 } }),
            );
            node.insert(&mut tx.txn, "id", "n-1");
        });

        doc.write(|tx| tx.set_value("p1", "n-1", "b", &json!("two")));

        let node = doc.read(|tx| tx.construct("p1", "svc-1")).unwrap();
        assert_eq!(node.data.values.get("a"), Some(&json!(1)));
        assert_eq!(node.data.values.get("b"), Some(&json!("two")));
    }

    #[test]
    fn test_absolute_position_composes_chain() {
        let index = NodeIndex::new(vec![
            construct("n-1", "a", None, 100.0, 100.0),
            construct("n-2", "b", Some("n-1"), 10.0, 20.0),
            construct("n-3", "c", Some("n-2"), 1.0, 2.0),
        ]);
        let leaf = index.get("n-3").unwrap();
        assert_eq!(index.absolute_position(leaf), Position::new(111.0, 122.0));
        assert_eq!(index.top_level_ancestor(leaf).id(), "n-1");
    }

    #[test]
    fn test_natural_id_order() {
        let mut ids = vec!["n-x-10", "n-x-2", "n-x-1"];
        ids.sort_by(|a, b| natural_id_cmp(a, b));
        assert_eq!(ids, vec!["n-x-1", "n-x-2", "n-x-10"]);
    }

    #[test]
    fn test_state_sync_between_replicas() {
        let a = DiagramDocument::new();
        a.write(|tx| tx.insert_node("p1", &construct("n-1", "svc-1", None, 0.0, 0.0)));

        let b = DiagramDocument::new();
        b.apply_update(&a.encode_state()).unwrap();
        assert!(b.read(|tx| tx.construct("p1", "svc-1")).is_some());
    }
}
