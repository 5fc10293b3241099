//! # Bulk & Batch
//!
//! Multi-item operations that run inside one transaction. Items succeed or
//! fail independently; a failure is recorded in its slot of the result
//! vector and the remaining items still run. Nothing here fails as a whole.
//!
//! `batch_mutate` takes heterogeneous operations as JSON. Any string of the
//! exact form `@N`, at any depth (so `values` entries too), is replaced just
//! before the operation runs by the semantic id produced by operation `N` of
//! the same batch.

use crate::document::{DiagramDocument, DocTxn, DocWrite};
use crate::model::Values;
use carta_common::{bounding_box, Position, Rect};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use yrs::ReadTxn;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructSpec {
    pub construct_type: String,
    #[serde(default)]
    pub values: Values,
    #[serde(default)]
    pub position: Option<Position>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSpec {
    pub source_semantic_id: String,
    pub source_port_id: String,
    pub target_semantic_id: String,
    pub target_port_id: String,
}

/// Outcome of one bulk or batch item
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semantic_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemResult {
    fn ok(index: usize, semantic_id: Option<String>) -> Self {
        Self {
            index,
            op: None,
            success: true,
            semantic_id,
            error: None,
        }
    }

    fn failed(index: usize, error: impl ToString) -> Self {
        Self {
            index,
            op: None,
            success: false,
            semantic_id: None,
            error: Some(error.to_string()),
        }
    }

    fn with_op(mut self, op: &str) -> Self {
        self.op = Some(op.to_string());
        self
    }
}

/// `null` deserializes to `Some(None)`; an absent key stays `None`
pub(crate) fn nullable<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum BatchOp {
    #[serde(rename_all = "camelCase")]
    Create {
        construct_type: String,
        #[serde(default)]
        values: Values,
        #[serde(default)]
        position: Option<Position>,
        #[serde(default)]
        parent_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Update {
        semantic_id: String,
        #[serde(default)]
        values: Option<Values>,
        #[serde(default, deserialize_with = "nullable")]
        instance_color: Option<Option<String>>,
    },
    #[serde(rename_all = "camelCase")]
    Delete { semantic_id: String },
    #[serde(rename_all = "camelCase")]
    Connect {
        source_semantic_id: String,
        source_port_id: String,
        target_semantic_id: String,
        target_port_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Disconnect {
        source_semantic_id: String,
        source_port_id: String,
        target_semantic_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Move {
        semantic_id: String,
        #[serde(default)]
        parent_id: Option<String>,
        #[serde(default)]
        position: Option<Position>,
    },
}

impl BatchOp {
    pub fn name(&self) -> &'static str {
        match self {
            BatchOp::Create { .. } => "create",
            BatchOp::Update { .. } => "update",
            BatchOp::Delete { .. } => "delete",
            BatchOp::Connect { .. } => "connect",
            BatchOp::Disconnect { .. } => "disconnect",
            BatchOp::Move { .. } => "move",
        }
    }
}

/// Index `N` of an exact `@N` placeholder
fn placeholder_index(s: &str) -> Option<usize> {
    let digits = s.strip_prefix('@')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Substitute every exact `@N` string in the operation, nested `values`
/// and arrays included
fn resolve_placeholders(op: &mut Value, produced: &HashMap<usize, String>) -> Result<(), String> {
    if !op.is_object() {
        return Err("Operation must be an object".to_string());
    }
    resolve_in(op, "", produced)
}

fn resolve_in(value: &mut Value, path: &str, produced: &HashMap<usize, String>) -> Result<(), String> {
    match value {
        Value::String(s) => {
            let Some(n) = placeholder_index(s) else {
                return Ok(());
            };
            match produced.get(&n) {
                Some(sid) => {
                    *value = Value::String(sid.clone());
                    Ok(())
                }
                None => Err(format!(
                    "Unresolved placeholder @{} in '{}': operation {} produced no construct",
                    n, path, n
                )),
            }
        }
        Value::Object(fields) => {
            for (key, child) in fields.iter_mut() {
                let child_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                resolve_in(child, &child_path, produced)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for (i, child) in items.iter_mut().enumerate() {
                resolve_in(child, &format!("{}[{}]", path, i), produced)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

impl<'doc, T: ReadTxn> DocTxn<'doc, T> {
    /// `count` non-overlapping grid slots for new top-level nodes, continuing
    /// below whatever is already on the page.
    pub fn grid_positions(&self, page_id: &str, count: usize) -> Vec<Position> {
        let grid = &self.config().grid;
        let unit = self.construct_size();
        let index = self.node_index(page_id);

        let occupied: Vec<Rect> = index
            .nodes()
            .iter()
            .filter(|n| n.parent_id().is_none())
            .map(|n| index.footprint(n, unit))
            .collect();
        let start = match bounding_box(&occupied) {
            Some(bounds) => Position::new(
                grid.origin.x,
                bounds.bottom() + (grid.spacing_y - unit.height).max(0.0),
            ),
            None => grid.origin,
        };

        let columns = grid.columns_per_row.max(1);
        (0..count)
            .map(|i| {
                start.offset(
                    (i % columns) as f64 * grid.spacing_x,
                    (i / columns) as f64 * grid.spacing_y,
                )
            })
            .collect()
    }
}

impl<'doc> DocWrite<'doc> {
    pub fn create_constructs_bulk(&mut self, page_id: &str, specs: Vec<ConstructSpec>) -> Vec<ItemResult> {
        let unplaced = specs
            .iter()
            .filter(|s| s.position.is_none() && s.parent_id.is_none())
            .count();
        let mut slots = self.grid_positions(page_id, unplaced).into_iter();

        let results: Vec<ItemResult> = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let position = match (spec.position, &spec.parent_id) {
                    (None, None) => slots.next(),
                    (p, _) => p,
                };
                match self.create_construct(
                    page_id,
                    &spec.construct_type,
                    spec.values,
                    position,
                    spec.parent_id.as_deref(),
                ) {
                    Ok(c) => ItemResult::ok(index, Some(c.data.semantic_id)),
                    Err(e) => ItemResult::failed(index, e),
                }
            })
            .collect();

        info!(page_id, created = results.iter().filter(|r| r.success).count(), "Bulk create");
        results
    }

    pub fn connect_bulk(&mut self, page_id: &str, specs: &[ConnectSpec]) -> Vec<ItemResult> {
        specs
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                match self.connect(
                    page_id,
                    &spec.source_semantic_id,
                    &spec.source_port_id,
                    &spec.target_semantic_id,
                    &spec.target_port_id,
                ) {
                    Ok(_) => ItemResult::ok(index, Some(spec.source_semantic_id.clone())),
                    Err(e) => ItemResult::failed(index, e),
                }
            })
            .collect()
    }

    /// Wagon members that are themselves in `semantic_ids` are deleted rather
    /// than detached.
    pub fn delete_constructs_bulk(&mut self, page_id: &str, semantic_ids: &[String]) -> Vec<ItemResult> {
        let doomed: HashSet<String> = semantic_ids.iter().cloned().collect();
        semantic_ids
            .iter()
            .enumerate()
            .map(|(index, sid)| {
                if self.delete_construct_with(page_id, sid, &doomed) {
                    ItemResult::ok(index, Some(sid.clone()))
                } else {
                    ItemResult::failed(index, format!("Construct not found: {}", sid))
                }
            })
            .collect()
    }

    /// Run heterogeneous operations in order; see the module docs for `@N`.
    pub fn batch_mutate(&mut self, page_id: &str, operations: Vec<Value>) -> Vec<ItemResult> {
        let mut produced: HashMap<usize, String> = HashMap::new();
        let mut results = Vec::with_capacity(operations.len());

        for (index, mut raw) in operations.into_iter().enumerate() {
            let op_name = raw
                .get("op")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            if let Err(message) = resolve_placeholders(&mut raw, &produced) {
                results.push(ItemResult::failed(index, message).with_op(&op_name));
                continue;
            }
            let op: BatchOp = match serde_json::from_value(raw) {
                Ok(op) => op,
                Err(e) => {
                    let message = format!("Invalid operation: {}", e);
                    results.push(ItemResult::failed(index, message).with_op(&op_name));
                    continue;
                }
            };

            let result = self.apply_batch_op(page_id, index, op);
            if let (true, Some(sid)) = (result.success, &result.semantic_id) {
                produced.insert(index, sid.clone());
            }
            if let Some(error) = &result.error {
                debug!(page_id, index, op = %op_name, error = %error, "Batch operation failed");
            }
            results.push(result);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            warn!(page_id, total = results.len(), failed, "Batch finished with failures");
        } else {
            info!(page_id, total = results.len(), "Batch finished");
        }
        results
    }

    fn apply_batch_op(&mut self, page_id: &str, index: usize, op: BatchOp) -> ItemResult {
        let name = op.name();
        let result = match op {
            BatchOp::Create {
                construct_type,
                values,
                position,
                parent_id,
            } => match self.create_construct(page_id, &construct_type, values, position, parent_id.as_deref()) {
                Ok(c) => ItemResult::ok(index, Some(c.data.semantic_id)),
                Err(e) => ItemResult::failed(index, e),
            },
            BatchOp::Update {
                semantic_id,
                values,
                instance_color,
            } => {
                let color = instance_color.as_ref().map(|c| c.as_deref());
                match self.update_construct(page_id, &semantic_id, values.as_ref(), color) {
                    Some(_) => ItemResult::ok(index, Some(semantic_id)),
                    None => ItemResult::failed(index, format!("Construct not found: {}", semantic_id)),
                }
            }
            BatchOp::Delete { semantic_id } => {
                if self.delete_construct(page_id, &semantic_id) {
                    ItemResult::ok(index, Some(semantic_id))
                } else {
                    ItemResult::failed(index, format!("Construct not found: {}", semantic_id))
                }
            }
            BatchOp::Connect {
                source_semantic_id,
                source_port_id,
                target_semantic_id,
                target_port_id,
            } => match self.connect(
                page_id,
                &source_semantic_id,
                &source_port_id,
                &target_semantic_id,
                &target_port_id,
            ) {
                Ok(_) => ItemResult::ok(index, Some(source_semantic_id)),
                Err(e) => ItemResult::failed(index, e),
            },
            BatchOp::Disconnect {
                source_semantic_id,
                source_port_id,
                target_semantic_id,
            } => {
                if self.disconnect(page_id, &source_semantic_id, &source_port_id, &target_semantic_id) {
                    ItemResult::ok(index, Some(source_semantic_id))
                } else {
                    ItemResult::failed(index, "No matching connection")
                }
            }
            BatchOp::Move {
                semantic_id,
                parent_id,
                position,
            } => match self.move_construct(page_id, &semantic_id, parent_id.as_deref(), position) {
                Ok(Some(_)) => ItemResult::ok(index, Some(semantic_id)),
                Ok(None) => ItemResult::failed(index, format!("Construct not found: {}", semantic_id)),
                Err(e) => ItemResult::failed(index, e),
            },
        };
        result.with_op(name)
    }
}

impl DiagramDocument {
    pub fn create_constructs_bulk(&self, page_id: &str, specs: Vec<ConstructSpec>) -> Vec<ItemResult> {
        self.write(|tx| tx.create_constructs_bulk(page_id, specs))
    }

    pub fn connect_bulk(&self, page_id: &str, specs: &[ConnectSpec]) -> Vec<ItemResult> {
        self.write(|tx| tx.connect_bulk(page_id, specs))
    }

    pub fn delete_constructs_bulk(&self, page_id: &str, semantic_ids: &[String]) -> Vec<ItemResult> {
        self.write(|tx| tx.delete_constructs_bulk(page_id, semantic_ids))
    }

    pub fn batch_mutate(&self, page_id: &str, operations: Vec<Value>) -> Vec<ItemResult> {
        self.write(|tx| tx.batch_mutate(page_id, operations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Node;
    use crate::testing::seeded_document;
    use serde_json::json;

    fn overlapping_pairs(nodes: &[Node], rects: &[Rect]) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for i in 0..rects.len() {
            for j in i + 1..rects.len() {
                if rects[i].overlaps(&rects[j]) {
                    pairs.push((nodes[i].id().to_string(), nodes[j].id().to_string()));
                }
            }
        }
        pairs
    }

    fn spec(construct_type: &str) -> ConstructSpec {
        ConstructSpec {
            construct_type: construct_type.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_placeholder_parsing() {
        assert_eq!(placeholder_index("@0"), Some(0));
        assert_eq!(placeholder_index("@12"), Some(12));
        assert_eq!(placeholder_index("@"), None);
        assert_eq!(placeholder_index("@a1"), None);
        assert_eq!(placeholder_index("svc-1"), None);
    }

    #[test]
    fn test_bulk_create_grid_never_overlaps() {
        let (doc, page) = seeded_document();
        doc.create_constructs_bulk(&page, (0..6).map(|_| spec("service")).collect());
        let results = doc.create_constructs_bulk(&page, (0..5).map(|_| spec("task")).collect());
        assert!(results.iter().all(|r| r.success));

        let constructs = doc.list_constructs(&page);
        assert_eq!(constructs.len(), 11);
        let nodes: Vec<Node> = constructs.into_iter().map(Node::Construct).collect();
        let rects: Vec<Rect> = nodes
            .iter()
            .map(|n| n.local_rect(doc.config().construct_size))
            .collect();
        assert!(overlapping_pairs(&nodes, &rects).is_empty());
    }

    #[test]
    fn test_bulk_create_reports_unknown_type() {
        let (doc, page) = seeded_document();
        let results = doc.create_constructs_bulk(&page, vec![spec("service"), spec("nope"), spec("task")]);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
        assert_eq!(doc.list_constructs(&page).len(), 2);
    }

    #[test]
    fn test_connect_bulk_is_best_effort() {
        let (doc, page) = seeded_document();
        let ids: Vec<String> = doc
            .create_constructs_bulk(&page, vec![spec("service"), spec("service")])
            .into_iter()
            .filter_map(|r| r.semantic_id)
            .collect();
        let specs = vec![
            ConnectSpec {
                source_semantic_id: ids[0].clone(),
                source_port_id: "flow-out".into(),
                target_semantic_id: "ghost".into(),
                target_port_id: "flow-in".into(),
            },
            ConnectSpec {
                source_semantic_id: ids[0].clone(),
                source_port_id: "flow-out".into(),
                target_semantic_id: ids[1].clone(),
                target_port_id: "flow-in".into(),
            },
        ];

        let results = doc.connect_bulk(&page, &specs);
        assert!(!results[0].success);
        assert!(results[1].success);
        assert_eq!(doc.list_edges(&page).len(), 1);
    }

    #[test]
    fn test_batch_placeholders_chain_create_and_connect() {
        let (doc, page) = seeded_document();
        let results = doc.batch_mutate(
            &page,
            vec![
                json!({ "op": "create", "constructType": "service", "values": { "name": "api" } }),
                json!({ "op": "create", "constructType": "database" }),
                json!({ "op": "connect", "sourceSemanticId": "@0", "sourcePortId": "flow-out",
                        "targetSemanticId": "@1", "targetPortId": "flow-in" }),
                json!({ "op": "update", "semanticId": "@0", "values": { "name": "gateway" } }),
            ],
        );

        assert!(results.iter().all(|r| r.success), "{:?}", results);
        let api = results[0].semantic_id.clone().unwrap();
        assert_eq!(doc.connections_of(&page, &api).len(), 1);
        assert_eq!(doc.get_construct(&page, &api).unwrap().data.values["name"], json!("gateway"));
    }

    #[test]
    fn test_batch_placeholders_resolve_inside_values() {
        let (doc, page) = seeded_document();
        let results = doc.batch_mutate(
            &page,
            vec![
                json!({ "op": "create", "constructType": "service" }),
                json!({ "op": "create", "constructType": "task", "values": { "name": "@0" } }),
                json!({ "op": "update", "semanticId": "@1", "values": { "name": "@7" } }),
            ],
        );

        let service = results[0].semantic_id.clone().unwrap();
        let task = results[1].semantic_id.clone().unwrap();
        assert_eq!(doc.get_construct(&page, &task).unwrap().data.values["name"], json!(service));
        assert!(!results[2].success);
        assert!(results[2].error.as_deref().unwrap().contains("'values.name'"));
        assert_eq!(doc.get_construct(&page, &task).unwrap().data.values["name"], json!(service));
    }

    #[test]
    fn test_batch_failures_do_not_stop_later_operations() {
        let (doc, page) = seeded_document();
        let results = doc.batch_mutate(
            &page,
            vec![
                json!({ "op": "create", "constructType": "nope" }),
                json!({ "op": "update", "semanticId": "@0", "values": { "a": 1 } }),
                json!({ "op": "explode" }),
                json!({ "op": "create", "constructType": "task" }),
            ],
        );

        assert!(!results[0].success);
        assert!(results[1].error.as_deref().unwrap().contains("@0"));
        assert_eq!(results[2].op.as_deref(), Some("explode"));
        assert!(!results[2].success);
        assert!(results[3].success);
        assert_eq!(doc.list_constructs(&page).len(), 1);
    }

    #[test]
    fn test_bulk_delete_reports_missing() {
        let (doc, page) = seeded_document();
        let ids: Vec<String> = doc
            .create_constructs_bulk(&page, vec![spec("service"), spec("task")])
            .into_iter()
            .filter_map(|r| r.semantic_id)
            .collect();
        let mut targets = ids.clone();
        targets.insert(1, "ghost".into());

        let results = doc.delete_constructs_bulk(&page, &targets);
        assert_eq!(
            results.iter().map(|r| r.success).collect::<Vec<_>>(),
            vec![true, false, true]
        );
        assert!(doc.list_constructs(&page).is_empty());
    }
}
