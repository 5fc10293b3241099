//! Versioned JSON snapshot of a whole document.
//!
//! ```text
//! {
//!   "formatVersion": 2,
//!   "title": "...",
//!   "activePageId": "page-...",
//!   "pages": [{ "page": {...}, "nodes": [...], "edges": [...], "pinConstraints": [...] }],
//!   "schemas": [...], "portSchemas": [...], "schemaGroups": [...], "schemaPackages": [...],
//!   "exportedAt": "2024-01-01T00:00:00Z"
//! }
//! ```
//!
//! Version 1 files predate pin constraints and load with none. Nodes are kept
//! as raw JSON so a snapshot carries whatever the document held, including
//! nodes the engine can no longer classify; hydration drops those with a
//! warning. Nodes it can classify are written back verbatim, keys the engine
//! does not model included.

use carta_common::{CartaError, CartaResult};
use carta_editor::{
    ConstructSchema, DiagramDocument, Edge, Node, Page, PinConstraint, PortSchema, SchemaGroup,
    SchemaPackage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const CURRENT_FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub page: Page,
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub pin_constraints: Vec<PinConstraint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub format_version: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_page_id: Option<String>,
    pub pages: Vec<PageSnapshot>,
    #[serde(default)]
    pub schemas: Vec<ConstructSchema>,
    #[serde(default)]
    pub port_schemas: Vec<PortSchema>,
    #[serde(default)]
    pub schema_groups: Vec<SchemaGroup>,
    #[serde(default)]
    pub schema_packages: Vec<SchemaPackage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
}

/// What [`hydrate`] wrote and what it had to drop
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub pages: usize,
    pub nodes: usize,
    pub edges: usize,
    pub nodes_dropped: usize,
    pub connections_stripped: usize,
    pub warnings: Vec<String>,
}

/// Snapshot of everything `doc` holds
pub fn extract(doc: &DiagramDocument) -> Snapshot {
    doc.read(|tx| {
        let pages = tx
            .pages()
            .into_iter()
            .map(|page| PageSnapshot {
                nodes: tx.node_values(&page.id),
                edges: tx.edges(&page.id),
                pin_constraints: tx.pin_constraints(&page.id),
                page,
            })
            .collect();
        Snapshot {
            format_version: CURRENT_FORMAT_VERSION,
            title: tx.title(),
            active_page_id: tx.active_page_id(),
            pages,
            schemas: tx.schemas(),
            port_schemas: tx.port_schemas(),
            schema_groups: tx.schema_groups(),
            schema_packages: tx.schema_packages(),
            exported_at: Some(chrono::Utc::now().to_rfc3339()),
        }
    })
}

pub fn validate(snapshot: &Snapshot) -> CartaResult<()> {
    if snapshot.format_version == 0 || snapshot.format_version > CURRENT_FORMAT_VERSION {
        return Err(CartaError::ValidationFailure(format!(
            "Unsupported format version {} (supported: 1..={})",
            snapshot.format_version, CURRENT_FORMAT_VERSION
        )));
    }

    let mut page_ids = HashSet::new();
    for page in &snapshot.pages {
        if !page_ids.insert(page.page.id.as_str()) {
            return Err(CartaError::ValidationFailure(format!(
                "Duplicate page id: {}",
                page.page.id
            )));
        }
        for node in &page.nodes {
            if node.get("id").and_then(Value::as_str).is_none() {
                return Err(CartaError::ValidationFailure(format!(
                    "Node without an id on page {}",
                    page.page.id
                )));
            }
        }
    }

    let mut types = HashSet::new();
    for schema in &snapshot.schemas {
        if !types.insert(schema.schema_type.as_str()) {
            return Err(CartaError::ValidationFailure(format!(
                "Duplicate schema type: {}",
                schema.schema_type
            )));
        }
    }
    Ok(())
}

/// Replace the contents of `doc` with `snapshot`, in one transaction, then
/// strip connections whose target semantic id is not on the page.
pub fn hydrate(doc: &DiagramDocument, snapshot: &Snapshot) -> CartaResult<ImportReport> {
    validate(snapshot)?;
    let organizer_size = doc.config().organizer_size;
    let mut report = ImportReport::default();

    doc.write(|tx| {
        tx.clear_all();
        tx.set_meta("formatVersion", Value::from(CURRENT_FORMAT_VERSION));
        tx.set_meta("title", Value::String(snapshot.title.clone()));

        for schema in &snapshot.schemas {
            tx.put_schema(schema);
        }
        for port in &snapshot.port_schemas {
            tx.put_port_schema(port);
        }
        for group in &snapshot.schema_groups {
            tx.put_schema_group(group);
        }
        for package in &snapshot.schema_packages {
            tx.put_schema_package(package);
        }

        for entry in &snapshot.pages {
            let page_id = entry.page.id.as_str();
            tx.put_page(&entry.page);

            let mut nodes = Vec::with_capacity(entry.nodes.len());
            let mut raw = Vec::with_capacity(entry.nodes.len());
            for value in &entry.nodes {
                match Node::from_value(value, organizer_size) {
                    Some(node) => {
                        nodes.push(node);
                        raw.push(value.clone());
                    }
                    None => {
                        let id = value.get("id").and_then(Value::as_str).unwrap_or("?");
                        let message = format!("Dropped unreadable node {} on page {}", id, page_id);
                        warn!(page_id, "{}", message);
                        report.warnings.push(message);
                        report.nodes_dropped += 1;
                    }
                }
            }
            tx.replace_page_values(page_id, &raw, &entry.edges);
            if !entry.pin_constraints.is_empty() {
                tx.set_pin_constraints(page_id, &entry.pin_constraints);
            }
            report.pages += 1;
            report.nodes += nodes.len();
            report.edges += entry.edges.len();

            let live: HashSet<String> = nodes
                .iter()
                .filter_map(|n| n.semantic_id().map(str::to_string))
                .collect();
            for node in nodes.iter().filter_map(Node::as_construct) {
                let stripped = tx.retain_connections(page_id, &node.id, |c| {
                    c.map_or(false, |c| live.contains(&c.target_semantic_id))
                });
                if stripped > 0 {
                    let message = format!(
                        "Stripped {} dangling connection(s) from {} on page {}",
                        stripped,
                        node.semantic_id(),
                        page_id
                    );
                    warn!(page_id, "{}", message);
                    report.warnings.push(message);
                    report.connections_stripped += stripped;
                }
            }
        }

        let active = snapshot
            .active_page_id
            .as_deref()
            .filter(|id| snapshot.pages.iter().any(|p| p.page.id == *id))
            .or_else(|| snapshot.pages.first().map(|p| p.page.id.as_str()));
        if let Some(active) = active {
            tx.set_meta("activePageId", Value::String(active.to_string()));
        }
    });

    info!(
        pages = report.pages,
        nodes = report.nodes,
        edges = report.edges,
        dropped = report.nodes_dropped,
        stripped = report.connections_stripped,
        "Hydrated document"
    );
    Ok(report)
}

/// Parse and validate a snapshot. Shape errors are validation failures,
/// not JSON errors, since the text itself parsed.
pub fn from_json_str(text: &str) -> CartaResult<Snapshot> {
    let value: Value = serde_json::from_str(text)?;
    match value.get("formatVersion") {
        Some(v) if v.is_u64() => {}
        _ => {
            return Err(CartaError::ValidationFailure(
                "Missing or invalid formatVersion".to_string(),
            ))
        }
    }
    let snapshot: Snapshot = serde_json::from_value(value).map_err(|err| {
        CartaError::ValidationFailure(format!("File does not match the snapshot format: {}", err))
    })?;
    validate(&snapshot)?;
    Ok(snapshot)
}

pub fn to_json_string(snapshot: &Snapshot) -> CartaResult<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn read_file(path: &Path) -> CartaResult<Snapshot> {
    let text = fs::read_to_string(path)?;
    from_json_str(&text)
}

pub fn write_file(path: &Path, snapshot: &Snapshot) -> CartaResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, to_json_string(snapshot)?)?;
    info!(path = %path.display(), pages = snapshot.pages.len(), "Wrote snapshot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carta_editor::testing::seeded_document;
    use carta_editor::{NewOrganizer, PinDirection, Position, Values};
    use serde_json::json;

    fn populated() -> (DiagramDocument, String) {
        let (doc, page) = seeded_document();
        doc.set_title("Platform");
        let a = doc
            .create_construct(&page, "service", Values::new(), Some(Position::new(0.0, 0.0)), None)
            .unwrap();
        let b = doc.create_construct(&page, "database", Values::new(), None, None).unwrap();
        doc.connect(&page, a.semantic_id(), "flow-out", b.semantic_id(), "flow-in")
            .unwrap();
        let g1 = doc
            .create_organizer(&page, NewOrganizer { name: "G1".into(), ..Default::default() })
            .unwrap();
        let g2 = doc
            .create_organizer(&page, NewOrganizer { name: "G2".into(), ..Default::default() })
            .unwrap();
        doc.add_pin_constraint(&page, g2.id(), g1.id(), PinDirection::E, None)
            .unwrap();
        doc.create_page("Second", Some("notes"));
        (doc, page)
    }

    fn without_timestamp(mut snapshot: Snapshot) -> Snapshot {
        snapshot.exported_at = None;
        snapshot
    }

    #[test]
    fn test_extract_hydrate_extract_is_stable() {
        let (doc, _) = populated();
        let first = extract(&doc);

        let copy = DiagramDocument::new();
        let report = hydrate(&copy, &first).unwrap();
        assert_eq!(report.pages, 2);
        assert!(report.warnings.is_empty());

        assert_eq!(without_timestamp(extract(&copy)), without_timestamp(first));
    }

    #[test]
    fn test_hydrate_replaces_existing_content() {
        let (doc, _) = populated();
        let snapshot = extract(&doc);

        let (target, stale_page) = seeded_document();
        target.create_construct(&stale_page, "task", Values::new(), None, None).unwrap();
        hydrate(&target, &snapshot).unwrap();

        assert!(target.get_page(&stale_page).is_none());
        assert_eq!(target.list_pages().len(), 2);
        assert_eq!(target.title(), "Platform");
    }

    #[test]
    fn test_import_strips_dangling_connections() {
        let (doc, page) = populated();
        let mut snapshot = extract(&doc);
        let nodes = &mut snapshot.pages.iter_mut().find(|p| p.page.id == page).unwrap().nodes;
        let service = nodes
            .iter_mut()
            .find(|n| n["data"]["constructType"] == json!("service"))
            .unwrap();
        service["data"]["connections"]
            .as_array_mut()
            .unwrap()
            .push(json!({ "portId": "flow-out", "targetSemanticId": "ghost-1", "targetPortId": "flow-in" }));

        let copy = DiagramDocument::new();
        let report = hydrate(&copy, &snapshot).unwrap();
        assert_eq!(report.connections_stripped, 1);
        let sid = service_sid(&copy, &page);
        assert_eq!(copy.connections_of(&page, &sid).len(), 1);
    }

    #[test]
    fn test_unmodelled_keys_survive_hydrate() {
        let (doc, page) = populated();
        let service = doc
            .list_constructs(&page)
            .into_iter()
            .find(|c| c.construct_type() == "service")
            .unwrap();
        let notes = json!("written by another peer");
        doc.write(|tx| tx.set_data_field(&page, &service.id, "notes", Some(&notes)));

        let mut snapshot = extract(&doc);
        let nodes = &mut snapshot.pages.iter_mut().find(|p| p.page.id == page).unwrap().nodes;
        let raw = nodes.iter_mut().find(|n| n["id"] == json!(service.id)).unwrap();
        raw["zIndex"] = json!(3.0);
        raw["width"] = json!(320.0);

        let copy = DiagramDocument::new();
        let report = hydrate(&copy, &snapshot).unwrap();
        assert!(report.warnings.is_empty());

        let again = extract(&copy);
        assert_eq!(without_timestamp(again.clone()), without_timestamp(snapshot));
        let node = again
            .pages
            .iter()
            .flat_map(|p| p.nodes.iter())
            .find(|n| n["id"] == json!(service.id))
            .unwrap();
        assert_eq!(node["data"]["notes"], notes);
        assert_eq!(node["zIndex"], json!(3.0));
        assert_eq!(node["width"], json!(320.0));
        assert!(node.get("height").is_none());
    }

    fn service_sid(doc: &DiagramDocument, page: &str) -> String {
        doc.list_constructs(page)
            .into_iter()
            .find(|c| c.construct_type() == "service")
            .unwrap()
            .semantic_id()
            .to_string()
    }

    #[test]
    fn test_version_gate() {
        let (doc, _) = populated();
        let mut snapshot = extract(&doc);
        snapshot.format_version = CURRENT_FORMAT_VERSION + 1;
        assert!(matches!(validate(&snapshot), Err(CartaError::ValidationFailure(_))));

        snapshot.format_version = 1;
        assert!(validate(&snapshot).is_ok());
    }

    #[test]
    fn test_duplicates_rejected() {
        let (doc, _) = populated();
        let mut snapshot = extract(&doc);
        let copy = snapshot.pages[0].clone();
        snapshot.pages.push(copy);
        assert!(validate(&snapshot).unwrap_err().to_string().contains("Duplicate page id"));

        let mut snapshot = extract(&doc);
        let schema = snapshot.schemas[0].clone();
        snapshot.schemas.push(schema);
        assert!(validate(&snapshot).unwrap_err().to_string().contains("Duplicate schema type"));
    }

    #[test]
    fn test_from_json_str_requires_version() {
        let err = from_json_str(r#"{ "pages": [] }"#).unwrap_err();
        assert!(matches!(err, CartaError::ValidationFailure(_)));

        let err = from_json_str(r#"{ "formatVersion": 2, "pages": 3 }"#).unwrap_err();
        assert!(matches!(err, CartaError::ValidationFailure(_)));

        let snapshot = from_json_str(r#"{ "formatVersion": 1, "pages": [] }"#).unwrap();
        assert!(snapshot.pages.is_empty());
    }
}
