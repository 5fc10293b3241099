//! Integration tests for the editor crate
//!
//! End-to-end sequences through the public API:
//! - Cascading deletes and wagon teardown
//! - Edge/connection pairing across mutation sequences
//! - Schema migrations, dry runs and peer visibility
//! - Flow and pin layout scenarios
//! - The tool envelope

use carta_editor::{
    execute_tool, ConstructSchema, DiagramDocument, FieldType, FlowDirection, FlowOptions,
    NewOrganizer, Node, PinDirection, Position, Values,
};
use serde_json::{json, Value};

fn schema(value: Value) -> ConstructSchema {
    serde_json::from_value(value).unwrap()
}

fn fixture() -> (DiagramDocument, String) {
    let doc = DiagramDocument::new();
    doc.seed_builtin_ports();
    doc.create_schema(schema(json!({
        "type": "service",
        "displayName": "Service",
        "fields": [
            { "name": "name", "label": "Name", "type": "string" },
            { "name": "port", "label": "Port", "type": "string" }
        ],
        "ports": [
            { "id": "flow-in", "portType": "flow-in", "label": "In" },
            { "id": "flow-out", "portType": "flow-out", "label": "Out" }
        ],
        "displayField": "name"
    })))
    .unwrap();
    doc.create_schema(schema(json!({
        "type": "task",
        "displayName": "Task",
        "fields": [{ "name": "title", "label": "Title", "type": "string" }],
        "ports": [
            { "id": "flow-in", "portType": "flow-in", "label": "In" },
            { "id": "flow-out", "portType": "flow-out", "label": "Out" }
        ]
    })))
    .unwrap();
    let page = doc.create_page("Main", None);
    (doc, page.id)
}

fn values(value: Value) -> Values {
    value.as_object().cloned().unwrap_or_default()
}

fn organizer(doc: &DiagramDocument, page: &str, name: &str, x: f64, y: f64) -> Node {
    doc.create_organizer(
        page,
        NewOrganizer {
            name: name.into(),
            position: Some(Position::new(x, y)),
            width: Some(400.0),
            height: Some(300.0),
            ..Default::default()
        },
    )
    .unwrap()
}

#[test]
fn test_delete_cascades_edges_connections_and_wagon() {
    let (doc, page) = fixture();
    let hub = doc
        .create_construct(&page, "service", Values::new(), Some(Position::new(100.0, 100.0)), None)
        .unwrap();
    let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
    let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
    doc.connect(&page, a.semantic_id(), "flow-out", hub.semantic_id(), "flow-in")
        .unwrap();
    doc.connect(&page, hub.semantic_id(), "flow-out", b.semantic_id(), "flow-in")
        .unwrap();
    doc.connect(&page, b.semantic_id(), "flow-out", hub.semantic_id(), "flow-in")
        .unwrap();

    let wagon = doc
        .create_organizer(
            &page,
            NewOrganizer {
                name: "Notes".into(),
                attached_to_semantic_id: Some(hub.semantic_id().to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let wagon_abs = Position::new(100.0, 100.0).add(wagon.position());
    let members: Vec<_> = [(5.0, 5.0), (40.0, 60.0)]
        .into_iter()
        .map(|(x, y)| {
            doc.create_construct(&page, "task", Values::new(), Some(Position::new(x, y)), Some(wagon.id()))
                .unwrap()
        })
        .collect();

    assert!(doc.delete_construct(&page, hub.semantic_id()));

    assert!(doc
        .list_edges(&page)
        .iter()
        .all(|e| e.source != hub.id && e.target != hub.id));
    for construct in doc.list_constructs(&page) {
        assert!(construct
            .data
            .connections
            .iter()
            .all(|c| c.target_semantic_id != hub.semantic_id()));
    }
    assert!(doc.get_node(&page, wagon.id()).is_none());
    for (member, (x, y)) in members.iter().zip([(5.0, 5.0), (40.0, 60.0)]) {
        let after = doc.get_construct(&page, member.semantic_id()).unwrap();
        assert_eq!(after.parent_id, None);
        assert_eq!(after.position, wagon_abs.add(Position::new(x, y)));
    }
}

#[test]
fn test_edges_and_connections_stay_paired() {
    let (doc, page) = fixture();
    let ids: Vec<String> = (0..4)
        .map(|_| {
            doc.create_construct(&page, "service", Values::new(), None, None)
                .unwrap()
                .semantic_id()
                .to_string()
        })
        .collect();

    for pair in ids.windows(2) {
        doc.connect(&page, &pair[0], "flow-out", &pair[1], "flow-in").unwrap();
    }
    doc.connect(&page, &ids[3], "flow-out", &ids[0], "flow-in").unwrap();
    assert!(doc.disconnect(&page, &ids[1], "flow-out", &ids[2]));
    assert!(doc.delete_construct(&page, &ids[3]));
    doc.connect(&page, &ids[2], "flow-out", &ids[0], "flow-in").unwrap();

    let edges = doc.list_edges(&page);
    assert_eq!(edges.len(), 2);
    for edge in &edges {
        let source = doc
            .list_constructs(&page)
            .into_iter()
            .find(|c| c.id == edge.source)
            .unwrap();
        let target = doc
            .list_constructs(&page)
            .into_iter()
            .find(|c| c.id == edge.target)
            .unwrap();
        let matching = source
            .data
            .connections
            .iter()
            .filter(|c| {
                c.port_id == edge.source_handle
                    && c.target_semantic_id == target.semantic_id()
                    && c.target_port_id == edge.target_handle
            })
            .count();
        assert_eq!(matching, 1);
    }
    let connection_count: usize = doc
        .list_constructs(&page)
        .iter()
        .map(|c| c.data.connections.len())
        .sum();
    assert_eq!(connection_count, edges.len());
    assert!(doc.find_orphans(&page).is_clean());
}

#[test]
fn test_rename_port_is_atomic_across_peers() {
    let (doc, page) = fixture();
    let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
    let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
    doc.connect(&page, a.semantic_id(), "flow-out", b.semantic_id(), "flow-in")
        .unwrap();

    let peer = DiagramDocument::new();
    peer.apply_update(&doc.encode_state()).unwrap();

    let result = doc.rename_port("service", "flow-out", "out").unwrap();
    assert!(result.schema_updated);
    assert_eq!(result.edges_updated, 1);

    assert!(doc.get_schema("service").unwrap().port("out").is_some());
    assert_eq!(doc.list_edges(&page)[0].source_handle, "out");
    assert_eq!(doc.connections_of(&page, a.semantic_id())[0].port_id, "out");

    // Peer has not seen the change yet: old name everywhere
    assert!(peer.get_schema("service").unwrap().port("flow-out").is_some());
    assert_eq!(peer.list_edges(&page)[0].source_handle, "flow-out");
    assert_eq!(peer.connections_of(&page, a.semantic_id())[0].port_id, "flow-out");

    peer.apply_update(&doc.encode_state()).unwrap();
    assert_eq!(peer.list_edges(&page)[0].source_handle, "out");
    assert_eq!(peer.connections_of(&page, a.semantic_id())[0].port_id, "out");
}

#[test]
fn test_change_field_type_dry_run_is_stable() {
    let (doc, page) = fixture();
    for port in ["8080", "http", "443"] {
        doc.create_construct(&page, "service", values(json!({ "port": port })), None, None)
            .unwrap();
    }
    let before_schema = doc.get_schema("service").unwrap();
    let before_constructs = doc.list_constructs(&page);

    let first = doc
        .change_field_type("service", "port", FieldType::Number, None, false)
        .unwrap();
    let second = doc
        .change_field_type("service", "port", FieldType::Number, None, false)
        .unwrap();

    assert!(first.dry_run);
    assert_eq!(first.data_loss_count, 1);
    assert_eq!(first.warnings.len(), second.warnings.len());
    assert_eq!(first.data_loss_count, second.data_loss_count);
    assert_eq!(doc.get_schema("service").unwrap(), before_schema);
    assert_eq!(doc.list_constructs(&page), before_constructs);
}

#[test]
fn test_flow_layout_two_services() {
    let (doc, page) = fixture();
    let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
    let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
    doc.connect(&page, a.semantic_id(), "flow-out", b.semantic_id(), "flow-in")
        .unwrap();

    let result = doc.flow_layout(
        &page,
        FlowOptions {
            direction: FlowDirection::TB,
            ..Default::default()
        },
    );
    assert_eq!(result.layers[a.semantic_id()], 0);
    assert_eq!(result.layers[b.semantic_id()], 1);
    assert_eq!(result.updated, 2);

    let a = doc.get_construct(&page, a.semantic_id()).unwrap();
    let b = doc.get_construct(&page, b.semantic_id()).unwrap();
    assert!(b.position.y > a.position.y);
}

#[test]
fn test_delete_organizer_keeps_members_in_place() {
    let (doc, page) = fixture();
    let group = organizer(&doc, &page, "Group", 500.0, 400.0);
    let task = doc
        .create_construct(&page, "task", Values::new(), Some(Position::new(10.0, 10.0)), Some(group.id()))
        .unwrap();

    assert!(doc.delete_organizer(&page, group.id(), false));

    let task = doc.get_construct(&page, task.semantic_id()).unwrap();
    assert_eq!(task.parent_id, None);
    assert_eq!(task.position, Position::new(510.0, 410.0));
}

#[test]
fn test_pin_layout_then_cycle() {
    let (doc, page) = fixture();
    let a = organizer(&doc, &page, "A", 0.0, 0.0);
    let b = organizer(&doc, &page, "B", 800.0, 50.0);

    doc.add_pin_constraint(&page, b.id(), a.id(), PinDirection::S, Some(60.0))
        .unwrap();
    let result = doc.apply_pin_layout(&page);
    assert!(result.warnings.is_empty());

    let a_after = doc.get_organizer(&page, a.id()).unwrap();
    let b_after = doc.get_organizer(&page, b.id()).unwrap();
    assert_eq!(a_after.position(), Position::ORIGIN);
    assert_eq!(b_after.position().y, 0.0 + 300.0 + 60.0);

    doc.add_pin_constraint(&page, a.id(), b.id(), PinDirection::S, None)
        .unwrap();
    let result = doc.apply_pin_layout(&page);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].contains("Cycle detected"));
}

#[test]
fn test_tools_report_failures_as_envelopes() {
    let (doc, page) = fixture();
    let created = execute_tool(
        &doc,
        "create_construct",
        &json!({ "constructType": "service", "values": { "name": "api" } }),
        &page,
    );
    assert!(created.success);

    let summary = execute_tool(&doc, "page_summary", &Value::Null, &page);
    assert!(summary.success);

    let missing = execute_tool(&doc, "remove_field", &json!({ "schemaType": "ghost", "fieldName": "x" }), &page);
    assert!(!missing.success);
    assert!(missing.error.is_some());
}
