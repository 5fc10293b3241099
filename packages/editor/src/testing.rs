//! Fixtures shared by unit and integration tests.

use crate::document::DiagramDocument;
use crate::model::{ConstructSchema, FieldSchema, FieldType, PortConfig};
use serde_json::json;

fn field(name: &str, field_type: FieldType) -> FieldSchema {
    FieldSchema {
        name: name.to_string(),
        label: name.to_string(),
        field_type,
        options: None,
        display_tier: None,
        default: None,
    }
}

fn port(id: &str, suggested: &[&str]) -> PortConfig {
    PortConfig {
        id: id.to_string(),
        port_type: id.to_string(),
        label: id.to_string(),
        suggested_types: (!suggested.is_empty())
            .then(|| suggested.iter().map(|s| s.to_string()).collect()),
    }
}

fn flow_schema(schema_type: &str, display_name: &str, color: &str) -> ConstructSchema {
    ConstructSchema {
        schema_type: schema_type.to_string(),
        display_name: display_name.to_string(),
        color: color.to_string(),
        fields: vec![field("name", FieldType::String)],
        ports: vec![port("flow-in", &[]), port("flow-out", &[])],
        package_id: None,
        group_id: None,
        display_field: Some("name".to_string()),
        built_in: false,
    }
}

/// `service`: name, replicas (default 1), tier enum; flow ports suggesting `database`
pub fn service_schema() -> ConstructSchema {
    let mut schema = flow_schema("service", "Service", "#4f7cff");
    schema.fields.push(FieldSchema {
        default: Some(json!(1)),
        ..field("replicas", FieldType::Number)
    });
    schema.fields.push(FieldSchema {
        options: Some(vec!["frontend".into(), "backend".into(), "data".into()]),
        ..field("tier", FieldType::Enum)
    });
    schema.ports = vec![port("flow-in", &[]), port("flow-out", &["database"])];
    schema
}

pub fn task_schema() -> ConstructSchema {
    flow_schema("task", "Task", "#e0a030")
}

pub fn database_schema() -> ConstructSchema {
    flow_schema("database", "Database", "#3aa876")
}

/// Document with built-in ports, the three fixture schemas and one page
pub fn seeded_document() -> (DiagramDocument, String) {
    let doc = DiagramDocument::new();
    doc.seed_builtin_ports();
    for schema in [service_schema(), task_schema(), database_schema()] {
        if let Err(err) = doc.create_schema(schema) {
            panic!("fixture schema rejected: {}", err);
        }
    }
    let page = doc.create_page("Main", None);
    (doc, page.id)
}
