//! # Schema Registry
//!
//! Construct schemas, port schemas, schema groups and packages live in
//! document-wide maps shared by every page. Structural edits (renaming or
//! removing fields and ports) go through [`crate::migration`] so that
//! instances move with them; this module only handles whole-schema CRUD
//! and metadata.

use crate::document::{DiagramDocument, DocTxn, DocWrite};
use crate::model::{ConstructSchema, FieldType, Node, Polarity, PortSchema, SchemaGroup, SchemaPackage};
use carta_common::{CartaError, CartaResult, EntityKind};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};
use yrs::ReadTxn;

/// Keys that only migrations may change
const STRUCTURAL_KEYS: &[&str] = &["type", "fields", "ports"];

/// Port schemas every document starts with
pub fn builtin_port_schemas() -> Vec<PortSchema> {
    fn port(id: &str, name: &str, polarity: Polarity, compatible: &[&str], color: &str, about: &str) -> PortSchema {
        PortSchema {
            id: id.to_string(),
            display_name: name.to_string(),
            semantic_description: about.to_string(),
            polarity,
            compatible_with: compatible.iter().map(|s| s.to_string()).collect(),
            color: color.to_string(),
        }
    }

    vec![
        port("flow-in", "Flow In", Polarity::Sink, &["flow-out"], "#3b82f6", "Receives flow from upstream"),
        port("flow-out", "Flow Out", Polarity::Source, &["flow-in"], "#3b82f6", "Sends flow downstream"),
        port("parent", "Parent", Polarity::Source, &["child"], "#8b5cf6", "Points at the owning construct"),
        port("child", "Child", Polarity::Sink, &["parent"], "#8b5cf6", "Owns the connected construct"),
        port("symmetric", "Link", Polarity::Bidirectional, &["symmetric"], "#64748b", "Undirected association"),
        port("intercept", "Intercept", Polarity::Intercept, &["*"], "#f59e0b", "Accepts any outbound port"),
        port("relay", "Relay", Polarity::Relay, &["*"], "#10b981", "Passes any connection through"),
    ]
}

fn accepts(port: &PortSchema, other: &str) -> bool {
    port.compatible_with.iter().any(|c| c == other || c == "*")
}

/// Whether an edge may run from a `source` port to a `target` port.
///
/// The source end must be able to emit and the target end to accept.
/// Relay and intercept ports take any type; every other pairing needs one
/// side to list the other in `compatibleWith`.
pub fn can_connect(source: &PortSchema, target: &PortSchema) -> bool {
    if !source.polarity.can_emit() || !target.polarity.can_accept() {
        return false;
    }
    if source.polarity.is_wildcard() || target.polarity.is_wildcard() {
        return true;
    }
    accepts(source, &target.id) || accepts(target, &source.id)
}

/// Structural sanity checks applied to any schema written whole
pub fn validate_schema(schema: &ConstructSchema) -> CartaResult<()> {
    if schema.schema_type.trim().is_empty() {
        return Err(CartaError::ValidationFailure("Schema type must not be empty".into()));
    }

    let mut fields = HashSet::new();
    for field in &schema.fields {
        if !fields.insert(field.name.as_str()) {
            return Err(CartaError::already_exists(EntityKind::Field, &field.name));
        }
        if field.field_type == FieldType::Enum && field.options.as_ref().map_or(true, Vec::is_empty) {
            return Err(CartaError::ValidationFailure(format!(
                "Enum field '{}' needs at least one option",
                field.name
            )));
        }
    }

    let mut ports = HashSet::new();
    for port in &schema.ports {
        if !ports.insert(port.id.as_str()) {
            return Err(CartaError::already_exists(EntityKind::Port, &port.id));
        }
    }

    if let Some(display) = &schema.display_field {
        if !fields.contains(display.as_str()) {
            return Err(CartaError::InvalidReference(format!(
                "displayField '{}' is not a field of '{}'",
                display, schema.schema_type
            )));
        }
    }

    Ok(())
}

impl<'doc, T: ReadTxn> DocTxn<'doc, T> {
    /// Port type of `port_id` on schema `construct_type`
    pub fn port_type_of(&self, construct_type: &str, port_id: &str) -> Option<String> {
        self.schema(construct_type)?
            .port(port_id)
            .map(|p| p.port_type.clone())
    }

    /// Compatibility of two port *types*; unknown types never connect
    pub fn can_connect_port_types(&self, source_type: &str, target_type: &str) -> bool {
        match (self.port_schema(source_type), self.port_schema(target_type)) {
            (Some(source), Some(target)) => can_connect(&source, &target),
            _ => false,
        }
    }

    /// Instances of `schema_type` across every page
    pub fn count_instances(&self, schema_type: &str) -> usize {
        self.node_page_ids()
            .iter()
            .map(|page| {
                self.nodes(page)
                    .iter()
                    .filter(|n| matches!(n, Node::Construct(c) if c.data.construct_type == schema_type))
                    .count()
            })
            .sum()
    }
}

impl<'doc> DocWrite<'doc> {
    pub fn seed_builtin_ports(&mut self) -> usize {
        let mut added = 0;
        for port in builtin_port_schemas() {
            if self.port_schema(&port.id).is_none() {
                self.put_port_schema(&port);
                added += 1;
            }
        }
        added
    }

    pub fn create_schema(&mut self, schema: ConstructSchema) -> CartaResult<ConstructSchema> {
        validate_schema(&schema)?;
        if self.schema(&schema.schema_type).is_some() {
            return Err(CartaError::already_exists(EntityKind::Schema, &schema.schema_type));
        }
        self.put_schema(&schema);
        info!(schema_type = %schema.schema_type, "Created schema");
        Ok(schema)
    }

    /// Merge non-structural keys (`displayName`, `color`, `displayField`, ...)
    /// into a schema. Structural keys are refused with `Forbidden`.
    pub fn update_schema(&mut self, schema_type: &str, patch: &Value) -> CartaResult<ConstructSchema> {
        let patch = patch
            .as_object()
            .ok_or_else(|| CartaError::ValidationFailure("Schema patch must be an object".into()))?;
        if let Some(key) = STRUCTURAL_KEYS.iter().find(|k| patch.contains_key(**k)) {
            return Err(CartaError::Forbidden(format!(
                "'{}' is structural; use a schema migration to change it",
                key
            )));
        }

        let current = self.require_schema(schema_type)?;
        let mut merged = serde_json::to_value(&current)?;
        if let Value::Object(obj) = &mut merged {
            for (k, v) in patch {
                if v.is_null() {
                    obj.remove(k);
                } else {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }
        let updated: ConstructSchema = serde_json::from_value(merged)
            .map_err(|e| CartaError::ValidationFailure(format!("Invalid schema patch: {}", e)))?;
        validate_schema(&updated)?;
        self.put_schema(&updated);
        debug!(schema_type, "Updated schema metadata");
        Ok(updated)
    }

    /// Delete a schema. With instances present this needs `cascade`, which
    /// deletes every instance (with the usual delete cascade) first.
    pub fn delete_schema(&mut self, schema_type: &str, cascade: bool) -> CartaResult<usize> {
        let schema = self.require_schema(schema_type)?;
        if schema.built_in {
            return Err(CartaError::Forbidden(format!(
                "Built-in schema '{}' cannot be deleted",
                schema_type
            )));
        }

        let instances = self.count_instances(schema_type);
        if instances > 0 && !cascade {
            return Err(CartaError::InvalidReference(format!(
                "Schema '{}' still has {} instance(s)",
                schema_type, instances
            )));
        }

        let mut deleted = 0;
        for page in self.node_page_ids() {
            let doomed: Vec<String> = self
                .nodes(&page)
                .into_iter()
                .filter_map(|n| match n {
                    Node::Construct(c) if c.data.construct_type == schema_type => {
                        Some(c.data.semantic_id)
                    }
                    _ => None,
                })
                .collect();
            for sid in doomed {
                if self.delete_construct(&page, &sid) {
                    deleted += 1;
                }
            }
        }

        self.remove_schema(schema_type);
        info!(schema_type, instances_deleted = deleted, "Deleted schema");
        Ok(deleted)
    }

    pub fn create_port_schema(&mut self, port: PortSchema) -> CartaResult<PortSchema> {
        if port.id.trim().is_empty() {
            return Err(CartaError::ValidationFailure("Port schema id must not be empty".into()));
        }
        if self.port_schema(&port.id).is_some() {
            return Err(CartaError::already_exists(EntityKind::PortSchema, &port.id));
        }
        self.put_port_schema(&port);
        Ok(port)
    }

    /// Refused while any construct schema still declares a port of this type
    pub fn delete_port_schema(&mut self, id: &str) -> CartaResult<()> {
        if self.port_schema(id).is_none() {
            return Err(CartaError::not_found(EntityKind::PortSchema, id));
        }
        if let Some(user) = self
            .schemas()
            .into_iter()
            .find(|s| s.ports.iter().any(|p| p.port_type == id))
        {
            return Err(CartaError::InvalidReference(format!(
                "Port type '{}' is used by schema '{}'",
                id, user.schema_type
            )));
        }
        self.remove_port_schema(id);
        Ok(())
    }

    pub fn create_schema_group(&mut self, group: SchemaGroup) -> CartaResult<SchemaGroup> {
        if self.schema_groups().iter().any(|g| g.id == group.id) {
            return Err(CartaError::already_exists(EntityKind::SchemaGroup, &group.id));
        }
        if let Some(parent) = &group.parent_id {
            if !self.schema_groups().iter().any(|g| &g.id == parent) {
                return Err(CartaError::InvalidReference(format!(
                    "Parent group '{}' does not exist",
                    parent
                )));
            }
        }
        self.put_schema_group(&group);
        Ok(group)
    }

    /// Deleting a group ungroups its schemas and child groups
    pub fn delete_schema_group(&mut self, id: &str) -> CartaResult<()> {
        if !self.remove_schema_group(id) {
            return Err(CartaError::not_found(EntityKind::SchemaGroup, id));
        }
        for mut schema in self.schemas() {
            if schema.group_id.as_deref() == Some(id) {
                schema.group_id = None;
                self.put_schema(&schema);
            }
        }
        for mut group in self.schema_groups() {
            if group.parent_id.as_deref() == Some(id) {
                group.parent_id = None;
                self.put_schema_group(&group);
            }
        }
        Ok(())
    }

    pub fn create_schema_package(&mut self, package: SchemaPackage) -> CartaResult<SchemaPackage> {
        if self.schema_packages().iter().any(|p| p.id == package.id) {
            return Err(CartaError::already_exists(EntityKind::SchemaPackage, &package.id));
        }
        self.put_schema_package(&package);
        Ok(package)
    }

    /// Deleting a package detaches the schemas and groups that belonged to it
    pub fn delete_schema_package(&mut self, id: &str) -> CartaResult<()> {
        if !self.remove_schema_package(id) {
            return Err(CartaError::not_found(EntityKind::SchemaPackage, id));
        }
        for mut schema in self.schemas() {
            if schema.package_id.as_deref() == Some(id) {
                schema.package_id = None;
                self.put_schema(&schema);
            }
        }
        for mut group in self.schema_groups() {
            if group.package_id.as_deref() == Some(id) {
                group.package_id = None;
                self.put_schema_group(&group);
            }
        }
        Ok(())
    }
}

impl DiagramDocument {
    pub fn seed_builtin_ports(&self) -> usize {
        self.write(|tx| tx.seed_builtin_ports())
    }

    pub fn get_schema(&self, schema_type: &str) -> Option<ConstructSchema> {
        self.read(|tx| tx.schema(schema_type))
    }

    pub fn list_schemas(&self) -> Vec<ConstructSchema> {
        self.read(|tx| tx.schemas())
    }

    pub fn list_port_schemas(&self) -> Vec<PortSchema> {
        self.read(|tx| tx.port_schemas())
    }

    pub fn create_schema(&self, schema: ConstructSchema) -> CartaResult<ConstructSchema> {
        self.write(|tx| tx.create_schema(schema))
    }

    pub fn update_schema(&self, schema_type: &str, patch: &Value) -> CartaResult<ConstructSchema> {
        self.write(|tx| tx.update_schema(schema_type, patch))
    }

    pub fn delete_schema(&self, schema_type: &str, cascade: bool) -> CartaResult<usize> {
        self.write(|tx| tx.delete_schema(schema_type, cascade))
    }

    pub fn create_port_schema(&self, port: PortSchema) -> CartaResult<PortSchema> {
        self.write(|tx| tx.create_port_schema(port))
    }

    pub fn delete_port_schema(&self, id: &str) -> CartaResult<()> {
        self.write(|tx| tx.delete_port_schema(id))
    }

    pub fn create_schema_group(&self, group: SchemaGroup) -> CartaResult<SchemaGroup> {
        self.write(|tx| tx.create_schema_group(group))
    }

    pub fn delete_schema_group(&self, id: &str) -> CartaResult<()> {
        self.write(|tx| tx.delete_schema_group(id))
    }

    pub fn create_schema_package(&self, package: SchemaPackage) -> CartaResult<SchemaPackage> {
        self.write(|tx| tx.create_schema_package(package))
    }

    pub fn delete_schema_package(&self, id: &str) -> CartaResult<()> {
        self.write(|tx| tx.delete_schema_package(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{service_schema, seeded_document};
    use serde_json::json;

    fn port_named(id: &str) -> PortSchema {
        builtin_port_schemas().into_iter().find(|p| p.id == id).unwrap()
    }

    #[test]
    fn test_flow_ports_connect_one_way() {
        assert!(can_connect(&port_named("flow-out"), &port_named("flow-in")));
        assert!(!can_connect(&port_named("flow-in"), &port_named("flow-out")));
        assert!(!can_connect(&port_named("flow-out"), &port_named("flow-out")));
    }

    #[test]
    fn test_wildcard_ports() {
        assert!(can_connect(&port_named("flow-out"), &port_named("intercept")));
        assert!(can_connect(&port_named("relay"), &port_named("child")));
        assert!(!can_connect(&port_named("intercept"), &port_named("flow-in")));
    }

    #[test]
    fn test_symmetric_ports() {
        assert!(can_connect(&port_named("symmetric"), &port_named("symmetric")));
        assert!(!can_connect(&port_named("symmetric"), &port_named("flow-in")));
    }

    #[test]
    fn test_duplicate_schema_rejected() {
        let (doc, _) = seeded_document();
        let err = doc.create_schema(service_schema()).unwrap_err();
        assert!(matches!(err, CartaError::AlreadyExists { kind: EntityKind::Schema, .. }));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let mut schema = service_schema();
        schema.schema_type = "dup".into();
        let field = schema.fields[0].clone();
        schema.fields.push(field);
        assert!(matches!(
            validate_schema(&schema),
            Err(CartaError::AlreadyExists { kind: EntityKind::Field, .. })
        ));
    }

    #[test]
    fn test_update_schema_rejects_structural_keys() {
        let (doc, _) = seeded_document();
        let err = doc
            .update_schema("service", &json!({ "fields": [] }))
            .unwrap_err();
        assert!(matches!(err, CartaError::Forbidden(_)));

        let updated = doc
            .update_schema("service", &json!({ "displayName": "Microservice", "color": "#000" }))
            .unwrap();
        assert_eq!(updated.display_name, "Microservice");
        assert_eq!(doc.get_schema("service").unwrap().color, "#000");
    }

    #[test]
    fn test_delete_schema_requires_cascade_with_instances() {
        let (doc, page) = seeded_document();
        doc.create_construct(&page, "service", Default::default(), None, None)
            .unwrap();

        assert!(doc.delete_schema("service", false).is_err());
        assert_eq!(doc.delete_schema("service", true).unwrap(), 1);
        assert!(doc.get_schema("service").is_none());
        assert!(doc.list_constructs(&page).is_empty());
    }

    #[test]
    fn test_delete_port_schema_in_use() {
        let (doc, _) = seeded_document();
        assert!(matches!(
            doc.delete_port_schema("flow-in"),
            Err(CartaError::InvalidReference(_))
        ));
        assert!(doc.delete_port_schema("symmetric").is_ok());
    }

    #[test]
    fn test_group_delete_ungroups_schemas() {
        let (doc, _) = seeded_document();
        doc.create_schema_group(SchemaGroup {
            id: "infra".into(),
            name: "Infrastructure".into(),
            description: None,
            parent_id: None,
            package_id: None,
        })
        .unwrap();
        doc.update_schema("service", &json!({ "groupId": "infra" })).unwrap();

        doc.delete_schema_group("infra").unwrap();
        assert_eq!(doc.get_schema("service").unwrap().group_id, None);
    }
}
