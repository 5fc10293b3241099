//! # Schema Migrations
//!
//! Structural schema edits that carry every instance, edge and connection
//! along with them, on every page. Each operation validates first and writes
//! after, inside the caller's transaction, so a failed precondition leaves
//! the document untouched and a successful one is observed whole.
//!
//! Value coercion for [`DocWrite::change_field_type`]:
//!
//! ```text
//! anything       -> same kind      kept
//! number/bool    -> string/text    formatted
//! string         -> number         parsed, else dropped
//! string         -> boolean        "true"/"false" only, else dropped
//! string/number  -> enum           kept when listed in the new options
//! everything else                  dropped
//! ```

use crate::document::{DiagramDocument, DocTxn, DocWrite};
use crate::model::{ConstructNode, ConstructSchema, FieldSchema, FieldType, PortConfig};
use crate::schema::validate_schema;
use carta_common::{CartaError, CartaResult, EntityKind};
use serde::Serialize;
use serde_json::{Number, Value};
use std::collections::{HashMap, HashSet};
use tracing::{info, instrument, warn};
use yrs::ReadTxn;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub schema_updated: bool,
    pub instances_updated: usize,
    pub edges_updated: usize,
    pub edges_removed: usize,
    pub warnings: Vec<String>,
    /// Set when nothing was written
    pub dry_run: bool,
    /// Instances whose value would be (or was) dropped
    pub data_loss_count: usize,
}

impl MigrationResult {
    fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

/// Convert `value` for a field of type `target`. `None` drops the value.
pub fn coerce_value(value: &Value, target: FieldType, options: Option<&[String]>) -> Option<Value> {
    let listed = |s: &str| options.is_some_and(|opts| opts.iter().any(|o| o == s));
    match (target, value) {
        (_, Value::Null) => Some(Value::Null),
        (FieldType::Number, Value::Number(_)) => Some(value.clone()),
        (FieldType::Number, Value::String(s)) => s.trim().parse::<f64>().ok().and_then(number),
        (FieldType::Boolean, Value::Bool(_)) => Some(value.clone()),
        (FieldType::Boolean, Value::String(s)) => match s.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldType::String | FieldType::Text | FieldType::Date, Value::String(_)) => Some(value.clone()),
        (FieldType::String | FieldType::Text, Value::Number(n)) => Some(Value::String(n.to_string())),
        (FieldType::String | FieldType::Text, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (FieldType::Enum, Value::String(s)) if listed(s) => Some(value.clone()),
        (FieldType::Enum, Value::Number(n)) if listed(&n.to_string()) => Some(Value::String(n.to_string())),
        _ => None,
    }
}

/// Whole numbers come back as integers
fn number(n: f64) -> Option<Value> {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Some(Value::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number)
    }
}

fn field_mut<'a>(schema: &'a mut ConstructSchema, name: &str) -> CartaResult<&'a mut FieldSchema> {
    let schema_type = schema.schema_type.clone();
    schema
        .fields
        .iter_mut()
        .find(|f| f.name == name)
        .ok_or_else(|| CartaError::not_found(EntityKind::Field, format!("{}.{}", schema_type, name)))
}

fn port_mut<'a>(schema: &'a mut ConstructSchema, id: &str) -> CartaResult<&'a mut PortConfig> {
    let schema_type = schema.schema_type.clone();
    schema
        .ports
        .iter_mut()
        .find(|p| p.id == id)
        .ok_or_else(|| CartaError::not_found(EntityKind::Port, format!("{}.{}", schema_type, id)))
}

impl<'doc, T: ReadTxn> DocTxn<'doc, T> {
    /// Every instance of `schema_type`, with the page it lives on
    pub fn instances_of(&self, schema_type: &str) -> Vec<(String, ConstructNode)> {
        let mut out = Vec::new();
        for page in self.node_page_ids() {
            for construct in self.constructs(&page) {
                if construct.data.construct_type == schema_type {
                    out.push((page.clone(), construct));
                }
            }
        }
        out
    }
}

impl<'doc> DocWrite<'doc> {
    #[instrument(skip(self))]
    pub fn rename_field(&mut self, schema_type: &str, from: &str, to: &str) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        if schema.field(to).is_some() {
            return Err(CartaError::already_exists(EntityKind::Field, to));
        }
        field_mut(&mut schema, from)?.name = to.to_string();
        if schema.display_field.as_deref() == Some(from) {
            schema.display_field = Some(to.to_string());
        }
        self.put_schema(&schema);

        let mut result = MigrationResult {
            schema_updated: true,
            ..Default::default()
        };
        for (page, instance) in self.instances_of(schema_type) {
            if let Some(value) = instance.data.values.get(from) {
                self.set_value(&page, &instance.id, to, value);
                self.remove_value(&page, &instance.id, from);
                result.instances_updated += 1;
            }
        }
        info!(schema_type, from, to, instances = result.instances_updated, "Renamed field");
        Ok(result)
    }

    #[instrument(skip(self))]
    pub fn remove_field(&mut self, schema_type: &str, name: &str) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        field_mut(&mut schema, name)?;
        schema.fields.retain(|f| f.name != name);
        if schema.display_field.as_deref() == Some(name) {
            schema.display_field = None;
        }
        self.put_schema(&schema);

        let mut result = MigrationResult {
            schema_updated: true,
            ..Default::default()
        };
        for (page, instance) in self.instances_of(schema_type) {
            if self.remove_value(&page, &instance.id, name) {
                result.instances_updated += 1;
            }
        }
        info!(schema_type, name, instances = result.instances_updated, "Removed field");
        Ok(result)
    }

    /// Append a field. A supplied default is written to every instance that
    /// has no value for it yet.
    #[instrument(skip(self, field), fields(field = %field.name))]
    pub fn add_field(&mut self, schema_type: &str, field: FieldSchema) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        if schema.field(&field.name).is_some() {
            return Err(CartaError::already_exists(EntityKind::Field, &field.name));
        }
        let default = field.default.clone().filter(|v| !v.is_null());
        let name = field.name.clone();
        schema.fields.push(field);
        validate_schema(&schema)?;
        self.put_schema(&schema);

        let mut result = MigrationResult {
            schema_updated: true,
            ..Default::default()
        };
        if let Some(default) = default {
            for (page, instance) in self.instances_of(schema_type) {
                if !instance.data.values.contains_key(&name) {
                    self.set_value(&page, &instance.id, &name, &default);
                    result.instances_updated += 1;
                }
            }
        }
        info!(schema_type, instances = result.instances_updated, "Added field");
        Ok(result)
    }

    /// Rename a port id on a schema, following it through the instances'
    /// connections, edge handles, and connections of other nodes that
    /// target an instance through the old port.
    #[instrument(skip(self))]
    pub fn rename_port(&mut self, schema_type: &str, from: &str, to: &str) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        if schema.port(to).is_some() {
            return Err(CartaError::already_exists(EntityKind::Port, to));
        }
        port_mut(&mut schema, from)?.id = to.to_string();
        self.put_schema(&schema);

        let mut result = MigrationResult {
            schema_updated: true,
            ..Default::default()
        };
        for page in self.node_page_ids() {
            let constructs = self.constructs(&page);
            let instance_ids: HashSet<&str> = constructs
                .iter()
                .filter(|c| c.data.construct_type == schema_type)
                .map(|c| c.id.as_str())
                .collect();
            if instance_ids.is_empty() {
                continue;
            }
            let instance_sids: HashSet<&str> = constructs
                .iter()
                .filter(|c| instance_ids.contains(c.id.as_str()))
                .map(|c| c.semantic_id())
                .collect();

            for construct in &constructs {
                let own = instance_ids.contains(construct.id.as_str());
                let rewritten = self.rewrite_connections(&page, &construct.id, |c| {
                    let source_side = own && c.port_id == from;
                    let target_side =
                        instance_sids.contains(c.target_semantic_id.as_str()) && c.target_port_id == from;
                    if !source_side && !target_side {
                        return None;
                    }
                    let mut next = c.clone();
                    if source_side {
                        next.port_id = to.to_string();
                    }
                    if target_side {
                        next.target_port_id = to.to_string();
                    }
                    Some(next)
                });
                if rewritten > 0 {
                    result.instances_updated += 1;
                }
            }

            for mut edge in self.edges(&page) {
                let mut changed = false;
                if instance_ids.contains(edge.source.as_str()) && edge.source_handle == from {
                    edge.source_handle = to.to_string();
                    changed = true;
                }
                if instance_ids.contains(edge.target.as_str()) && edge.target_handle == from {
                    edge.target_handle = to.to_string();
                    changed = true;
                }
                if changed {
                    self.insert_edge(&page, &edge);
                    result.edges_updated += 1;
                }
            }
        }
        info!(
            schema_type,
            from,
            to,
            instances = result.instances_updated,
            edges = result.edges_updated,
            "Renamed port"
        );
        Ok(result)
    }

    /// Drop a port, every edge using it on an instance, and every connection
    /// entry through it in either direction
    #[instrument(skip(self))]
    pub fn remove_port(&mut self, schema_type: &str, port_id: &str) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        port_mut(&mut schema, port_id)?;
        schema.ports.retain(|p| p.id != port_id);
        self.put_schema(&schema);

        let mut result = MigrationResult {
            schema_updated: true,
            ..Default::default()
        };
        for page in self.node_page_ids() {
            let constructs = self.constructs(&page);
            let instance_ids: HashSet<&str> = constructs
                .iter()
                .filter(|c| c.data.construct_type == schema_type)
                .map(|c| c.id.as_str())
                .collect();
            if instance_ids.is_empty() {
                continue;
            }
            let instance_sids: HashSet<&str> = constructs
                .iter()
                .filter(|c| instance_ids.contains(c.id.as_str()))
                .map(|c| c.semantic_id())
                .collect();

            for construct in &constructs {
                let own = instance_ids.contains(construct.id.as_str());
                let pruned = self.retain_connections(&page, &construct.id, |c| match c {
                    Some(c) => {
                        !(own && c.port_id == port_id)
                            && !(instance_sids.contains(c.target_semantic_id.as_str()) && c.target_port_id == port_id)
                    }
                    None => true,
                });
                if pruned > 0 {
                    result.instances_updated += 1;
                }
            }

            for edge in self.edges(&page) {
                let uses = (instance_ids.contains(edge.source.as_str()) && edge.source_handle == port_id)
                    || (instance_ids.contains(edge.target.as_str()) && edge.target_handle == port_id);
                if uses && self.remove_edge(&page, &edge.id) {
                    result.edges_removed += 1;
                }
            }
        }
        info!(schema_type, port_id, edges_removed = result.edges_removed, "Removed port");
        Ok(result)
    }

    #[instrument(skip(self, port), fields(port = %port.id))]
    pub fn add_port(&mut self, schema_type: &str, port: PortConfig) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        if schema.port(&port.id).is_some() {
            return Err(CartaError::already_exists(EntityKind::Port, &port.id));
        }
        if self.port_schema(&port.port_type).is_none() {
            return Err(CartaError::not_found(EntityKind::PortSchema, &port.port_type));
        }
        schema.ports.push(port);
        self.put_schema(&schema);
        Ok(MigrationResult {
            schema_updated: true,
            ..Default::default()
        })
    }

    /// Re-key a schema. Instances keep their semantic ids; `suggestedTypes`
    /// in every schema's ports follow the new name.
    #[instrument(skip(self))]
    pub fn rename_schema_type(&mut self, from: &str, to: &str) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(from)?;
        if schema.built_in {
            return Err(CartaError::Forbidden(format!("Built-in schema '{}' cannot be renamed", from)));
        }
        if to.trim().is_empty() {
            return Err(CartaError::ValidationFailure("Schema type must not be empty".into()));
        }
        if self.schema(to).is_some() {
            return Err(CartaError::already_exists(EntityKind::Schema, to));
        }

        self.remove_schema(from);
        schema.schema_type = to.to_string();
        self.put_schema(&schema);

        let mut result = MigrationResult {
            schema_updated: true,
            ..Default::default()
        };
        for (page, instance) in self.instances_of(from) {
            self.set_data_field(&page, &instance.id, "constructType", Some(&Value::String(to.to_string())));
            result.instances_updated += 1;
        }

        for mut other in self.schemas() {
            let mut touched = false;
            for port in &mut other.ports {
                for suggested in port.suggested_types.iter_mut().flatten() {
                    if suggested.as_str() == from {
                        *suggested = to.to_string();
                        touched = true;
                    }
                }
            }
            if touched {
                self.put_schema(&other);
            }
        }
        info!(from, to, instances = result.instances_updated, "Renamed schema type");
        Ok(result)
    }

    /// Change a field's type. Without `force` this only reports what the
    /// coercion would drop; nothing is written.
    #[instrument(skip(self, options))]
    pub fn change_field_type(
        &mut self,
        schema_type: &str,
        field_name: &str,
        new_type: FieldType,
        options: Option<Vec<String>>,
        force: bool,
    ) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        let field = field_mut(&mut schema, field_name)?;
        field.field_type = new_type;
        field.options = if new_type == FieldType::Enum { options } else { None };
        let new_options = field.options.clone();
        validate_schema(&schema)?;

        let mut result = MigrationResult {
            dry_run: !force,
            ..Default::default()
        };
        let mut writes = Vec::new();
        for (page, instance) in self.instances_of(schema_type) {
            let Some(value) = instance.data.values.get(field_name) else {
                continue;
            };
            let coerced = coerce_value(value, new_type, new_options.as_deref());
            if coerced.is_none() {
                result.data_loss_count += 1;
                result.warn(format!(
                    "Value {} of '{}' on {} cannot be converted and would be dropped",
                    value,
                    field_name,
                    instance.semantic_id()
                ));
            }
            if coerced.as_ref() != Some(value) {
                writes.push((page, instance.id.clone(), coerced));
            }
        }

        if !force {
            info!(schema_type, field_name, lossy = result.data_loss_count, "Field type change dry run");
            return Ok(result);
        }

        self.put_schema(&schema);
        result.schema_updated = true;
        for (page, node_id, coerced) in writes {
            match coerced {
                Some(value) => self.set_value(&page, &node_id, field_name, &value),
                None => {
                    self.remove_value(&page, &node_id, field_name);
                }
            }
            result.instances_updated += 1;
        }
        info!(
            schema_type,
            field_name,
            instances = result.instances_updated,
            dropped = result.data_loss_count,
            "Changed field type"
        );
        Ok(result)
    }

    /// Replace an enum field's options. Values no longer listed go through
    /// `value_mapping`; unmapped ones are cleared.
    #[instrument(skip(self, options, value_mapping))]
    pub fn narrow_enum_options(
        &mut self,
        schema_type: &str,
        field_name: &str,
        options: Vec<String>,
        value_mapping: &HashMap<String, String>,
    ) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        let field = field_mut(&mut schema, field_name)?;
        if field.field_type != FieldType::Enum {
            return Err(CartaError::ValidationFailure(format!(
                "Field '{}' of '{}' is not an enum",
                field_name, schema_type
            )));
        }
        field.options = Some(options.clone());
        validate_schema(&schema)?;
        self.put_schema(&schema);

        let mut result = MigrationResult {
            schema_updated: true,
            ..Default::default()
        };
        for (page, instance) in self.instances_of(schema_type) {
            let Some(current) = instance.data.values.get(field_name).and_then(Value::as_str) else {
                continue;
            };
            if options.iter().any(|o| o == current) {
                continue;
            }
            match value_mapping.get(current).filter(|m| options.contains(m)) {
                Some(mapped) => {
                    self.set_value(&page, &instance.id, field_name, &Value::String(mapped.clone()));
                }
                None => {
                    self.remove_value(&page, &instance.id, field_name);
                    result.data_loss_count += 1;
                    result.warn(format!(
                        "Cleared '{}' from '{}' on {}: no longer an option",
                        current,
                        field_name,
                        instance.semantic_id()
                    ));
                }
            }
            result.instances_updated += 1;
        }
        info!(schema_type, field_name, instances = result.instances_updated, "Narrowed enum options");
        Ok(result)
    }

    /// Retype a port and drop the edges (with their connection entries) that
    /// the new type can no longer carry
    #[instrument(skip(self))]
    pub fn change_port_type(
        &mut self,
        schema_type: &str,
        port_id: &str,
        new_type: &str,
    ) -> CartaResult<MigrationResult> {
        let mut schema = self.require_schema(schema_type)?;
        if self.port_schema(new_type).is_none() {
            return Err(CartaError::not_found(EntityKind::PortSchema, new_type));
        }
        port_mut(&mut schema, port_id)?.port_type = new_type.to_string();
        self.put_schema(&schema);

        let mut result = MigrationResult {
            schema_updated: true,
            ..Default::default()
        };
        for page in self.node_page_ids() {
            let index = self.node_index(&page);
            let touches = |id: &str, handle: &str| {
                handle == port_id
                    && index
                        .get(id)
                        .and_then(|n| n.as_construct())
                        .is_some_and(|c| c.data.construct_type == schema_type)
            };

            for edge in self.edges(&page) {
                if !touches(&edge.source, &edge.source_handle) && !touches(&edge.target, &edge.target_handle) {
                    continue;
                }
                let (Some(source), Some(target)) = (
                    index.get(&edge.source).and_then(|n| n.as_construct()),
                    index.get(&edge.target).and_then(|n| n.as_construct()),
                ) else {
                    continue;
                };
                let source_type = self.port_type_of(source.construct_type(), &edge.source_handle);
                let target_type = self.port_type_of(target.construct_type(), &edge.target_handle);
                let compatible = match (&source_type, &target_type) {
                    (Some(s), Some(t)) => self.can_connect_port_types(s, t),
                    _ => false,
                };
                if compatible {
                    continue;
                }

                self.remove_edge(&page, &edge.id);
                result.edges_removed += 1;
                let target_sid = target.semantic_id().to_string();
                let mut dropped = false;
                self.retain_connections(&page, &source.id, |c| match c {
                    Some(c)
                        if !dropped
                            && c.port_id == edge.source_handle
                            && c.target_semantic_id == target_sid
                            && c.target_port_id == edge.target_handle =>
                    {
                        dropped = true;
                        false
                    }
                    _ => true,
                });
                result.warn(format!(
                    "Removed edge {} ({} -> {}): ports no longer compatible",
                    edge.id,
                    source.semantic_id(),
                    target_sid
                ));
            }
        }
        info!(schema_type, port_id, new_type, edges_removed = result.edges_removed, "Changed port type");
        Ok(result)
    }
}

impl DiagramDocument {
    pub fn rename_field(&self, schema_type: &str, from: &str, to: &str) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.rename_field(schema_type, from, to))
    }

    pub fn remove_field(&self, schema_type: &str, name: &str) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.remove_field(schema_type, name))
    }

    pub fn add_field(&self, schema_type: &str, field: FieldSchema) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.add_field(schema_type, field))
    }

    pub fn rename_port(&self, schema_type: &str, from: &str, to: &str) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.rename_port(schema_type, from, to))
    }

    pub fn remove_port(&self, schema_type: &str, port_id: &str) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.remove_port(schema_type, port_id))
    }

    pub fn add_port(&self, schema_type: &str, port: PortConfig) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.add_port(schema_type, port))
    }

    pub fn rename_schema_type(&self, from: &str, to: &str) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.rename_schema_type(from, to))
    }

    pub fn change_field_type(
        &self,
        schema_type: &str,
        field_name: &str,
        new_type: FieldType,
        options: Option<Vec<String>>,
        force: bool,
    ) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.change_field_type(schema_type, field_name, new_type, options, force))
    }

    pub fn narrow_enum_options(
        &self,
        schema_type: &str,
        field_name: &str,
        options: Vec<String>,
        value_mapping: &HashMap<String, String>,
    ) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.narrow_enum_options(schema_type, field_name, options, value_mapping))
    }

    pub fn change_port_type(&self, schema_type: &str, port_id: &str, new_type: &str) -> CartaResult<MigrationResult> {
        self.write(|tx| tx.change_port_type(schema_type, port_id, new_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Values;
    use crate::testing::seeded_document;
    use serde_json::json;

    fn values(v: Value) -> Values {
        match v {
            Value::Object(map) => map,
            _ => Values::new(),
        }
    }

    #[test]
    fn test_coercion_rules() {
        let opts = vec!["a".to_string(), "1".to_string()];
        assert_eq!(coerce_value(&json!("42"), FieldType::Number, None), Some(json!(42)));
        assert_eq!(coerce_value(&json!("4.5"), FieldType::Number, None), Some(json!(4.5)));
        assert_eq!(coerce_value(&json!("x"), FieldType::Number, None), None);
        assert_eq!(coerce_value(&json!(7), FieldType::String, None), Some(json!("7")));
        assert_eq!(coerce_value(&json!("true"), FieldType::Boolean, None), Some(json!(true)));
        assert_eq!(coerce_value(&json!("yes"), FieldType::Boolean, None), None);
        assert_eq!(coerce_value(&json!("a"), FieldType::Enum, Some(opts.as_slice())), Some(json!("a")));
        assert_eq!(coerce_value(&json!(1), FieldType::Enum, Some(opts.as_slice())), Some(json!("1")));
        assert_eq!(coerce_value(&json!("b"), FieldType::Enum, Some(opts.as_slice())), None);
        assert_eq!(coerce_value(&json!(true), FieldType::Number, None), None);
        assert_eq!(coerce_value(&Value::Null, FieldType::Number, None), Some(Value::Null));
    }

    #[test]
    fn test_rename_field_across_pages() {
        let (doc, page) = seeded_document();
        let other = doc.create_page("Other", None);
        let a = doc
            .create_construct(&page, "service", values(json!({ "name": "api" })), None, None)
            .unwrap();
        let b = doc
            .create_construct(&other.id, "service", values(json!({ "name": "web" })), None, None)
            .unwrap();

        let result = doc.rename_field("service", "name", "title").unwrap();
        assert!(result.schema_updated);
        assert_eq!(result.instances_updated, 2);

        let schema = doc.get_schema("service").unwrap();
        assert!(schema.field("title").is_some());
        assert_eq!(schema.display_field.as_deref(), Some("title"));

        let a = doc.get_construct(&page, a.semantic_id()).unwrap();
        let b = doc.get_construct(&other.id, b.semantic_id()).unwrap();
        assert_eq!(a.data.values.get("title"), Some(&json!("api")));
        assert!(a.data.values.get("name").is_none());
        assert_eq!(b.data.values.get("title"), Some(&json!("web")));
    }

    #[test]
    fn test_rename_field_collision() {
        let (doc, _) = seeded_document();
        let err = doc.rename_field("service", "name", "replicas").unwrap_err();
        assert!(matches!(err, CartaError::AlreadyExists { kind: EntityKind::Field, .. }));
        assert!(doc.rename_field("service", "missing", "x").unwrap_err().is_not_found());
        assert!(doc.rename_field("nope", "name", "x").unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_field_clears_display_field() {
        let (doc, page) = seeded_document();
        doc.create_construct(&page, "service", values(json!({ "name": "api" })), None, None)
            .unwrap();
        let result = doc.remove_field("service", "name").unwrap();
        assert_eq!(result.instances_updated, 1);
        assert_eq!(doc.get_schema("service").unwrap().display_field, None);
    }

    #[test]
    fn test_add_field_writes_default() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "task", Values::new(), None, None).unwrap();
        let field: FieldSchema = serde_json::from_value(json!({
            "name": "owner", "label": "Owner", "type": "string", "default": "nobody"
        }))
        .unwrap();
        let result = doc.add_field("task", field).unwrap();
        assert_eq!(result.instances_updated, 1);
        let a = doc.get_construct(&page, a.semantic_id()).unwrap();
        assert_eq!(a.data.values.get("owner"), Some(&json!("nobody")));
    }

    #[test]
    fn test_remove_port_drops_edges_and_connections() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        doc.connect(&page, a.semantic_id(), "flow-out", b.semantic_id(), "flow-in")
            .unwrap();

        let result = doc.remove_port("service", "flow-in").unwrap();
        assert_eq!(result.edges_removed, 1);
        assert!(doc.list_edges(&page).is_empty());
        assert!(doc.connections_of(&page, a.semantic_id()).is_empty());
    }

    #[test]
    fn test_rename_schema_type() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "database", Values::new(), None, None).unwrap();
        let result = doc.rename_schema_type("database", "datastore").unwrap();
        assert_eq!(result.instances_updated, 1);
        assert!(doc.get_schema("database").is_none());

        let a = doc.get_construct(&page, a.semantic_id()).unwrap();
        assert_eq!(a.construct_type(), "datastore");
        let service = doc.get_schema("service").unwrap();
        let suggested = service.port("flow-out").unwrap().suggested_types.clone().unwrap();
        assert!(suggested.contains(&"datastore".to_string()));
    }

    #[test]
    fn test_change_field_type_dry_run_then_force() {
        let (doc, page) = seeded_document();
        let a = doc
            .create_construct(&page, "service", values(json!({ "name": "3" })), None, None)
            .unwrap();
        let b = doc
            .create_construct(&page, "service", values(json!({ "name": "api" })), None, None)
            .unwrap();

        let dry = doc
            .change_field_type("service", "name", FieldType::Number, None, false)
            .unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.data_loss_count, 1);
        assert_eq!(doc.get_schema("service").unwrap().field("name").unwrap().field_type, FieldType::String);

        let forced = doc
            .change_field_type("service", "name", FieldType::Number, None, true)
            .unwrap();
        assert!(!forced.dry_run);
        assert_eq!(forced.instances_updated, 2);
        let a = doc.get_construct(&page, a.semantic_id()).unwrap();
        let b = doc.get_construct(&page, b.semantic_id()).unwrap();
        assert_eq!(a.data.values.get("name"), Some(&json!(3)));
        assert!(b.data.values.get("name").is_none());
    }

    #[test]
    fn test_narrow_enum_options_with_mapping() {
        let (doc, page) = seeded_document();
        let a = doc
            .create_construct(&page, "service", values(json!({ "tier": "frontend" })), None, None)
            .unwrap();
        let b = doc
            .create_construct(&page, "service", values(json!({ "tier": "data" })), None, None)
            .unwrap();

        let mapping = HashMap::from([("frontend".to_string(), "edge".to_string())]);
        let result = doc
            .narrow_enum_options("service", "tier", vec!["edge".into(), "backend".into()], &mapping)
            .unwrap();
        assert_eq!(result.instances_updated, 2);
        assert_eq!(result.warnings.len(), 1);

        let a = doc.get_construct(&page, a.semantic_id()).unwrap();
        let b = doc.get_construct(&page, b.semantic_id()).unwrap();
        assert_eq!(a.data.values.get("tier"), Some(&json!("edge")));
        assert!(b.data.values.get("tier").is_none());
    }

    #[test]
    fn test_change_port_type_removes_incompatible_edges() {
        let (doc, page) = seeded_document();
        let a = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        let b = doc.create_construct(&page, "service", Values::new(), None, None).unwrap();
        doc.connect(&page, a.semantic_id(), "flow-out", b.semantic_id(), "flow-in")
            .unwrap();

        let result = doc.change_port_type("service", "flow-out", "symmetric").unwrap();
        assert_eq!(result.edges_removed, 1);
        assert!(doc.list_edges(&page).is_empty());
        assert!(doc.connections_of(&page, a.semantic_id()).is_empty());
        assert!(doc.change_port_type("service", "flow-out", "warp").unwrap_err().is_not_found());
    }
}
