//! Named entry points over the engine.
//!
//! Every tool takes `(params, document, page_id)`, decodes its JSON
//! parameters, runs one engine operation and wraps the outcome in a
//! [`ToolResponse`]. Nothing escapes this boundary: decoding failures and
//! engine errors both come back as `{ "success": false, "error": ... }`.
//!
//! Single-target lookups that the engine reports as `None`/`false` surface
//! here as not-found errors so callers get a message instead of `null`.

use crate::bulk::{nullable, ConnectSpec, ConstructSpec};
use crate::document::DiagramDocument;
use crate::layout::{ArrangeOptions, FlowOptions};
use crate::model::{
    ConstructSchema, FieldSchema, FieldType, Node, PinDirection, PortConfig, PortSchema, SchemaGroup,
    SchemaPackage, Values,
};
use crate::organizers::{NewOrganizer, OrganizerPatch};
use crate::pages::PagePatch;
use carta_common::{CartaError, CartaResult, EntityKind, Position};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

pub const TOOL_NAMES: &[&str] = &[
    // pages
    "list_pages",
    "get_page",
    "create_page",
    "update_page",
    "delete_page",
    "set_active_page",
    "duplicate_page",
    // schemas
    "list_schemas",
    "get_schema",
    "create_schema",
    "update_schema",
    "delete_schema",
    "list_port_schemas",
    "create_port_schema",
    "delete_port_schema",
    "list_schema_groups",
    "create_schema_group",
    "delete_schema_group",
    "list_schema_packages",
    "create_schema_package",
    "delete_schema_package",
    // graph
    "list_constructs",
    "list_organizers",
    "list_edges",
    "get_construct",
    "get_organizer",
    "organizer_members",
    "wagons_of",
    "connections_of",
    "page_summary",
    // constructs
    "create_construct",
    "update_construct",
    "delete_construct",
    "move_construct",
    "connect",
    "disconnect",
    // organizers
    "create_organizer",
    "update_organizer",
    "move_organizer",
    "delete_organizer",
    "attach_wagon",
    "detach_wagon",
    // bulk
    "create_constructs_bulk",
    "connect_bulk",
    "delete_constructs_bulk",
    "batch_mutate",
    // layout
    "flow_layout",
    "arrange_layout",
    "add_pin_constraint",
    "remove_pin_constraint",
    "list_pin_constraints",
    "apply_pin_layout",
    // migration
    "rename_field",
    "remove_field",
    "add_field",
    "rename_port",
    "remove_port",
    "add_port",
    "rename_schema_type",
    "change_field_type",
    "narrow_enum_options",
    "change_port_type",
    // repair
    "find_orphans",
    "repair_connections",
    "rebuild_page",
];

/// Run tool `name` against `page_id`
pub fn execute_tool(doc: &DiagramDocument, name: &str, params: &Value, page_id: &str) -> ToolResponse {
    match dispatch(doc, name, params, page_id) {
        Ok(data) => {
            debug!(tool = name, page_id, "Tool succeeded");
            ToolResponse::ok(data)
        }
        Err(err) => {
            warn!(tool = name, page_id, error = %err, "Tool failed");
            ToolResponse::failed(err)
        }
    }
}

fn decode<P: DeserializeOwned>(tool: &str, params: &Value) -> CartaResult<P> {
    let params = match params {
        Value::Null => json!({}),
        other => other.clone(),
    };
    serde_json::from_value(params).map_err(|err| {
        CartaError::ValidationFailure(format!("Invalid parameters for '{}': {}", tool, err))
    })
}

fn data<T: Serialize>(value: T) -> CartaResult<Value> {
    Ok(serde_json::to_value(value)?)
}

fn nodes(nodes: impl IntoIterator<Item = Node>) -> Value {
    Value::Array(nodes.into_iter().map(|n| n.to_value()).collect())
}

fn found<T>(value: Option<T>, kind: EntityKind, id: &str) -> CartaResult<T> {
    value.ok_or_else(|| CartaError::not_found(kind, id))
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TargetPage {
    /// Overrides the page the tool was invoked on
    page_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePageParams {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePageParams {
    #[serde(default)]
    page_id: Option<String>,
    #[serde(flatten)]
    patch: PagePatch,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DuplicatePageParams {
    page_id: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SchemaRef {
    #[serde(rename = "type")]
    schema_type: String,
}

#[derive(Debug, Deserialize)]
struct UpdateSchemaParams {
    #[serde(rename = "type")]
    schema_type: String,
    patch: Value,
}

#[derive(Debug, Deserialize)]
struct DeleteSchemaParams {
    #[serde(rename = "type")]
    schema_type: String,
    #[serde(default)]
    cascade: bool,
}

#[derive(Debug, Deserialize)]
struct IdRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SemanticRef {
    semantic_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrganizerRef {
    organizer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateConstructParams {
    construct_type: String,
    #[serde(default)]
    values: Values,
    #[serde(default)]
    position: Option<Position>,
    #[serde(default)]
    parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateConstructParams {
    semantic_id: String,
    #[serde(default)]
    values: Option<Values>,
    #[serde(default, deserialize_with = "nullable")]
    instance_color: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveConstructParams {
    semantic_id: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    position: Option<Position>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DisconnectParams {
    source_semantic_id: String,
    source_port_id: String,
    target_semantic_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateOrganizerParams {
    organizer_id: String,
    #[serde(flatten)]
    patch: OrganizerPatch,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveOrganizerParams {
    organizer_id: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    position: Option<Position>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOrganizerParams {
    organizer_id: String,
    #[serde(default)]
    delete_members: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WagonParams {
    organizer_id: String,
    semantic_id: String,
}

#[derive(Debug, Deserialize)]
struct BulkCreateParams {
    constructs: Vec<ConstructSpec>,
}

#[derive(Debug, Deserialize)]
struct BulkConnectParams {
    connections: Vec<ConnectSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkDeleteParams {
    semantic_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchParams {
    operations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPinParams {
    source_organizer_id: String,
    target_organizer_id: String,
    direction: PinDirection,
    #[serde(default)]
    gap: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemovePinParams {
    constraint_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenameParams {
    schema_type: String,
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FieldRef {
    schema_type: String,
    field_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddFieldParams {
    schema_type: String,
    field: FieldSchema,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortRef {
    schema_type: String,
    port_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddPortParams {
    schema_type: String,
    port: PortConfig,
}

#[derive(Debug, Deserialize)]
struct RenameTypeParams {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeFieldTypeParams {
    schema_type: String,
    field_name: String,
    new_type: FieldType,
    #[serde(default)]
    options: Option<Vec<String>>,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NarrowEnumParams {
    schema_type: String,
    field_name: String,
    options: Vec<String>,
    #[serde(default)]
    value_mapping: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangePortTypeParams {
    schema_type: String,
    port_id: String,
    new_port_type: String,
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

fn dispatch(doc: &DiagramDocument, name: &str, params: &Value, page_id: &str) -> CartaResult<Value> {
    match name {
        // pages
        "list_pages" => data(doc.list_pages()),
        "get_page" => {
            let p: TargetPage = decode(name, params)?;
            let id = p.page_id.as_deref().unwrap_or(page_id);
            data(found(doc.get_page(id), EntityKind::Page, id)?)
        }
        "create_page" => {
            let p: CreatePageParams = decode(name, params)?;
            data(doc.create_page(&p.name, p.description.as_deref()))
        }
        "update_page" => {
            let p: UpdatePageParams = decode(name, params)?;
            let id = p.page_id.as_deref().unwrap_or(page_id);
            data(found(doc.update_page(id, &p.patch), EntityKind::Page, id)?)
        }
        "delete_page" => {
            let p: TargetPage = decode(name, params)?;
            let id = p.page_id.as_deref().unwrap_or(page_id);
            doc.delete_page(id)?;
            Ok(json!({ "deleted": id }))
        }
        "set_active_page" => {
            let p: TargetPage = decode(name, params)?;
            let id = p.page_id.as_deref().unwrap_or(page_id);
            doc.set_active_page(id)?;
            Ok(json!({ "activePageId": id }))
        }
        "duplicate_page" => {
            let p: DuplicatePageParams = decode(name, params)?;
            let id = p.page_id.as_deref().unwrap_or(page_id);
            data(doc.duplicate_page(id, p.name.as_deref())?)
        }

        // schemas
        "list_schemas" => data(doc.list_schemas()),
        "get_schema" => {
            let p: SchemaRef = decode(name, params)?;
            data(found(doc.get_schema(&p.schema_type), EntityKind::Schema, &p.schema_type)?)
        }
        "create_schema" => data(doc.create_schema(decode::<ConstructSchema>(name, params)?)?),
        "update_schema" => {
            let p: UpdateSchemaParams = decode(name, params)?;
            data(doc.update_schema(&p.schema_type, &p.patch)?)
        }
        "delete_schema" => {
            let p: DeleteSchemaParams = decode(name, params)?;
            let removed = doc.delete_schema(&p.schema_type, p.cascade)?;
            Ok(json!({ "deleted": p.schema_type, "instancesRemoved": removed }))
        }
        "list_port_schemas" => data(doc.list_port_schemas()),
        "create_port_schema" => data(doc.create_port_schema(decode::<PortSchema>(name, params)?)?),
        "delete_port_schema" => {
            let p: IdRef = decode(name, params)?;
            doc.delete_port_schema(&p.id)?;
            Ok(json!({ "deleted": p.id }))
        }
        "list_schema_groups" => data(doc.read(|tx| tx.schema_groups())),
        "create_schema_group" => data(doc.create_schema_group(decode::<SchemaGroup>(name, params)?)?),
        "delete_schema_group" => {
            let p: IdRef = decode(name, params)?;
            doc.delete_schema_group(&p.id)?;
            Ok(json!({ "deleted": p.id }))
        }
        "list_schema_packages" => data(doc.read(|tx| tx.schema_packages())),
        "create_schema_package" => {
            data(doc.create_schema_package(decode::<SchemaPackage>(name, params)?)?)
        }
        "delete_schema_package" => {
            let p: IdRef = decode(name, params)?;
            doc.delete_schema_package(&p.id)?;
            Ok(json!({ "deleted": p.id }))
        }

        // graph
        "list_constructs" => Ok(nodes(doc.list_constructs(page_id).into_iter().map(Node::Construct))),
        "list_organizers" => Ok(nodes(doc.list_organizers(page_id))),
        "list_edges" => data(doc.list_edges(page_id)),
        "get_construct" => {
            let p: SemanticRef = decode(name, params)?;
            let construct = found(
                doc.get_construct(page_id, &p.semantic_id),
                EntityKind::Construct,
                &p.semantic_id,
            )?;
            Ok(Node::Construct(construct).to_value())
        }
        "get_organizer" => {
            let p: OrganizerRef = decode(name, params)?;
            let organizer = found(
                doc.get_organizer(page_id, &p.organizer_id),
                EntityKind::Organizer,
                &p.organizer_id,
            )?;
            Ok(organizer.to_value())
        }
        "organizer_members" => {
            let p: OrganizerRef = decode(name, params)?;
            Ok(nodes(doc.organizer_members(page_id, &p.organizer_id)))
        }
        "wagons_of" => {
            let p: SemanticRef = decode(name, params)?;
            Ok(nodes(doc.wagons_of(page_id, &p.semantic_id).into_iter().map(Node::Wagon)))
        }
        "connections_of" => {
            let p: SemanticRef = decode(name, params)?;
            data(doc.connections_of(page_id, &p.semantic_id))
        }
        "page_summary" => data(doc.page_summary(page_id)),

        // constructs
        "create_construct" => {
            let p: CreateConstructParams = decode(name, params)?;
            let construct = doc.create_construct(
                page_id,
                &p.construct_type,
                p.values,
                p.position,
                p.parent_id.as_deref(),
            )?;
            Ok(Node::Construct(construct).to_value())
        }
        "update_construct" => {
            let p: UpdateConstructParams = decode(name, params)?;
            let color = p.instance_color.as_ref().map(|c| c.as_deref());
            let construct = found(
                doc.update_construct(page_id, &p.semantic_id, p.values.as_ref(), color),
                EntityKind::Construct,
                &p.semantic_id,
            )?;
            Ok(Node::Construct(construct).to_value())
        }
        "delete_construct" => {
            let p: SemanticRef = decode(name, params)?;
            if !doc.delete_construct(page_id, &p.semantic_id) {
                return Err(CartaError::not_found(EntityKind::Construct, &p.semantic_id));
            }
            Ok(json!({ "deleted": p.semantic_id }))
        }
        "move_construct" => {
            let p: MoveConstructParams = decode(name, params)?;
            let moved = doc.move_construct(page_id, &p.semantic_id, p.parent_id.as_deref(), p.position)?;
            let construct = found(moved, EntityKind::Construct, &p.semantic_id)?;
            Ok(Node::Construct(construct).to_value())
        }
        "connect" => {
            let p: ConnectSpec = decode(name, params)?;
            let edge = doc
                .connect(
                    page_id,
                    &p.source_semantic_id,
                    &p.source_port_id,
                    &p.target_semantic_id,
                    &p.target_port_id,
                )
                .map_err(|err| CartaError::InvalidReference(err.to_string()))?;
            data(edge)
        }
        "disconnect" => {
            let p: DisconnectParams = decode(name, params)?;
            let removed = doc.disconnect(page_id, &p.source_semantic_id, &p.source_port_id, &p.target_semantic_id);
            if !removed {
                return Err(CartaError::not_found(
                    EntityKind::Edge,
                    format!("{}.{} -> {}", p.source_semantic_id, p.source_port_id, p.target_semantic_id),
                ));
            }
            Ok(json!({ "disconnected": true }))
        }

        // organizers
        "create_organizer" => Ok(doc.create_organizer(page_id, decode::<NewOrganizer>(name, params)?)?.to_value()),
        "update_organizer" => {
            let p: UpdateOrganizerParams = decode(name, params)?;
            let organizer = found(
                doc.update_organizer(page_id, &p.organizer_id, &p.patch),
                EntityKind::Organizer,
                &p.organizer_id,
            )?;
            Ok(organizer.to_value())
        }
        "move_organizer" => {
            let p: MoveOrganizerParams = decode(name, params)?;
            let moved = doc.move_organizer(page_id, &p.organizer_id, p.parent_id.as_deref(), p.position)?;
            Ok(found(moved, EntityKind::Organizer, &p.organizer_id)?.to_value())
        }
        "delete_organizer" => {
            let p: DeleteOrganizerParams = decode(name, params)?;
            if !doc.delete_organizer(page_id, &p.organizer_id, p.delete_members) {
                return Err(CartaError::not_found(EntityKind::Organizer, &p.organizer_id));
            }
            Ok(json!({ "deleted": p.organizer_id }))
        }
        "attach_wagon" => {
            let p: WagonParams = decode(name, params)?;
            Ok(doc.attach_wagon(page_id, &p.organizer_id, &p.semantic_id)?.to_value())
        }
        "detach_wagon" => {
            let p: OrganizerRef = decode(name, params)?;
            Ok(doc.detach_wagon(page_id, &p.organizer_id)?.to_value())
        }

        // bulk
        "create_constructs_bulk" => {
            let p: BulkCreateParams = decode(name, params)?;
            data(doc.create_constructs_bulk(page_id, p.constructs))
        }
        "connect_bulk" => {
            let p: BulkConnectParams = decode(name, params)?;
            data(doc.connect_bulk(page_id, &p.connections))
        }
        "delete_constructs_bulk" => {
            let p: BulkDeleteParams = decode(name, params)?;
            data(doc.delete_constructs_bulk(page_id, &p.semantic_ids))
        }
        "batch_mutate" => {
            let p: BatchParams = decode(name, params)?;
            data(doc.batch_mutate(page_id, p.operations))
        }

        // layout
        "flow_layout" => data(doc.flow_layout(page_id, decode::<FlowOptions>(name, params)?)),
        "arrange_layout" => data(doc.arrange_layout(page_id, decode::<ArrangeOptions>(name, params)?)),
        "add_pin_constraint" => {
            let p: AddPinParams = decode(name, params)?;
            data(doc.add_pin_constraint(
                page_id,
                &p.source_organizer_id,
                &p.target_organizer_id,
                p.direction,
                p.gap,
            )?)
        }
        "remove_pin_constraint" => {
            let p: RemovePinParams = decode(name, params)?;
            if !doc.remove_pin_constraint(page_id, &p.constraint_id) {
                return Err(CartaError::not_found(EntityKind::PinConstraint, &p.constraint_id));
            }
            Ok(json!({ "deleted": p.constraint_id }))
        }
        "list_pin_constraints" => data(doc.list_pin_constraints(page_id)),
        "apply_pin_layout" => data(doc.apply_pin_layout(page_id)),

        // migration
        "rename_field" => {
            let p: RenameParams = decode(name, params)?;
            data(doc.rename_field(&p.schema_type, &p.from, &p.to)?)
        }
        "remove_field" => {
            let p: FieldRef = decode(name, params)?;
            data(doc.remove_field(&p.schema_type, &p.field_name)?)
        }
        "add_field" => {
            let p: AddFieldParams = decode(name, params)?;
            data(doc.add_field(&p.schema_type, p.field)?)
        }
        "rename_port" => {
            let p: RenameParams = decode(name, params)?;
            data(doc.rename_port(&p.schema_type, &p.from, &p.to)?)
        }
        "remove_port" => {
            let p: PortRef = decode(name, params)?;
            data(doc.remove_port(&p.schema_type, &p.port_id)?)
        }
        "add_port" => {
            let p: AddPortParams = decode(name, params)?;
            data(doc.add_port(&p.schema_type, p.port)?)
        }
        "rename_schema_type" => {
            let p: RenameTypeParams = decode(name, params)?;
            data(doc.rename_schema_type(&p.from, &p.to)?)
        }
        "change_field_type" => {
            let p: ChangeFieldTypeParams = decode(name, params)?;
            data(doc.change_field_type(&p.schema_type, &p.field_name, p.new_type, p.options, p.force)?)
        }
        "narrow_enum_options" => {
            let p: NarrowEnumParams = decode(name, params)?;
            data(doc.narrow_enum_options(&p.schema_type, &p.field_name, p.options, &p.value_mapping)?)
        }
        "change_port_type" => {
            let p: ChangePortTypeParams = decode(name, params)?;
            data(doc.change_port_type(&p.schema_type, &p.port_id, &p.new_port_type)?)
        }

        // repair
        "find_orphans" => data(doc.find_orphans(page_id)),
        "repair_connections" => data(doc.repair_connections(page_id)),
        "rebuild_page" => data(doc.rebuild_page(page_id)),

        _ => Err(CartaError::ValidationFailure(format!("Unknown tool '{}'", name))),
    }
}
