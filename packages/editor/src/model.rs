//! # Document model
//!
//! Typed views of what lives in the replicated document. Nodes are read as a
//! JSON snapshot of their replicated map and classified into a closed sum
//! type so that the plain/organizer/wagon distinction is checked everywhere
//! it matters.

use carta_common::{Position, Rect, Size};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};

/// Field values keyed by field name
pub type Values = JsonMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Semantic mirror of an edge, stored on the source construct
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub port_id: String,
    pub target_semantic_id: String,
    pub target_port_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub source_handle: String,
    pub target_handle: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructData {
    pub construct_type: String,
    pub semantic_id: String,
    #[serde(default, deserialize_with = "lenient_values")]
    pub values: Values,
    #[serde(default, deserialize_with = "lenient_connections")]
    pub connections: Vec<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_color: Option<String>,
}

/// A non-object `values` (decayed or never written) reads as empty.
fn lenient_values<'de, D>(deserializer: D) -> Result<Values, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(map) => map,
        _ => Values::new(),
    })
}

/// Malformed connection entries are dropped rather than failing the node.
fn lenient_connections<'de, D>(deserializer: D) -> Result<Vec<Connection>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<Vec<Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizerData {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_organizer_color")]
    pub color: String,
    #[serde(default = "default_organizer_layout")]
    pub layout: String,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OrganizerData {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: default_organizer_color(),
            layout: default_organizer_layout(),
            collapsed: false,
            description: None,
        }
    }
}

fn default_organizer_color() -> String {
    "#7c8da6".to_string()
}

fn default_organizer_layout() -> String {
    "freeform".to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstructNode {
    pub id: String,
    pub position: Position,
    pub parent_id: Option<String>,
    pub size: Option<Size>,
    pub data: ConstructData,
}

impl ConstructNode {
    pub fn semantic_id(&self) -> &str {
        &self.data.semantic_id
    }

    pub fn construct_type(&self) -> &str {
        &self.data.construct_type
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrganizerNode {
    pub id: String,
    pub position: Position,
    pub parent_id: Option<String>,
    pub size: Size,
    pub data: OrganizerData,
}

/// An organizer bound to one construct's lifecycle
#[derive(Debug, Clone, PartialEq)]
pub struct WagonNode {
    pub organizer: OrganizerNode,
    pub attached_to_semantic_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Construct(ConstructNode),
    Organizer(OrganizerNode),
    Wagon(WagonNode),
}

/// Loose shape of a stored node, before classification
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    id: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    position: Option<Position>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
    #[serde(default)]
    style: Option<RawStyle>,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
struct RawStyle {
    #[serde(default)]
    width: Option<f64>,
    #[serde(default)]
    height: Option<f64>,
}

impl Node {
    /// Classify a node snapshot. `None` when the snapshot is too damaged to
    /// identify (no id, or neither construct nor organizer data).
    pub fn from_value(value: &Value, default_organizer_size: Size) -> Option<Node> {
        let raw: RawNode = serde_json::from_value(value.clone()).ok()?;
        let position = raw.position.unwrap_or_default();
        let is_organizer = raw.kind.as_deref() == Some("organizer")
            || raw.data.get("isOrganizer").and_then(Value::as_bool) == Some(true);

        if is_organizer {
            let style = raw.style.unwrap_or_default();
            let size = Size::new(
                style.width.or(raw.width).unwrap_or(default_organizer_size.width),
                style.height.or(raw.height).unwrap_or(default_organizer_size.height),
            );
            let data: OrganizerData = serde_json::from_value(raw.data.clone()).ok()?;
            let organizer = OrganizerNode {
                id: raw.id,
                position,
                parent_id: raw.parent_id,
                size,
                data,
            };
            let attached = raw
                .data
                .get("attachedToSemanticId")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty());
            return Some(match attached {
                Some(sid) => Node::Wagon(WagonNode {
                    organizer,
                    attached_to_semantic_id: sid.to_string(),
                }),
                None => Node::Organizer(organizer),
            });
        }

        let data: ConstructData = serde_json::from_value(raw.data).ok()?;
        let size = match (raw.width, raw.height) {
            (Some(w), Some(h)) => Some(Size::new(w, h)),
            _ => None,
        };
        Some(Node::Construct(ConstructNode {
            id: raw.id,
            position,
            parent_id: raw.parent_id,
            size,
            data,
        }))
    }

    /// Snapshot form, the inverse of [`Node::from_value`]
    pub fn to_value(&self) -> Value {
        match self {
            Node::Construct(c) => {
                let mut obj = JsonMap::new();
                obj.insert("id".into(), Value::String(c.id.clone()));
                obj.insert("type".into(), Value::String("construct".into()));
                obj.insert("position".into(), position_value(c.position));
                if let Some(parent) = &c.parent_id {
                    obj.insert("parentId".into(), Value::String(parent.clone()));
                }
                if let Some(size) = c.size {
                    obj.insert("width".into(), size.width.into());
                    obj.insert("height".into(), size.height.into());
                }
                obj.insert(
                    "data".into(),
                    serde_json::to_value(&c.data).unwrap_or(Value::Null),
                );
                Value::Object(obj)
            }
            Node::Organizer(o) => organizer_value(o, None),
            Node::Wagon(w) => organizer_value(&w.organizer, Some(&w.attached_to_semantic_id)),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Node::Construct(c) => &c.id,
            Node::Organizer(o) => &o.id,
            Node::Wagon(w) => &w.organizer.id,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Node::Construct(c) => c.position,
            Node::Organizer(o) => o.position,
            Node::Wagon(w) => w.organizer.position,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Node::Construct(c) => c.parent_id.as_deref(),
            Node::Organizer(o) => o.parent_id.as_deref(),
            Node::Wagon(w) => w.organizer.parent_id.as_deref(),
        }
    }

    /// Own size, falling back to `construct_default` for unsized constructs
    pub fn size(&self, construct_default: Size) -> Size {
        match self {
            Node::Construct(c) => c.size.unwrap_or(construct_default),
            Node::Organizer(o) => o.size,
            Node::Wagon(w) => w.organizer.size,
        }
    }

    pub fn semantic_id(&self) -> Option<&str> {
        match self {
            Node::Construct(c) => Some(c.semantic_id()),
            _ => None,
        }
    }

    pub fn as_construct(&self) -> Option<&ConstructNode> {
        match self {
            Node::Construct(c) => Some(c),
            _ => None,
        }
    }

    /// Organizer view for both free-standing organizers and wagons
    pub fn as_organizer(&self) -> Option<&OrganizerNode> {
        match self {
            Node::Organizer(o) => Some(o),
            Node::Wagon(w) => Some(&w.organizer),
            Node::Construct(_) => None,
        }
    }

    pub fn is_wagon(&self) -> bool {
        matches!(self, Node::Wagon(_))
    }

    /// Rectangle in the node's own (parent-relative) frame
    pub fn local_rect(&self, construct_default: Size) -> Rect {
        Rect::from_position(self.position(), self.size(construct_default))
    }
}

fn position_value(p: Position) -> Value {
    serde_json::json!({ "x": p.x, "y": p.y })
}

fn organizer_value(o: &OrganizerNode, attached: Option<&str>) -> Value {
    let mut data = match serde_json::to_value(&o.data) {
        Ok(Value::Object(map)) => map,
        _ => JsonMap::new(),
    };
    data.insert("isOrganizer".into(), Value::Bool(true));
    if let Some(sid) = attached {
        data.insert("attachedToSemanticId".into(), Value::String(sid.to_string()));
    }

    let mut obj = JsonMap::new();
    obj.insert("id".into(), Value::String(o.id.clone()));
    obj.insert("type".into(), Value::String("organizer".into()));
    obj.insert("position".into(), position_value(o.position));
    if let Some(parent) = &o.parent_id {
        obj.insert("parentId".into(), Value::String(parent.clone()));
    }
    obj.insert(
        "style".into(),
        serde_json::json!({ "width": o.size.width, "height": o.size.height }),
    );
    obj.insert("data".into(), Value::Object(data));
    Value::Object(obj)
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Enum,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConfig {
    pub id: String,
    pub port_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstructSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    pub display_name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub fields: Vec<FieldSchema>,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub built_in: bool,
}

impl ConstructSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn port(&self, id: &str) -> Option<&PortConfig> {
        self.ports.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Source,
    Sink,
    Bidirectional,
    Relay,
    Intercept,
}

impl Polarity {
    /// May sit on the source end of an edge
    pub fn can_emit(self) -> bool {
        matches!(self, Polarity::Source | Polarity::Relay | Polarity::Bidirectional)
    }

    /// May sit on the target end of an edge
    pub fn can_accept(self) -> bool {
        matches!(
            self,
            Polarity::Sink | Polarity::Intercept | Polarity::Relay | Polarity::Bidirectional
        )
    }

    /// Accepts any port type without consulting `compatibleWith`
    pub fn is_wildcard(self) -> bool {
        matches!(self, Polarity::Relay | Polarity::Intercept)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSchema {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub semantic_description: String,
    pub polarity: Polarity,
    #[serde(default)]
    pub compatible_with: Vec<String>,
    #[serde(default)]
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaPackage {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

// ---------------------------------------------------------------------------
// Pin constraints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinDirection {
    N,
    NE,
    E,
    SE,
    S,
    SW,
    W,
    NW,
}

impl PinDirection {
    /// Unit signs `(dx, dy)`: which side of the target the source sits on.
    /// `0` means the source is centred on the target along that axis.
    pub fn signs(self) -> (i8, i8) {
        match self {
            PinDirection::N => (0, -1),
            PinDirection::NE => (1, -1),
            PinDirection::E => (1, 0),
            PinDirection::SE => (1, 1),
            PinDirection::S => (0, 1),
            PinDirection::SW => (-1, 1),
            PinDirection::W => (-1, 0),
            PinDirection::NW => (-1, -1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinConstraint {
    pub id: String,
    pub source_organizer_id: String,
    pub target_organizer_id: String,
    pub direction: PinDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ORG: Size = Size {
        width: 400.0,
        height: 300.0,
    };

    #[test]
    fn test_classify_construct() {
        let value = json!({
            "id": "n-1",
            "type": "construct",
            "position": { "x": 10, "y": 20 },
            "data": {
                "constructType": "service",
                "semanticId": "service-abc123",
                "values": { "name": "api" },
                "connections": [
                    { "portId": "flow-out", "targetSemanticId": "db-1", "targetPortId": "flow-in" },
                    { "garbage": true }
                ]
            }
        });

        let node = Node::from_value(&value, ORG).unwrap();
        let construct = node.as_construct().unwrap();
        assert_eq!(construct.semantic_id(), "service-abc123");
        assert_eq!(construct.data.connections.len(), 1);
        assert_eq!(node.position(), Position::new(10.0, 20.0));
    }

    #[test]
    fn test_classify_wagon() {
        let value = json!({
            "id": "n-2",
            "type": "organizer",
            "position": { "x": 0, "y": 120 },
            "parentId": "n-1",
            "style": { "width": 300, "height": 200 },
            "data": { "isOrganizer": true, "name": "Details", "attachedToSemanticId": "service-abc123" }
        });

        let node = Node::from_value(&value, ORG).unwrap();
        assert!(node.is_wagon());
        assert_eq!(node.size(ORG), Size::new(300.0, 200.0));
        assert_eq!(Node::from_value(&node.to_value(), ORG), Some(node));
    }

    #[test]
    fn test_organizer_without_attachment_is_plain_organizer() {
        let value = json!({
            "id": "n-3",
            "type": "organizer",
            "data": { "isOrganizer": true, "name": "Group", "attachedToSemanticId": "" }
        });

        let node = Node::from_value(&value, ORG).unwrap();
        assert!(matches!(node, Node::Organizer(_)));
        assert_eq!(node.size(ORG), ORG);
    }

    #[test]
    fn test_unclassifiable_node() {
        assert!(Node::from_value(&json!({ "id": "n-4", "data": 5 }), ORG).is_none());
        assert!(Node::from_value(&json!({ "type": "construct" }), ORG).is_none());
    }
}
