//! # Carta Editor
//!
//! Mutation, layout and migration engine for collaborative diagram
//! documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ tools: named entry points, {success, data}  │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ engine operations                           │
//! │  - mutations / organizers / pages           │
//! │  - bulk + batch with @N placeholders        │
//! │  - layout: flow, arrange, pin               │
//! │  - schema migration, consistency repair     │
//! └─────────────────────────────────────────────┘
//!                     ↓
//! ┌─────────────────────────────────────────────┐
//! │ document: one yrs transaction per operation │
//! │  graph accessors + NodeIndex over the page  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Core Principles
//!
//! 1. **One operation, one transaction**: peers see every engine call as a
//!    single change-set tagged with the handle's origin
//! 2. **Semantic ids are the public handle**: internal node ids never leave
//!    the page they were minted on
//! 3. **Edges mirror connections**: every edge has a matching connection on
//!    its source construct, and repair restores the pairing when it drifts
//! 4. **Positions are parent-relative**: absolute positions are derived by
//!    walking the parent chain
//!
//! ## Usage
//!
//! ```rust,ignore
//! use carta_editor::{DiagramDocument, FlowOptions};
//!
//! let doc = DiagramDocument::new().with_origin("agent:planner");
//! doc.seed_builtin_ports();
//! let page = doc.create_page("Architecture", None);
//!
//! let api = doc.create_construct(&page.id, "service", values, None, None)?;
//! let db = doc.create_construct(&page.id, "database", Default::default(), None, None)?;
//! doc.connect(&page.id, api.semantic_id(), "flow-out", db.semantic_id(), "flow-in")?;
//!
//! let result = doc.flow_layout(&page.id, FlowOptions::default());
//! ```

pub mod config;
pub mod crdt;
mod document;
mod errors;
pub mod model;

mod bulk;
mod graph;
pub mod layout;
mod migration;
mod mutations;
mod organizers;
mod pages;
mod repair;
mod schema;
pub mod tools;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bulk::{BatchOp, ConnectSpec, ConstructSpec, ItemResult};
pub use config::{EngineConfig, GridConfig, LayoutDefaults};
pub use document::{natural_id_cmp, DiagramDocument, DocRead, DocTxn, DocWrite, NodeIndex};
pub use errors::ConnectError;
pub use graph::PageSummary;
pub use layout::{
    Alignment, Anchor, ArrangeConstraint, ArrangeOptions, ArrangeStrategy, FlowDirection,
    FlowOptions, FlowResult, LayoutOutcome, PinLayoutResult, Selector,
};
pub use migration::{coerce_value, MigrationResult};
pub use model::{
    Connection, ConstructData, ConstructNode, ConstructSchema, Edge, FieldSchema, FieldType, Node,
    OrganizerData, OrganizerNode, Page, PinConstraint, PinDirection, Polarity, PortConfig,
    PortSchema, SchemaGroup, SchemaPackage, Values, WagonNode,
};
pub use organizers::{NewOrganizer, OrganizerPatch};
pub use pages::{PagePatch, DEFAULT_PAGE_NAME};
pub use repair::{OrphanReport, RepairResult};
pub use schema::{builtin_port_schemas, can_connect, validate_schema};
pub use tools::{execute_tool, ToolResponse, TOOL_NAMES};

// Re-export common types for convenience
pub use carta_common::{CartaError, CartaResult, Position, Rect, Size};
