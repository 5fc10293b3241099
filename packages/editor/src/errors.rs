//! Typed, non-throwing failures for edge creation

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Construct not found: {semantic_id}")]
    NodeNotFound { semantic_id: String },

    #[error("Port '{port_id}' not found on '{semantic_id}'")]
    PortNotFound { semantic_id: String, port_id: String },

    #[error("Ports are incompatible: {source_type} -> {target_type}")]
    IncompatiblePorts {
        source_type: String,
        target_type: String,
    },
}
