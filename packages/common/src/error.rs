use thiserror::Error;

/// What kind of entity a lookup failed to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Page,
    Schema,
    PortSchema,
    SchemaGroup,
    SchemaPackage,
    Construct,
    Organizer,
    Field,
    Port,
    PinConstraint,
    Edge,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Page => "Page",
            EntityKind::Schema => "Schema",
            EntityKind::PortSchema => "Port schema",
            EntityKind::SchemaGroup => "Schema group",
            EntityKind::SchemaPackage => "Schema package",
            EntityKind::Construct => "Construct",
            EntityKind::Organizer => "Organizer",
            EntityKind::Field => "Field",
            EntityKind::Port => "Port",
            EntityKind::PinConstraint => "Pin constraint",
            EntityKind::Edge => "Edge",
        };
        f.write_str(name)
    }
}

/// Error taxonomy shared by every carta package
#[derive(Error, Debug)]
pub enum CartaError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: EntityKind, id: String },

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    ValidationFailure(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CartaError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        CartaError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn already_exists(kind: EntityKind, id: impl Into<String>) -> Self {
        CartaError::AlreadyExists {
            kind,
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CartaError::NotFound { .. })
    }
}

impl From<String> for CartaError {
    fn from(s: String) -> Self {
        CartaError::ValidationFailure(s)
    }
}

impl From<&str> for CartaError {
    fn from(s: &str) -> Self {
        CartaError::ValidationFailure(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = CartaError::not_found(EntityKind::Schema, "service");
        assert_eq!(err.to_string(), "Schema not found: service");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_already_exists_message() {
        let err = CartaError::already_exists(EntityKind::Field, "name");
        assert_eq!(err.to_string(), "Field already exists: name");
        assert!(!err.is_not_found());
    }
}
