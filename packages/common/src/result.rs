use crate::error::CartaError;

/// Common Result type alias
pub type CartaResult<T> = Result<T, CartaError>;
