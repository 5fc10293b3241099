pub mod error;
pub mod geometry;
pub mod ids;
pub mod result;

pub use error::*;
pub use geometry::*;
pub use ids::*;
pub use result::*;
