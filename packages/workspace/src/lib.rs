//! File formats for diagram documents: a single versioned JSON snapshot, and
//! the same snapshot exploded into a workspace directory.

pub mod snapshot;
pub mod workspace_dir;

pub use snapshot::{
    extract, from_json_str, hydrate, read_file, to_json_string, validate, write_file,
    ImportReport, PageSnapshot, Snapshot, CURRENT_FORMAT_VERSION,
};
pub use workspace_dir::{
    is_workspace_dir, read_workspace, write_workspace, PageEntry, SchemaCatalog,
    WorkspaceManifest,
};
