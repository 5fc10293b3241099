//! Snapshot exploded into a directory:
//!
//! ```text
//! <root>/
//!   workspace.json          manifest: version, title, active page, page index
//!   schemas.json            schemas, port schemas, groups, packages
//!   pages/
//!     overview.json         ungrouped page
//!     backend/
//!       services.json       page in group "Backend"
//!       services-2.json     second page whose name slugs the same
//! ```
//!
//! The manifest's page index is authoritative: files under `pages/` that it
//! does not list are ignored on read.

use crate::snapshot::{validate, PageSnapshot, Snapshot, CURRENT_FORMAT_VERSION};
use carta_common::{slugify, CartaError, CartaResult};
use carta_editor::{ConstructSchema, PortSchema, SchemaGroup, SchemaPackage};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MANIFEST_FILE: &str = "workspace.json";
pub const SCHEMAS_FILE: &str = "schemas.json";
pub const PAGES_DIR: &str = "pages";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEntry {
    pub id: String,
    pub name: String,
    /// Relative to the workspace root, `/`-separated
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceManifest {
    pub format_version: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_page_id: Option<String>,
    pub pages: Vec<PageEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchemaCatalog {
    pub schemas: Vec<ConstructSchema>,
    pub port_schemas: Vec<PortSchema>,
    pub schema_groups: Vec<SchemaGroup>,
    pub schema_packages: Vec<SchemaPackage>,
}

/// Hands out `slug`, `slug-2`, `slug-3`, ... per directory
#[derive(Default)]
struct SlugAllocator {
    taken: HashMap<String, HashSet<String>>,
}

impl SlugAllocator {
    fn allocate(&mut self, dir: &str, name: &str) -> String {
        let base = slugify(name);
        let taken = self.taken.entry(dir.to_string()).or_default();
        let mut candidate = base.clone();
        let mut n = 2;
        while !taken.insert(candidate.clone()) {
            candidate = format!("{}-{}", base, n);
            n += 1;
        }
        candidate
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> CartaResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    debug!(path = %path.display(), "Wrote workspace file");
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> CartaResult<T> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|err| {
        CartaError::ValidationFailure(format!("{}: {}", path.display(), err))
    })
}

fn resolve(root: &Path, file: &str) -> PathBuf {
    file.split('/').fold(root.to_path_buf(), |path, part| path.join(part))
}

/// Write `snapshot` under `root`, replacing any previous `pages/` tree.
/// Returns the files written.
pub fn write_workspace(root: &Path, snapshot: &Snapshot) -> CartaResult<Vec<PathBuf>> {
    validate(snapshot)?;
    fs::create_dir_all(root)?;
    let pages_dir = root.join(PAGES_DIR);
    if pages_dir.exists() {
        fs::remove_dir_all(&pages_dir)?;
    }

    let mut written = Vec::new();
    let mut slugs = SlugAllocator::default();
    let mut entries = Vec::with_capacity(snapshot.pages.len());
    for page in &snapshot.pages {
        let dir = match page.page.group.as_deref().filter(|g| !g.is_empty()) {
            Some(group) => format!("{}/{}", PAGES_DIR, slugify(group)),
            None => PAGES_DIR.to_string(),
        };
        let slug = slugs.allocate(&dir, &page.page.name);
        let file = format!("{}/{}.json", dir, slug);
        let path = resolve(root, &file);
        write_json(&path, page)?;
        written.push(path);
        entries.push(PageEntry {
            id: page.page.id.clone(),
            name: page.page.name.clone(),
            file,
        });
    }

    let catalog = SchemaCatalog {
        schemas: snapshot.schemas.clone(),
        port_schemas: snapshot.port_schemas.clone(),
        schema_groups: snapshot.schema_groups.clone(),
        schema_packages: snapshot.schema_packages.clone(),
    };
    let catalog_path = root.join(SCHEMAS_FILE);
    write_json(&catalog_path, &catalog)?;
    written.push(catalog_path);

    let manifest = WorkspaceManifest {
        format_version: CURRENT_FORMAT_VERSION,
        title: snapshot.title.clone(),
        active_page_id: snapshot.active_page_id.clone(),
        pages: entries,
        exported_at: snapshot.exported_at.clone(),
    };
    let manifest_path = root.join(MANIFEST_FILE);
    write_json(&manifest_path, &manifest)?;
    written.push(manifest_path);

    info!(root = %root.display(), pages = snapshot.pages.len(), "Wrote workspace");
    Ok(written)
}

/// Reassemble the snapshot stored under `root`
pub fn read_workspace(root: &Path) -> CartaResult<Snapshot> {
    let manifest: WorkspaceManifest = read_json(&root.join(MANIFEST_FILE))?;
    let catalog_path = root.join(SCHEMAS_FILE);
    let catalog: SchemaCatalog = if catalog_path.exists() {
        read_json(&catalog_path)?
    } else {
        SchemaCatalog::default()
    };

    let mut pages = Vec::with_capacity(manifest.pages.len());
    for entry in &manifest.pages {
        let page: PageSnapshot = read_json(&resolve(root, &entry.file))?;
        if page.page.id != entry.id {
            return Err(CartaError::ValidationFailure(format!(
                "{} holds page {}, manifest expects {}",
                entry.file, page.page.id, entry.id
            )));
        }
        pages.push(page);
    }

    let snapshot = Snapshot {
        format_version: manifest.format_version,
        title: manifest.title,
        active_page_id: manifest.active_page_id,
        pages,
        schemas: catalog.schemas,
        port_schemas: catalog.port_schemas,
        schema_groups: catalog.schema_groups,
        schema_packages: catalog.schema_packages,
        exported_at: manifest.exported_at,
    };
    validate(&snapshot)?;
    info!(root = %root.display(), pages = snapshot.pages.len(), "Read workspace");
    Ok(snapshot)
}

/// A workspace directory is recognised by its manifest
pub fn is_workspace_dir(path: &Path) -> bool {
    path.is_dir() && path.join(MANIFEST_FILE).is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::extract;
    use carta_editor::testing::seeded_document;
    use carta_editor::PagePatch;
    use tempfile::TempDir;

    #[test]
    fn test_slug_collisions_get_suffixes() {
        let mut slugs = SlugAllocator::default();
        assert_eq!(slugs.allocate("pages", "Services"), "services");
        assert_eq!(slugs.allocate("pages", "services!"), "services-2");
        assert_eq!(slugs.allocate("pages", "Services"), "services-3");
        assert_eq!(slugs.allocate("pages/backend", "Services"), "services");
    }

    #[test]
    fn test_layout_on_disk() {
        let (doc, first) = seeded_document();
        doc.update_page(&first, &PagePatch { name: Some("Overview".into()), ..Default::default() });
        let a = doc.create_page("Services", None);
        let b = doc.create_page("Services", None);
        for id in [&a.id, &b.id] {
            doc.update_page(id, &PagePatch { group: Some("Backend".into()), ..Default::default() });
        }

        let dir = TempDir::new().unwrap();
        let written = write_workspace(dir.path(), &extract(&doc)).unwrap();
        assert_eq!(written.len(), 5);
        assert!(dir.path().join("pages/overview.json").is_file());
        assert!(dir.path().join("pages/backend/services.json").is_file());
        assert!(dir.path().join("pages/backend/services-2.json").is_file());
        assert!(is_workspace_dir(dir.path()));
    }

    #[test]
    fn test_rewrite_drops_stale_pages() {
        let (doc, page) = seeded_document();
        let extra = doc.create_page("Scratch", None);
        let dir = TempDir::new().unwrap();
        write_workspace(dir.path(), &extract(&doc)).unwrap();
        assert!(dir.path().join("pages/scratch.json").is_file());

        doc.delete_page(&extra.id).unwrap();
        write_workspace(dir.path(), &extract(&doc)).unwrap();
        assert!(!dir.path().join("pages/scratch.json").exists());
        let snapshot = read_workspace(dir.path()).unwrap();
        assert_eq!(snapshot.pages.len(), 1);
        assert_eq!(snapshot.pages[0].page.id, page);
    }

    #[test]
    fn test_mismatched_page_file_is_rejected() {
        let (doc, _) = seeded_document();
        doc.create_page("Second", None);
        let dir = TempDir::new().unwrap();
        write_workspace(dir.path(), &extract(&doc)).unwrap();

        let main = dir.path().join("pages/main.json");
        let second = dir.path().join("pages/second.json");
        let main_text = fs::read_to_string(&main).unwrap();
        fs::write(&main, fs::read_to_string(&second).unwrap()).unwrap();
        fs::write(&second, main_text).unwrap();

        let err = read_workspace(dir.path()).unwrap_err();
        assert!(matches!(err, CartaError::ValidationFailure(_)));
    }
}
