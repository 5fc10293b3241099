pub mod init;
pub mod layout;
pub mod repair;
pub mod summary;
pub mod tool;
pub mod workspace;

pub use init::{init, InitArgs};
pub use layout::{layout, LayoutArgs};
pub use repair::{repair, RepairArgs};
pub use summary::{summary, SummaryArgs};
pub use tool::{tool, ToolArgs};
pub use workspace::{export_workspace, import_workspace, ExportArgs, ImportArgs};

use crate::config::Config;
use anyhow::{anyhow, bail, Result};
use carta_editor::DiagramDocument;
use carta_workspace::{
    extract, hydrate, is_workspace_dir, read_file, read_workspace, write_file, write_workspace,
};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where a document lives on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Snapshot,
    Workspace,
}

impl Format {
    /// Existing workspace directories and paths without a `.json` extension
    /// are workspaces
    pub fn of(path: &Path) -> Format {
        if is_workspace_dir(path) || path.extension().map_or(true, |e| e != "json") {
            Format::Workspace
        } else {
            Format::Snapshot
        }
    }
}

#[derive(Debug, Args)]
pub struct DocumentArgs {
    /// Snapshot file (.json) or workspace directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// Page id (defaults to the config's defaultPage, then the active page)
    #[arg(short, long)]
    pub page: Option<String>,

    /// Write the result here instead of back to the input
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn load_document(path: &Path, config: &Config) -> Result<DiagramDocument> {
    if !path.exists() {
        bail!("Input does not exist: {}", path.display());
    }
    let snapshot = match Format::of(path) {
        Format::Workspace => read_workspace(path)?,
        Format::Snapshot => read_file(path)?,
    };
    let doc = DiagramDocument::with_config(config.engine_config());
    let report = hydrate(&doc, &snapshot)?;
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    debug!(path = %path.display(), pages = report.pages, nodes = report.nodes, "Loaded document");
    Ok(doc)
}

/// Write `doc` to `--output`, or back to `--input`
pub fn save_document(doc: &DiagramDocument, args: &DocumentArgs) -> Result<PathBuf> {
    let target = args.output.clone().unwrap_or_else(|| args.input.clone());
    let snapshot = extract(doc);
    match Format::of(&target) {
        Format::Workspace => {
            write_workspace(&target, &snapshot)?;
        }
        Format::Snapshot => write_file(&target, &snapshot)?,
    }
    Ok(target)
}

/// `--page`, else the configured default, else the active page
pub fn resolve_page(doc: &DiagramDocument, requested: Option<&str>, config: &Config) -> Result<String> {
    if let Some(id) = requested.or(config.default_page.as_deref()) {
        return match doc.get_page(id) {
            Some(page) => Ok(page.id),
            None => Err(anyhow!("Page not found: {}", id)),
        };
    }
    doc.active_page_id()
        .or_else(|| doc.list_pages().into_iter().next().map(|p| p.id))
        .ok_or_else(|| anyhow!("Document has no pages"))
}

pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("  {} {}", "⚠".yellow(), warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carta_editor::testing::seeded_document;
    use tempfile::TempDir;

    #[test]
    fn test_format_detection() {
        assert_eq!(Format::of(Path::new("doc.json")), Format::Snapshot);
        assert_eq!(Format::of(Path::new("out/diagram")), Format::Workspace);
    }

    #[test]
    fn test_save_then_load_both_formats() {
        let (doc, page) = seeded_document();
        let dir = TempDir::new().unwrap();
        let config = Config::default();

        for name in ["doc.json", "workspace"] {
            let args = DocumentArgs {
                input: dir.path().join(name),
                page: None,
                output: None,
            };
            let written = save_document(&doc, &args).unwrap();
            let loaded = load_document(&written, &config).unwrap();
            assert_eq!(resolve_page(&loaded, None, &config).unwrap(), page);
        }
    }

    #[test]
    fn test_resolve_page_prefers_flag_then_config() {
        let (doc, first) = seeded_document();
        let second = doc.create_page("Second", None);
        let config = Config {
            default_page: Some(second.id.clone()),
            ..Default::default()
        };

        assert_eq!(resolve_page(&doc, Some(first.as_str()), &config).unwrap(), first);
        assert_eq!(resolve_page(&doc, None, &config).unwrap(), second.id);
        assert_eq!(resolve_page(&doc, None, &Config::default()).unwrap(), first);
        assert!(resolve_page(&doc, Some("nope"), &config).is_err());
    }
}
