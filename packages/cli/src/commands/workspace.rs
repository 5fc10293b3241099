use crate::config::Config;
use anyhow::Result;
use carta_editor::DiagramDocument;
use carta_workspace::{extract, hydrate, read_file, read_workspace, write_file, write_workspace};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Snapshot file to explode
    #[arg(short, long)]
    pub input: PathBuf,

    /// Workspace directory to write
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Workspace directory to read
    #[arg(short, long)]
    pub input: PathBuf,

    /// Snapshot file to write
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Snapshot file → workspace directory. Structural only.
pub fn export_workspace(args: ExportArgs, _cwd: &Path) -> Result<()> {
    let snapshot = read_file(&args.input)?;
    let written = write_workspace(&args.output, &snapshot)?;
    println!(
        "{} Exported {} page(s) to {} ({} files)",
        "✓".green(),
        snapshot.pages.len(),
        args.output.display(),
        written.len()
    );
    Ok(())
}

/// Workspace directory → snapshot file, through a document so dangling
/// connections are stripped on the way
pub fn import_workspace(args: ImportArgs, cwd: &Path) -> Result<()> {
    let config = Config::load(cwd)?;
    let snapshot = read_workspace(&args.input)?;
    let doc = DiagramDocument::with_config(config.engine_config());
    let report = hydrate(&doc, &snapshot)?;
    write_file(&args.output, &extract(&doc))?;

    println!(
        "{} Imported {} page(s), {} node(s), {} edge(s) into {}",
        "✓".green(),
        report.pages,
        report.nodes,
        report.edges,
        args.output.display()
    );
    super::print_warnings(&report.warnings);
    Ok(())
}
