use super::{load_document, print_warnings, resolve_page, save_document, DocumentArgs};
use crate::config::Config;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::Path;

#[derive(Debug, Args)]
pub struct RepairArgs {
    /// Rebuild page containers from snapshots, not just edge/connection pairing
    #[arg(long)]
    pub rebuild: bool,

    /// Report problems without changing anything
    #[arg(long)]
    pub check: bool,

    /// Repair every page instead of one
    #[arg(long)]
    pub all_pages: bool,

    #[command(flatten)]
    pub document: DocumentArgs,
}

pub fn repair(args: RepairArgs, cwd: &Path) -> Result<()> {
    let config = Config::load(cwd)?;
    let doc = load_document(&args.document.input, &config)?;
    let pages = if args.all_pages {
        doc.list_pages().into_iter().map(|p| p.id).collect()
    } else {
        vec![resolve_page(&doc, args.document.page.as_deref(), &config)?]
    };

    if args.check {
        let mut dirty = false;
        for page_id in &pages {
            let report = doc.find_orphans(page_id);
            if report.is_clean() {
                println!("  {} {} is consistent", "✓".green(), page_id);
            } else {
                dirty = true;
                println!("  {} {}", "✗".red(), page_id);
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        if dirty {
            anyhow::bail!("Inconsistencies found; run without --check to repair");
        }
        return Ok(());
    }

    for page_id in &pages {
        let result = if args.rebuild {
            doc.rebuild_page(page_id)
        } else {
            doc.repair_connections(page_id)
        };
        println!(
            "  {} {}: {} edge(s) removed, {} added, {} connection(s) added, {} pruned",
            "✓".green(),
            page_id,
            result.edges_removed,
            result.edges_added,
            result.connections_added,
            result.connections_pruned
        );
        print_warnings(&result.warnings);
    }

    let target = save_document(&doc, &args.document)?;
    println!("  → {}", target.display());
    Ok(())
}
