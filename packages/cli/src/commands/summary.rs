use super::load_document;
use crate::config::Config;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Args)]
pub struct SummaryArgs {
    /// Snapshot file (.json) or workspace directory
    #[arg(short, long)]
    pub input: PathBuf,

    /// Print JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

pub fn summary(args: SummaryArgs, cwd: &Path) -> Result<()> {
    let config = Config::load(cwd)?;
    let doc = load_document(&args.input, &config)?;
    let active = doc.active_page_id();
    let pages = doc.list_pages();

    if args.json {
        let pages: Vec<_> = pages
            .iter()
            .map(|page| {
                json!({
                    "page": page,
                    "active": active.as_deref() == Some(page.id.as_str()),
                    "summary": doc.page_summary(&page.id),
                })
            })
            .collect();
        let out = json!({
            "title": doc.title(),
            "schemas": doc.list_schemas().len(),
            "pages": pages,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let title = doc.title();
    let title = if title.is_empty() { "(untitled)".to_string() } else { title };
    println!("{} {}", "📄".bright_blue(), title.bold());
    println!("   {} schemas, {} pages", doc.list_schemas().len(), pages.len());
    println!();
    for page in &pages {
        let s = doc.page_summary(&page.id);
        let marker = if active.as_deref() == Some(page.id.as_str()) {
            "●".green()
        } else {
            "○".normal()
        };
        println!(
            "  {} {} {}",
            marker,
            page.name.bold(),
            format!("({})", page.id).dimmed()
        );
        println!(
            "      {} constructs, {} organizers, {} edges",
            s.constructs, s.organizers, s.edges
        );
    }
    Ok(())
}
