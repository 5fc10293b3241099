use super::{load_document, resolve_page, save_document, DocumentArgs};
use crate::config::Config;
use anyhow::{anyhow, Result};
use carta_editor::{execute_tool, TOOL_NAMES};
use clap::Args;
use colored::Colorize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Args)]
pub struct ToolArgs {
    /// Tool name (e.g. create_construct, rename_port); `list` prints them all
    pub name: String,

    /// Tool parameters as a JSON object
    #[arg(long, default_value = "{}")]
    pub params: String,

    /// Run the tool but do not write the document back
    #[arg(long)]
    pub dry_run: bool,

    #[command(flatten)]
    pub document: DocumentArgs,
}

pub fn tool(args: ToolArgs, cwd: &Path) -> Result<()> {
    if args.name == "list" {
        for name in TOOL_NAMES {
            println!("{}", name);
        }
        return Ok(());
    }

    let params: Value = serde_json::from_str(&args.params)
        .map_err(|err| anyhow!("--params is not valid JSON: {}", err))?;
    let config = Config::load(cwd)?;
    let doc = load_document(&args.document.input, &config)?;
    let page_id = resolve_page(&doc, args.document.page.as_deref(), &config)?;

    let response = execute_tool(&doc, &args.name, &params, &page_id);
    println!("{}", serde_json::to_string_pretty(&response)?);

    if !response.success {
        return Err(anyhow!(
            "{} failed: {}",
            args.name,
            response.error.unwrap_or_default()
        ));
    }
    if args.dry_run {
        eprintln!("{} dry run, nothing written", "ℹ".bright_blue());
        return Ok(());
    }
    let target = save_document(&doc, &args.document)?;
    eprintln!("{} {} → {}", "✓".green(), args.name, target.display());
    Ok(())
}
