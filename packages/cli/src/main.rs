mod commands;
mod config;

use clap::{Parser, Subcommand};
use colored::Colorize;
use commands::{
    export_workspace, import_workspace, init, layout, repair, summary, tool, ExportArgs,
    ImportArgs, InitArgs, LayoutArgs, RepairArgs, SummaryArgs, ToolArgs,
};
use tracing_subscriber::EnvFilter;

/// Carta CLI - edit, lay out and repair diagram documents
#[derive(Parser, Debug)]
#[command(name = "carta")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write carta.config.json and optionally an empty document
    Init(InitArgs),

    /// Run one named engine tool against a document
    Tool(ToolArgs),

    /// Run flow, pin or arrange layout on a page
    Layout(LayoutArgs),

    /// Check or restore edge/connection consistency
    Repair(RepairArgs),

    /// Print pages and their contents
    Summary(SummaryArgs),

    /// Explode a snapshot file into a workspace directory
    ExportWorkspace(ExportArgs),

    /// Collapse a workspace directory into a snapshot file
    ImportWorkspace(ImportArgs),
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = std::env::current_dir()
        .map_err(anyhow::Error::from)
        .and_then(|cwd| match cli.command {
            Command::Init(args) => init(args, &cwd),
            Command::Tool(args) => tool(args, &cwd),
            Command::Layout(args) => layout(args, &cwd),
            Command::Repair(args) => repair(args, &cwd),
            Command::Summary(args) => summary(args, &cwd),
            Command::ExportWorkspace(args) => export_workspace(args, &cwd),
            Command::ImportWorkspace(args) => import_workspace(args, &cwd),
        });

    if let Err(err) = result {
        eprintln!();
        eprintln!("{} {}", "Error:".red().bold(), err);
        eprintln!();
        std::process::exit(1);
    }
}
