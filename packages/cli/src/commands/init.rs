use crate::config::{Config, DEFAULT_CONFIG_NAME};
use anyhow::Result;
use carta_editor::DiagramDocument;
use carta_workspace::{extract, write_file};
use clap::Args;
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Also create an empty document at this path
    #[arg(short, long)]
    pub document: Option<PathBuf>,

    /// Title for the new document
    #[arg(short, long, default_value = "Untitled")]
    pub title: String,

    /// Transaction origin recorded in the config
    #[arg(long)]
    pub origin: Option<String>,

    /// Force overwrite existing config
    #[arg(short, long)]
    pub force: bool,
}

pub fn init(args: InitArgs, cwd: &Path) -> Result<()> {
    let config_path = Config::path_in(cwd);

    // Check if config already exists
    if config_path.exists() && !args.force {
        println!(
            "{} {} already exists",
            "⚠️".yellow(),
            DEFAULT_CONFIG_NAME.bright_white()
        );
        println!("Use --force to overwrite");
        return Ok(());
    }

    println!("{}", "📝 Initializing Carta project...".bright_blue().bold());

    let config = Config {
        origin: args.origin.clone(),
        ..Default::default()
    };

    if let Some(path) = &args.document {
        let path = cwd.join(path);
        let doc = DiagramDocument::with_config(config.engine_config());
        doc.seed_builtin_ports();
        doc.set_title(&args.title);
        doc.ensure_page();
        write_file(&path, &extract(&doc))?;
        println!("  {} Created {}", "✓".green(), path.display());
    }

    fs::write(&config_path, serde_json::to_string_pretty(&config)?)?;
    println!("  {} Created {}", "✓".green(), DEFAULT_CONFIG_NAME);
    println!();
    println!("{}", "✅ Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. carta tool create_schema --input <doc> --params '{{...}}'");
    println!("  2. carta summary --input <doc>");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use carta_workspace::read_file;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_config_and_document() {
        let dir = TempDir::new().unwrap();
        let args = InitArgs {
            document: Some(PathBuf::from("diagram.json")),
            title: "Platform".into(),
            origin: Some("agent:cli".into()),
            force: false,
        };
        init(args, dir.path()).unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.origin.as_deref(), Some("agent:cli"));
        let snapshot = read_file(&dir.path().join("diagram.json")).unwrap();
        assert_eq!(snapshot.title, "Platform");
        assert_eq!(snapshot.pages.len(), 1);
        assert_eq!(snapshot.port_schemas.len(), 7);
    }
}
