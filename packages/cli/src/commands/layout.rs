use super::{load_document, print_warnings, resolve_page, save_document, DocumentArgs};
use crate::config::Config;
use anyhow::{anyhow, Result};
use carta_editor::{ArrangeOptions, FlowDirection, FlowOptions};
use clap::{Args, ValueEnum};
use colored::Colorize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LayoutKind {
    /// Layered layout along flow edges
    Flow,
    /// Resolve organizer pin constraints
    Pin,
    /// Grid / constraint / force arrangement
    Arrange,
}

#[derive(Debug, Args)]
pub struct LayoutArgs {
    #[arg(value_enum)]
    pub kind: LayoutKind,

    /// Flow direction (TB, BT, LR, RL); overrides --options
    #[arg(short, long)]
    pub direction: Option<String>,

    /// Layout options as JSON (FlowOptions or ArrangeOptions)
    #[arg(long)]
    pub options: Option<String>,

    #[command(flatten)]
    pub document: DocumentArgs,
}

fn parse_options<T: DeserializeOwned + Default>(raw: Option<&str>) -> Result<T> {
    match raw {
        Some(text) => serde_json::from_str(text).map_err(|err| anyhow!("Invalid --options: {}", err)),
        None => Ok(T::default()),
    }
}

pub fn parse_direction(raw: &str) -> Result<FlowDirection> {
    serde_json::from_value(Value::String(raw.to_ascii_uppercase()))
        .map_err(|_| anyhow!("Invalid direction: {}. Use: TB, BT, LR, or RL", raw))
}

pub fn layout(args: LayoutArgs, cwd: &Path) -> Result<()> {
    let config = Config::load(cwd)?;
    let doc = load_document(&args.document.input, &config)?;
    let page_id = resolve_page(&doc, args.document.page.as_deref(), &config)?;

    let (updated, warnings) = match args.kind {
        LayoutKind::Flow => {
            let mut options: FlowOptions = parse_options(args.options.as_deref())?;
            if let Some(direction) = args.direction.as_deref() {
                options.direction = parse_direction(direction)?;
            }
            let result = doc.flow_layout(&page_id, options);
            (result.updated, result.warnings)
        }
        LayoutKind::Pin => {
            let result = doc.apply_pin_layout(&page_id);
            (result.updated, result.warnings)
        }
        LayoutKind::Arrange => {
            let options: ArrangeOptions = parse_options(args.options.as_deref())?;
            let result = doc.arrange_layout(&page_id, options);
            (result.updated, result.warnings)
        }
    };

    println!(
        "{} {:?} layout on {}: {} node(s) moved",
        "✓".green(),
        args.kind,
        page_id,
        updated
    );
    print_warnings(&warnings);

    let target = save_document(&doc, &args.document)?;
    println!("  → {}", target.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_direction() {
        assert_eq!(parse_direction("lr").unwrap(), FlowDirection::LR);
        assert_eq!(parse_direction("TB").unwrap(), FlowDirection::TB);
        assert!(parse_direction("up").is_err());
    }

    #[test]
    fn test_parse_options_defaults() {
        let options: FlowOptions = parse_options(None).unwrap();
        assert_eq!(options.source_port, "flow-out");
        let options: FlowOptions = parse_options(Some(r#"{ "direction": "RL" }"#)).unwrap();
        assert_eq!(options.direction, FlowDirection::RL);
        assert!(parse_options::<ArrangeOptions>(Some("[")).is_err());
    }
}
