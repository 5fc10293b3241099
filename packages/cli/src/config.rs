use carta_editor::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "carta.config.json";

/// Carta configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Page id used when a command is given no `--page`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_page: Option<String>,

    /// Transaction origin for edits made through the CLI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,

    /// Engine tunables (sizes, grid, layout gaps)
    pub engine: EngineConfig,
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &Path) -> anyhow::Result<Self> {
        let config_path = Self::path_in(cwd);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            // Return default config if none exists
            Ok(Config::default())
        }
    }

    pub fn path_in(cwd: &Path) -> PathBuf {
        cwd.join(DEFAULT_CONFIG_NAME)
    }

    /// Engine config with the CLI-level origin applied
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = self.engine.clone();
        if let Some(origin) = &self.origin {
            engine.origin = origin.clone();
        }
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "defaultPage": "page-main",
            "origin": "agent:cli",
            "engine": { "layout": { "layerGap": 300 } }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.default_page.as_deref(), Some("page-main"));
        let engine = config.engine_config();
        assert_eq!(engine.origin, "agent:cli");
        assert_eq!(engine.layout.layer_gap, 300.0);
        assert_eq!(engine.layout.node_gap, 150.0);
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.default_page.is_none());
        assert_eq!(config.engine_config().origin, "carta-engine");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert!(config.origin.is_none());
    }
}
